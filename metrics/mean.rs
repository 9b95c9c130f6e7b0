use super::StreamingMetric;
use num_traits::ToPrimitive;

/// The arithmetic mean of a stream of values. The running mean is kept in `f64` so long streams of `f32` losses do not lose precision.
#[derive(Clone, Debug, Default)]
pub struct Mean {
	n: u64,
	mean: f64,
}

impl StreamingMetric<'_> for Mean {
	type Input = f32;
	type Output = Option<f32>;

	fn update(&mut self, value: f32) {
		self.n += 1;
		self.mean += (f64::from(value) - self.mean) / self.n as f64;
	}

	fn merge(&mut self, other: Self) {
		let n = self.n + other.n;
		if n == 0 {
			return;
		}
		let (n_a, n_b) = (self.n as f64, other.n as f64);
		self.mean = (n_a * self.mean + n_b * other.mean) / (n_a + n_b);
		self.n = n;
	}

	fn finalize(self) -> Option<f32> {
		match self.n {
			0 => None,
			_ => self.mean.to_f32(),
		}
	}
}

#[test]
fn test_mean() {
	let mut a = Mean::default();
	a.update(1.0);
	a.update(2.0);
	let mut b = Mean::default();
	b.update(6.0);
	a.merge(b);
	assert_eq!(a.finalize(), Some(3.0));
	assert_eq!(Mean::default().finalize(), None);
}
