//! https://en.wikipedia.org/wiki/Algorithms_for_calculating_variance#Parallel_algorithm

use super::{Metric, StreamingMetric};
use num_traits::ToPrimitive;

/// combine two separate means and variances into a single mean and variance
/// useful in parallel algorithms
pub fn merge_mean_m2(
	n_a: u64,
	mean_a: f64,
	m2_a: f64,
	n_b: u64,
	mean_b: f64,
	m2_b: f64,
) -> (f64, f64) {
	let n_a = n_a.to_f64().unwrap();
	let n_b = n_b.to_f64().unwrap();
	(
		(((n_a * mean_a) + (n_b * mean_b)) / (n_a + n_b)),
		m2_a + m2_b + (mean_b - mean_a) * (mean_b - mean_a) * (n_a * n_b / (n_a + n_b)),
	)
}

pub fn m2_to_variance(m2: f64, n: u64) -> f64 {
	m2 / n.to_f64().unwrap()
}

/// `MeanVariance` computes the count, mean and population variance of a stream of values with Welford's algorithm.
#[derive(Clone, Debug, Default)]
pub struct MeanVariance {
	n: u64,
	mean: f64,
	m2: f64,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MeanVarianceOutput {
	pub n: u64,
	pub mean: f64,
	pub variance: f64,
}

impl MeanVarianceOutput {
	/// The unbiased sample variance, `m2 / (n - 1)`. It is `None` with fewer than two values.
	pub fn sample_variance(&self) -> Option<f64> {
		if self.n < 2 {
			None
		} else {
			let n = self.n.to_f64().unwrap();
			Some(self.variance * n / (n - 1.0))
		}
	}
}

impl StreamingMetric<'_> for MeanVariance {
	type Input = f64;
	type Output = Option<MeanVarianceOutput>;

	fn update(&mut self, value: f64) {
		self.n += 1;
		let delta = value - self.mean;
		self.mean += delta / self.n.to_f64().unwrap();
		self.m2 += delta * (value - self.mean);
	}

	fn merge(&mut self, other: Self) {
		if other.n == 0 {
			return;
		}
		if self.n == 0 {
			*self = other;
			return;
		}
		let (mean, m2) = merge_mean_m2(self.n, self.mean, self.m2, other.n, other.mean, other.m2);
		self.n += other.n;
		self.mean = mean;
		self.m2 = m2;
	}

	fn finalize(self) -> Self::Output {
		match self.n {
			0 => None,
			n => Some(MeanVarianceOutput {
				n,
				mean: self.mean,
				variance: m2_to_variance(self.m2, n),
			}),
		}
	}
}

impl<'a> Metric<'a> for MeanVariance {
	type Input = &'a [f64];
	type Output = Option<MeanVarianceOutput>;

	fn compute(input: &'a [f64]) -> Self::Output {
		let mut metric = Self::default();
		for value in input.iter() {
			metric.update(*value);
		}
		metric.finalize()
	}
}

#[test]
fn test_mean_variance() {
	let output = MeanVariance::compute(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]).unwrap();
	assert_eq!(output.n, 8);
	assert!((output.mean - 5.0).abs() < 1e-12);
	assert!((output.variance - 4.0).abs() < 1e-12);
	assert!((output.sample_variance().unwrap() - 32.0 / 7.0).abs() < 1e-12);
}

#[test]
fn test_mean_variance_merge_matches_single_pass() {
	let values = [1.0, 3.5, -2.0, 8.0, 0.25];
	let mut a = MeanVariance::default();
	let mut b = MeanVariance::default();
	for value in values[..2].iter() {
		a.update(*value);
	}
	for value in values[2..].iter() {
		b.update(*value);
	}
	a.merge(b);
	let merged = a.finalize().unwrap();
	let single = MeanVariance::compute(&values).unwrap();
	assert_eq!(merged.n, single.n);
	assert!((merged.mean - single.mean).abs() < 1e-12);
	assert!((merged.variance - single.variance).abs() < 1e-12);
}
