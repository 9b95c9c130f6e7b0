use super::{mean::Mean, StreamingMetric};

/// The mean squared error is the mean of squared differences between the predicted value and the label. The input is `(prediction, label)`.
#[derive(Debug, Default)]
pub struct MeanSquaredError(Mean);

impl StreamingMetric<'_> for MeanSquaredError {
	type Input = (f32, f32);
	type Output = Option<f32>;

	fn update(&mut self, value: Self::Input) {
		self.0.update((value.1 - value.0).powi(2))
	}

	fn merge(&mut self, other: Self) {
		self.0.merge(other.0)
	}

	fn finalize(self) -> Self::Output {
		self.0.finalize()
	}
}

#[test]
fn test_mean_squared_error() {
	let mut metric = MeanSquaredError::default();
	metric.update((1.0, 2.0));
	metric.update((3.0, 0.0));
	assert_eq!(metric.finalize(), Some(5.0));
}
