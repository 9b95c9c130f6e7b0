use super::{mean::Mean, StreamingMetric};
use ndarray::prelude::*;
use num_traits::clamp;

/// CrossEntropy is the loss function used in classification with a softmax output. [Learn more](https://en.wikipedia.org/wiki/Cross_entropy#Cross-entropy_loss_function_and_logistic_regression).
#[derive(Debug, Default)]
pub struct CrossEntropy(Mean);

/// The input to [CrossEntropy](struct.CrossEntropy.html).
pub struct CrossEntropyInput<'a> {
	/// (n_classes)
	pub probabilities: ArrayView1<'a, f32>,
	/// The zero based index of the true class.
	pub label: usize,
}

impl<'a> StreamingMetric<'a> for CrossEntropy {
	type Input = CrossEntropyInput<'a>;
	type Output = Option<f32>;

	fn update(&mut self, value: CrossEntropyInput) {
		// Cross entropy is undefined when the probability of the true class is 0, so it is clamped to (EPSILON, 1 - EPSILON).
		let probability = value
			.probabilities
			.get(value.label)
			.cloned()
			.unwrap_or(0.0);
		let probability = clamp(probability, std::f32::EPSILON, 1.0 - std::f32::EPSILON);
		self.0.update(-probability.ln())
	}

	fn merge(&mut self, other: Self) {
		self.0.merge(other.0)
	}

	fn finalize(self) -> Self::Output {
		self.0.finalize()
	}
}

#[test]
fn test_cross_entropy() {
	let mut metric = CrossEntropy::default();
	let probabilities = arr1(&[0.25, 0.75]);
	metric.update(CrossEntropyInput {
		probabilities: probabilities.view(),
		label: 1,
	});
	metric.update(CrossEntropyInput {
		probabilities: probabilities.view(),
		label: 0,
	});
	let expected = (-(0.75f32.ln()) - 0.25f32.ln()) / 2.0;
	assert!((metric.finalize().unwrap() - expected).abs() < 1e-6);
}
