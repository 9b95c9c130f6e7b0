use super::Optimizer;
use ndarray::{prelude::*, Zip};

/// The state an optimizer keeps between steps: for Adam, the first and second moment estimates of every parameter array.
pub struct OptimizerState {
	optimizer: Optimizer,
	n_steps: i32,
	moments: Vec<(ArrayD<f32>, ArrayD<f32>)>,
}

impl OptimizerState {
	/// `shapes` holds the shape of each parameter array, in the order of the `slot` passed to `update`.
	pub fn new(optimizer: Optimizer, shapes: &[&[usize]]) -> Self {
		let moments = match optimizer {
			Optimizer::Sgd { .. } => Vec::new(),
			Optimizer::Adam { .. } => shapes
				.iter()
				.map(|shape| (ArrayD::zeros(shape.to_vec()), ArrayD::zeros(shape.to_vec())))
				.collect(),
		};
		Self {
			optimizer,
			n_steps: 0,
			moments,
		}
	}

	/// Call once per batch, before updating the parameters.
	pub fn begin_step(&mut self) {
		self.n_steps += 1;
	}

	pub fn update<D: Dimension>(
		&mut self,
		slot: usize,
		parameter: ArrayViewMut<f32, D>,
		gradient: ArrayView<f32, D>,
	) {
		match self.optimizer {
			Optimizer::Sgd { learning_rate } => {
				Zip::from(parameter)
					.and(gradient)
					.for_each(|parameter, gradient| *parameter -= learning_rate * gradient);
			}
			Optimizer::Adam {
				learning_rate,
				beta_1,
				beta_2,
				epsilon,
			} => {
				let step_size = learning_rate * (1.0 - beta_2.powi(self.n_steps)).sqrt()
					/ (1.0 - beta_1.powi(self.n_steps));
				let (first_moment, second_moment) = &mut self.moments[slot];
				Zip::from(parameter.into_dyn())
					.and(gradient.into_dyn())
					.and(first_moment)
					.and(second_moment)
					.for_each(|parameter, gradient, m, v| {
						*m = beta_1 * *m + (1.0 - beta_1) * gradient;
						*v = beta_2 * *v + (1.0 - beta_2) * gradient * gradient;
						*parameter -= step_size * *m / (v.sqrt() + epsilon);
					});
			}
		}
	}
}

#[test]
fn test_sgd_step() {
	let mut state = OptimizerState::new(Optimizer::Sgd { learning_rate: 0.5 }, &[&[2]]);
	let mut parameter = arr1(&[1.0f32, 2.0]);
	state.begin_step();
	state.update(0, parameter.view_mut(), arr1(&[2.0f32, -2.0]).view());
	assert_eq!(parameter, arr1(&[0.0, 3.0]));
}

#[test]
fn test_adam_first_step_moves_by_learning_rate() {
	let mut state = OptimizerState::new(Optimizer::adam(), &[&[2, 1]]);
	let mut parameter = arr2(&[[1.0f32], [1.0]]);
	state.begin_step();
	state.update(0, parameter.view_mut(), arr2(&[[3.0f32], [-0.5]]).view());
	// After bias correction the first step has magnitude close to the learning rate in every coordinate.
	assert!((parameter[[0, 0]] - 0.999).abs() < 1e-5);
	assert!((parameter[[1, 0]] - 1.001).abs() < 1e-5);
}
