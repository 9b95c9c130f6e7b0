use num_traits::ToPrimitive;

/// Split shuffled example indices into training and validation indices, where the validation part is the last `validation_fraction` of them.
pub fn train_validation_split(
	indices: &[usize],
	validation_fraction: f32,
) -> (&[usize], &[usize]) {
	let split_index = ((1.0 - validation_fraction) * indices.len().to_f32().unwrap())
		.round()
		.to_usize()
		.unwrap_or(indices.len())
		.min(indices.len());
	indices.split_at(split_index)
}

/**
The `EarlyStoppingMonitor` keeps track of the monitored loss after each epoch, and if enough epochs have passed without a significant improvement, the `update()` function will return `true` to indicate that training should be stopped.
*/
pub struct EarlyStoppingMonitor {
	threshold: f32,
	epochs: usize,
	n_epochs_without_observed_improvement: usize,
	previous_epoch_loss: Option<f32>,
}

impl EarlyStoppingMonitor {
	pub fn new(threshold: f32, epochs: usize) -> Self {
		EarlyStoppingMonitor {
			threshold,
			epochs,
			previous_epoch_loss: None,
			n_epochs_without_observed_improvement: 0,
		}
	}

	/// Update the monitor with the next epoch's loss. This function returns true if training should stop.
	pub fn update(&mut self, loss: f32) -> bool {
		let result = if let Some(previous_loss) = self.previous_epoch_loss {
			if loss > previous_loss || f32::abs(loss - previous_loss) < self.threshold {
				self.n_epochs_without_observed_improvement += 1;
				self.n_epochs_without_observed_improvement >= self.epochs
			} else {
				self.n_epochs_without_observed_improvement = 0;
				false
			}
		} else {
			false
		};
		self.previous_epoch_loss = Some(loss);
		result
	}
}

#[test]
fn test_split() {
	let indices: Vec<usize> = (0..10).collect();
	let (train, validation) = train_validation_split(&indices, 0.2);
	assert_eq!(train, &[0, 1, 2, 3, 4, 5, 6, 7]);
	assert_eq!(validation, &[8, 9]);
	let (train, validation) = train_validation_split(&indices, 0.0);
	assert_eq!(train.len(), 10);
	assert!(validation.is_empty());
}

#[test]
fn test_monitor_stops_after_plateau() {
	let mut monitor = EarlyStoppingMonitor::new(0.01, 2);
	assert!(!monitor.update(1.0));
	assert!(!monitor.update(0.5));
	assert!(!monitor.update(0.499));
	assert!(monitor.update(0.6));
}
