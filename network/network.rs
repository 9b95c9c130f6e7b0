use super::{
	early_stopping::{train_validation_split, EarlyStoppingMonitor},
	optimizer::OptimizerState,
	Error, HistoryEntry, Labels, Split, TrainOptions, TrainProgress, TrainingHistory,
};
use embed_metrics::{CrossEntropy, CrossEntropyInput, MeanSquaredError, StreamingMetric};
use embed_util::{CancellationToken, ProgressCounter};
use itertools::izip;
use ndarray::prelude::*;
use num_traits::ToPrimitive;
use rand::{distributions::Uniform, seq::SliceRandom, Rng, SeedableRng};
use rand_xoshiro::Xoshiro256Plus;

/// This struct holds the parameters of an embedding network. You can train one by calling `Network::train`.
#[derive(Clone, Debug, PartialEq)]
pub struct Network {
	/// (n_levels, embedding_dimension)
	pub embedding: Array2<f32>,
	/// (embedding_dimension + n_predictors, hidden_units)
	pub hidden_weights: Array2<f32>,
	pub hidden_biases: Array1<f32>,
	/// (hidden_units, n_outputs)
	pub output_weights: Array2<f32>,
	pub output_biases: Array1<f32>,
	pub classification: bool,
}

/// The intermediate values of a forward pass that backpropagation needs.
struct Forward {
	inputs: Array2<f32>,
	hidden_preactivations: Array2<f32>,
	hidden_activations: Array2<f32>,
	/// The regression predictions or class probabilities.
	outputs: Array2<f32>,
}

struct Gradients {
	embedding: Array2<f32>,
	hidden_weights: Array2<f32>,
	hidden_biases: Array1<f32>,
	output_weights: Array2<f32>,
	output_biases: Array1<f32>,
}

impl Network {
	/**
	Train a network on examples whose level ids are `levels`, in `0..n_levels`, with the numeric `predictors`, one row per example, to predict `labels`. Pass a `(n_examples, 0)` array if there are no predictors.
	*/
	pub fn train(
		levels: ArrayView1<usize>,
		predictors: ArrayView2<f32>,
		labels: Labels,
		n_levels: usize,
		options: &TrainOptions,
		update_progress: &mut dyn FnMut(TrainProgress),
		cancellation_token: &CancellationToken,
	) -> Result<(Network, TrainingHistory), Error> {
		validate(options)?;
		let n_examples = levels.len();
		if predictors.nrows() != n_examples || labels.len() != n_examples {
			return Err(Error::InvalidOptions(
				"levels, predictors and labels must have the same number of examples".to_owned(),
			));
		}
		if n_examples == 0 {
			return Err(Error::InsufficientData(
				"there are no examples to train on".to_owned(),
			));
		}
		if n_levels <= options.embedding_dimension {
			return Err(Error::InsufficientData(format!(
				"the number of levels ({}) must be greater than the embedding dimension ({})",
				n_levels, options.embedding_dimension
			)));
		}
		if let Some(level) = levels.iter().find(|level| **level >= n_levels) {
			return Err(Error::InvalidOptions(format!(
				"level id {} is out of range",
				level
			)));
		}
		if let Labels::Classification { labels, n_classes } = &labels {
			if *n_classes < 2 || labels.iter().any(|label| label >= n_classes) {
				return Err(Error::InvalidOptions(
					"classification labels must be in 0..n_classes with at least two classes"
						.to_owned(),
				));
			}
		}
		let mut rng = Xoshiro256Plus::seed_from_u64(options.seed);
		let mut network = Network::initialize(
			n_levels,
			predictors.ncols(),
			labels.n_outputs(),
			matches!(labels, Labels::Classification { .. }),
			options,
			&mut rng,
		);
		let mut indices: Vec<usize> = (0..n_examples).collect();
		indices.shuffle(&mut rng);
		let (train_indices, validation_indices) =
			train_validation_split(&indices, options.validation_fraction);
		if train_indices.is_empty() {
			return Err(Error::InsufficientData(
				"the validation fraction leaves no examples to train on".to_owned(),
			));
		}
		let mut train_indices = train_indices.to_vec();
		let validation_indices = validation_indices.to_vec();
		let mut optimizer = OptimizerState::new(
			options.optimizer.clone(),
			&[
				network.embedding.shape(),
				network.hidden_weights.shape(),
				network.hidden_biases.shape(),
				network.output_weights.shape(),
				network.output_biases.shape(),
			],
		);
		let mut early_stopping_monitor = options.early_stopping_options.as_ref().map(|options| {
			EarlyStoppingMonitor::new(
				options.min_decrease_in_loss_for_significant_change,
				options.n_epochs_without_improvement_to_stop,
			)
		});
		let epoch_counter = ProgressCounter::new(options.max_epochs.to_u64().unwrap());
		update_progress(TrainProgress(epoch_counter.clone()));
		let mut history = TrainingHistory::default();
		for epoch in 1..=options.max_epochs {
			train_indices.shuffle(&mut rng);
			for batch in train_indices.chunks(options.batch_size) {
				if cancellation_token.is_cancelled() {
					return Err(Error::Cancelled);
				}
				network.train_batch(batch, levels, predictors, &labels, &mut optimizer);
			}
			let training_loss = network.compute_loss(&train_indices, levels, predictors, &labels, options);
			history.entries.push(HistoryEntry {
				epoch,
				loss: training_loss,
				split: Split::Training,
			});
			let mut monitored_loss = training_loss;
			if !validation_indices.is_empty() {
				let validation_loss =
					network.compute_loss(&validation_indices, levels, predictors, &labels, options);
				history.entries.push(HistoryEntry {
					epoch,
					loss: validation_loss,
					split: Split::Validation,
				});
				monitored_loss = validation_loss;
			}
			epoch_counter.inc(1);
			log::debug!("epoch {}: loss {}", epoch, monitored_loss);
			if let Some(early_stopping_monitor) = early_stopping_monitor.as_mut() {
				if early_stopping_monitor.update(monitored_loss) {
					log::info!("stopped training early after {} epochs", epoch);
					break;
				}
			}
		}
		Ok((network, history))
	}

	fn initialize(
		n_levels: usize,
		n_predictors: usize,
		n_outputs: usize,
		classification: bool,
		options: &TrainOptions,
		rng: &mut Xoshiro256Plus,
	) -> Network {
		let n_inputs = options.embedding_dimension + n_predictors;
		let embedding_distribution = Uniform::new_inclusive(-0.05f32, 0.05);
		let embedding = Array2::from_shape_simple_fn((n_levels, options.embedding_dimension), || {
			rng.sample(embedding_distribution)
		});
		let hidden_weights = glorot_uniform(n_inputs, options.hidden_units, rng);
		let output_weights = glorot_uniform(options.hidden_units, n_outputs, rng);
		Network {
			embedding,
			hidden_weights,
			hidden_biases: Array1::zeros(options.hidden_units),
			output_weights,
			output_biases: Array1::zeros(n_outputs),
			classification,
		}
	}

	pub fn embedding_dimension(&self) -> usize {
		self.embedding.ncols()
	}

	pub fn n_levels(&self) -> usize {
		self.embedding.nrows()
	}

	/// Compute the outputs for the examples at `indices`: one prediction per row for a regression network, or one row of class probabilities for a classification network.
	pub fn predict(
		&self,
		indices: &[usize],
		levels: ArrayView1<usize>,
		predictors: ArrayView2<f32>,
	) -> Array2<f32> {
		self.forward(indices, levels, predictors).outputs
	}

	fn forward(
		&self,
		indices: &[usize],
		levels: ArrayView1<usize>,
		predictors: ArrayView2<f32>,
	) -> Forward {
		let batch_levels: Vec<usize> = indices.iter().map(|index| levels[*index]).collect();
		let embedded = self.embedding.select(Axis(0), &batch_levels);
		let embedding_dimension = self.embedding_dimension();
		let mut inputs = Array2::zeros((indices.len(), embedding_dimension + predictors.ncols()));
		inputs.slice_mut(s![.., ..embedding_dimension]).assign(&embedded);
		inputs
			.slice_mut(s![.., embedding_dimension..])
			.assign(&predictors.select(Axis(0), indices));
		let hidden_preactivations = inputs.dot(&self.hidden_weights) + &self.hidden_biases;
		let hidden_activations = hidden_preactivations.mapv(|value| value.max(0.0));
		let mut outputs = hidden_activations.dot(&self.output_weights) + &self.output_biases;
		if self.classification {
			softmax(outputs.view_mut());
		}
		Forward {
			inputs,
			hidden_preactivations,
			hidden_activations,
			outputs,
		}
	}

	fn train_batch(
		&mut self,
		indices: &[usize],
		levels: ArrayView1<usize>,
		predictors: ArrayView2<f32>,
		labels: &Labels,
		optimizer: &mut OptimizerState,
	) {
		let forward = self.forward(indices, levels, predictors);
		let gradients = self.backward(&forward, indices, levels, labels);
		optimizer.begin_step();
		optimizer.update(0, self.embedding.view_mut(), gradients.embedding.view());
		optimizer.update(1, self.hidden_weights.view_mut(), gradients.hidden_weights.view());
		optimizer.update(2, self.hidden_biases.view_mut(), gradients.hidden_biases.view());
		optimizer.update(3, self.output_weights.view_mut(), gradients.output_weights.view());
		optimizer.update(4, self.output_biases.view_mut(), gradients.output_biases.view());
	}

	/// Backpropagate the mean loss of the batch through the output layer, the hidden layer and the embedding lookup.
	fn backward(
		&self,
		forward: &Forward,
		indices: &[usize],
		levels: ArrayView1<usize>,
		labels: &Labels,
	) -> Gradients {
		let batch_size = indices.len().to_f32().unwrap();
		let mut output_deltas = forward.outputs.clone();
		match labels {
			// d/dy (y - t)^2 = 2 (y - t)
			Labels::Regression(labels) => {
				for (mut delta, index) in output_deltas.axis_iter_mut(Axis(0)).zip(indices.iter()) {
					delta[0] = 2.0 * (delta[0] - labels[*index]);
				}
			}
			// The gradient of cross entropy with respect to the logits of a softmax is the probabilities minus the one hot label.
			Labels::Classification { labels, .. } => {
				for (mut delta, index) in output_deltas.axis_iter_mut(Axis(0)).zip(indices.iter()) {
					delta[labels[*index]] -= 1.0;
				}
			}
		}
		output_deltas /= batch_size;
		let output_weights = forward.hidden_activations.t().dot(&output_deltas);
		let output_biases = output_deltas.sum_axis(Axis(0));
		let mut hidden_deltas = output_deltas.dot(&self.output_weights.t());
		for (delta, preactivation) in izip!(
			hidden_deltas.iter_mut(),
			forward.hidden_preactivations.iter()
		) {
			if *preactivation <= 0.0 {
				*delta = 0.0;
			}
		}
		let hidden_weights = forward.inputs.t().dot(&hidden_deltas);
		let hidden_biases = hidden_deltas.sum_axis(Axis(0));
		let input_deltas = hidden_deltas.dot(&self.hidden_weights.t());
		let embedding_dimension = self.embedding_dimension();
		let mut embedding = Array2::zeros(self.embedding.raw_dim());
		for (input_delta, index) in input_deltas.axis_iter(Axis(0)).zip(indices.iter()) {
			let mut row = embedding.row_mut(levels[*index]);
			row += &input_delta.slice(s![..embedding_dimension]);
		}
		Gradients {
			embedding,
			hidden_weights,
			hidden_biases,
			output_weights,
			output_biases,
		}
	}

	/// Compute the mean loss over the examples at `indices`, in batches.
	fn compute_loss(
		&self,
		indices: &[usize],
		levels: ArrayView1<usize>,
		predictors: ArrayView2<f32>,
		labels: &Labels,
		options: &TrainOptions,
	) -> f32 {
		match labels {
			Labels::Regression(labels) => {
				let mut metric = MeanSquaredError::default();
				for batch in indices.chunks(options.batch_size) {
					let outputs = self.predict(batch, levels, predictors);
					for (prediction, index) in outputs.column(0).iter().zip(batch.iter()) {
						metric.update((*prediction, labels[*index]));
					}
				}
				metric.finalize().unwrap_or(std::f32::NAN)
			}
			Labels::Classification { labels, .. } => {
				let mut metric = CrossEntropy::default();
				for batch in indices.chunks(options.batch_size) {
					let outputs = self.predict(batch, levels, predictors);
					for (probabilities, index) in outputs.axis_iter(Axis(0)).zip(batch.iter()) {
						metric.update(CrossEntropyInput {
							probabilities,
							label: labels[*index],
						});
					}
				}
				metric.finalize().unwrap_or(std::f32::NAN)
			}
		}
	}
}

fn validate(options: &TrainOptions) -> Result<(), Error> {
	if options.embedding_dimension == 0 {
		return Err(Error::InvalidOptions(
			"the embedding dimension must be positive".to_owned(),
		));
	}
	if options.hidden_units == 0 {
		return Err(Error::InvalidOptions(
			"the number of hidden units must be positive".to_owned(),
		));
	}
	if options.batch_size == 0 {
		return Err(Error::InvalidOptions(
			"the batch size must be positive".to_owned(),
		));
	}
	if !(options.validation_fraction >= 0.0 && options.validation_fraction < 1.0) {
		return Err(Error::InvalidOptions(format!(
			"the validation fraction must be in [0, 1), but it is {}",
			options.validation_fraction
		)));
	}
	Ok(())
}

/// Draw a `(fan_in, fan_out)` weight matrix uniformly from `[-limit, limit]` with `limit = sqrt(6 / (fan_in + fan_out))`.
fn glorot_uniform(fan_in: usize, fan_out: usize, rng: &mut Xoshiro256Plus) -> Array2<f32> {
	let limit = (6.0 / (fan_in + fan_out).to_f32().unwrap()).sqrt();
	let distribution = Uniform::new_inclusive(-limit, limit);
	Array2::from_shape_simple_fn((fan_in, fan_out), || rng.sample(distribution))
}

fn softmax(mut logits: ArrayViewMut2<f32>) {
	for mut logits in logits.rows_mut() {
		let max = logits.iter().fold(std::f32::MIN, |a, &b| a.max(b));
		logits -= max;
		logits.mapv_inplace(|l| l.exp());
		let sum = logits.iter().fold(0.0, |a, b| a + b);
		logits /= sum;
	}
}

#[cfg(test)]
fn regression_data() -> (Array1<usize>, Array2<f32>, Array1<f32>) {
	let n_levels = 6;
	let levels: Array1<usize> = (0..120).map(|i| i % n_levels).collect();
	let labels = levels.mapv(|level| level.to_f32().unwrap() * 0.5);
	let predictors = Array2::zeros((levels.len(), 0));
	(levels, predictors, labels)
}

#[test]
fn test_same_seed_gives_identical_networks() {
	let (levels, predictors, labels) = regression_data();
	let options = TrainOptions {
		embedding_dimension: 2,
		validation_fraction: 0.25,
		..Default::default()
	};
	let train = |options: &TrainOptions| {
		Network::train(
			levels.view(),
			predictors.view(),
			Labels::Regression(labels.view()),
			6,
			options,
			&mut |_| {},
			&CancellationToken::new(),
		)
		.unwrap()
	};
	let (first, first_history) = train(&options);
	let (second, second_history) = train(&options);
	assert_eq!(first, second);
	assert_eq!(first_history, second_history);
	let (third, _) = train(&TrainOptions { seed: 7, ..options });
	assert_ne!(first.embedding, third.embedding);
	assert_eq!(third.embedding.dim(), (6, 2));
}

#[test]
fn test_history_has_one_entry_per_epoch_and_split() {
	let (levels, predictors, labels) = regression_data();
	let options = TrainOptions {
		max_epochs: 5,
		validation_fraction: 0.2,
		optimizer: super::Optimizer::adam(),
		..Default::default()
	};
	let mut progress = None;
	let (_, history) = Network::train(
		levels.view(),
		predictors.view(),
		Labels::Regression(labels.view()),
		6,
		&options,
		&mut |p| progress = Some(p),
		&CancellationToken::new(),
	)
	.unwrap();
	assert_eq!(history.entries.len(), 10);
	assert_eq!(history.n_epochs(), 5);
	assert_eq!(history.losses(Split::Validation).count(), 5);
	assert!(history.losses(Split::Training).all(|loss| loss.is_finite()));
	let TrainProgress(counter) = progress.unwrap();
	assert_eq!(counter.get(), 5);
}

#[test]
fn test_training_reduces_the_loss() {
	let (levels, predictors, labels) = regression_data();
	let options = TrainOptions {
		max_epochs: 30,
		batch_size: 8,
		optimizer: super::Optimizer::adam(),
		..Default::default()
	};
	let (_, history) = Network::train(
		levels.view(),
		predictors.view(),
		Labels::Regression(labels.view()),
		6,
		&options,
		&mut |_| {},
		&CancellationToken::new(),
	)
	.unwrap();
	let losses: Vec<f32> = history.losses(Split::Training).collect();
	assert!(losses.last().unwrap() < losses.first().unwrap());
}

#[test]
fn test_classification_with_predictors() {
	let levels: Array1<usize> = (0..90).map(|i| i % 5).collect();
	let predictors = Array2::from_shape_fn((90, 1), |(i, _)| (i % 3).to_f32().unwrap() - 1.0);
	let labels: Array1<usize> = levels.mapv(|level| level % 3);
	let (network, history) = Network::train(
		levels.view(),
		predictors.view(),
		Labels::Classification {
			labels: labels.view(),
			n_classes: 3,
		},
		5,
		&TrainOptions {
			embedding_dimension: 3,
			max_epochs: 3,
			..Default::default()
		},
		&mut |_| {},
		&CancellationToken::new(),
	)
	.unwrap();
	assert_eq!(network.embedding.dim(), (5, 3));
	assert_eq!(network.hidden_weights.nrows(), 4);
	let probabilities = network.predict(&[0, 1], levels.view(), predictors.view());
	for row in probabilities.axis_iter(Axis(0)) {
		assert!((row.sum() - 1.0).abs() < 1e-5);
	}
	assert_eq!(history.entries.len(), 3);
}

#[test]
fn test_too_few_levels_for_the_dimension() {
	let (levels, predictors, labels) = regression_data();
	let result = Network::train(
		levels.view(),
		predictors.view(),
		Labels::Regression(labels.view()),
		6,
		&TrainOptions {
			embedding_dimension: 6,
			..Default::default()
		},
		&mut |_| {},
		&CancellationToken::new(),
	);
	assert!(matches!(result, Err(Error::InsufficientData(_))));
}

#[test]
fn test_cancelled_training_returns_error() {
	let (levels, predictors, labels) = regression_data();
	let token = CancellationToken::new();
	token.cancel();
	let result = Network::train(
		levels.view(),
		predictors.view(),
		Labels::Regression(labels.view()),
		6,
		&TrainOptions::default(),
		&mut |_| {},
		&token,
	);
	assert!(matches!(result, Err(Error::Cancelled)));
}

#[test]
fn test_early_stopping_can_end_training_before_max_epochs() {
	let (levels, predictors, labels) = regression_data();
	let options = TrainOptions {
		max_epochs: 200,
		early_stopping_options: Some(super::EarlyStoppingOptions {
			n_epochs_without_improvement_to_stop: 1,
			min_decrease_in_loss_for_significant_change: 1.0,
		}),
		..Default::default()
	};
	let (_, history) = Network::train(
		levels.view(),
		predictors.view(),
		Labels::Regression(labels.view()),
		6,
		&options,
		&mut |_| {},
		&CancellationToken::new(),
	)
	.unwrap();
	assert_eq!(history.n_epochs(), 2);
}
