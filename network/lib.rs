/*!
This crate trains the small feed forward network behind entity embeddings. Each example is a level of a categorical column, given as an integer id, plus an optional row of numeric predictors. The level id selects a row of a trainable embedding matrix, which is concatenated with the predictors and passed through one dense layer with the ReLU activation and an output layer. A regression network has a single linear output trained with mean squared error, and a classification network has one output per class combined with the `softmax` function and trained with cross entropy.

Gradients are derived by hand for exactly this topology. Training is sequential and driven by a single seeded random number generator, so two runs with the same options produce bit for bit identical networks.
*/

#![allow(clippy::tabs_in_doc_comments)]

use embed_util::ProgressCounter;
use ndarray::prelude::*;

mod early_stopping;
mod network;
mod optimizer;

pub use self::network::Network;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("invalid options: {0}")]
	InvalidOptions(String),
	#[error("insufficient data: {0}")]
	InsufficientData(String),
	#[error("training was cancelled")]
	Cancelled,
}

/// These are the options passed to [`Network::train`](struct.Network.html#method.train).
#[derive(Clone, Debug)]
pub struct TrainOptions {
	/// This is the number of columns of the embedding matrix.
	pub embedding_dimension: usize,
	/// This is the number of units in the hidden dense layer.
	pub hidden_units: usize,
	/// This is the maximum number of epochs to train.
	pub max_epochs: usize,
	/// This is the number of examples to use for each batch of training.
	pub batch_size: usize,
	/// This is the fraction of the examples set aside to compute the validation loss after each epoch. These examples are never trained on.
	pub validation_fraction: f32,
	pub optimizer: Optimizer,
	/// Specify options for early stopping. If the value is `Some`, early stopping will be enabled. If it is `None`, early stopping will be disabled.
	pub early_stopping_options: Option<EarlyStoppingOptions>,
	/// This seeds the random number generator used to initialize the weights and shuffle the examples.
	pub seed: u64,
}

impl Default for TrainOptions {
	fn default() -> Self {
		Self {
			embedding_dimension: 2,
			hidden_units: 16,
			max_epochs: 20,
			batch_size: 32,
			validation_fraction: 0.0,
			optimizer: Optimizer::default(),
			early_stopping_options: None,
			seed: 42,
		}
	}
}

/// The rule used to update the parameters from their gradients.
#[derive(Clone, Debug, PartialEq)]
pub enum Optimizer {
	Sgd {
		learning_rate: f32,
	},
	Adam {
		learning_rate: f32,
		beta_1: f32,
		beta_2: f32,
		epsilon: f32,
	},
}

impl Default for Optimizer {
	fn default() -> Self {
		Optimizer::Sgd {
			learning_rate: 0.01,
		}
	}
}

impl Optimizer {
	pub fn adam() -> Self {
		Optimizer::Adam {
			learning_rate: 0.001,
			beta_1: 0.9,
			beta_2: 0.999,
			epsilon: 1e-7,
		}
	}
}

/// The parameters in this struct control how to determine whether training should stop early after each epoch. The monitored loss is the validation loss if there is a validation split, and the training loss otherwise.
#[derive(Clone, Debug)]
pub struct EarlyStoppingOptions {
	/// If this many epochs pass by without a significant improvement in the monitored loss over the previous epoch, training will be stopped early.
	pub n_epochs_without_improvement_to_stop: usize,
	/// This is the minimum decrease in the monitored loss for an epoch to be considered a significant improvement over the previous epoch.
	pub min_decrease_in_loss_for_significant_change: f32,
}

impl Default for EarlyStoppingOptions {
	fn default() -> Self {
		Self {
			n_epochs_without_improvement_to_stop: 3,
			min_decrease_in_loss_for_significant_change: 1e-3,
		}
	}
}

/// The labels the network is trained to predict, one per example.
#[derive(Clone, Debug)]
pub enum Labels<'a> {
	Regression(ArrayView1<'a, f32>),
	Classification {
		/// The zero based class index of each example.
		labels: ArrayView1<'a, usize>,
		n_classes: usize,
	},
}

impl<'a> Labels<'a> {
	pub fn len(&self) -> usize {
		match self {
			Labels::Regression(labels) => labels.len(),
			Labels::Classification { labels, .. } => labels.len(),
		}
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// The number of units in the output layer.
	pub fn n_outputs(&self) -> usize {
		match self {
			Labels::Regression(_) => 1,
			Labels::Classification { n_classes, .. } => *n_classes,
		}
	}
}

/// This is the training progress, which tracks the current epoch.
#[derive(Clone, Debug)]
pub struct TrainProgress(pub ProgressCounter);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Split {
	Training,
	Validation,
}

impl std::fmt::Display for Split {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Split::Training => write!(f, "training"),
			Split::Validation => write!(f, "validation"),
		}
	}
}

#[derive(Clone, Debug, PartialEq)]
pub struct HistoryEntry {
	/// The one based epoch number.
	pub epoch: usize,
	pub loss: f32,
	pub split: Split,
}

/// The loss after each epoch, on the training split and, if there is one, the validation split.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TrainingHistory {
	pub entries: Vec<HistoryEntry>,
}

impl TrainingHistory {
	pub fn n_epochs(&self) -> usize {
		self.entries.last().map(|entry| entry.epoch).unwrap_or(0)
	}

	pub fn losses(&self, split: Split) -> impl Iterator<Item = f32> + '_ {
		self.entries
			.iter()
			.filter(move |entry| entry.split == split)
			.map(|entry| entry.loss)
	}
}
