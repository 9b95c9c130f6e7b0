/*!
This module defines the `Config` struct, which configures which encoder [`fit`](../fn.fit.html) uses and how. Every field is optional and falls back to the encoder's default.

```yaml
column_types:
  zip_code:
    type: text
encoder:
  type: embedding
  embedding_dimension: 4
  optimizer:
    type: adam
  fallback: mean
```
*/

use super::{BayesOptions, EmbeddingFallback, EmbeddingOptions, EncoderOptions};
use embed_hierarchical::{MixedOptions, NoPoolingOptions};
use embed_network::{EarlyStoppingOptions, Optimizer};
use std::collections::BTreeMap;

#[derive(Debug, Default, serde::Deserialize)]
pub struct Config {
	pub column_types: Option<BTreeMap<String, ColumnType>>,
	pub encoder: Option<EncoderConfig>,
}

#[derive(Debug, serde::Deserialize)]
#[serde(tag = "type")]
pub enum ColumnType {
	#[serde(rename = "unknown")]
	Unknown,
	#[serde(rename = "number")]
	Number,
	#[serde(rename = "enum")]
	Enum { options: Vec<String> },
	#[serde(rename = "text")]
	Text,
}

#[derive(Debug, serde::Deserialize)]
#[serde(tag = "type")]
pub enum EncoderConfig {
	#[serde(rename = "no_pooling")]
	NoPooling(NoPoolingConfig),
	#[serde(rename = "bayes")]
	Bayes(BayesConfig),
	#[serde(rename = "mixed")]
	Mixed(MixedConfig),
	#[serde(rename = "embedding")]
	Embedding(EmbeddingConfig),
}

#[derive(Debug, Default, serde::Deserialize)]
pub struct NoPoolingConfig {
	pub pseudo_count: Option<f64>,
}

#[derive(Debug, Default, serde::Deserialize)]
pub struct BayesConfig {
	pub chains: Option<usize>,
	pub iterations: Option<usize>,
	pub warmup_fraction: Option<f64>,
	pub seed: Option<u64>,
	pub max_rhat: Option<f64>,
	pub min_effective_sample_size: Option<f64>,
	pub intercept_prior_scale: Option<f64>,
	pub tau_prior_rate: Option<f64>,
}

#[derive(Debug, Default, serde::Deserialize)]
pub struct MixedConfig {
	pub max_iterations: Option<usize>,
	pub tolerance: Option<f64>,
	pub max_newton_iterations: Option<usize>,
	pub reml: Option<bool>,
}

#[derive(Debug, Default, serde::Deserialize)]
pub struct EmbeddingConfig {
	pub embedding_dimension: Option<usize>,
	pub hidden_units: Option<usize>,
	pub max_epochs: Option<usize>,
	pub batch_size: Option<usize>,
	pub validation_fraction: Option<f32>,
	pub optimizer: Option<OptimizerConfig>,
	pub early_stopping_options: Option<EarlyStoppingConfig>,
	pub seed: Option<u64>,
	pub fallback: Option<FallbackConfig>,
}

#[derive(Debug, serde::Deserialize)]
#[serde(tag = "type")]
pub enum OptimizerConfig {
	#[serde(rename = "sgd")]
	Sgd { learning_rate: Option<f32> },
	#[serde(rename = "adam")]
	Adam {
		learning_rate: Option<f32>,
		beta_1: Option<f32>,
		beta_2: Option<f32>,
		epsilon: Option<f32>,
	},
}

#[derive(Debug, Default, serde::Deserialize)]
pub struct EarlyStoppingConfig {
	pub n_epochs_without_improvement_to_stop: Option<usize>,
	pub min_decrease_in_loss_for_significant_change: Option<f32>,
}

#[derive(Debug, Clone, Copy, serde::Deserialize)]
pub enum FallbackConfig {
	#[serde(rename = "zero")]
	Zero,
	#[serde(rename = "mean")]
	Mean,
}

impl From<&ColumnType> for embed_dataframe::ColumnType {
	fn from(column_type: &ColumnType) -> Self {
		match column_type {
			ColumnType::Unknown => embed_dataframe::ColumnType::Unknown,
			ColumnType::Number => embed_dataframe::ColumnType::Number,
			ColumnType::Enum { options } => embed_dataframe::ColumnType::Enum {
				options: options.clone(),
			},
			ColumnType::Text => embed_dataframe::ColumnType::Text,
		}
	}
}

impl Config {
	/// The column types to pass to the csv loader, if any were configured.
	pub fn dataframe_column_types(&self) -> Option<BTreeMap<String, embed_dataframe::ColumnType>> {
		self.column_types.as_ref().map(|column_types| {
			column_types
				.iter()
				.map(|(column_name, column_type)| (column_name.clone(), column_type.into()))
				.collect()
		})
	}

	/// Read `column_name` as text unless the config gives it a type. Levels that look like numbers, such as zip codes or store ids, would otherwise be inferred as a number column.
	pub fn with_text_column(mut self, column_name: &str) -> Self {
		self.column_types
			.get_or_insert_with(BTreeMap::new)
			.entry(column_name.to_owned())
			.or_insert(ColumnType::Text);
		self
	}

	/// The configured encoder options, with unset fields taken from the defaults. Without an `encoder` section this is the no pooling encoder.
	pub fn encoder_options(&self) -> EncoderOptions {
		match &self.encoder {
			Some(encoder) => encoder.into(),
			None => EncoderOptions::default(),
		}
	}
}

impl From<&EncoderConfig> for EncoderOptions {
	fn from(config: &EncoderConfig) -> Self {
		match config {
			EncoderConfig::NoPooling(config) => {
				let defaults = NoPoolingOptions::default();
				EncoderOptions::NoPooling(NoPoolingOptions {
					pseudo_count: config.pseudo_count.unwrap_or(defaults.pseudo_count),
				})
			}
			EncoderConfig::Bayes(config) => {
				let defaults = BayesOptions::default();
				EncoderOptions::Bayes(BayesOptions {
					chains: config.chains.unwrap_or(defaults.chains),
					iterations: config.iterations.unwrap_or(defaults.iterations),
					warmup_fraction: config.warmup_fraction.unwrap_or(defaults.warmup_fraction),
					seed: config.seed.unwrap_or(defaults.seed),
					max_rhat: config.max_rhat.unwrap_or(defaults.max_rhat),
					min_effective_sample_size: config
						.min_effective_sample_size
						.unwrap_or(defaults.min_effective_sample_size),
					intercept_prior_scale: config
						.intercept_prior_scale
						.unwrap_or(defaults.intercept_prior_scale),
					tau_prior_rate: config.tau_prior_rate.unwrap_or(defaults.tau_prior_rate),
				})
			}
			EncoderConfig::Mixed(config) => {
				let defaults = MixedOptions::default();
				EncoderOptions::Mixed(MixedOptions {
					max_iterations: config.max_iterations.unwrap_or(defaults.max_iterations),
					tolerance: config.tolerance.unwrap_or(defaults.tolerance),
					max_newton_iterations: config
						.max_newton_iterations
						.unwrap_or(defaults.max_newton_iterations),
					reml: config.reml.unwrap_or(defaults.reml),
				})
			}
			EncoderConfig::Embedding(config) => EncoderOptions::Embedding(config.into()),
		}
	}
}

impl From<&EmbeddingConfig> for EmbeddingOptions {
	fn from(config: &EmbeddingConfig) -> Self {
		let defaults = EmbeddingOptions::default();
		let train_defaults = defaults.train_options;
		let optimizer = match &config.optimizer {
			None => train_defaults.optimizer,
			Some(OptimizerConfig::Sgd { learning_rate }) => {
				let default_learning_rate = match Optimizer::default() {
					Optimizer::Sgd { learning_rate } => learning_rate,
					Optimizer::Adam { learning_rate, .. } => learning_rate,
				};
				Optimizer::Sgd {
					learning_rate: learning_rate.unwrap_or(default_learning_rate),
				}
			}
			Some(OptimizerConfig::Adam {
				learning_rate,
				beta_1,
				beta_2,
				epsilon,
			}) => match Optimizer::adam() {
				Optimizer::Adam {
					learning_rate: default_learning_rate,
					beta_1: default_beta_1,
					beta_2: default_beta_2,
					epsilon: default_epsilon,
				} => Optimizer::Adam {
					learning_rate: learning_rate.unwrap_or(default_learning_rate),
					beta_1: beta_1.unwrap_or(default_beta_1),
					beta_2: beta_2.unwrap_or(default_beta_2),
					epsilon: epsilon.unwrap_or(default_epsilon),
				},
				sgd => sgd,
			},
		};
		let early_stopping_options = config.early_stopping_options.as_ref().map(|config| {
			let defaults = EarlyStoppingOptions::default();
			EarlyStoppingOptions {
				n_epochs_without_improvement_to_stop: config
					.n_epochs_without_improvement_to_stop
					.unwrap_or(defaults.n_epochs_without_improvement_to_stop),
				min_decrease_in_loss_for_significant_change: config
					.min_decrease_in_loss_for_significant_change
					.unwrap_or(defaults.min_decrease_in_loss_for_significant_change),
			}
		});
		EmbeddingOptions {
			train_options: embed_network::TrainOptions {
				embedding_dimension: config
					.embedding_dimension
					.unwrap_or(train_defaults.embedding_dimension),
				hidden_units: config.hidden_units.unwrap_or(train_defaults.hidden_units),
				max_epochs: config.max_epochs.unwrap_or(train_defaults.max_epochs),
				batch_size: config.batch_size.unwrap_or(train_defaults.batch_size),
				validation_fraction: config
					.validation_fraction
					.unwrap_or(train_defaults.validation_fraction),
				optimizer,
				early_stopping_options,
				seed: config.seed.unwrap_or(train_defaults.seed),
			},
			fallback: match config.fallback {
				Some(FallbackConfig::Zero) => EmbeddingFallback::Zero,
				Some(FallbackConfig::Mean) => EmbeddingFallback::Mean,
				None => defaults.fallback,
			},
		}
	}
}

#[test]
fn test_embedding_config_overrides_only_the_given_fields() {
	let config: Config = serde_yaml::from_str(
		r#"
column_types:
  zip_code:
    type: text
encoder:
  type: embedding
  embedding_dimension: 4
  optimizer:
    type: adam
    learning_rate: 0.01
  fallback: mean
"#,
	)
	.unwrap();
	let column_types = config.dataframe_column_types().unwrap();
	assert_eq!(column_types["zip_code"], embed_dataframe::ColumnType::Text);
	match config.encoder_options() {
		EncoderOptions::Embedding(options) => {
			assert_eq!(options.train_options.embedding_dimension, 4);
			assert_eq!(options.train_options.hidden_units, 16);
			assert_eq!(options.fallback, EmbeddingFallback::Mean);
			assert_eq!(
				options.train_options.optimizer,
				Optimizer::Adam {
					learning_rate: 0.01,
					beta_1: 0.9,
					beta_2: 0.999,
					epsilon: 1e-7,
				}
			);
		}
		_ => panic!("expected embedding options"),
	}
}

#[test]
fn test_bayes_config_from_json() {
	let config: Config =
		serde_json::from_str(r#"{"encoder": {"type": "bayes", "chains": 2, "seed": 7}}"#).unwrap();
	match config.encoder_options() {
		EncoderOptions::Bayes(options) => {
			assert_eq!(options.chains, 2);
			assert_eq!(options.seed, 7);
			assert_eq!(options.iterations, 2000);
		}
		_ => panic!("expected bayes options"),
	}
}

#[test]
fn test_empty_config_is_no_pooling() {
	let config: Config = serde_yaml::from_str("{}").unwrap();
	assert!(matches!(config.encoder_options(), EncoderOptions::NoPooling(_)));
	assert!(config.dataframe_column_types().is_none());
}

#[test]
fn test_categorical_column_is_read_as_text() {
	let config = Config::default().with_text_column("store");
	let column_types = config.dataframe_column_types().unwrap();
	assert_eq!(column_types["store"], embed_dataframe::ColumnType::Text);
	let options = embed_dataframe::FromCsvOptions {
		column_types: Some(column_types),
		..Default::default()
	};
	let mut reader = csv::Reader::from_reader(std::io::Cursor::new("store,y\n1,0\n2,1\n3,1\n"));
	let frame = embed_dataframe::DataFrame::from_csv(&mut reader, options, |_| {}).unwrap();
	assert_eq!(frame.view().column("store").unwrap().type_name(), "text");
}

#[test]
fn test_configured_column_type_is_kept() {
	let config: Config = serde_yaml::from_str(
		"column_types:\n  store:\n    type: enum\n    options: [\"1\", \"2\"]\n",
	)
	.unwrap();
	let column_types = config.with_text_column("store").dataframe_column_types().unwrap();
	assert_eq!(
		column_types["store"],
		embed_dataframe::ColumnType::Enum {
			options: vec!["1".to_owned(), "2".to_owned()],
		}
	);
}

#[test]
fn test_unknown_encoder_type_is_rejected() {
	assert!(serde_yaml::from_str::<Config>("encoder:\n  type: target\n").is_err());
}
