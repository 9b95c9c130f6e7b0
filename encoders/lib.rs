/*!
This crate turns a categorical column into numeric columns. It provides four encoders, each of which fits an [`EncodingTable`](struct.EncodingTable.html) from a dataframe:

- [`NoPoolingEncoder`](struct.NoPoolingEncoder.html) encodes each level with the estimate of a generalized linear model that uses only that level's rows.
- [`BayesEncoder`](struct.BayesEncoder.html) encodes each level with the posterior mean of a Bayesian random intercept model.
- [`MixedEncoder`](struct.MixedEncoder.html) encodes each level with the empirical Bayes prediction of a random intercept model.
- [`EmbeddingEncoder`](struct.EmbeddingEncoder.html) encodes each level with a learned entity embedding.

A table is applied to new data with [`EncodingTable::apply`](struct.EncodingTable.html#method.apply), which maps levels not seen during fit to the table's fallback vector. The [`fit`](fn.fit.html) function dispatches to an encoder from a [`FitRequest`](struct.FitRequest.html), which is what the cli uses.
*/

#![allow(clippy::tabs_in_doc_comments)]

use embed_dataframe::DataFrameView;
use embed_hierarchical::Diagnostics;
use embed_network::{TrainProgress, TrainingHistory};
use embed_util::{CancellationToken, ProgressCounter};

mod columns;
pub mod config;
mod embedding;
mod error;
mod likelihood;
mod table;
mod tidy;

pub use self::embedding::{EmbeddingEncoder, EmbeddingFallback, EmbeddingOptions, FittedEmbedding};
pub use self::error::{ConvergenceError, Error, NonConvergenceError, UnknownLevelWarning};
pub use self::likelihood::{BayesEncoder, BayesOptions, FittedBayes, MixedEncoder, NoPoolingEncoder};
pub use self::table::{Applied, EncodingSource, EncodingTable};
pub use self::tidy::{diagnostics_report, history_report, TidyReport};
pub use embed_hierarchical::{MixedOptions, NoPoolingOptions};
pub use embed_network::{EarlyStoppingOptions, Optimizer, TrainOptions};

/// The progress of a long running fit, passed to the `update_progress` callback.
#[derive(Clone, Debug)]
pub enum Progress {
	/// The counter is incremented once per sampler iteration across all chains.
	Sampling(ProgressCounter),
	Training(TrainProgress),
}

/// The encoder to fit, with its options.
#[derive(Clone, Debug)]
pub enum EncoderOptions {
	NoPooling(NoPoolingOptions),
	Bayes(BayesOptions),
	Mixed(MixedOptions),
	Embedding(EmbeddingOptions),
}

impl Default for EncoderOptions {
	fn default() -> Self {
		EncoderOptions::NoPooling(NoPoolingOptions::default())
	}
}

/// The columns to fit an encoding with and the encoder to use.
#[derive(Clone, Debug)]
pub struct FitRequest {
	pub categorical_column: String,
	pub outcome_column: String,
	/// Additional numeric inputs. Only the embedding encoder uses them.
	pub predictor_columns: Vec<String>,
	pub options: EncoderOptions,
}

/// The result of [`fit`](fn.fit.html). `diagnostics` is set for the bayes encoder and `history` for the embedding encoder.
#[derive(Clone, Debug)]
pub struct Fitted {
	pub table: EncodingTable,
	pub diagnostics: Option<Diagnostics>,
	pub history: Option<TrainingHistory>,
}

/// Fit the encoder named by `request.options`.
pub fn fit(
	frame: &DataFrameView,
	request: &FitRequest,
	update_progress: &mut dyn FnMut(Progress),
	cancellation_token: &CancellationToken,
) -> Result<Fitted, Error> {
	let categorical_column = request.categorical_column.as_str();
	let outcome_column = request.outcome_column.as_str();
	let is_embedding = matches!(request.options, EncoderOptions::Embedding(_));
	if !is_embedding && !request.predictor_columns.is_empty() {
		log::warn!(
			"likelihood encoders do not use predictors, ignoring {} predictor columns",
			request.predictor_columns.len()
		);
	}
	let fitted = match &request.options {
		EncoderOptions::NoPooling(options) => Fitted {
			table: NoPoolingEncoder::fit(frame, categorical_column, outcome_column, options)?,
			diagnostics: None,
			history: None,
		},
		EncoderOptions::Bayes(options) => {
			let fitted = BayesEncoder::fit(
				frame,
				categorical_column,
				outcome_column,
				options,
				update_progress,
				cancellation_token,
			)?;
			Fitted {
				table: fitted.table,
				diagnostics: Some(fitted.diagnostics),
				history: None,
			}
		}
		EncoderOptions::Mixed(options) => Fitted {
			table: MixedEncoder::fit(frame, categorical_column, outcome_column, options)?,
			diagnostics: None,
			history: None,
		},
		EncoderOptions::Embedding(options) => {
			let predictor_columns: Vec<&str> = request
				.predictor_columns
				.iter()
				.map(|column| column.as_str())
				.collect();
			let fitted = EmbeddingEncoder::fit(
				frame,
				categorical_column,
				outcome_column,
				&predictor_columns,
				options,
				update_progress,
				cancellation_token,
			)?;
			Fitted {
				table: fitted.table,
				diagnostics: None,
				history: Some(fitted.history),
			}
		}
	};
	Ok(fitted)
}

#[cfg(test)]
fn frame() -> embed_dataframe::DataFrame {
	use embed_dataframe::{Column, DataFrame, EnumColumn, NumberColumn, TextColumn};
	let n_rows = 120;
	let stores: Vec<String> = (0..n_rows).map(|i| format!("store_{}", i % 6)).collect();
	let outcome: Vec<&str> = (0..n_rows)
		.map(|i| if (i % 6) * 7 + i % 5 > 18 { "yes" } else { "no" })
		.collect();
	let sales = (0..n_rows).map(|i| ((i % 6) * 3 + i % 4) as f32).collect();
	DataFrame::from_columns(vec![
		Column::Text(TextColumn::with_data("store".to_owned(), stores)),
		Column::Enum(EnumColumn::from_values(
			"churned".to_owned(),
			vec!["no".to_owned(), "yes".to_owned()],
			&outcome,
		)),
		Column::Number(NumberColumn::with_data("sales".to_owned(), sales)),
	])
}

#[cfg(test)]
fn request(outcome_column: &str, options: EncoderOptions) -> FitRequest {
	FitRequest {
		categorical_column: "store".to_owned(),
		outcome_column: outcome_column.to_owned(),
		predictor_columns: Vec::new(),
		options,
	}
}

#[test]
fn test_every_encoder_applies_to_one_row_per_input_row() {
	let training = frame();
	let new_data = embed_dataframe::DataFrame::from_columns(vec![embed_dataframe::Column::Text(
		embed_dataframe::TextColumn::with_data(
			"store".to_owned(),
			vec!["store_1".to_owned(), "store_99".to_owned(), String::new()],
		),
	)]);
	let options = vec![
		("churned", EncoderOptions::NoPooling(NoPoolingOptions::default())),
		("sales", EncoderOptions::Mixed(MixedOptions::default())),
		(
			"sales",
			EncoderOptions::Bayes(BayesOptions {
				chains: 2,
				iterations: 400,
				min_effective_sample_size: 10.0,
				max_rhat: 1.5,
				..Default::default()
			}),
		),
		(
			"sales",
			EncoderOptions::Embedding(EmbeddingOptions {
				train_options: TrainOptions {
					max_epochs: 2,
					..Default::default()
				},
				..Default::default()
			}),
		),
	];
	for (outcome_column, options) in options {
		let fitted = match fit(
			&training.view(),
			&request(outcome_column, options),
			&mut |_| {},
			&CancellationToken::new(),
		) {
			Ok(fitted) => fitted.table,
			Err(error) => error.into_table().unwrap(),
		};
		let applied = fitted.apply(&new_data.view(), "store").unwrap();
		assert_eq!(applied.columns.len(), fitted.output_column_names().len());
		for column in applied.columns.iter() {
			assert_eq!(column.data.len(), 3);
		}
		assert_eq!(applied.unknown_levels.unwrap().levels, vec!["store_99".to_owned()]);
	}
}

#[test]
fn test_fit_reports_diagnostics_and_history() {
	let training = frame();
	let bayes = fit(
		&training.view(),
		&request(
			"sales",
			EncoderOptions::Bayes(BayesOptions {
				chains: 2,
				iterations: 400,
				min_effective_sample_size: 10.0,
				max_rhat: 1.5,
				..Default::default()
			}),
		),
		&mut |_| {},
		&CancellationToken::new(),
	);
	if let Ok(fitted) = bayes {
		assert!(fitted.diagnostics.is_some());
		assert!(fitted.history.is_none());
	}
	let mut n_training_updates = 0;
	let embedding = fit(
		&training.view(),
		&FitRequest {
			predictor_columns: vec!["sales".to_owned()],
			..request("churned", EncoderOptions::Embedding(EmbeddingOptions::default()))
		},
		&mut |progress| {
			if let Progress::Training(_) = progress {
				n_training_updates += 1;
			}
		},
		&CancellationToken::new(),
	)
	.unwrap();
	assert!(n_training_updates > 0);
	assert_eq!(embedding.history.unwrap().n_epochs(), 20);
	assert!(embedding.diagnostics.is_none());
}

#[test]
fn test_cancelled_fit() {
	let training = frame();
	let cancellation_token = CancellationToken::new();
	cancellation_token.cancel();
	let result = fit(
		&training.view(),
		&request("sales", EncoderOptions::Bayes(BayesOptions::default())),
		&mut |_| {},
		&cancellation_token,
	);
	assert!(matches!(result, Err(Error::Cancelled)));
}
