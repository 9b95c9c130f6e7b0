use super::{
	columns::{CategoricalColumn, OutcomeColumn, TrainingRows},
	EncodingSource, EncodingTable, Error, Progress,
};
use embed_dataframe::{ColumnView, DataFrameView, NumberColumnView};
use embed_network::{Labels, Network, TrainOptions, TrainingHistory};
use embed_util::CancellationToken;
use ndarray::prelude::*;

/// Encode each level with its row of an embedding matrix learned by a small neural network that predicts the outcome.
pub struct EmbeddingEncoder;

/// These are the options passed to [`EmbeddingEncoder::fit`](struct.EmbeddingEncoder.html#method.fit).
#[derive(Clone, Debug, Default)]
pub struct EmbeddingOptions {
	pub train_options: TrainOptions,
	pub fallback: EmbeddingFallback,
}

/// The vector used for levels not seen during fit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EmbeddingFallback {
	/// The zero vector.
	Zero,
	/// The mean of the embedding rows of every level seen during fit.
	Mean,
}

impl Default for EmbeddingFallback {
	fn default() -> Self {
		EmbeddingFallback::Zero
	}
}

/// The result of [`EmbeddingEncoder::fit`](struct.EmbeddingEncoder.html#method.fit).
#[derive(Clone, Debug)]
pub struct FittedEmbedding {
	pub table: EncodingTable,
	pub history: TrainingHistory,
}

impl EmbeddingEncoder {
	/**
	Fit an entity embedding of `categorical_column`. A network with an embedding layer for the levels, optionally concatenated with the numeric `predictor_columns`, a dense ReLU layer and an output layer is trained to predict `outcome_column`: with mean squared error for a number column and with cross entropy over the options of an enum column. The learned embedding matrix becomes the table, with output columns `<column>_embed_1` through `<column>_embed_<dimension>`.

	Predictors are used as given, so scale them beforehand. Rows with a missing level or outcome, or a non finite predictor, are skipped.
	*/
	pub fn fit(
		frame: &DataFrameView,
		categorical_column: &str,
		outcome_column: &str,
		predictor_columns: &[&str],
		options: &EmbeddingOptions,
		update_progress: &mut dyn FnMut(Progress),
		cancellation_token: &CancellationToken,
	) -> Result<FittedEmbedding, Error> {
		let categorical = CategoricalColumn::from_frame(frame, categorical_column)?;
		let outcome = OutcomeColumn::from_frame(frame, outcome_column)?;
		if let OutcomeColumn::Enum(column) = &outcome {
			if column.options.len() < 2 {
				return Err(Error::OutcomeType {
					column: outcome_column.to_owned(),
					reason: "a categorical outcome must have at least two options".to_owned(),
				});
			}
		}
		let predictors = predictor_columns
			.iter()
			.map(|name| predictor_column(frame, name))
			.collect::<Result<Vec<_>, _>>()?;
		let training_rows = TrainingRows::new(&categorical, |row| {
			!outcome.is_missing(row) && predictors.iter().all(|column| column.data[row].is_finite())
		});
		let embedding_dimension = options.train_options.embedding_dimension;
		if training_rows.n_rows() == 0 {
			return Err(Error::InsufficientData(
				"there are no training rows with a level and an outcome".to_owned(),
			));
		}
		if training_rows.n_levels() <= embedding_dimension {
			return Err(Error::InsufficientData(format!(
				"the number of levels ({}) must be greater than the embedding dimension ({})",
				training_rows.n_levels(),
				embedding_dimension
			)));
		}
		let levels = Array1::from(training_rows.level_ids.clone());
		let predictor_values = Array2::from_shape_fn(
			(training_rows.n_rows(), predictors.len()),
			|(example, predictor)| predictors[predictor].data[training_rows.rows[example]],
		);
		let regression_labels: Array1<f32>;
		let classification_labels: Array1<usize>;
		let labels = match &outcome {
			OutcomeColumn::Number(column) => {
				regression_labels = training_rows.rows.iter().map(|row| column.data[*row]).collect();
				Labels::Regression(regression_labels.view())
			}
			OutcomeColumn::Enum(column) => {
				classification_labels = training_rows
					.rows
					.iter()
					.map(|row| column.data[*row].map(|value| value.get() - 1).unwrap_or(0))
					.collect();
				Labels::Classification {
					labels: classification_labels.view(),
					n_classes: column.options.len(),
				}
			}
		};
		let (network, history) = Network::train(
			levels.view(),
			predictor_values.view(),
			labels,
			training_rows.n_levels(),
			&options.train_options,
			&mut |progress| update_progress(Progress::Training(progress)),
			cancellation_token,
		)
		.map_err(|error| match error {
			embed_network::Error::InvalidOptions(message) => Error::InvalidOptions(message),
			embed_network::Error::InsufficientData(message) => Error::InsufficientData(message),
			embed_network::Error::Cancelled => Error::Cancelled,
		})?;
		let fallback = match options.fallback {
			EmbeddingFallback::Zero => Array1::zeros(embedding_dimension),
			EmbeddingFallback::Mean => network
				.embedding
				.mean_axis(Axis(0))
				.unwrap_or_else(|| Array1::zeros(embedding_dimension)),
		};
		let output_column_names = (1..=embedding_dimension)
			.map(|dimension| format!("{}_embed_{}", categorical_column, dimension))
			.collect();
		log::info!(
			"fit a {} dimensional embedding of \"{}\" with {} levels in {} epochs",
			embedding_dimension,
			categorical_column,
			training_rows.n_levels(),
			history.n_epochs()
		);
		let table = EncodingTable::new(
			EncodingSource::Embedding,
			categorical_column.to_owned(),
			output_column_names,
			training_rows.levels,
			training_rows.counts,
			network.embedding,
			fallback,
		)?;
		Ok(FittedEmbedding { table, history })
	}
}

fn predictor_column<'a>(frame: &DataFrameView<'a>, name: &str) -> Result<NumberColumnView<'a>, Error> {
	match frame.column(name) {
		Some(ColumnView::Number(column)) => Ok(column.clone()),
		Some(column) => Err(Error::PredictorColumnType {
			column: name.to_owned(),
			column_type: column.type_name().to_owned(),
		}),
		None => Err(Error::ColumnNotFound(name.to_owned())),
	}
}

#[cfg(test)]
fn frame(n_levels: usize, n_rows: usize) -> embed_dataframe::DataFrame {
	use embed_dataframe::{Column, DataFrame, EnumColumn, NumberColumn, TextColumn};
	use num_traits::ToPrimitive;
	let levels: Vec<String> = (0..n_rows).map(|i| format!("level_{}", i % n_levels)).collect();
	let price = (0..n_rows)
		.map(|i| (i % n_levels).to_f32().unwrap() + 0.1 * (i % 3).to_f32().unwrap())
		.collect();
	let size = (0..n_rows).map(|i| (i % 5).to_f32().unwrap() / 5.0).collect();
	let colors: Vec<&str> = (0..n_rows)
		.map(|i| ["red", "green", "blue"][(i % n_levels) % 3])
		.collect();
	DataFrame::from_columns(vec![
		Column::Text(TextColumn::with_data("city".to_owned(), levels)),
		Column::Number(NumberColumn::with_data("price".to_owned(), price)),
		Column::Number(NumberColumn::with_data("size".to_owned(), size)),
		Column::Enum(EnumColumn::from_values(
			"color".to_owned(),
			vec!["red".to_owned(), "green".to_owned(), "blue".to_owned()],
			&colors,
		)),
	])
}

#[cfg(test)]
fn fit(frame: &embed_dataframe::DataFrame, options: &EmbeddingOptions) -> Result<FittedEmbedding, Error> {
	EmbeddingEncoder::fit(
		&frame.view(),
		"city",
		"price",
		&["size"],
		options,
		&mut |_| {},
		&CancellationToken::new(),
	)
}

#[test]
fn test_table_has_one_row_per_level_and_one_column_per_dimension() {
	let frame = frame(8, 160);
	let options = EmbeddingOptions {
		train_options: TrainOptions {
			embedding_dimension: 3,
			max_epochs: 4,
			validation_fraction: 0.25,
			..Default::default()
		},
		..Default::default()
	};
	let fitted = fit(&frame, &options).unwrap();
	assert_eq!(fitted.table.values().dim(), (8, 3));
	assert_eq!(
		fitted.table.output_column_names(),
		&["city_embed_1", "city_embed_2", "city_embed_3"]
	);
	assert_eq!(fitted.table.fallback(), arr1(&[0.0, 0.0, 0.0]));
	assert_eq!(fitted.history.entries.len(), 8);
}

#[test]
fn test_same_seed_gives_identical_tables() {
	let frame = frame(6, 120);
	let options = EmbeddingOptions::default();
	let first = fit(&frame, &options).unwrap();
	let second = fit(&frame, &options).unwrap();
	assert_eq!(first.table, second.table);
	let mut other_seed = options.clone();
	other_seed.train_options.seed = 1;
	let third = fit(&frame, &other_seed).unwrap();
	assert_ne!(first.table.values(), third.table.values());
	assert_eq!(third.table.values().dim(), first.table.values().dim());
	assert_eq!(third.table.levels(), first.table.levels());
}

#[test]
fn test_mean_fallback() {
	let frame = frame(6, 60);
	let options = EmbeddingOptions {
		fallback: EmbeddingFallback::Mean,
		..Default::default()
	};
	let fitted = fit(&frame, &options).unwrap();
	let mean = fitted.table.values().mean_axis(Axis(0)).unwrap();
	assert_eq!(fitted.table.fallback(), mean);
}

#[test]
fn test_classification_outcome() {
	let frame = frame(6, 60);
	let fitted = EmbeddingEncoder::fit(
		&frame.view(),
		"city",
		"color",
		&[],
		&EmbeddingOptions::default(),
		&mut |_| {},
		&CancellationToken::new(),
	)
	.unwrap();
	assert_eq!(fitted.table.values().dim(), (6, 2));
}

#[test]
fn test_too_few_levels_for_the_dimension() {
	let frame = frame(3, 30);
	let options = EmbeddingOptions {
		train_options: TrainOptions {
			embedding_dimension: 3,
			..Default::default()
		},
		..Default::default()
	};
	assert!(matches!(fit(&frame, &options), Err(Error::InsufficientData(_))));
}

#[test]
fn test_predictor_must_be_numeric() {
	let frame = frame(6, 30);
	let result = EmbeddingEncoder::fit(
		&frame.view(),
		"city",
		"price",
		&["color"],
		&EmbeddingOptions::default(),
		&mut |_| {},
		&CancellationToken::new(),
	);
	assert!(matches!(result, Err(Error::PredictorColumnType { .. })));
}

#[test]
fn test_text_outcome_is_rejected() {
	let frame = frame(6, 30);
	let result = EmbeddingEncoder::fit(
		&frame.view(),
		"city",
		"city",
		&[],
		&EmbeddingOptions::default(),
		&mut |_| {},
		&CancellationToken::new(),
	);
	assert!(matches!(result, Err(Error::OutcomeType { .. })));
}
