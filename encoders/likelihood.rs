use super::{
	columns::{CategoricalColumn, OutcomeColumn, TrainingRows},
	ConvergenceError, EncodingSource, EncodingTable, Error, NonConvergenceError, Progress,
};
use embed_dataframe::DataFrameView;
use embed_hierarchical::{
	fit_mixed, fit_no_pooling, Diagnostics, GibbsSampler, GroupedOutcomes, MixedFit, MixedOptions,
	NoPoolingOptions, PosteriorSampler, SamplerOptions,
};
use embed_util::{CancellationToken, ProgressCounter};
use ndarray::prelude::*;
use num_traits::ToPrimitive;

/// The options of [`BayesEncoder`](struct.BayesEncoder.html) are the options of its sampler.
pub type BayesOptions = SamplerOptions;

/// Encode each level with the estimate of a generalized linear model fit with the level as its only predictor, so each level's estimate uses only its own rows.
pub struct NoPoolingEncoder;

/// Encode each level with the posterior mean of a Bayesian random intercept model, so levels with few rows are shrunk toward the global intercept.
pub struct BayesEncoder;

/// Encode each level with the empirical Bayes prediction of a random intercept model.
pub struct MixedEncoder;

/// The result of [`BayesEncoder::fit`](struct.BayesEncoder.html#method.fit).
#[derive(Clone, Debug)]
pub struct FittedBayes {
	pub table: EncodingTable,
	pub diagnostics: Diagnostics,
}

/// The rows, levels and grouped outcomes shared by the likelihood encoders.
struct LikelihoodData {
	training_rows: TrainingRows,
	grouped: GroupedOutcomes,
}

impl LikelihoodData {
	fn new(
		frame: &DataFrameView,
		categorical_column: &str,
		outcome_column: &str,
	) -> Result<Self, Error> {
		let categorical = CategoricalColumn::from_frame(frame, categorical_column)?;
		let outcome = OutcomeColumn::from_frame(frame, outcome_column)?;
		let (family, values) = outcome.likelihood_values(outcome_column)?;
		let training_rows = TrainingRows::new(&categorical, |row| !outcome.is_missing(row));
		training_rows.require_levels(2)?;
		let outcomes: Vec<f64> = training_rows.rows.iter().map(|row| values[*row]).collect();
		let grouped = GroupedOutcomes::from_observations(
			family,
			training_rows.n_levels(),
			&training_rows.level_ids,
			&outcomes,
		)
		.map_err(solver_error)?;
		Ok(Self {
			training_rows,
			grouped,
		})
	}

	fn table(
		&self,
		source: EncodingSource,
		categorical_column: &str,
		estimates: &[f64],
		fallback: f64,
	) -> Result<EncodingTable, Error> {
		let values = Array2::from_shape_vec(
			(estimates.len(), 1),
			estimates.iter().map(|estimate| *estimate as f32).collect(),
		)
		.map_err(|error| Error::InvalidOptions(error.to_string()))?;
		EncodingTable::new(
			source,
			categorical_column.to_owned(),
			vec![format!("{}_lencode", categorical_column)],
			self.training_rows.levels.clone(),
			self.training_rows.counts.clone(),
			values,
			arr1(&[fallback as f32]),
		)
	}
}

/// Map the errors of the solvers onto the errors of the encoders. Non-convergence is handled by each encoder, because it carries a table.
fn solver_error(error: embed_hierarchical::Error) -> Error {
	use embed_hierarchical::Error as SolverError;
	match error {
		SolverError::TooFewGroups { required, found } => Error::InsufficientData(format!(
			"at least {} distinct levels are required, but the training rows have {}",
			required, found
		)),
		SolverError::EmptyGroup(group) => {
			Error::InsufficientData(format!("level {} has no training rows", group))
		}
		SolverError::SingleClass => Error::InsufficientData(
			"the outcome has the same class in every training row".to_owned(),
		),
		SolverError::InvalidOptions(message) => Error::InvalidOptions(message),
		SolverError::NonConvergence { iterations, .. } => Error::InvalidOptions(format!(
			"the solver did not converge within {} iterations",
			iterations
		)),
		SolverError::Cancelled => Error::Cancelled,
	}
}

impl NoPoolingEncoder {
	/**
	Fit a no pooling likelihood encoding of `categorical_column` against `outcome_column`. A binary outcome is encoded with each level's log-odds, and a numeric outcome with each level's mean. The fallback is the estimate of the intercept only model. A level whose rows all have the same class gets `options.pseudo_count` added to both class counts, so its log-odds are finite.
	*/
	pub fn fit(
		frame: &DataFrameView,
		categorical_column: &str,
		outcome_column: &str,
		options: &NoPoolingOptions,
	) -> Result<EncodingTable, Error> {
		let data = LikelihoodData::new(frame, categorical_column, outcome_column)?;
		let fit = fit_no_pooling(&data.grouped, options).map_err(solver_error)?;
		let n_corrected = fit.corrected.iter().filter(|corrected| **corrected).count();
		if n_corrected > 0 {
			log::info!(
				"{} levels of \"{}\" have a single outcome class and were corrected with a pseudo count of {}",
				n_corrected,
				categorical_column,
				options.pseudo_count
			);
		}
		log::info!(
			"fit a no pooling encoding of \"{}\" with {} levels",
			categorical_column,
			data.training_rows.n_levels()
		);
		data.table(
			EncodingSource::NoPooling,
			categorical_column,
			&fit.estimates,
			fit.intercept,
		)
	}
}

impl BayesEncoder {
	/**
	Fit a partially pooled likelihood encoding by sampling the posterior of a random intercept model. Each level is encoded with the posterior mean of its linear predictor and the fallback is the posterior mean of the intercept.

	If the chains fail the convergence diagnostics, this returns [`Error::Convergence`](enum.Error.html#variant.Convergence), which carries the diagnostics and the table anyway.
	*/
	pub fn fit(
		frame: &DataFrameView,
		categorical_column: &str,
		outcome_column: &str,
		options: &BayesOptions,
		update_progress: &mut dyn FnMut(Progress),
		cancellation_token: &CancellationToken,
	) -> Result<FittedBayes, Error> {
		let data = LikelihoodData::new(frame, categorical_column, outcome_column)?;
		let total = options
			.chains
			.checked_mul(options.iterations)
			.and_then(|total| total.to_u64())
			.ok_or_else(|| {
				Error::InvalidOptions(format!(
					"{} chains of {} iterations is too many iterations to count",
					options.chains, options.iterations
				))
			})?;
		let progress_counter = ProgressCounter::new(total);
		update_progress(Progress::Sampling(progress_counter.clone()));
		let posterior = GibbsSampler
			.sample(&data.grouped, options, &progress_counter, cancellation_token)
			.map_err(solver_error)?;
		let summary = posterior.summarize();
		let mut diagnostics = summary.diagnostics;
		// The sampler names group effects by index.
		for (parameter, level) in diagnostics
			.parameters
			.iter_mut()
			.skip(1)
			.zip(data.training_rows.levels.iter())
		{
			parameter.name = level.clone();
		}
		let table = data.table(
			EncodingSource::Bayes,
			categorical_column,
			&summary.group_estimates,
			summary.intercept,
		)?;
		if !diagnostics.converged() {
			return Err(Error::Convergence(Box::new(ConvergenceError {
				table,
				diagnostics,
			})));
		}
		log::info!(
			"fit a bayesian encoding of \"{}\" with {} levels, posterior mean tau {:.4}, worst rhat {:.3}",
			categorical_column,
			data.training_rows.n_levels(),
			summary.tau,
			diagnostics.worst_rhat()
		);
		Ok(FittedBayes { table, diagnostics })
	}
}

impl MixedEncoder {
	/**
	Fit a partially pooled likelihood encoding with a random intercept model estimated by empirical Bayes. Each level is encoded with `intercept + u_j` and the fallback is the intercept.

	If the solver runs out of iterations, this returns [`Error::NonConvergence`](enum.Error.html#variant.NonConvergence), which carries the table at that point.
	*/
	pub fn fit(
		frame: &DataFrameView,
		categorical_column: &str,
		outcome_column: &str,
		options: &MixedOptions,
	) -> Result<EncodingTable, Error> {
		let data = LikelihoodData::new(frame, categorical_column, outcome_column)?;
		let table = |fit: &MixedFit| {
			data.table(
				EncodingSource::Mixed,
				categorical_column,
				&fit.group_estimates(),
				fit.intercept,
			)
		};
		match fit_mixed(&data.grouped, options) {
			Ok(fit) => {
				log::info!(
					"fit a mixed model encoding of \"{}\" with {} levels and group variance {:.4}",
					categorical_column,
					data.training_rows.n_levels(),
					fit.group_variance
				);
				table(&fit)
			}
			Err(embed_hierarchical::Error::NonConvergence { iterations, fit }) => {
				Err(Error::NonConvergence(Box::new(NonConvergenceError {
					table: table(&fit)?,
					iterations,
				})))
			}
			Err(error) => Err(solver_error(error)),
		}
	}
}

#[cfg(test)]
fn binary_frame(groups: &[(&str, usize, usize)]) -> embed_dataframe::DataFrame {
	use embed_dataframe::{Column, DataFrame, EnumColumn, TextColumn};
	let mut levels = Vec::new();
	let mut outcomes = Vec::new();
	for (level, n, events) in groups {
		for i in 0..*n {
			levels.push((*level).to_owned());
			outcomes.push(if i < *events { "yes" } else { "no" });
		}
	}
	DataFrame::from_columns(vec![
		Column::Text(TextColumn::with_data("city".to_owned(), levels)),
		Column::Enum(EnumColumn::from_values(
			"bought".to_owned(),
			vec!["no".to_owned(), "yes".to_owned()],
			&outcomes,
		)),
	])
}

#[cfg(test)]
fn numeric_frame(groups: &[(&str, &[f32])]) -> embed_dataframe::DataFrame {
	use embed_dataframe::{Column, DataFrame, NumberColumn, TextColumn};
	let mut levels = Vec::new();
	let mut outcomes = Vec::new();
	for (level, values) in groups {
		for value in values.iter() {
			levels.push((*level).to_owned());
			outcomes.push(*value);
		}
	}
	DataFrame::from_columns(vec![
		Column::Text(TextColumn::with_data("city".to_owned(), levels)),
		Column::Number(NumberColumn::with_data("price".to_owned(), outcomes)),
	])
}

#[test]
fn test_no_pooling_log_odds_and_fallback() {
	let frame = binary_frame(&[("a", 100, 80), ("b", 3, 3)]);
	let table = NoPoolingEncoder::fit(&frame.view(), "city", "bought", &Default::default()).unwrap();
	assert_eq!(table.levels(), &["a".to_owned(), "b".to_owned()]);
	assert_eq!(table.output_column_names(), &["city_lencode".to_owned()]);
	assert!((table.lookup("a")[0] - 4f32.ln()).abs() < 1e-6);
	// Level b has no non-events, so it is corrected to ln((3 + 0.5) / 0.5).
	assert!((table.lookup("b")[0] - 7f32.ln()).abs() < 1e-6);
	assert!((table.fallback()[0] - (83f32 / 20.0).ln()).abs() < 1e-6);
}

#[test]
fn test_no_pooling_is_deterministic() {
	let frame = binary_frame(&[("a", 10, 3), ("b", 7, 5), ("c", 4, 1)]);
	let first = NoPoolingEncoder::fit(&frame.view(), "city", "bought", &Default::default()).unwrap();
	let second = NoPoolingEncoder::fit(&frame.view(), "city", "bought", &Default::default()).unwrap();
	assert_eq!(first, second);
}

#[test]
fn test_no_pooling_numeric_outcome() {
	let frame = numeric_frame(&[("a", &[1.0, 3.0]), ("b", &[10.0])]);
	let table = NoPoolingEncoder::fit(&frame.view(), "city", "price", &Default::default()).unwrap();
	assert_eq!(table.lookup("a")[0], 2.0);
	assert_eq!(table.lookup("b")[0], 10.0);
	assert!((table.fallback()[0] - 14.0 / 3.0).abs() < 1e-6);
}

#[test]
fn test_single_level_is_insufficient() {
	let frame = binary_frame(&[("a", 10, 3)]);
	let result = NoPoolingEncoder::fit(&frame.view(), "city", "bought", &Default::default());
	assert!(matches!(result, Err(Error::InsufficientData(_))));
}

#[test]
fn test_multiclass_outcome_is_rejected() {
	use embed_dataframe::{Column, DataFrame, EnumColumn, TextColumn};
	let frame = DataFrame::from_columns(vec![
		Column::Text(TextColumn::with_data(
			"city".to_owned(),
			vec!["a".to_owned(), "b".to_owned()],
		)),
		Column::Enum(EnumColumn::from_values(
			"color".to_owned(),
			vec!["red".to_owned(), "green".to_owned(), "blue".to_owned()],
			&["red", "blue"],
		)),
	]);
	let result = MixedEncoder::fit(&frame.view(), "city", "color", &Default::default());
	assert!(matches!(result, Err(Error::OutcomeType { .. })));
}

#[test]
fn test_mixed_shrinks_the_small_level_toward_the_intercept() {
	let frame = binary_frame(&[
		("a", 100, 80),
		("b", 3, 3),
		("c", 40, 20),
		("d", 25, 5),
		("e", 60, 30),
	]);
	let no_pooling =
		NoPoolingEncoder::fit(&frame.view(), "city", "bought", &Default::default()).unwrap();
	let mixed = MixedEncoder::fit(&frame.view(), "city", "bought", &Default::default()).unwrap();
	let intercept = mixed.fallback()[0];
	let raw = no_pooling.lookup("b")[0];
	let pooled = mixed.lookup("b")[0];
	assert!(pooled.is_finite());
	assert!(pooled < raw);
	assert!((pooled - intercept).abs() < (raw - intercept).abs());
	// Level a has many rows, so it moves much less than level b.
	let a_shift = (mixed.lookup("a")[0] - no_pooling.lookup("a")[0]).abs();
	assert!(a_shift < (pooled - raw).abs());
}

#[test]
fn test_end_to_end_two_level_scenario() {
	// Level a has 100 rows at a rate of 0.8 and level b has 3 rows that are all events.
	let frame = binary_frame(&[("a", 100, 80), ("b", 3, 3)]);
	let no_pooling =
		NoPoolingEncoder::fit(&frame.view(), "city", "bought", &Default::default()).unwrap();
	let raw_a = no_pooling.lookup("a")[0];
	let raw_b = no_pooling.lookup("b")[0];
	let global = no_pooling.fallback()[0];
	assert!((raw_b - 7f32.ln()).abs() < 1e-6);
	let mixed = MixedEncoder::fit(&frame.view(), "city", "bought", &Default::default()).unwrap();
	let bayes = BayesEncoder::fit(
		&frame.view(),
		"city",
		"bought",
		&BayesOptions::default(),
		&mut |_| {},
		&CancellationToken::new(),
	)
	.unwrap()
	.table;
	for table in [mixed, bayes].iter() {
		let intercept = table.fallback()[0];
		let pooled_a = table.lookup("a")[0];
		let pooled_b = table.lookup("b")[0];
		assert!(pooled_b < raw_b, "{:?} {}", table.source(), pooled_b);
		assert!((pooled_b - intercept).abs() < (raw_b - intercept).abs());
		assert!((pooled_b - global).abs() < 0.25 * (raw_b - global).abs());
		assert!((pooled_b - pooled_a).abs() < (raw_b - raw_a).abs());
	}
}

#[test]
fn test_mixed_shrinkage_is_ordered_by_level_size() {
	let frame = numeric_frame(&[
		("small", &[6.0, 6.5, 5.5]),
		("large", &[6.0, 6.5, 5.5, 6.0, 6.5, 5.5, 6.0, 6.5, 5.5, 6.0, 6.5, 5.5]),
		("low", &[0.0, 1.0, -1.0, 0.5]),
		("mid", &[2.0, 3.0, 2.5, 1.5]),
		("neg", &[-3.0, -2.0, -2.5]),
	]);
	let table = MixedEncoder::fit(&frame.view(), "city", "price", &Default::default()).unwrap();
	let intercept = table.fallback()[0];
	let small = table.lookup("small")[0];
	let large = table.lookup("large")[0];
	assert!((small - intercept).abs() < (large - intercept).abs());
	assert!(small < 6.0 && large < 6.0);
}

#[test]
fn test_mixed_non_convergence_carries_a_table() {
	let frame = binary_frame(&[("a", 10, 3), ("b", 10, 7), ("c", 10, 5)]);
	let options = MixedOptions {
		max_iterations: 2,
		..Default::default()
	};
	let error = MixedEncoder::fit(&frame.view(), "city", "bought", &options).unwrap_err();
	assert!(matches!(error, Error::NonConvergence(_)));
	assert!(error.diagnostics().is_none());
	let table = error.into_table().unwrap();
	assert_eq!(table.n_levels(), 3);
}

#[test]
fn test_bayes_shrinks_and_reports_diagnostics() {
	let frame = binary_frame(&[
		("a", 100, 80),
		("b", 5, 4),
		("c", 40, 10),
		("d", 30, 15),
		("e", 60, 12),
	]);
	let mut progress = None;
	let fitted = BayesEncoder::fit(
		&frame.view(),
		"city",
		"bought",
		&BayesOptions::default(),
		&mut |p| progress = Some(p),
		&CancellationToken::new(),
	)
	.unwrap();
	let table = fitted.table;
	// Levels a and b have the same rate, and b has far fewer rows.
	assert!(table.lookup("b")[0] < table.lookup("a")[0]);
	assert_eq!(fitted.diagnostics.parameters[0].name, "intercept");
	assert_eq!(fitted.diagnostics.parameters[2].name, "b");
	match progress {
		Some(Progress::Sampling(counter)) => assert_eq!(counter.get(), counter.total()),
		_ => panic!("expected sampling progress"),
	}
}

#[test]
fn test_bayes_rejects_an_iteration_count_that_overflows() {
	let frame = binary_frame(&[("a", 20, 8), ("b", 5, 4)]);
	let options = BayesOptions {
		chains: usize::MAX,
		iterations: 2,
		..Default::default()
	};
	let mut n_progress_updates = 0;
	let error = BayesEncoder::fit(
		&frame.view(),
		"city",
		"bought",
		&options,
		&mut |_| n_progress_updates += 1,
		&CancellationToken::new(),
	)
	.unwrap_err();
	assert!(matches!(error, Error::InvalidOptions(_)));
	assert_eq!(n_progress_updates, 0);
}

#[test]
fn test_bayes_with_short_chains_does_not_converge() {
	let frame = binary_frame(&[("a", 20, 8), ("b", 5, 4), ("c", 40, 10)]);
	let options = BayesOptions {
		iterations: 40,
		min_effective_sample_size: 1e6,
		..Default::default()
	};
	let error = BayesEncoder::fit(
		&frame.view(),
		"city",
		"bought",
		&options,
		&mut |_| {},
		&CancellationToken::new(),
	)
	.unwrap_err();
	let diagnostics = error.diagnostics().unwrap();
	assert_eq!(diagnostics.parameters[0].name, "intercept");
	assert!(diagnostics.failures().count() > 0);
	match error {
		Error::Convergence(error) => {
			assert!(!error.diagnostics.converged());
			assert_eq!(error.into_table().n_levels(), 3);
		}
		_ => panic!("expected a convergence error"),
	}
}
