use super::EncodingTable;
use embed_hierarchical::Diagnostics;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("insufficient data: {0}")]
	InsufficientData(String),
	#[error("the outcome column \"{column}\" cannot be used: {reason}")]
	OutcomeType { column: String, reason: String },
	#[error("no column named \"{0}\" was found")]
	ColumnNotFound(String),
	#[error("the column \"{column}\" has type {column_type}, but a categorical column must have type enum or text")]
	CategoricalColumnType { column: String, column_type: String },
	#[error("the predictor column \"{column}\" has type {column_type}, but predictors must have type number")]
	PredictorColumnType { column: String, column_type: String },
	#[error("invalid options: {0}")]
	InvalidOptions(String),
	#[error(transparent)]
	Convergence(Box<ConvergenceError>),
	#[error(transparent)]
	NonConvergence(Box<NonConvergenceError>),
	#[error("the fit was cancelled")]
	Cancelled,
}

impl Error {
	/// Return the approximate table carried by a statistical convergence error. Every other error is returned before a table exists.
	pub fn into_table(self) -> Option<EncodingTable> {
		match self {
			Error::Convergence(error) => Some(error.into_table()),
			Error::NonConvergence(error) => Some(error.into_table()),
			_ => None,
		}
	}

	/// The sampler diagnostics, if this error was caused by chains that failed them.
	pub fn diagnostics(&self) -> Option<&Diagnostics> {
		match self {
			Error::Convergence(error) => Some(&error.diagnostics),
			_ => None,
		}
	}
}

/// The sampler's chains did not pass the convergence diagnostics. The table holds the posterior means anyway, so the caller may accept it or refit with longer chains.
#[derive(Debug)]
pub struct ConvergenceError {
	pub table: EncodingTable,
	pub diagnostics: Diagnostics,
}

impl std::fmt::Display for ConvergenceError {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let diagnostics = &self.diagnostics;
		write!(
			f,
			"the sampler did not converge: {} parameters failed, with a worst rhat of {:.3} (at most {} allowed) and a smallest effective sample size of {:.0} (at least {} required)",
			diagnostics.failures().count(),
			diagnostics.worst_rhat(),
			diagnostics.max_rhat,
			diagnostics.worst_effective_sample_size(),
			diagnostics.min_effective_sample_size,
		)
	}
}

impl std::error::Error for ConvergenceError {}

impl ConvergenceError {
	pub fn into_table(self) -> EncodingTable {
		self.table
	}
}

/// The mixed model solver ran out of iterations. The table holds the estimates at that point.
#[derive(Debug, thiserror::Error)]
#[error("the mixed model did not converge within {iterations} iterations")]
pub struct NonConvergenceError {
	pub table: EncodingTable,
	pub iterations: usize,
}

impl NonConvergenceError {
	pub fn into_table(self) -> EncodingTable {
		self.table
	}
}

/// Applying a table found levels that were not seen when it was fit. Their rows were encoded with the fallback.
#[derive(Clone, Debug, PartialEq)]
pub struct UnknownLevelWarning {
	/// The number of rows with an unknown level.
	pub n_rows: usize,
	/// The distinct unknown levels, sorted.
	pub levels: Vec<String>,
}

impl std::fmt::Display for UnknownLevelWarning {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		const MAX_LEVELS_SHOWN: usize = 10;
		write!(
			f,
			"{} rows had {} levels not seen during fit: ",
			self.n_rows,
			self.levels.len()
		)?;
		let shown = self.levels.len().min(MAX_LEVELS_SHOWN);
		write!(f, "{}", self.levels[..shown].join(", "))?;
		if self.levels.len() > shown {
			write!(f, ", ...")?;
		}
		Ok(())
	}
}
