use super::Error;
use embed_dataframe::*;
use embed_hierarchical::Family;
use fnv::FnvHashMap;

/// A column whose values are the levels to encode.
#[derive(Clone, Debug)]
pub enum CategoricalColumn<'a> {
	Enum(EnumColumnView<'a>),
	Text(TextColumnView<'a>),
}

impl<'a> CategoricalColumn<'a> {
	pub fn from_frame(frame: &DataFrameView<'a>, name: &str) -> Result<Self, Error> {
		let column = frame
			.column(name)
			.ok_or_else(|| Error::ColumnNotFound(name.to_owned()))?;
		match column {
			ColumnView::Enum(column) => Ok(CategoricalColumn::Enum(column.clone())),
			ColumnView::Text(column) => Ok(CategoricalColumn::Text(column.clone())),
			column => Err(Error::CategoricalColumnType {
				column: name.to_owned(),
				column_type: column.type_name().to_owned(),
			}),
		}
	}

	pub fn len(&self) -> usize {
		match self {
			CategoricalColumn::Enum(column) => column.data.len(),
			CategoricalColumn::Text(column) => column.data.len(),
		}
	}

	/// The level at `index`, or `None` if the value is missing. An empty text value is missing.
	pub fn value(&self, index: usize) -> Option<&'a str> {
		match self {
			CategoricalColumn::Enum(column) => column.value(index),
			CategoricalColumn::Text(column) => {
				let value = column.value(index);
				if value.is_empty() {
					None
				} else {
					Some(value)
				}
			}
		}
	}
}

/// A column the encoders learn to predict.
#[derive(Clone, Debug)]
pub enum OutcomeColumn<'a> {
	Number(NumberColumnView<'a>),
	Enum(EnumColumnView<'a>),
}

impl<'a> OutcomeColumn<'a> {
	pub fn from_frame(frame: &DataFrameView<'a>, name: &str) -> Result<Self, Error> {
		let column = frame
			.column(name)
			.ok_or_else(|| Error::ColumnNotFound(name.to_owned()))?;
		match column {
			ColumnView::Number(column) => Ok(OutcomeColumn::Number(column.clone())),
			ColumnView::Enum(column) => Ok(OutcomeColumn::Enum(column.clone())),
			column => Err(Error::OutcomeType {
				column: name.to_owned(),
				reason: format!(
					"it has type {}, but the outcome must be a number or enum column",
					column.type_name()
				),
			}),
		}
	}

	pub fn is_missing(&self, index: usize) -> bool {
		match self {
			OutcomeColumn::Number(column) => !column.data[index].is_finite(),
			OutcomeColumn::Enum(column) => column.data[index].is_none(),
		}
	}

	/// The family of a likelihood encoding of this outcome, and the value of each row on the scale of that family. A binary outcome's second option is the event, coded 1.
	pub fn likelihood_values(&self, name: &str) -> Result<(Family, Vec<f64>), Error> {
		match self {
			OutcomeColumn::Number(column) => Ok((
				Family::Gaussian,
				column.data.iter().map(|value| f64::from(*value)).collect(),
			)),
			OutcomeColumn::Enum(column) if column.options.len() == 2 => Ok((
				Family::Binomial,
				column
					.data
					.iter()
					.map(|value| match value.map(|value| value.get()) {
						Some(2) => 1.0,
						_ => 0.0,
					})
					.collect(),
			)),
			OutcomeColumn::Enum(column) => Err(Error::OutcomeType {
				column: name.to_owned(),
				reason: format!(
					"likelihood encodings need a numeric or binary outcome, but it has {} classes",
					column.options.len()
				),
			}),
		}
	}
}

/// The training rows of a fit: the rows whose level and outcome are both present, and the level of each.
#[derive(Clone, Debug, PartialEq)]
pub struct TrainingRows {
	/// The distinct levels, sorted. A level's position is its id.
	pub levels: Vec<String>,
	/// The frame row of each training row.
	pub rows: Vec<usize>,
	/// The level id of each training row.
	pub level_ids: Vec<usize>,
	/// The number of training rows of each level.
	pub counts: Vec<u64>,
}

impl TrainingRows {
	/// Collect the rows with a present level for which `keep` returns true.
	pub fn new(categorical: &CategoricalColumn, keep: impl Fn(usize) -> bool) -> Self {
		let mut level_index: FnvHashMap<&str, usize> = FnvHashMap::default();
		let mut rows = Vec::new();
		let mut row_levels = Vec::new();
		for row in 0..categorical.len() {
			let level = match categorical.value(row) {
				Some(level) => level,
				None => continue,
			};
			if !keep(row) {
				continue;
			}
			let next_id = level_index.len();
			level_index.entry(level).or_insert(next_id);
			rows.push(row);
			row_levels.push(level);
		}
		let n_skipped = categorical.len() - rows.len();
		if n_skipped > 0 {
			log::debug!("skipped {} rows with a missing level or outcome", n_skipped);
		}
		let mut levels: Vec<String> = level_index.keys().map(|level| (*level).to_owned()).collect();
		levels.sort();
		let sorted_index: FnvHashMap<&str, usize> = levels
			.iter()
			.enumerate()
			.map(|(id, level)| (level.as_str(), id))
			.collect();
		let level_ids: Vec<usize> = row_levels.iter().map(|level| sorted_index[level]).collect();
		let mut counts = vec![0; levels.len()];
		for id in level_ids.iter() {
			counts[*id] += 1;
		}
		Self {
			levels,
			rows,
			level_ids,
			counts,
		}
	}

	pub fn n_levels(&self) -> usize {
		self.levels.len()
	}

	pub fn n_rows(&self) -> usize {
		self.rows.len()
	}

	/// Fail unless there are at least `required` distinct levels.
	pub fn require_levels(&self, required: usize) -> Result<(), Error> {
		if self.n_levels() < required {
			return Err(Error::InsufficientData(format!(
				"at least {} distinct levels are required, but the training rows have {}",
				required,
				self.n_levels()
			)));
		}
		Ok(())
	}
}

#[cfg(test)]
fn frame() -> DataFrame {
	DataFrame::from_columns(vec![
		Column::Text(TextColumn::with_data(
			"city".to_owned(),
			vec!["b", "a", "", "b", "c"]
				.into_iter()
				.map(|value| value.to_owned())
				.collect(),
		)),
		Column::Number(NumberColumn::with_data(
			"price".to_owned(),
			vec![1.0, 2.0, 3.0, std::f32::NAN, 5.0],
		)),
	])
}

#[test]
fn test_training_rows_skip_missing_values() {
	let frame = frame();
	let view = frame.view();
	let categorical = CategoricalColumn::from_frame(&view, "city").unwrap();
	let outcome = OutcomeColumn::from_frame(&view, "price").unwrap();
	let training_rows = TrainingRows::new(&categorical, |row| !outcome.is_missing(row));
	assert_eq!(training_rows.levels, vec!["a", "b", "c"]);
	assert_eq!(training_rows.rows, vec![0, 1, 4]);
	assert_eq!(training_rows.level_ids, vec![1, 0, 2]);
	assert_eq!(training_rows.counts, vec![1, 1, 1]);
}

#[test]
fn test_column_type_errors() {
	let frame = frame();
	let view = frame.view();
	assert!(matches!(
		CategoricalColumn::from_frame(&view, "price"),
		Err(Error::CategoricalColumnType { .. })
	));
	assert!(matches!(
		OutcomeColumn::from_frame(&view, "city"),
		Err(Error::OutcomeType { .. })
	));
	assert!(matches!(
		CategoricalColumn::from_frame(&view, "missing"),
		Err(Error::ColumnNotFound(_))
	));
}
