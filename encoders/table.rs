use super::{columns::CategoricalColumn, tidy::TidyReport, Error, UnknownLevelWarning};
use embed_dataframe::{DataFrameView, NumberColumn};
use fnv::FnvHashMap;
use ndarray::prelude::*;
use std::collections::BTreeSet;
use std::convert::TryFrom;

/// The method that produced an encoding table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum EncodingSource {
	#[serde(rename = "no_pooling")]
	NoPooling,
	#[serde(rename = "bayes")]
	Bayes,
	#[serde(rename = "mixed")]
	Mixed,
	#[serde(rename = "embedding")]
	Embedding,
}

impl EncodingSource {
	/// The tag in the `id` column of tidy reports.
	pub fn id(&self) -> &'static str {
		match self {
			EncodingSource::NoPooling => "lencode_glm",
			EncodingSource::Bayes => "lencode_bayes",
			EncodingSource::Mixed => "lencode_mixed",
			EncodingSource::Embedding => "embed",
		}
	}
}

/**
An `EncodingTable` maps each level of a categorical column seen during fit to a fixed numeric vector, and every other level to one fallback vector. A likelihood encoding has one value per level and an embedding has one value per embedding dimension.

Tables are immutable once fit. They serialize to JSON, so a table can be fit once and applied later to other data.
*/
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "SerializedEncodingTable", into = "SerializedEncodingTable")]
pub struct EncodingTable {
	source: EncodingSource,
	column_name: String,
	output_column_names: Vec<String>,
	levels: Vec<String>,
	/// The number of training rows of each level.
	counts: Vec<u64>,
	/// (n_levels, n_output_columns)
	values: Array2<f32>,
	fallback: Array1<f32>,
	index: FnvHashMap<String, usize>,
}

/// The result of [`EncodingTable::apply`](struct.EncodingTable.html#method.apply).
#[derive(Clone, Debug, PartialEq)]
pub struct Applied {
	/// One column per output column of the table, with one value per row of the input.
	pub columns: Vec<NumberColumn>,
	pub unknown_levels: Option<UnknownLevelWarning>,
}

impl EncodingTable {
	/// `levels` must be distinct and sorted, with one row of `values` each.
	pub(crate) fn new(
		source: EncodingSource,
		column_name: String,
		output_column_names: Vec<String>,
		levels: Vec<String>,
		counts: Vec<u64>,
		values: Array2<f32>,
		fallback: Array1<f32>,
	) -> Result<Self, Error> {
		if values.nrows() != levels.len()
			|| counts.len() != levels.len()
			|| values.ncols() != output_column_names.len()
			|| fallback.len() != output_column_names.len()
		{
			return Err(Error::InvalidOptions(format!(
				"the table for column \"{}\" has inconsistent dimensions",
				column_name
			)));
		}
		let index: FnvHashMap<String, usize> = levels
			.iter()
			.enumerate()
			.map(|(id, level)| (level.clone(), id))
			.collect();
		if index.len() != levels.len() {
			return Err(Error::InvalidOptions(format!(
				"the table for column \"{}\" has duplicate levels",
				column_name
			)));
		}
		Ok(Self {
			source,
			column_name,
			output_column_names,
			levels,
			counts,
			values,
			fallback,
			index,
		})
	}

	pub fn source(&self) -> EncodingSource {
		self.source
	}

	/// The name of the categorical column the table was fit on.
	pub fn column_name(&self) -> &str {
		&self.column_name
	}

	pub fn output_column_names(&self) -> &[String] {
		&self.output_column_names
	}

	pub fn levels(&self) -> &[String] {
		&self.levels
	}

	pub fn counts(&self) -> &[u64] {
		&self.counts
	}

	pub fn n_levels(&self) -> usize {
		self.levels.len()
	}

	pub fn values(&self) -> ArrayView2<f32> {
		self.values.view()
	}

	pub fn fallback(&self) -> ArrayView1<f32> {
		self.fallback.view()
	}

	pub fn contains(&self, level: &str) -> bool {
		self.index.contains_key(level)
	}

	/// The vector for `level`, or the fallback if it was not seen during fit.
	pub fn lookup(&self, level: &str) -> ArrayView1<f32> {
		match self.index.get(level) {
			Some(id) => self.values.row(*id),
			None => self.fallback.view(),
		}
	}

	/**
	Encode the column `categorical_column` of `frame`. The result has one number column per output column of the table, with exactly one value per row of `frame`, in the same order. Rows whose level is missing or was not seen during fit get the fallback vector. Unknown levels are reported in the result, never as an error.
	*/
	pub fn apply(&self, frame: &DataFrameView, categorical_column: &str) -> Result<Applied, Error> {
		let categorical = CategoricalColumn::from_frame(frame, categorical_column)?;
		let n_rows = categorical.len();
		let mut data: Vec<Vec<f32>> = self
			.output_column_names
			.iter()
			.map(|_| Vec::with_capacity(n_rows))
			.collect();
		let mut unknown_levels = BTreeSet::new();
		let mut n_unknown_rows = 0;
		for row in 0..n_rows {
			let vector = match categorical.value(row) {
				Some(level) => match self.index.get(level) {
					Some(id) => self.values.row(*id),
					None => {
						n_unknown_rows += 1;
						unknown_levels.insert(level);
						self.fallback.view()
					}
				},
				None => self.fallback.view(),
			};
			for (column, value) in data.iter_mut().zip(vector.iter()) {
				column.push(*value);
			}
		}
		let columns = self
			.output_column_names
			.iter()
			.zip(data.into_iter())
			.map(|(name, data)| NumberColumn::with_data(name.clone(), data))
			.collect();
		let unknown_levels = if n_unknown_rows > 0 {
			let warning = UnknownLevelWarning {
				n_rows: n_unknown_rows,
				levels: unknown_levels.into_iter().map(|level| level.to_owned()).collect(),
			};
			log::warn!("column \"{}\": {}", categorical_column, warning);
			Some(warning)
		} else {
			None
		};
		Ok(Applied {
			columns,
			unknown_levels,
		})
	}

	/// A report with one row per level and a last row, with level `..new`, for the fallback.
	pub fn tidy(&self) -> TidyReport {
		let mut columns = vec!["level".to_owned()];
		columns.extend(self.output_column_names.iter().cloned());
		columns.push("n".to_owned());
		columns.push("id".to_owned());
		let id = self.source.id();
		let format_row = |level: &str, values: ArrayView1<f32>, count: u64| {
			let mut row = vec![level.to_owned()];
			row.extend(values.iter().map(|value| value.to_string()));
			row.push(count.to_string());
			row.push(id.to_owned());
			row
		};
		let mut rows: Vec<Vec<String>> = self
			.levels
			.iter()
			.zip(self.counts.iter())
			.enumerate()
			.map(|(id, (level, count))| format_row(level, self.values.row(id), *count))
			.collect();
		rows.push(format_row(
			"..new",
			self.fallback.view(),
			self.counts.iter().sum(),
		));
		TidyReport { columns, rows }
	}
}

#[derive(serde::Serialize, serde::Deserialize)]
struct SerializedEncodingTable {
	source: EncodingSource,
	column_name: String,
	output_column_names: Vec<String>,
	levels: Vec<String>,
	counts: Vec<u64>,
	values: Vec<Vec<f32>>,
	fallback: Vec<f32>,
}

impl From<EncodingTable> for SerializedEncodingTable {
	fn from(table: EncodingTable) -> Self {
		Self {
			source: table.source,
			values: table
				.values
				.axis_iter(Axis(0))
				.map(|row| row.to_vec())
				.collect(),
			fallback: table.fallback.to_vec(),
			column_name: table.column_name,
			output_column_names: table.output_column_names,
			levels: table.levels,
			counts: table.counts,
		}
	}
}

impl TryFrom<SerializedEncodingTable> for EncodingTable {
	type Error = Error;
	fn try_from(table: SerializedEncodingTable) -> Result<Self, Error> {
		let n_columns = table.output_column_names.len();
		let n_levels = table.values.len();
		if table.values.iter().any(|row| row.len() != n_columns) {
			return Err(Error::InvalidOptions(
				"every row of the table must have one value per output column".to_owned(),
			));
		}
		let values = Array2::from_shape_vec(
			(n_levels, n_columns),
			table.values.into_iter().flatten().collect(),
		)
		.map_err(|error| Error::InvalidOptions(error.to_string()))?;
		EncodingTable::new(
			table.source,
			table.column_name,
			table.output_column_names,
			table.levels,
			table.counts,
			values,
			Array1::from(table.fallback),
		)
	}
}

#[cfg(test)]
fn example_table() -> EncodingTable {
	EncodingTable::new(
		EncodingSource::Embedding,
		"city".to_owned(),
		vec!["city_embed_1".to_owned(), "city_embed_2".to_owned()],
		vec!["a".to_owned(), "b".to_owned()],
		vec![3, 1],
		arr2(&[[0.125, -1.5], [2.0, 0.1]]),
		arr1(&[0.0, 0.0]),
	)
	.unwrap()
}

#[cfg(test)]
fn text_frame(values: &[&str]) -> embed_dataframe::DataFrame {
	use embed_dataframe::{Column, DataFrame, TextColumn};
	DataFrame::from_columns(vec![Column::Text(TextColumn::with_data(
		"city".to_owned(),
		values.iter().map(|value| (*value).to_owned()).collect(),
	))])
}

#[test]
fn test_apply_copies_rows_and_uses_the_fallback() {
	let table = example_table();
	let frame = text_frame(&["b", "z", "a", "", "y", "z"]);
	let applied = table.apply(&frame.view(), "city").unwrap();
	assert_eq!(applied.columns.len(), 2);
	assert_eq!(applied.columns[0].data, vec![2.0, 0.0, 0.125, 0.0, 0.0, 0.0]);
	assert_eq!(applied.columns[1].data, vec![0.1, 0.0, -1.5, 0.0, 0.0, 0.0]);
	assert_eq!(applied.columns[0].name, "city_embed_1");
	assert_eq!(
		applied.unknown_levels,
		Some(UnknownLevelWarning {
			n_rows: 3,
			levels: vec!["y".to_owned(), "z".to_owned()],
		})
	);
}

#[test]
fn test_apply_without_unknown_levels() {
	let table = example_table();
	let frame = text_frame(&["a", "a"]);
	let applied = table.apply(&frame.view(), "city").unwrap();
	assert_eq!(applied.unknown_levels, None);
	assert_eq!(applied.columns[0].data.len(), 2);
	assert!(matches!(
		table.apply(&frame.view(), "town"),
		Err(Error::ColumnNotFound(_))
	));
}

#[test]
fn test_lookup() {
	let table = example_table();
	assert_eq!(table.lookup("b"), arr1(&[2.0, 0.1]));
	assert_eq!(table.lookup("never seen"), table.fallback());
	assert!(table.contains("a"));
	assert!(!table.contains("c"));
}

#[test]
fn test_table_survives_json() {
	let table = example_table();
	let json = serde_json::to_string(&table).unwrap();
	let parsed: EncodingTable = serde_json::from_str(&json).unwrap();
	assert_eq!(parsed, table);
	assert_eq!(parsed.lookup("a"), table.lookup("a"));
}

#[test]
fn test_malformed_json_table_is_rejected() {
	let json = r#"{"source":"mixed","column_name":"city","output_column_names":["city_lencode"],"levels":["a","a"],"counts":[1,1],"values":[[1.0],[2.0]],"fallback":[0.0]}"#;
	assert!(serde_json::from_str::<EncodingTable>(json).is_err());
}

#[test]
fn test_tidy() {
	let table = example_table();
	insta::assert_snapshot!(table.tidy().to_string(), @r###"
 | level | city_embed_1 | city_embed_2 | n | id    |
 |-------|--------------|--------------|---|-------|
 | a     | 0.125        | -1.5         | 3 | embed |
 | b     | 2            | 0.1          | 1 | embed |
 | ..new | 0            | 0            | 4 | embed |
 "###);
}
