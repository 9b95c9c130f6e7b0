use super::*;
use anyhow::{format_err, Result};
use fnv::FnvHashMap;
use std::{
	collections::{BTreeMap, BTreeSet},
	path::Path,
};

#[derive(Clone)]
pub struct FromCsvOptions<'a> {
	pub column_types: Option<BTreeMap<String, ColumnType>>,
	pub infer_options: InferOptions,
	pub invalid_values: &'a [&'a str],
}

impl<'a> Default for FromCsvOptions<'a> {
	fn default() -> Self {
		Self {
			column_types: None,
			infer_options: InferOptions::default(),
			invalid_values: DEFAULT_INVALID_VALUES,
		}
	}
}

#[derive(Clone, Debug)]
pub struct InferOptions {
	pub enum_max_unique_values: usize,
}

impl Default for InferOptions {
	fn default() -> Self {
		Self {
			enum_max_unique_values: 100,
		}
	}
}

/// These values are the default values that are considered invalid.
pub const DEFAULT_INVALID_VALUES: &[&str] = &[
	"", "null", "NULL", "n/a", "N/A", "nan", "-nan", "NaN", "-NaN", "?",
];

impl DataFrame {
	pub fn from_path(path: &Path, options: FromCsvOptions, progress: impl Fn(u64)) -> Result<Self> {
		Self::from_csv(&mut csv::Reader::from_path(path)?, options, progress)
	}

	pub fn from_csv<R>(
		reader: &mut csv::Reader<R>,
		options: FromCsvOptions,
		progress: impl Fn(u64),
	) -> Result<Self>
	where
		R: std::io::Read + std::io::Seek,
	{
		let column_names: Vec<String> = reader
			.headers()?
			.into_iter()
			.map(|column_name| column_name.to_owned())
			.collect();
		let n_columns = column_names.len();
		let start_position = reader.position().clone();
		let infer_options = &options.infer_options;
		let invalid_values = options.invalid_values;
		let mut n_rows = None;

		#[derive(Clone, Debug)]
		enum ColumnTypeOrInferStats<'a> {
			ColumnType(ColumnType),
			InferStats(InferStats<'a>),
		}

		// Retrieve any column types present in the options.
		let mut column_types: Vec<ColumnTypeOrInferStats> =
			if let Some(column_types) = options.column_types.as_ref() {
				column_names
					.iter()
					.map(|column_name| {
						column_types
							.get(column_name)
							.map(|column_type| ColumnTypeOrInferStats::ColumnType(column_type.clone()))
							.unwrap_or_else(|| {
								ColumnTypeOrInferStats::InferStats(InferStats::new(
									infer_options,
									invalid_values,
								))
							})
					})
					.collect()
			} else {
				vec![
					ColumnTypeOrInferStats::InferStats(InferStats::new(
						infer_options,
						invalid_values
					));
					n_columns
				]
			};

		// Passing over the csv to infer column types is only necessary if one or more columns did not have its type specified.
		let needs_infer = column_types.iter().any(|column_type_or_infer_stats| {
			matches!(
				column_type_or_infer_stats,
				ColumnTypeOrInferStats::InferStats(_)
			)
		});

		// If the infer pass is necessary, pass over the dataset and infer the types for those columns whose types were not specified.
		let column_types: Vec<ColumnType> = if needs_infer {
			let mut infer_stats: Vec<(usize, &mut InferStats)> = column_types
				.iter_mut()
				.enumerate()
				.filter_map(
					|(index, column_type_or_infer_stats)| match column_type_or_infer_stats {
						ColumnTypeOrInferStats::ColumnType(_) => None,
						ColumnTypeOrInferStats::InferStats(infer_stats) => {
							Some((index, infer_stats))
						}
					},
				)
				.collect();
			// Iterate over each record in the csv file and update the infer stats for the columns that need to be inferred.
			let mut record = csv::StringRecord::new();
			let mut n_rows_computed = 0;
			while reader.read_record(&mut record)? {
				n_rows_computed += 1;
				for (index, infer_stats) in infer_stats.iter_mut() {
					let value = record.get(*index).ok_or_else(|| {
						format_err!("row {} is missing column {}", n_rows_computed, index)
					})?;
					infer_stats.update(value);
				}
			}
			n_rows = Some(n_rows_computed);
			let column_types = column_types
				.into_iter()
				.map(
					|column_type_or_infer_stats| match column_type_or_infer_stats {
						ColumnTypeOrInferStats::ColumnType(column_type) => column_type,
						ColumnTypeOrInferStats::InferStats(infer_stats) => infer_stats.finalize(),
					},
				)
				.collect();
			// After inference, return back to the beginning of the csv to load the values.
			reader.seek(start_position)?;
			column_types
		} else {
			column_types
				.into_iter()
				.filter_map(
					|column_type_or_infer_stats| match column_type_or_infer_stats {
						ColumnTypeOrInferStats::ColumnType(column_type) => Some(column_type),
						ColumnTypeOrInferStats::InferStats(_) => None,
					},
				)
				.collect()
		};

		// Create the dataframe.
		let mut dataframe = Self::new(column_names, column_types);
		// Enum values are looked up by their option string.
		let option_indexes: Vec<Option<FnvHashMap<String, NonZeroUsize>>> = dataframe
			.columns
			.iter()
			.map(|column| {
				column.as_enum().map(|column| {
					column
						.options
						.iter()
						.enumerate()
						.filter_map(|(index, option)| {
							NonZeroUsize::new(index + 1).map(|value| (option.clone(), value))
						})
						.collect()
				})
			})
			.collect();
		// If an inference pass was done, reserve storage for the values because we know how many rows are in the csv.
		if let Some(n_rows) = n_rows {
			for column in dataframe.columns.iter_mut() {
				match column {
					Column::Unknown(_) => {}
					Column::Number(column) => column.data.reserve_exact(n_rows),
					Column::Enum(column) => column.data.reserve_exact(n_rows),
					Column::Text(column) => column.data.reserve_exact(n_rows),
				}
			}
		}
		// Read each csv record and insert the values into the columns of the dataframe.
		let mut record = csv::ByteRecord::new();
		while reader.read_byte_record(&mut record)? {
			if let Some(position) = record.position() {
				progress(position.byte());
			}
			for ((column, option_index), value) in dataframe
				.columns
				.iter_mut()
				.zip(option_indexes.iter())
				.zip(record.iter())
			{
				match column {
					Column::Unknown(column) => {
						column.len += 1;
					}
					Column::Number(column) => {
						let value = match lexical::parse::<f32, _>(value) {
							Ok(value) if value.is_finite() => value,
							_ => std::f32::NAN,
						};
						column.data.push(value);
					}
					Column::Enum(column) => {
						let value = std::str::from_utf8(value).ok().and_then(|value| {
							option_index
								.as_ref()
								.and_then(|option_index| option_index.get(value).cloned())
						});
						column.data.push(value);
					}
					Column::Text(column) => {
						column.data.push(std::str::from_utf8(value)?.to_owned())
					}
				}
			}
		}
		Ok(dataframe)
	}

	/// Write the dataframe as csv. Missing number and enum values are written as empty fields.
	pub fn to_csv<W>(&self, writer: &mut csv::Writer<W>) -> Result<()>
	where
		W: std::io::Write,
	{
		writer.write_record(self.columns.iter().map(|column| column.name()))?;
		let mut record: Vec<String> = Vec::with_capacity(self.ncols());
		for index in 0..self.nrows() {
			record.clear();
			for column in self.columns.iter() {
				let value = match column {
					Column::Unknown(_) => String::new(),
					Column::Number(column) => {
						let value = column.data[index];
						if value.is_nan() {
							String::new()
						} else {
							value.to_string()
						}
					}
					Column::Enum(column) => column
						.view()
						.value(index)
						.map(|value| value.to_owned())
						.unwrap_or_default(),
					Column::Text(column) => column.data[index].clone(),
				};
				record.push(value);
			}
			writer.write_record(&record)?;
		}
		writer.flush()?;
		Ok(())
	}
}

#[derive(Clone, Debug)]
pub struct InferStats<'a> {
	infer_options: &'a InferOptions,
	invalid_values: &'a [&'a str],
	column_type: InferColumnType,
	unique_values: Option<BTreeSet<String>>,
}

#[derive(PartialEq, Clone, Copy, Debug)]
enum InferColumnType {
	Unknown,
	Number,
	Enum,
	Text,
}

impl<'a> InferStats<'a> {
	pub fn new(infer_options: &'a InferOptions, invalid_values: &'a [&'a str]) -> Self {
		Self {
			infer_options,
			invalid_values,
			column_type: InferColumnType::Unknown,
			unique_values: Some(BTreeSet::new()),
		}
	}

	pub fn update(&mut self, value: &str) {
		if self.invalid_values.contains(&value) {
			return;
		}
		if let Some(unique_values) = self.unique_values.as_mut() {
			if !unique_values.contains(value) {
				unique_values.insert(value.to_owned());
			}
			if unique_values.len() > self.infer_options.enum_max_unique_values {
				self.unique_values = None;
			}
		}
		match self.column_type {
			InferColumnType::Unknown | InferColumnType::Number => {
				if lexical::parse::<f32, _>(value)
					.map(|v| v.is_finite())
					.unwrap_or(false)
				{
					self.column_type = InferColumnType::Number;
				} else if self.unique_values.is_some() {
					self.column_type = InferColumnType::Enum;
				} else {
					self.column_type = InferColumnType::Text;
				}
			}
			InferColumnType::Enum => {
				if self.unique_values.is_none() {
					self.column_type = InferColumnType::Text;
				}
			}
			InferColumnType::Text => {}
		}
	}

	pub fn finalize(self) -> ColumnType {
		match self.column_type {
			InferColumnType::Unknown => ColumnType::Unknown,
			InferColumnType::Number => {
				// If all the values in a number column are zero or one then make this an enum column instead.
				if let Some(unique_values) = self.unique_values {
					let mut values = unique_values.iter();
					if unique_values.len() == 2
						&& values.next().map(|s| s.as_str()) == Some("0")
						&& values.next().map(|s| s.as_str()) == Some("1")
					{
						return ColumnType::Enum {
							options: unique_values.into_iter().collect(),
						};
					}
				}
				ColumnType::Number
			}
			InferColumnType::Enum => ColumnType::Enum {
				options: self
					.unique_values
					.map(|unique_values| unique_values.into_iter().collect())
					.unwrap_or_default(),
			},
			InferColumnType::Text => ColumnType::Text,
		}
	}
}

#[test]
fn test_infer() {
	let csv = r#"number,enum,text
1,test,hello
2,test,world
"#;
	let df = DataFrame::from_csv(
		&mut csv::Reader::from_reader(std::io::Cursor::new(csv)),
		FromCsvOptions {
			column_types: None,
			infer_options: InferOptions {
				enum_max_unique_values: 1,
			},
			..Default::default()
		},
		|_| {},
	)
	.unwrap();
	insta::assert_debug_snapshot!(df, @r###"
 DataFrame {
     columns: [
         Number(
             NumberColumn {
                 name: "number",
                 data: [
                     1.0,
                     2.0,
                 ],
             },
         ),
         Enum(
             EnumColumn {
                 name: "enum",
                 options: [
                     "test",
                 ],
                 data: [
                     Some(
                         1,
                     ),
                     Some(
                         1,
                     ),
                 ],
             },
         ),
         Text(
             TextColumn {
                 name: "text",
                 data: [
                     "hello",
                     "world",
                 ],
             },
         ),
     ],
 }
 "###);
}

#[test]
fn test_zero_one_column_is_inferred_as_enum() {
	let csv = "outcome,level\n0,a\n1,b\n,c\n1,a\n";
	let df = DataFrame::from_csv(
		&mut csv::Reader::from_reader(std::io::Cursor::new(csv)),
		FromCsvOptions::default(),
		|_| {},
	)
	.unwrap();
	let outcome = df.column("outcome").and_then(|column| column.as_enum()).unwrap();
	assert_eq!(outcome.options, vec!["0".to_owned(), "1".to_owned()]);
	let values: Vec<Option<&str>> = (0..4).map(|index| outcome.view().value(index)).collect();
	assert_eq!(values, vec![Some("0"), Some("1"), None, Some("1")]);
}

#[test]
fn test_column_types() {
	let csv = r#"number,text,enum
1,test,hello
2,test,world
"#;
	let mut column_types = BTreeMap::new();
	column_types.insert("text".to_owned(), ColumnType::Text);
	column_types.insert(
		"enum".to_owned(),
		ColumnType::Enum {
			options: vec!["hello".to_owned(), "world".to_owned()],
		},
	);
	let df = DataFrame::from_csv(
		&mut csv::Reader::from_reader(std::io::Cursor::new(csv)),
		FromCsvOptions {
			column_types: Some(column_types),
			infer_options: InferOptions {
				enum_max_unique_values: 2,
			},
			..Default::default()
		},
		|_| {},
	)
	.unwrap();
	assert_eq!(df.nrows(), 2);
	let text = df.column("text").and_then(|column| column.as_text()).unwrap();
	assert_eq!(text.data, vec!["test".to_owned(), "test".to_owned()]);
	let enum_column = df.column("enum").and_then(|column| column.as_enum()).unwrap();
	assert_eq!(enum_column.data, vec![NonZeroUsize::new(1), NonZeroUsize::new(2)]);
}

#[test]
fn test_to_csv_writes_missing_values_as_empty_fields() {
	let df = DataFrame::from_columns(vec![
		Column::Number(NumberColumn::with_data(
			"x".to_owned(),
			vec![1.5, std::f32::NAN],
		)),
		Column::Enum(EnumColumn::from_values(
			"color".to_owned(),
			vec!["red".to_owned()],
			&["red", "blue"],
		)),
	]);
	let mut writer = csv::Writer::from_writer(Vec::new());
	df.to_csv(&mut writer).unwrap();
	let bytes = writer.into_inner().unwrap();
	assert_eq!(String::from_utf8(bytes).unwrap(), "x,color\n1.5,red\n,\n");
}
