/*!
This crate provides a basic implementation of dataframes, which are two dimensional arrays of data where each column can have a different data type, like a spreadsheet. It only implements what the encoders need: named number, enum and text columns, borrowed views of them, and loading from and writing to csv.
*/

#![allow(clippy::tabs_in_doc_comments)]

use std::num::NonZeroUsize;

mod load;

pub use self::load::*;

#[derive(Debug, Clone, PartialEq)]
pub struct DataFrame {
	pub columns: Vec<Column>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DataFrameView<'a> {
	pub columns: Vec<ColumnView<'a>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Column {
	Unknown(UnknownColumn),
	Number(NumberColumn),
	Enum(EnumColumn),
	Text(TextColumn),
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnknownColumn {
	pub name: String,
	pub len: usize,
}

/// A column of numbers. Missing values are stored as `NaN`.
#[derive(Debug, Clone, PartialEq)]
pub struct NumberColumn {
	pub name: String,
	pub data: Vec<f32>,
}

/// A column whose values are one of a fixed list of `options`. Each value is the one-based index of its option, or `None` if the value was missing or not one of the options.
#[derive(Debug, Clone, PartialEq)]
pub struct EnumColumn {
	pub name: String,
	pub options: Vec<String>,
	pub data: Vec<Option<NonZeroUsize>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextColumn {
	pub name: String,
	pub data: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ColumnView<'a> {
	Unknown(UnknownColumnView<'a>),
	Number(NumberColumnView<'a>),
	Enum(EnumColumnView<'a>),
	Text(TextColumnView<'a>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnknownColumnView<'a> {
	pub name: &'a str,
	pub len: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NumberColumnView<'a> {
	pub name: &'a str,
	pub data: &'a [f32],
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnumColumnView<'a> {
	pub name: &'a str,
	pub options: &'a [String],
	pub data: &'a [Option<NonZeroUsize>],
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextColumnView<'a> {
	pub name: &'a str,
	pub data: &'a [String],
}

#[derive(Debug, Clone, PartialEq)]
pub enum ColumnType {
	Unknown,
	Number,
	Enum { options: Vec<String> },
	Text,
}

impl DataFrame {
	pub fn new(column_names: Vec<String>, column_types: Vec<ColumnType>) -> Self {
		let columns = column_names
			.into_iter()
			.zip(column_types.into_iter())
			.map(|(column_name, column_type)| match column_type {
				ColumnType::Unknown => Column::Unknown(UnknownColumn::new(column_name)),
				ColumnType::Number => Column::Number(NumberColumn::new(column_name)),
				ColumnType::Enum { options } => Column::Enum(EnumColumn::new(column_name, options)),
				ColumnType::Text => Column::Text(TextColumn::new(column_name)),
			})
			.collect();
		Self { columns }
	}

	pub fn from_columns(columns: Vec<Column>) -> Self {
		Self { columns }
	}

	pub fn ncols(&self) -> usize {
		self.columns.len()
	}

	pub fn nrows(&self) -> usize {
		self.columns.first().map(|column| column.len()).unwrap_or(0)
	}

	pub fn column(&self, name: &str) -> Option<&Column> {
		self.columns.iter().find(|column| column.name() == name)
	}

	pub fn view(&self) -> DataFrameView {
		let columns = self.columns.iter().map(|column| column.view()).collect();
		DataFrameView { columns }
	}
}

impl Column {
	pub fn len(&self) -> usize {
		match self {
			Self::Unknown(s) => s.len,
			Self::Number(s) => s.data.len(),
			Self::Enum(s) => s.data.len(),
			Self::Text(s) => s.data.len(),
		}
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	pub fn name(&self) -> &str {
		match self {
			Self::Unknown(s) => s.name.as_str(),
			Self::Number(s) => s.name.as_str(),
			Self::Enum(s) => s.name.as_str(),
			Self::Text(s) => s.name.as_str(),
		}
	}

	pub fn as_enum(&self) -> Option<&EnumColumn> {
		match self {
			Self::Enum(s) => Some(s),
			_ => None,
		}
	}

	pub fn as_text(&self) -> Option<&TextColumn> {
		match self {
			Self::Text(s) => Some(s),
			_ => None,
		}
	}

	pub fn view(&self) -> ColumnView {
		match self {
			Self::Unknown(column) => ColumnView::Unknown(column.view()),
			Self::Number(column) => ColumnView::Number(column.view()),
			Self::Enum(column) => ColumnView::Enum(column.view()),
			Self::Text(column) => ColumnView::Text(column.view()),
		}
	}
}

impl UnknownColumn {
	pub fn new(name: String) -> Self {
		Self { name, len: 0 }
	}

	pub fn view(&self) -> UnknownColumnView {
		UnknownColumnView {
			name: &self.name,
			len: self.len,
		}
	}
}

impl NumberColumn {
	pub fn new(name: String) -> Self {
		Self {
			name,
			data: Vec::new(),
		}
	}

	pub fn with_data(name: String, data: Vec<f32>) -> Self {
		Self { name, data }
	}

	pub fn view(&self) -> NumberColumnView {
		NumberColumnView {
			name: &self.name,
			data: &self.data,
		}
	}
}

impl EnumColumn {
	pub fn new(name: String, options: Vec<String>) -> Self {
		Self {
			name,
			options,
			data: Vec::new(),
		}
	}

	/// Create an enum column from string values. Values that are not in `options` become `None`.
	pub fn from_values(name: String, options: Vec<String>, values: &[&str]) -> Self {
		let data = values
			.iter()
			.map(|value| {
				options
					.iter()
					.position(|option| option == value)
					.and_then(|position| NonZeroUsize::new(position + 1))
			})
			.collect();
		Self {
			name,
			options,
			data,
		}
	}

	pub fn view(&self) -> EnumColumnView {
		EnumColumnView {
			name: &self.name,
			data: &self.data,
			options: &self.options,
		}
	}
}

impl TextColumn {
	pub fn new(name: String) -> Self {
		Self {
			name,
			data: Vec::new(),
		}
	}

	pub fn with_data(name: String, data: Vec<String>) -> Self {
		Self { name, data }
	}

	pub fn view(&self) -> TextColumnView {
		TextColumnView {
			name: &self.name,
			data: &self.data,
		}
	}
}

impl<'a> DataFrameView<'a> {
	pub fn ncols(&self) -> usize {
		self.columns.len()
	}

	pub fn nrows(&self) -> usize {
		self.columns.first().map(|column| column.len()).unwrap_or(0)
	}

	pub fn view(&self) -> Self {
		self.clone()
	}

	pub fn column(&self, name: &str) -> Option<&ColumnView<'a>> {
		self.columns.iter().find(|column| column.name() == name)
	}
}

impl<'a> ColumnView<'a> {
	pub fn len(&self) -> usize {
		match self {
			Self::Unknown(s) => s.len,
			Self::Number(s) => s.data.len(),
			Self::Enum(s) => s.data.len(),
			Self::Text(s) => s.data.len(),
		}
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	pub fn name(&self) -> &'a str {
		match self {
			Self::Unknown(s) => s.name,
			Self::Number(s) => s.name,
			Self::Enum(s) => s.name,
			Self::Text(s) => s.name,
		}
	}

	/// A short, human readable name for the type of this column, used in error messages.
	pub fn type_name(&self) -> &'static str {
		match self {
			Self::Unknown(_) => "unknown",
			Self::Number(_) => "number",
			Self::Enum(_) => "enum",
			Self::Text(_) => "text",
		}
	}

	pub fn as_enum(&self) -> Option<EnumColumnView<'a>> {
		match self {
			Self::Enum(s) => Some(s.clone()),
			_ => None,
		}
	}

	pub fn as_text(&self) -> Option<TextColumnView<'a>> {
		match self {
			Self::Text(s) => Some(s.clone()),
			_ => None,
		}
	}
}

impl<'a> EnumColumnView<'a> {
	/// Return the option string for the value at `index`, or `None` if the value is missing.
	pub fn value(&self, index: usize) -> Option<&'a str> {
		let options = self.options;
		self.data[index].and_then(|value| options.get(value.get() - 1).map(|option| option.as_str()))
	}
}

impl<'a> TextColumnView<'a> {
	pub fn value(&self, index: usize) -> &'a str {
		self.data[index].as_str()
	}
}

#[test]
fn test_enum_column_from_values() {
	let column = EnumColumn::from_values(
		"color".to_owned(),
		vec!["red".to_owned(), "green".to_owned()],
		&["green", "blue", "red"],
	);
	let view = column.view();
	assert_eq!(view.value(0), Some("green"));
	assert_eq!(view.value(1), None);
	assert_eq!(view.value(2), Some("red"));
}

#[test]
fn test_column_lookup_by_name() {
	let dataframe = DataFrame::from_columns(vec![
		Column::Number(NumberColumn::with_data("x".to_owned(), vec![1.0, 2.0])),
		Column::Text(TextColumn::with_data(
			"city".to_owned(),
			vec!["a".to_owned(), "b".to_owned()],
		)),
	]);
	assert_eq!(dataframe.nrows(), 2);
	let view = dataframe.view();
	assert_eq!(view.column("city").map(|column| column.type_name()), Some("text"));
	assert!(view.column("missing").is_none());
}
