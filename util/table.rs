/**
A `Table` renders a header and rows of strings as a plain text table with `|` separated, left aligned columns.

```
use embed_util::Table;

let header = vec!["level".to_owned(), "value".to_owned()];
let rows = vec![vec!["a".to_owned(), "0.5".to_owned()]];
let table = Table::new(&header, &rows);
assert_eq!(
	table.to_string(),
	"| level | value |\n|-------|-------|\n| a     | 0.5   |\n",
);
```
*/
pub struct Table<'a> {
	padding: usize,
	header: &'a [String],
	rows: &'a [Vec<String>],
}

impl<'a> Table<'a> {
	pub fn new(header: &'a [String], rows: &'a [Vec<String>]) -> Self {
		Self {
			padding: 1,
			header,
			rows,
		}
	}

	pub fn with_padding(mut self, padding: usize) -> Self {
		self.padding = padding;
		self
	}
}

impl<'a> std::fmt::Display for Table<'a> {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		// update column widths with header
		let mut column_widths: Vec<usize> = self
			.header
			.iter()
			.map(|header| header.chars().count())
			.collect();
		// update column widths with values
		for row in self.rows.iter() {
			for (column_width, value) in column_widths.iter_mut().zip(row.iter()) {
				*column_width = usize::max(*column_width, value.chars().count());
			}
		}
		// write header
		let line = Line {
			column_widths: &column_widths,
			padding: self.padding,
		};
		let row = Row {
			column_widths: &column_widths,
			padding: self.padding,
			values: self.header,
		};
		writeln!(f, "{}", row)?;
		writeln!(f, "{}", line)?;
		// write values
		for values in self.rows.iter() {
			let row = Row {
				column_widths: &column_widths,
				padding: self.padding,
				values,
			};
			writeln!(f, "{}", row)?;
		}
		Ok(())
	}
}

struct Line<'a> {
	column_widths: &'a [usize],
	padding: usize,
}

impl<'a> std::fmt::Display for Line<'a> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "|")?;
		for column_width in self.column_widths.iter() {
			for _ in 0..column_width + 2 * self.padding {
				write!(f, "-")?;
			}
			write!(f, "|")?;
		}
		Ok(())
	}
}

struct Row<'a> {
	column_widths: &'a [usize],
	padding: usize,
	values: &'a [String],
}

impl<'a> std::fmt::Display for Row<'a> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "|")?;
		for (column_width, value) in self.column_widths.iter().zip(self.values) {
			for _ in 0..self.padding {
				write!(f, " ")?;
			}
			write!(f, "{}", value)?;
			for _ in 0..column_width + self.padding - value.chars().count() {
				write!(f, " ")?;
			}
			write!(f, "|")?;
		}
		Ok(())
	}
}

#[test]
fn test_table_pads_to_widest_value() {
	let header = vec!["epoch".to_owned(), "split".to_owned()];
	let rows = vec![
		vec!["1".to_owned(), "training".to_owned()],
		vec!["10".to_owned(), "validation".to_owned()],
	];
	let table = Table::new(&header, &rows).with_padding(0);
	insta::assert_snapshot!(table.to_string(), @r###"
 |epoch|split     |
 |-----|----------|
 |1    |training  |
 |10   |validation|
 "###);
}
