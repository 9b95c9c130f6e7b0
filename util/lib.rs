/*!
This crate contains small utilities shared by the other crates in this workspace: a thread safe [`ProgressCounter`](progress_counter/struct.ProgressCounter.html), a [`CancellationToken`](cancellation/struct.CancellationToken.html) that long running fits poll, and a plain text [`Table`](table/struct.Table.html) used to print reports.
*/

#![allow(clippy::tabs_in_doc_comments)]

pub mod cancellation;
pub mod progress_counter;
pub mod table;

pub use self::cancellation::CancellationToken;
pub use self::progress_counter::ProgressCounter;
pub use self::table::Table;
