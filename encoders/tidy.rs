use embed_hierarchical::Diagnostics;
use embed_network::TrainingHistory;
use embed_util::Table;

/// A report in tidy form: named columns and one row of formatted values per observation. It displays as a plain text table.
#[derive(Clone, Debug, PartialEq)]
pub struct TidyReport {
	pub columns: Vec<String>,
	pub rows: Vec<Vec<String>>,
}

impl std::fmt::Display for TidyReport {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", Table::new(&self.columns, &self.rows))
	}
}

/// One row per epoch and split, with columns `epoch`, `loss` and `split`.
pub fn history_report(history: &TrainingHistory) -> TidyReport {
	TidyReport {
		columns: vec!["epoch".to_owned(), "loss".to_owned(), "split".to_owned()],
		rows: history
			.entries
			.iter()
			.map(|entry| {
				vec![
					entry.epoch.to_string(),
					entry.loss.to_string(),
					entry.split.to_string(),
				]
			})
			.collect(),
	}
}

/// One row per sampled parameter, with its split rhat, effective sample size and whether it decides convergence.
pub fn diagnostics_report(diagnostics: &Diagnostics) -> TidyReport {
	TidyReport {
		columns: vec![
			"parameter".to_owned(),
			"rhat".to_owned(),
			"ess".to_owned(),
			"gated".to_owned(),
		],
		rows: diagnostics
			.parameters
			.iter()
			.map(|parameter| {
				vec![
					parameter.name.clone(),
					format!("{:.3}", parameter.rhat),
					format!("{:.0}", parameter.effective_sample_size),
					parameter.gated.to_string(),
				]
			})
			.collect(),
	}
}

#[test]
fn test_history_report() {
	use embed_network::{HistoryEntry, Split};
	let history = TrainingHistory {
		entries: vec![
			HistoryEntry {
				epoch: 1,
				loss: 0.5,
				split: Split::Training,
			},
			HistoryEntry {
				epoch: 1,
				loss: 0.75,
				split: Split::Validation,
			},
		],
	};
	insta::assert_snapshot!(history_report(&history).to_string(), @r###"
 | epoch | loss | split      |
 |-------|------|------------|
 | 1     | 0.5  | training   |
 | 1     | 0.75 | validation |
 "###);
}
