//! This module contains the main entrypoint to the embed cli.

use anyhow::{format_err, Context, Result};
use clap::Clap;
use colored::Colorize;
use embed_dataframe::{Column, DataFrame, FromCsvOptions};
use embed_encoders::{config::Config, EncodingTable, FitRequest, Fitted, Progress};
use embed_util::CancellationToken;
use std::path::{Path, PathBuf};

#[derive(Clap)]
#[clap(
	about = "Encode categorical columns with likelihood encodings and entity embeddings.",
	setting = clap::AppSettings::DisableHelpSubcommand,
)]
enum Options {
	#[clap(name = "fit")]
	Fit(Box<FitOptions>),
	#[clap(name = "apply")]
	Apply(Box<ApplyOptions>),
}

#[derive(Clap, Debug)]
#[clap(about = "fit an encoding table")]
#[clap(long_about = "fit an encoding table for a categorical column of a csv file")]
struct FitOptions {
	#[clap(short, long, about = "the path to your .csv file")]
	file: PathBuf,
	#[clap(long, about = "the name of the categorical column to encode")]
	column: String,
	#[clap(short = 't', long, about = "the name of the outcome column")]
	outcome: String,
	#[clap(
		short,
		long,
		about = "the name of a numeric predictor column, used only by the embedding encoder"
	)]
	predictor: Vec<String>,
	#[clap(short, long, about = "the path to a config file")]
	config: Option<PathBuf>,
	#[clap(short, long, about = "the path to write the .json encoding table to")]
	output: Option<PathBuf>,
	#[clap(
		long,
		about = "the path to write the training history or the sampler diagnostics to, as csv"
	)]
	report: Option<PathBuf>,
	#[clap(
		long,
		about = "write the table even if the fit did not converge",
		takes_value = false
	)]
	accept_unconverged: bool,
}

#[derive(Clap, Debug)]
#[clap(about = "apply an encoding table")]
#[clap(long_about = "append the encoded columns to a csv file")]
struct ApplyOptions {
	#[clap(long, about = "the path to the .json encoding table")]
	table: PathBuf,
	#[clap(short, long, about = "the path to your .csv file")]
	file: PathBuf,
	#[clap(
		long,
		about = "the name of the column to encode, if it differs from the column the table was fit on"
	)]
	column: Option<String>,
	#[clap(
		short,
		long,
		about = "the path to write the .csv file to, or stdout if omitted"
	)]
	output: Option<PathBuf>,
}

fn main() {
	let env = env_logger::Env::default().default_filter_or("embed=info");
	env_logger::Builder::from_env(env)
		.format_level(false)
		.format_module_path(false)
		.format_timestamp(None)
		.init();
	let options = Options::parse();
	let result = match options {
		Options::Fit(options) => cli_fit(*options),
		Options::Apply(options) => cli_apply(*options),
	};
	if let Err(error) = result {
		eprintln!("{}: {}", "error".red().bold(), error);
		std::process::exit(1);
	}
}

fn cli_fit(options: FitOptions) -> Result<()> {
	// Keep the categorical column as text so numeric looking levels are not read as numbers.
	let config = load_config(options.config.as_deref())?.with_text_column(&options.column);
	let dataframe = load_dataframe(&options.file, &config)?;
	let request = FitRequest {
		categorical_column: options.column.clone(),
		outcome_column: options.outcome.clone(),
		predictor_columns: options.predictor.clone(),
		options: config.encoder_options(),
	};
	let result = embed_encoders::fit(
		&dataframe.view(),
		&request,
		&mut update_progress,
		&CancellationToken::new(),
	);
	let fitted = match result {
		Ok(fitted) => fitted,
		Err(embed_encoders::Error::Convergence(error)) if options.accept_unconverged => {
			log::warn!("{}", error);
			eprintln!("{}", embed_encoders::diagnostics_report(&error.diagnostics));
			Fitted {
				table: error.table,
				diagnostics: Some(error.diagnostics),
				history: None,
			}
		}
		Err(embed_encoders::Error::NonConvergence(error)) if options.accept_unconverged => {
			log::warn!("{}", error);
			Fitted {
				table: error.into_table(),
				diagnostics: None,
				history: None,
			}
		}
		Err(error) => {
			if let Some(diagnostics) = error.diagnostics() {
				eprintln!("{}", embed_encoders::diagnostics_report(diagnostics));
			}
			return Err(error.into());
		}
	};

	// Write the table to the output path.
	let output_path = match options.output {
		Some(output_path) => output_path,
		None => default_output_path(&options.column),
	};
	let table_json = serde_json::to_string_pretty(&fitted.table)?;
	std::fs::write(&output_path, table_json)
		.with_context(|| format!("failed to write {}", output_path.display()))?;
	eprintln!("{}", fitted.table.tidy());
	eprintln!("Your encoding table was written to {}.", output_path.display());

	if let Some(report_path) = options.report {
		let report = if let Some(history) = fitted.history.as_ref() {
			embed_encoders::history_report(history)
		} else if let Some(diagnostics) = fitted.diagnostics.as_ref() {
			embed_encoders::diagnostics_report(diagnostics)
		} else {
			return Err(format_err!(
				"the {} encoder has no training history or sampler diagnostics to report",
				fitted.table.source().id()
			));
		};
		let mut writer = csv::Writer::from_path(&report_path)
			.with_context(|| format!("failed to write {}", report_path.display()))?;
		writer.write_record(&report.columns)?;
		for row in report.rows.iter() {
			writer.write_record(row)?;
		}
		writer.flush()?;
	}

	Ok(())
}

fn cli_apply(options: ApplyOptions) -> Result<()> {
	let table_json = std::fs::read_to_string(&options.table)
		.with_context(|| format!("failed to read encoding table {}", options.table.display()))?;
	let table: EncodingTable = serde_json::from_str(&table_json)
		.with_context(|| format!("failed to parse encoding table {}", options.table.display()))?;
	let column_name = options
		.column
		.clone()
		.unwrap_or_else(|| table.column_name().to_owned());
	// Keep the categorical column as text so numeric looking levels still match the table.
	let config = Config::default().with_text_column(&column_name);
	let mut dataframe = load_dataframe(&options.file, &config)?;
	let applied = table.apply(&dataframe.view(), &column_name)?;
	dataframe
		.columns
		.extend(applied.columns.into_iter().map(Column::Number));
	match options.output {
		Some(output_path) => {
			let mut writer = csv::Writer::from_path(&output_path)
				.with_context(|| format!("failed to write {}", output_path.display()))?;
			dataframe.to_csv(&mut writer)?;
			writer.flush()?;
		}
		None => {
			let mut writer = csv::Writer::from_writer(std::io::stdout());
			dataframe.to_csv(&mut writer)?;
			writer.flush()?;
		}
	}
	Ok(())
}

fn default_output_path(column_name: &str) -> PathBuf {
	PathBuf::from(format!("{}.encoding.json", column_name))
}

fn load_config(config_path: Option<&Path>) -> Result<Config> {
	if let Some(config_path) = config_path {
		let config = std::fs::read_to_string(config_path)
			.with_context(|| format!("failed to read config file {}", config_path.display()))?;
		let config = serde_yaml::from_str(&config)
			.with_context(|| format!("failed to parse config file {}", config_path.display()))?;
		Ok(config)
	} else {
		Ok(Config::default())
	}
}

fn load_dataframe(file_path: &Path, config: &Config) -> Result<DataFrame> {
	let options = FromCsvOptions {
		column_types: config.dataframe_column_types(),
		..Default::default()
	};
	let dataframe = DataFrame::from_path(file_path, options, |_| {})
		.with_context(|| format!("failed to load {}", file_path.display()))?;
	log::info!(
		"loaded {} rows and {} columns from {}",
		dataframe.nrows(),
		dataframe.ncols(),
		file_path.display()
	);
	Ok(dataframe)
}

fn update_progress(progress: Progress) {
	match progress {
		Progress::Sampling(counter) => {
			log::info!("sampling {} iterations", counter.total());
		}
		Progress::Training(progress) => {
			let counter = progress.0;
			if counter.get() == 0 {
				log::info!("training for at most {} epochs", counter.total());
			}
		}
	}
}

#[test]
fn test_default_output_path() {
	assert_eq!(default_output_path("store"), PathBuf::from("store.encoding.json"));
}
