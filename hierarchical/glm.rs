use super::{Error, Family, GroupStats, GroupedOutcomes};

/// These are the options passed to [`fit_no_pooling`](fn.fit_no_pooling.html).
#[derive(Clone, Debug)]
pub struct NoPoolingOptions {
	/// This is added to both the event and non-event counts of a binomial group in which every observation has the same class, so its log-odds are finite. The default of 0.5 is the Haldane-Anscombe correction.
	pub pseudo_count: f64,
}

impl Default for NoPoolingOptions {
	fn default() -> Self {
		Self { pseudo_count: 0.5 }
	}
}

#[derive(Clone, Debug, PartialEq)]
pub struct NoPoolingFit {
	/// The estimate of the intercept only model: the log-odds or mean of all observations.
	pub intercept: f64,
	/// The estimate of each group on the scale of the linear predictor.
	pub estimates: Vec<f64>,
	/// Whether the pseudo count was applied to each group.
	pub corrected: Vec<bool>,
}

/**
Fit a generalized linear model with the group as its only predictor. For a binomial outcome this is logistic regression and for a gaussian outcome it is ordinary least squares. With a single categorical predictor the model is saturated, so the maximum likelihood estimate of each group is available in closed form: the empirical log-odds `ln(y / (n - y))` or the group mean. The intercept only model gives the fallback for groups not seen in training.

The computation is deterministic: fitting the same data twice gives bit for bit identical estimates.
*/
pub fn fit_no_pooling(
	data: &GroupedOutcomes,
	options: &NoPoolingOptions,
) -> Result<NoPoolingFit, Error> {
	if !(options.pseudo_count > 0.0 && options.pseudo_count.is_finite()) {
		return Err(Error::InvalidOptions(format!(
			"the pseudo count must be positive and finite, but it is {}",
			options.pseudo_count
		)));
	}
	let pooled = data.pooled();
	let (intercept, _) = group_estimate(data.family(), &pooled, options.pseudo_count);
	let (estimates, corrected) = data
		.groups()
		.iter()
		.map(|group| group_estimate(data.family(), group, options.pseudo_count))
		.unzip();
	Ok(NoPoolingFit {
		intercept,
		estimates,
		corrected,
	})
}

fn group_estimate(family: Family, group: &GroupStats, pseudo_count: f64) -> (f64, bool) {
	match family {
		Family::Binomial => {
			let events = group.sum;
			let non_events = group.n_f64() - group.sum;
			if events <= 0.0 || non_events <= 0.0 {
				let log_odds = ((events + pseudo_count) / (non_events + pseudo_count)).ln();
				(log_odds, true)
			} else {
				((events / non_events).ln(), false)
			}
		}
		Family::Gaussian => (group.mean(), false),
	}
}

#[test]
fn test_binomial_log_odds() {
	let grouped = GroupedOutcomes::from_observations(
		Family::Binomial,
		2,
		&[0, 0, 0, 0, 1, 1],
		&[1.0, 1.0, 1.0, 0.0, 1.0, 0.0],
	)
	.unwrap();
	let fit = fit_no_pooling(&grouped, &NoPoolingOptions::default()).unwrap();
	assert!((fit.estimates[0] - 3f64.ln()).abs() < 1e-12);
	assert!(fit.estimates[1].abs() < 1e-12);
	assert!((fit.intercept - 2f64.ln()).abs() < 1e-12);
	assert_eq!(fit.corrected, vec![false, false]);
}

#[test]
fn test_separated_group_is_finite() {
	let grouped = GroupedOutcomes::from_observations(
		Family::Binomial,
		2,
		&[0, 0, 0, 1, 1],
		&[1.0, 1.0, 1.0, 0.0, 1.0],
	)
	.unwrap();
	let fit = fit_no_pooling(&grouped, &NoPoolingOptions::default()).unwrap();
	// (3 + 0.5) / (0 + 0.5)
	assert!((fit.estimates[0] - 7f64.ln()).abs() < 1e-12);
	assert!(fit.estimates[0].is_finite());
	assert_eq!(fit.corrected, vec![true, false]);
}

#[test]
fn test_gaussian_means() {
	let grouped = GroupedOutcomes::from_observations(
		Family::Gaussian,
		2,
		&[0, 0, 1],
		&[1.0, 3.0, 8.0],
	)
	.unwrap();
	let fit = fit_no_pooling(&grouped, &NoPoolingOptions::default()).unwrap();
	assert_eq!(fit.estimates, vec![2.0, 8.0]);
	assert_eq!(fit.intercept, 4.0);
}

#[test]
fn test_invalid_pseudo_count() {
	let grouped =
		GroupedOutcomes::from_observations(Family::Binomial, 1, &[0], &[1.0]).unwrap();
	let options = NoPoolingOptions { pseudo_count: 0.0 };
	assert!(matches!(
		fit_no_pooling(&grouped, &options),
		Err(Error::InvalidOptions(_))
	));
}
