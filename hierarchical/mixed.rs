use super::{logistic, Error, Family, GroupedOutcomes};

/// These are the options passed to [`fit_mixed`](fn.fit_mixed.html).
#[derive(Clone, Debug)]
pub struct MixedOptions {
	/// This is the maximum number of golden section iterations used to estimate the variance of the random intercepts.
	pub max_iterations: usize,
	/// The search stops when the bracket around the log variance parameter is narrower than this.
	pub tolerance: f64,
	/// This is the maximum number of Newton iterations used to find the mode of the intercept and random effects for one value of the variance parameter. It only applies to the binomial family.
	pub max_newton_iterations: usize,
	/// If true, a gaussian model maximizes the restricted likelihood (REML) instead of the likelihood.
	pub reml: bool,
}

impl Default for MixedOptions {
	fn default() -> Self {
		Self {
			max_iterations: 100,
			tolerance: 1e-6,
			max_newton_iterations: 50,
			reml: true,
		}
	}
}

#[derive(Clone, Debug, PartialEq)]
pub struct MixedFit {
	pub intercept: f64,
	/// The predicted random intercept `u_j` of each group.
	pub effects: Vec<f64>,
	/// The conditional variance of each random intercept.
	pub effect_variances: Vec<f64>,
	/// This is `tau^2`, the variance of the random intercepts.
	pub group_variance: f64,
	/// This is the variance of an observation around its group mean. It is `None` for the binomial family.
	pub residual_variance: Option<f64>,
	/// The maximized objective: the profiled (restricted) log likelihood, or its Laplace approximation.
	pub objective: f64,
	pub iterations: usize,
	/// True when the variance of the random intercepts was estimated at the lower end of its search range, so every group is pooled completely to the intercept.
	pub singular: bool,
}

impl MixedFit {
	/// The estimate of each group, `intercept + u_j`.
	pub fn group_estimates(&self) -> Vec<f64> {
		self.effects
			.iter()
			.map(|effect| self.intercept + effect)
			.collect()
	}
}

/**
Fit the random intercept model by empirical Bayes. The variance of the random intercepts is chosen by maximizing a profiled objective with golden section search over a log scale parameter, and the random intercepts are then predicted conditional on it.

- For a gaussian outcome the objective is the exact profiled (restricted) log likelihood in `lambda = tau^2 / sigma^2`. Given lambda, the intercept is its generalized least squares estimate and the random intercepts are the BLUPs `n_j lambda / (1 + n_j lambda) (mean_j - intercept)`.
- For a binomial outcome the objective is the Laplace approximation to the marginal likelihood in `tau`. Given tau, the intercept and random intercepts are the joint mode of the penalized log likelihood, found with damped Newton iterations.
*/
pub fn fit_mixed(data: &GroupedOutcomes, options: &MixedOptions) -> Result<MixedFit, Error> {
	if data.n_groups() < 2 {
		return Err(Error::TooFewGroups {
			required: 2,
			found: data.n_groups(),
		});
	}
	if options.max_iterations == 0
		|| options.max_newton_iterations == 0
		|| !(options.tolerance > 0.0)
	{
		return Err(Error::InvalidOptions(
			"the iteration budgets and tolerance must be positive".to_owned(),
		));
	}
	match data.family() {
		Family::Gaussian => fit_gaussian(data, options),
		Family::Binomial => fit_binomial(data, options),
	}
}

/// The search range of `ln(lambda)` for the gaussian family.
const GAUSSIAN_LOG_LAMBDA_RANGE: (f64, f64) = (-18.420_680_743_952_367, 18.420_680_743_952_367);
/// The search range of `ln(tau)` for the binomial family.
const BINOMIAL_LOG_TAU_RANGE: (f64, f64) = (-9.210_340_371_976_182, 4.605_170_185_988_092);

struct GoldenSection {
	argmax: f64,
	value: f64,
	iterations: usize,
	converged: bool,
}

/// Maximize a unimodal function on `[lower, upper]` with golden section search. The lower bound itself is also evaluated so that a maximum on the boundary is found exactly.
fn golden_section_maximize(
	mut f: impl FnMut(f64) -> Result<f64, Error>,
	lower: f64,
	upper: f64,
	tolerance: f64,
	max_iterations: usize,
) -> Result<GoldenSection, Error> {
	let inverse_phi = (5f64.sqrt() - 1.0) / 2.0;
	let (mut a, mut b) = (lower, upper);
	let mut c = b - inverse_phi * (b - a);
	let mut d = a + inverse_phi * (b - a);
	let mut f_c = f(c)?;
	let mut f_d = f(d)?;
	let mut iterations = 0;
	while (b - a) > tolerance && iterations < max_iterations {
		iterations += 1;
		if f_c > f_d {
			b = d;
			d = c;
			f_d = f_c;
			c = b - inverse_phi * (b - a);
			f_c = f(c)?;
		} else {
			a = c;
			c = d;
			f_c = f_d;
			d = a + inverse_phi * (b - a);
			f_d = f(d)?;
		}
	}
	let converged = (b - a) <= tolerance;
	let (mut argmax, mut value) = if f_c > f_d { (c, f_c) } else { (d, f_d) };
	let f_lower = f(lower)?;
	if f_lower >= value {
		argmax = lower;
		value = f_lower;
	}
	Ok(GoldenSection {
		argmax,
		value,
		iterations,
		converged,
	})
}

fn is_singular(argmax: f64, lower: f64) -> bool {
	argmax - lower < 1e-3
}

struct GaussianProfile {
	intercept: f64,
	residual_variance: f64,
	objective: f64,
}

fn gaussian_profile(data: &GroupedOutcomes, log_lambda: f64, reml: bool) -> GaussianProfile {
	let lambda = log_lambda.exp();
	let groups = data.groups();
	let n_total = data.pooled().n_f64();
	let weights: Vec<f64> = groups
		.iter()
		.map(|group| group.n_f64() / (1.0 + group.n_f64() * lambda))
		.collect();
	let weight_sum: f64 = weights.iter().sum();
	let intercept = groups
		.iter()
		.zip(weights.iter())
		.map(|(group, weight)| weight * group.mean())
		.sum::<f64>()
		/ weight_sum;
	let quadratic_form: f64 = groups
		.iter()
		.zip(weights.iter())
		.map(|(group, weight)| {
			let deviation = group.mean() - intercept;
			group.within_sum_of_squares() + weight * deviation * deviation
		})
		.sum();
	let log_determinant: f64 = groups
		.iter()
		.map(|group| (1.0 + group.n_f64() * lambda).ln())
		.sum();
	let degrees_of_freedom = if reml { n_total - 1.0 } else { n_total };
	let residual_variance = (quadratic_form / degrees_of_freedom).max(std::f64::MIN_POSITIVE);
	let mut objective = -0.5
		* (degrees_of_freedom * (2.0 * std::f64::consts::PI * residual_variance).ln()
			+ degrees_of_freedom
			+ log_determinant);
	if reml {
		objective -= 0.5 * weight_sum.ln();
	}
	GaussianProfile {
		intercept,
		residual_variance,
		objective,
	}
}

fn fit_gaussian(data: &GroupedOutcomes, options: &MixedOptions) -> Result<MixedFit, Error> {
	let reml = options.reml && data.pooled().n > 1;
	let (lower, upper) = GAUSSIAN_LOG_LAMBDA_RANGE;
	let search = golden_section_maximize(
		|log_lambda| Ok(gaussian_profile(data, log_lambda, reml).objective),
		lower,
		upper,
		options.tolerance,
		options.max_iterations,
	)?;
	let lambda = search.argmax.exp();
	let profile = gaussian_profile(data, search.argmax, reml);
	let (effects, effect_variances) = data
		.groups()
		.iter()
		.map(|group| {
			let n = group.n_f64();
			let shrinkage = n * lambda / (1.0 + n * lambda);
			let effect = shrinkage * (group.mean() - profile.intercept);
			let variance = lambda * profile.residual_variance / (1.0 + n * lambda);
			(effect, variance)
		})
		.unzip();
	let fit = MixedFit {
		intercept: profile.intercept,
		effects,
		effect_variances,
		group_variance: lambda * profile.residual_variance,
		residual_variance: Some(profile.residual_variance),
		objective: profile.objective,
		iterations: search.iterations,
		singular: is_singular(search.argmax, lower),
	};
	finish(fit, search.converged)
}

struct BinomialMode {
	intercept: f64,
	effects: Vec<f64>,
	/// The negative second derivative of the penalized log likelihood with respect to each random intercept at the mode.
	curvatures: Vec<f64>,
	converged: bool,
}

fn penalized_log_likelihood(
	data: &GroupedOutcomes,
	intercept: f64,
	effects: &[f64],
	tau_squared: f64,
) -> f64 {
	effects
		.iter()
		.enumerate()
		.map(|(index, effect)| {
			data.log_likelihood(index, intercept + effect, 1.0) - effect * effect / (2.0 * tau_squared)
		})
		.sum()
}

/// Find the joint mode of the intercept and random intercepts for a fixed `tau^2` with Newton's method. The Hessian has an arrow structure, one dense row and column for the intercept plus a diagonal, so each step is solved in linear time with the Schur complement. Steps are halved until the objective does not decrease.
fn binomial_mode(
	data: &GroupedOutcomes,
	tau_squared: f64,
	start_intercept: f64,
	max_newton_iterations: usize,
) -> BinomialMode {
	let groups = data.groups();
	let n_groups = groups.len();
	let mut intercept = start_intercept;
	let mut effects = vec![0.0; n_groups];
	let mut objective = penalized_log_likelihood(data, intercept, &effects, tau_squared);
	let mut converged = false;
	let mut gradient = vec![0.0; n_groups];
	let mut diagonal = vec![0.0; n_groups];
	let mut coupling = vec![0.0; n_groups];
	for _ in 0..max_newton_iterations {
		let mut intercept_gradient = 0.0;
		let mut intercept_hessian = 0.0;
		for (index, group) in groups.iter().enumerate() {
			let n = group.n_f64();
			let probability = logistic(intercept + effects[index]);
			let first = group.sum - n * probability;
			let second = -n * probability * (1.0 - probability);
			intercept_gradient += first;
			intercept_hessian += second;
			gradient[index] = first - effects[index] / tau_squared;
			coupling[index] = second;
			diagonal[index] = second - 1.0 / tau_squared;
		}
		let schur = intercept_hessian
			- coupling
				.iter()
				.zip(diagonal.iter())
				.map(|(b, d)| b * b / d)
				.sum::<f64>();
		let rhs = -intercept_gradient
			+ coupling
				.iter()
				.zip(diagonal.iter())
				.zip(gradient.iter())
				.map(|((b, d), g)| b * g / d)
				.sum::<f64>();
		let intercept_step = if schur < 0.0 { rhs / schur } else { 0.0 };
		let effect_steps: Vec<f64> = gradient
			.iter()
			.zip(coupling.iter())
			.zip(diagonal.iter())
			.map(|((g, b), d)| (-g - b * intercept_step) / d)
			.collect();
		let mut scale = 1.0;
		let mut accepted = false;
		for _ in 0..30 {
			let candidate_intercept = intercept + scale * intercept_step;
			let candidate_effects: Vec<f64> = effects
				.iter()
				.zip(effect_steps.iter())
				.map(|(effect, step)| effect + scale * step)
				.collect();
			let candidate_objective =
				penalized_log_likelihood(data, candidate_intercept, &candidate_effects, tau_squared);
			if candidate_objective >= objective - 1e-12 * objective.abs().max(1.0) {
				intercept = candidate_intercept;
				effects = candidate_effects;
				let improvement = candidate_objective - objective;
				objective = candidate_objective;
				accepted = true;
				let max_step = effect_steps
					.iter()
					.fold(intercept_step.abs(), |max, step| max.max(step.abs()))
					* scale;
				if max_step < 1e-8 || improvement.abs() < 1e-12 {
					converged = true;
				}
				break;
			}
			scale *= 0.5;
		}
		if !accepted || converged {
			converged = converged || (!accepted && gradient_is_small(&gradient, intercept_gradient));
			break;
		}
	}
	let curvatures = groups
		.iter()
		.zip(effects.iter())
		.map(|(group, effect)| {
			let probability = logistic(intercept + effect);
			group.n_f64() * probability * (1.0 - probability) + 1.0 / tau_squared
		})
		.collect();
	BinomialMode {
		intercept,
		effects,
		curvatures,
		converged,
	}
}

fn gradient_is_small(gradient: &[f64], intercept_gradient: f64) -> bool {
	gradient
		.iter()
		.fold(intercept_gradient.abs(), |max, value| max.max(value.abs()))
		< 1e-6
}

/// The Laplace approximation to the marginal log likelihood at the mode, with the intercept profiled out.
fn laplace_objective(data: &GroupedOutcomes, mode: &BinomialMode, tau_squared: f64) -> f64 {
	mode.effects
		.iter()
		.zip(mode.curvatures.iter())
		.enumerate()
		.map(|(index, (effect, curvature))| {
			data.log_likelihood(index, mode.intercept + effect, 1.0)
				- effect * effect / (2.0 * tau_squared)
				- 0.5 * (tau_squared * curvature).ln()
		})
		.sum()
}

fn fit_binomial(data: &GroupedOutcomes, options: &MixedOptions) -> Result<MixedFit, Error> {
	let pooled = data.pooled();
	if pooled.sum <= 0.0 || pooled.sum >= pooled.n_f64() {
		return Err(Error::SingleClass);
	}
	let start_intercept = (pooled.sum / (pooled.n_f64() - pooled.sum)).ln();
	let mut newton_failed = false;
	let (lower, upper) = BINOMIAL_LOG_TAU_RANGE;
	let search = golden_section_maximize(
		|log_tau| {
			let tau_squared = (2.0 * log_tau).exp();
			let mode = binomial_mode(data, tau_squared, start_intercept, options.max_newton_iterations);
			if !mode.converged {
				newton_failed = true;
			}
			Ok(laplace_objective(data, &mode, tau_squared))
		},
		lower,
		upper,
		options.tolerance,
		options.max_iterations,
	)?;
	let tau_squared = (2.0 * search.argmax).exp();
	let mode = binomial_mode(data, tau_squared, start_intercept, options.max_newton_iterations);
	let objective = laplace_objective(data, &mode, tau_squared);
	let converged = search.converged && mode.converged && !newton_failed;
	let fit = MixedFit {
		intercept: mode.intercept,
		effect_variances: mode.curvatures.iter().map(|curvature| 1.0 / curvature).collect(),
		effects: mode.effects,
		group_variance: tau_squared,
		residual_variance: None,
		objective,
		iterations: search.iterations,
		singular: is_singular(search.argmax, lower),
	};
	finish(fit, converged)
}

fn finish(fit: MixedFit, converged: bool) -> Result<MixedFit, Error> {
	if !converged {
		return Err(Error::NonConvergence {
			iterations: fit.iterations,
			fit: Box::new(fit),
		});
	}
	if fit.singular {
		log::info!(
			"the random intercept variance is at the boundary of its range, so every group is pooled to the intercept"
		);
	}
	log::debug!(
		"mixed model converged after {} iterations with group variance {}",
		fit.iterations,
		fit.group_variance,
	);
	Ok(fit)
}

#[cfg(test)]
fn binomial_groups(groups: &[(u64, u64)]) -> GroupedOutcomes {
	use super::GroupStats;
	let groups = groups
		.iter()
		.map(|(n, events)| GroupStats {
			n: *n,
			sum: *events as f64,
			sum_of_squares: *events as f64,
		})
		.collect();
	GroupedOutcomes::new(Family::Binomial, groups).unwrap()
}

#[test]
fn test_gaussian_shrinkage_is_stronger_for_smaller_groups() {
	// Groups 0 and 1 have the same mean but different sizes.
	let mut group_ids = Vec::new();
	let mut outcomes = Vec::new();
	let mut push = |group: usize, values: &[f64]| {
		for value in values {
			group_ids.push(group);
			outcomes.push(*value);
		}
	};
	push(0, &[5.0, 7.0]);
	push(1, &[5.0, 7.0, 5.0, 7.0, 5.0, 7.0, 5.0, 7.0, 5.0, 7.0]);
	push(2, &[0.0, 1.0, -1.0, 0.5, -0.5]);
	push(3, &[2.0, 3.0, 1.0, 2.5]);
	push(4, &[-3.0, -2.0, -4.0]);
	let grouped = GroupedOutcomes::from_observations(Family::Gaussian, 5, &group_ids, &outcomes).unwrap();
	let fit = fit_mixed(&grouped, &MixedOptions::default()).unwrap();
	assert!(!fit.singular);
	let estimates = fit.group_estimates();
	let distance_small = (estimates[0] - fit.intercept).abs();
	let distance_large = (estimates[1] - fit.intercept).abs();
	assert!(distance_small < distance_large);
	// Both are pulled from the raw mean of 6 toward the intercept.
	assert!(estimates[0] < 6.0 && estimates[1] < 6.0);
}

#[test]
fn test_gaussian_identical_groups_are_pooled() {
	let grouped = GroupedOutcomes::from_observations(
		Family::Gaussian,
		3,
		&[0, 0, 1, 1, 2, 2],
		&[1.0, 3.0, 1.0, 3.0, 1.0, 3.0],
	)
	.unwrap();
	let fit = fit_mixed(&grouped, &MixedOptions::default()).unwrap();
	assert!(fit.singular);
	assert!((fit.intercept - 2.0).abs() < 1e-9);
	for effect in fit.effects.iter() {
		assert!(effect.abs() < 1e-6);
	}
}

#[test]
fn test_binomial_shrinkage_is_stronger_for_smaller_groups() {
	// Groups 0 and 1 both have an event rate of 0.8.
	let grouped = binomial_groups(&[(5, 4), (50, 40), (40, 10), (30, 15), (60, 12), (20, 14)]);
	let fit = fit_mixed(&grouped, &MixedOptions::default()).unwrap();
	let estimates = fit.group_estimates();
	let raw = 4f64.ln();
	assert!((estimates[0] - fit.intercept).abs() < (estimates[1] - fit.intercept).abs());
	assert!(estimates[0] < raw && estimates[1] < raw);
	assert!(fit.group_variance > 0.0);
}

#[test]
fn test_binomial_separated_group_is_finite() {
	let grouped = binomial_groups(&[(100, 80), (3, 3), (40, 20), (25, 5)]);
	let fit = fit_mixed(&grouped, &MixedOptions::default()).unwrap();
	let estimates = fit.group_estimates();
	assert!(estimates.iter().all(|estimate| estimate.is_finite()));
	// The group with three events is pulled well below its corrected raw log-odds of ln(7).
	assert!(estimates[1] < 7f64.ln());
}

#[test]
fn test_single_class_binomial_is_rejected() {
	let grouped = binomial_groups(&[(4, 4), (3, 3)]);
	assert!(matches!(
		fit_mixed(&grouped, &MixedOptions::default()),
		Err(Error::SingleClass)
	));
}

#[test]
fn test_small_iteration_budget_does_not_converge() {
	let grouped = binomial_groups(&[(10, 3), (10, 7), (10, 5)]);
	let options = MixedOptions {
		max_iterations: 2,
		..Default::default()
	};
	match fit_mixed(&grouped, &options) {
		Err(Error::NonConvergence { iterations, fit }) => {
			assert_eq!(iterations, 2);
			assert_eq!(fit.effects.len(), 3);
		}
		_ => panic!("expected the solver not to converge"),
	}
}
