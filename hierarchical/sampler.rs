use super::{
	diagnostics::{Diagnostics, ParameterDiagnostics},
	fit_no_pooling, Error, Family, GroupedOutcomes, NoPoolingOptions,
};
use embed_util::{CancellationToken, ProgressCounter};
use ndarray::prelude::*;
use num_traits::ToPrimitive;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Gamma, StandardNormal};
use rand_xoshiro::Xoshiro256Plus;
use rayon::prelude::*;

/// These are the options passed to [`PosteriorSampler::sample`](trait.PosteriorSampler.html#tymethod.sample).
#[derive(Clone, Debug)]
pub struct SamplerOptions {
	/// The number of independent chains. Chains run in parallel.
	pub chains: usize,
	/// The number of iterations of each chain, including warmup.
	pub iterations: usize,
	/// The fraction of each chain's iterations used to adapt step sizes. Warmup draws are discarded.
	pub warmup_fraction: f64,
	/// Chain `c` is seeded with `seed + c`.
	pub seed: u64,
	/// The largest split R-hat of the intercept or any group effect for which the chains are considered converged.
	pub max_rhat: f64,
	/// The smallest effective sample size of the intercept or any group effect for which the chains are considered converged.
	pub min_effective_sample_size: f64,
	/// The standard deviation of the normal prior on the intercept, in units of the outcome's scale. The prior is centered on the pooled log-odds for a binomial outcome and on the pooled mean for a gaussian outcome.
	pub intercept_prior_scale: f64,
	/// The rate of the exponential prior on `tau`, in units of the inverse of the outcome's scale. The default of 5 puts the prior mean of `tau` at a fifth of the scale, so a level with few rows and an extreme rate is pulled toward the intercept even when there are only a handful of levels to estimate `tau` from.
	pub tau_prior_rate: f64,
}

impl Default for SamplerOptions {
	fn default() -> Self {
		Self {
			chains: 4,
			iterations: 2000,
			warmup_fraction: 0.5,
			seed: 42,
			max_rhat: 1.1,
			min_effective_sample_size: 100.0,
			intercept_prior_scale: 5.0,
			tau_prior_rate: 5.0,
		}
	}
}

impl SamplerOptions {
	pub fn n_warmup(&self) -> usize {
		(self.iterations.to_f64().unwrap() * self.warmup_fraction)
			.floor()
			.to_usize()
			.unwrap_or(0)
	}

	pub fn n_kept(&self) -> usize {
		self.iterations - self.n_warmup().min(self.iterations)
	}

	fn validate(&self) -> Result<(), Error> {
		if self.chains == 0 {
			return Err(Error::InvalidOptions(
				"at least one chain is required".to_owned(),
			));
		}
		if !(self.warmup_fraction >= 0.0 && self.warmup_fraction < 1.0) {
			return Err(Error::InvalidOptions(format!(
				"the warmup fraction must be in [0, 1), but it is {}",
				self.warmup_fraction
			)));
		}
		if self.n_kept() < 4 {
			return Err(Error::InvalidOptions(format!(
				"at least 4 draws must be kept per chain, but {} iterations with a warmup fraction of {} keep {}",
				self.iterations,
				self.warmup_fraction,
				self.n_kept()
			)));
		}
		if !(self.intercept_prior_scale > 0.0) || !(self.tau_prior_rate > 0.0) {
			return Err(Error::InvalidOptions(
				"the prior scale and rate must be positive".to_owned(),
			));
		}
		Ok(())
	}
}

/// A `PosteriorSampler` draws from the posterior of the random intercept model.
pub trait PosteriorSampler {
	fn sample(
		&self,
		data: &GroupedOutcomes,
		options: &SamplerOptions,
		progress_counter: &ProgressCounter,
		cancellation_token: &CancellationToken,
	) -> Result<Posterior, Error>;
}

/**
A Metropolis within Gibbs sampler. Each iteration updates, in order,

1. for a gaussian outcome, the residual variance from its inverse gamma full conditional,
2. each random intercept `u_j`, exactly for a gaussian outcome and with an adaptive random walk Metropolis step for a binomial outcome,
3. the intercept, in the same way,
4. the intercept and all random intercepts jointly by an exact draw of a common shift `delta`, `intercept + delta` and `u_j - delta`, which leaves every linear predictor unchanged and removes the strong posterior correlation between the intercept and the mean of the random intercepts,
5. `log(tau)` with an adaptive random walk Metropolis step.

Step sizes adapt toward an acceptance rate of 0.44 during warmup only, so the kept draws come from a fixed Markov kernel.
*/
#[derive(Clone, Debug, Default)]
pub struct GibbsSampler;

/// The kept draws of one chain.
#[derive(Clone, Debug)]
pub struct Chain {
	pub intercept: Array1<f64>,
	pub log_tau: Array1<f64>,
	/// The residual standard deviation. It is `None` for the binomial family.
	pub sigma: Option<Array1<f64>>,
	/// The draws of `intercept + u_j`, one row per draw and one column per group.
	pub effects: Array2<f64>,
}

#[derive(Clone, Debug)]
pub struct Posterior {
	pub chains: Vec<Chain>,
	pub max_rhat: f64,
	pub min_effective_sample_size: f64,
}

#[derive(Clone, Debug)]
pub struct PosteriorSummary {
	/// The posterior mean of the intercept.
	pub intercept: f64,
	/// The posterior mean of `intercept + u_j` for each group.
	pub group_estimates: Vec<f64>,
	/// The posterior mean of `tau`.
	pub tau: f64,
	/// Diagnostics for the intercept, each group effect named `effect_<j>`, and the ungated `log_tau` and `sigma`.
	pub diagnostics: Diagnostics,
}

impl Posterior {
	pub fn n_groups(&self) -> usize {
		self.chains
			.first()
			.map(|chain| chain.effects.ncols())
			.unwrap_or(0)
	}

	pub fn summarize(&self) -> PosteriorSummary {
		let n_groups = self.n_groups();
		let intercept = pooled_mean(self.chains.iter().map(|chain| chain.intercept.view()));
		let group_estimates = (0..n_groups)
			.map(|group| pooled_mean(self.chains.iter().map(|chain| chain.effects.column(group))))
			.collect();
		let tau_draws: Vec<Array1<f64>> = self
			.chains
			.iter()
			.map(|chain| chain.log_tau.mapv(f64::exp))
			.collect();
		let tau = pooled_mean(tau_draws.iter().map(|draws| draws.view()));
		let mut parameters = Vec::with_capacity(n_groups + 3);
		let intercept_chains: Vec<_> = self.chains.iter().map(|chain| chain.intercept.view()).collect();
		parameters.push(ParameterDiagnostics::compute(
			"intercept".to_owned(),
			&intercept_chains,
			true,
		));
		for group in 0..n_groups {
			let effect_chains: Vec<_> = self
				.chains
				.iter()
				.map(|chain| chain.effects.column(group))
				.collect();
			parameters.push(ParameterDiagnostics::compute(
				format!("effect_{}", group),
				&effect_chains,
				true,
			));
		}
		let log_tau_chains: Vec<_> = self.chains.iter().map(|chain| chain.log_tau.view()).collect();
		parameters.push(ParameterDiagnostics::compute(
			"log_tau".to_owned(),
			&log_tau_chains,
			false,
		));
		let sigma_chains: Option<Vec<_>> = self
			.chains
			.iter()
			.map(|chain| chain.sigma.as_ref().map(|sigma| sigma.view()))
			.collect();
		if let Some(sigma_chains) = sigma_chains {
			parameters.push(ParameterDiagnostics::compute(
				"sigma".to_owned(),
				&sigma_chains,
				false,
			));
		}
		PosteriorSummary {
			intercept,
			group_estimates,
			tau,
			diagnostics: Diagnostics {
				max_rhat: self.max_rhat,
				min_effective_sample_size: self.min_effective_sample_size,
				parameters,
			},
		}
	}
}

/// The mean of the draws of every chain together.
fn pooled_mean<'a>(chains: impl Iterator<Item = ArrayView1<'a, f64>>) -> f64 {
	let (sum, n) = chains.fold((0.0, 0usize), |(sum, n), draws| {
		(sum + draws.sum(), n + draws.len())
	});
	sum / n.to_f64().unwrap()
}

impl PosteriorSampler for GibbsSampler {
	fn sample(
		&self,
		data: &GroupedOutcomes,
		options: &SamplerOptions,
		progress_counter: &ProgressCounter,
		cancellation_token: &CancellationToken,
	) -> Result<Posterior, Error> {
		options.validate()?;
		if data.n_groups() < 2 {
			return Err(Error::TooFewGroups {
				required: 2,
				found: data.n_groups(),
			});
		}
		let model = Model::new(data, options)?;
		let chains = (0..options.chains)
			.into_par_iter()
			.map(|chain| {
				let seed = options.seed.wrapping_add(chain.to_u64().unwrap());
				run_chain(&model, options, seed, progress_counter, cancellation_token)
			})
			.collect::<Result<Vec<_>, Error>>()?;
		log::debug!(
			"sampled {} chains of {} iterations each",
			options.chains,
			options.iterations
		);
		Ok(Posterior {
			chains,
			max_rhat: options.max_rhat,
			min_effective_sample_size: options.min_effective_sample_size,
		})
	}
}

/// Everything a chain needs that does not change while sampling.
struct Model<'a> {
	data: &'a GroupedOutcomes,
	intercept_prior_mean: f64,
	intercept_prior_sd: f64,
	tau_prior_rate: f64,
	/// The no pooling estimates, used to initialize each chain.
	initial_intercept: f64,
	initial_estimates: Vec<f64>,
	scale: f64,
}

impl<'a> Model<'a> {
	fn new(data: &'a GroupedOutcomes, options: &SamplerOptions) -> Result<Self, Error> {
		let pooled = data.pooled();
		let (center, scale) = match data.family() {
			Family::Binomial => {
				if pooled.sum <= 0.0 || pooled.sum >= pooled.n_f64() {
					return Err(Error::SingleClass);
				}
				// Center the intercept on the pooled log-odds.
				((pooled.sum / (pooled.n_f64() - pooled.sum)).ln(), 1.0)
			}
			Family::Gaussian => {
				let n = pooled.n_f64();
				let sd = if n > 1.0 {
					(pooled.within_sum_of_squares() / (n - 1.0)).sqrt()
				} else {
					0.0
				};
				let scale = if sd > 0.0 && sd.is_finite() { sd } else { 1.0 };
				(pooled.mean(), scale)
			}
		};
		let no_pooling = fit_no_pooling(data, &NoPoolingOptions::default())?;
		Ok(Self {
			data,
			intercept_prior_mean: center,
			intercept_prior_sd: options.intercept_prior_scale * scale,
			tau_prior_rate: options.tau_prior_rate / scale,
			initial_intercept: no_pooling.intercept,
			initial_estimates: no_pooling.estimates,
			scale,
		})
	}

	fn n_groups(&self) -> usize {
		self.data.n_groups()
	}
}

/// The log step size of one random walk proposal, adapted with a Robbins-Monro update.
#[derive(Clone, Debug)]
struct AdaptiveStep {
	log_step: f64,
	n_updates: f64,
}

impl AdaptiveStep {
	const TARGET_ACCEPTANCE: f64 = 0.44;

	fn new(step: f64) -> Self {
		Self {
			log_step: step.ln(),
			n_updates: 0.0,
		}
	}

	fn step(&self) -> f64 {
		self.log_step.exp()
	}

	fn adapt(&mut self, accepted: bool) {
		let rate = (self.n_updates + 1.0).powf(-0.6);
		let observed = if accepted { 1.0 } else { 0.0 };
		self.log_step = (self.log_step + rate * (observed - Self::TARGET_ACCEPTANCE)).clamp(-12.0, 5.0);
		self.n_updates += 1.0;
	}
}

struct ChainState {
	intercept: f64,
	effects: Vec<f64>,
	log_tau: f64,
	residual_variance: f64,
}

struct Steps {
	effects: Vec<AdaptiveStep>,
	intercept: AdaptiveStep,
	log_tau: AdaptiveStep,
}

fn standard_normal(rng: &mut Xoshiro256Plus) -> f64 {
	StandardNormal.sample(rng)
}

/// Accept a proposal whose log target density exceeds the current one by `log_ratio`.
fn metropolis_accept(rng: &mut Xoshiro256Plus, log_ratio: f64) -> bool {
	if log_ratio >= 0.0 {
		true
	} else {
		rng.gen::<f64>().ln() < log_ratio
	}
}

fn run_chain(
	model: &Model,
	options: &SamplerOptions,
	seed: u64,
	progress_counter: &ProgressCounter,
	cancellation_token: &CancellationToken,
) -> Result<Chain, Error> {
	let mut rng = Xoshiro256Plus::seed_from_u64(seed);
	let data = model.data;
	let n_groups = model.n_groups();
	let family = data.family();
	let mut state = initial_state(model, &mut rng);
	let mut steps = Steps {
		effects: data
			.groups()
			.iter()
			.map(|group| AdaptiveStep::new(2.4 / (0.25 * group.n_f64() + 1.0).sqrt()))
			.collect(),
		intercept: AdaptiveStep::new(2.4 / (0.25 * data.pooled().n_f64() + 1.0).sqrt()),
		log_tau: AdaptiveStep::new(0.5),
	};
	let residual_variance_shape = Gamma::new(0.5 * data.pooled().n_f64(), 1.0)
		.map_err(|error| Error::InvalidOptions(error.to_string()))?;
	let n_warmup = options.n_warmup().min(options.iterations);
	let n_kept = options.iterations - n_warmup;
	let mut chain = Chain {
		intercept: Array1::zeros(n_kept),
		log_tau: Array1::zeros(n_kept),
		sigma: match family {
			Family::Gaussian => Some(Array1::zeros(n_kept)),
			Family::Binomial => None,
		},
		effects: Array2::zeros((n_kept, n_groups)),
	};
	for iteration in 0..options.iterations {
		if cancellation_token.is_cancelled() {
			return Err(Error::Cancelled);
		}
		let adapt = iteration < n_warmup;
		match family {
			Family::Gaussian => {
				update_residual_variance(model, &mut state, &residual_variance_shape, &mut rng);
				update_gaussian_effects(model, &mut state, &mut rng);
				update_gaussian_intercept(model, &mut state, &mut rng);
			}
			Family::Binomial => {
				update_binomial_effects(model, &mut state, &mut steps, adapt, &mut rng);
				update_binomial_intercept(model, &mut state, &mut steps, adapt, &mut rng);
			}
		}
		recenter(model, &mut state, &mut rng);
		update_log_tau(model, &mut state, &mut steps, adapt, &mut rng);
		if !adapt {
			let draw = iteration - n_warmup;
			chain.intercept[draw] = state.intercept;
			chain.log_tau[draw] = state.log_tau;
			if let Some(sigma) = chain.sigma.as_mut() {
				sigma[draw] = state.residual_variance.sqrt();
			}
			for (group, effect) in state.effects.iter().enumerate() {
				chain.effects[[draw, group]] = state.intercept + effect;
			}
		}
		progress_counter.inc(1);
	}
	Ok(chain)
}

/// Start each chain at a random point around the no pooling estimates, shrunk halfway toward the intercept, so different chains begin in different places.
fn initial_state(model: &Model, rng: &mut Xoshiro256Plus) -> ChainState {
	let intercept = model.initial_intercept + 0.5 * model.scale * standard_normal(rng);
	let effects: Vec<f64> = model
		.initial_estimates
		.iter()
		.map(|estimate| 0.5 * (estimate - model.initial_intercept) + 0.1 * model.scale * standard_normal(rng))
		.collect();
	let n_groups = effects.len().to_f64().unwrap();
	let spread = (effects.iter().map(|effect| effect * effect).sum::<f64>() / n_groups).sqrt();
	let log_tau = spread.max(0.1 * model.scale).ln() + 0.3 * standard_normal(rng);
	let pooled = model.data.pooled();
	let residual_variance = (pooled.within_sum_of_squares() / pooled.n_f64()).max(1e-12);
	ChainState {
		intercept,
		effects,
		log_tau,
		residual_variance,
	}
}

/// The residual sum of squares of the gaussian model at the current linear predictors.
fn residual_sum_of_squares(model: &Model, state: &ChainState) -> f64 {
	model
		.data
		.groups()
		.iter()
		.zip(state.effects.iter())
		.map(|(group, effect)| {
			let eta = state.intercept + effect;
			(group.sum_of_squares - 2.0 * eta * group.sum + group.n_f64() * eta * eta).max(0.0)
		})
		.sum()
}

/// Draw the residual variance from its inverse gamma full conditional under the Jeffreys prior.
fn update_residual_variance(
	model: &Model,
	state: &mut ChainState,
	shape: &Gamma<f64>,
	rng: &mut Xoshiro256Plus,
) {
	let rss = residual_sum_of_squares(model, state);
	let gamma: f64 = shape.sample(rng);
	state.residual_variance = (0.5 * rss / gamma).max(1e-12);
}

fn update_gaussian_effects(model: &Model, state: &mut ChainState, rng: &mut Xoshiro256Plus) {
	let tau_squared = (2.0 * state.log_tau).exp();
	for (group, effect) in model.data.groups().iter().zip(state.effects.iter_mut()) {
		let precision = group.n_f64() / state.residual_variance + 1.0 / tau_squared;
		let mean = (group.sum - group.n_f64() * state.intercept) / state.residual_variance / precision;
		*effect = mean + standard_normal(rng) / precision.sqrt();
	}
}

fn update_gaussian_intercept(model: &Model, state: &mut ChainState, rng: &mut Xoshiro256Plus) {
	let prior_precision = 1.0 / (model.intercept_prior_sd * model.intercept_prior_sd);
	let n_total = model.data.pooled().n_f64();
	let precision = n_total / state.residual_variance + prior_precision;
	let residual_sum: f64 = model
		.data
		.groups()
		.iter()
		.zip(state.effects.iter())
		.map(|(group, effect)| group.sum - group.n_f64() * effect)
		.sum();
	let mean = (residual_sum / state.residual_variance
		+ model.intercept_prior_mean * prior_precision)
		/ precision;
	state.intercept = mean + standard_normal(rng) / precision.sqrt();
}

fn update_binomial_effects(
	model: &Model,
	state: &mut ChainState,
	steps: &mut Steps,
	adapt: bool,
	rng: &mut Xoshiro256Plus,
) {
	let tau_squared = (2.0 * state.log_tau).exp();
	let log_target = |index: usize, effect: f64, intercept: f64| {
		model.data.log_likelihood(index, intercept + effect, 1.0) - effect * effect / (2.0 * tau_squared)
	};
	for index in 0..state.effects.len() {
		let current = state.effects[index];
		let proposal = current + steps.effects[index].step() * standard_normal(rng);
		let log_ratio = log_target(index, proposal, state.intercept)
			- log_target(index, current, state.intercept);
		let accepted = metropolis_accept(rng, log_ratio);
		if accepted {
			state.effects[index] = proposal;
		}
		if adapt {
			steps.effects[index].adapt(accepted);
		}
	}
}

fn update_binomial_intercept(
	model: &Model,
	state: &mut ChainState,
	steps: &mut Steps,
	adapt: bool,
	rng: &mut Xoshiro256Plus,
) {
	let log_target = |intercept: f64| {
		let deviation = (intercept - model.intercept_prior_mean) / model.intercept_prior_sd;
		state
			.effects
			.iter()
			.enumerate()
			.map(|(index, effect)| model.data.log_likelihood(index, intercept + effect, 1.0))
			.sum::<f64>()
			- 0.5 * deviation * deviation
	};
	let current = state.intercept;
	let proposal = current + steps.intercept.step() * standard_normal(rng);
	let log_ratio = log_target(proposal) - log_target(current);
	let accepted = metropolis_accept(rng, log_ratio);
	if accepted {
		state.intercept = proposal;
	}
	if adapt {
		steps.intercept.adapt(accepted);
	}
}

/// Draw a common shift of the intercept and random intercepts from its exact full conditional. Only the priors depend on the shift.
fn recenter(model: &Model, state: &mut ChainState, rng: &mut Xoshiro256Plus) {
	let tau_squared = (2.0 * state.log_tau).exp();
	let prior_variance = model.intercept_prior_sd * model.intercept_prior_sd;
	let n_groups = state.effects.len().to_f64().unwrap();
	let precision = 1.0 / prior_variance + n_groups / tau_squared;
	let effect_sum: f64 = state.effects.iter().sum();
	let mean = ((model.intercept_prior_mean - state.intercept) / prior_variance
		+ effect_sum / tau_squared)
		/ precision;
	let shift = mean + standard_normal(rng) / precision.sqrt();
	state.intercept += shift;
	for effect in state.effects.iter_mut() {
		*effect -= shift;
	}
}

/// Update `log(tau)` with a random walk. The target includes the exponential prior on `tau` and the Jacobian of the log transform.
fn update_log_tau(
	model: &Model,
	state: &mut ChainState,
	steps: &mut Steps,
	adapt: bool,
	rng: &mut Xoshiro256Plus,
) {
	let n_groups = state.effects.len().to_f64().unwrap();
	let sum_of_squares: f64 = state.effects.iter().map(|effect| effect * effect).sum();
	let log_target = |log_tau: f64| {
		let tau = log_tau.exp();
		-n_groups * log_tau - sum_of_squares / (2.0 * tau * tau) - model.tau_prior_rate * tau + log_tau
	};
	let current = state.log_tau;
	let proposal = current + steps.log_tau.step() * standard_normal(rng);
	let log_ratio = log_target(proposal) - log_target(current);
	let accepted = log_ratio.is_finite() && metropolis_accept(rng, log_ratio);
	if accepted {
		state.log_tau = proposal;
	}
	if adapt {
		steps.log_tau.adapt(accepted);
	}
}

#[cfg(test)]
fn binomial_data(groups: &[(u64, u64)]) -> GroupedOutcomes {
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

#[cfg(test)]
fn test_options() -> SamplerOptions {
	SamplerOptions {
		chains: 2,
		iterations: 600,
		..Default::default()
	}
}

#[test]
fn test_same_seed_gives_identical_draws() {
	let data = binomial_data(&[(20, 5), (20, 15), (10, 5), (4, 4)]);
	let sample = || {
		GibbsSampler
			.sample(
				&data,
				&test_options(),
				&ProgressCounter::new(0),
				&CancellationToken::new(),
			)
			.unwrap()
	};
	let first = sample();
	let second = sample();
	for (a, b) in first.chains.iter().zip(second.chains.iter()) {
		assert_eq!(a.intercept, b.intercept);
		assert_eq!(a.effects, b.effects);
	}
	// Chains are seeded differently.
	assert_ne!(first.chains[0].intercept, first.chains[1].intercept);
}

#[test]
fn test_progress_reaches_total() {
	let data = binomial_data(&[(20, 5), (20, 15), (10, 5)]);
	let options = test_options();
	let total = (options.chains * options.iterations).to_u64().unwrap();
	let progress_counter = ProgressCounter::new(total);
	let posterior = GibbsSampler
		.sample(&data, &options, &progress_counter, &CancellationToken::new())
		.unwrap();
	assert_eq!(progress_counter.get(), total);
	assert_eq!(posterior.chains[0].intercept.len(), options.n_kept());
	assert_eq!(posterior.chains[0].effects.dim(), (options.n_kept(), 3));
}

#[test]
fn test_cancelled_sampler_returns_error() {
	let data = binomial_data(&[(20, 5), (20, 15)]);
	let token = CancellationToken::new();
	token.cancel();
	let result = GibbsSampler.sample(&data, &test_options(), &ProgressCounter::new(0), &token);
	assert!(matches!(result, Err(Error::Cancelled)));
}

#[test]
fn test_invalid_options_are_rejected() {
	let data = binomial_data(&[(20, 5), (20, 15)]);
	let options = SamplerOptions {
		iterations: 6,
		warmup_fraction: 0.5,
		..Default::default()
	};
	let result = GibbsSampler.sample(&data, &options, &ProgressCounter::new(0), &CancellationToken::new());
	assert!(matches!(result, Err(Error::InvalidOptions(_))));
}

#[test]
fn test_binomial_posterior_shrinks_small_groups_more() {
	// Groups 0 and 1 have the same event rate of 0.8.
	let data = binomial_data(&[(5, 4), (100, 80), (40, 10), (30, 15), (60, 12), (20, 14)]);
	let options = SamplerOptions {
		iterations: 2000,
		..Default::default()
	};
	let summary = GibbsSampler
		.sample(&data, &options, &ProgressCounter::new(0), &CancellationToken::new())
		.unwrap()
		.summarize();
	let raw = 4f64.ln();
	let small = summary.group_estimates[0];
	let large = summary.group_estimates[1];
	assert!(small < large, "{} {}", small, large);
	assert!(large < raw + 0.1);
	assert!(summary.diagnostics.worst_rhat() < 1.1);
	assert_eq!(summary.diagnostics.parameters.len(), 6 + 2);
	assert!(!summary.diagnostics.parameters.last().unwrap().gated);
}

#[test]
fn test_gaussian_posterior_is_near_group_means() {
	let mut group_ids = Vec::new();
	let mut outcomes = Vec::new();
	for (group, mean) in [0.0, 5.0, 10.0].iter().enumerate() {
		for offset in [-1.0, -0.5, 0.0, 0.5, 1.0].iter() {
			for _ in 0..4 {
				group_ids.push(group);
				outcomes.push(mean + offset);
			}
		}
	}
	let data = GroupedOutcomes::from_observations(Family::Gaussian, 3, &group_ids, &outcomes).unwrap();
	let summary = GibbsSampler
		.sample(
			&data,
			&SamplerOptions::default(),
			&ProgressCounter::new(0),
			&CancellationToken::new(),
		)
		.unwrap()
		.summarize();
	for (estimate, mean) in summary.group_estimates.iter().zip([0.0, 5.0, 10.0].iter()) {
		assert!((estimate - mean).abs() < 0.5, "{} {}", estimate, mean);
	}
	assert!(summary.diagnostics.converged());
	assert_eq!(summary.diagnostics.parameters.last().unwrap().name, "sigma");
}

#[test]
fn test_two_group_posterior_pulls_the_small_group_to_the_intercept() {
	// One large group at a rate of 0.8 and three rows that are all events.
	let data = binomial_data(&[(100, 80), (3, 3)]);
	let raw_small = 7f64.ln();
	let raw_large = 4f64.ln();
	for seed in [1, 7, 42, 99].iter() {
		let options = SamplerOptions {
			seed: *seed,
			..Default::default()
		};
		let summary = GibbsSampler
			.sample(&data, &options, &ProgressCounter::new(0), &CancellationToken::new())
			.unwrap()
			.summarize();
		let large = summary.group_estimates[0];
		let small = summary.group_estimates[1];
		assert!(small < raw_small, "seed {}: {}", seed, small);
		assert!(
			(small - summary.intercept).abs() < 0.25 * (raw_small - summary.intercept).abs(),
			"seed {}: {} {}",
			seed,
			small,
			summary.intercept
		);
		assert!((small - large).abs() < (raw_small - raw_large).abs());
	}
}
