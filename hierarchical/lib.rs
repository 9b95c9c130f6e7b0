/*!
This crate fits the one way random intercept model that underlies likelihood encodings,

```text
eta_j = intercept + u_j
u_j ~ Normal(0, tau)
```

where `j` indexes the groups (the levels of a categorical column) and the outcome of each observation in group `j` is either binomial with log-odds `eta_j` or gaussian with mean `eta_j`. There are three estimators:

- [`fit_no_pooling`](fn.fit_no_pooling.html) estimates every group independently, which is the `tau = infinity` limit.
- [`fit_mixed`](fn.fit_mixed.html) computes empirical Bayes point estimates, maximizing the (restricted) likelihood for a gaussian outcome and its Laplace approximation for a binomial outcome.
- [`GibbsSampler`](struct.GibbsSampler.html) draws from the full posterior with Markov chain Monte Carlo, and [`Posterior::summarize`](struct.Posterior.html#method.summarize) reduces the draws to posterior means and convergence diagnostics.

All three only see per group sufficient statistics, collected in [`GroupedOutcomes`](struct.GroupedOutcomes.html).
*/

#![allow(clippy::tabs_in_doc_comments)]

use num_traits::ToPrimitive;

mod diagnostics;
mod glm;
mod mixed;
mod sampler;

pub use self::diagnostics::{effective_sample_size, split_rhat, Diagnostics, ParameterDiagnostics};
pub use self::glm::{fit_no_pooling, NoPoolingFit, NoPoolingOptions};
pub use self::mixed::{fit_mixed, MixedFit, MixedOptions};
pub use self::sampler::{
	Chain, GibbsSampler, Posterior, PosteriorSampler, PosteriorSummary, SamplerOptions,
};

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("at least {required} groups are required, but {found} were given")]
	TooFewGroups { required: usize, found: usize },
	#[error("group {0} has no observations")]
	EmptyGroup(usize),
	#[error("the outcome of a binomial model must contain both classes")]
	SingleClass,
	#[error("invalid options: {0}")]
	InvalidOptions(String),
	#[error("the solver did not converge within {iterations} iterations")]
	NonConvergence {
		iterations: usize,
		/// The estimates at the point the iteration budget ran out.
		fit: Box<MixedFit>,
	},
	#[error("the fit was cancelled")]
	Cancelled,
}

/// The distribution of the outcome given the linear predictor of its group.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Family {
	/// A binary outcome, modeled on the log-odds scale.
	Binomial,
	/// A numeric outcome, modeled on its own scale with a shared residual variance.
	Gaussian,
}

/// The sufficient statistics of one group. For a binomial outcome `sum` is the number of events.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct GroupStats {
	pub n: u64,
	pub sum: f64,
	pub sum_of_squares: f64,
}

impl GroupStats {
	pub fn update(&mut self, value: f64) {
		self.n += 1;
		self.sum += value;
		self.sum_of_squares += value * value;
	}

	pub fn n_f64(&self) -> f64 {
		self.n.to_f64().unwrap()
	}

	pub fn mean(&self) -> f64 {
		self.sum / self.n_f64()
	}

	/// The sum of squared deviations from the group mean.
	pub fn within_sum_of_squares(&self) -> f64 {
		(self.sum_of_squares - self.sum * self.sum / self.n_f64()).max(0.0)
	}
}

/// The outcomes of a training set, reduced to one [`GroupStats`](struct.GroupStats.html) per group.
#[derive(Clone, Debug, PartialEq)]
pub struct GroupedOutcomes {
	family: Family,
	groups: Vec<GroupStats>,
}

impl GroupedOutcomes {
	/// Group `outcomes` by `group_ids`, where each id is in `0..n_groups`. Binomial outcomes must be 0 or 1. Every group must have at least one observation.
	pub fn from_observations(
		family: Family,
		n_groups: usize,
		group_ids: &[usize],
		outcomes: &[f64],
	) -> Result<Self, Error> {
		let mut groups = vec![GroupStats::default(); n_groups];
		for (group_id, outcome) in group_ids.iter().zip(outcomes.iter()) {
			let group = groups
				.get_mut(*group_id)
				.ok_or_else(|| Error::InvalidOptions(format!("group id {} is out of range", group_id)))?;
			group.update(*outcome);
		}
		Self::new(family, groups)
	}

	pub fn new(family: Family, groups: Vec<GroupStats>) -> Result<Self, Error> {
		if let Some(index) = groups.iter().position(|group| group.n == 0) {
			return Err(Error::EmptyGroup(index));
		}
		Ok(Self { family, groups })
	}

	pub fn family(&self) -> Family {
		self.family
	}

	pub fn groups(&self) -> &[GroupStats] {
		&self.groups
	}

	pub fn n_groups(&self) -> usize {
		self.groups.len()
	}

	/// The statistics of all observations pooled into a single group.
	pub fn pooled(&self) -> GroupStats {
		self.groups
			.iter()
			.fold(GroupStats::default(), |pooled, group| GroupStats {
				n: pooled.n + group.n,
				sum: pooled.sum + group.sum,
				sum_of_squares: pooled.sum_of_squares + group.sum_of_squares,
			})
	}

	/// The log likelihood of group `index` when its linear predictor is `eta`. For the gaussian family `residual_variance` is the variance of an observation around `eta`; it is ignored for the binomial family.
	pub(crate) fn log_likelihood(&self, index: usize, eta: f64, residual_variance: f64) -> f64 {
		let group = &self.groups[index];
		match self.family {
			Family::Binomial => group.sum * eta - group.n_f64() * softplus(eta),
			Family::Gaussian => {
				let n = group.n_f64();
				let squared_error =
					group.sum_of_squares - 2.0 * eta * group.sum + n * eta * eta;
				-0.5 * squared_error.max(0.0) / residual_variance
					- 0.5 * n * (2.0 * std::f64::consts::PI * residual_variance).ln()
			}
		}
	}
}

/// `ln(1 + exp(x))`, computed without overflow.
pub(crate) fn softplus(x: f64) -> f64 {
	if x > 0.0 {
		x + (-x).exp().ln_1p()
	} else {
		x.exp().ln_1p()
	}
}

pub(crate) fn logistic(x: f64) -> f64 {
	if x >= 0.0 {
		1.0 / (1.0 + (-x).exp())
	} else {
		let e = x.exp();
		e / (1.0 + e)
	}
}

#[test]
fn test_grouped_outcomes() {
	let grouped =
		GroupedOutcomes::from_observations(Family::Binomial, 2, &[0, 1, 1, 0, 1], &[1.0, 0.0, 1.0, 1.0, 1.0])
			.unwrap();
	assert_eq!(grouped.groups()[0].n, 2);
	assert_eq!(grouped.groups()[1].sum, 2.0);
	assert_eq!(grouped.pooled().n, 5);
	assert_eq!(grouped.pooled().sum, 4.0);
}

#[test]
fn test_empty_group_is_rejected() {
	let result = GroupedOutcomes::from_observations(Family::Gaussian, 3, &[0, 2], &[1.0, 2.0]);
	assert!(matches!(result, Err(Error::EmptyGroup(1))));
}

#[test]
fn test_softplus_and_logistic_are_stable() {
	assert!((softplus(0.0) - 2f64.ln()).abs() < 1e-12);
	assert!((softplus(800.0) - 800.0).abs() < 1e-12);
	assert!(softplus(-800.0) >= 0.0);
	assert!((logistic(0.0) - 0.5).abs() < 1e-12);
	assert!(logistic(-800.0) >= 0.0);
	assert!((logistic(800.0) - 1.0).abs() < 1e-12);
}
