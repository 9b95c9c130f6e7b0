use embed_metrics::{MeanVariance, MeanVarianceOutput, Metric, StreamingMetric};
use ndarray::prelude::*;
use num_traits::ToPrimitive;

/// The convergence diagnostics of one scalar parameter, computed from the draws of every chain.
#[derive(Clone, Debug, PartialEq)]
pub struct ParameterDiagnostics {
	pub name: String,
	/// The split potential scale reduction factor. It is `NaN` if every draw of every chain is identical.
	pub rhat: f64,
	pub effective_sample_size: f64,
	/// Only gated parameters decide whether the sampler converged. The rest are reported for information.
	pub gated: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Diagnostics {
	pub max_rhat: f64,
	pub min_effective_sample_size: f64,
	pub parameters: Vec<ParameterDiagnostics>,
}

impl ParameterDiagnostics {
	pub fn compute(name: String, chains: &[ArrayView1<f64>], gated: bool) -> Self {
		Self {
			name,
			rhat: split_rhat(chains),
			effective_sample_size: effective_sample_size(chains),
			gated,
		}
	}

	/// Whether this parameter meets both thresholds. A `NaN` diagnostic never passes.
	pub fn passes(&self, max_rhat: f64, min_effective_sample_size: f64) -> bool {
		self.rhat <= max_rhat && self.effective_sample_size >= min_effective_sample_size
	}
}

impl Diagnostics {
	/// The gated parameters that fail either threshold.
	pub fn failures(&self) -> impl Iterator<Item = &ParameterDiagnostics> {
		self.parameters.iter().filter(move |parameter| {
			parameter.gated && !parameter.passes(self.max_rhat, self.min_effective_sample_size)
		})
	}

	pub fn converged(&self) -> bool {
		self.failures().next().is_none()
	}

	/// The largest rhat of the gated parameters, `NaN` if any of them is `NaN`.
	pub fn worst_rhat(&self) -> f64 {
		self.parameters
			.iter()
			.filter(|parameter| parameter.gated)
			.fold(1.0, |worst: f64, parameter| {
				if worst.is_nan() || parameter.rhat.is_nan() {
					std::f64::NAN
				} else {
					worst.max(parameter.rhat)
				}
			})
	}

	/// The smallest effective sample size of the gated parameters.
	pub fn worst_effective_sample_size(&self) -> f64 {
		self.parameters
			.iter()
			.filter(|parameter| parameter.gated)
			.map(|parameter| parameter.effective_sample_size)
			.fold(std::f64::INFINITY, f64::min)
	}
}

/// Split every chain in half, discarding the middle draw of an odd length chain, so a trend within a chain shows up as disagreement between sequences.
fn split_chains<'a>(chains: &[ArrayView1<'a, f64>]) -> Vec<ArrayView1<'a, f64>> {
	let half = chains.iter().map(|chain| chain.len()).min().unwrap_or(0) / 2;
	chains
		.iter()
		.flat_map(|chain| {
			let n = chain.len();
			let first = chain.clone().slice_move(s![..half]);
			let second = chain.clone().slice_move(s![n - half..]);
			vec![first, second]
		})
		.collect()
}

struct SequenceMoments {
	length: f64,
	means: Vec<f64>,
	/// The mean of the within sequence variances.
	within: f64,
	/// The pooled estimate of the marginal posterior variance.
	variance_plus: f64,
}

fn sequence_moments(sequences: &[ArrayView1<f64>]) -> Option<SequenceMoments> {
	let n_sequences = sequences.len();
	let length = sequences.first().map(|sequence| sequence.len()).unwrap_or(0);
	if n_sequences < 2 || length < 2 {
		return None;
	}
	let m = n_sequences.to_f64().unwrap();
	let h = length.to_f64().unwrap();
	let moments: Vec<MeanVarianceOutput> = sequences
		.iter()
		.map(|sequence| {
			let mut metric = MeanVariance::default();
			sequence.iter().for_each(|x| metric.update(*x));
			metric.finalize()
		})
		.collect::<Option<_>>()?;
	let means: Vec<f64> = moments.iter().map(|moments| moments.mean).collect();
	let within = moments
		.iter()
		.filter_map(|moments| moments.sample_variance())
		.sum::<f64>()
		/ m;
	let between = h * MeanVariance::compute(&means[..])?.sample_variance()?;
	let variance_plus = (h - 1.0) / h * within + between / h;
	Some(SequenceMoments {
		length: h,
		means,
		within,
		variance_plus,
	})
}

/**
Compute the split R-hat of a parameter: `sqrt(var_plus / W)`, where each chain is split in half, `W` is the mean of the within sequence variances and `var_plus = (h - 1) / h W + B / h` mixes in the variance `B` between the sequence means. Values near 1 indicate the chains agree. The result is `NaN` if `W` is zero or there are too few draws.
*/
pub fn split_rhat(chains: &[ArrayView1<f64>]) -> f64 {
	let sequences = split_chains(chains);
	match sequence_moments(&sequences) {
		Some(moments) if moments.within > 0.0 => (moments.variance_plus / moments.within).sqrt(),
		_ => std::f64::NAN,
	}
}

/**
Estimate the effective sample size of a parameter from its split chains. The autocorrelation at each lag combines the within sequence autocovariances with the between sequence variance, and the sum of autocorrelations is truncated with Geyer's initial monotone sequence: consecutive pairs of autocorrelations are summed while they are positive, and each pair is capped at the previous one.
*/
pub fn effective_sample_size(chains: &[ArrayView1<f64>]) -> f64 {
	let sequences = split_chains(chains);
	let moments = match sequence_moments(&sequences) {
		Some(moments) => moments,
		None => return std::f64::NAN,
	};
	if !(moments.variance_plus > 0.0) {
		return std::f64::NAN;
	}
	let length = sequences[0].len();
	let n_draws = moments.length * sequences.len().to_f64().unwrap();
	let autocorrelation = |lag: usize| -> f64 {
		let mean_autocovariance = sequences
			.iter()
			.zip(moments.means.iter())
			.map(|(sequence, mean)| {
				let head = sequence.slice(s![..length - lag]);
				let tail = sequence.slice(s![lag..]);
				head.iter()
					.zip(tail.iter())
					.map(|(a, b)| (a - mean) * (b - mean))
					.sum::<f64>() / moments.length
			})
			.sum::<f64>()
			/ sequences.len().to_f64().unwrap();
		1.0 - (moments.within - mean_autocovariance) / moments.variance_plus
	};
	let mut sum_of_pairs = 0.0;
	let mut previous_pair = std::f64::INFINITY;
	let mut lag = 0;
	while lag + 1 < length {
		let pair = autocorrelation(lag) + autocorrelation(lag + 1);
		if !(pair > 0.0) {
			break;
		}
		let pair = pair.min(previous_pair);
		sum_of_pairs += pair;
		previous_pair = pair;
		lag += 2;
	}
	let integrated_time = (-1.0 + 2.0 * sum_of_pairs).max(1.0 / n_draws.log10());
	n_draws / integrated_time
}

#[cfg(test)]
fn normal_draws(seed: u64, n_chains: usize, n_draws: usize, offset: f64) -> Vec<Array1<f64>> {
	use rand::SeedableRng;
	use rand_distr::{Distribution, StandardNormal};
	let mut rng = rand_xoshiro::Xoshiro256Plus::seed_from_u64(seed);
	(0..n_chains)
		.map(|chain| {
			(0..n_draws)
				.map(|_| {
					let z: f64 = StandardNormal.sample(&mut rng);
					z + offset * chain.to_f64().unwrap()
				})
				.collect()
		})
		.collect()
}

#[test]
fn test_independent_draws_mix() {
	let chains = normal_draws(0, 4, 1000, 0.0);
	let views: Vec<_> = chains.iter().map(|chain| chain.view()).collect();
	let rhat = split_rhat(&views);
	let ess = effective_sample_size(&views);
	assert!(rhat < 1.01, "rhat = {}", rhat);
	assert!(ess > 2500.0, "ess = {}", ess);
}

#[test]
fn test_separated_chains_do_not_mix() {
	let chains = normal_draws(1, 4, 1000, 3.0);
	let views: Vec<_> = chains.iter().map(|chain| chain.view()).collect();
	assert!(split_rhat(&views) > 1.5);
}

#[test]
fn test_autocorrelated_draws_have_small_effective_sample_size() {
	use rand::SeedableRng;
	use rand_distr::{Distribution, StandardNormal};
	let mut rng = rand_xoshiro::Xoshiro256Plus::seed_from_u64(2);
	let chains: Vec<Array1<f64>> = (0..4)
		.map(|_| {
			let mut x = 0.0;
			(0..1000)
				.map(|_| {
					let z: f64 = StandardNormal.sample(&mut rng);
					x = 0.9 * x + z;
					x
				})
				.collect()
		})
		.collect();
	let views: Vec<_> = chains.iter().map(|chain| chain.view()).collect();
	let ess = effective_sample_size(&views);
	// The integrated autocorrelation time of an AR(1) process is (1 + 0.9) / (1 - 0.9) = 19.
	assert!(ess > 100.0 && ess < 500.0, "ess = {}", ess);
}

#[test]
fn test_constant_chains_fail_the_gate() {
	let chains = vec![Array1::from_elem(100, 1.0), Array1::from_elem(100, 1.0)];
	let views: Vec<_> = chains.iter().map(|chain| chain.view()).collect();
	let parameter = ParameterDiagnostics::compute("intercept".to_owned(), &views, true);
	assert!(parameter.rhat.is_nan());
	let diagnostics = Diagnostics {
		max_rhat: 1.1,
		min_effective_sample_size: 10.0,
		parameters: vec![parameter],
	};
	assert!(!diagnostics.converged());
	assert!(diagnostics.worst_rhat().is_nan());
}
