//! Metropolis random-walk sampler.
//!
//! Given a set of signals (each owning a histogram PDF) and a dataset, the
//! sampler walks the joint space of signal normalizations and systematic
//! parameters, mapping out the likelihood space. Each step proposes an
//! independent Gaussian perturbation of every floating parameter, refreshes
//! the lookup-table columns of signals whose systematic parameters moved,
//! evaluates the NLL, and applies the Metropolis accept/reject rule. The
//! walk itself is inherently sequential; parallelism lives inside a step,
//! in the histogram fills and the NLL event reduction.

use ndarray::{Array1, Array2, ArrayView2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

use sigex_core::exec::Backend;
use sigex_core::{Signal, Systematic};

use crate::chain::Chain;
use crate::error::{McmcError, Result};
use crate::nll::NllEvaluator;

/// Give up on a step after this many non-finite proposal redraws.
const MAX_PROPOSAL_ATTEMPTS: usize = 100;

/// Run parameters for one random walk.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Total number of random-walk steps
    pub nsteps: usize,

    /// Fraction of initial steps excluded from the recorded chain
    pub burnin_fraction: f64,

    /// Record every proposed point, accepted or not
    pub debug_mode: bool,

    /// Flush the step buffer into the chain every this many steps
    /// (0 = single flush at the end)
    pub sync_interval: usize,

    /// Proposal width as a fraction of each parameter's scale
    pub step_scale: f64,
}

impl RunConfig {
    pub fn new(nsteps: usize) -> Self {
        Self {
            nsteps,
            burnin_fraction: 0.1,
            debug_mode: false,
            sync_interval: 10_000,
            step_scale: 0.1,
        }
    }
}

/// Information about walk progress, passed to progress callbacks after each
/// completed step. Returning `false` from the callback cancels the walk at
/// this step boundary; completed steps stay recorded.
#[derive(Debug, Clone)]
pub struct ProgressInfo {
    /// Current step number (0-indexed)
    pub step: usize,

    /// Total number of steps
    pub total: usize,

    /// Fraction of proposals accepted so far
    pub acceptance_rate: f64,

    /// NLL of the current state
    pub nll: f64,
}

/// The Metropolis acceptance probability for moving from a state with
/// `nll_current` to one with `nll_proposed` (lower NLL = higher likelihood).
pub fn acceptance_probability(nll_current: f64, nll_proposed: f64) -> f64 {
    if nll_proposed <= nll_current {
        1.0
    } else {
        (nll_current - nll_proposed).exp()
    }
}

/// Draw a proposal by perturbing every floating parameter of `current`;
/// fixed parameters carry `None` and are never moved. Non-finite draws are
/// redrawn a bounded number of times before the walk aborts.
fn propose_step<R: Rng>(
    rng: &mut R,
    current: &[f64],
    steps: &[Option<Normal<f64>>],
) -> Result<Vec<f64>> {
    for _ in 0..MAX_PROPOSAL_ATTEMPTS {
        let proposal: Vec<f64> = current
            .iter()
            .zip(steps.iter())
            .map(|(&v, step)| match step {
                Some(normal) => v + normal.sample(rng),
                None => v,
            })
            .collect();
        if proposal.iter().all(|v| v.is_finite()) {
            return Ok(proposal);
        }
    }
    Err(McmcError::Sampling(format!(
        "no finite proposal after {} attempts",
        MAX_PROPOSAL_ATTEMPTS
    )))
}

/// Markov Chain Monte Carlo sampler for the joint signal/systematic space.
///
/// The parameter vector is `[one normalization per signal] ++ [systematic
/// slots]`, in the order the signals and systematics were given; fixed
/// entries contribute to the NLL at their fixed value but are never
/// perturbed. Parameter names (and their order) are stable for the life of
/// the run and are stored on the returned [`Chain`].
pub struct MetropolisSampler {
    signals: Vec<Signal>,
    param_names: Vec<String>,
    /// Constraint centers: nexpected per signal, then systematic means
    means: Vec<f64>,
    /// Absolute constraint widths, 0 = unconstrained
    sigmas: Vec<f64>,
    fixed: Vec<bool>,
    nsignals: usize,
    backend: Backend,
}

impl MetropolisSampler {
    /// Build a sampler from signals and the shared systematic list.
    ///
    /// The systematic list must be the one the signals were constructed
    /// with: slot assignment walks it in order, and a signal reading a slot
    /// beyond it is a configuration error.
    pub fn new(signals: Vec<Signal>, systematics: &[Systematic]) -> Result<Self> {
        if signals.is_empty() {
            return Err(McmcError::InvalidParameter(
                "sampler needs at least one signal".to_string(),
            ));
        }
        for syst in systematics {
            syst.validate()?;
        }

        let nsignals = signals.len();
        let nslots: usize = systematics.iter().map(|s| s.npars()).sum();

        let mut param_names: Vec<String> = signals.iter().map(|s| s.name.clone()).collect();
        let mut means: Vec<f64> = signals.iter().map(|s| s.nexpected).collect();
        let mut sigmas: Vec<f64> = signals.iter().map(|s| s.constraint_sigma()).collect();
        let mut fixed: Vec<bool> = signals.iter().map(|s| s.fixed).collect();

        for syst in systematics {
            for k in 0..syst.npars() {
                if syst.npars() == 1 {
                    param_names.push(syst.name.clone());
                } else {
                    param_names.push(format!("{}_{}", syst.name, k));
                }
            }
            means.extend_from_slice(&syst.means);
            sigmas.extend_from_slice(&syst.sigmas);
            fixed.extend(std::iter::repeat(syst.fixed).take(syst.npars()));
        }

        for signal in &signals {
            if let Some(&max_slot) = signal.par_slots.last() {
                if max_slot >= nslots {
                    return Err(McmcError::InvalidParameter(format!(
                        "signal '{}' reads systematic slot {} but only {} exist",
                        signal.name, max_slot, nslots
                    )));
                }
            }
        }
        if !means.iter().all(|v| v.is_finite()) {
            return Err(McmcError::InvalidParameter(
                "non-finite parameter central values".to_string(),
            ));
        }

        Ok(Self {
            signals,
            param_names,
            means,
            sigmas,
            fixed,
            nsignals,
            backend: Backend::default(),
        })
    }

    /// Select the execution backend for the per-step event reductions.
    pub fn with_backend(mut self, backend: Backend) -> Self {
        self.backend = backend;
        self
    }

    /// Parameter names in vector order: signal names, then systematic slots.
    pub fn param_names(&self) -> &[String] {
        &self.param_names
    }

    /// Total number of parameters in the walk vector.
    pub fn nparameters(&self) -> usize {
        self.means.len()
    }

    /// Perform the walk with a seed drawn from the thread RNG.
    pub fn run(&self, data: ArrayView2<'_, f32>, config: &RunConfig) -> Result<Chain> {
        self.run_seeded(data, config, rand::thread_rng().gen())
    }

    /// Perform the walk with an explicit seed. Identical seeds and configs
    /// give identical chains, regardless of `sync_interval` batching.
    pub fn run_seeded(
        &self,
        data: ArrayView2<'_, f32>,
        config: &RunConfig,
        seed: u64,
    ) -> Result<Chain> {
        self.run_with_progress(data, config, seed, None::<fn(&ProgressInfo) -> bool>)
    }

    /// Perform the walk, invoking `progress` after every completed step.
    pub fn run_with_progress<F>(
        &self,
        data: ArrayView2<'_, f32>,
        config: &RunConfig,
        seed: u64,
        mut progress: Option<F>,
    ) -> Result<Chain>
    where
        F: FnMut(&ProgressInfo) -> bool,
    {
        let nsignals = self.nsignals;
        let nevents = data.nrows();
        let nburn = (config.burnin_fraction * config.nsteps as f64) as usize;
        let sync_interval = if config.sync_interval == 0 {
            config.nsteps.max(1)
        } else {
            config.sync_interval
        };

        let steps = self.step_distributions(config.step_scale)?;
        let mut rng = StdRng::seed_from_u64(seed);

        let evaluator = NllEvaluator::new(
            nsignals,
            self.means.clone(),
            self.sigmas.clone(),
            self.backend,
        );

        // Initial state: all parameters at their central values.
        let mut current = self.means.clone();
        let mut lut = Array2::<f32>::zeros((nevents, nsignals));
        for (j, signal) in self.signals.iter().enumerate() {
            let (column, _) = signal.pdf.evaluate(&current[nsignals..], data)?;
            for (i, &d) in column.iter().enumerate() {
                lut[[i, j]] = d as f32;
            }
        }
        let mut nll_current = evaluator.evaluate(lut.view(), &current);

        log::info!(
            "starting walk: {} steps, {} events, {} parameters, initial NLL {:.3}",
            config.nsteps,
            nevents,
            self.nparameters(),
            nll_current
        );

        let mut chain = Chain::new(self.param_names.clone());
        let mut buffer: Vec<(Array1<f64>, f64)> = Vec::with_capacity(sync_interval);
        let mut naccepted: usize = 0;

        for step in 0..config.nsteps {
            let proposal = propose_step(&mut rng, &current, &steps)?;

            // Refresh lookup columns only for signals whose systematic
            // parameters moved; the rest keep their cached columns.
            let mut refreshed: Vec<(usize, Vec<f32>)> = Vec::new();
            for (j, signal) in self.signals.iter().enumerate() {
                let moved = signal
                    .par_slots
                    .iter()
                    .any(|&s| proposal[nsignals + s] != current[nsignals + s]);
                if moved {
                    // The in-range norm is intentionally unused: the
                    // efficiency stays frozen at the systematic means (see
                    // [`Signal`]), so only the densities change here.
                    let (column, _) = signal.pdf.evaluate(&proposal[nsignals..], data)?;
                    let old: Vec<f32> = lut.column(j).to_vec();
                    for (i, &d) in column.iter().enumerate() {
                        lut[[i, j]] = d as f32;
                    }
                    refreshed.push((j, old));
                }
            }

            let nll_proposed = evaluator.evaluate(lut.view(), &proposal);
            let accept = rng.gen::<f64>() < acceptance_probability(nll_current, nll_proposed);

            let record = step >= nburn;
            if record && config.debug_mode {
                buffer.push((Array1::from(proposal.clone()), nll_proposed));
            }

            if accept {
                current = proposal;
                nll_current = nll_proposed;
                naccepted += 1;
            } else {
                // Rejected: restore the refreshed columns
                for (j, old) in refreshed {
                    for (i, &d) in old.iter().enumerate() {
                        lut[[i, j]] = d;
                    }
                }
            }

            if record && !config.debug_mode {
                buffer.push((Array1::from(current.clone()), nll_current));
            }

            if (step + 1) % sync_interval == 0 {
                chain.extend(buffer.drain(..));
            }

            if let Some(ref mut callback) = progress {
                let info = ProgressInfo {
                    step,
                    total: config.nsteps,
                    acceptance_rate: naccepted as f64 / (step + 1) as f64,
                    nll: nll_current,
                };
                if !callback(&info) {
                    log::info!("walk cancelled after step {}", step);
                    break;
                }
            }
        }

        chain.extend(buffer.drain(..));
        log::info!(
            "walk finished: {} samples recorded, acceptance rate {:.3}",
            chain.len(),
            naccepted as f64 / config.nsteps.max(1) as f64
        );
        Ok(chain)
    }

    /// Per-parameter proposal distributions: `None` for fixed parameters,
    /// otherwise a Gaussian of width `step_scale` times the parameter's
    /// constraint sigma (or the square root of its scale when
    /// unconstrained).
    fn step_distributions(&self, step_scale: f64) -> Result<Vec<Option<Normal<f64>>>> {
        if !(step_scale > 0.0 && step_scale.is_finite()) {
            return Err(McmcError::InvalidParameter(format!(
                "step scale must be positive and finite, got {}",
                step_scale
            )));
        }
        self.means
            .iter()
            .zip(self.sigmas.iter())
            .zip(self.fixed.iter())
            .map(|((&mean, &sigma), &fixed)| {
                if fixed {
                    return Ok(None);
                }
                let scale = if sigma > 0.0 {
                    sigma
                } else {
                    mean.abs().max(1.0).sqrt()
                };
                Normal::new(0.0, step_scale * scale)
                    .map(Some)
                    .map_err(|e| {
                        McmcError::InvalidParameter(format!("bad proposal distribution: {}", e))
                    })
            })
            .collect()
    }
}
