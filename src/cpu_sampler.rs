use rand::Rng;

use crate::{
    adapt_strategy::StepSizeTune,
    cpu_potential::{CpuLogpFunc, EuclideanPotential},
    nuts::{NutsError, NutsOptions, Result},
    sampler_stats::NutsSampleStats,
    state::State,
    stepsize::{find_initial_step_size, DualAverageSettings},
};

/// Settings for a single chain.
#[derive(Debug, Clone, Copy)]
pub struct SamplerArgs {
    /// The number of initial draws that tune the step size.
    pub num_tune: u64,
    /// The maximum tree depth during sampling. The number of leapfrog steps
    /// is smaller than 2 ^ maxdepth.
    pub maxdepth: u64,
    /// If the joint log density of a leapfrog step falls this far below the
    /// slice threshold, the step is treated as a divergence.
    pub max_energy_error: f64,
    /// Iteration limit for the initial step size search.
    pub max_init_iterations: u64,
    /// Skip the initial step size search and start from this value.
    pub initial_step_size: Option<f64>,
    /// Settings for step size adaptation.
    pub step_size_adapt: DualAverageSettings,
}

impl Default for SamplerArgs {
    fn default() -> Self {
        Self {
            num_tune: 1000,
            maxdepth: 10,
            max_energy_error: 1000f64,
            max_init_iterations: 100,
            initial_step_size: None,
            step_size_adapt: DualAverageSettings::default(),
        }
    }
}

impl SamplerArgs {
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(NutsError::InvalidSettings(msg));
        if self.maxdepth == 0 {
            return invalid("maxdepth must be at least 1".to_string());
        }
        if !(self.max_energy_error > 0.) {
            return invalid(format!(
                "max_energy_error must be positive, got {}",
                self.max_energy_error
            ));
        }
        if let Some(step_size) = self.initial_step_size {
            if !(step_size.is_finite() && step_size > 0.) {
                return invalid(format!(
                    "initial_step_size must be positive and finite, got {}",
                    step_size
                ));
            }
        }
        self.step_size_adapt.validate()?;
        if self.maxdepth > 30 {
            log::warn!(
                "maxdepth {} allows more than 2^30 leapfrog steps per draw",
                self.maxdepth
            );
        }
        Ok(())
    }

    fn nuts_options(&self) -> NutsOptions {
        NutsOptions {
            maxdepth: self.maxdepth,
            max_energy_error: self.max_energy_error,
        }
    }
}

/// One Markov chain.
pub trait Chain {
    type LogpFunc: CpuLogpFunc;

    /// Initialize the chain at a new position.
    fn set_position(&mut self, position: &[f64]) -> Result<()>;

    /// Make one draw and return the new position and some diagnostics.
    fn draw<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Result<(Box<[f64]>, NutsSampleStats)>;

    /// The dimensionality of the posterior.
    fn dim(&self) -> usize;
}

pub struct NutsChain<F: CpuLogpFunc> {
    potential: EuclideanPotential<F>,
    state: Option<State>,
    tune: Option<StepSizeTune>,
    args: SamplerArgs,
    options: NutsOptions,
    draw_count: u64,
}

/// Create a new sampler for one chain.
pub fn new_sampler<F: CpuLogpFunc>(logp: F, args: SamplerArgs) -> Result<NutsChain<F>> {
    args.validate()?;
    Ok(NutsChain {
        potential: EuclideanPotential::new(logp),
        state: None,
        tune: None,
        options: args.nuts_options(),
        args,
        draw_count: 0,
    })
}

impl<F: CpuLogpFunc> NutsChain<F> {
    /// The step size state, available after the first draw.
    pub fn tune(&self) -> Option<&StepSizeTune> {
        self.tune.as_ref()
    }

    pub fn potential(&self) -> &EuclideanPotential<F> {
        &self.potential
    }

    pub fn draw_count(&self) -> u64 {
        self.draw_count
    }

    /// Return the step size state, running the initial step size search
    /// on the first call.
    fn ensure_tune<'a, R: Rng + ?Sized>(
        slot: &'a mut Option<StepSizeTune>,
        potential: &mut EuclideanPotential<F>,
        args: &SamplerArgs,
        state: &State,
        rng: &mut R,
    ) -> Result<&'a mut StepSizeTune> {
        let tune = match slot.take() {
            Some(tune) => tune,
            None => {
                let step_size = match args.initial_step_size {
                    Some(step_size) => step_size,
                    None => {
                        find_initial_step_size(potential, state, args.max_init_iterations, rng)?
                    }
                };
                StepSizeTune::new(args.step_size_adapt, step_size)?
            }
        };
        Ok(slot.insert(tune))
    }
}

impl<F: CpuLogpFunc> Chain for NutsChain<F> {
    type LogpFunc = F;

    fn set_position(&mut self, position: &[f64]) -> Result<()> {
        let state = self.potential.init_state(position)?;
        self.state = Some(state);
        Ok(())
    }

    fn draw<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Result<(Box<[f64]>, NutsSampleStats)> {
        let state = self.state.take().ok_or(NutsError::MissingPosition())?;
        let tune = match Self::ensure_tune(
            &mut self.tune,
            &mut self.potential,
            &self.args,
            &state,
            rng,
        ) {
            Ok(tune) => tune,
            Err(err) => {
                self.state = Some(state);
                return Err(err);
            }
        };

        let tuning = self.draw_count < self.args.num_tune;
        let (new_state, info) =
            match tune.draw(&mut self.potential, &state, tuning, &self.options, rng) {
                Ok(val) => val,
                Err(err) => {
                    self.state = Some(state);
                    return Err(err);
                }
            };

        let stats = NutsSampleStats {
            draw: self.draw_count,
            tuning,
            depth: info.depth,
            maxdepth_reached: info.reached_maxdepth,
            n_steps: info.n_steps,
            divergences: info.divergences,
            logp: new_state.logp(),
            mean_tree_accept: info.mean_tree_accept(),
            step_size: info.step_size,
            step_size_bar: tune.frozen_step_size(),
        };
        let position: Box<[f64]> = new_state.position().into();
        self.state = Some(new_state);
        self.draw_count += 1;
        Ok((position, stats))
    }

    fn dim(&self) -> usize {
        self.potential.dim()
    }
}

pub mod test_logps {
    use crate::{cpu_potential::CpuLogpFunc, nuts::LogpError};
    use thiserror::Error;

    #[derive(Debug, Error)]
    pub enum TestLogpError {
        #[error("position outside of the support")]
        OutOfSupport,
        #[error("logp evaluation failed")]
        Fatal,
    }

    impl LogpError for TestLogpError {
        fn is_recoverable(&self) -> bool {
            matches!(self, TestLogpError::OutOfSupport)
        }
    }

    /// Independent normal distributions with a shared mean and unit variance.
    pub struct NormalLogp {
        dim: usize,
        mu: f64,
    }

    impl NormalLogp {
        pub fn new(dim: usize, mu: f64) -> NormalLogp {
            NormalLogp { dim, mu }
        }
    }

    impl CpuLogpFunc for NormalLogp {
        type LogpError = TestLogpError;

        fn dim(&self) -> usize {
            self.dim
        }

        fn logp(&mut self, position: &[f64], gradient: &mut [f64]) -> Result<f64, TestLogpError> {
            let n = position.len();
            assert!(gradient.len() == n);

            let mut logp = 0f64;
            for (p, g) in position.iter().zip(gradient.iter_mut()) {
                let val = *p - self.mu;
                logp -= val * val / 2.;
                *g = -val;
            }
            Ok(logp)
        }
    }

    /// The improper uniform density on the whole space.
    pub struct FlatLogp {
        dim: usize,
    }

    impl FlatLogp {
        pub fn new(dim: usize) -> FlatLogp {
            FlatLogp { dim }
        }
    }

    impl CpuLogpFunc for FlatLogp {
        type LogpError = TestLogpError;

        fn dim(&self) -> usize {
            self.dim
        }

        fn logp(&mut self, _position: &[f64], gradient: &mut [f64]) -> Result<f64, TestLogpError> {
            gradient.fill(0.);
            Ok(0.)
        }
    }

    /// A standard exponential distribution in one dimension.
    ///
    /// Negative positions are a recoverable error, positions below
    /// `fatal_below` are an unrecoverable one.
    pub struct SupportLogp {
        fatal_below: f64,
    }

    impl SupportLogp {
        pub fn new(fatal_below: f64) -> SupportLogp {
            SupportLogp { fatal_below }
        }
    }

    impl CpuLogpFunc for SupportLogp {
        type LogpError = TestLogpError;

        fn dim(&self) -> usize {
            1
        }

        fn logp(&mut self, position: &[f64], gradient: &mut [f64]) -> Result<f64, TestLogpError> {
            let x = position[0];
            if x < self.fatal_below {
                return Err(TestLogpError::Fatal);
            }
            if x <= 0. {
                return Err(TestLogpError::OutOfSupport);
            }
            gradient[0] = -1.;
            Ok(-x)
        }
    }
}
