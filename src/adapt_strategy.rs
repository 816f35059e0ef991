use crate::cpu_potential::{CpuLogpFunc, EuclideanPotential};
use crate::nuts::{draw, NutsError, NutsOptions, Result, SampleInfo};
use crate::state::State;
use crate::stepsize::{DualAverage, DualAverageSettings};

/// Step size statistics after a draw
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepSizeStats {
    /// The step size the next draw will use.
    pub step_size: f64,
    /// The averaged step size. Only meaningful once adaptation has started.
    pub step_size_bar: f64,
    pub hbar: f64,
    pub mu: f64,
    pub adapt_count: u64,
}

/// Per-chain step size state that wraps the NUTS transition.
///
/// While tuning, the step size follows the dual averaging iterate and the
/// averaged step size is updated after every draw. Once tuning stops, every
/// draw uses the averaged step size, or the initial step size if tuning never
/// ran.
#[derive(Debug, Clone)]
pub struct StepSizeTune {
    dual_average: DualAverage,
    initial_step_size: f64,
    /// Set on the first tuning draw and never cleared.
    adapt_started: bool,
    last_draw_tuning: bool,
    last_accept_sum: f64,
    last_accept_count: u64,
}

impl StepSizeTune {
    pub fn new(settings: DualAverageSettings, initial_step_size: f64) -> Result<Self> {
        settings.validate()?;
        if !(initial_step_size.is_finite() && initial_step_size > 0.) {
            return Err(NutsError::InvalidSettings(format!(
                "initial step size must be positive and finite, got {}",
                initial_step_size
            )));
        }
        Ok(StepSizeTune {
            dual_average: DualAverage::new(settings, initial_step_size),
            initial_step_size,
            adapt_started: false,
            last_draw_tuning: false,
            last_accept_sum: 0.,
            last_accept_count: 0,
        })
    }

    /// Run one transition from `state`, tuning the step size if `tuning` is set.
    pub fn draw<F, R>(
        &mut self,
        potential: &mut EuclideanPotential<F>,
        state: &State,
        tuning: bool,
        options: &NutsOptions,
        rng: &mut R,
    ) -> Result<(State, SampleInfo)>
    where
        F: CpuLogpFunc,
        R: rand::Rng + ?Sized,
    {
        if !tuning {
            if self.last_draw_tuning {
                log::info!(
                    "Step size adaptation finished after {} draws, using step size {}",
                    self.dual_average.count(),
                    self.frozen_step_size()
                );
            }
            self.last_draw_tuning = false;
            let (state, info) = draw(potential, state, self.frozen_step_size(), options, rng)?;
            self.record_accept(&info);
            return Ok((state, info));
        }

        if !self.adapt_started {
            self.adapt_started = true;
            self.dual_average.reset(self.initial_step_size, 10.);
        }
        self.last_draw_tuning = true;

        let step_size = self.dual_average.current_step_size();
        let (state, info) = draw(potential, state, step_size, options, rng)?;
        self.record_accept(&info);
        self.dual_average.advance(info.mean_tree_accept());
        Ok((state, info))
    }

    fn record_accept(&mut self, info: &SampleInfo) {
        self.last_accept_sum = info.accept_sum;
        self.last_accept_count = info.accept_count;
    }

    /// The step size used by draws that do not tune.
    pub fn frozen_step_size(&self) -> f64 {
        if self.dual_average.count() > 0 {
            self.dual_average.current_step_size_adapted()
        } else {
            self.initial_step_size
        }
    }

    /// The step size of the next draw, depending on whether it tunes.
    pub fn step_size(&self, tuning: bool) -> f64 {
        if !tuning {
            return self.frozen_step_size();
        }
        if self.adapt_started {
            self.dual_average.current_step_size()
        } else {
            self.initial_step_size
        }
    }

    pub fn initial_step_size(&self) -> f64 {
        self.initial_step_size
    }

    pub fn adapt_started(&self) -> bool {
        self.adapt_started
    }

    pub fn target_accept(&self) -> f64 {
        self.dual_average.settings().target_accept
    }

    /// The acceptance statistic sum and count of the most recent draw.
    pub fn last_accept(&self) -> (f64, u64) {
        (self.last_accept_sum, self.last_accept_count)
    }

    pub fn stats(&self) -> StepSizeStats {
        StepSizeStats {
            step_size: self.dual_average.current_step_size(),
            step_size_bar: self.dual_average.current_step_size_adapted(),
            hbar: self.dual_average.hbar(),
            mu: self.dual_average.mu(),
            adapt_count: self.dual_average.count(),
        }
    }
}
