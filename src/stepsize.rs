use crate::cpu_potential::{CpuLogpFunc, EuclideanPotential};
use crate::nuts::{NutsError, Result};
use crate::state::State;

/// Settings for step size adaptation
#[derive(Debug, Clone, Copy)]
pub struct DualAverageSettings {
    /// The acceptance statistic the step size is tuned towards.
    pub target_accept: f64,
    pub k: f64,
    pub t0: f64,
    pub gamma: f64,
}

impl Default for DualAverageSettings {
    fn default() -> DualAverageSettings {
        DualAverageSettings {
            target_accept: 0.6,
            k: 0.75,
            t0: 10.,
            gamma: 0.05,
        }
    }
}

impl DualAverageSettings {
    /// Reject constants that would make the step size non-finite or zero.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(NutsError::InvalidSettings(msg));
        if !(self.target_accept > 0. && self.target_accept < 1.) {
            return invalid(format!(
                "target_accept must be in (0, 1), got {}",
                self.target_accept
            ));
        }
        if !(self.gamma.is_finite() && self.gamma > 0.) {
            return invalid(format!("gamma must be positive and finite, got {}", self.gamma));
        }
        if !(self.t0.is_finite() && self.t0 >= 0.) {
            return invalid(format!("t0 must be non-negative and finite, got {}", self.t0));
        }
        if !self.k.is_finite() {
            return invalid(format!("k must be finite, got {}", self.k));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct DualAverage {
    log_step: f64,
    log_step_adapted: f64,
    hbar: f64,
    mu: f64,
    count: u64,
    settings: DualAverageSettings,
}

impl DualAverage {
    pub fn new(settings: DualAverageSettings, initial_step: f64) -> DualAverage {
        DualAverage {
            log_step: initial_step.ln(),
            log_step_adapted: 0.,
            hbar: 0.,
            mu: (10. * initial_step).ln(),
            count: 0,
            settings,
        }
    }

    /// Feed the acceptance statistic of one draw.
    pub fn advance(&mut self, accept_stat: f64) {
        self.count += 1;
        let count = self.count as f64;
        let w = 1. / (count + self.settings.t0);
        self.hbar = (1. - w) * self.hbar + w * (self.settings.target_accept - accept_stat);
        self.log_step = self.mu - self.hbar * count.sqrt() / self.settings.gamma;
        let mk = count.powf(-self.settings.k);
        self.log_step_adapted = mk * self.log_step + (1. - mk) * self.log_step_adapted;
    }

    pub fn current_step_size(&self) -> f64 {
        self.log_step.exp()
    }

    pub fn current_step_size_adapted(&self) -> f64 {
        self.log_step_adapted.exp()
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn hbar(&self) -> f64 {
        self.hbar
    }

    pub fn mu(&self) -> f64 {
        self.mu
    }

    pub fn settings(&self) -> &DualAverageSettings {
        &self.settings
    }

    pub fn reset(&mut self, initial_step: f64, bias_factor: f64) {
        self.log_step = initial_step.ln();
        self.log_step_adapted = 0.;
        self.hbar = 0f64;
        self.mu = (bias_factor * initial_step).ln();
        self.count = 0;
    }
}

/// Search for a step size where a single leapfrog step has an
/// acceptance probability of about one half.
///
/// Starting at `1`, the step size is doubled while the acceptance
/// probability stays above `0.5`, or halved while it stays below.
pub fn find_initial_step_size<F, R>(
    potential: &mut EuclideanPotential<F>,
    state: &State,
    max_iterations: u64,
    rng: &mut R,
) -> Result<f64>
where
    F: CpuLogpFunc,
    R: rand::Rng + ?Sized,
{
    let start = potential.randomize_momentum(state, rng);
    let start = potential.leapfrog(&start, 0.)?;
    if start.is_domain_violation() {
        return Err(NutsError::BadInitGrad());
    }
    let initial_joint = start.joint_logp();

    let accept_prob = |end: &State| {
        let prob = (end.joint_logp() - initial_joint).exp();
        if prob.is_nan() {
            0.
        } else {
            prob
        }
    };

    let mut step_size = 1f64;
    let mut prob = accept_prob(&potential.leapfrog(&start, step_size)?);
    // Grow while steps are accepted too often, shrink otherwise.
    let grow = prob > 0.5;
    let still_crossing = |prob: f64| if grow { prob > 0.5 } else { prob < 0.5 };

    let mut iterations = 0u64;
    while still_crossing(prob) {
        if iterations >= max_iterations {
            return Err(NutsError::StepSizeSearch {
                iterations,
                step_size,
            });
        }
        iterations += 1;
        step_size = if grow { step_size * 2. } else { step_size / 2. };
        if !step_size.is_finite() || step_size == 0. {
            return Err(NutsError::StepSizeSearch {
                iterations,
                step_size,
            });
        }
        prob = accept_prob(&potential.leapfrog(&start, step_size)?);
    }

    log::debug!(
        "Initial step size {} after {} iterations (acceptance probability {})",
        step_size,
        iterations,
        prob
    );
    Ok(step_size)
}
