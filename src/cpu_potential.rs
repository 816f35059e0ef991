use std::fmt::Debug;

use rand_distr::{Distribution, StandardNormal};

use crate::math::{all_finite, axpy, axpy_out};
use crate::nuts::{LogpError, NutsError, Result};
use crate::state::{InnerState, State};

/// The oracle: an unnormalized log density and its gradient.
pub trait CpuLogpFunc {
    type LogpError: Debug + LogpError;

    /// Compute the log density at `position` and write its gradient to `grad`.
    ///
    /// Points outside of the support may return `-inf`, a non-finite
    /// gradient or a recoverable error. All of those are treated as a
    /// domain violation.
    fn logp(&mut self, position: &[f64], grad: &mut [f64]) -> std::result::Result<f64, Self::LogpError>;
    fn dim(&self) -> usize;
}

/// Hamiltonian with an identity mass matrix around a user supplied density.
pub struct EuclideanPotential<F: CpuLogpFunc> {
    logp: F,
    num_evaluations: u64,
}

impl<F: CpuLogpFunc> EuclideanPotential<F> {
    pub fn new(logp: F) -> Self {
        EuclideanPotential {
            logp,
            num_evaluations: 0,
        }
    }

    pub fn dim(&self) -> usize {
        self.logp.dim()
    }

    /// Total number of oracle calls made so far.
    pub fn num_evaluations(&self) -> u64 {
        self.num_evaluations
    }

    pub fn logp_func(&self) -> &F {
        &self.logp
    }

    pub fn into_inner(self) -> F {
        self.logp
    }

    /// Call the oracle and classify its result.
    ///
    /// Domain violations come back as `-inf` with a zeroed gradient.
    fn update_potential_gradient(&mut self, position: &[f64], grad: &mut [f64]) -> Result<f64> {
        self.num_evaluations += 1;
        let logp = match self.logp.logp(position, grad) {
            Ok(logp) => logp,
            Err(err) if err.is_recoverable() => f64::NEG_INFINITY,
            Err(err) => return Err(NutsError::LogpFailure(Box::new(err))),
        };
        if logp.is_finite() && all_finite(grad) {
            Ok(logp)
        } else {
            grad.fill(0.);
            Ok(f64::NEG_INFINITY)
        }
    }

    /// Evaluate the density at a new position.
    ///
    /// The momentum of the returned state is zero.
    pub fn init_state(&mut self, position: &[f64]) -> Result<State> {
        let dim = self.dim();
        if position.len() != dim {
            return Err(NutsError::DimensionMismatch {
                expected: dim,
                found: position.len(),
            });
        }
        let mut grad = vec![0f64; dim].into_boxed_slice();
        let logp = self.update_potential_gradient(position, &mut grad)?;
        if logp == f64::NEG_INFINITY {
            return Err(NutsError::BadInitGrad());
        }
        Ok(InnerState::new(position.into(), vec![0f64; dim].into(), grad, logp, 0).into())
    }

    /// Return a copy of `state` with a fresh standard normal momentum.
    ///
    /// The copy is the first point of a new trajectory.
    pub fn randomize_momentum<R: rand::Rng + ?Sized>(&self, state: &State, rng: &mut R) -> State {
        let p: Box<[f64]> = (0..state.q.len())
            .map(|_| StandardNormal.sample(rng))
            .collect();
        InnerState::new(state.q.clone(), p, state.grad.clone(), state.logp, 0).into()
    }

    /// One leapfrog step of signed size `epsilon`.
    ///
    /// Half step in momentum, full step in position, one oracle call,
    /// then the second half step in momentum with the new gradient.
    pub fn leapfrog(&mut self, start: &State, epsilon: f64) -> Result<State> {
        let dim = start.q.len();

        let mut p = start.p.clone();
        axpy(&start.grad, &mut p, epsilon / 2.);

        let mut q = vec![0f64; dim].into_boxed_slice();
        axpy_out(&p, &start.q, epsilon, &mut q);

        let mut grad = vec![0f64; dim].into_boxed_slice();
        let logp = self.update_potential_gradient(&q, &mut grad)?;

        axpy(&grad, &mut p, epsilon / 2.);

        let step = if epsilon > 0. {
            1
        } else if epsilon < 0. {
            -1
        } else {
            0
        };

        Ok(InnerState::new(q, p, grad, logp, start.idx_in_trajectory + step).into())
    }
}
