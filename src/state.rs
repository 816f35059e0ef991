use std::{ops::Deref, rc::Rc};

use crate::math::{scalar_prods_of_diff, vector_dot};

/// One point in phase space together with the cached oracle output.
#[derive(Debug, Clone)]
pub struct InnerState {
    pub(crate) q: Box<[f64]>,
    pub(crate) p: Box<[f64]>,
    pub(crate) grad: Box<[f64]>,
    pub(crate) logp: f64,
    pub(crate) kinetic_energy: f64,
    pub(crate) idx_in_trajectory: i64,
}

impl InnerState {
    pub(crate) fn new(q: Box<[f64]>, p: Box<[f64]>, grad: Box<[f64]>, logp: f64, idx: i64) -> Self {
        let kinetic_energy = 0.5 * vector_dot(&p, &p);
        InnerState {
            q,
            p,
            grad,
            logp,
            kinetic_energy,
            idx_in_trajectory: idx,
        }
    }
}

/// An edge (or candidate) of a trajectory.
///
/// States are immutable once created and cheap to clone, so the same
/// point can be the left edge, the right edge and the draw of a tree
/// at the same time.
#[derive(Debug, Clone)]
pub struct State {
    inner: Rc<InnerState>,
}

impl Deref for State {
    type Target = InnerState;

    fn deref(&self) -> &Self::Target {
        self.inner.as_ref()
    }
}

impl From<InnerState> for State {
    fn from(inner: InnerState) -> Self {
        State {
            inner: Rc::new(inner),
        }
    }
}

impl State {
    pub fn position(&self) -> &[f64] {
        &self.q
    }

    pub fn momentum(&self) -> &[f64] {
        &self.p
    }

    pub fn gradient(&self) -> &[f64] {
        &self.grad
    }

    /// The log density of the target at this position.
    ///
    /// This is `-inf` if the oracle reported a domain violation.
    pub fn logp(&self) -> f64 {
        self.logp
    }

    pub fn index_in_trajectory(&self) -> i64 {
        self.idx_in_trajectory
    }

    /// `logp - |p|^2 / 2`, the log of the unnormalized joint density.
    pub fn joint_logp(&self) -> f64 {
        if self.is_domain_violation() {
            return f64::NEG_INFINITY;
        }
        self.logp - self.kinetic_energy
    }

    pub fn is_domain_violation(&self) -> bool {
        self.logp == f64::NEG_INFINITY
    }

    /// Check if the trajectory spanned by `self` and `other` makes a U-turn.
    ///
    /// The order of the arguments does not matter, the state with the
    /// smaller index in the trajectory is used as the left edge.
    pub fn is_turning(&self, other: &Self) -> bool {
        let (left, right) = if self.idx_in_trajectory <= other.idx_in_trajectory {
            (self, other)
        } else {
            (other, self)
        };
        !no_u_turn(&left.q, &right.q, &left.p, &right.p)
    }
}

/// True while the span from `x_minus` to `x_plus` is still expanding.
///
/// Both momenta must have a non-negative projection onto the displacement
/// `x_plus - x_minus`. NaN projections count as a U-turn.
pub fn no_u_turn(x_minus: &[f64], x_plus: &[f64], r_minus: &[f64], r_plus: &[f64]) -> bool {
    let (a, b) = scalar_prods_of_diff(x_plus, x_minus, r_minus, r_plus);
    (a >= 0.) & (b >= 0.)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn make_state(q: &[f64], p: &[f64], idx: i64) -> State {
        InnerState::new(q.into(), p.into(), vec![0.; q.len()].into(), 0., idx).into()
    }

    #[test]
    fn straight_line_is_not_turning() {
        let left = make_state(&[0., 0.], &[1., 1.], -3);
        let right = make_state(&[1., 1.], &[1., 0.5], 4);
        assert!(!left.is_turning(&right));
        assert!(!right.is_turning(&left));
    }

    #[test]
    fn reversed_momentum_is_turning() {
        let left = make_state(&[0., 0.], &[1., 1.], 0);
        let right = make_state(&[1., 1.], &[-1., -0.5], 2);
        assert!(left.is_turning(&right));
        assert!(right.is_turning(&left));
    }

    #[test]
    fn nan_counts_as_turning() {
        assert!(!no_u_turn(&[0.], &[f64::NAN], &[1.], &[1.]));
    }

    #[test]
    fn domain_violation_joint() {
        let state: State =
            InnerState::new([0.].into(), [1.].into(), [0.].into(), f64::NEG_INFINITY, 0).into();
        assert!(state.is_domain_violation());
        assert_eq!(state.joint_logp(), f64::NEG_INFINITY);

        let state = make_state(&[0.], &[2.], 0);
        assert_eq!(state.joint_logp(), -2.);
    }

    proptest! {
        #[test]
        fn criterion_symmetric_under_time_reversal(
            (xm, xp, rm, rp) in (1usize..8).prop_flat_map(|n| (
                prop::collection::vec(-10f64..10f64, n),
                prop::collection::vec(-10f64..10f64, n),
                prop::collection::vec(-10f64..10f64, n),
                prop::collection::vec(-10f64..10f64, n),
            ))
        ) {
            let neg_rm: Vec<f64> = rm.iter().map(|v| -v).collect();
            let neg_rp: Vec<f64> = rp.iter().map(|v| -v).collect();
            prop_assert_eq!(
                no_u_turn(&xm, &xp, &rm, &rp),
                no_u_turn(&xp, &xm, &neg_rp, &neg_rm)
            );

            let left = make_state(&xm, &rm, -1);
            let right = make_state(&xp, &rp, 1);
            prop_assert_eq!(left.is_turning(&right), right.is_turning(&left));
        }
    }
}
