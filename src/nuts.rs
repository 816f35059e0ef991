use rand::distr::Open01;
use rand_distr::{Distribution, StandardUniform};
use thiserror::Error;

use crate::cpu_potential::{CpuLogpFunc, EuclideanPotential};
use crate::state::State;

#[non_exhaustive]
#[derive(Error, Debug)]
pub enum NutsError {
    #[error("Logp function returned unrecoverable error")]
    LogpFailure(Box<dyn std::error::Error + Send + Sync>),

    #[error("Could not compute a finite logp and gradient at the initial position")]
    BadInitGrad(),

    #[error("Position has length {found}, but the density has dimension {expected}")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("Initial step size search stopped after {iterations} iterations at step size {step_size}")]
    StepSizeSearch { iterations: u64, step_size: f64 },

    #[error("No initial position was set")]
    MissingPosition(),

    #[error("Invalid sampler settings: {0}")]
    InvalidSettings(String),
}

pub type Result<T> = std::result::Result<T, NutsError>;

/// Errors that happen when we evaluate the logp and gradient function
pub trait LogpError: std::error::Error + Send + Sync + 'static {
    /// Unrecoverable errors during logp computation stop sampling,
    /// recoverable errors are seen as divergences.
    fn is_recoverable(&self) -> bool;
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

impl Direction {
    pub fn sign(self) -> f64 {
        match self {
            Direction::Forward => 1.,
            Direction::Backward => -1.,
        }
    }
}

impl Distribution<Direction> for StandardUniform {
    fn sample<R: rand::Rng + ?Sized>(&self, rng: &mut R) -> Direction {
        if rng.random::<bool>() {
            Direction::Forward
        } else {
            Direction::Backward
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct NutsOptions {
    /// Maximum number of trajectory doublings per draw.
    pub maxdepth: u64,
    /// A leaf is diverging if its joint log density falls this far below
    /// the slice threshold.
    pub max_energy_error: f64,
}

impl Default for NutsOptions {
    fn default() -> Self {
        NutsOptions {
            maxdepth: 10,
            max_energy_error: 1000.,
        }
    }
}

/// Information about a draw, exported as part of the sampler stats
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleInfo {
    /// The number of doublings of the final trajectory
    pub depth: u64,

    /// Whether the trajectory was terminated because it reached
    /// the maximum tree depth.
    pub reached_maxdepth: bool,

    /// Number of leapfrog steps, each with one logp evaluation.
    pub n_steps: u64,

    /// Number of leapfrog steps that tripped the divergence guard.
    pub divergences: u64,

    /// The step size used for this draw
    pub step_size: f64,

    /// Sum and count of the acceptance statistic over the whole trajectory.
    pub accept_sum: f64,
    pub accept_count: u64,

    /// Sum and count of the acceptance statistic of the last doubling only.
    pub last_accept_sum: f64,
    pub last_accept_count: u64,
}

impl SampleInfo {
    /// Mean acceptance statistic over all leapfrog steps of the trajectory.
    pub fn mean_tree_accept(&self) -> f64 {
        if self.accept_count == 0 {
            return 0.;
        }
        self.accept_sum / self.accept_count as f64
    }

    pub fn diverging(&self) -> bool {
        self.divergences > 0
    }
}

/// Values that are fixed for all subtrees of one trajectory.
struct TrajectoryContext {
    /// The slice threshold `log(u)` with `u ~ U(0, p(x0, r0))`.
    log_slice: f64,
    /// Joint log density at the start of the trajectory.
    initial_joint: f64,
    step_size: f64,
    max_energy_error: f64,
}

/// A balanced part of the trajectory with `2^depth` leapfrog steps.
#[derive(Debug)]
struct NutsTree {
    /// The left edge always has the smaller index_in_trajectory.
    left: State,
    right: State,

    /// A point drawn uniformly from the valid points of the tree.
    draw: State,
    n_valid: u64,
    keep_going: bool,
    accept_sum: f64,
    accept_count: u64,
    divergences: u64,
}

impl NutsTree {
    /// Build a subtree of `2^depth` steps starting after `edge`.
    fn build<F, R>(
        potential: &mut EuclideanPotential<F>,
        edge: &State,
        direction: Direction,
        depth: u64,
        ctx: &TrajectoryContext,
        rng: &mut R,
    ) -> Result<NutsTree>
    where
        F: CpuLogpFunc,
        R: rand::Rng + ?Sized,
    {
        if depth == 0 {
            return Self::single_step(potential, edge, direction, ctx);
        }

        let mut tree = Self::build(potential, edge, direction, depth - 1, ctx, rng)?;
        if !tree.keep_going {
            return Ok(tree);
        }

        let far_edge = match direction {
            Direction::Forward => tree.right.clone(),
            Direction::Backward => tree.left.clone(),
        };
        let other = Self::build(potential, &far_edge, direction, depth - 1, ctx, rng)?;
        tree.merge_into(other, direction, rng);
        Ok(tree)
    }

    fn single_step<F: CpuLogpFunc>(
        potential: &mut EuclideanPotential<F>,
        edge: &State,
        direction: Direction,
        ctx: &TrajectoryContext,
    ) -> Result<NutsTree> {
        let end = potential.leapfrog(edge, direction.sign() * ctx.step_size)?;

        let joint = end.joint_logp();
        let n_valid = (ctx.log_slice < joint) as u64;
        let keep_going = ctx.log_slice < joint + ctx.max_energy_error;
        let accept = (joint - ctx.initial_joint).exp();
        let accept = if accept.is_nan() { 0. } else { accept.min(1.) };

        if !keep_going {
            log::debug!(
                "Divergent leapfrog step at index {} (joint logp {})",
                end.index_in_trajectory(),
                joint
            );
        }

        Ok(NutsTree {
            left: end.clone(),
            right: end.clone(),
            draw: end,
            n_valid,
            keep_going,
            accept_sum: accept,
            accept_count: 1,
            divergences: (!keep_going) as u64,
        })
    }

    /// Append `other`, which was built starting at our far edge.
    fn merge_into<R: rand::Rng + ?Sized>(
        &mut self,
        other: NutsTree,
        direction: Direction,
        rng: &mut R,
    ) {
        match direction {
            Direction::Forward => self.right = other.right,
            Direction::Backward => self.left = other.left,
        }

        let n_valid = self.n_valid + other.n_valid;
        if other.n_valid > 0 && rng.random_bool(other.n_valid as f64 / n_valid as f64) {
            self.draw = other.draw;
        }

        self.n_valid = n_valid;
        self.accept_sum += other.accept_sum;
        self.accept_count += other.accept_count;
        self.divergences += other.divergences;
        self.keep_going = other.keep_going && !self.left.is_turning(&self.right);
    }
}

/// Run one NUTS transition starting at `init`.
///
/// Returns the new state. The momentum of `init` is ignored and redrawn.
pub fn draw<F, R>(
    potential: &mut EuclideanPotential<F>,
    init: &State,
    step_size: f64,
    options: &NutsOptions,
    rng: &mut R,
) -> Result<(State, SampleInfo)>
where
    F: CpuLogpFunc,
    R: rand::Rng + ?Sized,
{
    let start = potential.randomize_momentum(init, rng);
    let initial_joint = start.joint_logp();
    let uniform: f64 = rng.sample(Open01);
    let ctx = TrajectoryContext {
        log_slice: initial_joint + uniform.ln(),
        initial_joint,
        step_size,
        max_energy_error: options.max_energy_error,
    };

    let mut left = start.clone();
    let mut right = start.clone();
    let mut draw = start;
    let mut n_valid = 1u64;
    let mut depth = 0u64;
    let mut keep_going = true;

    let mut info = SampleInfo {
        depth: 0,
        reached_maxdepth: false,
        n_steps: 0,
        divergences: 0,
        step_size,
        accept_sum: 0.,
        accept_count: 0,
        last_accept_sum: 0.,
        last_accept_count: 0,
    };

    while keep_going && depth < options.maxdepth {
        let direction: Direction = rng.random();
        let edge = match direction {
            Direction::Forward => &right,
            Direction::Backward => &left,
        };
        let tree = NutsTree::build(potential, edge, direction, depth, &ctx, rng)?;

        let NutsTree {
            left: tree_left,
            right: tree_right,
            draw: tree_draw,
            n_valid: tree_n_valid,
            keep_going: tree_keep_going,
            accept_sum,
            accept_count,
            divergences,
        } = tree;

        match direction {
            Direction::Forward => right = tree_right,
            Direction::Backward => left = tree_left,
        }

        if tree_keep_going
            && tree_n_valid > 0
            && rng.random_bool((tree_n_valid as f64 / n_valid as f64).min(1.))
        {
            draw = tree_draw;
        }

        n_valid += tree_n_valid;
        depth += 1;

        info.n_steps += accept_count;
        info.divergences += divergences;
        info.accept_sum += accept_sum;
        info.accept_count += accept_count;
        info.last_accept_sum = accept_sum;
        info.last_accept_count = accept_count;

        keep_going = tree_keep_going && !left.is_turning(&right);
    }

    info.depth = depth;
    info.reached_maxdepth = keep_going;
    if keep_going {
        log::debug!("Trajectory reached the maximum depth of {}", options.maxdepth);
    }

    Ok((draw, info))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu_sampler::test_logps::{NormalLogp, SupportLogp};
    use crate::state::InnerState;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn context(start: &State, log_slice: f64, step_size: f64) -> TrajectoryContext {
        TrajectoryContext {
            log_slice,
            initial_joint: start.joint_logp(),
            step_size,
            max_energy_error: 1000.,
        }
    }

    fn with_momentum(state: &State, p: &[f64]) -> State {
        InnerState::new(
            state.position().into(),
            p.into(),
            state.gradient().into(),
            state.logp(),
            0,
        )
        .into()
    }

    #[test]
    fn tree_uses_one_evaluation_per_leaf() {
        let mut potential = EuclideanPotential::new(NormalLogp::new(3, 0.));
        let init = potential.init_state(&[3., 3., 3.]).unwrap();
        let start = with_momentum(&init, &[-1., -1., -1.]);
        let ctx = context(&start, start.joint_logp() - 1., 0.01);
        let mut rng = ChaCha8Rng::seed_from_u64(0);

        let before = potential.num_evaluations();
        let tree =
            NutsTree::build(&mut potential, &start, Direction::Forward, 4, &ctx, &mut rng).unwrap();
        assert_eq!(potential.num_evaluations() - before, 16);
        assert!(tree.keep_going);
        assert_eq!(tree.n_valid, 16);
        assert_eq!(tree.accept_count, 16);
        assert_eq!(tree.divergences, 0);
        assert_eq!(tree.left.index_in_trajectory(), 1);
        assert_eq!(tree.right.index_in_trajectory(), 16);

        let tree =
            NutsTree::build(&mut potential, &start, Direction::Backward, 3, &ctx, &mut rng).unwrap();
        assert_eq!(tree.left.index_in_trajectory(), -8);
        assert_eq!(tree.right.index_in_trajectory(), -1);
    }

    #[test]
    fn divergence_stops_subtree() {
        let mut potential = EuclideanPotential::new(SupportLogp::new(f64::NEG_INFINITY));
        let init = potential.init_state(&[0.5]).unwrap();
        let start = with_momentum(&init, &[-1.]);
        let ctx = context(&start, start.joint_logp() - 0.5, 1.);
        let mut rng = ChaCha8Rng::seed_from_u64(0);

        // The first step already leaves the support.
        let tree =
            NutsTree::build(&mut potential, &start, Direction::Forward, 5, &ctx, &mut rng).unwrap();
        assert!(!tree.keep_going);
        assert_eq!(tree.n_valid, 0);
        assert_eq!(tree.divergences, 1);
        assert_eq!(tree.accept_sum, 0.);
        assert_eq!(potential.num_evaluations(), 2);
    }

    #[test]
    fn energy_error_threshold() {
        let mut potential = EuclideanPotential::new(NormalLogp::new(1, 0.));
        let init = potential.init_state(&[0.]).unwrap();
        let start = with_momentum(&init, &[1.]);
        // One step of size 2 ends at x = 2, p = -1 with joint logp -2.5.
        let mut ctx = TrajectoryContext {
            log_slice: start.joint_logp() - 0.1,
            initial_joint: start.joint_logp(),
            step_size: 2.,
            max_energy_error: 1.,
        };

        let tree = NutsTree::single_step(&mut potential, &start, Direction::Forward, &ctx).unwrap();
        assert!(tree.draw.joint_logp().is_finite());
        assert_eq!(tree.draw.joint_logp(), -2.5);
        assert!(!tree.keep_going);
        assert_eq!(tree.divergences, 1);
        assert_eq!(tree.n_valid, 0);

        ctx.max_energy_error = 1000.;
        let tree = NutsTree::single_step(&mut potential, &start, Direction::Forward, &ctx).unwrap();
        assert!(tree.keep_going);
        assert_eq!(tree.divergences, 0);
        assert_eq!(tree.n_valid, 0);
        assert_eq!(tree.accept_sum, (-2f64).exp());
    }

    #[test]
    fn draw_counts_divergences() {
        let mut potential = EuclideanPotential::new(SupportLogp::new(f64::NEG_INFINITY));
        let init = potential.init_state(&[0.05]).unwrap();
        let options = NutsOptions::default();
        let mut rng = ChaCha8Rng::seed_from_u64(42);

        let mut total = 0;
        let mut state = init;
        for _ in 0..50 {
            let (next, info) = draw(&mut potential, &state, 2., &options, &mut rng).unwrap();
            assert!(next.logp().is_finite());
            assert!(next.position()[0] > 0.);
            total += info.divergences;
            state = next;
        }
        assert!(total > 0);
    }

    #[test]
    fn draw_respects_maxdepth() {
        let mut potential = EuclideanPotential::new(NormalLogp::new(2, 0.));
        let init = potential.init_state(&[0.1, -0.2]).unwrap();
        let options = NutsOptions {
            maxdepth: 3,
            ..Default::default()
        };
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        // Tiny steps never turn within 2^3 leapfrogs.
        let (_, info) = draw(&mut potential, &init, 1e-4, &options, &mut rng).unwrap();
        assert!(info.reached_maxdepth);
        assert_eq!(info.depth, 3);
        assert_eq!(info.n_steps, 7);
        assert_eq!(info.accept_count, 7);
        assert_eq!(info.last_accept_count, 4);
        assert!(info.mean_tree_accept() > 0.99);
    }

    #[test]
    fn draw_is_deterministic() {
        let run = || {
            let mut potential = EuclideanPotential::new(NormalLogp::new(4, 1.));
            let mut state = potential.init_state(&[0., 0.5, 1., 2.]).unwrap();
            let mut rng = ChaCha8Rng::seed_from_u64(99);
            let mut infos = vec![];
            for _ in 0..20 {
                let (next, info) =
                    draw(&mut potential, &state, 0.4, &NutsOptions::default(), &mut rng).unwrap();
                state = next;
                infos.push(info);
            }
            (state.position().to_vec(), infos)
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn unrecoverable_error_aborts_draw() {
        let mut potential = EuclideanPotential::new(SupportLogp::new(-1.));
        let init = potential.init_state(&[0.5]).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let result = draw(&mut potential, &init, 50., &NutsOptions::default(), &mut rng);
        assert!(matches!(result, Err(NutsError::LogpFailure(_))));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn tree_count_bound(
            depth in 0u64..7,
            seed in any::<u64>(),
            step_size in 0.01f64..3.,
            slice_offset in 0f64..5.,
            forward in any::<bool>(),
        ) {
            let mut potential = EuclideanPotential::new(NormalLogp::new(2, 0.));
            let init = potential.init_state(&[0.3, -1.2]).unwrap();
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let start = potential.randomize_momentum(&init, &mut rng);
            let ctx = context(&start, start.joint_logp() - slice_offset, step_size);
            let direction = if forward { Direction::Forward } else { Direction::Backward };

            let tree = NutsTree::build(&mut potential, &start, direction, depth, &ctx, &mut rng).unwrap();
            prop_assert!(tree.n_valid <= 1 << depth);
            prop_assert!(tree.accept_count <= 1 << depth);
            prop_assert!(potential.num_evaluations() - 1 <= 1 << depth);
            prop_assert!(tree.left.index_in_trajectory() <= tree.right.index_in_trajectory());
            prop_assert!(tree.accept_sum <= tree.accept_count as f64);
        }
    }
}
