//! Sample from unnormalized densities with the No-U-Turn sampler.
//!
//! This crate implements the slice-variable variant of NUTS (Hoffman & Gelman,
//! 2014) with an identity mass matrix and dual averaging step size adaptation.
//! Users provide the log density and its gradient through [`CpuLogpFunc`] and
//! drive one chain at a time, passing their own random number generator to
//! every draw.
//!
//! ```
//! use nuts_slice::{new_sampler, Chain, CpuLogpFunc, LogpError, SamplerArgs};
//! use rand::SeedableRng;
//! use thiserror::Error;
//!
//! struct PosteriorDensity {}
//!
//! #[derive(Debug, Error)]
//! enum PosteriorLogpError {}
//!
//! impl LogpError for PosteriorLogpError {
//!     fn is_recoverable(&self) -> bool {
//!         false
//!     }
//! }
//!
//! impl CpuLogpFunc for PosteriorDensity {
//!     type LogpError = PosteriorLogpError;
//!
//!     fn dim(&self) -> usize {
//!         10
//!     }
//!
//!     fn logp(&mut self, position: &[f64], grad: &mut [f64]) -> Result<f64, Self::LogpError> {
//!         let mu = 3f64;
//!         let logp = position
//!             .iter()
//!             .zip(grad.iter_mut())
//!             .map(|(x, grad)| {
//!                 let diff = x - mu;
//!                 *grad = -diff;
//!                 -diff * diff / 2.
//!             })
//!             .sum();
//!         Ok(logp)
//!     }
//! }
//!
//! let args = SamplerArgs {
//!     num_tune: 500,
//!     ..Default::default()
//! };
//! let mut sampler = new_sampler(PosteriorDensity {}, args).expect("Invalid settings");
//! sampler.set_position(&[0f64; 10]).expect("Unrecoverable error during init");
//!
//! let mut rng = rand::rngs::StdRng::seed_from_u64(42);
//! let mut trace = vec![];
//! for _ in 0..1000 {
//!     let (draw, stats) = sampler.draw(&mut rng).expect("Unrecoverable error during sampling");
//!     if stats.diverging() {
//!         println!("Divergence in draw {}", stats.draw);
//!     }
//!     trace.push(draw);
//! }
//! ```

pub(crate) mod adapt_strategy;
pub(crate) mod cpu_potential;
pub(crate) mod cpu_sampler;
pub(crate) mod math;
pub(crate) mod nuts;
pub(crate) mod sampler_stats;
pub(crate) mod state;
pub(crate) mod stepsize;

pub use adapt_strategy::{StepSizeStats, StepSizeTune};
pub use cpu_potential::{CpuLogpFunc, EuclideanPotential};
pub use cpu_sampler::{new_sampler, test_logps, Chain, NutsChain, SamplerArgs};
pub use nuts::{draw, Direction, LogpError, NutsError, NutsOptions, SampleInfo};
pub use sampler_stats::{AsSampleStatMap, NutsSampleStats, SampleStatValue};
pub use state::{no_u_turn, State};
pub use stepsize::{find_initial_step_size, DualAverage, DualAverageSettings};
