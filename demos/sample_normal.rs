use nuts_slice::{new_sampler, Chain, CpuLogpFunc, LogpError, SamplerArgs};
use rand::SeedableRng;
use thiserror::Error;

// A ten dimensional normal distribution with mean 3 and unit variance.
struct PosteriorDensity {}

// The density cannot fail, but a real model would report errors here.
#[derive(Debug, Error)]
enum PosteriorLogpError {}

impl LogpError for PosteriorLogpError {
    fn is_recoverable(&self) -> bool {
        false
    }
}

impl CpuLogpFunc for PosteriorDensity {
    type LogpError = PosteriorLogpError;

    fn dim(&self) -> usize {
        10
    }

    fn logp(&mut self, position: &[f64], grad: &mut [f64]) -> Result<f64, Self::LogpError> {
        let mu = 3f64;
        let logp = position
            .iter()
            .zip(grad.iter_mut())
            .map(|(x, grad)| {
                let diff = x - mu;
                *grad = -diff;
                -diff * diff / 2.
            })
            .sum();
        Ok(logp)
    }
}

fn main() {
    let mut sampler_args = SamplerArgs::default();
    sampler_args.step_size_adapt.target_accept = 0.8;
    sampler_args.num_tune = 1000;

    let mut sampler =
        new_sampler(PosteriorDensity {}, sampler_args).expect("Invalid sampler settings");
    sampler
        .set_position(&[0f64; 10])
        .expect("Unrecoverable error during init");

    let mut rng = rand::rngs::SmallRng::seed_from_u64(42);
    let mut trace = vec![];
    let mut divergences = 0;
    for _ in 0..2000 {
        let (draw, info) = sampler
            .draw(&mut rng)
            .expect("Unrecoverable error during sampling");
        if !info.tuning {
            trace.push(draw);
        }
        if info.diverging() {
            divergences += 1;
            println!("Divergence in draw {} at step size {}", info.draw, info.step_size);
        }
    }

    let n = trace.len() as f64;
    let mean: Vec<f64> = (0..sampler.dim())
        .map(|i| trace.iter().map(|draw| draw[i]).sum::<f64>() / n)
        .collect();
    println!("Posterior mean: {:?}", mean);
    println!("Divergent draws: {}", divergences);
    if let Some(tune) = sampler.tune() {
        println!("Final step size: {}", tune.frozen_step_size());
    }
}
