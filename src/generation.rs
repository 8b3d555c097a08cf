use crate::config::ModelConfig;
use crate::interaction::resolve;
use crate::model::{Population, Strategy};
use crate::observer::RunObserver;
use crate::stats::exact_sum;
use rand::Rng;

/// Background birth rate of the replicator update.
pub const BIRTH_RATE: f64 = 1e-8;

/// Shares below this value are set to zero after every step.
pub const EFFECTIVE_ZERO: f64 = 1e-10;

/// Compute the next generation with discrete-time replicator dynamics.
///
/// Every unordered pair of distinct strategies meets once and both payoffs are added
/// to the fitness of the respective strategy. Then
/// `x_i(t+1) = (a + f_i) x_i(t) / (a + sum_j f_j x_j(t))` with `a = BIRTH_RATE`.
pub fn step_generation<R, O>(
    pop: &[f64],
    strategies: &[Strategy],
    cfg: &ModelConfig,
    rng: &mut R,
    observer: &mut O,
) -> Population
where
    R: Rng + ?Sized,
    O: RunObserver + ?Sized,
{
    let n_strategies = strategies.len();
    let mut fitness = vec![0.0; n_strategies];

    for s1 in 0..n_strategies {
        for s2 in (s1 + 1)..n_strategies {
            let outcome = resolve(&strategies[s1], &strategies[s2], cfg, rng);
            observer.on_interaction(&outcome);
            fitness[s1] += outcome.payoff_a;
            fitness[s2] += outcome.payoff_b;
        }
    }

    let avg_fitness = exact_sum(fitness.iter().zip(pop).map(|(f, x)| f * x));

    pop.iter()
        .zip(&fitness)
        .map(|(&x, &f)| {
            let x_new = (BIRTH_RATE + f) * x / (BIRTH_RATE + avg_fitness);
            if x_new < EFFECTIVE_ZERO { 0.0 } else { x_new }
        })
        .collect()
}
