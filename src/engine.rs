use crate::config::ModelConfig;
use crate::generation::step_generation;
use crate::model::{Population, RunRecord, Strategy};
use crate::observer::RunObserver;
use anyhow::{Context, Result};
use rand::prelude::*;
use rand_chacha::ChaCha12Rng;
use rand_distr::Exp1;

/// Two generations closer than this in every share are considered equal.
pub const EFFECTIVE_ZERO_DIFF: f64 = 1e-11;

/// State of a run after a generation step.
#[derive(Debug, PartialEq, Clone, Copy)]
pub enum RunStatus {
    Running,
    Converged,
    ForcedStop,
}

/// Decide how a run continues after stepping from `prev` to `next`.
///
/// `n_gens` is the number of generations that changed the population before this step.
/// A changing step that brings the count to `max_gens` forces the run to stop.
pub fn next_status(prev: &[f64], next: &[f64], n_gens: usize, max_gens: usize) -> RunStatus {
    let changed = prev
        .iter()
        .zip(next)
        .any(|(x, y)| (x - y).abs() >= EFFECTIVE_ZERO_DIFF);
    if !changed {
        RunStatus::Converged
    } else if n_gens + 1 >= max_gens {
        RunStatus::ForcedStop
    } else {
        RunStatus::Running
    }
}

/// Simulation engine of a single run.
///
/// Holds the model configuration, the shared strategy space and the run's own
/// random number generator, placed on ChaCha stream `run_idx` of the batch seed.
pub struct Engine<'a> {
    cfg: &'a ModelConfig,
    strategies: &'a [Strategy],
    seed: u64,
    run_idx: usize,
    rng: ChaCha12Rng,
}

impl<'a> Engine<'a> {
    pub fn new(
        cfg: &'a ModelConfig,
        strategies: &'a [Strategy],
        seed: u64,
        run_idx: usize,
    ) -> Self {
        let mut rng = ChaCha12Rng::seed_from_u64(seed);
        rng.set_stream(run_idx as u64);
        Self {
            cfg,
            strategies,
            seed,
            run_idx,
            rng,
        }
    }

    /// Sample a population uniformly from the probability simplex.
    pub fn generate_initial_condition(&mut self) -> Population {
        let vals: Vec<f64> = (0..self.strategies.len())
            .map(|_| Exp1.sample(&mut self.rng))
            .collect();
        let sum: f64 = vals.iter().sum();
        vals.into_iter().map(|val| val / sum).collect()
    }

    /// Advance generations from a random initial condition until the population
    /// converges or the generation cap is reached.
    pub fn run_simulation<O>(&mut self, observer: &mut O) -> Result<RunRecord>
    where
        O: RunObserver + ?Sized,
    {
        let init_pop = self.generate_initial_condition();

        let mut pop = init_pop.clone();
        let mut n_gens = 0;
        let mut i_gen = 0;
        let status = loop {
            let next = step_generation(&pop, self.strategies, self.cfg, &mut self.rng, observer);
            i_gen += 1;

            let status = next_status(&pop, &next, n_gens, self.cfg.max_gens);
            if status != RunStatus::Converged {
                n_gens += 1;
            }

            observer
                .on_generation(i_gen, &next)
                .with_context(|| format!("failed to observe generation {i_gen}"))?;

            pop = next;
            if status != RunStatus::Running {
                break status;
            }
        };
        observer
            .on_finish(i_gen, &pop)
            .with_context(|| format!("failed to observe terminal generation {i_gen}"))?;

        let converged = status == RunStatus::Converged;
        if converged {
            log::debug!("run {} converged after {n_gens} generations", self.run_idx);
        } else {
            log::debug!("run {} stopped after {n_gens} generations", self.run_idx);
        }
        for (i, &x) in pop.iter().enumerate() {
            if x != 0.0 {
                log::debug!("run {} survivor {i:>5}: {x}", self.run_idx);
            }
        }

        Ok(RunRecord {
            seed: self.seed,
            run_idx: self.run_idx,
            init_pop,
            final_pop: pop,
            n_gens,
            converged,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::model_config;
    use crate::model::Snapshot;
    use crate::observer::{NullObserver, TrajectoryWriter};
    use rmp_serde::decode;
    use crate::strategy::generate_strategies;

    #[test]
    fn status_transitions() {
        let a = [0.5, 0.5];
        let b = [0.5 + 5e-12, 0.5 - 5e-12];
        let c = [0.6, 0.4];
        assert_eq!(next_status(&a, &b, 7, 10), RunStatus::Converged);
        assert_eq!(next_status(&a, &c, 7, 10), RunStatus::Running);
        assert_eq!(next_status(&a, &c, 9, 10), RunStatus::ForcedStop);
        assert_eq!(next_status(&a, &b, 9, 10), RunStatus::Converged);
    }

    #[test]
    fn oscillation_is_forced_to_stop_at_cap() {
        let pops = [[0.6, 0.4], [0.4, 0.6]];
        let mut n_gens = 0;
        let status = loop {
            let prev = &pops[n_gens % 2];
            let next = &pops[(n_gens + 1) % 2];
            let status = next_status(prev, next, n_gens, 10_000);
            n_gens += 1;
            if status != RunStatus::Running {
                break status;
            }
        };
        assert_eq!(status, RunStatus::ForcedStop);
        assert_eq!(n_gens, 10_000);
    }

    #[test]
    fn initial_condition_lies_on_simplex() {
        let cfg = model_config();
        let strategies = generate_strategies(3, 3).expect("failed to generate strategies");
        let mut engine = Engine::new(&cfg, &strategies, 1, 0);
        let pop = engine.generate_initial_condition();
        assert_eq!(pop.len(), strategies.len());
        assert!(pop.iter().all(|&x| x > 0.0));
        assert!((pop.iter().sum::<f64>() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn runs_on_distinct_streams_differ() {
        let cfg = model_config();
        let strategies = generate_strategies(2, 2).expect("failed to generate strategies");
        let pop_0 = Engine::new(&cfg, &strategies, 1, 0).generate_initial_condition();
        let pop_1 = Engine::new(&cfg, &strategies, 1, 1).generate_initial_condition();
        let pop_0_again = Engine::new(&cfg, &strategies, 1, 0).generate_initial_condition();
        assert_ne!(pop_0, pop_1);
        assert_eq!(pop_0, pop_0_again);
    }

    #[test]
    fn single_strategy_converges_immediately() {
        let cfg = model_config();
        let strategies = generate_strategies(1, 1).expect("failed to generate strategies");
        let record = Engine::new(&cfg, &strategies, 3, 0)
            .run_simulation(&mut NullObserver)
            .expect("failed to run simulation");
        assert_eq!(record.init_pop, vec![1.0]);
        assert_eq!(record.final_pop, vec![1.0]);
        assert_eq!(record.n_gens, 0);
        assert!(record.converged);
    }

    #[test]
    fn stronger_type_takes_over() {
        let cfg = model_config();
        // Two powers with thresholds that always fight.
        let strategies = generate_strategies(2, 1).expect("failed to generate strategies");
        let record = Engine::new(&cfg, &strategies, 5, 0)
            .run_simulation(&mut NullObserver)
            .expect("failed to run simulation");
        assert!(record.converged);
        assert!(record.n_gens > 0 && record.n_gens < cfg.max_gens);
        assert!(record.final_pop.iter().any(|&x| x == 0.0));
        assert!((record.final_pop.iter().sum::<f64>() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn generation_cap_stops_run() {
        let cfg = ModelConfig {
            max_gens: 3,
            ..model_config()
        };
        let strategies = generate_strategies(2, 2).expect("failed to generate strategies");
        let mut writer = TrajectoryWriter::new(Vec::new(), 2);
        let record = Engine::new(&cfg, &strategies, 5, 0)
            .run_simulation(&mut writer)
            .expect("failed to run simulation");
        assert!(!record.converged);
        assert_eq!(record.n_gens, 3);

        let bytes = writer.finish().expect("failed to finish");
        let mut reader = bytes.as_slice();
        let mut snapshots: Vec<Snapshot> = Vec::new();
        while !reader.is_empty() {
            snapshots.push(decode::from_read(&mut reader).expect("failed to read snapshot"));
        }
        let i_gens: Vec<_> = snapshots.iter().map(|s| s.i_gen).collect();
        assert_eq!(i_gens, vec![2, 3]);
        assert_eq!(snapshots[1].pop, record.final_pop);
    }
}
