//! Escalation subgame between two strategies.
//!
//! Both participants start with belief 0.5 and no accumulated cost. Each round
//! they either stalemate (cost reached 1), retreat, fight, or pay `cost_obs` to
//! observe a noisy signal of the power asymmetry and update their beliefs.
//! The cost is `n_rounds * cost_obs`, so the stalemate comes after at most
//! `ceil(1 / cost_obs)` observation rounds.

use crate::config::ModelConfig;
use crate::model::{Outcome, Strategy};
use rand::Rng;

const INIT_BELIEF: f64 = 0.5;

/// Phase of an encounter. Every phase but `Observing` is terminal.
#[derive(Debug, PartialEq, Clone, Copy)]
enum Phase {
    Observing,
    Retreated { a_runs: bool, b_runs: bool },
    Fought,
    Stalemated,
}

struct Encounter<'a> {
    a: &'a Strategy,
    b: &'a Strategy,
    cfg: &'a ModelConfig,
    belief_a: f64,
    belief_b: f64,
    n_rounds: usize,
    max_rounds: usize,
}

impl<'a> Encounter<'a> {
    fn new(a: &'a Strategy, b: &'a Strategy, cfg: &'a ModelConfig) -> Self {
        Self {
            a,
            b,
            cfg,
            belief_a: INIT_BELIEF,
            belief_b: INIT_BELIEF,
            n_rounds: 0,
            max_rounds: max_rounds(cfg.cost_obs),
        }
    }

    fn cost(&self) -> f64 {
        self.n_rounds as f64 * self.cfg.cost_obs
    }

    fn advance<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Phase {
        if self.n_rounds >= self.max_rounds {
            return Phase::Stalemated;
        }

        let a_runs = self.belief_a < self.a.run_threshold;
        let b_runs = self.belief_b < self.b.run_threshold;
        if a_runs || b_runs {
            return Phase::Retreated { a_runs, b_runs };
        }

        let a_fights = self.belief_a >= self.a.fight_threshold;
        let b_fights = self.belief_b >= self.b.fight_threshold;
        match (a_fights, b_fights) {
            (true, true) => return Phase::Fought,
            // The escalation is answered with probability equal to the
            // opponent's belief, otherwise the opponent backs down.
            (true, false) => {
                return if rng.random::<f64>() < self.belief_b {
                    Phase::Fought
                } else {
                    Phase::Retreated {
                        a_runs: false,
                        b_runs: true,
                    }
                };
            }
            (false, true) => {
                return if rng.random::<f64>() < self.belief_a {
                    Phase::Fought
                } else {
                    Phase::Retreated {
                        a_runs: true,
                        b_runs: false,
                    }
                };
            }
            (false, false) => {}
        }

        self.n_rounds += 1;
        let mut adjustment = (self.a.power - self.b.power) / (2.0 * self.cfg.update_modulus);
        if !rng.random_bool(self.cfg.update_correct) {
            adjustment = -adjustment;
        }
        self.belief_a += adjustment;
        self.belief_b -= adjustment;

        Phase::Observing
    }

    fn payoffs<R: Rng + ?Sized>(&self, phase: Phase, rng: &mut R) -> Outcome {
        let cost = self.cost();
        let half = (0.5 - cost).max(0.0);
        let full = (1.0 - cost).max(0.0);
        match phase {
            Phase::Observing => unreachable!("observing is not a terminal phase"),
            Phase::Stalemated => Outcome {
                payoff_a: 0.0,
                payoff_b: 0.0,
                fought: false,
            },
            Phase::Retreated { a_runs, b_runs } => Outcome {
                payoff_a: if a_runs { half } else { full },
                payoff_b: if b_runs { half } else { full },
                fought: false,
            },
            Phase::Fought => {
                let win = (1.0 - cost - self.cfg.cost_win).max(0.0);
                let loss = (0.5 - cost - self.cfg.cost_loss).max(0.0);
                let total_power = self.a.power + self.b.power;
                let a_wins = rng.random_bool(self.a.power / total_power);
                Outcome {
                    payoff_a: if a_wins { win } else { loss },
                    payoff_b: if a_wins { loss } else { win },
                    fought: true,
                }
            }
        }
    }
}

/// Number of observation rounds after which the encounter stalemates.
fn max_rounds(cost_obs: f64) -> usize {
    // Saturates to `usize::MAX` for a zero cost.
    (1.0 / cost_obs).ceil() as usize
}

/// Resolve one encounter of the ordered pair `(a, b)`.
///
/// Terminates after at most `ceil(1 / cost_obs)` observation rounds, so
/// `cost_obs` must be positive.
pub fn resolve<R: Rng + ?Sized>(
    a: &Strategy,
    b: &Strategy,
    cfg: &ModelConfig,
    rng: &mut R,
) -> Outcome {
    let mut encounter = Encounter::new(a, b, cfg);
    loop {
        let phase = encounter.advance(rng);
        if phase != Phase::Observing {
            return encounter.payoffs(phase, rng);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::model_config;
    use rand::SeedableRng;
    use rand_chacha::ChaCha12Rng;

    fn strategy(power: f64, run_threshold: f64, fight_threshold: f64) -> Strategy {
        Strategy {
            power,
            run_threshold,
            fight_threshold,
        }
    }

    fn swap(outcome: Outcome) -> Outcome {
        Outcome {
            payoff_a: outcome.payoff_b,
            payoff_b: outcome.payoff_a,
            fought: outcome.fought,
        }
    }

    fn costless() -> ModelConfig {
        ModelConfig {
            cost_obs: 0.1,
            cost_win: 0.0,
            cost_loss: 0.0,
            update_correct: 1.0,
            ..model_config()
        }
    }

    #[test]
    fn both_retreat_immediately() {
        let mut rng = ChaCha12Rng::seed_from_u64(1);
        let s = strategy(0.5, 0.6, 0.8);
        let outcome = resolve(&s, &s, &model_config(), &mut rng);
        assert_eq!(
            outcome,
            Outcome {
                payoff_a: 0.5,
                payoff_b: 0.5,
                fought: false
            }
        );
    }

    #[test]
    fn one_side_retreats() {
        let mut rng = ChaCha12Rng::seed_from_u64(1);
        let timid = strategy(0.5, 0.6, 0.8);
        let bold = strategy(0.5, 0.4, 0.8);
        let outcome = resolve(&timid, &bold, &model_config(), &mut rng);
        assert_eq!(
            outcome,
            Outcome {
                payoff_a: 0.5,
                payoff_b: 1.0,
                fought: false
            }
        );
        assert_eq!(swap(resolve(&bold, &timid, &model_config(), &mut rng)), outcome);
    }

    #[test]
    fn equal_powers_stalemate() {
        let mut rng = ChaCha12Rng::seed_from_u64(1);
        let s = strategy(0.5, 0.25, 0.75);
        let outcome = resolve(&s, &s, &model_config(), &mut rng);
        assert_eq!(
            outcome,
            Outcome {
                payoff_a: 0.0,
                payoff_b: 0.0,
                fought: false
            }
        );
    }

    #[test]
    fn stalemate_after_ceil_rounds() {
        let mut rng = ChaCha12Rng::seed_from_u64(1);
        let s = strategy(0.5, 0.25, 0.75);
        let cases = [(0.1, 10), (0.01, 100), (0.25, 4), (0.3, 4), (0.7, 2), (1.0, 1)];
        for (cost_obs, expected) in cases {
            let cfg = ModelConfig {
                cost_obs,
                ..model_config()
            };
            let mut encounter = Encounter::new(&s, &s, &cfg);
            let mut n_observations = 0;
            let phase = loop {
                match encounter.advance(&mut rng) {
                    Phase::Observing => n_observations += 1,
                    phase => break phase,
                }
            };
            assert_eq!(phase, Phase::Stalemated, "cost_obs {cost_obs}");
            assert_eq!(n_observations, expected, "cost_obs {cost_obs}");
            assert!(encounter.cost() >= 1.0, "cost_obs {cost_obs}");
        }
    }

    #[test]
    fn observation_reveals_asymmetry() {
        let mut rng = ChaCha12Rng::seed_from_u64(1);
        let strong = strategy(0.75, 0.4, 0.9);
        let weak = strategy(0.25, 0.4, 0.9);

        // One correct observation moves the beliefs to 0.75 and 0.25.
        let outcome = resolve(&strong, &weak, &costless(), &mut rng);
        assert!((outcome.payoff_a - 0.9).abs() < 1e-12);
        assert!((outcome.payoff_b - 0.4).abs() < 1e-12);
        assert!(!outcome.fought);

        // A misleading observation reverses the roles.
        let misled = ModelConfig {
            update_correct: 0.0,
            ..costless()
        };
        let outcome = resolve(&strong, &weak, &misled, &mut rng);
        assert!((outcome.payoff_a - 0.4).abs() < 1e-12);
        assert!((outcome.payoff_b - 0.9).abs() < 1e-12);
    }

    #[test]
    fn correct_update_rate_follows_config() {
        let mut rng = ChaCha12Rng::seed_from_u64(8);
        let strong = strategy(0.75, 0.4, 0.9);
        let weak = strategy(0.25, 0.4, 0.9);
        let cfg = ModelConfig {
            update_correct: 0.7,
            ..costless()
        };

        let n_trials = 100_000;
        let n_correct = (0..n_trials)
            .filter(|_| resolve(&strong, &weak, &cfg, &mut rng).payoff_a > 0.5)
            .count();

        let rate = n_correct as f64 / n_trials as f64;
        assert!((rate - 0.7).abs() < 0.01, "correct rate {rate}");
    }

    #[test]
    fn combat_payoffs_subtract_costs() {
        let mut rng = ChaCha12Rng::seed_from_u64(3);
        let s = strategy(0.5, 0.5, 0.5);
        let cfg = model_config();
        for _ in 0..100 {
            let outcome = resolve(&s, &s, &cfg, &mut rng);
            assert!(outcome.fought);
            let mut payoffs = [outcome.payoff_a, outcome.payoff_b];
            payoffs.sort_by(f64::total_cmp);
            assert!((payoffs[0] - (0.5 - cfg.cost_loss)).abs() < 1e-12);
            assert!((payoffs[1] - (1.0 - cfg.cost_win)).abs() < 1e-12);
        }
    }

    #[test]
    fn combat_win_rate_follows_power() {
        let mut rng = ChaCha12Rng::seed_from_u64(42);
        let weak = strategy(0.2, 0.5, 0.5);
        let strong = strategy(0.6, 0.5, 0.5);
        let cfg = ModelConfig {
            cost_obs: 0.0,
            ..costless()
        };

        let n_trials = 200_000;
        let mut n_weak_wins = 0;
        for _ in 0..n_trials {
            let outcome = resolve(&weak, &strong, &cfg, &mut rng);
            assert!(outcome.fought);
            if outcome.payoff_a > outcome.payoff_b {
                n_weak_wins += 1;
            }
        }

        let rate = n_weak_wins as f64 / n_trials as f64;
        assert!((rate - 0.25).abs() < 0.005, "win rate {rate}");
    }

    #[test]
    fn swapped_arguments_give_swapped_distribution() {
        let a = strategy(0.3, 0.2, 0.6);
        let b = strategy(0.7, 0.4, 0.8);
        let cfg = model_config();
        let n_trials = 100_000;

        let mut rng = ChaCha12Rng::seed_from_u64(11);
        let mut sum_ab = [0.0, 0.0];
        let mut fights_ab = 0;
        for _ in 0..n_trials {
            let outcome = resolve(&a, &b, &cfg, &mut rng);
            sum_ab[0] += outcome.payoff_a;
            sum_ab[1] += outcome.payoff_b;
            fights_ab += outcome.fought as usize;
        }

        let mut sum_ba = [0.0, 0.0];
        let mut fights_ba = 0;
        for _ in 0..n_trials {
            let outcome = swap(resolve(&b, &a, &cfg, &mut rng));
            sum_ba[0] += outcome.payoff_a;
            sum_ba[1] += outcome.payoff_b;
            fights_ba += outcome.fought as usize;
        }

        let n = n_trials as f64;
        assert!((sum_ab[0] - sum_ba[0]).abs() / n < 0.01);
        assert!((sum_ab[1] - sum_ba[1]).abs() / n < 0.01);
        assert!((fights_ab as f64 - fights_ba as f64).abs() / n < 0.01);
    }

    #[test]
    fn payoffs_stay_in_unit_interval() {
        let mut rng = ChaCha12Rng::seed_from_u64(5);
        let strategies = crate::strategy::generate_strategies(3, 4).expect("failed to generate");
        let cfg = model_config();
        for a in &strategies {
            for b in &strategies {
                let outcome = resolve(a, b, &cfg, &mut rng);
                assert!((0.0..=1.0).contains(&outcome.payoff_a));
                assert!((0.0..=1.0).contains(&outcome.payoff_b));
            }
        }
    }
}
