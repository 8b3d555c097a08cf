//! Simulation data types.

use serde::{Deserialize, Serialize};

/// Population shares, index-aligned with the strategy space.
pub type Population = Vec<f64>;

/// Strategy of the contest game.
///
/// `power` is the relative resource-holding power. A participant retreats while
/// its belief is below `run_threshold` and escalates once it reaches `fight_threshold`.
#[derive(Debug, PartialEq, Clone, Copy, Serialize, Deserialize)]
pub struct Strategy {
    pub power: f64,
    pub run_threshold: f64,
    pub fight_threshold: f64,
}

/// Payoffs of one pairwise encounter.
#[derive(Debug, PartialEq, Clone, Copy)]
pub struct Outcome {
    /// Payoff to the first participant.
    pub payoff_a: f64,
    /// Payoff to the second participant.
    pub payoff_b: f64,
    /// The encounter ended in combat.
    pub fought: bool,
}

/// Terminal record of one run.
///
/// Contains the batch seed and run index (which together reproduce the run),
/// the initial and final populations, the generation count and convergence flag.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub seed: u64,
    pub run_idx: usize,

    pub init_pop: Population,
    pub final_pop: Population,

    /// Number of generations that changed the population.
    pub n_gens: usize,
    /// `false` if the run hit the generation cap.
    pub converged: bool,
}

/// Snapshot of a run at a single generation.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub i_gen: usize,
    pub pop: Population,

    /// Encounters that ended in combat since the previous snapshot.
    pub n_fights: usize,
    /// Encounters resolved since the previous snapshot.
    pub n_interactions: usize,
}
