use crate::model::{Outcome, Snapshot};
use anyhow::{Context, Result};
use rmp_serde::encode;
use std::io::Write;

/// Hooks called by a run while it advances.
pub trait RunObserver {
    /// Called after generation `i_gen` has been computed.
    fn on_generation(&mut self, _i_gen: usize, _pop: &[f64]) -> Result<()> {
        Ok(())
    }

    /// Called after every resolved encounter.
    fn on_interaction(&mut self, _outcome: &Outcome) {}

    /// Called once with the terminal generation when the run stops.
    fn on_finish(&mut self, _i_gen: usize, _pop: &[f64]) -> Result<()> {
        Ok(())
    }
}

pub struct NullObserver;

impl RunObserver for NullObserver {}

/// Writes a [`Snapshot`] every `gens_per_save` generations and one for the
/// terminal generation, unless the cadence is zero.
pub struct TrajectoryWriter<W: Write> {
    writer: W,
    gens_per_save: usize,
    last_saved: Option<usize>,
    n_fights: usize,
    n_interactions: usize,
}

impl<W: Write> TrajectoryWriter<W> {
    pub fn new(writer: W, gens_per_save: usize) -> Self {
        Self {
            writer,
            gens_per_save,
            last_saved: None,
            n_fights: 0,
            n_interactions: 0,
        }
    }

    pub fn finish(mut self) -> Result<W> {
        self.writer
            .flush()
            .context("failed to flush writer stream")?;
        Ok(self.writer)
    }

    fn write_snapshot(&mut self, i_gen: usize, pop: &[f64]) -> Result<()> {
        let snapshot = Snapshot {
            i_gen,
            pop: pop.to_vec(),
            n_fights: self.n_fights,
            n_interactions: self.n_interactions,
        };
        encode::write(&mut self.writer, &snapshot).context("failed to serialize snapshot")?;

        self.last_saved = Some(i_gen);
        self.n_fights = 0;
        self.n_interactions = 0;

        Ok(())
    }
}

impl<W: Write> RunObserver for TrajectoryWriter<W> {
    fn on_generation(&mut self, i_gen: usize, pop: &[f64]) -> Result<()> {
        if self.gens_per_save == 0 || i_gen % self.gens_per_save != 0 {
            return Ok(());
        }
        self.write_snapshot(i_gen, pop)
    }

    fn on_finish(&mut self, i_gen: usize, pop: &[f64]) -> Result<()> {
        if self.gens_per_save == 0 || self.last_saved == Some(i_gen) {
            return Ok(());
        }
        self.write_snapshot(i_gen, pop)
    }

    fn on_interaction(&mut self, outcome: &Outcome) {
        self.n_interactions += 1;
        if outcome.fought {
            self.n_fights += 1;
        }
    }
}
