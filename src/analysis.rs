use crate::config::Config;
use crate::model::{RunRecord, Strategy};
use crate::stats::Accumulator;
use crate::strategy::generate_strategies;
use anyhow::{Context, Result, bail};
use rmp_serde::decode;
use std::{
    fs::File,
    io::{BufRead, BufReader, BufWriter},
    path::Path,
};

/// Read every record of an aggregate file.
pub fn read_records<P: AsRef<Path>>(file: P) -> Result<Vec<RunRecord>> {
    let file = file.as_ref();
    let file = File::open(file).with_context(|| format!("failed to open {file:?}"))?;
    let mut reader = BufReader::new(file);

    let mut records = Vec::new();
    while !reader.fill_buf().context("failed to read aggregate")?.is_empty() {
        let record = decode::from_read(&mut reader)
            .with_context(|| format!("failed to read record {}", records.len()))?;
        records.push(record);
    }
    Ok(records)
}

pub trait Obs {
    fn update(&mut self, record: &RunRecord) -> Result<()>;
    fn report(&self) -> serde_json::Value;
}

pub struct Convergence {
    n_runs: usize,
    n_converged: usize,
}

impl Convergence {
    pub fn new() -> Self {
        Self {
            n_runs: 0,
            n_converged: 0,
        }
    }
}

impl Obs for Convergence {
    fn update(&mut self, record: &RunRecord) -> Result<()> {
        self.n_runs += 1;
        if record.converged {
            self.n_converged += 1;
        }
        Ok(())
    }

    fn report(&self) -> serde_json::Value {
        serde_json::json!({ "n_runs": self.n_runs, "n_converged": self.n_converged })
    }
}

pub struct NGens {
    acc: Accumulator,
}

impl NGens {
    pub fn new() -> Self {
        Self {
            acc: Accumulator::new(),
        }
    }
}

impl Obs for NGens {
    fn update(&mut self, record: &RunRecord) -> Result<()> {
        self.acc.add(record.n_gens as f64);
        Ok(())
    }

    fn report(&self) -> serde_json::Value {
        serde_json::json!({ "n_gens": self.acc.report() })
    }
}

/// Final share and survival frequency of each strategy.
pub struct FinalShares {
    strategies: Vec<Strategy>,
    acc_vec: Vec<Accumulator>,
    n_survived: Vec<usize>,
    n_runs: usize,
}

impl FinalShares {
    pub fn new(strategies: Vec<Strategy>) -> Self {
        let mut acc_vec = Vec::new();
        acc_vec.resize_with(strategies.len(), Accumulator::new);
        let n_survived = vec![0; strategies.len()];
        Self {
            strategies,
            acc_vec,
            n_survived,
            n_runs: 0,
        }
    }
}

impl Obs for FinalShares {
    fn update(&mut self, record: &RunRecord) -> Result<()> {
        let n_strategies = self.strategies.len();
        let len = record.final_pop.len();
        if len != n_strategies {
            bail!("population must have {n_strategies} shares, but has {len}");
        }

        self.n_runs += 1;
        for (i, &x) in record.final_pop.iter().enumerate() {
            self.acc_vec[i].add(x);
            if x > 0.0 {
                self.n_survived[i] += 1;
            }
        }
        Ok(())
    }

    fn report(&self) -> serde_json::Value {
        let reports: Vec<_> = self
            .strategies
            .iter()
            .zip(&self.acc_vec)
            .zip(&self.n_survived)
            .map(|((strategy, acc), &n_survived)| {
                serde_json::json!({
                    "strategy": strategy,
                    "final_share": acc.report(),
                    "survival": n_survived as f64 / self.n_runs as f64,
                })
            })
            .collect();
        serde_json::json!({ "final_shares": reports })
    }
}

pub struct Analyzer {
    obs_ptr_vec: Vec<Box<dyn Obs>>,
}

impl Analyzer {
    pub fn new(cfg: &Config) -> Result<Self> {
        let strategies = generate_strategies(cfg.model.n_types, cfg.model.n_thresholds)
            .context("failed to generate strategies")?;

        let mut obs_ptr_vec: Vec<Box<dyn Obs>> = Vec::new();
        obs_ptr_vec.push(Box::new(Convergence::new()));
        obs_ptr_vec.push(Box::new(NGens::new()));
        obs_ptr_vec.push(Box::new(FinalShares::new(strategies)));
        Ok(Self { obs_ptr_vec })
    }

    pub fn add_file<P: AsRef<Path>>(&mut self, file: P) -> Result<()> {
        let records = read_records(file).context("failed to read records")?;
        for record in &records {
            for obs in &mut self.obs_ptr_vec {
                obs.update(record).with_context(|| {
                    format!("failed to update observable with run {}", record.run_idx)
                })?;
            }
        }
        log::info!("analyzed {} records", records.len());
        Ok(())
    }

    pub fn report(&self) -> Vec<serde_json::Value> {
        self.obs_ptr_vec.iter().map(|obs| obs.report()).collect()
    }

    pub fn save_results<P: AsRef<Path>>(&self, file: P) -> Result<()> {
        let file = file.as_ref();
        let file = File::create(file).with_context(|| format!("failed to create {file:?}"))?;
        let writer = BufWriter::new(file);

        serde_json::to_writer_pretty(writer, &self.report())
            .context("failed to serialize results")?;
        Ok(())
    }
}
