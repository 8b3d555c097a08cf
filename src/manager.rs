use crate::analysis::Analyzer;
use crate::config::Config;
use crate::engine::Engine;
use crate::model::{RunRecord, Strategy};
use crate::observer::{NullObserver, TrajectoryWriter};
use crate::strategy::generate_strategies;
use anyhow::{Context, Result, anyhow};
use glob::glob;
use rmp_serde::encode;
use std::{
    any::Any,
    fs::{self, File, OpenOptions},
    io::{BufWriter, Write},
    panic::{self, AssertUnwindSafe},
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
        mpsc,
    },
};

/// Result of one dispatched run.
enum TaskOutcome {
    Completed(RunRecord),
    Failed(anyhow::Error),
    Skipped,
}

/// Number of runs per terminal state at the end of a batch.
#[derive(Debug, Default, PartialEq)]
pub struct BatchSummary {
    pub n_completed: usize,
    pub n_failed: usize,
    pub n_skipped: usize,
}

pub struct Manager {
    sim_dir: PathBuf,
    cfg: Config,
    /// Stops the dispatch of runs that have not started yet.
    cancel: Arc<AtomicBool>,
}

impl Manager {
    pub fn new<P: AsRef<Path>>(sim_dir: P) -> Result<Self> {
        let sim_dir = sim_dir.as_ref().to_path_buf();

        let cfg =
            Config::from_file(sim_dir.join("config.toml")).context("failed to construct cfg")?;
        log::info!("{cfg:#?}");

        Ok(Self {
            sim_dir,
            cfg,
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Run all duplications of the batch on a pool of `pool_size` threads.
    ///
    /// Records are appended to the aggregate file in completion order and flushed
    /// one by one. Failed runs are counted and logged. Failing to write the
    /// aggregate file aborts the batch.
    pub fn run_batch(&self) -> Result<BatchSummary> {
        let seed = self.cfg.batch.seed.unwrap_or_else(rand::random);
        log::info!("batch seed {seed}");

        let strategies: Arc<[Strategy]> =
            generate_strategies(self.cfg.model.n_types, self.cfg.model.n_thresholds)
                .context("failed to generate strategies")?
                .into();
        log::info!("generated {} strategies", strategies.len());

        let aggregate_file = self.aggregate_file();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&aggregate_file)
            .with_context(|| format!("failed to open {aggregate_file:?}"))?;
        let mut writer = BufWriter::new(file);

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.cfg.batch.pool_size)
            .thread_name(|i| format!("worker-{i}"))
            .build()
            .context("failed to build thread pool")?;

        let n_runs = self.cfg.batch.duplications;
        log::info!("running {n_runs} duplications");

        let (tx, rx) = mpsc::channel();
        let cfg = Arc::new(self.cfg.clone());
        for run_idx in 0..n_runs {
            let tx = tx.clone();
            let cfg = Arc::clone(&cfg);
            let strategies = Arc::clone(&strategies);
            let cancel = Arc::clone(&self.cancel);
            let trajectory_file =
                (cfg.output.gens_per_save > 0).then(|| self.trajectory_file(seed, run_idx));

            pool.spawn(move || {
                let outcome = if cancel.load(Ordering::Relaxed) {
                    TaskOutcome::Skipped
                } else {
                    run_task(|| {
                        perform_run(&cfg, &strategies, seed, run_idx, trajectory_file.as_deref())
                    })
                };
                // The receiver is gone only if the batch was aborted.
                tx.send((run_idx, outcome)).ok();
            });
        }
        drop(tx);

        let mut summary = BatchSummary::default();
        for (run_idx, outcome) in rx {
            match outcome {
                TaskOutcome::Completed(record) => {
                    if let Err(error) = append_record(&mut writer, &record) {
                        self.cancel.store(true, Ordering::Relaxed);
                        return Err(error.context(format!("failed to append run {run_idx}")));
                    }
                    summary.n_completed += 1;
                    log::info!(
                        "completed {}/{n_runs} runs (run {run_idx}: {} generations, converged: {})",
                        summary.n_completed,
                        record.n_gens,
                        record.converged
                    );
                }
                TaskOutcome::Failed(error) => {
                    summary.n_failed += 1;
                    log::warn!("run {run_idx} failed: {error:#}");
                }
                TaskOutcome::Skipped => {
                    summary.n_skipped += 1;
                }
            }
        }

        log::info!("{summary:?}");

        Ok(summary)
    }

    pub fn analyze_sim(&self) -> Result<()> {
        let mut analyzer = Analyzer::new(&self.cfg).context("failed to construct analyzer")?;
        analyzer
            .add_file(self.aggregate_file())
            .context("failed to add file")?;

        let results_file = self.results_file();
        analyzer
            .save_results(&results_file)
            .context("failed to save results")?;
        log::info!("saved {results_file:?}");

        Ok(())
    }

    pub fn clean_sim(&self) -> Result<()> {
        let pattern = self.sim_dir.join("trajectory-*.msgpack");
        let pattern = pattern.to_str().context("pattern is not valid UTF-8")?;
        let mut files: Vec<_> = glob(pattern)
            .context("failed to glob trajectory files")?
            .filter_map(Result::ok)
            .collect();
        files.push(self.aggregate_file());
        files.push(self.results_file());

        for file in files.into_iter().filter(|file| file.is_file()) {
            fs::remove_file(&file).with_context(|| format!("failed to remove {file:?}"))?;
            log::info!("removed {file:?}");
        }

        Ok(())
    }

    fn aggregate_file(&self) -> PathBuf {
        self.sim_dir.join("aggregate.msgpack")
    }

    fn results_file(&self) -> PathBuf {
        self.sim_dir.join("results.json")
    }

    fn trajectory_file(&self, seed: u64, run_idx: usize) -> PathBuf {
        self.sim_dir
            .join(format!("trajectory-{seed:016x}-{run_idx:04}.msgpack"))
    }
}

fn perform_run(
    cfg: &Config,
    strategies: &[Strategy],
    seed: u64,
    run_idx: usize,
    trajectory_file: Option<&Path>,
) -> Result<RunRecord> {
    let mut engine = Engine::new(&cfg.model, strategies, seed, run_idx);

    let Some(file) = trajectory_file else {
        return engine.run_simulation(&mut NullObserver);
    };

    let file = File::create(file).with_context(|| format!("failed to create {file:?}"))?;
    let mut observer = TrajectoryWriter::new(BufWriter::new(file), cfg.output.gens_per_save);
    let record = engine
        .run_simulation(&mut observer)
        .context("failed to run simulation")?;
    observer.finish().context("failed to finish trajectory")?;

    Ok(record)
}

/// Run one task, turning a panic into a failure.
fn run_task<F>(task: F) -> TaskOutcome
where
    F: FnOnce() -> Result<RunRecord>,
{
    match panic::catch_unwind(AssertUnwindSafe(task)) {
        Ok(Ok(record)) => TaskOutcome::Completed(record),
        Ok(Err(error)) => TaskOutcome::Failed(error),
        Err(payload) => TaskOutcome::Failed(anyhow!("panicked: {}", panic_message(&*payload))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn append_record<W: Write>(writer: &mut W, record: &RunRecord) -> Result<()> {
    encode::write(writer, record).context("failed to serialize record")?;
    writer.flush().context("failed to flush writer stream")?;
    Ok(())
}
