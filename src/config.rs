use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::{fmt::Debug, fs, ops::RangeBounds, path::Path};

/// Contest model parameters.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Number of power (RHP) levels.
    pub n_types: usize,
    /// Number of belief threshold levels.
    pub n_thresholds: usize,

    /// Cost paid per observation round.
    pub cost_obs: f64,
    /// Extra cost paid by the winner of a fight.
    pub cost_win: f64,
    /// Extra cost paid by the loser of a fight.
    pub cost_loss: f64,

    /// Divisor of the power difference in the belief update.
    pub update_modulus: f64,
    /// Probability that an observation moves beliefs toward the true asymmetry.
    pub update_correct: f64,

    /// Generation cap after which a run is forcibly stopped.
    #[serde(default = "default_max_gens")]
    pub max_gens: usize,
}

fn default_max_gens() -> usize {
    10_000
}

/// Largest strategy space a run may step. Every generation resolves all pairs.
pub const MAX_STRATEGIES: usize = 10_000;

/// Batch scheduling parameters.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Number of independent runs.
    pub duplications: usize,
    /// Number of worker threads.
    pub pool_size: usize,
    /// Batch seed. Drawn from the OS when absent.
    pub seed: Option<u64>,
}

/// Output parameters.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Number of generations between trajectory snapshots (0 disables them).
    pub gens_per_save: usize,
}

/// Simulation configuration parameters.
///
/// Loaded from a TOML file and validated before use.
/// See [`Config::from_file`] for loading.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Config {
    pub model: ModelConfig,
    pub batch: BatchConfig,
    pub output: OutputConfig,
}

impl Config {
    /// Load a [`Config`] from a TOML file.
    ///
    /// Performs validation on all parameters before returning.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, deserialized,
    /// or if the configuration values are invalid.
    pub fn from_file<P: AsRef<Path>>(file: P) -> Result<Self> {
        let file = file.as_ref();
        let contents =
            fs::read_to_string(file).with_context(|| format!("failed to read {file:?}"))?;

        let config: Config = toml::from_str(&contents).context("failed to deserialize config")?;

        config.validate().context("failed to validate config")?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.model.validate()?;

        check_num(self.batch.duplications, 1..).context("invalid duplications")?;
        check_num(self.batch.pool_size, 1..=1024).context("invalid pool_size")?;

        Ok(())
    }
}

impl ModelConfig {
    /// Size of the strategy space spanned by `n_types` and `n_thresholds`.
    pub fn n_strategies(&self) -> usize {
        self.n_types * self.n_thresholds * (self.n_thresholds + 1) / 2
    }

    pub fn validate(&self) -> Result<()> {
        check_num(self.n_types, 1..=100).context("invalid n_types")?;
        check_num(self.n_thresholds, 1..=100).context("invalid n_thresholds")?;
        check_num(self.n_strategies(), 1..=MAX_STRATEGIES).context("invalid strategy count")?;

        // A zero observation cost never reaches the stalemate bound.
        check_pos(self.cost_obs).context("invalid cost_obs")?;
        check_num(self.cost_win, 0.0..).context("invalid cost_win")?;
        check_num(self.cost_loss, 0.0..).context("invalid cost_loss")?;

        check_pos(self.update_modulus).context("invalid update_modulus")?;
        check_num(self.update_correct, 0.0..=1.0).context("invalid update_correct")?;

        check_num(self.max_gens, 1..).context("invalid max_gens")?;

        Ok(())
    }
}

fn check_num<T, R>(num: T, range: R) -> Result<()>
where
    T: PartialOrd + Debug,
    R: RangeBounds<T> + Debug,
{
    if !range.contains(&num) {
        bail!("number must be in the range {range:?}, but is {num:?}");
    }
    Ok(())
}

fn check_pos(num: f64) -> Result<()> {
    if !(num > 0.0 && num.is_finite()) {
        bail!("number must be positive and finite, but is {num:?}");
    }
    Ok(())
}
