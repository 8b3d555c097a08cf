use crate::model::Strategy;
use anyhow::{Result, bail};

/// Build the strategy space for `n_types` power levels and `n_thresholds` threshold levels.
///
/// Powers are `i / (n_types + 1)` for `i = 1..=n_types`. For each power, every pair
/// `run_threshold = j / (n_thresholds + 1) <= fight_threshold = (j + k) / (n_thresholds + 1)`
/// with `j = 1..=n_thresholds` and `k = 0..=n_thresholds - j` is included.
pub fn generate_strategies(n_types: usize, n_thresholds: usize) -> Result<Vec<Strategy>> {
    if n_types < 1 {
        bail!("number of types must be at least 1, but is {n_types}");
    }
    if n_thresholds < 1 {
        bail!("number of thresholds must be at least 1, but is {n_thresholds}");
    }

    let type_step = 1.0 / (n_types + 1) as f64;
    let thresh_step = 1.0 / (n_thresholds + 1) as f64;

    let n_pairs = n_thresholds * (n_thresholds + 1) / 2;
    let mut strategies = Vec::with_capacity(n_types * n_pairs);
    for i in 1..=n_types {
        for j in 1..=n_thresholds {
            for k in 0..=(n_thresholds - j) {
                strategies.push(Strategy {
                    power: i as f64 * type_step,
                    run_threshold: j as f64 * thresh_step,
                    fight_threshold: (j + k) as f64 * thresh_step,
                });
            }
        }
    }

    Ok(strategies)
}
