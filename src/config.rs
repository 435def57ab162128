use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{EvalError, Result};

/// Where simulation uniforms come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeedMode {
    /// Derive every seed from the base seed; nothing touches disk.
    #[default]
    Seeded,
    /// Derive seeds as `Seeded` does and write one seed file per draw.
    Record,
    /// Read previously recorded seed files; a missing file is fatal.
    Replay,
}

impl std::str::FromStr for SeedMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "seeded" => Ok(SeedMode::Seeded),
            "record" => Ok(SeedMode::Record),
            "replay" => Ok(SeedMode::Replay),
            _ => Err(format!("unknown seed mode: {s}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationConfig {
    /// Monte-Carlo trials per test run.
    pub number_simulations: u32,
    pub seed: u64,
    pub seed_mode: SeedMode,
    /// Root of the seed-file tree; required for `record` and `replay`.
    pub seed_dir: Option<PathBuf>,
    /// Drop bins whose mask is unset before scoring.
    pub use_mask: bool,
    /// Applied to every forecast rate before scoring (forecast period scaling).
    pub scale_factor: f64,
    pub output_dir: PathBuf,
    /// Minimum cumulative catalog size for the T and W tests.
    pub min_statistical_events: usize,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self::canonical()
    }
}

impl EvaluationConfig {
    pub fn canonical() -> Self {
        EvaluationConfig {
            number_simulations: 1000,
            seed: 42,
            seed_mode: SeedMode::Seeded,
            seed_dir: None,
            use_mask: true,
            scale_factor: 1.0,
            output_dir: PathBuf::from("results"),
            min_statistical_events: 2,
        }
    }

    /// Read a TOML file; keys it omits keep their canonical values.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: EvaluationConfig =
            toml::from_str(&text).map_err(|e| EvalError::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.number_simulations == 0 {
            return Err(EvalError::Config("number_simulations must be positive".into()));
        }
        if !(self.scale_factor.is_finite() && self.scale_factor > 0.0) {
            return Err(EvalError::Config(format!(
                "scale_factor must be positive, got {}",
                self.scale_factor
            )));
        }
        if self.seed_mode != SeedMode::Seeded && self.seed_dir.is_none() {
            return Err(EvalError::Config(format!(
                "seed_mode {:?} requires seed_dir",
                self.seed_mode
            )));
        }
        Ok(())
    }
}
