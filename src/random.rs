//! Deterministic sources of uniform draws for Monte-Carlo trials.
//!
//! Every draw is addressed by a `SeedKey`, so a trial can be regenerated in
//! isolation, in any order, on any thread.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};

use crate::config::{EvaluationConfig, SeedMode};
use crate::error::{EvalError, Result};
use crate::types::{SimulationIndex, SubIteration};

/// Address of one slice of random numbers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SeedKey {
    /// Test name, e.g. `LTest`.
    pub test: String,
    /// Models taking part in the run, joined with `_`.
    pub models: String,
    /// The forecast whose catalog is being simulated.
    pub subject: String,
    pub index: SimulationIndex,
    pub iteration: SubIteration,
    /// Location draws of a trial whose event count is fixed in advance.
    #[serde(default)]
    pub fixed_count: bool,
}

impl SeedKey {
    pub fn new(
        test: &str,
        models: &str,
        subject: &str,
        index: SimulationIndex,
        iteration: SubIteration,
    ) -> Self {
        SeedKey {
            test: test.to_string(),
            models: models.to_string(),
            subject: subject.to_string(),
            index,
            iteration,
            fixed_count: false,
        }
    }

    /// The same address, marked as the location draws of a fixed-count trial.
    pub fn for_fixed_count(self) -> Self {
        SeedKey { fixed_count: true, ..self }
    }

    pub fn with_iteration(&self, iteration: SubIteration) -> Self {
        SeedKey { iteration, ..self.clone() }
    }

    pub fn directory_name(&self) -> String {
        format!("{}_{}-randomSeed", self.test, self.models)
    }

    pub fn file_name(&self) -> String {
        format!(
            "{}_{}-simulation{}_{}-randomSeed.txt",
            self.test, self.models, self.index.0, self.iteration.0
        )
    }
}

impl std::fmt::Display for SeedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}_{}[{}] simulation {} iteration {}",
            self.test, self.models, self.subject, self.index.0, self.iteration.0
        )
    }
}

pub trait RandomStream: Send + Sync {
    /// `n` uniforms in `[0, 1)` for `key`. Repeated calls return the same prefix.
    fn uniforms(&self, key: &SeedKey, n: usize) -> Result<Vec<f64>>;
}

fn fnv1a64(parts: &[&[u8]]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for part in parts {
        for &b in *part {
            hash ^= u64::from(b);
            hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
        }
        // Separator so ("ab","c") and ("a","bc") differ.
        hash ^= 0xff;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

fn generate(seed: u64, n: usize) -> Vec<f64> {
    let mut rng = ChaCha20Rng::seed_from_u64(seed);
    (0..n).map(|_| rng.random::<f64>()).collect()
}

/// Seeds derived from a base seed, the simulated forecast, the trial index
/// and whether the slice draws counts or locations.
///
/// The test name and model pairing do not enter the seed: a forecast
/// simulated at index `i` yields the same catalog in every test that asks
/// for it, which keeps a likelihood-ratio run and its role-swapped rerun
/// on identical catalogs.
#[derive(Debug, Clone, Copy)]
pub struct SeededStream {
    base: u64,
}

impl SeededStream {
    pub fn new(base: u64) -> Self {
        SeededStream { base }
    }

    pub fn seed_for(&self, key: &SeedKey) -> u64 {
        let kind: u8 = match (key.fixed_count, key.iteration.is_count_draw()) {
            (true, _) => 3,
            (false, true) => 1,
            (false, false) => 2,
        };
        fnv1a64(&[
            &self.base.to_le_bytes(),
            key.subject.as_bytes(),
            &key.index.0.to_le_bytes(),
            &[kind],
        ])
    }
}

impl RandomStream for SeededStream {
    fn uniforms(&self, key: &SeedKey, n: usize) -> Result<Vec<f64>> {
        Ok(generate(self.seed_for(key), n))
    }
}

/// Seeds kept on disk, one file per key, so archived runs can be reproduced.
#[derive(Debug, Clone)]
pub struct SeedFileStream {
    root: PathBuf,
    mode: SeedFileMode,
    seeds: SeededStream,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeedFileMode {
    Record,
    Replay,
}

impl SeedFileStream {
    pub fn new(root: impl Into<PathBuf>, mode: SeedFileMode, base_seed: u64) -> Self {
        SeedFileStream { root: root.into(), mode, seeds: SeededStream::new(base_seed) }
    }

    pub fn path_for(&self, key: &SeedKey) -> PathBuf {
        self.root.join(key.directory_name()).join(key.file_name())
    }

    fn read_seed(path: &Path, key: &SeedKey) -> Result<u64> {
        let text = std::fs::read_to_string(path).map_err(|_| EvalError::SeedUnavailable {
            key: key.to_string(),
            path: path.to_path_buf(),
        })?;
        text.trim().parse::<u64>().map_err(|e| EvalError::Parse {
            line: 1,
            message: format!("{}: {e}", path.display()),
        })
    }
}

impl RandomStream for SeedFileStream {
    fn uniforms(&self, key: &SeedKey, n: usize) -> Result<Vec<f64>> {
        let path = self.path_for(key);
        let seed = match self.mode {
            SeedFileMode::Replay => Self::read_seed(&path, key)?,
            SeedFileMode::Record => {
                let seed = self.seeds.seed_for(key);
                if let Some(dir) = path.parent() {
                    std::fs::create_dir_all(dir)?;
                }
                std::fs::write(&path, format!("{seed}\n"))?;
                seed
            }
        };
        Ok(generate(seed, n))
    }
}

/// Fixed values per key; used by tests and for replaying archived uniforms.
#[derive(Debug, Clone, Default)]
pub struct TableStream {
    table: HashMap<SeedKey, Vec<f64>>,
}

impl TableStream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: SeedKey, values: Vec<f64>) {
        self.table.insert(key, values);
    }
}

impl RandomStream for TableStream {
    fn uniforms(&self, key: &SeedKey, n: usize) -> Result<Vec<f64>> {
        let values = self.table.get(key).map(Vec::as_slice).unwrap_or(&[]);
        if values.len() < n {
            return Err(EvalError::SeedExhausted {
                key: key.to_string(),
                available: values.len(),
                requested: n,
            });
        }
        Ok(values[..n].to_vec())
    }
}

/// The stream selected by `seed_mode`.
pub fn from_config(config: &EvaluationConfig) -> Result<Box<dyn RandomStream>> {
    let file_stream = |mode: SeedFileMode| -> Result<Box<dyn RandomStream>> {
        let root = config
            .seed_dir
            .clone()
            .ok_or_else(|| EvalError::Config(format!("seed_mode {:?} requires seed_dir", config.seed_mode)))?;
        Ok(Box::new(SeedFileStream::new(root, mode, config.seed)))
    };
    match config.seed_mode {
        SeedMode::Seeded => Ok(Box::new(SeededStream::new(config.seed))),
        SeedMode::Record => file_stream(SeedFileMode::Record),
        SeedMode::Replay => file_stream(SeedFileMode::Replay),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(test: &str, subject: &str, index: u32, iteration: u32) -> SeedKey {
        SeedKey::new(test, "a_b", subject, SimulationIndex(index), SubIteration(iteration))
    }

    #[test]
    fn same_key_same_numbers() {
        let s = SeededStream::new(7);
        let a = s.uniforms(&key("LTest", "a", 1, 2), 5).unwrap();
        let b = s.uniforms(&key("LTest", "a", 1, 2), 8).unwrap();
        assert_eq!(a[..], b[..5]);
        assert!(a.iter().all(|u| (0.0..1.0).contains(u)));
    }

    #[test]
    fn distinct_slices_differ() {
        let s = SeededStream::new(7);
        let base = s.uniforms(&key("LTest", "a", 1, 2), 4).unwrap();
        assert_ne!(base, s.uniforms(&key("LTest", "a", 2, 2), 4).unwrap(), "index");
        assert_ne!(base, s.uniforms(&key("LTest", "b", 1, 2), 4).unwrap(), "subject");
        assert_ne!(base, s.uniforms(&key("LTest", "a", 1, 1), 4).unwrap(), "draw kind");
        assert_ne!(base, SeededStream::new(8).uniforms(&key("LTest", "a", 1, 2), 4).unwrap(), "base");
    }

    #[test]
    fn fixed_count_locations_have_their_own_slice() {
        let s = SeededStream::new(7);
        let count = s.uniforms(&key("LTest", "a", 1, 1), 4).unwrap();
        let fixed = s.uniforms(&key("CLTest", "a", 1, 1).for_fixed_count(), 4).unwrap();
        assert_ne!(count, fixed);
        let locations = s.uniforms(&key("LTest", "a", 1, 2), 4).unwrap();
        assert_ne!(locations, fixed);
        // Shared by every fixed-count test of the same forecast.
        assert_eq!(fixed, s.uniforms(&key("STest", "a", 1, 1).for_fixed_count(), 4).unwrap());
    }

    #[test]
    fn ratio_test_offset_maps_to_same_slice() {
        let s = SeededStream::new(3);
        let first_role = key("RTest", "b", 4, 2);
        let second_role = key("RTest", "b", 4, 4);
        assert_eq!(s.uniforms(&first_role, 6).unwrap(), s.uniforms(&second_role, 6).unwrap());
    }

    #[test]
    fn seed_file_names() {
        let k = key("NTest", "a", 12, 1);
        assert_eq!(k.directory_name(), "NTest_a_b-randomSeed");
        assert_eq!(k.file_name(), "NTest_a_b-simulation12_1-randomSeed.txt");
    }

    #[test]
    fn record_then_replay() {
        let dir = tempfile::tempdir().unwrap();
        let k = key("LTest", "a", 3, 2);
        let recorder = SeedFileStream::new(dir.path(), SeedFileMode::Record, 11);
        let recorded = recorder.uniforms(&k, 10).unwrap();
        assert!(recorder.path_for(&k).exists());

        // Replay ignores the base seed; the file is authoritative.
        let replayer = SeedFileStream::new(dir.path(), SeedFileMode::Replay, 999);
        assert_eq!(replayer.uniforms(&k, 10).unwrap(), recorded);
        assert_eq!(recorded, SeededStream::new(11).uniforms(&k, 10).unwrap());
    }

    #[test]
    fn replay_missing_file_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let replayer = SeedFileStream::new(dir.path(), SeedFileMode::Replay, 1);
        let err = replayer.uniforms(&key("LTest", "a", 1, 1), 1).unwrap_err();
        assert!(matches!(err, EvalError::SeedUnavailable { .. }), "{err}");
    }

    #[test]
    fn table_stream_serves_prefix_and_reports_shortfall() {
        let mut t = TableStream::new();
        let k = key("CLTest", "a", 1, 1);
        t.insert(k.clone(), vec![0.1, 0.2, 0.3]);
        assert_eq!(t.uniforms(&k, 2).unwrap(), vec![0.1, 0.2]);
        assert!(matches!(
            t.uniforms(&k, 4),
            Err(EvalError::SeedExhausted { available: 3, requested: 4, .. })
        ));
    }

    #[test]
    fn config_selects_stream() {
        let mut c = EvaluationConfig::canonical();
        assert!(from_config(&c).is_ok());
        c.seed_mode = SeedMode::Replay;
        assert!(matches!(from_config(&c), Err(EvalError::Config(_))));
    }
}
