//! Cumulative evaluation results across test dates.
//!
//! Each date keeps its raw true value and summable vectors. A running total
//! of all dates is maintained alongside, and every statistic of the test is
//! derived per date from the totals of that date and all earlier ones, so
//! inserting or replacing an earlier date rewrites every later derived value.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{EvalError, Result};
use crate::evaluation::{Statistic, TestKind, TestResult, VectorName};

/// Agreement required between running totals and a full replay.
pub const RECOMPUTE_TOLERANCE: f64 = 1e-12;

/// A true value with its summable vectors: one date's record, or a running total.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Totals {
    pub true_value: f64,
    pub vectors: BTreeMap<VectorName, Vec<f64>>,
}

impl Totals {
    fn add(&mut self, other: &Totals) {
        self.true_value += other.true_value;
        for (name, v) in &other.vectors {
            let sum = self.vectors.entry(*name).or_insert_with(|| vec![0.0; v.len()]);
            for (s, x) in sum.iter_mut().zip(v) {
                *s += x;
            }
        }
    }

    /// `(self + new) - old`, element-wise.
    fn replace(&mut self, new: &Totals, old: &Totals) {
        self.true_value = (self.true_value + new.true_value) - old.true_value;
        for (name, sum) in self.vectors.iter_mut() {
            if let (Some(n), Some(o)) = (new.vectors.get(name), old.vectors.get(name)) {
                for ((s, n), o) in sum.iter_mut().zip(n).zip(o) {
                    *s = (*s + n) - o;
                }
            }
        }
    }

    pub fn statistic(&self, s: Statistic) -> f64 {
        let v = self.vectors.get(&s.source()).map(Vec::as_slice).unwrap_or(&[]);
        s.compute(self.true_value, v)
    }

    fn max_difference(&self, other: &Totals) -> f64 {
        let mut drift = (self.true_value - other.true_value).abs();
        for (name, v) in &self.vectors {
            match other.vectors.get(name) {
                Some(o) if o.len() == v.len() => {
                    for (a, b) in v.iter().zip(o) {
                        drift = drift.max((a - b).abs());
                    }
                }
                _ => return f64::INFINITY,
            }
        }
        drift
    }
}

/// Every vector of `expected` present in `actual` with the same length, and no extras.
fn check_lengths(expected: &Totals, actual: &BTreeMap<VectorName, Vec<f64>>) -> Result<()> {
    for (name, v) in &expected.vectors {
        let len = actual.get(name).map_or(0, Vec::len);
        if len != v.len() {
            return Err(EvalError::VectorLengthMismatch { name: name.name().to_string(), expected: v.len(), actual: len });
        }
    }
    match actual.iter().find(|(n, _)| !expected.vectors.contains_key(*n)) {
        Some((name, v)) => {
            Err(EvalError::VectorLengthMismatch { name: name.name().to_string(), expected: 0, actual: v.len() })
        }
        None => Ok(()),
    }
}

impl From<&TestResult> for Totals {
    fn from(r: &TestResult) -> Self {
        Totals { true_value: r.true_value, vectors: r.vectors.clone() }
    }
}

/// Outcome of [`CumulativeSummary::recompute`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecomputeReport {
    /// Largest absolute difference between the stored running totals and the replay.
    pub max_drift: f64,
    pub consistent: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CumulativeSummary {
    kind: TestKind,
    models: Vec<String>,
    records: BTreeMap<NaiveDate, Totals>,
    cumulative: Totals,
    /// One entry per record date, ascending.
    derived: BTreeMap<Statistic, Vec<f64>>,
}

impl CumulativeSummary {
    pub fn new(kind: TestKind, models: Vec<String>) -> Self {
        let derived = kind.statistics().iter().map(|&s| (s, Vec::new())).collect();
        CumulativeSummary { kind, models, records: BTreeMap::new(), cumulative: Totals::default(), derived }
    }

    pub fn kind(&self) -> TestKind {
        self.kind
    }

    pub fn models(&self) -> &[String] {
        &self.models
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn dates(&self) -> Vec<NaiveDate> {
        self.records.keys().copied().collect()
    }

    pub fn record(&self, date: NaiveDate) -> Option<&Totals> {
        self.records.get(&date)
    }

    pub fn cumulative(&self) -> &Totals {
        &self.cumulative
    }

    /// Derived values of `s`, aligned with [`dates`](Self::dates).
    pub fn statistic(&self, s: Statistic) -> Option<&[f64]> {
        self.derived.get(&s).map(Vec::as_slice)
    }

    fn validate(&self, result: &TestResult) -> Result<()> {
        if result.kind != self.kind {
            return Err(EvalError::ShapeMismatch(format!(
                "{} result offered to a {} summary",
                result.kind, self.kind
            )));
        }
        if result.models != self.models {
            return Err(EvalError::ShapeMismatch(format!(
                "result for [{}] offered to the summary of [{}]",
                result.models.join(", "),
                self.models.join(", ")
            )));
        }
        if self.records.is_empty() {
            return Ok(());
        }
        check_lengths(&self.cumulative, &result.vectors)
    }

    /// Fold `result` in as the record for `date`, replacing any earlier
    /// record for that date. Nothing changes if validation fails.
    pub fn update(&mut self, result: &TestResult, date: NaiveDate) -> Result<()> {
        self.validate(result)?;
        let incoming = Totals::from(result);

        let was_empty = self.records.is_empty();
        match self.records.insert(date, incoming.clone()) {
            Some(old) if old == incoming => {
                debug!(test = %self.kind, %date, "record unchanged");
                return Ok(());
            }
            Some(old) => {
                debug!(test = %self.kind, %date, "replacing record");
                self.cumulative.replace(&incoming, &old);
            }
            None => {
                if was_empty {
                    self.cumulative = incoming;
                } else {
                    self.cumulative.add(&incoming);
                }
                let at = self.index_of(date);
                for values in self.derived.values_mut() {
                    values.insert(at, f64::NAN);
                }
            }
        }

        let at = self.index_of(date);
        if at + 1 == self.records.len() {
            for (s, values) in self.derived.iter_mut() {
                values[at] = self.cumulative.statistic(*s);
            }
        } else {
            debug!(test = %self.kind, %date, later = self.records.len() - at - 1, "replaying later dates");
            self.cumulative = self.replay(at);
        }
        Ok(())
    }

    fn index_of(&self, date: NaiveDate) -> usize {
        self.records.range(..date).count()
    }

    /// Recompute derived values from `from` onward by summing records in
    /// date order; returns the totals over all records.
    fn replay(&mut self, from: usize) -> Totals {
        let mut running: Option<Totals> = None;
        for (k, record) in self.records.values().enumerate() {
            match running.as_mut() {
                Some(r) => r.add(record),
                None => running = Some(record.clone()),
            }
            if k >= from
                && let Some(r) = &running
            {
                for (s, values) in self.derived.iter_mut() {
                    values[k] = r.statistic(*s);
                }
            }
        }
        running.unwrap_or_default()
    }

    /// Rebuild every derived value and the running totals from the raw
    /// records, reporting how far the stored totals had drifted.
    pub fn recompute(&mut self) -> RecomputeReport {
        for values in self.derived.values_mut() {
            values.clear();
            values.resize(self.records.len(), f64::NAN);
        }
        let replayed = self.replay(0);
        let max_drift = if self.records.is_empty() { 0.0 } else { self.cumulative.max_difference(&replayed) };
        let consistent = max_drift <= RECOMPUTE_TOLERANCE;
        if !consistent {
            warn!(test = %self.kind, max_drift, "running totals drifted from records; resynchronised");
        }
        self.cumulative = replayed;
        RecomputeReport { max_drift, consistent }
    }
}

/// On-disk form. Non-finite statistic values are stored as `null`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SummaryDocument {
    test: TestKind,
    models: Vec<String>,
    test_date: Vec<NaiveDate>,
    #[serde(flatten)]
    statistics: BTreeMap<Statistic, Vec<Option<f64>>>,
    cumulative: Totals,
    test_results: Vec<Totals>,
}

impl From<&CumulativeSummary> for SummaryDocument {
    fn from(s: &CumulativeSummary) -> Self {
        SummaryDocument {
            test: s.kind,
            models: s.models.clone(),
            test_date: s.dates(),
            statistics: s
                .derived
                .iter()
                .map(|(k, v)| (*k, v.iter().map(|x| x.is_finite().then_some(*x)).collect()))
                .collect(),
            cumulative: s.cumulative.clone(),
            test_results: s.records.values().cloned().collect(),
        }
    }
}

impl TryFrom<SummaryDocument> for CumulativeSummary {
    type Error = EvalError;

    fn try_from(doc: SummaryDocument) -> Result<Self> {
        if doc.test_date.len() != doc.test_results.len() {
            return Err(EvalError::ShapeMismatch(format!(
                "{} dates for {} test results",
                doc.test_date.len(),
                doc.test_results.len()
            )));
        }
        if let Some(w) = doc.test_date.windows(2).find(|w| w[0] >= w[1]) {
            return Err(EvalError::ShapeMismatch(format!("test dates out of order at {} then {}", w[0], w[1])));
        }
        for record in &doc.test_results {
            check_lengths(&doc.cumulative, &record.vectors)?;
        }
        let mut summary = CumulativeSummary::new(doc.test, doc.models);
        summary.records = doc.test_date.into_iter().zip(doc.test_results).collect();
        for (s, values) in summary.derived.iter_mut() {
            let stored = doc.statistics.get(s).cloned().unwrap_or_default();
            if stored.len() != summary.records.len() {
                return Err(EvalError::VectorLengthMismatch {
                    name: s.name().to_string(),
                    expected: summary.records.len(),
                    actual: stored.len(),
                });
            }
            *values = stored.into_iter().map(|x| x.unwrap_or(f64::NAN)).collect();
        }
        summary.cumulative = doc.cumulative;
        Ok(summary)
    }
}

/// JSON file holding one summary, replaced atomically on save.
#[derive(Debug, Clone)]
pub struct SummaryStore {
    path: PathBuf,
}

impl SummaryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        SummaryStore { path: path.into() }
    }

    /// `<dir>/<test>_<models>-cumulative.json`
    pub fn for_test(dir: &Path, kind: TestKind, models: &[String]) -> Self {
        SummaryStore::new(dir.join(format!("{}_{}-cumulative.json", kind.name(), models.join("_"))))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `None` when no summary has been saved yet.
    pub fn load(&self) -> Result<Option<CumulativeSummary>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(&self.path)?;
        let doc: SummaryDocument = serde_json::from_str(&contents)?;
        Ok(Some(CumulativeSummary::try_from(doc)?))
    }

    pub fn load_or_new(&self, kind: TestKind, models: &[String]) -> Result<CumulativeSummary> {
        Ok(self.load()?.unwrap_or_else(|| CumulativeSummary::new(kind, models.to_vec())))
    }

    pub fn save(&self, summary: &CumulativeSummary) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp_path = self.path.with_extension("json.tmp");
        let json = serde_json::to_vec_pretty(&SummaryDocument::from(summary))?;
        {
            let mut file = OpenOptions::new().create(true).write(true).truncate(true).open(&tmp_path)?;
            file.write_all(&json)?;
            file.flush()?;
        }
        fs::rename(&tmp_path, &self.path)?;
        info!(path = %self.path.display(), dates = summary.len(), "summary saved");
        Ok(())
    }
}
