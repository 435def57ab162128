//! Test kinds, their statistics, and the result record every test produces.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::analysis::DistStats;
use crate::catalog::Catalog;
use crate::config::EvaluationConfig;
use crate::error::{EvalError, Result};
use crate::forecast::RateModel;
use crate::likelihood::poisson_cdf;
use crate::random::RandomStream;
use crate::{likelihood_test, number_test, ratio_test};

/// Margin around the observed count in the N-test CDF lookups. Ties land on
/// both sides, so `delta1 + delta2` can exceed 1.
pub const TIE_EPSILON: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TestKind {
    #[serde(rename = "NTest")]
    Number,
    #[serde(rename = "LTest")]
    Likelihood,
    #[serde(rename = "CLTest")]
    ConditionalLikelihood,
    #[serde(rename = "MTest")]
    Magnitude,
    #[serde(rename = "STest")]
    Spatial,
    #[serde(rename = "RTest")]
    Ratio,
}

impl TestKind {
    pub const ALL: [TestKind; 6] = [
        TestKind::Number,
        TestKind::Likelihood,
        TestKind::ConditionalLikelihood,
        TestKind::Magnitude,
        TestKind::Spatial,
        TestKind::Ratio,
    ];

    pub fn name(self) -> &'static str {
        match self {
            TestKind::Number => "NTest",
            TestKind::Likelihood => "LTest",
            TestKind::ConditionalLikelihood => "CLTest",
            TestKind::Magnitude => "MTest",
            TestKind::Spatial => "STest",
            TestKind::Ratio => "RTest",
        }
    }

    pub fn statistics(self) -> &'static [Statistic] {
        match self {
            TestKind::Number => &[Statistic::Delta1, Statistic::Delta2],
            TestKind::Likelihood => &[Statistic::Gamma],
            TestKind::ConditionalLikelihood => &[Statistic::Xi],
            TestKind::Magnitude => &[Statistic::Kappa],
            TestKind::Spatial => &[Statistic::Zeta],
            TestKind::Ratio => &[Statistic::Alpha, Statistic::Beta],
        }
    }

    /// Number of forecasts one run consumes.
    pub fn arity(self) -> usize {
        if self == TestKind::Ratio { 2 } else { 1 }
    }
}

impl std::fmt::Display for TestKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for TestKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let short = s.trim_end_matches("Test").trim_end_matches("-").to_uppercase();
        match short.as_str() {
            "N" => Ok(TestKind::Number),
            "L" => Ok(TestKind::Likelihood),
            "CL" => Ok(TestKind::ConditionalLikelihood),
            "M" => Ok(TestKind::Magnitude),
            "S" => Ok(TestKind::Spatial),
            "R" => Ok(TestKind::Ratio),
            _ => Err(format!("unknown test: {s}")),
        }
    }
}

/// Named per-run vectors that the cumulative summary sums element-wise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum VectorName {
    /// Forecast event count, one element.
    EventCountForecast,
    /// Simulated scores relative to the observed one.
    SimulationData,
    /// R-test: catalogs simulated from the second forecast.
    ModelSimulationData1,
    /// R-test: catalogs simulated from the first forecast.
    ModelSimulationData2,
}

impl VectorName {
    pub fn name(self) -> &'static str {
        match self {
            VectorName::EventCountForecast => "eventCountForecast",
            VectorName::SimulationData => "simulationData",
            VectorName::ModelSimulationData1 => "modelSimulationData1",
            VectorName::ModelSimulationData2 => "modelSimulationData2",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Statistic {
    Delta1,
    Delta2,
    Gamma,
    Xi,
    Kappa,
    Zeta,
    Alpha,
    Beta,
}

impl Statistic {
    pub fn name(self) -> &'static str {
        match self {
            Statistic::Delta1 => "delta1",
            Statistic::Delta2 => "delta2",
            Statistic::Gamma => "gamma",
            Statistic::Xi => "xi",
            Statistic::Kappa => "kappa",
            Statistic::Zeta => "zeta",
            Statistic::Alpha => "alpha",
            Statistic::Beta => "beta",
        }
    }

    /// Vector the statistic is computed from.
    pub fn source(self) -> VectorName {
        match self {
            Statistic::Delta1 | Statistic::Delta2 => VectorName::EventCountForecast,
            Statistic::Gamma | Statistic::Xi | Statistic::Kappa | Statistic::Zeta => {
                VectorName::SimulationData
            }
            Statistic::Alpha => VectorName::ModelSimulationData2,
            Statistic::Beta => VectorName::ModelSimulationData1,
        }
    }

    /// Value from a (possibly cumulative) true value and source vector.
    pub fn compute(self, true_value: f64, vector: &[f64]) -> f64 {
        match self {
            Statistic::Delta1 => match vector.first() {
                Some(&forecast) => 1.0 - poisson_cdf(true_value - TIE_EPSILON, forecast),
                None => f64::NAN,
            },
            Statistic::Delta2 => match vector.first() {
                Some(&forecast) => poisson_cdf(true_value + TIE_EPSILON, forecast),
                None => f64::NAN,
            },
            _ => frequency_of_occurrence(true_value, vector),
        }
    }
}

impl std::fmt::Display for Statistic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Fraction of `values` at or below `threshold`; NaN for an empty vector.
pub fn frequency_of_occurrence(threshold: f64, values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().filter(|&&v| v <= threshold).count() as f64 / values.len() as f64
}

/// One point of the forecast-count CDF reported by the N-test.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CdfPoint {
    pub event_count: i64,
    pub value: f64,
}

/// Per-test data reported alongside the summable vectors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum TestDetails {
    Number {
        event_count: u64,
        forecast_count: f64,
        cdf: Vec<CdfPoint>,
        /// One Poisson draw per trial.
        simulated_counts: Vec<f64>,
        empirical_delta1: f64,
        empirical_delta2: f64,
    },
    Likelihood {
        log_likelihood: f64,
        event_log_likelihoods: Vec<f64>,
        /// False when masking cut bins away, so per-event values do not sum to the total.
        sum_is_valid: bool,
        event_count: u64,
        simulation_stats: Option<DistStats>,
    },
    Ratio {
        log_likelihood1: f64,
        log_likelihood2: f64,
        event_count: u64,
    },
}

/// Output of one test run for one date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    pub kind: TestKind,
    pub models: Vec<String>,
    /// Observed statistic; stored as 0 when the vectors are already relative to it.
    pub true_value: f64,
    pub vectors: BTreeMap<VectorName, Vec<f64>>,
    pub statistics: BTreeMap<Statistic, f64>,
    /// Modified catalogs scored relative to the observed one (plain counts for the N-test).
    pub modification_data: Vec<f64>,
    pub details: TestDetails,
}

impl TestResult {
    pub fn new(
        kind: TestKind,
        models: Vec<String>,
        true_value: f64,
        vectors: BTreeMap<VectorName, Vec<f64>>,
        modification_data: Vec<f64>,
        details: TestDetails,
    ) -> Self {
        let statistics = kind
            .statistics()
            .iter()
            .map(|&s| {
                let v = vectors.get(&s.source()).map(Vec::as_slice).unwrap_or(&[]);
                (s, s.compute(true_value, v))
            })
            .collect();
        TestResult { kind, models, true_value, vectors, statistics, modification_data, details }
    }

    pub fn statistic(&self, s: Statistic) -> Option<f64> {
        self.statistics.get(&s).copied()
    }

    pub fn vector(&self, name: VectorName) -> Option<&[f64]> {
        self.vectors.get(&name).map(Vec::as_slice)
    }

    /// `models` joined the way seed keys and file names expect.
    pub fn models_label(&self) -> String {
        self.models.join("_")
    }
}

/// Everything a test run needs besides its forecasts and catalogs.
pub struct RunContext<'a> {
    pub config: &'a EvaluationConfig,
    pub stream: &'a dyn RandomStream,
}

/// Run one test. Single-forecast tests take `forecasts[0]`; the R-test takes two.
pub fn evaluate(
    kind: TestKind,
    forecasts: &[&RateModel],
    catalog: &Catalog,
    modifications: &[Catalog],
    ctx: &RunContext,
) -> Result<TestResult> {
    if forecasts.len() != kind.arity() {
        return Err(EvalError::ShapeMismatch(format!(
            "{kind} takes {} forecast(s), {} given",
            kind.arity(),
            forecasts.len()
        )));
    }
    let result = match kind {
        TestKind::Number => number_test::run(forecasts[0], catalog, modifications, ctx)?,
        TestKind::Likelihood
        | TestKind::ConditionalLikelihood
        | TestKind::Magnitude
        | TestKind::Spatial => likelihood_test::run(kind, forecasts[0], catalog, modifications, ctx)?,
        TestKind::Ratio => ratio_test::run(forecasts[0], forecasts[1], catalog, modifications, ctx)?,
    };
    for (s, v) in &result.statistics {
        info!(test = %kind, models = %result.models_label(), statistic = %s, value = v, "test complete");
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frequency_counts_ties() {
        assert_eq!(frequency_of_occurrence(1.0, &[0.5, 1.0, 1.5, 2.0]), 0.5);
        assert!(frequency_of_occurrence(0.0, &[]).is_nan());
    }

    #[test]
    fn delta_from_forecast_vector() {
        let d1 = Statistic::Delta1.compute(2.0, &[2.5]);
        let d2 = Statistic::Delta2.compute(2.0, &[2.5]);
        assert!((d1 - 0.712_702_504_816_354_22).abs() < 1e-12);
        assert!((d2 - 0.543_813_115_883_329_48).abs() < 1e-12);
        assert!(Statistic::Delta1.compute(2.0, &[]).is_nan());
    }

    #[test]
    fn ratio_statistics_read_opposite_vectors() {
        let data1: Vec<f64> = (0..10).map(|i| 1.0 + i as f64 / 10.0).collect();
        let data2: Vec<f64> = (0..10).map(|i| 2.0 + i as f64 / 10.0).collect();
        let vectors = BTreeMap::from([
            (VectorName::ModelSimulationData1, data1),
            (VectorName::ModelSimulationData2, data2),
        ]);
        let r = TestResult::new(
            TestKind::Ratio,
            vec!["a".into(), "b".into()],
            1.5,
            vectors,
            vec![],
            TestDetails::Ratio { log_likelihood1: 0.0, log_likelihood2: 0.0, event_count: 0 },
        );
        assert_eq!(r.statistic(Statistic::Alpha), Some(0.0));
        assert_eq!(r.statistic(Statistic::Beta), Some(0.6));
        assert_eq!(r.models_label(), "a_b");
    }

    #[test]
    fn kind_names_round_trip() {
        for kind in TestKind::ALL {
            assert_eq!(kind.name().parse::<TestKind>(), Ok(kind));
        }
        assert_eq!("cl".parse::<TestKind>(), Ok(TestKind::ConditionalLikelihood));
        assert!("Q".parse::<TestKind>().is_err());
    }

    #[test]
    fn every_statistic_has_a_kind() {
        let all: Vec<Statistic> = TestKind::ALL.iter().flat_map(|k| k.statistics().iter().copied()).collect();
        assert_eq!(all.len(), 8);
        assert_eq!(serde_json::to_string(&Statistic::Delta1).unwrap(), "\"delta1\"");
        assert_eq!(serde_json::to_string(&VectorName::ModelSimulationData2).unwrap(), "\"modelSimulationData2\"");
    }
}
