//! R-test: likelihood ratio of two forecasts on the same grid.
//!
//! Catalogs simulated from each forecast are scored against both; the
//! resulting ratios, taken relative to the observed ratio, give `alpha`
//! (forecast 1 as the null hypothesis) and `beta` (forecast 2).

use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::catalog::Catalog;
use crate::error::{EvalError, Result};
use crate::evaluation::{RunContext, TestDetails, TestKind, TestResult, VectorName};
use crate::forecast::{Overlay, RateModel};
use crate::random::SeedKey;
use crate::simulation::{SimulationEngine, run_trials};
use crate::types::{BinIndex, SubIteration};

/// Sub-iteration shift for draws under the second forecast.
const SECOND_FORECAST_OFFSET: u32 = 2;

/// For every bin of `from`, the bin of `to` with the same lower corner.
fn bin_map(from: &RateModel, to: &RateModel) -> Result<Vec<BinIndex>> {
    let index = to.corner_index();
    from.bins()
        .iter()
        .enumerate()
        .map(|(i, b)| {
            index.get(&b.corner()).copied().ok_or_else(|| {
                EvalError::ShapeMismatch(format!(
                    "bin {i} of '{}' has no counterpart in '{}'",
                    from.name(),
                    to.name()
                ))
            })
        })
        .collect()
}

fn translate(overlay: &Overlay, map: &[BinIndex]) -> Overlay {
    let mut out = Overlay::default();
    for (&b, &n) in overlay.iter() {
        for _ in 0..n {
            out.add(map[b.0]);
        }
    }
    out
}

pub fn run(
    forecast1: &RateModel,
    forecast2: &RateModel,
    catalog: &Catalog,
    modifications: &[Catalog],
    ctx: &RunContext,
) -> Result<TestResult> {
    let kind = TestKind::Ratio;
    if forecast1.len() != forecast2.len() {
        return Err(EvalError::ShapeMismatch(format!(
            "'{}' has {} bins, '{}' has {}",
            forecast1.name(),
            forecast1.len(),
            forecast2.name(),
            forecast2.len()
        )));
    }
    let config = ctx.config;
    let m1 = forecast1.prepare(config.scale_factor, config.use_mask, Some(&forecast2.mask()))?.model;
    let m2 = forecast2.prepare(config.scale_factor, config.use_mask, Some(&forecast1.mask()))?.model;
    let to2 = bin_map(&m1, &m2)?;
    let to1 = bin_map(&m2, &m1)?;

    let ratio_of = |c: &Catalog| -> Result<f64> {
        let l1 = m1.log_likelihood(&m1.observe(c)?.overlay)?;
        let l2 = m2.log_likelihood(&m2.observe(c)?.overlay)?;
        Ok(l1 - l2)
    };
    let obs1 = m1.observe(catalog)?;
    let log_likelihood1 = m1.log_likelihood(&obs1.overlay)?;
    let log_likelihood2 = m2.log_likelihood(&m2.observe(catalog)?.overlay)?;
    let true_ratio = log_likelihood1 - log_likelihood2;
    debug!(forecast1 = m1.name(), forecast2 = m2.name(), true_ratio, "R-test observed ratio");

    let models = format!("{}_{}", m1.name(), m2.name());
    let engine1 = SimulationEngine::new(&m1);
    let engine2 = SimulationEngine::new(&m2);
    let pairs = run_trials(config.number_simulations, |i| {
        let key1 = SeedKey::new(kind.name(), &models, m1.name(), i, SubIteration::COUNT);
        let sim1 = engine1.simulate(None, &key1, ctx.stream)?;
        let r1 = m1.log_likelihood(&sim1.overlay)? - m2.log_likelihood(&translate(&sim1.overlay, &to2))?;

        let key2 = SeedKey::new(
            kind.name(),
            &models,
            m2.name(),
            i,
            SubIteration::COUNT.offset(SECOND_FORECAST_OFFSET),
        );
        let sim2 = engine2.simulate(None, &key2, ctx.stream)?;
        let r2 = m1.log_likelihood(&translate(&sim2.overlay, &to1))? - m2.log_likelihood(&sim2.overlay)?;

        Ok((-r2 + true_ratio, r1 - true_ratio))
    })?;
    let (data1, data2): (Vec<f64>, Vec<f64>) = pairs.into_iter().unzip();

    let modification_data = modifications
        .iter()
        .map(|m| Ok(ratio_of(m)? - true_ratio))
        .collect::<Result<Vec<f64>>>()?;

    let vectors = BTreeMap::from([
        (VectorName::ModelSimulationData1, data1),
        (VectorName::ModelSimulationData2, data2),
    ]);
    let details = TestDetails::Ratio { log_likelihood1, log_likelihood2, event_count: obs1.event_count() };
    Ok(TestResult::new(
        kind,
        vec![m1.name().to_string(), m2.name().to_string()],
        0.0,
        vectors,
        modification_data,
        details,
    ))
}

/// R-test of every forecast against every later one in the group.
pub fn evaluate_group(
    forecasts: &[RateModel],
    catalog: &Catalog,
    modifications: &[Catalog],
    ctx: &RunContext,
) -> Result<Vec<TestResult>> {
    let mut results = Vec::new();
    for (i, f1) in forecasts.iter().enumerate() {
        for f2 in &forecasts[i + 1..] {
            results.push(run(f1, f2, catalog, modifications, ctx)?);
        }
    }
    info!(forecasts = forecasts.len(), pairs = results.len(), "R-test group complete");
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Event;
    use crate::config::EvaluationConfig;
    use crate::evaluation::Statistic;
    use crate::random::SeededStream;
    use chrono::NaiveDate;

    fn event(lon: f64) -> Event {
        let time = NaiveDate::from_ymd_opt(2008, 1, 2).unwrap().and_hms_opt(0, 0, 0).unwrap();
        Event { lon, lat: 0.5, depth: 3.0, mag: 5.0, time }
    }

    fn forecast(name: &str, rates: &[f64], masks: &[f64]) -> RateModel {
        let rows: Vec<[f64; 10]> = rates
            .iter()
            .zip(masks)
            .enumerate()
            .map(|(i, (&r, &m))| [i as f64, i as f64 + 1.0, 0.0, 1.0, 0.0, 30.0, 4.95, 5.05, r, m])
            .collect();
        RateModel::from_rows(name, &rows).unwrap()
    }

    fn config(sims: u32) -> EvaluationConfig {
        let mut c = EvaluationConfig::canonical();
        c.number_simulations = sims;
        c
    }

    #[test]
    fn swapping_roles_swaps_alpha_and_beta() {
        let a = forecast("a", &[0.5, 1.5, 0.2, 0.8], &[1.0, 1.0, 1.0, 1.0]);
        let b = forecast("b", &[1.0, 0.4, 0.9, 0.3], &[1.0, 1.0, 0.0, 1.0]);
        let cat = Catalog::new(vec![event(1.5), event(3.2)]);
        let c = config(300);
        let stream = SeededStream::new(77);
        let ctx = RunContext { config: &c, stream: &stream };

        let ab = run(&a, &b, &cat, &[], &ctx).unwrap();
        let ba = run(&b, &a, &cat, &[], &ctx).unwrap();
        assert_eq!(ab.statistic(Statistic::Alpha), ba.statistic(Statistic::Beta));
        assert_eq!(ab.statistic(Statistic::Beta), ba.statistic(Statistic::Alpha));
        assert_eq!(ab.vector(VectorName::ModelSimulationData2), ba.vector(VectorName::ModelSimulationData1));
    }

    #[test]
    fn identical_forecasts_have_zero_ratios() {
        let a = forecast("a", &[0.5, 1.5], &[1.0, 1.0]);
        let b = forecast("b", &[0.5, 1.5], &[1.0, 1.0]);
        let c = config(20);
        let stream = SeededStream::new(1);
        let ctx = RunContext { config: &c, stream: &stream };
        let r = run(&a, &b, &Catalog::new(vec![event(0.5)]), &[], &ctx).unwrap();
        assert!(r.vector(VectorName::ModelSimulationData1).unwrap().iter().all(|&v| v == 0.0));
        assert_eq!(r.statistic(Statistic::Alpha), Some(1.0));
        assert_eq!(r.statistic(Statistic::Beta), Some(1.0));
    }

    #[test]
    fn masks_combined_before_scoring() {
        let a = forecast("a", &[0.5, 1.5, 9.0], &[1.0, 1.0, 1.0]);
        let b = forecast("b", &[0.5, 1.5, 0.1], &[1.0, 1.0, 0.0]);
        let c = config(5);
        let stream = SeededStream::new(1);
        let ctx = RunContext { config: &c, stream: &stream };
        let r = run(&a, &b, &Catalog::default(), &[], &ctx).unwrap();
        let TestDetails::Ratio { log_likelihood1, log_likelihood2, .. } = r.details else {
            panic!("wrong details");
        };
        // Bin 2 is masked out of both forecasts.
        assert!((log_likelihood1 + 2.0).abs() < 1e-12);
        assert!((log_likelihood2 + 2.0).abs() < 1e-12);
    }

    #[test]
    fn mismatched_grids_rejected() {
        let a = forecast("a", &[0.5, 1.5], &[1.0, 1.0]);
        let b = forecast("b", &[0.5], &[1.0]);
        let c = config(1);
        let stream = SeededStream::new(1);
        let ctx = RunContext { config: &c, stream: &stream };
        assert!(matches!(run(&a, &b, &Catalog::default(), &[], &ctx), Err(EvalError::ShapeMismatch(_))));
    }

    #[test]
    fn group_runs_each_pair_once() {
        let fs = vec![
            forecast("a", &[0.5, 1.5], &[1.0, 1.0]),
            forecast("b", &[1.0, 1.0], &[1.0, 1.0]),
            forecast("c", &[1.5, 0.5], &[1.0, 1.0]),
        ];
        let c = config(3);
        let stream = SeededStream::new(1);
        let ctx = RunContext { config: &c, stream: &stream };
        let results = evaluate_group(&fs, &Catalog::default(), &[], &ctx).unwrap();
        let labels: Vec<String> = results.iter().map(|r| r.models_label()).collect();
        assert_eq!(labels, vec!["a_b", "a_c", "b_c"]);
    }
}
