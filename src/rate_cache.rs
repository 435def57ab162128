//! Per-group cache of daily forecast rates for the T and W comparison tests.
//!
//! For every day from the group's cumulative start up to the test date the
//! cache adds each forecast's total rate over bins shared with every other
//! forecast, and records the rate each forecast assigned to the events of
//! that day. A later test date only processes the days not yet seen.

use std::collections::{BTreeMap, HashMap};

use chrono::{Days, NaiveDate};
use tracing::{debug, info, warn};

use crate::catalog::{Catalog, Event};
use crate::error::{EvalError, Result};
use crate::forecast::{Bin, RateModel};
use crate::types::GroupId;

/// Forecasts of one group for one period, `[start, end)`. Rates are totals
/// for the whole period.
#[derive(Debug, Clone)]
pub struct ForecastPeriod {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub models: Vec<RateModel>,
}

impl ForecastPeriod {
    pub fn days(&self) -> u64 {
        (self.end - self.start).num_days().max(1) as u64
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date < self.end
    }

    /// The period's forecasts with rates spread evenly over its days.
    pub fn daily(&self) -> Vec<RateModel> {
        let factor = 1.0 / self.days() as f64;
        self.models.iter().map(|m| m.scaled(factor)).collect()
    }
}

/// Where a group's forecasts come from on a given day.
#[derive(Debug, Clone)]
pub enum ForecastSource {
    /// One set of forecasts stands for every day (file-based forecasts, or a
    /// group whose cumulative start is not before the current period).
    Static(ForecastPeriod),
    /// Periods in ascending start order, e.g. archived daily forecasts.
    Dated(Vec<ForecastPeriod>),
}

impl ForecastSource {
    /// Static when the cumulative window does not reach back before the
    /// latest period, dated otherwise.
    pub fn for_window(cumulative_start: NaiveDate, mut periods: Vec<ForecastPeriod>) -> Result<Self> {
        periods.sort_by_key(|p| p.start);
        let latest = periods
            .last()
            .ok_or_else(|| EvalError::Config("forecast group has no forecast periods".into()))?;
        if cumulative_start >= latest.start {
            let latest = periods.pop().ok_or_else(|| EvalError::Config("no forecast period".into()))?;
            Ok(ForecastSource::Static(latest))
        } else {
            Ok(ForecastSource::Dated(periods))
        }
    }

    pub fn model_names(&self) -> Vec<String> {
        let period = match self {
            ForecastSource::Static(p) => Some(p),
            ForecastSource::Dated(ps) => ps.last(),
        };
        period.map(|p| p.models.iter().map(|m| m.name().to_string()).collect()).unwrap_or_default()
    }

    /// Latest period starting on or before `date`.
    fn period_for(&self, date: NaiveDate) -> Option<&ForecastPeriod> {
        match self {
            ForecastSource::Static(p) => Some(p),
            ForecastSource::Dated(ps) => ps.iter().rev().find(|p| p.start <= date),
        }
    }
}

/// An observed event with the rate each forecast of the group gave it.
/// `rates[i]` is NaN when forecast `i` had no unmasked bin for the event or
/// forecast a zero rate there.
#[derive(Debug, Clone, PartialEq)]
pub struct EventRates {
    pub event: Event,
    pub rates: Vec<f64>,
}

/// Bin test for rate lookup: the depth range is closed at the bottom.
fn holds(b: &Bin, e: &Event) -> bool {
    b.mask
        && b.min_lon <= e.lon
        && e.lon < b.max_lon
        && b.min_lat <= e.lat
        && e.lat < b.max_lat
        && b.depth_top <= e.depth
        && e.depth <= b.depth_bottom
        && b.min_mag <= e.mag
        && e.mag < b.max_mag
}

fn event_rate(model: &RateModel, event: &Event, date: NaiveDate) -> f64 {
    match model.bins().iter().find(|b| holds(b, event)) {
        Some(b) if b.rate == 0.0 => {
            warn!(model = model.name(), %date, lon = event.lon, lat = event.lat, "zero rate replaced by NaN");
            f64::NAN
        }
        Some(b) => b.rate,
        None => {
            debug!(model = model.name(), %date, lon = event.lon, lat = event.lat, "no rate for event");
            f64::NAN
        }
    }
}

#[derive(Debug, Clone)]
pub struct RateCache {
    models: Vec<String>,
    /// `sum_rates[i][j]`: cumulative rate of forecast `i` over bins unmasked
    /// in both `i` and `j`.
    sum_rates: Vec<Vec<f64>>,
    event_rates: Vec<EventRates>,
    start: Option<NaiveDate>,
    processed_through: Option<NaiveDate>,
}

impl RateCache {
    pub fn new(models: Vec<String>) -> Self {
        let n = models.len();
        RateCache {
            models,
            sum_rates: vec![vec![0.0; n]; n],
            event_rates: Vec::new(),
            start: None,
            processed_through: None,
        }
    }

    pub fn models(&self) -> &[String] {
        &self.models
    }

    pub fn sum_rate(&self, i: usize, j: usize) -> f64 {
        self.sum_rates[i][j]
    }

    pub fn sum_rates(&self) -> &[Vec<f64>] {
        &self.sum_rates
    }

    pub fn event_rates(&self) -> &[EventRates] {
        &self.event_rates
    }

    /// Rates forecast `i` gave to every cached event, in event order.
    pub fn rates_of(&self, i: usize) -> Vec<f64> {
        self.event_rates.iter().map(|e| e.rates[i]).collect()
    }

    pub fn processed_through(&self) -> Option<NaiveDate> {
        self.processed_through
    }

    fn reset(&mut self) {
        *self = RateCache::new(std::mem::take(&mut self.models));
    }

    /// Bring the cache up to `test_date`, processing each day from
    /// `cumulative_start` (or the day after the last one processed).
    /// An earlier test date, or a different start, rebuilds from scratch.
    /// On error the cache is left as it was.
    pub fn extend_to(
        &mut self,
        source: &ForecastSource,
        catalog: &Catalog,
        cumulative_start: NaiveDate,
        test_date: NaiveDate,
    ) -> Result<()> {
        let mut staged = self.clone();
        staged.advance(source, catalog, cumulative_start, test_date)?;
        *self = staged;
        Ok(())
    }

    fn advance(
        &mut self,
        source: &ForecastSource,
        catalog: &Catalog,
        cumulative_start: NaiveDate,
        test_date: NaiveDate,
    ) -> Result<()> {
        let stale = self.start != Some(cumulative_start)
            || self.processed_through.is_some_and(|last| last > test_date);
        if stale {
            self.reset();
            self.start = Some(cumulative_start);
        }
        let mut day = match self.processed_through {
            Some(last) => last + Days::new(1),
            None => cumulative_start,
        };

        let mut by_day: BTreeMap<NaiveDate, Vec<&Event>> = BTreeMap::new();
        for e in &catalog.events {
            by_day.entry(e.time.date()).or_default().push(e);
        }

        let static_source = matches!(source, ForecastSource::Static(_));
        let mut current: Option<(&ForecastPeriod, Vec<RateModel>)> = None;
        let mut days = 0u32;
        while day <= test_date {
            if let Some(period) = source.period_for(day)
                && current.as_ref().is_none_or(|(p, _)| !std::ptr::eq(*p, period))
            {
                debug!(start = %period.start, end = %period.end, days = period.days(), "forecast period");
                current = Some((period, period.daily()));
            }
            if let Some((period, models)) = &current {
                self.add_day(models)?;
                if static_source || period.contains(day) {
                    for e in by_day.get(&day).map(Vec::as_slice).unwrap_or(&[]) {
                        let rates = models.iter().map(|m| event_rate(m, e, day)).collect();
                        self.event_rates.push(EventRates { event: **e, rates });
                    }
                }
            }
            self.processed_through = Some(day);
            days += 1;
            day = day + Days::new(1);
        }
        info!(days, events = self.event_rates.len(), through = %test_date, "rate cache extended");
        Ok(())
    }

    fn add_day(&mut self, models: &[RateModel]) -> Result<()> {
        if models.len() != self.models.len() {
            return Err(EvalError::ShapeMismatch(format!(
                "{} forecasts for a cache of {}",
                models.len(),
                self.models.len()
            )));
        }
        if let Some(m) = models.iter().find(|m| m.len() != models[0].len()) {
            return Err(EvalError::ShapeMismatch(format!(
                "'{}' has {} bins, '{}' has {}",
                m.name(),
                m.len(),
                models[0].name(),
                models[0].len()
            )));
        }
        let masks: Vec<Vec<bool>> = models.iter().map(RateModel::mask).collect();
        for (i, m) in models.iter().enumerate() {
            for (j, other) in masks.iter().enumerate() {
                self.sum_rates[i][j] += m
                    .bins()
                    .iter()
                    .zip(other)
                    .filter(|(b, o)| b.mask && **o)
                    .map(|(b, _)| b.rate)
                    .sum::<f64>();
            }
        }
        Ok(())
    }
}

/// Rate caches shared across test runs, one per forecast group.
#[derive(Debug, Default)]
pub struct RateCacheService {
    caches: HashMap<GroupId, RateCache>,
}

impl RateCacheService {
    pub fn new() -> Self {
        Self::default()
    }

    /// The group's cache, replaced by an empty one if the model list changed.
    pub fn cache_for(&mut self, group: &GroupId, models: &[String]) -> &mut RateCache {
        let cache = self.caches.entry(group.clone()).or_insert_with(|| RateCache::new(models.to_vec()));
        if cache.models() != models {
            info!(%group, models = models.len(), "forecast set changed; rate cache reset");
            *cache = RateCache::new(models.to_vec());
        }
        cache
    }

    pub fn len(&self) -> usize {
        self.caches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.caches.is_empty()
    }
}
