//! Synthetic catalogs drawn from a forecast by inverse-transform sampling.

use rayon::prelude::*;

use crate::error::Result;
use crate::forecast::{Overlay, RateModel};
use crate::likelihood::poisson_ppf;
use crate::random::{RandomStream, SeedKey};
use crate::types::{BinIndex, SimulationIndex};

/// Sampling tables for one forecast, built once and shared by every trial.
pub struct SimulationEngine<'a> {
    forecast: &'a RateModel,
    /// `cumsum(rate) / total`, one entry per bin.
    cdf: Vec<f64>,
    total_rate: f64,
    /// Fallback when rounding leaves a draw above the last CDF entry.
    last_positive: Option<BinIndex>,
}

/// One simulated catalog, as counts over the forecast's bins.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SimulatedCatalog {
    pub overlay: Overlay,
    pub event_count: u64,
}

impl<'a> SimulationEngine<'a> {
    pub fn new(forecast: &'a RateModel) -> Self {
        let total_rate = forecast.total_rate();
        let mut running = 0.0;
        let cdf = forecast
            .bins()
            .iter()
            .map(|b| {
                running += b.rate;
                if total_rate > 0.0 { running / total_rate } else { 0.0 }
            })
            .collect();
        let last_positive = forecast.bins().iter().rposition(|b| b.rate > 0.0).map(BinIndex);
        SimulationEngine { forecast, cdf, total_rate, last_positive }
    }

    pub fn forecast(&self) -> &RateModel {
        self.forecast
    }

    pub fn total_rate(&self) -> f64 {
        self.total_rate
    }

    /// Poisson event count from a single uniform.
    pub fn draw_count(&self, key: &SeedKey, stream: &dyn RandomStream) -> Result<u64> {
        if self.total_rate <= 0.0 {
            return Ok(0);
        }
        let u = stream.uniforms(key, 1)?;
        Ok(poisson_ppf(u[0], self.total_rate))
    }

    /// Bin receiving a draw `u`: the first whose CDF exceeds it.
    pub fn bin_for(&self, u: f64) -> Option<BinIndex> {
        let i = self.cdf.partition_point(|&c| c <= u);
        if i < self.cdf.len() { Some(BinIndex(i)) } else { self.last_positive }
    }

    /// Scatter `count` events over the bins.
    pub fn place(&self, count: u64, key: &SeedKey, stream: &dyn RandomStream) -> Result<Overlay> {
        let mut overlay = Overlay::default();
        if count == 0 || self.last_positive.is_none() {
            return Ok(overlay);
        }
        for u in stream.uniforms(key, count as usize)? {
            if let Some(b) = self.bin_for(u) {
                overlay.add(b);
            }
        }
        Ok(overlay)
    }

    /// One synthetic catalog.
    ///
    /// Without `event_count` the count is drawn on `key.iteration` and the
    /// locations on the iteration after it; with a fixed count the locations
    /// use `key.iteration` itself.
    pub fn simulate(
        &self,
        event_count: Option<u64>,
        key: &SeedKey,
        stream: &dyn RandomStream,
    ) -> Result<SimulatedCatalog> {
        if self.total_rate <= 0.0 {
            return Ok(SimulatedCatalog::default());
        }
        let (count, location_key) = match event_count {
            Some(n) => (n, key.clone()),
            None => {
                let n = self.draw_count(key, stream)?;
                (n, key.with_iteration(key.iteration.offset(1)))
            }
        };
        let overlay = self.place(count, &location_key, stream)?;
        Ok(SimulatedCatalog { event_count: overlay.total(), overlay })
    }

    /// Log-likelihood of a simulated catalog under this forecast.
    pub fn score(&self, catalog: &SimulatedCatalog) -> Result<f64> {
        self.forecast.log_likelihood(&catalog.overlay)
    }
}

/// Run trials `1..=n` on the rayon pool; results come back in index order.
pub fn run_trials<T, F>(n: u32, trial: F) -> Result<Vec<T>>
where
    T: Send,
    F: Fn(SimulationIndex) -> Result<T> + Sync + Send,
{
    SimulationIndex::range(n).collect::<Vec<_>>().into_par_iter().map(trial).collect()
}
