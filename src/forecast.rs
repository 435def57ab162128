//! Gridded rate forecasts and the per-bin event counts laid over them.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::catalog::{Catalog, Event};
use crate::error::{EvalError, Result};
use crate::likelihood::{nan_sum, score};
use crate::types::BinIndex;

/// One space-depth-magnitude cell of a forecast.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bin {
    pub min_lon: f64,
    pub max_lon: f64,
    pub min_lat: f64,
    pub max_lat: f64,
    pub depth_top: f64,
    pub depth_bottom: f64,
    pub min_mag: f64,
    pub max_mag: f64,
    /// Expected number of events in the forecast period.
    pub rate: f64,
    pub mask: bool,
}

impl Bin {
    /// Half-open on every axis: `[min, max)`.
    pub fn contains(&self, e: &Event) -> bool {
        self.min_lon <= e.lon
            && e.lon < self.max_lon
            && self.min_lat <= e.lat
            && e.lat < self.max_lat
            && self.depth_top <= e.depth
            && e.depth < self.depth_bottom
            && self.min_mag <= e.mag
            && e.mag < self.max_mag
    }

    /// Lower corner used to pair bins across forecasts defined on the same grid.
    pub fn corner(&self) -> BinCorner {
        BinCorner([
            self.min_lon.to_bits(),
            self.min_lat.to_bits(),
            self.depth_top.to_bits(),
            self.min_mag.to_bits(),
        ])
    }

    fn spatial_key(&self) -> [u64; 6] {
        [
            self.min_lon.to_bits(),
            self.max_lon.to_bits(),
            self.min_lat.to_bits(),
            self.max_lat.to_bits(),
            self.depth_top.to_bits(),
            self.depth_bottom.to_bits(),
        ]
    }

    fn magnitude_key(&self) -> [u64; 2] {
        [self.min_mag.to_bits(), self.max_mag.to_bits()]
    }
}

/// `(min_lon, min_lat, depth_top, min_mag)` by bit pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BinCorner([u64; 4]);

/// An immutable rate-per-bin forecast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateModel {
    name: String,
    bins: Vec<Bin>,
}

/// A forecast after scaling and masking, ready to score.
#[derive(Debug, Clone)]
pub struct PreparedForecast {
    pub model: RateModel,
    /// False if masking dropped any bin.
    pub covers_whole_area: bool,
}

impl RateModel {
    pub fn new(name: impl Into<String>, bins: Vec<Bin>) -> Result<Self> {
        if let Some(bad) = bins.iter().find(|b| !(b.rate >= 0.0 && b.rate.is_finite())) {
            return Err(EvalError::NegativeRate(bad.rate));
        }
        Ok(RateModel { name: name.into(), bins })
    }

    /// Rows `minLon maxLon minLat maxLat depthTop depthBottom minMag maxMag rate mask`.
    pub fn from_rows(name: impl Into<String>, rows: &[[f64; 10]]) -> Result<Self> {
        let bins = rows
            .iter()
            .map(|r| Bin {
                min_lon: r[0],
                max_lon: r[1],
                min_lat: r[2],
                max_lat: r[3],
                depth_top: r[4],
                depth_bottom: r[5],
                min_mag: r[6],
                max_mag: r[7],
                rate: r[8],
                mask: r[9] != 0.0,
            })
            .collect();
        Self::new(name, bins)
    }

    /// Whitespace-separated text in `from_rows` column order. A missing mask column means 1.
    pub fn parse(name: impl Into<String>, text: &str) -> Result<Self> {
        let mut rows = Vec::new();
        for (i, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let parse_err = |message: String| EvalError::Parse { line: i + 1, message };
            let fields = line
                .split_whitespace()
                .map(|f| f.parse::<f64>().map_err(|e| parse_err(format!("'{f}': {e}"))))
                .collect::<Result<Vec<f64>>>()?;
            let mut row = [0.0; 10];
            match fields.len() {
                9 => {
                    row[..9].copy_from_slice(&fields);
                    row[9] = 1.0;
                }
                10 => row.copy_from_slice(&fields),
                n => return Err(parse_err(format!("expected 9 or 10 columns, found {n}"))),
            }
            if row[8] < 0.0 {
                return Err(parse_err(format!("negative rate {}", row[8])));
            }
            rows.push(row);
        }
        Self::from_rows(name, &rows)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bins(&self) -> &[Bin] {
        &self.bins
    }

    pub fn bin(&self, index: BinIndex) -> &Bin {
        &self.bins[index.0]
    }

    pub fn len(&self) -> usize {
        self.bins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }

    pub fn rates(&self) -> Vec<f64> {
        self.bins.iter().map(|b| b.rate).collect()
    }

    pub fn total_rate(&self) -> f64 {
        self.bins.iter().map(|b| b.rate).sum()
    }

    pub fn mask(&self) -> Vec<bool> {
        self.bins.iter().map(|b| b.mask).collect()
    }

    /// Every bin's rate multiplied by `factor`.
    pub fn scaled(&self, factor: f64) -> RateModel {
        let bins = self.bins.iter().map(|b| Bin { rate: b.rate * factor, ..*b }).collect();
        RateModel { name: self.name.clone(), bins }
    }

    /// Bins where `keep` is set, in order.
    pub fn restricted(&self, keep: &[bool]) -> Result<RateModel> {
        if keep.len() != self.bins.len() {
            return Err(EvalError::ShapeMismatch(format!(
                "mask of {} entries for forecast '{}' with {} bins",
                keep.len(),
                self.name,
                self.bins.len()
            )));
        }
        let bins = self.bins.iter().zip(keep).filter(|(_, k)| **k).map(|(b, _)| *b).collect();
        Ok(RateModel { name: self.name.clone(), bins })
    }

    /// Scale, then (with `use_mask`) keep only bins whose own mask and the
    /// optional extra `weights` are both set.
    pub fn prepare(&self, scale_factor: f64, use_mask: bool, weights: Option<&[bool]>) -> Result<PreparedForecast> {
        let scaled = self.scaled(scale_factor);
        if !use_mask {
            return Ok(PreparedForecast { model: scaled, covers_whole_area: true });
        }
        let keep: Vec<bool> = match weights {
            Some(w) => {
                if w.len() != self.bins.len() {
                    return Err(EvalError::ShapeMismatch(format!(
                        "weights of {} entries for forecast '{}' with {} bins",
                        w.len(),
                        self.name,
                        self.bins.len()
                    )));
                }
                self.bins.iter().zip(w).map(|(b, w)| b.mask && *w).collect()
            }
            None => self.mask(),
        };
        let covers_whole_area = keep.iter().all(|k| *k);
        Ok(PreparedForecast { model: scaled.restricted(&keep)?, covers_whole_area })
    }

    /// Indices of every bin containing `event`.
    pub fn locate(&self, event: &Event) -> Vec<BinIndex> {
        self.bins
            .iter()
            .enumerate()
            .filter(|(_, b)| b.contains(event))
            .map(|(i, _)| BinIndex(i))
            .collect()
    }

    /// Events falling in at least one bin.
    pub fn covered(&self, catalog: &Catalog) -> Catalog {
        catalog.filter(|e| self.bins.iter().any(|b| b.contains(e)))
    }

    pub fn corner_index(&self) -> HashMap<BinCorner, BinIndex> {
        self.bins.iter().enumerate().map(|(i, b)| (b.corner(), BinIndex(i))).collect()
    }

    /// Collapse onto the distinct magnitude ranges: rates summed over space and
    /// depth, spatial extents widened to cover every contributing bin.
    pub fn magnitude_marginal(&self) -> RateModel {
        self.marginal(Bin::magnitude_key)
    }

    /// Collapse onto the distinct spatial-depth cells, summing over magnitude.
    pub fn spatial_marginal(&self) -> RateModel {
        self.marginal(Bin::spatial_key)
    }

    fn marginal<K: std::hash::Hash + Eq>(&self, key: impl Fn(&Bin) -> K) -> RateModel {
        let mut slot: HashMap<K, usize> = HashMap::new();
        let mut bins: Vec<Bin> = Vec::new();
        for b in &self.bins {
            match slot.get(&key(b)).copied() {
                Some(i) => {
                    let m = &mut bins[i];
                    m.rate += b.rate;
                    m.min_lon = m.min_lon.min(b.min_lon);
                    m.max_lon = m.max_lon.max(b.max_lon);
                    m.min_lat = m.min_lat.min(b.min_lat);
                    m.max_lat = m.max_lat.max(b.max_lat);
                    m.depth_top = m.depth_top.min(b.depth_top);
                    m.depth_bottom = m.depth_bottom.max(b.depth_bottom);
                    m.min_mag = m.min_mag.min(b.min_mag);
                    m.max_mag = m.max_mag.max(b.max_mag);
                }
                None => {
                    slot.insert(key(b), bins.len());
                    bins.push(Bin { mask: true, ..*b });
                }
            }
        }
        RateModel { name: self.name.clone(), bins }
    }

    /// Bin the catalog. Each event is counted in every bin it falls in;
    /// its own log-likelihood is the NaN-aware sum over those bins taken
    /// right after it is counted.
    pub fn observe(&self, catalog: &Catalog) -> Result<Observation> {
        let mut overlay = Overlay::default();
        let mut event_log_likelihoods = Vec::with_capacity(catalog.len());
        let mut unmatched = 0;
        for e in &catalog.events {
            let hits = self.locate(e);
            if hits.is_empty() {
                unmatched += 1;
                continue;
            }
            let mut scores = Vec::with_capacity(hits.len());
            for &b in &hits {
                let n = overlay.add(b);
                scores.push(score(n, self.bin(b).rate)?);
            }
            event_log_likelihoods.push(nan_sum(&scores));
        }
        Ok(Observation { overlay, event_log_likelihoods, unmatched })
    }

    /// Joint log-likelihood of the counts in `overlay`: every untouched bin
    /// contributes `-rate`, touched bins their Poisson score, NaN excluded.
    pub fn log_likelihood(&self, overlay: &Overlay) -> Result<f64> {
        let mut total = -self.total_rate();
        for (&b, &n) in overlay.iter() {
            let rate = self.bin(b).rate;
            let s = score(n, rate)?;
            total += rate;
            if !s.is_nan() {
                total += s;
            }
        }
        Ok(total)
    }

    /// Per-bin counts, dense.
    pub fn counts(&self, overlay: &Overlay) -> Vec<u64> {
        (0..self.bins.len()).map(|i| overlay.count(BinIndex(i))).collect()
    }
}

/// Sparse event counts keyed by bin; never stored on the forecast itself.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Overlay {
    counts: BTreeMap<BinIndex, u64>,
}

impl Overlay {
    /// Count one event in `bin`, returning the new count.
    pub fn add(&mut self, bin: BinIndex) -> u64 {
        let n = self.counts.entry(bin).or_insert(0);
        *n += 1;
        *n
    }

    pub fn count(&self, bin: BinIndex) -> u64 {
        self.counts.get(&bin).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&BinIndex, &u64)> {
        self.counts.iter()
    }
}

/// Result of binning a catalog against a forecast.
#[derive(Debug, Clone)]
pub struct Observation {
    pub overlay: Overlay,
    pub event_log_likelihoods: Vec<f64>,
    /// Events outside every bin.
    pub unmatched: usize,
}

impl Observation {
    pub fn event_count(&self) -> u64 {
        self.event_log_likelihoods.len() as u64
    }
}
