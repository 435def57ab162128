use chrono::NaiveDate;

use csep::catalog::{Catalog, Event};
use csep::forecast::RateModel;

pub struct Grid {
    pub lon_cells: usize,
    pub lat_cells: usize,
    pub mag_bins: usize,
}

pub const SMALL: Grid = Grid { lon_cells: 10, lat_cells: 10, mag_bins: 5 };
pub const MEDIUM: Grid = Grid { lon_cells: 40, lat_cells: 40, mag_bins: 20 };
/// Roughly the size of a RELM testing region at 0.1° and 0.1 magnitude units.
pub const LARGE: Grid = Grid { lon_cells: 80, lat_cells: 97, mag_bins: 41 };

impl Grid {
    pub fn bins(&self) -> usize {
        self.lon_cells * self.lat_cells * self.mag_bins
    }
}

/// Gutenberg-Richter-like rates over a regular grid, every bin unmasked.
pub fn build_forecast(grid: &Grid, name: &str) -> RateModel {
    let mut rows = Vec::with_capacity(grid.bins());
    for x in 0..grid.lon_cells {
        for y in 0..grid.lat_cells {
            let cell = 1.0 + ((x * 7 + y * 13) % 17) as f64 / 17.0;
            for m in 0..grid.mag_bins {
                let mag = 4.95 + 0.1 * m as f64;
                let rate = 1e-3 * cell * 10f64.powf(-(mag - 4.95));
                rows.push([
                    x as f64 * 0.1,
                    (x + 1) as f64 * 0.1,
                    y as f64 * 0.1,
                    (y + 1) as f64 * 0.1,
                    0.0,
                    30.0,
                    mag,
                    mag + 0.1,
                    rate,
                    1.0,
                ]);
            }
        }
    }
    RateModel::from_rows(name, &rows).expect("valid grid")
}

/// `n` events spread over the grid.
pub fn build_catalog(grid: &Grid, n: usize) -> Catalog {
    let time = NaiveDate::from_ymd_opt(2008, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
    let events = (0..n)
        .map(|i| Event {
            lon: ((i * 31) % grid.lon_cells) as f64 * 0.1 + 0.05,
            lat: ((i * 17) % grid.lat_cells) as f64 * 0.1 + 0.05,
            depth: 10.0,
            mag: 5.0 + 0.1 * (i % grid.mag_bins.min(3)) as f64,
            time,
        })
        .collect();
    Catalog::new(events)
}
