use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::error::{EvalError, Result};

/// One located earthquake.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub lon: f64,
    pub lat: f64,
    /// Kilometres, positive down.
    pub depth: f64,
    pub mag: f64,
    pub time: NaiveDateTime,
}

/// An ordered list of events: the observed catalog for a test date, or a
/// modification of it (e.g. with location uncertainty applied).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    pub events: Vec<Event>,
}

impl Catalog {
    pub fn new(events: Vec<Event>) -> Self {
        Catalog { events }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Parse ZMAP-style rows `lon lat depth mag year month day hour minute second`.
    /// Blank lines and `#` comments are skipped; seconds may be fractional.
    pub fn parse(text: &str) -> Result<Self> {
        let mut events = Vec::new();
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
            if fields.len() < 10 {
                return Err(parse_err(format!("expected 10 columns, found {}", fields.len())));
            }
            let time = zmap_time(&fields[4..10]).ok_or_else(|| parse_err("invalid date/time".into()))?;
            events.push(Event { lon: fields[0], lat: fields[1], depth: fields[2], mag: fields[3], time });
        }
        Ok(Catalog { events })
    }

    /// Events at or after `start`.
    pub fn since(&self, start: NaiveDateTime) -> Catalog {
        self.filter(|e| e.time >= start)
    }

    /// Events in `[start, end)`.
    pub fn between(&self, start: NaiveDateTime, end: NaiveDateTime) -> Catalog {
        self.filter(|e| e.time >= start && e.time < end)
    }

    pub fn filter(&self, keep: impl Fn(&Event) -> bool) -> Catalog {
        Catalog { events: self.events.iter().filter(|e| keep(e)).copied().collect() }
    }

    /// Calendar days touched by the catalog, ascending.
    pub fn dates(&self) -> Vec<NaiveDate> {
        let mut dates: Vec<NaiveDate> = self.events.iter().map(|e| e.time.date()).collect();
        dates.sort();
        dates.dedup();
        dates
    }
}

fn zmap_time(fields: &[f64]) -> Option<NaiveDateTime> {
    let date = NaiveDate::from_ymd_opt(fields[0] as i32, fields[1] as u32, fields[2] as u32)?;
    let seconds = fields[5].max(0.0);
    let whole = seconds.floor();
    let micros = ((seconds - whole) * 1e6).round() as u32;
    date.and_hms_micro_opt(fields[3] as u32, fields[4] as u32, whole as u32, micros.min(999_999))
}
