//! Inputs of the chart computation and the keys derived from them.
//!
//! The lookup key rounds coordinates coarsely so nearby requests share an
//! entry; the integrity key keeps finer precision and is stored next to the
//! payload. A stored entry is only served when both agree.

use crate::domain::cache_key::make_cache_key;
use serde::{Deserialize, Serialize};

/// Schema version of cached charts.
pub const CHART_CACHE_VERSION: u32 = 1;

/// Key prefix of cached charts.
pub const CHART_CACHE_PREFIX: &str = "chart";

/// Decimal places kept in the lookup key.
pub const LOOKUP_PRECISION: u32 = 2;

/// Decimal places kept in the integrity key.
pub const INTEGRITY_PRECISION: u32 = 4;

/// Functional inputs of a chart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartInput {
    /// Birth date, `YYYY-MM-DD`
    pub date: String,
    /// Local birth time, `HH:MM`
    pub time: String,
    pub latitude: f64,
    pub longitude: f64,
}

impl ChartInput {
    pub fn new(
        date: impl Into<String>,
        time: impl Into<String>,
        latitude: f64,
        longitude: f64,
    ) -> Self {
        Self {
            date: date.into(),
            time: time.into(),
            latitude,
            longitude,
        }
    }

    /// Key used to look the chart up in the store.
    pub fn lookup_key(&self) -> String {
        make_cache_key(
            CHART_CACHE_PREFIX,
            [
                ("date", self.date.clone()),
                ("time", self.time.clone()),
                ("lat", round_fixed(self.latitude, LOOKUP_PRECISION)),
                ("lng", round_fixed(self.longitude, LOOKUP_PRECISION)),
            ],
            CHART_CACHE_VERSION,
        )
    }

    /// Key stored with the payload and re-derived on every read.
    pub fn integrity_key(&self) -> String {
        format!(
            "{}|{}|{}|{}",
            self.date,
            self.time,
            round_fixed(self.latitude, INTEGRITY_PRECISION),
            round_fixed(self.longitude, INTEGRITY_PRECISION)
        )
    }
}

/// Round to `places` decimals and format with exactly that many digits.
///
/// Negative zero is normalized so `-0.00001` and `0.00001` agree.
pub fn round_fixed(value: f64, places: u32) -> String {
    let factor = 10f64.powi(places as i32);
    let rounded = (value * factor).round() / factor;
    let rounded = if rounded == 0.0 { 0.0 } else { rounded };
    format!("{:.*}", places as usize, rounded)
}
