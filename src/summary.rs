//! Before/after size comparison and the disposition actions it unlocks.

use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SizeChange {
    Smaller,
    Same,
    Larger,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Disposition {
    /// Commit the output and delete the original in one library change.
    Replace,
    /// Commit the output, leave the original alone.
    KeepBoth,
    /// Drop the output, no library change.
    Discard,
}

impl Disposition {
    pub fn as_str(self) -> &'static str {
        match self {
            Disposition::Replace => "replace",
            Disposition::KeepBoth => "keepBoth",
            Disposition::Discard => "discard",
        }
    }
}

pub const ALREADY_OPTIMAL_NOTE: &str =
    "The compressed video is not smaller than the original. The original is already well optimized, so it was kept.";

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultSummary {
    pub original_bytes: u64,
    pub output_bytes: u64,
    /// `output - original`; negative when space was saved.
    pub delta_bytes: i64,
    pub change: SizeChange,
    /// Share of the original saved, in percent. Negative when the output grew.
    pub savings_percent: f64,
}

impl ResultSummary {
    pub fn new(original_bytes: u64, output_bytes: u64) -> Self {
        let delta_bytes = output_bytes as i64 - original_bytes as i64;
        let change = match output_bytes.cmp(&original_bytes) {
            Ordering::Less => SizeChange::Smaller,
            Ordering::Equal => SizeChange::Same,
            Ordering::Greater => SizeChange::Larger,
        };
        let savings_percent = if original_bytes == 0 {
            0.0
        } else {
            let raw = -(delta_bytes as f64) / original_bytes as f64 * 100.0;
            (raw * 10.0).round() / 10.0
        };
        Self {
            original_bytes,
            output_bytes,
            delta_bytes,
            change,
            savings_percent,
        }
    }

    /// Replace is offered only for a strictly smaller output; equal size keeps the original.
    pub fn offers_replace(&self) -> bool {
        self.change == SizeChange::Smaller
    }

    pub fn offered_actions(&self) -> Vec<Disposition> {
        if self.offers_replace() {
            vec![Disposition::Replace, Disposition::KeepBoth]
        } else {
            vec![Disposition::Discard]
        }
    }

    pub fn offers(&self, action: Disposition) -> bool {
        self.offered_actions().contains(&action)
    }

    /// Explanation shown next to the actions, if any.
    pub fn note(&self) -> Option<&'static str> {
        (!self.offers_replace()).then_some(ALREADY_OPTIMAL_NOTE)
    }
}

/// `1.5 MB`-style size for alerts and logs.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
