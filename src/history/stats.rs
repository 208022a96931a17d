// Aggregate statistics over stored history

use super::{HistoryQuery, HistoryRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};

/// Percentiles reported for every distribution.
pub const STATS_PERCENTILES: [u8; 5] = [50, 75, 90, 95, 99];

/// How many categories are listed per parameter.
pub const TOP_CATEGORIES: usize = 10;

/// Which records a statistics snapshot covers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatsFilter {
    /// Only records from the last N hours; zero means no limit
    #[serde(default)]
    pub hours: Option<u32>,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub status_code: Option<u16>,
}

impl StatsFilter {
    pub(super) fn to_query(&self, now: DateTime<Utc>) -> HistoryQuery {
        HistoryQuery {
            endpoint: self.endpoint.clone(),
            status_code: self.status_code,
            since: self
                .hours
                .filter(|h| *h > 0)
                .map(|h| now - chrono::Duration::hours(i64::from(h))),
            ..Default::default()
        }
    }
}

/// Summary of one numeric series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Distribution {
    pub count: usize,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    pub percentiles: BTreeMap<u8, f64>,
}

impl Distribution {
    /// `None` for an empty series.
    pub fn from_values(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }

        Some(Self {
            count: values.len(),
            mean: values.iter().sum::<f64>() / values.len() as f64,
            min: values.iter().copied().fold(f64::INFINITY, f64::min),
            max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            percentiles: percentiles(values, &STATS_PERCENTILES),
        })
    }
}

/// A category value and how often it was requested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryCount {
    pub value: String,
    pub count: usize,
}

/// Statistics snapshot over the matching history records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryStats {
    pub total_requests: usize,
    pub successful_requests: usize,
    pub failed_requests: usize,
    /// Share of 200 responses, in percent
    pub success_rate: f64,
    /// Input shape counts: `list`, `dict` or `other`
    pub input_formats: BTreeMap<String, usize>,
    pub latency_ms: Option<Distribution>,
    /// Serialized input size in bytes
    pub input_size_bytes: Option<Distribution>,
    /// Feature values for vector inputs, request fields for semantic ones
    pub input_fields: Option<Distribution>,
    pub status_codes: BTreeMap<u16, usize>,
    pub top_establishment_types: Vec<CategoryCount>,
    pub top_cuisines: Vec<CategoryCount>,
}

/// Linearly interpolated percentiles of `data`.
///
/// Ranks above 100 are skipped; an empty series yields an empty map.
pub fn percentiles(data: &[f64], ranks: &[u8]) -> BTreeMap<u8, f64> {
    if data.is_empty() {
        return BTreeMap::new();
    }

    let mut sorted = data.to_vec();
    sorted.sort_by(f64::total_cmp);
    let last = sorted.len() - 1;

    ranks
        .iter()
        .filter(|p| **p <= 100)
        .map(|&p| {
            let index = f64::from(p) / 100.0 * last as f64;
            let lower = index.floor() as usize;
            let upper = (lower + 1).min(last);
            let value = if lower == upper {
                sorted[lower]
            } else {
                let fraction = index - lower as f64;
                sorted[lower] * (1.0 - fraction) + sorted[upper] * fraction
            };
            (p, value)
        })
        .collect()
}

pub(super) fn summarize<'a>(records: impl Iterator<Item = &'a HistoryRecord>) -> HistoryStats {
    let mut total = 0;
    let mut successful = 0;
    let mut latencies = Vec::new();
    let mut sizes = Vec::new();
    let mut fields = Vec::new();
    let mut formats: BTreeMap<String, usize> = BTreeMap::new();
    let mut status_codes: BTreeMap<u16, usize> = BTreeMap::new();
    let mut types: HashMap<String, usize> = HashMap::new();
    let mut cuisines: HashMap<String, usize> = HashMap::new();

    for record in records {
        total += 1;
        if record.status_code == 200 {
            successful += 1;
        }
        *status_codes.entry(record.status_code).or_default() += 1;
        latencies.push(record.latency_ms);

        if record.input.is_null() {
            continue;
        }
        sizes.push(record.input.to_string().len() as f64);

        let (format, field_count, request) = input_shape(&record.input);
        *formats.entry(format.to_string()).or_default() += 1;
        fields.push(field_count as f64);

        if let Some(request) = request.filter(|r| r.contains_key("lat") || r.contains_key("lon")) {
            count_category(&mut types, request.get("establishment_type"));
            count_category(&mut cuisines, request.get("cuisine"));
        }
    }

    HistoryStats {
        total_requests: total,
        successful_requests: successful,
        failed_requests: total - successful,
        success_rate: if total > 0 {
            successful as f64 / total as f64 * 100.0
        } else {
            0.0
        },
        input_formats: formats,
        latency_ms: Distribution::from_values(&latencies),
        input_size_bytes: Distribution::from_values(&sizes),
        input_fields: Distribution::from_values(&fields),
        status_codes,
        top_establishment_types: top(types),
        top_cuisines: top(cuisines),
    }
}

/// Classifies a stored input as `list`, `dict` or `other` with its field count.
fn input_shape(input: &Value) -> (&'static str, usize, Option<&Map<String, Value>>) {
    match input {
        Value::Object(map) => match (map.get("request"), map.get("features")) {
            (Some(Value::Object(request)), _) => ("dict", request.len(), Some(request)),
            (None, Some(Value::Array(features))) => ("list", features.len(), None),
            _ => ("dict", map.len(), Some(map)),
        },
        Value::Array(items) => ("list", items.len(), None),
        _ => ("other", 1, None),
    }
}

fn count_category(counts: &mut HashMap<String, usize>, value: Option<&Value>) {
    let value = match value {
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        Some(Value::Null) | Some(Value::String(_)) | None => return,
        Some(other) => other.to_string(),
    };
    *counts.entry(value).or_default() += 1;
}

/// Most frequent first; ties in name order.
fn top(counts: HashMap<String, usize>) -> Vec<CategoryCount> {
    let mut entries: Vec<CategoryCount> = counts
        .into_iter()
        .map(|(value, count)| CategoryCount { value, count })
        .collect();
    entries.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.value.cmp(&b.value)));
    entries.truncate(TOP_CATEGORIES);
    entries
}
