//! Request history for Locus.
//!
//! Every orchestrated call is written to a [`HistorySink`] with its resolved
//! input, output, status and latency. [`InMemoryHistory`] is a bounded
//! reference sink that also answers paginated queries and aggregate
//! statistics.

mod stats;

pub use stats::{
    percentiles, CategoryCount, Distribution, HistoryStats, StatsFilter, STATS_PERCENTILES,
    TOP_CATEGORIES,
};

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

/// Fields supplied by the caller of [`HistorySink::record`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewHistoryRecord {
    pub endpoint: String,
    pub method: String,
    pub input: serde_json::Value,
    pub output: Option<serde_json::Value>,
    pub headers: BTreeMap<String, String>,
    pub status_code: u16,
    pub error_message: Option<String>,
    pub latency_ms: f64,
}

/// A stored history entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub id: u64,
    pub endpoint: String,
    pub method: String,
    pub input: serde_json::Value,
    pub output: Option<serde_json::Value>,
    pub headers: BTreeMap<String, String>,
    pub status_code: u16,
    pub error_message: Option<String>,
    pub latency_ms: f64,
    pub created_at: DateTime<Utc>,
}

/// Append-only destination for request history.
#[async_trait]
pub trait HistorySink: Send + Sync {
    /// Stores one record and returns its id.
    async fn record(&self, entry: NewHistoryRecord) -> Result<u64>;
}

/// Filters and pagination for history queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub status_code: Option<u16>,
    #[serde(default)]
    pub since: Option<DateTime<Utc>>,
}

fn default_limit() -> usize {
    100
}

impl Default for HistoryQuery {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            offset: 0,
            endpoint: None,
            status_code: None,
            since: None,
        }
    }
}

impl HistoryQuery {
    fn matches(&self, record: &HistoryRecord) -> bool {
        self.endpoint.as_deref().map_or(true, |e| record.endpoint == e)
            && self.status_code.map_or(true, |s| record.status_code == s)
            && self.since.map_or(true, |t| record.created_at >= t)
    }
}

/// One page of history, newest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryPage {
    pub count: usize,
    pub total: usize,
    pub total_pages: usize,
    pub current_page: usize,
    pub results: Vec<HistoryRecord>,
}

struct HistoryState {
    records: VecDeque<HistoryRecord>,
    next_id: u64,
}

/// Bounded in-memory history; the oldest records are evicted first.
pub struct InMemoryHistory {
    capacity: usize,
    state: RwLock<HistoryState>,
}

impl InMemoryHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: RwLock::new(HistoryState {
                records: VecDeque::new(),
                next_id: 1,
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.state.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().records.is_empty()
    }

    pub fn get(&self, id: u64) -> Option<HistoryRecord> {
        self.state
            .read()
            .records
            .iter()
            .find(|r| r.id == id)
            .cloned()
    }

    /// Returns matching records, newest first.
    pub fn query(&self, query: &HistoryQuery) -> HistoryPage {
        let state = self.state.read();
        let matching: Vec<&HistoryRecord> =
            state.records.iter().rev().filter(|r| query.matches(r)).collect();

        let total = matching.len();
        let limit = query.limit.max(1);
        let results = matching
            .into_iter()
            .skip(query.offset)
            .take(limit)
            .cloned()
            .collect::<Vec<_>>();

        HistoryPage {
            count: results.len(),
            total,
            total_pages: total.div_ceil(limit),
            current_page: query.offset / limit + 1,
            results,
        }
    }

    /// Aggregates the records matching `filter`.
    pub fn stats(&self, filter: &StatsFilter) -> HistoryStats {
        let query = filter.to_query(Utc::now());
        let state = self.state.read();
        stats::summarize(state.records.iter().filter(|r| query.matches(r)))
    }

    /// Drops records older than `age`, returning how many were removed.
    pub fn purge_older_than(&self, age: Duration) -> usize {
        let cutoff = match chrono::Duration::from_std(age) {
            Ok(age) => Utc::now() - age,
            Err(_) => return 0,
        };

        let mut state = self.state.write();
        let before = state.records.len();
        state.records.retain(|r| r.created_at >= cutoff);
        before - state.records.len()
    }
}

#[async_trait]
impl HistorySink for InMemoryHistory {
    async fn record(&self, entry: NewHistoryRecord) -> Result<u64> {
        let mut state = self.state.write();
        let id = state.next_id;
        state.next_id += 1;

        state.records.push_back(HistoryRecord {
            id,
            endpoint: entry.endpoint,
            method: entry.method,
            input: entry.input,
            output: entry.output,
            headers: entry.headers,
            status_code: entry.status_code,
            error_message: entry.error_message,
            latency_ms: entry.latency_ms,
            created_at: Utc::now(),
        });
        while state.records.len() > self.capacity {
            state.records.pop_front();
        }

        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(endpoint: &str, status_code: u16) -> NewHistoryRecord {
        NewHistoryRecord {
            endpoint: endpoint.to_string(),
            method: "POST".to_string(),
            input: json!({"features": [1.0]}),
            output: None,
            headers: BTreeMap::new(),
            status_code,
            error_message: None,
            latency_ms: 1.5,
        }
    }

    #[tokio::test]
    async fn test_ids_are_sequential() {
        let history = InMemoryHistory::new(10);
        assert_eq!(history.record(entry("/forward", 200)).await.unwrap(), 1);
        assert_eq!(history.record(entry("/forward", 200)).await.unwrap(), 2);
        assert_eq!(history.get(2).unwrap().endpoint, "/forward");
        assert!(history.get(3).is_none());
    }

    #[tokio::test]
    async fn test_capacity_evicts_oldest() {
        let history = InMemoryHistory::new(2);
        for _ in 0..3 {
            history.record(entry("/forward", 200)).await.unwrap();
        }
        assert_eq!(history.len(), 2);
        assert!(history.get(1).is_none());
        assert!(history.get(3).is_some());
    }

    #[tokio::test]
    async fn test_query_filters_and_pages() {
        let history = InMemoryHistory::new(100);
        for i in 0..5 {
            let status = if i % 2 == 0 { 200 } else { 400 };
            history.record(entry("/forward", status)).await.unwrap();
        }
        history.record(entry("/forward/geo", 200)).await.unwrap();

        let page = history.query(&HistoryQuery {
            endpoint: Some("/forward".to_string()),
            status_code: Some(200),
            limit: 2,
            ..Default::default()
        });
        assert_eq!(page.total, 3);
        assert_eq!(page.total_pages, 2);
        assert_eq!(page.current_page, 1);
        assert_eq!(page.results.iter().map(|r| r.id).collect::<Vec<_>>(), vec![5, 3]);

        let second = history.query(&HistoryQuery {
            endpoint: Some("/forward".to_string()),
            status_code: Some(200),
            limit: 2,
            offset: 2,
            ..Default::default()
        });
        assert_eq!(second.current_page, 2);
        assert_eq!(second.results.len(), 1);
        assert_eq!(second.results[0].id, 1);
    }

    #[tokio::test]
    async fn test_stats_filters() {
        let history = InMemoryHistory::new(10);
        history.record(entry("/forward", 200)).await.unwrap();
        history.record(entry("/forward", 400)).await.unwrap();
        history.record(entry("/forward/geo", 200)).await.unwrap();

        let all = history.stats(&StatsFilter::default());
        assert_eq!(all.total_requests, 3);
        assert_eq!(all.input_formats["list"], 3);
        assert_eq!(all.input_fields.unwrap().max, 1.0);

        let forward_ok = history.stats(&StatsFilter {
            hours: Some(1),
            endpoint: Some("/forward".to_string()),
            status_code: Some(200),
        });
        assert_eq!(forward_ok.total_requests, 1);
        assert_eq!(forward_ok.success_rate, 100.0);

        let none = history.stats(&StatsFilter {
            status_code: Some(500),
            ..Default::default()
        });
        assert_eq!(none.total_requests, 0);
        assert!(none.latency_ms.is_none());
    }

    #[tokio::test]
    async fn test_purge() {
        let history = InMemoryHistory::new(10);
        history.record(entry("/forward", 200)).await.unwrap();

        assert_eq!(history.purge_older_than(Duration::from_secs(3600)), 0);
        assert_eq!(history.len(), 1);

        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(history.purge_older_than(Duration::from_millis(1)), 1);
        assert!(history.is_empty());
    }
}
