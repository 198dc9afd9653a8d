//! Bounded in-process history of search failures.
//!
//! The diagnostics reporter reads this to answer "has search been failing
//! recently" without a round trip to the provider. Writes are best-effort
//! and silent; only the last [`CAPACITY`] entries are kept.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

pub const CAPACITY: usize = 10;

#[derive(Debug, Clone)]
pub struct SearchErrorEntry {
    pub timestamp: DateTime<Utc>,
    pub query: String,
    pub error: String,
}

#[derive(Debug, Default)]
pub struct SearchErrorLog {
    entries: Mutex<VecDeque<SearchErrorEntry>>,
}

impl SearchErrorLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, query: &str, error: &str) {
        let mut entries = self.entries.lock().expect("error log poisoned");
        if entries.len() == CAPACITY {
            entries.pop_front();
        }
        entries.push_back(SearchErrorEntry {
            timestamp: Utc::now(),
            query: query.to_string(),
            error: error.to_string(),
        });
    }

    pub fn recent(&self) -> Vec<SearchErrorEntry> {
        self.entries
            .lock()
            .expect("error log poisoned")
            .iter()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("error log poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
