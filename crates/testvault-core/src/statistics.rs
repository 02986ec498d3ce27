use crate::fingerprint::Fingerprint;
use serde::Serialize;
use std::collections::BTreeMap;
use testvault_store::schema::KEYWORD_STATISTICS;
use testvault_store::{ArchiveStore, Record, RowId, StoreResult};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct KeywordStats {
    pub calls: u64,
    pub max_execution_time: Option<i64>,
    pub min_execution_time: Option<i64>,
    pub cumulative_execution_time: Option<i64>,
    pub max_call_depth: u32,
}

/// Per-run keyword call statistics, flushed once when the run ends.
#[derive(Clone, Debug, Default)]
pub struct KeywordStatistics {
    entries: BTreeMap<Fingerprint, KeywordStats>,
}

impl KeywordStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, fingerprint: &str, elapsed: Option<i64>, call_depth: u32) {
        match self.entries.get_mut(fingerprint) {
            Some(stats) => {
                stats.calls += 1;
                if let Some(elapsed) = elapsed.filter(|elapsed| *elapsed != 0) {
                    stats.max_execution_time =
                        Some(stats.max_execution_time.map_or(elapsed, |max| max.max(elapsed)));
                    stats.min_execution_time =
                        Some(stats.min_execution_time.map_or(elapsed, |min| min.min(elapsed)));
                    stats.cumulative_execution_time =
                        Some(stats.cumulative_execution_time.unwrap_or(0) + elapsed);
                }
                stats.max_call_depth = stats.max_call_depth.max(call_depth);
            }
            None => {
                self.entries.insert(
                    fingerprint.to_string(),
                    KeywordStats {
                        calls: 1,
                        max_execution_time: elapsed,
                        min_execution_time: elapsed,
                        cumulative_execution_time: elapsed,
                        max_call_depth: call_depth,
                    },
                );
            }
        }
    }

    pub fn get(&self, fingerprint: &str) -> Option<&KeywordStats> {
        self.entries.get(fingerprint)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Writes every accumulated entry for `run_id` and clears the accumulator.
    pub fn flush(&mut self, store: &dyn ArchiveStore, run_id: RowId) -> StoreResult<usize> {
        let entries = std::mem::take(&mut self.entries);
        for (fingerprint, stats) in &entries {
            let record = Record::new()
                .with("fingerprint", fingerprint.as_str())
                .with("test_run_id", run_id)
                .with("calls", stats.calls as i64)
                .with("max_execution_time", stats.max_execution_time)
                .with("min_execution_time", stats.min_execution_time)
                .with("cumulative_execution_time", stats.cumulative_execution_time)
                .with("max_call_depth", stats.max_call_depth);
            store.insert(KEYWORD_STATISTICS, &record)?;
        }
        Ok(entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use testvault_store::MemoryArchiveStore;
    use testvault_store::schema::TEST_RUN;

    #[test]
    fn record_repeated_calls_expected_min_max_cumulative_and_depth() {
        let mut stats = KeywordStatistics::new();
        stats.record("fp", Some(10), 1);
        stats.record("fp", Some(4), 3);
        stats.record("fp", Some(0), 2);

        assert_eq!(
            stats.get("fp"),
            Some(&KeywordStats {
                calls: 3,
                max_execution_time: Some(10),
                min_execution_time: Some(4),
                cumulative_execution_time: Some(14),
                max_call_depth: 3,
            })
        );
    }

    #[test]
    fn flush_expected_rows_written_and_accumulator_cleared() {
        let store = MemoryArchiveStore::new();
        let mut stats = KeywordStatistics::new();
        stats.record("a", Some(1), 1);
        stats.record("b", Some(2), 2);

        let run_id = store
            .insert(TEST_RUN, &Record::new().with("schema_version", 3_i64))
            .expect("run");

        let written = stats.flush(&store, run_id).expect("flush");

        assert_eq!(written, 2);
        assert!(stats.is_empty());
        assert_eq!(store.row_count(KEYWORD_STATISTICS).expect("count"), 2);
    }
}
