//! Per-day decision and event counts over the ledgers.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use super::ledger::{LedgerContents, LedgerEntry};

pub const INDEX_SCHEMA: &str = "quantlab_promotion_index_v1";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexCounts {
    pub decisions_total: usize,
    pub events_total: usize,
    pub days_total: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayCounts {
    pub day: String,
    pub decisions: usize,
    pub events: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromotionIndex {
    pub schema: String,
    pub generated_at: String,
    pub artifacts: BTreeMap<String, String>,
    pub counts: IndexCounts,
    /// Ascending by day.
    pub by_day: Vec<DayCounts>,
}

/// `YYYY-MM-DD` prefix of an ISO timestamp, or `unknown`.
fn day_of(ts: &str) -> String {
    ts.get(..10).map_or_else(|| "unknown".to_string(), str::to_string)
}

impl PromotionIndex {
    pub fn build<D: LedgerEntry, E: LedgerEntry>(
        decisions: &LedgerContents<D>,
        events: &LedgerContents<E>,
        decisions_path: &Path,
        events_path: &Path,
        generated_at: &str,
    ) -> Self {
        let mut by_day: BTreeMap<String, (usize, usize)> = BTreeMap::new();
        for d in &decisions.entries {
            by_day.entry(day_of(d.ledger_ts())).or_default().0 += 1;
        }
        for e in &events.entries {
            by_day.entry(day_of(e.ledger_ts())).or_default().1 += 1;
        }

        let artifacts = BTreeMap::from([
            ("promotion_decisions_ndjson".to_string(), decisions_path.display().to_string()),
            ("promotion_events_ndjson".to_string(), events_path.display().to_string()),
        ]);
        Self {
            schema: INDEX_SCHEMA.to_string(),
            generated_at: generated_at.to_string(),
            artifacts,
            counts: IndexCounts {
                decisions_total: decisions.entries.len(),
                events_total: events.entries.len(),
                days_total: by_day.len(),
            },
            by_day: by_day
                .into_iter()
                .map(|(day, (decisions, events))| DayCounts { day, decisions, events })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Row {
        id: String,
        ts: String,
    }

    impl LedgerEntry for Row {
        fn ledger_id(&self) -> &str {
            &self.id
        }
        fn ledger_ts(&self) -> &str {
            &self.ts
        }
    }

    fn contents(ts: &[&str]) -> LedgerContents<Row> {
        LedgerContents {
            entries: ts
                .iter()
                .enumerate()
                .map(|(i, t)| Row {
                    id: i.to_string(),
                    ts: t.to_string(),
                })
                .collect(),
            malformed: 0,
        }
    }

    #[test]
    fn counts_per_day() {
        let decisions = contents(&["2024-06-28T10:00:00Z", "2024-06-28T11:00:00Z", "2024-07-01T09:00:00Z", "bad"]);
        let events = contents(&["2024-06-28T10:00:00Z"]);
        let index = PromotionIndex::build(
            &decisions,
            &events,
            Path::new("d.ndjson"),
            Path::new("e.ndjson"),
            "2024-07-01T09:00:00Z",
        );
        assert_eq!(
            index.counts,
            IndexCounts {
                decisions_total: 4,
                events_total: 1,
                days_total: 3
            }
        );
        let days: Vec<&str> = index.by_day.iter().map(|d| d.day.as_str()).collect();
        assert_eq!(days, vec!["2024-06-28", "2024-07-01", "unknown"]);
        assert_eq!(index.by_day[0].decisions, 2);
        assert_eq!(index.by_day[0].events, 1);
    }
}
