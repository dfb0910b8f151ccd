use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Mutex;

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct TraceEntry {
    pub trigger: String,
    pub at_ms: u64,
    pub ok: bool,
    pub result: Value,
}

/// In-memory record of finished flow runs, oldest dropped first once `capacity` is hit.
#[derive(Debug)]
pub struct TraceLog {
    capacity: usize,
    entries: Mutex<VecDeque<TraceEntry>>,
}

impl TraceLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(VecDeque::new()),
        }
    }

    pub fn record(&self, trigger: &str, ok: bool, result: Value) {
        let Ok(mut entries) = self.entries.lock() else {
            tracing::warn!("trace log poisoned; dropping {} trace", trigger);
            return;
        };
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(TraceEntry {
            trigger: trigger.to_string(),
            at_ms: common::now_ms(),
            ok,
            result,
        });
    }

    pub fn entries_for(&self, trigger: &str) -> Vec<TraceEntry> {
        self.entries
            .lock()
            .map(|entries| {
                entries
                    .iter()
                    .filter(|entry| entry.trigger == trigger)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Drops every trace for `trigger`, returning how many were removed.
    pub fn purge(&self, trigger: &str) -> usize {
        let Ok(mut entries) = self.entries.lock() else {
            return 0;
        };
        let before = entries.len();
        entries.retain(|entry| entry.trigger != trigger);
        before - entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::TraceLog;
    use serde_json::json;

    #[test]
    fn traces_are_scoped_per_trigger_and_purgeable() {
        let log = TraceLog::new(8);
        log.record("!rse", true, json!({"status": "success"}));
        log.record("!locate", true, json!(["a.txt"]));
        log.record("!rse", false, json!({"status": "error"}));

        let rse = log.entries_for("!rse");
        assert_eq!(rse.len(), 2);
        assert!(rse[0].ok);
        assert!(!rse[1].ok);

        assert_eq!(log.purge("!rse"), 2);
        assert!(log.entries_for("!rse").is_empty());
        assert_eq!(log.entries_for("!locate").len(), 1);
    }

    #[test]
    fn capacity_evicts_oldest() {
        let log = TraceLog::new(2);
        for n in 0..3 {
            log.record("!ps", true, json!(n));
        }
        let kept: Vec<_> = log
            .entries_for("!ps")
            .into_iter()
            .map(|entry| entry.result)
            .collect();
        assert_eq!(kept, vec![json!(1), json!(2)]);
    }
}
