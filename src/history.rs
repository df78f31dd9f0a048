//! History manager: a fixed-capacity ring of request records with a
//! secondary channel index, rebuilt periodically to heal any drift.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone)]
pub struct RequestRecord {
    pub id: String,
    pub timestamp: SystemTime,
    pub channel_id: String,
    pub channel_type: String,
    pub model: String,
    pub success: bool,
    pub latency_ms: u64,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub error_msg: Option<String>,
    pub error_details: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct HistoryStats {
    pub total: usize,
    pub success: usize,
    pub failure: usize,
}

pub struct HistoryManager {
    capacity: usize,
    retention: Duration,
    ring: RwLock<Ring>,
}

struct Ring {
    slots: Vec<Option<RequestRecord>>,
    write_idx: usize,
    by_channel: HashMap<String, Vec<usize>>,
}

impl HistoryManager {
    pub fn new(capacity: usize, retention_hours: i64) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            retention: Duration::from_secs((retention_hours.max(0) as u64) * 3600),
            ring: RwLock::new(Ring {
                slots: vec![None; capacity],
                write_idx: 0,
                by_channel: HashMap::new(),
            }),
        }
    }

    pub fn record(&self, mut record: RequestRecord) {
        if record.id.is_empty() {
            record.id = uuid::Uuid::new_v4().to_string();
        }
        let mut ring = self.ring.write().unwrap();
        let idx = ring.write_idx;

        // De-index the slot being overwritten before clobbering it, so the
        // channel index never accumulates stale entries.
        if let Some(old) = ring.slots[idx].take() {
            if let Some(indices) = ring.by_channel.get_mut(&old.channel_id) {
                indices.retain(|&i| i != idx);
                if indices.is_empty() {
                    ring.by_channel.remove(&old.channel_id);
                }
            }
        }

        ring.by_channel
            .entry(record.channel_id.clone())
            .or_default()
            .push(idx);
        ring.slots[idx] = Some(record);
        ring.write_idx = (idx + 1) % self.capacity;
    }

    /// Walks the ring newest-first, applying the channel-id/status filters
    /// and retention cutoff before paginating.
    pub fn get_history(
        &self,
        channel_id: &str,
        limit: usize,
        offset: usize,
        status_filter: &str,
    ) -> (Vec<RequestRecord>, usize) {
        let ring = self.ring.read().unwrap();
        let cutoff = SystemTime::now()
            .checked_sub(self.retention)
            .unwrap_or(UNIX_EPOCH);

        let mut matched: Vec<RequestRecord> = Vec::new();
        let capacity = self.capacity;
        for step in 0..capacity {
            let idx = (ring.write_idx + capacity - 1 - step) % capacity;
            let Some(record) = ring.slots[idx].as_ref() else {
                continue;
            };
            if record.timestamp < cutoff {
                continue;
            }
            if !channel_id.is_empty() && record.channel_id != channel_id {
                continue;
            }
            match status_filter {
                "" => {}
                "success" if record.success => {}
                "error" if !record.success => {}
                "success" | "error" => continue,
                _ => continue,
            }
            matched.push(record.clone());
        }

        let total = matched.len();
        let page = matched.into_iter().skip(offset).take(limit).collect();
        (page, total)
    }

    pub fn get_record_by_id(&self, id: &str) -> Option<RequestRecord> {
        let ring = self.ring.read().unwrap();
        ring.slots
            .iter()
            .flatten()
            .find(|r| r.id == id)
            .cloned()
    }

    pub fn get_stats(&self) -> HistoryStats {
        let ring = self.ring.read().unwrap();
        let mut stats = HistoryStats::default();
        for record in ring.slots.iter().flatten() {
            stats.total += 1;
            if record.success {
                stats.success += 1;
            } else {
                stats.failure += 1;
            }
        }
        stats
    }

    pub fn clear(&self) {
        let mut ring = self.ring.write().unwrap();
        ring.slots = vec![None; self.capacity];
        ring.write_idx = 0;
        ring.by_channel.clear();
    }

    /// Rebuilds `by_channel` from scratch, healing any drift that might
    /// have accumulated. Intended to run every 10 minutes.
    pub fn rebuild_index(&self) {
        let mut ring = self.ring.write().unwrap();
        let mut fresh: HashMap<String, Vec<usize>> = HashMap::new();
        for (idx, slot) in ring.slots.iter().enumerate() {
            if let Some(record) = slot {
                fresh.entry(record.channel_id.clone()).or_default().push(idx);
            }
        }
        ring.by_channel = fresh;
    }

    #[cfg(test)]
    fn indexed_len(&self) -> usize {
        self.ring
            .read()
            .unwrap()
            .by_channel
            .values()
            .map(|v| v.len())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(channel_id: &str, success: bool) -> RequestRecord {
        RequestRecord {
            id: String::new(),
            timestamp: SystemTime::now(),
            channel_id: channel_id.to_string(),
            channel_type: "claude".to_string(),
            model: "claude-3-sonnet".to_string(),
            success,
            latency_ms: 10,
            input_tokens: 1,
            output_tokens: 1,
            error_msg: None,
            error_details: None,
        }
    }

    #[test]
    fn ring_stays_bounded_with_no_stale_index_entries() {
        let history = HistoryManager::new(10, 48);
        for i in 0..1000 {
            history.record(record(&format!("c{}", i % 3), true));
        }
        assert!(history.indexed_len() <= 10);
        let stats = history.get_stats();
        assert_eq!(stats.total, 10);
    }

    #[test]
    fn get_history_returns_newest_first_page() {
        let history = HistoryManager::new(1000, 48);
        for i in 0..1001u32 {
            let mut r = record("c1", true);
            r.model = i.to_string();
            history.record(r);
        }
        let (page, total) = history.get_history("", 10, 0, "");
        assert_eq!(page.len(), 10);
        assert_eq!(page[0].model, "1000");
        assert_eq!(total, 1000);
    }

    #[test]
    fn status_filter_selects_only_matching_records() {
        let history = HistoryManager::new(10, 48);
        history.record(record("c1", true));
        history.record(record("c1", false));
        let (success_only, _) = history.get_history("", 10, 0, "success");
        assert!(success_only.iter().all(|r| r.success));
        let (error_only, _) = history.get_history("", 10, 0, "error");
        assert!(error_only.iter().all(|r| !r.success));
    }
}
