//! Transient merge store for split-plan extraction.
//!
//! Both legs of a split query are materialized here under the uniform
//! message identity, deduplicating records at the retention boundary, then
//! streamed out as one homogeneous, key-ordered sequence.

use std::collections::BTreeMap;
use std::path::Path;

use tokio::io::AsyncWriteExt;

use extract_common::ExtractionResult;

use crate::backend::{MessageKey, ObsMessage};

/// In-memory merge store keyed by message identity.
#[derive(Debug, Default)]
pub struct MergeStore {
    messages: BTreeMap<MessageKey, ObsMessage>,
}

impl MergeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Import one leg's messages. A record already present under the same
    /// identity is kept; later imports never overwrite earlier ones.
    pub fn import<I: IntoIterator<Item = ObsMessage>>(&mut self, messages: I) -> usize {
        let mut inserted = 0;

        for message in messages {
            if let std::collections::btree_map::Entry::Vacant(entry) =
                self.messages.entry(message.key())
            {
                entry.insert(message);
                inserted += 1;
            }
        }

        inserted
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn messages(&self) -> impl Iterator<Item = &ObsMessage> {
        self.messages.values()
    }

    /// Stream the merged records to `dest` as key-ordered JSON lines;
    /// returns bytes written.
    pub async fn write_to(&self, dest: &Path) -> ExtractionResult<u64> {
        let mut file = tokio::fs::File::create(dest).await?;
        let mut written = 0u64;

        for message in self.messages.values() {
            let mut line = serde_json::to_vec(message)?;
            line.push(b'\n');
            file.write_all(&line).await?;
            written += line.len() as u64;
        }

        file.flush().await?;
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    fn message(station: &str, hour: u32, value: f64) -> ObsMessage {
        ObsMessage {
            network: "synop".to_string(),
            station: station.to_string(),
            lon: 11.34,
            lat: 44.5,
            reftime: Utc.with_ymd_and_hms(2024, 1, 10, hour, 0, 0).unwrap(),
            level: "103,2000".to_string(),
            timerange: "254,0,0".to_string(),
            varcode: "B12101".to_string(),
            value,
            confidence: None,
        }
    }

    #[test]
    fn test_import_deduplicates_by_identity() {
        let mut store = MergeStore::new();

        // The archive leg and the observation leg overlap on the boundary
        // record for station A at 06Z.
        store.import(vec![message("A", 0, 271.4), message("A", 6, 272.0)]);
        let inserted = store.import(vec![message("A", 6, 272.0), message("B", 6, 270.1)]);

        assert_eq!(inserted, 1);
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn test_first_import_wins() {
        let mut store = MergeStore::new();
        store.import(vec![message("A", 6, 272.0)]);
        store.import(vec![message("A", 6, 999.9)]);

        let values: Vec<f64> = store.messages().map(|m| m.value).collect();
        assert_eq!(values, vec![272.0]);
    }

    #[tokio::test]
    async fn test_write_is_key_ordered_json_lines() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("merged.json");

        let mut store = MergeStore::new();
        store.import(vec![message("B", 6, 270.1), message("A", 0, 271.4)]);

        let written = store.write_to(&dest).await.unwrap();
        assert!(written > 0);

        let content = std::fs::read_to_string(&dest).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        // Station A sorts before station B.
        assert!(lines[0].contains("\"station\":\"A\""));
        assert!(lines[1].contains("\"station\":\"B\""));
    }
}
