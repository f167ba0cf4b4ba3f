/// Per-height undo log shared by the Glyph, Swap and WAVE indexes.
///
/// Each index keeps one `UndoLog` per column family. Before the first write
/// to a given key at a given height, the caller records that key's prior
/// value (`None` if the key didn't exist). At flush time the accumulated
/// entries for that height are bincode-serialized and written under the
/// index's undo-prefix key last, after every other write for that height —
/// so a crash mid-flush never leaves an undo record pointing at writes that
/// didn't happen. `backup` walks the entries in reverse and either restores
/// the prior value or deletes the key, then removes the undo record itself.
/// `prune` drops undo records older than the configured reorg window.
use byteorder::{BigEndian, WriteBytesExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::atomic_writer::AtomicBatchWriter;
use crate::error::IndexResult;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UndoEntry {
    pub key: Vec<u8>,
    pub prior_value: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct UndoRecord {
    pub entries: Vec<UndoEntry>,
}

pub struct UndoLog {
    cf_name: &'static str,
    prefix: &'static [u8],
    pending: HashMap<u32, UndoRecord>,
    seen_keys: HashMap<u32, std::collections::HashSet<Vec<u8>>>,
}

impl UndoLog {
    pub fn new(cf_name: &'static str, prefix: &'static [u8]) -> Self {
        Self {
            cf_name,
            prefix,
            pending: HashMap::new(),
            seen_keys: HashMap::new(),
        }
    }

    /// Builds the key an undo record for `height` is stored under:
    /// `prefix || height (big-endian)`.
    pub fn undo_key(prefix: &[u8], height: u32) -> Vec<u8> {
        let mut key = Vec::with_capacity(prefix.len() + 4);
        key.extend_from_slice(prefix);
        key.write_u32::<BigEndian>(height).unwrap();
        key
    }

    /// Records the prior value of `key` at `height`, once. Subsequent calls
    /// for the same (height, key) pair within the same flush are no-ops —
    /// the first prior value seen this height is the only one that matters
    /// for rollback.
    pub fn record(&mut self, height: u32, key: Vec<u8>, prior_value: Option<Vec<u8>>) {
        let seen = self.seen_keys.entry(height).or_default();
        if seen.contains(&key) {
            return;
        }
        seen.insert(key.clone());
        self.pending
            .entry(height)
            .or_default()
            .entries
            .push(UndoEntry { key, prior_value });
    }

    /// Serializes and writes the accumulated undo record for `height` into
    /// `batch`, then clears the in-memory accumulator. Must be called after
    /// every other write for this height has been added to `batch`.
    pub fn flush(&mut self, batch: &mut AtomicBatchWriter, height: u32) -> IndexResult<()> {
        if let Some(record) = self.pending.remove(&height) {
            self.seen_keys.remove(&height);
            if record.entries.is_empty() {
                return Ok(());
            }
            let bytes = bincode::serialize(&record)
                .map_err(|e| crate::error::IndexError::Corrupt(e.to_string()))?;
            batch.put(self.cf_name, Self::undo_key(self.prefix, height), bytes);
        }
        Ok(())
    }

    /// Replays the undo record for `height` (read from `db`) in reverse,
    /// restoring prior values or deleting keys that didn't exist before,
    /// then deletes the undo record itself. Used when a reorg rolls a
    /// height back out of the chain.
    pub fn backup(
        &self,
        db: &rocksdb::DB,
        batch: &mut AtomicBatchWriter,
        height: u32,
    ) -> IndexResult<()> {
        let cf = db
            .cf_handle(self.cf_name)
            .ok_or_else(|| crate::error::IndexError::Config(format!("missing cf {}", self.cf_name)))?;
        let undo_key = Self::undo_key(self.prefix, height);
        let Some(bytes) = db.get_cf(&cf, &undo_key)? else {
            return Ok(());
        };
        let record: UndoRecord = bincode::deserialize(&bytes)
            .map_err(|e| crate::error::IndexError::Corrupt(e.to_string()))?;
        for entry in record.entries.into_iter().rev() {
            match entry.prior_value {
                Some(v) => batch.put(self.cf_name, entry.key, v),
                None => batch.delete(self.cf_name, entry.key),
            }
        }
        batch.delete(self.cf_name, undo_key);
        Ok(())
    }

    /// Deletes undo records for heights at or below the prunable horizon
    /// (`current_height - reorg_window`), keeping the reorg window intact.
    pub fn prune(
        &self,
        db: &rocksdb::DB,
        batch: &mut AtomicBatchWriter,
        current_height: u32,
        reorg_window: u32,
    ) -> IndexResult<()> {
        let Some(horizon) = current_height.checked_sub(reorg_window) else {
            return Ok(());
        };
        let cf = db
            .cf_handle(self.cf_name)
            .ok_or_else(|| crate::error::IndexError::Config(format!("missing cf {}", self.cf_name)))?;
        let iter = db.prefix_iterator_cf(&cf, self.prefix);
        for item in iter {
            let (key, _) = item?;
            if !key.starts_with(self.prefix) {
                break;
            }
            let height_bytes = &key[self.prefix.len()..];
            if height_bytes.len() != 4 {
                continue;
            }
            let height = u32::from_be_bytes([
                height_bytes[0],
                height_bytes[1],
                height_bytes[2],
                height_bytes[3],
            ]);
            if height <= horizon {
                batch.delete(self.cf_name, key.to_vec());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rocksdb::{Options, DB};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn test_db() -> (Arc<DB>, TempDir) {
        let dir = TempDir::new().unwrap();
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        let db = DB::open_cf(&opts, dir.path(), &["glyph"]).unwrap();
        (Arc::new(db), dir)
    }

    #[test]
    fn undo_key_encodes_height_big_endian() {
        let k = UndoLog::undo_key(b"GXU", 1);
        assert_eq!(k, vec![b'G', b'X', b'U', 0, 0, 0, 1]);
    }

    #[test]
    fn record_keeps_first_prior_value_only() {
        let mut log = UndoLog::new("glyph", b"GXU");
        log.record(10, b"k".to_vec(), Some(b"v1".to_vec()));
        log.record(10, b"k".to_vec(), Some(b"v2".to_vec()));
        let record = log.pending.get(&10).unwrap();
        assert_eq!(record.entries.len(), 1);
        assert_eq!(record.entries[0].prior_value, Some(b"v1".to_vec()));
    }

    #[tokio::test]
    async fn flush_clears_pending_for_empty_record() {
        let (db, _dir) = test_db();
        let mut writer = AtomicBatchWriter::new(db, 1000);
        let mut log = UndoLog::new("glyph", b"GXU");
        log.flush(&mut writer, 5).unwrap();
        assert!(log.pending.get(&5).is_none());
    }

    #[tokio::test]
    async fn flush_then_backup_restores_prior_value() {
        let (db, _dir) = test_db();
        let mut writer = AtomicBatchWriter::new(db.clone(), 1000);
        let mut log = UndoLog::new("glyph", b"GXU");

        log.record(10, b"k".to_vec(), None);
        writer.put("glyph", b"k".to_vec(), b"v1".to_vec());
        log.flush(&mut writer, 10).unwrap();
        writer.flush().await.unwrap();

        let cf = db.cf_handle("glyph").unwrap();
        assert_eq!(db.get_cf(&cf, b"k").unwrap(), Some(b"v1".to_vec()));

        let mut backup_writer = AtomicBatchWriter::new(db.clone(), 1000);
        log.backup(&db, &mut backup_writer, 10).unwrap();
        backup_writer.flush().await.unwrap();

        assert_eq!(db.get_cf(&cf, b"k").unwrap(), None);
        assert_eq!(db.get_cf(&cf, UndoLog::undo_key(b"GXU", 10)).unwrap(), None);
    }
}
