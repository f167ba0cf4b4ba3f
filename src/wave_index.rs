/// WAVE naming registry index.
///
/// Key schema, all under the `wave` column family:
///   WT <name_hash32>                    -> WaveName (bincode)
///   WN <ref36>                          -> name_hash32, reverse lookup by claim ref
///   WZ <parent_name_hash32><label_hash32> -> child name_hash32, zone/subdomain edge
///   WO <name_hash32>                    -> scripthash32, current owner
///   WH <ref36>                          -> registered_height_u32_BE
///   WU <height BE4>                     -> undo record, see [`crate::undo`]
///
/// Subdomains are modeled as a flat parent-hash -> child-edge map rather
/// than a full character-level trie: a zone only ever needs to resolve its
/// direct children by label, and collapsing the trie to one edge per label
/// avoids walking label characters one RocksDB key at a time for no
/// queryable benefit.
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::atomic_writer::AtomicBatchWriter;
use crate::error::{IndexError, IndexResult};
use crate::ref_id::Ref;
use crate::undo::UndoLog;

const CF: &str = "wave";
const P_WT: u8 = b'T';
const P_WN: u8 = b'N';
const P_WZ: u8 = b'Z';
const P_WO: u8 = b'O';
const P_WH: u8 = b'H';
const UNDO_PREFIX: &[u8] = b"WU";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaveName {
    pub claim_ref: Ref,
    pub label: String,
    pub parent: Option<[u8; 32]>,
    pub registered_height: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameValidationError {
    TooShort,
    TooLong,
    InvalidChar(char),
    StartsOrEndsWithHyphen,
    DoubleHyphen,
}

const MIN_LABEL_LEN: usize = 1;
const MAX_LABEL_LEN: usize = 63;
const PUNYCODE_PREFIX: &str = "xn--";

/// Validates a single name label (not a full dotted path): lowercase
/// ascii alphanumerics and hyphens, 1-63 bytes, never starting or ending
/// with a hyphen, and never containing `--` unless it's a Punycode label
/// (`xn--...`), since a bare double-hyphen can't round-trip through
/// Punycode decoding.
pub fn validate_label(label: &str) -> Result<(), NameValidationError> {
    if label.len() < MIN_LABEL_LEN {
        return Err(NameValidationError::TooShort);
    }
    if label.len() > MAX_LABEL_LEN {
        return Err(NameValidationError::TooLong);
    }
    if label.starts_with('-') || label.ends_with('-') {
        return Err(NameValidationError::StartsOrEndsWithHyphen);
    }
    if label.contains("--") && !label.starts_with(PUNYCODE_PREFIX) {
        return Err(NameValidationError::DoubleHyphen);
    }
    for c in label.chars() {
        if !(c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-') {
            return Err(NameValidationError::InvalidChar(c));
        }
    }
    Ok(())
}

pub fn name_hash(label: &str, parent: Option<&[u8; 32]>) -> [u8; 32] {
    let mut hasher = Sha256::new();
    if let Some(p) = parent {
        hasher.update(p);
    }
    hasher.update(label.as_bytes());
    let digest = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

fn key_wt(name_hash: &[u8; 32]) -> Vec<u8> {
    let mut k = vec![P_WT];
    k.extend_from_slice(name_hash);
    k
}

fn key_wn(r: &Ref) -> Vec<u8> {
    let mut k = vec![P_WN];
    k.extend_from_slice(&r.to_bytes());
    k
}

fn key_wz(parent_hash: &[u8; 32], label: &str) -> Vec<u8> {
    let mut k = vec![P_WZ];
    k.extend_from_slice(parent_hash);
    k.extend_from_slice(&name_hash(label, None));
    k
}

fn key_wo(name_hash: &[u8; 32]) -> Vec<u8> {
    let mut k = vec![P_WO];
    k.extend_from_slice(name_hash);
    k
}

fn key_wh(r: &Ref) -> Vec<u8> {
    let mut k = vec![P_WH];
    k.extend_from_slice(&r.to_bytes());
    k
}

pub struct WaveIndex {
    undo: UndoLog,
}

impl WaveIndex {
    pub fn new() -> Self {
        Self {
            undo: UndoLog::new(CF, UNDO_PREFIX),
        }
    }

    /// Registers a new name claim. Fails (returns `Ok(false)`) if the label
    /// is invalid or the (parent, label) pair is already claimed; does not
    /// error, since a double-claim attempt is an ordinary chain event, not
    /// an index malfunction.
    pub fn register(
        &mut self,
        db: &rocksdb::DB,
        batch: &mut AtomicBatchWriter,
        claim_ref: Ref,
        label: &str,
        parent: Option<[u8; 32]>,
        owner_scripthash: [u8; 32],
        height: u32,
    ) -> IndexResult<bool> {
        if validate_label(label).is_err() {
            return Ok(false);
        }
        let cf = db
            .cf_handle(CF)
            .ok_or_else(|| IndexError::Config("missing wave cf".to_string()))?;

        if let Some(parent_hash) = parent {
            if db.get_cf(&cf, key_wt(&parent_hash))?.is_none() {
                return Ok(false);
            }
        }

        let this_hash = name_hash(label, parent.as_ref());
        if db.get_cf(&cf, key_wt(&this_hash))?.is_some() {
            return Ok(false);
        }

        let record = WaveName {
            claim_ref,
            label: label.to_string(),
            parent,
            registered_height: height,
        };
        let bytes = bincode::serialize(&record).map_err(|e| IndexError::Corrupt(e.to_string()))?;

        let wt_key = key_wt(&this_hash);
        self.undo.record(height, wt_key.clone(), None);
        batch.put(CF, wt_key, bytes);

        let wn_key = key_wn(&claim_ref);
        self.undo.record(height, wn_key.clone(), None);
        batch.put(CF, wn_key, this_hash.to_vec());

        let wo_key = key_wo(&this_hash);
        self.undo.record(height, wo_key.clone(), None);
        batch.put(CF, wo_key, owner_scripthash.to_vec());

        if let Some(parent_hash) = parent {
            let wz_key = key_wz(&parent_hash, label);
            self.undo.record(height, wz_key.clone(), None);
            batch.put(CF, wz_key, this_hash.to_vec());
        }

        let wh_key = key_wh(&claim_ref);
        self.undo.record(height, wh_key.clone(), None);
        batch.put(CF, wh_key, height.to_be_bytes().to_vec());

        Ok(true)
    }

    /// Transfers ownership of a name to a new owner (carried forward when
    /// the claim ref is spent and re-surfaces at a new output), without
    /// touching the name's registration record.
    pub fn transfer(
        &mut self,
        db: &rocksdb::DB,
        batch: &mut AtomicBatchWriter,
        old_claim_ref: &Ref,
        new_claim_ref: Ref,
        new_owner_scripthash: [u8; 32],
        height: u32,
    ) -> IndexResult<bool> {
        let cf = db
            .cf_handle(CF)
            .ok_or_else(|| IndexError::Config("missing wave cf".to_string()))?;
        let Some(name_hash_bytes) = db.get_cf(&cf, key_wn(old_claim_ref))? else {
            return Ok(false);
        };
        let mut this_hash = [0u8; 32];
        this_hash.copy_from_slice(&name_hash_bytes);

        let Some(record_bytes) = db.get_cf(&cf, key_wt(&this_hash))? else {
            return Ok(false);
        };
        let mut record: WaveName =
            bincode::deserialize(&record_bytes).map_err(|e| IndexError::Corrupt(e.to_string()))?;

        let old_wn_key = key_wn(old_claim_ref);
        self.undo.record(height, old_wn_key.clone(), Some(name_hash_bytes.clone()));
        batch.delete(CF, old_wn_key);

        let new_wn_key = key_wn(&new_claim_ref);
        self.undo.record(height, new_wn_key.clone(), None);
        batch.put(CF, new_wn_key, this_hash.to_vec());

        record.claim_ref = new_claim_ref;
        let wt_key = key_wt(&this_hash);
        self.undo.record(height, wt_key.clone(), Some(record_bytes));
        let new_record_bytes = bincode::serialize(&record).map_err(|e| IndexError::Corrupt(e.to_string()))?;
        batch.put(CF, wt_key, new_record_bytes);

        let wo_key = key_wo(&this_hash);
        let prior_wo = db.get_cf(&cf, &wo_key)?;
        self.undo.record(height, wo_key.clone(), prior_wo);
        batch.put(CF, wo_key, new_owner_scripthash.to_vec());

        let old_wh_key = key_wh(old_claim_ref);
        let prior_wh = db.get_cf(&cf, &old_wh_key)?;
        self.undo.record(height, old_wh_key.clone(), prior_wh);
        batch.delete(CF, old_wh_key);

        let new_wh_key = key_wh(&new_claim_ref);
        self.undo.record(height, new_wh_key.clone(), None);
        batch.put(CF, new_wh_key, record.registered_height.to_be_bytes().to_vec());

        Ok(true)
    }

    pub fn flush(&mut self, batch: &mut AtomicBatchWriter, height: u32) -> IndexResult<()> {
        self.undo.flush(batch, height)
    }

    pub fn backup(&self, db: &rocksdb::DB, batch: &mut AtomicBatchWriter, height: u32) -> IndexResult<()> {
        self.undo.backup(db, batch, height)
    }

    pub fn prune(
        &self,
        db: &rocksdb::DB,
        batch: &mut AtomicBatchWriter,
        current_height: u32,
        reorg_window: u32,
    ) -> IndexResult<()> {
        self.undo.prune(db, batch, current_height, reorg_window)
    }

    pub fn resolve(
        &self,
        db: &rocksdb::DB,
        label: &str,
        parent: Option<[u8; 32]>,
    ) -> IndexResult<Option<WaveName>> {
        let cf = db
            .cf_handle(CF)
            .ok_or_else(|| IndexError::Config("missing wave cf".to_string()))?;
        let h = name_hash(label, parent.as_ref());
        match db.get_cf(&cf, key_wt(&h))? {
            Some(bytes) => Ok(Some(
                bincode::deserialize(&bytes).map_err(|e| IndexError::Corrupt(e.to_string()))?,
            )),
            None => Ok(None),
        }
    }

    pub fn owner_of(
        &self,
        db: &rocksdb::DB,
        label: &str,
        parent: Option<[u8; 32]>,
    ) -> IndexResult<Option<[u8; 32]>> {
        let cf = db
            .cf_handle(CF)
            .ok_or_else(|| IndexError::Config("missing wave cf".to_string()))?;
        let h = name_hash(label, parent.as_ref());
        match db.get_cf(&cf, key_wo(&h))? {
            Some(bytes) if bytes.len() == 32 => {
                let mut out = [0u8; 32];
                out.copy_from_slice(&bytes);
                Ok(Some(out))
            }
            _ => Ok(None),
        }
    }

    pub fn get_registration_height(&self, db: &rocksdb::DB, r: &Ref) -> IndexResult<Option<u32>> {
        let cf = db
            .cf_handle(CF)
            .ok_or_else(|| IndexError::Config("missing wave cf".to_string()))?;
        match db.get_cf(&cf, key_wh(r))? {
            Some(bytes) if bytes.len() == 4 => Ok(Some(u32::from_be_bytes(bytes[..4].try_into().unwrap()))),
            _ => Ok(None),
        }
    }

    pub fn child(
        &self,
        db: &rocksdb::DB,
        parent_hash: &[u8; 32],
        label: &str,
    ) -> IndexResult<Option<[u8; 32]>> {
        let cf = db
            .cf_handle(CF)
            .ok_or_else(|| IndexError::Config("missing wave cf".to_string()))?;
        match db.get_cf(&cf, key_wz(parent_hash, label))? {
            Some(bytes) if bytes.len() == 32 => {
                let mut out = [0u8; 32];
                out.copy_from_slice(&bytes);
                Ok(Some(out))
            }
            _ => Ok(None),
        }
    }
}

impl Default for WaveIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validates_labels() {
        assert!(validate_label("glyph-dex").is_ok());
        assert!(validate_label("").is_err());
        assert!(validate_label("-bad").is_err());
        assert!(validate_label("bad-").is_err());
        assert!(validate_label("Bad").is_err());
        assert_eq!(validate_label(&"a".repeat(64)), Err(NameValidationError::TooLong));
    }

    #[test]
    fn rejects_double_hyphen_unless_punycode() {
        assert_eq!(validate_label("a--b"), Err(NameValidationError::DoubleHyphen));
        assert!(validate_label("xn--abc").is_ok());
    }

    #[test]
    fn name_hash_depends_on_parent() {
        let root = name_hash("alice", None);
        let child = name_hash("alice", Some(&[1u8; 32]));
        assert_ne!(root, child);
    }

    #[test]
    fn key_encodings_are_fixed_length() {
        let r = Ref::new([1u8; 32], 0);
        assert_eq!(key_wt(&[0u8; 32]).len(), 1 + 32);
        assert_eq!(key_wn(&r).len(), 1 + 36);
        assert_eq!(key_wz(&[0u8; 32], "a").len(), 1 + 32 + 32);
        assert_eq!(key_wh(&r).len(), 1 + 36);
    }

    fn test_db() -> (std::sync::Arc<rocksdb::DB>, tempfile::TempDir) {
        let dir = tempfile::TempDir::new().unwrap();
        let mut opts = rocksdb::Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        let db = rocksdb::DB::open_cf(&opts, dir.path(), [CF]).unwrap();
        (std::sync::Arc::new(db), dir)
    }

    #[tokio::test]
    async fn register_rejects_child_whose_parent_does_not_resolve() {
        let (db, _dir) = test_db();
        let mut index = WaveIndex::new();
        let mut batch = AtomicBatchWriter::new(db.clone(), 1000);
        let ok = index
            .register(&db, &mut batch, Ref::new([1u8; 32], 0), "sub", Some([9u8; 32]), [2u8; 32], 10)
            .unwrap();
        assert!(!ok);
    }

    #[tokio::test]
    async fn register_accepts_child_once_parent_resolves() {
        let (db, _dir) = test_db();
        let mut index = WaveIndex::new();
        let mut batch = AtomicBatchWriter::new(db.clone(), 1000);
        index
            .register(&db, &mut batch, Ref::new([1u8; 32], 0), "alice", None, [2u8; 32], 10)
            .unwrap();
        batch.flush().await.unwrap();

        let parent_hash = name_hash("alice", None);
        let mut batch = AtomicBatchWriter::new(db.clone(), 1000);
        let ok = index
            .register(&db, &mut batch, Ref::new([3u8; 32], 0), "sub", Some(parent_hash), [4u8; 32], 11)
            .unwrap();
        assert!(ok);
    }

    #[tokio::test]
    async fn transfer_preserves_original_registration_height_in_wh() {
        let (db, _dir) = test_db();
        let mut index = WaveIndex::new();
        let claim_ref = Ref::new([1u8; 32], 0);
        let mut batch = AtomicBatchWriter::new(db.clone(), 1000);
        index.register(&db, &mut batch, claim_ref, "alice", None, [2u8; 32], 10).unwrap();
        batch.flush().await.unwrap();
        assert_eq!(index.get_registration_height(&db, &claim_ref).unwrap(), Some(10));

        let new_claim_ref = Ref::new([5u8; 32], 0);
        let mut batch = AtomicBatchWriter::new(db.clone(), 1000);
        index.transfer(&db, &mut batch, &claim_ref, new_claim_ref, [3u8; 32], 20).unwrap();
        batch.flush().await.unwrap();

        assert_eq!(index.get_registration_height(&db, &claim_ref).unwrap(), None);
        assert_eq!(index.get_registration_height(&db, &new_claim_ref).unwrap(), Some(10));
    }
}
