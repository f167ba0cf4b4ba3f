/// Token index: Glyph genesis records, FT/NFT balances and the secondary
/// indexes subscriptions and queries are served from.
///
/// Key schema, all under the `glyph` column family:
///   GT <ref36>                        -> TokenGenesis (bincode)
///   GM <metadata_hash32>              -> raw reveal metadata CBOR bytes,
///                                         content-addressed by its own hash
///   GB <owner32><ref36>               -> u64 BE, balance owner holds of ref
///   GR <ref36><owner32>               -> u64 BE, mirror of GB keyed by ref
///                                         first so all holders of a ref can
///                                         be enumerated by prefix
///   GS <ref36>                        -> u64 BE, FT-only circulating supply
///   GH <ref36><height BE4><txidx BE4> -> HistoryEvent (bincode), chronological
///                                         per-ref event log
///   GY <token_type u8><ref36>         -> (), enumerate tokens by type
///   GN <name_hash16><ref36>           -> (), search index over lowercased
///                                         display names
///   GK <ticker up to 8 bytes><ref36>  -> (), lookup index over tickers
///   GXU <height BE4>                  -> undo record, see [`crate::undo`]
///
/// A genesis is the first valid reveal envelope seen for a ref. Every
/// balance mutation — genesis mint, transfer, burn — goes through
/// [`GlyphIndex::update_balance`], which keeps GB and GR as exact mirrors of
/// each other (Invariant 2) and never leaves a zero-balance row behind.
use byteorder::{BigEndian, WriteBytesExt};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};

use crate::atomic_writer::AtomicBatchWriter;
use crate::envelope::{self, EnvelopeBody, GlyphProtocol};
use crate::error::{IndexError, IndexResult};
use crate::ref_id::Ref;
use crate::script;
use crate::undo::UndoLog;

const CF: &str = "glyph";
const P_GT: u8 = b'T';
const P_GM: u8 = b'M';
const P_GB: u8 = b'B';
const P_GR: u8 = b'R';
const P_GS: u8 = b'S';
const P_GH: u8 = b'H';
const P_GY: u8 = b'Y';
const P_GN: u8 = b'N';
const P_GK: u8 = b'K';
const UNDO_PREFIX: &[u8] = b"GXU";

pub const TOKEN_TYPE_FT: u8 = 1;
pub const TOKEN_TYPE_NFT: u8 = 2;
pub const TOKEN_TYPE_DAT: u8 = 3;

/// The dMint block of a token genesis, present only when the token's
/// protocol set includes DMINT.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DmintBlock {
    pub algorithm: u8,
    pub difficulty: u64,
    pub starting_difficulty: u64,
    pub reward: u64,
    pub halving_interval: u32,
    pub daa_mode: u8,
    pub mint_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TokenGenesis {
    pub protocols: Vec<GlyphProtocol>,
    pub token_type: u8,
    pub envelope_version: u8,
    pub name: Option<String>,
    pub ticker: Option<String>,
    pub decimals: u8,
    pub description: Option<String>,
    pub author: Option<String>,
    pub license: Option<String>,
    pub attributes: Option<BTreeMap<String, String>>,
    pub deploy_height: u32,
    pub deploy_txid: [u8; 32],
    pub metadata_hash: [u8; 32],
    pub total_supply: u64,
    pub current_supply: u64,
    pub premine: u64,
    pub mined: u64,
    pub icon: Option<[u8; 32]>,
    pub dmint: Option<DmintBlock>,
    pub container_ref: Option<Ref>,
    pub authority_ref: Option<Ref>,
    pub parent_ref: Option<Ref>,
}

/// The kind of event recorded in a token's GH history log, ordered the way
/// they're expected to appear within the same (height, tx_index) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HistoryEventKind {
    Deploy = 0,
    Mint = 1,
    Transfer = 2,
    Burn = 3,
    Update = 4,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEvent {
    pub kind: HistoryEventKind,
    pub txid: [u8; 32],
}

/// A single transaction to scan: the outputs' scriptPubKeys plus (for
/// Phase 1) the refs the transaction's inputs are spending and who spent
/// them.
pub struct TxView<'a> {
    pub txid: [u8; 32],
    pub height: u32,
    pub tx_index: u32,
    pub spent_refs: &'a [(Ref, [u8; 32])], // (ref being spent, spending scripthash)
    pub outputs: &'a [(&'a [u8], [u8; 32])], // (scriptPubKey, scripthash)
}

pub struct GlyphIndex {
    undo: UndoLog,
}

fn key_gt(r: &Ref) -> Vec<u8> {
    let mut k = vec![P_GT];
    k.extend_from_slice(&r.to_bytes());
    k
}

fn key_gm(metadata_hash: &[u8; 32]) -> Vec<u8> {
    let mut k = vec![P_GM];
    k.extend_from_slice(metadata_hash);
    k
}

fn key_gb(owner: &[u8; 32], r: &Ref) -> Vec<u8> {
    let mut k = vec![P_GB];
    k.extend_from_slice(owner);
    k.extend_from_slice(&r.to_bytes());
    k
}

fn key_gr(r: &Ref, owner: &[u8; 32]) -> Vec<u8> {
    let mut k = vec![P_GR];
    k.extend_from_slice(&r.to_bytes());
    k.extend_from_slice(owner);
    k
}

fn key_gr_prefix(r: &Ref) -> Vec<u8> {
    let mut k = vec![P_GR];
    k.extend_from_slice(&r.to_bytes());
    k
}

fn key_gs(r: &Ref) -> Vec<u8> {
    let mut k = vec![P_GS];
    k.extend_from_slice(&r.to_bytes());
    k
}

fn key_gh(r: &Ref, height: u32, tx_index: u32) -> Vec<u8> {
    let mut k = vec![P_GH];
    k.extend_from_slice(&r.to_bytes());
    k.write_u32::<BigEndian>(height).unwrap();
    k.write_u32::<BigEndian>(tx_index).unwrap();
    k
}

fn key_gh_prefix(r: &Ref) -> Vec<u8> {
    let mut k = vec![P_GH];
    k.extend_from_slice(&r.to_bytes());
    k
}

fn key_gy(token_type: u8, r: &Ref) -> Vec<u8> {
    let mut k = vec![P_GY, token_type];
    k.extend_from_slice(&r.to_bytes());
    k
}

fn name_hash16(name: &str) -> [u8; 16] {
    let mut hasher = Sha256::new();
    hasher.update(name.to_lowercase().as_bytes());
    let digest = hasher.finalize();
    let mut out = [0u8; 16];
    out.copy_from_slice(&digest[..16]);
    out
}

fn key_gn(name: &str, r: &Ref) -> Vec<u8> {
    let mut k = vec![P_GN];
    k.extend_from_slice(&name_hash16(name));
    k.extend_from_slice(&r.to_bytes());
    k
}

fn ticker_bytes(ticker: &str) -> Vec<u8> {
    ticker.to_uppercase().as_bytes()[..ticker.len().min(8)].to_vec()
}

fn key_gk(ticker: &str, r: &Ref) -> Vec<u8> {
    let mut k = vec![P_GK];
    k.extend_from_slice(&ticker_bytes(ticker));
    k.extend_from_slice(&r.to_bytes());
    k
}

fn derive_token_type(protocols: &[GlyphProtocol]) -> u8 {
    if protocols.contains(&GlyphProtocol::Ft) {
        TOKEN_TYPE_FT
    } else if protocols.contains(&GlyphProtocol::Nft) {
        TOKEN_TYPE_NFT
    } else if protocols.contains(&GlyphProtocol::Dat) {
        TOKEN_TYPE_DAT
    } else {
        protocols.first().map(|p| *p as u8).unwrap_or(0)
    }
}

impl GlyphIndex {
    pub fn new() -> Self {
        Self {
            undo: UndoLog::new(CF, UNDO_PREFIX),
        }
    }

    /// Locates the ref carried by a single output's scriptPubKey, if any.
    /// Only the opcode walker is consulted — no substring scan of the raw
    /// bytes, so a coincidental 36-byte match inside unrelated push data can
    /// never be mistaken for a ref.
    pub fn find_output_ref(script_bytes: &[u8]) -> Option<Ref> {
        script::scan_refs(script_bytes).into_iter().next().map(|op| op.r#ref)
    }

    fn read_balance(&self, db: &rocksdb::DB, cf: &impl rocksdb::AsColumnFamilyRef, owner: &[u8; 32], r: &Ref) -> IndexResult<u64> {
        match db.get_cf(cf, key_gb(owner, r))? {
            Some(bytes) if bytes.len() == 8 => Ok(u64::from_be_bytes(bytes[..8].try_into().unwrap())),
            _ => Ok(0),
        }
    }

    /// Applies `delta` to `owner`'s balance of `r`, keeping GB and GR as
    /// exact mirrors (Invariant 2): both are written with the same new
    /// value when it's positive, both are deleted when it reaches zero.
    /// Returns the resulting balance.
    pub fn update_balance(
        &mut self,
        db: &rocksdb::DB,
        batch: &mut AtomicBatchWriter,
        height: u32,
        owner: &[u8; 32],
        r: &Ref,
        delta: i64,
    ) -> IndexResult<u64> {
        let cf = db
            .cf_handle(CF)
            .ok_or_else(|| IndexError::Config("missing glyph cf".to_string()))?;
        let current = self.read_balance(db, &cf, owner, r)?;
        let new_balance = if delta < 0 {
            current.saturating_sub(delta.unsigned_abs())
        } else {
            current.saturating_add(delta as u64)
        };

        let gb_key = key_gb(owner, r);
        let gr_key = key_gr(r, owner);
        self.undo.record(height, gb_key.clone(), db.get_cf(&cf, &gb_key)?);
        self.undo.record(height, gr_key.clone(), db.get_cf(&cf, &gr_key)?);

        if new_balance == 0 {
            batch.delete(CF, gb_key);
            batch.delete(CF, gr_key);
        } else {
            let bytes = new_balance.to_be_bytes().to_vec();
            batch.put(CF, gb_key, bytes.clone());
            batch.put(CF, gr_key, bytes);
        }
        Ok(new_balance)
    }

    fn record_history(
        &mut self,
        db: &rocksdb::DB,
        batch: &mut AtomicBatchWriter,
        height: u32,
        tx_index: u32,
        r: &Ref,
        kind: HistoryEventKind,
        txid: [u8; 32],
    ) -> IndexResult<()> {
        let cf = db
            .cf_handle(CF)
            .ok_or_else(|| IndexError::Config("missing glyph cf".to_string()))?;
        let key = key_gh(r, height, tx_index);
        let prior = db.get_cf(&cf, &key)?;
        self.undo.record(height, key.clone(), prior);
        let event = HistoryEvent { kind, txid };
        let bytes = bincode::serialize(&event).map_err(|e| IndexError::Corrupt(e.to_string()))?;
        batch.put(CF, key, bytes);
        Ok(())
    }

    /// Processes one confirmed transaction at `height`, recording undo
    /// entries for every key this call touches before it decides what to
    /// write. Returns the set of refs this tx produced or updated, for the
    /// caller to hand to the mempool shadow / subscription manager.
    pub fn process_tx(
        &mut self,
        db: &rocksdb::DB,
        batch: &mut AtomicBatchWriter,
        tx: &TxView,
        reveal_envelopes: &[(&[u8], usize)], // (output scriptPubKey pushdata, output index)
    ) -> IndexResult<Vec<Ref>> {
        let mut touched = Vec::new();

        // Phase 1: spent refs release their balance; the amount released
        // is carried forward to whichever output reveals the same ref.
        let mut carried_balance: HashMap<Ref, u64> = HashMap::new();
        for (spent_ref, old_owner) in tx.spent_refs {
            let bal = self.update_balance(db, batch, tx.height, old_owner, spent_ref, 0)?;
            if bal > 0 {
                carried_balance.insert(*spent_ref, bal);
                self.update_balance(db, batch, tx.height, old_owner, spent_ref, -(bal as i64))?;
            }
        }

        // Phase 2: scan outputs for ref opcodes (transfers) and reveal
        // envelopes (new genesis or MUT updates).
        for (idx, (script_bytes, scripthash)) in tx.outputs.iter().enumerate() {
            if let Some(out_ref) = Self::find_output_ref(script_bytes) {
                if let Some(bal) = carried_balance.remove(&out_ref) {
                    touched.push(out_ref);
                    self.update_balance(db, batch, tx.height, scripthash, &out_ref, bal as i64)?;
                    self.record_history(
                        db,
                        batch,
                        tx.height,
                        tx.tx_index,
                        &out_ref,
                        HistoryEventKind::Transfer,
                        tx.txid,
                    )?;
                }
            }

            if let Some((pushdata, out_idx)) = reveal_envelopes.iter().find(|(_, i)| *i == idx) {
                if let Ok(env) = envelope::parse(pushdata) {
                    if let EnvelopeBody::Reveal { metadata } = env.body {
                        if let Some(genesis_ref) =
                            self.apply_reveal(db, batch, tx, *out_idx, scripthash, env.version, &metadata)?
                        {
                            touched.push(genesis_ref);
                        }
                    }
                }
            }
        }

        Ok(touched)
    }

    /// Processes a reveal envelope's metadata: either the genesis of a new
    /// token, or (when `p` includes MUT and the ref already has a genesis
    /// record) an update to its display/mutable fields. Returns the ref the
    /// reveal attached to, if the reveal was valid and indexed.
    fn apply_reveal(
        &mut self,
        db: &rocksdb::DB,
        batch: &mut AtomicBatchWriter,
        tx: &TxView,
        out_idx: usize,
        scripthash: &[u8; 32],
        envelope_version: u8,
        metadata: &BTreeMap<String, ciborium::value::Value>,
    ) -> IndexResult<Option<Ref>> {
        let cf = db
            .cf_handle(CF)
            .ok_or_else(|| IndexError::Config("missing glyph cf".to_string()))?;
        let Some((script_bytes, _)) = tx.outputs.get(out_idx) else {
            return Ok(None);
        };
        let Some(genesis_ref) = Self::find_output_ref(script_bytes) else {
            return Ok(None);
        };
        let protocols = envelope::metadata_protocols(metadata);
        if envelope::validate_protocols(&protocols).is_err() {
            return Ok(None);
        }

        let metadata_bytes = ciborium_metadata_bytes(metadata)?;
        let metadata_hash: [u8; 32] = Sha256::digest(&metadata_bytes).into();
        let gm_key = key_gm(&metadata_hash);
        if db.get_cf(&cf, &gm_key)?.is_none() {
            self.undo.record(tx.height, gm_key.clone(), None);
            batch.put(CF, gm_key, metadata_bytes);
        }

        let existing = self.get_token(db, &genesis_ref)?;
        if protocols.contains(&GlyphProtocol::Mut) && existing.is_some() {
            let mut token = existing.unwrap();
            apply_mutable_fields(&mut token, metadata);
            self.write_token(db, batch, tx.height, &genesis_ref, &token)?;
            self.record_history(
                db,
                batch,
                tx.height,
                tx.tx_index,
                &genesis_ref,
                HistoryEventKind::Update,
                tx.txid,
            )?;
            return Ok(Some(genesis_ref));
        }

        if existing.is_some() {
            // Already has a genesis and this reveal isn't a MUT update for
            // it: not a valid event for this ref.
            return Ok(None);
        }

        let token_type = derive_token_type(&protocols);
        let decimals = metadata
            .get("dec")
            .and_then(|v| v.as_integer())
            .and_then(|i| u8::try_from(i128::from(i)).ok())
            .unwrap_or(0);
        let total_supply = metadata
            .get("supply")
            .and_then(|v| v.as_integer())
            .and_then(|i| u64::try_from(i128::from(i)).ok())
            .unwrap_or(0);
        let premine = metadata
            .get("premine")
            .and_then(|v| v.as_integer())
            .and_then(|i| u64::try_from(i128::from(i)).ok())
            .unwrap_or(0);

        let dmint = if protocols.contains(&GlyphProtocol::Dmint) {
            Some(DmintBlock {
                algorithm: metadata.get("algo").and_then(|v| v.as_integer()).and_then(|i| u8::try_from(i128::from(i)).ok()).unwrap_or(0),
                difficulty: metadata.get("diff").and_then(|v| v.as_integer()).and_then(|i| u64::try_from(i128::from(i)).ok()).unwrap_or(1),
                starting_difficulty: metadata.get("sdiff").and_then(|v| v.as_integer()).and_then(|i| u64::try_from(i128::from(i)).ok()).unwrap_or(1),
                reward: metadata.get("reward").and_then(|v| v.as_integer()).and_then(|i| u64::try_from(i128::from(i)).ok()).unwrap_or(0),
                halving_interval: metadata.get("halving").and_then(|v| v.as_integer()).and_then(|i| u32::try_from(i128::from(i)).ok()).unwrap_or(0),
                daa_mode: metadata.get("daa").and_then(|v| v.as_integer()).and_then(|i| u8::try_from(i128::from(i)).ok()).unwrap_or(0),
                mint_count: 0,
            })
        } else {
            None
        };

        let token = TokenGenesis {
            protocols: protocols.clone(),
            token_type,
            envelope_version,
            name: metadata.get("name").and_then(|v| v.as_text()).map(|s| s.to_string()),
            ticker: metadata.get("tick").and_then(|v| v.as_text()).map(|s| s.to_string()),
            decimals,
            description: metadata.get("desc").and_then(|v| v.as_text()).map(|s| s.to_string()),
            author: metadata.get("author").and_then(|v| v.as_text()).map(|s| s.to_string()),
            license: metadata.get("license").and_then(|v| v.as_text()).map(|s| s.to_string()),
            attributes: metadata.get("attrs").and_then(|v| v.as_map()).map(|m| {
                m.iter()
                    .filter_map(|(k, v)| Some((k.as_text()?.to_string(), v.as_text()?.to_string())))
                    .collect()
            }),
            deploy_height: tx.height,
            deploy_txid: tx.txid,
            metadata_hash,
            total_supply,
            current_supply: premine,
            premine,
            mined: 0,
            icon: metadata.get("icon").and_then(|v| v.as_bytes()).and_then(|b| b.clone().try_into().ok()),
            dmint,
            container_ref: metadata.get("container").and_then(|v| v.as_bytes()).and_then(|b| Ref::from_bytes(b)),
            authority_ref: metadata.get("authority").and_then(|v| v.as_bytes()).and_then(|b| Ref::from_bytes(b)),
            parent_ref: metadata.get("parent").and_then(|v| v.as_bytes()).and_then(|b| Ref::from_bytes(b)),
        };

        self.write_token(db, batch, tx.height, &genesis_ref, &token)?;

        if premine > 0 {
            self.update_balance(db, batch, tx.height, scripthash, &genesis_ref, premine as i64)?;
        }
        if token_type == TOKEN_TYPE_FT {
            let gs_key = key_gs(&genesis_ref);
            self.undo.record(tx.height, gs_key.clone(), None);
            batch.put(CF, gs_key, premine.to_be_bytes().to_vec());
        }
        if let Some(name) = &token.name {
            let gn_key = key_gn(name, &genesis_ref);
            self.undo.record(tx.height, gn_key.clone(), None);
            batch.put(CF, gn_key, Vec::new());
        }
        if let Some(ticker) = &token.ticker {
            let gk_key = key_gk(ticker, &genesis_ref);
            self.undo.record(tx.height, gk_key.clone(), None);
            batch.put(CF, gk_key, Vec::new());
        }

        self.record_history(db, batch, tx.height, tx.tx_index, &genesis_ref, HistoryEventKind::Deploy, tx.txid)?;
        Ok(Some(genesis_ref))
    }

    fn write_token(
        &mut self,
        db: &rocksdb::DB,
        batch: &mut AtomicBatchWriter,
        height: u32,
        r: &Ref,
        token: &TokenGenesis,
    ) -> IndexResult<()> {
        let cf = db
            .cf_handle(CF)
            .ok_or_else(|| IndexError::Config("missing glyph cf".to_string()))?;
        let bytes = bincode::serialize(token).map_err(|e| IndexError::Corrupt(e.to_string()))?;
        let gt_key = key_gt(r);
        let prior = db.get_cf(&cf, &gt_key)?;
        self.undo.record(height, gt_key.clone(), prior.clone());
        batch.put(CF, gt_key, bytes);

        if prior.is_none() {
            let y_key = key_gy(token.token_type, r);
            self.undo.record(height, y_key.clone(), None);
            batch.put(CF, y_key, Vec::new());
        }
        Ok(())
    }

    /// Mints additional supply of an existing FT/DMINT token, crediting
    /// `scripthash` and bumping both the token's running counters and the
    /// GS supply index.
    pub fn mint(
        &mut self,
        db: &rocksdb::DB,
        batch: &mut AtomicBatchWriter,
        r: &Ref,
        scripthash: &[u8; 32],
        amount: u64,
        height: u32,
        tx_index: u32,
        txid: [u8; 32],
    ) -> IndexResult<bool> {
        let Some(mut token) = self.get_token(db, r)? else {
            return Ok(false);
        };
        token.current_supply = token.current_supply.saturating_add(amount);
        token.mined = token.mined.saturating_add(amount);
        if let Some(dmint) = token.dmint.as_mut() {
            dmint.mint_count += 1;
        }
        self.write_token(db, batch, height, r, &token)?;
        self.update_balance(db, batch, height, scripthash, r, amount as i64)?;

        if token.token_type == TOKEN_TYPE_FT {
            let cf = db
                .cf_handle(CF)
                .ok_or_else(|| IndexError::Config("missing glyph cf".to_string()))?;
            let gs_key = key_gs(r);
            let prior = db.get_cf(&cf, &gs_key)?;
            self.undo.record(height, gs_key.clone(), prior);
            batch.put(CF, gs_key, token.current_supply.to_be_bytes().to_vec());
        }

        self.record_history(db, batch, height, tx_index, r, HistoryEventKind::Mint, txid)?;
        Ok(true)
    }

    /// Burns `amount` of `r` held by `scripthash`.
    pub fn burn(
        &mut self,
        db: &rocksdb::DB,
        batch: &mut AtomicBatchWriter,
        r: &Ref,
        scripthash: &[u8; 32],
        amount: u64,
        height: u32,
        tx_index: u32,
        txid: [u8; 32],
    ) -> IndexResult<()> {
        self.update_balance(db, batch, height, scripthash, r, -(amount as i64))?;
        if let Some(mut token) = self.get_token(db, r)? {
            token.current_supply = token.current_supply.saturating_sub(amount);
            self.write_token(db, batch, height, r, &token)?;
            if token.token_type == TOKEN_TYPE_FT {
                let cf = db
                    .cf_handle(CF)
                    .ok_or_else(|| IndexError::Config("missing glyph cf".to_string()))?;
                let gs_key = key_gs(r);
                let prior = db.get_cf(&cf, &gs_key)?;
                self.undo.record(height, gs_key.clone(), prior);
                batch.put(CF, gs_key, token.current_supply.to_be_bytes().to_vec());
            }
        }
        self.record_history(db, batch, height, tx_index, r, HistoryEventKind::Burn, txid)?;
        Ok(())
    }

    pub fn flush(&mut self, batch: &mut AtomicBatchWriter, height: u32) -> IndexResult<()> {
        self.undo.flush(batch, height)
    }

    pub fn backup(
        &self,
        db: &rocksdb::DB,
        batch: &mut AtomicBatchWriter,
        height: u32,
    ) -> IndexResult<()> {
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

    pub fn get_token(&self, db: &rocksdb::DB, r: &Ref) -> IndexResult<Option<TokenGenesis>> {
        let cf = db
            .cf_handle(CF)
            .ok_or_else(|| IndexError::Config("missing glyph cf".to_string()))?;
        match db.get_cf(&cf, key_gt(r))? {
            Some(bytes) => {
                let g = bincode::deserialize(&bytes).map_err(|e| IndexError::Corrupt(e.to_string()))?;
                Ok(Some(g))
            }
            None => Ok(None),
        }
    }

    pub fn get_balance(&self, db: &rocksdb::DB, scripthash: &[u8; 32], r: &Ref) -> IndexResult<u64> {
        let cf = db
            .cf_handle(CF)
            .ok_or_else(|| IndexError::Config("missing glyph cf".to_string()))?;
        self.read_balance(db, &cf, scripthash, r)
    }

    /// Every (owner, balance) pair currently recorded for `r`, via the GR
    /// mirror — this is what lets a multi-holder FT be enumerated at all.
    pub fn get_token_holders(&self, db: &rocksdb::DB, r: &Ref) -> IndexResult<Vec<([u8; 32], u64)>> {
        let cf = db
            .cf_handle(CF)
            .ok_or_else(|| IndexError::Config("missing glyph cf".to_string()))?;
        let prefix = key_gr_prefix(r);
        let mut out = Vec::new();
        for item in db.prefix_iterator_cf(&cf, &prefix) {
            let (key, value) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            if key.len() == prefix.len() + 32 && value.len() == 8 {
                let mut owner = [0u8; 32];
                owner.copy_from_slice(&key[prefix.len()..]);
                out.push((owner, u64::from_be_bytes(value[..8].try_into().unwrap())));
            }
        }
        Ok(out)
    }

    pub fn get_top_holders(&self, db: &rocksdb::DB, r: &Ref, limit: usize) -> IndexResult<Vec<([u8; 32], u64)>> {
        let mut holders = self.get_token_holders(db, r)?;
        holders.sort_by(|a, b| b.1.cmp(&a.1));
        holders.truncate(limit);
        Ok(holders)
    }

    pub fn get_token_supply(&self, db: &rocksdb::DB, r: &Ref) -> IndexResult<u64> {
        let cf = db
            .cf_handle(CF)
            .ok_or_else(|| IndexError::Config("missing glyph cf".to_string()))?;
        match db.get_cf(&cf, key_gs(r))? {
            Some(bytes) if bytes.len() == 8 => Ok(u64::from_be_bytes(bytes[..8].try_into().unwrap())),
            _ => match self.get_token(db, r)? {
                Some(token) => Ok(token.current_supply),
                None => Ok(0),
            },
        }
    }

    pub fn get_history(&self, db: &rocksdb::DB, r: &Ref, limit: usize) -> IndexResult<Vec<HistoryEvent>> {
        let cf = db
            .cf_handle(CF)
            .ok_or_else(|| IndexError::Config("missing glyph cf".to_string()))?;
        let prefix = key_gh_prefix(r);
        let mut out = Vec::new();
        for item in db.prefix_iterator_cf(&cf, &prefix) {
            let (key, value) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            out.push(bincode::deserialize(&value).map_err(|e| IndexError::Corrupt(e.to_string()))?);
            if out.len() >= limit {
                break;
            }
        }
        Ok(out)
    }

    pub fn search_tokens(&self, db: &rocksdb::DB, name: &str, limit: usize) -> IndexResult<Vec<Ref>> {
        let cf = db
            .cf_handle(CF)
            .ok_or_else(|| IndexError::Config("missing glyph cf".to_string()))?;
        let mut prefix = vec![P_GN];
        prefix.extend_from_slice(&name_hash16(name));
        let mut out = Vec::new();
        for item in db.prefix_iterator_cf(&cf, &prefix) {
            let (key, _) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            if let Some(r) = Ref::from_bytes(&key[prefix.len()..]) {
                out.push(r);
                if out.len() >= limit {
                    break;
                }
            }
        }
        Ok(out)
    }

    pub fn tokens_by_ticker(&self, db: &rocksdb::DB, ticker: &str) -> IndexResult<Vec<Ref>> {
        let cf = db
            .cf_handle(CF)
            .ok_or_else(|| IndexError::Config("missing glyph cf".to_string()))?;
        let mut prefix = vec![P_GK];
        prefix.extend_from_slice(&ticker_bytes(ticker));
        let mut out = Vec::new();
        for item in db.prefix_iterator_cf(&cf, &prefix) {
            let (key, _) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            if let Some(r) = Ref::from_bytes(&key[prefix.len()..]) {
                out.push(r);
            }
        }
        Ok(out)
    }

    /// Sums every FT balance held by `scripthash` for the given token ref,
    /// across all UTXOs (there is normally exactly one, but dust-splitting
    /// can create more).
    pub fn get_total_balance(
        &self,
        db: &rocksdb::DB,
        scripthash: &[u8; 32],
        token_ref: &Ref,
    ) -> IndexResult<u64> {
        self.get_balance(db, scripthash, token_ref)
    }

    pub fn tokens_by_protocol(&self, db: &rocksdb::DB, token_type: u8) -> IndexResult<Vec<Ref>> {
        let cf = db
            .cf_handle(CF)
            .ok_or_else(|| IndexError::Config("missing glyph cf".to_string()))?;
        let prefix = vec![P_GY, token_type];
        let mut out = Vec::new();
        for item in db.prefix_iterator_cf(&cf, &prefix) {
            let (key, _) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            if let Some(r) = Ref::from_bytes(&key[2..]) {
                out.push(r);
            }
        }
        Ok(out)
    }

    /// Every FT token whose genesis carried a dMint block, for
    /// [`crate::dmint::DmintContractsManager::sync_from_index`]. DMINT
    /// always implies FT, so it's enough to scan the FT `GY` bucket and
    /// keep the ones with a dMint block attached.
    pub fn dmint_tokens(&self, db: &rocksdb::DB) -> IndexResult<Vec<Ref>> {
        let mut out = Vec::new();
        for r in self.tokens_by_protocol(db, TOKEN_TYPE_FT)? {
            if let Some(token) = self.get_token(db, &r)? {
                if token.dmint.is_some() {
                    out.push(r);
                }
            }
        }
        Ok(out)
    }
}

impl Default for GlyphIndex {
    fn default() -> Self {
        Self::new()
    }
}

fn apply_mutable_fields(token: &mut TokenGenesis, metadata: &BTreeMap<String, ciborium::value::Value>) {
    if let Some(name) = metadata.get("name").and_then(|v| v.as_text()) {
        token.name = Some(name.to_string());
    }
    if let Some(desc) = metadata.get("desc").and_then(|v| v.as_text()) {
        token.description = Some(desc.to_string());
    }
    if let Some(author) = metadata.get("author").and_then(|v| v.as_text()) {
        token.author = Some(author.to_string());
    }
    if let Some(license) = metadata.get("license").and_then(|v| v.as_text()) {
        token.license = Some(license.to_string());
    }
    if let Some(attrs) = metadata.get("attrs").and_then(|v| v.as_map()) {
        token.attributes = Some(
            attrs
                .iter()
                .filter_map(|(k, v)| Some((k.as_text()?.to_string(), v.as_text()?.to_string())))
                .collect(),
        );
    }
}

fn ciborium_metadata_bytes(metadata: &BTreeMap<String, ciborium::value::Value>) -> IndexResult<Vec<u8>> {
    let entries: Vec<(ciborium::value::Value, ciborium::value::Value)> = metadata
        .iter()
        .map(|(k, v)| (ciborium::value::Value::Text(k.clone()), v.clone()))
        .collect();
    let value = ciborium::value::Value::Map(entries);
    let mut out = Vec::new();
    ciborium::ser::into_writer(&value, &mut out).map_err(|e| IndexError::Corrupt(e.to_string()))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_encodings_are_distinct_and_fixed_length() {
        let r = Ref::new([1u8; 32], 0);
        assert_eq!(key_gt(&r).len(), 1 + 36);
        assert_eq!(key_gr(&r, &[2u8; 32]).len(), 1 + 36 + 32);
        assert_eq!(key_gb(&[2u8; 32], &r).len(), 1 + 32 + 36);
        assert_eq!(key_gh(&r, 5, 0).len(), 1 + 36 + 4 + 4);
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
    async fn gb_and_gr_stay_mirrored_and_clear_at_zero() {
        let (db, _dir) = test_db();
        let mut index = GlyphIndex::new();
        let mut batch = AtomicBatchWriter::new(db.clone(), 1000);
        let r = Ref::new([9u8; 32], 0);
        let owner = [1u8; 32];

        index.update_balance(&db, &mut batch, 10, &owner, &r, 50).unwrap();
        assert_eq!(index.get_balance(&db, &owner, &r).unwrap(), 0); // batch not yet applied
        batch.flush().await.unwrap();
        assert_eq!(index.get_balance(&db, &owner, &r).unwrap(), 50);
        assert_eq!(index.get_token_holders(&db, &r).unwrap(), vec![(owner, 50)]);

        let mut batch = AtomicBatchWriter::new(db.clone(), 1000);
        index.update_balance(&db, &mut batch, 11, &owner, &r, -50).unwrap();
        batch.flush().await.unwrap();
        assert_eq!(index.get_balance(&db, &owner, &r).unwrap(), 0);
        assert!(index.get_token_holders(&db, &r).unwrap().is_empty());
    }

    #[test]
    fn find_output_ref_uses_opcode_walker_only() {
        let r = Ref::new([9u8; 32], 1);
        let mut script = vec![36u8];
        script.extend_from_slice(&r.to_bytes());
        script.push(script::OP_FT_REF);
        assert_eq!(GlyphIndex::find_output_ref(&script), Some(r));
    }

    #[test]
    fn find_output_ref_ignores_coincidental_36_byte_data_without_ref_opcode() {
        let mut script = vec![36u8];
        script.extend_from_slice(&[7u8; 36]);
        assert_eq!(GlyphIndex::find_output_ref(&script), None);
    }
}
