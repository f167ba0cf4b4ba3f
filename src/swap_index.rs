/// RSWP swap order book index.
///
/// Key schema, all under the `swap` column family:
///   SO <order_ref36>                         -> SwapOrder (bincode)
///   SP <pair_id32><price_key8><order_ref36>  -> (), order book sorted by price
///   SM <maker_scripthash32><order_ref36>     -> (), maker's open orders
///   SH <height BE4>                          -> Vec<Ref> (bincode), touched at height
///   SS <pair_id32>                           -> PairStats (bincode)
///   SF <order_ref36><seq BE4>                -> SwapFillInfo (bincode)
///   SWU <height BE4>                         -> undo record, see [`crate::undo`]
///
/// Price keys are built so a plain byte-order scan of `SP` yields orders in
/// matching priority: sell orders ascend by price (cheapest first), buy
/// orders descend (richest first), achieved by storing `u64::MAX - price`
/// for the buy side and iterating both with the same ascending prefix scan.
use byteorder::{BigEndian, WriteBytesExt};
use serde::{Deserialize, Serialize};

use crate::atomic_writer::AtomicBatchWriter;
use crate::error::{IndexError, IndexResult};
use crate::ref_id::Ref;
use crate::script::{self, Chunk};
use crate::undo::UndoLog;

const CF: &str = "swap";
const P_SO: u8 = b'O';
const P_SP: u8 = b'P';
const P_SM: u8 = b'M';
const P_SH: u8 = b'H';
const P_SS: u8 = b'S';
const P_SF: u8 = b'F';
const UNDO_PREFIX: &[u8] = b"SWU";

const OP_RETURN: u8 = 0x6a;
pub const RSWP_MAGIC: &[u8] = b"RSWP";
const FLAG_HAS_WANT: u8 = 0x01;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Sell = 0,
    Buy = 1,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwapOrder {
    pub side: OrderSide,
    pub pair_id: [u8; 32],
    pub quote_ref: Option<Ref>,
    pub price: u64,
    pub amount: u64,
    pub remaining: u64,
    pub min_fill: u64,
    pub maker_scripthash: [u8; 32],
    pub open_height: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PairStats {
    pub volume: u64,
    pub last_price: u64,
    pub high: u64,
    pub low: u64,
    pub fill_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwapFillInfo {
    pub taker_ref: Ref,
    pub price: u64,
    pub amount: u64,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RswpParseError {
    NotAdvertisement,
    Truncated,
    UnsupportedVersion(u8),
    MissingWantToken,
}

/// An RSWP order advertisement, decoded from an `OP_RETURN` output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRswpOrder {
    pub version: u8,
    pub side: OrderSide,
    pub token_id: [u8; 32],
    pub want_token_id: Option<[u8; 32]>,
    pub utxo_hash: [u8; 32],
    pub utxo_index: u32,
    pub price: u64,
    pub amount: u64,
    pub min_fill: u64,
}

impl ParsedRswpOrder {
    pub fn order_ref(&self) -> Ref {
        Ref::new(self.utxo_hash, self.utxo_index)
    }

    pub fn base_ref(&self) -> Ref {
        Ref::new(self.token_id, 0)
    }

    pub fn quote_ref(&self) -> Option<Ref> {
        self.want_token_id.map(|t| Ref::new(t, 0))
    }
}

fn push_bytes(chunk: &Chunk) -> Option<&[u8]> {
    match chunk {
        Chunk::Push(b) => Some(b),
        Chunk::Op(_) => None,
    }
}

fn fixed32(chunk: &Chunk) -> Option<[u8; 32]> {
    let bytes = push_bytes(chunk)?;
    if bytes.len() != 32 {
        return None;
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(bytes);
    Some(out)
}

fn script_index(chunk: &Chunk) -> Option<u32> {
    let bytes = push_bytes(chunk)?;
    let v = script::decode_script_int(bytes)?;
    u32::try_from(v).ok()
}

/// Parses an `OP_RETURN RSWP <version> ...` advertisement carried in an
/// output's scriptPubKey. Dispatches to the v1 or v2 chunk layout; neither
/// version's price-terms or signature chunks are ever validated here, only
/// walked past, matching the original server's tolerant parser.
pub fn parse_rswp(script_bytes: &[u8]) -> Result<ParsedRswpOrder, RswpParseError> {
    let chunks = script::iter_chunks(script_bytes);
    if chunks.len() < 3 {
        return Err(RswpParseError::NotAdvertisement);
    }
    if !matches!(chunks[0], Chunk::Op(OP_RETURN)) {
        return Err(RswpParseError::NotAdvertisement);
    }
    match push_bytes(&chunks[1]) {
        Some(magic) if magic == RSWP_MAGIC => {}
        _ => return Err(RswpParseError::NotAdvertisement),
    }
    let version = match push_bytes(&chunks[2]) {
        Some([v]) => *v,
        _ => return Err(RswpParseError::Truncated),
    };
    match version {
        1 => parse_v1(&chunks),
        2 => parse_v2(&chunks),
        other => Err(RswpParseError::UnsupportedVersion(other)),
    }
}

/// v1 chunks after the version byte: legacy-type, token-id, utxo-hash,
/// utxo-index, one opaque price-terms chunk, one signature chunk. v1 never
/// carried a price/amount pair at all, nor a want-token — every v1 order is
/// a plain sell advertisement whose terms are read from chain state, not
/// this envelope.
fn parse_v1(chunks: &[Chunk]) -> Result<ParsedRswpOrder, RswpParseError> {
    if chunks.len() < 9 {
        return Err(RswpParseError::Truncated);
    }
    let token_id = fixed32(&chunks[4]).ok_or(RswpParseError::Truncated)?;
    let utxo_hash = fixed32(&chunks[5]).ok_or(RswpParseError::Truncated)?;
    let utxo_index = script_index(&chunks[6]).ok_or(RswpParseError::Truncated)?;

    Ok(ParsedRswpOrder {
        version: 1,
        side: OrderSide::Sell,
        token_id,
        want_token_id: None,
        utxo_hash,
        utxo_index,
        price: 0,
        amount: 0,
        min_fill: 0,
    })
}

/// v2 chunks after the version byte: flags, offered-type, terms-type,
/// token-id, an optional want-token-id (iff `flags & FLAG_HAS_WANT`),
/// utxo-hash, utxo-index, one or more price-term chunks, and a final
/// signature chunk.
fn parse_v2(chunks: &[Chunk]) -> Result<ParsedRswpOrder, RswpParseError> {
    if chunks.len() < 3 + 6 {
        return Err(RswpParseError::Truncated);
    }
    let flags = match push_bytes(&chunks[3]) {
        Some([f]) => *f,
        _ => return Err(RswpParseError::Truncated),
    };
    let offered_type = match push_bytes(&chunks[4]) {
        Some([t]) => *t,
        _ => return Err(RswpParseError::Truncated),
    };
    let side = if offered_type == 1 { OrderSide::Sell } else { OrderSide::Buy };
    let terms_type = match push_bytes(&chunks[5]) {
        Some([t]) => *t,
        _ => return Err(RswpParseError::Truncated),
    };
    let token_id = fixed32(&chunks[6]).ok_or(RswpParseError::Truncated)?;

    let mut idx = 7;
    let want_token_id = if flags & FLAG_HAS_WANT != 0 {
        let w = fixed32(chunks.get(idx).ok_or(RswpParseError::MissingWantToken)?)
            .ok_or(RswpParseError::MissingWantToken)?;
        idx += 1;
        Some(w)
    } else {
        None
    };

    let utxo_hash = fixed32(chunks.get(idx).ok_or(RswpParseError::Truncated)?).ok_or(RswpParseError::Truncated)?;
    idx += 1;
    let utxo_index = script_index(chunks.get(idx).ok_or(RswpParseError::Truncated)?).ok_or(RswpParseError::Truncated)?;
    idx += 1;

    // Everything between the utxo-index and the final signature chunk is
    // price-terms; there must be at least one and a signature chunk after.
    if idx + 1 >= chunks.len() {
        return Err(RswpParseError::Truncated);
    }
    let term_chunks = &chunks[idx..chunks.len() - 1];
    let terms: Vec<&[u8]> = term_chunks.iter().filter_map(push_bytes).collect();
    if terms.is_empty() {
        return Err(RswpParseError::Truncated);
    }
    let (price, amount, min_fill) = parse_price_terms(terms_type, &terms);

    Ok(ParsedRswpOrder {
        version: 2,
        side,
        token_id,
        want_token_id,
        utxo_hash,
        utxo_index,
        price,
        amount,
        min_fill,
    })
}

/// Decodes the price-terms chunk(s) according to `terms_type`:
/// - 0: `[price, amount]`
/// - 1: `[numerator, denominator, amount]`, price = floor(num*1e8/denom)
///   (a zero denominator is treated as 1 rather than dividing by zero)
/// - 2: `[price, amount, min_fill]`
/// - anything else: concatenate every term chunk and decode it as a single
///   scriptInt, taken as price alone (amount/min_fill default to 0)
fn parse_price_terms(terms_type: u8, terms: &[&[u8]]) -> (u64, u64, u64) {
    let as_u64 = |b: &[u8]| script::decode_script_int(b).filter(|v| *v >= 0).unwrap_or(0) as u64;
    match terms_type {
        0 if terms.len() >= 2 => (as_u64(terms[0]), as_u64(terms[1]), 0),
        1 if terms.len() >= 3 => {
            let numerator = as_u64(terms[0]) as u128;
            let denominator = as_u64(terms[1]).max(1) as u128;
            let amount = as_u64(terms[2]);
            let price = (numerator * 100_000_000 / denominator) as u64;
            (price, amount, 0)
        }
        2 if terms.len() >= 3 => (as_u64(terms[0]), as_u64(terms[1]), as_u64(terms[2])),
        _ => {
            let concatenated: Vec<u8> = terms.iter().flat_map(|t| t.iter().copied()).collect();
            (as_u64(&concatenated), 0, 0)
        }
    }
}

fn price_key(side: OrderSide, price: u64) -> [u8; 8] {
    match side {
        OrderSide::Sell => price.to_be_bytes(),
        OrderSide::Buy => (u64::MAX - price).to_be_bytes(),
    }
}

fn key_so(r: &Ref) -> Vec<u8> {
    let mut k = vec![P_SO];
    k.extend_from_slice(&r.to_bytes());
    k
}

fn key_sp(pair_id: &[u8; 32], side: OrderSide, price: u64, r: &Ref) -> Vec<u8> {
    let mut k = vec![P_SP];
    k.extend_from_slice(pair_id);
    k.extend_from_slice(&price_key(side, price));
    k.extend_from_slice(&r.to_bytes());
    k
}

fn key_sm(scripthash: &[u8; 32], r: &Ref) -> Vec<u8> {
    let mut k = vec![P_SM];
    k.extend_from_slice(scripthash);
    k.extend_from_slice(&r.to_bytes());
    k
}

fn key_sh(height: u32) -> Vec<u8> {
    let mut k = vec![P_SH];
    k.write_u32::<BigEndian>(height).unwrap();
    k
}

fn key_ss(pair_id: &[u8; 32]) -> Vec<u8> {
    let mut k = vec![P_SS];
    k.extend_from_slice(pair_id);
    k
}

fn key_sf(order_ref: &Ref, seq: u32) -> Vec<u8> {
    let mut k = vec![P_SF];
    k.extend_from_slice(&order_ref.to_bytes());
    k.write_u32::<BigEndian>(seq).unwrap();
    k
}

pub struct SwapIndex {
    undo: UndoLog,
}

impl SwapIndex {
    pub fn new() -> Self {
        Self {
            undo: UndoLog::new(CF, UNDO_PREFIX),
        }
    }

    /// Opens a new order from the `OP_RETURN` advertisement carried in
    /// `script_bytes`. The order's ref is derived from the advertisement's
    /// own utxo-hash/utxo-index fields, not supplied by the caller, since
    /// that's what the wire format actually identifies the order by.
    pub fn open_order(
        &mut self,
        db: &rocksdb::DB,
        batch: &mut AtomicBatchWriter,
        script_bytes: &[u8],
        maker_scripthash: [u8; 32],
        height: u32,
    ) -> IndexResult<Option<(Ref, SwapOrder)>> {
        let cf = db
            .cf_handle(CF)
            .ok_or_else(|| IndexError::Config("missing swap cf".to_string()))?;
        let Ok(parsed) = parse_rswp(script_bytes) else {
            return Ok(None);
        };
        let order_ref = parsed.order_ref();

        let order = SwapOrder {
            side: parsed.side,
            pair_id: parsed.token_id,
            quote_ref: parsed.quote_ref(),
            price: parsed.price,
            amount: parsed.amount,
            remaining: parsed.amount,
            min_fill: parsed.min_fill,
            maker_scripthash,
            open_height: height,
        };

        let so_key = key_so(&order_ref);
        let prior_so = db.get_cf(&cf, &so_key)?;
        self.undo.record(height, so_key.clone(), prior_so);
        let bytes = bincode::serialize(&order).map_err(|e| IndexError::Corrupt(e.to_string()))?;
        batch.put(CF, so_key, bytes);

        let sp_key = key_sp(&order.pair_id, order.side, order.price, &order_ref);
        let prior_sp = db.get_cf(&cf, &sp_key)?;
        self.undo.record(height, sp_key.clone(), prior_sp);
        batch.put(CF, sp_key, Vec::new());

        let sm_key = key_sm(&maker_scripthash, &order_ref);
        let prior_sm = db.get_cf(&cf, &sm_key)?;
        self.undo.record(height, sm_key.clone(), prior_sm);
        batch.put(CF, sm_key, Vec::new());

        self.touch_height(db, batch, height, order_ref)?;
        Ok(Some((order_ref, order)))
    }

    /// Records a (partial) fill against an open order, updating remaining
    /// size and the pair's rolling stats. Closes and removes the order-book
    /// entry once `remaining` reaches zero.
    pub fn fill_order(
        &mut self,
        db: &rocksdb::DB,
        batch: &mut AtomicBatchWriter,
        order_ref: &Ref,
        taker_ref: Ref,
        fill_price: u64,
        fill_amount: u64,
        height: u32,
    ) -> IndexResult<()> {
        let cf = db
            .cf_handle(CF)
            .ok_or_else(|| IndexError::Config("missing swap cf".to_string()))?;
        let so_key = key_so(order_ref);
        let Some(bytes) = db.get_cf(&cf, &so_key)? else {
            return Ok(());
        };
        let mut order: SwapOrder =
            bincode::deserialize(&bytes).map_err(|e| IndexError::Corrupt(e.to_string()))?;

        self.undo.record(height, so_key.clone(), Some(bytes.clone()));
        order.remaining = order.remaining.saturating_sub(fill_amount);
        let new_bytes = bincode::serialize(&order).map_err(|e| IndexError::Corrupt(e.to_string()))?;
        batch.put(CF, so_key, new_bytes);

        if order.remaining == 0 {
            let sp_key = key_sp(&order.pair_id, order.side, order.price, order_ref);
            let prior_sp = db.get_cf(&cf, &sp_key)?;
            self.undo.record(height, sp_key.clone(), prior_sp);
            batch.delete(CF, sp_key);

            let sm_key = key_sm(&order.maker_scripthash, order_ref);
            let prior_sm = db.get_cf(&cf, &sm_key)?;
            self.undo.record(height, sm_key.clone(), prior_sm);
            batch.delete(CF, sm_key);
        }

        let ss_key = key_ss(&order.pair_id);
        let mut stats: PairStats = db
            .get_cf(&cf, &ss_key)?
            .and_then(|b| bincode::deserialize(&b).ok())
            .unwrap_or_default();
        self.undo.record(
            height,
            ss_key.clone(),
            Some(bincode::serialize(&stats).map_err(|e| IndexError::Corrupt(e.to_string()))?),
        );
        stats.volume = stats.volume.saturating_add(fill_amount);
        stats.last_price = fill_price;
        stats.high = stats.high.max(fill_price);
        stats.low = if stats.low == 0 { fill_price } else { stats.low.min(fill_price) };
        stats.fill_count += 1;
        let stats_bytes = bincode::serialize(&stats).map_err(|e| IndexError::Corrupt(e.to_string()))?;
        batch.put(CF, ss_key, stats_bytes);

        let fill = SwapFillInfo {
            taker_ref,
            price: fill_price,
            amount: fill_amount,
            height,
        };
        let sf_key = key_sf(order_ref, stats.fill_count);
        let fill_bytes = bincode::serialize(&fill).map_err(|e| IndexError::Corrupt(e.to_string()))?;
        self.undo.record(height, sf_key.clone(), None);
        batch.put(CF, sf_key, fill_bytes);

        self.touch_height(db, batch, height, *order_ref)?;
        Ok(())
    }

    fn touch_height(
        &mut self,
        db: &rocksdb::DB,
        batch: &mut AtomicBatchWriter,
        height: u32,
        order_ref: Ref,
    ) -> IndexResult<()> {
        let cf = db
            .cf_handle(CF)
            .ok_or_else(|| IndexError::Config("missing swap cf".to_string()))?;
        let sh_key = key_sh(height);
        let prior = db.get_cf(&cf, &sh_key)?;
        self.undo.record(height, sh_key.clone(), prior.clone());
        let mut refs: Vec<Ref> = prior
            .and_then(|b| bincode::deserialize::<Vec<Ref>>(&b).ok())
            .unwrap_or_default();
        refs.push(order_ref);
        let bytes = bincode::serialize(&refs).map_err(|e| IndexError::Corrupt(e.to_string()))?;
        batch.put(CF, sh_key, bytes);
        Ok(())
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

    pub fn get_order(&self, db: &rocksdb::DB, order_ref: &Ref) -> IndexResult<Option<SwapOrder>> {
        let cf = db
            .cf_handle(CF)
            .ok_or_else(|| IndexError::Config("missing swap cf".to_string()))?;
        match db.get_cf(&cf, key_so(order_ref))? {
            Some(b) => Ok(Some(bincode::deserialize(&b).map_err(|e| IndexError::Corrupt(e.to_string()))?)),
            None => Ok(None),
        }
    }

    /// Returns open order refs for `pair_id`/`side` in priority order
    /// (best price first): ascending on the stored price key, which is
    /// already oriented correctly for both sides by [`price_key`].
    pub fn order_book(
        &self,
        db: &rocksdb::DB,
        pair_id: &[u8; 32],
        side: OrderSide,
        limit: usize,
    ) -> IndexResult<Vec<Ref>> {
        let cf = db
            .cf_handle(CF)
            .ok_or_else(|| IndexError::Config("missing swap cf".to_string()))?;
        let mut prefix = vec![P_SP];
        prefix.extend_from_slice(pair_id);
        let mut out = Vec::new();
        for item in db.prefix_iterator_cf(&cf, &prefix) {
            let (key, _) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            let ref_bytes = &key[1 + 32 + 8..];
            if let Some(r) = Ref::from_bytes(ref_bytes) {
                if let Some(order) = self.get_order(db, &r)? {
                    if order.side == side {
                        out.push(r);
                        if out.len() >= limit {
                            break;
                        }
                    }
                }
            }
        }
        Ok(out)
    }

    pub fn get_pair_stats(&self, db: &rocksdb::DB, pair_id: &[u8; 32]) -> IndexResult<PairStats> {
        let cf = db
            .cf_handle(CF)
            .ok_or_else(|| IndexError::Config("missing swap cf".to_string()))?;
        Ok(db
            .get_cf(&cf, key_ss(pair_id))?
            .and_then(|b| bincode::deserialize(&b).ok())
            .unwrap_or_default())
    }

    pub fn maker_orders(&self, db: &rocksdb::DB, scripthash: &[u8; 32]) -> IndexResult<Vec<Ref>> {
        let cf = db
            .cf_handle(CF)
            .ok_or_else(|| IndexError::Config("missing swap cf".to_string()))?;
        let mut prefix = vec![P_SM];
        prefix.extend_from_slice(scripthash);
        let mut out = Vec::new();
        for item in db.prefix_iterator_cf(&cf, &prefix) {
            let (key, _) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            if let Some(r) = Ref::from_bytes(&key[1 + 32..]) {
                out.push(r);
            }
        }
        Ok(out)
    }
}

impl Default for SwapIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push(data: &[u8]) -> Vec<u8> {
        assert!(data.len() <= 75, "test fixtures only need literal pushes");
        let mut v = vec![data.len() as u8];
        v.extend_from_slice(data);
        v
    }

    fn script_int(mut v: u64) -> Vec<u8> {
        if v == 0 {
            return Vec::new();
        }
        let mut bytes = Vec::new();
        while v > 0 {
            bytes.push((v & 0xff) as u8);
            v >>= 8;
        }
        if bytes.last().unwrap() & 0x80 != 0 {
            bytes.push(0);
        }
        bytes
    }

    fn op_return(parts: &[Vec<u8>]) -> Vec<u8> {
        let mut script = vec![OP_RETURN];
        for p in parts {
            script.extend_from_slice(&push(p));
        }
        script
    }

    fn v1_advertisement(token_id: [u8; 32], utxo_hash: [u8; 32], utxo_index: u32) -> Vec<u8> {
        op_return(&[
            RSWP_MAGIC.to_vec(),
            vec![1],
            vec![0],            // legacy_type, unused
            token_id.to_vec(),
            utxo_hash.to_vec(),
            script_int(utxo_index as u64),
            vec![0xaa],         // opaque price-terms chunk, never decoded for v1
            vec![0xbb],         // signature, unused
        ])
    }

    fn v2_advertisement(
        offered_type: u8,
        terms_type: u8,
        token_id: [u8; 32],
        want_token_id: Option<[u8; 32]>,
        utxo_hash: [u8; 32],
        utxo_index: u32,
        terms: &[Vec<u8>],
    ) -> Vec<u8> {
        let flags = if want_token_id.is_some() { FLAG_HAS_WANT } else { 0 };
        let mut parts = vec![
            RSWP_MAGIC.to_vec(),
            vec![2],
            vec![flags],
            vec![offered_type],
            vec![terms_type],
            token_id.to_vec(),
        ];
        if let Some(w) = want_token_id {
            parts.push(w.to_vec());
        }
        parts.push(utxo_hash.to_vec());
        parts.push(script_int(utxo_index as u64));
        parts.extend_from_slice(terms);
        parts.push(vec![0xbb]); // signature, unused
        op_return(&parts)
    }

    #[test]
    fn parses_v1_as_a_plain_sell_with_no_price_terms() {
        let script = v1_advertisement([1u8; 32], [2u8; 32], 3);
        let parsed = parse_rswp(&script).unwrap();
        assert_eq!(parsed.version, 1);
        assert_eq!(parsed.side, OrderSide::Sell);
        assert_eq!(parsed.token_id, [1u8; 32]);
        assert_eq!(parsed.utxo_hash, [2u8; 32]);
        assert_eq!(parsed.utxo_index, 3);
        assert_eq!(parsed.want_token_id, None);
        assert_eq!(parsed.price, 0);
        assert_eq!(parsed.amount, 0);
        assert_eq!(parsed.order_ref(), Ref::new([2u8; 32], 3));
        assert_eq!(parsed.base_ref(), Ref::new([1u8; 32], 0));
    }

    #[test]
    fn parses_v2_terms_type_0_price_and_amount() {
        let script = v2_advertisement(
            1, // sell
            0,
            [5u8; 32],
            None,
            [6u8; 32],
            0,
            &[script_int(100), script_int(50)],
        );
        let parsed = parse_rswp(&script).unwrap();
        assert_eq!(parsed.side, OrderSide::Sell);
        assert_eq!(parsed.price, 100);
        assert_eq!(parsed.amount, 50);
        assert_eq!(parsed.min_fill, 0);
    }

    #[test]
    fn parses_v2_terms_type_1_fraction_into_scaled_price() {
        let script = v2_advertisement(
            2, // buy
            1,
            [5u8; 32],
            None,
            [6u8; 32],
            0,
            &[script_int(1), script_int(2), script_int(10)],
        );
        let parsed = parse_rswp(&script).unwrap();
        assert_eq!(parsed.side, OrderSide::Buy);
        assert_eq!(parsed.price, 50_000_000); // floor(1 * 1e8 / 2)
        assert_eq!(parsed.amount, 10);
    }

    #[test]
    fn parses_v2_terms_type_1_treats_zero_denominator_as_one() {
        let script = v2_advertisement(1, 1, [5u8; 32], None, [6u8; 32], 0, &[script_int(7), script_int(0), script_int(1)]);
        let parsed = parse_rswp(&script).unwrap();
        assert_eq!(parsed.price, 700_000_000);
    }

    #[test]
    fn parses_v2_terms_type_2_with_min_fill() {
        let script = v2_advertisement(
            1,
            2,
            [5u8; 32],
            None,
            [6u8; 32],
            0,
            &[script_int(200), script_int(75), script_int(10)],
        );
        let parsed = parse_rswp(&script).unwrap();
        assert_eq!(parsed.price, 200);
        assert_eq!(parsed.amount, 75);
        assert_eq!(parsed.min_fill, 10);
    }

    #[test]
    fn parses_v2_want_token_into_quote_ref() {
        let script = v2_advertisement(
            2,
            0,
            [5u8; 32],
            Some([9u8; 32]),
            [6u8; 32],
            1,
            &[script_int(100), script_int(50)],
        );
        let parsed = parse_rswp(&script).unwrap();
        assert_eq!(parsed.want_token_id, Some([9u8; 32]));
        assert_eq!(parsed.quote_ref(), Some(Ref::new([9u8; 32], 0)));
    }

    #[test]
    fn unknown_terms_type_concatenates_and_decodes_as_price_only() {
        let script = v2_advertisement(1, 9, [5u8; 32], None, [6u8; 32], 0, &[vec![0x64]]);
        let parsed = parse_rswp(&script).unwrap();
        assert_eq!(parsed.price, 0x64);
        assert_eq!(parsed.amount, 0);
        assert_eq!(parsed.min_fill, 0);
    }

    #[test]
    fn rejects_scripts_without_op_return_or_rswp_magic() {
        assert_eq!(parse_rswp(&push(b"not an ad")), Err(RswpParseError::NotAdvertisement));
        let mut bad_magic = vec![OP_RETURN];
        bad_magic.extend_from_slice(&push(b"xxxx"));
        bad_magic.extend_from_slice(&push(&[1]));
        assert_eq!(parse_rswp(&bad_magic), Err(RswpParseError::NotAdvertisement));
    }

    #[test]
    fn rejects_unsupported_version() {
        let script = op_return(&[RSWP_MAGIC.to_vec(), vec![9]]);
        assert_eq!(parse_rswp(&script), Err(RswpParseError::UnsupportedVersion(9)));
    }

    #[test]
    fn price_key_orients_buy_and_sell_for_ascending_scan() {
        let sell_cheap = price_key(OrderSide::Sell, 10);
        let sell_expensive = price_key(OrderSide::Sell, 20);
        assert!(sell_cheap < sell_expensive);

        let buy_rich = price_key(OrderSide::Buy, 20);
        let buy_poor = price_key(OrderSide::Buy, 10);
        assert!(buy_rich < buy_poor);
    }
}
