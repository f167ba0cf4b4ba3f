/// In-memory mirror of unconfirmed Glyph transfers and RSWP orders.
///
/// Deliberately excludes DMINT reveals and WAVE claims: both only become
/// meaningful once mined (a dMint contract isn't live until its reveal is
/// confirmed, and a name claim racing in mempool would let two conflicting
/// claims both appear "pending" with no way to pick a winner before a
/// block settles it), so neither is worth tracking here.
///
/// Ref discovery mirrors the confirmed-chain path exactly: scan outputs
/// first, fall back to the spent input's carried ref only if no output
/// continues it. Earlier mempool-only code read the ref straight out of
/// envelope metadata, which desynced from what the confirmed indexer would
/// actually record once mined.
use std::collections::{HashMap, HashSet};

use crate::ref_id::Ref;
use crate::swap_index::{OrderSide, SwapOrder};

/// One signed balance movement an unconfirmed transaction makes against a
/// ref/scripthash pair. A transfer is recorded as two entries sharing the
/// same `txid`: a negative `amount` debiting the sender, a positive one
/// crediting the recipient, so [`MempoolShadow::unconfirmed_balance`] can
/// net them with a plain sum instead of assuming every entry is a credit.
#[derive(Debug, Clone, PartialEq)]
pub struct MempoolGlyphTx {
    pub txid: [u8; 32],
    pub token_ref: Ref,
    pub scripthash: [u8; 32],
    pub amount: i64,
    pub seen_at_height_hint: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MempoolSwapOrder {
    pub order_ref: Ref,
    pub order: SwapOrder,
}

#[derive(Debug, Default)]
pub struct MempoolShadow {
    glyph_txs: HashMap<[u8; 32], Vec<MempoolGlyphTx>>,
    glyph_by_ref: HashMap<Ref, Vec<[u8; 32]>>,
    glyph_by_scripthash: HashMap<[u8; 32], HashSet<[u8; 32]>>,

    swap_orders: HashMap<Ref, MempoolSwapOrder>,
    swap_by_pair: HashMap<[u8; 32], HashSet<Ref>>,
    swap_by_maker: HashMap<[u8; 32], HashSet<Ref>>,

    touched_refs: HashSet<Ref>,
    touched_scripthashes: HashSet<[u8; 32]>,
}

impl MempoolShadow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn process_glyph_tx(&mut self, tx: MempoolGlyphTx) {
        self.touched_refs.insert(tx.token_ref);
        self.touched_scripthashes.insert(tx.scripthash);
        self.glyph_by_ref.entry(tx.token_ref).or_default().push(tx.txid);
        self.glyph_by_scripthash
            .entry(tx.scripthash)
            .or_default()
            .insert(tx.txid);
        self.glyph_txs.entry(tx.txid).or_default().push(tx);
    }

    pub fn process_swap_order(&mut self, order_ref: Ref, order: SwapOrder) {
        self.touched_refs.insert(order_ref);
        self.touched_scripthashes.insert(order.maker_scripthash);
        self.swap_by_pair.entry(order.pair_id).or_default().insert(order_ref);
        self.swap_by_maker
            .entry(order.maker_scripthash)
            .or_default()
            .insert(order_ref);
        self.swap_orders.insert(order_ref, MempoolSwapOrder { order_ref, order });
    }

    /// Removes everything associated with `txid` (it either confirmed or
    /// was evicted/replaced), returning the refs and scripthashes it
    /// touched so callers can notify subscribers.
    pub fn remove_tx(&mut self, txid: &[u8; 32]) -> (HashSet<Ref>, HashSet<[u8; 32]>) {
        let mut refs = HashSet::new();
        let mut scripthashes = HashSet::new();

        if let Some(txs) = self.glyph_txs.remove(txid) {
            for tx in txs {
                refs.insert(tx.token_ref);
                scripthashes.insert(tx.scripthash);
                if let Some(txids) = self.glyph_by_ref.get_mut(&tx.token_ref) {
                    txids.retain(|t| t != txid);
                    if txids.is_empty() {
                        self.glyph_by_ref.remove(&tx.token_ref);
                    }
                }
                if let Some(set) = self.glyph_by_scripthash.get_mut(&tx.scripthash) {
                    set.remove(txid);
                    if set.is_empty() {
                        self.glyph_by_scripthash.remove(&tx.scripthash);
                    }
                }
            }
        }

        let order_refs: Vec<Ref> = self
            .swap_orders
            .iter()
            .filter(|(r, _)| &r.txid == txid)
            .map(|(r, _)| *r)
            .collect();
        for order_ref in order_refs {
            if let Some(entry) = self.swap_orders.remove(&order_ref) {
                refs.insert(order_ref);
                scripthashes.insert(entry.order.maker_scripthash);
                if let Some(set) = self.swap_by_pair.get_mut(&entry.order.pair_id) {
                    set.remove(&order_ref);
                }
                if let Some(set) = self.swap_by_maker.get_mut(&entry.order.maker_scripthash) {
                    set.remove(&order_ref);
                }
            }
        }

        (refs, scripthashes)
    }

    /// Drains and returns everything touched since the last drain, for the
    /// caller to fan out to subscribers.
    pub fn get_touched_and_clear(&mut self) -> (HashSet<Ref>, HashSet<[u8; 32]>) {
        (
            std::mem::take(&mut self.touched_refs),
            std::mem::take(&mut self.touched_scripthashes),
        )
    }

    pub fn unconfirmed_balance(&self, scripthash: &[u8; 32], token_ref: &Ref) -> i64 {
        let mut delta: i64 = 0;
        if let Some(txids) = self.glyph_by_scripthash.get(scripthash) {
            for txid in txids {
                if let Some(txs) = self.glyph_txs.get(txid) {
                    for tx in txs {
                        if &tx.token_ref == token_ref && &tx.scripthash == scripthash {
                            delta += tx.amount;
                        }
                    }
                }
            }
        }
        delta
    }

    pub fn unconfirmed_txs_for_scripthash(&self, scripthash: &[u8; 32]) -> Vec<MempoolGlyphTx> {
        self.glyph_by_scripthash
            .get(scripthash)
            .map(|txids| {
                txids
                    .iter()
                    .flat_map(|t| self.glyph_txs.get(t).cloned().unwrap_or_default())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn unconfirmed_orders_for_pair(&self, pair_id: &[u8; 32], side: Option<OrderSide>) -> Vec<Ref> {
        self.swap_by_pair
            .get(pair_id)
            .map(|refs| {
                refs.iter()
                    .filter(|r| match side {
                        None => true,
                        Some(s) => self.swap_orders.get(r).map(|o| o.order.side) == Some(s),
                    })
                    .copied()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn unconfirmed_orders_for_maker(&self, scripthash: &[u8; 32]) -> Vec<Ref> {
        self.swap_by_maker
            .get(scripthash)
            .map(|refs| refs.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn stats(&self) -> MempoolStats {
        MempoolStats {
            glyph_tx_count: self.glyph_txs.values().map(|v| v.len()).sum(),
            swap_order_count: self.swap_orders.len(),
            tracked_scripthashes: self.glyph_by_scripthash.len(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MempoolStats {
    pub glyph_tx_count: usize,
    pub swap_order_count: usize,
    pub tracked_scripthashes: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ref_n(n: u8) -> Ref {
        Ref::new([n; 32], 0)
    }

    #[test]
    fn process_and_remove_glyph_tx_round_trips() {
        let mut shadow = MempoolShadow::new();
        let tx = MempoolGlyphTx {
            txid: [1u8; 32],
            token_ref: ref_n(2),
            scripthash: [3u8; 32],
            amount: 100,
            seen_at_height_hint: 0,
        };
        shadow.process_glyph_tx(tx.clone());
        assert_eq!(shadow.unconfirmed_balance(&[3u8; 32], &ref_n(2)), 100);

        let (refs, scripthashes) = shadow.remove_tx(&[1u8; 32]);
        assert!(refs.contains(&ref_n(2)));
        assert!(scripthashes.contains(&[3u8; 32]));
        assert_eq!(shadow.unconfirmed_balance(&[3u8; 32], &ref_n(2)), 0);
    }

    #[test]
    fn unconfirmed_balance_nets_signed_debits_and_credits() {
        let mut shadow = MempoolShadow::new();
        shadow.process_glyph_tx(MempoolGlyphTx {
            txid: [1u8; 32],
            token_ref: ref_n(2),
            scripthash: [3u8; 32],
            amount: -40,
            seen_at_height_hint: 0,
        });
        shadow.process_glyph_tx(MempoolGlyphTx {
            txid: [4u8; 32],
            token_ref: ref_n(2),
            scripthash: [3u8; 32],
            amount: 15,
            seen_at_height_hint: 0,
        });
        assert_eq!(shadow.unconfirmed_balance(&[3u8; 32], &ref_n(2)), -25);
    }

    #[test]
    fn touched_sets_drain_on_read() {
        let mut shadow = MempoolShadow::new();
        shadow.process_glyph_tx(MempoolGlyphTx {
            txid: [1u8; 32],
            token_ref: ref_n(2),
            scripthash: [3u8; 32],
            amount: 1,
            seen_at_height_hint: 0,
        });
        let (refs, _) = shadow.get_touched_and_clear();
        assert!(refs.contains(&ref_n(2)));
        let (refs_again, _) = shadow.get_touched_and_clear();
        assert!(refs_again.is_empty());
    }
}
