/// Minimal scriptPubKey / scriptSig walker.
///
/// Only what the Glyph and RSWP protocols need to locate ref-opcodes and
/// literal pushes: opcode classification, push-data decoding and Bitcoin's
/// variable-length scriptInt encoding. Not a script interpreter — there is
/// no stack, no execution, just a left-to-right chunk scan.
use crate::ref_id::Ref;

/// One decoded element of a script: either an opcode that doesn't carry
/// push data, or a data push (covers literal pushes, PUSHDATA1/2/4, the
/// empty push and OP_1..OP_16).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Chunk {
    Op(u8),
    Push(Vec<u8>),
}

pub const OP_FT_REF: u8 = 0xd0;
pub const OP_REF_1: u8 = 0xd1;
pub const OP_REF_2: u8 = 0xd2;
pub const OP_REF_3: u8 = 0xd3;
pub const OP_NFT_REF: u8 = 0xd8;

const OP_PUSHDATA1: u8 = 0x4c;
const OP_PUSHDATA2: u8 = 0x4d;
const OP_PUSHDATA4: u8 = 0x4e;
const OP_0: u8 = 0x00;
const OP_1: u8 = 0x51;
const OP_16: u8 = 0x60;

/// Walks `script` left to right, yielding each opcode or push in order.
/// Stops (returning everything decoded so far) if a push's declared length
/// runs past the end of the buffer — scripts in the wild are not always
/// well-formed and a truncated tail is not fatal to the caller.
pub fn iter_chunks(script: &[u8]) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut i = 0usize;
    while i < script.len() {
        let op = script[i];
        i += 1;
        match op {
            OP_0 => chunks.push(Chunk::Push(Vec::new())),
            1..=75 => {
                let len = op as usize;
                if i + len > script.len() {
                    break;
                }
                chunks.push(Chunk::Push(script[i..i + len].to_vec()));
                i += len;
            }
            OP_PUSHDATA1 => {
                if i + 1 > script.len() {
                    break;
                }
                let len = script[i] as usize;
                i += 1;
                if i + len > script.len() {
                    break;
                }
                chunks.push(Chunk::Push(script[i..i + len].to_vec()));
                i += len;
            }
            OP_PUSHDATA2 => {
                if i + 2 > script.len() {
                    break;
                }
                let len = u16::from_le_bytes([script[i], script[i + 1]]) as usize;
                i += 2;
                if i + len > script.len() {
                    break;
                }
                chunks.push(Chunk::Push(script[i..i + len].to_vec()));
                i += len;
            }
            OP_PUSHDATA4 => {
                if i + 4 > script.len() {
                    break;
                }
                let len = u32::from_le_bytes([
                    script[i],
                    script[i + 1],
                    script[i + 2],
                    script[i + 3],
                ]) as usize;
                i += 4;
                if i + len > script.len() {
                    break;
                }
                chunks.push(Chunk::Push(script[i..i + len].to_vec()));
                i += len;
            }
            OP_1..=OP_16 => chunks.push(Chunk::Push(vec![op - OP_1 + 1])),
            other => chunks.push(Chunk::Op(other)),
        }
    }
    chunks
}

/// Decodes a Bitcoin-style minimally-encoded scriptnum. Empty slice is 0.
/// The sign bit lives in the high bit of the last byte.
pub fn decode_script_int(bytes: &[u8]) -> Option<i64> {
    if bytes.is_empty() {
        return Some(0);
    }
    if bytes.len() > 8 {
        return None;
    }
    let mut result: i64 = 0;
    for (idx, &b) in bytes.iter().enumerate() {
        result |= (b as i64) << (8 * idx);
    }
    let last = bytes[bytes.len() - 1];
    if last & 0x80 != 0 {
        result &= !(0x80i64 << (8 * (bytes.len() - 1)));
        result = -result;
    }
    Some(result)
}

/// One ref found during a scan, tagged with which opcode introduced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefOp {
    pub opcode: u8,
    pub r#ref: Ref,
}

/// Scans a script for ref-carrying opcodes (`OP_FT_REF`/`OP_NFT_REF`), each
/// immediately preceded by a 36-byte push (txid || vout). `OP_REF_1..3` are
/// present in the wire format but carry no application meaning here; they
/// still consume the preceding 36-byte push so the walk stays aligned.
pub fn scan_refs(script: &[u8]) -> Vec<RefOp> {
    let chunks = iter_chunks(script);
    let mut out = Vec::new();
    let mut i = 0usize;
    while i < chunks.len() {
        if let Chunk::Op(op) = chunks[i] {
            if matches!(
                op,
                OP_FT_REF | OP_NFT_REF | OP_REF_1 | OP_REF_2 | OP_REF_3
            ) && i > 0
            {
                if let Chunk::Push(data) = &chunks[i - 1] {
                    if let Some(r) = Ref::from_bytes(data) {
                        if matches!(op, OP_FT_REF | OP_NFT_REF) {
                            out.push(RefOp { opcode: op, r#ref: r });
                        }
                    }
                }
            }
        }
        i += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_literal_pushes() {
        let script = [0x03u8, b'a', b'b', b'c'];
        let chunks = iter_chunks(&script);
        assert_eq!(chunks, vec![Chunk::Push(vec![b'a', b'b', b'c'])]);
    }

    #[test]
    fn decodes_pushdata1() {
        let mut script = vec![OP_PUSHDATA1, 2];
        script.extend_from_slice(&[9, 9]);
        let chunks = iter_chunks(&script);
        assert_eq!(chunks, vec![Chunk::Push(vec![9, 9])]);
    }

    #[test]
    fn decodes_small_int_pushes() {
        let script = [OP_1, OP_1 + 5, OP_16];
        let chunks = iter_chunks(&script);
        assert_eq!(
            chunks,
            vec![Chunk::Push(vec![1]), Chunk::Push(vec![6]), Chunk::Push(vec![16])]
        );
    }

    #[test]
    fn decodes_empty_push_as_zero() {
        assert_eq!(iter_chunks(&[OP_0]), vec![Chunk::Push(Vec::new())]);
    }

    #[test]
    fn truncated_push_stops_cleanly() {
        let script = [0x05u8, 1, 2];
        assert_eq!(iter_chunks(&script), Vec::new());
    }

    #[test]
    fn scriptint_roundtrips_small_values() {
        assert_eq!(decode_script_int(&[]), Some(0));
        assert_eq!(decode_script_int(&[0x01]), Some(1));
        assert_eq!(decode_script_int(&[0x81]), Some(-1));
        assert_eq!(decode_script_int(&[0xff, 0x00]), Some(255));
    }

    #[test]
    fn scan_refs_finds_ft_and_nft_and_skips_filler_ops() {
        let r = Ref::new([1u8; 32], 0);
        let mut script = vec![36u8];
        script.extend_from_slice(&r.to_bytes());
        script.push(OP_FT_REF);
        script.push(OP_REF_1);
        let refs = scan_refs(&script);
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].opcode, OP_FT_REF);
        assert_eq!(refs[0].r#ref, r);
    }

    #[test]
    fn scan_refs_ignores_ref_opcode_without_preceding_push() {
        let script = [OP_FT_REF];
        assert!(scan_refs(&script).is_empty());
    }
}
