/// Glyph envelope wire format.
///
/// An envelope is the payload carried by a commit/reveal pair of outputs:
/// the commit output only proves a commitment to content that is unveiled
/// later by the reveal output, which carries the actual CBOR-encoded
/// metadata map. Both share the same `gly` magic and version/flags header
/// so a single `parse` entry point handles either shape.
use std::collections::BTreeMap;
use std::fmt;

pub const MAGIC: &[u8; 3] = b"gly";

const FLAG_REVEAL: u8 = 0b1000_0000;
const FLAG_HAS_CONTENT_ROOT: u8 = 0b0100_0000;
const FLAG_HAS_CONTROLLER: u8 = 0b0010_0000;

use crate::ref_id::Ref;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlyphProtocol {
    Ft = 1,
    Nft = 2,
    Dat = 3,
    Dmint = 4,
    Mut = 5,
    Burn = 6,
    Container = 7,
    Encrypted = 8,
    Timelock = 9,
    Authority = 10,
    Wave = 11,
}

impl GlyphProtocol {
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            1 => GlyphProtocol::Ft,
            2 => GlyphProtocol::Nft,
            3 => GlyphProtocol::Dat,
            4 => GlyphProtocol::Dmint,
            5 => GlyphProtocol::Mut,
            6 => GlyphProtocol::Burn,
            7 => GlyphProtocol::Container,
            8 => GlyphProtocol::Encrypted,
            9 => GlyphProtocol::Timelock,
            10 => GlyphProtocol::Authority,
            11 => GlyphProtocol::Wave,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EnvelopeBody {
    Reveal { metadata: BTreeMap<String, ciborium::value::Value> },
    Commit {
        commit_hash: [u8; 32],
        content_root: Option<[u8; 32]>,
        controller: Option<Ref>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub version: u8,
    pub body: EnvelopeBody,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvelopeError {
    NoMagic,
    Truncated,
    UnsupportedVersion(u8),
    BadCbor(String),
}

impl fmt::Display for EnvelopeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnvelopeError::NoMagic => write!(f, "missing gly magic"),
            EnvelopeError::Truncated => write!(f, "envelope truncated"),
            EnvelopeError::UnsupportedVersion(v) => write!(f, "unsupported version {}", v),
            EnvelopeError::BadCbor(msg) => write!(f, "malformed metadata cbor: {}", msg),
        }
    }
}

/// Returns true if `data` begins with the Glyph magic. Cheap pre-filter
/// before a full parse, used by callers scanning every output push.
pub fn has_magic(data: &[u8]) -> bool {
    data.len() >= 3 && &data[..3] == MAGIC
}

pub fn parse(data: &[u8]) -> Result<Envelope, EnvelopeError> {
    if !has_magic(data) {
        return Err(EnvelopeError::NoMagic);
    }
    if data.len() < 5 {
        return Err(EnvelopeError::Truncated);
    }
    let version = data[3];
    if version != 1 && version != 2 {
        return Err(EnvelopeError::UnsupportedVersion(version));
    }
    let flags = data[4];
    let rest = &data[5..];

    if flags & FLAG_REVEAL != 0 {
        let value: ciborium::value::Value =
            ciborium::de::from_reader(rest).map_err(|e| EnvelopeError::BadCbor(e.to_string()))?;
        let map = cbor_into_map(value)?;
        Ok(Envelope {
            version,
            body: EnvelopeBody::Reveal { metadata: map },
        })
    } else {
        let mut i = 0usize;
        if rest.len() < 32 {
            return Err(EnvelopeError::Truncated);
        }
        let mut commit_hash = [0u8; 32];
        commit_hash.copy_from_slice(&rest[i..i + 32]);
        i += 32;

        let content_root = if flags & FLAG_HAS_CONTENT_ROOT != 0 {
            if rest.len() < i + 32 {
                return Err(EnvelopeError::Truncated);
            }
            let mut buf = [0u8; 32];
            buf.copy_from_slice(&rest[i..i + 32]);
            i += 32;
            Some(buf)
        } else {
            None
        };

        let controller = if flags & FLAG_HAS_CONTROLLER != 0 {
            if rest.len() < i + 36 {
                return Err(EnvelopeError::Truncated);
            }
            let r = Ref::from_bytes(&rest[i..i + 36]).ok_or(EnvelopeError::Truncated)?;
            Some(r)
        } else {
            None
        };

        Ok(Envelope {
            version,
            body: EnvelopeBody::Commit {
                commit_hash,
                content_root,
                controller,
            },
        })
    }
}

fn cbor_into_map(
    value: ciborium::value::Value,
) -> Result<BTreeMap<String, ciborium::value::Value>, EnvelopeError> {
    let entries = value
        .into_map()
        .map_err(|_| EnvelopeError::BadCbor("metadata must be a map".to_string()))?;
    let mut out = BTreeMap::new();
    for (k, v) in entries {
        let key = k
            .into_text()
            .map_err(|_| EnvelopeError::BadCbor("metadata keys must be text".to_string()))?;
        out.insert(key, v);
    }
    Ok(out)
}

/// Reads the `p` (protocol set) field out of a reveal's metadata map. `p`
/// is always a CBOR array of protocol ids (e.g. `{"p":[2],"name":"Alice"}`
/// for a plain NFT), even when only one bit is set; entries that don't map
/// to a known protocol are silently dropped rather than failing the whole
/// reveal.
pub fn metadata_protocols(metadata: &BTreeMap<String, ciborium::value::Value>) -> Vec<GlyphProtocol> {
    metadata
        .get("p")
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_integer())
                .filter_map(|i| u8::try_from(i128::from(i)).ok())
                .filter_map(GlyphProtocol::from_u8)
                .collect()
        })
        .unwrap_or_default()
}

/// Protocol-combination rules: a reveal's metadata can name more than one
/// protocol bit (e.g. an NFT that is also a CONTAINER), but some pairs are
/// mutually exclusive in the reference implementation.
///
/// - FT and NFT never combine: a token is fungible or unique, not both.
/// - BURN requires FT or NFT on the same envelope: a burn always targets a
///   token, it never stands alone.
/// - DMINT implies FT (a dMint-issued token is always fungible).
/// - MUT/CONTAINER/ENCRYPTED/AUTHORITY all require NFT: each one modifies
///   or extends a specific NFT, never a bare FT or a standalone claim.
/// - TIMELOCK requires ENCRYPTED: there is nothing to time-lock otherwise.
/// - WAVE requires both NFT and MUT: a name claim is an updatable NFT.
pub fn validate_protocols(protocols: &[GlyphProtocol]) -> Result<(), String> {
    if protocols.is_empty() {
        return Err("no protocol bits set".to_string());
    }
    let has = |p: GlyphProtocol| protocols.contains(&p);

    if has(GlyphProtocol::Ft) && has(GlyphProtocol::Nft) {
        return Err("FT and NFT cannot combine".to_string());
    }
    if has(GlyphProtocol::Burn) && !(has(GlyphProtocol::Ft) || has(GlyphProtocol::Nft)) {
        return Err("BURN requires FT or NFT on the same envelope".to_string());
    }
    if has(GlyphProtocol::Dmint) && !has(GlyphProtocol::Ft) {
        return Err("DMINT requires FT".to_string());
    }
    if (has(GlyphProtocol::Mut)
        || has(GlyphProtocol::Container)
        || has(GlyphProtocol::Encrypted)
        || has(GlyphProtocol::Authority))
        && !has(GlyphProtocol::Nft)
    {
        return Err("MUT/CONTAINER/ENCRYPTED/AUTHORITY require NFT on the same envelope".to_string());
    }
    if has(GlyphProtocol::Timelock) && !has(GlyphProtocol::Encrypted) {
        return Err("TIMELOCK requires ENCRYPTED".to_string());
    }
    if has(GlyphProtocol::Wave) && !(has(GlyphProtocol::Nft) && has(GlyphProtocol::Mut)) {
        return Err("WAVE requires NFT and MUT on the same envelope".to_string());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reveal_bytes(pairs: &[(&str, ciborium::value::Value)]) -> Vec<u8> {
        let map: Vec<(ciborium::value::Value, ciborium::value::Value)> = pairs
            .iter()
            .map(|(k, v)| (ciborium::value::Value::Text(k.to_string()), v.clone()))
            .collect();
        let value = ciborium::value::Value::Map(map);
        let mut cbor = Vec::new();
        ciborium::ser::into_writer(&value, &mut cbor).unwrap();

        let mut out = Vec::new();
        out.extend_from_slice(MAGIC);
        out.push(1);
        out.push(FLAG_REVEAL);
        out.extend_from_slice(&cbor);
        out
    }

    #[test]
    fn rejects_missing_magic() {
        assert_eq!(parse(b"xyz12"), Err(EnvelopeError::NoMagic));
    }

    #[test]
    fn rejects_unsupported_version() {
        let mut data = Vec::new();
        data.extend_from_slice(MAGIC);
        data.push(9);
        data.push(FLAG_REVEAL);
        assert_eq!(parse(&data), Err(EnvelopeError::UnsupportedVersion(9)));
    }

    #[test]
    fn parses_reveal_metadata_map() {
        let data = reveal_bytes(&[(
            "p",
            ciborium::value::Value::Array(vec![ciborium::value::Value::Integer(1.into())]),
        )]);
        let env = parse(&data).unwrap();
        match env.body {
            EnvelopeBody::Reveal { metadata } => {
                assert_eq!(metadata_protocols(&metadata), vec![GlyphProtocol::Ft]);
            }
            _ => panic!("expected reveal"),
        }
    }

    #[test]
    fn parses_reveal_metadata_with_multiple_protocol_bits() {
        let data = reveal_bytes(&[(
            "p",
            ciborium::value::Value::Array(vec![
                ciborium::value::Value::Integer(2.into()),
                ciborium::value::Value::Integer(5.into()),
            ]),
        )]);
        let env = parse(&data).unwrap();
        match env.body {
            EnvelopeBody::Reveal { metadata } => {
                assert_eq!(
                    metadata_protocols(&metadata),
                    vec![GlyphProtocol::Nft, GlyphProtocol::Mut]
                );
            }
            _ => panic!("expected reveal"),
        }
    }

    #[test]
    fn parses_commit_with_optional_fields() {
        let mut data = Vec::new();
        data.extend_from_slice(MAGIC);
        data.push(1);
        data.push(FLAG_HAS_CONTENT_ROOT | FLAG_HAS_CONTROLLER);
        data.extend_from_slice(&[1u8; 32]); // commit_hash
        data.extend_from_slice(&[2u8; 32]); // content_root
        data.extend_from_slice(&Ref::new([3u8; 32], 5).to_bytes()); // controller

        let env = parse(&data).unwrap();
        match env.body {
            EnvelopeBody::Commit {
                commit_hash,
                content_root,
                controller,
            } => {
                assert_eq!(commit_hash, [1u8; 32]);
                assert_eq!(content_root, Some([2u8; 32]));
                assert_eq!(controller, Some(Ref::new([3u8; 32], 5)));
            }
            _ => panic!("expected commit"),
        }
    }

    #[test]
    fn validate_protocols_rejects_ft_and_nft_together() {
        assert!(validate_protocols(&[GlyphProtocol::Ft, GlyphProtocol::Nft]).is_err());
    }

    #[test]
    fn validate_protocols_requires_ft_or_nft_for_burn() {
        assert!(validate_protocols(&[GlyphProtocol::Burn]).is_err());
        assert!(validate_protocols(&[GlyphProtocol::Burn, GlyphProtocol::Ft]).is_ok());
        assert!(validate_protocols(&[GlyphProtocol::Burn, GlyphProtocol::Nft]).is_ok());
    }

    #[test]
    fn validate_protocols_requires_ft_for_dmint() {
        assert!(validate_protocols(&[GlyphProtocol::Dmint]).is_err());
        assert!(validate_protocols(&[GlyphProtocol::Dmint, GlyphProtocol::Ft]).is_ok());
    }

    #[test]
    fn validate_protocols_requires_nft_for_mut_container_encrypted_authority() {
        assert!(validate_protocols(&[GlyphProtocol::Mut, GlyphProtocol::Ft]).is_err());
        assert!(validate_protocols(&[GlyphProtocol::Mut, GlyphProtocol::Nft]).is_ok());
        assert!(validate_protocols(&[GlyphProtocol::Container]).is_err());
        assert!(validate_protocols(&[GlyphProtocol::Container, GlyphProtocol::Nft]).is_ok());
        assert!(validate_protocols(&[GlyphProtocol::Encrypted]).is_err());
        assert!(validate_protocols(&[GlyphProtocol::Authority]).is_err());
    }

    #[test]
    fn validate_protocols_requires_encrypted_for_timelock() {
        assert!(validate_protocols(&[GlyphProtocol::Timelock, GlyphProtocol::Nft]).is_err());
        assert!(
            validate_protocols(&[GlyphProtocol::Timelock, GlyphProtocol::Encrypted, GlyphProtocol::Nft])
                .is_ok()
        );
    }

    #[test]
    fn validate_protocols_wave_requires_nft_and_mut() {
        assert!(validate_protocols(&[GlyphProtocol::Wave]).is_err());
        assert!(validate_protocols(&[GlyphProtocol::Wave, GlyphProtocol::Nft]).is_err());
        assert!(validate_protocols(&[GlyphProtocol::Wave, GlyphProtocol::Nft, GlyphProtocol::Mut]).is_ok());
    }
}
