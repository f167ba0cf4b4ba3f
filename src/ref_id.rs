/// Identity of a single UTXO, shared by every index as the primary key for
/// a token, swap order, or WAVE name claim.
///
/// Internally 36 bytes: a 32-byte txid followed by a 4-byte little-endian
/// vout, matching how the reference implementation builds its ref tuples.
/// Externally formatted as `hex(txid)_<vout>` for logs, JSON payloads and
/// config values (e.g. `wave.genesis_ref`).
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Ref {
    pub txid: [u8; 32],
    pub vout: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefParseError {
    BadFormat,
    BadTxid(String),
    BadVout(String),
}

impl fmt::Display for RefParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefParseError::BadFormat => write!(f, "expected '<txid_hex>_<vout>'"),
            RefParseError::BadTxid(s) => write!(f, "bad txid hex: {}", s),
            RefParseError::BadVout(s) => write!(f, "bad vout: {}", s),
        }
    }
}

impl Ref {
    pub fn new(txid: [u8; 32], vout: u32) -> Self {
        Self { txid, vout }
    }

    /// Packs into the 36-byte key-schema encoding (txid || vout LE).
    pub fn to_bytes(&self) -> [u8; 36] {
        let mut buf = [0u8; 36];
        buf[..32].copy_from_slice(&self.txid);
        (&mut buf[32..])
            .write_u32::<LittleEndian>(self.vout)
            .expect("fixed-size buffer write cannot fail");
        buf
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != 36 {
            return None;
        }
        let mut txid = [0u8; 32];
        txid.copy_from_slice(&bytes[..32]);
        let vout = (&bytes[32..]).read_u32::<LittleEndian>().ok()?;
        Some(Self { txid, vout })
    }

    /// Parses the external `hex(txid)_<vout>` format.
    pub fn parse(s: &str) -> Result<Self, RefParseError> {
        let (txid_hex, vout_str) = s.rsplit_once('_').ok_or(RefParseError::BadFormat)?;
        let txid_vec =
            hex::decode(txid_hex).map_err(|_| RefParseError::BadTxid(txid_hex.to_string()))?;
        if txid_vec.len() != 32 {
            return Err(RefParseError::BadTxid(txid_hex.to_string()));
        }
        let mut txid = [0u8; 32];
        txid.copy_from_slice(&txid_vec);
        let vout = vout_str
            .parse::<u32>()
            .map_err(|_| RefParseError::BadVout(vout_str.to_string()))?;
        Ok(Self { txid, vout })
    }
}

impl fmt::Display for Ref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", hex::encode(self.txid), self.vout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_through_bytes() {
        let r = Ref::new([7u8; 32], 42);
        let bytes = r.to_bytes();
        assert_eq!(bytes.len(), 36);
        assert_eq!(Ref::from_bytes(&bytes), Some(r));
    }

    #[test]
    fn roundtrips_through_display_and_parse() {
        let r = Ref::new([0xabu8; 32], 3);
        let s = r.to_string();
        assert_eq!(Ref::parse(&s).unwrap(), r);
    }

    #[test]
    fn rejects_malformed_strings() {
        assert_eq!(Ref::parse("not-a-ref"), Err(RefParseError::BadFormat));
        assert!(matches!(Ref::parse("zz_1"), Err(RefParseError::BadTxid(_))));
        assert!(matches!(
            Ref::parse(&format!("{}_x", hex::encode([0u8; 32]))),
            Err(RefParseError::BadVout(_))
        ));
    }

    #[test]
    fn from_bytes_rejects_wrong_length() {
        assert_eq!(Ref::from_bytes(&[0u8; 35]), None);
        assert_eq!(Ref::from_bytes(&[0u8; 37]), None);
    }
}
