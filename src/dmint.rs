/// dMint contracts manager.
///
/// A derived view over DMINT-protocol genesis records, persisted as two
/// JSON files (a compact listing and an extended one with computed
/// reward/difficulty fields) so external tooling can poll them without
/// touching the RocksDB store directly. Both files are rewritten to a
/// temp path and renamed into place only after both temp writes succeed —
/// the reference implementation wrote these in place, which could leave a
/// reader with a half-written file if the process died mid-write.
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

use crate::glyph_index::GlyphIndex;
use crate::ref_id::Ref;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DmintContract {
    pub token_ref: Ref,
    pub ticker: Option<String>,
    pub algorithm: String,
    pub difficulty: u64,
    pub reward: u64,
    pub deploy_height: u32,
    pub daa_mode: u8,
    pub active: bool,
}

/// Names the dMint algorithm code carried in a genesis's `algo` field.
/// Unknown codes are kept visible rather than collapsed to a default, so a
/// new algorithm shows up in listings before this table is updated for it.
pub fn algorithm_name(code: u8) -> String {
    match code {
        0 => "sha256d".to_string(),
        1 => "scrypt".to_string(),
        other => format!("algo-{}", other),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ExtendedContract {
    #[serde(flatten)]
    base: DmintContract,
    reward_per_difficulty: f64,
}

pub struct DmintContractsManager {
    data_dir: PathBuf,
    contracts: HashMap<Ref, DmintContract>,
}

impl DmintContractsManager {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            contracts: HashMap::new(),
        }
    }

    fn simple_path(&self) -> PathBuf {
        self.data_dir.join("contracts.json")
    }

    fn extended_path(&self) -> PathBuf {
        self.data_dir.join("contracts_extended.json")
    }

    /// Adds or replaces a contract, ordered by `deploy_height` for stable
    /// listing output.
    pub fn add_contract(&mut self, contract: DmintContract) {
        self.contracts.insert(contract.token_ref, contract);
    }

    pub fn update_contract(&mut self, token_ref: &Ref, reward: u64, difficulty: u64) -> bool {
        if let Some(c) = self.contracts.get_mut(token_ref) {
            c.reward = reward;
            c.difficulty = difficulty;
            true
        } else {
            false
        }
    }

    pub fn deactivate_contract(&mut self, token_ref: &Ref) -> bool {
        if let Some(c) = self.contracts.get_mut(token_ref) {
            c.active = false;
            true
        } else {
            false
        }
    }

    /// Rebuilds the contract set from confirmed DMINT genesis records in
    /// the token index.
    pub fn sync_from_index(&mut self, db: &rocksdb::DB, glyph_index: &GlyphIndex) -> io::Result<()> {
        let refs = glyph_index
            .dmint_tokens(db)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
        for r in refs {
            if let Some(token) = glyph_index
                .get_token(db, &r)
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?
            {
                let Some(dmint) = token.dmint.clone() else { continue };
                self.contracts.entry(r).or_insert(DmintContract {
                    token_ref: r,
                    ticker: token.ticker,
                    algorithm: algorithm_name(dmint.algorithm),
                    difficulty: dmint.difficulty,
                    reward: dmint.reward,
                    deploy_height: token.deploy_height,
                    daa_mode: dmint.daa_mode,
                    active: true,
                });
            }
        }
        Ok(())
    }

    pub fn get_contract(&self, token_ref: &Ref) -> Option<&DmintContract> {
        self.contracts.get(token_ref)
    }

    pub fn get_contract_daa(&self, token_ref: &Ref) -> Option<u8> {
        self.contracts.get(token_ref).map(|c| c.daa_mode)
    }

    pub fn get_contracts_by_algorithm(&self, algorithm: &str) -> Vec<&DmintContract> {
        let mut out: Vec<&DmintContract> = self
            .contracts
            .values()
            .filter(|c| c.algorithm == algorithm)
            .collect();
        out.sort_by_key(|c| c.deploy_height);
        out
    }

    pub fn get_most_profitable(&self, limit: usize) -> Vec<&DmintContract> {
        let mut out: Vec<&DmintContract> = self.contracts.values().filter(|c| c.active).collect();
        out.sort_by(|a, b| {
            let ra = a.reward as f64 / a.difficulty.max(1) as f64;
            let rb = b.reward as f64 / b.difficulty.max(1) as f64;
            rb.partial_cmp(&ra).unwrap_or(std::cmp::Ordering::Equal)
        });
        out.truncate(limit);
        out
    }

    fn contracts_sorted(&self) -> Vec<&DmintContract> {
        let mut out: Vec<&DmintContract> = self.contracts.values().collect();
        out.sort_by_key(|c| c.deploy_height);
        out
    }

    /// Writes both JSON files. Each is staged to a `.tmp` sibling and
    /// renamed into place; the simple file is only renamed after the
    /// extended file's write has fully succeeded, so a reader never sees
    /// one update without the other.
    pub fn save(&self) -> io::Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;

        let simple: Vec<&DmintContract> = self.contracts_sorted();
        let extended: Vec<ExtendedContract> = simple
            .iter()
            .map(|c| ExtendedContract {
                base: (*c).clone(),
                reward_per_difficulty: c.reward as f64 / c.difficulty.max(1) as f64,
            })
            .collect();

        let simple_tmp = self.simple_path().with_extension("json.tmp");
        let extended_tmp = self.extended_path().with_extension("json.tmp");

        write_json_atomic_stage(&simple_tmp, &simple)?;
        write_json_atomic_stage(&extended_tmp, &extended)?;

        std::fs::rename(&extended_tmp, self.extended_path())?;
        std::fs::rename(&simple_tmp, self.simple_path())?;
        Ok(())
    }

    pub fn load(&mut self) -> io::Result<()> {
        let path = self.simple_path();
        if !path.exists() {
            return Ok(());
        }
        let data = std::fs::read_to_string(path)?;
        let contracts: Vec<DmintContract> = serde_json::from_str(&data)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        for c in contracts {
            self.contracts.insert(c.token_ref, c);
        }
        Ok(())
    }
}

fn write_json_atomic_stage<T: Serialize>(tmp_path: &Path, value: &T) -> io::Result<()> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    std::fs::write(tmp_path, json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn contract(n: u8, height: u32) -> DmintContract {
        DmintContract {
            token_ref: Ref::new([n; 32], 0),
            ticker: Some(format!("TOK{}", n)),
            algorithm: "sha256d".to_string(),
            difficulty: 2,
            reward: 10,
            deploy_height: height,
            daa_mode: 0,
            active: true,
        }
    }

    #[test]
    fn add_update_deactivate_round_trip() {
        let mut mgr = DmintContractsManager::new("/tmp/unused");
        mgr.add_contract(contract(1, 100));
        assert!(mgr.update_contract(&Ref::new([1; 32], 0), 20, 4));
        assert_eq!(mgr.get_contract(&Ref::new([1; 32], 0)).unwrap().reward, 20);
        assert!(mgr.deactivate_contract(&Ref::new([1; 32], 0)));
        assert!(!mgr.get_contract(&Ref::new([1; 32], 0)).unwrap().active);
    }

    #[test]
    fn save_then_load_round_trips_simple_listing() {
        let dir = TempDir::new().unwrap();
        let mut mgr = DmintContractsManager::new(dir.path());
        mgr.add_contract(contract(1, 100));
        mgr.add_contract(contract(2, 50));
        mgr.save().unwrap();

        assert!(dir.path().join("contracts.json").exists());
        assert!(dir.path().join("contracts_extended.json").exists());

        let mut reloaded = DmintContractsManager::new(dir.path());
        reloaded.load().unwrap();
        assert_eq!(reloaded.get_contract(&Ref::new([1; 32], 0)).unwrap().reward, 10);
    }

    #[test]
    fn most_profitable_ranks_by_reward_over_difficulty() {
        let mut mgr = DmintContractsManager::new("/tmp/unused");
        let mut cheap = contract(1, 1);
        cheap.reward = 100;
        cheap.difficulty = 10;
        let mut rich = contract(2, 2);
        rich.reward = 100;
        rich.difficulty = 2;
        mgr.add_contract(cheap);
        mgr.add_contract(rich);

        let top = mgr.get_most_profitable(1);
        assert_eq!(top[0].token_ref, Ref::new([2; 32], 0));
    }

    #[test]
    fn get_contract_daa_reads_stored_mode() {
        let mut mgr = DmintContractsManager::new("/tmp/unused");
        let mut c = contract(1, 1);
        c.daa_mode = 2;
        mgr.add_contract(c);
        assert_eq!(mgr.get_contract_daa(&Ref::new([1; 32], 0)), Some(2));
        assert_eq!(mgr.get_contract_daa(&Ref::new([9; 32], 0)), None);
    }

    #[test]
    fn algorithm_name_covers_known_and_unknown_codes() {
        assert_eq!(algorithm_name(0), "sha256d");
        assert_eq!(algorithm_name(1), "scrypt");
        assert_eq!(algorithm_name(7), "algo-7");
    }
}
