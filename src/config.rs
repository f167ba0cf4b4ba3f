/// Global configuration
///
/// Loaded once at startup from `config.toml` (plus environment overrides via
/// the `config` crate's layered sources) and published through a process-wide
/// `OnceCell`, following the same two-phase init/get split the teacher uses
/// for its own database and RPC configuration.
pub use config::Config;
pub use once_cell::sync::OnceCell;
use std::error::Error;

use crate::ref_id::Ref;

static GLOBAL_CONFIG: OnceCell<Config> = OnceCell::new();

pub fn init_global_config() -> Result<(), Box<dyn Error>> {
    let config = Config::builder()
        .add_source(config::File::with_name("config.toml"))
        .build()?;
    GLOBAL_CONFIG
        .set(config)
        .map_err(|_| "Config already set")?;
    Ok(())
}

pub fn get_global_config() -> &'static Config {
    GLOBAL_CONFIG.get().unwrap_or_else(|| {
        eprintln!("FATAL: Config not initialized - call init_global_config() first");
        std::process::exit(1);
    })
}

/// Load config for standalone binaries/utilities
pub fn load_config() -> Result<Config, Box<dyn Error>> {
    Config::builder()
        .add_source(config::File::with_name("config.toml"))
        .build()
        .map_err(|e| Box::new(e) as Box<dyn Error>)
}

/// Get db_path from config
pub fn get_db_path(config: &Config) -> Result<String, Box<dyn Error>> {
    let raw = config
        .get_string("paths.db_path")
        .map_err(|e| format!("Missing paths.db_path in config: {}", e))?;
    Ok(shellexpand::tilde(&raw).into_owned())
}

/// Number of heights behind the tip an undo record must stay available for.
/// Below `current_height - reorg_window + 1`, undo records may be pruned.
pub fn get_reorg_window(config: &Config) -> u32 {
    config.get_int("indexing.reorg_window").unwrap_or(1000) as u32
}

/// Directory the dMint Contracts Manager persists `contracts.json` /
/// `contracts_extended.json` into.
pub fn get_dmint_data_dir(config: &Config) -> String {
    config
        .get_string("dmint.data_dir")
        .unwrap_or_else(|_| "./data".to_string())
}

/// Parse the configured WAVE genesis ref ("`<txid_hex>_<vout>`") into a [`Ref`].
///
/// A missing or malformed value is a configuration error per the error
/// handling design: the caller logs it at startup and the WAVE index
/// degrades to a no-op for inbound processing while remaining queryable.
pub fn get_wave_genesis_ref(config: &Config) -> Result<Ref, String> {
    let raw = config
        .get_string("wave.genesis_ref")
        .map_err(|e| format!("missing wave.genesis_ref: {}", e))?;
    Ref::parse(&raw).map_err(|e| format!("invalid wave.genesis_ref {:?}: {}", raw, e))
}

/// Rate-limiter knobs, all optional with the reference implementation's
/// defaults.
pub struct RateLimitConfig {
    pub max_subs_per_client: u32,
    pub sub_rate_per_sec: f64,
    pub sub_burst: f64,
    pub violation_threshold: u32,
    pub block_duration_secs: u64,
    pub request_window_secs: u64,
    pub max_requests_per_window: u32,
    pub cost_hard_limit: f64,
}

impl RateLimitConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_subs_per_client: config
                .get_int("rate_limit.max_subs_per_client")
                .unwrap_or(10_000) as u32,
            sub_rate_per_sec: config
                .get_float("rate_limit.sub_rate_per_sec")
                .unwrap_or(100.0),
            sub_burst: config.get_float("rate_limit.sub_burst").unwrap_or(500.0),
            violation_threshold: config
                .get_int("rate_limit.violation_threshold")
                .unwrap_or(10) as u32,
            block_duration_secs: config
                .get_int("rate_limit.block_duration_secs")
                .unwrap_or(60) as u64,
            request_window_secs: config
                .get_int("rate_limit.request_window_secs")
                .unwrap_or(60) as u64,
            max_requests_per_window: config
                .get_int("rate_limit.max_requests_per_window")
                .unwrap_or(1000) as u32,
            cost_hard_limit: config
                .get_float("rate_limit.cost_hard_limit")
                .unwrap_or(10_000.0),
        }
    }
}
