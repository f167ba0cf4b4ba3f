pub mod atomic_writer;
pub mod batch_writer;
pub mod cache;
pub mod config;
pub mod dmint;
pub mod envelope;
pub mod error;
pub mod glyph_index;
pub mod mempool_shadow;
pub mod metrics;
pub mod rate_limiter;
pub mod ref_id;
pub mod script;
pub mod subscriptions;
pub mod swap_index;
pub mod undo;
pub mod wave_index;
