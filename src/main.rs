use glyphdex::config::{get_global_config, get_dmint_data_dir, get_reorg_window, init_global_config, RateLimitConfig};
use glyphdex::dmint::DmintContractsManager;
use glyphdex::glyph_index::GlyphIndex;
use glyphdex::mempool_shadow::MempoolShadow;
use glyphdex::metrics;
use glyphdex::rate_limiter::{RequestRateLimiter, SubscriptionRateLimiter};
use glyphdex::subscriptions::SubscriptionManager;
use glyphdex::swap_index::SwapIndex;
use glyphdex::wave_index::WaveIndex;

use axum::extract::Extension;
use axum::{routing::get, Router};
use rocksdb::{ColumnFamilyDescriptor, Options, DB};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::{fmt, EnvFilter};

const COLUMN_FAMILIES: [&str; 3] = ["glyph", "swap", "wave"];

struct AppState {
    db: Arc<DB>,
    glyph_index: Mutex<GlyphIndex>,
    swap_index: Mutex<SwapIndex>,
    wave_index: Mutex<WaveIndex>,
    mempool: Mutex<MempoolShadow>,
    dmint: Mutex<DmintContractsManager>,
    subscriptions: Arc<SubscriptionManager>,
    subscription_limiter: Mutex<SubscriptionRateLimiter>,
    request_limiter: Mutex<RequestRateLimiter>,
}

async fn metrics_handler() -> Vec<u8> {
    metrics::gather_metrics()
}

async fn start_web_server(state: Arc<AppState>, bind_addr: SocketAddr) {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .layer(cors)
        .layer(Extension(state));

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .expect("failed to bind metrics server");
    tracing::info!(%bind_addr, "metrics server listening");
    axum::serve(listener, app).await.expect("metrics server failed");
}

/// Periodically prunes undo records older than the reorg window from all
/// three indexes, one atomic batch per pass.
async fn run_pruning_task(state: Arc<AppState>, current_height: Arc<std::sync::atomic::AtomicU32>) {
    use glyphdex::atomic_writer::AtomicBatchWriter;
    let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
    loop {
        interval.tick().await;
        let height = current_height.load(std::sync::atomic::Ordering::Relaxed);
        let reorg_window = get_reorg_window(get_global_config());
        let mut batch = AtomicBatchWriter::new(state.db.clone(), 10_000);

        let glyph_index = state.glyph_index.lock().unwrap();
        if let Err(e) = glyph_index.prune(&state.db, &mut batch, height, reorg_window) {
            tracing::warn!(error = %e, "glyph index prune failed");
        }
        drop(glyph_index);

        let swap_index = state.swap_index.lock().unwrap();
        if let Err(e) = swap_index.prune(&state.db, &mut batch, height, reorg_window) {
            tracing::warn!(error = %e, "swap index prune failed");
        }
        drop(swap_index);

        let wave_index = state.wave_index.lock().unwrap();
        if let Err(e) = wave_index.prune(&state.db, &mut batch, height, reorg_window) {
            tracing::warn!(error = %e, "wave index prune failed");
        }
        drop(wave_index);

        if let Err(e) = batch.flush().await {
            tracing::warn!(error = %e, "prune batch flush failed");
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    init_global_config()?;
    let config = get_global_config();

    let db_path = glyphdex::config::get_db_path(config)?;

    let mut cf_descriptors = vec![ColumnFamilyDescriptor::new("default", Options::default())];
    for cf in COLUMN_FAMILIES.iter() {
        cf_descriptors.push(ColumnFamilyDescriptor::new(cf.to_string(), Options::default()));
    }

    let mut db_options = Options::default();
    db_options.create_if_missing(true);
    db_options.create_missing_column_families(true);
    db_options.set_write_buffer_size(256 * 1024 * 1024);
    db_options.set_max_write_buffer_number(4);
    db_options.set_min_write_buffer_number_to_merge(2);
    db_options.set_target_file_size_base(256 * 1024 * 1024);
    db_options.set_level_zero_file_num_compaction_trigger(8);
    db_options.set_max_background_jobs(8);
    db_options.set_compression_type(rocksdb::DBCompressionType::Lz4);
    db_options.increase_parallelism(8);

    let db = DB::open_cf_descriptors(&db_options, &db_path, cf_descriptors)?;
    let db_arc = Arc::new(db);

    let rate_limit_config = RateLimitConfig::from_config(config);
    let mut dmint = DmintContractsManager::new(get_dmint_data_dir(config));
    dmint.load()?;

    let state = Arc::new(AppState {
        db: db_arc.clone(),
        glyph_index: Mutex::new(GlyphIndex::new()),
        swap_index: Mutex::new(SwapIndex::new()),
        wave_index: Mutex::new(WaveIndex::new()),
        mempool: Mutex::new(MempoolShadow::new()),
        dmint: Mutex::new(dmint),
        subscriptions: Arc::new(SubscriptionManager::new(4096)),
        subscription_limiter: Mutex::new(SubscriptionRateLimiter::new(&rate_limit_config)),
        request_limiter: Mutex::new(RequestRateLimiter::new(&rate_limit_config)),
    });

    let start_ts = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs() as i64;
    metrics::init_metrics(start_ts)?;

    let metrics_bind: SocketAddr = config
        .get_string("server.metrics_bind")
        .unwrap_or_else(|_| "0.0.0.0:9300".to_string())
        .parse()
        .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], 9300)));

    let web_state = state.clone();
    tokio::spawn(async move {
        start_web_server(web_state, metrics_bind).await;
    });

    let current_height = Arc::new(std::sync::atomic::AtomicU32::new(0));
    let prune_state = state.clone();
    let prune_height = current_height.clone();
    tokio::spawn(async move {
        run_pruning_task(prune_state, prune_height).await;
    });

    // The block feed this binary indexes against (full node RPC, P2P relay,
    // or a replay of archived blocks) is an external integration point and
    // is wired up by deployment-specific configuration rather than here.
    tracing::info!("glyphdex indexer started, db_path={}", db_path);
    std::future::pending::<()>().await;
    Ok(())
}
