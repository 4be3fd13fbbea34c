use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use slotwise::config::Config;
use slotwise::store::RowStore;

/// Maintenance entry point: replay the journal, report what it holds and
/// compact it once it has grown past the threshold.
fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;
    slotwise::observability::init(config.metrics_port)?;

    // Ensure data directory exists
    std::fs::create_dir_all(&config.data_dir)?;
    let journal = config.journal_path();
    let store = RowStore::open(&journal)?;

    info!("slotwise store ready");
    info!("  journal: {}", journal.display());
    info!("  segment: {} min", config.segment.minutes());
    info!("  rows: {}", store.row_count());
    info!("  resources: {}", store.resource_count());
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    let pending = store.appends_since_compact();
    if pending >= config.compact_threshold {
        info!(pending, threshold = config.compact_threshold, "compacting journal");
        if let Err(e) = store.compact() {
            warn!("compaction failed, journal left as is: {e}");
            return Err(e.into());
        }
    }

    info!("slotwise stopped");
    Ok(())
}
