pub mod catalog_core;
pub mod config;
pub mod source;
pub mod store;

use {
    catalog_core::{
        merge::MergeEngine,
        normalizer,
        reconciler::Reconciler,
        snapshot::{snapshot_due, SnapshotWriter},
    },
    chrono::Utc,
    config::{Config, ExportMode},
    source::search::SearchClient,
    std::error::Error,
    store::{CatalogStore, KvCatalogStore, RelationalCatalogStore},
};

#[tokio::main]
pub async fn main() {
    dotenv::dotenv().ok();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let config = Config::from_env();

    log::info!("🚀 Starting iocflow export");
    log::info!("📊 Configuration:");
    log::info!("   Mode: {}", config.mode.as_str());
    log::info!("   Lookback: {} days", config.lookback_days);
    log::info!("   Catalog DB: {}", config.catalog_db_path);
    log::info!(
        "   Relational DB: {}",
        config.relational_db_path.as_deref().unwrap_or("(not configured)")
    );
    log::info!("   Export dir: {}", config.export_dir);

    if let Err(e) = run_export(&config).await {
        log::error!("❌ Export failed: {}", e);
        std::process::exit(1);
    }

    log::info!("✅ Export completed successfully");
}

/// One export run: fetch → normalize → reconcile → throttled snapshot.
pub async fn run_export(config: &Config) -> Result<(), Box<dyn Error>> {
    let client = SearchClient::new(config)?;
    let rows = client.fetch_observations(config.lookback_days).await?;
    let observations = normalizer::normalize_batch(&rows);

    if observations.is_empty() {
        log::warn!("⚠️  No observables to export");
        return Ok(());
    }

    let writer = SnapshotWriter::new(&config.export_dir)?;

    // Files mode only writes the dated batch export; no store is touched.
    if config.mode == ExportMode::Files {
        let (csv_path, json_path) = writer.write_dated(&observations, Utc::now())?;
        log::info!("✅ Dated export: {} / {}", csv_path.display(), json_path.display());
        return Ok(());
    }

    let engine = MergeEngine::new();

    let catalog = if config.mode != ExportMode::Relational {
        Some(KvCatalogStore::open(&config.catalog_db_path, config.catalog_ttl_days)?)
    } else {
        None
    };

    let relational = match (&config.relational_db_path, config.mode) {
        (Some(path), ExportMode::All) | (Some(path), ExportMode::Relational) => {
            Some(RelationalCatalogStore::open(path)?)
        }
        (None, ExportMode::Relational) => {
            return Err("RELATIONAL_DB_PATH must be set for relational mode".into());
        }
        (None, ExportMode::All) => {
            log::warn!("⚠️  RELATIONAL_DB_PATH not set, skipping relational export");
            None
        }
        _ => None,
    };

    let report = match config.mode {
        ExportMode::Relational => {
            let store = relational.as_ref().ok_or("relational store unavailable")?;
            Reconciler::new(&engine, store).reconcile(&observations).await
        }
        _ => {
            let store = catalog.as_ref().ok_or("catalog store unavailable")?;
            let mut reconciler = Reconciler::new(&engine, store);
            if let (ExportMode::All, Some(mirror)) = (config.mode, &relational) {
                reconciler = reconciler.with_mirror(mirror);
            }
            reconciler.reconcile(&observations).await
        }
    };

    if report.has_errors() {
        log::warn!("⚠️  {} identities failed to update this run", report.errors.len());
    }

    if config.mode == ExportMode::All {
        let store = catalog.as_ref().ok_or("catalog store unavailable")?;
        if snapshot_due(writer.master_marker(), Utc::now()) {
            let count = writer
                .write_master(store as &dyn CatalogStore, config.scan_page_size)
                .await?;
            log::info!("✅ Master snapshot refreshed ({} aggregates)", count);
        } else {
            log::info!("Master snapshot already updated today, skipping");
        }
    }

    Ok(())
}
