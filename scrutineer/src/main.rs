use std::path::Path;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

mod browser;
mod challenge;
mod config;
mod error;
mod extraction;
mod fetch;
mod recognition;
mod stats;

use crate::browser::{BrowserSession, ChromiumSessionFactory, SessionFactory};
use crate::challenge::ChallengeSolver;
use crate::config::{Config, LoggingConfig, StorageConfig, load_config};
use crate::error::{ConfigError, PipelineResult, format_error_chain_ref};
use crate::extraction::{
    ExtractionPool, ExtractionSettings, PdfiumRasterizer, document_queue, scan_downloads,
};
use crate::fetch::{FetchCoordinator, FetchSettings, GatedFetcher, discover_links};
use crate::recognition::TesseractRecognizer;
use crate::stats::PipelineStats;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;
    init_logging(&config.logging)?;

    info!(
        mode = ?config.pipeline.mode,
        "Starting scrutineer v{}",
        env!("CARGO_PKG_VERSION")
    );

    if let Err(e) = run(config).await {
        error!(error = %format_error_chain_ref(&e), "Run aborted");
        return Err(e.into());
    }
    Ok(())
}

async fn run(config: Config) -> PipelineResult<()> {
    prepare_directories(&config.storage)?;

    let recognizer = Arc::new(TesseractRecognizer::new(
        config.recognition.tesseract_cmd.clone(),
        config.recognition.tessdata_prefix.clone(),
    ));
    let version = recognizer.check_available()?;
    info!(version = %version, "Recognition engine available");

    let stats = Arc::new(PipelineStats::new());
    let mode = config.pipeline.mode;

    // Extraction workers start first so fetched documents are picked up as
    // soon as they land
    let mut startup_scan = None;
    let pool = if mode.extracts() {
        let rasterizer = Arc::new(PdfiumRasterizer);
        rasterizer.check_available()?;

        let (queue, receiver) = document_queue(config.extraction.queue_capacity);
        let settings = Arc::new(ExtractionSettings::from_config(&config));
        let pool = ExtractionPool::start(
            config.extraction.workers,
            settings,
            recognizer.clone(),
            rasterizer,
            stats.clone(),
            queue,
            receiver,
        );

        let existing = scan_downloads(
            &config.storage.downloads_dir,
            &config.fetch.payload_extension,
        )?;
        info!(documents = existing.len(), "Found previously downloaded documents");
        let queue = pool.queue().clone();
        startup_scan = Some(tokio::spawn(async move {
            for document in existing {
                queue.enqueue(document).await;
            }
        }));

        Some(pool)
    } else {
        None
    };

    if mode.fetches() {
        let factory = ChromiumSessionFactory::new(
            config.browser.clone(),
            &config.storage.downloads_dir,
        );

        let mut session = factory.open().await?;
        let links = discover_links(
            &mut session,
            &config.portal.listing_pages,
            &config.portal.base_url,
            &config.portal.link_suffix,
            config.portal.listing_settle(),
        )
        .await;
        if let Err(e) = session.close().await {
            warn!(error = %format_error_chain_ref(&e), "Failed to close discovery session");
        }
        info!(links = links.len(), "Link discovery complete");

        let solver = Arc::new(ChallengeSolver::new(
            recognizer.clone(),
            config.challenge.min_answer_len,
            config.challenge.language.clone(),
        ));
        let fetcher = Arc::new(GatedFetcher::new(
            solver,
            config.fetch.retry_policy(),
            FetchSettings::from_config(&config),
            pool.as_ref().map(|p| p.queue().clone()),
            stats.clone(),
        ));
        let coordinator = FetchCoordinator::new(
            factory,
            fetcher,
            config.fetch.max_parallel_fetches,
            config.storage.failure_report.clone(),
        );
        let report = coordinator.run(links).await?;
        for outcome in &report.outcomes {
            debug!(
                link = %outcome.link,
                success = outcome.success,
                attempts = outcome.attempts,
                "Fetch outcome"
            );
        }
    }

    if let Some(scan) = startup_scan
        && let Err(e) = scan.await
    {
        error!(error = %e, "Startup scan task failed");
    }
    if let Some(pool) = pool {
        pool.shutdown().await;
    }

    let summary = stats.summary();
    summary.log();
    summary.write_json(&config.storage.summary_file)?;
    info!(path = %config.storage.summary_file.display(), "Summary written");

    Ok(())
}

/// Create every working directory and confirm it accepts new files
fn prepare_directories(storage: &StorageConfig) -> Result<(), ConfigError> {
    let report_dirs = [&storage.failure_report, &storage.summary_file]
        .into_iter()
        .filter_map(|file| file.parent())
        .filter(|dir| !dir.as_os_str().is_empty());

    let dirs = [
        storage.downloads_dir.as_path(),
        storage.page_images_dir.as_path(),
        storage.challenges_dir.as_path(),
        storage.results_dir.as_path(),
    ]
    .into_iter()
    .chain(report_dirs);

    for dir in dirs {
        ensure_writable(dir)?;
    }
    Ok(())
}

fn ensure_writable(dir: &Path) -> Result<(), ConfigError> {
    let unwritable = |source| ConfigError::UnwritableDirectory {
        path: dir.to_path_buf(),
        source,
    };
    std::fs::create_dir_all(dir).map_err(unwritable)?;
    tempfile::tempfile_in(dir).map_err(unwritable)?;
    Ok(())
}

fn init_logging(config: &LoggingConfig) -> std::io::Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let format = fmt::format()
        .with_target(true)
        .with_thread_ids(true)
        .compact();

    // Use RUST_LOG if set, otherwise default to info level for our crate
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("scrutineer=info"));

    let file_layer = match &config.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_target(true)
                    .with_writer(Arc::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(fmt::layer().event_format(format))
        .with(file_layer)
        .with(filter)
        .init();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prepare_directories_creates_missing() {
        let dir = tempfile::tempdir().unwrap();
        let storage = StorageConfig {
            downloads_dir: dir.path().join("downloads"),
            page_images_dir: dir.path().join("pdf_images"),
            challenges_dir: dir.path().join("captchas"),
            results_dir: dir.path().join("search_results"),
            failure_report: dir.path().join("reports/failed_urls.txt"),
            summary_file: dir.path().join("summary.json"),
        };

        prepare_directories(&storage).unwrap();

        for name in ["downloads", "pdf_images", "captchas", "search_results", "reports"] {
            assert!(dir.path().join(name).is_dir(), "{} missing", name);
        }
    }

    #[test]
    fn test_file_in_place_of_directory_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("downloads");
        std::fs::write(&blocker, b"").unwrap();

        let err = ensure_writable(&blocker).unwrap_err();
        assert!(matches!(err, ConfigError::UnwritableDirectory { .. }));
    }
}
