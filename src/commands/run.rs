//! Run command: sync templates and collect from configured sources

use crate::changes::ChangeTracker;
use crate::collector::{prepare_sources, run_collector, SourceStats};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::schema::StoreRegistry;
use crate::source::FieldContainmentScorer;
use crate::template::{Template, TemplateStore};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

/// Collect until every source closes or Ctrl-C is pressed
pub async fn cmd_run(
    config: &Config,
    templates: &TemplateStore,
    tracker: &ChangeTracker,
    registry: &StoreRegistry,
) -> Result<Vec<SourceStats>> {
    if config.sources.is_empty() {
        return Err(Error::Config(format!(
            "no [[sources]] configured in {}",
            config.paths.config_file.display()
        )));
    }

    let loaded = templates.load_all()?;
    let sync = tracker.sync_all(registry, &loaded).await;
    let usable: Vec<Template> = loaded
        .into_iter()
        .filter(|t| sync.is_synced(&t.name))
        .collect();
    for failure in &sync.failed {
        warn!(template = %failure.template, "Template excluded from collection: {}", failure.error);
    }

    let sources = prepare_sources(config, &usable, &FieldContainmentScorer).await;
    if sources.is_empty() {
        return Err(Error::Other("no line source could be started".to_string()));
    }
    info!("Collecting from {} source(s); press Ctrl-C to stop", sources.len());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let signal_task = tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown requested, finishing current lines");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => warn!("Cannot listen for Ctrl-C: {}", e),
        }
        // a dropped sender would read as shutdown to every source
        shutdown_tx.closed().await;
    });

    let stats = run_collector(
        sources,
        registry,
        Duration::from_millis(config.ingest.poll_interval_ms),
        shutdown_rx,
    )
    .await;

    signal_task.abort();
    registry.close().await;
    Ok(stats)
}

pub fn print_source_stats(stats: &[SourceStats]) {
    println!("\n✓ Collection stopped");
    for source in stats {
        println!("• {} [{}]", source.source, source.template);
        println!(
            "  Lines: {}, Stored: {}, Rows: {}",
            source.lines.lines, source.lines.stored_lines, source.lines.rows_inserted
        );
        println!(
            "  Empty: {}, Unknown-only: {}, Failed: {}, Read errors: {}",
            source.lines.empty_lines,
            source.lines.unknown_only_lines,
            source.lines.failed_lines,
            source.read_errors
        );
    }
}
