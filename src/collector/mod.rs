//! Poll loop over configured line sources
//!
//! Each live source gets its own future: read a line, ingest it, repeat.
//! Lines from one source are ingested strictly in the order they were read.
//! Shutdown is observed between lines, so a started ingest always finishes.

use crate::config::{Config, SourceConfig};
use crate::ingest::{ingest, LineStats};
use crate::schema::StoreRegistry;
use crate::source::{detect_template, sample_lines, LineSource, ReaderLineSource, TemplateScorer};
use crate::template::Template;
use futures::future::join_all;
use serde::Serialize;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// A source bound to the template its lines are parsed with
pub struct BoundSource {
    pub source: Box<dyn LineSource>,
    pub template: Template,
    /// Lines already read (e.g. while detecting) that still need ingesting
    pub backlog: Vec<String>,
}

/// Counters for one source over a collector run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SourceStats {
    pub source: String,
    pub template: String,
    #[serde(flatten)]
    pub lines: LineStats,
    pub read_errors: usize,
}

/// Open every configured source and resolve its template.
///
/// Sources that cannot be opened, name an unknown template, or match no
/// template are logged and left out.
pub async fn prepare_sources(
    config: &Config,
    templates: &[Template],
    scorer: &dyn TemplateScorer,
) -> Vec<BoundSource> {
    let mut bound = Vec::new();
    for source_config in &config.sources {
        match prepare_source(config, source_config, templates, scorer).await {
            Some(source) => bound.push(source),
            None => warn!(source = %source_config.name, "Source not started"),
        }
    }
    bound
}

async fn prepare_source(
    config: &Config,
    source_config: &SourceConfig,
    templates: &[Template],
    scorer: &dyn TemplateScorer,
) -> Option<BoundSource> {
    let mut source =
        match ReaderLineSource::open(&source_config.name, &source_config.path, &config.ingest).await {
            Ok(source) => source,
            Err(e) => {
                error!(source = %source_config.name, "Cannot open {:?}: {}", source_config.path, e);
                return None;
            }
        };

    if let Some(name) = &source_config.template {
        let Some(template) = templates.iter().find(|t| &t.name == name) else {
            error!(source = %source_config.name, template = %name, "Template not available");
            return None;
        };
        return Some(BoundSource {
            source: Box::new(source),
            template: template.clone(),
            backlog: Vec::new(),
        });
    }

    let samples = match sample_lines(
        &mut source,
        config.detect.sample_lines,
        Duration::from_secs(config.detect.timeout_secs),
    )
    .await
    {
        Ok(samples) => samples,
        Err(e) => {
            error!(source = %source_config.name, "Sampling failed: {}", e);
            return None;
        }
    };

    let Some(template) = detect_template(&samples, templates, scorer, config.detect.min_score) else {
        warn!(source = %source_config.name, samples = samples.len(), "No template matched sampled lines");
        return None;
    };
    info!(source = %source_config.name, template = %template.name, "Detected template");
    Some(BoundSource {
        source: Box::new(source),
        template: template.clone(),
        backlog: samples,
    })
}

/// Drive one source until it closes or shutdown is signalled
pub async fn run_source(
    bound: BoundSource,
    registry: &StoreRegistry,
    poll_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> SourceStats {
    let BoundSource {
        mut source,
        template,
        backlog,
    } = bound;

    let mut stats = SourceStats {
        source: source.name().to_string(),
        template: template.name.clone(),
        ..SourceStats::default()
    };

    for line in backlog {
        let report = ingest(registry, &template, &stats.source, &line).await;
        stats.lines.add(&report);
    }

    loop {
        if *shutdown.borrow() {
            break;
        }

        // reads are cancel-safe: a partial line stays buffered in the source
        let next = tokio::select! {
            _ = shutdown.changed() => break,
            next = source.next_line() => next,
        };

        match next {
            Ok(Some(line)) => {
                let report = ingest(registry, &template, &stats.source, &line).await;
                stats.lines.add(&report);
            }
            Ok(None) if source.is_closed() => {
                info!(source = %stats.source, "Source closed");
                break;
            }
            Ok(None) => {
                debug!(source = %stats.source, "No data this interval");
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = tokio::time::sleep(poll_interval) => {}
                }
            }
            Err(e) => {
                warn!(source = %stats.source, "Read error: {}", e);
                stats.read_errors += 1;
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = tokio::time::sleep(poll_interval) => {}
                }
            }
        }
    }

    info!(
        source = %stats.source,
        template = %stats.template,
        lines = stats.lines.lines,
        stored = stats.lines.stored_lines,
        failed = stats.lines.failed_lines,
        "Source stopped"
    );
    stats
}

/// Run all bound sources concurrently until each stops
pub async fn run_collector(
    sources: Vec<BoundSource>,
    registry: &StoreRegistry,
    poll_interval: Duration,
    shutdown: watch::Receiver<bool>,
) -> Vec<SourceStats> {
    let tasks = sources
        .into_iter()
        .map(|bound| run_source(bound, registry, poll_interval, shutdown.clone()));
    join_all(tasks).await
}
