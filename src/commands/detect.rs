//! Detect command: score stored templates against a capture or device

use crate::config::Config;
use crate::error::Result;
use crate::source::{
    rank_templates, sample_lines, DetectionScore, FieldContainmentScorer, ReaderLineSource,
    TemplateScorer,
};
use crate::template::TemplateStore;
use serde::Serialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize)]
pub struct DetectReport {
    pub source: String,
    pub samples: Vec<String>,
    pub scores: Vec<DetectionScore>,
    pub selected: Option<String>,
    pub min_score: f32,
}

pub async fn cmd_detect(config: &Config, templates: &TemplateStore, path: &Path) -> Result<DetectReport> {
    let source_name = path.display().to_string();
    let mut source = ReaderLineSource::open(source_name.clone(), path, &config.ingest).await?;
    let samples = sample_lines(
        &mut source,
        config.detect.sample_lines,
        Duration::from_secs(config.detect.timeout_secs),
    )
    .await?;

    let scorer = FieldContainmentScorer;
    let all = templates.load_all()?;
    let scores = rank_templates(&samples, &all, &scorer as &dyn TemplateScorer);
    let min_score = config.detect.min_score;
    let selected = scores
        .first()
        .filter(|best| best.score > 0.0 && best.score >= min_score)
        .map(|best| best.template.clone());

    Ok(DetectReport {
        source: source_name,
        samples,
        scores,
        selected,
        min_score,
    })
}

pub fn print_detect_report(report: &DetectReport) {
    println!("\n🔎 Template detection for {}\n", report.source);
    println!("Sampled lines: {}", report.samples.len());
    for line in &report.samples {
        println!("  {}", line);
    }

    println!("\nScores (minimum {:.2}):", report.min_score);
    if report.scores.is_empty() {
        println!("  No templates stored.");
    }
    for score in &report.scores {
        println!("  {:<24} {:.2}", score.template, score.score);
    }

    match &report.selected {
        Some(name) => println!("\n✓ Selected template: {}", name),
        None => println!("\n✗ No template matched"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::tests::weather_template;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_cmd_detect() {
        let tmp = TempDir::new().unwrap();
        let templates = TemplateStore::open(tmp.path().join("templates")).unwrap();
        templates.save(&weather_template()).unwrap();

        let capture = tmp.path().join("capture.log");
        std::fs::write(&capture, "HANDSHAKE\nSensor:outdoor_01;T:1;P:2;H:3;S:ok\n").unwrap();

        let mut config = Config::default();
        config.ingest.read_timeout_ms = 20;
        config.detect.timeout_secs = 1;

        let report = cmd_detect(&config, &templates, &capture).await.unwrap();
        assert_eq!(report.samples.len(), 1);
        assert_eq!(report.scores[0].score, 1.0);
        assert_eq!(report.selected.as_deref(), Some("weather"));
    }
}
