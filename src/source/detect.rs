//! Template auto-detection from sampled lines
//!
//! Scoring is a heuristic and sits behind `TemplateScorer` so it can be
//! swapped. The default scorer checks how many of a template's field keys
//! appear in each sampled line.

use super::LineSource;
use crate::error::Result;
use crate::template::Template;
use serde::Serialize;
use std::collections::HashSet;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Scores how well sampled lines fit a template (0.0 - 1.0)
pub trait TemplateScorer: Send + Sync {
    fn score(&self, template: &Template, samples: &[String]) -> f32;

    fn name(&self) -> &str;
}

/// Average, over sample lines, of the fraction of the template's field keys
/// present in the line
#[derive(Debug, Clone, Copy, Default)]
pub struct FieldContainmentScorer;

impl TemplateScorer for FieldContainmentScorer {
    fn score(&self, template: &Template, samples: &[String]) -> f32 {
        let expected = template.field_sources();
        if expected.is_empty() {
            return 0.0;
        }

        let sep = template.parsing.key_value_separator.as_str();
        let lines: Vec<&String> = samples.iter().filter(|l| !l.trim().is_empty()).collect();
        if lines.is_empty() || template.parsing.delimiter.is_empty() || sep.is_empty() {
            return 0.0;
        }

        let total: f32 = lines
            .iter()
            .map(|line| {
                let keys: HashSet<&str> = line
                    .split(template.parsing.delimiter.as_str())
                    .filter_map(|token| token.split_once(sep))
                    .map(|(key, _)| key.trim())
                    .collect();
                let found = expected.iter().filter(|source| keys.contains(*source)).count();
                found as f32 / expected.len() as f32
            })
            .sum();

        total / lines.len() as f32
    }

    fn name(&self) -> &str {
        "field-containment"
    }
}

/// A template's detection score
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionScore {
    pub template: String,
    pub score: f32,
}

/// Score every template against the samples, best first (name order on ties)
pub fn rank_templates(
    samples: &[String],
    templates: &[Template],
    scorer: &dyn TemplateScorer,
) -> Vec<DetectionScore> {
    let mut sorted: Vec<&Template> = templates.iter().collect();
    sorted.sort_by(|a, b| a.name.cmp(&b.name));

    let mut scores: Vec<DetectionScore> = sorted
        .into_iter()
        .map(|t| DetectionScore {
            template: t.name.clone(),
            score: scorer.score(t, samples),
        })
        .collect();
    // stable sort keeps name order among equal scores
    scores.sort_by(|a, b| b.score.total_cmp(&a.score));
    scores
}

/// Pick the best template scoring at least `min_score`
pub fn detect_template<'a>(
    samples: &[String],
    templates: &'a [Template],
    scorer: &dyn TemplateScorer,
    min_score: f32,
) -> Option<&'a Template> {
    let best = rank_templates(samples, templates, scorer).into_iter().next()?;
    debug!(scorer = scorer.name(), template = %best.template, score = best.score, "Best detection score");
    if best.score > 0.0 && best.score >= min_score {
        templates.iter().find(|t| t.name == best.template)
    } else {
        None
    }
}

/// Read up to `max_lines` lines from a source, giving up after `timeout`
pub async fn sample_lines(
    source: &mut dyn LineSource,
    max_lines: usize,
    timeout: Duration,
) -> Result<Vec<String>> {
    let deadline = Instant::now() + timeout;
    let mut samples = Vec::new();

    while samples.len() < max_lines && Instant::now() < deadline && !source.is_closed() {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match tokio::time::timeout(remaining, source.next_line()).await {
            Ok(Ok(Some(line))) => samples.push(line),
            Ok(Ok(None)) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => break,
        }
    }

    if samples.is_empty() {
        warn!(source = %source.name(), "No lines received while sampling");
    }
    Ok(samples)
}

/// Sample a source and pick a template for it
pub async fn detect_source_template<'a>(
    source: &mut dyn LineSource,
    templates: &'a [Template],
    scorer: &dyn TemplateScorer,
    max_lines: usize,
    timeout: Duration,
    min_score: f32,
) -> Result<Option<&'a Template>> {
    let samples = sample_lines(source, max_lines, timeout).await?;
    let detected = detect_template(&samples, templates, scorer, min_score);
    match detected {
        Some(template) => info!(source = %source.name(), template = %template.name, "Detected template"),
        None => warn!(source = %source.name(), "No template matched sampled lines"),
    }
    Ok(detected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IngestConfig;
    use crate::source::ReaderLineSource;
    use crate::template::tests::weather_template;
    use crate::template::{FieldSpec, SensorSpec};

    fn garden_template() -> Template {
        let mut template = Template::new("garden");
        template.sensors = vec![SensorSpec::new(
            "soil_01",
            "soil",
            vec![
                FieldSpec::new("moisture", "M", "REAL"),
                FieldSpec::new("light", "L", "INTEGER"),
            ],
        )];
        template
    }

    fn samples(lines: &[&str]) -> Vec<String> {
        lines.iter().map(|l| l.to_string()).collect()
    }

    #[test]
    fn test_containment_score() {
        let scorer = FieldContainmentScorer;
        let template = weather_template();

        let full = samples(&["Sensor:outdoor_01;T:1;P:2;Sensor:indoor_01;H:3;S:ok"]);
        assert_eq!(scorer.score(&template, &full), 1.0);

        let half = samples(&["Sensor:outdoor_01;T:1;P:2", "Sensor:x;Q:1"]);
        assert_eq!(scorer.score(&template, &half), 0.25);

        assert_eq!(scorer.score(&Template::new("empty"), &full), 0.0);
        assert_eq!(scorer.score(&template, &[]), 0.0);
    }

    #[test]
    fn test_detect_best_template() {
        let templates = vec![weather_template(), garden_template()];
        let scorer = FieldContainmentScorer;

        let soil = samples(&["Sensor:soil_01;M:0.4;L:800"]);
        let found = detect_template(&soil, &templates, &scorer, 0.3).unwrap();
        assert_eq!(found.name, "garden");

        let noise = samples(&["hello", "Sensor:x;Z:1"]);
        assert!(detect_template(&noise, &templates, &scorer, 0.3).is_none());
    }

    #[test]
    fn test_min_score_threshold() {
        let templates = vec![weather_template()];
        let scorer = FieldContainmentScorer;
        let weak = samples(&["Sensor:outdoor_01;T:1"]);

        assert!(detect_template(&weak, &templates, &scorer, 0.3).is_none());
        assert!(detect_template(&weak, &templates, &scorer, 0.25).is_some());
    }

    #[test]
    fn test_ties_keep_name_order() {
        let mut a = garden_template();
        a.name = "b_garden".to_string();
        let mut b = garden_template();
        b.name = "a_garden".to_string();
        let templates = vec![a, b];

        let ranked = rank_templates(&samples(&["M:1;L:2"]), &templates, &FieldContainmentScorer);
        assert_eq!(ranked[0].template, "a_garden");
        assert_eq!(ranked[0].score, ranked[1].score);
    }

    #[tokio::test]
    async fn test_detect_from_source() {
        let config = IngestConfig {
            read_timeout_ms: 20,
            ..IngestConfig::default()
        };
        let data: &[u8] = b"ARDUINO_READY\nSensor:soil_01;M:1;L:2\nSensor:soil_01;M:1\n";
        let mut source = ReaderLineSource::new("ttyACM0", data, &config);
        let templates = vec![weather_template(), garden_template()];

        let found = detect_source_template(
            &mut source,
            &templates,
            &FieldContainmentScorer,
            3,
            Duration::from_secs(1),
            0.3,
        )
        .await
        .unwrap();
        assert_eq!(found.map(|t| t.name.as_str()), Some("garden"));
    }
}
