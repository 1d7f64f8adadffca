use anyhow::{Context, Result, anyhow};
use image::RgbImage;
use serde::Deserialize;
use std::process::Command;

use crate::ocr::{Direction, TextFragment};

use super::{Analyzer, write_temp_png};

const IMAGE_PLACEHOLDER: &str = "{image}";

/// Runs an external analyzer that prints `{"words": [...]}` JSON on stdout.
///
/// `{image}` in the argv is replaced with the path of a temporary PNG. When
/// no argument carries the placeholder the path is appended.
pub struct CommandAnalyzer {
    argv: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct AnalyzerOutput {
    #[serde(default)]
    words: Vec<WordRecord>,
}

#[derive(Debug, Deserialize)]
struct WordRecord {
    points: Vec<[f32; 2]>,
    #[serde(alias = "text")]
    content: String,
    #[serde(default)]
    direction: Direction,
}

impl CommandAnalyzer {
    pub fn new(argv: Vec<String>) -> Self {
        Self { argv }
    }

    fn command_line(&self, image_path: &str) -> Result<(String, Vec<String>)> {
        let (program, rest) = self
            .argv
            .split_first()
            .ok_or_else(|| anyhow!("analyzer command is empty"))?;
        let mut args: Vec<String> = rest
            .iter()
            .map(|arg| arg.replace(IMAGE_PLACEHOLDER, image_path))
            .collect();
        if !rest.iter().any(|arg| arg.contains(IMAGE_PLACEHOLDER)) {
            args.push(image_path.to_string());
        }
        Ok((program.clone(), args))
    }
}

impl Analyzer for CommandAnalyzer {
    fn analyze(&self, image: &RgbImage) -> Result<Vec<TextFragment>> {
        let tmp = write_temp_png(image)?;
        let image_path = tmp.path().to_string_lossy().to_string();
        let (program, args) = self.command_line(&image_path)?;
        let output = Command::new(&program)
            .args(&args)
            .output()
            .with_context(|| format!("failed to run analyzer command: {}", program))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("analyzer command failed: {}", stderr.trim()));
        }
        parse_analyzer_output(&output.stdout)
    }
}

fn parse_analyzer_output(stdout: &[u8]) -> Result<Vec<TextFragment>> {
    let parsed: AnalyzerOutput =
        serde_json::from_slice(stdout).with_context(|| "failed to parse analyzer output JSON")?;
    Ok(parsed
        .words
        .into_iter()
        .map(|word| TextFragment::new(word.points, word.content, word.direction))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_word_records() {
        let json = r#"{"words": [
            {"points": [[100, 80], [180, 80], [180, 95], [100, 95]], "content": "かんぺき", "direction": "horizontal", "det_score": 0.99},
            {"points": [[600, 20], [640, 20], [640, 380], [600, 380]], "text": "縦書き", "direction": "vertical"},
            {"points": [[1, 2], [3, 4]], "content": "x"}
        ]}"#;
        let fragments = parse_analyzer_output(json.as_bytes()).expect("parse");
        assert_eq!(fragments.len(), 3);
        assert_eq!(fragments[0].text, "かんぺき");
        assert_eq!(fragments[0].points[2], [180.0, 95.0]);
        assert_eq!(fragments[1].direction, Direction::Vertical);
        assert_eq!(fragments[2].direction, Direction::Horizontal);
    }

    #[test]
    fn placeholder_is_substituted() {
        let analyzer = CommandAnalyzer::new(vec![
            "yomitoku-json".to_string(),
            "--input={image}".to_string(),
        ]);
        let (program, args) = analyzer.command_line("/tmp/a.png").expect("argv");
        assert_eq!(program, "yomitoku-json");
        assert_eq!(args, vec!["--input=/tmp/a.png".to_string()]);
    }

    #[test]
    fn path_is_appended_without_placeholder() {
        let analyzer = CommandAnalyzer::new(vec!["ocr".to_string(), "--json".to_string()]);
        let (_, args) = analyzer.command_line("/tmp/a.png").expect("argv");
        assert_eq!(args, vec!["--json".to_string(), "/tmp/a.png".to_string()]);
    }

    #[test]
    fn invalid_json_is_an_error() {
        assert!(parse_analyzer_output(b"not json").is_err());
    }
}
