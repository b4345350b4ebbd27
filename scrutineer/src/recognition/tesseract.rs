//! Recognition through the `tesseract` command line tool.
//!
//! Images are written to a temporary PNG and the engine prints its result
//! to stdout. Box output uses the `makebox` config: one glyph per line as
//! `token left bottom right top page`.

use std::path::{Path, PathBuf};
use std::process::Command;

use image::DynamicImage;
use tracing::debug;

use crate::error::{ConfigError, RecognitionError};

use super::{Recognizer, TokenBox};

#[derive(Debug, Clone)]
pub struct TesseractRecognizer {
    command: String,
    tessdata_prefix: Option<PathBuf>,
}

impl TesseractRecognizer {
    pub fn new(command: impl Into<String>, tessdata_prefix: Option<PathBuf>) -> Self {
        Self {
            command: command.into(),
            tessdata_prefix,
        }
    }

    /// Confirm the engine can be started. Run once at startup.
    pub fn check_available(&self) -> Result<String, ConfigError> {
        let output = Command::new(&self.command)
            .arg("--version")
            .output()
            .map_err(|e| ConfigError::MissingCollaborator {
                name: "tesseract",
                source: Box::new(e),
            })?;

        if !output.status.success() {
            return Err(ConfigError::MissingCollaborator {
                name: "tesseract",
                source: Box::new(std::io::Error::other(
                    String::from_utf8_lossy(&output.stderr).into_owned(),
                )),
            });
        }

        let version = String::from_utf8_lossy(&output.stdout)
            .lines()
            .next()
            .unwrap_or_default()
            .to_string();
        Ok(version)
    }

    fn run(
        &self,
        image: &DynamicImage,
        language: Option<&str>,
        extra_args: &[&str],
    ) -> Result<String, RecognitionError> {
        let input = tempfile::Builder::new()
            .prefix("scrutineer-ocr-")
            .suffix(".png")
            .tempfile()?;
        image
            .save_with_format(input.path(), image::ImageFormat::Png)
            .map_err(RecognitionError::Encode)?;

        let output = self
            .command_for(input.path(), language, extra_args)
            .output()
            .map_err(|e| RecognitionError::Spawn {
                command: self.command.clone(),
                source: e,
            })?;

        if !output.status.success() {
            return Err(RecognitionError::Engine {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let text = String::from_utf8_lossy(&output.stdout).into_owned();
        debug!(chars = text.chars().count(), ?language, "Recognition finished");
        Ok(text)
    }

    fn command_for(&self, input: &Path, language: Option<&str>, extra_args: &[&str]) -> Command {
        let mut command = Command::new(&self.command);
        command.arg(input).arg("stdout");
        if let Some(lang) = language {
            command.args(["-l", lang]);
        }
        command.args(extra_args);
        if let Some(prefix) = &self.tessdata_prefix {
            command.env("TESSDATA_PREFIX", prefix);
        }
        command
    }
}

impl Recognizer for TesseractRecognizer {
    fn recognize(
        &self,
        image: &DynamicImage,
        language: Option<&str>,
    ) -> Result<String, RecognitionError> {
        self.run(image, language, &[])
    }

    fn recognize_with_boxes(
        &self,
        image: &DynamicImage,
        language: Option<&str>,
    ) -> Result<Vec<TokenBox>, RecognitionError> {
        let output = self.run(image, language, &["makebox"])?;
        parse_box_output(&output)
    }
}

/// Parse `makebox` output into token boxes.
///
/// The token itself may be a multi-byte glyph cluster but never contains
/// spaces, so the last five fields are always the numbers.
pub(crate) fn parse_box_output(output: &str) -> Result<Vec<TokenBox>, RecognitionError> {
    let mut boxes = Vec::new();

    for line in output.lines().filter(|l| !l.trim().is_empty()) {
        let fields: Vec<&str> = line.split(' ').collect();
        if fields.len() < 6 {
            return Err(RecognitionError::MalformedBox {
                line: line.to_string(),
            });
        }

        let numbers = &fields[fields.len() - 5..];
        let parse = |s: &str| {
            s.parse::<u32>().map_err(|_| RecognitionError::MalformedBox {
                line: line.to_string(),
            })
        };

        boxes.push(TokenBox {
            token: fields[..fields.len() - 5].join(" "),
            left: parse(numbers[0])?,
            bottom: parse(numbers[1])?,
            right: parse(numbers[2])?,
            top: parse(numbers[3])?,
        });
    }

    Ok(boxes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_box_output() {
        let output = "அ 120 3050 160 3100 0\nன் 161 3048 190 3102 0\n\nX 5 6 7 8 0\n";
        let boxes = parse_box_output(output).unwrap();

        assert_eq!(boxes.len(), 3);
        assert_eq!(boxes[0].token, "அ");
        assert_eq!(
            (boxes[0].left, boxes[0].bottom, boxes[0].right, boxes[0].top),
            (120, 3050, 160, 3100)
        );
        assert_eq!(boxes[1].token, "ன்");
        assert_eq!(boxes[2].token, "X");
    }

    #[test]
    fn test_parse_box_output_rejects_short_lines() {
        let err = parse_box_output("A 1 2 3\n").unwrap_err();
        assert!(matches!(err, RecognitionError::MalformedBox { .. }));
    }

    #[test]
    fn test_parse_box_output_rejects_non_numeric() {
        assert!(parse_box_output("A 1 two 3 4 0\n").is_err());
    }

    #[test]
    fn test_missing_binary_is_a_config_error() {
        let recognizer = TesseractRecognizer::new("/nonexistent/tesseract-binary", None);
        let err = recognizer.check_available().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MissingCollaborator {
                name: "tesseract",
                ..
            }
        ));
    }
}
