//! Visual challenge capture and solving.
//!
//! The solver walks a fixed ladder of preprocessing stages, each applied on
//! top of the previous stage's output, and stops at the first stage whose
//! recognized text has a plausible length.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::{DynamicImage, GrayImage, Luma};
use strum::{Display, EnumIter, IntoEnumIterator};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{FetchError, RecognitionError};
use crate::recognition::Recognizer;

/// Binarization cut-off: pixels above this become white
const THRESHOLD_LEVEL: u8 = 128;

/// Contrast factor applied by the enhancement stage
const CONTRAST_FACTOR: f32 = 2.0;

/// 3x3 sharpening kernel (normalized by its sum of 16)
const SHARPEN_KERNEL: [f32; 9] = [-2.0, -2.0, -2.0, -2.0, 32.0, -2.0, -2.0, -2.0, -2.0];

/// Preprocessing stages, in the order they are tried
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum LadderStage {
    /// The capture as-is
    Raw,
    /// Grayscale, median-filtered, contrast-enhanced
    Enhanced,
    /// Binarized
    Threshold,
    /// Sharpened
    Sharpened,
}

impl LadderStage {
    /// Produce this stage's image from the previous stage's image
    fn apply(self, previous: &DynamicImage) -> DynamicImage {
        match self {
            LadderStage::Raw => previous.clone(),
            LadderStage::Enhanced => {
                let gray = previous.to_luma8();
                let filtered = imageproc::filter::median_filter(&gray, 1, 1);
                DynamicImage::ImageLuma8(enhance_contrast(&filtered, CONTRAST_FACTOR))
            }
            LadderStage::Threshold => {
                DynamicImage::ImageLuma8(binarize(&previous.to_luma8(), THRESHOLD_LEVEL))
            }
            LadderStage::Sharpened => DynamicImage::ImageLuma8(image::imageops::filter3x3(
                &previous.to_luma8(),
                &SHARPEN_KERNEL,
            )),
        }
    }
}

/// The solver's best guess for one challenge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeAnswer {
    pub text: String,
    /// Ladder stage that produced the text
    pub stage: LadderStage,
}

impl ChallengeAnswer {
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

pub struct ChallengeSolver<R> {
    recognizer: Arc<R>,
    min_answer_len: usize,
    language: Option<String>,
}

impl<R: Recognizer> ChallengeSolver<R> {
    pub fn new(recognizer: Arc<R>, min_answer_len: usize, language: Option<String>) -> Self {
        Self {
            recognizer,
            min_answer_len,
            language,
        }
    }

    fn is_plausible(&self, text: &str) -> bool {
        text.chars().count() >= self.min_answer_len
    }

    /// Derive an answer for the challenge image.
    ///
    /// Returns the first plausible answer, or the last stage's answer when no
    /// stage produced one. An empty answer is a valid result; only engine
    /// failures are errors.
    pub fn solve(&self, image: &DynamicImage) -> Result<ChallengeAnswer, RecognitionError> {
        let mut current = image.clone();
        let mut answer = ChallengeAnswer {
            text: String::new(),
            stage: LadderStage::Raw,
        };

        for stage in LadderStage::iter() {
            current = stage.apply(&current);
            let text = self
                .recognizer
                .recognize(&current, self.language.as_deref())?
                .trim()
                .to_string();
            debug!(%stage, answer = %text, "Challenge recognition stage");

            answer = ChallengeAnswer { text, stage };
            if self.is_plausible(&answer.text) {
                return Ok(answer);
            }
        }

        Ok(answer)
    }
}

/// PIL-style contrast enhancement: interpolate each pixel away from the mean
fn enhance_contrast(gray: &GrayImage, factor: f32) -> GrayImage {
    let pixel_count = u64::from(gray.width()) * u64::from(gray.height());
    if pixel_count == 0 {
        return gray.clone();
    }
    let sum: u64 = gray.pixels().map(|p| u64::from(p[0])).sum();
    let mean = (sum as f32 / pixel_count as f32).round();

    let mut out = gray.clone();
    for pixel in out.pixels_mut() {
        let value = mean + (f32::from(pixel[0]) - mean) * factor;
        *pixel = Luma([value.round().clamp(0.0, 255.0) as u8]);
    }
    out
}

fn binarize(gray: &GrayImage, level: u8) -> GrayImage {
    let mut out = gray.clone();
    for pixel in out.pixels_mut() {
        pixel[0] = if pixel[0] > level { 255 } else { 0 };
    }
    out
}

/// A challenge capture stored in the challenge scratch area.
///
/// The file is removed when the value is dropped unless [`keep`](Self::keep)
/// was called.
pub struct ChallengeImage {
    path: PathBuf,
    image: DynamicImage,
    keep: bool,
}

impl ChallengeImage {
    /// Decode a screenshot and store it under a collision-free name
    pub fn store(dir: &Path, png_bytes: &[u8]) -> Result<Self, FetchError> {
        let image = image::load_from_memory(png_bytes).map_err(FetchError::ChallengeDecode)?;
        let path = dir.join(format!("captcha_{}.png", Uuid::new_v4().simple()));
        std::fs::write(&path, png_bytes)?;
        Ok(Self {
            path,
            image,
            keep: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn image(&self) -> &DynamicImage {
        &self.image
    }

    /// Leave the file on disk after drop
    pub fn keep(&mut self) {
        self.keep = true;
    }
}

impl Drop for ChallengeImage {
    fn drop(&mut self) {
        if self.keep {
            return;
        }
        if let Err(e) = std::fs::remove_file(&self.path)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            warn!(path = %self.path.display(), error = %e, "Failed to remove challenge image");
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::recognition::TokenBox;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Recognizer returning queued responses in order, then an empty string
    pub(crate) struct ScriptedRecognizer {
        responses: Mutex<VecDeque<String>>,
        pub(crate) calls: Mutex<Vec<Option<String>>>,
    }

    impl ScriptedRecognizer {
        pub(crate) fn new(responses: &[&str]) -> Self {
            Self {
                responses: Mutex::new(responses.iter().map(|s| s.to_string()).collect()),
                calls: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    impl Recognizer for ScriptedRecognizer {
        fn recognize(
            &self,
            _image: &DynamicImage,
            language: Option<&str>,
        ) -> Result<String, RecognitionError> {
            self.calls.lock().unwrap().push(language.map(String::from));
            Ok(self.responses.lock().unwrap().pop_front().unwrap_or_default())
        }

        fn recognize_with_boxes(
            &self,
            _image: &DynamicImage,
            _language: Option<&str>,
        ) -> Result<Vec<TokenBox>, RecognitionError> {
            Ok(Vec::new())
        }
    }

    pub(crate) fn sample_image() -> DynamicImage {
        DynamicImage::ImageLuma8(GrayImage::from_fn(40, 16, |x, y| {
            Luma([((x * 7 + y * 13) % 256) as u8])
        }))
    }

    fn solver(recognizer: Arc<ScriptedRecognizer>) -> ChallengeSolver<ScriptedRecognizer> {
        ChallengeSolver::new(recognizer, 6, None)
    }

    #[test]
    fn test_plausible_raw_answer_short_circuits() {
        let recognizer = Arc::new(ScriptedRecognizer::new(&["  A7K9QZ \n", "WRONG1"]));
        let answer = solver(recognizer.clone()).solve(&sample_image()).unwrap();

        assert_eq!(answer.text, "A7K9QZ");
        assert_eq!(answer.stage, LadderStage::Raw);
        assert_eq!(recognizer.call_count(), 1);
    }

    #[test]
    fn test_ladder_stops_at_first_plausible_stage() {
        let recognizer = Arc::new(ScriptedRecognizer::new(&["A7", "A7K", "A7K9QZ", "LATER1"]));
        let answer = solver(recognizer.clone()).solve(&sample_image()).unwrap();

        assert_eq!(answer.text, "A7K9QZ");
        assert_eq!(answer.stage, LadderStage::Threshold);
        assert_eq!(recognizer.call_count(), 3);
    }

    #[test]
    fn test_exhausted_ladder_returns_last_attempt() {
        let recognizer = Arc::new(ScriptedRecognizer::new(&["A", "AB", "ABC", "ABCD"]));
        let answer = solver(recognizer.clone()).solve(&sample_image()).unwrap();

        assert_eq!(answer.text, "ABCD");
        assert_eq!(answer.stage, LadderStage::Sharpened);
        assert_eq!(recognizer.call_count(), 4);
    }

    #[test]
    fn test_empty_answer_is_not_an_error() {
        let recognizer = Arc::new(ScriptedRecognizer::new(&[]));
        let answer = solver(recognizer).solve(&sample_image()).unwrap();
        assert!(answer.is_empty());
    }

    #[test]
    fn test_language_hint_is_forwarded() {
        let recognizer = Arc::new(ScriptedRecognizer::new(&["A7K9QZ"]));
        ChallengeSolver::new(recognizer.clone(), 6, Some("eng".to_string()))
            .solve(&sample_image())
            .unwrap();
        assert_eq!(
            recognizer.calls.lock().unwrap().as_slice(),
            &[Some("eng".to_string())]
        );
    }

    #[test]
    fn test_plausibility_counts_characters_not_bytes() {
        let recognizer = Arc::new(ScriptedRecognizer::new(&["அனு"]));
        let answer = ChallengeSolver::new(recognizer.clone(), 4, None)
            .solve(&sample_image())
            .unwrap();
        // "அனு" is 3 chars but 9 bytes, so the ladder keeps going
        assert_eq!(recognizer.call_count(), 4);
        assert_eq!(answer.stage, LadderStage::Sharpened);
    }

    #[test]
    fn test_binarize() {
        let gray = GrayImage::from_raw(3, 1, vec![10, 128, 129]).unwrap();
        let out = binarize(&gray, 128);
        assert_eq!(out.as_raw(), &vec![0, 0, 255]);
    }

    #[test]
    fn test_enhance_contrast_spreads_around_mean() {
        let gray = GrayImage::from_raw(2, 1, vec![100, 140]).unwrap();
        let out = enhance_contrast(&gray, 2.0);
        assert_eq!(out.as_raw(), &vec![80, 160]);
    }

    #[test]
    fn test_challenge_image_removed_on_drop_unless_kept() {
        let dir = tempfile::tempdir().unwrap();
        let mut png = Vec::new();
        sample_image()
            .write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
            .unwrap();

        let first = ChallengeImage::store(dir.path(), &png).unwrap();
        let second = ChallengeImage::store(dir.path(), &png).unwrap();
        assert_ne!(first.path(), second.path());
        assert_eq!(first.image().width(), 40);

        let first_path = first.path().to_path_buf();
        drop(first);
        assert!(!first_path.exists());

        let mut second = second;
        second.keep();
        let second_path = second.path().to_path_buf();
        drop(second);
        assert!(second_path.exists());
    }

    #[test]
    fn test_undecodable_capture_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = ChallengeImage::store(dir.path(), b"not an image").err().unwrap();
        assert!(matches!(err, FetchError::ChallengeDecode(_)));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
