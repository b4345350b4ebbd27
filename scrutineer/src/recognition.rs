//! Text recognition collaborator.
//!
//! The engine is a black box: an image goes in, UTF-8 text (or per-glyph
//! boxes) comes out. Calls block, so async callers go through
//! `spawn_blocking`.

pub mod tesseract;

pub use tesseract::TesseractRecognizer;

use image::DynamicImage;

use crate::error::RecognitionError;

/// One recognized token with its geometry.
///
/// Coordinates use the engine's bottom-left origin: `bottom < top`, both
/// measured upward from the bottom edge of the image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenBox {
    pub token: String,
    pub left: u32,
    pub bottom: u32,
    pub right: u32,
    pub top: u32,
}

impl TokenBox {
    /// Smallest box covering both boxes. The token is concatenated.
    pub fn union(&self, other: &TokenBox) -> TokenBox {
        TokenBox {
            token: format!("{}{}", self.token, other.token),
            left: self.left.min(other.left),
            bottom: self.bottom.min(other.bottom),
            right: self.right.max(other.right),
            top: self.top.max(other.top),
        }
    }
}

/// Black-box recognition engine
pub trait Recognizer: Send + Sync {
    /// Recognize all text in the image
    fn recognize(
        &self,
        image: &DynamicImage,
        language: Option<&str>,
    ) -> Result<String, RecognitionError>;

    /// Recognize tokens with their bounding boxes (bottom-left origin)
    fn recognize_with_boxes(
        &self,
        image: &DynamicImage,
        language: Option<&str>,
    ) -> Result<Vec<TokenBox>, RecognitionError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_box_union() {
        let a = TokenBox {
            token: "அ".to_string(),
            left: 10,
            bottom: 100,
            right: 30,
            top: 130,
        };
        let b = TokenBox {
            token: "ன்".to_string(),
            left: 31,
            bottom: 95,
            right: 52,
            top: 128,
        };

        let merged = a.union(&b);
        assert_eq!(merged.token, "அன்");
        assert_eq!((merged.left, merged.bottom), (10, 95));
        assert_eq!((merged.right, merged.top), (52, 130));
    }
}
