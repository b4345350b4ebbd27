//! Match evidence: the text and image artifacts proving a term occurs on a
//! page, and the geometry helpers used to cut the image region out.

use std::path::{Path, PathBuf};

use crate::recognition::TokenBox;

use super::DocumentHandle;

/// Region of a page image, top-left origin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CroppedRegion {
    pub rect: PixelRect,
    pub path: PathBuf,
}

/// One (document, term, page) match
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchEvidence {
    pub document: DocumentHandle,
    pub term: String,
    pub page: u32,
    /// Full recognized text of the page
    pub text: String,
    pub text_path: PathBuf,
    /// None when the box listing had no entry for the term
    pub cropped_region: Option<CroppedRegion>,
}

/// Locate the term in a box listing.
///
/// A single box whose token is the term wins. Otherwise the first run of
/// consecutive boxes whose tokens concatenate to exactly the term is used,
/// since glyph-level output splits a word into several boxes.
pub fn find_term_region(boxes: &[TokenBox], term: &str) -> Option<TokenBox> {
    if term.is_empty() {
        return None;
    }
    if let Some(exact) = boxes.iter().find(|b| b.token == term) {
        return Some(exact.clone());
    }

    for start in 0..boxes.len() {
        if !term.starts_with(boxes[start].token.as_str()) || boxes[start].token.is_empty() {
            continue;
        }
        let mut region = boxes[start].clone();
        for next in &boxes[start + 1..] {
            if region.token.len() >= term.len() {
                break;
            }
            region = region.union(next);
            if !term.starts_with(region.token.as_str()) {
                break;
            }
        }
        if region.token == term {
            return Some(region);
        }
    }
    None
}

/// Convert a bottom-left-origin box to a top-left-origin rectangle clamped to
/// the image. Returns None when nothing of the box lies inside the image.
pub fn to_pixel_rect(region: &TokenBox, image_width: u32, image_height: u32) -> Option<PixelRect> {
    let top = region.top.min(image_height);
    let bottom = region.bottom.min(top);
    let left = region.left.min(image_width);
    let right = region.right.min(image_width).max(left);

    let rect = PixelRect {
        x: left,
        y: image_height - top,
        width: right - left,
        height: top - bottom,
    };
    if rect.width == 0 || rect.height == 0 {
        return None;
    }
    Some(rect)
}

/// Make a term safe to embed in a file name
pub fn sanitize_term(term: &str) -> String {
    term.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            _ => c,
        })
        .collect()
}

pub fn page_image_path(dir: &Path, document: &str, page: u32) -> PathBuf {
    dir.join(format!("{}_page_{}.png", document, page))
}

pub fn text_evidence_path(dir: &Path, document: &str, term: &str, page: u32) -> PathBuf {
    dir.join(format!(
        "{}_{}_page_{}_text.txt",
        document,
        sanitize_term(term),
        page
    ))
}

pub fn crop_evidence_path(dir: &Path, document: &str, term: &str, page: u32) -> PathBuf {
    dir.join(format!(
        "{}_{}_section_page_{}.png",
        document,
        sanitize_term(term),
        page
    ))
}
