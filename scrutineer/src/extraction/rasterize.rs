//! Document rasterization.
//!
//! Pages are rendered one at a time and handed to a callback, so only a
//! single page image of a document is in memory at once.

use std::path::Path;

use image::DynamicImage;
use pdfium_render::prelude::*;
use tracing::debug;

use crate::error::{ConfigError, ExtractionError};

/// One rendered page (1-indexed)
pub struct PageImage {
    pub number: u32,
    pub image: DynamicImage,
}

pub trait Rasterizer: Send + Sync {
    /// Render every page of the document in order, returning the page count.
    ///
    /// `on_page` runs while the backend may hold a process-wide lock, so it
    /// should only persist the page.
    fn rasterize(
        &self,
        path: &Path,
        dpi: u32,
        on_page: &mut dyn FnMut(PageImage) -> Result<(), ExtractionError>,
    ) -> Result<u32, ExtractionError>;
}

/// PDF rasterizer backed by a dynamically linked PDFium
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfiumRasterizer;

impl PdfiumRasterizer {
    /// Confirm libpdfium can be bound. Run once at startup.
    pub fn check_available(&self) -> Result<(), ConfigError> {
        create_pdfium().map(|_| ())
    }
}

/// Directories searched for libpdfium before the system library path
const PDFIUM_SEARCH_DIRS: [&str; 2] = ["./", "./vendor/pdfium/lib/"];

/// Bind a dynamically linked PDFium
fn create_pdfium() -> Result<Pdfium, ConfigError> {
    let local = PDFIUM_SEARCH_DIRS.iter().find_map(|dir| {
        Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(dir)).ok()
    });
    let bindings = match local {
        Some(bindings) => bindings,
        None => Pdfium::bind_to_system_library().map_err(|e| {
            ConfigError::MissingCollaborator {
                name: "pdfium",
                source: Box::new(std::io::Error::other(format!(
                    "libpdfium not found in {:?} or on the system library path: {:?}",
                    PDFIUM_SEARCH_DIRS, e
                ))),
            }
        })?,
    };

    Ok(Pdfium::new(bindings))
}

/// Pixel size of a page dimension given in PDF points
fn points_to_pixels(points: f32, dpi: u32) -> i32 {
    (f64::from(points) * f64::from(dpi) / 72.0).ceil() as i32
}

impl Rasterizer for PdfiumRasterizer {
    fn rasterize(
        &self,
        path: &Path,
        dpi: u32,
        on_page: &mut dyn FnMut(PageImage) -> Result<(), ExtractionError>,
    ) -> Result<u32, ExtractionError> {
        let pdfium = create_pdfium().map_err(|e| ExtractionError::Load {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let document =
            pdfium
                .load_pdf_from_file(path, None)
                .map_err(|e| ExtractionError::Load {
                    path: path.to_path_buf(),
                    message: format!("{:?}", e),
                })?;

        let mut count = 0;
        for (page_index, page) in document.pages().iter().enumerate() {
            let number = page_index as u32 + 1;
            let width = points_to_pixels(page.width().value, dpi);
            let height = points_to_pixels(page.height().value, dpi);

            let config = PdfRenderConfig::new()
                .set_target_width(width)
                .set_target_height(height);
            let bitmap = page
                .render_with_config(&config)
                .map_err(|e| ExtractionError::Render {
                    page: number,
                    message: format!("{:?}", e),
                })?;

            debug!(page = number, width, height, dpi, "Rendered page");
            on_page(PageImage {
                number,
                image: bitmap.as_image(),
            })?;
            count = number;
        }

        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_letter_page_at_300_dpi() {
        // 8.5 x 11 inches in points
        assert_eq!(points_to_pixels(612.0, 300), 2550);
        assert_eq!(points_to_pixels(792.0, 300), 3300);
    }

    #[test]
    fn test_a4_page_rounds_up() {
        let width = points_to_pixels(595.0, 300);
        assert!((width - 2480).abs() <= 1, "width was {}", width);
    }
}
