use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::DynamicImage;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{ExtractionError, format_error_chain_ref};
use crate::recognition::{Recognizer, TokenBox};
use crate::stats::PipelineStats;

use super::evidence::{
    CroppedRegion, MatchEvidence, crop_evidence_path, find_term_region, page_image_path,
    text_evidence_path, to_pixel_rect,
};
use super::queue::{DocumentHandle, DocumentReceiver};
use super::rasterize::{PageImage, Rasterizer};

/// What every worker of a pool searches for and where it writes
#[derive(Debug, Clone)]
pub struct ExtractionSettings {
    pub terms: Vec<String>,
    pub language: String,
    pub dpi: u32,
    pub page_images_dir: PathBuf,
    pub results_dir: PathBuf,
}

impl ExtractionSettings {
    /// Terms keep their configured order; empty and repeated ones are dropped
    pub fn from_config(config: &Config) -> Self {
        let mut terms: Vec<String> = Vec::new();
        for term in &config.extraction.terms {
            if !term.is_empty() && !terms.contains(term) {
                terms.push(term.clone());
            }
        }

        Self {
            terms,
            language: config.extraction.language.clone(),
            dpi: config.extraction.dpi,
            page_images_dir: config.storage.page_images_dir.clone(),
            results_dir: config.storage.results_dir.clone(),
        }
    }

    fn language(&self) -> Option<&str> {
        Some(self.language.as_str()).filter(|l| !l.is_empty())
    }
}

pub struct ExtractionWorker<R, Z> {
    id: usize,
    settings: Arc<ExtractionSettings>,
    recognizer: Arc<R>,
    rasterizer: Arc<Z>,
    stats: Arc<PipelineStats>,
}

impl<R, Z> ExtractionWorker<R, Z>
where
    R: Recognizer + 'static,
    Z: Rasterizer + 'static,
{
    pub fn new(
        id: usize,
        settings: Arc<ExtractionSettings>,
        recognizer: Arc<R>,
        rasterizer: Arc<Z>,
        stats: Arc<PipelineStats>,
    ) -> Self {
        Self {
            id,
            settings,
            recognizer,
            rasterizer,
            stats,
        }
    }

    /// Rasterize a document and search every page for every term.
    ///
    /// Blocking; call from `spawn_blocking`. Match and crop counters are only
    /// recorded when the whole document succeeds.
    pub fn process_document(
        &self,
        handle: &DocumentHandle,
    ) -> Result<Vec<MatchEvidence>, ExtractionError> {
        let name = handle.name();
        let settings = &self.settings;

        // The rasterizer holds the PDFium library lock while it calls back,
        // so pages are only saved here and recognized once it returns
        let mut rendered = Vec::new();
        let pages = self
            .rasterizer
            .rasterize(handle.path(), settings.dpi, &mut |page| {
                let path = page_image_path(&settings.page_images_dir, &name, page.number);
                save_artifact(&page.image, &path)?;
                rendered.push((page.number, path));
                Ok(())
            })?;

        let mut evidence = Vec::new();
        for (number, path) in rendered {
            let image = image::open(&path).map_err(|source| ExtractionError::Artifact {
                path: path.clone(),
                source,
            })?;
            self.scan_page(handle, &name, PageImage { number, image }, &mut evidence)?;
        }

        for found in &evidence {
            self.stats.record_match();
            if found.cropped_region.is_some() {
                self.stats.record_crop_saved();
            }
        }

        debug!(
            worker = self.id,
            document = %handle,
            pages,
            matches = evidence.len(),
            "Document scanned"
        );
        Ok(evidence)
    }

    fn scan_page(
        &self,
        handle: &DocumentHandle,
        name: &str,
        page: PageImage,
        evidence: &mut Vec<MatchEvidence>,
    ) -> Result<(), ExtractionError> {
        let settings = &self.settings;
        let text = self
            .recognizer
            .recognize(&page.image, settings.language())
            .map_err(|source| ExtractionError::Recognition {
                page: page.number,
                source,
            })?;
        self.stats.record_page_scanned();

        // Requested only once some term matched, then reused for the page
        let mut boxes: Option<Vec<TokenBox>> = None;

        for term in &settings.terms {
            if term.is_empty() || !text.contains(term.as_str()) {
                continue;
            }
            info!(document = %handle, term = %term, page = page.number, "Term found");

            let text_path = text_evidence_path(&settings.results_dir, name, term, page.number);
            std::fs::write(&text_path, &text)?;

            if boxes.is_none() {
                let listing = self
                    .recognizer
                    .recognize_with_boxes(&page.image, settings.language())
                    .map_err(|source| ExtractionError::Recognition {
                        page: page.number,
                        source,
                    })?;
                boxes = Some(listing);
            }
            let listing = boxes.as_deref().unwrap_or_default();

            let rect = find_term_region(listing, term)
                .and_then(|region| to_pixel_rect(&region, page.image.width(), page.image.height()));
            let cropped_region = match rect {
                Some(rect) => {
                    let path = crop_evidence_path(&settings.results_dir, name, term, page.number);
                    let crop = page.image.crop_imm(rect.x, rect.y, rect.width, rect.height);
                    save_artifact(&crop, &path)?;
                    Some(CroppedRegion { rect, path })
                }
                None => {
                    warn!(
                        document = %handle,
                        term = %term,
                        page = page.number,
                        "Term not in box listing, no crop saved"
                    );
                    None
                }
            };

            evidence.push(MatchEvidence {
                document: handle.clone(),
                term: term.clone(),
                page: page.number,
                text: text.clone(),
                text_path,
                cropped_region,
            });
        }

        Ok(())
    }

    /// Consume documents until this worker receives its shutdown sentinel.
    ///
    /// Failures are logged and counted per document; the loop never exits
    /// because of one.
    pub async fn run(self: Arc<Self>, receiver: DocumentReceiver) {
        debug!(worker = self.id, "Extraction worker started");

        while let Some(handle) = receiver.recv().await {
            let worker = self.clone();
            let job = handle.clone();
            let result = tokio::task::spawn_blocking(move || worker.process_document(&job)).await;

            match result {
                Ok(Ok(evidence)) => {
                    self.stats.record_document_processed();
                    for found in &evidence {
                        debug!(
                            document = %found.document,
                            term = %found.term,
                            page = found.page,
                            chars = found.text.chars().count(),
                            text = %found.text_path.display(),
                            crop = ?found.cropped_region.as_ref().map(|c| c.path.display().to_string()),
                            "Evidence saved"
                        );
                    }
                    info!(
                        worker = self.id,
                        document = %handle,
                        matches = evidence.len(),
                        "Document processed"
                    );
                }
                Ok(Err(e)) => {
                    self.stats.record_document_failed();
                    warn!(
                        worker = self.id,
                        document = %handle,
                        error = %format_error_chain_ref(&e),
                        "Document skipped"
                    );
                }
                Err(e) => {
                    self.stats.record_document_failed();
                    error!(worker = self.id, document = %handle, error = %e, "Extraction task panicked");
                }
            }
            receiver.mark_processed(&handle);
        }

        debug!(worker = self.id, "Extraction worker stopped");
    }
}

fn save_artifact(image: &DynamicImage, path: &Path) -> Result<(), ExtractionError> {
    image.save(path).map_err(|source| ExtractionError::Artifact {
        path: path.to_path_buf(),
        source,
    })
}
