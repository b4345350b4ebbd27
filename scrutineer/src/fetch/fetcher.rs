use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashSet;
use tracing::{debug, info, warn};

use crate::browser::{BrowserSession, list_downloaded_files};
use crate::challenge::{ChallengeImage, ChallengeSolver};
use crate::config::Config;
use crate::error::{FetchError, format_error_chain_ref};
use crate::extraction::{DocumentHandle, DocumentQueue};
use crate::recognition::Recognizer;
use crate::stats::PipelineStats;

use super::{ResourceLink, RetryPolicy};

/// Result of one [`GatedFetcher::fetch`] call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOutcome {
    pub link: ResourceLink,
    pub success: bool,
    pub attempts: u32,
}

/// Portal form layout, timings and directories used by every attempt
#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub challenge_element_id: String,
    pub answer_input_id: String,
    pub submit_button_id: String,
    /// Unconditional wait between submission and payload verification
    pub settle: Duration,
    pub element_timeout: Duration,
    pub challenges_dir: PathBuf,
    pub keep_failed_challenges: bool,
    pub payload_extension: String,
    /// Verified payloads are moved here
    pub downloads_dir: PathBuf,
}

impl FetchSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            challenge_element_id: config.portal.challenge_element_id.clone(),
            answer_input_id: config.portal.answer_input_id.clone(),
            submit_button_id: config.portal.submit_button_id.clone(),
            settle: config.fetch.settle(),
            element_timeout: config.fetch.element_timeout(),
            challenges_dir: config.storage.challenges_dir.clone(),
            keep_failed_challenges: config.fetch.keep_failed_challenges,
            payload_extension: config.fetch.payload_extension.clone(),
            downloads_dir: config.storage.downloads_dir.clone(),
        }
    }
}

/// Drives gated fetches: navigate, capture and solve the challenge, submit,
/// verify the payload. Shared by all fetch workers; each call brings its own
/// session.
pub struct GatedFetcher<R> {
    solver: Arc<ChallengeSolver<R>>,
    policy: RetryPolicy,
    settings: FetchSettings,
    /// None when fetched documents are not extracted in this run
    queue: Option<DocumentQueue>,
    stats: Arc<PipelineStats>,
    failed: DashSet<ResourceLink>,
}

impl<R: Recognizer + 'static> GatedFetcher<R> {
    pub fn new(
        solver: Arc<ChallengeSolver<R>>,
        policy: RetryPolicy,
        settings: FetchSettings,
        queue: Option<DocumentQueue>,
        stats: Arc<PipelineStats>,
    ) -> Self {
        Self {
            solver,
            policy,
            settings,
            queue,
            stats,
            failed: DashSet::new(),
        }
    }

    /// Fetch one link, retrying up to the policy bound. Never fails: every
    /// error is logged and counted, and the outcome says whether the payload
    /// arrived.
    pub async fn fetch<S: BrowserSession>(
        &self,
        session: &mut S,
        link: &ResourceLink,
    ) -> FetchOutcome {
        let mut attempts = 0;

        loop {
            attempts += 1;
            self.stats.record_attempt();

            match self.attempt(session, link).await {
                Ok(documents) => {
                    self.stats.record_success();
                    self.failed.remove(link);
                    info!(
                        link = %link,
                        attempt = attempts,
                        documents = documents.len(),
                        "Payload acquired"
                    );
                    self.enqueue(documents).await;
                    return FetchOutcome {
                        link: link.clone(),
                        success: true,
                        attempts,
                    };
                }
                Err(e) => {
                    warn!(
                        link = %link,
                        attempt = attempts,
                        kind = e.kind(),
                        error = %format_error_chain_ref(&e),
                        "Fetch attempt failed"
                    );
                    if !e.is_dialog() {
                        clear_dialog(session).await;
                    }
                }
            }

            if !self.policy.should_retry(attempts) {
                break;
            }
            tokio::time::sleep(self.policy.delay_for(attempts)).await;
        }

        self.stats.record_retries_exhausted();
        self.failed.insert(link.clone());
        warn!(link = %link, attempts, "Link failed, attempts exhausted");

        FetchOutcome {
            link: link.clone(),
            success: false,
            attempts,
        }
    }

    /// One pass through the challenge form. Returns the documents that
    /// arrived.
    async fn attempt<S: BrowserSession>(
        &self,
        session: &mut S,
        link: &ResourceLink,
    ) -> Result<Vec<DocumentHandle>, FetchError> {
        let settings = &self.settings;

        session.navigate(link.as_str()).await?;
        session
            .wait_for_element(&settings.challenge_element_id, settings.element_timeout)
            .await?;
        session
            .wait_for_element(&settings.answer_input_id, settings.element_timeout)
            .await?;

        let capture = session
            .screenshot_element(&settings.challenge_element_id)
            .await?;
        let mut challenge = ChallengeImage::store(&settings.challenges_dir, &capture)?;

        let result = self.solve_and_submit(session, &challenge).await;
        if result.is_err() && settings.keep_failed_challenges {
            debug!(path = %challenge.path().display(), "Keeping failed challenge");
            challenge.keep();
        }
        result
    }

    async fn solve_and_submit<S: BrowserSession>(
        &self,
        session: &mut S,
        challenge: &ChallengeImage,
    ) -> Result<Vec<DocumentHandle>, FetchError> {
        let settings = &self.settings;

        let solver = self.solver.clone();
        let image = challenge.image().clone();
        let answer = tokio::task::spawn_blocking(move || solver.solve(&image))
            .await
            .map_err(|e| FetchError::Io(std::io::Error::other(e)))??;
        if answer.is_empty() {
            return Err(FetchError::EmptyAnswer);
        }
        debug!(answer = %answer.text, stage = %answer.stage, "Challenge solved");

        let download_dir = session.download_dir().to_path_buf();

        // A payload from an earlier attempt may have landed after its settle
        // wait; it must not be credited to this submission
        let late = list_downloaded_files(&download_dir, &settings.payload_extension)?;
        if !late.is_empty() {
            warn!(
                dir = %download_dir.display(),
                files = late.len(),
                "Moving late downloads from an earlier attempt"
            );
            let documents = self.move_to_downloads(&late)?;
            self.enqueue(documents).await;
        }

        let before = list_downloaded_files(&download_dir, &settings.payload_extension)?;

        session
            .send_keys(&settings.answer_input_id, &answer.text)
            .await?;
        session.click(&settings.submit_button_id).await?;

        // No completion signal exists, so wait a fixed time for the payload
        tokio::time::sleep(settings.settle).await;

        if let Some(message) = session.dismiss_dialog().await? {
            return Err(FetchError::UnexpectedDialog { message });
        }

        let after = list_downloaded_files(&download_dir, &settings.payload_extension)?;
        let arrived: Vec<_> = after.difference(&before).collect();
        if arrived.is_empty() {
            return Err(FetchError::PayloadMissing { dir: download_dir });
        }

        Ok(self.move_to_downloads(arrived)?)
    }

    /// Move staged files into the downloads area
    fn move_to_downloads<'a>(
        &self,
        staged: impl IntoIterator<Item = &'a PathBuf>,
    ) -> std::io::Result<Vec<DocumentHandle>> {
        let mut documents = Vec::new();
        for file in staged {
            let Some(file_name) = file.file_name() else {
                continue;
            };
            let destination = self.settings.downloads_dir.join(file_name);
            std::fs::rename(file, &destination)?;
            documents.push(DocumentHandle::new(&destination));
        }
        Ok(documents)
    }

    async fn enqueue(&self, documents: Vec<DocumentHandle>) {
        if let Some(queue) = &self.queue {
            for document in documents {
                queue.enqueue(document).await;
            }
        }
    }

    /// Remove a link from the failed set, returning whether it was there
    pub fn take_failed(&self, link: &ResourceLink) -> bool {
        self.failed.remove(link).is_some()
    }

    /// Mark a link failed without fetching it
    pub fn mark_failed(&self, link: ResourceLink) {
        self.failed.insert(link);
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }
}

/// Dismiss whatever alert an attempt may have left open
async fn clear_dialog<S: BrowserSession>(session: &mut S) {
    match session.dismiss_dialog().await {
        Ok(Some(message)) => debug!(message = %message, "Dismissed dialog"),
        Ok(None) => {}
        Err(e) => warn!(error = %format_error_chain_ref(&e), "Failed to dismiss dialog"),
    }
}
