use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::browser::{BrowserSession, SessionFactory};
use crate::error::{FetchError, format_error_chain_ref};
use crate::recognition::Recognizer;

use super::{FetchOutcome, GatedFetcher, ResourceLink};

/// Result of a full coordinator run
#[derive(Debug, Default)]
pub struct FetchReport {
    /// One outcome per distinct link; sweep outcomes replace first-pass ones
    pub outcomes: Vec<FetchOutcome>,
    /// Links still failing after the final sweep
    pub failed: Vec<ResourceLink>,
}

impl FetchReport {
    pub fn successes(&self) -> usize {
        self.outcomes.iter().filter(|o| o.success).count()
    }
}

/// Runs every link through the gated fetcher with bounded parallelism, then
/// sweeps the failures once more
pub struct FetchCoordinator<F, R> {
    factory: F,
    fetcher: Arc<GatedFetcher<R>>,
    max_parallel: usize,
    failure_report: PathBuf,
}

impl<F, R> FetchCoordinator<F, R>
where
    F: SessionFactory,
    R: Recognizer + 'static,
{
    pub fn new(
        factory: F,
        fetcher: Arc<GatedFetcher<R>>,
        max_parallel: usize,
        failure_report: PathBuf,
    ) -> Self {
        Self {
            factory,
            fetcher,
            max_parallel: max_parallel.max(1),
            failure_report,
        }
    }

    /// Fetch every distinct link. Only failing to open browser sessions or to
    /// write the failure report is an error; link failures are reported.
    pub async fn run(&self, links: Vec<ResourceLink>) -> Result<FetchReport, FetchError> {
        let mut seen = HashSet::new();
        let links: Vec<_> = links.into_iter().filter(|l| seen.insert(l.clone())).collect();
        if links.is_empty() {
            info!("No links to fetch");
            write_failure_report(&self.failure_report, &[])?;
            return Ok(FetchReport::default());
        }

        let sessions = self.open_sessions(self.max_parallel.min(links.len())).await?;
        info!(links = links.len(), sessions = sessions.len(), "Fetch pass started");

        let (sessions, first_pass) = self.run_pass(sessions, links.clone()).await;
        let mut outcomes: HashMap<_, _> = first_pass
            .into_iter()
            .map(|o| (o.link.clone(), o))
            .collect();
        for link in &links {
            if !outcomes.contains_key(link) {
                self.fetcher.mark_failed(link.clone());
            }
        }

        // Both passes are joined, so the failed set is stable here
        let retry: Vec<_> = links
            .iter()
            .filter(|l| self.fetcher.take_failed(l))
            .cloned()
            .collect();

        let sessions = if retry.is_empty() {
            sessions
        } else if sessions.is_empty() {
            error!(links = retry.len(), "No browser sessions left, final sweep skipped");
            for link in &retry {
                self.fetcher.mark_failed(link.clone());
            }
            sessions
        } else {
            info!(links = retry.len(), "Final sweep started");
            let (sessions, sweep) = self.run_pass(sessions, retry).await;
            for outcome in sweep {
                outcomes.insert(outcome.link.clone(), outcome);
            }
            sessions
        };

        let failed: Vec<_> = links
            .iter()
            .filter(|l| self.fetcher.take_failed(l))
            .cloned()
            .collect();
        for link in &failed {
            self.fetcher.stats().record_failure();
            warn!(link = %link, "Link failed in both passes");
        }
        write_failure_report(&self.failure_report, &failed)?;

        for mut session in sessions {
            if let Err(e) = session.close().await {
                warn!(error = %format_error_chain_ref(&e), "Failed to close browser session");
            }
        }

        let outcomes = links
            .iter()
            .map(|link| {
                outcomes.remove(link).unwrap_or_else(|| FetchOutcome {
                    link: link.clone(),
                    success: false,
                    attempts: 0,
                })
            })
            .collect();

        let report = FetchReport { outcomes, failed };
        info!(
            successes = report.successes(),
            failures = report.failed.len(),
            "Fetching complete"
        );
        Ok(report)
    }

    /// Open `count` independent sessions. Any failure closes the ones already
    /// opened and aborts the run.
    async fn open_sessions(&self, count: usize) -> Result<Vec<F::Session>, FetchError> {
        let mut sessions = Vec::with_capacity(count);
        for _ in 0..count {
            match self.factory.open().await {
                Ok(session) => sessions.push(session),
                Err(e) => {
                    for mut session in sessions {
                        let _ = session.close().await;
                    }
                    return Err(e);
                }
            }
        }
        Ok(sessions)
    }

    /// Fetch `links` with one worker task per session. Returns when every
    /// worker has finished, handing the sessions back.
    async fn run_pass(
        &self,
        sessions: Vec<F::Session>,
        links: Vec<ResourceLink>,
    ) -> (Vec<F::Session>, Vec<FetchOutcome>) {
        let pending = Arc::new(Mutex::new(VecDeque::from(links)));

        let tasks: Vec<_> = sessions
            .into_iter()
            .enumerate()
            .map(|(worker, mut session)| {
                let pending = pending.clone();
                let fetcher = self.fetcher.clone();
                tokio::spawn(async move {
                    let mut outcomes = Vec::new();
                    loop {
                        let next = pending.lock().await.pop_front();
                        let Some(link) = next else {
                            break;
                        };
                        info!(worker, link = %link, "Fetching");
                        outcomes.push(fetcher.fetch(&mut session, &link).await);
                    }
                    (session, outcomes)
                })
            })
            .collect();

        let mut sessions = Vec::with_capacity(tasks.len());
        let mut outcomes = Vec::new();
        for task in tasks {
            match task.await {
                Ok((session, worker_outcomes)) => {
                    sessions.push(session);
                    outcomes.extend(worker_outcomes);
                }
                Err(e) => error!(error = %e, "Fetch worker task failed"),
            }
        }
        (sessions, outcomes)
    }
}

/// Newline-delimited list of links, written even when empty
fn write_failure_report(path: &Path, links: &[ResourceLink]) -> std::io::Result<()> {
    let mut contents = String::new();
    for link in links {
        contents.push_str(link.as_str());
        contents.push('\n');
    }
    std::fs::write(path, contents)?;
    info!(path = %path.display(), links = links.len(), "Failure report written");
    Ok(())
}
