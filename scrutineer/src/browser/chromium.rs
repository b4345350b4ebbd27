//! Headless Chrome/Chromium sessions via chromiumoxide.
//!
//! Every session launches its own browser process with a private profile
//! directory and a private download directory, so concurrent sessions never
//! share page state or see each other's downloads.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chromiumoxide::Page;
use chromiumoxide::browser::{Browser, BrowserConfig as ChromeConfig};
use chromiumoxide::cdp::browser_protocol::browser::{
    SetDownloadBehaviorBehavior, SetDownloadBehaviorParams,
};
use chromiumoxide::cdp::browser_protocol::page::{
    CaptureScreenshotFormat, EventJavascriptDialogOpening, HandleJavaScriptDialogParams,
};
use futures::StreamExt;
use tempfile::TempDir;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::BrowserConfig;
use crate::error::FetchError;

use super::{BrowserSession, SessionFactory};

/// Subdirectory of the downloads area holding per-session staging directories
pub const SESSIONS_DIR: &str = ".sessions";

/// Interval between element presence checks
const ELEMENT_POLL_INTERVAL: Duration = Duration::from_millis(250);

const COLLECT_LINKS_SCRIPT: &str = r#"
    (() => Array.from(document.querySelectorAll('a[href]'))
        .map(a => a.getAttribute('href'))
        .filter(h => h))()
"#;

pub struct ChromiumSessionFactory {
    config: BrowserConfig,
    downloads_dir: PathBuf,
}

impl ChromiumSessionFactory {
    pub fn new(config: BrowserConfig, downloads_dir: &Path) -> Self {
        Self {
            config,
            downloads_dir: downloads_dir.to_path_buf(),
        }
    }

    fn chrome_config(&self, profile_dir: &Path) -> Result<ChromeConfig, FetchError> {
        let mut builder = ChromeConfig::builder()
            .window_size(self.config.window_width, self.config.window_height)
            .user_data_dir(profile_dir)
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage");

        if !self.config.headless {
            builder = builder.with_head();
        }
        if let Some(path) = &self.config.chrome_path {
            builder = builder.chrome_executable(path);
        }

        builder.build().map_err(FetchError::BrowserLaunch)
    }
}

#[async_trait]
impl SessionFactory for ChromiumSessionFactory {
    type Session = ChromiumSession;

    async fn open(&self) -> Result<ChromiumSession, FetchError> {
        let session_id = Uuid::new_v4().simple().to_string();
        let download_dir = self.downloads_dir.join(SESSIONS_DIR).join(&session_id);
        std::fs::create_dir_all(&download_dir)?;
        let profile = tempfile::Builder::new()
            .prefix("scrutineer-profile-")
            .tempdir()?;

        let (browser, mut handler) = Browser::launch(self.chrome_config(profile.path())?)
            .await
            .map_err(|e| FetchError::BrowserLaunch(e.to_string()))?;

        // Spawn handler task to process browser events
        let handler_task = tokio::spawn(async move {
            while let Some(h) = handler.next().await {
                if h.is_err() {
                    break;
                }
            }
        });

        let download_behavior = SetDownloadBehaviorParams::builder()
            .behavior(SetDownloadBehaviorBehavior::Allow)
            .download_path(download_dir.display().to_string())
            .build()
            .map_err(FetchError::BrowserLaunch)?;
        browser
            .execute(download_behavior)
            .await
            .map_err(|e| FetchError::BrowserLaunch(e.to_string()))?;

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| FetchError::BrowserLaunch(e.to_string()))?;

        let pending_dialog = Arc::new(Mutex::new(None));
        let mut dialogs = page
            .event_listener::<EventJavascriptDialogOpening>()
            .await
            .map_err(|e| FetchError::BrowserLaunch(e.to_string()))?;
        let dialog_slot = pending_dialog.clone();
        let dialog_task = tokio::spawn(async move {
            while let Some(event) = dialogs.next().await {
                debug!(message = %event.message, "Dialog opened");
                if let Ok(mut slot) = dialog_slot.lock() {
                    *slot = Some(event.message.clone());
                }
            }
        });

        debug!(session = %session_id, dir = %download_dir.display(), "Browser session opened");

        Ok(ChromiumSession {
            browser,
            page,
            handler_task,
            dialog_task,
            pending_dialog,
            download_dir,
            _profile: profile,
        })
    }
}

pub struct ChromiumSession {
    browser: Browser,
    page: Page,
    handler_task: JoinHandle<()>,
    dialog_task: JoinHandle<()>,
    pending_dialog: Arc<Mutex<Option<String>>>,
    download_dir: PathBuf,
    _profile: TempDir,
}

impl ChromiumSession {
    async fn element(&self, element_id: &str) -> Result<chromiumoxide::Element, FetchError> {
        self.page
            .find_element(format!("#{}", element_id))
            .await
            .map_err(|e| element_error(element_id, e))
    }
}

fn element_error(element_id: &str, error: impl std::fmt::Display) -> FetchError {
    FetchError::Element {
        element_id: element_id.to_string(),
        message: error.to_string(),
    }
}

#[async_trait]
impl BrowserSession for ChromiumSession {
    async fn navigate(&mut self, url: &str) -> Result<(), FetchError> {
        self.page
            .goto(url)
            .await
            .map_err(|e| FetchError::Navigation {
                url: url.to_string(),
                message: e.to_string(),
            })?;
        Ok(())
    }

    async fn wait_for_element(
        &mut self,
        element_id: &str,
        timeout: Duration,
    ) -> Result<(), FetchError> {
        let start = Instant::now();
        loop {
            if self.element(element_id).await.is_ok() {
                return Ok(());
            }
            if start.elapsed() > timeout {
                return Err(FetchError::ElementTimeout {
                    element_id: element_id.to_string(),
                    timeout_secs: timeout.as_secs(),
                });
            }
            tokio::time::sleep(ELEMENT_POLL_INTERVAL).await;
        }
    }

    async fn screenshot_element(&mut self, element_id: &str) -> Result<Vec<u8>, FetchError> {
        self.element(element_id)
            .await?
            .screenshot(CaptureScreenshotFormat::Png)
            .await
            .map_err(|e| element_error(element_id, e))
    }

    async fn send_keys(&mut self, element_id: &str, text: &str) -> Result<(), FetchError> {
        self.element(element_id)
            .await?
            .click()
            .await
            .map_err(|e| element_error(element_id, e))?
            .type_str(text)
            .await
            .map_err(|e| element_error(element_id, e))?;
        Ok(())
    }

    async fn click(&mut self, element_id: &str) -> Result<(), FetchError> {
        self.element(element_id)
            .await?
            .click()
            .await
            .map_err(|e| element_error(element_id, e))?;
        Ok(())
    }

    async fn dismiss_dialog(&mut self) -> Result<Option<String>, FetchError> {
        let message = match self.pending_dialog.lock() {
            Ok(mut slot) => slot.take(),
            Err(_) => None,
        };
        let Some(message) = message else {
            return Ok(None);
        };

        self.page
            .execute(HandleJavaScriptDialogParams::new(true))
            .await
            .map_err(|e| FetchError::UnexpectedDialog {
                message: format!("{} (dismiss failed: {})", message, e),
            })?;
        Ok(Some(message))
    }

    async fn collect_links(&mut self) -> Result<Vec<String>, FetchError> {
        let url = self.page.url().await.ok().flatten().unwrap_or_default();
        let navigation_error = |message: String| FetchError::Navigation {
            url: url.clone(),
            message,
        };

        self.page
            .evaluate(COLLECT_LINKS_SCRIPT)
            .await
            .map_err(|e| navigation_error(e.to_string()))?
            .into_value::<Vec<String>>()
            .map_err(|e| navigation_error(e.to_string()))
    }

    fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    async fn close(&mut self) -> Result<(), FetchError> {
        let result = self.browser.close().await;
        self.dialog_task.abort();
        self.handler_task.abort();

        // Staging directory is empty once every payload has been moved out
        if let Err(e) = std::fs::remove_dir(&self.download_dir) {
            warn!(dir = %self.download_dir.display(), error = %e, "Session download directory not removed");
        }

        result
            .map(|_| ())
            .map_err(|e| FetchError::BrowserLaunch(format!("close failed: {}", e)))
    }
}
