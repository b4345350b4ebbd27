//! Pipeline configuration.
//!
//! Everything is read once at startup from an optional config file plus
//! `SCRUTINEER__*` environment variables (see [`loader`]). Nothing is
//! reloaded while the pipelines run.

mod loader;

pub use loader::load_config;

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::fetch::RetryPolicy;

/// Which stages of the pipeline a run executes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Crawl, fetch, and extract concurrently
    #[default]
    Full,
    /// Crawl and fetch only; downloaded documents are left for a later run
    FetchOnly,
    /// Only extract documents already present in the downloads area
    ExtractOnly,
}

impl RunMode {
    pub fn fetches(self) -> bool {
        matches!(self, RunMode::Full | RunMode::FetchOnly)
    }

    pub fn extracts(self) -> bool {
        matches!(self, RunMode::Full | RunMode::ExtractOnly)
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub portal: PortalConfig,

    #[serde(default)]
    pub browser: BrowserConfig,

    #[serde(default)]
    pub fetch: FetchConfig,

    #[serde(default)]
    pub challenge: ChallengeConfig,

    #[serde(default)]
    pub recognition: RecognitionConfig,

    #[serde(default)]
    pub extraction: ExtractionConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub mode: RunMode,
}

/// The remote portal: where links are listed and how the challenge form looks
#[derive(Debug, Clone, Deserialize)]
pub struct PortalConfig {
    /// Prefix applied to relative links found on listing pages
    #[serde(default)]
    pub base_url: String,

    /// Pages crawled for resource links
    #[serde(default)]
    pub listing_pages: Vec<String>,

    /// Only links ending with this suffix are kept. Empty keeps everything.
    #[serde(default)]
    pub link_suffix: String,

    #[serde(default = "default_challenge_element_id")]
    pub challenge_element_id: String,

    #[serde(default = "default_answer_input_id")]
    pub answer_input_id: String,

    #[serde(default = "default_submit_button_id")]
    pub submit_button_id: String,

    /// Time given to a listing page to finish rendering before links are read
    #[serde(default = "default_listing_settle_secs")]
    pub listing_settle_secs: u64,
}

impl PortalConfig {
    pub fn listing_settle(&self) -> Duration {
        Duration::from_secs(self.listing_settle_secs)
    }
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            listing_pages: Vec::new(),
            link_suffix: String::new(),
            challenge_element_id: default_challenge_element_id(),
            answer_input_id: default_answer_input_id(),
            submit_button_id: default_submit_button_id(),
            listing_settle_secs: default_listing_settle_secs(),
        }
    }
}

/// Headless browser configuration
#[derive(Debug, Clone, Deserialize)]
pub struct BrowserConfig {
    /// Optional path to Chrome/Chromium executable (uses system default if not set)
    #[serde(default)]
    pub chrome_path: Option<String>,

    #[serde(default = "default_headless")]
    pub headless: bool,

    #[serde(default = "default_window_width")]
    pub window_width: u32,

    #[serde(default = "default_window_height")]
    pub window_height: u32,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            chrome_path: None,
            headless: default_headless(),
            window_width: default_window_width(),
            window_height: default_window_height(),
        }
    }
}

/// Gated fetch configuration
#[derive(Debug, Clone, Deserialize)]
pub struct FetchConfig {
    /// Attempts per link per pass
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the second attempt in seconds
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,

    /// Multiplier applied to the delay for each further attempt
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    #[serde(default = "default_max_retry_delay_secs")]
    pub max_retry_delay_secs: u64,

    /// Unconditional wait after submitting an answer. The portal gives no
    /// completion signal, so this is a tuned guess.
    #[serde(default = "default_settle_secs")]
    pub settle_secs: u64,

    #[serde(default = "default_element_timeout_secs")]
    pub element_timeout_secs: u64,

    /// Concurrent fetch workers, each with its own browser session
    #[serde(default = "default_max_parallel_fetches")]
    pub max_parallel_fetches: usize,

    /// Extension of a completed payload file (partial downloads are ignored)
    #[serde(default = "default_payload_extension")]
    pub payload_extension: String,

    /// Keep the challenge capture of failed attempts for inspection
    #[serde(default)]
    pub keep_failed_challenges: bool,
}

impl FetchConfig {
    pub fn settle(&self) -> Duration {
        Duration::from_secs(self.settle_secs)
    }

    pub fn element_timeout(&self) -> Duration {
        Duration::from_secs(self.element_timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            delay: Duration::from_secs(self.retry_delay_secs),
            backoff_multiplier: self.backoff_multiplier,
            max_delay: Duration::from_secs(self.max_retry_delay_secs),
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_delay_secs: default_retry_delay_secs(),
            backoff_multiplier: default_backoff_multiplier(),
            max_retry_delay_secs: default_max_retry_delay_secs(),
            settle_secs: default_settle_secs(),
            element_timeout_secs: default_element_timeout_secs(),
            max_parallel_fetches: default_max_parallel_fetches(),
            payload_extension: default_payload_extension(),
            keep_failed_challenges: false,
        }
    }
}

/// Challenge solving configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ChallengeConfig {
    /// Answers shorter than this are treated as implausible
    #[serde(default = "default_min_answer_len")]
    pub min_answer_len: usize,

    /// Language hint for challenge recognition. None uses the engine default.
    #[serde(default)]
    pub language: Option<String>,
}

impl Default for ChallengeConfig {
    fn default() -> Self {
        Self {
            min_answer_len: default_min_answer_len(),
            language: None,
        }
    }
}

/// Recognition engine binding
#[derive(Debug, Clone, Deserialize)]
pub struct RecognitionConfig {
    #[serde(default = "default_tesseract_cmd")]
    pub tesseract_cmd: String,

    /// Exported as TESSDATA_PREFIX for the engine when set
    #[serde(default)]
    pub tessdata_prefix: Option<PathBuf>,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            tesseract_cmd: default_tesseract_cmd(),
            tessdata_prefix: None,
        }
    }
}

/// Document extraction configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ExtractionConfig {
    /// Literal terms searched for, matched case-sensitively without normalization
    #[serde(default)]
    pub terms: Vec<String>,

    #[serde(default = "default_extraction_language")]
    pub language: String,

    #[serde(default = "default_dpi")]
    pub dpi: u32,

    #[serde(default = "default_workers")]
    pub workers: usize,

    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            terms: Vec::new(),
            language: default_extraction_language(),
            dpi: default_dpi(),
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

/// Working directories and output files
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_downloads_dir")]
    pub downloads_dir: PathBuf,

    #[serde(default = "default_page_images_dir")]
    pub page_images_dir: PathBuf,

    #[serde(default = "default_challenges_dir")]
    pub challenges_dir: PathBuf,

    #[serde(default = "default_results_dir")]
    pub results_dir: PathBuf,

    #[serde(default = "default_failure_report")]
    pub failure_report: PathBuf,

    #[serde(default = "default_summary_file")]
    pub summary_file: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            downloads_dir: default_downloads_dir(),
            page_images_dir: default_page_images_dir(),
            challenges_dir: default_challenges_dir(),
            results_dir: default_results_dir(),
            failure_report: default_failure_report(),
            summary_file: default_summary_file(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingConfig {
    /// Optional log file written alongside console output
    #[serde(default)]
    pub file: Option<PathBuf>,
}

// ==================== Default Value Functions ====================

fn default_challenge_element_id() -> String {
    "Image2".to_string()
}

fn default_answer_input_id() -> String {
    "txt_Vcode".to_string()
}

fn default_submit_button_id() -> String {
    "btn_Login".to_string()
}

fn default_listing_settle_secs() -> u64 {
    5
}

fn default_headless() -> bool {
    true
}

fn default_window_width() -> u32 {
    1920
}

fn default_window_height() -> u32 {
    1080
}

fn default_max_attempts() -> u32 {
    5
}

fn default_retry_delay_secs() -> u64 {
    5
}

fn default_backoff_multiplier() -> f64 {
    1.0
}

fn default_max_retry_delay_secs() -> u64 {
    60
}

fn default_settle_secs() -> u64 {
    10
}

fn default_element_timeout_secs() -> u64 {
    10
}

fn default_max_parallel_fetches() -> usize {
    1
}

fn default_payload_extension() -> String {
    "pdf".to_string()
}

fn default_min_answer_len() -> usize {
    6
}

fn default_tesseract_cmd() -> String {
    "tesseract".to_string()
}

fn default_extraction_language() -> String {
    "tam".to_string()
}

fn default_dpi() -> u32 {
    300
}

fn default_workers() -> usize {
    2
}

fn default_queue_capacity() -> usize {
    64
}

fn default_downloads_dir() -> PathBuf {
    PathBuf::from("./downloads")
}

fn default_page_images_dir() -> PathBuf {
    PathBuf::from("./pdf_images")
}

fn default_challenges_dir() -> PathBuf {
    PathBuf::from("./captchas")
}

fn default_results_dir() -> PathBuf {
    PathBuf::from("./search_results")
}

fn default_failure_report() -> PathBuf {
    PathBuf::from("./failed_urls.txt")
}

fn default_summary_file() -> PathBuf {
    PathBuf::from("./summary.json")
}
