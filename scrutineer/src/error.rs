use std::path::PathBuf;

use thiserror::Error;

/// Main pipeline error type
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Configuration error")]
    Config(#[from] ConfigError),

    #[error("Gated fetch failed")]
    Fetch(#[from] FetchError),

    #[error("Recognition failed")]
    Recognition(#[from] RecognitionError),

    #[error("Document extraction failed")]
    Extraction(#[from] ExtractionError),

    #[error("IO error")]
    Io(#[from] std::io::Error),
}

/// Startup configuration errors. These are always fatal.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {message}")]
    Load { message: String },

    #[error("Invalid setting {key}: {message}")]
    Invalid { key: &'static str, message: String },

    #[error("Directory {path} is not writable")]
    UnwritableDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Collaborator unavailable: {name}")]
    MissingCollaborator {
        name: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// Errors raised during a single gated-fetch attempt or link discovery
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Failed to launch browser: {0}")]
    BrowserLaunch(String),

    #[error("Navigation to {url} failed: {message}")]
    Navigation { url: String, message: String },

    #[error("Element #{element_id} not found within {timeout_secs}s")]
    ElementTimeout {
        element_id: String,
        timeout_secs: u64,
    },

    #[error("Browser command on #{element_id} failed: {message}")]
    Element { element_id: String, message: String },

    #[error("Challenge capture could not be decoded")]
    ChallengeDecode(#[source] image::ImageError),

    #[error("Challenge recognition produced an empty answer")]
    EmptyAnswer,

    #[error("No new payload appeared in {dir}")]
    PayloadMissing { dir: PathBuf },

    #[error("Unexpected dialog: {message}")]
    UnexpectedDialog { message: String },

    #[error("Challenge recognition failed")]
    Recognition(#[from] RecognitionError),

    #[error("IO error")]
    Io(#[from] std::io::Error),
}

impl FetchError {
    /// The attempt was ended by an alert the page raised
    pub fn is_dialog(&self) -> bool {
        matches!(self, FetchError::UnexpectedDialog { .. })
    }

    /// Short label used as a structured log field
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::BrowserLaunch(_) => "browser_launch",
            FetchError::Navigation { .. } => "navigation",
            FetchError::ElementTimeout { .. } | FetchError::Element { .. } => "element",
            FetchError::ChallengeDecode(_)
            | FetchError::EmptyAnswer
            | FetchError::PayloadMissing { .. }
            | FetchError::Recognition(_) => "challenge",
            FetchError::UnexpectedDialog { .. } => "dialog",
            FetchError::Io(_) => "io",
        }
    }
}

/// Recognition engine errors
#[derive(Error, Debug)]
pub enum RecognitionError {
    #[error("Failed to run recognition engine {command}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Recognition engine exited with {status}: {stderr}")]
    Engine { status: String, stderr: String },

    #[error("Failed to encode image for recognition")]
    Encode(#[source] image::ImageError),

    #[error("Malformed box line: {line}")]
    MalformedBox { line: String },

    #[error("IO error")]
    Io(#[from] std::io::Error),
}

/// Per-document extraction errors. Never fatal to the worker pool.
#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("Failed to load document {path}: {message}")]
    Load { path: PathBuf, message: String },

    #[error("Failed to render page {page}: {message}")]
    Render { page: u32, message: String },

    #[error("Recognition failed on page {page}")]
    Recognition {
        page: u32,
        #[source]
        source: RecognitionError,
    },

    #[error("Failed to write artifact {path}")]
    Artifact {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("IO error")]
    Io(#[from] std::io::Error),
}

/// Result type alias for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Render an error followed by its `source()` chain, separated by `: `.
pub fn format_error_chain_ref(error: &(dyn std::error::Error + 'static)) -> String {
    let mut rendered = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        rendered.push_str(": ");
        rendered.push_str(&cause.to_string());
        source = cause.source();
    }
    rendered
}
