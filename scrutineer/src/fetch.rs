//! Gated-fetch pipeline.
//!
//! [`discover_links`] crawls listing pages, the [`FetchCoordinator`] spreads
//! the links over independent browser sessions, and the [`GatedFetcher`]
//! runs the challenge protocol for each link under a [`RetryPolicy`].

pub mod coordinator;
pub mod fetcher;
pub mod links;
pub mod retry;

pub use coordinator::FetchCoordinator;
pub use fetcher::{FetchOutcome, FetchSettings, GatedFetcher};
pub use links::{ResourceLink, discover_links};
pub use retry::RetryPolicy;
