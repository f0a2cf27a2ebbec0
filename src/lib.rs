//! Portal Gamification - points ledger, rankings and challenges
//!
//! Runs as a sidecar behind the portal gateway, which authenticates users
//! and forwards their identity in trusted headers.
//!
//! ## Architecture
//!
//! - **Ledger**: append-only points entries; totals are always sums
//! - **Ranking**: eligible users (by category settings) ordered by points
//! - **Challenges**: time-boxed tasks with quiz, text, file, QR code or
//!   no evaluation; submissions go through admin review
//! - **Comments**: two-level threads with likes on each challenge
//!
//! ## Storage Layout
//!
//! ```text
//! ~/.local/share/portal-gamification/
//! ├── gamification.db        # SQLite database
//! ├── objects/blobs/         # Content-addressed uploads
//! │   └── abcd/sha256-abcd...
//! └── config.toml            # Configuration
//! ```

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod evaluation;
pub mod http;
pub mod object_store;
pub mod services;

// Re-exports
pub use config::Config;
pub use db::Db;
pub use error::GamificationError;
pub use http::HttpServer;
pub use object_store::{BlobObjectStore, ObjectStore};
pub use services::Services;
