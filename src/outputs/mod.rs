//! Outbound surfaces for a finished run.
//!
//! # Submodules
//!
//! - [`markdown`]: thread and list-section bodies for the daily discussion
//! - [`github`]: GitHub Discussions GraphQL client behind
//!   [`crate::reconcile::DiscussionApi`]
//! - [`slack`]: Block Kit webhook notifications
//!
//! # Discussion layout
//!
//! ```text
//! [EIC][Daily] 2024-01-15 (JST)          <- thread, body = run summary
//! ├── <!-- EIC:LIST:HIGH:2024-01-15 -->   <- comment, rewritten in place
//! └── <!-- EIC:LIST:TREND:2024-01-15 -->
//! ```

pub mod github;
pub mod markdown;
pub mod slack;
