//! Inbound collaborators: feed collection and article text extraction.
//!
//! # Submodules
//!
//! | Module | Trait | Concrete type | Source |
//! |--------|-------|---------------|--------|
//! | [`feeds`] | [`feeds::FeedSource`] | [`feeds::RssFeedSource`] | RSS/Atom lists in `config/sources_*.yaml` |
//! | [`content`] | [`content::ContentFetcher`] | [`content::HtmlContentFetcher`] | Article HTML |
//!
//! Both follow the same failure rule: a problem with one feed or one page
//! is logged and skipped, never propagated to the whole group.

pub mod content;
pub mod feeds;
