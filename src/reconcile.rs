//! Idempotent publishing of the daily discussion.
//!
//! For a date `D` there is at most one thread titled [`thread_title`]`(D)`
//! and, inside it, at most one section per list type carrying
//! [`list_marker`]`(type, D)`. Every run finds or creates the thread and then
//! rewrites both sections in place, so re-running a day converges on the same
//! remote state instead of piling up duplicates.
//!
//! Lookups only scan bounded windows ([`THREAD_SEARCH_WINDOW`] most recent
//! threads, [`SECTION_SEARCH_WINDOW`] first sections). A thread or section
//! that has fallen outside its window is not found and gets created again.

use crate::error::Result;
use crate::models::{Record, RunStats, SourceGroup};
use crate::outputs::markdown::{list_marker, list_section_body, thread_body, thread_title};
use chrono::NaiveDate;
use tracing::{info, instrument};

/// How many recent threads are searched by title.
pub const THREAD_SEARCH_WINDOW: usize = 50;
/// How many sections of a thread are searched for a marker.
pub const SECTION_SEARCH_WINDOW: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Thread {
    pub id: String,
    pub number: u64,
    pub url: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub id: String,
    pub body: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionOutcome {
    Created,
    Updated,
}

/// Remote holding threads and their sections.
pub trait DiscussionApi {
    /// Most recent threads first, at most `limit`.
    async fn recent_threads(&self, limit: usize) -> Result<Vec<Thread>>;
    async fn create_thread(&self, title: &str, body: &str) -> Result<Thread>;
    /// Oldest sections first, at most `limit`.
    async fn list_sections(&self, thread_id: &str, limit: usize) -> Result<Vec<Section>>;
    /// Returns the id of the new section.
    async fn create_section(&self, thread_id: &str, body: &str) -> Result<String>;
    async fn update_section(&self, section_id: &str, body: &str) -> Result<()>;
}

pub struct Reconciler<'a, A> {
    api: &'a A,
}

impl<'a, A: DiscussionApi> Reconciler<'a, A> {
    pub fn new(api: &'a A) -> Self {
        Self { api }
    }

    /// Exact title match among the recent threads.
    pub async fn find_thread(&self, title: &str) -> Result<Option<Thread>> {
        let threads = self.api.recent_threads(THREAD_SEARCH_WINDOW).await?;
        Ok(threads.into_iter().find(|t| t.title == title))
    }

    /// Find the thread for `date`, creating it with the run summary if absent.
    #[instrument(level = "info", skip_all, fields(date = %date))]
    pub async fn ensure_thread(&self, date: NaiveDate, stats: &RunStats) -> Result<Thread> {
        let title = thread_title(date);
        if let Some(thread) = self.find_thread(&title).await? {
            info!(url = %thread.url, "Found existing discussion");
            return Ok(thread);
        }

        info!("Creating new discussion");
        let thread = self.api.create_thread(&title, &thread_body(date, stats)).await?;
        info!(url = %thread.url, number = thread.number, "Created discussion");
        Ok(thread)
    }

    /// First section in the window whose body contains `marker`.
    pub async fn find_section(&self, thread_id: &str, marker: &str) -> Result<Option<Section>> {
        let sections = self.api.list_sections(thread_id, SECTION_SEARCH_WINDOW).await?;
        Ok(sections.into_iter().find(|s| s.body.contains(marker)))
    }

    /// Rewrite the section carrying `marker`, or create it.
    pub async fn upsert_section(&self, thread_id: &str, marker: &str, body: &str) -> Result<SectionOutcome> {
        match self.find_section(thread_id, marker).await? {
            Some(existing) => {
                self.api.update_section(&existing.id, body).await?;
                Ok(SectionOutcome::Updated)
            }
            None => {
                self.api.create_section(thread_id, body).await?;
                Ok(SectionOutcome::Created)
            }
        }
    }

    /// Ensure the thread, then upsert the HIGH and TREND sections in that
    /// order. Stops at the first remote failure.
    #[instrument(level = "info", skip_all, fields(date = %date, high = high.len(), trend = trend.len()))]
    pub async fn publish(
        &self,
        date: NaiveDate,
        stats: &RunStats,
        high: &[Record],
        trend: &[Record],
    ) -> Result<Thread> {
        let thread = self.ensure_thread(date, stats).await?;

        for (group, records) in SourceGroup::ALL.into_iter().zip([high, trend]) {
            let marker = list_marker(group, date);
            let body = list_section_body(group, date, records);
            let outcome = self.upsert_section(&thread.id, &marker, &body).await?;
            info!(list = group.list_type(), ?outcome, "List section published");
        }

        Ok(thread)
    }
}
