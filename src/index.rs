//! Persistent deduplication index.
//!
//! `data/index.json` maps every admitted [`ItemId`] to its first-seen
//! metadata. The whole map is loaded once at the start of a run, mutated in
//! memory by the orchestrator's commit step, and written back once at the
//! end of the run.
//!
//! A missing or unreadable index loads as empty: everything then looks new,
//! which can only produce duplicate records, never a damaged index.

use crate::identity::ItemId;
use crate::models::{IndexEntry, Record};
use std::collections::BTreeMap;
use std::error::Error;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, instrument, warn};

#[derive(Debug)]
pub struct DedupIndex {
    path: PathBuf,
    entries: BTreeMap<ItemId, IndexEntry>,
}

impl DedupIndex {
    /// An empty index that will be saved to `path`.
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: BTreeMap::new(),
        }
    }

    /// Load the index from `path`, degrading to empty on any failure.
    ///
    /// # Arguments
    ///
    /// * `path` - Location of `index.json`; also where [`Self::save`] writes
    ///
    /// # Returns
    ///
    /// The stored entries, or an empty index when the file is missing,
    /// unreadable or not valid JSON (logged at `warn`).
    #[instrument(level = "info", skip_all, fields(path = %path.as_ref().display()))]
    pub async fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let mut index = Self::empty(path);

        let raw = match fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No index file yet; starting empty");
                return index;
            }
            Err(e) => {
                warn!(error = %e, "Failed to read index, starting fresh");
                return index;
            }
        };

        match serde_json::from_str::<BTreeMap<ItemId, IndexEntry>>(&raw) {
            Ok(entries) => {
                index.entries = entries;
                info!(entries = index.entries.len(), "Loaded index");
            }
            Err(e) => warn!(error = %e, "Failed to parse index, starting fresh"),
        }
        index
    }

    pub fn contains(&self, id: &ItemId) -> bool {
        self.entries.contains_key(id)
    }

    /// Record a first sighting. Returns `false` if `id` was already present,
    /// in which case the existing entry is kept untouched.
    pub fn admit(&mut self, id: ItemId, entry: IndexEntry) -> bool {
        use std::collections::btree_map::Entry;
        match self.entries.entry(id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(entry);
                true
            }
        }
    }

    #[cfg(test)]
    pub fn get(&self, id: &ItemId) -> Option<&IndexEntry> {
        self.entries.get(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Admit every stored record the index does not know about yet.
    ///
    /// Records are appended before they are admitted, so a run that dies
    /// before its final save leaves records without index entries. Running
    /// this against recent partitions at start-up closes that gap.
    pub fn backfill<'a>(&mut self, records: impl IntoIterator<Item = &'a Record>) -> usize {
        let mut added = 0;
        for record in records {
            if self.admit(record.item_id.clone(), record.index_entry()) {
                debug!(item_id = %record.item_id, "Backfilled index entry from store");
                added += 1;
            }
        }
        if added > 0 {
            warn!(added, "Index was missing entries for stored records; backfilled");
        }
        added
    }

    /// Write the index with sorted keys, replacing the file atomically.
    #[instrument(level = "info", skip_all, fields(path = %self.path.display()))]
    pub async fn save(&self) -> Result<(), Box<dyn Error>> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }
        let mut json = serde_json::to_string_pretty(&self.entries)?;
        json.push('\n');

        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, json).await?;
        fs::rename(&tmp_path, &self.path).await?;
        info!(entries = self.entries.len(), "Index saved");
        Ok(())
    }
}
