use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::EditError;
use crate::models::{Event, PendingAnalysis, SkipRecord};
use crate::normalize::normalize_url;

const EVENTS_FILE: &str = "events.json";
const SKIPPED_FILE: &str = "skipped_urls.json";
const PENDING_FILE: &str = "pending_analyses.json";

/// URL-keyed local cache with three partitions, each persisted as a whole
/// JSON file after every mutation. Single writer per session; two processes
/// writing the same partition race and the last write wins.
pub struct LocalCache {
    dir: PathBuf,
    events: BTreeMap<String, Event>,
    skipped: BTreeMap<String, SkipRecord>,
    pending: BTreeMap<String, PendingAnalysis>,
}

impl LocalCache {
    pub fn open(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create cache directory: {}", dir.display()))?;
        Ok(Self {
            dir: dir.to_path_buf(),
            events: load_partition(&dir.join(EVENTS_FILE)),
            skipped: load_partition(&dir.join(SKIPPED_FILE)),
            pending: load_partition(&dir.join(PENDING_FILE)),
        })
    }

    // --- Events ---

    pub fn get(&self, url: &str) -> Option<&Event> {
        self.events.get(&normalize_url(url))
    }

    pub fn put(&mut self, url: &str, mut event: Event) -> Result<()> {
        let key = normalize_url(url);
        event.url = key.clone();
        event.retain_named_people();
        self.events.insert(key, event);
        self.persist_events()
    }

    pub fn delete(&mut self, url: &str) -> Result<bool> {
        let removed = self.events.remove(&normalize_url(url)).is_some();
        if removed {
            self.persist_events()?;
        }
        Ok(removed)
    }

    /// Cached events, most recently analyzed first.
    pub fn list_events(&self) -> Vec<&Event> {
        let mut events: Vec<&Event> = self.events.values().collect();
        events.sort_by(|a, b| b.analyzed_at.cmp(&a.analyzed_at));
        events
    }

    pub fn touch_viewed(&mut self, url: &str) -> Result<()> {
        let key = normalize_url(url);
        if let Some(event) = self.events.get_mut(&key) {
            event.last_viewed_at = Some(Utc::now().to_rfc3339());
            self.persist_events()?;
        }
        Ok(())
    }

    /// Replace a cached event with a hand-edited JSON document. The edit is
    /// validated first; on any failure the cached value is left untouched.
    pub fn apply_edit(&mut self, url: &str, raw: &str) -> Result<Event, EditError> {
        let key = normalize_url(url);
        let previous = self
            .events
            .get(&key)
            .ok_or_else(|| EditError::NotCached(key.clone()))?;

        let mut edited: Event =
            serde_json::from_str(raw).map_err(|e| EditError::InvalidJson(e.to_string()))?;
        if edited.name.trim().is_empty() {
            return Err(EditError::MissingName);
        }

        edited.url = key.clone();
        if edited.display_url.is_empty() {
            edited.display_url = previous.display_url.clone();
        }
        if edited.analyzed_at.is_empty() {
            edited.analyzed_at = previous.analyzed_at.clone();
        }
        edited.retain_named_people();

        let prior = self.events.insert(key.clone(), edited.clone());
        if let Err(e) = self.persist_events() {
            // keep memory and disk in agreement
            if let Some(prior) = prior {
                self.events.insert(key, prior);
            }
            return Err(EditError::Persist(format!("{:#}", e)));
        }
        Ok(edited)
    }

    // --- Skipped URLs ---

    #[cfg(test)]
    pub fn is_skipped(&self, url: &str) -> bool {
        self.skipped.contains_key(&normalize_url(url))
    }

    pub fn skip_record(&self, url: &str) -> Option<&SkipRecord> {
        self.skipped.get(&normalize_url(url))
    }

    pub fn mark_skipped(&mut self, url: &str, reason: &str) -> Result<()> {
        let key = normalize_url(url);
        self.skipped.insert(
            key.clone(),
            SkipRecord {
                url: key,
                reason: reason.to_string(),
                skipped_at: Utc::now().to_rfc3339(),
            },
        );
        self.persist_skipped()
    }

    pub fn unskip(&mut self, url: &str) -> Result<bool> {
        let removed = self.skipped.remove(&normalize_url(url)).is_some();
        if removed {
            self.persist_skipped()?;
        }
        Ok(removed)
    }

    // --- Pending analyses ---

    #[cfg(test)]
    pub fn is_pending(&self, url: &str) -> bool {
        self.pending.contains_key(&normalize_url(url))
    }

    pub fn mark_pending(&mut self, url: &str, display_url: &str, title: Option<&str>) -> Result<()> {
        let key = normalize_url(url);
        self.pending.insert(
            key.clone(),
            PendingAnalysis {
                url: key,
                display_url: display_url.to_string(),
                title: title.map(str::to_string),
                started_at: Utc::now().to_rfc3339(),
            },
        );
        self.persist_pending()
    }

    pub fn clear_pending(&mut self, url: &str) -> Result<()> {
        if self.pending.remove(&normalize_url(url)).is_some() {
            self.persist_pending()?;
        }
        Ok(())
    }

    pub fn list_pending(&self) -> Vec<&PendingAnalysis> {
        self.pending.values().collect()
    }

    /// Drop markers older than `ttl`, left behind by runs that never resolved.
    pub fn prune_stale_pending(&mut self, ttl: Duration) -> Result<usize> {
        // a ttl reaching past the earliest representable time keeps everything
        let Some(cutoff) = Utc::now().checked_sub_signed(ttl) else {
            return Ok(0);
        };
        let before = self.pending.len();
        self.pending.retain(|_, marker| {
            match DateTime::parse_from_rfc3339(&marker.started_at) {
                Ok(started) => started.with_timezone(&Utc) > cutoff,
                Err(_) => false,
            }
        });
        let pruned = before - self.pending.len();
        if pruned > 0 {
            debug!(pruned, "Pruned stale pending markers");
            self.persist_pending()?;
        }
        Ok(pruned)
    }

    // --- Persistence ---

    fn persist_events(&self) -> Result<()> {
        write_partition(&self.dir.join(EVENTS_FILE), &self.events)
    }

    fn persist_skipped(&self) -> Result<()> {
        write_partition(&self.dir.join(SKIPPED_FILE), &self.skipped)
    }

    fn persist_pending(&self) -> Result<()> {
        write_partition(&self.dir.join(PENDING_FILE), &self.pending)
    }
}

fn load_partition<T: DeserializeOwned>(path: &Path) -> BTreeMap<String, T> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(_) => return BTreeMap::new(),
    };
    match serde_json::from_str(&raw) {
        Ok(map) => map,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Unreadable cache partition, starting empty");
            BTreeMap::new()
        }
    }
}

fn write_partition<T: Serialize>(path: &Path, partition: &BTreeMap<String, T>) -> Result<()> {
    let json = serde_json::to_string_pretty(partition).context("Failed to serialize cache partition")?;
    // write-then-rename so a crash mid-write leaves the previous file intact
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json).with_context(|| format!("Failed to write {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}
