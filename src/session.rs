use anyhow::{Context, Result};
use std::path::Path;
use tracing::{debug, info, warn};

use crate::ai::{create_provider, resolve_model};
use crate::analyzer::{AiAnalyzer, Analyzer};
use crate::cache::LocalCache;
use crate::config::Config;
use crate::db::Database;
use crate::extract::sync_event_and_companies;
use crate::gate::{Gate, Mode, Outcome, known_outcome};
use crate::insights::AiInsights;
use crate::models::Event;
use crate::page::{self, PageContext};

/// How mirroring a fresh analysis to the event store went.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncStatus {
    NotAttempted,
    StoreNotInitialized,
    Synced { event_id: i64, companies: usize },
    Failed(String),
}

#[derive(Debug)]
pub struct Capture {
    pub outcome: Outcome,
    pub sync: SyncStatus,
}

/// Everything one run works with, built once at start-up and passed down.
pub struct Session {
    pub config: Config,
    pub cache: LocalCache,
    pub db: Database,
}

impl Session {
    pub fn open(config: Config) -> Result<Self> {
        let mut cache = LocalCache::open(&config.data_dir)?;
        let pruned = cache.prune_stale_pending(config.pending_ttl)?;
        debug!(pruned, dir = %config.data_dir.display(), "Session opened");
        let db = Database::open(&config.db_path())?;
        Ok(Self { config, cache, db })
    }

    pub fn analyzer(&self) -> Result<AiAnalyzer> {
        let spec = resolve_model(&self.config.model)?;
        Ok(AiAnalyzer::new(create_provider(&spec)?))
    }

    pub fn insights(&self) -> Result<AiInsights> {
        let spec = resolve_model(&self.config.model)?;
        Ok(AiInsights::new(create_provider(&spec)?))
    }

    /// Drive one page through the gate.
    ///
    /// In visit mode a skipped or cached page is answered from the local
    /// cache alone: `prepare`, which loads the page and builds the analyzer,
    /// only runs when analysis may be needed. A fresh analysis is mirrored to
    /// the event store once it has been initialized. A failed mirror is
    /// reported in the returned status and the cached copy stays.
    pub fn capture<F>(&mut self, raw_url: &str, mode: Mode, user_context: Option<String>, prepare: F) -> Result<Capture>
    where
        F: FnOnce(&Session) -> Result<(PageContext, Box<dyn Analyzer>)>,
    {
        if mode == Mode::Visit {
            if let Some(outcome) = known_outcome(&mut self.cache, raw_url) {
                return Ok(Capture { outcome, sync: SyncStatus::NotAttempted });
            }
        }

        let (page, analyzer) = prepare(self)?;
        let outcome = {
            let mut gate = Gate::new(&mut self.cache, &*analyzer, user_context);
            let outcome = gate.run(&page, mode);
            debug!(url = %page.url, state = ?gate.state(), "Gate settled");
            outcome
        };

        let sync = match &outcome {
            Outcome::Cached { event, fresh: true } => self.mirror(event),
            _ => SyncStatus::NotAttempted,
        };
        Ok(Capture { outcome, sync })
    }

    fn mirror(&self, event: &Event) -> SyncStatus {
        if self.db.ensure_initialized().is_err() {
            return SyncStatus::StoreNotInitialized;
        }
        match sync_event_and_companies(&self.db, &self.config.user_id, event) {
            Ok((event_id, companies)) => {
                info!(event_id, companies, "Event synced");
                SyncStatus::Synced { event_id, companies }
            }
            Err(e) => {
                warn!(url = %event.url, error = %format!("{:#}", e), "Sync failed; cached copy kept");
                SyncStatus::Failed(format!("{:#}", e))
            }
        }
    }

    /// Page content from an HTML file, a plain-text file, or the live URL.
    pub fn page(&self, url: &str, html: Option<&Path>, text: Option<&Path>, title: Option<String>) -> Result<PageContext> {
        let max = self.config.max_page_chars;
        match (html, text) {
            (Some(path), _) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read HTML file: {}", path.display()))?;
                let mut page = PageContext::from_html(url, &raw, max);
                if title.is_some() {
                    page.title = title;
                }
                Ok(page)
            }
            (None, Some(path)) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read text file: {}", path.display()))?;
                Ok(PageContext::from_text(url, title, &raw, max))
            }
            (None, None) => {
                let mut page = page::fetch(url, max)?;
                if title.is_some() {
                    page.title = title;
                }
                Ok(page)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AnalyzeError;
    use crate::models::{AnalysisPayload, Confidence, Person, Precheck};
    use anyhow::anyhow;
    use tempfile::TempDir;

    struct OkAnalyzer;

    impl Analyzer for OkAnalyzer {
        fn precheck(&self, _page: &PageContext, _ctx: Option<&str>) -> Result<Precheck, AnalyzeError> {
            Ok(Precheck { is_event: true, confidence: Confidence::High, reason: None })
        }

        fn analyze(&self, _page: &PageContext, _ctx: Option<&str>) -> Result<AnalysisPayload, AnalyzeError> {
            Ok(AnalysisPayload {
                name: "Rust Summit".to_string(),
                people: vec![Person { name: "Jo".to_string(), company: Some("Acme".to_string()), ..Default::default() }],
                ..Default::default()
            })
        }
    }

    fn offline(_: &Session) -> Result<(PageContext, Box<dyn Analyzer>)> {
        Err(anyhow!("page and analyzer must not be needed"))
    }

    fn from_text(_: &Session) -> Result<(PageContext, Box<dyn Analyzer>)> {
        let page = PageContext::from_text("https://x.com/e", None, "Rust Summit, June 3", 1000);
        Ok((page, Box::new(OkAnalyzer)))
    }

    fn session(dir: &TempDir) -> Session {
        Session::open(Config::in_dir(dir.path())).unwrap()
    }

    #[test]
    fn test_cached_visit_works_offline() {
        let dir = TempDir::new().unwrap();
        let mut session = session(&dir);
        session.capture("https://x.com/e", Mode::Visit, None, from_text).unwrap();

        let capture = session.capture("https://x.com/e?ref=2", Mode::Visit, None, offline).unwrap();
        assert!(matches!(capture.outcome, Outcome::Cached { fresh: false, .. }));
        assert_eq!(capture.sync, SyncStatus::NotAttempted);
    }

    #[test]
    fn test_skipped_visit_works_offline() {
        let dir = TempDir::new().unwrap();
        let mut session = session(&dir);
        session.cache.mark_skipped("https://x.com/blog", "blog post").unwrap();

        let capture = session.capture("https://x.com/blog", Mode::Visit, None, offline).unwrap();
        assert!(matches!(capture.outcome, Outcome::Skipped { .. }));
    }

    #[test]
    fn test_uncached_visit_surfaces_prepare_error() {
        let dir = TempDir::new().unwrap();
        let mut session = session(&dir);
        assert!(session.capture("https://x.com/e", Mode::Visit, None, offline).is_err());
    }

    #[test]
    fn test_fresh_analysis_is_mirrored_when_store_ready() {
        let dir = TempDir::new().unwrap();
        let mut session = session(&dir);

        let capture = session.capture("https://x.com/e", Mode::Visit, None, from_text).unwrap();
        assert_eq!(capture.sync, SyncStatus::StoreNotInitialized);

        session.db.init().unwrap();
        let capture = session.capture("https://x.com/e", Mode::Reanalyze, None, from_text).unwrap();
        assert!(matches!(capture.sync, SyncStatus::Synced { companies: 1, .. }));
        let synced = session.db.load_event(&session.config.user_id, "https://x.com/e").unwrap();
        assert_eq!(synced.unwrap().name, "Rust Summit");
    }

    #[test]
    fn test_sync_failure_keeps_cached_copy() {
        let dir = TempDir::new().unwrap();
        let mut session = session(&dir);
        session.db.init().unwrap();
        session.db.conn_for_tests().execute_batch("DROP TABLE event_actions;").unwrap();

        let capture = session.capture("https://x.com/e", Mode::Visit, None, from_text).unwrap();
        assert!(matches!(capture.outcome, Outcome::Cached { fresh: true, .. }));
        match capture.sync {
            SyncStatus::Failed(message) => assert!(message.contains("event_actions")),
            other => panic!("unexpected sync status: {:?}", other),
        }
        assert_eq!(session.cache.get("https://x.com/e").unwrap().name, "Rust Summit");
    }

    #[test]
    fn test_open_creates_store_files_lazily() {
        let dir = TempDir::new().unwrap();
        let session = Session::open(Config::in_dir(dir.path())).unwrap();
        assert!(session.db.ensure_initialized().is_err());
        assert!(session.cache.list_events().is_empty());
        assert_eq!(session.db.path(), &dir.path().join("eventscope.db"));
    }

    #[test]
    fn test_page_from_html_file_with_title_override() {
        let dir = TempDir::new().unwrap();
        let html = dir.path().join("page.html");
        std::fs::write(&html, "<html><head><title>Old</title></head><body>Hello</body></html>").unwrap();

        let session = Session::open(Config::in_dir(dir.path())).unwrap();
        let page = session
            .page("https://x.com/e?x=1", Some(&html), None, Some("New".to_string()))
            .unwrap();
        assert_eq!(page.url, "x.com/e");
        assert_eq!(page.title.as_deref(), Some("New"));
        assert_eq!(page.text, "Hello");
    }
}
