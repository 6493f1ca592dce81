use anyhow::Result;
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::analyzer::Analyzer;
use crate::cache::LocalCache;
use crate::models::Event;
use crate::normalize::display_url;
use crate::page::PageContext;

/// Where a page visit currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Unknown,
    Prechecking,
    Skipped,
    ReadyToAnalyze,
    Analyzing,
    Cached,
    Failed,
}

/// How a page is being driven through the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Visit,
    Reanalyze,
    Override,
}

/// Result of driving the gate for one page, handed to the renderer.
/// `display_url` is absolute so it can be passed back to the CLI.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Page was classified as not an event; the analyzer was not run.
    Skipped { url: String, display_url: String, reason: String },
    /// Event available, either from cache or from a fresh analysis.
    Cached { event: Event, fresh: bool },
    /// Another analysis of this page is already in flight.
    InProgress { url: String, started_at: String },
    Failed { url: String, display_url: String, message: String, can_override: bool },
}

/// What a visit shows without the page content or the analyzer: the skip
/// record, else the cached event. `None` means the page needs analysis.
pub fn known_outcome(cache: &mut LocalCache, raw_url: &str) -> Option<Outcome> {
    if let Some(record) = cache.skip_record(raw_url) {
        return Some(Outcome::Skipped {
            url: record.url.clone(),
            display_url: display_url(raw_url),
            reason: record.reason.clone(),
        });
    }
    let event = cache.get(raw_url).cloned()?;
    best_effort("touch last viewed", cache.touch_viewed(raw_url));
    Some(Outcome::Cached { event, fresh: false })
}

/// Per-visit state machine deciding between cached results, pre-check,
/// full analysis and skip suppression. Only the gate mutates the local cache.
pub struct Gate<'a> {
    cache: &'a mut LocalCache,
    analyzer: &'a dyn Analyzer,
    user_context: Option<String>,
    state: GateState,
    history: Vec<GateState>,
}

impl<'a> Gate<'a> {
    pub fn new(cache: &'a mut LocalCache, analyzer: &'a dyn Analyzer, user_context: Option<String>) -> Self {
        Self {
            cache,
            analyzer,
            user_context,
            state: GateState::Unknown,
            history: vec![GateState::Unknown],
        }
    }

    pub fn state(&self) -> GateState {
        self.state
    }

    #[allow(dead_code)]
    pub fn history(&self) -> &[GateState] {
        &self.history
    }

    pub fn run(&mut self, page: &PageContext, mode: Mode) -> Outcome {
        match mode {
            Mode::Visit => self.visit(page),
            Mode::Reanalyze => self.reanalyze(page),
            Mode::Override => self.override_skip(page),
        }
    }

    /// Page load: skip record, then cache, then pre-check and analysis.
    pub fn visit(&mut self, page: &PageContext) -> Outcome {
        if let Some(outcome) = known_outcome(&mut *self.cache, &page.display_url) {
            let next = match outcome {
                Outcome::Skipped { .. } => GateState::Skipped,
                _ => GateState::Cached,
            };
            self.enter(next);
            return outcome;
        }

        self.enter(GateState::Prechecking);
        let precheck = match self.analyzer.precheck(page, self.user_context.as_deref()) {
            Ok(precheck) => precheck,
            Err(e) => {
                // the override path skips the pre-check, so it is always offered here
                self.enter(GateState::Failed);
                return Outcome::Failed {
                    url: page.url.clone(),
                    display_url: page.display_url.clone(),
                    message: e.to_string(),
                    can_override: true,
                };
            }
        };

        if !precheck.should_analyze() {
            let reason = precheck.reason.clone().unwrap_or_else(|| {
                format!(
                    "Not an event (is_event: {}, confidence: {:?})",
                    precheck.is_event, precheck.confidence
                )
            });
            info!(url = %page.url, %reason, "Skipping page");
            best_effort("mark skipped", self.cache.mark_skipped(&page.url, &reason));
            self.enter(GateState::Skipped);
            return Outcome::Skipped { url: page.url.clone(), display_url: page.display_url.clone(), reason };
        }

        self.enter(GateState::ReadyToAnalyze);
        self.analyze(page)
    }

    /// Manual re-analysis of a cached or failed page. Never escapes a skip
    /// record; that takes an explicit override.
    pub fn reanalyze(&mut self, page: &PageContext) -> Outcome {
        if let Some(record) = self.cache.skip_record(&page.url) {
            let reason = record.reason.clone();
            self.enter(GateState::Skipped);
            return Outcome::Skipped { url: page.url.clone(), display_url: page.display_url.clone(), reason };
        }
        self.analyze(page)
    }

    /// User disagrees with the classification: drop the skip record and
    /// run the full analysis without a pre-check.
    pub fn override_skip(&mut self, page: &PageContext) -> Outcome {
        best_effort("clear skip record", self.cache.unskip(&page.url).map(|_| ()));
        info!(url = %page.url, "Classification overridden");
        self.analyze(page)
    }

    fn analyze(&mut self, page: &PageContext) -> Outcome {
        let in_flight = self
            .cache
            .list_pending()
            .into_iter()
            .find(|p| p.url == page.url)
            .map(|p| p.started_at.clone());
        if let Some(started_at) = in_flight {
            return Outcome::InProgress { url: page.url.clone(), started_at };
        }

        self.enter(GateState::Analyzing);
        best_effort(
            "mark pending",
            self.cache.mark_pending(&page.url, &page.display_url, page.title.as_deref()),
        );

        let result = self.analyzer.analyze(page, self.user_context.as_deref());
        best_effort("clear pending", self.cache.clear_pending(&page.url));

        match result {
            Ok(payload) => {
                let event = Event::from_payload(&page.url, &page.display_url, payload, Utc::now().to_rfc3339());
                best_effort("cache event", self.cache.put(&page.url, event.clone()));
                self.enter(GateState::Cached);
                Outcome::Cached { event, fresh: true }
            }
            Err(e) => {
                warn!(url = %page.url, error = %e, "Analysis failed");
                self.enter(GateState::Failed);
                Outcome::Failed {
                    url: page.url.clone(),
                    display_url: page.display_url.clone(),
                    message: e.to_string(),
                    can_override: e.offers_override(),
                }
            }
        }
    }

    fn enter(&mut self, next: GateState) {
        debug!(from = ?self.state, to = ?next, "Gate transition");
        self.state = next;
        self.history.push(next);
    }
}

/// Local cache failures never block the visit.
fn best_effort(what: &str, result: Result<()>) {
    if let Err(e) = result {
        warn!(error = %format!("{:#}", e), "Local cache: failed to {}", what);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AnalyzeError;
    use crate::models::{AnalysisPayload, Confidence, Person, Precheck};
    use std::cell::Cell;
    use tempfile::TempDir;

    struct FakeAnalyzer {
        precheck: Precheck,
        precheck_fails: bool,
        fail_with: Option<fn() -> AnalyzeError>,
        prechecks: Cell<usize>,
        analyses: Cell<usize>,
    }

    impl FakeAnalyzer {
        fn confident() -> Self {
            Self::with(Precheck { is_event: true, confidence: Confidence::High, reason: None })
        }

        fn unsure() -> Self {
            Self::with(Precheck {
                is_event: true,
                confidence: Confidence::Low,
                reason: Some("looks like a blog".to_string()),
            })
        }

        fn with(precheck: Precheck) -> Self {
            Self { precheck, precheck_fails: false, fail_with: None, prechecks: Cell::new(0), analyses: Cell::new(0) }
        }
    }

    impl Analyzer for FakeAnalyzer {
        fn precheck(&self, _page: &PageContext, _ctx: Option<&str>) -> Result<Precheck, AnalyzeError> {
            self.prechecks.set(self.prechecks.get() + 1);
            if self.precheck_fails {
                return Err(AnalyzeError::Provider("connection reset".to_string()));
            }
            Ok(self.precheck.clone())
        }

        fn analyze(&self, _page: &PageContext, _ctx: Option<&str>) -> Result<AnalysisPayload, AnalyzeError> {
            self.analyses.set(self.analyses.get() + 1);
            if let Some(fail) = self.fail_with {
                return Err(fail());
            }
            Ok(AnalysisPayload {
                name: "Rust Summit".to_string(),
                people: vec![
                    Person { name: "Jo".to_string(), ..Default::default() },
                    Person { name: "   ".to_string(), ..Default::default() },
                ],
                ..Default::default()
            })
        }
    }

    fn page() -> PageContext {
        PageContext::from_text("https://x.com/e?ref=1", None, "event text", 1000)
    }

    fn unparseable() -> AnalyzeError {
        AnalyzeError::Unparseable("bad json".to_string())
    }

    #[test]
    fn test_first_visit_prechecks_then_analyzes() {
        let dir = TempDir::new().unwrap();
        let mut cache = LocalCache::open(dir.path()).unwrap();
        let analyzer = FakeAnalyzer::confident();

        let mut gate = Gate::new(&mut cache, &analyzer, None);
        let outcome = gate.visit(&page());
        assert_eq!(
            gate.history(),
            &[
                GateState::Unknown,
                GateState::Prechecking,
                GateState::ReadyToAnalyze,
                GateState::Analyzing,
                GateState::Cached
            ]
        );
        match outcome {
            Outcome::Cached { event, fresh } => {
                assert!(fresh);
                assert_eq!(event.people.len(), 1);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(cache.get("https://x.com/e").is_some());
        assert!(cache.list_pending().is_empty());
    }

    #[test]
    fn test_cached_visit_skips_analyzer() {
        let dir = TempDir::new().unwrap();
        let mut cache = LocalCache::open(dir.path()).unwrap();
        let analyzer = FakeAnalyzer::confident();

        Gate::new(&mut cache, &analyzer, None).visit(&page());
        let outcome = Gate::new(&mut cache, &analyzer, None).visit(&page());

        assert!(matches!(outcome, Outcome::Cached { fresh: false, .. }));
        assert_eq!(analyzer.prechecks.get(), 1);
        assert_eq!(analyzer.analyses.get(), 1);
        assert!(cache.get("https://x.com/e").unwrap().last_viewed_at.is_some());
    }

    #[test]
    fn test_low_confidence_persists_skip_and_short_circuits() {
        let dir = TempDir::new().unwrap();
        let mut cache = LocalCache::open(dir.path()).unwrap();
        let analyzer = FakeAnalyzer::unsure();

        let outcome = Gate::new(&mut cache, &analyzer, None).visit(&page());
        assert_eq!(
            outcome,
            Outcome::Skipped {
                url: "x.com/e".to_string(),
                display_url: "https://x.com/e".to_string(),
                reason: "looks like a blog".to_string()
            }
        );

        let mut gate = Gate::new(&mut cache, &analyzer, None);
        gate.visit(&page());
        assert_eq!(gate.state(), GateState::Skipped);
        assert_eq!(analyzer.prechecks.get(), 1);
        assert_eq!(analyzer.analyses.get(), 0);
    }

    #[test]
    fn test_skip_record_blocks_full_analysis_even_without_cache() {
        let dir = TempDir::new().unwrap();
        let mut cache = LocalCache::open(dir.path()).unwrap();
        cache.mark_skipped("https://x.com/e", "manual").unwrap();
        let analyzer = FakeAnalyzer::confident();

        let mut gate = Gate::new(&mut cache, &analyzer, None);
        assert!(matches!(gate.visit(&page()), Outcome::Skipped { .. }));
        assert!(matches!(gate.reanalyze(&page()), Outcome::Skipped { .. }));
        assert_eq!(analyzer.prechecks.get(), 0);
        assert_eq!(analyzer.analyses.get(), 0);
    }

    #[test]
    fn test_override_escapes_skip() {
        let dir = TempDir::new().unwrap();
        let mut cache = LocalCache::open(dir.path()).unwrap();
        cache.mark_skipped("https://x.com/e", "manual").unwrap();
        let analyzer = FakeAnalyzer::unsure();

        let outcome = Gate::new(&mut cache, &analyzer, None).override_skip(&page());
        assert!(matches!(outcome, Outcome::Cached { fresh: true, .. }));
        assert_eq!(analyzer.prechecks.get(), 0);
        assert!(!cache.is_skipped("https://x.com/e"));
    }

    #[test]
    fn test_reanalyze_bypasses_precheck() {
        let dir = TempDir::new().unwrap();
        let mut cache = LocalCache::open(dir.path()).unwrap();
        let analyzer = FakeAnalyzer::confident();

        Gate::new(&mut cache, &analyzer, None).visit(&page());
        let outcome = Gate::new(&mut cache, &analyzer, None).reanalyze(&page());
        assert!(matches!(outcome, Outcome::Cached { fresh: true, .. }));
        assert_eq!(analyzer.prechecks.get(), 1);
        assert_eq!(analyzer.analyses.get(), 2);
    }

    #[test]
    fn test_failure_clears_pending_and_offers_override() {
        let dir = TempDir::new().unwrap();
        let mut cache = LocalCache::open(dir.path()).unwrap();
        let mut analyzer = FakeAnalyzer::confident();
        analyzer.fail_with = Some(unparseable);

        let outcome = Gate::new(&mut cache, &analyzer, None).visit(&page());
        match outcome {
            Outcome::Failed { can_override, .. } => assert!(can_override),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(cache.list_pending().is_empty());
        assert!(cache.get("https://x.com/e").is_none());
    }

    #[test]
    fn test_pending_marker_prevents_second_analysis() {
        let dir = TempDir::new().unwrap();
        let mut cache = LocalCache::open(dir.path()).unwrap();
        cache.mark_pending("https://x.com/e", "https://x.com/e", None).unwrap();
        let analyzer = FakeAnalyzer::confident();

        let outcome = Gate::new(&mut cache, &analyzer, None).reanalyze(&page());
        assert!(matches!(outcome, Outcome::InProgress { .. }));
        assert_eq!(analyzer.analyses.get(), 0);
    }

    #[test]
    fn test_precheck_error_offers_override_without_skipping() {
        let dir = TempDir::new().unwrap();
        let mut cache = LocalCache::open(dir.path()).unwrap();
        let mut analyzer = FakeAnalyzer::confident();
        analyzer.precheck_fails = true;

        let mut gate = Gate::new(&mut cache, &analyzer, None);
        let outcome = gate.visit(&page());
        assert_eq!(gate.state(), GateState::Failed);
        match outcome {
            Outcome::Failed { can_override, display_url, .. } => {
                assert!(can_override);
                assert_eq!(display_url, "https://x.com/e");
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(analyzer.analyses.get(), 0);
        assert!(cache.skip_record("https://x.com/e").is_none());
        assert!(cache.get("https://x.com/e").is_none());
    }

    #[test]
    fn test_known_outcome_needs_no_page() {
        let dir = TempDir::new().unwrap();
        let mut cache = LocalCache::open(dir.path()).unwrap();
        assert!(known_outcome(&mut cache, "https://x.com/e").is_none());

        cache.mark_skipped("https://x.com/blog", "blog post").unwrap();
        assert_eq!(
            known_outcome(&mut cache, "x.com/blog"),
            Some(Outcome::Skipped {
                url: "x.com/blog".to_string(),
                display_url: "https://x.com/blog".to_string(),
                reason: "blog post".to_string()
            })
        );

        let analyzer = FakeAnalyzer::confident();
        Gate::new(&mut cache, &analyzer, None).visit(&page());
        assert!(matches!(
            known_outcome(&mut cache, "https://x.com/e?ref=9"),
            Some(Outcome::Cached { fresh: false, .. })
        ));
    }
}
