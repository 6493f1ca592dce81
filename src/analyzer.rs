use tracing::{debug, info};

use crate::ai::{AIProvider, extract_json};
use crate::error::AnalyzeError;
use crate::models::{AnalysisPayload, Precheck};
use crate::page::PageContext;

/// Turns page text into event intelligence. Two modes: a cheap pre-check
/// classification and the full analysis.
pub trait Analyzer {
    fn precheck(&self, page: &PageContext, user_context: Option<&str>) -> Result<Precheck, AnalyzeError>;
    fn analyze(&self, page: &PageContext, user_context: Option<&str>) -> Result<AnalysisPayload, AnalyzeError>;
}

const SYSTEM_PROMPT: &str = "You extract structured intelligence about professional events \
(conferences, meetups, trade shows, webinars) from web pages. Reply with a single JSON object \
and nothing else.";

/// Pre-check prompts only need the top of the page.
const PRECHECK_CHARS: usize = 4_000;

pub struct AiAnalyzer {
    provider: Box<dyn AIProvider>,
}

impl AiAnalyzer {
    pub fn new(provider: Box<dyn AIProvider>) -> Self {
        Self { provider }
    }
}

impl Analyzer for AiAnalyzer {
    fn precheck(&self, page: &PageContext, user_context: Option<&str>) -> Result<Precheck, AnalyzeError> {
        let prompt = precheck_prompt(page, user_context);
        debug!(url = %page.url, model = self.provider.model_name(), "Pre-check");
        let reply = self.provider.complete(SYSTEM_PROMPT, &prompt, 300)?;
        parse_reply(&reply)
    }

    fn analyze(&self, page: &PageContext, user_context: Option<&str>) -> Result<AnalysisPayload, AnalyzeError> {
        let prompt = analysis_prompt(page, user_context);
        info!(url = %page.url, model = self.provider.model_name(), "Full analysis");
        let reply = self.provider.complete(SYSTEM_PROMPT, &prompt, 8192)?;
        let payload: AnalysisPayload = parse_reply(&reply)?;
        if payload.name.trim().is_empty() {
            return Err(AnalyzeError::Unparseable("analysis has no event name".to_string()));
        }
        Ok(payload)
    }
}

fn parse_reply<T: serde::de::DeserializeOwned>(reply: &str) -> Result<T, AnalyzeError> {
    let json = extract_json(reply)
        .ok_or_else(|| AnalyzeError::Unparseable("no JSON object in response".to_string()))?;
    serde_json::from_str(json).map_err(|e| AnalyzeError::Unparseable(e.to_string()))
}

fn page_header(page: &PageContext) -> String {
    format!(
        "URL: {}\nTitle: {}\n",
        page.display_url,
        page.title.as_deref().unwrap_or("(none)")
    )
}

fn precheck_prompt(page: &PageContext, user_context: Option<&str>) -> String {
    let excerpt: String = page.text.chars().take(PRECHECK_CHARS).collect();
    let context = user_context
        .map(|c| format!("The reader is interested in: {}\n", c))
        .unwrap_or_default();
    format!(
        "Decide whether this page describes one specific event with a date and attendees.\n\
         Listings of many events, blog posts, product pages and job ads are NOT events.\n\
         {context}\
         Return: {{\"is_event\": true|false, \"confidence\": \"high\"|\"medium\"|\"low\", \"reason\": \"...\"}}\n\n\
         {header}\nPage text:\n{excerpt}",
        header = page_header(page),
    )
}

fn analysis_prompt(page: &PageContext, user_context: Option<&str>) -> String {
    let context = user_context
        .map(|c| format!("Tailor personas, messages and actions to this reader: {}\n", c))
        .unwrap_or_default();
    format!(
        "Analyze this event page. {context}\
         Return JSON with these keys (omit unknown values, never invent people):\n\
         name, date (as printed), start_date and end_date (YYYY-MM-DD), location, description,\n\
         estimated_attendees (integer),\n\
         people: [{{name, role, title, company, persona, linkedin, connection_message, ice_breaker}}],\n\
         sponsors: [{{name, tier}}],\n\
         expected_personas: [{{persona, likelihood, expected_count, outreach_message, ice_breaker,\n\
           conversation_starters: [], keywords: [], pain_points: []}}],\n\
         next_best_actions: [{{priority, action, rationale}}],\n\
         related_events: [{{name, url, date, relevance}}]\n\n\
         {header}\nPage text:\n{text}",
        header = page_header(page),
        text = page.text,
    )
}
