use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::ai::{AIProvider, extract_json};
use crate::models::{Company, Employee};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompanyInsight {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub industry: Option<String>,
    #[serde(default)]
    pub recent_activity: Option<String>,
}

/// Who is reaching out, and with what.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SenderContext {
    pub my_company: String,
    #[serde(default)]
    pub my_product: Option<String>,
    #[serde(default)]
    pub goal: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Objection {
    pub objection: String,
    #[serde(default)]
    pub response: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StrategyDocument {
    #[serde(default)]
    pub company: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub key_messages: Vec<String>,
    #[serde(default)]
    pub talking_points: Vec<String>,
    #[serde(default)]
    pub channels: Vec<String>,
    #[serde(default)]
    pub objections: Vec<Objection>,
    #[serde(default)]
    pub next_steps: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmailDraft {
    #[serde(default)]
    pub to_name: Option<String>,
    #[serde(default)]
    pub to_title: Option<String>,
    pub subject: String,
    pub body: String,
}

/// Source of company intelligence and outreach copy.
pub trait InsightGenerator {
    fn company_insights(&self, company: &Company) -> Result<CompanyInsight>;
    fn strategy(&self, target: &Company, sender: &SenderContext) -> Result<StrategyDocument>;
    fn email(&self, target: &Company, recipient: Option<&Employee>, sender: &SenderContext) -> Result<EmailDraft>;
}

/// Recovers structured fields from free-text replies. Only consulted when a
/// reply carries no JSON; remove once providers reliably return JSON.
pub trait LegacyTextAdapter {
    fn company_insight(&self, text: &str) -> Option<CompanyInsight>;
    fn email_draft(&self, text: &str) -> Option<(String, String)>;
}

/// Reads `KEY: value` lines, e.g. `INDUSTRY: Logistics`.
pub struct KeyLineAdapter;

impl LegacyTextAdapter for KeyLineAdapter {
    fn company_insight(&self, text: &str) -> Option<CompanyInsight> {
        let mut insight = CompanyInsight::default();
        for line in text.lines() {
            let line = line.trim().trim_start_matches(['*', '-', '#', ' ']);
            if let Some(rest) = strip_key(line, "DESCRIPTION") {
                insight.description = Some(rest);
            } else if let Some(rest) = strip_key(line, "INDUSTRY") {
                insight.industry = Some(rest);
            } else if let Some(rest) = strip_key(line, "RECENT_ACTIVITY").or_else(|| strip_key(line, "RECENT ACTIVITY")) {
                insight.recent_activity = Some(rest);
            }
        }
        if insight == CompanyInsight::default() {
            None
        } else {
            Some(insight)
        }
    }

    fn email_draft(&self, text: &str) -> Option<(String, String)> {
        let mut subject = None;
        let mut body = String::new();
        let mut in_body = false;
        for line in text.lines() {
            if in_body {
                body.push_str(line);
                body.push('\n');
                continue;
            }
            let trimmed = line.trim();
            if let Some(rest) = strip_key(trimmed, "SUBJECT") {
                subject = Some(rest);
            } else if let Some(rest) = trimmed.strip_prefix("BODY:") {
                in_body = true;
                if !rest.trim().is_empty() {
                    body.push_str(rest.trim());
                    body.push('\n');
                }
            }
        }
        let body = body.trim().to_string();
        match subject {
            Some(subject) if !body.is_empty() => Some((subject, body)),
            _ => None,
        }
    }
}

fn strip_key(line: &str, key: &str) -> Option<String> {
    let (head, rest) = line.split_once(':')?;
    if head.trim().eq_ignore_ascii_case(key) {
        let value = rest.trim();
        (!value.is_empty()).then(|| value.to_string())
    } else {
        None
    }
}

// --- Model-backed generator ---

const SYSTEM_PROMPT: &str = "You are a B2B research and outreach assistant. Be concrete and \
brief. Reply with a single JSON object and nothing else.";

pub struct AiInsights {
    provider: Box<dyn AIProvider>,
    legacy: Box<dyn LegacyTextAdapter>,
}

impl AiInsights {
    pub fn new(provider: Box<dyn AIProvider>) -> Self {
        Self { provider, legacy: Box::new(KeyLineAdapter) }
    }
}

fn company_brief(company: &Company) -> String {
    let mut brief = format!("Company: {}\n", company.name);
    if let Some(d) = &company.description {
        brief.push_str(&format!("Known description: {}\n", d));
    }
    if let Some(i) = &company.industry {
        brief.push_str(&format!("Industry: {}\n", i));
    }
    if let Some(c) = &company.context {
        brief.push_str(&format!("Notes: {}\n", c));
    }
    if !company.employees.is_empty() {
        brief.push_str("People:\n");
        for e in &company.employees {
            brief.push_str(&format!("- {} ({})\n", e.name, e.title.as_deref().unwrap_or("unknown title")));
        }
    }
    brief
}

fn sender_brief(sender: &SenderContext) -> String {
    format!(
        "Sender company: {}\nSender product: {}\nGoal: {}\n",
        sender.my_company,
        sender.my_product.as_deref().unwrap_or("(unspecified)"),
        sender.goal.as_deref().unwrap_or("start a conversation"),
    )
}

impl InsightGenerator for AiInsights {
    fn company_insights(&self, company: &Company) -> Result<CompanyInsight> {
        let prompt = format!(
            "Research this company. Return {{\"description\": \"...\", \"industry\": \"...\", \
             \"recent_activity\": \"...\"}}.\n\n{}",
            company_brief(company)
        );
        let reply = self.provider.complete(SYSTEM_PROMPT, &prompt, 1024)?;

        if let Some(json) = extract_json(&reply) {
            match serde_json::from_str::<CompanyInsight>(json) {
                Ok(insight) => return Ok(insight),
                Err(e) => debug!(error = %e, "Insight JSON did not match, trying key lines"),
            }
        }
        warn!(company = %company.name, "Falling back to legacy text parsing");
        self.legacy
            .company_insight(&reply)
            .ok_or_else(|| anyhow!("Could not parse company insights for {}", company.name))
    }

    fn strategy(&self, target: &Company, sender: &SenderContext) -> Result<StrategyDocument> {
        let prompt = format!(
            "Write a communication strategy for approaching the target company.\n\
             Return {{\"summary\": \"...\", \"key_messages\": [], \"talking_points\": [], \"channels\": [], \
             \"objections\": [{{\"objection\": \"...\", \"response\": \"...\"}}], \"next_steps\": []}}.\n\n\
             Target:\n{}\n{}",
            company_brief(target),
            sender_brief(sender)
        );
        let reply = self.provider.complete(SYSTEM_PROMPT, &prompt, 2048)?;
        let json = extract_json(&reply).ok_or_else(|| anyhow!("Strategy reply contained no JSON"))?;
        let mut doc: StrategyDocument = serde_json::from_str(json)?;
        doc.company = target.name.clone();
        Ok(doc)
    }

    fn email(&self, target: &Company, recipient: Option<&Employee>, sender: &SenderContext) -> Result<EmailDraft> {
        let to = match recipient {
            Some(e) => format!("{} ({})", e.name, e.title.as_deref().unwrap_or("unknown title")),
            None => "the team".to_string(),
        };
        let prompt = format!(
            "Draft a short first-touch email to {} at {}. Under 150 words, one clear ask.\n\
             Return {{\"subject\": \"...\", \"body\": \"...\"}}.\n\n{}\n{}",
            to,
            target.name,
            company_brief(target),
            sender_brief(sender)
        );
        let reply = self.provider.complete(SYSTEM_PROMPT, &prompt, 1024)?;

        let (subject, body) = match extract_json(&reply).and_then(|j| serde_json::from_str::<EmailDraft>(j).ok()) {
            Some(draft) => (draft.subject, draft.body),
            None => self
                .legacy
                .email_draft(&reply)
                .ok_or_else(|| anyhow!("Could not parse email draft"))?,
        };
        Ok(EmailDraft {
            to_name: recipient.map(|e| e.name.clone()),
            to_title: recipient.and_then(|e| e.title.clone()),
            subject,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    struct CannedProvider {
        reply: String,
        prompts: RefCell<Vec<String>>,
    }

    impl AIProvider for CannedProvider {
        fn complete(&self, _system: &str, prompt: &str, _max_tokens: u32) -> Result<String> {
            self.prompts.borrow_mut().push(prompt.to_string());
            Ok(self.reply.clone())
        }

        fn model_name(&self) -> &str {
            "canned"
        }
    }

    fn insights(reply: &str) -> AiInsights {
        AiInsights::new(Box::new(CannedProvider {
            reply: reply.to_string(),
            prompts: RefCell::new(Vec::new()),
        }))
    }

    fn acme() -> Company {
        Company {
            id: 1,
            name: "Acme".to_string(),
            description: None,
            industry: None,
            context: None,
            recent_activity: None,
            enriched_at: None,
            employees: vec![Employee { name: "Jo".to_string(), title: Some("CEO".to_string()), linkedin: None }],
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    #[test]
    fn test_company_insights_from_json() {
        let insight = insights(r#"{"description": "Widgets", "industry": "Hardware"}"#)
            .company_insights(&acme())
            .unwrap();
        assert_eq!(insight.industry.as_deref(), Some("Hardware"));
        assert_eq!(insight.recent_activity, None);
    }

    #[test]
    fn test_company_insights_legacy_fallback() {
        let reply = "Here is what I found:\n**DESCRIPTION:** ignored\nDESCRIPTION: Makes widgets\n\
                     Industry: Hardware\n- RECENT_ACTIVITY: Raised a Series B";
        let insight = insights(reply).company_insights(&acme()).unwrap();
        assert_eq!(insight.description.as_deref(), Some("Makes widgets"));
        assert_eq!(insight.industry.as_deref(), Some("Hardware"));
        assert_eq!(insight.recent_activity.as_deref(), Some("Raised a Series B"));
    }

    #[test]
    fn test_company_insights_unparseable() {
        assert!(insights("no idea").company_insights(&acme()).is_err());
    }

    #[test]
    fn test_email_legacy_fallback() {
        let reply = "SUBJECT: Quick question\nBODY:\nHi Jo,\n\nWorth a chat?\n";
        let company = acme();
        let draft = insights(reply)
            .email(&company, company.employees.first(), &SenderContext::default())
            .unwrap();
        assert_eq!(draft.subject, "Quick question");
        assert_eq!(draft.body, "Hi Jo,\n\nWorth a chat?");
        assert_eq!(draft.to_name.as_deref(), Some("Jo"));
        assert_eq!(draft.to_title.as_deref(), Some("CEO"));
    }

    #[test]
    fn test_strategy_stamps_company() {
        let reply = r#"{"summary": "Lead with cost", "key_messages": ["a", "b"]}"#;
        let doc = insights(reply)
            .strategy(&acme(), &SenderContext { my_company: "Us".to_string(), ..Default::default() })
            .unwrap();
        assert_eq!(doc.company, "Acme");
        assert_eq!(doc.key_messages, vec!["a", "b"]);
        assert!(doc.objections.is_empty());
    }
}
