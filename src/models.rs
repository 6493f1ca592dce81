use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};

/// One page's captured intelligence snapshot, keyed by normalized URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(default)]
    pub url: String, // normalized, identity
    #[serde(default)]
    pub display_url: String,
    pub name: String,
    #[serde(default)]
    pub date: Option<String>, // raw date range as printed on the page
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub estimated_attendees: Option<i64>,
    #[serde(default)]
    pub people: Vec<Person>,
    #[serde(default)]
    pub sponsors: Vec<Sponsor>,
    #[serde(default)]
    pub expected_personas: Vec<ExpectedPersona>,
    #[serde(default)]
    pub next_best_actions: Vec<NextBestAction>,
    #[serde(default)]
    pub related_events: Vec<RelatedEvent>,
    #[serde(default)]
    pub analyzed_at: String,
    #[serde(default)]
    pub last_viewed_at: Option<String>,
}

impl Event {
    /// Build an event from an analyzer payload. People without a usable name
    /// are dropped here, before anything is persisted.
    pub fn from_payload(url: &str, display_url: &str, payload: AnalysisPayload, analyzed_at: String) -> Self {
        let mut event = Event {
            url: url.to_string(),
            display_url: display_url.to_string(),
            name: payload.name,
            date: payload.date,
            start_date: payload.start_date,
            end_date: payload.end_date,
            location: payload.location,
            description: payload.description,
            estimated_attendees: payload.estimated_attendees,
            people: payload.people,
            sponsors: payload.sponsors,
            expected_personas: payload.expected_personas,
            next_best_actions: payload.next_best_actions,
            related_events: payload.related_events,
            analyzed_at,
            last_viewed_at: None,
        };
        event.retain_named_people();
        event
    }

    pub fn retain_named_people(&mut self) {
        self.people.retain(Person::has_usable_name);
    }
}

/// What the analyzer returns in full mode.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisPayload {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default, deserialize_with = "lenient_date")]
    pub start_date: Option<NaiveDate>,
    #[serde(default, deserialize_with = "lenient_date")]
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "lenient_count")]
    pub estimated_attendees: Option<i64>,
    #[serde(default)]
    pub people: Vec<Person>,
    #[serde(default)]
    pub sponsors: Vec<Sponsor>,
    #[serde(default)]
    pub expected_personas: Vec<ExpectedPersona>,
    #[serde(default)]
    pub next_best_actions: Vec<NextBestAction>,
    #[serde(default)]
    pub related_events: Vec<RelatedEvent>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Person {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub role: Option<String>, // speaker, organizer, panelist...
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub persona: Option<String>,
    #[serde(default)]
    pub linkedin: Option<String>,
    #[serde(default)]
    pub connection_message: Option<String>,
    #[serde(default)]
    pub ice_breaker: Option<String>,
}

impl Person {
    pub fn has_usable_name(&self) -> bool {
        !self.name.trim().is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Sponsor {
    pub name: String,
    #[serde(default)]
    pub tier: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExpectedPersona {
    pub persona: String,
    #[serde(default)]
    pub likelihood: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub expected_count: Option<String>, // "40", "Many", "10-20"
    #[serde(default)]
    pub outreach_message: Option<String>,
    #[serde(default)]
    pub ice_breaker: Option<String>,
    #[serde(default)]
    pub conversation_starters: Vec<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub pain_points: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NextBestAction {
    #[serde(default)]
    pub priority: i64,
    pub action: String,
    #[serde(default)]
    pub rationale: Option<String>,
}

/// Informational pointer to another event; never resolved against stored events.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelatedEvent {
    pub name: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub relevance: Option<String>,
}

/// Event row without dependents, as returned by list queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventSummary {
    pub id: i64,
    pub user_id: String,
    pub url: String,
    pub display_url: String,
    pub name: String,
    pub date: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub location: Option<String>,
    pub estimated_attendees: Option<i64>,
    pub analyzed_at: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListFilters {
    #[serde(default)]
    pub from: Option<NaiveDate>,
    #[serde(default)]
    pub to: Option<NaiveDate>,
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub offset: Option<u32>,
}

// --- Company registry ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Company {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub industry: Option<String>,
    pub context: Option<String>,
    pub recent_activity: Option<String>,
    pub enriched_at: Option<String>,
    pub employees: Vec<Employee>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Employee {
    pub name: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub linkedin: Option<String>,
}

/// A company as derived from an event or supplied by a client, before it has a row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompanyDraft {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub industry: Option<String>,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub employees: Vec<Employee>,
}

// --- Local cache records ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkipRecord {
    pub url: String,
    pub reason: String,
    #[serde(default)]
    pub skipped_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingAnalysis {
    pub url: String,
    #[serde(default)]
    pub display_url: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub started_at: String,
}

// --- Pre-check ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Precheck {
    pub is_event: bool,
    pub confidence: Confidence,
    #[serde(default)]
    pub reason: Option<String>,
}

impl Precheck {
    pub fn should_analyze(&self) -> bool {
        self.is_event && self.confidence == Confidence::High
    }
}

// --- Lenient deserializers for model output ---

fn lenient_count<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i64>, D::Error> {
    let value = Option::<serde_json::Value>::deserialize(d)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Some(serde_json::Value::String(s)) => {
            // "1,200+" -> 1200
            let digits: String = s
                .chars()
                .skip_while(|c| !c.is_ascii_digit())
                .take_while(|c| c.is_ascii_digit() || *c == ',')
                .filter(|c| c.is_ascii_digit())
                .collect();
            digits.parse().ok()
        }
        _ => None,
    })
}

fn lenient_text<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    let value = Option::<serde_json::Value>::deserialize(d)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

fn lenient_date<'de, D: Deserializer<'de>>(d: D) -> Result<Option<NaiveDate>, D::Error> {
    let value = Option::<String>::deserialize(d)?;
    Ok(value.and_then(|s| NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_payload_drops_blank_names() {
        let payload = AnalysisPayload {
            name: "RustConf".to_string(),
            people: vec![
                Person { name: "Jo".to_string(), ..Default::default() },
                Person { name: "".to_string(), ..Default::default() },
                Person { name: "   ".to_string(), ..Default::default() },
            ],
            ..Default::default()
        };
        let event = Event::from_payload("x.com/e", "https://x.com/e", payload, "t".to_string());
        assert_eq!(event.people.len(), 1);
        assert_eq!(event.people[0].name, "Jo");
    }

    #[test]
    fn test_payload_lenient_fields() {
        let json = r#"{
            "name": "Summit",
            "start_date": "2025-03-04",
            "end_date": "sometime",
            "estimated_attendees": "1,200+",
            "expected_personas": [{"persona": "CTO", "expected_count": 40}]
        }"#;
        let payload: AnalysisPayload = serde_json::from_str(json).unwrap();
        assert_eq!(payload.start_date, NaiveDate::from_ymd_opt(2025, 3, 4));
        assert_eq!(payload.end_date, None);
        assert_eq!(payload.estimated_attendees, Some(1200));
        assert_eq!(payload.expected_personas[0].expected_count.as_deref(), Some("40"));
    }

    #[test]
    fn test_cached_record_without_new_fields_still_reads() {
        let json = r#"{"url": "x.com/e", "name": "Old"}"#;
        let event: Event = serde_json::from_str(json).unwrap();
        assert!(event.people.is_empty());
        assert!(event.related_events.is_empty());
        assert_eq!(event.last_viewed_at, None);
    }

    #[test]
    fn test_precheck_gate() {
        let high = Precheck { is_event: true, confidence: Confidence::High, reason: None };
        let medium = Precheck { is_event: true, confidence: Confidence::Medium, reason: None };
        let not_event = Precheck { is_event: false, confidence: Confidence::High, reason: None };
        assert!(high.should_analyze());
        assert!(!medium.should_analyze());
        assert!(!not_event.should_analyze());
    }
}
