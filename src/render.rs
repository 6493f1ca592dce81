use crate::gate::Outcome;
use crate::models::{Event, EventSummary, PendingAnalysis};

const WRAP: usize = 78;

/// Terminal text for a gate outcome. Pure: the same outcome always renders
/// the same way.
pub fn render_outcome(outcome: &Outcome) -> String {
    match outcome {
        Outcome::Skipped { url, display_url, reason } => format!(
            "Not an event: {}\n  Reason: {}\n  If this is wrong, run: eventscope override {}",
            url, reason, display_url
        ),
        Outcome::Cached { event, fresh } => {
            let header = if *fresh { "Analyzed" } else { "Cached" };
            format!("[{}]\n{}", header, render_event(event))
        }
        Outcome::InProgress { url, started_at } => {
            format!("Analysis of {} already in progress (started {})", url, started_at)
        }
        Outcome::Failed { url, display_url, message, can_override } => {
            let mut out = format!("Analysis failed for {}: {}", url, message);
            if *can_override {
                out.push_str(&format!("\n  Retry without the pre-check: eventscope override {}", display_url));
            }
            out
        }
    }
}

pub fn render_event(event: &Event) -> String {
    let mut out = String::new();
    out.push_str(&format!("{}\n", event.name));
    out.push_str(&format!("URL: {}\n", if event.display_url.is_empty() { &event.url } else { &event.display_url }));
    if let Some(date) = event.date.as_deref() {
        out.push_str(&format!("Date: {}\n", date));
    } else if let Some(start) = event.start_date {
        match event.end_date {
            Some(end) if end != start => out.push_str(&format!("Date: {} to {}\n", start, end)),
            _ => out.push_str(&format!("Date: {}\n", start)),
        }
    }
    if let Some(location) = &event.location {
        out.push_str(&format!("Location: {}\n", location));
    }
    if let Some(attendees) = event.estimated_attendees {
        out.push_str(&format!("Estimated attendees: {}\n", attendees));
    }
    if let Some(description) = &event.description {
        out.push('\n');
        out.push_str(&textwrap::fill(description, WRAP));
        out.push('\n');
    }

    if !event.people.is_empty() {
        out.push_str(&format!("\nPeople ({}):\n", event.people.len()));
        for p in &event.people {
            let mut line = format!("  - {}", p.name);
            let role: Vec<&str> = [p.title.as_deref(), p.company.as_deref()].into_iter().flatten().collect();
            if !role.is_empty() {
                line.push_str(&format!(", {}", role.join(" @ ")));
            }
            if let Some(persona) = &p.persona {
                line.push_str(&format!(" [{}]", persona));
            }
            out.push_str(&line);
            out.push('\n');
        }
    }

    if !event.sponsors.is_empty() {
        out.push_str("\nSponsors:\n");
        for s in &event.sponsors {
            match &s.tier {
                Some(tier) => out.push_str(&format!("  - {} ({})\n", s.name, tier)),
                None => out.push_str(&format!("  - {}\n", s.name)),
            }
        }
    }

    if !event.expected_personas.is_empty() {
        out.push_str("\nExpected personas:\n");
        for p in &event.expected_personas {
            out.push_str(&format!(
                "  - {} (likelihood: {}, count: {})\n",
                p.persona,
                p.likelihood.as_deref().unwrap_or("?"),
                p.expected_count.as_deref().unwrap_or("?")
            ));
            if !p.pain_points.is_empty() {
                out.push_str(&format!("      pain points: {}\n", p.pain_points.join("; ")));
            }
        }
    }

    if !event.next_best_actions.is_empty() {
        out.push_str("\nNext best actions:\n");
        let mut actions: Vec<_> = event.next_best_actions.iter().collect();
        actions.sort_by_key(|a| a.priority);
        for a in actions {
            out.push_str(&format!("  {}. {}\n", a.priority, a.action));
            if let Some(why) = &a.rationale {
                for line in textwrap::wrap(why, WRAP - 5) {
                    out.push_str(&format!("     {}\n", line));
                }
            }
        }
    }

    if !event.related_events.is_empty() {
        out.push_str("\nRelated events:\n");
        for r in &event.related_events {
            out.push_str(&format!("  - {}", r.name));
            if let Some(url) = &r.url {
                out.push_str(&format!(" <{}>", url));
            }
            out.push('\n');
        }
    }

    out
}

pub fn render_summaries(events: &[EventSummary]) -> String {
    if events.is_empty() {
        return "No events found.".to_string();
    }
    let mut out = format!("{:<6} {:<12} {:<32} {:<30}\n", "ID", "START", "NAME", "URL");
    out.push_str(&"-".repeat(82));
    out.push('\n');
    for e in events {
        let start = e.start_date.map(|d| d.to_string()).unwrap_or_else(|| "-".to_string());
        out.push_str(&format!(
            "{:<6} {:<12} {:<32} {:<30}\n",
            e.id,
            start,
            truncate(&e.name, 30),
            truncate(&e.url, 30)
        ));
    }
    out
}

pub fn render_pending(pending: &[&PendingAnalysis]) -> String {
    if pending.is_empty() {
        return "No analyses in progress.".to_string();
    }
    pending
        .iter()
        .map(|p| format!("  {} (started {}) {}", p.url, p.started_at, p.title.as_deref().unwrap_or("")))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skipped_hint_is_a_fetchable_url() {
        let text = render_outcome(&Outcome::Skipped {
            url: "x.com/e".to_string(),
            display_url: "https://x.com/e".to_string(),
            reason: "blog".to_string(),
        });
        assert!(text.contains("eventscope override https://x.com/e"));
    }

    #[test]
    fn test_failed_hint_only_when_override_offered() {
        let failed = |can_override| Outcome::Failed {
            url: "x.com/e".to_string(),
            display_url: "https://x.com/e".to_string(),
            message: "timeout".to_string(),
            can_override,
        };
        assert!(!render_outcome(&failed(false)).contains("override"));
        assert!(render_outcome(&failed(true)).contains("eventscope override https://x.com/e"));
    }

    #[test]
    fn test_truncate_is_char_safe() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("ünïcödé-name", 8), "ünïcö...");
    }
}
