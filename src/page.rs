use anyhow::{Context, Result};
use scraper::{Html, Selector};
use std::time::Duration;

use crate::normalize::{absolute_url, display_url, normalize_url};

/// The page being visited, as handed to the analyzer.
#[derive(Debug, Clone)]
pub struct PageContext {
    pub url: String,         // normalized
    pub display_url: String, // scheme + host + path
    pub title: Option<String>,
    pub text: String,
}

impl PageContext {
    pub fn from_text(raw_url: &str, title: Option<String>, text: &str, max_chars: usize) -> Self {
        Self {
            url: normalize_url(raw_url),
            display_url: display_url(raw_url),
            title: title.filter(|t| !t.trim().is_empty()),
            text: truncate_chars(&collapse_whitespace(text), max_chars),
        }
    }

    /// Build from an HTML document: `<title>` becomes the title and the
    /// visible body text (scripts, styles and templates excluded) the text.
    pub fn from_html(raw_url: &str, html: &str, max_chars: usize) -> Self {
        let document = Html::parse_document(html);

        let title = Selector::parse("title")
            .ok()
            .and_then(|sel| document.select(&sel).next())
            .map(|el| el.text().collect::<String>().trim().to_string());

        let mut text = String::new();
        if let Ok(body_sel) = Selector::parse("body") {
            if let Some(body) = document.select(&body_sel).next() {
                for node in body.descendants() {
                    let Some(chunk) = node.value().as_text() else { continue };
                    let hidden = node.ancestors().any(|a| {
                        a.value()
                            .as_element()
                            .is_some_and(|el| matches!(el.name(), "script" | "style" | "noscript" | "template"))
                    });
                    if !hidden {
                        text.push_str(chunk);
                        text.push(' ');
                    }
                }
            }
        }

        Self::from_text(raw_url, title, &text, max_chars)
    }
}

/// Download a page and build its context from the returned HTML.
pub fn fetch(raw_url: &str, max_chars: usize) -> Result<PageContext> {
    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(30))
        .user_agent("eventscope/0.1")
        .build()?;
    let target = absolute_url(raw_url);
    let html = client
        .get(&target)
        .send()
        .and_then(|r| r.error_for_status())
        .with_context(|| format!("Failed to fetch {}", target))?
        .text()?;
    Ok(PageContext::from_html(raw_url, &html, max_chars))
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}
