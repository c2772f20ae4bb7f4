use crate::error::{PopupError, Result};
use regex::Regex;
use reqwest::Client;
use std::sync::OnceLock;
use std::time::Duration;

/// URL prefixes whose content is never read.
const PRIVILEGED_PREFIXES: [&str; 3] = ["chrome://", "about:", "file://"];

const TEXT_WIDTH: usize = 120;

/// Reads the visible text of a web page for use as prompt context.
#[derive(Debug, Clone)]
pub struct PageReader {
    client: Client,
}

impl Default for PageReader {
    fn default() -> Self {
        Self::new()
    }
}

impl PageReader {
    pub fn new() -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_else(|_| Client::new()),
        }
    }

    pub async fn read(&self, url: &str) -> Result<String> {
        check_accessible(url)?;

        let response = self
            .client
            .get(url)
            .header("User-Agent", "Mozilla/5.0 (compatible; promptpad/0.1)")
            .send()
            .await
            .map_err(|e| PopupError::ContentAccess(format!("Error accessing page: {}", e)))?;

        if !response.status().is_success() {
            return Err(PopupError::ContentAccess(format!(
                "Failed to fetch page: {}",
                response.status()
            )));
        }

        let html = response
            .text()
            .await
            .map_err(|e| PopupError::ContentAccess(format!("Error reading page: {}", e)))?;

        let text = extract_text(&html);
        if text.is_empty() {
            return Err(PopupError::ContentAccess("No page content.".to_string()));
        }
        tracing::debug!(url, chars = text.chars().count(), "page text extracted");
        Ok(text)
    }
}

pub fn check_accessible(url: &str) -> Result<()> {
    let lower = url.trim().to_ascii_lowercase();
    if lower.is_empty() || PRIVILEGED_PREFIXES.iter().any(|p| lower.starts_with(p)) {
        return Err(PopupError::ContentAccess(
            "Cannot access page content from this type of page.".to_string(),
        ));
    }
    if !(lower.starts_with("http://") || lower.starts_with("https://")) {
        return Err(PopupError::ContentAccess(format!("Unsupported page address: {}", url)));
    }
    Ok(())
}

fn section_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        ["main", "article", "body"]
            .iter()
            .filter_map(|tag| {
                Regex::new(&format!(r"(?is)<{tag}\b[^>]*>(.*?)</{tag}\s*>"))
                    .map_err(|e| tracing::warn!("bad section pattern for <{}>: {}", tag, e))
                    .ok()
            })
            .collect()
    })
}

/// Text of the first `<main>`, else `<article>`, else `<body>`, else the whole
/// document.
pub fn extract_text(html: &str) -> String {
    let section = section_patterns()
        .iter()
        .find_map(|pattern| pattern.captures(html))
        .and_then(|captures| captures.get(1))
        .map(|m| m.as_str())
        .unwrap_or(html);

    html2text::from_read(section.as_bytes(), TEXT_WIDTH)
        .trim()
        .to_string()
}
