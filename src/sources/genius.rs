use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use scraper::{Html, Selector};
use serde::Deserialize;
use std::{sync::OnceLock, time::Duration};
use tracing::{debug, info};

use super::LyricsLookup;

const API_URL: &str = "https://api.genius.com";

/// Lyrics via the Genius search API plus a scrape of the song page
pub struct GeniusLyrics {
    client: reqwest::Client,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    response: SearchHits,
}

#[derive(Debug, Deserialize)]
struct SearchHits {
    hits: Vec<Hit>,
}

#[derive(Debug, Deserialize)]
struct Hit {
    result: HitResult,
}

#[derive(Debug, Deserialize)]
struct HitResult {
    url: String,
}

impl GeniusLyrics {
    pub fn new(api_key: String) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(15))
                .build()
                .unwrap_or_default(),
            api_key,
        }
    }

    /// Search text: artist plus title, with any "(feat. ...)" style suffix dropped
    fn search_text(title: &str, artist: &str) -> String {
        let title = title.split('(').next().unwrap_or(title).trim();
        format!("{} {}", artist, title).trim().to_string()
    }

    /// Text of every lyrics container on a song page, one line per text
    /// node. Entities are decoded by the HTML parser.
    fn extract_lyrics(html: &str) -> Option<String> {
        let document = Html::parse_document(html);
        let selector = Selector::parse(r#"div[data-lyrics-container="true"]"#).ok()?;

        let mut lyrics = String::new();
        for container in document.select(&selector) {
            let lines: Vec<&str> = container
                .descendants()
                .filter_map(|node| {
                    let text = node.value().as_text()?;
                    let in_script = node
                        .parent()
                        .and_then(|parent| parent.value().as_element())
                        .is_some_and(|element| element.name() == "script");
                    (!in_script).then_some(&**text)
                })
                .collect();
            lyrics.push_str(&lines.join("\n"));
            lyrics.push_str("\n\n");
        }

        let lyrics = tidy(&lyrics);
        (!lyrics.is_empty()).then_some(lyrics)
    }
}

/// Section headers on their own lines, no stray breaks inside parentheses
fn tidy(text: &str) -> String {
    static RULES: OnceLock<[(Regex, &'static str); 4]> = OnceLock::new();
    let rules = RULES.get_or_init(|| {
        [
            (Regex::new(r"([&(])\n").expect("static regex"), "$1"),
            (Regex::new(r"\n(\))").expect("static regex"), "$1"),
            (Regex::new(r"(\])").expect("static regex"), "$1\n"),
            (Regex::new(r"(\[)").expect("static regex"), "\n$1"),
        ]
    });

    let mut out = text.to_string();
    for (pattern, replacement) in rules.iter() {
        out = pattern.replace_all(&out, *replacement).into_owned();
    }
    out.trim().to_string()
}

#[async_trait]
impl LyricsLookup for GeniusLyrics {
    async fn find(&self, title: &str, artist: &str) -> Result<Option<String>> {
        if title.contains("/playlist/") || title.contains("list=") {
            return Ok(None);
        }

        let query = Self::search_text(title, artist);
        debug!("📖 Searching lyrics: {}", query);

        let search: SearchResponse = self
            .client
            .get(format!("{}/search?q={}", API_URL, urlencoding::encode(&query)))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .context("Error searching Genius")?
            .error_for_status()?
            .json()
            .await
            .context("Error parsing Genius search")?;

        let Some(hit) = search.response.hits.into_iter().next() else {
            info!("📖 No lyrics found for {}", query);
            return Ok(None);
        };

        let page = self
            .client
            .get(&hit.result.url)
            .send()
            .await
            .context("Error fetching lyrics page")?
            .text()
            .await?;

        Ok(Self::extract_lyrics(&page))
    }
}
