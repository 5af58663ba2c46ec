//! Live program discovery.
//!
//! Finding the control socket URL of a channel takes two lookups:
//! 1. Search live programs by tag: GET {search_url}?keyword={tag}&status=onair
//! 2. Read the embedded page descriptor of a program: GET {watch_url}/{program_id},
//!    from the `data-props` attribute of `<script id="embedded-data">`

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::config::ApiConfig;
use crate::error::{NicoliveError, Result};
use crate::net::install_rustls_provider;

/// Tag carried by the platform's official jikkyo programs.
pub const OFFICIAL_TAG: &str = "ニコニコ実況";

static EMBEDDED_DATA_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<script[^>]*\bid="embedded-data"[^>]*\bdata-props="([^"]*)""#)
        .expect("embedded data pattern is valid")
});

/// A currently-live program returned by the search API.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LiveProgram {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub tags: Vec<ProgramTag>,
}

impl LiveProgram {
    pub fn has_tag(&self, text: &str) -> bool {
        self.tags.iter().any(|tag| tag.text == text)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProgramTag {
    pub text: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    data: Vec<LiveProgram>,
}

/// Embedded page descriptor of a program. Only the fields the relay needs.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EmbeddedData {
    pub site: Site,
    #[serde(default)]
    pub program: Option<ProgramInfo>,
}

impl EmbeddedData {
    /// Control socket URL negotiated by the watch page.
    pub fn web_socket_url(&self) -> &str {
        &self.site.relive.web_socket_url
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Site {
    pub relive: Relive,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Relive {
    pub web_socket_url: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgramInfo {
    #[serde(default)]
    pub nicolive_program_id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

/// Source of live programs and their page descriptors.
#[async_trait]
pub trait ProgramDirectory: Send + Sync {
    /// Programs currently on air that carry `tag`.
    async fn live_programs(&self, tag: &str) -> Result<Vec<LiveProgram>>;

    /// Page descriptor of a program.
    async fn embedded_data(&self, program_id: &str) -> Result<EmbeddedData>;
}

/// [`ProgramDirectory`] backed by the platform's web API.
#[derive(Debug, Clone)]
pub struct NicoliveApi {
    client: Client,
    config: ApiConfig,
}

impl NicoliveApi {
    pub fn new(config: ApiConfig) -> Result<Self> {
        install_rustls_provider();
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { client, config })
    }

    pub fn with_client(client: Client, config: ApiConfig) -> Self {
        Self { client, config }
    }

    fn watch_url(&self, program_id: &str) -> Result<Url> {
        let mut url = Url::parse(&self.config.watch_url)
            .map_err(|e| NicoliveError::discovery(format!("Invalid watch URL: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| NicoliveError::discovery("Watch URL cannot be a base"))?
            .pop_if_empty()
            .push(program_id);
        Ok(url)
    }
}

#[async_trait]
impl ProgramDirectory for NicoliveApi {
    async fn live_programs(&self, tag: &str) -> Result<Vec<LiveProgram>> {
        let response = self
            .client
            .get(&self.config.search_url)
            .query(&[
                ("keyword", tag),
                ("status", "onair"),
                ("sortOrder", "recentDesc"),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(NicoliveError::discovery(format!(
                "Program search failed: HTTP {}",
                response.status()
            )));
        }

        let body: SearchResponse = response.json().await?;
        debug!(tag, count = body.data.len(), "Live programs found");
        Ok(body.data)
    }

    async fn embedded_data(&self, program_id: &str) -> Result<EmbeddedData> {
        let url = self.watch_url(program_id)?;
        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            return Err(NicoliveError::discovery(format!(
                "Watch page for {} failed: HTTP {}",
                program_id,
                response.status()
            )));
        }

        parse_embedded_data(&response.text().await?)
    }
}

/// Extract the embedded page descriptor from a watch page.
pub fn parse_embedded_data(html: &str) -> Result<EmbeddedData> {
    let props = EMBEDDED_DATA_REGEX
        .captures(html)
        .and_then(|caps| caps.get(1))
        .ok_or_else(|| NicoliveError::discovery("Embedded data not found in watch page"))?;

    Ok(serde_json::from_str(&unescape_html(props.as_str()))?)
}

/// Decode the entities that appear in HTML attribute values.
fn unescape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find('&') {
        out.push_str(&rest[..start]);
        rest = &rest[start..];

        let decoded = rest.find(';').and_then(|end| {
            let entity = &rest[1..end];
            let ch = match entity {
                "quot" => Some('"'),
                "amp" => Some('&'),
                "lt" => Some('<'),
                "gt" => Some('>'),
                "apos" => Some('\''),
                _ => entity
                    .strip_prefix("#x")
                    .or_else(|| entity.strip_prefix("#X"))
                    .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                    .or_else(|| entity.strip_prefix('#').and_then(|dec| dec.parse().ok()))
                    .and_then(char::from_u32),
            };
            ch.map(|ch| (ch, end))
        });

        match decoded {
            Some((ch, end)) => {
                out.push(ch);
                rest = &rest[end + 1..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }

    out.push_str(rest);
    out
}
