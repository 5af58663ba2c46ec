//! Configuration types shared by the relay.
//!
//! All sections deserialize with defaults so a config file only needs the
//! channel list.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A logical broadcast identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    /// Identifier used as the `source` of relayed comments
    pub id: String,
    /// Display name
    #[serde(default)]
    pub name: Option<String>,
    /// Discovery tags used to find the live program
    #[serde(default)]
    pub tags: Vec<String>,
    /// Only accept programs carrying the platform's official tag
    #[serde(default)]
    pub official: bool,
}

impl Channel {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            tags: Vec::new(),
            official: false,
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn official(mut self, official: bool) -> Self {
        self.official = official;
        self
    }
}

/// What the comment feed does when a subscriber falls behind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedPolicy {
    /// The lagging subscriber skips its oldest buffered comments
    #[default]
    DropOldest,
    /// The lagging subscriber misses the comment being published
    DropNewest,
    /// The publisher waits until every subscriber has room
    Block,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// Per-subscriber buffer size (at least 1)
    pub capacity: usize,
    pub policy: FeedPolicy,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            capacity: 64,
            policy: FeedPolicy::default(),
        }
    }
}

/// Endpoints of the program-listing collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Live program search endpoint
    pub search_url: String,
    /// Base of the watch page URL; the program id is appended
    pub watch_url: String,
    pub user_agent: String,
    /// HTTP request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            search_url: "https://live.nicovideo.jp/front/api/search/programs".to_string(),
            watch_url: "https://live.nicovideo.jp/watch".to_string(),
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36".to_string(),
            timeout_secs: 30,
        }
    }
}

/// Bounded exponential backoff for re-subscribing after a session ends.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// 0 disables retry
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            base_delay_ms: 1000,
            max_delay_ms: 60000,
        }
    }
}

impl ReconnectConfig {
    /// Delay before retry number `attempt` (1-based), or `None` once the
    /// attempts are exhausted.
    pub fn delay(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }
        let factor = 1u64.checked_shl(attempt - 1).unwrap_or(u64::MAX);
        let delay = self
            .base_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms);
        Some(Duration::from_millis(delay))
    }
}
