//! Live statistics for one session.
//!
//! Viewer and point counters are reported by the control server about once a
//! minute. Comment velocity is derived from comment numbers instead, since the
//! server-side comment counter is coarse.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::comment::Comment;
use crate::protocol::StatisticsData;

/// Point-in-time view of a session's statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LiveStatistics {
    pub viewers: Option<u64>,
    pub ad_points: Option<u64>,
    pub gift_points: Option<u64>,
    /// Latest observed comment number
    pub comments: Option<u64>,
    /// Derived comment velocity
    pub comments_per_minute: Option<f64>,
    /// When the server last reported counters
    pub reported_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct CommentMark {
    no: u64,
    time: f64,
}

#[derive(Debug, Default)]
struct TrackerState {
    viewers: Option<u64>,
    ad_points: Option<u64>,
    gift_points: Option<u64>,
    reported_at: Option<DateTime<Utc>>,
    first: Option<CommentMark>,
    latest: Option<CommentMark>,
}

impl TrackerState {
    fn comments_per_minute(&self) -> Option<f64> {
        let first = self.first?;
        let latest = self.latest?;
        let elapsed = latest.time - first.time;
        // Out-of-order timestamps
        if elapsed <= 0.0 {
            return None;
        }
        Some(60.0 * latest.no.saturating_sub(first.no) as f64 / elapsed)
    }
}

/// Accumulates counters for a session. Shared between the control socket,
/// which reports counters, and the message socket, which reports comments.
#[derive(Debug, Default)]
pub struct StatisticsTracker {
    state: Mutex<TrackerState>,
}

impl StatisticsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a `statistics` report from the control server.
    pub fn record_report(&self, data: &StatisticsData) {
        let mut state = self.state.lock();
        state.viewers = data.viewers;
        state.ad_points = data.ad_points;
        state.gift_points = data.gift_points;
        state.reported_at = Some(Utc::now());

        debug!(
            viewers = ?state.viewers,
            ad_points = ?state.ad_points,
            gift_points = ?state.gift_points,
            comments_per_minute = ?state.comments_per_minute(),
            "Statistics updated"
        );
    }

    /// Record a decoded comment.
    pub fn record_comment(&self, comment: &Comment) {
        let mark = CommentMark {
            no: comment.no,
            time: comment.time,
        };
        let mut state = self.state.lock();
        if state.first.is_none() {
            state.first = Some(mark);
        }
        state.latest = Some(mark);
    }

    pub fn comments_per_minute(&self) -> Option<f64> {
        self.state.lock().comments_per_minute()
    }

    pub fn snapshot(&self) -> LiveStatistics {
        let state = self.state.lock();
        LiveStatistics {
            viewers: state.viewers,
            ad_points: state.ad_points,
            gift_points: state.gift_points,
            comments: state.latest.map(|mark| mark.no),
            comments_per_minute: state.comments_per_minute(),
            reported_at: state.reported_at,
        }
    }
}
