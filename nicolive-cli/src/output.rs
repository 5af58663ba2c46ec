use crate::{cli::OutputFormat, error::Result};
#[cfg(feature = "colored-output")]
use colored::*;
use nicolive::{Comment, LiveStatistics};
use serde_json::json;

pub struct OutputManager {
    format: OutputFormat,
    colored: bool,
}

impl OutputManager {
    pub fn new(format: OutputFormat, colored: bool) -> Self {
        Self { format, colored }
    }

    pub fn format_comment(&self, comment: &Comment) -> Result<String> {
        match self.format {
            OutputFormat::Json => Ok(serde_json::to_string(comment)?),
            OutputFormat::Pretty => Ok(self.format_comment_pretty(comment)),
        }
    }

    pub fn format_statistics(&self, channel: &str, stats: &LiveStatistics) -> Result<String> {
        match self.format {
            OutputFormat::Json => Ok(serde_json::to_string(&json!({
                "source": channel,
                "statistics": stats,
            }))?),
            OutputFormat::Pretty => Ok(self.format_statistics_pretty(channel, stats)),
        }
    }

    fn format_comment_pretty(&self, comment: &Comment) -> String {
        format!(
            "[{}] #{} {}",
            self.colorize(&comment.source, Style::Source),
            comment.no,
            self.colorize(&comment.text, Style::Text(&comment.color)),
        )
    }

    fn format_statistics_pretty(&self, channel: &str, stats: &LiveStatistics) -> String {
        let field = |value: Option<u64>| value.map_or_else(|| "-".to_string(), |v| v.to_string());
        let velocity = stats
            .comments_per_minute
            .map_or_else(|| "-".to_string(), |v| format!("{:.1}", v));

        format!(
            "[{}] {} viewers={} comments={} per_minute={} ad={} gift={}",
            self.colorize(channel, Style::Source),
            self.colorize("stats", Style::Label),
            field(stats.viewers),
            field(stats.comments),
            velocity,
            field(stats.ad_points),
            field(stats.gift_points),
        )
    }

    #[cfg(feature = "colored-output")]
    fn colorize(&self, text: &str, style: Style<'_>) -> String {
        if !self.colored {
            return text.to_string();
        }
        match style {
            Style::Source => text.cyan().bold().to_string(),
            Style::Label => text.yellow().to_string(),
            Style::Text(hex) => match parse_hex(hex) {
                Some((r, g, b)) => text.truecolor(r, g, b).to_string(),
                None => text.to_string(),
            },
        }
    }

    #[cfg(not(feature = "colored-output"))]
    fn colorize(&self, text: &str, _style: Style<'_>) -> String {
        text.to_string()
    }
}

#[derive(Clone, Copy)]
enum Style<'a> {
    Source,
    Label,
    /// Comment body in its own hex color
    Text(&'a str),
}

#[cfg_attr(not(feature = "colored-output"), allow(dead_code))]
fn parse_hex(hex: &str) -> Option<(u8, u8, u8)> {
    let hex = hex.strip_prefix('#')?;
    if hex.len() != 6 {
        return None;
    }
    let channel = |range: std::ops::Range<usize>| u8::from_str_radix(hex.get(range)?, 16).ok();
    Some((channel(0..2)?, channel(2..4)?, channel(4..6)?))
}
