//! Canonical comment record and the chat decoder.
//!
//! Comments keep the DPlayer-compatible shape consumed by the HTTP layer:
//! `{source, no, time, author, text, color, type, size, commands}`.

use serde::{Deserialize, Serialize};

use crate::protocol::Chat;

/// Token the platform adds to the mail field of anonymous posts.
const ANONYMITY_MARKER: &str = "184";

/// Color used when no command selects one.
pub const DEFAULT_COLOR: &str = "#ffffff";

/// Size tag of every relayed comment.
pub const DEFAULT_SIZE: &str = "medium";

/// Vertical position of a comment on the player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Position {
    Top,
    /// Scrolls right to left (the default)
    #[default]
    Right,
    Bottom,
}

impl Position {
    /// Look up a position command (`ue`, `naka`, `shita`).
    pub fn from_command(command: &str) -> Option<Self> {
        match command {
            "ue" => Some(Self::Top),
            "naka" => Some(Self::Right),
            "shita" => Some(Self::Bottom),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Top => "top",
            Self::Right => "right",
            Self::Bottom => "bottom",
        }
    }
}

/// Look up a color command, including the premium-only aliases.
pub fn color_from_command(command: &str) -> Option<&'static str> {
    let color = match command {
        "red" => "#e54256",
        "pink" => "#ff8080",
        "orange" => "#ffc000",
        "yellow" => "#ffe133",
        "green" => "#64dd17",
        "cyan" => "#39ccff",
        "blue" => "#0000ff",
        "purple" => "#d500f9",
        "black" => "#000000",
        "white" => "#ffffff",
        "white2" | "niconicowhite" => "#cccc99",
        "red2" | "truered" => "#cc0033",
        "pink2" => "#ff33cc",
        "orange2" | "passionorange" => "#ff6600",
        "yellow2" | "madyellow" => "#999900",
        "green2" | "elementalgreen" => "#00cc66",
        "cyan2" => "#00cccc",
        "blue2" | "marineblue" => "#3399ff",
        "purple2" | "nobleviolet" => "#6633cc",
        "black2" => "#666666",
        _ => return None,
    };
    Some(color)
}

/// A single relayed comment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    /// Where the comment came from (the channel id)
    pub source: String,
    /// Comment number within the thread
    pub no: u64,
    /// Post time in epoch seconds
    pub time: f64,
    /// Author / user id
    pub author: String,
    /// Comment body
    pub text: String,
    /// Hex color (e.g. "#64dd17")
    pub color: String,
    /// Position on the player ("top", "right" or "bottom")
    #[serde(rename = "type")]
    pub position: Position,
    /// Size tag
    pub size: String,
    /// Raw formatting commands, anonymity marker removed
    pub commands: Vec<String>,
}

impl Comment {
    /// Decode a chat payload received on the message socket.
    pub fn from_chat(source: impl Into<String>, chat: &Chat) -> Self {
        let MailCommands {
            commands,
            color,
            position,
        } = parse_mail(chat.mail.as_deref().unwrap_or_default());

        Self {
            source: source.into(),
            no: chat.no,
            time: chat.time(),
            author: chat.user_id.clone(),
            text: chat.content.clone(),
            color: color.to_string(),
            position,
            size: DEFAULT_SIZE.to_string(),
            commands,
        }
    }
}

/// Result of decoding a mail field.
#[derive(Debug, Clone, PartialEq)]
pub struct MailCommands {
    pub commands: Vec<String>,
    pub color: &'static str,
    pub position: Position,
}

/// Split a mail field into commands and resolve color and position.
///
/// Every matching token overrides the previous match for its table, so the
/// last color and the last position win.
pub fn parse_mail(mail: &str) -> MailCommands {
    let commands: Vec<String> = mail
        .split(' ')
        .filter(|token| !token.is_empty() && *token != ANONYMITY_MARKER)
        .map(str::to_string)
        .collect();

    let mut color = DEFAULT_COLOR;
    let mut position = Position::default();
    for command in &commands {
        if let Some(c) = color_from_command(command) {
            color = c;
        } else if let Some(p) = Position::from_command(command) {
            position = p;
        }
    }

    MailCommands {
        commands,
        color,
        position,
    }
}
