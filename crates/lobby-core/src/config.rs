//! Widget bootstrap configuration.
//!
//! Mirrors the embed surface: a token identifying the company, the hosting
//! domain, an optional theme, and the backend base URL.

use serde::{Deserialize, Serialize};

use crate::error::{LobbyError, Result};

/// Visual theme requested by the embedding page. Presentation-level only;
/// nothing in the state machine branches on it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

impl std::str::FromStr for Theme {
    type Err = LobbyError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "light" => Ok(Self::Light),
            "dark" => Ok(Self::Dark),
            other => Err(LobbyError::config(format!("unknown theme '{other}'"))),
        }
    }
}

/// Everything the widget needs to mount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WidgetConfig {
    /// Embed token issued to the company. Without a token the widget must
    /// not render at all.
    pub token: String,
    /// Domain of the hosting page, checked against the token server-side.
    pub domain: String,
    #[serde(default)]
    pub theme: Theme,
    #[serde(default = "default_api_base")]
    pub api_base: String,
}

fn default_api_base() -> String {
    "https://api.lobby.chat".to_string()
}

impl WidgetConfig {
    pub fn new(token: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            domain: domain.into(),
            theme: Theme::default(),
            api_base: default_api_base(),
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    pub fn with_theme(mut self, theme: Theme) -> Self {
        self.theme = theme;
        self
    }

    /// A missing token is a fatal-silent condition: report it before any
    /// network traffic happens.
    pub fn validate(&self) -> Result<()> {
        if self.token.trim().is_empty() {
            return Err(LobbyError::token_rejected("embed token is missing"));
        }
        if self.domain.trim().is_empty() {
            return Err(LobbyError::config("hosting domain is missing"));
        }
        Ok(())
    }
}
