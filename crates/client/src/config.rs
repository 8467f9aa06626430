//! Client configuration from environment variables.

use std::str::FromStr;
use std::time::Duration;

use crate::typing::TypingConfig;
use crate::ws::ReconnectConfig;

const DEFAULT_API_URL: &str = "http://localhost:8080";
const DEFAULT_PAGE_SIZE: u32 = 50;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the REST collaborator.
    pub api_url: String,
    /// Live channel endpoint.
    pub ws_url: String,
    pub reconnect: ReconnectConfig,
    pub typing: TypingConfig,
    /// Messages requested per history page.
    pub page_size: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            ws_url: ws_url_for(DEFAULT_API_URL),
            reconnect: ReconnectConfig::default(),
            typing: TypingConfig::default(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl ClientConfig {
    /// Read configuration from the environment, falling back to defaults.
    ///
    /// Environment variables:
    /// - `CHATSYNC_API_URL` (default: "http://localhost:8080")
    /// - `CHATSYNC_WS_URL` (default: API URL with a ws scheme and `/ws` path)
    /// - `CHATSYNC_RECONNECT_ATTEMPTS`, `CHATSYNC_RECONNECT_DELAY_MS`, `CHATSYNC_RECONNECT_MAX_DELAY_MS`
    /// - `CHATSYNC_TYPING_IDLE_MS`, `CHATSYNC_TYPING_DECAY_MS`
    /// - `CHATSYNC_PAGE_SIZE`
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let api_url = lookup("CHATSYNC_API_URL")
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or(defaults.api_url);
        let ws_url = lookup("CHATSYNC_WS_URL").unwrap_or_else(|| ws_url_for(&api_url));

        let reconnect = ReconnectConfig {
            max_attempts: parse_or(&lookup, "CHATSYNC_RECONNECT_ATTEMPTS", defaults.reconnect.max_attempts),
            initial_delay_ms: parse_or(&lookup, "CHATSYNC_RECONNECT_DELAY_MS", defaults.reconnect.initial_delay_ms),
            max_delay_ms: parse_or(&lookup, "CHATSYNC_RECONNECT_MAX_DELAY_MS", defaults.reconnect.max_delay_ms),
            ..defaults.reconnect
        };

        let typing = TypingConfig {
            idle_timeout: Duration::from_millis(parse_or(
                &lookup,
                "CHATSYNC_TYPING_IDLE_MS",
                defaults.typing.idle_timeout.as_millis() as u64,
            )),
            decay_window: Duration::from_millis(parse_or(
                &lookup,
                "CHATSYNC_TYPING_DECAY_MS",
                defaults.typing.decay_window.as_millis() as u64,
            )),
        };

        Self {
            api_url,
            ws_url,
            reconnect,
            typing,
            page_size: parse_or(&lookup, "CHATSYNC_PAGE_SIZE", defaults.page_size).max(1),
        }
    }
}

fn parse_or<T: FromStr + Copy>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match lookup(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            crate::log_warn!(key, value = %raw, "ignoring unparsable config value");
            default
        }),
        None => default,
    }
}

/// Derive the live channel URL from the REST base URL.
fn ws_url_for(api_url: &str) -> String {
    match url::Url::parse(api_url) {
        Ok(mut url) => {
            let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
            // Both schemes are "special", so the switch cannot fail.
            let _ = url.set_scheme(scheme);
            url.set_path("/ws");
            url.set_query(None);
            url.to_string()
        }
        Err(_) => format!("{}/ws", api_url.trim_end_matches('/')),
    }
}
