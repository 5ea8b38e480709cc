use std::path::PathBuf;
use std::str::FromStr;

pub const DEFAULT_CHAT_URL: &str = "https://chat.qwen.ai/api/chat/completions";
pub const DEFAULT_MODELS_URL: &str = "https://chat.qwen.ai/api/models";
pub const DEFAULT_FILES_URL: &str = "https://chat.qwen.ai/api/v1/files/";

/// Browser user agent the backend expects on every call.
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CookieFormat {
    /// Cookie header value used as given.
    #[default]
    Raw,
    /// `a=1:b=2` form, produced by tools that cannot store `;` in a value.
    Colon,
}

impl FromStr for CookieFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "raw" => Ok(CookieFormat::Raw),
            "colon" => Ok(CookieFormat::Colon),
            other => Err(format!("unknown cookie format: {other}")),
        }
    }
}

impl CookieFormat {
    pub fn apply(self, cookie: &str) -> String {
        match self {
            CookieFormat::Raw => cookie.to_string(),
            CookieFormat::Colon => cookie
                .replace(':', ";")
                .split(';')
                .map(str::trim)
                .filter(|part| !part.is_empty())
                .collect::<Vec<_>>()
                .join("; "),
        }
    }
}

/// Backend endpoints and the switches that change how the proxy talks to it.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub chat_url: String,
    pub models_url: String,
    pub files_url: String,
    pub cookie: String,
    /// Forces the outbound `stream` flag to false whatever the client asked.
    pub force_non_stream: bool,
    /// Drops SSE lines byte-identical to the line right before them.
    pub skip_duplicate_lines: bool,
    pub request_timeout_ms: Option<u64>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            chat_url: DEFAULT_CHAT_URL.to_string(),
            models_url: DEFAULT_MODELS_URL.to_string(),
            files_url: DEFAULT_FILES_URL.to_string(),
            cookie: String::new(),
            force_non_stream: false,
            skip_duplicate_lines: false,
            request_timeout_ms: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// `EnvFilter` directive, or `None` when logging is switched off.
    pub level: Option<String>,
    pub dir: Option<PathBuf>,
    pub retention_days: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Some("info".to_string()),
            dir: None,
            retention_days: 30,
        }
    }
}

/// `NONE` turns logging off; anything else is passed to the env filter lowercased.
pub fn parse_log_level(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.eq_ignore_ascii_case("none") {
        return None;
    }
    if trimmed.is_empty() {
        return Some("info".to_string());
    }
    Some(trimmed.to_ascii_lowercase())
}

pub fn parse_bool_flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
