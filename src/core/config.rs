use std::env;

use url::Url;

pub const DEFAULT_MODEL: &str = "tgi";
pub const DEFAULT_MAX_TOKENS: u32 = 150;
pub const DEFAULT_MESSAGE_LIMIT: usize = 25;
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub inference_url: String,
    pub inference_model: String,
    pub max_tokens: u32,
    pub request_timeout_secs: u64,
    /// Ask the endpoint for the event-stream variant instead of a single envelope.
    pub inference_stream: bool,
    pub message_limit: usize,
}

impl AppConfig {
    /// Config pointing at `inference_url` with every other setting defaulted.
    #[must_use]
    pub fn new(inference_url: impl Into<String>) -> Self {
        Self {
            inference_url: inference_url.into(),
            inference_model: DEFAULT_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            request_timeout_secs: DEFAULT_TIMEOUT_SECS,
            inference_stream: false,
            message_limit: DEFAULT_MESSAGE_LIMIT,
        }
    }

    /// # Errors
    ///
    /// Returns a description of the first missing or unparsable variable.
    pub fn from_env() -> Result<Self, String> {
        let inference_url =
            env::var("INFERENCE_URL").map_err(|e| format!("INFERENCE_URL: {}", e))?;
        validate_endpoint(&inference_url)?;

        Ok(Self {
            inference_url,
            inference_model: env::var("INFERENCE_MODEL")
                .unwrap_or_else(|_| DEFAULT_MODEL.to_string()),
            max_tokens: parse_var("INFERENCE_MAX_TOKENS", DEFAULT_MAX_TOKENS)?,
            request_timeout_secs: parse_var("INFERENCE_TIMEOUT_SECS", DEFAULT_TIMEOUT_SECS)?,
            inference_stream: parse_var("INFERENCE_STREAM", false)?,
            message_limit: parse_var("MESSAGE_LIMIT", DEFAULT_MESSAGE_LIMIT)?,
        })
    }
}

/// Checks that the endpoint is an absolute http(s) URL.
///
/// # Errors
///
/// Returns a description of why the URL was rejected.
pub fn validate_endpoint(raw: &str) -> Result<(), String> {
    let url = Url::parse(raw).map_err(|e| format!("INFERENCE_URL: {}", e))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(format!("INFERENCE_URL: unsupported scheme {}", other)),
    }
}

fn parse_var<T>(name: &str, default: T) -> Result<T, String>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|e| format!("{}: {}", name, e)),
        _ => Ok(default),
    }
}
