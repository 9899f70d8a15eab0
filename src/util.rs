use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tracing_subscriber::{fmt, EnvFilter};

/// Initialize dotenv and structured tracing based on RUST_LOG.
///
/// Env file lookup order:
/// - explicit path in ENV_FILE, ENVFILE or DOTENV_PATH
/// - `.envfile` in the working directory
/// - default `.env` discovery
pub fn init_tracing() {
    let mut env_source: Option<String> = None;
    for key in ["ENV_FILE", "ENVFILE", "DOTENV_PATH"] {
        let Some(path) = env_nonempty(key) else {
            continue;
        };
        if std::path::Path::new(&path).is_file() && dotenvy::from_filename(&path).is_ok() {
            env_source = Some(format!("{path} ({key})"));
            break;
        }
    }
    if env_source.is_none()
        && std::path::Path::new(".envfile").is_file()
        && dotenvy::from_filename(".envfile").is_ok()
    {
        env_source = Some(".envfile".into());
    }
    if env_source.is_none() {
        env_source = dotenvy::dotenv().ok().map(|p| p.display().to_string());
    }

    // RUST_LOG may come from the env file loaded above.
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=info".into());
    let subscriber = fmt().with_env_filter(EnvFilter::new(filter)).finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    tracing::info!(
        "Environment loaded from: {}",
        env_source.as_deref().unwrap_or("process environment")
    );
}

/// Get the bind address for the HTTP server from env or default to 0.0.0.0:8088.
pub fn env_bind_addr() -> String {
    env_nonempty("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:8088".into())
}

/// Trimmed value of an environment variable, `None` when unset or blank.
pub fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// 1, true, yes, on (case-insensitive).
pub fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

pub fn env_flag(key: &str) -> bool {
    env_nonempty(key).is_some_and(|v| is_truthy(&v))
}

/// Parse an environment variable, logging and ignoring unparsable values.
pub fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    let raw = env_nonempty(key)?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!("ignoring {key}={raw:?}: not a valid value");
            None
        }
    }
}

/// Build an HTTP client honoring proxy and timeout environment variables.
///
/// Environment:
/// - MESSAGES2CHAT_NO_PROXY = 1|true|yes|on  -> disable all proxies
/// - MESSAGES2CHAT_PROXY_URL = <url>         -> proxy for all schemes
/// - MESSAGES2CHAT_HTTP_TIMEOUT_SECONDS      -> overall request timeout (u64)
///
/// HTTP_PROXY / HTTPS_PROXY are picked up by reqwest itself unless proxies are disabled.
pub fn build_http_client_from_env() -> reqwest::Client {
    let mut builder = reqwest::Client::builder();

    if let Some(secs) = env_parse::<u64>("MESSAGES2CHAT_HTTP_TIMEOUT_SECONDS") {
        builder = builder.timeout(Duration::from_secs(secs));
    }

    if env_flag("MESSAGES2CHAT_NO_PROXY") {
        builder = builder.no_proxy();
    } else if let Some(url) = env_nonempty("MESSAGES2CHAT_PROXY_URL") {
        match reqwest::Proxy::all(&url) {
            Ok(p) => builder = builder.proxy(p),
            Err(e) => tracing::warn!(error = %e, "ignoring invalid MESSAGES2CHAT_PROXY_URL"),
        }
    }

    builder = builder.user_agent(format!("messages2chat/{}", env!("CARGO_PKG_VERSION")));

    builder.build().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "falling back to default HTTP client");
        reqwest::Client::new()
    })
}

/// Comma-separated list from an environment variable.
///
/// `None` means "any": the variable is unset, `*`, or yields no valid entries.
fn env_list<T>(key: &str, parse: impl Fn(&str) -> Option<T>) -> Option<Vec<T>> {
    let raw = env_nonempty(key)?;
    if raw == "*" {
        return None;
    }
    let vals: Vec<T> = raw
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .filter_map(parse)
        .collect();
    (!vals.is_empty()).then_some(vals)
}

/// Build a CORS layer from environment variables.
///
/// Environment:
/// - CORS_ALLOWED_ORIGINS  -> comma list or `*` (default any)
/// - CORS_ALLOWED_METHODS  -> comma list or `*` (default any)
/// - CORS_ALLOWED_HEADERS  -> comma list or `*` (default any)
/// - CORS_ALLOW_CREDENTIALS -> 1|true|yes|on
/// - CORS_MAX_AGE          -> seconds
///
/// With credentials enabled, "any" is expressed by mirroring the request, since a
/// wildcard cannot be combined with credentials.
pub fn cors_layer_from_env() -> CorsLayer {
    let credentials = env_flag("CORS_ALLOW_CREDENTIALS");

    let origins = env_list("CORS_ALLOWED_ORIGINS", |p| http::HeaderValue::from_str(p).ok());
    let methods = env_list("CORS_ALLOWED_METHODS", |p| {
        http::Method::from_bytes(p.to_ascii_uppercase().as_bytes()).ok()
    });
    let headers = env_list("CORS_ALLOWED_HEADERS", |p| {
        http::header::HeaderName::try_from(p).ok()
    });

    let mut layer = CorsLayer::new()
        .allow_origin(match (origins, credentials) {
            (Some(list), _) => AllowOrigin::list(list),
            (None, true) => AllowOrigin::mirror_request(),
            (None, false) => AllowOrigin::any(),
        })
        .allow_methods(match (methods, credentials) {
            (Some(list), _) => AllowMethods::list(list),
            (None, true) => AllowMethods::mirror_request(),
            (None, false) => AllowMethods::any(),
        })
        .allow_headers(match (headers, credentials) {
            (Some(list), _) => AllowHeaders::list(list),
            (None, true) => AllowHeaders::mirror_request(),
            (None, false) => AllowHeaders::any(),
        });

    if credentials {
        layer = layer.allow_credentials(true);
    }
    if let Some(secs) = env_parse::<u64>("CORS_MAX_AGE") {
        layer = layer.max_age(Duration::from_secs(secs));
    }
    layer
}

/// Mask a credential for display: first and last four characters kept.
pub fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 8 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}...{tail}")
}

/// Payload dumping toggled by the `DEBUG` setting.
#[derive(Debug, Clone, Copy, Default)]
pub struct DebugLog {
    pub enabled: bool,
}

impl DebugLog {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    /// Log `value` as JSON at info level when enabled.
    pub fn payload<T: Serialize + ?Sized>(&self, label: &str, value: &T) {
        if !self.enabled {
            return;
        }
        match serde_json::to_string_pretty(value) {
            Ok(json) => tracing::info!("{label}:\n{json}"),
            Err(e) => tracing::warn!(error = %e, "{label}: payload not serializable"),
        }
    }

    pub fn text(&self, label: &str, text: &str) {
        if self.enabled {
            tracing::info!("{label}: {text}");
        }
    }
}
