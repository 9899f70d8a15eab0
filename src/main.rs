use anyhow::Context;
use messages2chat::config::ProxyConfig;
use messages2chat::server::{build_router, AppState};
use messages2chat::util::{env_bind_addr, init_tracing};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    // --config=<path> loads a JSON config file instead of the environment.
    let config_arg = std::env::args()
        .find(|a| a.starts_with("--config="))
        .and_then(|a| a.strip_prefix("--config=").map(str::to_string));

    let config = match config_arg {
        Some(path) => {
            tracing::info!("Loading proxy configuration from: {}", path);
            ProxyConfig::load_from_file(&path)?
        }
        None => ProxyConfig::from_env(),
    };

    let dialect = config.dialect();
    if config.api_key.is_none() {
        tracing::warn!(
            "{} is not set; upstream requests are sent without credentials",
            dialect.credential_env
        );
    }
    tracing::info!(
        dialect = dialect.name(),
        upstream = %config.completions_url(),
        reasoning_model = config.reasoning_model.as_deref().unwrap_or("<client model>"),
        completion_model = config.completion_model.as_deref().unwrap_or("<client model>"),
        "proxy configured"
    );

    let app = build_router(AppState::from_config(config));

    let addr = env_bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!("Listening on http://{}", addr);

    axum::serve(listener, app)
        .await
        .context("server error")?;
    Ok(())
}
