use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// The gateway is the first hop, so its lines carry the request id that the
/// upstream services log against. Output is JSON for the pipeline unless
/// LOG_FORMAT asks for plain text.
pub fn init_tracing() -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let plain = matches!(
        std::env::var("LOG_FORMAT").ok().as_deref().map(str::trim),
        Some("plain") | Some("text") | Some("pretty")
    );

    let registry = Registry::default().with(env_filter);
    if plain {
        registry
            .with(tracing_subscriber::fmt::layer().compact())
            .try_init()?;
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .flatten_event(true)
                    .with_current_span(true),
            )
            .try_init()?;
    }

    tracing::info!(service = "retailops-gateway", "tracing initialized");
    Ok(())
}
