use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Log output shape. JSON is the default so the pipeline can index the
/// request-id span field; plain text is for a local terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Plain,
}

impl LogFormat {
    pub fn from_env() -> Self {
        Self::parse(std::env::var("LOG_FORMAT").ok().as_deref())
    }

    fn parse(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            Some("plain") | Some("text") | Some("pretty") => LogFormat::Plain,
            _ => LogFormat::Json,
        }
    }
}

/// Installs the subscriber for one service binary. RUST_LOG drives the
/// filter; the request-id span field set by the router layers rides along on
/// every line.
pub fn init_tracing(service: &str, format: LogFormat) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = Registry::default().with(env_filter);

    match format {
        LogFormat::Json => {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .flatten_event(true)
                        .with_current_span(true),
                )
                .try_init()?;
        }
        LogFormat::Plain => {
            registry
                .with(tracing_subscriber::fmt::layer().compact())
                .try_init()?;
        }
    }

    tracing::info!(service, format = ?format, "tracing initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_format_defaults_to_json() {
        assert_eq!(LogFormat::parse(None), LogFormat::Json);
        assert_eq!(LogFormat::parse(Some("json")), LogFormat::Json);
        assert_eq!(LogFormat::parse(Some("garbage")), LogFormat::Json);
    }

    #[test]
    fn log_format_accepts_plain_spellings() {
        assert_eq!(LogFormat::parse(Some("plain")), LogFormat::Plain);
        assert_eq!(LogFormat::parse(Some("text")), LogFormat::Plain);
        assert_eq!(LogFormat::parse(Some(" pretty ")), LogFormat::Plain);
    }
}
