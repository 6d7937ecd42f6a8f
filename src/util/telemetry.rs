use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Registration point for the tracing stack.
///
/// Installs an env-filtered fmt subscriber (`RUST_LOG` controls verbosity,
/// default `info`). Export pipelines are a deployment concern and hang off
/// the same `tracing` registry when present.
pub struct Telemetry {
    name: &'static str,
    version: &'static str,
}

impl Telemetry {
    pub fn new() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME"),
            version: env!("CARGO_PKG_VERSION"),
        }
    }

    pub fn with_name(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    pub fn with_version(mut self, version: &'static str) -> Self {
        self.version = version;
        self
    }

    /// Install the global subscriber. Call once at startup.
    pub fn register(self) -> Self {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
        tracing::debug!(name = self.name, version = self.version, "tracing initialized");
        self
    }
}

impl Default for Telemetry {
    fn default() -> Self {
        Self::new()
    }
}
