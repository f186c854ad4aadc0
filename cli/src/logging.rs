//! Tracing / logging initialisation.

use chainscan_core::config::LogConfig;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Build the filter directive string: `"info,chainscan_core=debug"` etc.
pub fn directives(config: &LogConfig) -> String {
    let mut directives = config.level.clone();
    let mut components: Vec<_> = config.components.iter().collect();
    components.sort();
    for (component, level) in components {
        directives.push_str(&format!(",{}={}", component.replace('-', "_"), level));
    }
    directives
}

/// Initialise tracing once at startup. `RUST_LOG`, when set, wins over the
/// configured levels.
pub fn init_tracing(config: &LogConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(directives(config)))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    if config.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn component_overrides_are_appended() {
        let mut config = LogConfig::default();
        config.components.insert("chainscan-core".into(), "debug".into());
        config.components.insert("sqlx".into(), "warn".into());
        assert_eq!(directives(&config), "info,chainscan_core=debug,sqlx=warn");
    }
}
