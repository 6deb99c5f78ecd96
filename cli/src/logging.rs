//! Subscriber setup for the `wsbus` binary: one `EnvFilter` built from the
//! configured levels, text or JSON output.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Levels for the global filter and for individual wsbus crates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Level applied to everything without its own entry.
    #[serde(default = "default_level")]
    pub level: String,
    /// Crate name to level, e.g. `"wsbus-client": "debug"`. Dashes are
    /// accepted and mapped to the underscored target name.
    #[serde(default)]
    pub components: HashMap<String, String>,
    /// One JSON object per event instead of the text formatter.
    #[serde(default)]
    pub json: bool,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            components: HashMap::new(),
            json: false,
        }
    }
}

impl LogConfig {
    /// Filter string such as `info,wsbus_client=debug`, components sorted.
    pub fn directives(&self) -> String {
        let mut components: Vec<_> = self.components.iter().collect();
        components.sort();
        let mut directives = self.level.clone();
        for (component, level) in components {
            directives.push_str(&format!(",{}={}", component.replace('-', "_"), level));
        }
        directives
    }
}

/// Install the global subscriber. A second call panics, so `main` calls it
/// once. Unparseable directives fall back to `info`.
pub fn init_tracing(config: &LogConfig) {
    let filter = EnvFilter::try_new(config.directives()).unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = tracing_subscriber::registry().with(filter);
    if config.json {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber.with(fmt::layer()).init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directives_include_component_overrides() {
        let config = LogConfig {
            level: "warn".into(),
            components: HashMap::from([
                ("wsbus-server".to_string(), "info".to_string()),
                ("wsbus-client".to_string(), "debug".to_string()),
            ]),
            json: false,
        };
        assert_eq!(
            config.directives(),
            "warn,wsbus_client=debug,wsbus_server=info"
        );
    }

    #[test]
    fn default_is_info() {
        assert_eq!(LogConfig::default().directives(), "info");
    }
}
