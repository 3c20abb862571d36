//! Registry configuration.

/// Environment variable enabling hot-reload mode.
pub const HOT_RELOAD_ENV: &str = "DEFINE_HOT_RELOAD";

/// Registry configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryConfig {
    /// Allow re-registration of existing names, replacing the old value.
    pub hot_reload: bool,
}

impl RegistryConfig {
    /// Read configuration from the environment.
    ///
    /// Environment variables:
    /// - `DEFINE_HOT_RELOAD`: `1`, `true`, or `yes` enables hot-reload (default: off)
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            hot_reload: std::env::var(HOT_RELOAD_ENV)
                .ok()
                .is_some_and(|v| parse_flag(&v)),
        }
    }

    /// Enable or disable hot-reload.
    #[must_use]
    pub const fn with_hot_reload(mut self, hot_reload: bool) -> Self {
        self.hot_reload = hot_reload;
        self
    }
}

/// Parse a boolean flag value.
#[must_use]
pub fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag("1"));
        assert!(parse_flag("TRUE"));
        assert!(parse_flag(" yes "));
        assert!(!parse_flag("0"));
        assert!(!parse_flag(""));
        assert!(!parse_flag("nope"));
    }

    #[test]
    fn test_default_is_strict() {
        assert!(!RegistryConfig::default().hot_reload);
        assert!(RegistryConfig::default().with_hot_reload(true).hot_reload);
    }
}
