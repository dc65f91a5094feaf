//! Tracing subscriber setup.

use tracing_subscriber::{fmt, EnvFilter};

/// HTTP client internals are noisy at debug level.
const QUIET_DEPENDENCIES: &str = "hyper=warn,hyper_util=warn,reqwest=warn";

/// Map a `--loglevel` value to a tracing level name.
pub fn level_for(name: &str) -> &'static str {
    match name.to_ascii_lowercase().as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "warning" | "warn" => "warn",
        "error" | "critical" => "error",
        "none" | "notset" | "off" => "off",
        _ => "info",
    }
}

/// Filter directives for a `--loglevel` value.
pub fn filter_directives(name: &str) -> String {
    format!("{},{QUIET_DEPENDENCIES}", level_for(name))
}

/// Install the global subscriber once. `RUST_LOG` overrides `level`.
pub fn init_tracing(level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter_directives(level)));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn daemon_level_names_map_to_tracing_levels() {
        assert_eq!(level_for("debug"), "debug");
        assert_eq!(level_for("WARNING"), "warn");
        assert_eq!(level_for("critical"), "error");
        assert_eq!(level_for("none"), "off");
        assert_eq!(level_for("verbose"), "info");
    }

    #[test]
    fn directives_keep_http_internals_quiet() {
        assert_eq!(
            filter_directives("debug"),
            "debug,hyper=warn,hyper_util=warn,reqwest=warn"
        );
    }
}
