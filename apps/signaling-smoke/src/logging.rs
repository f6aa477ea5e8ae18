//! Tracing bootstrap for the smoke binary.
//!
//! Stdout carries the observed transport events as JSON lines, so log output
//! goes to stderr.

use std::{env, io};

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,signaling_transport=debug,signaling_core=debug";
const FILTER_KEYS: [&str; 2] = ["RUST_LOG", "RSP_SIGNALING_LOG"];

/// Install the stderr subscriber, filtered by the first usable directive of
/// `RUST_LOG`, then `RSP_SIGNALING_LOG`, then the built-in default.
pub fn init() {
    let _ = tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_target(true)
        .with_env_filter(filter_from_lookup(|key| env::var(key).ok()))
        .try_init();
}

fn filter_from_lookup<F>(mut lookup: F) -> EnvFilter
where
    F: FnMut(&str) -> Option<String>,
{
    FILTER_KEYS
        .iter()
        .filter_map(|key| lookup(key))
        .filter(|value| !value.trim().is_empty())
        .find_map(|value| EnvFilter::try_new(value).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn filter_from_pairs(pairs: &[(&str, &str)]) -> String {
        let map = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect::<HashMap<_, _>>();
        filter_from_lookup(|key| map.get(key).cloned()).to_string()
    }

    #[test]
    fn default_filter_applies_without_env() {
        assert_eq!(
            filter_from_pairs(&[]),
            EnvFilter::new(DEFAULT_FILTER).to_string()
        );
    }

    #[test]
    fn rust_log_wins_over_signaling_log() {
        let filter = filter_from_pairs(&[("RUST_LOG", "warn"), ("RSP_SIGNALING_LOG", "trace")]);
        assert_eq!(filter, "warn");
    }

    #[test]
    fn blank_or_invalid_directives_fall_through() {
        let filter = filter_from_pairs(&[("RUST_LOG", "  "), ("RSP_SIGNALING_LOG", "debug")]);
        assert_eq!(filter, "debug");

        let filter = filter_from_pairs(&[("RSP_SIGNALING_LOG", "signaling_core=loudest")]);
        assert_eq!(filter, EnvFilter::new(DEFAULT_FILTER).to_string());
    }
}
