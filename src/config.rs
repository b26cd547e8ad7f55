/* src/config.rs */

//! Proxy configuration.
//!
//! Configuration is built in code (route patterns are regexes and validators
//! are closures, neither lives well in a file) and frozen at startup: every
//! lookup structure downstream relies on it never changing.

use crate::error::ConfigError;
use crate::route::Route;
use http::Uri;
use std::time::Duration;

/// Everything the proxy needs to run.
///
/// `routes` order is significant: the first route whose pattern and method
/// set match a request decides its rate limiting.
#[derive(Debug, Clone)]
pub struct Config {
    /// Origin every admitted request is forwarded to.
    pub upstream: Uri,
    /// Ordered rate-limiting rules; first match wins.
    pub routes: Vec<Route>,
    /// How long a full, untouched bucket survives before its gifter reclaims
    /// it. `None` leaves each gifter with ten of its own refill periods.
    pub buckets_stale_after: Option<Duration>,
}

impl Config {
    pub fn new(upstream: Uri, routes: Vec<Route>) -> Self {
        Self {
            upstream,
            routes,
            buckets_stale_after: None,
        }
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.buckets_stale_after = Some(stale_after);
        self
    }

    /// Checks the whole configuration and reports every problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();

        match self.upstream.scheme_str() {
            Some("http") | Some("https") => {}
            Some(other) => problems.push(format!("upstream scheme {other:?} is not http(s)")),
            None => problems.push("upstream url has no scheme".to_string()),
        }
        if self.upstream.authority().is_none() {
            problems.push("upstream url has no host".to_string());
        }

        if self.routes.is_empty() {
            problems.push("no routes configured".to_string());
        }
        for (i, route) in self.routes.iter().enumerate() {
            let name = format!("route {} ({:?})", i, route.pattern_str());
            if route.methods().is_empty() {
                // Fail closed: a rule that names no methods matches nothing,
                // which is never what its author meant.
                problems.push(format!("{name} has an empty methods list"));
            }
            if route.rates().is_empty() {
                problems.push(format!("{name} has no rates"));
            }
            for (rate_by, rate) in route.rates() {
                if rate.capacity() == 0 {
                    problems.push(format!(
                        "{name} has zero capacity for {:?}",
                        rate_by.key_name()
                    ));
                }
                if rate.period().is_zero() {
                    problems.push(format!(
                        "{name} has a zero refill period for {:?}",
                        rate_by.key_name()
                    ));
                }
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::new(problems))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate::{Rate, MINUTE};
    use crate::rate_by::RateBy;
    use regex::Regex;
    use std::time::Duration;

    fn upstream() -> Uri {
        "http://localhost:8012".parse().unwrap()
    }

    fn ip_route(pattern: &str) -> Route {
        Route::new(
            Regex::new(pattern).unwrap(),
            ["GET"],
            vec![(RateBy::client_ip(), Rate::new(5, MINUTE))],
        )
    }

    #[test]
    fn a_sane_config_validates() {
        let config = Config::new(upstream(), vec![ip_route("/about")]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn empty_routes_are_rejected() {
        let err = Config::new(upstream(), vec![]).validate().unwrap_err();
        assert_eq!(err.problems().len(), 1);
        assert!(err.problems()[0].contains("no routes"));
    }

    #[test]
    fn upstream_needs_scheme_and_host() {
        let config = Config::new("/just/a/path".parse().unwrap(), vec![ip_route("/a")]);
        let err = config.validate().unwrap_err();
        assert!(err.problems().iter().any(|p| p.contains("scheme")));
        assert!(err.problems().iter().any(|p| p.contains("host")));
    }

    #[test]
    fn routes_need_methods_and_rates() {
        let no_methods = Route::new(
            Regex::new("/a").unwrap(),
            Vec::<String>::new(),
            vec![(RateBy::client_ip(), Rate::new(5, MINUTE))],
        );
        let no_rates = Route::new(Regex::new("/b").unwrap(), ["GET"], vec![]);
        let err = Config::new(upstream(), vec![no_methods, no_rates])
            .validate()
            .unwrap_err();
        assert_eq!(err.problems().len(), 2);
        assert!(err.problems()[0].contains("methods"));
        assert!(err.problems()[1].contains("rates"));
    }

    #[test]
    fn degenerate_rates_are_rejected() {
        let route = Route::new(
            Regex::new("/a").unwrap(),
            ["GET"],
            vec![
                (RateBy::client_ip(), Rate::new(0, MINUTE)),
                (
                    RateBy::header(
                        "Authorization",
                        |_| true,
                        str::to_owned,
                        http::StatusCode::UNAUTHORIZED,
                        "Unauthorized",
                    ),
                    Rate::new(10, Duration::ZERO),
                ),
            ],
        );
        let err = Config::new(upstream(), vec![route]).validate().unwrap_err();
        assert!(err.problems().iter().any(|p| p.contains("zero capacity")));
        assert!(err.problems().iter().any(|p| p.contains("zero refill period")));
        let rendered = err.to_string();
        assert!(rendered.contains("invalid configuration"));
    }
}
