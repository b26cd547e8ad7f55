/* src/route.rs */

//! Route table: which paths are rate limited, and by what.

use crate::rate::Rate;
use crate::rate_by::RateBy;
use regex::Regex;
use std::sync::Arc;

/// Ordered identification schemes and their rates for one route.
///
/// Order matters: signature extraction tries header-based entries in the
/// order given here and settles on the first header the request carries.
pub type RouteRates = Vec<(Arc<RateBy>, Rate)>;

/// One rate-limiting rule.
///
/// `pattern` is matched against the request path; `methods` is the
/// case-insensitive set of HTTP methods the rule applies to. Requests that
/// match share buckets per caller identity, keyed by the pattern string, so
/// `/page/1` and `/page/2` under the pattern `/page/[^/]+` drain the same
/// bucket.
#[derive(Debug, Clone)]
pub struct Route {
    pattern: Regex,
    methods: Vec<String>,
    rates: RouteRates,
}

impl Route {
    pub fn new(
        pattern: Regex,
        methods: impl IntoIterator<Item = impl Into<String>>,
        rates: RouteRates,
    ) -> Self {
        Self {
            pattern,
            methods: methods.into_iter().map(Into::into).collect(),
            rates,
        }
    }

    /// The pattern source string; also the bucket id for this route.
    pub fn pattern_str(&self) -> &str {
        self.pattern.as_str()
    }

    pub(crate) fn methods(&self) -> &[String] {
        &self.methods
    }

    pub(crate) fn rates(&self) -> &RouteRates {
        &self.rates
    }

    /// The rate bound to `rate_by` on this route. Identity is the shared
    /// `Arc`, mirroring how the extraction step picks entries.
    pub(crate) fn rate_for(&self, rate_by: &Arc<RateBy>) -> Option<Rate> {
        self.rates
            .iter()
            .find(|(by, _)| Arc::ptr_eq(by, rate_by))
            .map(|(_, rate)| *rate)
    }

    fn matches(&self, path: &str, method: &str) -> bool {
        self.pattern.is_match(path)
            && self
                .methods
                .iter()
                .any(|m| m.eq_ignore_ascii_case(method))
    }
}

/// First route in configuration order matching both path and method, if any.
///
/// `None` means the request is not rate limited and passes straight through
/// to the upstream. Linear scan is fine here: the caller memoises per
/// `(path, method)`.
pub(crate) fn route_for(routes: &[Arc<Route>], path: &str, method: &str) -> Option<Arc<Route>> {
    routes
        .iter()
        .find(|route| route.matches(path, method))
        .cloned()
}
