//! # Request headers
//!
//! A [`HeaderProvider`] supplies extra headers for the Upgrade request of a given URL, such as
//! authentication tokens shared with the application's other HTTP traffic. [`HeaderTable`] is a
//! provider backed by rules scoped globally, to a host or to a host and port.
//!
//! ```rust
//! use http::{HeaderName, HeaderValue};
//! use tickws::headers::{HeaderProvider, HeaderTable};
//! use url::Url;
//!
//! let table = HeaderTable::new();
//! let token = HeaderName::from_static("x-token");
//! table.set_global(token.clone(), Some(HeaderValue::from_static("anyone")));
//! table.set_for_host("api.example.com", token.clone(), Some(HeaderValue::from_static("api")));
//!
//! let url = Url::parse("wss://api.example.com/feed").unwrap();
//! assert_eq!(table.headers_for(&url)[&token], "api");
//! ```
use std::sync::{PoisonError, RwLock};

use http::{HeaderMap, HeaderName, HeaderValue};
use url::Url;

/// Produces the additional request headers for a URL.
pub trait HeaderProvider: Send + Sync {
    fn headers_for(&self, url: &Url) -> HeaderMap;
}

impl<F> HeaderProvider for F
where
    F: Fn(&Url) -> HeaderMap + Send + Sync,
{
    fn headers_for(&self, url: &Url) -> HeaderMap {
        self(url)
    }
}

/// Which URLs a header rule applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    /// Every URL.
    Global,
    /// URLs whose host matches, ignoring ASCII case.
    Host(String),
    /// URLs whose host and effective port match.
    HostPort(String, u16),
}

impl Scope {
    fn matches(&self, url: &Url) -> bool {
        let host = url.host_str().unwrap_or_default();
        match self {
            Self::Global => true,
            Self::Host(name) => name.eq_ignore_ascii_case(host),
            Self::HostPort(name, port) => {
                name.eq_ignore_ascii_case(host) && url.port_or_known_default() == Some(*port)
            }
        }
    }
}

#[derive(Debug)]
struct Rule {
    scope: Scope,
    name: HeaderName,
    value: HeaderValue,
}

/// Thread-safe table of header rules.
///
/// Rules apply in registration order, so when several rules for the same header match a URL the
/// one registered last wins.
#[derive(Debug, Default)]
pub struct HeaderTable {
    rules: RwLock<Vec<Rule>>,
}

impl HeaderTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds, replaces or, when `value` is `None`, removes the rule for `name` in `scope`.
    pub fn set(&self, scope: Scope, name: HeaderName, value: Option<HeaderValue>) {
        let mut rules = self.rules.write().unwrap_or_else(PoisonError::into_inner);
        let existing = rules
            .iter()
            .position(|rule| rule.scope == scope && rule.name == name);

        match (existing, value) {
            (Some(index), Some(value)) => rules[index].value = value,
            (Some(index), None) => {
                rules.remove(index);
            }
            (None, Some(value)) => rules.push(Rule { scope, name, value }),
            (None, None) => {}
        }
    }

    /// Sets a header sent to every host.
    pub fn set_global(&self, name: HeaderName, value: Option<HeaderValue>) {
        self.set(Scope::Global, name, value);
    }

    /// Sets a header sent to `host` on any port.
    pub fn set_for_host(&self, host: &str, name: HeaderName, value: Option<HeaderValue>) {
        self.set(Scope::Host(host.to_owned()), name, value);
    }

    /// Sets a header sent to `host` on `port` only.
    pub fn set_for_host_port(
        &self,
        host: &str,
        port: u16,
        name: HeaderName,
        value: Option<HeaderValue>,
    ) {
        self.set(Scope::HostPort(host.to_owned(), port), name, value);
    }

    /// Number of registered rules.
    pub fn len(&self) -> usize {
        self.rules.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl HeaderProvider for HeaderTable {
    fn headers_for(&self, url: &Url) -> HeaderMap {
        let rules = self.rules.read().unwrap_or_else(PoisonError::into_inner);

        let mut headers = HeaderMap::new();
        for rule in rules.iter().filter(|rule| rule.scope.matches(url)) {
            headers.insert(rule.name.clone(), rule.value.clone());
        }
        headers
    }
}
