//! Request filters.
//!
//! A filter takes ownership of the bound request and returns a rewritten
//! one, or refuses with a [`FilterError`]. Chains run in declaration order:
//! API-level filters first, then method-level ones. Filters are shared
//! across concurrent invocations, so they hold no per-request state.

use std::fmt;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use tracing::trace;

use crate::error::FilterError;
use crate::http::HttpRequest;
use crate::signing::CredentialSource;

pub trait RequestFilter: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    fn filter(&self, request: HttpRequest) -> Result<HttpRequest, FilterError>;
}

/// An ordered list of filters.
#[derive(Debug, Clone, Default)]
pub struct FilterChain(Vec<Arc<dyn RequestFilter>>);

impl FilterChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, filter: impl RequestFilter + 'static) {
        self.0.push(Arc::new(filter));
    }

    pub fn push_arc(&mut self, filter: Arc<dyn RequestFilter>) {
        self.0.push(filter);
    }

    /// Appends every filter of `other`, keeping its order.
    pub fn extend(&mut self, other: &FilterChain) {
        self.0.extend(other.0.iter().cloned());
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.0.iter().map(|f| f.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Runs each filter on the output of the previous one. The first
    /// refusal stops the chain.
    pub fn apply(&self, request: HttpRequest) -> Result<HttpRequest, FilterError> {
        self.0.iter().try_fold(request, |request, filter| {
            trace!(filter = filter.name(), "applying request filter");
            filter.filter(request)
        })
    }
}

/// Adds `Authorization: Basic base64(identity:secret)`.
#[derive(Debug)]
pub struct BasicAuthentication<C> {
    credentials: C,
}

impl<C: CredentialSource> BasicAuthentication<C> {
    pub fn new(credentials: C) -> Self {
        Self { credentials }
    }
}

impl<C: CredentialSource + 'static> RequestFilter for BasicAuthentication<C> {
    fn name(&self) -> &'static str {
        "BasicAuthentication"
    }

    fn filter(&self, mut request: HttpRequest) -> Result<HttpRequest, FilterError> {
        let creds = self.credentials.credentials().ok_or_else(|| FilterError::MissingCredentials {
            filter: self.name().to_string(),
        })?;
        let token = STANDARD.encode(format!("{}:{}", creds.identity, creds.secret));
        request.set_header("Authorization", format!("Basic {token}"));
        Ok(request)
    }
}

/// Removes any `Expect` header so servers that reject `100-continue` answer.
#[derive(Debug, Clone, Copy, Default)]
pub struct StripExpectHeader;

impl RequestFilter for StripExpectHeader {
    fn name(&self) -> &'static str {
        "StripExpectHeader"
    }

    fn filter(&self, mut request: HttpRequest) -> Result<HttpRequest, FilterError> {
        request.remove_header("Expect");
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::HttpMethod;
    use crate::signing::Credentials;

    #[derive(Debug)]
    struct Tag(&'static str);

    impl RequestFilter for Tag {
        fn name(&self) -> &'static str {
            self.0
        }

        fn filter(&self, mut request: HttpRequest) -> Result<HttpRequest, FilterError> {
            request.add_header("X-Seen", self.0);
            Ok(request)
        }
    }

    #[derive(Debug)]
    struct Refuse;

    impl RequestFilter for Refuse {
        fn name(&self) -> &'static str {
            "Refuse"
        }

        fn filter(&self, _request: HttpRequest) -> Result<HttpRequest, FilterError> {
            Err(FilterError::Rejected {
                filter: "Refuse".to_string(),
                message: "no".to_string(),
            })
        }
    }

    #[test]
    fn chain_runs_in_order() {
        let mut chain = FilterChain::new();
        chain.push(Tag("api"));
        let mut method = FilterChain::new();
        method.push(Tag("method"));
        chain.extend(&method);

        let out = chain.apply(HttpRequest::new(HttpMethod::Get, "http://h/")).unwrap();
        let seen: Vec<&str> = out.headers.iter().map(|(_, v)| v.as_str()).collect();
        assert_eq!(seen, vec!["api", "method"]);
        assert_eq!(chain.names(), vec!["api", "method"]);
    }

    #[test]
    fn refusal_stops_the_chain() {
        let mut chain = FilterChain::new();
        chain.push(Refuse);
        chain.push(Tag("never"));
        let err = chain.apply(HttpRequest::new(HttpMethod::Get, "http://h/")).unwrap_err();
        assert!(matches!(err, FilterError::Rejected { .. }));
    }

    #[test]
    fn basic_auth_encodes_credentials() {
        let filter = BasicAuthentication::new(Credentials::new("Aladdin", "open sesame"));
        let out = filter.filter(HttpRequest::new(HttpMethod::Get, "http://h/")).unwrap();
        assert_eq!(out.header("Authorization"), Some("Basic QWxhZGRpbjpvcGVuIHNlc2FtZQ=="));
    }

    #[test]
    fn strip_expect_removes_header() {
        let mut req = HttpRequest::new(HttpMethod::Put, "http://h/");
        req.add_header("Expect", "100-continue");
        req.add_header("X-Keep", "1");
        let out = StripExpectHeader.filter(req).unwrap();
        assert_eq!(out.headers, vec![("X-Keep".to_string(), "1".to_string())]);
    }
}
