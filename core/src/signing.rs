//! Request signing and the credential and timestamp sources it consumes.
//!
//! [`SignedHeaderAuth`] hashes the path and body, builds a canonical string
//! from the verb, hashes, timestamp and identity, and attaches an
//! HMAC-SHA256 signature split across numbered headers:
//!
//! ```text
//! Method:PUT
//! Hashed Path:<b64 sha256(path)>
//! X-Ops-Content-Hash:<b64 sha256(body)>
//! X-Ops-Timestamp:2026-01-01T00:00:00Z
//! X-Ops-Userid:admin
//! ```
//!
//! Any previous signature headers are removed first, so signing an already
//! signed request yields the same result as signing it once.

use std::fmt;
use std::time::{Duration, Instant};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use parking_lot::RwLock;
use sha2::{Digest, Sha256};

use crate::error::FilterError;
use crate::filter::RequestFilter;
use crate::http::HttpRequest;

const SIGNATURE_CHUNK: usize = 60;

/// Identity and shared secret used to authenticate requests.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub identity: String,
    pub secret: String,
}

impl Credentials {
    pub fn new(identity: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            secret: secret.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("identity", &self.identity)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Where filters get credentials from.
pub trait CredentialSource: Send + Sync + fmt::Debug {
    fn credentials(&self) -> Option<Credentials>;
}

impl CredentialSource for Credentials {
    fn credentials(&self) -> Option<Credentials> {
        Some(self.clone())
    }
}

/// Reads credentials from two environment variables on every request.
#[derive(Debug, Clone)]
pub struct EnvCredentials {
    identity_var: String,
    secret_var: String,
}

impl EnvCredentials {
    pub fn new(identity_var: impl Into<String>, secret_var: impl Into<String>) -> Self {
        Self {
            identity_var: identity_var.into(),
            secret_var: secret_var.into(),
        }
    }
}

impl CredentialSource for EnvCredentials {
    fn credentials(&self) -> Option<Credentials> {
        let identity = std::env::var(&self.identity_var).ok()?;
        let secret = std::env::var(&self.secret_var).ok()?;
        Some(Credentials { identity, secret })
    }
}

/// Supplies the timestamp written into signed requests.
pub trait TimestampSource: Send + Sync + fmt::Debug {
    fn timestamp(&self) -> String;
}

fn now_iso8601() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// A timestamp shared by every caller of one client, recomputed at most
/// once per `refresh` interval.
#[derive(Debug)]
pub struct CachedTimestamp {
    refresh: Duration,
    cached: RwLock<Option<(Instant, String)>>,
}

impl CachedTimestamp {
    pub fn new(refresh: Duration) -> Self {
        Self {
            refresh,
            cached: RwLock::new(None),
        }
    }

    fn fresh(&self, entry: &Option<(Instant, String)>) -> Option<String> {
        match entry {
            Some((at, value)) if at.elapsed() < self.refresh => Some(value.clone()),
            _ => None,
        }
    }
}

impl TimestampSource for CachedTimestamp {
    fn timestamp(&self) -> String {
        if let Some(value) = self.fresh(&self.cached.read()) {
            return value;
        }
        let mut guard = self.cached.write();
        // another caller may have refreshed while we waited for the lock
        if let Some(value) = self.fresh(&guard) {
            return value;
        }
        let value = now_iso8601();
        *guard = Some((Instant::now(), value.clone()));
        value
    }
}

/// Always returns the same timestamp.
#[derive(Debug, Clone)]
pub struct FixedTimestamp(pub String);

impl TimestampSource for FixedTimestamp {
    fn timestamp(&self) -> String {
        self.0.clone()
    }
}

/// Signs requests with an HMAC over a canonical description of the request.
#[derive(Debug)]
pub struct SignedHeaderAuth<C, S> {
    credentials: C,
    timestamps: S,
    prefix: String,
}

impl<C: CredentialSource, S: TimestampSource> SignedHeaderAuth<C, S> {
    pub fn new(credentials: C, timestamps: S) -> Self {
        Self {
            credentials,
            timestamps,
            prefix: "X-Ops".to_string(),
        }
    }

    /// Header prefix, `X-Ops` unless changed.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    fn signature_headers(&self) -> [String; 5] {
        let p = &self.prefix;
        [
            format!("{p}-Sign"),
            format!("{p}-Userid"),
            format!("{p}-Timestamp"),
            format!("{p}-Content-Hash"),
            format!("{p}-Authorization-"),
        ]
    }

    /// The string that gets signed.
    pub fn canonical_request(&self, request: &HttpRequest, timestamp: &str, identity: &str) -> String {
        let body = request.payload.as_ref().map(|p| p.data.as_slice()).unwrap_or_default();
        let p = &self.prefix;
        format!(
            "Method:{}\nHashed Path:{}\n{p}-Content-Hash:{}\n{p}-Timestamp:{}\n{p}-Userid:{}",
            request.method,
            hash_b64(canonical_path(request.path()).as_bytes()),
            hash_b64(body),
            timestamp,
            identity,
        )
    }
}

impl<C, S> RequestFilter for SignedHeaderAuth<C, S>
where
    C: CredentialSource + 'static,
    S: TimestampSource + 'static,
{
    fn name(&self) -> &'static str {
        "SignedHeaderAuth"
    }

    fn filter(&self, mut request: HttpRequest) -> Result<HttpRequest, FilterError> {
        let creds = self.credentials.credentials().ok_or_else(|| FilterError::MissingCredentials {
            filter: self.name().to_string(),
        })?;

        let [sign, userid, timestamp_header, content_hash, authorization] = self.signature_headers();
        request.headers.retain(|(name, _)| {
            let owned = [&sign, &userid, &timestamp_header, &content_hash];
            !owned.iter().any(|h| name.eq_ignore_ascii_case(h))
                && !name.to_ascii_lowercase().starts_with(&authorization.to_ascii_lowercase())
        });

        let timestamp = self.timestamps.timestamp();
        let canonical = self.canonical_request(&request, &timestamp, &creds.identity);
        let mut mac = Hmac::<Sha256>::new_from_slice(creds.secret.as_bytes()).map_err(|e| FilterError::Rejected {
            filter: self.name().to_string(),
            message: e.to_string(),
        })?;
        mac.update(canonical.as_bytes());
        let signature = STANDARD.encode(mac.finalize().into_bytes());

        let body = request.payload.as_ref().map(|p| p.data.as_slice()).unwrap_or_default();
        let body_hash = hash_b64(body);
        for (i, chunk) in signature.as_bytes().chunks(SIGNATURE_CHUNK).enumerate() {
            request.add_header(format!("{authorization}{}", i + 1), String::from_utf8_lossy(chunk));
        }
        request.add_header(content_hash, body_hash);
        request.add_header(sign, "version=1.0");
        request.add_header(timestamp_header, timestamp);
        request.add_header(userid, creds.identity);
        Ok(request)
    }
}

fn hash_b64(data: &[u8]) -> String {
    STANDARD.encode(Sha256::digest(data))
}

/// Collapses repeated slashes and drops a trailing one.
fn canonical_path(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        out.push('/');
        out.push_str(segment);
    }
    if out.is_empty() {
        out.push('/');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{HttpMethod, Payload};

    fn signer() -> SignedHeaderAuth<Credentials, FixedTimestamp> {
        SignedHeaderAuth::new(
            Credentials::new("admin", "s3cret"),
            FixedTimestamp("2026-01-01T00:00:00Z".to_string()),
        )
    }

    fn request() -> HttpRequest {
        let mut req = HttpRequest::new(HttpMethod::Put, "http://localhost:4000/sandboxes/abc");
        req.add_header("Accept", "application/json");
        req.payload = Some(Payload::json(r#"{"is_completed":"true"}"#));
        req
    }

    #[test]
    fn canonical_string_layout() {
        let canonical = signer().canonical_request(&request(), "ts", "admin");
        let lines: Vec<&str> = canonical.lines().collect();
        assert_eq!(lines.len(), 5);
        assert_eq!(lines[0], "Method:PUT");
        assert_eq!(lines[1], format!("Hashed Path:{}", hash_b64(b"/sandboxes/abc")));
        assert_eq!(lines[3], "X-Ops-Timestamp:ts");
        assert_eq!(lines[4], "X-Ops-Userid:admin");
    }

    #[test]
    fn signing_adds_headers_after_existing_ones() {
        let signed = signer().filter(request()).unwrap();
        assert_eq!(signed.headers[0].0, "Accept");
        assert_eq!(signed.header("X-Ops-Sign"), Some("version=1.0"));
        assert_eq!(signed.header("X-Ops-Userid"), Some("admin"));
        assert_eq!(signed.header("X-Ops-Timestamp"), Some("2026-01-01T00:00:00Z"));
        // 32-byte mac is 44 base64 chars, one chunk
        assert_eq!(signed.header("X-Ops-Authorization-1").map(str::len), Some(44));
        assert_eq!(signed.header("X-Ops-Authorization-2"), None);
    }

    #[test]
    fn re_signing_is_idempotent() {
        let once = signer().filter(request()).unwrap();
        let twice = signer().filter(once.clone()).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn signature_depends_on_body() {
        let a = signer().filter(request()).unwrap();
        let mut other = request();
        other.payload = Some(Payload::json("{}"));
        let b = signer().filter(other).unwrap();
        assert_ne!(a.header("X-Ops-Authorization-1"), b.header("X-Ops-Authorization-1"));
        assert_ne!(a.header("X-Ops-Content-Hash"), b.header("X-Ops-Content-Hash"));
    }

    #[test]
    fn missing_credentials_are_reported() {
        let filter = SignedHeaderAuth::new(
            EnvCredentials::new("RESTWIRE_TEST_UNSET_ID", "RESTWIRE_TEST_UNSET_SECRET"),
            FixedTimestamp("t".to_string()),
        );
        let err = filter.filter(request()).unwrap_err();
        assert_eq!(
            err,
            FilterError::MissingCredentials {
                filter: "SignedHeaderAuth".to_string()
            }
        );
    }

    #[test]
    fn cached_timestamp_is_shared_within_refresh() {
        let source = CachedTimestamp::new(Duration::from_secs(3600));
        let first = source.timestamp();
        assert_eq!(source.timestamp(), first);
        assert!(first.ends_with('Z'));
    }

    #[test]
    fn canonical_path_collapses_slashes() {
        assert_eq!(canonical_path("//a///b/"), "/a/b");
        assert_eq!(canonical_path(""), "/");
    }

    #[test]
    fn credentials_debug_hides_secret() {
        let shown = format!("{:?}", Credentials::new("id", "hunter2"));
        assert!(!shown.contains("hunter2"));
    }
}
