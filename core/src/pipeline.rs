//! Response parsing, error mapping and fallbacks.
//!
//! # Design
//! A completed exchange becomes an [`Outcome`]: the response when the
//! status is 2xx, otherwise a classified failure. Successes run through the
//! method's [`ResponsePipeline`] (one parser, then any transforms). Protocol
//! failures go through the method's [`ErrorMapper`] and the resulting
//! [`ApiError`] is offered to its [`Fallback`], which may turn it into a
//! benign value. Transport failures, timeouts and cancellations reach the
//! fallback too, but none of the built-in fallbacks recover them.
//!
//! Exactly one of a value or an error comes out.

use std::collections::BTreeSet;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{ApiError, TransportError};
use crate::http::HttpResponse;

/// Turns a 2xx response into the method's return value.
pub trait ResponseParser<T>: Send + Sync {
    fn name(&self) -> &'static str;

    fn parse(&self, response: &HttpResponse) -> Result<T, ApiError>;
}

fn deserialization(parser: &str, err: impl fmt::Display) -> ApiError {
    ApiError::DeserializationError(format!("{parser}: {err}"))
}

/// Deserializes a JSON body.
pub struct ParseJson<T>(PhantomData<fn() -> T>);

impl<T> ParseJson<T> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for ParseJson<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: DeserializeOwned> ResponseParser<T> for ParseJson<T> {
    fn name(&self) -> &'static str {
        "ParseJson"
    }

    fn parse(&self, response: &HttpResponse) -> Result<T, ApiError> {
        serde_json::from_slice(&response.body).map_err(|e| deserialization(self.name(), e))
    }
}

/// Deserializes an XML body.
pub struct ParseXml<T>(PhantomData<fn() -> T>);

impl<T> ParseXml<T> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for ParseXml<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: DeserializeOwned> ResponseParser<T> for ParseXml<T> {
    fn name(&self) -> &'static str {
        "ParseXml"
    }

    fn parse(&self, response: &HttpResponse) -> Result<T, ApiError> {
        let text = std::str::from_utf8(&response.body).map_err(|e| deserialization(self.name(), e))?;
        quick_xml::de::from_str(text).map_err(|e| deserialization(self.name(), e))
    }
}

/// `true` for any 2xx, body ignored.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReturnTrueIf2xx;

impl ResponseParser<bool> for ReturnTrueIf2xx {
    fn name(&self) -> &'static str {
        "ReturnTrueIf2xx"
    }

    fn parse(&self, _response: &HttpResponse) -> Result<bool, ApiError> {
        Ok(true)
    }
}

/// Discards the body.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReleasePayloadAndReturn;

impl ResponseParser<()> for ReleasePayloadAndReturn {
    fn name(&self) -> &'static str {
        "ReleasePayloadAndReturn"
    }

    fn parse(&self, _response: &HttpResponse) -> Result<(), ApiError> {
        Ok(())
    }
}

/// The body as a UTF-8 string.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReturnStringIf2xx;

impl ResponseParser<String> for ReturnStringIf2xx {
    fn name(&self) -> &'static str {
        "ReturnStringIf2xx"
    }

    fn parse(&self, response: &HttpResponse) -> Result<String, ApiError> {
        String::from_utf8(response.body.clone()).map_err(|e| deserialization(self.name(), e))
    }
}

/// Keys of a top-level JSON object.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParseKeySetFromJson;

impl ResponseParser<BTreeSet<String>> for ParseKeySetFromJson {
    fn name(&self) -> &'static str {
        "ParseKeySetFromJson"
    }

    fn parse(&self, response: &HttpResponse) -> Result<BTreeSet<String>, ApiError> {
        match serde_json::from_slice::<Value>(&response.body) {
            Ok(Value::Object(map)) => Ok(map.keys().cloned().collect()),
            Ok(other) => Err(deserialization(self.name(), format!("expected an object, got {other}"))),
            Err(e) => Err(deserialization(self.name(), e)),
        }
    }
}

/// Post-processes a parsed value.
pub trait Transform<I, O>: Send + Sync {
    fn name(&self) -> &'static str;

    fn apply(&self, input: I) -> Result<O, ApiError>;
}

/// Unwraps a collection that must hold exactly one element.
#[derive(Debug, Clone, Copy, Default)]
pub struct OnlyElement;

impl OnlyElement {
    const NAME: &'static str = "OnlyElement";
}

impl<E> Transform<Vec<E>, E> for OnlyElement {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn apply(&self, input: Vec<E>) -> Result<E, ApiError> {
        let len = input.len();
        let mut items = input.into_iter();
        match (items.next(), len) {
            (Some(only), 1) => Ok(only),
            _ => Err(deserialization(Self::NAME, format!("expected one element, got {len}"))),
        }
    }
}

type RunFn<T> = Arc<dyn Fn(&HttpResponse) -> Result<T, ApiError> + Send + Sync>;

/// A parser followed by zero or more transforms.
pub struct ResponsePipeline<T> {
    stages: Vec<&'static str>,
    run: RunFn<T>,
}

impl<T> Clone for ResponsePipeline<T> {
    fn clone(&self) -> Self {
        Self {
            stages: self.stages.clone(),
            run: Arc::clone(&self.run),
        }
    }
}

impl<T> fmt::Debug for ResponsePipeline<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponsePipeline").field("stages", &self.stages).finish()
    }
}

impl<T> ResponsePipeline<T> {
    /// Parser name first, then transform names in application order.
    pub fn stages(&self) -> &[&'static str] {
        &self.stages
    }

    pub fn parse(&self, response: &HttpResponse) -> Result<T, ApiError> {
        (self.run)(response)
    }
}

impl<T: 'static> ResponsePipeline<T> {
    pub fn new(parser: impl ResponseParser<T> + 'static) -> Self {
        let stages = vec![parser.name()];
        Self {
            stages,
            run: Arc::new(move |response: &HttpResponse| parser.parse(response)),
        }
    }

    pub fn transform<U: 'static>(self, transform: impl Transform<T, U> + 'static) -> ResponsePipeline<U> {
        let mut stages = self.stages;
        stages.push(transform.name());
        let run = self.run;
        ResponsePipeline {
            stages,
            run: Arc::new(move |response: &HttpResponse| transform.apply(run(response)?)),
        }
    }

    /// An infallible transform from a closure.
    pub fn map<U: 'static, F>(self, name: &'static str, f: F) -> ResponsePipeline<U>
    where
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        let mut stages = self.stages;
        stages.push(name);
        let run = self.run;
        ResponsePipeline {
            stages,
            run: Arc::new(move |response: &HttpResponse| run(response).map(&f)),
        }
    }
}

impl<T: DeserializeOwned + 'static> ResponsePipeline<T> {
    pub fn json() -> Self {
        Self::new(ParseJson::new())
    }

    pub fn xml() -> Self {
        Self::new(ParseXml::new())
    }
}

/// Turns a non-2xx response into an error.
pub trait ErrorMapper: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    fn map(&self, response: &HttpResponse) -> ApiError;
}

fn status_error(status: u16, message: String) -> ApiError {
    match status {
        401 | 403 => ApiError::Unauthorized { status, message },
        404 => ApiError::NotFound { message },
        409 => ApiError::Conflict { message },
        _ => ApiError::HttpError { status, message },
    }
}

/// Maps status codes onto typed errors, using the body as the message.
#[derive(Debug, Clone, Copy, Default)]
pub struct MapHttpStatus;

impl ErrorMapper for MapHttpStatus {
    fn name(&self) -> &'static str {
        "MapHttpStatus"
    }

    fn map(&self, response: &HttpResponse) -> ApiError {
        status_error(response.status, response.body_text())
    }
}

/// Like [`MapHttpStatus`] but takes the message from one field of a JSON
/// error body, falling back to the raw body.
#[derive(Debug, Clone)]
pub struct MapJsonErrorMessage {
    field: String,
}

impl MapJsonErrorMessage {
    pub fn new(field: impl Into<String>) -> Self {
        Self { field: field.into() }
    }
}

impl ErrorMapper for MapJsonErrorMessage {
    fn name(&self) -> &'static str {
        "MapJsonErrorMessage"
    }

    fn map(&self, response: &HttpResponse) -> ApiError {
        let message = serde_json::from_slice::<Value>(&response.body)
            .ok()
            .and_then(|body| match body.get(&self.field) {
                Some(Value::String(s)) => Some(s.clone()),
                Some(Value::Array(items)) => Some(
                    items
                        .iter()
                        .map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()))
                        .collect::<Vec<_>>()
                        .join("; "),
                ),
                Some(other) => Some(other.to_string()),
                None => None,
            })
            .unwrap_or_else(|| response.body_text());
        status_error(response.status, message)
    }
}

/// Recovers a value from a failed invocation, or declines.
pub trait Fallback<T>: Send + Sync {
    fn name(&self) -> &'static str;

    fn recover(&self, error: &ApiError) -> Option<T>;
}

fn is_not_found(error: &ApiError) -> bool {
    matches!(error, ApiError::NotFound { .. })
}

/// `None` on 404.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullOnNotFound;

impl<U> Fallback<Option<U>> for NullOnNotFound {
    fn name(&self) -> &'static str {
        "NullOnNotFound"
    }

    fn recover(&self, error: &ApiError) -> Option<Option<U>> {
        is_not_found(error).then_some(None)
    }
}

/// An empty collection on 404.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyOnNotFound;

impl<C: Default + IntoIterator> Fallback<C> for EmptyOnNotFound {
    fn name(&self) -> &'static str {
        "EmptyOnNotFound"
    }

    fn recover(&self, error: &ApiError) -> Option<C> {
        is_not_found(error).then(C::default)
    }
}

/// `false` on 404.
#[derive(Debug, Clone, Copy, Default)]
pub struct FalseOnNotFound;

impl Fallback<bool> for FalseOnNotFound {
    fn name(&self) -> &'static str {
        "FalseOnNotFound"
    }

    fn recover(&self, error: &ApiError) -> Option<bool> {
        is_not_found(error).then_some(false)
    }
}

/// `true` on 404, for deletes where a missing resource counts as deleted.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrueOnNotFound;

impl Fallback<bool> for TrueOnNotFound {
    fn name(&self) -> &'static str {
        "TrueOnNotFound"
    }

    fn recover(&self, error: &ApiError) -> Option<bool> {
        is_not_found(error).then_some(true)
    }
}

/// `()` on 404.
#[derive(Debug, Clone, Copy, Default)]
pub struct VoidOnNotFound;

impl Fallback<()> for VoidOnNotFound {
    fn name(&self) -> &'static str {
        "VoidOnNotFound"
    }

    fn recover(&self, error: &ApiError) -> Option<()> {
        is_not_found(error).then_some(())
    }
}

/// A fixed value for any of the listed statuses.
#[derive(Debug, Clone)]
pub struct ValueOnStatus<T> {
    statuses: Vec<u16>,
    value: T,
}

impl<T> ValueOnStatus<T> {
    pub fn new(statuses: impl IntoIterator<Item = u16>, value: T) -> Self {
        Self {
            statuses: statuses.into_iter().collect(),
            value,
        }
    }
}

impl<T: Clone + Send + Sync> Fallback<T> for ValueOnStatus<T> {
    fn name(&self) -> &'static str {
        "ValueOnStatus"
    }

    fn recover(&self, error: &ApiError) -> Option<T> {
        error
            .status()
            .filter(|s| self.statuses.contains(s))
            .map(|_| self.value.clone())
    }
}

/// Why an invocation did not produce a 2xx response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    /// The server answered with a non-2xx status.
    Status(HttpResponse),
    /// No response arrived.
    Transport(TransportError),
}

/// A finished exchange, classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success(HttpResponse),
    Failure(FailureKind),
}

impl Outcome {
    pub fn from_response(response: HttpResponse) -> Self {
        if response.is_success() {
            Outcome::Success(response)
        } else {
            Outcome::Failure(FailureKind::Status(response))
        }
    }

    pub fn from_transport(error: TransportError) -> Self {
        Outcome::Failure(FailureKind::Transport(error))
    }

    /// The response, if the server sent one.
    pub fn response(&self) -> Option<&HttpResponse> {
        match self {
            Outcome::Success(response) | Outcome::Failure(FailureKind::Status(response)) => Some(response),
            Outcome::Failure(FailureKind::Transport(_)) => None,
        }
    }
}
