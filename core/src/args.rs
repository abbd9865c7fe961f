//! Call arguments and per-call request options.
//!
//! Every positional argument is captured as a `serde_json::Value` when the
//! call is made, so binders work on one uniform representation and the
//! invocation owns its arguments outright. `None`/`null` arguments become
//! [`Arg::Absent`]; absent arguments are omitted from the request, or
//! rejected when the parameter is not nullable.

use serde::Serialize;
use serde_json::Value;

use crate::error::ConstructionError;
use crate::http::Payload;

/// One positional call argument.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Absent,
    Value(Value),
    Payload(Payload),
    Options(RequestOptions),
}

impl Arg {
    pub fn is_absent(&self) -> bool {
        matches!(self, Arg::Absent)
    }
}

/// Ordered call arguments, one per declared parameter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Args(Vec<Arg>);

impl Args {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Appends a serializable argument. `None` serializes to null and is
    /// recorded as absent.
    pub fn value<T: Serialize + ?Sized>(mut self, value: &T) -> Result<Self, ConstructionError> {
        self.0.push(serialize(value)?);
        Ok(self)
    }

    /// Appends any argument shape: a serializable value, a raw
    /// [`Payload`] or [`RequestOptions`].
    pub fn arg(mut self, arg: impl IntoArg) -> Result<Self, ConstructionError> {
        self.0.push(arg.into_arg()?);
        Ok(self)
    }

    pub fn absent(mut self) -> Self {
        self.0.push(Arg::Absent);
        self
    }

    pub fn payload(mut self, payload: Payload) -> Self {
        self.0.push(Arg::Payload(payload));
        self
    }

    pub fn options(mut self, options: RequestOptions) -> Self {
        self.0.push(Arg::Options(options));
        self
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Arg> {
        self.0.get(index)
    }
}

fn serialize<T: Serialize + ?Sized>(value: &T) -> Result<Arg, ConstructionError> {
    let value = serde_json::to_value(value).map_err(|e| ConstructionError::Serialization(e.to_string()))?;
    Ok(match value {
        Value::Null => Arg::Absent,
        other => Arg::Value(other),
    })
}

/// Conversion of a typed call argument into an [`Arg`].
pub trait IntoArg {
    fn into_arg(self) -> Result<Arg, ConstructionError>;
}

impl<T: Serialize> IntoArg for T {
    fn into_arg(self) -> Result<Arg, ConstructionError> {
        serialize(&self)
    }
}

impl IntoArg for Payload {
    fn into_arg(self) -> Result<Arg, ConstructionError> {
        Ok(Arg::Payload(self))
    }
}

impl IntoArg for RequestOptions {
    fn into_arg(self) -> Result<Arg, ConstructionError> {
        Ok(Arg::Options(self))
    }
}

/// Extra request fragments supplied at call time.
///
/// Each part is merged at its own binder stage: the path suffix during path
/// resolution, query entries after declared query parameters, headers after
/// declared headers, form entries into the form body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestOptions {
    pub(crate) headers: Vec<(String, String)>,
    pub(crate) query: Vec<(String, String)>,
    pub(crate) form: Vec<(String, String)>,
    pub(crate) path_suffix: Option<String>,
    pub(crate) payload: Option<String>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn form(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.form.push((key.into(), value.into()));
        self
    }

    pub fn path_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.path_suffix = Some(suffix.into());
        self
    }

    pub fn string_payload(mut self, payload: impl Into<String>) -> Self {
        self.payload = Some(payload.into());
        self
    }
}

/// Renders a scalar argument the way it appears in a path, query or header.
pub(crate) fn render_scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}
