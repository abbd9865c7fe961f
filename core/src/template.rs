//! Declarations and the descriptor extractor.
//!
//! # Design
//! A provider declares each endpoint once: an [`ApiSpec`] carries what
//! every method of an API shares (path prefix, default headers, filters,
//! timeout), a [`MethodSpec`] carries one method (verb, path, positional
//! [`Param`]s, response pipeline, error strategy). [`RequestTemplate::extract`]
//! validates the pair and produces the immutable template plus the
//! [`ParamBinding`] table the binder chain walks on every call.
//!
//! All consistency checks happen here, at client-build time, so a method
//! that compiles can only fail at call time because of its arguments.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use crate::binder::{BindMapToJsonWrappedWith, BindMapToStringPayload, Binder, MapBinder};
use crate::error::ConstructionError;
use crate::filter::{FilterChain, RequestFilter};
use crate::http::HttpMethod;
use crate::pipeline::{ErrorMapper, Fallback, MapHttpStatus, ReleasePayloadAndReturn, ResponsePipeline};

/// Token replaced by the API version in header, query, form and payload values.
pub const API_VERSION_TOKEN: &str = "api-version";

/// Converts an argument before it is bound.
pub type ParamParser = Arc<dyn Fn(&Value) -> Result<Value, ConstructionError> + Send + Sync>;

/// Where a positional argument ends up in the request.
#[derive(Debug, Clone)]
pub enum BindTarget {
    Path(String),
    Query(String),
    Header(String),
    Form(String),
    /// Collected into the payload parameters handed to the map binder.
    Payload(String),
    /// The argument is the request body.
    Body,
    /// A per-parameter binder receives the argument and the request.
    Custom(Arc<dyn Binder>),
    /// A [`RequestOptions`](crate::args::RequestOptions) argument.
    Options,
}

impl BindTarget {
    fn describe(&self) -> String {
        match self {
            BindTarget::Path(name) => format!("path {name}"),
            BindTarget::Query(name) => format!("query {name}"),
            BindTarget::Header(name) => format!("header {name}"),
            BindTarget::Form(name) => format!("form {name}"),
            BindTarget::Payload(name) => format!("payload {name}"),
            BindTarget::Body => "body".to_string(),
            BindTarget::Custom(binder) => format!("binder {}", binder.name()),
            BindTarget::Options => "options".to_string(),
        }
    }
}

/// Declaration of one positional parameter.
#[derive(Clone)]
pub struct Param {
    target: BindTarget,
    nullable: bool,
    parser: Option<ParamParser>,
    skip_encoding: Vec<char>,
}

impl Param {
    fn new(target: BindTarget) -> Self {
        Self {
            target,
            nullable: false,
            parser: None,
            skip_encoding: Vec::new(),
        }
    }

    pub fn path(name: impl Into<String>) -> Self {
        Self::new(BindTarget::Path(name.into()))
    }

    pub fn query(key: impl Into<String>) -> Self {
        Self::new(BindTarget::Query(key.into()))
    }

    pub fn header(name: impl Into<String>) -> Self {
        Self::new(BindTarget::Header(name.into()))
    }

    pub fn form(key: impl Into<String>) -> Self {
        Self::new(BindTarget::Form(key.into()))
    }

    pub fn payload(key: impl Into<String>) -> Self {
        Self::new(BindTarget::Payload(key.into()))
    }

    pub fn body() -> Self {
        Self::new(BindTarget::Body)
    }

    pub fn binder(binder: impl Binder + 'static) -> Self {
        Self::new(BindTarget::Custom(Arc::new(binder)))
    }

    /// Per-call [`RequestOptions`](crate::args::RequestOptions). Always nullable.
    pub fn options() -> Self {
        Self {
            nullable: true,
            ..Self::new(BindTarget::Options)
        }
    }

    /// An absent argument is omitted instead of rejected.
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn parser<F>(mut self, parser: F) -> Self
    where
        F: Fn(&Value) -> Result<Value, ConstructionError> + Send + Sync + 'static,
    {
        self.parser = Some(Arc::new(parser));
        self
    }

    /// Leaves `c` unencoded when a path value is substituted, so a key
    /// such as `dir/file.txt` keeps its separators.
    pub fn skip_encoding(mut self, c: char) -> Self {
        self.skip_encoding.push(c);
        self
    }
}

impl fmt::Debug for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Param")
            .field("target", &self.target)
            .field("nullable", &self.nullable)
            .field("parser", &self.parser.is_some())
            .field("skip_encoding", &self.skip_encoding)
            .finish()
    }
}

/// Argument index bound to its target, built once per method.
#[derive(Clone)]
pub struct ParamBinding {
    pub index: usize,
    pub target: BindTarget,
    pub nullable: bool,
    pub skip_encoding: Vec<char>,
    pub(crate) parser: Option<ParamParser>,
}

impl ParamBinding {
    pub fn describe(&self) -> String {
        self.target.describe()
    }

    pub(crate) fn parse(&self, value: Value) -> Result<Value, ConstructionError> {
        match &self.parser {
            Some(parser) => parser(&value),
            None => Ok(value),
        }
    }
}

impl fmt::Debug for ParamBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParamBinding")
            .field("index", &self.index)
            .field("target", &self.target)
            .field("nullable", &self.nullable)
            .field("skip_encoding", &self.skip_encoding)
            .finish()
    }
}

/// Declarations shared by every method of one API.
#[derive(Debug, Clone, Default)]
pub struct ApiSpec {
    name: String,
    path: String,
    headers: Vec<(String, String)>,
    query: Vec<(String, Option<String>)>,
    form: Vec<(String, String)>,
    consumes: Vec<String>,
    produces: Option<String>,
    filters: FilterChain,
    timeout: Option<Duration>,
    api_version: Option<String>,
}

impl ApiSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Prefix prepended to every method path.
    pub fn path(mut self, prefix: impl Into<String>) -> Self {
        self.path = prefix.into();
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), Some(value.into())));
        self
    }

    pub fn form(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.form.push((key.into(), value.into()));
        self
    }

    /// Media type sent as `Accept`.
    pub fn consumes(mut self, media_type: impl Into<String>) -> Self {
        self.consumes.push(media_type.into());
        self
    }

    /// Media type forced onto the payload.
    pub fn produces(mut self, media_type: impl Into<String>) -> Self {
        self.produces = Some(media_type.into());
        self
    }

    pub fn filter(mut self, filter: impl RequestFilter + 'static) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn filter_arc(mut self, filter: Arc<dyn RequestFilter>) -> Self {
        self.filters.push_arc(filter);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn api_version(mut self, version: impl Into<String>) -> Self {
        self.api_version = Some(version.into());
        self
    }
}

/// The request half of a method declaration.
#[derive(Debug, Clone)]
pub(crate) struct RequestDecl {
    pub(crate) name: String,
    pub(crate) verb: Option<HttpMethod>,
    pub(crate) path: String,
    pub(crate) params: Vec<Param>,
    pub(crate) headers: Vec<(String, String)>,
    pub(crate) query: Vec<(String, Option<String>)>,
    pub(crate) form: Vec<(String, String)>,
    pub(crate) payload_defaults: Vec<(String, String)>,
    pub(crate) consumes: Vec<String>,
    pub(crate) produces: Option<String>,
    pub(crate) filters: FilterChain,
    pub(crate) override_filters: bool,
    pub(crate) map_binder: Option<Arc<dyn MapBinder>>,
    pub(crate) timeout: Option<Duration>,
}

/// Declaration of one API method returning `T`.
pub struct MethodSpec<T> {
    pub(crate) request: RequestDecl,
    pub(crate) response: ResponsePipeline<T>,
    pub(crate) error_mapper: Arc<dyn ErrorMapper>,
    pub(crate) fallback: Option<Arc<dyn Fallback<T>>>,
}

impl MethodSpec<()> {
    /// A method with no verb yet; extraction rejects it until one is set.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            request: RequestDecl {
                name: name.into(),
                verb: None,
                path: String::new(),
                params: Vec::new(),
                headers: Vec::new(),
                query: Vec::new(),
                form: Vec::new(),
                payload_defaults: Vec::new(),
                consumes: Vec::new(),
                produces: None,
                filters: FilterChain::new(),
                override_filters: false,
                map_binder: None,
                timeout: None,
            },
            response: ResponsePipeline::new(ReleasePayloadAndReturn),
            error_mapper: Arc::new(MapHttpStatus),
            fallback: None,
        }
    }

    fn with_verb(name: impl Into<String>, verb: HttpMethod, path: impl Into<String>) -> Self {
        Self::new(name).verb(verb).path(path)
    }

    pub fn get(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self::with_verb(name, HttpMethod::Get, path)
    }

    pub fn head(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self::with_verb(name, HttpMethod::Head, path)
    }

    pub fn post(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self::with_verb(name, HttpMethod::Post, path)
    }

    pub fn put(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self::with_verb(name, HttpMethod::Put, path)
    }

    pub fn patch(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self::with_verb(name, HttpMethod::Patch, path)
    }

    pub fn delete(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self::with_verb(name, HttpMethod::Delete, path)
    }

    pub fn options(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self::with_verb(name, HttpMethod::Options, path)
    }
}

impl<T: 'static> MethodSpec<T> {
    pub fn verb(mut self, verb: HttpMethod) -> Self {
        self.request.verb = Some(verb);
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.request.path = path.into();
        self
    }

    /// Declares the next positional parameter.
    pub fn param(mut self, param: Param) -> Self {
        self.request.params.push(param);
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.request.headers.push((name.into(), value.into()));
        self
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.request.query.push((key.into(), Some(value.into())));
        self
    }

    /// A query key sent without a value (`?acl`).
    pub fn query_flag(mut self, key: impl Into<String>) -> Self {
        self.request.query.push((key.into(), None));
        self
    }

    pub fn form(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.request.form.push((key.into(), value.into()));
        self
    }

    /// A fixed payload parameter handed to the map binder.
    pub fn payload_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.request.payload_defaults.push((key.into(), value.into()));
        self
    }

    pub fn consumes(mut self, media_type: impl Into<String>) -> Self {
        self.request.consumes.push(media_type.into());
        self
    }

    pub fn produces(mut self, media_type: impl Into<String>) -> Self {
        self.request.produces = Some(media_type.into());
        self
    }

    pub fn filter(mut self, filter: impl RequestFilter + 'static) -> Self {
        self.request.filters.push(filter);
        self
    }

    pub fn filter_arc(mut self, filter: Arc<dyn RequestFilter>) -> Self {
        self.request.filters.push_arc(filter);
        self
    }

    /// Method filters replace the API filter chain instead of extending it.
    pub fn override_filters(mut self) -> Self {
        self.request.override_filters = true;
        self
    }

    pub fn map_binder(mut self, binder: impl MapBinder + 'static) -> Self {
        self.request.map_binder = Some(Arc::new(binder));
        self
    }

    /// Payload built by filling `{key}` placeholders from payload parameters.
    pub fn string_payload(self, template: impl Into<String>) -> Self {
        self.map_binder(BindMapToStringPayload::new(template))
    }

    /// Payload parameters serialized as a JSON object nested under `key`.
    pub fn wrap_with(self, key: impl Into<String>) -> Self {
        self.map_binder(BindMapToJsonWrappedWith::new(key))
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.request.timeout = Some(timeout);
        self
    }

    /// Replaces the response pipeline. Any declared fallback is dropped,
    /// so declare fallbacks after the return type.
    pub fn returning<U: 'static>(self, response: ResponsePipeline<U>) -> MethodSpec<U> {
        MethodSpec {
            request: self.request,
            response,
            error_mapper: self.error_mapper,
            fallback: None,
        }
    }

    pub fn on_error(mut self, mapper: impl ErrorMapper + 'static) -> Self {
        self.error_mapper = Arc::new(mapper);
        self
    }

    pub fn fallback(mut self, fallback: impl Fallback<T> + 'static) -> Self {
        self.fallback = Some(Arc::new(fallback));
        self
    }

    pub fn name(&self) -> &str {
        &self.request.name
    }
}

/// Immutable, per-method description of how to build a request.
#[derive(Debug, Clone)]
pub struct RequestTemplate {
    name: String,
    verb: HttpMethod,
    path: String,
    headers: Vec<(String, String)>,
    query: Vec<(String, Option<String>)>,
    form: Vec<(String, String)>,
    payload_defaults: Vec<(String, String)>,
    accept: Vec<String>,
    produces: Option<String>,
    map_binder: Option<Arc<dyn MapBinder>>,
    filters: FilterChain,
    timeout: Option<Duration>,
    api_version: Option<String>,
    parser: Vec<&'static str>,
    error_mapper: &'static str,
    fallback: Option<&'static str>,
}

impl RequestTemplate {
    /// Validates a method declaration against its API and builds the
    /// template and binding table.
    pub fn extract<T>(api: &ApiSpec, spec: &MethodSpec<T>) -> Result<(RequestTemplate, Vec<ParamBinding>), ConstructionError> {
        let decl = &spec.request;
        let method = decl.name.clone();

        let verb = decl.verb.ok_or_else(|| ConstructionError::MissingVerb { method: method.clone() })?;
        let path = join_path(&api.path, &decl.path);

        let bindings: Vec<ParamBinding> = decl
            .params
            .iter()
            .enumerate()
            .map(|(index, param)| ParamBinding {
                index,
                target: param.target.clone(),
                nullable: param.nullable,
                skip_encoding: param.skip_encoding.clone(),
                parser: param.parser.clone(),
            })
            .collect();

        let api_version = api.api_version.clone();
        for placeholder in placeholders(&path) {
            let bound = bindings
                .iter()
                .any(|b| matches!(&b.target, BindTarget::Path(name) if *name == placeholder));
            let is_version = placeholder == API_VERSION_TOKEN && api_version.is_some();
            if !bound && !is_version {
                return Err(ConstructionError::UnboundPlaceholder { method, placeholder });
            }
        }

        let count = |pred: fn(&BindTarget) -> bool| bindings.iter().filter(|b| pred(&b.target)).count();
        let bodies = count(|t| matches!(t, BindTarget::Body));
        let payload_params = count(|t| matches!(t, BindTarget::Payload(_)));
        let form_params = count(|t| matches!(t, BindTarget::Form(_)));
        let custom = count(|t| matches!(t, BindTarget::Custom(_)));
        let custom_payload = count(|t| matches!(t, BindTarget::Custom(b) if b.produces_payload()));
        let has_form = form_params > 0 || !api.form.is_empty() || !decl.form.is_empty();
        let has_map = decl.map_binder.is_some();

        if bodies > 1 || (bodies == 1 && (payload_params > 0 || has_form || has_map || custom_payload > 0)) {
            return Err(ConstructionError::AmbiguousPayload { method });
        }
        if has_map && has_form {
            return Err(ConstructionError::AmbiguousPayload { method });
        }
        if has_map && custom > 0 {
            return Err(ConstructionError::MixedBinders { method });
        }
        if (payload_params > 0 || !decl.payload_defaults.is_empty()) && !has_map {
            return Err(ConstructionError::MissingMapBinder { method });
        }
        let produces = decl.produces.clone().or_else(|| api.produces.clone());
        if !verb.allows_payload() && (bodies > 0 || payload_params > 0 || has_form || has_map) {
            return Err(ConstructionError::PayloadNotAllowed {
                method,
                verb: verb.to_string(),
            });
        }

        let filters = if decl.override_filters {
            decl.filters.clone()
        } else {
            let mut chain = api.filters.clone();
            chain.extend(&decl.filters);
            chain
        };

        let accept = if decl.consumes.is_empty() {
            api.consumes.clone()
        } else {
            decl.consumes.clone()
        };

        let template = RequestTemplate {
            name: method,
            verb,
            path,
            headers: api.headers.iter().chain(decl.headers.iter()).cloned().collect(),
            query: api.query.iter().chain(decl.query.iter()).cloned().collect(),
            form: api.form.iter().chain(decl.form.iter()).cloned().collect(),
            payload_defaults: decl.payload_defaults.clone(),
            accept,
            produces,
            map_binder: decl.map_binder.clone(),
            filters,
            timeout: decl.timeout.or(api.timeout),
            api_version,
            parser: spec.response.stages().to_vec(),
            error_mapper: spec.error_mapper.name(),
            fallback: spec.fallback.as_ref().map(|f| f.name()),
        };
        debug!(
            api = %api.name,
            method = %template.name,
            verb = %template.verb,
            path = %template.path,
            params = bindings.len(),
            "compiled request template"
        );
        Ok((template, bindings))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn verb(&self) -> HttpMethod {
        self.verb
    }

    /// Path pattern including the API prefix, placeholders unresolved.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn query(&self) -> &[(String, Option<String>)] {
        &self.query
    }

    pub fn form(&self) -> &[(String, String)] {
        &self.form
    }

    pub fn payload_defaults(&self) -> &[(String, String)] {
        &self.payload_defaults
    }

    pub fn accept(&self) -> &[String] {
        &self.accept
    }

    pub fn produces(&self) -> Option<&str> {
        self.produces.as_deref()
    }

    pub fn map_binder(&self) -> Option<&Arc<dyn MapBinder>> {
        self.map_binder.as_ref()
    }

    pub fn filters(&self) -> &FilterChain {
        &self.filters
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn api_version(&self) -> Option<&str> {
        self.api_version.as_deref()
    }

    /// Name of the declared response parser.
    pub fn parser_name(&self) -> &'static str {
        self.parser.first().copied().unwrap_or("")
    }

    /// Parser followed by every declared transform.
    pub fn response_stages(&self) -> &[&'static str] {
        &self.parser
    }

    pub fn error_mapper_name(&self) -> &'static str {
        self.error_mapper
    }

    pub fn fallback_name(&self) -> Option<&'static str> {
        self.fallback
    }
}

/// Joins the API prefix and the method path into one absolute path.
/// Either part may omit its slashes; a trailing slash is kept.
fn join_path(prefix: &str, path: &str) -> String {
    let segments: Vec<&str> = [prefix, path]
        .iter()
        .map(|part| part.trim_matches('/'))
        .filter(|part| !part.is_empty())
        .collect();
    if segments.is_empty() {
        let root = prefix.starts_with('/') || path.starts_with('/');
        return if root { "/".to_string() } else { String::new() };
    }
    let trailing = if path.is_empty() { prefix } else { path };
    let mut joined = format!("/{}", segments.join("/"));
    if trailing.ends_with('/') {
        joined.push('/');
    }
    joined
}

/// Names of `{placeholder}`s in order of appearance.
pub(crate) fn placeholders(pattern: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut rest = pattern;
    while let Some(start) = rest.find('{') {
        let after = &rest[start + 1..];
        match after.find('}') {
            Some(end) => {
                names.push(after[..end].to_string());
                rest = &after[end + 1..];
            }
            None => break,
        }
    }
    names
}
