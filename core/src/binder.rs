//! The parameter binder chain.
//!
//! # Design
//! [`bind`] turns a [`RequestTemplate`], its [`ParamBinding`] table and one
//! call's [`Args`] into an [`HttpRequest`]. Stages always run in the same
//! order regardless of how parameters were declared:
//!
//! 1. path placeholders are substituted (and option path suffixes appended)
//! 2. query parameters are appended in declaration order
//! 3. headers are injected
//! 4. the payload is built (form body, raw body, map binder, then
//!    per-parameter binders in argument order)
//!
//! Path values become tokens for later stages, so a header declared as
//! `{name}` sees the substituted path argument. Absent nullable arguments
//! are skipped at every stage; absent required arguments fail the bind.

use std::fmt;

use serde_json::Value;

use crate::args::{render_scalar, Arg, Args, RequestOptions};
use crate::error::ConstructionError;
use crate::http::{HttpRequest, Payload};
use crate::template::{placeholders, BindTarget, ParamBinding, RequestTemplate, API_VERSION_TOKEN};

/// Binds one argument into the request.
pub trait Binder: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    /// Whether the binder writes the request payload. Binders that only
    /// touch the endpoint or headers may sit next to a raw body.
    fn produces_payload(&self) -> bool {
        true
    }

    fn bind_to_request(&self, request: HttpRequest, arg: &Value) -> Result<HttpRequest, ConstructionError>;
}

/// Binds every payload parameter of a call at once.
pub trait MapBinder: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    fn bind_to_request(&self, request: HttpRequest, params: &PayloadParams) -> Result<HttpRequest, ConstructionError>;
}

/// Payload parameters of one call, in declaration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PayloadParams(Vec<(String, Value)>);

impl PayloadParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces `key`, keeping the original position on replace.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        let key = key.into();
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.0.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Where the request is going and which API version tokens resolve to.
#[derive(Debug, Clone, Copy)]
pub struct BindContext<'a> {
    pub endpoint: &'a str,
    /// Overrides the version declared on the API.
    pub api_version: Option<&'a str>,
}

/// Runs the binder chain for one call.
pub fn bind(
    ctx: &BindContext<'_>,
    template: &RequestTemplate,
    bindings: &[ParamBinding],
    args: &Args,
) -> Result<HttpRequest, ConstructionError> {
    let method = template.name();
    if args.len() != bindings.len() {
        return Err(ConstructionError::ArgumentCount {
            method: method.to_string(),
            expected: bindings.len(),
            actual: args.len(),
        });
    }

    let options: Vec<&RequestOptions> = bindings
        .iter()
        .filter(|b| matches!(b.target, BindTarget::Options))
        .map(|b| options_arg(method, b, args))
        .collect::<Result<Vec<_>, _>>()?
        .into_iter()
        .flatten()
        .collect();

    // 1. path
    let mut tokens: Vec<(String, String)> = Vec::new();
    let mut encoded: Vec<(String, String)> = Vec::new();
    if let Some(version) = ctx.api_version.or(template.api_version()) {
        tokens.push((API_VERSION_TOKEN.to_string(), version.to_string()));
        encoded.push((API_VERSION_TOKEN.to_string(), encode_path_value(version, &[])));
    }
    for binding in bindings {
        if let BindTarget::Path(name) = &binding.target {
            let value = match scalar_arg(method, binding, args)? {
                Some(value) => value,
                None => {
                    return Err(ConstructionError::MissingArgument {
                        method: method.to_string(),
                        index: binding.index,
                        name: name.clone(),
                    })
                }
            };
            encoded.push((name.clone(), encode_path_value(&value, &binding.skip_encoding)));
            tokens.push((name.clone(), value));
        }
    }
    let mut path = template.path().to_string();
    for name in placeholders(template.path()) {
        if let Some((_, value)) = encoded.iter().find(|(k, _)| *k == name) {
            path = path.replace(&format!("{{{name}}}"), value);
        }
    }
    for opts in &options {
        if let Some(suffix) = &opts.path_suffix {
            path.push_str(suffix);
        }
    }
    let mut endpoint = format!("{}{}", ctx.endpoint.trim_end_matches('/'), path);

    // 2. query
    let mut query: Vec<(String, Option<String>)> = template
        .query()
        .iter()
        .map(|(k, v)| (k.clone(), v.as_deref().map(|v| replace_tokens(v, &tokens))))
        .collect();
    for binding in bindings {
        if let BindTarget::Query(key) = &binding.target {
            match value_arg(method, binding, args)? {
                None => {}
                Some(Value::Array(items)) => {
                    for item in &items {
                        query.push((key.clone(), Some(scalar(method, binding, item)?)));
                    }
                }
                Some(value) => query.push((key.clone(), Some(scalar(method, binding, &value)?))),
            }
        }
    }
    for opts in &options {
        query.extend(opts.query.iter().map(|(k, v)| (k.clone(), Some(v.clone()))));
    }
    if !query.is_empty() {
        endpoint.push('?');
        endpoint.push_str(&encode_query(&query));
    }

    let mut request = HttpRequest::new(template.verb(), endpoint);

    // 3. headers
    for (name, value) in template.headers() {
        request.add_header(name.clone(), replace_tokens(value, &tokens));
    }
    for binding in bindings {
        if let BindTarget::Header(name) = &binding.target {
            if let Some(value) = scalar_arg(method, binding, args)? {
                request.add_header(name.clone(), value);
            }
        }
    }
    for opts in &options {
        for (name, value) in &opts.headers {
            request.add_header(name.clone(), value.clone());
        }
    }
    if !template.accept().is_empty() {
        request.set_header("Accept", template.accept().join(", "));
    }

    // 4. payload
    let mut form: Vec<(String, String)> = template
        .form()
        .iter()
        .map(|(k, v)| (k.clone(), replace_tokens(v, &tokens)))
        .collect();
    for binding in bindings {
        if let BindTarget::Form(key) = &binding.target {
            if let Some(value) = scalar_arg(method, binding, args)? {
                form.push((key.clone(), value));
            }
        }
    }
    for opts in &options {
        form.extend(opts.form.iter().cloned());
    }
    if !form.is_empty() {
        let body = serde_urlencoded::to_string(&form).map_err(|e| ConstructionError::Serialization(e.to_string()))?;
        request.payload = Some(Payload::form(body));
    }

    for binding in bindings {
        if matches!(binding.target, BindTarget::Body) {
            request.payload = match args.get(binding.index) {
                Some(Arg::Payload(payload)) => Some(payload.clone()),
                Some(Arg::Value(value)) => match binding.parse(value.clone())? {
                    Value::String(text) => Some(Payload::text(text)),
                    other => Some(Payload::json(other.to_string())),
                },
                Some(Arg::Options(_)) => return Err(unsupported(method, binding, "options passed as a body")),
                Some(Arg::Absent) | None => {
                    require_nullable(method, binding)?;
                    None
                }
            };
        }
    }

    if request.payload.is_none() {
        if let Some(text) = options.iter().rev().find_map(|o| o.payload.as_ref()) {
            request.payload = Some(Payload::text(text.clone()));
        }
    }

    if let Some(map_binder) = template.map_binder() {
        let mut params = PayloadParams::new();
        for (key, value) in template.payload_defaults() {
            params.insert(key.clone(), Value::String(replace_tokens(value, &tokens)));
        }
        for binding in bindings {
            if let BindTarget::Payload(key) = &binding.target {
                if let Some(value) = value_arg(method, binding, args)? {
                    params.insert(key.clone(), value);
                }
            }
        }
        request = map_binder.bind_to_request(request, &params)?;
    }

    for binding in bindings {
        if let BindTarget::Custom(binder) = &binding.target {
            if let Some(value) = value_arg(method, binding, args)? {
                request = binder.bind_to_request(request, &value)?;
            }
        }
    }

    if let Some(media_type) = template.produces() {
        match request.payload.as_mut() {
            Some(payload) => payload.content_type = Some(media_type.to_string()),
            None if template.verb().allows_payload() => request.payload = Some(Payload::new(Vec::new(), media_type)),
            None => {}
        }
    }

    Ok(request)
}

fn unsupported(method: &str, binding: &ParamBinding, reason: &str) -> ConstructionError {
    ConstructionError::UnsupportedArgument {
        method: method.to_string(),
        index: binding.index,
        reason: format!("{} ({})", reason, binding.describe()),
    }
}

fn require_nullable(method: &str, binding: &ParamBinding) -> Result<(), ConstructionError> {
    if binding.nullable {
        Ok(())
    } else {
        Err(ConstructionError::MissingArgument {
            method: method.to_string(),
            index: binding.index,
            name: binding.describe(),
        })
    }
}

/// The argument as a parsed JSON value, or `None` when absent and nullable.
fn value_arg(method: &str, binding: &ParamBinding, args: &Args) -> Result<Option<Value>, ConstructionError> {
    match args.get(binding.index) {
        Some(Arg::Value(value)) => binding.parse(value.clone()).map(Some),
        Some(Arg::Absent) | None => require_nullable(method, binding).map(|_| None),
        Some(Arg::Payload(_)) => Err(unsupported(method, binding, "payload passed where a value is expected")),
        Some(Arg::Options(_)) => Err(unsupported(method, binding, "options passed where a value is expected")),
    }
}

fn scalar_arg(method: &str, binding: &ParamBinding, args: &Args) -> Result<Option<String>, ConstructionError> {
    match value_arg(method, binding, args)? {
        Some(value) => scalar(method, binding, &value).map(Some),
        None => Ok(None),
    }
}

fn scalar(method: &str, binding: &ParamBinding, value: &Value) -> Result<String, ConstructionError> {
    render_scalar(value).ok_or_else(|| unsupported(method, binding, "expected a string, number or boolean"))
}

fn options_arg<'a>(
    method: &str,
    binding: &ParamBinding,
    args: &'a Args,
) -> Result<Option<&'a RequestOptions>, ConstructionError> {
    match args.get(binding.index) {
        Some(Arg::Options(options)) => Ok(Some(options)),
        Some(Arg::Absent) | None => Ok(None),
        Some(_) => Err(unsupported(method, binding, "expected request options")),
    }
}

/// Percent-encodes a path value, leaving the `skip` characters as they are.
fn encode_path_value(value: &str, skip: &[char]) -> String {
    if skip.is_empty() {
        return urlencoding::encode(value).into_owned();
    }
    value
        .split_inclusive(|c| skip.contains(&c))
        .map(|piece| match piece.chars().last() {
            Some(last) if skip.contains(&last) => {
                let body = &piece[..piece.len() - last.len_utf8()];
                format!("{}{last}", urlencoding::encode(body))
            }
            _ => urlencoding::encode(piece).into_owned(),
        })
        .collect()
}

fn replace_tokens(input: &str, tokens: &[(String, String)]) -> String {
    if !input.contains('{') {
        return input.to_string();
    }
    tokens
        .iter()
        .fold(input.to_string(), |acc, (name, value)| acc.replace(&format!("{{{name}}}"), value))
}

fn encode_query(query: &[(String, Option<String>)]) -> String {
    query
        .iter()
        .map(|(k, v)| match v {
            Some(v) => format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)),
            None => urlencoding::encode(k).into_owned(),
        })
        .collect::<Vec<_>>()
        .join("&")
}

/// Renders payload parameters as a JSON object in declaration order, with
/// scalars written as strings (`true` becomes `"true"`).
fn json_object(params: &PayloadParams) -> String {
    let fields: Vec<String> = params
        .iter()
        .map(|(k, v)| {
            let value = match v {
                Value::Bool(_) | Value::Number(_) => Value::String(v.to_string()),
                other => other.clone(),
            };
            format!("{}:{}", Value::String(k.to_string()), value)
        })
        .collect();
    format!("{{{}}}", fields.join(","))
}

/// Payload parameters as a JSON object body.
#[derive(Debug, Clone, Copy, Default)]
pub struct BindMapToJson;

impl MapBinder for BindMapToJson {
    fn name(&self) -> &'static str {
        "BindMapToJson"
    }

    fn bind_to_request(&self, mut request: HttpRequest, params: &PayloadParams) -> Result<HttpRequest, ConstructionError> {
        request.payload = Some(Payload::json(json_object(params)));
        Ok(request)
    }
}

/// Payload parameters as a JSON object nested under one key.
#[derive(Debug, Clone)]
pub struct BindMapToJsonWrappedWith {
    key: String,
}

impl BindMapToJsonWrappedWith {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

impl MapBinder for BindMapToJsonWrappedWith {
    fn name(&self) -> &'static str {
        "BindMapToJsonWrappedWith"
    }

    fn bind_to_request(&self, mut request: HttpRequest, params: &PayloadParams) -> Result<HttpRequest, ConstructionError> {
        let body = format!("{{{}:{}}}", Value::String(self.key.clone()), json_object(params));
        request.payload = Some(Payload::json(body));
        Ok(request)
    }
}

/// Fills `{key}` placeholders of a template from payload parameters.
#[derive(Debug, Clone)]
pub struct BindMapToStringPayload {
    template: String,
}

impl BindMapToStringPayload {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }
}

impl MapBinder for BindMapToStringPayload {
    fn name(&self) -> &'static str {
        "BindMapToStringPayload"
    }

    fn bind_to_request(&self, mut request: HttpRequest, params: &PayloadParams) -> Result<HttpRequest, ConstructionError> {
        let mut body = self.template.clone();
        for name in placeholders(&self.template) {
            let value = params.get(&name).ok_or_else(|| ConstructionError::Binder {
                binder: self.name().to_string(),
                message: format!("no payload parameter for {{{name}}}"),
            })?;
            let rendered = render_scalar(value).unwrap_or_else(|| value.to_string());
            body = body.replace(&format!("{{{name}}}"), &rendered);
        }
        request.payload = Some(Payload {
            content_type: None,
            data: body.into_bytes(),
        });
        Ok(request)
    }
}

/// Serializes the argument as the JSON body.
#[derive(Debug, Clone, Copy, Default)]
pub struct BindToJsonPayload;

impl Binder for BindToJsonPayload {
    fn name(&self) -> &'static str {
        "BindToJsonPayload"
    }

    fn bind_to_request(&self, mut request: HttpRequest, arg: &Value) -> Result<HttpRequest, ConstructionError> {
        request.payload = Some(Payload::json(arg.to_string()));
        Ok(request)
    }
}

/// Prefixes the endpoint host with the argument (`bucket.host`).
#[derive(Debug, Clone, Copy, Default)]
pub struct BindAsHostPrefix;

impl Binder for BindAsHostPrefix {
    fn name(&self) -> &'static str {
        "BindAsHostPrefix"
    }

    fn produces_payload(&self) -> bool {
        false
    }

    fn bind_to_request(&self, mut request: HttpRequest, arg: &Value) -> Result<HttpRequest, ConstructionError> {
        let prefix = match arg {
            Value::String(s) if !s.is_empty() && !s.contains(['/', ':', '?', '#', '@']) => s,
            other => {
                return Err(ConstructionError::Binder {
                    binder: self.name().to_string(),
                    message: format!("{other} is not a valid host label"),
                })
            }
        };
        let split = request.endpoint.find("://").map(|i| i + 3).unwrap_or(0);
        request.endpoint.insert_str(split, &format!("{prefix}."));
        Ok(request)
    }
}

/// Adds one header per field of an object argument, names prefixed.
#[derive(Debug, Clone)]
pub struct BindObjectToHeadersWithPrefix {
    prefix: String,
}

impl BindObjectToHeadersWithPrefix {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into() }
    }
}

impl Binder for BindObjectToHeadersWithPrefix {
    fn name(&self) -> &'static str {
        "BindObjectToHeadersWithPrefix"
    }

    fn produces_payload(&self) -> bool {
        false
    }

    fn bind_to_request(&self, mut request: HttpRequest, arg: &Value) -> Result<HttpRequest, ConstructionError> {
        let fields = arg.as_object().ok_or_else(|| ConstructionError::Binder {
            binder: self.name().to_string(),
            message: "expected an object".to_string(),
        })?;
        for (key, value) in fields {
            if let Some(rendered) = render_scalar(value) {
                request.add_header(format!("{}{}", self.prefix, key.to_ascii_lowercase()), rendered);
            }
        }
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::HttpMethod;
    use crate::template::{ApiSpec, MethodSpec, Param};

    const ENDPOINT: &str = "http://localhost:4000";

    fn compile<T: 'static>(api: &ApiSpec, spec: MethodSpec<T>) -> (RequestTemplate, Vec<ParamBinding>) {
        RequestTemplate::extract(api, &spec).unwrap()
    }

    fn run(api: &ApiSpec, spec: MethodSpec<()>, args: Args) -> Result<HttpRequest, ConstructionError> {
        let (template, bindings) = compile(api, spec);
        let ctx = BindContext {
            endpoint: ENDPOINT,
            api_version: None,
        };
        bind(&ctx, &template, &bindings, &args)
    }

    fn chef() -> ApiSpec {
        ApiSpec::new("chef")
            .consumes("application/json")
            .header("X-Chef-Version", "{api-version}")
            .api_version("0.9.8")
    }

    #[test]
    fn commit_sandbox_binds_path_and_stringified_payload() {
        let spec = MethodSpec::put("commit_sandbox", "/sandboxes/{id}")
            .param(Param::path("id"))
            .param(Param::payload("is_completed"))
            .map_binder(BindMapToJson);
        let args = Args::new().value("0189e76ccc476701d6b374e5a1a27347").unwrap().value(&true).unwrap();
        let req = run(&chef(), spec, args).unwrap();

        assert_eq!(
            req.request_line(),
            "PUT http://localhost:4000/sandboxes/0189e76ccc476701d6b374e5a1a27347 HTTP/1.1"
        );
        assert_eq!(req.non_payload_headers(), "X-Chef-Version: 0.9.8\nAccept: application/json\n");
        let payload = req.payload.unwrap();
        assert_eq!(payload.as_text(), r#"{"is_completed":"true"}"#);
        assert_eq!(payload.content_type.as_deref(), Some("application/json"));
    }

    #[test]
    fn path_values_are_percent_encoded() {
        let spec = MethodSpec::get("get_node", "/nodes/{name}").param(Param::path("name"));
        let req = run(&chef(), spec, Args::new().value("a b/c").unwrap()).unwrap();
        assert_eq!(req.endpoint, "http://localhost:4000/nodes/a%20b%2Fc");
    }

    #[test]
    fn skipped_characters_stay_unencoded_in_path_values() {
        let spec = MethodSpec::get("get_object", "/{container}/{key}")
            .param(Param::path("container"))
            .param(Param::path("key").skip_encoding('/'));
        let args = Args::new().value("my/container").unwrap().value("dir/sub dir/file.txt").unwrap();
        let req = run(&chef(), spec, args).unwrap();
        assert_eq!(req.endpoint, "http://localhost:4000/my%2Fcontainer/dir/sub%20dir/file.txt");
    }

    #[test]
    fn relative_method_path_gets_a_separator() {
        let spec = MethodSpec::get("things", "things");
        let req = run(&ApiSpec::new("plain"), spec, Args::new()).unwrap();
        assert_eq!(req.request_line(), "GET http://localhost:4000/things HTTP/1.1");

        let spec = MethodSpec::get("things", "things");
        let req = run(&ApiSpec::new("plain").path("v1"), spec, Args::new()).unwrap();
        assert_eq!(req.request_line(), "GET http://localhost:4000/v1/things HTTP/1.1");
    }

    #[test]
    fn query_keeps_declaration_order_and_expands_arrays() {
        let spec = MethodSpec::get("search", "/search/{index}")
            .query("sort", "name")
            .query_flag("rows")
            .param(Param::query("q"))
            .param(Param::path("index"))
            .param(Param::query("tag"))
            .param(Param::query("start").nullable())
            .param(Param::options());
        let args = Args::new()
            .value("name:web*")
            .unwrap()
            .value("node")
            .unwrap()
            .value(&["a", "b"])
            .unwrap()
            .absent()
            .options(RequestOptions::new().query("limit", "10"));
        let req = run(&chef(), spec, args).unwrap();
        assert_eq!(
            req.endpoint,
            "http://localhost:4000/search/node?sort=name&rows&q=name%3Aweb%2A&tag=a&tag=b&limit=10"
        );
    }

    #[test]
    fn absent_required_argument_is_a_construction_error() {
        let spec = MethodSpec::get("get_node", "/nodes/{name}").param(Param::path("name"));
        let err = run(&chef(), spec, Args::new().absent()).unwrap_err();
        assert!(matches!(err, ConstructionError::MissingArgument { index: 0, .. }));
    }

    #[test]
    fn argument_count_must_match() {
        let spec = MethodSpec::get("get_node", "/nodes/{name}").param(Param::path("name"));
        let err = run(&chef(), spec, Args::new()).unwrap_err();
        assert!(matches!(err, ConstructionError::ArgumentCount { expected: 1, actual: 0, .. }));
    }

    #[test]
    fn absent_optional_header_is_omitted() {
        let spec = MethodSpec::get("list", "/things")
            .param(Param::header("X-Marker").nullable())
            .param(Param::header("X-Limit"));
        let args = Args::new().absent().value(&5).unwrap();
        let req = run(&ApiSpec::new("plain"), spec, args).unwrap();
        assert_eq!(req.headers, vec![("X-Limit".to_string(), "5".to_string())]);
    }

    #[test]
    fn header_arguments_are_sent_verbatim() {
        let spec = MethodSpec::get("get_client", "/clients/{name}")
            .param(Param::path("name"))
            .param(Param::header("X-Note"));
        let args = Args::new().value("web").unwrap().value("literal {name} {api-version}").unwrap();
        let req = run(&chef(), spec, args).unwrap();
        assert_eq!(req.header("X-Note"), Some("literal {name} {api-version}"));
        assert_eq!(req.header("X-Chef-Version"), Some("0.9.8"));
    }

    #[test]
    fn path_tokens_reach_headers() {
        let spec = MethodSpec::delete("delete_client", "/clients/{name}")
            .param(Param::path("name"))
            .header("X-Target", "client-{name}");
        let req = run(&ApiSpec::new("plain"), spec, Args::new().value("web01").unwrap()).unwrap();
        assert_eq!(req.header("X-Target"), Some("client-web01"));
    }

    #[test]
    fn form_params_become_urlencoded_body() {
        let api = ApiSpec::new("query-api").form("Version", "2010-06-15");
        let spec = MethodSpec::post("describe", "/")
            .form("Action", "DescribeRegions")
            .param(Param::form("RegionName.1"));
        let req = run(&api, spec, Args::new().value("us-east 1").unwrap()).unwrap();
        let payload = req.payload.unwrap();
        assert_eq!(payload.as_text(), "Version=2010-06-15&Action=DescribeRegions&RegionName.1=us-east+1");
        assert_eq!(payload.content_type.as_deref(), Some("application/x-www-form-urlencoded"));
    }

    #[test]
    fn raw_body_argument_is_used_verbatim() {
        let spec = MethodSpec::put("upload", "/files/{name}")
            .param(Param::path("name"))
            .param(Param::body());
        let args = Args::new()
            .value("f.bin")
            .unwrap()
            .payload(Payload::new(vec![1u8, 2, 3], "application/octet-stream"));
        let req = run(&ApiSpec::new("blob"), spec, args).unwrap();
        assert_eq!(req.payload.unwrap().data, vec![1u8, 2, 3]);
    }

    #[test]
    fn raw_body_strings_go_through_the_parser() {
        let spec = MethodSpec::put("put_note", "/notes")
            .param(Param::body().parser(|v| Ok(Value::String(v.as_str().unwrap_or_default().to_uppercase()))));
        let req = run(&ApiSpec::new("plain"), spec, Args::new().value("hello").unwrap()).unwrap();
        let payload = req.payload.unwrap();
        assert_eq!(payload.as_text(), "HELLO");
        assert_eq!(payload, Payload::text("HELLO"));
    }

    #[test]
    fn raw_body_sits_next_to_a_host_prefix() {
        let spec = MethodSpec::put("put_object", "/{key}")
            .param(Param::binder(BindAsHostPrefix))
            .param(Param::path("key"))
            .param(Param::body());
        let args = Args::new()
            .value("bucket")
            .unwrap()
            .value("photo.jpg")
            .unwrap()
            .payload(Payload::new(vec![0xffu8, 0xd8], "image/jpeg"));
        let req = run(&ApiSpec::new("blob"), spec, args).unwrap();
        assert_eq!(req.endpoint, "http://bucket.localhost:4000/photo.jpg");
        assert_eq!(req.payload.unwrap().data, vec![0xffu8, 0xd8]);
    }

    #[test]
    fn string_payload_fills_placeholders() {
        let spec = MethodSpec::post("create_role", "/roles")
            .param(Param::payload("name"))
            .payload_param("kind", "role")
            .string_payload(r#"{"name":"{name}","json_class":"Chef::{kind}"}"#)
            .produces("application/json");
        let req = run(&ApiSpec::new("chef"), spec, Args::new().value("web").unwrap()).unwrap();
        let payload = req.payload.unwrap();
        assert_eq!(payload.as_text(), r#"{"name":"web","json_class":"Chef::role"}"#);
        assert_eq!(payload.content_type.as_deref(), Some("application/json"));
    }

    #[test]
    fn wrapped_payload_nests_under_key() {
        let spec = MethodSpec::post("create_server", "/servers")
            .param(Param::payload("name"))
            .param(Param::payload("flavorRef"))
            .wrap_with("server");
        let args = Args::new().value("web").unwrap().value(&2).unwrap();
        let req = run(&ApiSpec::new("nova"), spec, args).unwrap();
        assert_eq!(req.payload.unwrap().as_text(), r#"{"server":{"name":"web","flavorRef":"2"}}"#);
    }

    #[test]
    fn custom_binders_run_in_argument_order() {
        let spec = MethodSpec::put("put_object", "/{key}")
            .param(Param::binder(BindAsHostPrefix))
            .param(Param::path("key"))
            .param(Param::binder(BindObjectToHeadersWithPrefix::new("x-meta-")));
        let args = Args::new()
            .value("bucket")
            .unwrap()
            .value("photo.jpg")
            .unwrap()
            .value(&serde_json::json!({"Owner": "ops", "Tier": 2}))
            .unwrap();
        let req = run(&ApiSpec::new("blob"), spec, args).unwrap();
        assert_eq!(req.endpoint, "http://bucket.localhost:4000/photo.jpg");
        assert_eq!(req.header("x-meta-owner"), Some("ops"));
        assert_eq!(req.header("x-meta-tier"), Some("2"));
    }

    #[test]
    fn host_prefix_rejects_paths() {
        let err = BindAsHostPrefix
            .bind_to_request(HttpRequest::new(HttpMethod::Get, ENDPOINT), &Value::from("a/b"))
            .unwrap_err();
        assert!(matches!(err, ConstructionError::Binder { .. }));
    }

    #[test]
    fn param_parser_transforms_before_binding() {
        let spec = MethodSpec::get("list", "/things").param(Param::query("ids").parser(|v| {
            let joined = v
                .as_array()
                .map(|items| items.iter().filter_map(render_scalar).collect::<Vec<_>>().join(","))
                .unwrap_or_default();
            Ok(Value::String(joined))
        }));
        let req = run(&ApiSpec::new("plain"), spec, Args::new().value(&[1, 2, 3]).unwrap()).unwrap();
        assert_eq!(req.endpoint, "http://localhost:4000/things?ids=1%2C2%2C3");
    }

    #[test]
    fn options_contribute_suffix_headers_and_payload() {
        let spec = MethodSpec::post("action", "/servers/{id}")
            .param(Param::path("id"))
            .param(Param::options());
        let options = RequestOptions::new()
            .path_suffix("/action")
            .header("X-Trace", "1")
            .string_payload("reboot");
        let args = Args::new().value("42").unwrap().options(options);
        let req = run(&ApiSpec::new("nova"), spec, args).unwrap();
        assert_eq!(req.endpoint, "http://localhost:4000/servers/42/action");
        assert_eq!(req.header("X-Trace"), Some("1"));
        assert_eq!(req.payload.unwrap().as_text(), "reboot");
    }

    #[test]
    fn produces_adds_empty_payload_on_put() {
        let spec = MethodSpec::put("touch", "/things/{id}")
            .param(Param::path("id"))
            .produces("application/xml");
        let req = run(&ApiSpec::new("plain"), spec, Args::new().value("1").unwrap()).unwrap();
        let payload = req.payload.unwrap();
        assert!(payload.data.is_empty());
        assert_eq!(payload.content_type.as_deref(), Some("application/xml"));
    }

    #[test]
    fn object_in_path_is_unsupported() {
        let spec = MethodSpec::get("get", "/things/{id}").param(Param::path("id"));
        let err = run(
            &ApiSpec::new("plain"),
            spec,
            Args::new().value(&serde_json::json!({"a": 1})).unwrap(),
        )
        .unwrap_err();
        assert!(matches!(err, ConstructionError::UnsupportedArgument { .. }));
    }
}
