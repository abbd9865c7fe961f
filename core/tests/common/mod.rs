//! Declarations shared by the integration test binaries: a chef-style API
//! and its methods, plus a scripted in-process transport.

#![allow(dead_code)]

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use restwire_core::{
    ApiSpec, BindMapToJson, EmptyOnNotFound, FalseOnNotFound, HttpRequest, HttpResponse, MethodSpec, NullOnNotFound,
    Param, ParseKeySetFromJson, ResponsePipeline, ReturnTrueIf2xx, Transport, TransportError, TrueOnNotFound,
};
use serde_json::Value;

pub fn chef_api() -> ApiSpec {
    ApiSpec::new("chef")
        .consumes("application/json")
        .header("X-Chef-Version", "{api-version}")
        .api_version("0.9.8")
}

pub fn create_sandbox() -> MethodSpec<Value> {
    MethodSpec::post("create_sandbox", "/sandboxes")
        .payload_param("checksums", "{}")
        .map_binder(BindMapToJson)
        .returning(ResponsePipeline::json())
}

pub fn commit_sandbox() -> MethodSpec<()> {
    MethodSpec::put("commit_sandbox", "/sandboxes/{id}")
        .param(Param::path("id"))
        .param(Param::payload("is_completed"))
        .map_binder(BindMapToJson)
}

pub fn get_cookbook() -> MethodSpec<Option<Value>> {
    MethodSpec::get("get_cookbook", "/cookbooks/{name}/{version}")
        .param(Param::path("name"))
        .param(Param::path("version"))
        .returning(ResponsePipeline::json())
        .fallback(NullOnNotFound)
}

pub fn list_cookbooks() -> MethodSpec<BTreeSet<String>> {
    MethodSpec::get("list_cookbooks", "/cookbooks")
        .returning(ResponsePipeline::new(ParseKeySetFromJson))
        .fallback(EmptyOnNotFound)
}

pub fn search() -> MethodSpec<Value> {
    MethodSpec::get("search", "/search/{index}")
        .param(Param::path("index"))
        .param(Param::query("q"))
        .param(Param::query("rows").nullable())
        .returning(ResponsePipeline::json())
}

pub fn client_exists() -> MethodSpec<bool> {
    MethodSpec::head("client_exists", "/clients/{name}")
        .param(Param::path("name"))
        .returning(ResponsePipeline::new(ReturnTrueIf2xx))
        .fallback(FalseOnNotFound)
}

pub fn create_role() -> MethodSpec<()> {
    MethodSpec::post("create_role", "/roles")
        .param(Param::payload("name"))
        .string_payload(r#"{"name":"{name}","json_class":"Chef::Role"}"#)
        .produces("application/json")
}

pub fn delete_client() -> MethodSpec<bool> {
    MethodSpec::delete("delete_client", "/clients/{name}")
        .param(Param::path("name"))
        .returning(ResponsePipeline::new(ReturnTrueIf2xx))
        .fallback(TrueOnNotFound)
}

type Handler = dyn Fn(&HttpRequest) -> Result<HttpResponse, TransportError> + Send + Sync;

/// Answers from a closure, records every request, and can delay paths.
pub struct StubTransport {
    handler: Box<Handler>,
    delays: Vec<(String, Duration)>,
    seen: Mutex<Vec<HttpRequest>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl StubTransport {
    pub fn new<F>(handler: F) -> Arc<Self>
    where
        F: Fn(&HttpRequest) -> Result<HttpResponse, TransportError> + Send + Sync + 'static,
    {
        Self::with_delays(handler, Vec::new())
    }

    pub fn with_delays<F>(handler: F, delays: Vec<(&str, Duration)>) -> Arc<Self>
    where
        F: Fn(&HttpRequest) -> Result<HttpResponse, TransportError> + Send + Sync + 'static,
    {
        Arc::new(Self {
            handler: Box::new(handler),
            delays: delays.into_iter().map(|(p, d)| (p.to_string(), d)).collect(),
            seen: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        })
    }

    /// Always answers `status` with `body`.
    pub fn status(status: u16, body: &'static str) -> Arc<Self> {
        Self::new(move |_| Ok(HttpResponse::new(status, body)))
    }

    pub fn seen(&self) -> Vec<HttpRequest> {
        self.seen.lock().clone()
    }

    /// Highest number of concurrent `execute` calls observed.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

pub struct Shared(pub Arc<StubTransport>);

#[async_trait]
impl Transport for Shared {
    async fn execute(&self, request: HttpRequest, _timeout: Option<Duration>) -> Result<HttpResponse, TransportError> {
        let stub = &self.0;
        let now = stub.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        stub.peak.fetch_max(now, Ordering::SeqCst);
        stub.seen.lock().push(request.clone());

        let delay = stub
            .delays
            .iter()
            .find(|(path, _)| request.path() == path)
            .map(|(_, d)| *d);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let result = (stub.handler)(&request);
        stub.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}
