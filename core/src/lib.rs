//! Declarative REST request binding and dispatch.
//!
//! # Overview
//! An API method is declared once as data: verb, path pattern, where each
//! positional argument goes, which filters run, how the response is parsed
//! and what happens on failure. Compiling the declaration validates it and
//! yields a [`Method`]; a [`RestClient`] invokes methods synchronously or
//! asynchronously.
//!
//! # Design
//! - [`template`] extracts and validates declarations at build time.
//! - [`binder`] turns arguments into an [`HttpRequest`]: path, query,
//!   headers, then payload, always in that order.
//! - [`filter`] and [`signing`] rewrite bound requests before dispatch.
//! - [`dispatch`] sends through a [`Transport`] with per-invocation
//!   timeouts and a concurrency bound.
//! - [`pipeline`] turns a response into exactly one of a value or an error.
//! - [`rest_client!`] generates typed clients from a table of methods.
//! - Requests can be built and responses parsed without I/O through
//!   [`RestClient::create_request`] and [`RestClient::parse_response`].

pub mod args;
pub mod binder;
pub mod client;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod filter;
pub mod http;
pub mod pipeline;
pub mod proxy;
pub mod signing;
pub mod template;
pub mod transport;

pub use args::{Arg, Args, IntoArg, RequestOptions};
pub use binder::{
    BindAsHostPrefix, BindMapToJson, BindMapToJsonWrappedWith, BindMapToStringPayload,
    BindObjectToHeadersWithPrefix, BindToJsonPayload, Binder, MapBinder, PayloadParams,
};
pub use client::{ClientBuilder, GeneratedRequest, Method, RestClient};
pub use config::ClientConfig;
pub use dispatch::{Invocation, InvocationState, ResponseFuture};
pub use error::{ApiError, ConfigError, ConstructionError, FilterError, TransportError};
pub use filter::{BasicAuthentication, FilterChain, RequestFilter, StripExpectHeader};
pub use http::{HttpMethod, HttpRequest, HttpResponse, Payload};
pub use pipeline::{
    EmptyOnNotFound, ErrorMapper, FailureKind, Fallback, FalseOnNotFound, MapHttpStatus, MapJsonErrorMessage, NullOnNotFound,
    OnlyElement, Outcome, ParseJson, ParseKeySetFromJson, ParseXml, ReleasePayloadAndReturn, ResponseParser,
    ResponsePipeline, ReturnStringIf2xx, ReturnTrueIf2xx, Transform, TrueOnNotFound, ValueOnStatus, VoidOnNotFound,
};
pub use signing::{CachedTimestamp, CredentialSource, Credentials, EnvCredentials, FixedTimestamp, SignedHeaderAuth};
pub use template::{ApiSpec, MethodSpec, Param, ParamBinding, RequestTemplate};
pub use transport::{Transport, UreqTransport};
