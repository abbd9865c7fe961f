//! Compiled methods and the client that invokes them.
//!
//! # Design
//! [`Method`] is the memoized, immutable result of compiling a
//! [`MethodSpec`] against its [`ApiSpec`]: template, binding table and
//! response strategies, all behind `Arc`s so clones are cheap and a method
//! can be shared by any number of concurrent invocations.
//!
//! [`RestClient`] owns the configuration, the dispatcher and the runtime
//! used for sync calls. It can also be driven without I/O: build with
//! [`RestClient::create_request`], execute elsewhere, then hand the
//! response to [`RestClient::parse_response`].

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tracing::{debug, debug_span, Instrument};

use crate::args::Args;
use crate::binder::{self, BindContext};
use crate::config::ClientConfig;
use crate::dispatch::{Dispatcher, Executor, Invocation, InvocationState, OwnedRuntime, ResponseFuture};
use crate::error::{ApiError, ConfigError, ConstructionError, FilterError};
use crate::filter::{FilterChain, StripExpectHeader};
use crate::http::{HttpRequest, HttpResponse};
use crate::pipeline::{ErrorMapper, Fallback, FailureKind, Outcome, ResponsePipeline};
use crate::template::{ApiSpec, MethodSpec, ParamBinding, RequestTemplate};
use crate::transport::{Transport, UreqTransport};

/// A compiled method returning `T`.
pub struct Method<T> {
    template: Arc<RequestTemplate>,
    bindings: Arc<[ParamBinding]>,
    response: ResponsePipeline<T>,
    error_mapper: Arc<dyn ErrorMapper>,
    fallback: Option<Arc<dyn Fallback<T>>>,
}

impl<T> Clone for Method<T> {
    fn clone(&self) -> Self {
        Self {
            template: Arc::clone(&self.template),
            bindings: Arc::clone(&self.bindings),
            response: self.response.clone(),
            error_mapper: Arc::clone(&self.error_mapper),
            fallback: self.fallback.clone(),
        }
    }
}

impl<T> fmt::Debug for Method<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Method")
            .field("template", &self.template)
            .field("bindings", &self.bindings)
            .finish()
    }
}

impl<T> Method<T> {
    /// Validates `spec` against `api`. All declaration errors surface here.
    pub fn compile(api: &ApiSpec, spec: MethodSpec<T>) -> Result<Self, ConstructionError> {
        let (template, bindings) = RequestTemplate::extract(api, &spec)?;
        Ok(Self {
            template: Arc::new(template),
            bindings: bindings.into(),
            response: spec.response,
            error_mapper: spec.error_mapper,
            fallback: spec.fallback,
        })
    }

    pub fn name(&self) -> &str {
        self.template.name()
    }

    pub fn template(&self) -> &RequestTemplate {
        &self.template
    }

    pub fn bindings(&self) -> &[ParamBinding] {
        &self.bindings
    }

    /// Produces the method's value or error from a finished exchange.
    /// 2xx bodies are parsed; everything else is mapped and then offered
    /// to the fallback.
    pub fn complete(&self, outcome: Outcome) -> Result<T, ApiError> {
        match outcome {
            Outcome::Success(response) => self.response.parse(&response),
            Outcome::Failure(FailureKind::Status(response)) => self.recover(self.error_mapper.map(&response)),
            Outcome::Failure(FailureKind::Transport(err)) => self.recover(err.into()),
        }
    }

    pub(crate) fn recover(&self, error: ApiError) -> Result<T, ApiError> {
        match self.fallback.as_ref().and_then(|f| f.recover(&error).map(|v| (f.name(), v))) {
            Some((fallback, value)) => {
                debug!(method = self.name(), fallback, error = %error, "fallback recovered");
                Ok(value)
            }
            None => Err(error),
        }
    }
}

impl ApiSpec {
    /// Compiles one method of this API.
    pub fn compile<T>(&self, spec: MethodSpec<T>) -> Result<Method<T>, ConstructionError> {
        Method::compile(self, spec)
    }
}

/// A bound request before filtering, with the chain it will pass through.
#[derive(Debug, Clone)]
pub struct GeneratedRequest {
    pub request: HttpRequest,
    filters: FilterChain,
    timeout: Option<Duration>,
}

impl GeneratedRequest {
    pub fn request_line(&self) -> String {
        self.request.request_line()
    }

    pub fn filter_names(&self) -> Vec<&'static str> {
        self.filters.names()
    }

    /// Effective timeout: method, then API, then client default.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// The request after every filter has run.
    pub fn filtered(&self) -> Result<HttpRequest, FilterError> {
        self.filters.apply(self.request.clone())
    }
}

/// State shared with spawned invocations. Holds no runtime, so the last
/// reference may be dropped on a worker thread.
struct Engine {
    config: ClientConfig,
    dispatcher: Dispatcher,
}

impl Engine {
    fn create_request<T>(&self, method: &Method<T>, args: &Args) -> Result<GeneratedRequest, ConstructionError> {
        let template = method.template();
        let ctx = BindContext {
            endpoint: &self.config.endpoint,
            api_version: self.config.api_version.as_deref(),
        };
        let request = binder::bind(&ctx, template, method.bindings(), args)?;
        let mut filters = template.filters().clone();
        if self.config.strip_expect_header {
            filters.push(StripExpectHeader);
        }
        Ok(GeneratedRequest {
            request,
            filters,
            timeout: template.timeout().or_else(|| self.config.default_timeout()),
        })
    }

    async fn run<T>(&self, mut invocation: Invocation, method: Method<T>, args: Args) -> Result<T, ApiError> {
        let generated = match self.create_request(&method, &args) {
            Ok(generated) => generated,
            Err(err) => {
                invocation.advance(InvocationState::ErrorMapped);
                return Err(err.into());
            }
        };
        let GeneratedRequest {
            request,
            filters,
            timeout,
        } = generated;
        let request = match filters.apply(request) {
            Ok(request) => request,
            Err(err) => {
                invocation.advance(InvocationState::ErrorMapped);
                return Err(err.into());
            }
        };
        invocation.advance(InvocationState::Filtered);

        debug!(line = %request.request_line(), ?timeout, "dispatching");
        invocation.advance(InvocationState::Sent);
        match self.dispatcher.send(request, timeout).await {
            Ok(outcome) => {
                let success = matches!(outcome, Outcome::Success(_));
                let result = method.complete(outcome);
                invocation.advance(if success && result.is_ok() {
                    InvocationState::Parsed
                } else {
                    InvocationState::ErrorMapped
                });
                result
            }
            Err(err @ ApiError::TimedOut(_)) => {
                invocation.advance(InvocationState::TimedOut);
                method.recover(err)
            }
            Err(err) => {
                invocation.advance(InvocationState::ErrorMapped);
                method.recover(err)
            }
        }
    }
}

/// Entry point for invoking compiled methods.
#[derive(Clone)]
pub struct RestClient {
    engine: Arc<Engine>,
    executor: Executor,
}

impl fmt::Debug for RestClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RestClient")
            .field("config", &self.engine.config)
            .field("executor", &self.executor)
            .finish()
    }
}

impl RestClient {
    pub fn builder(config: ClientConfig) -> ClientBuilder {
        ClientBuilder {
            config,
            transport: None,
            handle: None,
        }
    }

    /// A client with the ureq transport and its own runtime.
    pub fn new(config: ClientConfig) -> Result<Self, ConfigError> {
        Self::builder(config).build()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.engine.config
    }

    /// Runs the binder chain without filtering or sending.
    pub fn create_request<T>(&self, method: &Method<T>, args: &Args) -> Result<GeneratedRequest, ConstructionError> {
        self.engine.create_request(method, args)
    }

    /// Interprets a response obtained outside the client.
    pub fn parse_response<T>(&self, method: &Method<T>, response: HttpResponse) -> Result<T, ApiError> {
        method.complete(Outcome::from_response(response))
    }

    /// Invokes `method` and blocks until it completes.
    ///
    /// # Panics
    /// Panics when called from within an asynchronous execution context;
    /// use [`call_async`](Self::call_async) there.
    pub fn call<T: Send + 'static>(&self, method: &Method<T>, args: Args) -> Result<T, ApiError> {
        self.executor.block_on(self.invoke(method.clone(), args))?
    }

    /// Invokes `method` on the client's runtime without blocking.
    pub fn call_async<T: Send + 'static>(&self, method: &Method<T>, args: Args) -> ResponseFuture<T> {
        match self.executor.spawn(self.invoke(method.clone(), args)) {
            Some(handle) => ResponseFuture::spawned(handle),
            None => ResponseFuture::failed(ApiError::Cancelled),
        }
    }

    fn invoke<T: Send + 'static>(
        &self,
        method: Method<T>,
        args: Args,
    ) -> impl Future<Output = Result<T, ApiError>> + Send + 'static {
        let engine = Arc::clone(&self.engine);
        let invocation = Invocation::new(method.name());
        let span = debug_span!("invocation", method = %invocation.method(), id = %invocation.id());
        async move { engine.run(invocation, method, args).await }.instrument(span)
    }
}

pub struct ClientBuilder {
    config: ClientConfig,
    transport: Option<Arc<dyn Transport>>,
    handle: Option<Handle>,
}

impl ClientBuilder {
    pub fn transport(self, transport: impl Transport + 'static) -> Self {
        self.transport_arc(Arc::new(transport))
    }

    pub fn transport_arc(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Run invocations on an existing runtime instead of creating one.
    pub fn runtime_handle(mut self, handle: Handle) -> Self {
        self.handle = Some(handle);
        self
    }

    pub fn build(self) -> Result<RestClient, ConfigError> {
        self.config.validate()?;
        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(UreqTransport::new(self.config.default_timeout())) as Arc<dyn Transport>);
        let executor = match self.handle {
            Some(handle) => Executor::Shared(handle),
            None => {
                let runtime = tokio::runtime::Builder::new_multi_thread()
                    .worker_threads(self.config.worker_threads)
                    .thread_name("restwire-worker")
                    .enable_all()
                    .build()
                    .map_err(|e| ConfigError::Runtime(e.to_string()))?;
                Executor::Owned(Arc::new(OwnedRuntime::new(runtime)))
            }
        };
        debug!(endpoint = %self.config.endpoint, max_in_flight = self.config.max_in_flight, "client built");
        Ok(RestClient {
            engine: Arc::new(Engine {
                dispatcher: Dispatcher::new(transport, self.config.max_in_flight),
                config: self.config,
            }),
            executor,
        })
    }
}
