//! Dispatch: the invocation lifecycle, the executor and timeouts.
//!
//! # Design
//! Every call is an [`Invocation`] that owns its request from the moment it
//! is built until it reaches a terminal state:
//!
//! ```text
//! Built -> Filtered -> Sent -> Parsed
//!                          \-> ErrorMapped
//!                          \-> TimedOut
//! ```
//!
//! `ErrorMapped` is reachable from every non-terminal state; nothing leaves
//! a terminal state. Synchronous and asynchronous calls run the same future;
//! the sync path blocks on it, the async path spawns it and hands back a
//! [`ResponseFuture`].
//!
//! An invocation's deadline starts when it is dispatched and covers the
//! wait for a concurrency permit as well as the exchange. The exchange
//! itself runs as its own task holding the permit. On expiry an
//! interruptible exchange is aborted; any other exchange is left to its
//! transport's own deadline and keeps the permit until it ends, so
//! `max_in_flight` always bounds live connections.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::runtime::{Handle, Runtime};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{ApiError, TransportError};
use crate::http::{HttpRequest, HttpResponse};
use crate::pipeline::Outcome;
use crate::transport::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationState {
    Built,
    Filtered,
    Sent,
    Parsed,
    ErrorMapped,
    TimedOut,
}

impl InvocationState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            InvocationState::Parsed | InvocationState::ErrorMapped | InvocationState::TimedOut
        )
    }

    pub fn can_transition_to(self, next: InvocationState) -> bool {
        use InvocationState::*;
        match (self, next) {
            (from, _) if from.is_terminal() => false,
            (_, ErrorMapped) => true,
            (Built, Filtered) | (Filtered, Sent) => true,
            (Sent, Parsed) | (Sent, TimedOut) => true,
            _ => false,
        }
    }
}

/// One call of one method.
#[derive(Debug)]
pub struct Invocation {
    id: Uuid,
    method: String,
    state: InvocationState,
}

impl Invocation {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            method: method.into(),
            state: InvocationState::Built,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn state(&self) -> InvocationState {
        self.state
    }

    /// Moves to `next` if the transition is legal. Returns whether it moved.
    pub fn advance(&mut self, next: InvocationState) -> bool {
        if !self.state.can_transition_to(next) {
            warn!(from = ?self.state, to = ?next, "illegal invocation transition ignored");
            return false;
        }
        debug!(from = ?self.state, to = ?next, "invocation state");
        self.state = next;
        true
    }
}

/// A runtime created for and owned by one client.
///
/// Dropping it never waits for outstanding blocking exchanges; they finish
/// under their own socket deadlines.
#[derive(Debug)]
pub(crate) struct OwnedRuntime(Option<Runtime>);

impl OwnedRuntime {
    pub(crate) fn new(runtime: Runtime) -> Self {
        Self(Some(runtime))
    }

    fn handle(&self) -> Option<&Handle> {
        self.0.as_ref().map(Runtime::handle)
    }
}

impl Drop for OwnedRuntime {
    fn drop(&mut self) {
        if let Some(runtime) = self.0.take() {
            debug!("shutting down client runtime");
            runtime.shutdown_background();
        }
    }
}

/// Where invocations run.
#[derive(Debug, Clone)]
pub(crate) enum Executor {
    Owned(Arc<OwnedRuntime>),
    /// A runtime owned by the caller.
    Shared(Handle),
}

impl Executor {
    fn handle(&self) -> Option<&Handle> {
        match self {
            Executor::Owned(runtime) => runtime.handle(),
            Executor::Shared(handle) => Some(handle),
        }
    }

    pub(crate) fn block_on<F>(&self, future: F) -> Result<F::Output, ApiError>
    where
        F: Future,
    {
        self.handle().map(|handle| handle.block_on(future)).ok_or(ApiError::Cancelled)
    }

    pub(crate) fn spawn<F>(&self, future: F) -> Option<JoinHandle<F::Output>>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.handle().map(|handle| handle.spawn(future))
    }
}

/// The spawned exchange of one invocation. Dropping it aborts the
/// exchange when the transport can be interrupted.
struct Exchange {
    handle: JoinHandle<Result<HttpResponse, TransportError>>,
    interruptible: bool,
}

impl Drop for Exchange {
    fn drop(&mut self) {
        if self.interruptible {
            self.handle.abort();
        } else if !self.handle.is_finished() {
            debug!("exchange left to finish under its transport deadline");
        }
    }
}

/// Sends requests through a transport, bounded in concurrency and time.
#[derive(Clone)]
pub struct Dispatcher {
    transport: Arc<dyn Transport>,
    permits: Arc<Semaphore>,
}

impl Dispatcher {
    pub fn new(transport: Arc<dyn Transport>, max_in_flight: usize) -> Self {
        Self {
            transport,
            permits: Arc::new(Semaphore::new(max_in_flight)),
        }
    }

    /// Sends one request. Transport failures come back as an [`Outcome`];
    /// the only errors are expiry of `timeout` and a closed dispatcher.
    ///
    /// `timeout` runs from this call, so time spent waiting for a permit
    /// counts against it.
    pub async fn send(&self, request: HttpRequest, timeout: Option<Duration>) -> Result<Outcome, ApiError> {
        let deadline = timeout.map(|limit| (limit, Instant::now() + limit));
        let result = match deadline {
            Some((limit, at)) => tokio::time::timeout_at(at, self.exchange(request, Some(at)))
                .await
                .map_err(|_| ApiError::TimedOut(limit))?,
            None => self.exchange(request, None).await,
        }?;
        Ok(match result {
            Ok(response) => {
                debug!(status = response.status, "response received");
                Outcome::from_response(response)
            }
            Err(err) => {
                debug!(error = %err, "transport failed");
                Outcome::from_transport(err)
            }
        })
    }

    async fn exchange(
        &self,
        request: HttpRequest,
        deadline: Option<Instant>,
    ) -> Result<Result<HttpResponse, TransportError>, ApiError> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| ApiError::Cancelled)?;
        let remaining = deadline.map(|at| at.saturating_duration_since(Instant::now()));
        let transport = Arc::clone(&self.transport);
        let mut exchange = Exchange {
            interruptible: transport.interruptible(),
            handle: tokio::spawn(async move {
                let result = transport.execute(request, remaining).await;
                drop(permit);
                result
            }),
        };
        (&mut exchange.handle).await.map_err(|_| ApiError::Cancelled)
    }

    /// Permits currently free.
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }
}

/// The eventual result of an asynchronous call.
///
/// Dropping it does not cancel the call; use [`abort`](Self::abort).
#[derive(Debug)]
pub struct ResponseFuture<T> {
    inner: Inner<T>,
}

#[derive(Debug)]
enum Inner<T> {
    Pending(JoinHandle<Result<T, ApiError>>),
    Failed(Option<ApiError>),
}

impl<T> ResponseFuture<T> {
    pub(crate) fn spawned(handle: JoinHandle<Result<T, ApiError>>) -> Self {
        Self {
            inner: Inner::Pending(handle),
        }
    }

    /// A future that is already resolved with `error`.
    pub fn failed(error: ApiError) -> Self {
        Self {
            inner: Inner::Failed(Some(error)),
        }
    }

    /// Cancels the call. Awaiting afterwards yields [`ApiError::Cancelled`]
    /// unless the call had already finished.
    pub fn abort(&self) {
        if let Inner::Pending(handle) = &self.inner {
            handle.abort();
        }
    }

    pub fn is_finished(&self) -> bool {
        match &self.inner {
            Inner::Pending(handle) => handle.is_finished(),
            Inner::Failed(_) => true,
        }
    }
}

impl<T> Future for ResponseFuture<T> {
    type Output = Result<T, ApiError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().inner {
            Inner::Pending(handle) => Pin::new(handle).poll(cx).map(|joined| match joined {
                Ok(result) => result,
                Err(err) => {
                    if err.is_panic() {
                        warn!("invocation task panicked");
                    }
                    Err(ApiError::Cancelled)
                }
            }),
            Inner::Failed(error) => Poll::Ready(Err(error.take().unwrap_or(ApiError::Cancelled))),
        }
    }
}
