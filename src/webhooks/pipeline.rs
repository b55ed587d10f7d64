//! Composable admission handler chain
//!
//! A handler takes a [`RequestContext`] and the admission request and produces
//! a response. Decorators take a handler and return one of the same shape, so
//! they compose by plain function application:
//!
//! ```text
//! with_logging(with_timing(name, observer, with_timeout(timeout, on_timeout, handler)))
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use kube::core::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{Instrument, Span, error, info, info_span, warn};

use crate::trust::CallContext;

pub type Request = AdmissionRequest<DynamicObject>;

/// The single handler shape every decorator accepts and returns
pub type AdmissionHandler =
    Arc<dyn Fn(RequestContext, Arc<Request>) -> BoxFuture<'static, AdmissionResponse> + Send + Sync>;

/// Builds the response sent when the deadline fires first
pub type TimeoutResponder = Arc<dyn Fn(&Request, &DeadlineExceeded) -> AdmissionResponse + Send + Sync>;

/// Receives the measured duration of every request
pub type DurationObserver = Arc<dyn Fn(Duration) + Send + Sync>;

/// Request-scoped values threaded through the chain
#[derive(Clone, Debug)]
pub struct RequestContext {
    span: Span,
    call: CallContext,
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new(CallContext::background())
    }
}

impl RequestContext {
    pub fn new(call: CallContext) -> Self {
        Self {
            span: Span::none(),
            call,
        }
    }

    /// Span carrying the request identity fields; nested logs inherit them
    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn call(&self) -> &CallContext {
        &self.call
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn with_call(mut self, call: CallContext) -> Self {
        self.call = call;
        self
    }
}

/// Deadline error handed to the timeout responder
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("admission handler timed out after {0:?}")]
pub struct DeadlineExceeded(pub Duration);

/// Lift an async function into an [`AdmissionHandler`]
pub fn handler_fn<F, Fut>(f: F) -> AdmissionHandler
where
    F: Fn(RequestContext, Arc<Request>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = AdmissionResponse> + Send + 'static,
{
    Arc::new(
        move |ctx: RequestContext, req: Arc<Request>| -> BoxFuture<'static, AdmissionResponse> {
            Box::pin(f(ctx, req))
        },
    )
}

/// Attach a span tagged with the request identity and make it the request's logger
pub fn with_logging(next: AdmissionHandler) -> AdmissionHandler {
    Arc::new(move |ctx: RequestContext, req: Arc<Request>| -> BoxFuture<'static, AdmissionResponse> {
        let span = info_span!(
            parent: ctx.span(),
            "admission",
            uid = %req.uid,
            kind = %req.kind.kind,
            operation = ?req.operation,
            namespace = req.namespace.as_deref().unwrap_or_default(),
            name = %req.name,
        );
        let ctx = ctx.with_span(span.clone());
        let next = next.clone();
        Box::pin(async move { next(ctx, req).await }.instrument(span))
    })
}

/// Records elapsed time when dropped, so every exit path is measured
struct TimingGuard {
    name: &'static str,
    started: Instant,
    observer: Option<DurationObserver>,
}

impl Drop for TimingGuard {
    fn drop(&mut self) {
        let elapsed = self.started.elapsed();
        info!(
            handler = self.name,
            elapsed_ms = elapsed.as_millis() as u64,
            "Admission request completed"
        );
        if let Some(observer) = &self.observer {
            observer(elapsed);
        }
    }
}

/// Measure wall-clock duration around the wrapped handler
pub fn with_timing(
    name: &'static str,
    observer: Option<DurationObserver>,
    next: AdmissionHandler,
) -> AdmissionHandler {
    Arc::new(move |ctx: RequestContext, req: Arc<Request>| -> BoxFuture<'static, AdmissionResponse> {
        let guard = TimingGuard {
            name,
            started: Instant::now(),
            observer: observer.clone(),
        };
        let next = next.clone();
        Box::pin(async move {
            let _guard = guard;
            next(ctx, req).await
        })
    })
}

/// Race the wrapped handler against a deadline.
///
/// The handler runs on its own task with a call context bounded by `timeout`.
/// If the deadline wins, `on_timeout` answers and the handler's eventual
/// result is dropped with its join handle. A panicking handler becomes an
/// internal-error response.
pub fn with_timeout(
    timeout: Duration,
    on_timeout: TimeoutResponder,
    next: AdmissionHandler,
) -> AdmissionHandler {
    Arc::new(move |ctx: RequestContext, req: Arc<Request>| -> BoxFuture<'static, AdmissionResponse> {
        let next = next.clone();
        let on_timeout = on_timeout.clone();
        Box::pin(async move {
            let call = ctx.call().with_timeout(timeout);
            let branch = next(ctx.clone().with_call(call), req.clone());
            let mut worker = tokio::spawn(branch.instrument(ctx.span().clone()));

            tokio::select! {
                joined = &mut worker => match joined {
                    Ok(response) => response,
                    Err(e) => {
                        error!(error = %e, "Admission handler aborted");
                        internal_error(&req, "admission handler failed unexpectedly")
                    }
                },
                _ = tokio::time::sleep(timeout) => {
                    warn!(timeout_ms = timeout.as_millis() as u64, "Admission handler exceeded deadline");
                    on_timeout(&req, &DeadlineExceeded(timeout))
                }
            }
        })
    })
}

/// 504-coded denial naming the deadline
pub fn default_timeout_response(req: &Request, err: &DeadlineExceeded) -> AdmissionResponse {
    with_code(AdmissionResponse::from(req).deny(err.to_string()), 504)
}

/// 500-coded denial for faults inside the admission path
pub fn internal_error(req: &Request, message: impl Into<String>) -> AdmissionResponse {
    with_code(AdmissionResponse::from(req).deny(message.into()), 500)
}

/// 403-coded denial for a policy verdict
pub fn forbidden(req: &Request, message: impl Into<String>) -> AdmissionResponse {
    with_code(AdmissionResponse::from(req).deny(message.into()), 403)
}

fn with_code(mut response: AdmissionResponse, code: u16) -> AdmissionResponse {
    response.result.code = code;
    response
}
