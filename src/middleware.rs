use crate::context::CallContext;
use crate::engine::RateLimiter;
use crate::error::AdmissionError;
use crate::pool::ConnectionPool;
use crate::strategy::WindowStrategy;
use crate::verdict::{DenyReason, Verdict};
use futures::future::BoxFuture;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tower_layer::Layer;
use tower_service::Service;

/// Error returned by [`AdmissionService`].
#[derive(thiserror::Error, Debug)]
pub enum GateError<E> {
    /// The limiter turned the request away; the inner service was not called.
    #[error("request denied: {0}")]
    Denied(DenyReason),
    /// The limiter could not reach a decision; the inner service was not called.
    #[error("admission check failed: {0}")]
    Admission(#[source] AdmissionError),
    /// The inner service failed.
    #[error("{0}")]
    Inner(#[source] E),
}

impl<E> GateError<E> {
    pub fn deny_reason(&self) -> Option<DenyReason> {
        match self {
            GateError::Denied(reason) => Some(*reason),
            _ => None,
        }
    }
}

/// A layer that admits requests through a shared [`RateLimiter`], keyed by `key_fn`.
pub struct AdmissionLayer<P, S, K> {
    limiter: Arc<RateLimiter<P, S>>,
    key_fn: Arc<K>,
    timeout: Option<Duration>,
}

impl<P, S, K> Clone for AdmissionLayer<P, S, K> {
    fn clone(&self) -> Self {
        Self { limiter: self.limiter.clone(), key_fn: self.key_fn.clone(), timeout: self.timeout }
    }
}

impl<P, S, K> AdmissionLayer<P, S, K> {
    pub fn new(limiter: Arc<RateLimiter<P, S>>, key_fn: K) -> Self {
        Self { limiter, key_fn: Arc::new(key_fn), timeout: None }
    }

    /// Bound each admission check; an expired check fails with `GateError::Admission`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl<Svc, P, S, K> Layer<Svc> for AdmissionLayer<P, S, K> {
    type Service = AdmissionService<Svc, P, S, K>;

    fn layer(&self, inner: Svc) -> Self::Service {
        AdmissionService {
            inner,
            limiter: self.limiter.clone(),
            key_fn: self.key_fn.clone(),
            timeout: self.timeout,
        }
    }
}

/// Middleware service that calls the inner service only for admitted requests.
pub struct AdmissionService<Svc, P, S, K> {
    inner: Svc,
    limiter: Arc<RateLimiter<P, S>>,
    key_fn: Arc<K>,
    timeout: Option<Duration>,
}

impl<Svc: Clone, P, S, K> Clone for AdmissionService<Svc, P, S, K> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            limiter: self.limiter.clone(),
            key_fn: self.key_fn.clone(),
            timeout: self.timeout,
        }
    }
}

impl<Svc, P, S, K, Req> Service<Req> for AdmissionService<Svc, P, S, K>
where
    Svc: Service<Req> + Clone + Send + 'static,
    Svc::Future: Send + 'static,
    Svc::Response: Send + 'static,
    Svc::Error: Send + 'static,
    P: ConnectionPool + 'static,
    S: WindowStrategy + 'static,
    K: Fn(&Req) -> String + Send + Sync + 'static,
    Req: Send + 'static,
{
    type Response = Svc::Response;
    type Error = GateError<Svc::Error>;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(GateError::Inner)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let limiter = self.limiter.clone();
        let key = (self.key_fn)(&req);
        let ctx = self.timeout.map_or_else(CallContext::background, CallContext::with_timeout);
        let mut inner = self.inner.clone();

        Box::pin(async move {
            match limiter.allow(&ctx, &key).await {
                Ok(Verdict::Admitted) => inner.call(req).await.map_err(GateError::Inner),
                Ok(Verdict::Denied(reason)) => Err(GateError::Denied(reason)),
                Err(e) => Err(GateError::Admission(e)),
            }
        })
    }
}
