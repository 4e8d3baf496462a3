//! Tower layer binding a fault and an injection ratio to a downstream service

use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::{Request, Response};
use futures::future::BoxFuture;
use tower::{Layer, Service};
use tracing::{debug, trace};

use super::Fault;
use super::decision::RandomSource;
use crate::error::BoxError;

/// Layer that injects one [`Fault`] into a fraction of requests.
///
/// Each layer draws its own decision per request, so several layers on one
/// pipeline fire independently of each other.
#[derive(Debug, Clone)]
pub struct FaultLayer {
    fault: Arc<Fault>,
    ratio: f64,
    source: Arc<RandomSource>,
}

impl FaultLayer {
    /// Create a layer that fires on `ratio` of requests, using the shared random source
    #[must_use]
    pub fn new(fault: Fault, ratio: f64) -> Self {
        Self {
            fault: Arc::new(fault),
            ratio,
            source: RandomSource::shared(),
        }
    }

    /// Use a specific random source, e.g. a seeded one for reproducible runs
    #[must_use]
    pub fn with_source(mut self, source: Arc<RandomSource>) -> Self {
        self.source = source;
        self
    }

    /// The fault this layer injects
    #[must_use]
    pub fn fault(&self) -> &Fault {
        &self.fault
    }

    /// Fraction of requests this layer fires on
    #[must_use]
    pub fn ratio(&self) -> f64 {
        self.ratio
    }
}

impl<S> Layer<S> for FaultLayer {
    type Service = FaultService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        FaultService {
            inner,
            fault: Arc::clone(&self.fault),
            ratio: self.ratio,
            source: Arc::clone(&self.source),
        }
    }
}

/// Service produced by [`FaultLayer`]
#[derive(Debug, Clone)]
pub struct FaultService<S> {
    inner: S,
    fault: Arc<Fault>,
    ratio: f64,
    source: Arc<RandomSource>,
}

impl<S> FaultService<S> {
    /// Wrap `inner` directly, without going through a layer
    pub fn new(inner: S, fault: Fault, ratio: f64) -> Self {
        FaultLayer::new(fault, ratio).layer(inner)
    }

    /// Get a reference to the wrapped service
    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    /// Consume the layer and return the wrapped service
    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S, ReqBody> Service<Request<ReqBody>> for FaultService<S>
where
    S: Service<Request<ReqBody>, Response = Response<Body>> + Clone + Send + 'static,
    S::Error: Into<BoxError>,
    S::Future: Send + 'static,
    ReqBody: Send + 'static,
{
    type Response = Response<Body>;
    type Error = BoxError;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, request: Request<ReqBody>) -> Self::Future {
        // Take the instance that was driven to readiness and leave a clone behind.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        if !self.source.decide(self.ratio) {
            trace!(fault = %self.fault, "Fault not triggered, passing through");
            let future = inner.call(request);
            return Box::pin(async move { future.await.map_err(Into::into) });
        }

        debug!(
            fault = %self.fault,
            ratio = self.ratio,
            method = %request.method(),
            path = %request.uri().path(),
            "Injecting fault"
        );
        let fault = Arc::clone(&self.fault);
        Box::pin(async move { fault.inject(request, inner).await })
    }
}
