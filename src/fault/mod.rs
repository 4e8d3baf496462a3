//! Fault behaviors: delay, forced error, connection abort and their combinations
//!
//! A [`Fault`] describes what happens on a request once its layer has decided
//! to fire. [`FaultLayer`] binds a fault to an injection ratio and wraps any
//! downstream tower service, so layers stack freely:
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use axum::http::StatusCode;
//! use fault_injector::fault::{Fault, FaultLayer};
//! use tower::ServiceBuilder;
//!
//! let app = axum::Router::<()>::new();
//! let svc = ServiceBuilder::new()
//!     .layer(FaultLayer::new(Fault::delay(Duration::from_millis(200)), 0.1))
//!     .layer(FaultLayer::new(Fault::error(StatusCode::SERVICE_UNAVAILABLE, ""), 0.05))
//!     .layer(FaultLayer::new(Fault::abort(), 0.01))
//!     .service(app);
//! # drop(svc);
//! ```

mod decision;
mod layer;

pub use decision::{RandomSource, decide};
pub use layer::{FaultLayer, FaultService};

use std::fmt;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tower::{Service, ServiceExt};

use crate::error::{Aborted, BoxError};

/// Body used when an injected error has no status text
pub const PSEUDO_STATUS_TEXT: &str = "fault: pseudo status text is injected";

/// The closed set of fault kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    /// Added latency around the downstream call
    Delay,
    /// Injected status response, downstream skipped
    Error,
    /// Latency followed by an injected status response
    DelayWithError,
    /// Connection dropped without a response
    Abort,
    /// Latency followed by a dropped connection
    DelayWithAbort,
}

impl FaultKind {
    /// Configuration name of this kind
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Delay => "delay",
            Self::Error => "error",
            Self::DelayWithError => "delay_with_error",
            Self::Abort => "abort",
            Self::DelayWithAbort => "delay_with_abort",
        }
    }
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a fault layer does to a request once it has been triggered.
///
/// Values are immutable configuration, built once and reused for every request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Sleep before (or, with `afterward`, after) calling downstream.
    ///
    /// Sleeping afterward models a connection that is slow to complete rather
    /// than slow to start, which exercises a client's read timeout.
    Delay {
        /// How long to sleep
        duration: Duration,
        /// Sleep after downstream has produced its response
        afterward: bool,
    },
    /// Respond with `status` and `text` without calling downstream
    Error {
        /// Injected status code
        status: StatusCode,
        /// Response body; empty means [`PSEUDO_STATUS_TEXT`]
        text: String,
    },
    /// Sleep, then behave like [`Fault::Error`]
    DelayWithError {
        /// How long to sleep
        duration: Duration,
        /// Injected status code
        status: StatusCode,
        /// Response body; empty means [`PSEUDO_STATUS_TEXT`]
        text: String,
    },
    /// Drop the connection without writing any response
    Abort,
    /// Sleep, then behave like [`Fault::Abort`]
    DelayWithAbort {
        /// How long to sleep
        duration: Duration,
    },
}

impl Fault {
    /// Delay before calling downstream
    #[must_use]
    pub fn delay(duration: Duration) -> Self {
        Self::Delay {
            duration,
            afterward: false,
        }
    }

    /// Delay after downstream has responded
    #[must_use]
    pub fn delay_after(duration: Duration) -> Self {
        Self::Delay {
            duration,
            afterward: true,
        }
    }

    /// Injected status response
    #[must_use]
    pub fn error(status: StatusCode, text: impl Into<String>) -> Self {
        Self::Error {
            status,
            text: text.into(),
        }
    }

    /// Delay followed by an injected status response
    #[must_use]
    pub fn delay_with_error(duration: Duration, status: StatusCode, text: impl Into<String>) -> Self {
        Self::DelayWithError {
            duration,
            status,
            text: text.into(),
        }
    }

    /// Connection abort
    #[must_use]
    pub fn abort() -> Self {
        Self::Abort
    }

    /// Delay followed by a connection abort
    #[must_use]
    pub fn delay_with_abort(duration: Duration) -> Self {
        Self::DelayWithAbort { duration }
    }

    /// Kind of this fault
    #[must_use]
    pub fn kind(&self) -> FaultKind {
        match self {
            Self::Delay { .. } => FaultKind::Delay,
            Self::Error { .. } => FaultKind::Error,
            Self::DelayWithError { .. } => FaultKind::DelayWithError,
            Self::Abort => FaultKind::Abort,
            Self::DelayWithAbort { .. } => FaultKind::DelayWithAbort,
        }
    }

    /// Run the triggered path of this fault.
    ///
    /// `downstream` is called at most once, with `request` untouched. Abort
    /// faults resolve to `Err(`[`Aborted`]`)`.
    pub async fn inject<S, ReqBody>(
        &self,
        request: Request<ReqBody>,
        downstream: S,
    ) -> Result<Response<Body>, BoxError>
    where
        S: Service<Request<ReqBody>, Response = Response<Body>>,
        S::Error: Into<BoxError>,
    {
        match self {
            Self::Delay {
                duration,
                afterward: false,
            } => {
                sleep(*duration).await;
                downstream.oneshot(request).await.map_err(Into::into)
            }
            Self::Delay {
                duration,
                afterward: true,
            } => {
                let response = downstream.oneshot(request).await.map_err(Into::into)?;
                sleep(*duration).await;
                Ok(response)
            }
            Self::Error { status, text } => Ok(status_response(*status, text)),
            Self::DelayWithError {
                duration,
                status,
                text,
            } => {
                sleep(*duration).await;
                Ok(status_response(*status, text))
            }
            Self::Abort => Err(Aborted.into()),
            Self::DelayWithAbort { duration } => {
                sleep(*duration).await;
                Err(Aborted.into())
            }
        }
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Delay {
                duration,
                afterward,
            } => {
                let when = if *afterward { "after" } else { "before" };
                write!(f, "delay({duration:?}, {when})")
            }
            Self::Error { status, .. } => write!(f, "error({})", status.as_u16()),
            Self::DelayWithError {
                duration, status, ..
            } => write!(f, "delay_with_error({duration:?}, {})", status.as_u16()),
            Self::Abort => f.write_str("abort"),
            Self::DelayWithAbort { duration } => write!(f, "delay_with_abort({duration:?})"),
        }
    }
}

fn status_response(status: StatusCode, text: &str) -> Response<Body> {
    let body = if text.is_empty() {
        PSEUDO_STATUS_TEXT
    } else {
        text
    };
    (status, body.to_owned()).into_response()
}
