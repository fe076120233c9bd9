//! Handler invocation.
//!
//! # Responsibilities
//! - Call the injected handler exactly once per decoded request
//! - Turn handler errors and panics into a generic 500 instead of letting
//!   them take the connection down

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::FutureExt;

use crate::error::BoxError;
use crate::http::decoder::DecodedRequest;
use crate::http::response::ResponseSpec;

/// Error a handler may return.
pub type HandlerError = BoxError;

/// Application logic invoked once per request.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn handle(&self, request: DecodedRequest) -> Result<ResponseSpec, HandlerError>;
}

#[async_trait]
impl<F, Fut> Handler for F
where
    F: Fn(DecodedRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ResponseSpec, HandlerError>> + Send + 'static,
{
    async fn handle(&self, request: DecodedRequest) -> Result<ResponseSpec, HandlerError> {
        (self)(request).await
    }
}

/// Shared by every pipeline of a server.
#[derive(Clone)]
pub struct Dispatcher {
    handler: Arc<dyn Handler>,
    close_on_error: bool,
}

impl Dispatcher {
    pub fn new(handler: impl Handler) -> Self {
        Self::from_arc(Arc::new(handler))
    }

    pub fn from_arc(handler: Arc<dyn Handler>) -> Self {
        Self {
            handler,
            close_on_error: false,
        }
    }

    /// Close the connection after a failed handler call.
    pub fn close_on_error(mut self, close: bool) -> Self {
        self.close_on_error = close;
        self
    }

    /// Run the handler. Never fails: errors and panics become a 500.
    pub async fn dispatch(&self, request: DecodedRequest) -> ResponseSpec {
        let request_id = request.id();

        // AssertUnwindSafe: the request is moved into the handler and nothing
        // it touches is observed after a panic.
        let result = AssertUnwindSafe(self.handler.handle(request))
            .catch_unwind()
            .await;

        match result {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                tracing::error!(request_id = %request_id, error = %e, "Handler returned error");
                self.failure()
            }
            Err(panic_payload) => {
                let panic_msg = if let Some(s) = panic_payload.downcast_ref::<&str>() {
                    (*s).to_string()
                } else if let Some(s) = panic_payload.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "unknown panic".to_string()
                };
                tracing::error!(
                    request_id = %request_id,
                    panic_message = %panic_msg,
                    "Handler panicked"
                );
                self.failure()
            }
        }
    }

    fn failure(&self) -> ResponseSpec {
        let response = ResponseSpec::server_error();
        if self.close_on_error {
            response.close()
        } else {
            response
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("close_on_error", &self.close_on_error)
            .finish_non_exhaustive()
    }
}
