//! Routes a decoded request to its resource handler.
//!
//! The dispatcher never fails: an unknown resource, a handler error, a
//! handler panic or an expired watchdog all turn into a failure response, so
//! one bad call cannot take the connection down.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;

use crate::bridge::{GENERIC_FAILURE, OperationKind, Request, Response};
use crate::config::BridgeConfig;
use crate::registry::Registry;
use crate::resource::{Arguments, Resource, ResourceContext, ResourceError, ResourceResult};

pub struct Dispatcher {
    registry: Registry,
    context: ResourceContext,
    handler_timeout: Option<Duration>,
}

impl Dispatcher {
    pub fn new(registry: Registry, config: Arc<BridgeConfig>) -> Self {
        Self {
            handler_timeout: config.handler_timeout,
            registry,
            context: ResourceContext::new(config),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub async fn dispatch(&self, request: Request) -> Response {
        let description = request.to_string();
        let Request {
            operation,
            resource,
            arguments,
        } = request;

        let Some(handler) = self.registry.get(&resource) else {
            tracing::error!(%resource, %operation, "Unable to find resource");
            return Response::failure(
                GENERIC_FAILURE,
                format!("Unable to find resource: {resource}"),
            );
        };

        tracing::debug!(request = %description, method = operation.method_name(), "Dispatching");
        let args = Arguments::from_wire(arguments);
        let call = AssertUnwindSafe(invoke(handler.as_ref(), operation, &self.context, args))
            .catch_unwind();

        let outcome = match self.handler_timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    tracing::error!(
                        request = %description,
                        timeout_secs = limit.as_secs_f64(),
                        "Handler timed out"
                    );
                    return Response::failure(
                        GENERIC_FAILURE,
                        format!("Timed out after {limit:?} processing {description}"),
                    );
                }
            },
            None => call.await,
        };

        match outcome {
            Ok(Ok(result)) if result.is_ok() => {
                tracing::debug!(
                    request = %description,
                    outputs = result.outputs.as_ref().map_or(0, |o| o.len()),
                    "Handler succeeded"
                );
                Response::Success {
                    outputs: result.outputs,
                }
            }
            Ok(Ok(result)) => {
                tracing::warn!(
                    request = %description,
                    code = result.code,
                    "Handler reported failure"
                );
                Response::failure(
                    result.code,
                    format!("Error occurred processing {description}"),
                )
            }
            Ok(Err(e)) => {
                tracing::error!(request = %description, error = %e, "Handler failed");
                Response::failure(
                    GENERIC_FAILURE,
                    format!("Error occurred processing {description}: {e}"),
                )
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                tracing::error!(request = %description, panic = %message, "Handler panicked");
                Response::failure(
                    GENERIC_FAILURE,
                    format!("Handler panicked processing {description}: {message}"),
                )
            }
        }
    }
}

/// Positional operation table: Verify, Apply, Query.
fn invoke<'a>(
    resource: &'a dyn Resource,
    operation: OperationKind,
    ctx: &'a ResourceContext,
    args: Arguments,
) -> BoxFuture<'a, Result<ResourceResult, ResourceError>> {
    match operation {
        OperationKind::Verify => resource.verify(ctx, args),
        OperationKind::Apply => resource.apply(ctx, args),
        OperationKind::Query => resource.query(ctx, args),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
