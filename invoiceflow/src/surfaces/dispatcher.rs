//! Routes operations to a surface and retries transient failures.

use dashmap::DashMap;
use std::sync::Arc;

use super::{BackendError, ExecutionSurface, InternalSurface, OperationRequest, SimulatedExternalSurface};
use crate::errors::{InvoiceflowError, StageFailureError};
use crate::pipeline::retry::{with_retry_if, RetryConfig};
use crate::routing::{ExecutionRouter, ExecutionTarget};

/// Router plus the two execution surfaces.
#[derive(Debug)]
pub struct Dispatcher {
    router: ExecutionRouter,
    internal: Arc<dyn ExecutionSurface>,
    external: Arc<dyn ExecutionSurface>,
    retry: RetryConfig,
    invocations: DashMap<String, usize>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(
            ExecutionRouter::default(),
            Arc::new(InternalSurface::default()),
            Arc::new(SimulatedExternalSurface::default()),
            RetryConfig::default(),
        )
    }
}

impl Dispatcher {
    /// Creates a dispatcher.
    #[must_use]
    pub fn new(
        router: ExecutionRouter,
        internal: Arc<dyn ExecutionSurface>,
        external: Arc<dyn ExecutionSurface>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            router,
            internal,
            external,
            retry,
            invocations: DashMap::new(),
        }
    }

    /// The router in use.
    #[must_use]
    pub fn router(&self) -> &ExecutionRouter {
        &self.router
    }

    /// Number of surface calls made for `operation`, retries included.
    #[must_use]
    pub fn invocation_count(&self, operation: &str) -> usize {
        self.invocations.get(operation).map_or(0, |n| *n)
    }

    fn surface(&self, target: ExecutionTarget) -> &Arc<dyn ExecutionSurface> {
        match target {
            ExecutionTarget::Internal => &self.internal,
            ExecutionTarget::External => &self.external,
        }
    }

    /// Routes and runs one operation.
    ///
    /// # Errors
    ///
    /// Returns `StageFailure` for a permanent backend error, or once
    /// transient retries are exhausted. The latter keeps the transient
    /// error as its cause.
    pub async fn dispatch(&self, request: OperationRequest) -> Result<serde_json::Value, InvoiceflowError> {
        let target = self.router.route(&request.operation);
        let surface = self.surface(target);

        let result = with_retry_if(
            &self.retry,
            &request.operation,
            || {
                *self
                    .invocations
                    .entry(request.operation.clone())
                    .or_insert(0) += 1;
                surface.invoke(&request)
            },
            BackendError::is_transient,
        )
        .await;

        result.map_err(|failure| match failure.error {
            BackendError::Transient(message) => {
                tracing::warn!(
                    run_id = %request.run_id,
                    stage = %request.stage,
                    operation = %request.operation,
                    attempts = failure.attempts,
                    "Transient failures exhausted retries"
                );
                let cause = InvoiceflowError::TransientBackend {
                    operation: request.operation.clone(),
                    attempts: failure.attempts,
                    message,
                };
                StageFailureError::new(
                    request.stage,
                    format!(
                        "{} still failing after {} attempt(s)",
                        request.operation, failure.attempts
                    ),
                )
                .with_cause(cause)
                .into()
            }
            BackendError::Permanent(message) => StageFailureError::new(
                request.stage,
                format!("{} failed: {message}", request.operation),
            )
            .into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::StageId;
    use crate::surfaces::MockExecutionSurface;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    fn dispatcher_with_external(external: MockExecutionSurface, attempts: usize) -> Dispatcher {
        Dispatcher::new(
            ExecutionRouter::default(),
            Arc::new(InternalSurface::default()),
            Arc::new(external),
            RetryConfig::immediate(attempts),
        )
    }

    fn fetch_po() -> OperationRequest {
        OperationRequest::new("fetch_po", Uuid::new_v4(), StageId::Retrieve)
            .with_params(json!({"po_number": "PO-1"}))
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried_then_succeeds() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut external = MockExecutionSurface::new();
        external.expect_invoke().times(3).returning(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(BackendError::Transient("timeout".into()))
            } else {
                Ok(json!({"purchase_orders": []}))
            }
        });

        let dispatcher = dispatcher_with_external(external, 3);
        let out = dispatcher.dispatch(fetch_po()).await.unwrap();
        assert_eq!(out["purchase_orders"], json!([]));
        assert_eq!(dispatcher.invocation_count("fetch_po"), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_retries_escalate_to_stage_failure() {
        let mut external = MockExecutionSurface::new();
        external
            .expect_invoke()
            .times(2)
            .returning(|_| Err(BackendError::Transient("timeout".into())));

        let err = dispatcher_with_external(external, 2)
            .dispatch(fetch_po())
            .await
            .unwrap_err();
        let InvoiceflowError::StageFailure(failure) = err else {
            panic!("expected a stage failure, got {err:?}");
        };
        assert_eq!(failure.stage, StageId::Retrieve);
        assert!(matches!(
            failure.cause.as_deref(),
            Some(InvoiceflowError::TransientBackend { attempts: 2, .. })
        ));
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let mut external = MockExecutionSurface::new();
        external
            .expect_invoke()
            .times(1)
            .returning(|_| Err(BackendError::Permanent("bad request".into())));

        let err = dispatcher_with_external(external, 5)
            .dispatch(fetch_po())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "StageFailure");
        assert!(err.to_string().contains("fetch_po failed: bad request"));
    }

    #[tokio::test]
    async fn test_internal_operations_never_reach_external_surface() {
        let mut external = MockExecutionSurface::new();
        external.expect_invoke().never();

        let dispatcher = dispatcher_with_external(external, 3);
        let request = OperationRequest::new("normalize_vendor", Uuid::new_v4(), StageId::Prepare)
            .with_params(json!({"vendor_name": "Acme Inc"}));
        let out = dispatcher.dispatch(request).await.unwrap();
        assert_eq!(out["normalized_name"], "ACME");
    }
}
