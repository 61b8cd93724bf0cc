//! Server invocation dispatcher.
//!
//! Resolves the target method, runs the interceptor chain around it and
//! builds exactly one [`Response`]. Runs on a worker thread and never
//! touches the network.

use crate::domain::chain::{InterceptorChain, Invocation, InvocationError};
use crate::domain::services::ServiceTable;
use crate::middleware::RuntimeMetrics;
use shared_types::{Request, Response};
use std::sync::Arc;
use tracing::{debug, warn};

pub struct InvocationDispatcher {
    services: Arc<ServiceTable>,
    chain: Arc<InterceptorChain>,
    metrics: Arc<RuntimeMetrics>,
}

impl InvocationDispatcher {
    pub fn new(
        services: Arc<ServiceTable>,
        chain: Arc<InterceptorChain>,
        metrics: Arc<RuntimeMetrics>,
    ) -> Self {
        Self {
            services,
            chain,
            metrics,
        }
    }

    pub fn services(&self) -> &Arc<ServiceTable> {
        &self.services
    }

    pub fn handle(&self, request: &Arc<Request>) -> Response {
        let id = request.id().clone();

        let method = match self
            .services
            .resolve(request.service(), request.method(), request.param_types())
        {
            Ok(method) => method,
            Err(e) => {
                debug!(request_id = %id, error = %e, "Cannot resolve target");
                self.metrics.record_request(false);
                return Response::failure(id, e.to_wire());
            }
        };

        let outcome = method
            .bind_arguments(request.params().to_vec())
            .and_then(|params| {
                let mut invocation =
                    Invocation::new(Arc::clone(request), Arc::clone(&method), params);
                let terminal = |inv: &mut Invocation| {
                    inv.invoke().map_err(|cause| {
                        InvocationError::wrap(format!("{} failed", inv.method().signature()), cause)
                    })
                };
                if self.chain.is_empty() {
                    terminal(&mut invocation)
                } else {
                    self.chain.run(&mut invocation, &terminal)
                }
            });

        match outcome {
            Ok(value) => {
                self.metrics.record_request(true);
                Response::success(id, value, method.return_type().clone())
            }
            Err(e) => {
                let failure = e.to_wire();
                warn!(
                    request_id = %id,
                    method = %request.signature(),
                    error = %failure,
                    "Invocation failed"
                );
                self.metrics.record_request(false);
                Response::failure(id, failure)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::chain::{Interceptor, InvokeResult, Next};
    use crate::domain::services::ServiceDef;
    use shared_types::{FailureKind, TypeDescriptor, Value};
    use std::sync::atomic::Ordering;

    fn user_service() -> ServiceDef {
        ServiceDef::new("UserService").handler(
            "getUser",
            vec![TypeDescriptor::I64],
            TypeDescriptor::record("User"),
            |params| {
                let id = params[0].as_i64().unwrap_or_default();
                if id < 0 {
                    return Err(InvocationError::service(format!("no user {id}")));
                }
                Ok(Value::record([
                    ("id", Value::Int(id)),
                    ("name", Value::from(format!("user-{id}"))),
                ]))
            },
        )
    }

    fn dispatcher(interceptors: Vec<Arc<dyn Interceptor>>) -> InvocationDispatcher {
        InvocationDispatcher::new(
            Arc::new(ServiceTable::new([user_service()]).unwrap()),
            Arc::new(InterceptorChain::new(interceptors)),
            Arc::new(RuntimeMetrics::new()),
        )
    }

    #[test]
    fn test_get_user() {
        let request: Arc<Request> = Request::builder("UserService", "getUser")
            .arg(TypeDescriptor::I64, 42i64)
            .build()
            .into();
        let response = dispatcher(vec![]).handle(&request);

        assert!(response.is_success());
        assert_eq!(response.request_id(), request.id());
        assert_eq!(response.return_type(), &TypeDescriptor::record("User"));
        assert_eq!(response.result().get("id"), Some(&Value::Int(42)));
    }

    #[test]
    fn test_unknown_service() {
        let dispatcher = dispatcher(vec![]);
        let request: Arc<Request> = Request::builder("UnknownService", "foo").build().into();
        let response = dispatcher.handle(&request);

        let failure = response.error().unwrap();
        assert_eq!(failure.kind, FailureKind::ServiceNotFound);
        assert_eq!(failure.message, "not found service [UnknownService]");
        assert_eq!(dispatcher.metrics.requests_failed.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_unknown_method_signature() {
        let request: Arc<Request> = Request::builder("UserService", "getUser")
            .arg(TypeDescriptor::String, "x")
            .build()
            .into();
        let response = dispatcher(vec![]).handle(&request);
        let failure = response.error().unwrap();
        assert_eq!(failure.kind, FailureKind::MethodNotFound);
        assert_eq!(failure.message, "not found method [UserService.getUser(string)]");
    }

    #[test]
    fn test_argument_mismatch_is_deserialization_failure() {
        let request: Arc<Request> = Request::from_parts(
            "r".into(),
            "UserService",
            "getUser",
            vec![TypeDescriptor::I64],
            vec![Value::from("not a number")],
        )
        .into();
        let response = dispatcher(vec![]).handle(&request);
        assert_eq!(response.error().unwrap().kind, FailureKind::Deserialization);
    }

    #[test]
    fn test_service_error_root_cause() {
        let request: Arc<Request> = Request::builder("UserService", "getUser")
            .arg(TypeDescriptor::I64, -1i64)
            .build()
            .into();
        let response = dispatcher(vec![]).handle(&request);
        let failure = response.error().unwrap();
        assert_eq!(failure.kind, FailureKind::Invocation);
        assert_eq!(failure.message, "no user -1");
    }

    struct Deny;

    impl Interceptor for Deny {
        fn name(&self) -> &str {
            "deny"
        }

        fn intercept(&self, _invocation: &mut Invocation, _next: Next<'_>) -> InvokeResult {
            Err(InvocationError::service("denied"))
        }
    }

    #[test]
    fn test_interceptor_short_circuit() {
        let request: Arc<Request> = Request::builder("UserService", "getUser")
            .arg(TypeDescriptor::I64, 1i64)
            .build()
            .into();
        let response = dispatcher(vec![Arc::new(Deny)]).handle(&request);
        assert_eq!(response.error().unwrap().message, "denied");
    }
}
