//! Request and response messages.

use crate::correlation::RequestId;
use crate::descriptor::TypeDescriptor;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A call against a named remote service method.
///
/// Immutable once built: fields are only reachable through accessors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    request_id: RequestId,
    service: String,
    method: String,
    parameter_types: Vec<TypeDescriptor>,
    parameters: Vec<Value>,
}

impl Request {
    /// Assemble a request from decoded parts.
    pub fn from_parts(
        request_id: RequestId,
        service: impl Into<String>,
        method: impl Into<String>,
        parameter_types: Vec<TypeDescriptor>,
        parameters: Vec<Value>,
    ) -> Self {
        Self {
            request_id,
            service: service.into(),
            method: method.into(),
            parameter_types,
            parameters,
        }
    }

    pub fn builder(service: impl Into<String>, method: impl Into<String>) -> RequestBuilder {
        RequestBuilder {
            request_id: None,
            service: service.into(),
            method: method.into(),
            parameter_types: Vec::new(),
            parameters: Vec::new(),
        }
    }

    pub fn id(&self) -> &RequestId {
        &self.request_id
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn param_types(&self) -> &[TypeDescriptor] {
        &self.parameter_types
    }

    pub fn params(&self) -> &[Value] {
        &self.parameters
    }

    /// `service.method(t1, t2)`, for logs and error messages.
    pub fn signature(&self) -> String {
        let types: Vec<String> = self.parameter_types.iter().map(|t| t.to_string()).collect();
        format!("{}.{}({})", self.service, self.method, types.join(", "))
    }
}

/// Builder for [`Request`]. Generates a request id unless one is given.
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    request_id: Option<RequestId>,
    service: String,
    method: String,
    parameter_types: Vec<TypeDescriptor>,
    parameters: Vec<Value>,
}

impl RequestBuilder {
    pub fn id(mut self, id: impl Into<RequestId>) -> Self {
        self.request_id = Some(id.into());
        self
    }

    /// Append one parameter with its declared type.
    pub fn arg(mut self, descriptor: TypeDescriptor, value: impl Into<Value>) -> Self {
        self.parameter_types.push(descriptor);
        self.parameters.push(value.into());
        self
    }

    pub fn build(self) -> Request {
        Request {
            request_id: self.request_id.unwrap_or_else(RequestId::generate),
            service: self.service,
            method: self.method,
            parameter_types: self.parameter_types,
            parameters: self.parameters,
        }
    }
}

/// Category of a failed call, carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    ServiceNotFound,
    MethodNotFound,
    /// The service method itself failed.
    Invocation,
    Deserialization,
    /// The server's worker pool refused the call.
    Overloaded,
    Internal,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::ServiceNotFound => "service_not_found",
            FailureKind::MethodNotFound => "method_not_found",
            FailureKind::Invocation => "invocation",
            FailureKind::Deserialization => "deserialization",
            FailureKind::Overloaded => "overloaded",
            FailureKind::Internal => "internal",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The error half of a failed [`Response`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl WireFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for WireFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.kind)
    }
}

impl std::error::Error for WireFailure {}

/// The outcome of exactly one [`Request`].
///
/// `success == true` implies `error == None`, and a failed response carries
/// a unit result; the constructors are the only way to build one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    request_id: RequestId,
    success: bool,
    result: Value,
    return_type: TypeDescriptor,
    error: Option<WireFailure>,
}

impl Response {
    pub fn success(request_id: RequestId, result: Value, return_type: TypeDescriptor) -> Self {
        Self {
            request_id,
            success: true,
            result,
            return_type,
            error: None,
        }
    }

    pub fn failure(request_id: RequestId, failure: WireFailure) -> Self {
        Self {
            request_id,
            success: false,
            result: Value::Unit,
            return_type: TypeDescriptor::Unit,
            error: Some(failure),
        }
    }

    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn result(&self) -> &Value {
        &self.result
    }

    pub fn return_type(&self) -> &TypeDescriptor {
        &self.return_type
    }

    pub fn error(&self) -> Option<&WireFailure> {
        self.error.as_ref()
    }

    /// Replace the result, e.g. after re-coercing it into the declared type.
    pub fn with_result(mut self, result: Value) -> Self {
        self.result = result;
        self
    }

    /// Collapse into the call outcome.
    pub fn into_result(self) -> Result<Value, WireFailure> {
        match (self.success, self.error) {
            (true, _) => Ok(self.result),
            (false, Some(failure)) => Err(failure),
            (false, None) => Err(WireFailure::new(
                FailureKind::Internal,
                "failed response without error detail",
            )),
        }
    }
}
