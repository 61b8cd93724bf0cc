//! JSON and bincode payload encodings.

use crate::domain::config::SerializerKind;
use crate::domain::error::{RpcError, RpcResult};
use crate::ports::Serializer;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use shared_types::{FailureKind, Request, RequestId, Response, TypeDescriptor, Value, WireFailure};
use std::sync::Arc;

/// Build the serializer for a configured kind.
pub fn serializer_for(kind: SerializerKind) -> Arc<dyn Serializer> {
    match kind {
        SerializerKind::Json => Arc::new(JsonSerializer),
        SerializerKind::Bincode => Arc::new(BincodeSerializer),
    }
}

/// Plain JSON text.
///
/// Values travel untyped, so the receiver re-coerces parameters and results
/// using the declared descriptors that travel alongside them.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JsonRequest {
    request_id: RequestId,
    service: String,
    method: String,
    #[serde(default)]
    parameter_types: Vec<TypeDescriptor>,
    #[serde(default)]
    parameters: Vec<serde_json::Value>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JsonResponse {
    request_id: RequestId,
    success: bool,
    #[serde(default)]
    result: serde_json::Value,
    #[serde(default = "unit_type")]
    return_type: TypeDescriptor,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<WireFailure>,
}

fn unit_type() -> TypeDescriptor {
    TypeDescriptor::Unit
}

fn malformed(what: &str, e: impl std::fmt::Display) -> RpcError {
    RpcError::Protocol(format!("malformed {what}: {e}"))
}

impl Serializer for JsonSerializer {
    fn kind(&self) -> SerializerKind {
        SerializerKind::Json
    }

    fn encode_request(&self, request: &Request) -> RpcResult<Bytes> {
        let body = JsonRequest {
            request_id: request.id().clone(),
            service: request.service().to_string(),
            method: request.method().to_string(),
            parameter_types: request.param_types().to_vec(),
            parameters: request.params().iter().map(Value::to_json).collect(),
        };
        serde_json::to_vec(&body)
            .map(Bytes::from)
            .map_err(|e| RpcError::Serialization(e.to_string()))
    }

    fn decode_request(&self, payload: &[u8]) -> RpcResult<Request> {
        let body: JsonRequest =
            serde_json::from_slice(payload).map_err(|e| malformed("request", e))?;
        Ok(Request::from_parts(
            body.request_id,
            body.service,
            body.method,
            body.parameter_types,
            body.parameters.into_iter().map(Value::from_json).collect(),
        ))
    }

    fn encode_response(&self, response: &Response) -> RpcResult<Bytes> {
        let body = JsonResponse {
            request_id: response.request_id().clone(),
            success: response.is_success(),
            result: response.result().to_json(),
            return_type: response.return_type().clone(),
            error: response.error().cloned(),
        };
        serde_json::to_vec(&body)
            .map(Bytes::from)
            .map_err(|e| RpcError::Serialization(e.to_string()))
    }

    fn decode_response(&self, payload: &[u8]) -> RpcResult<Response> {
        let body: JsonResponse =
            serde_json::from_slice(payload).map_err(|e| malformed("response", e))?;
        if body.success {
            Ok(Response::success(
                body.request_id,
                Value::from_json(body.result),
                body.return_type,
            ))
        } else {
            let failure = body.error.unwrap_or_else(|| {
                WireFailure::new(FailureKind::Internal, "failed response without error detail")
            });
            Ok(Response::failure(body.request_id, failure))
        }
    }
}

/// Compact binary encoding that keeps every value's variant tag.
#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeSerializer;

impl Serializer for BincodeSerializer {
    fn kind(&self) -> SerializerKind {
        SerializerKind::Bincode
    }

    fn encode_request(&self, request: &Request) -> RpcResult<Bytes> {
        bincode::serialize(request)
            .map(Bytes::from)
            .map_err(|e| RpcError::Serialization(e.to_string()))
    }

    fn decode_request(&self, payload: &[u8]) -> RpcResult<Request> {
        bincode::deserialize(payload).map_err(|e| malformed("request", e))
    }

    fn encode_response(&self, response: &Response) -> RpcResult<Bytes> {
        bincode::serialize(response)
            .map(Bytes::from)
            .map_err(|e| RpcError::Serialization(e.to_string()))
    }

    fn decode_response(&self, payload: &[u8]) -> RpcResult<Response> {
        bincode::deserialize(payload).map_err(|e| malformed("response", e))
    }
}
