//! Demo services published by the node.

use std::time::Duration;

use rpc_runtime::{InvocationError, InvokeResult, ServiceDef};
use serde::{Deserialize, Serialize};
use shared_types::{TypeDescriptor, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub name: String,
}

impl User {
    fn lookup(id: i64) -> Result<Self, InvocationError> {
        if id <= 0 {
            return Err(InvocationError::service(format!("no user with id {id}")));
        }
        Ok(Self {
            id,
            name: format!("user-{id}"),
        })
    }

    fn to_value(&self) -> InvokeResult {
        Value::from_serialize(self).map_err(|e| InvocationError::service(e.to_string()))
    }
}

/// `UserService`: `getUser(i64) -> User`, `getUsers(list<i64>) -> list<User>`.
pub fn user_service() -> ServiceDef {
    ServiceDef::new("UserService")
        .handler(
            "getUser",
            vec![TypeDescriptor::I64],
            TypeDescriptor::record("User"),
            |params| User::lookup(int_arg(params, 0)?)?.to_value(),
        )
        .handler(
            "getUsers",
            vec![TypeDescriptor::list(TypeDescriptor::I64)],
            TypeDescriptor::list(TypeDescriptor::record("User")),
            |params| {
                let ids = params
                    .first()
                    .and_then(Value::as_list)
                    .ok_or_else(|| InvocationError::bad_arguments("expected a list of ids"))?;
                ids.iter()
                    .map(|id| {
                        let id = id
                            .as_i64()
                            .ok_or_else(|| InvocationError::bad_arguments("ids must be integers"))?;
                        User::lookup(id)?.to_value()
                    })
                    .collect::<Result<Vec<_>, _>>()
                    .map(Value::List)
            },
        )
}

/// `EchoService`: diagnostics for transports and the worker pool.
pub fn echo_service() -> ServiceDef {
    ServiceDef::new("EchoService")
        .handler("echo", vec![TypeDescriptor::String], TypeDescriptor::String, |p| {
            Ok(p[0].clone())
        })
        .handler("echoBytes", vec![TypeDescriptor::Bytes], TypeDescriptor::Bytes, |p| {
            Ok(p[0].clone())
        })
        .handler(
            "add",
            vec![TypeDescriptor::I64, TypeDescriptor::I64],
            TypeDescriptor::I64,
            |p| {
                int_arg(p, 0)?
                    .checked_add(int_arg(p, 1)?)
                    .map(Value::Int)
                    .ok_or_else(|| InvocationError::service("integer overflow"))
            },
        )
        // blocks a worker thread; useful for exercising out-of-order replies
        .handler("sleep", vec![TypeDescriptor::I64], TypeDescriptor::I64, |p| {
            let ms = int_arg(p, 0)?;
            let ms = u64::try_from(ms)
                .map_err(|_| InvocationError::bad_arguments("sleep duration must not be negative"))?;
            std::thread::sleep(Duration::from_millis(ms));
            Ok(Value::Int(ms as i64))
        })
}

fn int_arg(params: &[Value], index: usize) -> Result<i64, InvocationError> {
    params
        .get(index)
        .and_then(Value::as_i64)
        .ok_or_else(|| InvocationError::bad_arguments(format!("argument {index} must be an integer")))
}
