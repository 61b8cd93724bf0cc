//! Interceptor chain around the real method call.
//!
//! The chain is linear: each interceptor receives the [`Invocation`] and a
//! [`Next`] continuation. Calling [`Next::proceed`] runs the rest of the
//! chain and finally the method; returning without proceeding short-circuits
//! and the interceptor's value becomes the result.

use crate::domain::services::MethodDef;
use shared_types::{FailureKind, Request, RequestId, TypeDescriptor, Value, WireFailure};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Failure raised by a service method or by the dispatch layer around it.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InvocationError {
    /// The service method itself failed
    #[error("{0}")]
    Service(String),

    /// Arguments did not match the declared parameters
    #[error("bad arguments: {0}")]
    BadArguments(String),

    /// Dispatch-layer failure, optionally wrapping the original cause
    #[error("{message}")]
    Dispatch {
        message: String,
        cause: Option<Box<InvocationError>>,
    },
}

impl InvocationError {
    pub fn service(message: impl Into<String>) -> Self {
        InvocationError::Service(message.into())
    }

    pub fn bad_arguments(message: impl Into<String>) -> Self {
        InvocationError::BadArguments(message.into())
    }

    /// Wrap `cause` in a dispatch-layer error.
    pub fn wrap(message: impl Into<String>, cause: InvocationError) -> Self {
        InvocationError::Dispatch {
            message: message.into(),
            cause: Some(Box::new(cause)),
        }
    }

    /// Innermost error, with every dispatch wrapper removed.
    pub fn root_cause(&self) -> &InvocationError {
        let mut current = self;
        while let InvocationError::Dispatch {
            cause: Some(inner), ..
        } = current
        {
            current = inner;
        }
        current
    }

    /// Wire form of the root cause.
    pub fn to_wire(&self) -> WireFailure {
        let root = self.root_cause();
        let kind = match root {
            InvocationError::Service(_) => FailureKind::Invocation,
            InvocationError::BadArguments(_) => FailureKind::Deserialization,
            InvocationError::Dispatch { .. } => FailureKind::Internal,
        };
        WireFailure::new(kind, root.to_string())
    }
}

/// Result of running a method, with or without interceptors.
pub type InvokeResult = Result<Value, InvocationError>;

/// One resolved call travelling through the chain.
pub struct Invocation {
    request: Arc<Request>,
    method: Arc<MethodDef>,
    params: Vec<Value>,
    interceptors: Arc<[String]>,
    attributes: BTreeMap<String, Value>,
}

impl Invocation {
    pub fn new(request: Arc<Request>, method: Arc<MethodDef>, params: Vec<Value>) -> Self {
        Self {
            request,
            method,
            params,
            interceptors: Arc::from(Vec::new()),
            attributes: BTreeMap::new(),
        }
    }

    /// The request as it arrived, before argument binding.
    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn request_id(&self) -> &RequestId {
        self.request.id()
    }

    pub fn service(&self) -> &str {
        self.request.service()
    }

    pub fn method(&self) -> &MethodDef {
        &self.method
    }

    /// Names of the interceptors around this call, in execution order.
    /// Empty when the method runs without a chain.
    pub fn interceptors(&self) -> &[String] {
        &self.interceptors
    }

    pub fn return_type(&self) -> &TypeDescriptor {
        self.method.return_type()
    }

    pub fn params(&self) -> &[Value] {
        &self.params
    }

    /// Interceptors may rewrite arguments before proceeding.
    pub fn params_mut(&mut self) -> &mut Vec<Value> {
        &mut self.params
    }

    /// Scratch space shared by the interceptors of one call.
    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: Value) {
        self.attributes.insert(key.into(), value);
    }

    /// Run the method itself.
    pub fn invoke(&self) -> InvokeResult {
        self.method.invoke(&self.params)
    }
}

impl fmt::Debug for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invocation")
            .field("request_id", self.request.id())
            .field("service", &self.request.service())
            .field("method", &self.method.name())
            .field("params", &self.params.len())
            .finish()
    }
}

/// Middleware around service methods.
pub trait Interceptor: Send + Sync {
    fn name(&self) -> &str;

    /// Higher runs first.
    fn priority(&self) -> i32 {
        0
    }

    fn intercept(&self, invocation: &mut Invocation, next: Next<'_>) -> InvokeResult;
}

/// Terminal step of the chain.
pub type Terminal<'a> = &'a (dyn Fn(&mut Invocation) -> InvokeResult + Sync);

/// The rest of the chain after the current interceptor.
pub struct Next<'a> {
    remaining: &'a [ChainEntry],
    terminal: Terminal<'a>,
}

impl<'a> Next<'a> {
    /// Run the downstream interceptors and then the method.
    pub fn proceed(self, invocation: &mut Invocation) -> InvokeResult {
        match self.remaining.split_first() {
            Some((entry, rest)) => entry.interceptor.intercept(
                invocation,
                Next {
                    remaining: rest,
                    terminal: self.terminal,
                },
            ),
            None => (self.terminal)(invocation),
        }
    }
}

struct ChainEntry {
    name: String,
    interceptor: Arc<dyn Interceptor>,
}

/// Ordered, immutable interceptor sequence shared by every request.
pub struct InterceptorChain {
    entries: Vec<ChainEntry>,
    interceptor_names: Arc<[String]>,
}

impl Default for InterceptorChain {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl InterceptorChain {
    /// Order by descending priority. Ties keep the configured order.
    pub fn new(interceptors: Vec<Arc<dyn Interceptor>>) -> Self {
        let mut interceptors = interceptors;
        interceptors.sort_by_key(|i| std::cmp::Reverse(i.priority()));

        let entries: Vec<ChainEntry> = interceptors
            .into_iter()
            .enumerate()
            .map(|(position, interceptor)| ChainEntry {
                name: format!("interceptor:{position}"),
                interceptor,
            })
            .collect();

        for entry in &entries {
            debug!(
                entry = %entry.name,
                interceptor = entry.interceptor.name(),
                priority = entry.interceptor.priority(),
                "Configured interceptor"
            );
        }

        let interceptor_names = entries
            .iter()
            .map(|e| e.interceptor.name().to_string())
            .collect();

        Self {
            entries,
            interceptor_names,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `(entry name, interceptor name)` in execution order.
    pub fn names(&self) -> Vec<(String, String)> {
        self.entries
            .iter()
            .map(|e| (e.name.clone(), e.interceptor.name().to_string()))
            .collect()
    }

    pub fn run(&self, invocation: &mut Invocation, terminal: Terminal<'_>) -> InvokeResult {
        invocation.interceptors = Arc::clone(&self.interceptor_names);
        Next {
            remaining: &self.entries,
            terminal,
        }
        .proceed(invocation)
    }
}

impl fmt::Debug for InterceptorChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|e| e.interceptor.name()))
            .finish()
    }
}
