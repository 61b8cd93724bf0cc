//! Service registration table.
//!
//! Built once before the server binds and shared read-only afterwards, so
//! lookups take no locks. Methods are resolved by service name, method name
//! and the canonical parameter-type signature.

use crate::domain::chain::{InvocationError, InvokeResult};
use crate::domain::error::{RpcError, RpcResult};
use shared_types::{TypeDescriptor, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Method body. Receives arguments already coerced to the declared types.
pub type Handler = Arc<dyn Fn(&[Value]) -> InvokeResult + Send + Sync>;

/// One callable method with its declared signature.
pub struct MethodDef {
    name: String,
    param_types: Vec<TypeDescriptor>,
    return_type: TypeDescriptor,
    handler: Handler,
}

impl MethodDef {
    pub fn new<F>(
        name: impl Into<String>,
        param_types: Vec<TypeDescriptor>,
        return_type: TypeDescriptor,
        handler: F,
    ) -> Self
    where
        F: Fn(&[Value]) -> InvokeResult + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            param_types,
            return_type,
            handler: Arc::new(handler),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn param_types(&self) -> &[TypeDescriptor] {
        &self.param_types
    }

    pub fn return_type(&self) -> &TypeDescriptor {
        &self.return_type
    }

    /// `name(t1, t2)`
    pub fn signature(&self) -> String {
        format!("{}({})", self.name, join_types(&self.param_types))
    }

    /// Coerce each argument into its declared type.
    pub fn bind_arguments(&self, params: Vec<Value>) -> Result<Vec<Value>, InvocationError> {
        if params.len() != self.param_types.len() {
            return Err(InvocationError::bad_arguments(format!(
                "{} expects {} argument(s), got {}",
                self.signature(),
                self.param_types.len(),
                params.len()
            )));
        }
        self.param_types
            .iter()
            .zip(params)
            .enumerate()
            .map(|(i, (descriptor, value))| {
                descriptor
                    .coerce(value)
                    .map_err(|e| InvocationError::bad_arguments(format!("argument {i}: {e}")))
            })
            .collect()
    }

    pub fn invoke(&self, params: &[Value]) -> InvokeResult {
        (self.handler)(params)
    }
}

impl fmt::Debug for MethodDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodDef")
            .field("signature", &self.signature())
            .field("return_type", &self.return_type)
            .finish()
    }
}

/// A named service and its methods. Overloads share a name and differ by
/// parameter types.
#[derive(Debug)]
pub struct ServiceDef {
    name: String,
    methods: HashMap<String, Vec<Arc<MethodDef>>>,
}

impl ServiceDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: HashMap::new(),
        }
    }

    pub fn method(mut self, def: MethodDef) -> Self {
        self.methods
            .entry(def.name.clone())
            .or_default()
            .push(Arc::new(def));
        self
    }

    /// Shorthand for [`method`](Self::method) with an inline handler.
    pub fn handler<F>(
        self,
        name: impl Into<String>,
        param_types: Vec<TypeDescriptor>,
        return_type: TypeDescriptor,
        handler: F,
    ) -> Self
    where
        F: Fn(&[Value]) -> InvokeResult + Send + Sync + 'static,
    {
        self.method(MethodDef::new(name, param_types, return_type, handler))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn find(&self, method: &str, param_types: &[TypeDescriptor]) -> Option<&Arc<MethodDef>> {
        self.methods
            .get(method)?
            .iter()
            .find(|def| def.param_types == param_types)
    }

    pub fn method_count(&self) -> usize {
        self.methods.values().map(Vec::len).sum()
    }

    fn check_overloads(&self) -> RpcResult<()> {
        for overloads in self.methods.values() {
            for (i, def) in overloads.iter().enumerate() {
                if overloads[..i].iter().any(|o| o.param_types == def.param_types) {
                    return Err(RpcError::AlreadyRegistered(format!(
                        "{}.{}",
                        self.name,
                        def.signature()
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Immutable service name → definition table.
#[derive(Debug, Default)]
pub struct ServiceTable {
    services: HashMap<String, Arc<ServiceDef>>,
}

impl ServiceTable {
    /// Build the table, rejecting duplicate services and duplicate method
    /// signatures.
    pub fn new(defs: impl IntoIterator<Item = ServiceDef>) -> RpcResult<Self> {
        let mut services = HashMap::new();
        for def in defs {
            def.check_overloads()?;
            if services.contains_key(&def.name) {
                return Err(RpcError::AlreadyRegistered(format!("service {}", def.name)));
            }
            services.insert(def.name.clone(), Arc::new(def));
        }
        Ok(Self { services })
    }

    /// Resolve a method by exact canonical signature.
    pub fn resolve(
        &self,
        service: &str,
        method: &str,
        param_types: &[TypeDescriptor],
    ) -> RpcResult<Arc<MethodDef>> {
        let def = self
            .services
            .get(service)
            .ok_or_else(|| RpcError::ServiceNotFound(service.to_string()))?;
        def.find(method, param_types).cloned().ok_or_else(|| {
            RpcError::MethodNotFound(format!("{service}.{method}({})", join_types(param_types)))
        })
    }

    pub fn contains(&self, service: &str) -> bool {
        self.services.contains_key(service)
    }

    /// Published service names, sorted.
    pub fn service_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.services.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

fn join_types(types: &[TypeDescriptor]) -> String {
    types
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
