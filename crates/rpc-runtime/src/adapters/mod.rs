//! Adapters for the RPC runtime.
//!
//! Concrete serializers and service registrars behind the outbound ports.

pub mod registrar;
pub mod serialize;

pub use registrar::{registrar_for, InMemoryRegistrar, NoopRegistrar};
pub use serialize::{serializer_for, BincodeSerializer, JsonSerializer};
