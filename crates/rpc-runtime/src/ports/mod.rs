//! Ports - the seams the runtime plugs adapters into.

pub mod outbound;

pub use outbound::{Serializer, ServiceRegistrar};
