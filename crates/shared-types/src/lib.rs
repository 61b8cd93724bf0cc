//! # Shared Types Crate
//!
//! The wire model exchanged between RPC clients and servers.
//!
//! ## Design Principles
//!
//! - **Transport Agnostic**: Nothing here knows about framing. Every transport
//!   carries the same logical [`Request`] and [`Response`] fields.
//! - **Immutable Requests**: A [`Request`] is built once by the calling stub and
//!   never mutated in transit.
//! - **Declared Types Travel With Values**: Each parameter and each result is
//!   paired with a [`TypeDescriptor`], so a receiver that decoded a value
//!   generically (e.g. from JSON) can re-coerce it into the declared type.

pub mod correlation;
pub mod descriptor;
pub mod message;
pub mod value;

pub use correlation::RequestId;
pub use descriptor::{CoercionError, TypeDescriptor};
pub use message::{FailureKind, Request, RequestBuilder, Response, WireFailure};
pub use value::Value;
