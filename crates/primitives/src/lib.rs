//! `primitives` crate: the Primitive Adapter.
//!
//! A primitive is a named, versioned unit of automation logic with a declared
//! input schema.  Definitions live in the database; the code that runs them is
//! a [`PrimitiveHandler`] compiled into the binary and looked up in a
//! [`HandlerRegistry`] by name and version.  [`PrimitiveAdapter`] ties the two
//! together: cached lookup, schema validation, timeout-bounded invocation and
//! audit logging.

pub mod adapter;
pub mod builtin;
pub mod context;
pub mod error;
pub mod mock;
pub mod registry;
pub mod schema;
pub mod traits;

pub use adapter::{AdapterConfig, CallContext, Primitive, PrimitiveAdapter, PrimitiveRef};
pub use context::{EnvView, FetchRequest, FetchResponse, HandlerContext, PrimitiveInfo};
pub use error::{HandlerError, PrimitiveError};
pub use registry::HandlerRegistry;
pub use schema::{validate_primitive_input, FieldError, FieldSchema, FieldType, InputSchema, ValidationErrors};
pub use traits::PrimitiveHandler;
