//! # Procat Core
//!
//! `procat-core` is the engine behind the Procat catalog server. It turns
//! heterogeneous proto sources into a browsable, invocable service catalog
//! without compile-time knowledge of any Protobuf schema.
//!
//! ## Key Components
//!
//! * **[`loader::Loader`]:** Acquires a `FileDescriptorSet` from a local
//!   directory, a Git repository, a schema-registry module, or a live
//!   reflection-enabled endpoint.
//! * **[`registry::Registry`]:** Indexes descriptors by file, service, and
//!   message name and projects message schemas to a JSON-Schema-like shape.
//! * **[`invoker::Invoker`]:** Executes dynamic unary calls over the
//!   Connect or gRPC wire protocols, pooling HTTP/2 channels per endpoint.
//! * **[`session::SessionManager`]:** Owns one `Registry` + `Invoker` pair
//!   per client session and expires idle sessions in the background.
//!
//! ## JsonCodec
//!
//! An implementation of `tonic::codec::Codec` that transcodes JSON to
//! Protobuf bytes (and vice versa) on the fly, driven entirely by message
//! descriptors. This is what makes descriptor-based invocation possible
//! without generated client stubs.
//!
//! ## Re-exports
//!
//! This crate re-exports `prost`, `prost_types`, `prost_reflect`, and
//! `tonic` to ensure that consumers use compatible versions of these
//! underlying dependencies.
pub mod invoker;
pub mod loader;
pub mod registry;
pub mod session;

// Re-exports
pub use prost;
pub use prost_reflect;
pub use prost_types;
pub use tonic;
