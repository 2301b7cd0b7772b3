#![doc = include_str!("../README.md")]

mod common;
pub use common::*;
// Public re-export so downstream crates can reach the identifier crate via
// `quartet_core::ferroid`
pub use ferroid;

/// Generated gRPC services and messages.
///
/// One submodule per protobuf package. Each contains the message types, a
/// `*_client` module with the generated client and a `*_server` module with
/// the service trait the server crate implements.
pub mod proto {
    /// Greeting service: one method per call shape.
    pub mod greet {
        tonic::include_proto!("greet");
    }

    /// Arithmetic service: sum, prime factors, average, maximum, square root.
    pub mod calculator {
        tonic::include_proto!("calculator");
    }

    /// Document CRUD service backed by the storage engine.
    pub mod blog {
        tonic::include_proto!("blog");
    }

    /// Encoded `FileDescriptorSet` covering all three packages, served by the
    /// reflection service.
    pub const FILE_DESCRIPTOR_SET: &[u8] =
        tonic::include_file_descriptor_set!("quartet_descriptor");
}
