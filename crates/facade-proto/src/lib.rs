//! facade-proto — generated gRPC bindings for the facade wire protocol.

/// Protocol version `facade.v1`.
pub mod v1 {
    tonic::include_proto!("facade.v1");
}
