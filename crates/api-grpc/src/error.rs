//! Error module

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GrpcError {
    #[error("Invalid server configuration: {0}")]
    Config(String),

    #[error("Failed to bind listener: {0}")]
    Bind(#[from] std::io::Error),

    #[error("Transport error: {0}")]
    Transport(#[from] tonic::transport::Error),
}

pub type GrpcResult<T> = Result<T, GrpcError>;
