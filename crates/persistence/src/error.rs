//! Persistence error taxonomy

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("schema error: {0}")]
    SchemaError(String),

    #[error("query error: {0}")]
    Query(String),

    #[error("row decode error: {0}")]
    Decode(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<scylla::transport::errors::NewSessionError> for PersistenceError {
    fn from(err: scylla::transport::errors::NewSessionError) -> Self {
        PersistenceError::Connection(err.to_string())
    }
}

impl From<scylla::transport::errors::QueryError> for PersistenceError {
    fn from(err: scylla::transport::errors::QueryError) -> Self {
        PersistenceError::Query(err.to_string())
    }
}

impl From<scylla::cql_to_rust::FromRowError> for PersistenceError {
    fn from(err: scylla::cql_to_rust::FromRowError) -> Self {
        PersistenceError::Decode(err.to_string())
    }
}
