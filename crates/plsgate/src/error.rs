//! Request-level error taxonomy.

use crate::db::DbError;
use crate::pool::PoolError;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("failed to open database session: {0}")]
    Connection(#[source] DbError),
    #[error("no free database session (pool at capacity of {max})")]
    PoolExhausted { max: usize },
    #[error("session pool is shut down")]
    PoolClosed,
    #[error("Not Authorized: {procedure}")]
    Authorization { procedure: String },
    #[error("{0}")]
    CatalogResolution(String),
    #[error("PLSQL Adapter - PLSQL Error\n{0}")]
    Execution(String),
    #[error("database error: {0}")]
    Database(#[from] DbError),
    #[error("failed to spool generated output: {0}")]
    SpoolIo(#[from] std::io::Error),
    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    pub(crate) fn no_matching_overload(procedure: &str, parameter: &str) -> Self {
        GatewayError::CatalogResolution(format!(
            "{procedure}: MANY PROCEDURES MATCH NAME, BUT NONE MATCHES SIGNATURE (parameter name '{parameter}')"
        ))
    }

    pub(crate) fn invalid_name(name: &str) -> Self {
        GatewayError::CatalogResolution(format!("invalid procedure name '{name}'"))
    }
}

impl From<PoolError> for GatewayError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::Connection(e) => GatewayError::Connection(e),
            PoolError::Exhausted { max } => GatewayError::PoolExhausted { max },
            PoolError::Closed => GatewayError::PoolClosed,
            PoolError::NoRuntime => GatewayError::Internal(err.to_string()),
        }
    }
}
