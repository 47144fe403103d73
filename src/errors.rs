use miette::Diagnostic;
use thiserror::Error;

use crate::aggregation::errors::AggregationError;
use crate::authz::errors::AuthzError;

#[derive(Debug, Error, Diagnostic)]
pub enum SgasError {
    #[error("I/O error: {0}")]
    #[diagnostic(code(sgas::io))]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    #[diagnostic(code(sgas::config))]
    Config(#[from] config::ConfigError),

    #[error("Database error: {0}")]
    #[diagnostic(code(sgas::db))]
    Db(#[from] sea_orm::DbErr),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Authz(#[from] AuthzError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Aggregation(#[from] AggregationError),
}
