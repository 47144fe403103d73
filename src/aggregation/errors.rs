use std::time::Duration;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum AggregationError {
    #[error("Database error: {0}")]
    #[diagnostic(code(sgas::aggregation::db))]
    Db(#[from] sea_orm::DbErr),

    #[error("Invalid pending update row: {0}")]
    #[diagnostic(
        code(sgas::aggregation::invalid_row),
        help("uraggregated_update rows need a non-null insert_date and machine_name")
    )]
    InvalidRow(String),

    #[error("Aggregation update failed: {0}")]
    #[diagnostic(code(sgas::aggregation::pass_failed))]
    PassFailed(String),

    #[error("Aggregation update task failed: {0}")]
    #[diagnostic(code(sgas::aggregation::task_failed))]
    TaskFailed(String),

    #[error("Aggregation update scheduler is not running")]
    #[diagnostic(code(sgas::aggregation::stopped))]
    SchedulerStopped,

    #[error("Timed out after {0:?} waiting for the running aggregation update")]
    #[diagnostic(
        code(sgas::aggregation::shutdown_timeout),
        help("The update keeps running in the background; pending work is picked up again on next start")
    )]
    ShutdownTimeout(Duration),
}
