pub mod db;

pub use db::{aggregated_jobs, seed_usage_record, TestDb, UsageRecord};
