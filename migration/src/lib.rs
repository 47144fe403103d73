pub use sea_orm_migration::prelude::*;

mod m20250301_000001_usage_records;
mod m20250301_000002_host_scale_factors;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250301_000001_usage_records::Migration),
            Box::new(m20250301_000002_host_scale_factors::Migration),
        ]
    }
}
