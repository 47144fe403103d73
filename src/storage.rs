use migration::MigratorTrait;
use sea_orm::{ConnectionTrait, Database, DatabaseConnection};

use crate::errors::SgasError;
use crate::settings::Database as DbCfg;

pub async fn init(cfg: &DbCfg) -> Result<DatabaseConnection, SgasError> {
    let db = Database::connect(&cfg.url).await?;
    migration::Migrator::up(&db, None).await?;
    tracing::info!(backend = ?db.get_database_backend(), "Database ready");
    Ok(db)
}
