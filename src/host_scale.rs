//! Host scale factors from configuration, mirrored into the database so that
//! reporting queries can normalise CPU time across machines.

use std::collections::HashMap;

use sea_orm::{DatabaseConnection, EntityTrait, QueryOrder, Set, TransactionTrait};
use tracing::{info, warn};

use crate::entities::host_scale_factor;
use crate::errors::SgasError;

/// Replace the stored scale factors with `factors` in one transaction.
pub async fn replace_scale_factors(
    db: &DatabaseConnection,
    factors: &HashMap<String, f64>,
) -> Result<usize, SgasError> {
    let txn = db.begin().await?;

    host_scale_factor::Entity::delete_many().exec(&txn).await?;

    if !factors.is_empty() {
        let models = factors.iter().map(|(machine_name, factor)| host_scale_factor::ActiveModel {
            machine_name: Set(machine_name.clone()),
            factor: Set(*factor),
        });
        host_scale_factor::Entity::insert_many(models).exec(&txn).await?;
    }

    txn.commit().await?;
    Ok(factors.len())
}

/// Startup variant: failures are logged and do not stop the service.
pub async fn sync_scale_factors(db: &DatabaseConnection, factors: &HashMap<String, f64>) {
    match replace_scale_factors(db, factors).await {
        Ok(count) => info!(count, "Updated host scale factors"),
        Err(e) => warn!(error = %e, "Failed to update host scale factors"),
    }
}

pub async fn list_scale_factors(
    db: &DatabaseConnection,
) -> Result<Vec<host_scale_factor::Model>, SgasError> {
    Ok(host_scale_factor::Entity::find()
        .order_by_asc(host_scale_factor::Column::MachineName)
        .all(db)
        .await?)
}
