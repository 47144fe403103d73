use async_trait::async_trait;
use chrono::NaiveDate;
use sea_orm::{
    ConnectionTrait, DatabaseConnection, DbBackend, Statement, TransactionTrait, Value,
};

use crate::aggregation::errors::AggregationError;
use crate::aggregation::{AggregationStore, PendingUpdateKey};

const NEXT_PENDING: &str = "SELECT insert_date, machine_name FROM uraggregated_update \
     ORDER BY insert_date, machine_name LIMIT 1";

const DELETE_AGGREGATED: &str =
    "DELETE FROM uraggregated WHERE insert_date = $1 AND machine_name = $2";

const DELETE_PENDING: &str =
    "DELETE FROM uraggregated_update WHERE insert_date = $1 AND machine_name = $2";

const MARK_PENDING: &str = "INSERT INTO uraggregated_update (insert_date, machine_name) \
     VALUES ($1, $2) ON CONFLICT DO NOTHING";

const COUNT_PENDING: &str = "SELECT COUNT(*) AS pending FROM uraggregated_update";

// Certificate-file issuers and FQAN-style VO names carry no usable VO
// information; records without a VO are attributed to machine:project.
const INSERT_AGGREGATED: &str = r#"
INSERT INTO uraggregated (
    execute_date, insert_date, machine_name, user_identity,
    vo_issuer, vo_name, vo_group, vo_role,
    n_jobs, cputime, walltime, generate_time
)
SELECT
    COALESCE(end_date, create_date),
    insert_date,
    machine_name,
    COALESCE(global_user_name, machine_name || ':' || local_user_id),
    CASE WHEN vo_issuer LIKE 'file:///%' THEN NULL ELSE vo_issuer END,
    CASE
        WHEN vo_name IS NULL THEN machine_name || ':' || project_name
        WHEN vo_name LIKE '/%' THEN NULL
        ELSE vo_name
    END,
    vo_group,
    vo_role,
    COUNT(*),
    SUM(COALESCE(cpu_duration, 0)) / 3600.0,
    SUM(COALESCE(wall_duration, 0) * COALESCE(processors, 1)) / 3600.0,
    CURRENT_TIMESTAMP
FROM usagerecords
WHERE insert_date = $1 AND machine_name = $2
GROUP BY 1, 2, 3, 4, 5, 6, 7, 8
"#;

/// Aggregation store backed by the SQL database (SQLite or PostgreSQL).
#[derive(Debug, Clone)]
pub struct SqlAggregationStore {
    db: DatabaseConnection,
}

impl SqlAggregationStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Mark `key` as needing recomputation. Called by the insertion path
    /// inside its own transaction; marking twice is harmless.
    pub async fn mark_pending<C: ConnectionTrait>(
        conn: &C,
        key: &PendingUpdateKey,
    ) -> Result<(), AggregationError> {
        conn.execute(statement(conn.get_database_backend(), MARK_PENDING, key_values(key)))
            .await?;
        Ok(())
    }

    pub async fn pending_count(&self) -> Result<i64, AggregationError> {
        let backend = self.db.get_database_backend();
        let row = self
            .db
            .query_one(Statement::from_string(backend, COUNT_PENDING))
            .await?
            .ok_or_else(|| AggregationError::InvalidRow("COUNT returned no row".into()))?;
        Ok(row.try_get::<i64>("", "pending")?)
    }
}

/// Oldest pending key, if any.
pub async fn next_pending<C: ConnectionTrait>(
    conn: &C,
) -> Result<Option<PendingUpdateKey>, AggregationError> {
    let backend = conn.get_database_backend();
    let Some(row) = conn.query_one(Statement::from_string(backend, NEXT_PENDING)).await? else {
        return Ok(None);
    };

    let insert_date: NaiveDate = row
        .try_get("", "insert_date")
        .map_err(|e| AggregationError::InvalidRow(format!("insert_date: {e}")))?;
    let machine_name: String = row
        .try_get("", "machine_name")
        .map_err(|e| AggregationError::InvalidRow(format!("machine_name: {e}")))?;

    Ok(Some(PendingUpdateKey {
        insert_date,
        machine_name,
    }))
}

/// Replace the aggregated rows for `key` and clear its pending mark.
/// Must run inside a transaction.
pub async fn apply_update<C: ConnectionTrait>(
    conn: &C,
    key: &PendingUpdateKey,
) -> Result<(), AggregationError> {
    let backend = conn.get_database_backend();
    for sql in [DELETE_AGGREGATED, INSERT_AGGREGATED, DELETE_PENDING] {
        conn.execute(statement(backend, sql, key_values(key))).await?;
    }
    Ok(())
}

#[async_trait]
impl AggregationStore for SqlAggregationStore {
    async fn update_next(&self) -> Result<Option<PendingUpdateKey>, AggregationError> {
        // dropping the transaction without commit rolls it back
        let txn = self.db.begin().await?;
        let Some(key) = next_pending(&txn).await? else {
            txn.commit().await?;
            return Ok(None);
        };
        apply_update(&txn, &key).await?;
        txn.commit().await?;
        Ok(Some(key))
    }
}

fn key_values(key: &PendingUpdateKey) -> Vec<Value> {
    vec![key.insert_date.into(), key.machine_name.clone().into()]
}

/// Build a statement from SQL written with `$n` placeholders, rewriting them
/// to `?` for backends without numbered parameters. Each placeholder must
/// appear once, in order.
fn statement(backend: DbBackend, sql: &str, values: Vec<Value>) -> Statement {
    let sql = match backend {
        DbBackend::Postgres => sql.to_string(),
        _ => positional_placeholders(sql),
    };
    Statement::from_sql_and_values(backend, sql, values)
}

fn positional_placeholders(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut chars = sql.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '$' && chars.peek().is_some_and(|n| n.is_ascii_digit()) {
            while chars.peek().is_some_and(|n| n.is_ascii_digit()) {
                chars.next();
            }
            out.push('?');
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use migration::MigratorTrait;
    use sea_orm::Database;
    use tempfile::NamedTempFile;

    struct TestDb {
        connection: DatabaseConnection,
        _temp_file: NamedTempFile,
    }

    impl TestDb {
        async fn new() -> Self {
            let temp_file = NamedTempFile::new().expect("Failed to create temp file");
            let db_path = temp_file.path().to_str().expect("Invalid temp file path");
            let db_url = format!("sqlite://{}?mode=rwc", db_path);

            let connection = Database::connect(&db_url)
                .await
                .expect("Failed to connect to test database");

            migration::Migrator::up(&connection, None)
                .await
                .expect("Failed to run migrations");

            Self {
                connection,
                _temp_file: temp_file,
            }
        }

        fn connection(&self) -> &DatabaseConnection {
            &self.connection
        }
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, d).unwrap()
    }

    #[allow(clippy::too_many_arguments)]
    async fn insert_record(
        db: &DatabaseConnection,
        record_id: &str,
        insert_date: &str,
        machine: &str,
        user: Option<&str>,
        vo_name: Option<&str>,
        cpu: i64,
        wall: i64,
        processors: i64,
    ) {
        let quote = |v: Option<&str>| v.map(|s| format!("'{s}'")).unwrap_or_else(|| "NULL".into());
        let sql = format!(
            "INSERT INTO usagerecords (record_id, create_date, insert_date, end_date, machine_name, \
             global_user_name, local_user_id, project_name, vo_name, cpu_duration, wall_duration, processors) \
             VALUES ('{record_id}', '{insert_date}', '{insert_date}', '{insert_date}', '{machine}', \
             {}, 'local1', 'proj', {}, {cpu}, {wall}, {processors})",
            quote(user),
            quote(vo_name),
        );
        db.execute_unprepared(&sql).await.expect("insert record");
    }

    async fn aggregated(db: &DatabaseConnection, machine: &str) -> Vec<(String, i64, f64, f64)> {
        let sql = format!(
            "SELECT user_identity, n_jobs, cputime, walltime FROM uraggregated \
             WHERE machine_name = '{machine}' ORDER BY user_identity"
        );
        db.query_all(Statement::from_string(DbBackend::Sqlite, sql))
            .await
            .expect("query aggregated")
            .into_iter()
            .map(|row| {
                (
                    row.try_get::<String>("", "user_identity").unwrap(),
                    row.try_get::<i64>("", "n_jobs").unwrap(),
                    row.try_get::<f64>("", "cputime").unwrap(),
                    row.try_get::<f64>("", "walltime").unwrap(),
                )
            })
            .collect()
    }

    #[test]
    fn test_positional_placeholders() {
        assert_eq!(
            positional_placeholders("a = $1 AND b = $2 AND c = '$x'"),
            "a = ? AND b = ? AND c = '$x'"
        );
        assert_eq!(positional_placeholders("$10, $2"), "?, ?");
    }

    #[tokio::test]
    async fn test_update_next_with_nothing_pending() {
        let test_db = TestDb::new().await;
        let store = SqlAggregationStore::new(test_db.connection().clone());

        assert!(store.update_next().await.unwrap().is_none());
        assert_eq!(store.pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_mark_pending_is_idempotent() {
        let test_db = TestDb::new().await;
        let db = test_db.connection();
        let store = SqlAggregationStore::new(db.clone());
        let key = PendingUpdateKey::new(day(1), "host1");

        SqlAggregationStore::mark_pending(db, &key).await.unwrap();
        SqlAggregationStore::mark_pending(db, &key).await.unwrap();
        assert_eq!(store.pending_count().await.unwrap(), 1);
        assert_eq!(next_pending(db).await.unwrap(), Some(key));
    }

    #[tokio::test]
    async fn test_update_next_aggregates_in_key_order() {
        let test_db = TestDb::new().await;
        let db = test_db.connection();
        let store = SqlAggregationStore::new(db.clone());

        insert_record(db, "r1", "2025-03-01", "host1", Some("/CN=Alice"), Some("vo1"), 3600, 1800, 4).await;
        insert_record(db, "r2", "2025-03-01", "host1", Some("/CN=Alice"), Some("vo1"), 7200, 3600, 1).await;
        insert_record(db, "r3", "2025-03-01", "host1", None, None, 1800, 1800, 2).await;
        insert_record(db, "r4", "2025-03-01", "host2", Some("/CN=Bob"), Some("vo1"), 360, 360, 1).await;

        SqlAggregationStore::mark_pending(db, &PendingUpdateKey::new(day(1), "host2")).await.unwrap();
        SqlAggregationStore::mark_pending(db, &PendingUpdateKey::new(day(1), "host1")).await.unwrap();

        let first = store.update_next().await.unwrap().unwrap();
        assert_eq!(first, PendingUpdateKey::new(day(1), "host1"));
        let rows = aggregated(db, "host1").await;
        assert_eq!(
            rows,
            vec![
                ("/CN=Alice".to_string(), 2, 3.0, 3.0),
                ("host1:local1".to_string(), 1, 0.5, 1.0),
            ]
        );
        // host2 not recomputed yet
        assert!(aggregated(db, "host2").await.is_empty());

        let second = store.update_next().await.unwrap().unwrap();
        assert_eq!(second, PendingUpdateKey::new(day(1), "host2"));
        assert_eq!(aggregated(db, "host2").await, vec![("/CN=Bob".to_string(), 1, 0.1, 0.1)]);

        assert!(store.update_next().await.unwrap().is_none());
        assert_eq!(store.pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_recompute_replaces_previous_rows() {
        let test_db = TestDb::new().await;
        let db = test_db.connection();
        let store = SqlAggregationStore::new(db.clone());
        let key = PendingUpdateKey::new(day(2), "host1");

        insert_record(db, "r1", "2025-03-02", "host1", Some("/CN=Alice"), None, 3600, 3600, 1).await;
        SqlAggregationStore::mark_pending(db, &key).await.unwrap();
        store.update_next().await.unwrap();

        insert_record(db, "r2", "2025-03-02", "host1", Some("/CN=Alice"), None, 3600, 3600, 1).await;
        SqlAggregationStore::mark_pending(db, &key).await.unwrap();
        store.update_next().await.unwrap();

        assert_eq!(aggregated(db, "host1").await, vec![("/CN=Alice".to_string(), 2, 2.0, 2.0)]);
    }

    #[tokio::test]
    async fn test_failed_update_rolls_back() {
        let test_db = TestDb::new().await;
        let db = test_db.connection();
        let store = SqlAggregationStore::new(db.clone());
        let key = PendingUpdateKey::new(day(3), "host1");

        insert_record(db, "r1", "2025-03-03", "host1", Some("/CN=Alice"), None, 3600, 3600, 1).await;
        SqlAggregationStore::mark_pending(db, &key).await.unwrap();
        store.update_next().await.unwrap();
        SqlAggregationStore::mark_pending(db, &key).await.unwrap();

        db.execute_unprepared("DROP TABLE usagerecords").await.unwrap();
        let err = store.update_next().await.unwrap_err();
        assert!(matches!(err, AggregationError::Db(_)));

        // the delete of the old aggregated rows was rolled back with the rest
        assert_eq!(aggregated(db, "host1").await.len(), 1);
        assert_eq!(store.pending_count().await.unwrap(), 1);
    }
}
