use migration::MigratorTrait;
use sea_orm::{ConnectionTrait, Database, DatabaseConnection, DbBackend, Statement};
use tempfile::NamedTempFile;

/// Test database with automatic cleanup
pub struct TestDb {
    connection: DatabaseConnection,
    _temp_file: NamedTempFile,
}

impl TestDb {
    /// Create a new test database with migrations applied
    pub async fn new() -> Self {
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

    pub fn connection(&self) -> &DatabaseConnection {
        &self.connection
    }
}

/// Minimal usage record; unset fields are stored as NULL.
pub struct UsageRecord<'a> {
    pub record_id: &'a str,
    pub insert_date: &'a str,
    pub machine_name: &'a str,
    pub global_user_name: Option<&'a str>,
    pub vo_name: Option<&'a str>,
    pub cpu_duration: i64,
    pub wall_duration: i64,
}

pub async fn seed_usage_record(db: &DatabaseConnection, record: UsageRecord<'_>) {
    let stmt = Statement::from_sql_and_values(
        DbBackend::Sqlite,
        "INSERT INTO usagerecords (record_id, create_date, insert_date, machine_name, \
         global_user_name, local_user_id, vo_name, cpu_duration, wall_duration, processors) \
         VALUES (?, ?, ?, ?, ?, 'local1', ?, ?, ?, 1)",
        [
            record.record_id.into(),
            record.insert_date.into(),
            record.insert_date.into(),
            record.machine_name.into(),
            record.global_user_name.map(str::to_string).into(),
            record.vo_name.map(str::to_string).into(),
            record.cpu_duration.into(),
            record.wall_duration.into(),
        ],
    );
    db.execute(stmt).await.expect("Failed to insert usage record");
}

/// Sum of n_jobs over the aggregated rows of one machine.
pub async fn aggregated_jobs(db: &DatabaseConnection, machine_name: &str) -> i64 {
    let stmt = Statement::from_sql_and_values(
        DbBackend::Sqlite,
        "SELECT COALESCE(SUM(n_jobs), 0) AS jobs FROM uraggregated WHERE machine_name = ?",
        [machine_name.into()],
    );
    db.query_one(stmt)
        .await
        .expect("Failed to query aggregated rows")
        .expect("Aggregate query returned no row")
        .try_get::<i64>("", "jobs")
        .expect("Failed to read job count")
}
