#[cfg(test)]
mod tests {
    use keel::{Connection, Executor, Parameter, Query, Value, stream::TryStreamExt};
    use keel_sqlite::SqliteConnection;
    use keel_tests::{init_logs, silent_logs};
    use std::{path::Path, sync::Mutex};
    use tokio::fs;
    use uuid::Uuid;

    static MUTEX: Mutex<()> = Mutex::new(());

    #[tokio::test]
    async fn create_database() {
        init_logs();
        const DB_PATH: &str = "../target/debug/creation.sqlite";
        let _guard = MUTEX.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(parent) = Path::new(DB_PATH).parent() {
            fs::create_dir_all(parent)
                .await
                .expect("Failed to create the target directory");
        }
        if Path::new(DB_PATH).exists() {
            fs::remove_file(DB_PATH)
                .await
                .unwrap_or_else(|e| panic!("Failed to remove {}: {}", DB_PATH, e));
        }
        let mut connection = SqliteConnection::connect(&format!("sqlite://{}?mode=rwc", DB_PATH))
            .await
            .expect("Could not create the database");
        assert!(
            Path::new(DB_PATH).exists(),
            "Database file should be created after connection"
        );
        connection
            .execute("CREATE TABLE t (v INTEGER);".into())
            .await
            .expect("Could not create a table");
        let affected = connection
            .execute("INSERT INTO t VALUES (1), (2);".into())
            .await
            .expect("Could not insert");
        assert_eq!(affected.rows_affected, 2);
        drop(connection);

        let mut connection = SqliteConnection::connect(&format!("sqlite://{}?mode=ro", DB_PATH))
            .await
            .expect("Could not open the database read only");
        let total = connection
            .scalar("SELECT SUM(v) FROM t;".into())
            .await
            .expect("Could not read");
        assert_eq!(total, Some(keel::Value::Int64(Some(3))));
        silent_logs! {
            assert!(
                connection
                    .execute("INSERT INTO t VALUES (3);".into())
                    .await
                    .is_err(),
                "A read only connection cannot write"
            );
        }
        drop(connection);

        fs::remove_file(DB_PATH)
            .await
            .unwrap_or_else(|e| panic!("Failed to remove {}: {}", DB_PATH, e));
        silent_logs! {
            assert!(
                SqliteConnection::connect(&format!("sqlite://{}?mode=ro", DB_PATH))
                    .await
                    .is_err(),
                "A missing database cannot be opened read only"
            );
        }
    }

    #[tokio::test]
    async fn wrong_url() {
        init_logs();
        silent_logs! {
            assert!(SqliteConnection::connect("duckdb://some_value").await.is_err());
        }
    }

    #[tokio::test]
    async fn transactions() {
        init_logs();
        let path = "../target/debug/transactions.sqlite";
        if let Some(parent) = Path::new(path).parent() {
            fs::create_dir_all(parent)
                .await
                .expect("Failed to create the target directory");
        }
        let _ = fs::remove_file(path).await;
        let mut connection = SqliteConnection::connect(&format!("sqlite://{}?busy_timeout=200", path))
            .await
            .expect("Could not open the database");
        connection
            .execute("CREATE TABLE t (v INTEGER);".into())
            .await
            .expect("Could not create a table");
        assert!(!connection.in_transaction());
        connection
            .begin(Default::default())
            .await
            .expect("Could not begin");
        assert!(connection.in_transaction());
        connection
            .execute("INSERT INTO t VALUES (1);".into())
            .await
            .expect("Could not insert");
        connection.rollback().await.expect("Could not roll back");
        assert!(!connection.in_transaction());
        let count = connection
            .scalar("SELECT COUNT(*) FROM t;".into())
            .await
            .expect("Could not count");
        assert_eq!(count, Some(keel::Value::Int64(Some(0))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn large_results_and_uuids() {
        init_logs();
        let mut connection = tokio::spawn(SqliteConnection::connect("sqlite://:memory:"))
            .await
            .expect("The connect task panicked")
            .expect("Could not open an in memory database");
        connection
            .execute("CREATE TABLE t (v INTEGER);".into())
            .await
            .expect("Could not create a table");
        let affected = connection
            .execute(
                "INSERT INTO t (v) WITH RECURSIVE n(i) AS (SELECT 1 UNION ALL SELECT i + 1 FROM n WHERE i < 600) SELECT i FROM n;"
                    .into(),
            )
            .await
            .expect("Could not insert");
        assert_eq!(affected.rows_affected, 600);
        let rows: Vec<_> = connection
            .fetch("SELECT v FROM t ORDER BY v;".into())
            .try_collect()
            .await
            .expect("Could not read the rows");
        assert_eq!(rows.len(), 600);
        assert_eq!(rows[0].values[0], Value::Int64(Some(1)));
        assert_eq!(rows[599].values[0], Value::Int64(Some(600)));

        let id = Uuid::from_u128(0x0B6AE4A2_7B0C_4F55_9A55_4D6C1D0A0F11);
        connection
            .execute("CREATE TABLE u (id TEXT);".into())
            .await
            .expect("Could not create a table");
        let mut insert = Query::from("INSERT INTO u VALUES (@p0);");
        insert.parameters.push(Parameter::input("p0", id));
        connection.execute(insert).await.expect("Could not insert a uuid");
        let stored = connection
            .scalar("SELECT id FROM u;".into())
            .await
            .expect("Could not read the uuid");
        assert_eq!(
            stored,
            Some(Value::Varchar(Some(
                "0b6ae4a2-7b0c-4f55-9a55-4d6c1d0a0f11".into()
            )))
        );
    }
}
