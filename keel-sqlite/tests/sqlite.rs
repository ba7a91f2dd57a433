#[cfg(test)]
mod tests {
    use keel::Database;
    use keel_sqlite::SqliteDriver;
    use keel_tests::{execute_tests, init_logs};
    use std::path::Path;
    use tokio::{fs, sync::Mutex};

    static MUTEX: Mutex<()> = Mutex::const_new(());

    #[tokio::test]
    async fn sqlite() {
        init_logs();
        const DB_PATH: &str = "../target/debug/tests.sqlite";
        let _guard = MUTEX.lock().await;
        if Path::new(DB_PATH).exists() {
            fs::remove_file(DB_PATH)
                .await
                .unwrap_or_else(|e| panic!("Failed to remove the test database {}: {}", DB_PATH, e));
        }
        if let Some(parent) = Path::new(DB_PATH).parent() {
            fs::create_dir_all(parent)
                .await
                .expect("Failed to create the target directory");
        }
        let db = Database::<SqliteDriver>::new(format!("sqlite://{}?mode=rwc", DB_PATH))
            .expect("Invalid database url");
        execute_tests(&db).await;
    }
}
