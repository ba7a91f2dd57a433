#[cfg(test)]
mod tests {
    use keel::{
        AmbientStatus, Connection, Database, ScopeMode, ScopeOptions, TransactionError,
        TransactionScope,
    };
    use keel_tests::{MockConnection, MockDriver, init_logs, journal, silent_logs};
    use std::{collections::HashSet, sync::Arc};

    fn transaction_error(error: &keel::Error) -> Option<&TransactionError> {
        error.downcast_ref::<TransactionError>()
    }

    #[tokio::test]
    async fn joined_scope_rolls_back_the_ambient() {
        init_logs();
        let a = TransactionScope::new(ScopeMode::Join);
        assert!(a.is_root());
        a.enter(async {
            let b = TransactionScope::new(ScopeMode::Join);
            assert!(!b.is_root());
            assert_eq!(b.ambient(), a.ambient());
            assert_eq!(a.ambient().ref_count(), 2);
            b.dispose().await.expect("Dispose of the joined scope");
            assert!(b.is_disposed());
            assert_eq!(a.ambient().ref_count(), 0);
            assert_eq!(a.ambient().status(), AmbientStatus::RolledBack);
        })
        .await;
        silent_logs! {
            let error = a.complete().await.expect_err("The ambient was rolled back");
            assert!(matches!(
                transaction_error(&error),
                Some(TransactionError::RolledBack)
            ));
        }
        a.dispose().await.expect("Dispose of the root scope");
    }

    #[tokio::test]
    async fn new_scope_chains_to_the_current_one() {
        init_logs();
        let a = TransactionScope::new(ScopeMode::StartNew);
        assert!(TransactionScope::current().is_none());
        a.enter(async {
            assert_eq!(TransactionScope::current().as_ref(), Some(&a));
            let c = TransactionScope::new(ScopeMode::StartNew);
            assert!(c.is_root());
            assert_ne!(c.ambient(), a.ambient());
            assert_eq!(c.ambient().previous(), Some(a.ambient()));
            c.enter(async {
                assert_eq!(TransactionScope::current().as_ref(), Some(&c));
            })
            .await;
            c.complete().await.expect("Complete of the new scope");
            c.dispose().await.expect("Dispose of the new scope");
            assert_eq!(c.ambient().status(), AmbientStatus::Committed);
            assert_eq!(TransactionScope::current().as_ref(), Some(&a));
            assert_eq!(a.ambient().status(), AmbientStatus::Active);
            assert_eq!(a.ambient().ref_count(), 1);
        })
        .await;
        a.dispose().await.expect("Dispose of the outer scope");
        assert!(TransactionScope::current().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_flows_are_isolated() {
        init_logs();
        let a = TransactionScope::new(ScopeMode::Join);
        let ids = a
            .enter(async {
                let flows: Vec<_> = (0..8)
                    .map(|_| {
                        keel::spawn(async {
                            let parent = TransactionScope::current().expect("The parent scope");
                            let c = TransactionScope::new(ScopeMode::StartNew);
                            assert_eq!(
                                c.ambient().previous().map(|p| p.id()),
                                Some(parent.ambient().id())
                            );
                            c.enter(async {
                                tokio::task::yield_now().await;
                                assert_eq!(TransactionScope::current(), Some(c.clone()));
                            })
                            .await;
                            assert_eq!(TransactionScope::current(), Some(parent));
                            c.complete().await.expect("Complete");
                            c.dispose().await.expect("Dispose");
                            c.ambient().id()
                        })
                    })
                    .collect();
                let detached = tokio::spawn(async { TransactionScope::current().is_none() })
                    .await
                    .expect("The detached task panicked");
                assert!(detached);
                let mut ids = HashSet::new();
                for flow in flows {
                    ids.insert(flow.await.expect("A flow panicked"));
                }
                assert_eq!(TransactionScope::current(), Some(a.clone()));
                ids
            })
            .await;
        assert_eq!(ids.len(), 8);
        assert!(!ids.contains(&a.ambient().id()));
        assert_eq!(a.ambient().ref_count(), 1);
        a.dispose().await.expect("Dispose");
        assert_eq!(TransactionScope::current(), None);
    }

    #[tokio::test]
    async fn complete_and_dispose_are_idempotent() {
        init_logs();
        let scope = TransactionScope::new(ScopeMode::Join);
        scope.complete().await.expect("First complete");
        scope.complete().await.expect("Second complete");
        assert!(scope.is_completed());
        assert_eq!(scope.ambient().status(), AmbientStatus::Committed);
        scope.dispose().await.expect("First dispose");
        scope.dispose().await.expect("Second dispose");
        assert_eq!(scope.ambient().status(), AmbientStatus::Committed);

        let abandoned = TransactionScope::new(ScopeMode::Join);
        abandoned.dispose().await.expect("Dispose");
        silent_logs! {
            let error = abandoned
                .complete()
                .await
                .expect_err("Disposed scopes cannot complete");
            assert!(matches!(
                transaction_error(&error),
                Some(TransactionError::Disposed)
            ));
        }
    }

    #[tokio::test]
    async fn ambient_is_bound_to_one_database() {
        init_logs();
        let first = Database::<MockDriver>::new("mock://mismatch-first").expect("Mock url");
        let second = Database::<MockDriver>::new("mock://mismatch-second").expect("Mock url");
        let scope = TransactionScope::new(ScopeMode::Join);
        scope
            .enter(async {
                first
                    .execute("UPDATE t SET v = 1")
                    .await
                    .expect("First database");
                silent_logs! {
                    let error = second
                        .execute("UPDATE t SET v = 2")
                        .await
                        .expect_err("The ambient belongs to the first database");
                    assert!(matches!(
                        transaction_error(&error),
                        Some(TransactionError::DatabaseMismatch)
                    ));
                }
            })
            .await;
        scope.dispose().await.expect("Dispose");
        assert!(journal("mock://mismatch-second").is_empty());
    }

    #[tokio::test]
    async fn commit_journal() {
        init_logs();
        let url = "mock://commit";
        let db = Database::<MockDriver>::new(url).expect("Mock url");
        TransactionScope::run(ScopeMode::Join, |scope| {
            let db = db.clone();
            async move {
                db.execute("UPDATE t SET v = 1").await?;
                db.execute("UPDATE t SET v = 2").await?;
                scope.complete().await
            }
        })
        .await
        .expect("Scope");
        assert_eq!(
            journal(url),
            [
                "CONNECT",
                "BEGIN TRANSACTION;",
                "UPDATE t SET v = 1",
                "UPDATE t SET v = 2",
                "COMMIT TRANSACTION;",
                "CLOSE",
            ]
        );
    }

    #[tokio::test]
    async fn rollback_journal() {
        init_logs();
        let url = "mock://rollback";
        let db = Database::<MockDriver>::new(url).expect("Mock url");
        let outer = TransactionScope::new(ScopeMode::Join);
        outer
            .enter(async {
                let inner = TransactionScope::new(ScopeMode::Join);
                inner
                    .enter(db.execute("DELETE FROM t"))
                    .await
                    .expect("Statement");
                inner.complete().await.expect("Inner complete");
                inner.dispose().await.expect("Inner dispose");
            })
            .await;
        assert_eq!(
            journal(url),
            ["CONNECT", "BEGIN TRANSACTION;", "DELETE FROM t"]
        );
        outer.dispose().await.expect("Outer dispose");
        assert_eq!(
            journal(url),
            [
                "CONNECT",
                "BEGIN TRANSACTION;",
                "DELETE FROM t",
                "ROLLBACK TRANSACTION;",
                "CLOSE",
            ]
        );
    }

    #[tokio::test]
    async fn last_completion_commits() {
        init_logs();
        let url = "mock://last-completion";
        let db = Database::<MockDriver>::new(url).expect("Mock url");
        let outer = TransactionScope::new(ScopeMode::Join);
        outer
            .enter(async {
                let inner = TransactionScope::new(ScopeMode::Join);
                inner
                    .enter(db.execute("DELETE FROM t"))
                    .await
                    .expect("Statement");
                outer.complete().await.expect("Outer complete");
                assert_eq!(outer.ambient().status(), AmbientStatus::Active);
                assert_eq!(outer.ambient().ref_count(), 1);
                assert_eq!(
                    journal(url),
                    ["CONNECT", "BEGIN TRANSACTION;", "DELETE FROM t"]
                );
                inner.complete().await.expect("Inner complete");
                assert_eq!(outer.ambient().status(), AmbientStatus::Committed);
                inner.dispose().await.expect("Inner dispose");
            })
            .await;
        outer.dispose().await.expect("Outer dispose");
        assert_eq!(
            journal(url),
            [
                "CONNECT",
                "BEGIN TRANSACTION;",
                "DELETE FROM t",
                "COMMIT TRANSACTION;",
                "CLOSE",
            ]
        );
    }

    #[tokio::test]
    async fn non_transactional_scope() {
        init_logs();
        let url = "mock://non-transactional";
        let db = Database::<MockDriver>::new(url).expect("Mock url");
        let scope = TransactionScope::with_options(
            ScopeMode::Join,
            ScopeOptions {
                transactional: false,
                ..Default::default()
            },
        );
        scope
            .enter(async {
                db.execute("UPDATE t SET v = 1").await?;
                db.execute("UPDATE t SET v = 2").await
            })
            .await
            .expect("Statements");
        scope.complete().await.expect("Complete");
        scope.dispose().await.expect("Dispose");
        assert_eq!(
            journal(url),
            ["CONNECT", "UPDATE t SET v = 1", "UPDATE t SET v = 2", "CLOSE"]
        );
    }

    #[tokio::test]
    async fn attached_connection() {
        init_logs();
        let url = "mock://attached";
        let db = Database::<MockDriver>::new(url).expect("Mock url");
        let connection = Arc::new(tokio::sync::Mutex::new(
            MockConnection::connect(url).await.expect("Connect"),
        ));

        // The caller owns the transaction
        let scope = TransactionScope::attach(&db, connection.clone(), true, Default::default())
            .await
            .expect("Attach");
        assert!(scope.ambient().is_external());
        scope
            .enter(db.execute("UPDATE t SET v = 1"))
            .await
            .expect("Statement");
        scope.complete().await.expect("Complete");
        scope.dispose().await.expect("Dispose");
        assert_eq!(journal(url), ["CONNECT", "UPDATE t SET v = 1"]);

        // The scope owns the transaction, not the connection
        let scope = TransactionScope::attach(&db, connection.clone(), false, Default::default())
            .await
            .expect("Attach");
        scope
            .enter(db.execute("UPDATE t SET v = 2"))
            .await
            .expect("Statement");
        scope.complete().await.expect("Complete");
        scope.dispose().await.expect("Dispose");
        assert!(!connection.lock().await.in_transaction());
        drop(connection);
        assert_eq!(
            journal(url),
            [
                "CONNECT",
                "UPDATE t SET v = 1",
                "BEGIN TRANSACTION;",
                "UPDATE t SET v = 2",
                "COMMIT TRANSACTION;",
                "CLOSE",
            ]
        );
    }

    #[tokio::test]
    async fn pooled_commands_close_their_connection() {
        init_logs();
        let url = "mock://pooled";
        let db = Database::<MockDriver>::new(url).expect("Mock url");
        db.execute("UPDATE t SET v = 1").await.expect("Statement");
        assert_eq!(journal(url), ["CONNECT", "UPDATE t SET v = 1", "CLOSE"]);
        assert_eq!(db.idle_connections(), 0);
        silent_logs! {
            assert!(Database::<MockDriver>::new("sqlite://nope").is_err());
        }
    }
}
