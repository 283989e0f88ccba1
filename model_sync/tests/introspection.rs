//! Live introspection and application against an in-memory SQLite database
#![cfg(feature = "integration_tests")]

use chrono::Utc;
use std::collections::HashSet;

use model_sync::config::DatabaseConfig;
use model_sync::schema::{
    AbstractType, EntityDeclaration, FieldSpec, ReconcileOptions, TypeNormalizer, UnitKind,
};
use model_sync::{
    DatabaseConnection, DatabaseSink, Introspector, MigrationSink, Reconciler, SqlIntrospector,
};

async fn sqlite() -> DatabaseConnection {
    // One connection, otherwise every pooled connection gets its own empty database
    DatabaseConnection::connect(&DatabaseConfig {
        driver: "sqlite".to_string(),
        url: "sqlite::memory:".to_string(),
        pool_size: Some(1),
        timeout_seconds: Some(5),
        schema: None,
    })
    .await
    .unwrap()
}

#[tokio::test]
async fn test_sqlite_snapshot() {
    let connection = sqlite().await;
    connection
        .execute(
            "CREATE TABLE products (id INTEGER PRIMARY KEY, name VARCHAR(255) NOT NULL, price INTEGER DEFAULT 0)",
        )
        .await
        .unwrap();
    connection
        .execute("CREATE INDEX products_name_index ON products (name)")
        .await
        .unwrap();

    let introspector = SqlIntrospector::new(connection.clone(), None);
    assert!(introspector.table_exists("products").await.unwrap());
    assert!(!introspector.table_exists("tags").await.unwrap());

    let snapshot = introspector.snapshot("products").await.unwrap();
    assert!(snapshot.exists);
    assert!(!snapshot.column("name").unwrap().nullable);
    assert_eq!(snapshot.column("price").unwrap().default.as_deref(), Some("0"));
    assert!(snapshot.indexes.covers("name"));

    let missing = introspector.snapshot("tags").await.unwrap();
    assert!(!missing.exists);

    connection.close().await;
}

#[tokio::test]
async fn test_applied_units_converge() {
    let connection = sqlite().await;
    let normalizer = TypeNormalizer::new();
    let introspector = SqlIntrospector::new(connection.clone(), None);
    let sink = DatabaseSink::new(connection.clone(), None, normalizer.clone(), true);
    let reconciler = Reconciler::new(normalizer, ReconcileOptions::default());

    let declaration = EntityDeclaration::new("Product")
        .field(FieldSpec::new("name", AbstractType::String).length(255).nullable(true))
        .field(FieldSpec::new("price", AbstractType::Integer).nullable(true));

    let snapshot = introspector.snapshot("products").await.unwrap();
    let plan = reconciler
        .plan(&declaration, &snapshot, &HashSet::new(), Utc::now())
        .unwrap();
    for unit in &plan.units {
        sink.persist(unit).await.unwrap();
        // Re-applying runs nothing
        sink.persist(unit).await.unwrap();
    }

    let snapshot = introspector.snapshot("products").await.unwrap();
    let second = reconciler
        .plan(&declaration, &snapshot, &HashSet::new(), Utc::now())
        .unwrap();
    assert!(second.units.iter().all(|unit| unit.kind != UnitKind::Table));

    connection.close().await;
}
