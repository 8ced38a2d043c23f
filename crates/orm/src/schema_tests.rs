//! Schema builder tests against the in-memory database
//!
//! These exercise the catalog checks the builder performs before executing
//! compiled DDL, and the introspection round trip.

#[cfg(test)]
mod tests {
    use crate::backends::{DatabasePool, DatabaseTransaction};
    use crate::error::OrmError;
    use crate::schema::{ColumnType, SchemaBuilder, TableBuilder};
    use crate::testing::MemoryDatabase;

    async fn create_users(tx: &mut dyn DatabaseTransaction) {
        let mut schema = SchemaBuilder::new(tx, "public");
        schema
            .create_table("users", |t| {
                t.increments("id").primary();
                t.string("name", Some(255)).not_null();
                t.string("email", Some(255)).not_null().unique();
            })
            .await
            .unwrap();
    }

    async fn database_with_users() -> MemoryDatabase {
        let db = MemoryDatabase::new();
        let mut tx = db.begin_transaction().await.unwrap();
        create_users(tx.as_mut()).await;
        tx.commit().await.unwrap();
        db
    }

    #[tokio::test]
    async fn test_users_table_scenario() {
        let db = database_with_users().await;
        let mut tx = db.begin_transaction().await.unwrap();
        let mut schema = SchemaBuilder::new(tx.as_mut(), "public");

        assert!(schema.has_table("users").await.unwrap());
        assert!(schema.has_column("users", "email").await.unwrap());
        assert!(!schema.has_column("users", "phone").await.unwrap());

        let shape = schema.get_table_schema("users").await.unwrap();
        let names: Vec<&str> = shape.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["id", "name", "email"]);
        assert_eq!(shape.primary_key, vec!["id"]);

        let id = shape.column("id").unwrap();
        assert_eq!(id.column_type, Some(ColumnType::Serial));
        assert!(!id.nullable);
        let email = shape.column("email").unwrap();
        assert_eq!(email.column_type, Some(ColumnType::Varchar(Some(255))));
        assert!(!email.nullable);
        assert!(shape.indexes.iter().any(|i| i.unique && i.columns == vec!["email"]));
    }

    #[tokio::test]
    async fn test_create_existing_table_conflicts() {
        let db = database_with_users().await;
        let mut tx = db.begin_transaction().await.unwrap();
        let mut schema = SchemaBuilder::new(tx.as_mut(), "public");

        let err = schema
            .create_table("users", |t| {
                t.id("id");
            })
            .await
            .unwrap_err();
        assert!(matches!(err, OrmError::SchemaConflict(_)));

        let created = schema
            .create_table_if_not_exists("users", |t| {
                t.id("id");
            })
            .await
            .unwrap();
        assert!(!created);
    }

    #[tokio::test]
    async fn test_validation_happens_before_catalog_checks() {
        let db = database_with_users().await;
        let mut tx = db.begin_transaction().await.unwrap();
        let mut schema = SchemaBuilder::new(tx.as_mut(), "public");

        // The table exists, but the bad descriptor is reported first
        let err = schema
            .create_table("users", |t| {
                t.string("name", Some(0));
            })
            .await
            .unwrap_err();
        assert!(err.is_validation());

        let err = schema
            .create_table("bad name", |t| {
                t.id("id");
            })
            .await
            .unwrap_err();
        assert!(err.is_validation());

        let err = schema
            .alter_table("missing", |t| {
                t.decimal("price", 2, 5);
            })
            .await
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn test_alter_table_checks_columns() {
        let db = database_with_users().await;
        let mut tx = db.begin_transaction().await.unwrap();
        let mut schema = SchemaBuilder::new(tx.as_mut(), "public");

        let err = schema
            .alter_table("accounts", |t| {
                t.text("bio");
            })
            .await
            .unwrap_err();
        assert!(matches!(err, OrmError::NotFound(_)));

        let err = schema
            .alter_table("users", |t| {
                t.text("email");
            })
            .await
            .unwrap_err();
        assert!(matches!(err, OrmError::SchemaConflict(_)));

        let err = schema
            .alter_table("users", |t| {
                t.drop_column("phone");
            })
            .await
            .unwrap_err();
        assert!(matches!(err, OrmError::SchemaConflict(_)));

        let err = schema
            .alter_table("users", |t| {
                t.rename_column("name", "email");
            })
            .await
            .unwrap_err();
        assert!(matches!(err, OrmError::SchemaConflict(_)));

        schema
            .alter_table("users", |t| {
                t.string("phone", Some(32));
                t.rename_column("name", "full_name");
            })
            .await
            .unwrap();

        let shape = schema.get_table_schema("users").await.unwrap();
        let names: Vec<&str> = shape.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["id", "full_name", "email", "phone"]);
        assert!(shape.column("phone").unwrap().nullable);
    }

    #[tokio::test]
    async fn test_drop_and_rename_table() {
        let db = database_with_users().await;
        let mut tx = db.begin_transaction().await.unwrap();
        let mut schema = SchemaBuilder::new(tx.as_mut(), "public");

        let err = schema.drop_table("accounts").await.unwrap_err();
        assert!(matches!(err, OrmError::NotFound(_)));
        assert!(!schema.drop_table_if_exists("accounts").await.unwrap());

        let err = schema.rename_table("accounts", "members").await.unwrap_err();
        assert!(matches!(err, OrmError::NotFound(_)));

        schema
            .create_table("members", |t| {
                t.id("id");
            })
            .await
            .unwrap();
        let err = schema.rename_table("users", "members").await.unwrap_err();
        assert!(matches!(err, OrmError::SchemaConflict(_)));

        schema.drop_table("members").await.unwrap();
        schema.rename_table("users", "members").await.unwrap();
        assert!(!schema.has_table("users").await.unwrap());
        assert!(schema.has_column("members", "email").await.unwrap());

        assert!(schema.drop_table_if_exists("members").await.unwrap());
        let err = schema.get_table_schema("members").await.unwrap_err();
        assert!(matches!(err, OrmError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_raw_bypasses_the_compiler() {
        let db = MemoryDatabase::new();
        let mut tx = db.begin_transaction().await.unwrap();
        let mut schema = SchemaBuilder::new(tx.as_mut(), "public");

        schema
            .raw("CREATE TABLE \"public\".\"audit\" (\"id\" BIGSERIAL PRIMARY KEY, \"note\" TEXT)", &[])
            .await
            .unwrap();
        assert!(schema.has_column("audit", "note").await.unwrap());

        let err = schema.raw("SELEC 1", &[]).await.unwrap_err();
        assert!(matches!(err, OrmError::Execution(_)));
    }

    #[tokio::test]
    async fn test_uncommitted_changes_are_discarded_on_rollback() {
        let db = MemoryDatabase::new();
        let mut tx = db.begin_transaction().await.unwrap();
        create_users(tx.as_mut()).await;
        tx.rollback().await.unwrap();

        assert!(!db.has_table("public", "users").await);
        assert!(db.committed_statements().await.is_empty());
    }

    #[tokio::test]
    async fn test_introspected_shape_rebuilds_the_table() {
        let db = database_with_users().await;
        let mut tx = db.begin_transaction().await.unwrap();
        let mut schema = SchemaBuilder::new(tx.as_mut(), "public");

        let original = schema.get_table_schema("users").await.unwrap();
        let blueprint: TableBuilder = original.to_blueprint().unwrap();

        schema.drop_table("users").await.unwrap();
        schema.build(&blueprint).await.unwrap();

        let rebuilt = schema.get_table_schema("users").await.unwrap();
        assert_eq!(rebuilt.columns, original.columns);
        assert_eq!(rebuilt.primary_key, original.primary_key);
        assert!(rebuilt.indexes.iter().any(|i| i.unique && i.columns == vec!["email"]));
    }

    #[tokio::test]
    async fn test_schema_namespace_is_respected() {
        let db = MemoryDatabase::new();
        let mut tx = db.begin_transaction().await.unwrap();
        {
            let mut schema = SchemaBuilder::new(tx.as_mut(), "billing");
            schema
                .create_table("invoices", |t| {
                    t.id("id");
                    t.decimal("total", 12, 2).not_null().default(0);
                    t.timestamps();
                })
                .await
                .unwrap();
            assert!(schema.has_table("invoices").await.unwrap());
        }
        tx.commit().await.unwrap();

        assert!(db.has_table("billing", "invoices").await);
        assert!(!db.has_table("public", "invoices").await);
        assert_eq!(
            db.column_names("billing", "invoices").await,
            vec!["id", "total", "created_at", "updated_at"]
        );
    }
}
