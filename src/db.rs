//! Database module
//!
//! Connectivity and schema bootstrap for the PostgreSQL store.

use sqlx::PgConnection;

use crate::repository::TableName;

/// Simple connectivity check
pub async fn verify_connection(conn: &mut PgConnection) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(conn).await?;

    Ok(())
}

/// Check if a table exists in the public schema
pub async fn table_exists(conn: &mut PgConnection, table: &TableName) -> Result<bool, sqlx::Error> {
    let exists: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS (
            SELECT 1 FROM information_schema.tables
            WHERE table_schema = 'public' AND table_name = $1
        )
        "#,
    )
    .bind(table.as_str())
    .fetch_one(conn)
    .await?;

    Ok(exists)
}

/// Name of the unique index on `store_id`
pub fn store_id_index(table: &TableName) -> String {
    format!("{}_store_id_ux", table.as_str())
}

/// Create the store table and its unique `store_id` index when missing
pub async fn ensure_schema(conn: &mut PgConnection, table: &TableName) -> Result<(), sqlx::Error> {
    if !table_exists(&mut *conn, table).await? {
        tracing::info!(table = %table, "Creating store table");
    }

    let create_table = format!(
        r#"
        CREATE TABLE IF NOT EXISTS {} (
            store_id TEXT NOT NULL,
            name TEXT NOT NULL,
            huge_value TEXT NOT NULL
        )
        "#,
        table.quoted()
    );
    sqlx::query(&create_table).execute(&mut *conn).await?;

    let create_index = format!(
        "CREATE UNIQUE INDEX IF NOT EXISTS \"{}\" ON {} (store_id)",
        store_id_index(table),
        table.quoted()
    );
    sqlx::query(&create_index).execute(&mut *conn).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_id_index_name() {
        let table = TableName::parse("stores").unwrap();
        assert_eq!(store_id_index(&table), "stores_store_id_ux");
    }
}
