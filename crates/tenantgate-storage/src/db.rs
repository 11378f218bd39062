use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseBackend, DatabaseConnection, DbErr};

pub async fn connect(dsn: &str) -> Result<DatabaseConnection, DbErr> {
    let mut options = ConnectOptions::new(dsn.to_string());
    options.sqlx_logging(false);
    if is_sqlite_memory(dsn) {
        // Every pooled connection to `:memory:` would open its own database.
        options.max_connections(1).min_connections(1);
    }
    let db = Database::connect(options).await?;
    // Ensure sqlite enforces foreign keys (required for cascade + integrity).
    if db.get_database_backend() == DatabaseBackend::Sqlite {
        db.execute_unprepared("PRAGMA foreign_keys = ON").await?;
    }
    Ok(db)
}

fn is_sqlite_memory(dsn: &str) -> bool {
    dsn.starts_with("sqlite:") && dsn.contains(":memory:")
}
