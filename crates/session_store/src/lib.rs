use anyhow::{Context, Result};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Pool, Row, Sqlite,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

/// Storage key for the bearer token, matching the browser client's
/// `sessionStorage.getItem("token")` convention.
const TOKEN_KEY: &str = "token";

/// Session-scoped client state. Holds exactly one durable value today
/// (the bearer token); everything else the client caches lives in
/// memory only.
#[derive(Clone)]
pub struct SessionStore {
    pool: Pool<Sqlite>,
}

impl SessionStore {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        // Single connection: the token has one writer, and a shared pool
        // over `sqlite::memory:` would hand each connection its own db.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(connect_options)
            .await?;
        let store = Self { pool };
        store.ensure_session_table().await?;
        Ok(store)
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    async fn ensure_session_table(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS session_values (
                key        TEXT PRIMARY KEY,
                value      TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to ensure session_values table exists")?;
        Ok(())
    }

    pub async fn save_token(&self, token: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO session_values (key, value, updated_at) VALUES (?, ?, CURRENT_TIMESTAMP)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = CURRENT_TIMESTAMP",
        )
        .bind(TOKEN_KEY)
        .bind(token)
        .execute(&self.pool)
        .await
        .context("failed to persist bearer token")?;
        Ok(())
    }

    pub async fn load_token(&self) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM session_values WHERE key = ?")
            .bind(TOKEN_KEY)
            .fetch_optional(&self.pool)
            .await
            .context("failed to read bearer token")?;
        Ok(row.map(|row| row.get::<String, _>(0)))
    }

    pub async fn clear_token(&self) -> Result<()> {
        sqlx::query("DELETE FROM session_values WHERE key = ?")
            .bind(TOKEN_KEY)
            .execute(&self.pool)
            .await
            .context("failed to clear bearer token")?;
        Ok(())
    }
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url == "sqlite::memory:" || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
