//! Postgres-backed access lookups.

mod util;

pub use util::map_sqlx_error;

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::{
    FromRow,
    postgres::{PgPool, PgPoolOptions},
};
use uuid::Uuid;

use crate::application::repos::{AccessRepo, RepoError, UserRecord};

#[derive(Clone)]
pub struct PostgresRepositories {
    pool: Arc<PgPool>,
}

impl PostgresRepositories {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn connect(url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
        PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
    }

    pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
        sqlx::migrate!("./migrations")
            .run(pool)
            .await
            .map_err(Into::into)
    }
}

#[derive(FromRow)]
struct UserRow {
    id: i64,
    uuid: Uuid,
}

impl From<UserRow> for UserRecord {
    fn from(row: UserRow) -> Self {
        Self {
            user_id: row.id,
            uuid: row.uuid,
        }
    }
}

#[async_trait]
impl AccessRepo for PostgresRepositories {
    async fn find_user(&self, uuid: Uuid) -> Result<Option<UserRecord>, RepoError> {
        let row = sqlx::query_as::<_, UserRow>("SELECT id, uuid FROM users WHERE uuid = $1")
            .bind(uuid)
            .fetch_optional(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(row.map(Into::into))
    }

    async fn active_workshop_ids(&self, user_id: i64) -> Result<Vec<i64>, RepoError> {
        sqlx::query_scalar::<_, i64>(
            r#"
            SELECT w.id
            FROM workshops w
            INNER JOIN users_workshops uw ON uw.workshop_id = w.id
            WHERE uw.user_id = $1
              AND w.start_date <= now()
              AND w.end_date > now()
            ORDER BY w.id
            "#,
        )
        .bind(user_id)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)
    }
}
