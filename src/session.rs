use std::fmt::{Display, Formatter, Result as FmtResult};

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::{Executor, FromRow, Postgres};

/// A bearer token session. Tokens are minted by the external identity service;
/// DevTrack only ever resolves them back to a user.
#[derive(FromRow, Debug)]
pub(crate) struct Session {
    pub(crate) user_id: i32,
    pub(crate) token: String,
    pub(crate) created_at: DateTime<Utc>
}

impl Display for Session {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}${}", self.user_id, self.token)
    }
}

impl Session {
    pub(crate) async fn from_token<'e, E: Executor<'e, Database = Postgres>>(token: &str, executor: E) -> Result<Option<Session>> {
        let option: Option<Session> = sqlx::query_as::<_, Session>("select user_id, token, created_at from sessions where token = $1 limit 1")
            .bind(token)
            .fetch_optional(executor)
            .await?;

        Ok(option)
    }
}
