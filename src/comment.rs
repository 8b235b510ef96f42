use crate::user::User;
use crate::{die, err};

use anyhow::Result;
use chrono::serde::ts_seconds;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Executor, FromRow, Postgres, Transaction};

/// Comment content is immutable once posted; the only mutation is deletion by its author.
#[derive(FromRow, Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Comment {
    pub(crate) id: i32,
    pub(crate) issue_id: i32,
    pub(crate) author_id: i32,
    pub(crate) content: String,
    #[serde(with = "ts_seconds")]
    pub(crate) created_at: DateTime<Utc>
}

impl Comment {
    pub(crate) async fn create(issue_id: i32, author: &User, content: &str, transaction: &mut Transaction<'_, Postgres>) -> Result<Comment> {
        if content.trim().is_empty() {
            die!(BAD_REQUEST, "Content is required");
        }

        Ok(sqlx::query_as::<_, Comment>("insert into comments (issue_id, author_id, content) values ($1, $2, $3) returning *")
            .bind(issue_id)
            .bind(author.id)
            .bind(content.trim())
            .fetch_one(&mut *transaction)
            .await?)
    }

    pub(crate) async fn open<'e, E: Executor<'e, Database = Postgres>>(id: i32, executor: E) -> Option<Comment> {
        sqlx::query_as::<_, Comment>("select * from comments where id = $1 limit 1")
            .bind(id)
            .fetch_optional(executor)
            .await
            .ok()
            .flatten()
    }

    pub(crate) async fn delete(self, transaction: &mut Transaction<'_, Postgres>) -> Result<()> {
        sqlx::query_as::<_, (i32,)>("delete from comments where id = $1 returning id")
            .bind(self.id)
            .fetch_optional(&mut *transaction)
            .await?
            .ok_or_else(|| err!(NOT_FOUND, "Comment not found"))?;

        Ok(())
    }

    pub(crate) async fn for_issue<'e, E: Executor<'e, Database = Postgres>>(issue_id: i32, executor: E) -> Result<Vec<Comment>> {
        Ok(sqlx::query_as::<_, Comment>("select * from comments where issue_id = $1 order by created_at asc")
            .bind(issue_id)
            .fetch_all(executor)
            .await?)
    }
}
