use crate::user::User;
use crate::{die, err};

use anyhow::Result;
use chrono::serde::ts_seconds;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Executor, FromRow, Postgres, Transaction};

#[derive(FromRow, Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TimeLog {
    pub(crate) id: i32,
    pub(crate) issue_id: i32,
    pub(crate) user_id: i32,
    pub(crate) duration_minutes: i32,
    pub(crate) description: Option<String>,
    pub(crate) spent_on: NaiveDate,
    #[serde(with = "ts_seconds")]
    pub(crate) created_at: DateTime<Utc>
}

impl TimeLog {
    pub(crate) async fn create(issue_id: i32, user: &User, duration_minutes: i32, description: Option<&str>, spent_on: Option<NaiveDate>, transaction: &mut Transaction<'_, Postgres>) -> Result<TimeLog> {
        if duration_minutes <= 0 {
            die!(BAD_REQUEST, "Time spent must be positive");
        }

        let spent_on = spent_on.unwrap_or_else(|| Utc::now().naive_utc().date());

        Ok(sqlx::query_as::<_, TimeLog>(
            "insert into time_logs (issue_id, user_id, duration_minutes, description, spent_on) values ($1, $2, $3, $4, $5) returning *"
        )
            .bind(issue_id)
            .bind(user.id)
            .bind(duration_minutes)
            .bind(description)
            .bind(spent_on)
            .fetch_one(&mut *transaction)
            .await?)
    }

    pub(crate) async fn delete(timelog_id: i32, transaction: &mut Transaction<'_, Postgres>) -> Result<()> {
        sqlx::query_as::<_, (i32,)>("delete from time_logs where id = $1 returning id")
            .bind(timelog_id)
            .fetch_optional(&mut *transaction)
            .await?
            .ok_or_else(|| err!(NOT_FOUND, "Time log not found"))?;

        Ok(())
    }

    pub(crate) async fn for_issue<'e, E: Executor<'e, Database = Postgres>>(issue_id: i32, executor: E) -> Result<Vec<TimeLog>> {
        Ok(sqlx::query_as::<_, TimeLog>("select * from time_logs where issue_id = $1 order by created_at desc")
            .bind(issue_id)
            .fetch_all(executor)
            .await?)
    }
}
