use crate::err;

use anyhow::Result;
use chrono::serde::ts_seconds;
use chrono::{DateTime, Utc};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use sqlx::{Executor, FromRow, Postgres, Transaction, Type};

#[derive(Type, Display, Debug, Clone, Copy, Eq, PartialEq, Deserialize, Serialize)]
#[sqlx(type_name = "notification_kind", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub(crate) enum NotificationKind {
    IssueCreated,
    IssueUpdated,
    IssueDeleted,
    CommentAdded
}

/// A persisted per-user feed item. Written in the same transaction as the mutation
/// that caused it, so watchers see a durable record of events they missed while
/// disconnected.
#[derive(FromRow, Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Notification {
    pub(crate) id: i32,
    pub(crate) user_id: i32,
    pub(crate) kind: NotificationKind,
    pub(crate) project_id: i32,
    pub(crate) issue_id: Option<i32>,
    pub(crate) message: String,
    pub(crate) read: bool,
    #[serde(with = "ts_seconds")]
    pub(crate) created_at: DateTime<Utc>
}

pub(crate) async fn watchers<'e, E: Executor<'e, Database = Postgres>>(issue_id: i32, executor: E) -> Result<Vec<i32>> {
    let rows: Vec<(i32,)> = sqlx::query_as("select user_id from issue_watchers where issue_id = $1")
        .bind(issue_id)
        .fetch_all(executor)
        .await?;

    Ok(rows.into_iter().map(|(user_id,)| user_id).collect())
}

/// Writes one notification per recipient, skipping the acting user. For issue deletions
/// `issue_id` must be `None` as the referenced row is already gone.
pub(crate) async fn notify_users(user_ids: &[i32], actor_id: i32, kind: NotificationKind, project_id: i32, issue_id: Option<i32>, message: &str, transaction: &mut Transaction<'_, Postgres>) -> Result<()> {
    for &user_id in user_ids.iter().filter(|&&user_id| user_id != actor_id) {
        sqlx::query("insert into notifications (user_id, kind, project_id, issue_id, message) values ($1, $2, $3, $4, $5)")
            .bind(user_id)
            .bind(kind)
            .bind(project_id)
            .bind(issue_id)
            .bind(message)
            .execute(&mut *transaction)
            .await?;
    }

    Ok(())
}

/// Notifies everyone watching the issue except the acting user.
pub(crate) async fn notify_watchers(watched_issue_id: i32, actor_id: i32, kind: NotificationKind, project_id: i32, message: &str, transaction: &mut Transaction<'_, Postgres>) -> Result<()> {
    let user_ids = watchers(watched_issue_id, &mut *transaction).await?;

    notify_users(&user_ids, actor_id, kind, project_id, Some(watched_issue_id), message, transaction).await
}

pub(crate) async fn for_user<'e, E: Executor<'e, Database = Postgres>>(user_id: i32, executor: E) -> Result<Vec<Notification>> {
    Ok(sqlx::query_as::<_, Notification>("select * from notifications where user_id = $1 order by created_at desc")
        .bind(user_id)
        .fetch_all(executor)
        .await?)
}

pub(crate) async fn mark_read(notification_id: i32, user_id: i32, transaction: &mut Transaction<'_, Postgres>) -> Result<()> {
    sqlx::query_as::<_, (i32,)>("update notifications set read = true where id = $1 and user_id = $2 returning id")
        .bind(notification_id)
        .bind(user_id)
        .fetch_optional(&mut *transaction)
        .await?
        .ok_or_else(|| err!(NOT_FOUND, "Notification not found"))?;

    Ok(())
}

pub(crate) async fn mark_all_read(user_id: i32, transaction: &mut Transaction<'_, Postgres>) -> Result<()> {
    sqlx::query("update notifications set read = true where user_id = $1 and read = false")
        .bind(user_id)
        .execute(&mut *transaction)
        .await?;

    Ok(())
}
