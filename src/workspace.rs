use anyhow::Result;
use sqlx::{Executor, Postgres};

/// Workspace CRUD lives in the external collaboration service; DevTrack only
/// consults the membership table when a project is created inside a workspace.
pub(crate) async fn is_member<'e, E: Executor<'e, Database = Postgres>>(workspace_id: i32, user_id: i32, executor: E) -> Result<bool> {
    let (exists,): (bool,) = sqlx::query_as("select exists(select 1 from workspace_members where workspace_id = $1 and user_id = $2 limit 1)")
        .bind(workspace_id)
        .bind(user_id)
        .fetch_one(executor)
        .await?;

    Ok(exists)
}
