use crate::privileges::project_visibility::ProjectVisibility;
use crate::project::Project;
use crate::user::User;

use anyhow::{Context, Result};
use sqlx::{Executor, Postgres};

/// Checks whether the user may read the project and everything scoped to it
/// (issues, board, sprints, labels, the realtime channel).
///
/// Public projects are readable by any authenticated user, private projects
/// require membership. Anonymous requests are rejected with 401 before this
/// check is ever reached.
pub(crate) async fn check_access<'e, E: Executor<'e, Database = Postgres>>(project: &Project, user: &User, executor: E) -> Result<bool> {
    Ok(match project.visibility {
        ProjectVisibility::Private => is_project_member(project.id, user.id, executor)
            .await
            .with_context(|| format!("Unable to check membership for user {} in project {}", user.id, project.id))?,
        ProjectVisibility::Public => true
    })
}

pub(crate) async fn is_project_member<'e, E: Executor<'e, Database = Postgres>>(project_id: i32, user_id: i32, executor: E) -> Result<bool> {
    let (exists,): (bool,) = sqlx::query_as("select exists(select 1 from project_members where project_id = $1 and user_id = $2 limit 1)")
        .bind(project_id)
        .bind(user_id)
        .fetch_one(executor)
        .await?;

    Ok(exists)
}
