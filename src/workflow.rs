use crate::issue::IssueStatus;

use anyhow::Result;
use derive_more::Display;
use serde::{Deserialize, Serialize};
use sqlx::{Executor, FromRow, Postgres, Transaction, Type};

#[derive(Type, Display, Debug, Clone, Copy, Eq, PartialEq, Deserialize, Serialize)]
#[sqlx(type_name = "workflow_category", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub(crate) enum WorkflowCategory {
    Todo,
    InProgress,
    Done
}

#[derive(FromRow, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WorkflowState {
    pub(crate) id: i32,
    #[serde(skip_serializing)]
    pub(crate) workflow_id: i32,
    pub(crate) name: String,
    pub(crate) category: WorkflowCategory,
    pub(crate) status: IssueStatus,
    pub(crate) position: i32
}

const DEFAULT_STATES: [(&str, WorkflowCategory, IssueStatus); 4] = [
    ("To Do", WorkflowCategory::Todo, IssueStatus::Todo),
    ("In Progress", WorkflowCategory::InProgress, IssueStatus::InProgress),
    ("Review", WorkflowCategory::InProgress, IssueStatus::Review),
    ("Done", WorkflowCategory::Done, IssueStatus::Done)
];

/// Creates the default workflow a new project starts out with and returns its id.
pub(crate) async fn create_default(transaction: &mut Transaction<'_, Postgres>) -> Result<i32> {
    let (workflow_id,): (i32,) = sqlx::query_as("insert into workflows (name) values ('Default Workflow') returning id")
        .fetch_one(&mut *transaction)
        .await?;

    for (position, &(name, category, status)) in DEFAULT_STATES.iter().enumerate() {
        sqlx::query("insert into workflow_states (workflow_id, name, category, status, position) values ($1, $2, $3, $4, $5)")
            .bind(workflow_id)
            .bind(name)
            .bind(category)
            .bind(status)
            .bind(position as i32)
            .execute(&mut *transaction)
            .await?;
    }

    Ok(workflow_id)
}

pub(crate) async fn states<'e, E: Executor<'e, Database = Postgres>>(workflow_id: i32, executor: E) -> Result<Vec<WorkflowState>> {
    Ok(sqlx::query_as::<_, WorkflowState>("select * from workflow_states where workflow_id = $1 order by position")
        .bind(workflow_id)
        .fetch_all(executor)
        .await?)
}

/// Resolves the status new issues start out with: the workflow's `todo` category state
/// with the lowest position, falling back to [Todo](IssueStatus::Todo) for workflows
/// without one.
pub(crate) async fn default_status<'e, E: Executor<'e, Database = Postgres>>(workflow_id: i32, executor: E) -> Result<IssueStatus> {
    let row: Option<(IssueStatus,)> = sqlx::query_as("select status from workflow_states where workflow_id = $1 and category = 'todo' order by position limit 1")
        .bind(workflow_id)
        .fetch_optional(executor)
        .await?;

    Ok(row.map(|(status,)| status).unwrap_or(IssueStatus::Todo))
}
