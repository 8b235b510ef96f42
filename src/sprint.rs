use crate::prelude::double_option;
use crate::{die, err};

use anyhow::Result;
use chrono::serde::ts_seconds;
use chrono::{DateTime, NaiveDate, Utc};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use sqlx::{Executor, FromRow, Postgres, Transaction, Type};

/// Sprint progression is strictly forward; there is no way back to planning once
/// a sprint went active.
#[derive(Type, Display, Debug, Clone, Copy, Eq, PartialEq, Deserialize, Serialize)]
#[sqlx(type_name = "sprint_status", rename_all = "lowercase")]
#[serde(rename_all(serialize = "lowercase", deserialize = "lowercase"))]
pub(crate) enum SprintStatus {
    Planning,
    Active,
    Completed
}

impl SprintStatus {
    fn rank(self) -> u8 {
        match self {
            SprintStatus::Planning => 0,
            SprintStatus::Active => 1,
            SprintStatus::Completed => 2
        }
    }

    pub(crate) fn allows(self, next: SprintStatus) -> bool {
        next.rank() >= self.rank()
    }
}

#[derive(FromRow, Display, Debug, Clone, Serialize)]
#[display(fmt = "{}", name)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Sprint {
    pub(crate) id: i32,
    pub(crate) project_id: i32,
    pub(crate) name: String,
    pub(crate) goal: Option<String>,
    pub(crate) status: SprintStatus,
    pub(crate) start_date: Option<NaiveDate>,
    pub(crate) end_date: Option<NaiveDate>,
    #[serde(with = "ts_seconds")]
    pub(crate) created_at: DateTime<Utc>
}

/// Burndown aggregates, derived on read from the sprint's current issues.
#[derive(FromRow, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SprintPoints {
    pub(crate) total_points: i64,
    pub(crate) completed_points: i64
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct NewSprint {
    pub(crate) project_id: i32,
    pub(crate) name: String,
    #[serde(default)]
    pub(crate) goal: Option<String>,
    #[serde(default)]
    pub(crate) start_date: Option<NaiveDate>,
    #[serde(default)]
    pub(crate) end_date: Option<NaiveDate>
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct SprintPatch {
    pub(crate) name: Option<String>,
    #[serde(deserialize_with = "double_option")]
    pub(crate) goal: Option<Option<String>>,
    pub(crate) status: Option<SprintStatus>,
    #[serde(deserialize_with = "double_option")]
    pub(crate) start_date: Option<Option<NaiveDate>>,
    #[serde(deserialize_with = "double_option")]
    pub(crate) end_date: Option<Option<NaiveDate>>
}

impl SprintPatch {
    fn set_clauses(&self) -> Vec<String> {
        let mut clauses = Vec::new();

        if self.name.is_some() {
            clauses.push(format!("name = ${}", clauses.len() + 1));
        }

        if self.goal.is_some() {
            clauses.push(format!("goal = ${}", clauses.len() + 1));
        }

        if self.status.is_some() {
            clauses.push(format!("status = ${}", clauses.len() + 1));
        }

        if self.start_date.is_some() {
            clauses.push(format!("start_date = ${}", clauses.len() + 1));
        }

        if self.end_date.is_some() {
            clauses.push(format!("end_date = ${}", clauses.len() + 1));
        }

        clauses
    }
}

impl Sprint {
    pub(crate) async fn open<'e, E: Executor<'e, Database = Postgres>>(id: i32, executor: E) -> Option<Sprint> {
        sqlx::query_as::<_, Sprint>("select * from sprints where id = $1 limit 1")
            .bind(id)
            .fetch_optional(executor)
            .await
            .ok()
            .flatten()
    }

    pub(crate) async fn create(new: &NewSprint, transaction: &mut Transaction<'_, Postgres>) -> Result<Sprint> {
        if new.name.trim().is_empty() {
            die!(BAD_REQUEST, "Name is required");
        }

        Ok(sqlx::query_as::<_, Sprint>(
            "insert into sprints (project_id, name, goal, start_date, end_date) values ($1, $2, $3, $4, $5) returning *"
        )
            .bind(new.project_id)
            .bind(new.name.trim())
            .bind(new.goal.clone())
            .bind(new.start_date)
            .bind(new.end_date)
            .fetch_one(&mut *transaction)
            .await?)
    }

    pub(crate) async fn update(sprint_id: i32, patch: &SprintPatch, transaction: &mut Transaction<'_, Postgres>) -> Result<Sprint> {
        let current = Sprint::open(sprint_id, &mut *transaction).await.ok_or_else(|| err!(NOT_FOUND, "Sprint not found"))?;

        if matches!(&patch.name, Some(name) if name.trim().is_empty()) {
            die!(BAD_REQUEST, "Name is required");
        }

        if let Some(next) = patch.status {
            if !current.status.allows(next) {
                die!(BAD_REQUEST, "Sprint status can only move forward");
            }
        }

        let clauses = patch.set_clauses();

        if clauses.is_empty() {
            return Ok(current);
        }

        let sql = format!(
            "update sprints set {} where id = ${} returning *",
            clauses.join(", "),
            clauses.len() + 1
        );

        let mut query = sqlx::query_as::<_, Sprint>(sql.as_str());

        if let Some(name) = &patch.name {
            query = query.bind(name.trim().to_owned());
        }

        if let Some(goal) = &patch.goal {
            query = query.bind(goal.clone());
        }

        if let Some(status) = patch.status {
            query = query.bind(status);
        }

        if let Some(start_date) = patch.start_date {
            query = query.bind(start_date);
        }

        if let Some(end_date) = patch.end_date {
            query = query.bind(end_date);
        }

        Ok(query.bind(sprint_id).fetch_one(&mut *transaction).await?)
    }

    /// Issues keep existing when their sprint is deleted, they merely become unscheduled.
    pub(crate) async fn delete(sprint_id: i32, transaction: &mut Transaction<'_, Postgres>) -> Result<()> {
        sqlx::query_as::<_, (i32,)>("delete from sprints where id = $1 returning id")
            .bind(sprint_id)
            .fetch_optional(&mut *transaction)
            .await?
            .ok_or_else(|| err!(NOT_FOUND, "Sprint not found"))?;

        Ok(())
    }

    pub(crate) async fn for_project<'e, E: Executor<'e, Database = Postgres>>(project_id: i32, executor: E) -> Result<Vec<Sprint>> {
        Ok(sqlx::query_as::<_, Sprint>("select * from sprints where project_id = $1 order by created_at desc")
            .bind(project_id)
            .fetch_all(executor)
            .await?)
    }

    pub(crate) async fn visible_to<'e, E: Executor<'e, Database = Postgres>>(user_id: i32, executor: E) -> Result<Vec<Sprint>> {
        Ok(sqlx::query_as::<_, Sprint>(
            "select sprints.* from sprints join projects on sprints.project_id = projects.id \
            where projects.visibility = 'public' \
            or projects.id in (select project_id from project_members where user_id = $1) \
            order by sprints.created_at desc"
        )
            .bind(user_id)
            .fetch_all(executor)
            .await?)
    }

    pub(crate) async fn points<'e, E: Executor<'e, Database = Postgres>>(&self, executor: E) -> Result<SprintPoints> {
        Ok(sqlx::query_as::<_, SprintPoints>(
            "select coalesce(sum(story_points), 0) as total_points, \
            coalesce(sum(story_points) filter (where status = 'done'), 0) as completed_points \
            from issues where sprint_id = $1"
        )
            .bind(self.id)
            .fetch_one(executor)
            .await?)
    }

    pub(crate) async fn issue_count<'e, E: Executor<'e, Database = Postgres>>(&self, executor: E) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("select count(*) from issues where sprint_id = $1")
            .bind(self.id)
            .fetch_one(executor)
            .await?;

        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::SprintStatus;

    #[test]
    fn sprint_status_never_moves_backwards() {
        assert!(SprintStatus::Planning.allows(SprintStatus::Active));
        assert!(SprintStatus::Planning.allows(SprintStatus::Completed));
        assert!(SprintStatus::Active.allows(SprintStatus::Completed));

        assert!(!SprintStatus::Active.allows(SprintStatus::Planning));
        assert!(!SprintStatus::Completed.allows(SprintStatus::Active));
        assert!(!SprintStatus::Completed.allows(SprintStatus::Planning));
    }

    #[test]
    fn keeping_the_current_status_is_allowed() {
        assert!(SprintStatus::Active.allows(SprintStatus::Active));
    }
}
