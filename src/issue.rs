use crate::prelude::double_option;
use crate::project::Project;
use crate::user::User;
use crate::workflow;
use crate::{die, err};

use anyhow::Result;
use chrono::serde::ts_seconds;
use chrono::{DateTime, NaiveDate, Utc};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use sqlx::{Executor, FromRow, Postgres, Transaction, Type};

#[derive(Type, Display, Debug, Clone, Copy, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[sqlx(type_name = "issue_type", rename_all = "lowercase")]
#[serde(rename_all(serialize = "lowercase", deserialize = "lowercase"))]
pub(crate) enum IssueType {
    Epic,
    Story,
    Task,
    Bug,
    Subtask
}

#[derive(Type, Display, Debug, Clone, Copy, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[sqlx(type_name = "issue_priority", rename_all = "lowercase")]
#[serde(rename_all(serialize = "lowercase", deserialize = "lowercase"))]
pub(crate) enum IssuePriority {
    Critical,
    High,
    Medium,
    Low
}

impl Default for IssuePriority {
    fn default() -> Self {
        IssuePriority::Medium
    }
}

/// A flat enumeration with no transition table: every status is reachable from
/// every other status through a plain update.
#[derive(Type, Display, Debug, Clone, Copy, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[sqlx(type_name = "issue_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub(crate) enum IssueStatus {
    Backlog,
    Todo,
    InProgress,
    Review,
    Done
}

impl IssueStatus {
    /// Fixed board lane order.
    pub(crate) const ALL: [IssueStatus; 5] = [
        IssueStatus::Backlog,
        IssueStatus::Todo,
        IssueStatus::InProgress,
        IssueStatus::Review,
        IssueStatus::Done
    ];

    pub(crate) fn column_name(&self) -> &'static str {
        match self {
            IssueStatus::Backlog => "Backlog",
            IssueStatus::Todo => "To Do",
            IssueStatus::InProgress => "In Progress",
            IssueStatus::Review => "Review",
            IssueStatus::Done => "Done"
        }
    }
}

/// Contains one unit of trackable work and its board placement.
/// This struct doubles as the wire representation on both the REST responses and the
/// realtime event payloads, so server and client cannot drift apart.
#[derive(FromRow, Display, Debug, Clone, Deserialize, Serialize)]
#[display(fmt = "{}", key)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Issue {
    pub(crate) id: i32,

    pub(crate) project_id: i32,
    pub(crate) key: String,

    pub(crate) title: String,
    pub(crate) description: Option<String>,

    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub(crate) issue_type: IssueType,
    pub(crate) priority: IssuePriority,
    pub(crate) status: IssueStatus,

    pub(crate) reporter_id: i32,
    pub(crate) assignee_id: Option<i32>,
    pub(crate) sprint_id: Option<i32>,
    pub(crate) parent_id: Option<i32>,

    pub(crate) story_points: Option<i32>,
    pub(crate) due_date: Option<NaiveDate>,

    #[serde(with = "ts_seconds")]
    pub(crate) created_at: DateTime<Utc>,
    #[serde(with = "ts_seconds")]
    pub(crate) updated_at: DateTime<Utc>
}

/// Request body for issue creation.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct NewIssue {
    pub(crate) project_id: i32,
    pub(crate) title: String,
    #[serde(default)]
    pub(crate) description: Option<String>,
    #[serde(rename = "type")]
    pub(crate) issue_type: IssueType,
    #[serde(default)]
    pub(crate) priority: IssuePriority,
    #[serde(default)]
    pub(crate) status: Option<IssueStatus>,
    #[serde(default)]
    pub(crate) assignee_id: Option<i32>,
    #[serde(default)]
    pub(crate) sprint_id: Option<i32>,
    #[serde(default)]
    pub(crate) parent_id: Option<i32>,
    #[serde(default)]
    pub(crate) story_points: Option<i32>,
    #[serde(default)]
    pub(crate) due_date: Option<NaiveDate>,
    #[serde(default)]
    pub(crate) label_ids: Vec<i32>
}

impl NewIssue {
    fn validate(&self) -> Result<()> {
        if self.title.trim().is_empty() {
            die!(BAD_REQUEST, "Title is required");
        }

        if matches!(self.story_points, Some(points) if points < 0) {
            die!(BAD_REQUEST, "Story points must not be negative");
        }

        Ok(())
    }
}

/// Merge-patch request body for issue updates: absent fields stay untouched, explicit
/// nulls clear the nullable fields.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct IssuePatch {
    pub(crate) title: Option<String>,
    #[serde(deserialize_with = "double_option")]
    pub(crate) description: Option<Option<String>>,
    #[serde(rename = "type")]
    pub(crate) issue_type: Option<IssueType>,
    pub(crate) priority: Option<IssuePriority>,
    pub(crate) status: Option<IssueStatus>,
    #[serde(deserialize_with = "double_option")]
    pub(crate) assignee_id: Option<Option<i32>>,
    #[serde(deserialize_with = "double_option")]
    pub(crate) sprint_id: Option<Option<i32>>,
    #[serde(deserialize_with = "double_option")]
    pub(crate) story_points: Option<Option<i32>>,
    #[serde(deserialize_with = "double_option")]
    pub(crate) due_date: Option<Option<NaiveDate>>,
    pub(crate) label_ids: Option<Vec<i32>>
}

impl IssuePatch {
    pub(crate) fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.issue_type.is_none()
            && self.priority.is_none()
            && self.status.is_none()
            && self.assignee_id.is_none()
            && self.sprint_id.is_none()
            && self.story_points.is_none()
            && self.due_date.is_none()
            && self.label_ids.is_none()
    }

    fn validate(&self) -> Result<()> {
        if matches!(&self.title, Some(title) if title.trim().is_empty()) {
            die!(BAD_REQUEST, "Title is required");
        }

        if matches!(self.story_points, Some(Some(points)) if points < 0) {
            die!(BAD_REQUEST, "Story points must not be negative");
        }

        Ok(())
    }

    /// Builds the `set` clauses for the supplied fields with positional parameters
    /// starting at `$1`. Must stay in lockstep with the bind order in [Issue::update].
    fn set_clauses(&self) -> Vec<String> {
        let mut clauses = Vec::new();

        if self.title.is_some() {
            clauses.push(format!("title = ${}", clauses.len() + 1));
        }

        if self.description.is_some() {
            clauses.push(format!("description = ${}", clauses.len() + 1));
        }

        if self.issue_type.is_some() {
            clauses.push(format!("type = ${}", clauses.len() + 1));
        }

        if self.priority.is_some() {
            clauses.push(format!("priority = ${}", clauses.len() + 1));
        }

        if self.status.is_some() {
            clauses.push(format!("status = ${}", clauses.len() + 1));
        }

        if self.assignee_id.is_some() {
            clauses.push(format!("assignee_id = ${}", clauses.len() + 1));
        }

        if self.sprint_id.is_some() {
            clauses.push(format!("sprint_id = ${}", clauses.len() + 1));
        }

        if self.story_points.is_some() {
            clauses.push(format!("story_points = ${}", clauses.len() + 1));
        }

        if self.due_date.is_some() {
            clauses.push(format!("due_date = ${}", clauses.len() + 1));
        }

        clauses
    }
}

impl Issue {
    pub(crate) async fn open<'e, E: Executor<'e, Database = Postgres>>(id: i32, executor: E) -> Option<Issue> {
        sqlx::query_as::<_, Issue>("select * from issues where id = $1 limit 1")
            .bind(id)
            .fetch_optional(executor)
            .await
            .ok()
            .flatten()
    }

    /// Creates a new issue inside the given project. The issue key is derived from the
    /// project's monotonic counter and the reporter becomes the first watcher.
    pub(crate) async fn create(project: &Project, reporter: &User, new: &NewIssue, transaction: &mut Transaction<'_, Postgres>) -> Result<Issue> {
        new.validate()?;

        let key = project.next_issue_key(&mut *transaction).await?;

        let status = match new.status {
            Some(status) => status,
            None => workflow::default_status(project.workflow_id, &mut *transaction).await?
        };

        let issue: Issue = sqlx::query_as::<_, Issue>(
            "insert into issues (project_id, key, title, description, type, priority, status, reporter_id, assignee_id, sprint_id, parent_id, story_points, due_date) \
            values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13) returning *"
        )
            .bind(project.id)
            .bind(key.as_str())
            .bind(new.title.trim())
            .bind(new.description.clone())
            .bind(new.issue_type)
            .bind(new.priority)
            .bind(status)
            .bind(reporter.id)
            .bind(new.assignee_id)
            .bind(new.sprint_id)
            .bind(new.parent_id)
            .bind(new.story_points)
            .bind(new.due_date)
            .fetch_one(&mut *transaction)
            .await?;

        sqlx::query("insert into issue_watchers (issue_id, user_id) values ($1, $2)")
            .bind(issue.id)
            .bind(reporter.id)
            .execute(&mut *transaction)
            .await?;

        for label_id in &new.label_ids {
            sqlx::query("insert into issue_labels (issue_id, label_id) values ($1, $2)")
                .bind(issue.id)
                .bind(label_id)
                .execute(&mut *transaction)
                .await?;
        }

        Ok(issue)
    }

    /// Applies a merge-patch to the issue: only the supplied fields change, everything
    /// else keeps its prior value. Status updates are unrestricted, moving from
    /// `done` back to `todo` is legal.
    pub(crate) async fn update(issue_id: i32, patch: &IssuePatch, transaction: &mut Transaction<'_, Postgres>) -> Result<Issue> {
        patch.validate()?;

        let clauses = patch.set_clauses();

        let issue: Issue = if clauses.is_empty() {
            Issue::open(issue_id, &mut *transaction).await.ok_or_else(|| err!(NOT_FOUND, "Issue not found"))?
        } else {
            let sql = format!(
                "update issues set {}, updated_at = now() where id = ${} returning *",
                clauses.join(", "),
                clauses.len() + 1
            );

            let mut query = sqlx::query_as::<_, Issue>(sql.as_str());

            if let Some(title) = &patch.title {
                query = query.bind(title.trim().to_owned());
            }

            if let Some(description) = &patch.description {
                query = query.bind(description.clone());
            }

            if let Some(issue_type) = patch.issue_type {
                query = query.bind(issue_type);
            }

            if let Some(priority) = patch.priority {
                query = query.bind(priority);
            }

            if let Some(status) = patch.status {
                query = query.bind(status);
            }

            if let Some(assignee_id) = patch.assignee_id {
                query = query.bind(assignee_id);
            }

            if let Some(sprint_id) = patch.sprint_id {
                query = query.bind(sprint_id);
            }

            if let Some(story_points) = patch.story_points {
                query = query.bind(story_points);
            }

            if let Some(due_date) = patch.due_date {
                query = query.bind(due_date);
            }

            query.bind(issue_id)
                .fetch_optional(&mut *transaction)
                .await?
                .ok_or_else(|| err!(NOT_FOUND, "Issue not found"))?
        };

        if let Some(label_ids) = &patch.label_ids {
            sqlx::query("delete from issue_labels where issue_id = $1")
                .bind(issue.id)
                .execute(&mut *transaction)
                .await?;

            for label_id in label_ids {
                sqlx::query("insert into issue_labels (issue_id, label_id) values ($1, $2)")
                    .bind(issue.id)
                    .bind(label_id)
                    .execute(&mut *transaction)
                    .await?;
            }
        }

        Ok(issue)
    }

    /// Hard-deletes the issue. Comments, attachments, time logs, watcher records and
    /// label links go with it through the schema's cascades.
    pub(crate) async fn delete(issue_id: i32, transaction: &mut Transaction<'_, Postgres>) -> Result<Issue> {
        sqlx::query_as::<_, Issue>("delete from issues where id = $1 returning *")
            .bind(issue_id)
            .fetch_optional(&mut *transaction)
            .await?
            .ok_or_else(|| err!(NOT_FOUND, "Issue not found"))
    }

    pub(crate) async fn list_for_project<'e, E: Executor<'e, Database = Postgres>>(project_id: i32, query: &IssueQuery, executor: E) -> Result<Vec<Issue>> {
        let mut clauses = vec!["project_id = $1".to_owned()];

        if query.status.is_some() {
            clauses.push(format!("status = ${}", clauses.len() + 1));
        }

        if query.assignee_id.is_some() {
            clauses.push(format!("assignee_id = ${}", clauses.len() + 1));
        }

        if query.issue_type.is_some() {
            clauses.push(format!("type = ${}", clauses.len() + 1));
        }

        if query.priority.is_some() {
            clauses.push(format!("priority = ${}", clauses.len() + 1));
        }

        let sql = format!("select * from issues where {} order by created_at desc", clauses.join(" and "));

        let mut q = sqlx::query_as::<_, Issue>(sql.as_str()).bind(project_id);

        if let Some(status) = query.status {
            q = q.bind(status);
        }

        if let Some(assignee_id) = query.assignee_id {
            q = q.bind(assignee_id);
        }

        if let Some(issue_type) = query.issue_type {
            q = q.bind(issue_type);
        }

        if let Some(priority) = query.priority {
            q = q.bind(priority);
        }

        Ok(q.fetch_all(executor).await?)
    }

    /// All issues across the projects the user may read.
    pub(crate) async fn visible_to<'e, E: Executor<'e, Database = Postgres>>(user_id: i32, executor: E) -> Result<Vec<Issue>> {
        Ok(sqlx::query_as::<_, Issue>(
            "select issues.* from issues join projects on issues.project_id = projects.id \
            where projects.visibility = 'public' \
            or projects.id in (select project_id from project_members where user_id = $1) \
            order by issues.created_at desc"
        )
            .bind(user_id)
            .fetch_all(executor)
            .await?)
    }
}

/// Optional server-side equality filters for per-project issue listings.
#[derive(Debug, Default)]
pub(crate) struct IssueQuery {
    pub(crate) status: Option<IssueStatus>,
    pub(crate) assignee_id: Option<i32>,
    pub(crate) issue_type: Option<IssueType>,
    pub(crate) priority: Option<IssuePriority>
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_and_null_fields_are_told_apart() {
        let patch: IssuePatch = serde_json::from_str(r#"{"title": "New title"}"#).unwrap();
        assert_eq!(patch.title.as_deref(), Some("New title"));
        assert!(patch.description.is_none()); // absent, leave untouched

        let patch: IssuePatch = serde_json::from_str(r#"{"description": null, "assigneeId": null}"#).unwrap();
        assert_eq!(patch.description, Some(None)); // explicit null, clear it
        assert_eq!(patch.assignee_id, Some(None));
        assert!(patch.title.is_none());
    }

    #[test]
    fn set_clauses_only_contain_supplied_fields() {
        let patch: IssuePatch = serde_json::from_str(r#"{"title": "T", "status": "done"}"#).unwrap();

        assert_eq!(patch.set_clauses(), vec!["title = $1".to_owned(), "status = $2".to_owned()]);
    }

    #[test]
    fn empty_patches_are_detected() {
        let patch: IssuePatch = serde_json::from_str("{}").unwrap();

        assert!(patch.is_empty());
        assert!(patch.set_clauses().is_empty());
    }

    #[test]
    fn every_status_is_reachable_from_every_other_status() {
        // No transition table: a status-only patch passes validation regardless of
        // the value, including moves from done back to todo
        for target in IssueStatus::ALL {
            let patch = IssuePatch {
                status: Some(target),
                ..IssuePatch::default()
            };

            assert!(patch.validate().is_ok());
        }
    }

    #[test]
    fn blank_titles_are_rejected() {
        let new: NewIssue = serde_json::from_str(r#"{"projectId": 1, "title": "   ", "type": "bug"}"#).unwrap();
        assert!(new.validate().is_err());

        let patch: IssuePatch = serde_json::from_str(r#"{"title": ""}"#).unwrap();
        assert!(patch.validate().is_err());
    }

    #[test]
    fn negative_story_points_are_rejected() {
        let patch: IssuePatch = serde_json::from_str(r#"{"storyPoints": -3}"#).unwrap();
        assert!(patch.validate().is_err());

        let patch: IssuePatch = serde_json::from_str(r#"{"storyPoints": 0}"#).unwrap();
        assert!(patch.validate().is_ok());
    }
}
