use crate::error::DevTrackError;
use crate::privileges::privilege;
use crate::privileges::project_visibility::ProjectVisibility;
use crate::user::WebUser;
use crate::{die, err};

use std::future::Future;
use std::pin::Pin;

use actix_web::dev::Payload;
use actix_web::web::Data;
use actix_web::{FromRequest, HttpRequest};
use anyhow::{anyhow, Result};
use chrono::serde::ts_seconds;
use chrono::{DateTime, Utc};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use sqlx::{Executor, FromRow, PgPool, Postgres, Transaction, Type};
use tracing_unwrap::OptionExt;

#[derive(FromRow, Display, Debug, Clone, Serialize)]
#[display(fmt = "{}", key)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Project {
    pub(crate) id: i32,

    pub(crate) workspace_id: i32,
    pub(crate) workflow_id: i32,
    pub(crate) lead_id: Option<i32>,

    pub(crate) name: String,
    pub(crate) key: String,
    pub(crate) description: Option<String>,

    pub(crate) visibility: ProjectVisibility,

    #[serde(skip_serializing)]
    pub(crate) issue_counter: i32,

    #[serde(with = "ts_seconds")]
    pub(crate) created_at: DateTime<Utc>
}

#[derive(Type, Display, Debug, Clone, Copy, Eq, PartialEq, Deserialize, Serialize)]
#[sqlx(type_name = "project_role", rename_all = "lowercase")]
#[serde(rename_all(serialize = "lowercase", deserialize = "lowercase"))]
pub(crate) enum ProjectRole {
    Lead,
    Member
}

impl Project {
    pub(crate) async fn open<'e, E: Executor<'e, Database = Postgres>>(id: i32, executor: E) -> Option<Project> {
        sqlx::query_as::<_, Project>("select * from projects where id = $1 limit 1")
            .bind(id)
            .fetch_optional(executor)
            .await
            .ok()
            .flatten()
    }

    /// All projects the user may read: public ones plus private ones they are a member of.
    pub(crate) async fn visible_to<'e, E: Executor<'e, Database = Postgres>>(user_id: i32, executor: E) -> Result<Vec<Project>> {
        Ok(sqlx::query_as::<_, Project>(
            "select * from projects where visibility = 'public' \
            or id in (select project_id from project_members where user_id = $1) \
            order by created_at desc"
        )
            .bind(user_id)
            .fetch_all(executor)
            .await?)
    }

    /// Bumps the project's issue counter and returns the next issue key.
    ///
    /// The counter only ever increases, so keys are strictly increasing per project and
    /// keys of deleted issues are never handed out again.
    pub(crate) async fn next_issue_key(&self, transaction: &mut Transaction<'_, Postgres>) -> Result<String> {
        let (counter,): (i32,) = sqlx::query_as("update projects set issue_counter = issue_counter + 1 where id = $1 returning issue_counter")
            .bind(self.id)
            .fetch_one(&mut *transaction)
            .await?;

        Ok(issue_key(self.key.as_str(), counter))
    }

    pub(crate) async fn issue_count<'e, E: Executor<'e, Database = Postgres>>(&self, executor: E) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("select count(*) from issues where project_id = $1")
            .bind(self.id)
            .fetch_one(executor)
            .await?;

        Ok(count)
    }
}

pub(crate) fn issue_key(project_key: &str, counter: i32) -> String {
    format!("{}-{}", project_key, counter)
}

impl FromRequest for Project {
    type Error = DevTrackError;
    type Future = Pin<Box<dyn Future<Output = Result<Project, Self::Error>>>>;

    fn from_request(req: &HttpRequest, payload: &mut Payload) -> Self::Future {
        let match_info = req.match_info();

        // If this method gets called from a handler that does not have project in the match info
        // it is safe to assume the programmer made a mistake, thus .expect_or_log is OK
        let project_id = match_info.get("project").expect_or_log("from_request called on Project despite not having project argument").to_owned();

        let web_user_future = WebUser::from_request(req, payload);

        match req.app_data::<Data<PgPool>>() {
            Some(db_pool) => {
                // Data<PgPool> is just a wrapper around `Arc<P>` so .clone() is cheap
                let db_pool = db_pool.clone();

                Box::pin(async move {
                    let web_user = web_user_future.await?;

                    extract_project_from_request(db_pool, web_user, project_id.as_str()).await.map_err(DevTrackError::from)
                })
            }
            None => Box::pin(async {
                Err(anyhow!("No PgPool in application data").into())
            })
        }
    }
}

async fn extract_project_from_request(db_pool: Data<PgPool>, web_user: WebUser, project_id: &str) -> Result<Project> {
    let user = web_user.into_user()?;

    let project_id = match project_id.parse::<i32>() {
        Ok(project_id) => project_id,
        Err(_) => die!(NOT_FOUND, "Project not found")
    };

    let mut transaction = db_pool.begin().await?;

    let project = Project::open(project_id, &mut transaction).await.ok_or_else(|| err!(NOT_FOUND, "Project not found"))?;

    // Private projects are hidden from non-members entirely, so failing access checks 404
    if !privilege::check_access(&project, &user, &mut transaction).await? {
        die!(NOT_FOUND, "Project not found");
    }

    transaction.commit().await?;

    Ok(project)
}

#[cfg(test)]
mod tests {
    use super::issue_key;

    #[test]
    fn issue_keys_join_project_key_and_counter() {
        assert_eq!(issue_key("AL", 1), "AL-1");
        assert_eq!(issue_key("PROJ", 17), "PROJ-17");
    }
}
