use crate::error::DevTrackError;
use crate::issue::Issue;
use crate::prelude::HttpRequestExtensions;
use crate::privileges::privilege;
use crate::project::Project;
use crate::sprint::{NewSprint, Sprint, SprintPatch};
use crate::user::{User, WebUser};
use crate::{die, err};

use actix_web::web::ServiceConfig;
use actix_web::{web, HttpRequest, HttpResponse};
use anyhow::Result;
use log::info;
use serde::Serialize;
use sqlx::{PgPool, Postgres, Transaction};

pub(crate) fn init(config: &mut ServiceConfig) {
    config.service(
        web::resource("/api/sprints")
            .route(web::get().to(list_sprints))
            .route(web::post().to(create_sprint))
    );
    config.service(
        web::resource("/api/sprints/{id}")
            .route(web::get().to(get_sprint))
            .route(web::put().to(update_sprint))
            .route(web::patch().to(update_sprint))
            .route(web::delete().to(delete_sprint))
    );
}

async fn load_sprint(user: &User, sprint_id: i32, transaction: &mut Transaction<'_, Postgres>) -> Result<Sprint> {
    let sprint = Sprint::open(sprint_id, &mut *transaction).await.ok_or_else(|| err!(NOT_FOUND, "Sprint not found"))?;
    let project = Project::open(sprint.project_id, &mut *transaction).await.ok_or_else(|| err!(NOT_FOUND, "Sprint not found"))?;

    if !privilege::check_access(&project, user, &mut *transaction).await? {
        die!(NOT_FOUND, "Sprint not found");
    }

    Ok(sprint)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SprintSummary {
    #[serde(flatten)]
    sprint: Sprint,
    issue_count: i64
}

async fn list_sprints(web_user: WebUser, request: HttpRequest, db_pool: web::Data<PgPool>) -> Result<HttpResponse, DevTrackError> {
    let user = web_user.into_user()?;

    let mut transaction = db_pool.begin().await?;

    let sprints = match request.q_string().get("projectId") {
        Some(value) => {
            let project_id = match value.parse::<i32>() {
                Ok(project_id) => project_id,
                Err(_) => die!(BAD_REQUEST, "Invalid projectId")
            };

            let project = Project::open(project_id, &mut transaction).await.ok_or_else(|| err!(NOT_FOUND, "Project not found"))?;

            if !privilege::check_access(&project, &user, &mut transaction).await? {
                die!(NOT_FOUND, "Project not found");
            }

            Sprint::for_project(project.id, &mut transaction).await?
        }
        None => Sprint::visible_to(user.id, &mut transaction).await?
    };

    let mut summaries = Vec::with_capacity(sprints.len());

    for sprint in sprints {
        let issue_count = sprint.issue_count(&mut transaction).await?;

        summaries.push(SprintSummary {
            sprint,
            issue_count
        });
    }

    transaction.commit().await?;

    Ok(HttpResponse::Ok().json(summaries))
}

async fn create_sprint(web_user: WebUser, body: web::Json<NewSprint>, db_pool: web::Data<PgPool>) -> Result<HttpResponse, DevTrackError> {
    let user = web_user.into_user()?;

    let mut transaction = db_pool.begin().await?;

    let project = Project::open(body.project_id, &mut transaction).await.ok_or_else(|| err!(NOT_FOUND, "Project not found"))?;

    if !privilege::check_access(&project, &user, &mut transaction).await? {
        die!(NOT_FOUND, "Project not found");
    }

    let sprint = Sprint::create(&body, &mut transaction).await?;

    transaction.commit().await?;

    info!("{} created sprint {} (id {}) in project {}", user.username, sprint.name, sprint.id, project.key);

    Ok(HttpResponse::Created().json(sprint))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SprintDetail {
    #[serde(flatten)]
    sprint: Sprint,
    total_points: i64,
    completed_points: i64,
    issues: Vec<Issue>
}

async fn get_sprint(web_user: WebUser, path: web::Path<i32>, db_pool: web::Data<PgPool>) -> Result<HttpResponse, DevTrackError> {
    let user = web_user.into_user()?;

    let mut transaction = db_pool.begin().await?;

    let sprint = load_sprint(&user, path.into_inner(), &mut transaction).await?;

    let points = sprint.points(&mut transaction).await?;

    let issues: Vec<Issue> = sqlx::query_as::<_, Issue>("select * from issues where sprint_id = $1 order by created_at desc")
        .bind(sprint.id)
        .fetch_all(&mut transaction)
        .await?;

    transaction.commit().await?;

    Ok(HttpResponse::Ok().json(SprintDetail {
        sprint,
        total_points: points.total_points,
        completed_points: points.completed_points,
        issues
    }))
}

async fn update_sprint(web_user: WebUser, path: web::Path<i32>, body: web::Json<SprintPatch>, db_pool: web::Data<PgPool>) -> Result<HttpResponse, DevTrackError> {
    let user = web_user.into_user()?;

    let mut transaction = db_pool.begin().await?;

    let existing = load_sprint(&user, path.into_inner(), &mut transaction).await?;
    let sprint = Sprint::update(existing.id, &body, &mut transaction).await?;

    transaction.commit().await?;

    Ok(HttpResponse::Ok().json(sprint))
}

async fn delete_sprint(web_user: WebUser, path: web::Path<i32>, db_pool: web::Data<PgPool>) -> Result<HttpResponse, DevTrackError> {
    let user = web_user.into_user()?;

    let mut transaction = db_pool.begin().await?;

    let sprint = load_sprint(&user, path.into_inner(), &mut transaction).await?;
    Sprint::delete(sprint.id, &mut transaction).await?;

    transaction.commit().await?;

    Ok(HttpResponse::NoContent().finish())
}
