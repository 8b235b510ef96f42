use crate::board::{self, BoardFilters};
use crate::error::DevTrackError;
use crate::issue::{Issue, IssueQuery};
use crate::prelude::{parse_enum, HttpRequestExtensions};
use crate::privileges::project_visibility::ProjectVisibility;
use crate::project::{Project, ProjectRole};
use crate::sse::{Broadcaster, Channel};
use crate::user::{UserRef, WebUser};
use crate::workflow::{self, WorkflowState};
use crate::{die, err, workspace};

use actix_web::http::header::CACHE_CONTROL;
use actix_web::web::ServiceConfig;
use actix_web::{web, HttpRequest, HttpResponse};
use anyhow::Result;
use futures_locks::RwLock;
use log::info;
use once_cell::sync::Lazy;
use qstring::QString;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};

static KEY_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new("^[A-Za-z][A-Za-z0-9]{1,9}$").unwrap());

pub(crate) fn init(config: &mut ServiceConfig) {
    config.service(
        web::resource("/api/projects")
            .route(web::get().to(list_projects))
            .route(web::post().to(create_project))
    );
    config.route("/api/projects/{project}", web::get().to(get_project));
    config.route("/api/projects/{project}/issues", web::get().to(project_issues));
    config.route("/api/projects/{project}/board", web::get().to(project_board));
    config.route("/api/projects/{project}/events", web::get().to(project_events));
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ProjectSummary {
    #[serde(flatten)]
    project: Project,
    issue_count: i64,
    lead: Option<UserRef>
}

async fn list_projects(web_user: WebUser, db_pool: web::Data<PgPool>) -> Result<HttpResponse, DevTrackError> {
    let user = web_user.into_user()?;

    let mut transaction = db_pool.begin().await?;

    let projects = Project::visible_to(user.id, &mut transaction).await?;
    let mut summaries = Vec::with_capacity(projects.len());

    for project in projects {
        let issue_count = project.issue_count(&mut transaction).await?;

        let lead = match project.lead_id {
            Some(lead_id) => UserRef::find(lead_id, &mut transaction).await?,
            None => None
        };

        summaries.push(ProjectSummary {
            project,
            issue_count,
            lead
        });
    }

    transaction.commit().await?;

    Ok(HttpResponse::Ok().json(summaries))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateProjectRequest {
    name: String,
    key: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    visibility: ProjectVisibility,
    workspace_id: i32
}

async fn create_project(web_user: WebUser, body: web::Json<CreateProjectRequest>, db_pool: web::Data<PgPool>) -> Result<HttpResponse, DevTrackError> {
    let user = web_user.into_user()?;

    if body.name.trim().is_empty() {
        die!(BAD_REQUEST, "Name is required");
    }

    if !KEY_REGEX.is_match(body.key.as_str()) {
        die!(BAD_REQUEST, "Key must be 2-10 alphanumeric characters starting with a letter");
    }

    let mut transaction = db_pool.begin().await?;

    if !workspace::is_member(body.workspace_id, user.id, &mut transaction).await? {
        die!(FORBIDDEN, "Access denied");
    }

    let workflow_id = workflow::create_default(&mut transaction).await?;

    let project: Project = sqlx::query_as::<_, Project>(
        "insert into projects (workspace_id, workflow_id, lead_id, name, key, description, visibility) \
        values ($1, $2, $3, $4, $5, $6, $7) returning *"
    )
        .bind(body.workspace_id)
        .bind(workflow_id)
        .bind(user.id)
        .bind(body.name.trim())
        .bind(body.key.to_uppercase())
        .bind(body.description.clone())
        .bind(body.visibility)
        .fetch_one(&mut transaction)
        .await?;

    sqlx::query("insert into project_members (project_id, user_id, role) values ($1, $2, 'lead')")
        .bind(project.id)
        .bind(user.id)
        .execute(&mut transaction)
        .await?;

    transaction.commit().await?;

    info!("{} created project {} (id {})", user.username, project.key, project.id);

    Ok(HttpResponse::Created().json(project))
}

#[derive(FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProjectMember {
    id: i32,
    username: String,
    role: ProjectRole
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ProjectDetail {
    #[serde(flatten)]
    project: Project,
    states: Vec<WorkflowState>,
    members: Vec<ProjectMember>,
    lead: Option<UserRef>
}

async fn get_project(project: Project, db_pool: web::Data<PgPool>) -> Result<HttpResponse, DevTrackError> {
    let mut transaction = db_pool.begin().await?;

    let states = workflow::states(project.workflow_id, &mut transaction).await?;

    let members: Vec<ProjectMember> = sqlx::query_as::<_, ProjectMember>(
        "select users.id, users.username, project_members.role from users \
        join project_members on users.id = project_members.user_id \
        where project_members.project_id = $1 order by lower(users.username)"
    )
        .bind(project.id)
        .fetch_all(&mut transaction)
        .await?;

    let lead = match project.lead_id {
        Some(lead_id) => UserRef::find(lead_id, &mut transaction).await?,
        None => None
    };

    transaction.commit().await?;

    Ok(HttpResponse::Ok().json(ProjectDetail {
        project,
        states,
        members,
        lead
    }))
}

fn issue_query(query: &QString) -> Result<IssueQuery> {
    let mut result = IssueQuery::default();

    if let Some(status) = query.get("status") {
        result.status = Some(parse_enum(status)?);
    }

    if let Some(assignee) = query.get("assignee") {
        result.assignee_id = Some(assignee.parse::<i32>().map_err(|_| err!(BAD_REQUEST, "Invalid assignee filter"))?);
    }

    if let Some(issue_type) = query.get("type") {
        result.issue_type = Some(parse_enum(issue_type)?);
    }

    if let Some(priority) = query.get("priority") {
        result.priority = Some(parse_enum(priority)?);
    }

    Ok(result)
}

async fn project_issues(project: Project, request: HttpRequest, db_pool: web::Data<PgPool>) -> Result<HttpResponse, DevTrackError> {
    let query = issue_query(&request.q_string())?;

    let mut transaction = db_pool.begin().await?;
    let issues = Issue::list_for_project(project.id, &query, &mut transaction).await?;
    transaction.commit().await?;

    Ok(HttpResponse::Ok().json(issues))
}

/// Server-side rendition of the kanban projection: the same pure function the client
/// synchronization layer runs locally, applied to the project's full issue list.
async fn project_board(project: Project, request: HttpRequest, db_pool: web::Data<PgPool>) -> Result<HttpResponse, DevTrackError> {
    let filters = BoardFilters::from_query(&request.q_string())?;

    let mut transaction = db_pool.begin().await?;
    let issues = Issue::list_for_project(project.id, &IssueQuery::default(), &mut transaction).await?;
    transaction.commit().await?;

    let columns = board::project(&issues, &filters);

    Ok(HttpResponse::Ok().json(columns))
}

/// Joins the project's realtime channel. Access was already checked by the [Project]
/// extractor, so only project members (or anyone, for public projects) can subscribe.
async fn project_events(project: Project, broadcaster: web::Data<RwLock<Broadcaster>>) -> Result<HttpResponse, DevTrackError> {
    let client = broadcaster.write().await.new_client(Channel::Project(project.id)).await?;

    Ok(HttpResponse::Ok()
        .content_type("text/event-stream")
        .insert_header((CACHE_CONTROL, "no-cache"))
        .streaming(client))
}
