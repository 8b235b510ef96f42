use crate::attachment::Attachment;
use crate::bulk::{self, BulkChange};
use crate::comment::Comment;
use crate::error::DevTrackError;
use crate::issue::{Issue, IssuePatch, NewIssue};
use crate::label::Label;
use crate::notification::{self, NotificationKind};
use crate::prelude::HttpRequestExtensions;
use crate::privileges::privilege;
use crate::project::Project;
use crate::sse::{Broadcaster, Channel, CommentEvent, EventKind, IssueDeletedEvent, IssueEvent};
use crate::user::{User, UserRef, WebUser};
use crate::{die, err};

use actix_web::web::ServiceConfig;
use actix_web::{web, HttpRequest, HttpResponse};
use anyhow::Result;
use futures_locks::RwLock;
use log::info;
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, Transaction};

pub(crate) fn init(config: &mut ServiceConfig) {
    config.service(
        web::resource("/api/issues")
            .route(web::get().to(list_issues))
            .route(web::post().to(create_issue))
    );
    config.route("/api/issues/bulk", web::post().to(bulk_update));
    config.service(
        web::resource("/api/issues/{id}")
            .route(web::get().to(get_issue))
            .route(web::put().to(update_issue))
            .route(web::patch().to(update_issue))
            .route(web::delete().to(delete_issue))
    );
    config.service(
        web::resource("/api/issues/{id}/comments")
            .route(web::get().to(list_comments))
            .route(web::post().to(add_comment))
    );
    config.route("/api/comments/{id}", web::delete().to(delete_comment));
}

/// Loads the issue and its project, hiding both behind a 404 when the user lacks
/// read access. The issue routes are keyed by issue id, so unlike the project routes
/// the access check cannot happen in an extractor.
pub(crate) async fn load_issue(user: &User, issue_id: i32, transaction: &mut Transaction<'_, Postgres>) -> Result<(Issue, Project)> {
    let issue = Issue::open(issue_id, &mut *transaction).await.ok_or_else(|| err!(NOT_FOUND, "Issue not found"))?;
    let project = Project::open(issue.project_id, &mut *transaction).await.ok_or_else(|| err!(NOT_FOUND, "Issue not found"))?;

    if !privilege::check_access(&project, user, &mut *transaction).await? {
        die!(NOT_FOUND, "Issue not found");
    }

    Ok((issue, project))
}

async fn create_issue(web_user: WebUser, body: web::Json<NewIssue>, db_pool: web::Data<PgPool>, broadcaster: web::Data<RwLock<Broadcaster>>) -> Result<HttpResponse, DevTrackError> {
    let user = web_user.into_user()?;

    let mut transaction = db_pool.begin().await?;

    let project = Project::open(body.project_id, &mut transaction).await.ok_or_else(|| err!(NOT_FOUND, "Project not found"))?;

    if !privilege::check_access(&project, &user, &mut transaction).await? {
        die!(NOT_FOUND, "Project not found");
    }

    let issue = Issue::create(&project, &user, &body, &mut transaction).await?;

    notification::notify_watchers(
        issue.id,
        user.id,
        NotificationKind::IssueCreated,
        project.id,
        format!("{} created {}", user.username, issue.key).as_str(),
        &mut transaction
    ).await?;

    transaction.commit().await?;

    broadcaster.read().await.send(Channel::Project(project.id), EventKind::IssueCreated, &IssueEvent {
        project_id: project.id,
        issue: issue.clone()
    });

    info!("{} created issue {} (id {}) in project {}", user.username, issue.key, issue.id, project.key);

    Ok(HttpResponse::Created().json(issue))
}

async fn list_issues(web_user: WebUser, request: HttpRequest, db_pool: web::Data<PgPool>) -> Result<HttpResponse, DevTrackError> {
    let user = web_user.into_user()?;

    let mut transaction = db_pool.begin().await?;

    let issues = match request.q_string().get("projectId") {
        Some(value) => {
            let project_id = match value.parse::<i32>() {
                Ok(project_id) => project_id,
                Err(_) => die!(BAD_REQUEST, "Invalid projectId")
            };

            let project = Project::open(project_id, &mut transaction).await.ok_or_else(|| err!(NOT_FOUND, "Project not found"))?;

            if !privilege::check_access(&project, &user, &mut transaction).await? {
                die!(NOT_FOUND, "Project not found");
            }

            Issue::list_for_project(project.id, &Default::default(), &mut transaction).await?
        }
        None => Issue::visible_to(user.id, &mut transaction).await?
    };

    transaction.commit().await?;

    Ok(HttpResponse::Ok().json(issues))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct IssueDetail {
    #[serde(flatten)]
    issue: Issue,
    assignee: Option<UserRef>,
    reporter: Option<UserRef>,
    labels: Vec<Label>,
    comments: Vec<CommentDetail>,
    attachments: Vec<Attachment>,
    watchers: Vec<UserRef>
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CommentDetail {
    #[serde(flatten)]
    comment: Comment,
    author: Option<UserRef>
}

async fn comments_with_authors(issue_id: i32, transaction: &mut Transaction<'_, Postgres>) -> Result<Vec<CommentDetail>> {
    let comments = Comment::for_issue(issue_id, &mut *transaction).await?;
    let mut result = Vec::with_capacity(comments.len());

    for comment in comments {
        let author = UserRef::find(comment.author_id, &mut *transaction).await?;

        result.push(CommentDetail {
            comment,
            author
        });
    }

    Ok(result)
}

async fn get_issue(web_user: WebUser, path: web::Path<i32>, db_pool: web::Data<PgPool>) -> Result<HttpResponse, DevTrackError> {
    let user = web_user.into_user()?;

    let mut transaction = db_pool.begin().await?;

    let (issue, _) = load_issue(&user, path.into_inner(), &mut transaction).await?;

    let assignee = match issue.assignee_id {
        Some(assignee_id) => UserRef::find(assignee_id, &mut transaction).await?,
        None => None
    };

    let reporter = UserRef::find(issue.reporter_id, &mut transaction).await?;
    let labels = Label::for_issue(issue.id, &mut transaction).await?;
    let comments = comments_with_authors(issue.id, &mut transaction).await?;
    let attachments = Attachment::for_issue(issue.id, &mut transaction).await?;

    let watchers: Vec<UserRef> = sqlx::query_as::<_, UserRef>(
        "select users.id, users.username from users \
        join issue_watchers on users.id = issue_watchers.user_id \
        where issue_watchers.issue_id = $1 order by lower(users.username)"
    )
        .bind(issue.id)
        .fetch_all(&mut transaction)
        .await?;

    transaction.commit().await?;

    Ok(HttpResponse::Ok().json(IssueDetail {
        issue,
        assignee,
        reporter,
        labels,
        comments,
        attachments,
        watchers
    }))
}

async fn update_issue(web_user: WebUser, path: web::Path<i32>, body: web::Json<IssuePatch>, db_pool: web::Data<PgPool>, broadcaster: web::Data<RwLock<Broadcaster>>) -> Result<HttpResponse, DevTrackError> {
    let user = web_user.into_user()?;

    let mut transaction = db_pool.begin().await?;

    let (existing, project) = load_issue(&user, path.into_inner(), &mut transaction).await?;

    let issue = Issue::update(existing.id, &body, &mut transaction).await?;

    notification::notify_watchers(
        issue.id,
        user.id,
        NotificationKind::IssueUpdated,
        project.id,
        format!("{} updated {}", user.username, issue.key).as_str(),
        &mut transaction
    ).await?;

    transaction.commit().await?;

    broadcaster.read().await.send(Channel::Project(project.id), EventKind::IssueUpdated, &IssueEvent {
        project_id: project.id,
        issue: issue.clone()
    });

    Ok(HttpResponse::Ok().json(issue))
}

async fn delete_issue(web_user: WebUser, path: web::Path<i32>, db_pool: web::Data<PgPool>, broadcaster: web::Data<RwLock<Broadcaster>>) -> Result<HttpResponse, DevTrackError> {
    let user = web_user.into_user()?;

    let mut transaction = db_pool.begin().await?;

    let (existing, project) = load_issue(&user, path.into_inner(), &mut transaction).await?;

    // Watchers must be read before the delete cascades their records away
    let watchers = notification::watchers(existing.id, &mut transaction).await?;

    let issue = Issue::delete(existing.id, &mut transaction).await?;

    notification::notify_users(
        &watchers,
        user.id,
        NotificationKind::IssueDeleted,
        project.id,
        None,
        format!("{} deleted {}", user.username, issue.key).as_str(),
        &mut transaction
    ).await?;

    transaction.commit().await?;

    broadcaster.read().await.send(Channel::Project(project.id), EventKind::IssueDeleted, &IssueDeletedEvent {
        project_id: project.id,
        issue_id: issue.id
    });

    info!("{} deleted issue {} (id {}) in project {}", user.username, issue.key, issue.id, project.key);

    Ok(HttpResponse::NoContent().finish())
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BulkRequest {
    issue_ids: Vec<i32>,
    #[serde(flatten)]
    change: BulkChange
}

async fn bulk_update(web_user: WebUser, body: web::Json<BulkRequest>, db_pool: web::Data<PgPool>, broadcaster: web::Data<RwLock<Broadcaster>>) -> Result<HttpResponse, DevTrackError> {
    let user = web_user.into_user()?;

    if body.issue_ids.is_empty() {
        die!(BAD_REQUEST, "No issues selected");
    }

    let patch = body.change.into_patch();

    let report = bulk::bulk_apply(&body.issue_ids, |issue_id| {
        let db_pool = db_pool.clone();
        let patch = patch.clone();
        let user = user.clone();

        async move {
            let mut transaction = db_pool.begin().await?;

            let (existing, _) = load_issue(&user, issue_id, &mut transaction).await?;
            let issue = Issue::update(existing.id, &patch, &mut transaction).await?;

            notification::notify_watchers(
                issue.id,
                user.id,
                NotificationKind::IssueUpdated,
                issue.project_id,
                format!("{} updated {}", user.username, issue.key).as_str(),
                &mut transaction
            ).await?;

            transaction.commit().await?;

            Ok(issue)
        }
    }).await;

    for issue in &report.issues {
        broadcaster.read().await.send(Channel::Project(issue.project_id), EventKind::IssueUpdated, &IssueEvent {
            project_id: issue.project_id,
            issue: issue.clone()
        });
    }

    info!("{} bulk-updated {} issues ({} failed)", user.username, report.applied, report.failed);

    Ok(HttpResponse::Ok().json(report))
}

#[derive(Deserialize)]
struct CommentRequest {
    content: String
}

async fn add_comment(web_user: WebUser, path: web::Path<i32>, body: web::Json<CommentRequest>, db_pool: web::Data<PgPool>, broadcaster: web::Data<RwLock<Broadcaster>>) -> Result<HttpResponse, DevTrackError> {
    let user = web_user.into_user()?;

    let mut transaction = db_pool.begin().await?;

    let (issue, project) = load_issue(&user, path.into_inner(), &mut transaction).await?;

    let comment = Comment::create(issue.id, &user, body.content.as_str(), &mut transaction).await?;

    notification::notify_watchers(
        issue.id,
        user.id,
        NotificationKind::CommentAdded,
        project.id,
        format!("{} commented on {}", user.username, issue.key).as_str(),
        &mut transaction
    ).await?;

    transaction.commit().await?;

    broadcaster.read().await.send(Channel::Project(project.id), EventKind::CommentAdded, &CommentEvent {
        project_id: project.id,
        issue_id: issue.id,
        comment: comment.clone()
    });

    Ok(HttpResponse::Created().json(comment))
}

async fn list_comments(web_user: WebUser, path: web::Path<i32>, db_pool: web::Data<PgPool>) -> Result<HttpResponse, DevTrackError> {
    let user = web_user.into_user()?;

    let mut transaction = db_pool.begin().await?;

    let (issue, _) = load_issue(&user, path.into_inner(), &mut transaction).await?;
    let comments = comments_with_authors(issue.id, &mut transaction).await?;

    transaction.commit().await?;

    Ok(HttpResponse::Ok().json(comments))
}

async fn delete_comment(web_user: WebUser, path: web::Path<i32>, db_pool: web::Data<PgPool>) -> Result<HttpResponse, DevTrackError> {
    let user = web_user.into_user()?;

    let mut transaction = db_pool.begin().await?;

    let comment = Comment::open(path.into_inner(), &mut transaction).await.ok_or_else(|| err!(NOT_FOUND, "Comment not found"))?;

    if comment.author_id != user.id {
        die!(FORBIDDEN, "Only the author can delete a comment");
    }

    comment.delete(&mut transaction).await?;

    transaction.commit().await?;

    Ok(HttpResponse::NoContent().finish())
}
