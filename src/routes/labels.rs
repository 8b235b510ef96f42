use crate::error::DevTrackError;
use crate::label::Label;
use crate::privileges::privilege;
use crate::project::Project;
use crate::user::WebUser;
use crate::{die, err};

use actix_web::web::ServiceConfig;
use actix_web::{web, HttpResponse};
use log::info;
use serde::Deserialize;
use sqlx::PgPool;

pub(crate) fn init(config: &mut ServiceConfig) {
    config.route("/api/labels", web::post().to(create_label));
    // One resource, two id spaces: reads are keyed by project id, deletes by label id
    config.service(
        web::resource("/api/labels/{project}")
            .route(web::get().to(project_labels))
            .route(web::delete().to(delete_label))
    );
}

/// Labels of a project, access-checked through the [Project] extractor.
async fn project_labels(project: Project, db_pool: web::Data<PgPool>) -> Result<HttpResponse, DevTrackError> {
    let mut transaction = db_pool.begin().await?;
    let labels = Label::for_project(project.id, &mut transaction).await?;
    transaction.commit().await?;

    Ok(HttpResponse::Ok().json(labels))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateLabelRequest {
    name: String,
    color: String,
    #[serde(default)]
    project_id: Option<i32>
}

async fn create_label(web_user: WebUser, body: web::Json<CreateLabelRequest>, db_pool: web::Data<PgPool>) -> Result<HttpResponse, DevTrackError> {
    let user = web_user.into_user()?;

    let mut transaction = db_pool.begin().await?;

    if let Some(project_id) = body.project_id {
        let project = Project::open(project_id, &mut transaction).await.ok_or_else(|| err!(NOT_FOUND, "Project not found"))?;

        if !privilege::check_access(&project, &user, &mut transaction).await? {
            die!(NOT_FOUND, "Project not found");
        }
    }

    let label = Label::create(body.name.as_str(), body.color.as_str(), body.project_id, &mut transaction).await?;

    transaction.commit().await?;

    info!("{} created label {} (id {})", user.username, label.name, label.id);

    Ok(HttpResponse::Created().json(label))
}

async fn delete_label(web_user: WebUser, path: web::Path<i32>, db_pool: web::Data<PgPool>) -> Result<HttpResponse, DevTrackError> {
    web_user.into_user()?;

    let mut transaction = db_pool.begin().await?;
    Label::delete(path.into_inner(), &mut transaction).await?;
    transaction.commit().await?;

    Ok(HttpResponse::NoContent().finish())
}
