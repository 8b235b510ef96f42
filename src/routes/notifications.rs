use crate::error::DevTrackError;
use crate::notification;
use crate::user::WebUser;

use actix_web::web::ServiceConfig;
use actix_web::{web, HttpResponse};
use sqlx::PgPool;

pub(crate) fn init(config: &mut ServiceConfig) {
    config.route("/api/notifications", web::get().to(list_notifications));
    config.route("/api/notifications/read_all", web::post().to(read_all));
    config.route("/api/notifications/{id}/read", web::post().to(read_one));
}

/// The requesting user's persisted feed, newest first. Events that happened while the
/// user was disconnected from the realtime channel show up here.
async fn list_notifications(web_user: WebUser, db_pool: web::Data<PgPool>) -> Result<HttpResponse, DevTrackError> {
    let user = web_user.into_user()?;

    let mut transaction = db_pool.begin().await?;
    let notifications = notification::for_user(user.id, &mut transaction).await?;
    transaction.commit().await?;

    Ok(HttpResponse::Ok().json(notifications))
}

async fn read_one(web_user: WebUser, path: web::Path<i32>, db_pool: web::Data<PgPool>) -> Result<HttpResponse, DevTrackError> {
    let user = web_user.into_user()?;

    let mut transaction = db_pool.begin().await?;
    notification::mark_read(path.into_inner(), user.id, &mut transaction).await?;
    transaction.commit().await?;

    Ok(HttpResponse::NoContent().finish())
}

async fn read_all(web_user: WebUser, db_pool: web::Data<PgPool>) -> Result<HttpResponse, DevTrackError> {
    let user = web_user.into_user()?;

    let mut transaction = db_pool.begin().await?;
    notification::mark_all_read(user.id, &mut transaction).await?;
    transaction.commit().await?;

    Ok(HttpResponse::NoContent().finish())
}
