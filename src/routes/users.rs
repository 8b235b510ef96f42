use crate::error::DevTrackError;
use crate::user::{UserRef, WebUser};

use actix_web::web::ServiceConfig;
use actix_web::{web, HttpResponse};
use anyhow::Result;
use sqlx::PgPool;

pub(crate) fn init(config: &mut ServiceConfig) {
    config.route("/api/users", web::get().to(all_users));
}

/// Directory of all users, used by assignee pickers. Profile management lives in the
/// external identity service.
async fn all_users(web_user: WebUser, db_pool: web::Data<PgPool>) -> Result<HttpResponse, DevTrackError> {
    web_user.into_user()?;

    let mut transaction = db_pool.begin().await?;
    let users = UserRef::all(&mut transaction).await?;
    transaction.commit().await?;

    Ok(HttpResponse::Ok().json(users))
}
