use crate::error::DevTrackError;
use crate::timelog::TimeLog;
use crate::user::{UserRef, WebUser};

use actix_web::web::ServiceConfig;
use actix_web::{web, HttpResponse};
use anyhow::Result;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, Transaction};

pub(crate) fn init(config: &mut ServiceConfig) {
    config.service(
        web::resource("/api/issues/{id}/timelogs")
            .route(web::get().to(list_timelogs))
            .route(web::post().to(add_timelog))
    );
    config.route("/api/timelogs/{id}", web::delete().to(delete_timelog));
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TimeLogDetail {
    #[serde(flatten)]
    timelog: TimeLog,
    user: Option<UserRef>
}

async fn with_users(timelogs: Vec<TimeLog>, transaction: &mut Transaction<'_, Postgres>) -> Result<Vec<TimeLogDetail>> {
    let mut result = Vec::with_capacity(timelogs.len());

    for timelog in timelogs {
        let user = UserRef::find(timelog.user_id, &mut *transaction).await?;

        result.push(TimeLogDetail {
            timelog,
            user
        });
    }

    Ok(result)
}

async fn list_timelogs(web_user: WebUser, path: web::Path<i32>, db_pool: web::Data<PgPool>) -> Result<HttpResponse, DevTrackError> {
    let user = web_user.into_user()?;

    let mut transaction = db_pool.begin().await?;

    let (issue, _) = super::issues::load_issue(&user, path.into_inner(), &mut transaction).await?;

    let timelogs = TimeLog::for_issue(issue.id, &mut transaction).await?;
    let timelogs = with_users(timelogs, &mut transaction).await?;

    transaction.commit().await?;

    Ok(HttpResponse::Ok().json(timelogs))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TimeLogRequest {
    time_spent: i32,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    spent_date: Option<NaiveDate>
}

async fn add_timelog(web_user: WebUser, path: web::Path<i32>, body: web::Json<TimeLogRequest>, db_pool: web::Data<PgPool>) -> Result<HttpResponse, DevTrackError> {
    let user = web_user.into_user()?;

    let mut transaction = db_pool.begin().await?;

    let (issue, _) = super::issues::load_issue(&user, path.into_inner(), &mut transaction).await?;

    let timelog = TimeLog::create(issue.id, &user, body.time_spent, body.description.as_deref(), body.spent_date, &mut transaction).await?;

    transaction.commit().await?;

    Ok(HttpResponse::Created().json(timelog))
}

async fn delete_timelog(web_user: WebUser, path: web::Path<i32>, db_pool: web::Data<PgPool>) -> Result<HttpResponse, DevTrackError> {
    web_user.into_user()?;

    let mut transaction = db_pool.begin().await?;
    TimeLog::delete(path.into_inner(), &mut transaction).await?;
    transaction.commit().await?;

    Ok(HttpResponse::NoContent().finish())
}
