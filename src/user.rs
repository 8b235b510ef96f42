use crate::err;
use crate::error::DevTrackError;
use crate::prelude::HttpRequestExtensions;
use crate::session::Session;

use std::future::Future;
use std::pin::Pin;

use actix_web::dev::Payload;
use actix_web::web::Data;
use actix_web::{FromRequest, HttpRequest};
use anyhow::{anyhow, Result};
use derive_more::Display;
use serde::Serialize;
use sqlx::{Executor, FromRow, PgPool, Postgres};

#[derive(FromRow, Display, Debug, Clone, Serialize)]
#[display(fmt = "{}", username)]
#[serde(rename_all = "camelCase")]
pub(crate) struct User {
    pub(crate) id: i32,
    pub(crate) username: String,
    pub(crate) email: String,
    #[serde(skip_serializing)]
    pub(crate) active: bool
}

/// Reduced user representation embedded into issue details, comments and member lists.
#[derive(FromRow, Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct UserRef {
    pub(crate) id: i32,
    pub(crate) username: String
}

impl UserRef {
    pub(crate) async fn find<'e, E: Executor<'e, Database = Postgres>>(id: i32, executor: E) -> Result<Option<UserRef>> {
        let option: Option<UserRef> = sqlx::query_as::<_, UserRef>("select id, username from users where id = $1 limit 1")
            .bind(id)
            .fetch_optional(executor)
            .await?;

        Ok(option)
    }

    pub(crate) async fn all<'e, E: Executor<'e, Database = Postgres>>(executor: E) -> Result<Vec<UserRef>> {
        Ok(sqlx::query_as::<_, UserRef>("select id, username from users order by lower(username)")
            .fetch_all(executor)
            .await?)
    }
}

/// The requesting user, resolved from the `Authorization: Bearer` header.
/// Requests without a header resolve to [Anonymous](WebUser::Anonymous); requests with a
/// token that cannot be resolved to an active user fail with 401 during extraction.
#[derive(Debug)]
pub(crate) enum WebUser {
    Authenticated(User),
    Anonymous
}

impl WebUser {
    pub(crate) fn into_user(self) -> Result<User> {
        match self {
            WebUser::Authenticated(user) => Ok(user),
            WebUser::Anonymous => Err(err!(UNAUTHORIZED, "Authentication required"))
        }
    }
}

impl FromRequest for WebUser {
    type Error = DevTrackError;
    type Future = Pin<Box<dyn Future<Output = Result<WebUser, Self::Error>>>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let token = req.bearer_token().map(str::to_owned);

        match req.app_data::<Data<PgPool>>() {
            Some(db_pool) => {
                // Data<PgPool> is just a wrapper around `Arc<P>` so .clone() is cheap
                let db_pool = db_pool.clone();

                Box::pin(async move {
                    extract_web_user(&db_pool, token).await.map_err(DevTrackError::from)
                })
            }
            None => Box::pin(async {
                Err(anyhow!("No PgPool in application data").into())
            })
        }
    }
}

async fn extract_web_user(db_pool: &PgPool, token: Option<String>) -> Result<WebUser> {
    let token = match token {
        Some(token) => token,
        None => return Ok(WebUser::Anonymous)
    };

    let mut transaction = db_pool.begin().await?;

    let session = Session::from_token(token.as_str(), &mut transaction)
        .await?
        .ok_or_else(|| err!(UNAUTHORIZED, "Invalid token"))?;

    let user: Option<User> = sqlx::query_as::<_, User>("select * from users where id = $1 limit 1")
        .bind(session.user_id)
        .fetch_optional(&mut transaction)
        .await?;

    transaction.commit().await?;

    match user {
        Some(user) if user.active => Ok(WebUser::Authenticated(user)),
        _ => Err(err!(UNAUTHORIZED, "User not found or inactive"))
    }
}
