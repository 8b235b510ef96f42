use std::fmt::{Debug, Display, Formatter, Result as FmtResult};
use std::sync::Arc;

use actix_web::error::ResponseError;
use actix_web::http::StatusCode;
use actix_web::HttpResponse;
use anyhow::Error as AnyhowError;
use log::error;
use serde_json::json;
use sqlx::postgres::PgDatabaseError;
use thiserror::Error;

#[derive(Error, Debug)]
pub(crate) enum DtErrors {
    #[error("{1}")]
    HttpError(u16, String)
}

/// Wraps any error that escapes a route handler and renders it as a JSON response.
/// [DtErrors] carries an explicit status code, database constraint violations are
/// re-mapped below, everything else is a 500.
pub(crate) struct DevTrackError {
    source: Arc<AnyhowError>
}

impl DevTrackError {
    fn message(&self) -> String {
        if let Some(e) = self.source.downcast_ref::<DtErrors>() {
            match e {
                DtErrors::HttpError(_, message) => message.clone()
            }
        } else if let Some(e) = self.source.downcast_ref::<sqlx::Error>() {
            match database_status_code(e) {
                StatusCode::CONFLICT => "A record with this information already exists".to_owned(),
                StatusCode::NOT_FOUND => "Referenced record not found".to_owned(),
                _ => internal_error_message(&self.source)
            }
        } else {
            internal_error_message(&self.source)
        }
    }
}

fn internal_error_message(source: &AnyhowError) -> String {
    if cfg!(debug_assertions) {
        format!("{}", source)
    } else {
        "Internal server error occurred".to_owned()
    }
}

fn database_status_code(error: &sqlx::Error) -> StatusCode {
    match error {
        sqlx::Error::RowNotFound => StatusCode::NOT_FOUND,
        sqlx::Error::Database(db_error) => {
            match db_error.downcast_ref::<PgDatabaseError>().code() {
                // 23505: unique constraint violation, 23503: foreign key violation
                "23505" => StatusCode::CONFLICT,
                "23503" => StatusCode::NOT_FOUND,
                _ => StatusCode::INTERNAL_SERVER_ERROR
            }
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR
    }
}

impl Display for DevTrackError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.source)
    }
}

impl Debug for DevTrackError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.source)
    }
}

impl<E: Into<AnyhowError>> From<E> for DevTrackError {
    fn from(error: E) -> Self {
        DevTrackError {
            source: Arc::new(error.into())
        }
    }
}

impl ResponseError for DevTrackError {
    fn status_code(&self) -> StatusCode {
        if let Some(e) = self.source.downcast_ref::<DtErrors>() {
            match e {
                DtErrors::HttpError(status_code, _) => StatusCode::from_u16(*status_code)
            }.unwrap_or(StatusCode::IM_A_TEAPOT) // A programmer passed an invalid status code
        } else if let Some(e) = self.source.downcast_ref::<sqlx::Error>() {
            database_status_code(e)
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status_code = self.status_code();

        if status_code.is_server_error() {
            error!("Error occurred while handling route: {}", self.source.root_cause());
        }

        HttpResponse::build(status_code).json(json!({
            "error": self.message()
        }))
    }
}

/// Holds an [anyhow Error](AnyhowError) in contexts which require a sized, owned error type
/// (`TryFrom` implementations for settings casts).
pub(crate) struct ErrorHolder(pub(crate) AnyhowError);

pub(crate) trait HoldsError {
    fn into_inner(self) -> AnyhowError;
}

impl HoldsError for ErrorHolder {
    fn into_inner(self) -> AnyhowError {
        self.0
    }
}

/// Builds an [anyhow Error](AnyhowError) carrying a HTTP status code and message.
/// The status code is a constant name from [StatusCode](actix_web::http::StatusCode).
#[macro_export]
macro_rules! err {
    ($status:ident, $message:expr) => {
        anyhow::Error::new($crate::error::DtErrors::HttpError(actix_web::http::StatusCode::$status.as_u16(), $message.to_string()))
    };
}

/// Fails the current function with a HTTP status code and message, see [err].
#[macro_export]
macro_rules! die {
    ($status:ident, $message:expr) => {
        return Err($crate::err!($status, $message).into())
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_errors_keep_their_status_code() {
        let error: DevTrackError = err!(CONFLICT, "Key already in use").into();

        assert_eq!(error.status_code(), StatusCode::CONFLICT);
        assert_eq!(error.message(), "Key already in use");
    }

    #[test]
    fn unknown_errors_become_internal_server_errors() {
        let error: DevTrackError = anyhow::anyhow!("database exploded").into();

        assert_eq!(error.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
