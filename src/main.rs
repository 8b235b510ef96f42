#![forbid(unsafe_code)]

use std::env::VarError;
use std::error::Error;
use std::path::Path;
use std::time::Duration;
use std::{env, io};

use actix_web::dev::Service;
use actix_web::http::header::{HeaderValue, ACCESS_CONTROL_ALLOW_ORIGIN};
use actix_web::web::{to, Data};
use actix_web::{App, HttpServer};
use anyhow::{anyhow, Context, Result};
use fs_extra::dir;
use log::info;
use sqlx::postgres::PgPoolOptions;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use tracing_unwrap::ResultExt;

use crate::sse::Broadcaster;

mod attachment;
mod board;
mod bulk;
mod comment;
mod config;
mod error;
mod issue;
mod label;
mod notification;
mod prelude;
mod privileges;
mod project;
mod routes;
mod session;
mod sprint;
mod sse;
mod sync;
mod timelog;
mod user;
mod workflow;
mod workspace;

#[actix_rt::main]
async fn main() -> Result<()> {
    let log_guards = init_logger()?;

    let db_url = env::var("DATABASE_URL").context("Unable to read mandatory DATABASE_URL environment variable")?;

    let db_pool = PgPoolOptions::new()
        .max_connections(num_cpus::get() as u32)
        .connect_timeout(Duration::from_secs(10))
        .connect(db_url.as_str())
        .await?;

    let _log_guards = config::init(&db_pool, log_guards).await.context("Unable to initialize settings in database")?;

    let bind_address = env::var("BIND_ADDRESS").context("Unable to read mandatory BIND_ADDRESS environment variable")?;

    let (cors_origin, client_buffer) = {
        let mut transaction = db_pool.begin().await?;

        let origin = config::get_optional_setting::<String, _>("cors.allowed_origin", &mut transaction).await?;
        let buffer = config::get_optional_setting::<i32, _>("realtime.client_buffer", &mut transaction).await?;

        transaction.commit().await?;

        (
            origin.unwrap_or_else(|| "*".to_owned()),
            buffer.map(|buffer| buffer as usize).unwrap_or(sse::DEFAULT_CLIENT_BUFFER)
        )
    };

    let cors_header = HeaderValue::from_str(cors_origin.as_str()).context("Invalid `cors.allowed_origin` setting")?;
    let broadcaster = Broadcaster::new(client_buffer);

    let server = HttpServer::new(move || {
        let cors_header = cors_header.clone();

        App::new()
            .app_data(Data::new(db_pool.clone()))
            .app_data(broadcaster.clone())
            .wrap_fn(move |req, srv| {
                let cors_header = cors_header.clone();
                let fut = srv.call(req);

                async move {
                    let mut res = fut.await?;

                    if res.request().path().starts_with("/api") {
                        res.headers_mut().insert(ACCESS_CONTROL_ALLOW_ORIGIN, cors_header);
                    }

                    Ok(res)
                }
            })
            .default_service(to(routes::not_found::default_handler))
            .configure(routes::init)
    }).bind(bind_address.as_str()).context("Unable to bind HTTP server.")?;

    server.run().await.context("Unable to start HTTP server.")?;

    info!("Thank you and goodbye.");

    Ok(())
}

fn init_logger() -> Result<Vec<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|err| {
        let not_found = err.source()
            .map(|o| o.downcast_ref::<VarError>().map_or_else(|| false, |err| matches!(err, VarError::NotPresent)))
            .unwrap_or(false);

        if !not_found {
            eprintln!("Warning: Unable to parse `{}` environment variable, using default values: {}", EnvFilter::DEFAULT_ENV, err);
        }

        let level = if cfg!(debug_assertions) {
            LevelFilter::DEBUG
        } else {
            LevelFilter::INFO
        };

        EnvFilter::default()
            .add_directive(level.into())
            .add_directive("actix_server=info".parse().unwrap_or_log())
            .add_directive("hyper=info".parse().unwrap_or_log())
            .add_directive("sqlx=warn".parse().unwrap_or_log())
    });

    let mut results = Vec::<WorkerGuard>::with_capacity(1);

    // In debug mode we write pretty logs to stdout, in production json to a daily rolling file
    if cfg!(debug_assertions) {
        let (writer, guard) = tracing_appender::non_blocking(io::stdout());
        results.push(guard);

        FmtSubscriber::builder()
            .with_writer(writer)
            .with_env_filter(env_filter)
            .with_thread_ids(true)
            .try_init()
            .map_err(|err| anyhow!(err))?; // https://github.com/dtolnay/anyhow/issues/83
    } else {
        let logs_dir = Path::new("logs");

        if !logs_dir.exists() {
            dir::create_all(logs_dir, false)?;
        }

        let appender = rolling::daily("logs", "devtrack");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        results.push(guard);

        FmtSubscriber::builder()
            .with_writer(writer)
            .with_env_filter(env_filter)
            .with_thread_ids(true)
            .json()
            .try_init()
            .map_err(|err| anyhow!(err))?; // https://github.com/dtolnay/anyhow/issues/83
    }

    results.shrink_to_fit();
    Ok(results)
}
