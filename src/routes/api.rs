use actix_web::web::ServiceConfig;
use actix_web::{web, HttpResponse};
use serde_json::json;

pub(crate) fn init(config: &mut ServiceConfig) {
    config.route("/api", web::get().to(api));
}

async fn api() -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "app": "DevTrack",
        "version": env!("CARGO_PKG_VERSION")
    }))
}
