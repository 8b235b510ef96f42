use actix_web::web::ServiceConfig;

pub(crate) mod api;
pub(crate) mod issues;
pub(crate) mod labels;
pub(crate) mod not_found;
pub(crate) mod notifications;
pub(crate) mod projects;
pub(crate) mod sprints;
pub(crate) mod timelogs;
pub(crate) mod users;

pub(crate) fn init(config: &mut ServiceConfig) {
    api::init(config);
    issues::init(config);
    labels::init(config);
    notifications::init(config);
    projects::init(config);
    sprints::init(config);
    timelogs::init(config);
    users::init(config);
}
