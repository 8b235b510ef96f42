use derive_more::Display;
use serde::{Deserialize, Serialize};
use sqlx::Type;

#[derive(Type, Display, Debug, Clone, Copy, Ord, PartialOrd, Eq, PartialEq, Deserialize, Serialize)]
#[sqlx(type_name = "project_visibility", rename_all = "lowercase")]
#[serde(rename_all(serialize = "lowercase", deserialize = "lowercase"))]
pub(crate) enum ProjectVisibility {
    Public,
    Private
}

impl Default for ProjectVisibility {
    fn default() -> Self {
        ProjectVisibility::Public
    }
}
