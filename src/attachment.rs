use anyhow::Result;
use chrono::serde::ts_seconds;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Executor, FromRow, Postgres};

/// Attachment metadata. Upload and blob storage happen in the external file service,
/// which writes these rows; DevTrack lists them on the issue detail and relies on the
/// cascade when an issue is deleted.
#[derive(FromRow, Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Attachment {
    pub(crate) id: i32,
    pub(crate) issue_id: i32,
    pub(crate) uploader_id: i32,
    pub(crate) file_name: String,
    pub(crate) url: String,
    #[serde(with = "ts_seconds")]
    pub(crate) created_at: DateTime<Utc>
}

impl Attachment {
    pub(crate) async fn for_issue<'e, E: Executor<'e, Database = Postgres>>(issue_id: i32, executor: E) -> Result<Vec<Attachment>> {
        Ok(sqlx::query_as::<_, Attachment>("select * from attachments where issue_id = $1 order by created_at desc")
            .bind(issue_id)
            .fetch_all(executor)
            .await?)
    }
}
