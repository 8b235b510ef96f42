use crate::{die, err};

use anyhow::Result;
use chrono::serde::ts_seconds;
use chrono::{DateTime, Utc};
use derive_more::Display;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlx::{Executor, FromRow, Postgres, Transaction};

static COLOR_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new("^#[0-9a-fA-F]{6}$").unwrap());

#[derive(FromRow, Display, Debug, Clone, Deserialize, Serialize)]
#[display(fmt = "{}", name)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Label {
    pub(crate) id: i32,
    pub(crate) project_id: Option<i32>,
    pub(crate) name: String,
    pub(crate) color: String,
    #[serde(with = "ts_seconds")]
    pub(crate) created_at: DateTime<Utc>
}

pub(crate) fn validate_color(input: &str) -> Result<()> {
    if !COLOR_REGEX.is_match(input) {
        die!(BAD_REQUEST, "Color must be a hex value like #1f6feb");
    }

    Ok(())
}

impl Label {
    pub(crate) async fn create(name: &str, color: &str, project_id: Option<i32>, transaction: &mut Transaction<'_, Postgres>) -> Result<Label> {
        if name.trim().is_empty() {
            die!(BAD_REQUEST, "Name is required");
        }

        validate_color(color)?;

        Ok(sqlx::query_as::<_, Label>("insert into labels (name, color, project_id) values ($1, $2, $3) returning *")
            .bind(name.trim())
            .bind(color)
            .bind(project_id)
            .fetch_one(&mut *transaction)
            .await?)
    }

    pub(crate) async fn delete(label_id: i32, transaction: &mut Transaction<'_, Postgres>) -> Result<()> {
        sqlx::query_as::<_, (i32,)>("delete from labels where id = $1 returning id")
            .bind(label_id)
            .fetch_optional(&mut *transaction)
            .await?
            .ok_or_else(|| err!(NOT_FOUND, "Label not found"))?;

        Ok(())
    }

    pub(crate) async fn for_project<'e, E: Executor<'e, Database = Postgres>>(project_id: i32, executor: E) -> Result<Vec<Label>> {
        Ok(sqlx::query_as::<_, Label>("select * from labels where project_id = $1 order by created_at desc")
            .bind(project_id)
            .fetch_all(executor)
            .await?)
    }

    pub(crate) async fn for_issue<'e, E: Executor<'e, Database = Postgres>>(issue_id: i32, executor: E) -> Result<Vec<Label>> {
        Ok(sqlx::query_as::<_, Label>(
            "select labels.* from labels join issue_labels on labels.id = issue_labels.label_id \
            where issue_labels.issue_id = $1 order by labels.name"
        )
            .bind(issue_id)
            .fetch_all(executor)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::validate_color;

    #[test]
    fn hex_colors_are_accepted() {
        assert!(validate_color("#1f6feb").is_ok());
        assert!(validate_color("#FF0000").is_ok());
    }

    #[test]
    fn malformed_colors_are_rejected() {
        assert!(validate_color("red").is_err());
        assert!(validate_color("#fff").is_err());
        assert!(validate_color("#12345g").is_err());
        assert!(validate_color("1f6feb").is_err());
    }
}
