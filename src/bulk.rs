use crate::issue::{Issue, IssuePatch, IssuePriority, IssueStatus, IssueType};

use std::future::Future;

use anyhow::Result;
use futures::future::join_all;
use serde::{Deserialize, Serialize};

/// One field change applied to a whole selection of issues, e.g.
/// `{"field": "status", "value": "done"}`.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(tag = "field", content = "value", rename_all = "snake_case")]
pub(crate) enum BulkChange {
    Status(IssueStatus),
    Assignee(Option<i32>),
    Type(IssueType),
    Priority(IssuePriority)
}

impl BulkChange {
    pub(crate) fn into_patch(self) -> IssuePatch {
        let mut patch = IssuePatch::default();

        match self {
            BulkChange::Status(status) => patch.status = Some(status),
            BulkChange::Assignee(assignee_id) => patch.assignee_id = Some(assignee_id),
            BulkChange::Type(issue_type) => patch.issue_type = Some(issue_type),
            BulkChange::Priority(priority) => patch.priority = Some(priority)
        }

        patch
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct BulkOutcome {
    pub(crate) id: i32,
    pub(crate) ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) error: Option<String>
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct BulkReport {
    pub(crate) applied: usize,
    pub(crate) failed: usize,
    pub(crate) outcomes: Vec<BulkOutcome>,
    #[serde(skip_serializing)]
    pub(crate) issues: Vec<Issue>
}

/// Dispatches one update per selected issue, all concurrently, and waits for the whole
/// batch before reporting per-item outcomes.
///
/// The batch is not transactional: a failed item leaves every other success
/// committed, and the report lists the mixed result per item.
pub(crate) async fn bulk_apply<F, Fut>(issue_ids: &[i32], apply: F) -> BulkReport
    where F: Fn(i32) -> Fut,
          Fut: Future<Output = Result<Issue>>
{
    let results = join_all(issue_ids.iter().map(|&id| apply(id))).await;

    let mut report = BulkReport {
        applied: 0,
        failed: 0,
        outcomes: Vec::with_capacity(issue_ids.len()),
        issues: Vec::new()
    };

    for (&id, result) in issue_ids.iter().zip(results) {
        match result {
            Ok(issue) => {
                report.applied += 1;
                report.issues.push(issue);
                report.outcomes.push(BulkOutcome {
                    id,
                    ok: true,
                    error: None
                });
            }
            Err(err) => {
                report.failed += 1;
                report.outcomes.push(BulkOutcome {
                    id,
                    ok: false,
                    error: Some(err.to_string())
                });
            }
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    use anyhow::anyhow;
    use chrono::{TimeZone, Utc};

    fn test_issue(id: i32) -> Issue {
        Issue {
            id,
            project_id: 1,
            key: format!("AL-{}", id),
            title: "Issue".to_owned(),
            description: None,
            issue_type: IssueType::Task,
            priority: IssuePriority::Medium,
            status: IssueStatus::Todo,
            reporter_id: 1,
            assignee_id: None,
            sprint_id: None,
            parent_id: None,
            story_points: None,
            due_date: None,
            created_at: Utc.timestamp(1_640_995_200, 0),
            updated_at: Utc.timestamp(1_640_995_200, 0)
        }
    }

    #[actix_rt::test]
    async fn one_update_is_dispatched_per_selected_issue() {
        let calls = AtomicUsize::new(0);

        let report = bulk_apply(&[1, 2, 3, 4], |id| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { Ok(test_issue(id)) }
        }).await;

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(report.applied, 4);
        assert_eq!(report.failed, 0);
        assert_eq!(report.issues.len(), 4);
    }

    #[actix_rt::test]
    async fn partial_failures_leave_the_other_successes_committed() {
        let report = bulk_apply(&[1, 2, 3], |id| {
            async move {
                if id == 2 {
                    Err(anyhow!("update failed"))
                } else {
                    Ok(test_issue(id))
                }
            }
        }).await;

        assert_eq!(report.applied, 2);
        assert_eq!(report.failed, 1);

        // Per-item outcomes surface exactly which item failed
        assert!(report.outcomes[0].ok);
        assert!(!report.outcomes[1].ok);
        assert!(report.outcomes[2].ok);
        assert_eq!(report.outcomes[1].error.as_deref(), Some("update failed"));

        // The successes are still part of the result set, the batch is not rolled back
        assert_eq!(report.issues.iter().map(|issue| issue.id).collect::<Vec<_>>(), vec![1, 3]);
    }

    #[test]
    fn bulk_changes_convert_to_single_field_patches() {
        let patch = BulkChange::Status(IssueStatus::Done).into_patch();
        assert_eq!(patch.status, Some(IssueStatus::Done));
        assert!(patch.title.is_none() && patch.assignee_id.is_none());

        let patch = BulkChange::Assignee(None).into_patch();
        assert_eq!(patch.assignee_id, Some(None)); // explicit unassign

        let json = r#"{"field": "priority", "value": "high"}"#;
        let change: BulkChange = serde_json::from_str(json).unwrap();
        let patch = change.into_patch();
        assert_eq!(patch.priority, Some(IssuePriority::High));
    }
}
