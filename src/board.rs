use crate::issue::{Issue, IssuePriority, IssueStatus, IssueType};
use crate::prelude::parse_enum;
use crate::err;

use anyhow::Result;
use itertools::Itertools;
use qstring::QString;
use serde::de::DeserializeOwned;
use serde::Serialize;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub(crate) enum Filter<T> {
    All,
    Is(T)
}

impl<T> Default for Filter<T> {
    fn default() -> Self {
        Filter::All
    }
}

/// The assignee filter has a third state: the empty string means "unassigned only".
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub(crate) enum AssigneeFilter {
    All,
    Unassigned,
    Is(i32)
}

impl Default for AssigneeFilter {
    fn default() -> Self {
        AssigneeFilter::All
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct BoardFilters {
    pub(crate) search: String,
    pub(crate) status: Filter<IssueStatus>,
    pub(crate) priority: Filter<IssuePriority>,
    pub(crate) assignee: AssigneeFilter,
    pub(crate) issue_type: Filter<IssueType>
}

impl BoardFilters {
    /// Parses board filters from a query string, e.g.
    /// `?search=login&status=done&assignee=&type=bug`.
    pub(crate) fn from_query(query: &QString) -> Result<BoardFilters> {
        let mut filters = BoardFilters::default();

        if let Some(search) = query.get("search") {
            filters.search = search.to_owned();
        }

        filters.status = parse_filter(query.get("status"))?;
        filters.priority = parse_filter(query.get("priority"))?;
        filters.issue_type = parse_filter(query.get("type"))?;

        filters.assignee = match query.get("assignee") {
            None | Some("all") => AssigneeFilter::All,
            Some("") => AssigneeFilter::Unassigned,
            Some(value) => AssigneeFilter::Is(value.parse::<i32>().map_err(|_| err!(BAD_REQUEST, "Invalid assignee filter"))?)
        };

        Ok(filters)
    }

    /// An issue stays on the board iff it passes every active filter.
    pub(crate) fn matches(&self, issue: &Issue) -> bool {
        if !self.search.is_empty() {
            let needle = self.search.to_lowercase();
            let title_match = issue.title.to_lowercase().contains(needle.as_str());
            let description_match = issue.description.as_ref().map_or(false, |description| description.to_lowercase().contains(needle.as_str()));

            if !title_match && !description_match {
                return false;
            }
        }

        if let Filter::Is(status) = self.status {
            if issue.status != status {
                return false;
            }
        }

        if let Filter::Is(priority) = self.priority {
            if issue.priority != priority {
                return false;
            }
        }

        match self.assignee {
            AssigneeFilter::All => {}
            AssigneeFilter::Unassigned => if issue.assignee_id.is_some() {
                return false;
            }
            AssigneeFilter::Is(user_id) => if issue.assignee_id != Some(user_id) {
                return false;
            }
        }

        if let Filter::Is(issue_type) = self.issue_type {
            if issue.issue_type != issue_type {
                return false;
            }
        }

        true
    }
}

fn parse_filter<T: DeserializeOwned>(value: Option<&str>) -> Result<Filter<T>> {
    match value {
        None | Some("all") | Some("") => Ok(Filter::All),
        Some(value) => parse_enum(value).map(Filter::Is)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct BoardColumn<'a> {
    pub(crate) status: IssueStatus,
    pub(crate) name: &'static str,
    pub(crate) issues: Vec<&'a Issue>
}

/// Derives the kanban column layout from the issue list: filter, then partition by
/// status into the fixed lanes. Pure and stateless, so calling it twice with the same
/// input yields the same board; empty lanes are always emitted.
pub(crate) fn project<'a>(issues: &'a [Issue], filters: &BoardFilters) -> Vec<BoardColumn<'a>> {
    let mut grouped = issues.iter()
        .filter(|issue| filters.matches(issue))
        .into_group_map_by(|issue| issue.status);

    IssueStatus::ALL.iter()
        .map(|&status| BoardColumn {
            status,
            name: status.column_name(),
            issues: grouped.remove(&status).unwrap_or_default()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::{TimeZone, Utc};

    fn issue(id: i32, title: &str, status: IssueStatus) -> Issue {
        Issue {
            id,
            project_id: 1,
            key: format!("AL-{}", id),
            title: title.to_owned(),
            description: None,
            issue_type: IssueType::Task,
            priority: IssuePriority::Medium,
            status,
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

    #[test]
    fn all_lanes_are_emitted_even_when_empty() {
        let columns = project(&[], &BoardFilters::default());

        assert_eq!(columns.len(), 5);
        assert!(columns.iter().all(|column| column.issues.is_empty()));
        assert_eq!(columns[0].status, IssueStatus::Backlog);
        assert_eq!(columns[4].status, IssueStatus::Done);
    }

    #[test]
    fn issues_are_partitioned_by_status_in_fixed_lane_order() {
        let issues = vec![
            issue(1, "a", IssueStatus::Done),
            issue(2, "b", IssueStatus::Todo),
            issue(3, "c", IssueStatus::Done)
        ];

        let columns = project(&issues, &BoardFilters::default());

        assert_eq!(columns[1].issues.len(), 1);
        assert_eq!(columns[4].issues.len(), 2);
        assert!(columns[0].issues.is_empty());
        assert!(columns[2].issues.is_empty());
        assert!(columns[3].issues.is_empty());
    }

    #[test]
    fn status_filter_empties_all_other_lanes() {
        // 3 of 10 issues are done; filtering on done must surface exactly those three
        let mut issues = Vec::new();

        for id in 1..=3 {
            issues.push(issue(id, "done issue", IssueStatus::Done));
        }

        for id in 4..=10 {
            issues.push(issue(id, "open issue", IssueStatus::InProgress));
        }

        let filters = BoardFilters {
            status: Filter::Is(IssueStatus::Done),
            ..BoardFilters::default()
        };

        let columns = project(&issues, &filters);

        let done = columns.iter().find(|column| column.status == IssueStatus::Done).unwrap();
        assert_eq!(done.issues.len(), 3);

        for column in columns.iter().filter(|column| column.status != IssueStatus::Done) {
            assert!(column.issues.is_empty());
        }
    }

    #[test]
    fn search_matches_title_and_description_case_insensitively() {
        let mut with_description = issue(1, "unrelated", IssueStatus::Todo);
        with_description.description = Some("Crash in LOGIN flow".to_owned());

        let issues = vec![with_description, issue(2, "Login button styling", IssueStatus::Todo), issue(3, "other", IssueStatus::Todo)];

        let filters = BoardFilters {
            search: "login".to_owned(),
            ..BoardFilters::default()
        };

        let columns = project(&issues, &filters);
        let todo = columns.iter().find(|column| column.status == IssueStatus::Todo).unwrap();

        assert_eq!(todo.issues.iter().map(|issue| issue.id).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn empty_assignee_filter_means_unassigned() {
        let mut assigned = issue(1, "a", IssueStatus::Todo);
        assigned.assignee_id = Some(7);

        let issues = vec![assigned, issue(2, "b", IssueStatus::Todo)];

        let unassigned_only = BoardFilters {
            assignee: AssigneeFilter::Unassigned,
            ..BoardFilters::default()
        };

        let columns = project(&issues, &unassigned_only);
        let todo = columns.iter().find(|column| column.status == IssueStatus::Todo).unwrap();
        assert_eq!(todo.issues.iter().map(|issue| issue.id).collect::<Vec<_>>(), vec![2]);

        let specific = BoardFilters {
            assignee: AssigneeFilter::Is(7),
            ..BoardFilters::default()
        };

        let columns = project(&issues, &specific);
        let todo = columns.iter().find(|column| column.status == IssueStatus::Todo).unwrap();
        assert_eq!(todo.issues.iter().map(|issue| issue.id).collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn combined_filters_intersect_independent_results() {
        let mut matching = issue(1, "fix login crash", IssueStatus::Done);
        matching.issue_type = IssueType::Bug;
        matching.priority = IssuePriority::High;

        let mut wrong_priority = issue(2, "fix login crash", IssueStatus::Done);
        wrong_priority.issue_type = IssueType::Bug;
        wrong_priority.priority = IssuePriority::Low;

        let mut wrong_status = issue(3, "fix login crash", IssueStatus::Todo);
        wrong_status.issue_type = IssueType::Bug;
        wrong_status.priority = IssuePriority::High;

        let issues = vec![matching, wrong_priority, wrong_status];

        let combined = BoardFilters {
            status: Filter::Is(IssueStatus::Done),
            priority: Filter::Is(IssuePriority::High),
            issue_type: Filter::Is(IssueType::Bug),
            ..BoardFilters::default()
        };

        // Intersecting each filter's result set independently must equal the combined run
        let combined_ids: Vec<i32> = issues.iter()
            .filter(|issue| combined.matches(issue))
            .map(|issue| issue.id)
            .collect();

        let status_only = BoardFilters { status: Filter::Is(IssueStatus::Done), ..BoardFilters::default() };
        let priority_only = BoardFilters { priority: Filter::Is(IssuePriority::High), ..BoardFilters::default() };
        let type_only = BoardFilters { issue_type: Filter::Is(IssueType::Bug), ..BoardFilters::default() };

        let intersected: Vec<i32> = issues.iter()
            .filter(|issue| status_only.matches(issue) && priority_only.matches(issue) && type_only.matches(issue))
            .map(|issue| issue.id)
            .collect();

        assert_eq!(combined_ids, vec![1]);
        assert_eq!(combined_ids, intersected);
    }

    #[test]
    fn projection_is_idempotent() {
        let issues = vec![issue(1, "a", IssueStatus::Todo), issue(2, "b", IssueStatus::Done)];
        let filters = BoardFilters {
            search: "a".to_owned(),
            ..BoardFilters::default()
        };

        let first = project(&issues, &filters);
        let second = project(&issues, &filters);

        assert_eq!(first.len(), second.len());

        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.status, b.status);
            assert_eq!(
                a.issues.iter().map(|issue| issue.id).collect::<Vec<_>>(),
                b.issues.iter().map(|issue| issue.id).collect::<Vec<_>>()
            );
        }
    }

    #[test]
    fn filters_parse_from_query_strings() {
        let query = QString::new(vec![("search", "login"), ("status", "in_progress"), ("assignee", ""), ("type", "bug"), ("priority", "all")]);

        let filters = BoardFilters::from_query(&query).unwrap();

        assert_eq!(filters.search, "login");
        assert_eq!(filters.status, Filter::Is(IssueStatus::InProgress));
        assert_eq!(filters.priority, Filter::All);
        assert_eq!(filters.assignee, AssigneeFilter::Unassigned);
        assert_eq!(filters.issue_type, Filter::Is(IssueType::Bug));

        assert!(BoardFilters::from_query(&QString::new(vec![("status", "not-a-status")])).is_err());
    }
}
