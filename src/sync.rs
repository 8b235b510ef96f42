use crate::board::{self, BoardColumn, BoardFilters};
use crate::err;
use crate::issue::{Issue, IssueStatus};
use crate::sse::{CommentEvent, IssueDeletedEvent, IssueEvent};

use anyhow::Result;
use async_trait::async_trait;
use log::debug;

/// Transport the board uses to reach the persistence API. Injected, the
/// synchronization logic never talks to a concrete HTTP client.
#[async_trait(?Send)]
pub(crate) trait IssueFetcher {
    /// Full, un-paginated issue list for the project.
    async fn fetch_issues(&self, project_id: i32) -> Result<Vec<Issue>>;

    /// Persists a drag-and-drop column change and returns the server's copy.
    async fn update_status(&self, issue_id: i32, status: IssueStatus) -> Result<Issue>;
}

/// A realtime frame after routing, parsed from its event name and data payload.
#[derive(Debug)]
pub(crate) enum BoardEvent {
    IssueCreated(IssueEvent),
    IssueUpdated(IssueEvent),
    IssueDeleted(IssueDeletedEvent),
    CommentAdded(CommentEvent)
}

impl BoardEvent {
    /// Parses a received frame. Unknown event names (pings, the connected handshake)
    /// yield `None`.
    pub(crate) fn parse(event: &str, data: &str) -> Result<Option<BoardEvent>> {
        Ok(Some(match event {
            "issue_created" => BoardEvent::IssueCreated(serde_json::from_str(data)?),
            "issue_updated" => BoardEvent::IssueUpdated(serde_json::from_str(data)?),
            "issue_deleted" => BoardEvent::IssueDeleted(serde_json::from_str(data)?),
            "comment_added" => BoardEvent::CommentAdded(serde_json::from_str(data)?),
            _ => return Ok(None)
        }))
    }

    fn project_id(&self) -> i32 {
        match self {
            BoardEvent::IssueCreated(payload) | BoardEvent::IssueUpdated(payload) => payload.project_id,
            BoardEvent::IssueDeleted(payload) => payload.project_id,
            BoardEvent::CommentAdded(payload) => payload.project_id
        }
    }
}

/// One project's locally rendered board: the issue list plus the active filters,
/// reconciled against three input sources. The initial fetch replaces everything,
/// local drag-and-drop edits apply optimistically and roll back on failure, and
/// realtime events merge by id followed by a healing re-fetch.
pub(crate) struct BoardSync<F: IssueFetcher> {
    project_id: i32,
    fetcher: F,
    issues: Vec<Issue>,
    pub(crate) filters: BoardFilters
}

impl<F: IssueFetcher> BoardSync<F> {
    pub(crate) fn new(project_id: i32, fetcher: F) -> Self {
        BoardSync {
            project_id,
            fetcher,
            issues: Vec::new(),
            filters: BoardFilters::default()
        }
    }

    pub(crate) async fn load(&mut self) -> Result<()> {
        self.issues = self.fetcher.fetch_issues(self.project_id).await?;
        Ok(())
    }

    pub(crate) fn issues(&self) -> &[Issue] {
        &self.issues
    }

    /// Derives the current column layout with the same pure projection the server uses.
    pub(crate) fn board(&self) -> Vec<BoardColumn<'_>> {
        board::project(&self.issues, &self.filters)
    }

    /// Moves an issue to another column: the local copy is rewritten first so the board
    /// re-renders immediately, then the change is persisted. If persisting fails the
    /// optimistic rewrite is rolled back, so the view never silently diverges from
    /// server truth.
    pub(crate) async fn move_issue(&mut self, issue_id: i32, status: IssueStatus) -> Result<()> {
        let previous = {
            let issue = self.issues.iter_mut()
                .find(|issue| issue.id == issue_id)
                .ok_or_else(|| err!(NOT_FOUND, "Issue not found"))?;

            let previous = issue.status;
            issue.status = status;
            previous
        };

        match self.fetcher.update_status(issue_id, status).await {
            Ok(confirmed) => {
                self.merge(confirmed);
                Ok(())
            }
            Err(err) => {
                debug!("Rolling back optimistic move of issue {}: {}", issue_id, err);

                if let Some(issue) = self.issues.iter_mut().find(|issue| issue.id == issue_id) {
                    issue.status = previous;
                }

                Err(err)
            }
        }
    }

    /// Merges a realtime event into local state. Events for other projects are ignored;
    /// everything else merges by id and then triggers a full re-fetch. The merge alone
    /// would usually suffice, the re-fetch heals whatever a missed event (disconnect,
    /// dropped frame) may have left behind.
    pub(crate) async fn apply_event(&mut self, event: BoardEvent) -> Result<()> {
        if event.project_id() != self.project_id {
            return Ok(());
        }

        match event {
            BoardEvent::IssueCreated(payload) | BoardEvent::IssueUpdated(payload) => self.merge(payload.issue),
            BoardEvent::IssueDeleted(payload) => self.issues.retain(|issue| issue.id != payload.issue_id),
            BoardEvent::CommentAdded(_) => {}
        }

        self.load().await
    }

    fn merge(&mut self, incoming: Issue) {
        match self.issues.iter_mut().find(|issue| issue.id == incoming.id) {
            Some(existing) => *existing = incoming,
            None => self.issues.push(incoming)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::cell::{Cell, RefCell};

    use anyhow::anyhow;
    use chrono::{TimeZone, Utc};

    use crate::issue::{IssuePriority, IssueType};
    use crate::sse::EventKind;

    fn test_issue(id: i32, status: IssueStatus) -> Issue {
        Issue {
            id,
            project_id: 1,
            key: format!("AL-{}", id),
            title: "Issue".to_owned(),
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

    /// In-memory stand-in for the REST API.
    struct StubFetcher {
        server_issues: RefCell<Vec<Issue>>,
        fetches: Cell<usize>,
        fail_updates: Cell<bool>
    }

    impl StubFetcher {
        fn new(issues: Vec<Issue>) -> Self {
            StubFetcher {
                server_issues: RefCell::new(issues),
                fetches: Cell::new(0),
                fail_updates: Cell::new(false)
            }
        }
    }

    #[async_trait(?Send)]
    impl IssueFetcher for StubFetcher {
        async fn fetch_issues(&self, _project_id: i32) -> Result<Vec<Issue>> {
            self.fetches.set(self.fetches.get() + 1);
            Ok(self.server_issues.borrow().clone())
        }

        async fn update_status(&self, issue_id: i32, status: IssueStatus) -> Result<Issue> {
            if self.fail_updates.get() {
                return Err(anyhow!("persistence unavailable"));
            }

            let mut issues = self.server_issues.borrow_mut();
            let issue = issues.iter_mut().find(|issue| issue.id == issue_id).ok_or_else(|| anyhow!("no such issue"))?;
            issue.status = status;

            Ok(issue.clone())
        }
    }

    #[actix_rt::test]
    async fn successful_moves_keep_the_server_copy() {
        let fetcher = StubFetcher::new(vec![test_issue(1, IssueStatus::Todo)]);
        let mut sync = BoardSync::new(1, fetcher);

        sync.load().await.unwrap();
        sync.move_issue(1, IssueStatus::Done).await.unwrap();

        assert_eq!(sync.issues()[0].status, IssueStatus::Done);
        assert_eq!(sync.fetcher.server_issues.borrow()[0].status, IssueStatus::Done);
    }

    #[actix_rt::test]
    async fn failed_moves_are_rolled_back() {
        let fetcher = StubFetcher::new(vec![test_issue(1, IssueStatus::Todo)]);
        let mut sync = BoardSync::new(1, fetcher);

        sync.load().await.unwrap();
        sync.fetcher.fail_updates.set(true);

        assert!(sync.move_issue(1, IssueStatus::Done).await.is_err());

        // Local state matches the server again, the optimistic change did not stick
        assert_eq!(sync.issues()[0].status, IssueStatus::Todo);
        assert_eq!(sync.fetcher.server_issues.borrow()[0].status, IssueStatus::Todo);
    }

    #[actix_rt::test]
    async fn foreign_project_events_are_ignored() {
        let fetcher = StubFetcher::new(vec![test_issue(1, IssueStatus::Todo)]);
        let mut sync = BoardSync::new(1, fetcher);

        sync.load().await.unwrap();
        let fetches_before = sync.fetcher.fetches.get();

        let event = BoardEvent::IssueUpdated(IssueEvent {
            project_id: 99,
            issue: test_issue(1, IssueStatus::Done)
        });

        sync.apply_event(event).await.unwrap();

        assert_eq!(sync.issues()[0].status, IssueStatus::Todo);
        assert_eq!(sync.fetcher.fetches.get(), fetches_before); // no re-fetch either
    }

    #[actix_rt::test]
    async fn events_merge_and_trigger_a_healing_refetch() {
        // The server already knows about issue 2, but the client missed its created event
        let fetcher = StubFetcher::new(vec![test_issue(1, IssueStatus::Done), test_issue(2, IssueStatus::Todo)]);
        let mut sync = BoardSync::new(1, fetcher);

        sync.issues = vec![test_issue(1, IssueStatus::Todo)];

        let event = BoardEvent::IssueUpdated(IssueEvent {
            project_id: 1,
            issue: test_issue(1, IssueStatus::Done)
        });

        sync.apply_event(event).await.unwrap();

        // The merged update is in, and the re-fetch brought the missed issue back
        assert_eq!(sync.issues().len(), 2);
        assert_eq!(sync.issues().iter().find(|issue| issue.id == 1).unwrap().status, IssueStatus::Done);
    }

    #[actix_rt::test]
    async fn deletion_events_remove_the_issue() {
        let fetcher = StubFetcher::new(vec![test_issue(2, IssueStatus::Todo)]);
        let mut sync = BoardSync::new(1, fetcher);

        sync.issues = vec![test_issue(1, IssueStatus::Todo), test_issue(2, IssueStatus::Todo)];
        sync.fetcher.server_issues.borrow_mut().retain(|issue| issue.id != 1);

        let event = BoardEvent::IssueDeleted(IssueDeletedEvent {
            project_id: 1,
            issue_id: 1
        });

        sync.apply_event(event).await.unwrap();

        assert_eq!(sync.issues().iter().map(|issue| issue.id).collect::<Vec<_>>(), vec![2]);
    }

    #[test]
    fn frames_parse_back_into_the_events_the_server_emits() {
        let payload = serde_json::to_string(&IssueEvent {
            project_id: 1,
            issue: test_issue(1, IssueStatus::Todo)
        }).unwrap();

        let event = BoardEvent::parse(EventKind::IssueUpdated.to_string().as_str(), payload.as_str()).unwrap();
        assert!(matches!(event, Some(BoardEvent::IssueUpdated(_))));

        let unknown = BoardEvent::parse("ping", "pong!").unwrap();
        assert!(unknown.is_none());
    }
}
