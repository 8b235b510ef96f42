//! # Server Sent Events
//! Per-project realtime channel. Clients join a channel by opening the project's event
//! stream and leave it by dropping the connection. Delivery is best effort and
//! at-most-once: there is no replay, clients re-fetch after reconnecting.

use crate::comment::Comment;
use crate::issue::Issue;

use std::collections::HashMap;
use std::convert::Infallible;
use std::fmt;
use std::fmt::{Debug, Formatter};
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use actix_web::web::{Bytes, Data};
use anyhow::Result;
use derive_more::{Deref, Display};
use futures::Stream;
use futures_locks::RwLock;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::sync::mpsc::{Receiver, Sender};
use tracing::instrument;

pub(crate) const DEFAULT_CLIENT_BUFFER: usize = 512;

/// Canonical channel naming: always `project:{id}`, for every event type.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash)]
pub(crate) enum Channel {
    #[display(fmt = "project:{}", _0)]
    Project(i32)
}

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
pub(crate) enum EventKind {
    #[display(fmt = "issue_created")]
    IssueCreated,
    #[display(fmt = "issue_updated")]
    IssueUpdated,
    #[display(fmt = "issue_deleted")]
    IssueDeleted,
    #[display(fmt = "comment_added")]
    CommentAdded
}

/// Payload for `issue_created` and `issue_updated`: the full mutated entity plus its
/// owning project id for routing.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct IssueEvent {
    pub(crate) project_id: i32,
    pub(crate) issue: Issue
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct IssueDeletedEvent {
    pub(crate) project_id: i32,
    pub(crate) issue_id: i32
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CommentEvent {
    pub(crate) project_id: i32,
    pub(crate) issue_id: i32,
    pub(crate) comment: Comment
}

pub(crate) struct Broadcaster {
    clients: Vec<(Sender<Bytes>, Channel)>,
    buffer_size: usize
}

impl Broadcaster {
    pub(crate) fn new(buffer_size: usize) -> Data<RwLock<Self>> {
        let data = Data::new(RwLock::new(Broadcaster {
            clients: Vec::new(),
            buffer_size
        }));

        spawn_ping_task(data.clone());

        data
    }

    #[cfg(test)]
    fn without_ping_task(buffer_size: usize) -> Broadcaster {
        Broadcaster {
            clients: Vec::new(),
            buffer_size
        }
    }

    #[instrument(skip(self))]
    pub(crate) async fn new_client(&mut self, channel: Channel) -> Result<SseClient> {
        let (tx, rx) = mpsc::channel(self.buffer_size);
        tx.send(Bytes::from("data: connected\n\n")).await?;

        debug!("New client subscribed to channel {}", channel);

        self.clients.push((tx, channel));
        Ok(SseClient(rx))
    }

    /// Serializes the payload and sends it to every client subscribed to the channel.
    /// Failures are swallowed: broadcasting is fire and forget relative to the request
    /// that triggered it.
    pub(crate) fn send<P: Serialize>(&self, channel: Channel, kind: EventKind, payload: &P) {
        let json = match serde_json::to_string(payload) {
            Ok(json) => json,
            Err(err) => {
                warn!("Unable to serialize {} event: {}", kind, err);
                return;
            }
        };

        let bytes = Bytes::from(format!("event: {}\ndata: {}\n\n", kind, json));

        debug!("Broadcasting {} in channel {}", kind, channel);

        for (client, _) in self.clients.iter().filter(|(_, c)| *c == channel) {
            // Errors would only occur if the client disconnected or stopped reading
            // As those clients are removed by the ping task shortly after, ignoring the error here is OK
            let _ = client.try_send(bytes.clone());
        }
    }

    /// Removes clients which we are unable to send a ping to
    /// This method should be called by a tokio task around every 10 seconds
    #[instrument(skip(self))]
    async fn remove_stale_clients(&mut self) {
        self.clients.retain(|(client, channel)| {
            // This will fail if the buffer is full or the client is disconnected
            // If the buffer is full the client has not recv'd for a while which means it probably disconnected
            client
                .try_send(Bytes::from("event: ping\ndata: pong!\n\n"))
                .map_or_else(
                    |err| {
                        debug!("Disconnecting a client subscribed to {}: {}", channel, err);
                        false
                    },
                    |_| true
                )
        });
    }

    pub(crate) fn len(&self) -> usize {
        self.clients.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

impl Debug for Broadcaster {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut map = HashMap::new();

        for (_, channel) in &self.clients {
            let count = map.entry(*channel).or_insert(0_usize);
            *count += 1;
        }

        Debug::fmt(&map, f)
    }
}

#[derive(Debug, Deref)]
pub(crate) struct SseClient(Receiver<Bytes>);

impl Stream for SseClient {
    type Item = Result<Bytes, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, context: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match Pin::new(&mut self.0).poll_recv(context) {
            Poll::Ready(Some(value)) => Poll::Ready(Some(Ok(value))),
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending
        }
    }
}

/// Spawns a task which pings all clients every 10 seconds in order to keep the
/// connections alive and reap the dead ones
fn spawn_ping_task(data: Data<RwLock<Broadcaster>>) {
    let mut interval = tokio::time::interval(Duration::new(10, 0));

    tokio::spawn(async move {
        loop {
            interval.tick().await;
            data.write().await.remove_stale_clients().await;
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::{TimeZone, Utc};

    use crate::issue::{IssuePriority, IssueStatus, IssueType};

    fn test_issue() -> Issue {
        Issue {
            id: 3,
            project_id: 1,
            key: "AL-3".to_owned(),
            title: "Fix bug".to_owned(),
            description: None,
            issue_type: IssueType::Bug,
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

    #[test]
    fn channels_follow_the_canonical_naming_scheme() {
        assert_eq!(Channel::Project(42).to_string(), "project:42");
    }

    #[test]
    fn event_names_are_snake_case() {
        assert_eq!(EventKind::IssueCreated.to_string(), "issue_created");
        assert_eq!(EventKind::IssueUpdated.to_string(), "issue_updated");
        assert_eq!(EventKind::IssueDeleted.to_string(), "issue_deleted");
        assert_eq!(EventKind::CommentAdded.to_string(), "comment_added");
    }

    #[actix_rt::test]
    async fn events_only_reach_subscribers_of_the_channel() {
        let mut broadcaster = Broadcaster::without_ping_task(16);

        let mut subscriber = broadcaster.new_client(Channel::Project(1)).await.unwrap();
        let mut bystander = broadcaster.new_client(Channel::Project(2)).await.unwrap();

        assert_eq!(broadcaster.len(), 2);

        // Both clients receive the initial connected frame
        assert_eq!(subscriber.0.recv().await.unwrap(), Bytes::from("data: connected\n\n"));
        assert_eq!(bystander.0.recv().await.unwrap(), Bytes::from("data: connected\n\n"));

        let payload = IssueEvent {
            project_id: 1,
            issue: test_issue()
        };

        broadcaster.send(Channel::Project(1), EventKind::IssueUpdated, &payload);

        let frame = subscriber.0.recv().await.unwrap();
        let frame = std::str::from_utf8(frame.as_ref()).unwrap();

        assert!(frame.starts_with("event: issue_updated\ndata: "));
        assert!(frame.contains("\"projectId\":1"));
        assert!(frame.ends_with("\n\n"));

        assert!(bystander.0.try_recv().is_err());
    }

    #[actix_rt::test]
    async fn disconnected_clients_are_reaped() {
        let mut broadcaster = Broadcaster::without_ping_task(16);

        let subscriber = broadcaster.new_client(Channel::Project(1)).await.unwrap();
        assert!(!broadcaster.is_empty());

        drop(subscriber);
        broadcaster.remove_stale_clients().await;

        assert!(broadcaster.is_empty());
    }
}
