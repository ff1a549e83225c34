//! Resolve who a message goes to and push it to whoever is online.
//!
//! Pushes are fire-and-forget. An offline or slow recipient is skipped and
//! never turns into an error for the sender; it catches up through history.

use chrono::{DateTime, Utc};
use tracing::debug;

use parley_shared::protocol::ServerEvent;
use parley_shared::{DeliveryStatus, Target, UserId};
use parley_store::{ChatStore, Message};

use crate::delivery;
use crate::error::ServerError;
use crate::groups::GroupMembershipView;
use crate::presence::PresenceDirectory;
use crate::unseen::UnseenCounter;

/// Outcome of one fanout, for logging and tests.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FanoutReport {
    /// Recipients whose connection accepted the push.
    pub pushed: Vec<UserId>,
    /// Recipients with no live connection, or a full queue.
    pub unreachable: Vec<UserId>,
}

pub struct FanoutRouter<S> {
    presence: PresenceDirectory,
    unseen: UnseenCounter,
    groups: GroupMembershipView<S>,
}

impl<S: ChatStore> FanoutRouter<S> {
    pub fn new(
        presence: PresenceDirectory,
        unseen: UnseenCounter,
        groups: GroupMembershipView<S>,
    ) -> Self {
        Self {
            presence,
            unseen,
            groups,
        }
    }

    /// Addressed recipients of `message`, group membership read right now.
    pub async fn recipients(&self, message: &Message) -> Result<Vec<UserId>, ServerError> {
        match message.target {
            Target::Direct(_) => Ok(delivery::recipients(message, None)),
            Target::Group(group) => {
                let members = self.groups.members(group).await?;
                Ok(delivery::recipients(message, Some(&members)))
            }
        }
    }

    /// Push a freshly created message and bump each recipient's unseen
    /// counter. Offline recipients are counted too; they are not viewing
    /// anything.
    pub async fn route_new(&self, message: &Message) -> Result<FanoutReport, ServerError> {
        let payload = message.to_payload();
        let event = match message.target {
            Target::Direct(_) => ServerEvent::NewMessage { message: payload },
            Target::Group(group_id) => ServerEvent::GroupMessage {
                group_id,
                message: payload,
            },
        };

        let recipients = self.recipients(message).await?;
        for recipient in &recipients {
            self.unseen
                .increment(*recipient, message.conversation_for(*recipient))
                .await;
        }

        let report = self.push_all(&recipients, &event).await;
        debug!(
            message = %message.id,
            pushed = report.pushed.len(),
            unreachable = report.unreachable.len(),
            "Message fanned out"
        );
        Ok(report)
    }

    /// Tell every present recipient that `message` was deleted for everyone.
    pub async fn route_deleted(&self, message: &Message) -> Result<FanoutReport, ServerError> {
        let event = ServerEvent::MessageDeletedForAll {
            message: message.to_payload(),
        };
        let recipients = self.recipients(message).await?;
        Ok(self.push_all(&recipients, &event).await)
    }

    /// Receipt back to the sender. Returns whether it was pushed.
    pub async fn notify_sender(
        &self,
        message: &Message,
        status: DeliveryStatus,
        at: DateTime<Utc>,
    ) -> bool {
        let Some(conn) = self.presence.lookup(message.sender_id).await else {
            return false;
        };
        conn.push(ServerEvent::MessageStatus {
            message_id: message.id,
            status,
            at,
        })
    }

    async fn push_all(&self, recipients: &[UserId], event: &ServerEvent) -> FanoutReport {
        let mut report = FanoutReport::default();
        for recipient in recipients {
            let pushed = match self.presence.lookup(*recipient).await {
                Some(conn) => conn.push(event.clone()),
                None => {
                    debug!(user = %recipient, "Recipient offline, skipping push");
                    false
                }
            };
            if pushed {
                report.pushed.push(*recipient);
            } else {
                report.unreachable.push(*recipient);
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use parley_shared::Conversation;
    use parley_store::{NewGroup, NewMessage, SqliteStore};
    use tokio::sync::mpsc;

    use crate::presence::Connection;

    struct Fixture {
        store: Arc<SqliteStore>,
        presence: PresenceDirectory,
        unseen: UnseenCounter,
        router: FanoutRouter<SqliteStore>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let presence = PresenceDirectory::new();
        let unseen = UnseenCounter::new();
        let router = FanoutRouter::new(
            presence.clone(),
            unseen.clone(),
            GroupMembershipView::new(Arc::clone(&store)),
        );
        Fixture {
            store,
            presence,
            unseen,
            router,
        }
    }

    async fn online(f: &Fixture, user: UserId) -> mpsc::Receiver<ServerEvent> {
        let (conn, mut rx) = Connection::open(user, 16);
        f.presence.register(conn).await;
        while rx.try_recv().is_ok() {}
        rx
    }

    fn group_messages(rx: &mut mpsc::Receiver<ServerEvent>) -> usize {
        let mut n = 0;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, ServerEvent::GroupMessage { .. }) {
                n += 1;
            }
        }
        n
    }

    #[tokio::test]
    async fn group_fanout_reaches_present_members_except_sender() {
        let f = fixture();
        let a = f.store.create_user("a").await.unwrap().id;
        let b = f.store.create_user("b").await.unwrap().id;
        let c = f.store.create_user("c").await.unwrap().id;
        let group = f
            .store
            .create_group(NewGroup {
                name: "g".into(),
                description: None,
                admin: a,
                members: [b, c].into_iter().collect(),
                avatar: None,
            })
            .await
            .unwrap();

        let mut rx_a = online(&f, a).await;
        let mut rx_b = online(&f, b).await;
        // The directory broadcast for b's arrival.
        while rx_a.try_recv().is_ok() {}

        let msg = f
            .store
            .create_message(NewMessage {
                sender_id: a,
                target: Target::Group(group.id),
                text: Some("hello".into()),
                image: None,
                reply_to: None,
            })
            .await
            .unwrap();

        let report = f.router.route_new(&msg).await.unwrap();
        assert_eq!(report.pushed, vec![b]);
        assert_eq!(report.unreachable, vec![c]);

        assert_eq!(group_messages(&mut rx_b), 1);
        assert_eq!(group_messages(&mut rx_a), 0);

        let conv = Conversation::Group(group.id);
        assert_eq!(f.unseen.get(b, conv).await, 1);
        assert_eq!(f.unseen.get(c, conv).await, 1);
        assert_eq!(f.unseen.get(a, conv).await, 0);
    }

    #[tokio::test]
    async fn direct_fanout_to_offline_peer() {
        let f = fixture();
        let a = f.store.create_user("a").await.unwrap().id;
        let b = f.store.create_user("b").await.unwrap().id;

        let msg = f
            .store
            .create_message(NewMessage {
                sender_id: a,
                target: Target::Direct(b),
                text: Some("hi".into()),
                image: None,
                reply_to: None,
            })
            .await
            .unwrap();

        let report = f.router.route_new(&msg).await.unwrap();
        assert!(report.pushed.is_empty());
        assert_eq!(report.unreachable, vec![b]);
        assert_eq!(f.unseen.get(b, Conversation::Direct(a)).await, 1);
        assert!(!f.router.notify_sender(&msg, DeliveryStatus::Read, Utc::now()).await);
    }

    #[tokio::test]
    async fn active_viewer_is_not_counted() {
        let f = fixture();
        let a = f.store.create_user("a").await.unwrap().id;
        let b = f.store.create_user("b").await.unwrap().id;
        let mut rx_b = online(&f, b).await;
        f.unseen.set_viewing(b, Some(Conversation::Direct(a))).await;

        let msg = f
            .store
            .create_message(NewMessage {
                sender_id: a,
                target: Target::Direct(b),
                text: Some("hi".into()),
                image: None,
                reply_to: None,
            })
            .await
            .unwrap();

        f.router.route_new(&msg).await.unwrap();
        assert!(matches!(
            rx_b.try_recv(),
            Ok(ServerEvent::NewMessage { .. })
        ));
        assert_eq!(f.unseen.get(b, Conversation::Direct(a)).await, 0);
    }
}
