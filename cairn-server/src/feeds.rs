use std::{collections::HashMap, sync::Arc};

use axum::extract::ws::Message;
use cairn_api::{CommentNotification, FeedMessage, Notifier, UserId, Uuid};
use futures::{channel::mpsc, select, SinkExt, StreamExt};
use tokio::sync::RwLock;

#[derive(Clone, Debug)]
pub struct UserFeeds(
    Arc<RwLock<HashMap<UserId, HashMap<Uuid, mpsc::UnboundedSender<FeedMessage>>>>>,
);

impl UserFeeds {
    pub fn new() -> UserFeeds {
        UserFeeds(Arc::new(RwLock::new(HashMap::new())))
    }

    pub async fn add_for_user<W, R>(self, user: UserId, mut write: W, read: R)
    where
        W: 'static + Send + Unpin + futures::Sink<Message>,
        <W as futures::Sink<Message>>::Error: Send,
        R: 'static + Send + Unpin + futures::Stream<Item = Result<Message, axum::Error>>,
    {
        // Note: if this were bounded, there would be a deadlock between the write-lock to remove a channel and the read-lock to relay a notification
        let (sender, mut receiver) = mpsc::unbounded();
        let sender_id = Uuid::new_v4();

        self.0
            .write()
            .await
            .entry(user)
            .or_insert_with(HashMap::new)
            .insert(sender_id, sender);

        let this = self.clone();
        let mut read = read.fuse();
        tokio::spawn(async move {
            macro_rules! remove_self {
                () => {{
                    if let Some(socks) = this.0.write().await.get_mut(&user) {
                        socks.remove(&sender_id);
                    }
                    tracing::debug!(?user, "notification feed websocket disconnected");
                    return;
                }};
            }
            macro_rules! send_message {
                ( $msg:expr ) => {{
                    let msg: FeedMessage = $msg;
                    let json = match serde_json::to_vec(&msg) {
                        Ok(json) => json,
                        Err(err) => {
                            tracing::error!(?err, ?msg, "failed serializing message to json");
                            continue;
                        }
                    };
                    if write.send(Message::Binary(json)).await.is_err() {
                        remove_self!();
                    }
                }};
            }
            loop {
                select! {
                    msg = receiver.next() => match msg {
                        None => remove_self!(),
                        Some(msg) => send_message!(msg),
                    },
                    msg = read.next() => match msg {
                        None => remove_self!(),
                        Some(Ok(Message::Close(_))) => remove_self!(),
                        Some(Ok(Message::Text(msg))) if msg == "ping" => {
                            send_message!(FeedMessage::Pong);
                        }
                        Some(msg) => {
                            tracing::warn!("received unexpected message from client: {msg:?}");
                            remove_self!();
                        }
                    },
                }
            }
        });
    }

    pub async fn relay_notification(&self, n: CommentNotification) {
        if let Some(socks) = self.0.read().await.get(&n.recipient) {
            for s in socks.values() {
                let _ = s.unbounded_send(FeedMessage::CommentNotification(n.clone()));
            }
        }
    }
}

/// Handle given to comment operations, queueing notifications for the dispatcher task
#[derive(Clone, Debug)]
pub struct NotificationSender(mpsc::UnboundedSender<CommentNotification>);

impl Notifier for NotificationSender {
    fn notify(&self, n: CommentNotification) {
        if let Err(err) = self.0.unbounded_send(n) {
            tracing::warn!(?err, "notification dispatcher is gone, dropping notification");
        }
    }
}

/// Spawns the task relaying queued notifications to the recipients' live feeds
pub fn spawn_dispatcher(feeds: UserFeeds) -> NotificationSender {
    let (sender, mut receiver) = mpsc::unbounded::<CommentNotification>();
    tokio::spawn(async move {
        while let Some(n) = receiver.next().await {
            tracing::debug!(
                recipient = ?n.recipient,
                comment = %n.comment.id,
                changeset = %n.comment.changeset,
                "delivering changeset comment notification"
            );
            feeds.relay_notification(n).await;
        }
    });
    NotificationSender(sender)
}
