use crate::CommentNotification;

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub enum FeedMessage {
    Pong,
    CommentNotification(CommentNotification),
}
