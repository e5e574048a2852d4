use async_trait::async_trait;

use crate::{
    Changeset, ChangesetId, Comment, CommentId, CommentNotification, NewComment, Time, UserId,
};

#[async_trait]
pub trait Db: Send {
    /// Loads a changeset along with all its comments
    async fn fetch_changeset(&mut self, id: ChangesetId) -> anyhow::Result<Option<Changeset>>;

    async fn fetch_comment(&mut self, id: CommentId) -> anyhow::Result<Option<Comment>>;

    /// Counts the comments authored by `author` with `after < created_at <= until`
    async fn count_comments_between(
        &mut self,
        author: UserId,
        after: Time,
        until: Time,
    ) -> anyhow::Result<i64>;

    async fn insert_comment(&mut self, c: NewComment) -> anyhow::Result<CommentId>;

    async fn set_comment_visible(&mut self, id: CommentId, visible: bool) -> anyhow::Result<()>;

    async fn list_subscribers(&mut self, id: ChangesetId) -> anyhow::Result<Vec<UserId>>;

    async fn is_subscriber(&mut self, id: ChangesetId, user: UserId) -> anyhow::Result<bool>;

    async fn add_subscriber(&mut self, id: ChangesetId, user: UserId) -> anyhow::Result<()>;
}

/// Best-effort delivery of comment notifications
///
/// Implementations must not block: failures are theirs to log, never the caller's to handle.
pub trait Notifier: Send + Sync {
    fn notify(&self, n: CommentNotification);
}
