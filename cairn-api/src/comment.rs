use std::fmt;

use crate::{ChangesetId, Time, UserId};

#[derive(
    Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Deserialize, serde::Serialize,
)]
pub struct CommentId(pub i64);

impl fmt::Display for CommentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Comment {
    pub id: CommentId,
    pub changeset: ChangesetId,
    pub author: UserId,
    pub author_name: String,
    pub body: String,
    pub visible: bool,
    pub created_at: Time,
}

/// A comment about to be stored, its id is assigned by the store
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NewComment {
    pub changeset: ChangesetId,
    pub author: UserId,
    pub body: String,
    pub created_at: Time,
}

/// Form body of the comment creation endpoint
#[derive(Clone, Debug, Default, serde::Deserialize, serde::Serialize)]
pub struct CommentText {
    pub text: Option<String>,
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct CommentNotification {
    pub recipient: UserId,
    pub comment: Comment,
}
