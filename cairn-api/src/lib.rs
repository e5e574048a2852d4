use chrono::Utc;

pub use uuid::{uuid, Uuid};
pub type Time = chrono::DateTime<Utc>;

mod auth;
mod changeset;
mod comment;
mod db;
mod error;
mod feed;
pub mod service;
mod user;

pub use auth::{AuthToken, NewSession};
pub use changeset::{Changeset, ChangesetId, NewChangeset};
pub use comment::{Comment, CommentId, CommentNotification, CommentText, NewComment};
pub use db::{Db, Notifier};
pub use error::Error;
pub use feed::FeedMessage;
pub use service::Context;
pub use user::{NewUser, User, UserId};

pub const STUB_UUID: Uuid = uuid!("ffffffff-ffff-ffff-ffff-ffffffffffff");

/// Width, in hours, of the sliding window used by the comment rate limit
pub const RATE_LIMIT_WINDOW_HOURS: i64 = 1;

pub fn validate_string(s: &str) -> Result<(), Error> {
    if s.contains('\0') {
        return Err(Error::NullByteInString(String::from(s)));
    }
    Ok(())
}

/// Parses a path parameter as an integer id, treating anything unparseable as missing
pub fn parse_id(s: &str) -> Option<i64> {
    s.trim().parse().ok()
}
