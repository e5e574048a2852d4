//! Comment lifecycle on changesets: creation, hiding and restoration.
//!
//! All operations return `anyhow::Result<Result<Changeset, Error>>`: the outer error is an internal
//! failure of the store, the inner one is the answer that should be relayed to the user.

use anyhow::{anyhow, Context as _};
use chrono::Utc;

use crate::{
    Changeset, ChangesetId, CommentId, CommentNotification, Db, Error, NewComment, Notifier, Time,
    User, RATE_LIMIT_WINDOW_HOURS,
};

/// Request-scoped information handed to every comment operation
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Context {
    pub user: User,
    pub now: Time,
}

impl Context {
    pub fn now(user: User) -> Context {
        Context {
            user,
            now: Utc::now(),
        }
    }
}

macro_rules! reject {
    ($err:expr) => {{
        let err: Error = $err;
        tracing::debug!(%err, "rejecting comment operation");
        return Ok(Err(err));
    }};
}

/// Whether `ctx.user` already authored their quota of comments in the window ending at `ctx.now`
pub async fn rate_limit_exceeded<D: Db>(db: &mut D, ctx: &Context) -> anyhow::Result<bool> {
    let since = ctx.now - chrono::Duration::hours(RATE_LIMIT_WINDOW_HOURS);
    let recent = db
        .count_comments_between(ctx.user.id, since, ctx.now)
        .await
        .with_context(|| format!("counting recent comments of {:?}", ctx.user.id))?;
    Ok(recent >= ctx.user.max_changeset_comments_per_hour)
}

pub async fn create_comment<D: Db, N: Notifier>(
    db: &mut D,
    notifier: &N,
    ctx: &Context,
    changeset: Option<ChangesetId>,
    text: Option<&str>,
) -> anyhow::Result<Result<Changeset, Error>> {
    let id = match changeset {
        Some(id) => id,
        None => reject!(Error::BadUserInput(String::from("No id was given"))),
    };
    let body = match text {
        Some(text) if !text.trim().is_empty() => text,
        _ => reject!(Error::BadUserInput(String::from("No text was given"))),
    };
    if let Err(err) = crate::validate_string(body) {
        reject!(err);
    }
    if rate_limit_exceeded(&mut *db, ctx).await? {
        reject!(Error::RateLimitExceeded);
    }

    let changeset = match db
        .fetch_changeset(id)
        .await
        .with_context(|| format!("fetching changeset {id}"))?
    {
        Some(c) => c,
        None => reject!(Error::NotFound(format!("changeset {id}"))),
    };
    // comments are only accepted once the changeset has been closed
    if changeset.open {
        reject!(Error::ChangesetNotYetClosed(id));
    }

    let comment_id = db
        .insert_comment(NewComment {
            changeset: id,
            author: ctx.user.id,
            body: String::from(body),
            created_at: ctx.now,
        })
        .await
        .with_context(|| format!("inserting comment on changeset {id}"))?;
    tracing::info!(changeset = %id, comment = %comment_id, author = ?ctx.user.id, "created changeset comment");
    let comment = db
        .fetch_comment(comment_id)
        .await
        .with_context(|| format!("fetching freshly inserted comment {comment_id}"))?
        .ok_or_else(|| anyhow!("comment {comment_id} disappeared right after insertion"))?;

    let subscribers = db
        .list_subscribers(id)
        .await
        .with_context(|| format!("listing subscribers of changeset {id}"))?;
    for recipient in subscribers {
        if recipient != ctx.user.id {
            notifier.notify(CommentNotification {
                recipient,
                comment: comment.clone(),
            });
        }
    }

    if !db
        .is_subscriber(id, ctx.user.id)
        .await
        .with_context(|| format!("checking subscription of {:?} to {id}", ctx.user.id))?
    {
        db.add_subscriber(id, ctx.user.id)
            .await
            .with_context(|| format!("subscribing {:?} to {id}", ctx.user.id))?;
    }

    Ok(Ok(fetch_existing_changeset(db, id).await?))
}

pub async fn hide_comment<D: Db>(
    db: &mut D,
    ctx: &Context,
    comment: Option<CommentId>,
) -> anyhow::Result<Result<Changeset, Error>> {
    set_visibility(db, ctx, comment, false).await
}

pub async fn restore_comment<D: Db>(
    db: &mut D,
    ctx: &Context,
    comment: Option<CommentId>,
) -> anyhow::Result<Result<Changeset, Error>> {
    set_visibility(db, ctx, comment, true).await
}

async fn set_visibility<D: Db>(
    db: &mut D,
    ctx: &Context,
    comment: Option<CommentId>,
    visible: bool,
) -> anyhow::Result<Result<Changeset, Error>> {
    let id = match comment {
        Some(id) => id,
        None => reject!(Error::BadUserInput(String::from("No id was given"))),
    };
    let comment = match db
        .fetch_comment(id)
        .await
        .with_context(|| format!("fetching comment {id}"))?
    {
        Some(c) => c,
        None => reject!(Error::NotFound(format!("comment {id}"))),
    };
    db.set_comment_visible(id, visible)
        .await
        .with_context(|| format!("setting visibility of comment {id} to {visible}"))?;
    tracing::info!(comment = %id, visible, moderator = ?ctx.user.id, "changed changeset comment visibility");
    Ok(Ok(fetch_existing_changeset(db, comment.changeset).await?))
}

async fn fetch_existing_changeset<D: Db>(db: &mut D, id: ChangesetId) -> anyhow::Result<Changeset> {
    db.fetch_changeset(id)
        .await
        .with_context(|| format!("reloading changeset {id}"))?
        .ok_or_else(|| anyhow!("changeset {id} disappeared while commenting on it"))
}
