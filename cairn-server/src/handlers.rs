use anyhow::Context as _;
use axum::{
    extract::{ws::Message, Path, Query, State, WebSocketUpgrade},
    Form, Json,
};
use cairn_api::{
    parse_id, service, AuthToken, Changeset, ChangesetId, CommentId, CommentText, Context, Db,
    NewChangeset, NewSession, NewUser, Uuid,
};
use futures::{SinkExt, StreamExt};

use crate::{
    db::{self, PostgresDb},
    extractors::*,
    feeds::NotificationSender,
    Error, UserFeeds,
};

pub async fn admin_create_user(
    AdminAuth: AdminAuth,
    mut conn: PgConn,
    Json(data): Json<NewUser>,
) -> Result<(), Error> {
    data.validate()?;
    let id = data.id;
    db::create_user(&mut *conn, data).await?;
    tracing::info!(user = ?id, "created user");
    Ok(())
}

pub async fn admin_create_session(
    AdminAuth: AdminAuth,
    mut conn: PgConn,
    Json(data): Json<NewSession>,
) -> Result<Json<AuthToken>, Error> {
    Ok(Json(db::create_session(&mut *conn, data).await?))
}

pub async fn admin_create_changeset(
    AdminAuth: AdminAuth,
    mut conn: PgConn,
    Json(data): Json<NewChangeset>,
) -> Result<(), Error> {
    let id = data.id;
    db::create_changeset(&mut *conn, data).await?;
    tracing::info!(changeset = %id, "created changeset");
    Ok(())
}

pub async fn fetch_changeset(
    mut conn: PgConn,
    Path(id): Path<String>,
) -> Result<Json<Changeset>, Error> {
    let id = ChangesetId(parse_id(&id).ok_or_else(Error::no_id_given)?);
    let mut db = PostgresDb { conn: &mut *conn };
    Ok(Json(
        db.fetch_changeset(id)
            .await
            .with_context(|| format!("fetching changeset {id}"))?
            .ok_or_else(|| Error::not_found(format!("changeset {id}")))?,
    ))
}

pub async fn create_comment(
    _: Writable,
    PublicAuth(user): PublicAuth,
    State(notifier): State<NotificationSender>,
    mut conn: PgConn,
    Path(id): Path<String>,
    query: Option<Query<CommentText>>,
    form: Option<Form<CommentText>>,
) -> Result<Json<Changeset>, Error> {
    let text = comment_text(query, form);
    let ctx = Context::now(user);
    let mut db = PostgresDb { conn: &mut *conn };
    Ok(Json(
        service::create_comment(
            &mut db,
            &notifier,
            &ctx,
            parse_id(&id).map(ChangesetId),
            text.as_deref(),
        )
        .await
        .with_context(|| format!("creating comment for {:?} on changeset {id:?}", ctx.user.id))??,
    ))
}

/// Form text wins over query text, and an undecodable source counts as no text
fn comment_text(
    query: Option<Query<CommentText>>,
    form: Option<Form<CommentText>>,
) -> Option<String> {
    form.and_then(|Form(f)| f.text)
        .or_else(|| query.and_then(|Query(q)| q.text))
}

pub async fn hide_comment(
    _: Writable,
    ModeratorAuth(user): ModeratorAuth,
    mut conn: PgConn,
    Path(id): Path<String>,
) -> Result<Json<Changeset>, Error> {
    let ctx = Context::now(user);
    let mut db = PostgresDb { conn: &mut *conn };
    Ok(Json(
        service::hide_comment(&mut db, &ctx, parse_id(&id).map(CommentId))
            .await
            .with_context(|| format!("hiding comment {id:?}"))??,
    ))
}

pub async fn restore_comment(
    _: Writable,
    ModeratorAuth(user): ModeratorAuth,
    mut conn: PgConn,
    Path(id): Path<String>,
) -> Result<Json<Changeset>, Error> {
    let ctx = Context::now(user);
    let mut db = PostgresDb { conn: &mut *conn };
    Ok(Json(
        service::restore_comment(&mut db, &ctx, parse_id(&id).map(CommentId))
            .await
            .with_context(|| format!("restoring comment {id:?}"))??,
    ))
}

pub async fn notification_feed(
    ws: WebSocketUpgrade,
    State(db): State<PgPool>,
    State(feeds): State<UserFeeds>,
) -> Result<axum::response::Response, Error> {
    Ok(ws.on_upgrade(move |sock| {
        let (write, read) = sock.split();
        notification_feed_impl(write, read, db, feeds)
    }))
}

pub async fn notification_feed_impl<W, R>(mut write: W, mut read: R, db: PgPool, feeds: UserFeeds)
where
    W: 'static + Send + Unpin + futures::Sink<Message>,
    <W as futures::Sink<Message>>::Error: Send,
    R: 'static + Send + Unpin + futures::Stream<Item = Result<Message, axum::Error>>,
{
    tracing::debug!("notification feed websocket connected");
    if let Some(Ok(Message::Text(token))) = read.next().await {
        if let Ok(token) = Uuid::try_from(&token as &str) {
            if let Ok(mut conn) = db.acquire().await {
                if let Ok(user) = db::recover_session(&mut *conn, AuthToken(token)).await {
                    std::mem::drop(conn);
                    if write.send(Message::Text(String::from("ok"))).await.is_ok() {
                        tracing::debug!(user = ?user.id, "notification feed websocket auth success");
                        feeds.add_for_user(user.id, write, read).await;
                        return;
                    }
                }
            }
        }
        tracing::debug!(?token, "notification feed websocket auth failure");
        let _ = write
            .send(Message::Text(String::from("permission denied")))
            .await;
    }
}
