use anyhow::Context;
use axum::async_trait;
use cairn_api::{
    AuthToken, Changeset, ChangesetId, Comment, CommentId, Db, NewChangeset, NewComment,
    NewSession, NewUser, Time, User, UserId, Uuid,
};
use chrono::Utc;
use futures::TryStreamExt;
use sqlx::{postgres::PgRow, Row};

use crate::Error;

pub async fn recover_session(conn: &mut sqlx::PgConnection, token: AuthToken) -> Result<User, Error> {
    let row = sqlx::query(
        "
            SELECT u.id, u.name, u.max_changeset_comments_per_hour, u.moderator, u.data_public
                FROM sessions s
            INNER JOIN users u
                ON u.id = s.user_id
            WHERE s.id = $1
        ",
    )
    .bind(token.0)
    .fetch_optional(conn)
    .await
    .with_context(|| format!("recovering session for {:?}", token))?
    .ok_or(Error::permission_denied())?;
    Ok(user_from_row(&row)?)
}

fn user_from_row(row: &PgRow) -> anyhow::Result<User> {
    Ok(User {
        id: UserId(row.try_get("id").context("retrieving the id field")?),
        name: row.try_get("name").context("retrieving the name field")?,
        max_changeset_comments_per_hour: row
            .try_get("max_changeset_comments_per_hour")
            .context("retrieving the max_changeset_comments_per_hour field")?,
        moderator: row
            .try_get("moderator")
            .context("retrieving the moderator field")?,
        data_public: row
            .try_get("data_public")
            .context("retrieving the data_public field")?,
    })
}

async fn user_exists(conn: &mut sqlx::PgConnection, id: UserId) -> anyhow::Result<bool> {
    Ok(sqlx::query("SELECT 1 FROM users WHERE id = $1")
        .bind(id.0)
        .fetch_optional(conn)
        .await
        .with_context(|| format!("checking existence of user {:?}", id))?
        .is_some())
}

pub async fn create_user(conn: &mut sqlx::PgConnection, u: NewUser) -> Result<(), Error> {
    let name_used = sqlx::query("SELECT 1 FROM users WHERE name = $1")
        .bind(&u.name)
        .fetch_optional(&mut *conn)
        .await
        .with_context(|| format!("checking whether name {:?} is used", u.name))?
        .is_some();
    if name_used {
        return Err(Error::name_already_used(u.name));
    }
    if user_exists(&mut *conn, u.id).await? {
        return Err(Error::id_already_used(u.id.0));
    }

    let res = sqlx::query(
        "
            INSERT INTO users (id, name, max_changeset_comments_per_hour, moderator, data_public)
            VALUES ($1, $2, $3, $4, $5)
        ",
    )
    .bind(u.id.0)
    .bind(&u.name)
    .bind(u.max_changeset_comments_per_hour)
    .bind(u.moderator)
    .bind(u.data_public)
    .execute(conn)
    .await
    .with_context(|| format!("inserting user {:?}", u.id))?;
    if res.rows_affected() != 1 {
        return Err(Error::Anyhow(anyhow::anyhow!(
            "insertion of user {:?} affected {} rows",
            u.id,
            res.rows_affected()
        )));
    }
    Ok(())
}

pub async fn create_session(
    conn: &mut sqlx::PgConnection,
    s: NewSession,
) -> Result<AuthToken, Error> {
    if !user_exists(&mut *conn, s.user).await? {
        return Err(Error::not_found(format!("user {}", s.user.0)));
    }
    let token = AuthToken(Uuid::new_v4());
    sqlx::query("INSERT INTO sessions (id, user_id, created_at) VALUES ($1, $2, $3)")
        .bind(token.0)
        .bind(s.user.0)
        .bind(Utc::now())
        .execute(conn)
        .await
        .with_context(|| format!("inserting session for {:?}", s.user))?;
    Ok(token)
}

pub async fn create_changeset(conn: &mut sqlx::PgConnection, c: NewChangeset) -> Result<(), Error> {
    if !user_exists(&mut *conn, c.owner).await? {
        return Err(Error::not_found(format!("user {}", c.owner.0)));
    }
    let id_used = sqlx::query("SELECT 1 FROM changesets WHERE id = $1")
        .bind(c.id.0)
        .fetch_optional(&mut *conn)
        .await
        .with_context(|| format!("checking existence of changeset {}", c.id))?
        .is_some();
    if id_used {
        return Err(Error::id_already_used(c.id.0));
    }
    sqlx::query("INSERT INTO changesets (id, owner_id, created_at, open) VALUES ($1, $2, $3, $4)")
        .bind(c.id.0)
        .bind(c.owner.0)
        .bind(Utc::now())
        .bind(c.open)
        .execute(conn)
        .await
        .with_context(|| format!("inserting changeset {}", c.id))?;
    Ok(())
}

fn comment_from_row(row: &PgRow) -> anyhow::Result<Comment> {
    Ok(Comment {
        id: CommentId(row.try_get("id").context("retrieving the id field")?),
        changeset: ChangesetId(
            row.try_get("changeset_id")
                .context("retrieving the changeset_id field")?,
        ),
        author: UserId(
            row.try_get("author_id")
                .context("retrieving the author_id field")?,
        ),
        author_name: row
            .try_get("author_name")
            .context("retrieving the author_name field")?,
        body: row.try_get("body").context("retrieving the body field")?,
        visible: row.try_get("visible").context("retrieving the visible field")?,
        created_at: row
            .try_get("created_at")
            .context("retrieving the created_at field")?,
    })
}

const SELECT_COMMENTS: &str = "
    SELECT c.id, c.changeset_id, c.author_id, u.name AS author_name, c.body, c.visible, c.created_at
        FROM changeset_comments c
    INNER JOIN users u
        ON u.id = c.author_id
";

pub struct PostgresDb<'a> {
    pub conn: &'a mut sqlx::PgConnection,
}

#[async_trait]
impl<'a> Db for PostgresDb<'a> {
    async fn fetch_changeset(&mut self, id: ChangesetId) -> anyhow::Result<Option<Changeset>> {
        let row = sqlx::query("SELECT owner_id, created_at, open FROM changesets WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&mut *self.conn)
            .await
            .context("querying changesets table")?;
        let row = match row {
            Some(row) => row,
            None => return Ok(None),
        };
        let owner = UserId(
            row.try_get("owner_id")
                .context("retrieving the owner_id field")?,
        );
        let created_at: Time = row
            .try_get("created_at")
            .context("retrieving the created_at field")?;
        let open = row.try_get("open").context("retrieving the open field")?;

        let mut comments = Vec::new();
        let sql = format!("{SELECT_COMMENTS} WHERE c.changeset_id = $1 ORDER BY c.id");
        let mut query = sqlx::query(&sql)
            .bind(id.0)
            .fetch(&mut *self.conn);
        while let Some(c) = query
            .try_next()
            .await
            .context("querying changeset_comments table")?
        {
            comments.push(comment_from_row(&c)?);
        }

        Ok(Some(Changeset::new(id, owner, created_at, open, comments)))
    }

    async fn fetch_comment(&mut self, id: CommentId) -> anyhow::Result<Option<Comment>> {
        let sql = format!("{SELECT_COMMENTS} WHERE c.id = $1");
        sqlx::query(&sql)
            .bind(id.0)
            .fetch_optional(&mut *self.conn)
            .await
            .context("querying changeset_comments table")?
            .map(|row| comment_from_row(&row))
            .transpose()
    }

    async fn count_comments_between(
        &mut self,
        author: UserId,
        after: Time,
        until: Time,
    ) -> anyhow::Result<i64> {
        sqlx::query(
            "
                SELECT COUNT(*) AS num
                    FROM changeset_comments
                WHERE author_id = $1
                    AND created_at > $2
                    AND created_at <= $3
            ",
        )
        .bind(author.0)
        .bind(after)
        .bind(until)
        .fetch_one(&mut *self.conn)
        .await
        .context("counting recent comments")?
        .try_get("num")
        .context("retrieving the num field")
    }

    async fn insert_comment(&mut self, c: NewComment) -> anyhow::Result<CommentId> {
        Ok(CommentId(
            sqlx::query(
                "
                    INSERT INTO changeset_comments (changeset_id, author_id, body, visible, created_at)
                    VALUES ($1, $2, $3, true, $4)
                    RETURNING id
                ",
            )
            .bind(c.changeset.0)
            .bind(c.author.0)
            .bind(&c.body)
            .bind(c.created_at)
            .fetch_one(&mut *self.conn)
            .await
            .context("inserting into changeset_comments table")?
            .try_get("id")
            .context("retrieving the id field")?,
        ))
    }

    async fn set_comment_visible(&mut self, id: CommentId, visible: bool) -> anyhow::Result<()> {
        let res = sqlx::query("UPDATE changeset_comments SET visible = $1 WHERE id = $2")
            .bind(visible)
            .bind(id.0)
            .execute(&mut *self.conn)
            .await
            .context("updating changeset_comments table")?;
        anyhow::ensure!(
            res.rows_affected() == 1,
            "visibility update of comment {id} affected {} rows",
            res.rows_affected()
        );
        Ok(())
    }

    async fn list_subscribers(&mut self, id: ChangesetId) -> anyhow::Result<Vec<UserId>> {
        sqlx::query(
            "SELECT subscriber_id FROM changesets_subscribers WHERE changeset_id = $1 ORDER BY subscriber_id",
        )
        .bind(id.0)
        .fetch_all(&mut *self.conn)
        .await
        .context("querying changesets_subscribers table")?
        .iter()
        .map(|row| -> anyhow::Result<UserId> {
            Ok(UserId(
                row.try_get("subscriber_id")
                    .context("retrieving the subscriber_id field")?,
            ))
        })
        .collect()
    }

    async fn is_subscriber(&mut self, id: ChangesetId, user: UserId) -> anyhow::Result<bool> {
        Ok(sqlx::query(
            "SELECT 1 FROM changesets_subscribers WHERE changeset_id = $1 AND subscriber_id = $2",
        )
        .bind(id.0)
        .bind(user.0)
        .fetch_optional(&mut *self.conn)
        .await
        .context("querying changesets_subscribers table")?
        .is_some())
    }

    async fn add_subscriber(&mut self, id: ChangesetId, user: UserId) -> anyhow::Result<()> {
        sqlx::query(
            "
                INSERT INTO changesets_subscribers (subscriber_id, changeset_id)
                VALUES ($1, $2)
                ON CONFLICT DO NOTHING
            ",
        )
        .bind(user.0)
        .bind(id.0)
        .execute(&mut *self.conn)
        .await
        .context("inserting into changesets_subscribers table")?;
        Ok(())
    }
}
