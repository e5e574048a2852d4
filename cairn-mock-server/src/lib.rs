use std::{
    collections::{btree_map, BTreeMap, BTreeSet, HashMap},
    sync::{Mutex, MutexGuard},
};

use async_trait::async_trait;
use cairn_api::{
    service, AuthToken, Changeset, ChangesetId, Comment, CommentId, CommentNotification, Context,
    Db, Error, NewChangeset, NewComment, NewSession, NewUser, Notifier, Time, User, UserId, Uuid,
};
use chrono::Utc;
use tokio::sync::mpsc;

#[derive(Debug)]
struct DbChangeset {
    owner: UserId,
    created_at: Time,
    open: bool,
}

#[derive(Debug)]
struct DbComment {
    changeset: ChangesetId,
    author: UserId,
    body: String,
    visible: bool,
    created_at: Time,
}

/// In-memory store with the same observable behavior as the postgres one
#[derive(Debug, Default)]
pub struct MemDb {
    users: BTreeMap<UserId, User>,
    changesets: BTreeMap<ChangesetId, DbChangeset>,
    comments: BTreeMap<CommentId, DbComment>,
    subscribers: BTreeSet<(ChangesetId, UserId)>,
}

impl MemDb {
    pub fn new() -> MemDb {
        MemDb::default()
    }

    fn comment(&self, id: CommentId) -> Option<Comment> {
        self.comments.get(&id).map(|c| Comment {
            id,
            changeset: c.changeset,
            author: c.author,
            author_name: self
                .users
                .get(&c.author)
                .map(|u| u.name.clone())
                .unwrap_or_default(),
            body: c.body.clone(),
            visible: c.visible,
            created_at: c.created_at,
        })
    }
}

#[async_trait]
impl Db for MemDb {
    async fn fetch_changeset(&mut self, id: ChangesetId) -> anyhow::Result<Option<Changeset>> {
        Ok(self.changesets.get(&id).map(|c| {
            let comments = self
                .comments
                .iter()
                .filter(|(_, comm)| comm.changeset == id)
                .filter_map(|(comm_id, _)| self.comment(*comm_id))
                .collect();
            Changeset::new(id, c.owner, c.created_at, c.open, comments)
        }))
    }

    async fn fetch_comment(&mut self, id: CommentId) -> anyhow::Result<Option<Comment>> {
        Ok(self.comment(id))
    }

    async fn count_comments_between(
        &mut self,
        author: UserId,
        after: Time,
        until: Time,
    ) -> anyhow::Result<i64> {
        Ok(self
            .comments
            .values()
            .filter(|c| c.author == author && after < c.created_at && c.created_at <= until)
            .count() as i64)
    }

    async fn insert_comment(&mut self, c: NewComment) -> anyhow::Result<CommentId> {
        anyhow::ensure!(
            self.changesets.contains_key(&c.changeset),
            "inserting comment on missing changeset {}",
            c.changeset
        );
        let id = CommentId(self.comments.keys().next_back().map(|id| id.0).unwrap_or(0) + 1);
        self.comments.insert(
            id,
            DbComment {
                changeset: c.changeset,
                author: c.author,
                body: c.body,
                visible: true,
                created_at: c.created_at,
            },
        );
        Ok(id)
    }

    async fn set_comment_visible(&mut self, id: CommentId, visible: bool) -> anyhow::Result<()> {
        self.comments
            .get_mut(&id)
            .ok_or_else(|| anyhow::anyhow!("setting visibility of missing comment {id}"))?
            .visible = visible;
        Ok(())
    }

    async fn list_subscribers(&mut self, id: ChangesetId) -> anyhow::Result<Vec<UserId>> {
        Ok(self
            .subscribers
            .range((id, UserId(i64::MIN))..=(id, UserId(i64::MAX)))
            .map(|(_, u)| *u)
            .collect())
    }

    async fn is_subscriber(&mut self, id: ChangesetId, user: UserId) -> anyhow::Result<bool> {
        Ok(self.subscribers.contains(&(id, user)))
    }

    async fn add_subscriber(&mut self, id: ChangesetId, user: UserId) -> anyhow::Result<()> {
        self.subscribers.insert((id, user));
        Ok(())
    }
}

type FeedSenders = HashMap<UserId, Vec<mpsc::UnboundedSender<CommentNotification>>>;

#[derive(Debug, Default)]
struct MockFeeds(Mutex<FeedSenders>);

impl MockFeeds {
    fn feeds(&self) -> MutexGuard<'_, FeedSenders> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Notifier for MockFeeds {
    fn notify(&self, n: CommentNotification) {
        if let Some(feeds) = self.feeds().get_mut(&n.recipient) {
            feeds.retain(|f| f.send(n.clone()).is_ok());
        }
    }
}

pub struct MockServer {
    db: MemDb,
    sessions: HashMap<AuthToken, UserId>,
    feeds: MockFeeds,
    read_only: bool,
}

fn internal(err: anyhow::Error) -> Error {
    Error::Unknown(format!("{err:#}"))
}

impl MockServer {
    pub fn new() -> MockServer {
        MockServer {
            db: MemDb::new(),
            sessions: HashMap::new(),
            feeds: MockFeeds::default(),
            read_only: false,
        }
    }

    pub fn read_only() -> MockServer {
        MockServer {
            read_only: true,
            ..MockServer::new()
        }
    }

    /// Return the id of user number `idx`
    pub fn test_get_user(&self, idx: usize) -> UserId {
        *self
            .db
            .users
            .keys()
            .nth(idx)
            .unwrap_or_else(|| panic!("getting user {idx} among {}", self.db.users.len()))
    }

    /// Return the current number of users
    pub fn test_num_users(&self) -> usize {
        self.db.users.len()
    }

    /// Return the id of changeset number `idx`
    pub fn test_get_changeset(&self, idx: usize) -> ChangesetId {
        *self.db.changesets.keys().nth(idx).unwrap_or_else(|| {
            panic!("getting changeset {idx} among {}", self.db.changesets.len())
        })
    }

    pub fn test_num_changesets(&self) -> usize {
        self.db.changesets.len()
    }

    pub fn test_num_comments(&self) -> usize {
        self.db.comments.len()
    }

    /// Return the number of live notification feeds of `user`
    pub fn test_num_feeds(&self, user: UserId) -> usize {
        self.feeds.feeds().get(&user).map(|f| f.len()).unwrap_or(0)
    }

    pub fn test_subscribers(&self, id: ChangesetId) -> Vec<UserId> {
        self.db
            .subscribers
            .iter()
            .filter(|(c, _)| *c == id)
            .map(|(_, u)| *u)
            .collect()
    }

    pub fn admin_create_user(&mut self, u: NewUser) -> Result<(), Error> {
        u.validate()?;

        if self.db.users.values().any(|db| db.name == u.name) {
            return Err(Error::NameAlreadyUsed(u.name));
        }

        match self.db.users.entry(u.id) {
            btree_map::Entry::Occupied(_) => Err(Error::IdAlreadyUsed(u.id.0)),
            btree_map::Entry::Vacant(entry) => {
                entry.insert(u.into_user());
                Ok(())
            }
        }
    }

    pub fn admin_create_session(&mut self, s: NewSession) -> Result<AuthToken, Error> {
        if !self.db.users.contains_key(&s.user) {
            return Err(Error::NotFound(format!("user {}", s.user.0)));
        }
        let tok = AuthToken(Uuid::new_v4());
        self.sessions.insert(tok, s.user);
        Ok(tok)
    }

    pub fn admin_create_changeset(&mut self, c: NewChangeset) -> Result<(), Error> {
        if !self.db.users.contains_key(&c.owner) {
            return Err(Error::NotFound(format!("user {}", c.owner.0)));
        }
        match self.db.changesets.entry(c.id) {
            btree_map::Entry::Occupied(_) => Err(Error::IdAlreadyUsed(c.id.0)),
            btree_map::Entry::Vacant(entry) => {
                entry.insert(DbChangeset {
                    owner: c.owner,
                    created_at: Utc::now(),
                    open: c.open,
                });
                Ok(())
            }
        }
    }

    fn resolve(&self, tok: AuthToken) -> Result<Context, Error> {
        let user = self
            .sessions
            .get(&tok)
            .and_then(|u| self.db.users.get(u))
            .ok_or(Error::PermissionDenied)?;
        Ok(Context::now(user.clone()))
    }

    fn check_writable(&self) -> Result<(), Error> {
        match self.read_only {
            true => Err(Error::ApiReadOnly),
            false => Ok(()),
        }
    }

    fn resolve_moderator(&self, tok: AuthToken) -> Result<Context, Error> {
        let ctx = self.resolve(tok)?;
        match ctx.user.moderator {
            true => Ok(ctx),
            false => Err(Error::PermissionDenied),
        }
    }

    pub async fn fetch_changeset(&mut self, id: Option<ChangesetId>) -> Result<Changeset, Error> {
        let id = id.ok_or_else(|| Error::BadUserInput(String::from("No id was given")))?;
        self.db
            .fetch_changeset(id)
            .await
            .map_err(internal)?
            .ok_or_else(|| Error::NotFound(format!("changeset {id}")))
    }

    pub async fn create_comment(
        &mut self,
        tok: AuthToken,
        id: Option<ChangesetId>,
        text: Option<&str>,
    ) -> Result<Changeset, Error> {
        self.create_comment_at(tok, Utc::now(), id, text).await
    }

    /// Same as `create_comment`, but pretending the request happens at `now`
    pub async fn create_comment_at(
        &mut self,
        tok: AuthToken,
        now: Time,
        id: Option<ChangesetId>,
        text: Option<&str>,
    ) -> Result<Changeset, Error> {
        self.check_writable()?;
        let mut ctx = self.resolve(tok)?;
        if !ctx.user.data_public {
            return Err(Error::DataNotPublic);
        }
        ctx.now = now;
        service::create_comment(&mut self.db, &self.feeds, &ctx, id, text)
            .await
            .map_err(internal)?
    }

    pub async fn hide_comment(
        &mut self,
        tok: AuthToken,
        id: Option<CommentId>,
    ) -> Result<Changeset, Error> {
        self.check_writable()?;
        let ctx = self.resolve_moderator(tok)?;
        service::hide_comment(&mut self.db, &ctx, id)
            .await
            .map_err(internal)?
    }

    pub async fn restore_comment(
        &mut self,
        tok: AuthToken,
        id: Option<CommentId>,
    ) -> Result<Changeset, Error> {
        self.check_writable()?;
        let ctx = self.resolve_moderator(tok)?;
        service::restore_comment(&mut self.db, &ctx, id)
            .await
            .map_err(internal)?
    }

    pub fn notification_feed(
        &mut self,
        tok: AuthToken,
    ) -> Result<mpsc::UnboundedReceiver<CommentNotification>, Error> {
        let ctx = self.resolve(tok)?;
        let (sender, receiver) = mpsc::unbounded_channel();
        self.feeds
            .feeds()
            .entry(ctx.user.id)
            .or_default()
            .push(sender);
        Ok(receiver)
    }
}

impl Default for MockServer {
    fn default() -> MockServer {
        MockServer::new()
    }
}
