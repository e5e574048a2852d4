use std::ops::{Deref, DerefMut};

use anyhow::Context;
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{self, request},
};
use cairn_api::{AuthToken, User, Uuid};

use crate::{db, feeds::NotificationSender, Error, UserFeeds};

#[derive(Clone, axum::extract::FromRef)]
pub struct AppState {
    pub db: PgPool,
    pub feeds: UserFeeds,
    pub notifier: NotificationSender,
    pub admin_token: Option<AuthToken>,
    pub mode: ApiMode,
}

#[derive(Clone, Copy, Debug)]
pub struct ApiMode {
    pub read_only: bool,
}

#[derive(Clone)]
pub struct PgPool(sqlx::PgPool);

impl PgPool {
    pub fn new(pool: sqlx::PgPool) -> PgPool {
        PgPool(pool)
    }

    pub async fn acquire(&self) -> Result<PgConn, Error> {
        Ok(PgConn(
            self.0.acquire().await.context("acquiring db connection")?,
        ))
    }
}

pub struct PgConn(sqlx::pool::PoolConnection<sqlx::Postgres>);

#[async_trait]
impl FromRequestParts<AppState> for PgConn {
    type Rejection = Error;

    async fn from_request_parts(
        _req: &mut request::Parts,
        state: &AppState,
    ) -> Result<PgConn, Error> {
        state.db.acquire().await
    }
}

impl Deref for PgConn {
    type Target = sqlx::PgConnection;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for PgConn {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

/// Rejects the request when the API is in read-only mode
pub struct Writable;

#[async_trait]
impl FromRequestParts<AppState> for Writable {
    type Rejection = Error;

    async fn from_request_parts(
        _req: &mut request::Parts,
        state: &AppState,
    ) -> Result<Writable, Error> {
        match state.mode.read_only {
            true => Err(Error::api_read_only()),
            false => Ok(Writable),
        }
    }
}

pub struct PreAuth(pub AuthToken);

#[async_trait]
impl<S: Sync> FromRequestParts<S> for PreAuth {
    type Rejection = Error;

    async fn from_request_parts(req: &mut request::Parts, _state: &S) -> Result<PreAuth, Error> {
        match req.headers.get(http::header::AUTHORIZATION) {
            None => Err(Error::permission_denied()),
            Some(auth) => {
                let auth = auth.to_str().map_err(|_| Error::permission_denied())?;
                let mut auth = auth.split(' ');
                if !auth
                    .next()
                    .ok_or(Error::permission_denied())?
                    .eq_ignore_ascii_case("bearer")
                {
                    return Err(Error::permission_denied());
                }
                let token = auth.next().ok_or(Error::permission_denied())?;
                if auth.next().is_some() {
                    return Err(Error::permission_denied());
                }
                let token = Uuid::try_from(token).map_err(|_| Error::permission_denied())?;
                Ok(PreAuth(AuthToken(token)))
            }
        }
    }
}

pub struct Auth(pub User);

#[async_trait]
impl FromRequestParts<AppState> for Auth {
    type Rejection = Error;

    async fn from_request_parts(req: &mut request::Parts, state: &AppState) -> Result<Auth, Error> {
        let token = PreAuth::from_request_parts(req, state).await?.0;
        let mut conn = PgConn::from_request_parts(req, state).await?;
        Ok(Auth(db::recover_session(&mut *conn, token).await?))
    }
}

/// Authenticated user whose edits are public, the only ones allowed to comment
pub struct PublicAuth(pub User);

#[async_trait]
impl FromRequestParts<AppState> for PublicAuth {
    type Rejection = Error;

    async fn from_request_parts(
        req: &mut request::Parts,
        state: &AppState,
    ) -> Result<PublicAuth, Error> {
        let Auth(user) = Auth::from_request_parts(req, state).await?;
        match user.data_public {
            true => Ok(PublicAuth(user)),
            false => Err(Error::data_not_public()),
        }
    }
}

pub struct ModeratorAuth(pub User);

#[async_trait]
impl FromRequestParts<AppState> for ModeratorAuth {
    type Rejection = Error;

    async fn from_request_parts(
        req: &mut request::Parts,
        state: &AppState,
    ) -> Result<ModeratorAuth, Error> {
        let Auth(user) = Auth::from_request_parts(req, state).await?;
        match user.moderator {
            true => Ok(ModeratorAuth(user)),
            false => Err(Error::permission_denied()),
        }
    }
}

pub struct AdminAuth;

#[async_trait]
impl FromRequestParts<AppState> for AdminAuth {
    type Rejection = Error;

    async fn from_request_parts(
        req: &mut request::Parts,
        state: &AppState,
    ) -> Result<AdminAuth, Error> {
        let token = PreAuth::from_request_parts(req, state).await?.0;
        if Some(token) == state.admin_token {
            Ok(AdminAuth)
        } else {
            Err(Error::permission_denied())
        }
    }
}
