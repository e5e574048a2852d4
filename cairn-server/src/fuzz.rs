#![cfg(test)]

use async_recursion::async_recursion;
use axum::{
    extract::FromRequestParts,
    http::{self, request},
    Router,
};
use bolero::generator::{bolero_generator::Driver, gen_with, TypeGenerator, ValueGenerator};
use cairn_api::{
    AuthToken, Changeset, ChangesetId, CommentId, Error as ApiError, NewChangeset, NewSession,
    NewUser, Time, UserId, Uuid,
};
use cairn_mock_server::MockServer;
use std::{cmp, fmt::Debug, ops::RangeTo, panic::AssertUnwindSafe, path::Path};
use tower::{Service, ServiceExt};

use crate::{extractors::*, *};

macro_rules! do_tokio_test {
    ( $name:ident, $typ:ty, $fn:expr ) => {
        #[test]
        fn $name() {
            let runtime = AssertUnwindSafe(
                tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .expect("failed initializing tokio runtime"),
            );
            bolero::check!()
                .with_type::<$typ>()
                .cloned()
                .for_each(move |v| {
                    let () = runtime.block_on($fn(v));
                })
        }
    };
}

fn build_pg_cluster(data: &Path) -> Option<postgresfixture::cluster::Cluster> {
    let mut runtime = None;
    let mut best_version = None;
    for r in postgresfixture::runtime::Runtime::find_on_path() {
        if let Ok(v) = r.version() {
            match (&mut runtime, &mut best_version) {
                (None, None) => {
                    runtime = Some(r);
                    best_version = Some(v);
                }
                (Some(runtime), Some(best_version)) => {
                    if *best_version < v {
                        *runtime = r;
                        *best_version = v;
                    }
                }
                _ => unreachable!(),
            }
        }
    }
    Some(postgresfixture::cluster::Cluster::new(data, runtime?))
}

macro_rules! do_sqlx_test {
    ( $name:ident, $gen:expr, $fn:expr ) => {
        #[test]
        fn $name() {
            if std::env::var("RUST_LOG").is_ok() {
                tracing_subscriber::fmt::init();
            }
            let lockfile = tempfile::tempfile().expect("creating tempfile");
            let datadir = tempfile::tempdir().expect("creating tempdir");
            let datadir_path: &Path = datadir.as_ref();
            let cluster = match build_pg_cluster(datadir_path) {
                Some(cluster) => cluster,
                None => {
                    eprintln!("postgresql is not installed in path, skipping {}", stringify!($name));
                    return;
                }
            };
            let datadir_path: &str = datadir_path.to_str().expect("tempdir is not valid utf8");
            postgresfixture::coordinate::run_and_destroy(&cluster, lockfile.into(), || {
                cluster.createdb("test_db").expect("creating test_db database");
                let runtime = AssertUnwindSafe(
                    tokio::runtime::Builder::new_current_thread()
                        .enable_all()
                        .build()
                        .expect("failed initializing tokio runtime"),
                );
                // create test db
                let pool = AssertUnwindSafe(runtime.block_on(async move {
                    let pool = create_sqlx_pool(&format!("postgresql://?host={}&dbname=test_db", datadir_path)).await.expect("creating sqlx pool");
                    MIGRATOR
                        .run(&mut *pool.acquire().await.expect("getting migrator connection"))
                        .await
                        .expect("failed applying migrations");
                    pool
                }));
                bolero::check!()
                    .with_generator($gen)
                    .cloned()
                    .for_each(move |v| {
                        let pool = pool.clone();
                        // run the test
                        let idle_before = pool.num_idle();
                        let v_str = format!("{v:?}");
                        let idle_after_res: Result<usize, _> = {
                            let pool = pool.clone();
                            std::panic::catch_unwind(AssertUnwindSafe(|| {
                                runtime.block_on(async move {
                                    let () = $fn(pool.clone(), v).await;
                                    let mut idle_after = pool.num_idle();
                                    let wait_release_since = std::time::Instant::now();
                                    while idle_after < idle_before
                                        && wait_release_since.elapsed()
                                            <= std::time::Duration::from_secs(1)
                                    {
                                        tokio::task::yield_now().await;
                                        idle_after = pool.num_idle();
                                    }
                                    idle_after
                                })
                            }))
                        };
                        runtime.block_on(async move {
                            // cleanup
                            let mut conn =
                                pool.acquire().await.expect("getting db cleanup connection");
                            sqlx::query(include_str!("../reset-test-db.sql"))
                                .execute(&mut *conn)
                                .await
                                .expect("failed cleaning up database");
                        });
                        // resume the panics
                        match idle_after_res {
                            Err(e) => std::panic::resume_unwind(e),
                            Ok(idle_after) => assert!(
                                idle_after >= idle_before,
                                "test {} held onto pool after exiting test: before there were {idle_before} connections, and after there were {idle_after} with value {v_str}",
                                stringify!($name)
                            ),
                        }
                    });
            })
            .expect("coordinating spinup and shutdown of the pg cluster");
        }
    };
}

do_tokio_test!(fuzz_preauth_extractor, String, |token| async move {
    if let Ok(req) = http::Request::builder()
        .method(http::Method::GET)
        .uri("/")
        .header(http::header::AUTHORIZATION, token)
        .body(())
    {
        let mut req = req.into_parts().0;
        let res = PreAuth::from_request_parts(&mut req, &()).await;
        match res {
            Ok(_) => (),
            Err(Error::Api(ApiError::PermissionDenied)) => (),
            Err(e) => panic!("got unexpected error: {e}"),
        }
    }
});

#[derive(Clone, Debug)]
enum FuzzOp {
    CreateUser(NewUser),
    CreateSession {
        uid: usize,
    },
    CreateChangeset {
        id: ChangesetId,
        uid: usize,
        open: bool,
    },
    FetchChangeset {
        cid: usize,
    },
    CreateComment {
        sid: usize,
        cid: usize,
        text: String,
        via_query: bool,
    },
    HideComment {
        sid: usize,
        comment: usize,
    },
    RestoreComment {
        sid: usize,
        comment: usize,
    },
}

impl TypeGenerator for FuzzOp {
    fn generate<D: Driver>(driver: &mut D) -> Option<FuzzOp> {
        macro_rules! field {
            () => {
                TypeGenerator::generate(driver)?
            };
        }
        Some(match ValueGenerator::generate(&(0..7u8), driver)? {
            0 => FuzzOp::CreateUser(field!()),
            1 => FuzzOp::CreateSession { uid: field!() },
            2 => FuzzOp::CreateChangeset {
                id: field!(),
                uid: field!(),
                open: field!(),
            },
            3 => FuzzOp::FetchChangeset { cid: field!() },
            4 => FuzzOp::CreateComment {
                sid: field!(),
                cid: field!(),
                text: ValueGenerator::generate(&gen_with::<String>().len(0..40usize), driver)?,
                via_query: field!(),
            },
            5 => FuzzOp::HideComment {
                sid: field!(),
                comment: field!(),
            },
            _ => FuzzOp::RestoreComment {
                sid: field!(),
                comment: field!(),
            },
        })
    }
}

async fn call<Req, Resp>(
    app: &mut Router,
    req: request::Request<axum::body::Body>,
    req_body: &Req,
) -> Result<Resp, ApiError>
where
    Req: Debug,
    Resp: 'static + for<'de> serde::Deserialize<'de>,
{
    app.ready().await.expect("waiting for app to be ready");
    let resp = app.call(req).await.expect("running request");
    let status = resp.status();
    let body = hyper::body::to_bytes(resp.into_body())
        .await
        .expect("recovering resp bytes");
    if status == http::StatusCode::OK {
        if std::any::TypeId::of::<Resp>() == std::any::TypeId::of::<()>() {
            // the server returns an empty string in this situation, which does not parse properly with serde_json
            return Ok(serde_json::from_slice(b"null").unwrap());
        } else {
            return Ok(serde_json::from_slice(&body).unwrap_or_else(|err| {
                panic!(
                    r#"
                        Failed parsing resp body!

                        The error is the following:
                        ---
                        {err}
                        ---

                        Response body is:
                        ---
                        {body:?}
                        ---

                        Request was:
                        ---
                        {req_body:?}
                        ---
                    "#
                )
            }));
        }
    }
    Err(ApiError::parse(&body)
        .unwrap_or_else(|err| panic!("parsing error response body {err}, body is {body:?}")))
}

fn request_builder(method: &str, uri: &str, token: Option<Uuid>) -> request::Builder {
    let req = request::Builder::new().method(method).uri(uri);
    match token {
        Some(token) => req.header(http::header::AUTHORIZATION, format!("bearer {token}")),
        None => req,
    }
}

async fn run_on_app<Req, Resp>(
    app: &mut Router,
    method: &str,
    uri: &str,
    token: Option<Uuid>,
    body: &Req,
) -> Result<Resp, ApiError>
where
    Req: Debug + serde::Serialize,
    Resp: 'static + for<'de> serde::Deserialize<'de>,
{
    let req = request_builder(method, uri, token)
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(axum::body::Body::from(
            serde_json::to_vec(body).expect("serializing request body to json"),
        ))
        .expect("building request");
    call(app, req, body).await
}

/// Percent-encodes every byte, which any form decoder accepts
fn form_encode(s: &str) -> String {
    s.bytes().map(|b| format!("%{b:02X}")).collect()
}

/// Posts `text` either as a form body or in the query string
async fn run_comment_on_app<Resp>(
    app: &mut Router,
    uri: &str,
    token: Option<Uuid>,
    text: &str,
    via_query: bool,
) -> Result<Resp, ApiError>
where
    Resp: 'static + for<'de> serde::Deserialize<'de>,
{
    let req = match via_query {
        true => request_builder("POST", &format!("{uri}?text={}", form_encode(text)), token)
            .body(axum::body::Body::empty()),
        false => request_builder("POST", uri, token)
            .header(
                http::header::CONTENT_TYPE,
                "application/x-www-form-urlencoded",
            )
            .body(axum::body::Body::from(format!("text={}", form_encode(text)))),
    }
    .expect("building request");
    call(app, req, &text).await
}

fn compare<T>(name: &str, app_res: Result<T, ApiError>, mock_res: Result<T, ApiError>)
where
    T: Debug + PartialEq,
{
    assert_eq!(
        app_res, mock_res,
        "app and mock did not return the same result for {name}"
    );
}

/// Erases timestamps, which the app and the mock each take from their own clock
fn normalize(res: Result<Changeset, ApiError>) -> Result<Changeset, ApiError> {
    let epoch = Time::default();
    res.map(|mut c| {
        c.created_at = epoch;
        for comm in c.comments.iter_mut() {
            comm.created_at = epoch;
        }
        c
    })
}

fn resize_int(fuzz_id: usize, RangeTo { end }: RangeTo<usize>) -> Option<usize> {
    if end == 0 {
        return None;
    }
    let bucket_size = cmp::max(1, usize::MAX / end); // in case we rounded to 0
    let id = fuzz_id / bucket_size;
    Some(cmp::min(id, end - 1)) // in case id was actually over end - 1 due to rounding
}

struct Session {
    app: AuthToken,
    mock: AuthToken,
}

struct ComparativeFuzzer {
    admin_token: Uuid,
    app: Router,
    mock: MockServer,
    sessions: Vec<Session>,
}

impl ComparativeFuzzer {
    async fn new(pool: sqlx::PgPool) -> ComparativeFuzzer {
        let admin_token = Uuid::new_v4();
        let app = app(pool, Some(AuthToken(admin_token)), false).await;
        let mock = MockServer::new();
        let sessions = Vec::new();
        ComparativeFuzzer {
            admin_token,
            app,
            mock,
            sessions,
        }
    }

    #[async_recursion]
    async fn with_session(&mut self, sid: usize) -> Option<usize> {
        match resize_int(sid, ..self.sessions.len()) {
            Some(sid) => Some(sid),
            None if self.mock.test_num_users() == 0 => None,
            None => {
                self.execute_fuzz_op(FuzzOp::CreateSession { uid: sid }).await;
                resize_int(sid, ..self.sessions.len())
            }
        }
    }

    fn changeset_for(&self, cid: usize) -> ChangesetId {
        match resize_int(cid, ..self.mock.test_num_changesets()) {
            Some(idx) => self.mock.test_get_changeset(idx),
            None => ChangesetId(1),
        }
    }

    fn comment_for(&self, comment: usize) -> CommentId {
        let idx = resize_int(comment, ..self.mock.test_num_comments() + 1).unwrap_or(0);
        CommentId(idx as i64 + 1)
    }

    #[async_recursion]
    async fn execute_fuzz_op(&mut self, op: FuzzOp) {
        match op {
            FuzzOp::CreateUser(new_user) => compare(
                "CreateUser",
                run_on_app(
                    &mut self.app,
                    "POST",
                    "/api/admin/create-user",
                    Some(self.admin_token),
                    &new_user,
                )
                .await,
                self.mock.admin_create_user(new_user),
            ),
            FuzzOp::CreateSession { uid } => {
                if let Some(uid) = resize_int(uid, ..self.mock.test_num_users()) {
                    let session = NewSession {
                        user: self.mock.test_get_user(uid),
                    };
                    let app_tok = run_on_app(
                        &mut self.app,
                        "POST",
                        "/api/admin/create-session",
                        Some(self.admin_token),
                        &session,
                    )
                    .await;
                    let mock_tok = self.mock.admin_create_session(session);
                    if let (&Ok(app), &Ok(mock)) = (&app_tok, &mock_tok) {
                        self.sessions.push(Session { app, mock });
                    }
                    compare("CreateSession", app_tok.map(|_| ()), mock_tok.map(|_| ()));
                } else {
                    self.execute_fuzz_op(FuzzOp::CreateUser(NewUser {
                        id: UserId::stub(),
                        name: String::from("user"),
                        max_changeset_comments_per_hour: 5,
                        moderator: true,
                        data_public: true,
                    }))
                    .await;
                    self.execute_fuzz_op(FuzzOp::CreateSession { uid }).await;
                }
            }
            FuzzOp::CreateChangeset { id, uid, open } => {
                let owner = match resize_int(uid, ..self.mock.test_num_users()) {
                    Some(uid) => self.mock.test_get_user(uid),
                    None => UserId::stub(),
                };
                let changeset = NewChangeset { id, owner, open };
                compare(
                    "CreateChangeset",
                    run_on_app(
                        &mut self.app,
                        "POST",
                        "/api/admin/create-changeset",
                        Some(self.admin_token),
                        &changeset,
                    )
                    .await,
                    self.mock.admin_create_changeset(changeset),
                )
            }
            FuzzOp::FetchChangeset { cid } => {
                let changeset = self.changeset_for(cid);
                let app_res = run_on_app(
                    &mut self.app,
                    "GET",
                    &format!("/api/0.6/changeset/{}", changeset.0),
                    None,
                    &(),
                )
                .await;
                let mock_res = self.mock.fetch_changeset(Some(changeset)).await;
                compare("FetchChangeset", normalize(app_res), normalize(mock_res));
            }
            FuzzOp::CreateComment {
                sid,
                cid,
                text,
                via_query,
            } => {
                if let Some(sid) = self.with_session(sid).await {
                    let changeset = self.changeset_for(cid);
                    let app_res = run_comment_on_app(
                        &mut self.app,
                        &format!("/api/0.6/changeset/{}/comment", changeset.0),
                        Some(self.sessions[sid].app.0),
                        &text,
                        via_query,
                    )
                    .await;
                    let mock_res = self
                        .mock
                        .create_comment(self.sessions[sid].mock, Some(changeset), Some(&text))
                        .await;
                    compare("CreateComment", normalize(app_res), normalize(mock_res));
                }
            }
            FuzzOp::HideComment { sid, comment } => {
                if let Some(sid) = self.with_session(sid).await {
                    let comment = self.comment_for(comment);
                    let app_res = run_on_app(
                        &mut self.app,
                        "POST",
                        &format!("/api/0.6/changeset/comment/{}/hide", comment.0),
                        Some(self.sessions[sid].app.0),
                        &(),
                    )
                    .await;
                    let mock_res = self
                        .mock
                        .hide_comment(self.sessions[sid].mock, Some(comment))
                        .await;
                    compare("HideComment", normalize(app_res), normalize(mock_res));
                }
            }
            FuzzOp::RestoreComment { sid, comment } => {
                if let Some(sid) = self.with_session(sid).await {
                    let comment = self.comment_for(comment);
                    let app_res = run_on_app(
                        &mut self.app,
                        "POST",
                        &format!("/api/0.6/changeset/comment/{}/unhide", comment.0),
                        Some(self.sessions[sid].app.0),
                        &(),
                    )
                    .await;
                    let mock_res = self
                        .mock
                        .restore_comment(self.sessions[sid].mock, Some(comment))
                        .await;
                    compare("RestoreComment", normalize(app_res), normalize(mock_res));
                }
            }
        }
    }
}

do_sqlx_test!(
    compare_with_mock,
    bolero::generator::gen_with::<Vec<FuzzOp>>().len(1..100usize),
    |pool, test: Vec<FuzzOp>| async move {
        let mut fuzzer = ComparativeFuzzer::new(pool).await;
        for op in test {
            fuzzer.execute_fuzz_op(op).await;
        }
    }
);

#[test]
fn form_encode_escapes_everything() {
    assert_eq!(form_encode("a b&"), "%61%20%62%26");
    assert_eq!(form_encode(""), "");
}

#[test]
fn resize_int_stays_in_range() {
    assert_eq!(resize_int(12, ..0), None);
    assert_eq!(resize_int(0, ..3), Some(0));
    assert_eq!(resize_int(usize::MAX, ..3), Some(2));
}
