#![cfg(test)]

use std::{cmp, fmt::Debug, ops::RangeTo, panic::AssertUnwindSafe, path::Path};

use async_recursion::async_recursion;
use axum::{
    extract::FromRequestParts,
    http::{self, request},
};
use chrono::{Duration, TimeZone, Utc};
use phreddit_api::{
    ActivityStats, AdminNewUser, Comment, CommentEdit, CommentId, Community, CommunityId,
    Error as ApiError, Flair, FlairId, NewComment, NewCommunity, NewFlair, NewPost, NewSession,
    NewUser, Post, PostId, ThreadEntry, Time, User, UserId, UserProfile, VoteDirection,
};
use phreddit_mock_server::MockServer;
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

/// Runs `f` against a fresh, migrated database, or skips it when PostgreSQL is
/// not installed
fn with_test_db<F>(name: &str, f: F)
where
    F: std::panic::UnwindSafe + FnOnce(&tokio::runtime::Runtime, PgPool),
{
    if std::env::var("RUST_LOG").is_ok() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    }
    let lockfile = tempfile::tempfile().expect("creating tempfile");
    let datadir = tempfile::tempdir().expect("creating tempdir");
    let datadir_path: &Path = datadir.as_ref();
    let Some(cluster) = build_pg_cluster(datadir_path) else {
        eprintln!("skipping {name}: postgresql seems to not be installed in path");
        return;
    };
    let datadir_path: &str = datadir_path.to_str().expect("tempdir is not valid utf8");
    postgresfixture::coordinate::run_and_destroy(&cluster, lockfile.into(), || {
        cluster
            .createdb("test_db")
            .expect("creating test_db database");
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("failed initializing tokio runtime");
        let pool = runtime.block_on(async move {
            let pool = create_sqlx_pool(
                &format!("postgresql://?host={}&dbname=test_db", datadir_path),
                8,
            )
            .await
            .expect("creating sqlx pool");
            MIGRATOR
                .run(&mut *pool.acquire().await.expect("getting migrator connection"))
                .await
                .expect("failed applying migrations");
            pool
        });
        f(&runtime, pool)
    })
    .expect("coordinating spinup and shutdown of the pg cluster");
}

macro_rules! do_sqlx_test {
    ( $name:ident, $gen:expr, $fn:expr ) => {
        #[test]
        fn $name() {
            with_test_db(stringify!($name), |runtime, pool| {
                let runtime = AssertUnwindSafe(runtime);
                let pool = AssertUnwindSafe(pool);
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

#[derive(Clone, Debug, bolero::generator::TypeGenerator)]
enum FuzzOp {
    CreateUser {
        #[generator(bolero::generator::gen_with::<String>().len(1..20usize))]
        name: String,
        through_admin: bool,
        is_admin: bool,
        low_reputation: bool,
    },
    Auth {
        uid: usize,
    },
    Unauth {
        sid: usize,
    },
    Whoami {
        sid: usize,
    },
    CreateCommunity {
        sid: usize,
        #[generator(bolero::generator::gen_with::<String>().len(1..20usize))]
        name: String,
        minutes: u16,
    },
    SetMembership {
        sid: usize,
        cid: usize,
        join: bool,
    },
    CreateFlair {
        sid: usize,
        #[generator(bolero::generator::gen_with::<String>().len(1..40usize))]
        content: String,
    },
    CreatePost {
        sid: usize,
        cid: usize,
        fid: Option<usize>,
        #[generator(bolero::generator::gen_with::<String>().len(1..20usize))]
        title: String,
        minutes: u16,
    },
    ViewPost {
        pid: usize,
    },
    CreateComment {
        sid: Option<usize>,
        pid: usize,
        parent: Option<usize>,
        #[generator(bolero::generator::gen_with::<String>().len(1..20usize))]
        content: String,
        minutes: u16,
    },
    EditComment {
        sid: usize,
        comment: usize,
        #[generator(bolero::generator::gen_with::<String>().len(0..20usize))]
        content: String,
    },
    Vote {
        sid: usize,
        target: usize,
        on_comment: bool,
        dir: VoteDirection,
    },
    DeleteComment {
        sid: usize,
        comment: usize,
    },
    DeletePost {
        sid: usize,
        pid: usize,
    },
    DeleteCommunity {
        sid: usize,
        cid: usize,
    },
    DeleteUser {
        sid: usize,
        uid: usize,
    },
    FetchTree {
        pid: usize,
    },
    FetchStats {
        pid: usize,
    },
    ListAll,
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

async fn run_on_app<Req, Resp>(
    app: &mut Router,
    method: &str,
    uri: &str,
    token: Option<AuthToken>,
    body: &Req,
) -> Result<Resp, ApiError>
where
    Req: Debug + serde::Serialize,
    Resp: 'static + for<'de> serde::Deserialize<'de>,
{
    let req = request::Builder::new()
        .method(method)
        .uri(uri)
        .header(http::header::CONTENT_TYPE, "application/json");
    let req = match token {
        Some(token) => req.header(http::header::AUTHORIZATION, format!("bearer {}", token.0)),
        None => req,
    };
    let req = req
        .body(axum::body::Body::from(
            serde_json::to_vec(body).expect("serializing request body to json"),
        ))
        .expect("building request");
    call(app, req, body).await
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

fn resize_int(fuzz_id: usize, RangeTo { end }: RangeTo<usize>) -> Option<usize> {
    if end == 0 {
        return None;
    }
    let bucket_size = cmp::max(1, usize::MAX / end); // in case we rounded to 0
    let id = fuzz_id / bucket_size;
    Some(cmp::min(id, end - 1)) // in case id was actually over end - 1 due to rounding
}

fn pick<T: Copy>(items: &[T], fuzz_id: usize) -> Option<T> {
    resize_int(fuzz_id, ..items.len()).map(|i| items[i])
}

fn base_time() -> Time {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

fn at(minutes: u16) -> Time {
    base_time() + Duration::minutes(i64::from(minutes))
}

// Registration dates are picked by each server on its own
fn normalize_user(mut u: User) -> User {
    u.created = base_time();
    u
}

fn normalize_profile(mut p: UserProfile) -> UserProfile {
    p.user = normalize_user(p.user);
    p
}

#[derive(Clone, Copy, Debug)]
struct Session {
    app: AuthToken,
    mock: AuthToken,
}

struct ComparativeFuzzer {
    admin_token: AuthToken,
    app: Router,
    mock: MockServer,
    sessions: Vec<Session>,
}

impl ComparativeFuzzer {
    async fn new(pool: PgPool) -> ComparativeFuzzer {
        let admin_token = AuthToken(Uuid::new_v4());
        let app = app(pool, Some(admin_token)).await;
        let mock = MockServer::new();
        let sessions = Vec::new();
        ComparativeFuzzer {
            admin_token,
            app,
            mock,
            sessions,
        }
    }

    fn session(&self, sid: usize) -> Option<Session> {
        pick(&self.sessions, sid)
    }

    #[async_recursion]
    async fn execute_fuzz_op(&mut self, op: FuzzOp) {
        match op {
            FuzzOp::CreateUser {
                name,
                through_admin,
                is_admin,
                low_reputation,
            } => {
                let user = NewUser::new(
                    UserId(Uuid::new_v4()),
                    String::from("First"),
                    String::from("Last"),
                    format!("{name}@example.org"),
                    name,
                    String::from("password"),
                );
                if through_admin {
                    let data = AdminNewUser {
                        user,
                        reputation: match low_reputation {
                            true => phreddit_api::VOTE_REPUTATION_THRESHOLD - 1,
                            false => phreddit_api::DEFAULT_REPUTATION,
                        },
                        is_admin,
                    };
                    compare(
                        "AdminCreateUser",
                        run_on_app(
                            &mut self.app,
                            "POST",
                            "/api/admin/create-user",
                            Some(self.admin_token),
                            &data,
                        )
                        .await,
                        self.mock.admin_create_user(data),
                    )
                } else {
                    compare(
                        "Register",
                        run_on_app(&mut self.app, "POST", "/api/register", None, &user).await,
                        self.mock.register(user),
                    )
                }
            }
            FuzzOp::Auth { uid } => {
                if let Some(uid) = resize_int(uid, ..self.mock.test_num_users()) {
                    let (email, password) = self.mock.test_get_user_info(uid);
                    let session = NewSession {
                        email: String::from(email),
                        password: String::from(password),
                    };
                    let app_tok =
                        run_on_app(&mut self.app, "POST", "/api/auth", None, &session).await;
                    let mock_tok = self.mock.auth(session);
                    if let (&Ok(app), &Ok(mock)) = (&app_tok, &mock_tok) {
                        self.sessions.push(Session { app, mock });
                    }
                    compare("Auth", app_tok.map(|_| ()), mock_tok.map(|_| ()));
                } else {
                    self.execute_fuzz_op(FuzzOp::CreateUser {
                        name: String::from("user"),
                        through_admin: false,
                        is_admin: false,
                        low_reputation: false,
                    })
                    .await;
                    self.execute_fuzz_op(FuzzOp::Auth { uid }).await;
                }
            }
            FuzzOp::Unauth { sid } => {
                if let Some(s) = self.session(sid) {
                    compare(
                        "Unauth",
                        run_on_app(&mut self.app, "POST", "/api/unauth", Some(s.app), &()).await,
                        self.mock.unauth(s.mock),
                    );
                }
            }
            FuzzOp::Whoami { sid } => {
                if let Some(s) = self.session(sid) {
                    compare(
                        "Whoami",
                        run_on_app(&mut self.app, "GET", "/api/whoami", Some(s.app), &())
                            .await
                            .map(normalize_profile),
                        self.mock.whoami(s.mock).map(normalize_profile),
                    );
                }
            }
            FuzzOp::CreateCommunity { sid, name, minutes } => {
                if let Some(s) = self.session(sid) {
                    let mut data = NewCommunity::now(name, String::from("description"));
                    data.date = at(minutes);
                    compare::<Community>(
                        "CreateCommunity",
                        run_on_app(&mut self.app, "POST", "/api/communities", Some(s.app), &data)
                            .await,
                        self.mock.create_community(s.mock, data),
                    );
                }
            }
            FuzzOp::SetMembership { sid, cid, join } => {
                if let (Some(s), Some(c)) = (
                    self.session(sid),
                    pick(&self.mock.test_community_ids(), cid),
                ) {
                    let (action, mock_res) = match join {
                        true => ("join", self.mock.join_community(s.mock, c)),
                        false => ("leave", self.mock.leave_community(s.mock, c)),
                    };
                    compare::<Community>(
                        "SetMembership",
                        run_on_app(
                            &mut self.app,
                            "POST",
                            &format!("/api/communities/{}/{action}", c.0),
                            Some(s.app),
                            &(),
                        )
                        .await,
                        mock_res,
                    );
                }
            }
            FuzzOp::CreateFlair { sid, content } => {
                if let Some(s) = self.session(sid) {
                    let data = NewFlair::new(content);
                    compare::<Flair>(
                        "CreateFlair",
                        run_on_app(&mut self.app, "POST", "/api/flairs", Some(s.app), &data).await,
                        self.mock.create_flair(s.mock, data),
                    );
                }
            }
            FuzzOp::CreatePost {
                sid,
                cid,
                fid,
                title,
                minutes,
            } => {
                if let (Some(s), Some(c)) = (
                    self.session(sid),
                    pick(&self.mock.test_community_ids(), cid),
                ) {
                    let flair = fid.and_then(|f| pick::<FlairId>(&self.mock.test_flair_ids(), f));
                    let mut data = NewPost::now(c, title, String::from("content"), flair);
                    data.date = at(minutes);
                    compare::<Post>(
                        "CreatePost",
                        run_on_app(&mut self.app, "POST", "/api/posts", Some(s.app), &data).await,
                        self.mock.create_post(s.mock, data),
                    );
                }
            }
            FuzzOp::ViewPost { pid } => {
                if let Some(p) = pick(&self.mock.test_post_ids(), pid) {
                    compare::<Post>(
                        "ViewPost",
                        run_on_app(
                            &mut self.app,
                            "POST",
                            &format!("/api/posts/{}/views", p.0),
                            None,
                            &(),
                        )
                        .await,
                        self.mock.view_post(p),
                    );
                }
            }
            FuzzOp::CreateComment {
                sid,
                pid,
                parent,
                content,
                minutes,
            } => {
                let Some(p) = pick(&self.mock.test_post_ids(), pid) else {
                    return;
                };
                let session = sid.and_then(|s| self.session(s));
                let parent =
                    parent.and_then(|c| pick::<CommentId>(&self.mock.test_comment_ids(), c));
                let mut data = NewComment::now(parent, content);
                data.date = at(minutes);
                compare::<Comment>(
                    "CreateComment",
                    run_on_app(
                        &mut self.app,
                        "POST",
                        &format!("/api/posts/{}/comments", p.0),
                        session.map(|s| s.app),
                        &data,
                    )
                    .await,
                    self.mock
                        .create_comment(session.map(|s| s.mock), p, data),
                );
            }
            FuzzOp::EditComment {
                sid,
                comment,
                content,
            } => {
                if let (Some(s), Some(c)) = (
                    self.session(sid),
                    pick(&self.mock.test_comment_ids(), comment),
                ) {
                    let data = CommentEdit { content };
                    compare::<Comment>(
                        "EditComment",
                        run_on_app(
                            &mut self.app,
                            "PATCH",
                            &format!("/api/comments/{}", c.0),
                            Some(s.app),
                            &data,
                        )
                        .await,
                        self.mock.edit_comment(s.mock, c, data),
                    );
                }
            }
            FuzzOp::Vote {
                sid,
                target,
                on_comment,
                dir,
            } => {
                let Some(s) = self.session(sid) else {
                    return;
                };
                let action = match dir {
                    VoteDirection::Up => "upvote",
                    VoteDirection::Down => "downvote",
                };
                if on_comment {
                    if let Some(c) = pick(&self.mock.test_comment_ids(), target) {
                        let mock_res = match dir {
                            VoteDirection::Up => self.mock.upvote_comment(s.mock, c),
                            VoteDirection::Down => self.mock.downvote_comment(s.mock, c),
                        };
                        compare::<Comment>(
                            "VoteComment",
                            run_on_app(
                                &mut self.app,
                                "POST",
                                &format!("/api/comments/{}/{action}", c.0),
                                Some(s.app),
                                &(),
                            )
                            .await,
                            mock_res,
                        );
                    }
                } else if let Some(p) = pick(&self.mock.test_post_ids(), target) {
                    let mock_res = match dir {
                        VoteDirection::Up => self.mock.upvote_post(s.mock, p),
                        VoteDirection::Down => self.mock.downvote_post(s.mock, p),
                    };
                    compare::<Post>(
                        "VotePost",
                        run_on_app(
                            &mut self.app,
                            "POST",
                            &format!("/api/posts/{}/{action}", p.0),
                            Some(s.app),
                            &(),
                        )
                        .await,
                        mock_res,
                    );
                }
            }
            FuzzOp::DeleteComment { sid, comment } => {
                if let (Some(s), Some(c)) = (
                    self.session(sid),
                    pick(&self.mock.test_comment_ids(), comment),
                ) {
                    compare::<()>(
                        "DeleteComment",
                        run_on_app(
                            &mut self.app,
                            "DELETE",
                            &format!("/api/comments/{}", c.0),
                            Some(s.app),
                            &(),
                        )
                        .await,
                        self.mock.delete_comment(s.mock, c).await,
                    );
                }
            }
            FuzzOp::DeletePost { sid, pid } => {
                if let (Some(s), Some(p)) =
                    (self.session(sid), pick(&self.mock.test_post_ids(), pid))
                {
                    compare::<()>(
                        "DeletePost",
                        run_on_app(
                            &mut self.app,
                            "DELETE",
                            &format!("/api/posts/{}", p.0),
                            Some(s.app),
                            &(),
                        )
                        .await,
                        self.mock.delete_post(s.mock, p),
                    );
                }
            }
            FuzzOp::DeleteCommunity { sid, cid } => {
                if let (Some(s), Some(c)) = (
                    self.session(sid),
                    pick::<CommunityId>(&self.mock.test_community_ids(), cid),
                ) {
                    compare::<()>(
                        "DeleteCommunity",
                        run_on_app(
                            &mut self.app,
                            "DELETE",
                            &format!("/api/communities/{}", c.0),
                            Some(s.app),
                            &(),
                        )
                        .await,
                        self.mock.delete_community(s.mock, c),
                    );
                }
            }
            FuzzOp::DeleteUser { sid, uid } => {
                if let (Some(s), Some(u)) =
                    (self.session(sid), pick(&self.mock.test_user_ids(), uid))
                {
                    compare::<()>(
                        "DeleteUser",
                        run_on_app(
                            &mut self.app,
                            "DELETE",
                            &format!("/api/users/{}", u.0),
                            Some(s.app),
                            &(),
                        )
                        .await,
                        self.mock.delete_user(s.mock, u).await,
                    );
                }
            }
            FuzzOp::FetchTree { pid } => {
                if let Some(p) = pick::<PostId>(&self.mock.test_post_ids(), pid) {
                    compare::<Vec<ThreadEntry>>(
                        "FetchTree",
                        run_on_app(
                            &mut self.app,
                            "GET",
                            &format!("/api/posts/{}/comments", p.0),
                            None,
                            &(),
                        )
                        .await,
                        self.mock.comment_tree(p).await,
                    );
                }
            }
            FuzzOp::FetchStats { pid } => {
                if let Some(p) = pick::<PostId>(&self.mock.test_post_ids(), pid) {
                    compare::<ActivityStats>(
                        "FetchStats",
                        run_on_app(
                            &mut self.app,
                            "GET",
                            &format!("/api/posts/{}/stats", p.0),
                            None,
                            &(),
                        )
                        .await,
                        self.mock.post_stats(p).await,
                    );
                }
            }
            FuzzOp::ListAll => {
                compare(
                    "FetchUsers",
                    run_on_app::<_, Vec<User>>(&mut self.app, "GET", "/api/users", None, &())
                        .await
                        .map(|u| u.into_iter().map(normalize_user).collect()),
                    Ok(self
                        .mock
                        .fetch_users()
                        .into_iter()
                        .map(normalize_user)
                        .collect::<Vec<_>>()),
                );
                compare(
                    "FetchCommunities",
                    run_on_app(&mut self.app, "GET", "/api/communities", None, &()).await,
                    Ok(self.mock.fetch_communities()),
                );
                compare(
                    "FetchPosts",
                    run_on_app(&mut self.app, "GET", "/api/posts", None, &()).await,
                    Ok(self.mock.fetch_posts()),
                );
                compare(
                    "FetchFlairs",
                    run_on_app(&mut self.app, "GET", "/api/flairs", None, &()).await,
                    Ok(self.mock.fetch_flairs()),
                );
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
fn cascade_stats_and_votes_on_postgres() {
    with_test_db("cascade_stats_and_votes_on_postgres", |runtime, pool| {
        runtime.block_on(async move {
            let mut app = app(pool, None).await;
            let user = NewUser::new(
                UserId(Uuid::new_v4()),
                String::from("Ada"),
                String::from("Lovelace"),
                String::from("ada@example.org"),
                String::from("countess"),
                String::from("password"),
            );
            let () = run_on_app(&mut app, "POST", "/api/register", None, &user)
                .await
                .unwrap();
            let session = NewSession {
                email: user.email.clone(),
                password: user.password.clone(),
            };
            let tok: AuthToken = run_on_app(&mut app, "POST", "/api/auth", None, &session)
                .await
                .unwrap();
            let mut community = NewCommunity::now(String::from("rust"), String::from("rust"));
            community.date = base_time();
            let community: Community =
                run_on_app(&mut app, "POST", "/api/communities", Some(tok), &community)
                    .await
                    .unwrap();
            let mut post = NewPost::now(
                community.id,
                String::from("Hello"),
                String::from("World"),
                None,
            );
            post.date = base_time();
            let post: Post = run_on_app(&mut app, "POST", "/api/posts", Some(tok), &post)
                .await
                .unwrap();
            let stats_uri = format!("/api/posts/{}/stats", post.id.0);
            let stats: ActivityStats = run_on_app(&mut app, "GET", &stats_uri, None, &())
                .await
                .unwrap();
            assert_eq!(
                stats,
                ActivityStats {
                    count: 0,
                    latest: base_time(),
                }
            );

            // A -> B -> C
            let comments_uri = format!("/api/posts/{}/comments", post.id.0);
            let mut parent = None;
            let mut chain = Vec::new();
            for minutes in 1..=3 {
                let mut c = NewComment::now(parent, format!("level {minutes}"));
                c.date = at(minutes);
                let c: Comment = run_on_app(&mut app, "POST", &comments_uri, Some(tok), &c)
                    .await
                    .unwrap();
                parent = Some(c.id);
                chain.push(c.id);
            }
            let stats: ActivityStats = run_on_app(&mut app, "GET", &stats_uri, None, &())
                .await
                .unwrap();
            assert_eq!(
                stats,
                ActivityStats {
                    count: 3,
                    latest: at(3),
                }
            );
            let thread: Vec<ThreadEntry> = run_on_app(&mut app, "GET", &comments_uri, None, &())
                .await
                .unwrap();
            assert_eq!(
                thread
                    .iter()
                    .map(|e| (e.depth, e.comment.id))
                    .collect::<Vec<_>>(),
                chain.iter().copied().enumerate().collect::<Vec<_>>()
            );

            let vote_uri = |dir: &str| format!("/api/comments/{}/{dir}", chain[2].0);
            for (dir, count) in [("upvote", 1), ("downvote", -1), ("downvote", 0)] {
                let c: Comment = run_on_app(&mut app, "POST", &vote_uri(dir), Some(tok), &())
                    .await
                    .unwrap();
                assert_eq!(c.votes.count, count);
            }

            let () = run_on_app(
                &mut app,
                "DELETE",
                &format!("/api/posts/{}", post.id.0),
                Some(tok),
                &(),
            )
            .await
            .unwrap();
            for c in chain {
                assert_eq!(
                    run_on_app::<_, Comment>(
                        &mut app,
                        "GET",
                        &format!("/api/comments/{}", c.0),
                        None,
                        &()
                    )
                    .await,
                    Err(ApiError::NotFound(c.0))
                );
            }
            assert_eq!(
                run_on_app::<_, Vec<ThreadEntry>>(&mut app, "GET", &comments_uri, None, &())
                    .await,
                Err(ApiError::NotFound(post.id.0))
            );
        });
    });
}
