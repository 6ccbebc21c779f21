use chrono::Duration;

use super::*;

fn new_user(n: u128, name: &str) -> NewUser {
    NewUser::new(
        UserId(Uuid::from_u128(n)),
        String::from("First"),
        String::from("Last"),
        format!("{name}@example.org"),
        String::from(name),
        String::from("hunter22"),
    )
}

fn login(mock: &mut MockServer, name: &str) -> AuthToken {
    mock.auth(NewSession {
        email: format!("{name}@example.org"),
        password: String::from("hunter22"),
    })
    .expect("logging in")
}

struct Forum {
    mock: MockServer,
    alice: AuthToken,
    bob: AuthToken,
    post: Post,
}

/// Alice created a community with one post in it, Bob is a regular user
fn forum() -> Forum {
    let mut mock = MockServer::new();
    mock.register(new_user(1, "alice")).unwrap();
    mock.register(new_user(2, "bob")).unwrap();
    let alice = login(&mut mock, "alice");
    let bob = login(&mut mock, "bob");
    let community = mock
        .create_community(
            alice,
            NewCommunity::now(String::from("rust"), String::from("All about rust")),
        )
        .unwrap();
    let post = mock
        .create_post(
            alice,
            NewPost::now(
                community.id,
                String::from("Hello"),
                String::from("First post"),
                None,
            ),
        )
        .unwrap();
    Forum {
        mock,
        alice,
        bob,
        post,
    }
}

fn reply(f: &mut Forum, parent: Option<CommentId>, minutes: i64) -> CommentId {
    let mut c = NewComment::now(parent, format!("reply at {minutes}"));
    c.date = f.post.date + Duration::minutes(minutes);
    f.mock.create_comment(Some(f.bob), f.post.id, c).unwrap().id
}

#[tokio::test]
async fn stats_count_every_comment() {
    let mut f = forum();
    assert_eq!(
        f.mock.post_stats(f.post.id).await.unwrap(),
        ActivityStats {
            count: 0,
            latest: f.post.date,
        }
    );
    let a = reply(&mut f, None, 1);
    reply(&mut f, Some(a), 2);
    assert_eq!(
        f.mock.post_stats(f.post.id).await.unwrap(),
        ActivityStats {
            count: 2,
            latest: f.post.date + Duration::minutes(2),
        }
    );
}

#[tokio::test]
async fn deep_trees_are_fully_assembled() {
    let mut f = forum();
    let mut parent = None;
    for i in 0..30 {
        parent = Some(reply(&mut f, parent, i));
    }
    let thread = f.mock.comment_tree(f.post.id).await.unwrap();
    assert_eq!(
        thread.iter().map(|e| e.depth).collect::<Vec<_>>(),
        (0..30).collect::<Vec<_>>()
    );
    assert_eq!(f.mock.post_stats(f.post.id).await.unwrap().count, 30);
}

#[tokio::test]
async fn hundred_thousand_replies_deep() {
    const DEPTH: i64 = 100_000;
    let mut f = forum();
    let mut parent = None;
    for i in 0..DEPTH {
        parent = Some(reply(&mut f, parent, i));
    }
    assert_eq!(
        f.mock.post_stats(f.post.id).await.unwrap(),
        ActivityStats {
            count: DEPTH as usize,
            latest: f.post.date + Duration::minutes(DEPTH - 1),
        }
    );
    let thread = f.mock.comment_tree(f.post.id).await.unwrap();
    assert_eq!(thread.len(), DEPTH as usize);
    assert_eq!(thread.last().map(|e| e.comment.id), parent);
    assert_eq!(thread.last().map(|e| e.depth), Some(DEPTH as usize - 1));
    drop(thread);

    // cutting the chain in the middle removes the whole lower half
    let middle = f.mock.comment_tree(f.post.id).await.unwrap()[DEPTH as usize / 2]
        .comment
        .id;
    f.mock.delete_comment(f.bob, middle).await.unwrap();
    assert_eq!(
        f.mock.post_stats(f.post.id).await.unwrap().count,
        DEPTH as usize / 2
    );
    f.mock.delete_post(f.alice, f.post.id).unwrap();
    assert!(f.mock.test_comment_ids().is_empty());
}

#[tokio::test]
async fn deleting_post_removes_comment_chain() {
    let mut f = forum();
    let a = reply(&mut f, None, 1);
    let b = reply(&mut f, Some(a), 2);
    let c = reply(&mut f, Some(b), 3);
    f.mock.delete_post(f.alice, f.post.id).unwrap();
    for id in [a, b, c] {
        assert_eq!(f.mock.fetch_comment(id), Err(Error::NotFound(id.0)));
    }
    assert_eq!(
        f.mock.comment_tree(f.post.id).await,
        Err(Error::NotFound(f.post.id.0))
    );
    assert!(f.mock.fetch_community(f.post.community_id).unwrap().post_ids.is_empty());
}

#[tokio::test]
async fn deleting_comment_unlinks_it() {
    let mut f = forum();
    let a = reply(&mut f, None, 1);
    let b = reply(&mut f, Some(a), 2);
    let c = reply(&mut f, Some(b), 3);
    let d = reply(&mut f, Some(a), 4);
    f.mock.delete_comment(f.bob, b).await.unwrap();
    assert_eq!(f.mock.fetch_comment(c), Err(Error::NotFound(c.0)));
    assert_eq!(f.mock.fetch_comment(a).unwrap().children, vec![d]);
    let thread = f.mock.comment_tree(f.post.id).await.unwrap();
    assert_eq!(
        thread
            .iter()
            .map(|e| (e.depth, e.comment.id))
            .collect::<Vec<_>>(),
        vec![(0, a), (1, d)]
    );

    f.mock.delete_comment(f.bob, a).await.unwrap();
    assert!(f.mock.fetch_post(f.post.id).unwrap().comment_ids.is_empty());
    assert_eq!(f.mock.post_stats(f.post.id).await.unwrap().count, 0);
}

#[tokio::test]
async fn only_authors_and_admins_delete() {
    let mut f = forum();
    let a = reply(&mut f, None, 1);
    assert_eq!(
        f.mock.delete_comment(f.alice, a).await,
        Err(Error::PermissionDenied)
    );
    assert_eq!(
        f.mock.delete_post(f.bob, f.post.id),
        Err(Error::PermissionDenied)
    );
    f.mock
        .admin_create_user(AdminNewUser {
            user: new_user(3, "root"),
            reputation: phreddit_api::ADMIN_REPUTATION,
            is_admin: true,
        })
        .unwrap();
    let root = login(&mut f.mock, "root");
    f.mock.delete_comment(root, a).await.unwrap();
    let missing = CommentId(Uuid::from_u128(42));
    assert_eq!(
        f.mock.delete_comment(root, missing).await,
        Err(Error::NotFound(missing.0))
    );
}

#[tokio::test]
async fn deleting_community_removes_everything_in_it() {
    let mut f = forum();
    let community = f.post.community_id;
    let bob_post = f
        .mock
        .create_post(
            f.bob,
            NewPost::now(
                community,
                String::from("Bob's"),
                String::from("Second post"),
                None,
            ),
        )
        .unwrap();
    let a = reply(&mut f, None, 1);
    let b = reply(&mut f, Some(a), 2);
    let c = f
        .mock
        .create_comment(
            Some(f.alice),
            bob_post.id,
            NewComment::now(None, String::from("on bob's post")),
        )
        .unwrap()
        .id;
    let d = f
        .mock
        .create_comment(None, bob_post.id, NewComment::now(Some(c), String::from("guest")))
        .unwrap()
        .id;

    let elsewhere = f
        .mock
        .create_community(
            f.bob,
            NewCommunity::now(String::from("go"), String::from("Not rust")),
        )
        .unwrap();
    let kept_post = f
        .mock
        .create_post(
            f.bob,
            NewPost::now(
                elsewhere.id,
                String::from("Kept"),
                String::from("Elsewhere"),
                None,
            ),
        )
        .unwrap();
    let kept_comment = f
        .mock
        .create_comment(
            Some(f.alice),
            kept_post.id,
            NewComment::now(None, String::from("kept")),
        )
        .unwrap()
        .id;

    assert_eq!(
        f.mock.delete_community(f.bob, community),
        Err(Error::PermissionDenied)
    );
    let missing = CommunityId(Uuid::from_u128(42));
    assert_eq!(
        f.mock.delete_community(f.alice, missing),
        Err(Error::NotFound(missing.0))
    );
    assert_eq!(f.mock.test_post_ids().len(), 3);

    f.mock.delete_community(f.alice, community).unwrap();
    assert_eq!(
        f.mock.fetch_community(community),
        Err(Error::NotFound(community.0))
    );
    for post in [f.post.id, bob_post.id] {
        assert_eq!(f.mock.fetch_post(post), Err(Error::NotFound(post.0)));
        assert_eq!(
            f.mock.comment_tree(post).await,
            Err(Error::NotFound(post.0))
        );
    }
    for id in [a, b, c, d] {
        assert_eq!(f.mock.fetch_comment(id), Err(Error::NotFound(id.0)));
    }
    assert_eq!(f.mock.fetch_post(kept_post.id).unwrap().comment_ids, vec![kept_comment]);
    assert_eq!(f.mock.test_comment_ids(), vec![kept_comment]);
    assert_eq!(f.mock.fetch_communities(), vec![elsewhere]);
    assert!(f
        .mock
        .user_posts(UserId(Uuid::from_u128(2)))
        .unwrap()
        .iter()
        .all(|p| p.id == kept_post.id));
}

#[test]
fn vote_up_down_cancel() {
    let mut f = forum();
    let x = f
        .mock
        .create_comment(None, f.post.id, NewComment::now(None, String::from("x")))
        .unwrap()
        .id;
    assert_eq!(f.mock.upvote_comment(f.bob, x).unwrap().votes.count, 1);
    let after = f.mock.downvote_comment(f.bob, x).unwrap().votes;
    assert_eq!(after.count, -1);
    assert!(after.downvoters.contains(&UserId(Uuid::from_u128(2))));
    assert!(after.upvoters.is_empty());
    assert_eq!(f.mock.downvote_comment(f.bob, x).unwrap().votes.count, 0);

    assert_eq!(f.mock.upvote_post(f.bob, f.post.id).unwrap().votes.count, 1);
    assert_eq!(f.mock.upvote_post(f.bob, f.post.id).unwrap().votes.count, 0);
}

#[test]
fn low_reputation_cannot_vote() {
    let mut f = forum();
    f.mock
        .admin_create_user(AdminNewUser {
            user: new_user(3, "newbie"),
            reputation: phreddit_api::VOTE_REPUTATION_THRESHOLD - 1,
            is_admin: false,
        })
        .unwrap();
    let newbie = login(&mut f.mock, "newbie");
    assert_eq!(
        f.mock.upvote_post(newbie, f.post.id),
        Err(Error::ReputationTooLow {
            reputation: phreddit_api::VOTE_REPUTATION_THRESHOLD - 1,
            required: phreddit_api::VOTE_REPUTATION_THRESHOLD,
        })
    );
    assert_eq!(f.mock.fetch_post(f.post.id).unwrap().votes, Default::default());
    let missing = PostId(Uuid::from_u128(42));
    assert_eq!(
        f.mock.upvote_post(f.bob, missing),
        Err(Error::NotFound(missing.0))
    );
}

#[test]
fn reply_must_stay_in_post() {
    let mut f = forum();
    let a = reply(&mut f, None, 1);
    let other = f
        .mock
        .create_post(
            f.bob,
            NewPost::now(
                f.post.community_id,
                String::from("Other"),
                String::from("Another post"),
                None,
            ),
        )
        .unwrap();
    assert_eq!(
        f.mock
            .create_comment(None, other.id, NewComment::now(Some(a), String::from("x"))),
        Err(Error::ParentNotInPost(a.0))
    );
    let missing = CommentId(Uuid::from_u128(42));
    assert_eq!(
        f.mock.create_comment(
            None,
            other.id,
            NewComment::now(Some(missing), String::from("x"))
        ),
        Err(Error::NotFound(missing.0))
    );
}

#[tokio::test]
async fn deleting_user_removes_their_content() {
    let mut f = forum();
    let a = reply(&mut f, None, 1);
    let guest = f
        .mock
        .create_comment(None, f.post.id, NewComment::now(None, String::from("guest")))
        .unwrap()
        .id;
    let bob_id = UserId(Uuid::from_u128(2));
    f.mock.join_community(f.bob, f.post.community_id).unwrap();
    f.mock.upvote_comment(f.bob, guest).unwrap();

    f.mock.delete_user(f.bob, bob_id).await.unwrap();
    assert_eq!(f.mock.fetch_comment(a), Err(Error::NotFound(a.0)));
    let guest = f.mock.fetch_comment(guest).unwrap();
    assert_eq!(guest.votes, Default::default());
    assert!(!f
        .mock
        .fetch_community(f.post.community_id)
        .unwrap()
        .members
        .contains(&bob_id));
    assert_eq!(f.mock.whoami(f.bob), Err(Error::PermissionDenied));

    // deleting alice takes her community and everything in it
    let alice_id = UserId(Uuid::from_u128(1));
    f.mock.delete_user(f.alice, alice_id).await.unwrap();
    assert!(f.mock.fetch_communities().is_empty());
    assert!(f.mock.fetch_posts().is_empty());
    assert_eq!(f.mock.test_num_users(), 0);
}

#[test]
fn registration_conflicts() {
    let mut mock = MockServer::new();
    mock.register(new_user(1, "alice")).unwrap();
    assert_eq!(
        mock.register(new_user(1, "other")),
        Err(Error::UuidAlreadyUsed(Uuid::from_u128(1)))
    );
    assert_eq!(
        mock.register(new_user(2, "alice")),
        Err(Error::EmailAlreadyUsed(String::from("alice@example.org")))
    );
    let mut u = new_user(2, "alice");
    u.email = String::from("alice2@example.org");
    assert_eq!(
        mock.register(u),
        Err(Error::NameAlreadyUsed(String::from("alice")))
    );
    assert_eq!(
        mock.auth(NewSession {
            email: String::from("alice@example.org"),
            password: String::from("wrong"),
        }),
        Err(Error::PermissionDenied)
    );
}

#[test]
fn search_and_views() {
    let mut f = forum();
    assert_eq!(f.mock.search("HELLO").len(), 1);
    assert_eq!(f.mock.search("first").len(), 1);
    assert!(f.mock.search("").is_empty());
    assert!(f.mock.search("absent").is_empty());
    assert_eq!(f.mock.view_post(f.post.id).unwrap().views, 1);
    assert_eq!(f.mock.view_post(f.post.id).unwrap().views, 2);
}
