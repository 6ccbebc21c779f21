use std::cmp::Reverse;

use async_trait::async_trait;
use futures::future::try_join_all;

use crate::{
    api::{ActivityStats, Community, Post, PostId, UserId},
    ClientError,
};

/// How a feed of posts (home page, community page, search results) is sorted
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Order {
    #[default]
    Newest,
    Oldest,
    /// Most recent activity first, activity being the latest comment at any
    /// depth or the post itself if it has no comments
    Active,
}

/// A post along with the activity summary its feed is sorted on
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FeedEntry {
    pub post: Post,
    pub stats: ActivityStats,
}

pub trait OrderExt {
    fn sort(&self, feed: &mut [FeedEntry]);
}

impl OrderExt for Order {
    fn sort(&self, feed: &mut [FeedEntry]) {
        // Ties are broken by id so that two fetches display the same feed
        match self {
            Order::Newest => feed.sort_unstable_by_key(|e| (Reverse(e.post.date), e.post.id)),
            Order::Oldest => feed.sort_unstable_by_key(|e| (e.post.date, e.post.id)),
            Order::Active => feed.sort_unstable_by_key(|e| {
                (Reverse(e.stats.latest), Reverse(e.post.date), e.post.id)
            }),
        }
    }
}

/// Where feeds get the activity stats of their posts from
#[async_trait]
pub trait StatsSource {
    async fn stats(&self, post: PostId) -> Result<ActivityStats, ClientError>;
}

/// Attaches activity stats to `posts` and sorts them for display
pub async fn build_feed<S>(
    source: &S,
    posts: Vec<Post>,
    order: Order,
) -> Result<Vec<FeedEntry>, ClientError>
where
    S: StatsSource + Sync,
{
    let stats = try_join_all(posts.iter().map(|p| source.stats(p.id))).await?;
    let mut feed = posts
        .into_iter()
        .zip(stats)
        .map(|(post, stats)| FeedEntry { post, stats })
        .collect::<Vec<_>>();
    order.sort(&mut feed);
    Ok(feed)
}

/// Moves the communities `user` is a member of to the top of the list, keeping
/// the relative order of both groups
pub fn joined_first(communities: &mut [Community], user: Option<UserId>) {
    if let Some(user) = user {
        communities.sort_by_key(|c| !c.members.contains(&user));
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use chrono::{Duration, TimeZone, Utc};

    use super::*;
    use crate::api::{
        self, Comment, CommunityId, NewComment, NewCommunity, NewPost, Time, Uuid,
    };

    fn base() -> Time {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn post(n: u128, minutes: i64) -> Post {
        let mut p = NewPost::now(
            CommunityId(Uuid::from_u128(1)),
            format!("post {n}"),
            String::from("content"),
            None,
        );
        p.id = PostId(Uuid::from_u128(n));
        p.date = base() + Duration::minutes(minutes);
        Post::from_new(UserId(Uuid::from_u128(1)), p)
    }

    fn entry(n: u128, post_minutes: i64, latest_minutes: i64) -> FeedEntry {
        FeedEntry {
            post: post(n, post_minutes),
            stats: ActivityStats {
                count: 0,
                latest: base() + Duration::minutes(latest_minutes),
            },
        }
    }

    /// Serves stats computed from an in-memory list of comments
    struct Comments {
        posts: Vec<Post>,
        comments: Vec<Comment>,
    }

    impl Comments {
        fn add(&mut self, post: u128, minutes: i64) {
            let mut c = NewComment::now(None, format!("at {minutes}"));
            c.date = base() + Duration::minutes(minutes);
            c.id = api::CommentId(Uuid::from_u128(1000 + self.comments.len() as u128));
            self.comments
                .push(Comment::from_new(PostId(Uuid::from_u128(post)), None, c));
        }
    }

    #[async_trait]
    impl StatsSource for Comments {
        async fn stats(&self, post: PostId) -> Result<ActivityStats, ClientError> {
            let p = self
                .posts
                .iter()
                .find(|p| p.id == post)
                .ok_or(ClientError::Api(api::Error::NotFound(post.0)))?;
            Ok(ActivityStats::of_comments(
                p.date,
                self.comments.iter().filter(|c| c.post_id == post),
            ))
        }
    }

    fn ids(feed: &[FeedEntry]) -> Vec<u128> {
        feed.iter().map(|e| e.post.id.0.as_u128()).collect()
    }

    #[test]
    fn newest_and_oldest() {
        let mut feed = vec![entry(1, 10, 10), entry(2, 30, 30), entry(3, 20, 20)];
        Order::Newest.sort(&mut feed);
        assert_eq!(ids(&feed), vec![2, 3, 1]);
        Order::Oldest.sort(&mut feed);
        assert_eq!(ids(&feed), vec![1, 3, 2]);
    }

    #[test]
    fn active_uses_latest_comment() {
        // post 1 is the oldest but got a reply after everything else
        let mut feed = vec![entry(1, 10, 50), entry(2, 30, 30), entry(3, 20, 40)];
        Order::Active.sort(&mut feed);
        assert_eq!(ids(&feed), vec![1, 3, 2]);
    }

    #[test]
    fn ties_are_stable_across_calls() {
        let mut a = vec![entry(2, 10, 10), entry(1, 10, 10), entry(3, 10, 10)];
        let mut b = vec![entry(3, 10, 10), entry(1, 10, 10), entry(2, 10, 10)];
        Order::Active.sort(&mut a);
        Order::Active.sort(&mut b);
        assert_eq!(ids(&a), ids(&b));
        assert_eq!(ids(&a), vec![1, 2, 3]);
    }

    #[test]
    fn feed_keeps_stats_with_their_post() {
        let mut src = Comments {
            posts: vec![post(1, 10), post(2, 30), post(3, 20)],
            comments: Vec::new(),
        };
        src.add(1, 50);
        src.add(1, 15);
        src.add(3, 40);
        let posts = src.posts.clone();

        let feed = futures::executor::block_on(build_feed(&src, posts.clone(), Order::Active))
            .unwrap();
        assert_eq!(ids(&feed), vec![1, 3, 2]);
        let counts = feed
            .iter()
            .map(|e| (e.post.id.0.as_u128(), e.stats.count))
            .collect::<HashMap<_, _>>();
        assert_eq!(counts, HashMap::from([(1, 2), (2, 0), (3, 1)]));
        assert_eq!(feed[2].stats.latest, feed[2].post.date);

        let feed = futures::executor::block_on(build_feed(&src, posts, Order::Newest)).unwrap();
        assert_eq!(ids(&feed), vec![2, 3, 1]);
        assert_eq!(feed[2].stats.latest, base() + Duration::minutes(50));
    }

    #[test]
    fn feed_fails_on_missing_stats() {
        let src = Comments {
            posts: vec![post(1, 10)],
            comments: Vec::new(),
        };
        let res = futures::executor::block_on(build_feed(
            &src,
            vec![post(1, 10), post(2, 20)],
            Order::Oldest,
        ));
        assert_eq!(
            res.unwrap_err().api(),
            Some(&api::Error::NotFound(Uuid::from_u128(2)))
        );
        let empty = futures::executor::block_on(build_feed(&src, Vec::new(), Order::Active));
        assert!(empty.unwrap().is_empty());
    }

    #[test]
    fn joined_communities_come_first() {
        let alice = UserId(Uuid::from_u128(1));
        let bob = UserId(Uuid::from_u128(2));
        let mut communities = ["a", "b", "c", "d"]
            .iter()
            .map(|name| {
                Community::from_new(
                    bob,
                    NewCommunity::now(String::from(*name), String::from("desc")),
                )
            })
            .collect::<Vec<_>>();
        communities[1].members.insert(alice);
        communities[3].members.insert(alice);
        let names = |c: &[Community]| c.iter().map(|c| c.name.clone()).collect::<Vec<_>>();

        joined_first(&mut communities, None);
        assert_eq!(names(&communities), vec!["a", "b", "c", "d"]);
        joined_first(&mut communities, Some(alice));
        assert_eq!(names(&communities), vec!["b", "d", "a", "c"]);
    }
}
