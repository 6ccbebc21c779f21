//! Prints SQL that fills an empty database with a plausible forum.
//!
//! Every user's password is `password`, and `admin@example.org` is an
//! administrator.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{Duration, TimeZone, Utc};
use phreddit_api::{Time, Uuid, ADMIN_REPUTATION, DEFAULT_REPUTATION};
use rand::{seq::SliceRandom, Rng};

const NUM_USERS: usize = 12;
const NUM_COMMUNITIES: usize = 6;
const NUM_FLAIRS: usize = 5;
const NUM_POSTS: usize = 60;
const NUM_COMMENTS: usize = 400;
const NUM_VOTES: usize = 600;

const TITLE_WORDS: usize = 6;
const CONTENT_WORDS: usize = 60;
const COMMENT_WORDS: usize = 25;

// Share of comments answering the post itself rather than an earlier comment
const TOP_LEVEL_PERCENT: u32 = 30;

const PASSWORD: &str = "password";

fn gen_n_items(table: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }
    println!("INSERT INTO {} VALUES", table);
    for (i, item) in items.iter().enumerate() {
        if i != 0 {
            println!(",");
        }
        print!("    {}", item);
    }
    println!();
    println!("ON CONFLICT DO NOTHING;");
}

fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

fn time(t: &Time) -> String {
    quote(&t.to_rfc3339())
}

fn words(rng: &mut impl Rng, n: usize) -> String {
    lipsum::lipsum_words_with_rng(&mut *rng, n)
}

struct Comment {
    id: Uuid,
    post: usize,
    date: Time,
}

fn main() -> anyhow::Result<()> {
    let mut rng = rand::thread_rng();
    let base = Utc
        .with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
        .single()
        .ok_or_else(|| anyhow::anyhow!("invalid base date"))?;
    let hash = bcrypt::hash(PASSWORD, bcrypt::DEFAULT_COST)?;

    // Users, the first one being the administrator
    let users = (0..NUM_USERS).map(|_| Uuid::new_v4()).collect::<Vec<_>>();
    gen_n_items(
        "users (id, first_name, last_name, email, display_name, password_hash, reputation, is_admin, created)",
        &users
            .iter()
            .enumerate()
            .map(|(i, id)| {
                let (name, reputation, is_admin) = match i {
                    0 => (String::from("admin"), ADMIN_REPUTATION, true),
                    // the last user cannot vote yet
                    i if i == NUM_USERS - 1 => (format!("user{i}"), 0, false),
                    i => (format!("user{i}"), DEFAULT_REPUTATION, false),
                };
                format!(
                    "('{id}', {}, {}, {}, {}, {}, {reputation}, {is_admin}, {})",
                    quote(&words(&mut rng, 1)),
                    quote(&words(&mut rng, 1)),
                    quote(&format!("{name}@example.org")),
                    quote(&name),
                    quote(&hash),
                    time(&base),
                )
            })
            .collect::<Vec<_>>(),
    );

    // Communities, each with its creator and a few random members
    let communities = (0..NUM_COMMUNITIES)
        .map(|i| (Uuid::new_v4(), users[i % users.len()], base + Duration::hours(i as i64)))
        .collect::<Vec<_>>();
    gen_n_items(
        "communities (id, name, description, date, creator_id)",
        &communities
            .iter()
            .enumerate()
            .map(|(i, (id, creator, date))| {
                format!(
                    "('{id}', {}, {}, {}, '{creator}')",
                    quote(&format!("{} {i}", words(&mut rng, 2))),
                    quote(&words(&mut rng, CONTENT_WORDS / 2)),
                    time(date),
                )
            })
            .collect::<Vec<_>>(),
    );
    let mut members = BTreeSet::new();
    for (id, creator, _) in &communities {
        members.insert((*id, *creator));
        for u in users.choose_multiple(&mut rng, NUM_USERS / 3) {
            members.insert((*id, *u));
        }
    }
    gen_n_items(
        "community_members (community_id, user_id)",
        &members
            .iter()
            .map(|(c, u)| format!("('{c}', '{u}')"))
            .collect::<Vec<_>>(),
    );

    let flairs = (0..NUM_FLAIRS).map(|_| Uuid::new_v4()).collect::<Vec<_>>();
    gen_n_items(
        "flairs (id, content)",
        &flairs
            .iter()
            .map(|id| format!("('{id}', {})", quote(&words(&mut rng, 2))))
            .collect::<Vec<_>>(),
    );

    // Posts, in chronological order so that insertion order matches dates
    let mut posts = Vec::with_capacity(NUM_POSTS);
    let mut post_rows = Vec::with_capacity(NUM_POSTS);
    for i in 0..NUM_POSTS {
        let id = Uuid::new_v4();
        let community = communities[rng.gen_range(0..communities.len())].0;
        let date = base + Duration::days(1) + Duration::minutes(37 * i as i64);
        let flair = match rng.gen_bool(0.5) {
            true => format!("'{}'", flairs[rng.gen_range(0..flairs.len())]),
            false => String::from("NULL"),
        };
        posts.push((id, date));
        post_rows.push((
            id,
            format!(
                "'{community}', {}, {}, '{}', {}, {}, {flair}",
                quote(&words(&mut rng, TITLE_WORDS)),
                quote(&words(&mut rng, CONTENT_WORDS)),
                users[rng.gen_range(0..users.len())],
                time(&date),
                rng.gen_range(0..500),
            ),
        ));
    }

    // Comments, each one after the post or comment it answers
    let mut comments: Vec<Comment> = Vec::with_capacity(NUM_COMMENTS);
    let mut comment_rows = Vec::with_capacity(NUM_COMMENTS);
    for _ in 0..NUM_COMMENTS {
        let id = Uuid::new_v4();
        let parent = match comments.is_empty() || rng.gen_ratio(TOP_LEVEL_PERCENT, 100) {
            true => None,
            false => comments.choose(&mut rng),
        };
        let (post, after) = match parent {
            Some(p) => (p.post, p.date),
            None => {
                let post = rng.gen_range(0..posts.len());
                (post, posts[post].1)
            }
        };
        let date = after + Duration::minutes(rng.gen_range(1..600));
        let author = match rng.gen_ratio(1, 10) {
            true => String::from("NULL"),
            false => format!("'{}'", users[rng.gen_range(0..users.len())]),
        };
        comment_rows.push((
            id,
            format!(
                "'{}', {}, {}, {author}, {}",
                posts[post].0,
                parent.map(|p| format!("'{}'", p.id)).unwrap_or_else(|| String::from("NULL")),
                quote(&words(&mut rng, COMMENT_WORDS)),
                time(&date),
            ),
        ));
        comments.push(Comment { id, post, date });
    }

    // Votes, from users allowed to vote only, with the counters kept in sync
    let voters = &users[..NUM_USERS - 1];
    let mut post_votes = BTreeMap::new();
    let mut comment_votes = BTreeMap::new();
    for _ in 0..NUM_VOTES {
        let user = voters[rng.gen_range(0..voters.len())];
        let upvote = rng.gen_ratio(3, 4);
        match rng.gen_bool(0.3) {
            true => post_votes.insert((posts[rng.gen_range(0..posts.len())].0, user), upvote),
            false => comment_votes.insert((comments[rng.gen_range(0..comments.len())].id, user), upvote),
        };
    }
    let count = |votes: &BTreeMap<(Uuid, Uuid), bool>, id: Uuid| -> i64 {
        votes
            .range((id, Uuid::nil())..=(id, Uuid::from_u128(u128::MAX)))
            .map(|(_, up)| if *up { 1 } else { -1 })
            .sum()
    };

    gen_n_items(
        "posts (id, community_id, title, content, author_id, date, views, flair_id, votes)",
        &post_rows
            .iter()
            .map(|(id, row)| format!("('{id}', {row}, {})", count(&post_votes, *id)))
            .collect::<Vec<_>>(),
    );
    gen_n_items(
        "comments (id, post_id, parent_id, content, author_id, date, votes)",
        &comment_rows
            .iter()
            .map(|(id, row)| format!("('{id}', {row}, {})", count(&comment_votes, *id)))
            .collect::<Vec<_>>(),
    );
    gen_n_items(
        "post_votes (post_id, user_id, upvote)",
        &post_votes
            .iter()
            .map(|((p, u), up)| format!("('{p}', '{u}', {up})"))
            .collect::<Vec<_>>(),
    );
    gen_n_items(
        "comment_votes (comment_id, user_id, upvote)",
        &comment_votes
            .iter()
            .map(|((c, u), up)| format!("('{c}', '{u}', {up})"))
            .collect::<Vec<_>>(),
    );

    Ok(())
}
