use std::collections::HashMap;

use anyhow::Context;
use async_trait::async_trait;
use phreddit_api::{
    ActivityStats, AdminNewUser, AuthToken, Comment, CommentEdit, CommentId, Community,
    CommunityEdit, CommunityId, Flair, FlairId, NewComment, NewCommunity, NewFlair, NewPost,
    NewSession, NewUser, Post, PostEdit, PostId, ThreadEntry, Time, User, UserId, UserProfile,
    Uuid, VoteDirection, VoteState, VoteTarget, Votes,
};
use sqlx::{Connection, Row};

use crate::Error;

#[cfg(not(test))]
const BCRYPT_COST: u32 = bcrypt::DEFAULT_COST;
#[cfg(test)]
const BCRYPT_COST: u32 = 4;

/// Comment store backed by a single connection, usually inside a transaction
pub struct PostgresDb<'a> {
    pub conn: &'a mut sqlx::PgConnection,
}

#[async_trait]
impl<'a> phreddit_api::Db for PostgresDb<'a> {
    async fn fetch_comments(&mut self, ids: &[CommentId]) -> anyhow::Result<Vec<Comment>> {
        let ids = ids.iter().map(|c| c.0).collect::<Vec<_>>();
        load_comments(&mut *self.conn, &ids).await
    }
}

async fn exists(
    conn: &mut sqlx::PgConnection,
    table: &str,
    column: &str,
    value: Uuid,
) -> anyhow::Result<bool> {
    let query = format!("SELECT EXISTS(SELECT 1 FROM {table} WHERE {column} = $1)");
    sqlx::query_scalar::<_, bool>(&query)
        .bind(value)
        .fetch_one(&mut *conn)
        .await
        .with_context(|| format!("checking existence of {table}.{column} = {value}"))
}

async fn text_exists(
    conn: &mut sqlx::PgConnection,
    table: &str,
    column: &str,
    value: &str,
) -> anyhow::Result<bool> {
    let query = format!("SELECT EXISTS(SELECT 1 FROM {table} WHERE {column} = $1)");
    sqlx::query_scalar::<_, bool>(&query)
        .bind(value)
        .fetch_one(&mut *conn)
        .await
        .with_context(|| format!("checking existence of {table}.{column} = {value:?}"))
}

async fn ids_where(
    conn: &mut sqlx::PgConnection,
    query: &str,
    bind: Uuid,
) -> anyhow::Result<Vec<Uuid>> {
    sqlx::query_scalar::<_, Uuid>(query)
        .bind(bind)
        .fetch_all(&mut *conn)
        .await
        .with_context(|| format!("listing ids with {query:?}"))
}

/// Loads the voter sets of the rows of `table` keyed by `column`, the counters
/// being taken from `counts`
async fn load_votes(
    conn: &mut sqlx::PgConnection,
    table: &str,
    column: &str,
    counts: &HashMap<Uuid, i64>,
) -> anyhow::Result<HashMap<Uuid, Votes>> {
    let ids = counts.keys().copied().collect::<Vec<_>>();
    let query = format!("SELECT {column}, user_id, upvote FROM {table} WHERE {column} = ANY($1)");
    let rows = sqlx::query(&query)
        .bind(&ids)
        .fetch_all(&mut *conn)
        .await
        .with_context(|| format!("querying {table} table"))?;
    let mut res = counts
        .iter()
        .map(|(id, count)| {
            (
                *id,
                Votes {
                    count: *count,
                    ..Votes::default()
                },
            )
        })
        .collect::<HashMap<_, _>>();
    for r in rows {
        let item: Uuid = r.try_get(column).context("retrieving the item id field")?;
        let voter = UserId(r.try_get("user_id").context("retrieving the user_id field")?);
        let upvote: bool = r.try_get("upvote").context("retrieving the upvote field")?;
        if let Some(v) = res.get_mut(&item) {
            match upvote {
                true => v.upvoters.insert(voter),
                false => v.downvoters.insert(voter),
            };
        }
    }
    Ok(res)
}

// Users and sessions

#[derive(sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    display_name: String,
    reputation: i64,
    is_admin: bool,
    created: Time,
}

impl From<UserRow> for User {
    fn from(u: UserRow) -> User {
        User {
            id: UserId(u.id),
            display_name: u.display_name,
            reputation: u.reputation,
            is_admin: u.is_admin,
            created: u.created,
        }
    }
}

pub async fn create_user(
    conn: &mut sqlx::PgConnection,
    u: AdminNewUser,
    created: Time,
) -> Result<(), Error> {
    let AdminNewUser {
        user: u,
        reputation,
        is_admin,
    } = u;
    u.validate()?;
    let mut tx = conn.begin().await.context("starting transaction")?;
    if exists(&mut *tx, "users", "id", u.id.0).await? {
        return Err(Error::uuid_taken(u.id.0));
    }
    if text_exists(&mut *tx, "users", "email", &u.email).await? {
        return Err(Error::email_taken(u.email));
    }
    if text_exists(&mut *tx, "users", "display_name", &u.display_name).await? {
        return Err(Error::name_taken(u.display_name));
    }
    let hash = bcrypt::hash(&u.password, BCRYPT_COST).context("hashing password")?;
    sqlx::query(
        "
            INSERT INTO users
                (id, first_name, last_name, email, display_name, password_hash,
                 reputation, is_admin, created)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        ",
    )
    .bind(u.id.0)
    .bind(&u.first_name)
    .bind(&u.last_name)
    .bind(&u.email)
    .bind(&u.display_name)
    .bind(&hash)
    .bind(reputation)
    .bind(is_admin)
    .bind(created)
    .execute(&mut *tx)
    .await
    .with_context(|| format!("inserting user {:?}", u.id))?;
    tx.commit().await.context("committing transaction")?;
    Ok(())
}

pub async fn register_user(
    conn: &mut sqlx::PgConnection,
    u: NewUser,
    created: Time,
) -> Result<(), Error> {
    create_user(
        conn,
        AdminNewUser {
            user: u,
            reputation: phreddit_api::DEFAULT_REPUTATION,
            is_admin: false,
        },
        created,
    )
    .await
}

pub async fn login_user(
    conn: &mut sqlx::PgConnection,
    s: &NewSession,
) -> anyhow::Result<Option<AuthToken>> {
    let row = sqlx::query("SELECT id, password_hash FROM users WHERE email = $1")
        .bind(&s.email)
        .fetch_optional(&mut *conn)
        .await
        .with_context(|| format!("fetching password hash for {:?}", s.email))?;
    let Some(row) = row else {
        return Ok(None);
    };
    let user: Uuid = row.try_get("id").context("retrieving the id field")?;
    let hash: String = row
        .try_get("password_hash")
        .context("retrieving the password_hash field")?;
    if !bcrypt::verify(&s.password, &hash).unwrap_or(false) {
        return Ok(None);
    }
    let token = Uuid::new_v4();
    let now = phreddit_api::now();
    sqlx::query(
        "INSERT INTO sessions (id, user_id, login_time, last_active) VALUES ($1, $2, $3, $3)",
    )
    .bind(token)
    .bind(user)
    .bind(now)
    .execute(&mut *conn)
    .await
    .with_context(|| format!("inserting new session for user {user}"))?;
    Ok(Some(AuthToken(token)))
}

pub async fn logout_user(conn: &mut sqlx::PgConnection, token: &AuthToken) -> anyhow::Result<bool> {
    let res = sqlx::query("DELETE FROM sessions WHERE id = $1")
        .bind(token.0)
        .execute(&mut *conn)
        .await
        .with_context(|| format!("logging out session {:?}", token))?;
    Ok(res.rows_affected() == 1)
}

pub async fn recover_session(
    conn: &mut sqlx::PgConnection,
    token: AuthToken,
) -> Result<UserId, Error> {
    let user = sqlx::query_scalar::<_, Uuid>(
        "UPDATE sessions SET last_active = $1 WHERE id = $2 RETURNING user_id",
    )
    .bind(phreddit_api::now())
    .bind(token.0)
    .fetch_optional(&mut *conn)
    .await
    .with_context(|| format!("recovering session {:?}", token))?;
    user.map(UserId).ok_or_else(Error::permission_denied)
}

pub async fn fetch_user(conn: &mut sqlx::PgConnection, user: UserId) -> Result<User, Error> {
    sqlx::query_as::<_, UserRow>(
        "SELECT id, display_name, reputation, is_admin, created FROM users WHERE id = $1",
    )
    .bind(user.0)
    .fetch_optional(&mut *conn)
    .await
    .with_context(|| format!("fetching user {:?}", user))?
    .map(User::from)
    .ok_or(Error::not_found(user.0))
}

pub async fn fetch_users(conn: &mut sqlx::PgConnection) -> anyhow::Result<Vec<User>> {
    Ok(sqlx::query_as::<_, UserRow>(
        "
            SELECT id, display_name, reputation, is_admin, created
                FROM users
            ORDER BY display_name COLLATE \"C\", id
        ",
    )
    .fetch_all(&mut *conn)
    .await
    .context("querying users table")?
    .into_iter()
    .map(User::from)
    .collect())
}

pub async fn fetch_profile(
    conn: &mut sqlx::PgConnection,
    user: UserId,
) -> Result<UserProfile, Error> {
    let row = sqlx::query(
        "
            SELECT id, display_name, reputation, is_admin, created, first_name, last_name, email
                FROM users
            WHERE id = $1
        ",
    )
    .bind(user.0)
    .fetch_optional(&mut *conn)
    .await
    .with_context(|| format!("fetching profile of {:?}", user))?
    .ok_or(Error::not_found(user.0))?;
    Ok(UserProfile {
        user: User {
            id: user,
            display_name: row
                .try_get("display_name")
                .context("retrieving the display_name field")?,
            reputation: row
                .try_get("reputation")
                .context("retrieving the reputation field")?,
            is_admin: row
                .try_get("is_admin")
                .context("retrieving the is_admin field")?,
            created: row
                .try_get("created")
                .context("retrieving the created field")?,
        },
        first_name: row
            .try_get("first_name")
            .context("retrieving the first_name field")?,
        last_name: row
            .try_get("last_name")
            .context("retrieving the last_name field")?,
        email: row.try_get("email").context("retrieving the email field")?,
    })
}

pub async fn user_communities(
    conn: &mut sqlx::PgConnection,
    user: UserId,
) -> Result<Vec<Community>, Error> {
    fetch_user(&mut *conn, user).await?;
    let ids = ids_where(
        &mut *conn,
        "SELECT id FROM communities WHERE creator_id = $1 ORDER BY date, id",
        user.0,
    )
    .await?;
    Ok(load_communities(&mut *conn, &ids).await?)
}

pub async fn user_posts(conn: &mut sqlx::PgConnection, user: UserId) -> Result<Vec<Post>, Error> {
    fetch_user(&mut *conn, user).await?;
    let ids = ids_where(
        &mut *conn,
        "SELECT id FROM posts WHERE author_id = $1 ORDER BY date DESC, id",
        user.0,
    )
    .await?;
    Ok(load_posts(&mut *conn, &ids).await?)
}

pub async fn user_comments(
    conn: &mut sqlx::PgConnection,
    user: UserId,
) -> Result<Vec<Comment>, Error> {
    fetch_user(&mut *conn, user).await?;
    let ids = ids_where(
        &mut *conn,
        "SELECT id FROM comments WHERE author_id = $1 ORDER BY date DESC, id",
        user.0,
    )
    .await?;
    Ok(load_comments(&mut *conn, &ids).await?)
}

/// Deletes a user along with everything they created: their communities (with
/// all the posts inside), their posts and their comments (with all the replies)
pub async fn delete_user(
    conn: &mut sqlx::PgConnection,
    actor: UserId,
    user: UserId,
) -> Result<(), Error> {
    let mut tx = conn.begin().await.context("starting transaction")?;
    fetch_user(&mut *tx, user).await?;
    if actor != user && !fetch_user(&mut *tx, actor).await?.is_admin {
        return Err(Error::permission_denied());
    }

    let comments = ids_where(
        &mut *tx,
        "SELECT id FROM comments WHERE author_id = $1",
        user.0,
    )
    .await?;
    let comments = comments.into_iter().map(CommentId).collect::<Vec<_>>();
    delete_comment_trees(&mut *tx, &comments).await?;
    for post in ids_where(&mut *tx, "SELECT id FROM posts WHERE author_id = $1", user.0).await? {
        delete_post_contents(&mut *tx, PostId(post)).await?;
    }
    for community in ids_where(
        &mut *tx,
        "SELECT id FROM communities WHERE creator_id = $1",
        user.0,
    )
    .await?
    {
        delete_community_contents(&mut *tx, CommunityId(community)).await?;
    }

    for (items, votes, column) in [
        ("posts", "post_votes", "post_id"),
        ("comments", "comment_votes", "comment_id"),
    ] {
        let query = format!(
            "
                UPDATE {items} i
                    SET votes = i.votes - (CASE WHEN v.upvote THEN 1 ELSE -1 END)
                FROM {votes} v
                WHERE v.{column} = i.id
                AND v.user_id = $1
            "
        );
        sqlx::query(&query)
            .bind(user.0)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("forgetting votes of {:?} on {items}", user))?;
    }
    for query in [
        "DELETE FROM post_votes WHERE user_id = $1",
        "DELETE FROM comment_votes WHERE user_id = $1",
        "DELETE FROM community_members WHERE user_id = $1",
        "DELETE FROM sessions WHERE user_id = $1",
        "DELETE FROM users WHERE id = $1",
    ] {
        sqlx::query(query)
            .bind(user.0)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("running {query:?} for {:?}", user))?;
    }
    tx.commit().await.context("committing transaction")?;
    tracing::info!(?user, "deleted user");
    Ok(())
}

// Communities

#[derive(sqlx::FromRow)]
struct CommunityRow {
    id: Uuid,
    name: String,
    description: String,
    date: Time,
    creator_id: Uuid,
}

/// Loads the given communities, in the order of `ids`
async fn load_communities(
    conn: &mut sqlx::PgConnection,
    ids: &[Uuid],
) -> anyhow::Result<Vec<Community>> {
    let rows = sqlx::query_as::<_, CommunityRow>(
        "SELECT id, name, description, date, creator_id FROM communities WHERE id = ANY($1)",
    )
    .bind(ids)
    .fetch_all(&mut *conn)
    .await
    .context("querying communities table")?;
    let mut res = rows
        .into_iter()
        .map(|c| {
            (
                c.id,
                Community {
                    id: CommunityId(c.id),
                    name: c.name,
                    description: c.description,
                    date: c.date,
                    creator: UserId(c.creator_id),
                    members: Default::default(),
                    post_ids: Vec::new(),
                },
            )
        })
        .collect::<HashMap<_, _>>();

    let members = sqlx::query_as::<_, (Uuid, Uuid)>(
        "SELECT community_id, user_id FROM community_members WHERE community_id = ANY($1)",
    )
    .bind(ids)
    .fetch_all(&mut *conn)
    .await
    .context("querying community_members table")?;
    for (community, user) in members {
        if let Some(c) = res.get_mut(&community) {
            c.members.insert(UserId(user));
        }
    }

    let posts = sqlx::query_as::<_, (Uuid, Uuid)>(
        "SELECT community_id, id FROM posts WHERE community_id = ANY($1) ORDER BY seq",
    )
    .bind(ids)
    .fetch_all(&mut *conn)
    .await
    .context("querying posts of communities")?;
    for (community, post) in posts {
        if let Some(c) = res.get_mut(&community) {
            c.post_ids.push(PostId(post));
        }
    }

    Ok(ids.iter().filter_map(|id| res.remove(id)).collect())
}

pub async fn fetch_community(
    conn: &mut sqlx::PgConnection,
    community: CommunityId,
) -> Result<Community, Error> {
    load_communities(&mut *conn, &[community.0])
        .await?
        .pop()
        .ok_or(Error::not_found(community.0))
}

pub async fn fetch_communities(conn: &mut sqlx::PgConnection) -> anyhow::Result<Vec<Community>> {
    let ids = sqlx::query_scalar::<_, Uuid>("SELECT id FROM communities ORDER BY date, id")
        .fetch_all(&mut *conn)
        .await
        .context("listing communities")?;
    load_communities(&mut *conn, &ids).await
}

pub async fn create_community(
    conn: &mut sqlx::PgConnection,
    creator: UserId,
    c: NewCommunity,
) -> Result<Community, Error> {
    c.validate()?;
    let mut tx = conn.begin().await.context("starting transaction")?;
    if exists(&mut *tx, "communities", "id", c.id.0).await? {
        return Err(Error::uuid_taken(c.id.0));
    }
    if text_exists(&mut *tx, "communities", "name", &c.name).await? {
        return Err(Error::name_taken(c.name));
    }
    sqlx::query(
        "INSERT INTO communities (id, name, description, date, creator_id) VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(c.id.0)
    .bind(&c.name)
    .bind(&c.description)
    .bind(c.date)
    .bind(creator.0)
    .execute(&mut *tx)
    .await
    .with_context(|| format!("inserting community {:?}", c.id))?;
    sqlx::query("INSERT INTO community_members (community_id, user_id) VALUES ($1, $2)")
        .bind(c.id.0)
        .bind(creator.0)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("adding creator to community {:?}", c.id))?;
    tx.commit().await.context("committing transaction")?;
    Ok(Community::from_new(creator, c))
}

/// Fails unless `actor` created `owner`'s item or is an admin
async fn check_owner(
    conn: &mut sqlx::PgConnection,
    actor: UserId,
    owner: Option<UserId>,
) -> Result<(), Error> {
    if owner == Some(actor) || fetch_user(&mut *conn, actor).await?.is_admin {
        Ok(())
    } else {
        Err(Error::permission_denied())
    }
}

pub async fn edit_community(
    conn: &mut sqlx::PgConnection,
    actor: UserId,
    community: CommunityId,
    e: CommunityEdit,
) -> Result<Community, Error> {
    e.validate()?;
    let mut tx = conn.begin().await.context("starting transaction")?;
    let current = fetch_community(&mut *tx, community).await?;
    check_owner(&mut *tx, actor, Some(current.creator)).await?;
    if let Some(name) = e.name {
        if name != current.name && text_exists(&mut *tx, "communities", "name", &name).await? {
            return Err(Error::name_taken(name));
        }
        sqlx::query("UPDATE communities SET name = $1 WHERE id = $2")
            .bind(&name)
            .bind(community.0)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("renaming community {:?}", community))?;
    }
    if let Some(description) = e.description {
        sqlx::query("UPDATE communities SET description = $1 WHERE id = $2")
            .bind(&description)
            .bind(community.0)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("updating description of community {:?}", community))?;
    }
    let res = fetch_community(&mut *tx, community).await?;
    tx.commit().await.context("committing transaction")?;
    Ok(res)
}

pub async fn delete_community(
    conn: &mut sqlx::PgConnection,
    actor: UserId,
    community: CommunityId,
) -> Result<(), Error> {
    let mut tx = conn.begin().await.context("starting transaction")?;
    let current = fetch_community(&mut *tx, community).await?;
    check_owner(&mut *tx, actor, Some(current.creator)).await?;
    delete_community_contents(&mut *tx, community).await?;
    tx.commit().await.context("committing transaction")?;
    tracing::info!(?community, "deleted community");
    Ok(())
}

pub async fn set_membership(
    conn: &mut sqlx::PgConnection,
    user: UserId,
    community: CommunityId,
    member: bool,
) -> Result<Community, Error> {
    let mut tx = conn.begin().await.context("starting transaction")?;
    if !exists(&mut *tx, "communities", "id", community.0).await? {
        return Err(Error::not_found(community.0));
    }
    let query = match member {
        true => "INSERT INTO community_members (community_id, user_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        false => "DELETE FROM community_members WHERE community_id = $1 AND user_id = $2",
    };
    sqlx::query(query)
        .bind(community.0)
        .bind(user.0)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("updating membership of {:?} in {:?}", user, community))?;
    let res = fetch_community(&mut *tx, community).await?;
    tx.commit().await.context("committing transaction")?;
    Ok(res)
}

// Flairs

pub async fn fetch_flairs(conn: &mut sqlx::PgConnection) -> anyhow::Result<Vec<Flair>> {
    Ok(sqlx::query_as::<_, (Uuid, String)>(
        "SELECT id, content FROM flairs ORDER BY content COLLATE \"C\", id",
    )
    .fetch_all(&mut *conn)
    .await
    .context("querying flairs table")?
    .into_iter()
    .map(|(id, content)| Flair {
        id: FlairId(id),
        content,
    })
    .collect())
}

pub async fn create_flair(conn: &mut sqlx::PgConnection, f: NewFlair) -> Result<Flair, Error> {
    f.validate()?;
    let mut tx = conn.begin().await.context("starting transaction")?;
    if exists(&mut *tx, "flairs", "id", f.id.0).await? {
        return Err(Error::uuid_taken(f.id.0));
    }
    sqlx::query("INSERT INTO flairs (id, content) VALUES ($1, $2)")
        .bind(f.id.0)
        .bind(&f.content)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("inserting flair {:?}", f.id))?;
    tx.commit().await.context("committing transaction")?;
    Ok(Flair {
        id: f.id,
        content: f.content,
    })
}

// Posts

#[derive(sqlx::FromRow)]
struct PostRow {
    id: Uuid,
    community_id: Uuid,
    title: String,
    content: String,
    author_id: Uuid,
    date: Time,
    views: i64,
    flair_id: Option<Uuid>,
    votes: i64,
}

/// Loads the given posts, in the order of `ids`
async fn load_posts(conn: &mut sqlx::PgConnection, ids: &[Uuid]) -> anyhow::Result<Vec<Post>> {
    let rows = sqlx::query_as::<_, PostRow>(
        "
            SELECT id, community_id, title, content, author_id, date, views, flair_id, votes
                FROM posts
            WHERE id = ANY($1)
        ",
    )
    .bind(ids)
    .fetch_all(&mut *conn)
    .await
    .context("querying posts table")?;
    let counts: HashMap<_, _> = rows.iter().map(|p| (p.id, p.votes)).collect();
    let mut votes = load_votes(&mut *conn, "post_votes", "post_id", &counts).await?;
    let mut res = rows
        .into_iter()
        .map(|p| {
            (
                p.id,
                Post {
                    id: PostId(p.id),
                    community_id: CommunityId(p.community_id),
                    title: p.title,
                    content: p.content,
                    author: UserId(p.author_id),
                    date: p.date,
                    views: p.views,
                    flair_id: p.flair_id.map(FlairId),
                    comment_ids: Vec::new(),
                    votes: votes.remove(&p.id).unwrap_or_default(),
                },
            )
        })
        .collect::<HashMap<_, _>>();

    let comments = sqlx::query_as::<_, (Uuid, Uuid)>(
        "
            SELECT post_id, id
                FROM comments
            WHERE post_id = ANY($1)
            AND parent_id IS NULL
            ORDER BY seq
        ",
    )
    .bind(ids)
    .fetch_all(&mut *conn)
    .await
    .context("querying top-level comments of posts")?;
    for (post, comment) in comments {
        if let Some(p) = res.get_mut(&post) {
            p.comment_ids.push(CommentId(comment));
        }
    }

    Ok(ids.iter().filter_map(|id| res.remove(id)).collect())
}

pub async fn fetch_post(conn: &mut sqlx::PgConnection, post: PostId) -> Result<Post, Error> {
    load_posts(&mut *conn, &[post.0])
        .await?
        .pop()
        .ok_or(Error::not_found(post.0))
}

pub async fn fetch_posts(conn: &mut sqlx::PgConnection) -> anyhow::Result<Vec<Post>> {
    let ids = sqlx::query_scalar::<_, Uuid>("SELECT id FROM posts ORDER BY date DESC, id")
        .fetch_all(&mut *conn)
        .await
        .context("listing posts")?;
    load_posts(&mut *conn, &ids).await
}

pub async fn search_posts(conn: &mut sqlx::PgConnection, query: &str) -> anyhow::Result<Vec<Post>> {
    let query = query.trim();
    if query.is_empty() {
        return Ok(Vec::new());
    }
    let ids = sqlx::query_scalar::<_, Uuid>(
        "
            SELECT id
                FROM posts
            WHERE strpos(lower(title), lower($1)) > 0
            OR strpos(lower(content), lower($1)) > 0
            ORDER BY date DESC, id
        ",
    )
    .bind(query)
    .fetch_all(&mut *conn)
    .await
    .with_context(|| format!("searching posts for {query:?}"))?;
    load_posts(&mut *conn, &ids).await
}

pub async fn create_post(
    conn: &mut sqlx::PgConnection,
    author: UserId,
    p: NewPost,
) -> Result<Post, Error> {
    p.validate()?;
    let mut tx = conn.begin().await.context("starting transaction")?;
    if exists(&mut *tx, "posts", "id", p.id.0).await? {
        return Err(Error::uuid_taken(p.id.0));
    }
    if !exists(&mut *tx, "communities", "id", p.community_id.0).await? {
        return Err(Error::not_found(p.community_id.0));
    }
    if let Some(flair) = p.flair_id {
        if !exists(&mut *tx, "flairs", "id", flair.0).await? {
            return Err(Error::not_found(flair.0));
        }
    }
    sqlx::query(
        "
            INSERT INTO posts (id, community_id, title, content, author_id, date, flair_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
        ",
    )
    .bind(p.id.0)
    .bind(p.community_id.0)
    .bind(&p.title)
    .bind(&p.content)
    .bind(author.0)
    .bind(p.date)
    .bind(p.flair_id.map(|f| f.0))
    .execute(&mut *tx)
    .await
    .with_context(|| format!("inserting post {:?}", p.id))?;
    tx.commit().await.context("committing transaction")?;
    Ok(Post::from_new(author, p))
}

pub async fn edit_post(
    conn: &mut sqlx::PgConnection,
    actor: UserId,
    post: PostId,
    e: PostEdit,
) -> Result<Post, Error> {
    e.validate()?;
    let mut tx = conn.begin().await.context("starting transaction")?;
    let current = fetch_post(&mut *tx, post).await?;
    check_owner(&mut *tx, actor, Some(current.author)).await?;
    sqlx::query(
        "UPDATE posts SET title = COALESCE($1, title), content = COALESCE($2, content) WHERE id = $3",
    )
    .bind(e.title)
    .bind(e.content)
    .bind(post.0)
    .execute(&mut *tx)
    .await
    .with_context(|| format!("editing post {:?}", post))?;
    let res = fetch_post(&mut *tx, post).await?;
    tx.commit().await.context("committing transaction")?;
    Ok(res)
}

pub async fn delete_post(
    conn: &mut sqlx::PgConnection,
    actor: UserId,
    post: PostId,
) -> Result<(), Error> {
    let mut tx = conn.begin().await.context("starting transaction")?;
    let current = fetch_post(&mut *tx, post).await?;
    check_owner(&mut *tx, actor, Some(current.author)).await?;
    delete_post_contents(&mut *tx, post).await?;
    tx.commit().await.context("committing transaction")?;
    tracing::info!(?post, "deleted post");
    Ok(())
}

pub async fn view_post(conn: &mut sqlx::PgConnection, post: PostId) -> Result<Post, Error> {
    let res = sqlx::query("UPDATE posts SET views = views + 1 WHERE id = $1")
        .bind(post.0)
        .execute(&mut *conn)
        .await
        .with_context(|| format!("counting a view of post {:?}", post))?;
    if res.rows_affected() == 0 {
        return Err(Error::not_found(post.0));
    }
    fetch_post(&mut *conn, post).await
}

pub async fn comment_tree(
    conn: &mut sqlx::PgConnection,
    post: PostId,
) -> Result<Vec<ThreadEntry>, Error> {
    let mut tx = conn.begin().await.context("starting transaction")?;
    let p = fetch_post(&mut *tx, post).await?;
    let thread = phreddit_api::assemble_thread(&mut PostgresDb { conn: &mut *tx }, &p.comment_ids)
        .await
        .with_context(|| format!("assembling comment thread of post {:?}", post))?;
    tx.commit().await.context("committing transaction")?;
    Ok(thread)
}

pub async fn post_stats(
    conn: &mut sqlx::PgConnection,
    post: PostId,
) -> Result<ActivityStats, Error> {
    let mut tx = conn.begin().await.context("starting transaction")?;
    let p = fetch_post(&mut *tx, post).await?;
    let comments = phreddit_api::load_subtree(&mut PostgresDb { conn: &mut *tx }, &p.comment_ids)
        .await
        .with_context(|| format!("loading comments of post {:?}", post))?;
    tx.commit().await.context("committing transaction")?;
    Ok(ActivityStats::of_comments(p.date, comments.values()))
}

// Comments

#[derive(sqlx::FromRow)]
struct CommentRow {
    id: Uuid,
    post_id: Uuid,
    parent_id: Option<Uuid>,
    content: String,
    author_id: Option<Uuid>,
    date: Time,
    votes: i64,
}

/// Loads the given comments, in the order of `ids`, leaving out missing ones
async fn load_comments(
    conn: &mut sqlx::PgConnection,
    ids: &[Uuid],
) -> anyhow::Result<Vec<Comment>> {
    let rows = sqlx::query_as::<_, CommentRow>(
        "
            SELECT id, post_id, parent_id, content, author_id, date, votes
                FROM comments
            WHERE id = ANY($1)
        ",
    )
    .bind(ids)
    .fetch_all(&mut *conn)
    .await
    .context("querying comments table")?;
    let counts: HashMap<_, _> = rows.iter().map(|c| (c.id, c.votes)).collect();
    let mut votes = load_votes(&mut *conn, "comment_votes", "comment_id", &counts).await?;
    let mut res = rows
        .into_iter()
        .map(|c| {
            (
                c.id,
                Comment {
                    id: CommentId(c.id),
                    post_id: PostId(c.post_id),
                    parent_id: c.parent_id.map(CommentId),
                    content: c.content,
                    author: c.author_id.map(UserId),
                    date: c.date,
                    children: Vec::new(),
                    votes: votes.remove(&c.id).unwrap_or_default(),
                },
            )
        })
        .collect::<HashMap<_, _>>();

    let children = sqlx::query_as::<_, (Uuid, Uuid)>(
        "SELECT parent_id, id FROM comments WHERE parent_id = ANY($1) ORDER BY seq",
    )
    .bind(ids)
    .fetch_all(&mut *conn)
    .await
    .context("querying replies of comments")?;
    for (parent, child) in children {
        if let Some(c) = res.get_mut(&parent) {
            c.children.push(CommentId(child));
        }
    }

    Ok(ids.iter().filter_map(|id| res.remove(id)).collect())
}

pub async fn fetch_comment(
    conn: &mut sqlx::PgConnection,
    comment: CommentId,
) -> Result<Comment, Error> {
    load_comments(&mut *conn, &[comment.0])
        .await?
        .pop()
        .ok_or(Error::not_found(comment.0))
}

pub async fn create_comment(
    conn: &mut sqlx::PgConnection,
    author: Option<UserId>,
    post: PostId,
    c: NewComment,
) -> Result<Comment, Error> {
    c.validate()?;
    let mut tx = conn.begin().await.context("starting transaction")?;
    if !exists(&mut *tx, "posts", "id", post.0).await? {
        return Err(Error::not_found(post.0));
    }
    if exists(&mut *tx, "comments", "id", c.id.0).await? {
        return Err(Error::uuid_taken(c.id.0));
    }
    if let Some(parent) = c.parent_id {
        let parent_post = sqlx::query_scalar::<_, Uuid>("SELECT post_id FROM comments WHERE id = $1")
            .bind(parent.0)
            .fetch_optional(&mut *tx)
            .await
            .with_context(|| format!("fetching post of comment {:?}", parent))?
            .ok_or(Error::not_found(parent.0))?;
        if parent_post != post.0 {
            return Err(Error::parent_not_in_post(parent));
        }
    }
    sqlx::query(
        "
            INSERT INTO comments (id, post_id, parent_id, content, author_id, date)
            VALUES ($1, $2, $3, $4, $5, $6)
        ",
    )
    .bind(c.id.0)
    .bind(post.0)
    .bind(c.parent_id.map(|p| p.0))
    .bind(&c.content)
    .bind(author.map(|a| a.0))
    .bind(c.date)
    .execute(&mut *tx)
    .await
    .with_context(|| format!("inserting comment {:?}", c.id))?;
    tx.commit().await.context("committing transaction")?;
    Ok(Comment::from_new(post, author, c))
}

pub async fn edit_comment(
    conn: &mut sqlx::PgConnection,
    actor: UserId,
    comment: CommentId,
    e: CommentEdit,
) -> Result<Comment, Error> {
    e.validate()?;
    let mut tx = conn.begin().await.context("starting transaction")?;
    let current = fetch_comment(&mut *tx, comment).await?;
    check_owner(&mut *tx, actor, current.author).await?;
    sqlx::query("UPDATE comments SET content = $1 WHERE id = $2")
        .bind(&e.content)
        .bind(comment.0)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("editing comment {:?}", comment))?;
    tx.commit().await.context("committing transaction")?;
    Ok(Comment {
        content: e.content,
        ..current
    })
}

/// Deletes a comment and all its replies, at any depth. The parent's reply
/// list only ever derives from the remaining rows, so it needs no update.
pub async fn delete_comment(
    conn: &mut sqlx::PgConnection,
    actor: UserId,
    comment: CommentId,
) -> Result<(), Error> {
    let mut tx = conn.begin().await.context("starting transaction")?;
    let current = fetch_comment(&mut *tx, comment).await?;
    check_owner(&mut *tx, actor, current.author).await?;
    delete_comment_trees(&mut *tx, &[comment]).await?;
    tx.commit().await.context("committing transaction")?;
    tracing::info!(?comment, "deleted comment");
    Ok(())
}

// Votes

pub async fn vote(
    conn: &mut sqlx::PgConnection,
    voter: UserId,
    target: VoteTarget,
    dir: VoteDirection,
) -> Result<VoteState, Error> {
    let (items, votes, column, id) = match target {
        VoteTarget::Post(p) => ("posts", "post_votes", "post_id", p.0),
        VoteTarget::Comment(c) => ("comments", "comment_votes", "comment_id", c.0),
    };
    let mut tx = conn.begin().await.context("starting transaction")?;
    fetch_user(&mut *tx, voter).await?.can_vote()?;

    // The row lock serializes concurrent votes on the same item
    let locked = sqlx::query_scalar::<_, i64>(&format!(
        "SELECT votes FROM {items} WHERE id = $1 FOR UPDATE"
    ))
    .bind(id)
    .fetch_optional(&mut *tx)
    .await
    .with_context(|| format!("locking {items} row {id}"))?;
    if locked.is_none() {
        return Err(Error::not_found(id));
    }

    let current = sqlx::query_scalar::<_, bool>(&format!(
        "SELECT upvote FROM {votes} WHERE {column} = $1 AND user_id = $2"
    ))
    .bind(id)
    .bind(voter.0)
    .fetch_optional(&mut *tx)
    .await
    .with_context(|| format!("fetching vote of {:?} on {id}", voter))?;
    let current = match current {
        None => VoteState::None,
        Some(true) => VoteState::Up,
        Some(false) => VoteState::Down,
    };
    let (state, delta) = current.transition(dir);

    match state {
        VoteState::None => {
            sqlx::query(&format!(
                "DELETE FROM {votes} WHERE {column} = $1 AND user_id = $2"
            ))
            .bind(id)
            .bind(voter.0)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("removing vote of {:?} on {id}", voter))?;
        }
        VoteState::Up | VoteState::Down => {
            sqlx::query(&format!(
                "
                    INSERT INTO {votes} ({column}, user_id, upvote) VALUES ($1, $2, $3)
                    ON CONFLICT ({column}, user_id) DO UPDATE SET upvote = EXCLUDED.upvote
                "
            ))
            .bind(id)
            .bind(voter.0)
            .bind(state == VoteState::Up)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("recording vote of {:?} on {id}", voter))?;
        }
    }
    sqlx::query(&format!(
        "UPDATE {items} SET votes = votes + $1 WHERE id = $2"
    ))
    .bind(delta)
    .bind(id)
    .execute(&mut *tx)
    .await
    .with_context(|| format!("updating vote counter of {id}"))?;
    tx.commit().await.context("committing transaction")?;
    tracing::debug!(?voter, ?target, ?dir, ?state, "recorded vote");
    Ok(state)
}

// Cascades, always run inside the caller's transaction

async fn delete_comment_trees(
    conn: &mut sqlx::PgConnection,
    roots: &[CommentId],
) -> anyhow::Result<()> {
    let comments = phreddit_api::load_subtree(&mut PostgresDb { conn: &mut *conn }, roots)
        .await
        .context("loading comment trees to delete")?;
    let ids = comments.into_keys().map(|c| c.0).collect::<Vec<_>>();
    sqlx::query("DELETE FROM comment_votes WHERE comment_id = ANY($1)")
        .bind(&ids)
        .execute(&mut *conn)
        .await
        .context("deleting votes on comments")?;
    // Foreign keys are checked once the whole statement ran, so replies and
    // the comments they answer can go together
    sqlx::query("DELETE FROM comments WHERE id = ANY($1)")
        .bind(&ids)
        .execute(&mut *conn)
        .await
        .context("deleting comments")?;
    tracing::debug!(deleted = ids.len(), "deleted comment trees");
    Ok(())
}

async fn delete_post_contents(conn: &mut sqlx::PgConnection, post: PostId) -> anyhow::Result<()> {
    for query in [
        "DELETE FROM comment_votes v USING comments c WHERE v.comment_id = c.id AND c.post_id = $1",
        "DELETE FROM comments WHERE post_id = $1",
        "DELETE FROM post_votes WHERE post_id = $1",
        "DELETE FROM posts WHERE id = $1",
    ] {
        sqlx::query(query)
            .bind(post.0)
            .execute(&mut *conn)
            .await
            .with_context(|| format!("running {query:?} for {:?}", post))?;
    }
    Ok(())
}

async fn delete_community_contents(
    conn: &mut sqlx::PgConnection,
    community: CommunityId,
) -> anyhow::Result<()> {
    let posts = ids_where(
        &mut *conn,
        "SELECT id FROM posts WHERE community_id = $1",
        community.0,
    )
    .await?;
    for post in posts {
        delete_post_contents(&mut *conn, PostId(post)).await?;
    }
    for query in [
        "DELETE FROM community_members WHERE community_id = $1",
        "DELETE FROM communities WHERE id = $1",
    ] {
        sqlx::query(query)
            .bind(community.0)
            .execute(&mut *conn)
            .await
            .with_context(|| format!("running {query:?} for {:?}", community))?;
    }
    Ok(())
}
