use anyhow::Context;
use axum::{
    extract::{Path, Query},
    Json,
};
use phreddit_api::{
    ActivityStats, AdminNewUser, AuthToken, Comment, CommentEdit, CommentId, Community,
    CommunityEdit, CommunityId, Flair, NewComment, NewCommunity, NewFlair, NewPost, NewSession,
    NewUser, Post, PostEdit, PostId, ThreadEntry, User, UserId, UserProfile, Uuid, VoteDirection,
    VoteTarget,
};

use crate::{db, extractors::*, Error};

// Users and sessions

pub async fn admin_create_user(
    AdminAuth: AdminAuth,
    mut conn: PgConn,
    Json(data): Json<AdminNewUser>,
) -> Result<(), Error> {
    db::create_user(&mut *conn, data, phreddit_api::now()).await
}

pub async fn register(mut conn: PgConn, Json(data): Json<NewUser>) -> Result<(), Error> {
    db::register_user(&mut *conn, data, phreddit_api::now()).await
}

pub async fn auth(
    mut conn: PgConn,
    Json(data): Json<NewSession>,
) -> Result<Json<AuthToken>, Error> {
    data.validate()?;
    Ok(Json(
        db::login_user(&mut *conn, &data)
            .await
            .context("logging user in")?
            .ok_or_else(Error::permission_denied)?,
    ))
}

pub async fn unauth(user: PreAuth, mut conn: PgConn) -> Result<(), Error> {
    match db::logout_user(&mut *conn, &user.0).await {
        Ok(true) => Ok(()),
        Ok(false) => Err(Error::permission_denied()),
        Err(e) => Err(Error::Anyhow(e)),
    }
}

pub async fn whoami(Auth(user): Auth, mut conn: PgConn) -> Result<Json<UserProfile>, Error> {
    Ok(Json(db::fetch_profile(&mut *conn, user).await?))
}

pub async fn fetch_users(mut conn: PgConn) -> Result<Json<Vec<User>>, Error> {
    Ok(Json(
        db::fetch_users(&mut *conn)
            .await
            .context("fetching user list")?,
    ))
}

pub async fn fetch_user(Path(user): Path<Uuid>, mut conn: PgConn) -> Result<Json<User>, Error> {
    Ok(Json(db::fetch_user(&mut *conn, UserId(user)).await?))
}

pub async fn delete_user(
    Auth(actor): Auth,
    Path(user): Path<Uuid>,
    mut conn: PgConn,
) -> Result<(), Error> {
    db::delete_user(&mut *conn, actor, UserId(user)).await
}

pub async fn user_communities(
    Path(user): Path<Uuid>,
    mut conn: PgConn,
) -> Result<Json<Vec<Community>>, Error> {
    Ok(Json(db::user_communities(&mut *conn, UserId(user)).await?))
}

pub async fn user_posts(Path(user): Path<Uuid>, mut conn: PgConn) -> Result<Json<Vec<Post>>, Error> {
    Ok(Json(db::user_posts(&mut *conn, UserId(user)).await?))
}

pub async fn user_comments(
    Path(user): Path<Uuid>,
    mut conn: PgConn,
) -> Result<Json<Vec<Comment>>, Error> {
    Ok(Json(db::user_comments(&mut *conn, UserId(user)).await?))
}

// Communities

pub async fn fetch_communities(mut conn: PgConn) -> Result<Json<Vec<Community>>, Error> {
    Ok(Json(
        db::fetch_communities(&mut *conn)
            .await
            .context("fetching community list")?,
    ))
}

pub async fn fetch_community(
    Path(community): Path<Uuid>,
    mut conn: PgConn,
) -> Result<Json<Community>, Error> {
    Ok(Json(
        db::fetch_community(&mut *conn, CommunityId(community)).await?,
    ))
}

pub async fn create_community(
    Auth(user): Auth,
    mut conn: PgConn,
    Json(data): Json<NewCommunity>,
) -> Result<Json<Community>, Error> {
    Ok(Json(db::create_community(&mut *conn, user, data).await?))
}

pub async fn edit_community(
    Auth(user): Auth,
    Path(community): Path<Uuid>,
    mut conn: PgConn,
    Json(data): Json<CommunityEdit>,
) -> Result<Json<Community>, Error> {
    Ok(Json(
        db::edit_community(&mut *conn, user, CommunityId(community), data).await?,
    ))
}

pub async fn delete_community(
    Auth(user): Auth,
    Path(community): Path<Uuid>,
    mut conn: PgConn,
) -> Result<(), Error> {
    db::delete_community(&mut *conn, user, CommunityId(community)).await
}

pub async fn join_community(
    Auth(user): Auth,
    Path(community): Path<Uuid>,
    mut conn: PgConn,
) -> Result<Json<Community>, Error> {
    Ok(Json(
        db::set_membership(&mut *conn, user, CommunityId(community), true).await?,
    ))
}

pub async fn leave_community(
    Auth(user): Auth,
    Path(community): Path<Uuid>,
    mut conn: PgConn,
) -> Result<Json<Community>, Error> {
    Ok(Json(
        db::set_membership(&mut *conn, user, CommunityId(community), false).await?,
    ))
}

// Posts

pub async fn fetch_posts(mut conn: PgConn) -> Result<Json<Vec<Post>>, Error> {
    Ok(Json(
        db::fetch_posts(&mut *conn)
            .await
            .context("fetching post list")?,
    ))
}

pub async fn fetch_post(Path(post): Path<Uuid>, mut conn: PgConn) -> Result<Json<Post>, Error> {
    Ok(Json(db::fetch_post(&mut *conn, PostId(post)).await?))
}

pub async fn create_post(
    Auth(user): Auth,
    mut conn: PgConn,
    Json(data): Json<NewPost>,
) -> Result<Json<Post>, Error> {
    Ok(Json(db::create_post(&mut *conn, user, data).await?))
}

pub async fn edit_post(
    Auth(user): Auth,
    Path(post): Path<Uuid>,
    mut conn: PgConn,
    Json(data): Json<PostEdit>,
) -> Result<Json<Post>, Error> {
    Ok(Json(
        db::edit_post(&mut *conn, user, PostId(post), data).await?,
    ))
}

pub async fn delete_post(
    Auth(user): Auth,
    Path(post): Path<Uuid>,
    mut conn: PgConn,
) -> Result<(), Error> {
    db::delete_post(&mut *conn, user, PostId(post)).await
}

pub async fn view_post(Path(post): Path<Uuid>, mut conn: PgConn) -> Result<Json<Post>, Error> {
    Ok(Json(db::view_post(&mut *conn, PostId(post)).await?))
}

pub async fn comment_tree(
    Path(post): Path<Uuid>,
    mut conn: PgConn,
) -> Result<Json<Vec<ThreadEntry>>, Error> {
    Ok(Json(db::comment_tree(&mut *conn, PostId(post)).await?))
}

pub async fn post_stats(
    Path(post): Path<Uuid>,
    mut conn: PgConn,
) -> Result<Json<ActivityStats>, Error> {
    Ok(Json(db::post_stats(&mut *conn, PostId(post)).await?))
}

pub async fn create_comment(
    OptionalAuth(user): OptionalAuth,
    Path(post): Path<Uuid>,
    mut conn: PgConn,
    Json(data): Json<NewComment>,
) -> Result<Json<Comment>, Error> {
    Ok(Json(
        db::create_comment(&mut *conn, user, PostId(post), data).await?,
    ))
}

pub async fn upvote_post(
    Auth(user): Auth,
    Path(post): Path<Uuid>,
    mut conn: PgConn,
) -> Result<Json<Post>, Error> {
    vote_post(user, PostId(post), VoteDirection::Up, &mut conn).await
}

pub async fn downvote_post(
    Auth(user): Auth,
    Path(post): Path<Uuid>,
    mut conn: PgConn,
) -> Result<Json<Post>, Error> {
    vote_post(user, PostId(post), VoteDirection::Down, &mut conn).await
}

async fn vote_post(
    user: UserId,
    post: PostId,
    dir: VoteDirection,
    conn: &mut PgConn,
) -> Result<Json<Post>, Error> {
    db::vote(&mut **conn, user, VoteTarget::Post(post), dir).await?;
    Ok(Json(db::fetch_post(&mut **conn, post).await?))
}

// Comments

pub async fn fetch_comment(
    Path(comment): Path<Uuid>,
    mut conn: PgConn,
) -> Result<Json<Comment>, Error> {
    Ok(Json(db::fetch_comment(&mut *conn, CommentId(comment)).await?))
}

pub async fn edit_comment(
    Auth(user): Auth,
    Path(comment): Path<Uuid>,
    mut conn: PgConn,
    Json(data): Json<CommentEdit>,
) -> Result<Json<Comment>, Error> {
    Ok(Json(
        db::edit_comment(&mut *conn, user, CommentId(comment), data).await?,
    ))
}

pub async fn delete_comment(
    Auth(user): Auth,
    Path(comment): Path<Uuid>,
    mut conn: PgConn,
) -> Result<(), Error> {
    db::delete_comment(&mut *conn, user, CommentId(comment)).await
}

pub async fn upvote_comment(
    Auth(user): Auth,
    Path(comment): Path<Uuid>,
    mut conn: PgConn,
) -> Result<Json<Comment>, Error> {
    vote_comment(user, CommentId(comment), VoteDirection::Up, &mut conn).await
}

pub async fn downvote_comment(
    Auth(user): Auth,
    Path(comment): Path<Uuid>,
    mut conn: PgConn,
) -> Result<Json<Comment>, Error> {
    vote_comment(user, CommentId(comment), VoteDirection::Down, &mut conn).await
}

async fn vote_comment(
    user: UserId,
    comment: CommentId,
    dir: VoteDirection,
    conn: &mut PgConn,
) -> Result<Json<Comment>, Error> {
    db::vote(&mut **conn, user, VoteTarget::Comment(comment), dir).await?;
    Ok(Json(db::fetch_comment(&mut **conn, comment).await?))
}

// Flairs and search

pub async fn fetch_flairs(mut conn: PgConn) -> Result<Json<Vec<Flair>>, Error> {
    Ok(Json(
        db::fetch_flairs(&mut *conn)
            .await
            .context("fetching flair list")?,
    ))
}

pub async fn create_flair(
    Auth(_): Auth,
    mut conn: PgConn,
    Json(data): Json<NewFlair>,
) -> Result<Json<Flair>, Error> {
    Ok(Json(db::create_flair(&mut *conn, data).await?))
}

#[derive(serde::Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
}

pub async fn search(
    Query(query): Query<SearchQuery>,
    mut conn: PgConn,
) -> Result<Json<Vec<Post>>, Error> {
    Ok(Json(
        db::search_posts(&mut *conn, &query.q)
            .await
            .with_context(|| format!("searching posts for {:?}", query.q))?,
    ))
}
