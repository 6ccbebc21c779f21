use anyhow::Context;
use async_trait::async_trait;
use futures::future::try_join_all;
use reqwest::{Method, RequestBuilder, StatusCode};

use crate::{
    api::{
        self, ActivityStats, AdminNewUser, AuthToken, Comment, CommentEdit, CommentId,
        Community, CommunityEdit, CommunityId, Flair, NewComment, NewCommunity, NewFlair,
        NewPost, NewSession, NewUser, Post, PostEdit, PostId, ThreadEntry, User, UserId,
        UserProfile, VoteDirection,
    },
    build_feed, FeedEntry, Order, StatsSource,
};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("server refused the request: {0}")]
    Api(#[from] api::Error),

    #[error("failed talking to the server")]
    Http(#[from] reqwest::Error),

    #[error("server sent an unexpected response")]
    InvalidResponse(#[from] anyhow::Error),
}

impl ClientError {
    pub fn api(&self) -> Option<&api::Error> {
        match self {
            ClientError::Api(e) => Some(e),
            _ => None,
        }
    }
}

/// Typed access to a phreddit server
#[derive(Clone, Debug)]
pub struct Client {
    http: reqwest::Client,
    host: String,
    token: Option<AuthToken>,
}

impl Client {
    pub fn new(host: String) -> Client {
        Client {
            http: reqwest::Client::new(),
            host,
            token: None,
        }
    }

    pub fn with_token(mut self, token: AuthToken) -> Client {
        self.token = Some(token);
        self
    }

    pub fn token(&self) -> Option<AuthToken> {
        self.token
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/{}", self.host.trim_end_matches('/'), path)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let req = self.http.request(method, self.url(path));
        match self.token {
            Some(token) => req.bearer_auth(token.0),
            None => req,
        }
    }

    async fn send<R>(&self, req: RequestBuilder) -> Result<R, ClientError>
    where
        R: serde::de::DeserializeOwned,
    {
        let resp = req.send().await?;
        let status = resp.status();
        let body = resp.bytes().await?;
        decode(status, &body)
    }

    async fn get<R>(&self, path: &str) -> Result<R, ClientError>
    where
        R: serde::de::DeserializeOwned,
    {
        self.send(self.request(Method::GET, path)).await
    }

    async fn post<B, R>(&self, path: &str, body: &B) -> Result<R, ClientError>
    where
        B: serde::Serialize,
        R: serde::de::DeserializeOwned,
    {
        self.send(self.request(Method::POST, path).json(body)).await
    }

    async fn patch<B, R>(&self, path: &str, body: &B) -> Result<R, ClientError>
    where
        B: serde::Serialize,
        R: serde::de::DeserializeOwned,
    {
        self.send(self.request(Method::PATCH, path).json(body)).await
    }

    async fn delete(&self, path: &str) -> Result<(), ClientError> {
        self.send(self.request(Method::DELETE, path)).await
    }

    async fn trigger<R>(&self, path: &str) -> Result<R, ClientError>
    where
        R: serde::de::DeserializeOwned,
    {
        self.send(self.request(Method::POST, path)).await
    }

    // Users and sessions

    pub async fn admin_create_user(
        &self,
        admin_token: AuthToken,
        user: &AdminNewUser,
    ) -> Result<(), ClientError> {
        let req = self
            .http
            .post(self.url("admin/create-user"))
            .bearer_auth(admin_token.0)
            .json(user);
        self.send(req).await
    }

    pub async fn register(&self, user: &NewUser) -> Result<(), ClientError> {
        self.post("register", user).await
    }

    /// Logs in, and uses the new session for all further requests
    pub async fn auth(&mut self, session: &NewSession) -> Result<AuthToken, ClientError> {
        let token: AuthToken = self.post("auth", session).await?;
        self.token = Some(token);
        Ok(token)
    }

    pub async fn unauth(&mut self) -> Result<(), ClientError> {
        let res = self.trigger("unauth").await;
        self.token = None;
        res
    }

    pub async fn whoami(&self) -> Result<UserProfile, ClientError> {
        self.get("whoami").await
    }

    pub async fn users(&self) -> Result<Vec<User>, ClientError> {
        self.get("users").await
    }

    pub async fn user(&self, user: UserId) -> Result<User, ClientError> {
        self.get(&format!("users/{}", user.0)).await
    }

    pub async fn delete_user(&self, user: UserId) -> Result<(), ClientError> {
        self.delete(&format!("users/{}", user.0)).await
    }

    pub async fn user_communities(&self, user: UserId) -> Result<Vec<Community>, ClientError> {
        self.get(&format!("users/{}/communities", user.0)).await
    }

    pub async fn user_posts(&self, user: UserId) -> Result<Vec<Post>, ClientError> {
        self.get(&format!("users/{}/posts", user.0)).await
    }

    pub async fn user_comments(&self, user: UserId) -> Result<Vec<Comment>, ClientError> {
        self.get(&format!("users/{}/comments", user.0)).await
    }

    // Communities

    pub async fn communities(&self) -> Result<Vec<Community>, ClientError> {
        self.get("communities").await
    }

    pub async fn community(&self, community: CommunityId) -> Result<Community, ClientError> {
        self.get(&format!("communities/{}", community.0)).await
    }

    pub async fn create_community(&self, c: &NewCommunity) -> Result<Community, ClientError> {
        self.post("communities", c).await
    }

    pub async fn edit_community(
        &self,
        community: CommunityId,
        edit: &CommunityEdit,
    ) -> Result<Community, ClientError> {
        self.patch(&format!("communities/{}", community.0), edit)
            .await
    }

    pub async fn delete_community(&self, community: CommunityId) -> Result<(), ClientError> {
        self.delete(&format!("communities/{}", community.0)).await
    }

    pub async fn join_community(&self, community: CommunityId) -> Result<Community, ClientError> {
        self.trigger(&format!("communities/{}/join", community.0))
            .await
    }

    pub async fn leave_community(&self, community: CommunityId) -> Result<Community, ClientError> {
        self.trigger(&format!("communities/{}/leave", community.0))
            .await
    }

    // Posts

    pub async fn posts(&self) -> Result<Vec<Post>, ClientError> {
        self.get("posts").await
    }

    pub async fn post_by_id(&self, post: PostId) -> Result<Post, ClientError> {
        self.get(&format!("posts/{}", post.0)).await
    }

    pub async fn create_post(&self, p: &NewPost) -> Result<Post, ClientError> {
        self.post("posts", p).await
    }

    pub async fn edit_post(&self, post: PostId, edit: &PostEdit) -> Result<Post, ClientError> {
        self.patch(&format!("posts/{}", post.0), edit).await
    }

    pub async fn delete_post(&self, post: PostId) -> Result<(), ClientError> {
        self.delete(&format!("posts/{}", post.0)).await
    }

    pub async fn view_post(&self, post: PostId) -> Result<Post, ClientError> {
        self.trigger(&format!("posts/{}/views", post.0)).await
    }

    /// Every comment of the post, each right before its replies
    pub async fn comment_tree(&self, post: PostId) -> Result<Vec<ThreadEntry>, ClientError> {
        self.get(&format!("posts/{}/comments", post.0)).await
    }

    pub async fn post_stats(&self, post: PostId) -> Result<ActivityStats, ClientError> {
        self.get(&format!("posts/{}/stats", post.0)).await
    }

    pub async fn vote_post(&self, post: PostId, dir: VoteDirection) -> Result<Post, ClientError> {
        self.trigger(&format!("posts/{}/{}", post.0, vote_path(dir)))
            .await
    }

    // Comments

    pub async fn comment(&self, comment: CommentId) -> Result<Comment, ClientError> {
        self.get(&format!("comments/{}", comment.0)).await
    }

    /// Comments without a session are posted as a guest
    pub async fn create_comment(
        &self,
        post: PostId,
        c: &NewComment,
    ) -> Result<Comment, ClientError> {
        self.post(&format!("posts/{}/comments", post.0), c).await
    }

    pub async fn edit_comment(
        &self,
        comment: CommentId,
        edit: &CommentEdit,
    ) -> Result<Comment, ClientError> {
        self.patch(&format!("comments/{}", comment.0), edit).await
    }

    pub async fn delete_comment(&self, comment: CommentId) -> Result<(), ClientError> {
        self.delete(&format!("comments/{}", comment.0)).await
    }

    pub async fn vote_comment(
        &self,
        comment: CommentId,
        dir: VoteDirection,
    ) -> Result<Comment, ClientError> {
        self.trigger(&format!("comments/{}/{}", comment.0, vote_path(dir)))
            .await
    }

    // Flairs and search

    pub async fn flairs(&self) -> Result<Vec<Flair>, ClientError> {
        self.get("flairs").await
    }

    pub async fn create_flair(&self, f: &NewFlair) -> Result<Flair, ClientError> {
        self.post("flairs", f).await
    }

    pub async fn search(&self, query: &str) -> Result<Vec<Post>, ClientError> {
        let req = self.request(Method::GET, "search").query(&[("q", query)]);
        self.send(req).await
    }

    // Feeds

    /// Attaches activity stats to `posts` and sorts them for display
    pub async fn feed(&self, posts: Vec<Post>, order: Order) -> Result<Vec<FeedEntry>, ClientError> {
        build_feed(self, posts, order).await
    }

    pub async fn home_feed(&self, order: Order) -> Result<Vec<FeedEntry>, ClientError> {
        self.feed(self.posts().await?, order).await
    }

    pub async fn community_feed(
        &self,
        community: CommunityId,
        order: Order,
    ) -> Result<Vec<FeedEntry>, ClientError> {
        let community = self.community(community).await?;
        let posts = try_join_all(community.post_ids.iter().map(|p| self.post_by_id(*p))).await?;
        self.feed(posts, order).await
    }

    pub async fn search_feed(
        &self,
        query: &str,
        order: Order,
    ) -> Result<Vec<FeedEntry>, ClientError> {
        self.feed(self.search(query).await?, order).await
    }
}

#[async_trait]
impl StatsSource for Client {
    async fn stats(&self, post: PostId) -> Result<ActivityStats, ClientError> {
        self.post_stats(post).await
    }
}

fn vote_path(dir: VoteDirection) -> &'static str {
    match dir {
        VoteDirection::Up => "upvote",
        VoteDirection::Down => "downvote",
    }
}

fn decode<R>(status: StatusCode, body: &[u8]) -> Result<R, ClientError>
where
    R: serde::de::DeserializeOwned,
{
    if status.is_success() {
        // endpoints returning nothing answer with an empty body
        let body: &[u8] = match body.is_empty() {
            true => b"null",
            false => body,
        };
        return Ok(serde_json::from_slice(body).context("parsing response body")?);
    }
    let err = api::Error::parse(body)
        .with_context(|| format!("parsing error response with status {status}"))?;
    tracing::info!(?status, error = ?err, "server returned an error");
    Err(ClientError::Api(err))
}
