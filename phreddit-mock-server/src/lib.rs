use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use phreddit_api::{
    ActivityStats, AdminNewUser, AuthToken, Comment, CommentEdit, CommentId, Community,
    CommunityEdit, CommunityId, Db, Error, Flair, FlairId, NewComment, NewCommunity, NewFlair,
    NewPost, NewSession, NewUser, Post, PostEdit, PostId, ThreadEntry, User, UserId, UserProfile,
    Uuid, VoteDirection, VoteTarget,
};

/// In-memory implementation of the whole forum, behaving exactly like the
/// real server down to the errors returned
pub struct MockServer {
    users: BTreeMap<UserId, MockUser>,
    sessions: HashMap<AuthToken, UserId>,
    communities: BTreeMap<CommunityId, Community>,
    posts: BTreeMap<PostId, Post>,
    comments: BTreeMap<CommentId, Comment>,
    flairs: BTreeMap<FlairId, Flair>,
}

#[derive(Debug)]
struct MockUser {
    profile: UserProfile,
    // tests (of which mock-server is a part of) don't actually use bcrypt
    password: String,
}

#[async_trait]
impl Db for MockServer {
    async fn fetch_comments(&mut self, ids: &[CommentId]) -> anyhow::Result<Vec<Comment>> {
        Ok(ids
            .iter()
            .filter_map(|id| self.comments.get(id).cloned())
            .collect())
    }
}

fn tree_error(e: anyhow::Error) -> Error {
    Error::Unknown(format!("{e:#}"))
}

impl MockServer {
    pub fn new() -> MockServer {
        MockServer {
            users: BTreeMap::new(),
            sessions: HashMap::new(),
            communities: BTreeMap::new(),
            posts: BTreeMap::new(),
            comments: BTreeMap::new(),
            flairs: BTreeMap::new(),
        }
    }

    /// Return email & password for user number `id`
    pub fn test_get_user_info(&self, id: usize) -> (&str, &str) {
        let u = self
            .users
            .values()
            .nth(id)
            .unwrap_or_else(|| panic!("getting user {id} among {}", self.users.len()));
        (&u.profile.email, &u.password)
    }

    pub fn test_num_users(&self) -> usize {
        self.users.len()
    }

    pub fn test_user_ids(&self) -> Vec<UserId> {
        self.users.keys().copied().collect()
    }

    pub fn test_community_ids(&self) -> Vec<CommunityId> {
        self.communities.keys().copied().collect()
    }

    pub fn test_post_ids(&self) -> Vec<PostId> {
        self.posts.keys().copied().collect()
    }

    pub fn test_comment_ids(&self) -> Vec<CommentId> {
        self.comments.keys().copied().collect()
    }

    pub fn test_flair_ids(&self) -> Vec<FlairId> {
        self.flairs.keys().copied().collect()
    }

    fn resolve(&self, tok: AuthToken) -> Result<UserId, Error> {
        self.sessions
            .get(&tok)
            .copied()
            .ok_or(Error::PermissionDenied)
    }

    fn user(&self, id: UserId) -> Result<&MockUser, Error> {
        self.users.get(&id).ok_or(Error::NotFound(id.0))
    }

    fn check_owner(&self, actor: UserId, owner: Option<UserId>) -> Result<(), Error> {
        if owner == Some(actor) || self.user(actor)?.profile.user.is_admin {
            Ok(())
        } else {
            Err(Error::PermissionDenied)
        }
    }

    // Users and sessions

    pub fn admin_create_user(&mut self, u: AdminNewUser) -> Result<(), Error> {
        let AdminNewUser {
            user: u,
            reputation,
            is_admin,
        } = u;
        u.validate()?;
        if self.users.contains_key(&u.id) {
            return Err(Error::UuidAlreadyUsed(u.id.0));
        }
        if self.users.values().any(|o| o.profile.email == u.email) {
            return Err(Error::EmailAlreadyUsed(u.email));
        }
        if self
            .users
            .values()
            .any(|o| o.profile.user.display_name == u.display_name)
        {
            return Err(Error::NameAlreadyUsed(u.display_name));
        }
        self.users.insert(
            u.id,
            MockUser {
                profile: UserProfile {
                    user: User {
                        id: u.id,
                        display_name: u.display_name,
                        reputation,
                        is_admin,
                        created: phreddit_api::now(),
                    },
                    first_name: u.first_name,
                    last_name: u.last_name,
                    email: u.email,
                },
                password: u.password,
            },
        );
        Ok(())
    }

    pub fn register(&mut self, u: NewUser) -> Result<(), Error> {
        self.admin_create_user(AdminNewUser {
            user: u,
            reputation: phreddit_api::DEFAULT_REPUTATION,
            is_admin: false,
        })
    }

    pub fn auth(&mut self, s: NewSession) -> Result<AuthToken, Error> {
        s.validate()?;
        let user = self
            .users
            .values()
            .find(|u| u.profile.email == s.email && u.password == s.password)
            .ok_or(Error::PermissionDenied)?;
        let tok = AuthToken(Uuid::new_v4());
        self.sessions.insert(tok, user.profile.user.id);
        Ok(tok)
    }

    pub fn unauth(&mut self, tok: AuthToken) -> Result<(), Error> {
        self.sessions
            .remove(&tok)
            .map(|_| ())
            .ok_or(Error::PermissionDenied)
    }

    pub fn whoami(&self, tok: AuthToken) -> Result<UserProfile, Error> {
        let user = self.resolve(tok)?;
        Ok(self.user(user)?.profile.clone())
    }

    pub fn fetch_users(&self) -> Vec<User> {
        let mut res = self
            .users
            .values()
            .map(|u| u.profile.user.clone())
            .collect::<Vec<_>>();
        res.sort_by(|a, b| {
            a.display_name
                .cmp(&b.display_name)
                .then_with(|| a.id.cmp(&b.id))
        });
        res
    }

    pub fn fetch_user(&self, user: UserId) -> Result<User, Error> {
        Ok(self.user(user)?.profile.user.clone())
    }

    pub fn user_communities(&self, user: UserId) -> Result<Vec<Community>, Error> {
        self.user(user)?;
        Ok(sorted_communities(
            self.communities.values().filter(|c| c.creator == user),
        ))
    }

    pub fn user_posts(&self, user: UserId) -> Result<Vec<Post>, Error> {
        self.user(user)?;
        Ok(sorted_posts(self.posts.values().filter(|p| p.author == user)))
    }

    pub fn user_comments(&self, user: UserId) -> Result<Vec<Comment>, Error> {
        self.user(user)?;
        let mut res = self
            .comments
            .values()
            .filter(|c| c.author == Some(user))
            .cloned()
            .collect::<Vec<_>>();
        res.sort_by(|a, b| b.date.cmp(&a.date).then_with(|| a.id.cmp(&b.id)));
        Ok(res)
    }

    pub async fn delete_user(&mut self, tok: AuthToken, user: UserId) -> Result<(), Error> {
        let actor = self.resolve(tok)?;
        self.user(user)?;
        if actor != user && !self.user(actor)?.profile.user.is_admin {
            return Err(Error::PermissionDenied);
        }

        let comments = self
            .comments
            .values()
            .filter(|c| c.author == Some(user))
            .map(|c| c.id)
            .collect::<Vec<_>>();
        self.remove_comment_trees(&comments).await?;
        let posts = self
            .posts
            .values()
            .filter(|p| p.author == user)
            .map(|p| p.id)
            .collect::<Vec<_>>();
        for p in posts {
            self.remove_post(p);
        }
        let communities = self
            .communities
            .values()
            .filter(|c| c.creator == user)
            .map(|c| c.id)
            .collect::<Vec<_>>();
        for c in communities {
            self.remove_community(c);
        }

        for p in self.posts.values_mut() {
            p.votes.forget(&user);
        }
        for c in self.comments.values_mut() {
            c.votes.forget(&user);
        }
        for c in self.communities.values_mut() {
            c.members.remove(&user);
        }
        self.sessions.retain(|_, u| *u != user);
        self.users.remove(&user);
        Ok(())
    }

    // Communities

    pub fn fetch_communities(&self) -> Vec<Community> {
        sorted_communities(self.communities.values())
    }

    pub fn fetch_community(&self, community: CommunityId) -> Result<Community, Error> {
        self.communities
            .get(&community)
            .cloned()
            .ok_or(Error::NotFound(community.0))
    }

    pub fn create_community(
        &mut self,
        tok: AuthToken,
        c: NewCommunity,
    ) -> Result<Community, Error> {
        let user = self.resolve(tok)?;
        c.validate()?;
        if self.communities.contains_key(&c.id) {
            return Err(Error::UuidAlreadyUsed(c.id.0));
        }
        if self.communities.values().any(|o| o.name == c.name) {
            return Err(Error::NameAlreadyUsed(c.name));
        }
        let c = Community::from_new(user, c);
        self.communities.insert(c.id, c.clone());
        Ok(c)
    }

    pub fn edit_community(
        &mut self,
        tok: AuthToken,
        community: CommunityId,
        e: CommunityEdit,
    ) -> Result<Community, Error> {
        let user = self.resolve(tok)?;
        e.validate()?;
        let current = self.fetch_community(community)?;
        self.check_owner(user, Some(current.creator))?;
        if let Some(name) = &e.name {
            if *name != current.name && self.communities.values().any(|o| o.name == *name) {
                return Err(Error::NameAlreadyUsed(name.clone()));
            }
        }
        let c = self
            .communities
            .get_mut(&community)
            .ok_or(Error::NotFound(community.0))?;
        if let Some(name) = e.name {
            c.name = name;
        }
        if let Some(description) = e.description {
            c.description = description;
        }
        Ok(c.clone())
    }

    pub fn delete_community(&mut self, tok: AuthToken, community: CommunityId) -> Result<(), Error> {
        let user = self.resolve(tok)?;
        let current = self.fetch_community(community)?;
        self.check_owner(user, Some(current.creator))?;
        self.remove_community(community);
        Ok(())
    }

    pub fn join_community(
        &mut self,
        tok: AuthToken,
        community: CommunityId,
    ) -> Result<Community, Error> {
        self.set_membership(tok, community, true)
    }

    pub fn leave_community(
        &mut self,
        tok: AuthToken,
        community: CommunityId,
    ) -> Result<Community, Error> {
        self.set_membership(tok, community, false)
    }

    fn set_membership(
        &mut self,
        tok: AuthToken,
        community: CommunityId,
        member: bool,
    ) -> Result<Community, Error> {
        let user = self.resolve(tok)?;
        let c = self
            .communities
            .get_mut(&community)
            .ok_or(Error::NotFound(community.0))?;
        match member {
            true => c.members.insert(user),
            false => c.members.remove(&user),
        };
        Ok(c.clone())
    }

    // Flairs

    pub fn fetch_flairs(&self) -> Vec<Flair> {
        let mut res = self.flairs.values().cloned().collect::<Vec<_>>();
        res.sort_by(|a, b| a.content.cmp(&b.content).then_with(|| a.id.cmp(&b.id)));
        res
    }

    pub fn create_flair(&mut self, tok: AuthToken, f: NewFlair) -> Result<Flair, Error> {
        self.resolve(tok)?;
        f.validate()?;
        if self.flairs.contains_key(&f.id) {
            return Err(Error::UuidAlreadyUsed(f.id.0));
        }
        let f = Flair {
            id: f.id,
            content: f.content,
        };
        self.flairs.insert(f.id, f.clone());
        Ok(f)
    }

    // Posts

    pub fn fetch_posts(&self) -> Vec<Post> {
        sorted_posts(self.posts.values())
    }

    pub fn fetch_post(&self, post: PostId) -> Result<Post, Error> {
        self.posts
            .get(&post)
            .cloned()
            .ok_or(Error::NotFound(post.0))
    }

    pub fn search(&self, query: &str) -> Vec<Post> {
        sorted_posts(self.posts.values().filter(|p| p.matches(query)))
    }

    pub fn create_post(&mut self, tok: AuthToken, p: NewPost) -> Result<Post, Error> {
        let user = self.resolve(tok)?;
        p.validate()?;
        if self.posts.contains_key(&p.id) {
            return Err(Error::UuidAlreadyUsed(p.id.0));
        }
        if !self.communities.contains_key(&p.community_id) {
            return Err(Error::NotFound(p.community_id.0));
        }
        if let Some(flair) = p.flair_id {
            if !self.flairs.contains_key(&flair) {
                return Err(Error::NotFound(flair.0));
            }
        }
        let p = Post::from_new(user, p);
        if let Some(c) = self.communities.get_mut(&p.community_id) {
            c.post_ids.push(p.id);
        }
        self.posts.insert(p.id, p.clone());
        Ok(p)
    }

    pub fn edit_post(&mut self, tok: AuthToken, post: PostId, e: PostEdit) -> Result<Post, Error> {
        let user = self.resolve(tok)?;
        e.validate()?;
        let current = self.fetch_post(post)?;
        self.check_owner(user, Some(current.author))?;
        let p = self.posts.get_mut(&post).ok_or(Error::NotFound(post.0))?;
        if let Some(title) = e.title {
            p.title = title;
        }
        if let Some(content) = e.content {
            p.content = content;
        }
        Ok(p.clone())
    }

    pub fn delete_post(&mut self, tok: AuthToken, post: PostId) -> Result<(), Error> {
        let user = self.resolve(tok)?;
        let current = self.fetch_post(post)?;
        self.check_owner(user, Some(current.author))?;
        self.remove_post(post);
        Ok(())
    }

    pub fn view_post(&mut self, post: PostId) -> Result<Post, Error> {
        let p = self.posts.get_mut(&post).ok_or(Error::NotFound(post.0))?;
        p.views += 1;
        Ok(p.clone())
    }

    pub async fn comment_tree(&mut self, post: PostId) -> Result<Vec<ThreadEntry>, Error> {
        let roots = self.fetch_post(post)?.comment_ids;
        phreddit_api::assemble_thread(self, &roots)
            .await
            .map_err(tree_error)
    }

    pub async fn post_stats(&mut self, post: PostId) -> Result<ActivityStats, Error> {
        let p = self.fetch_post(post)?;
        let comments = phreddit_api::load_subtree(self, &p.comment_ids)
            .await
            .map_err(tree_error)?;
        Ok(ActivityStats::of_comments(p.date, comments.values()))
    }

    pub fn vote(
        &mut self,
        tok: AuthToken,
        target: VoteTarget,
        dir: VoteDirection,
    ) -> Result<(), Error> {
        let user = self.resolve(tok)?;
        self.user(user)?.profile.user.can_vote()?;
        let votes = match target {
            VoteTarget::Post(p) => &mut self.posts.get_mut(&p).ok_or(Error::NotFound(p.0))?.votes,
            VoteTarget::Comment(c) => {
                &mut self
                    .comments
                    .get_mut(&c)
                    .ok_or(Error::NotFound(c.0))?
                    .votes
            }
        };
        votes.apply(user, dir);
        Ok(())
    }

    pub fn upvote_post(&mut self, tok: AuthToken, post: PostId) -> Result<Post, Error> {
        self.vote(tok, VoteTarget::Post(post), VoteDirection::Up)?;
        self.fetch_post(post)
    }

    pub fn downvote_post(&mut self, tok: AuthToken, post: PostId) -> Result<Post, Error> {
        self.vote(tok, VoteTarget::Post(post), VoteDirection::Down)?;
        self.fetch_post(post)
    }

    // Comments

    pub fn fetch_comment(&self, comment: CommentId) -> Result<Comment, Error> {
        self.comments
            .get(&comment)
            .cloned()
            .ok_or(Error::NotFound(comment.0))
    }

    pub fn create_comment(
        &mut self,
        tok: Option<AuthToken>,
        post: PostId,
        c: NewComment,
    ) -> Result<Comment, Error> {
        let author = tok.map(|t| self.resolve(t)).transpose()?;
        c.validate()?;
        if !self.posts.contains_key(&post) {
            return Err(Error::NotFound(post.0));
        }
        if self.comments.contains_key(&c.id) {
            return Err(Error::UuidAlreadyUsed(c.id.0));
        }
        let c = Comment::from_new(post, author, c);
        match c.parent_id {
            None => {
                if let Some(p) = self.posts.get_mut(&post) {
                    p.comment_ids.push(c.id);
                }
            }
            Some(parent) => {
                let parent = self
                    .comments
                    .get_mut(&parent)
                    .ok_or(Error::NotFound(parent.0))?;
                if parent.post_id != post {
                    return Err(Error::ParentNotInPost(parent.id.0));
                }
                parent.children.push(c.id);
            }
        }
        self.comments.insert(c.id, c.clone());
        Ok(c)
    }

    pub fn edit_comment(
        &mut self,
        tok: AuthToken,
        comment: CommentId,
        e: CommentEdit,
    ) -> Result<Comment, Error> {
        let user = self.resolve(tok)?;
        e.validate()?;
        let current = self.fetch_comment(comment)?;
        self.check_owner(user, current.author)?;
        let c = self
            .comments
            .get_mut(&comment)
            .ok_or(Error::NotFound(comment.0))?;
        c.content = e.content;
        Ok(c.clone())
    }

    pub async fn delete_comment(&mut self, tok: AuthToken, comment: CommentId) -> Result<(), Error> {
        let user = self.resolve(tok)?;
        let current = self.fetch_comment(comment)?;
        self.check_owner(user, current.author)?;
        self.remove_comment_trees(&[comment]).await
    }

    pub fn upvote_comment(&mut self, tok: AuthToken, comment: CommentId) -> Result<Comment, Error> {
        self.vote(tok, VoteTarget::Comment(comment), VoteDirection::Up)?;
        self.fetch_comment(comment)
    }

    pub fn downvote_comment(
        &mut self,
        tok: AuthToken,
        comment: CommentId,
    ) -> Result<Comment, Error> {
        self.vote(tok, VoteTarget::Comment(comment), VoteDirection::Down)?;
        self.fetch_comment(comment)
    }

    // Cascades

    async fn remove_comment_trees(&mut self, roots: &[CommentId]) -> Result<(), Error> {
        let comments = phreddit_api::load_subtree(self, roots)
            .await
            .map_err(tree_error)?;
        for id in phreddit_api::deletion_order(roots, &comments) {
            let Some(c) = self.comments.remove(&id) else {
                continue;
            };
            match c.parent_id {
                None => {
                    if let Some(p) = self.posts.get_mut(&c.post_id) {
                        p.comment_ids.retain(|i| *i != id);
                    }
                }
                Some(parent) => {
                    if let Some(p) = self.comments.get_mut(&parent) {
                        p.children.retain(|i| *i != id);
                    }
                }
            }
        }
        Ok(())
    }

    fn remove_post(&mut self, post: PostId) {
        self.comments.retain(|_, c| c.post_id != post);
        if let Some(p) = self.posts.remove(&post) {
            if let Some(c) = self.communities.get_mut(&p.community_id) {
                c.post_ids.retain(|i| *i != post);
            }
        }
    }

    fn remove_community(&mut self, community: CommunityId) {
        if let Some(c) = self.communities.remove(&community) {
            for p in c.post_ids {
                self.remove_post(p);
            }
        }
    }
}

impl Default for MockServer {
    fn default() -> MockServer {
        MockServer::new()
    }
}

fn sorted_communities<'a>(it: impl Iterator<Item = &'a Community>) -> Vec<Community> {
    let mut res = it.cloned().collect::<Vec<_>>();
    res.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.id.cmp(&b.id)));
    res
}

fn sorted_posts<'a>(it: impl Iterator<Item = &'a Post>) -> Vec<Post> {
    let mut res = it.cloned().collect::<Vec<_>>();
    res.sort_by(|a, b| b.date.cmp(&a.date).then_with(|| a.id.cmp(&b.id)));
    res
}

#[cfg(test)]
mod tests;
