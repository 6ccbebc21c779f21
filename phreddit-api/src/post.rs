use uuid::Uuid;

use crate::{CommentId, CommunityId, Error, FlairId, Time, UserId, Votes};

#[derive(
    Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Deserialize, serde::Serialize,
)]
pub struct PostId(pub Uuid);

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Post {
    pub id: PostId,
    pub community_id: CommunityId,
    pub title: String,
    pub content: String,
    pub author: UserId,
    pub date: Time,
    pub views: i64,
    pub flair_id: Option<FlairId>,

    /// Top-level comments, in insertion order
    pub comment_ids: Vec<CommentId>,

    pub votes: Votes,
}

impl Post {
    pub fn from_new(author: UserId, p: NewPost) -> Post {
        Post {
            id: p.id,
            community_id: p.community_id,
            title: p.title,
            content: p.content,
            author,
            date: p.date,
            views: 0,
            flair_id: p.flair_id,
            comment_ids: Vec::new(),
            votes: Votes::new(),
        }
    }

    /// Case-insensitive substring search on the title and the content
    pub fn matches(&self, query: &str) -> bool {
        let query = query.trim().to_lowercase();
        if query.is_empty() {
            return false;
        }
        self.title.to_lowercase().contains(&query) || self.content.to_lowercase().contains(&query)
    }
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct NewPost {
    pub id: PostId,
    pub community_id: CommunityId,
    pub title: String,
    pub content: String,
    pub flair_id: Option<FlairId>,
    pub date: Time,
}

impl NewPost {
    pub fn now(
        community_id: CommunityId,
        title: String,
        content: String,
        flair_id: Option<FlairId>,
    ) -> NewPost {
        NewPost {
            id: PostId(Uuid::new_v4()),
            community_id,
            title,
            content,
            flair_id,
            date: crate::now(),
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        crate::validate_bounded("title", &self.title, crate::MAX_TITLE_LEN)?;
        crate::validate_bounded("content", &self.content, usize::MAX)?;
        crate::validate_time(&self.date)
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct PostEdit {
    pub title: Option<String>,
    pub content: Option<String>,
}

impl PostEdit {
    pub fn validate(&self) -> Result<(), Error> {
        if let Some(title) = &self.title {
            crate::validate_bounded("title", title, crate::MAX_TITLE_LEN)?;
        }
        if let Some(content) = &self.content {
            crate::validate_bounded("content", content, usize::MAX)?;
        }
        Ok(())
    }
}
