use uuid::Uuid;

use crate::{Error, PostId, Time, UserId, Votes};

#[derive(
    Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Deserialize, serde::Serialize,
)]
pub struct CommentId(pub Uuid);

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Comment {
    pub id: CommentId,
    pub post_id: PostId,

    /// None for top-level comments of the post
    pub parent_id: Option<CommentId>,

    pub content: String,

    /// None for comments left by guests
    pub author: Option<UserId>,
    pub date: Time,

    /// Direct replies, in insertion order
    pub children: Vec<CommentId>,

    pub votes: Votes,
}

impl Comment {
    pub fn from_new(post_id: PostId, author: Option<UserId>, c: NewComment) -> Comment {
        Comment {
            id: c.id,
            post_id,
            parent_id: c.parent_id,
            content: c.content,
            author,
            date: c.date,
            children: Vec::new(),
            votes: Votes::new(),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct NewComment {
    pub id: CommentId,
    pub parent_id: Option<CommentId>,
    pub content: String,
    pub date: Time,
}

impl NewComment {
    pub fn now(parent_id: Option<CommentId>, content: String) -> NewComment {
        NewComment {
            id: CommentId(Uuid::new_v4()),
            parent_id,
            content,
            date: crate::now(),
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        crate::validate_bounded("content", &self.content, crate::MAX_COMMENT_LEN)?;
        crate::validate_time(&self.date)
    }
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct CommentEdit {
    pub content: String,
}

impl CommentEdit {
    pub fn validate(&self) -> Result<(), Error> {
        crate::validate_bounded("content", &self.content, crate::MAX_COMMENT_LEN)
    }
}
