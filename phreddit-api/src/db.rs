use async_trait::async_trait;

use crate::{Comment, CommentId};

/// Read access to the comment store, as needed to walk comment trees
#[async_trait]
pub trait Db {
    /// Returns the comments with the given ids, in any order. Ids that do not
    /// match any comment are silently left out.
    async fn fetch_comments(&mut self, ids: &[CommentId]) -> anyhow::Result<Vec<Comment>>;
}
