use std::collections::{HashMap, HashSet};

use anyhow::Context;

use crate::{Comment, CommentId, Db};

/// One comment of a thread, along with how deeply it is nested.
///
/// A thread lists every comment right before its replies, with siblings
/// newest first at every level. Rendering it in order with `depth` as the
/// indentation gives the nested view. It is kept flat so that no operation
/// on it, including dropping and serializing, recurses once per nesting level.
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct ThreadEntry {
    /// 0 for comments answering the post directly
    pub depth: usize,
    pub comment: Comment,
}

/// Loads every comment reachable from `roots`, one level at a time, until a
/// level has no more children.
pub async fn load_subtree<D: Db>(
    db: &mut D,
    roots: &[CommentId],
) -> anyhow::Result<HashMap<CommentId, Comment>> {
    let mut comments = HashMap::new();
    let mut requested = roots.iter().copied().collect::<HashSet<_>>();
    let mut level = requested.iter().copied().collect::<Vec<_>>();
    let mut depth = 0usize;
    while !level.is_empty() {
        let fetched = db
            .fetch_comments(&level)
            .await
            .with_context(|| format!("fetching {} comments at depth {depth}", level.len()))?;
        level = Vec::new();
        for c in fetched {
            level.extend(
                c.children
                    .iter()
                    .copied()
                    .filter(|child| requested.insert(*child)),
            );
            comments.insert(c.id, c);
        }
        depth += 1;
    }
    Ok(comments)
}

/// Keeps the `ids` present in `comments` and not yet attached anywhere, newest
/// first, ties broken by id
fn adopt(
    parent: Option<CommentId>,
    ids: &[CommentId],
    comments: &HashMap<CommentId, Comment>,
    seen: &mut HashSet<CommentId>,
) -> Vec<CommentId> {
    let mut res = Vec::with_capacity(ids.len());
    for id in ids {
        match comments.contains_key(id) && seen.insert(*id) {
            true => res.push(*id),
            false => {
                tracing::warn!(?parent, comment = ?id, "skipping dangling or already attached comment")
            }
        }
    }
    res.sort_by(|a, b| {
        comments[b]
            .date
            .cmp(&comments[a].date)
            .then_with(|| a.cmp(b))
    });
    res
}

/// Depth-first walk of the trees rooted at `roots`, in display order.
///
/// Children missing from `comments` are skipped. A comment listed as child of
/// several comments is only attached to the first one reached, which also
/// breaks any cycle.
fn walk(roots: &[CommentId], comments: &HashMap<CommentId, Comment>) -> Vec<(usize, CommentId)> {
    let mut seen = HashSet::new();
    let mut res = Vec::new();
    let mut stack = adopt(None, roots, comments, &mut seen)
        .into_iter()
        .rev()
        .map(|id| (0, id))
        .collect::<Vec<_>>();
    while let Some((depth, id)) = stack.pop() {
        res.push((depth, id));
        let replies = adopt(Some(id), &comments[&id].children, comments, &mut seen);
        stack.extend(replies.into_iter().rev().map(|c| (depth + 1, c)));
    }
    res
}

/// Lays out the comment trees rooted at `roots` as a thread
pub fn build_thread(
    roots: &[CommentId],
    comments: &HashMap<CommentId, Comment>,
) -> Vec<ThreadEntry> {
    walk(roots, comments)
        .into_iter()
        .map(|(depth, id)| ThreadEntry {
            depth,
            comment: comments[&id].clone(),
        })
        .collect()
}

/// Ids of the comments reachable from `roots`, every comment coming after all
/// of its descendants
pub fn deletion_order(
    roots: &[CommentId],
    comments: &HashMap<CommentId, Comment>,
) -> Vec<CommentId> {
    // display order has every comment before its replies
    walk(roots, comments)
        .into_iter()
        .rev()
        .map(|(_, id)| id)
        .collect()
}

/// Fetches the full comment trees rooted at `roots`, at any depth, as a thread
pub async fn assemble_thread<D: Db>(
    db: &mut D,
    roots: &[CommentId],
) -> anyhow::Result<Vec<ThreadEntry>> {
    let comments = load_subtree(db, roots)
        .await
        .context("loading comment subtree")?;
    Ok(build_thread(roots, &comments))
}
