use crate::{Comment, Time};

/// Activity summary of a post: how many comments it has at any depth, and
/// when the latest of them (or the post itself) was created.
///
/// This is what every "active" ordering sorts on, so it is only ever computed
/// here.
#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct ActivityStats {
    pub count: usize,
    pub latest: Time,
}

impl ActivityStats {
    /// `comments` are all the comments of the post, in any order, each
    /// appearing once
    pub fn of_comments<'a, I>(post_date: Time, comments: I) -> ActivityStats
    where
        I: IntoIterator<Item = &'a Comment>,
    {
        let mut res = ActivityStats {
            count: 0,
            latest: post_date,
        };
        for c in comments {
            res.count += 1;
            if c.date > res.latest {
                res.latest = c.date;
            }
        }
        res
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::{
        build_thread, load_subtree,
        tree::tests::{base_time, id, MemDb},
    };

    #[test]
    fn no_comments() {
        let post_date = base_time();
        assert_eq!(
            ActivityStats::of_comments(post_date, std::iter::empty()),
            ActivityStats {
                count: 0,
                latest: post_date
            }
        );
    }

    #[test]
    fn comment_then_reply() {
        let mut db = MemDb::new();
        db.add(1, None, 10);
        db.add(2, Some(1), 20);
        let comments = futures::executor::block_on(load_subtree(&mut db, &[id(1)])).unwrap();
        assert_eq!(
            ActivityStats::of_comments(base_time(), comments.values()),
            ActivityStats {
                count: 2,
                latest: base_time() + Duration::minutes(20),
            }
        );
    }

    #[test]
    fn latest_found_at_any_depth() {
        let mut db = MemDb::new();
        db.add(1, None, 50);
        db.add(2, None, 1);
        db.add(3, Some(2), 2);
        db.add(4, Some(3), 90);
        db.add(5, Some(4), 3);
        let stats = ActivityStats::of_comments(base_time(), db.comments.values());
        assert_eq!(stats.count, 5);
        assert_eq!(stats.latest, base_time() + Duration::minutes(90));

        // the displayed thread holds the same comments
        let thread = build_thread(&[id(1), id(2)], &db.comments);
        assert_eq!(
            ActivityStats::of_comments(base_time(), thread.iter().map(|e| &e.comment)),
            stats
        );
    }

    #[test]
    fn post_newer_than_comments() {
        let mut db = MemDb::new();
        db.add(1, None, 5);
        let post_date = base_time() + Duration::hours(1);
        assert_eq!(
            ActivityStats::of_comments(post_date, db.comments.values()).latest,
            post_date
        );
    }
}
