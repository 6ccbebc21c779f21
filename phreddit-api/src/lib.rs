use chrono::{Datelike, SubsecRound, Utc};

pub use uuid::{uuid, Uuid};
pub type Time = chrono::DateTime<Utc>;

mod auth;
pub use auth::{AuthToken, NewSession};

mod comment;
pub use comment::{Comment, CommentEdit, CommentId, NewComment};

mod community;
pub use community::{Community, CommunityEdit, CommunityId, NewCommunity};

mod db;
pub use db::Db;

mod error;
pub use error::Error;

mod flair;
pub use flair::{Flair, FlairId, NewFlair};

mod post;
pub use post::{NewPost, Post, PostEdit, PostId};

mod stats;
pub use stats::ActivityStats;

mod tree;
pub use tree::{assemble_thread, build_thread, deletion_order, load_subtree, ThreadEntry};

mod user;
pub use user::{AdminNewUser, NewUser, User, UserId, UserProfile};

mod vote;
pub use vote::{VoteDirection, VoteState, VoteTarget, Votes};

pub const STUB_UUID: Uuid = uuid!("ffffffff-ffff-ffff-ffff-ffffffffffff");

pub const DEFAULT_REPUTATION: i64 = 100;
pub const ADMIN_REPUTATION: i64 = 1000;
pub const VOTE_REPUTATION_THRESHOLD: i64 = 50;

pub const MAX_NAME_LEN: usize = 50;
pub const MAX_EMAIL_LEN: usize = 100;
pub const MAX_COMMUNITY_NAME_LEN: usize = 100;
pub const MAX_DESCRIPTION_LEN: usize = 500;
pub const MAX_TITLE_LEN: usize = 100;
pub const MAX_COMMENT_LEN: usize = 500;
pub const MAX_FLAIR_LEN: usize = 30;

/// Current time, at the precision the database stores
pub fn now() -> Time {
    Utc::now().trunc_subsecs(6)
}

// PostgreSQL rejects null bytes in strings, so every string that can reach the
// database goes through here first.
pub fn validate_string(s: &str) -> Result<(), Error> {
    match s.contains('\0') {
        true => Err(Error::NullByteInString(String::from(s))),
        false => Ok(()),
    }
}

/// Validates a required, length-bounded user-provided field
pub fn validate_bounded(field: &str, s: &str, max_len: usize) -> Result<(), Error> {
    validate_string(s)?;
    if s.trim().is_empty() {
        return Err(Error::EmptyString(String::from(field)));
    }
    if s.chars().count() > max_len {
        return Err(Error::StringTooLong {
            field: String::from(field),
            max: max_len,
        });
    }
    Ok(())
}

/// Display names are shown inline everywhere, so control characters are refused
pub fn validate_name(s: &str) -> Result<(), Error> {
    validate_bounded("display name", s, MAX_NAME_LEN)?;
    if s.chars().any(|c| c.is_control()) {
        return Err(Error::InvalidName(String::from(s)));
    }
    Ok(())
}

// The dates must round-trip through a PostgreSQL `timestamptz`
pub fn validate_time(t: &Time) -> Result<(), Error> {
    if t.year() < 1970 || t.year() > 9999 || *t != t.trunc_subsecs(6) {
        return Err(Error::TimeOutOfRange(*t));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn bounded_strings() {
        assert_eq!(validate_bounded("title", "hello", 5), Ok(()));
        assert_eq!(
            validate_bounded("title", "hello!", 5),
            Err(Error::StringTooLong {
                field: String::from("title"),
                max: 5
            })
        );
        assert_eq!(
            validate_bounded("title", "   ", 5),
            Err(Error::EmptyString(String::from("title")))
        );
        assert_eq!(
            validate_bounded("title", "a\0b", 5),
            Err(Error::NullByteInString(String::from("a\0b")))
        );
        // length is counted in characters, not bytes
        assert_eq!(validate_bounded("title", "ééééé", 5), Ok(()));
    }

    #[test]
    fn names() {
        assert_eq!(validate_name("alice"), Ok(()));
        assert_eq!(
            validate_name("al\nice"),
            Err(Error::InvalidName(String::from("al\nice")))
        );
    }

    #[test]
    fn times() {
        assert_eq!(validate_time(&now()), Ok(()));
        let nanos = Utc.timestamp_opt(1_000_000, 123_456_789).unwrap();
        assert_eq!(validate_time(&nanos), Err(Error::TimeOutOfRange(nanos)));
        let old = Utc.with_ymd_and_hms(1969, 12, 31, 0, 0, 0).unwrap();
        assert_eq!(validate_time(&old), Err(Error::TimeOutOfRange(old)));
    }
}
