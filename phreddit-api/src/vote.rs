use std::collections::BTreeSet;

use crate::{CommentId, PostId, UserId};

#[derive(
    Clone,
    Copy,
    Debug,
    Eq,
    Hash,
    PartialEq,
    bolero::generator::TypeGenerator,
    serde::Deserialize,
    serde::Serialize,
)]
pub enum VoteDirection {
    Up,
    Down,
}

/// Where a given voter currently stands on a given item
#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub enum VoteState {
    None,
    Up,
    Down,
}

impl VoteState {
    /// Returns the state reached by voting `dir`, along with the delta to apply
    /// to the item's vote counter.
    ///
    /// Voting the same direction twice cancels the vote, voting the other
    /// direction switches it, which counts double.
    pub fn transition(self, dir: VoteDirection) -> (VoteState, i64) {
        match (self, dir) {
            (VoteState::None, VoteDirection::Up) => (VoteState::Up, 1),
            (VoteState::None, VoteDirection::Down) => (VoteState::Down, -1),
            (VoteState::Up, VoteDirection::Up) => (VoteState::None, -1),
            (VoteState::Up, VoteDirection::Down) => (VoteState::Down, -2),
            (VoteState::Down, VoteDirection::Down) => (VoteState::None, 1),
            (VoteState::Down, VoteDirection::Up) => (VoteState::Up, 2),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, serde::Deserialize, serde::Serialize)]
pub enum VoteTarget {
    Post(PostId),
    Comment(CommentId),
}

/// Vote counter and voter sets of a post or comment
#[derive(Clone, Debug, Default, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Votes {
    /// Can go negative
    pub count: i64,
    pub upvoters: BTreeSet<UserId>,
    pub downvoters: BTreeSet<UserId>,
}

impl Votes {
    pub fn new() -> Votes {
        Votes::default()
    }

    pub fn state_of(&self, voter: &UserId) -> VoteState {
        if self.upvoters.contains(voter) {
            VoteState::Up
        } else if self.downvoters.contains(voter) {
            VoteState::Down
        } else {
            VoteState::None
        }
    }

    /// Applies a vote from `voter`, returning the voter's new state
    pub fn apply(&mut self, voter: UserId, dir: VoteDirection) -> VoteState {
        let (state, delta) = self.state_of(&voter).transition(dir);
        self.upvoters.remove(&voter);
        self.downvoters.remove(&voter);
        match state {
            VoteState::None => (),
            VoteState::Up => {
                self.upvoters.insert(voter);
            }
            VoteState::Down => {
                self.downvoters.insert(voter);
            }
        }
        self.count += delta;
        state
    }

    /// Forgets everything `voter` did, as when their account is deleted
    pub fn forget(&mut self, voter: &UserId) {
        if self.upvoters.remove(voter) {
            self.count -= 1;
        }
        if self.downvoters.remove(voter) {
            self.count += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;

    fn voter(i: u8) -> UserId {
        UserId(Uuid::from_u128(u128::from(i)))
    }

    #[test]
    fn transition_table() {
        use VoteDirection as D;
        use VoteState as S;
        assert_eq!(S::None.transition(D::Up), (S::Up, 1));
        assert_eq!(S::None.transition(D::Down), (S::Down, -1));
        assert_eq!(S::Up.transition(D::Up), (S::None, -1));
        assert_eq!(S::Up.transition(D::Down), (S::Down, -2));
        assert_eq!(S::Down.transition(D::Down), (S::None, 1));
        assert_eq!(S::Down.transition(D::Up), (S::Up, 2));
    }

    #[test]
    fn double_upvote_cancels() {
        let mut v = Votes::new();
        assert_eq!(v.apply(voter(0), VoteDirection::Up), VoteState::Up);
        assert_eq!(v.count, 1);
        assert_eq!(v.apply(voter(0), VoteDirection::Up), VoteState::None);
        assert_eq!(v.count, 0);
        assert!(v.upvoters.is_empty() && v.downvoters.is_empty());
    }

    #[test]
    fn upvote_switch_then_cancel() {
        let mut v = Votes::new();
        v.apply(voter(0), VoteDirection::Up);
        assert_eq!(v.count, 1);
        v.apply(voter(0), VoteDirection::Down);
        assert_eq!(v.count, -1);
        assert!(v.downvoters.contains(&voter(0)));
        assert!(!v.upvoters.contains(&voter(0)));
        v.apply(voter(0), VoteDirection::Down);
        assert_eq!(v.count, 0);
        assert_eq!(v.state_of(&voter(0)), VoteState::None);
    }

    #[test]
    fn forget_voter() {
        let mut v = Votes::new();
        v.apply(voter(0), VoteDirection::Up);
        v.apply(voter(1), VoteDirection::Down);
        v.apply(voter(2), VoteDirection::Down);
        assert_eq!(v.count, -1);
        v.forget(&voter(1));
        assert_eq!(v.count, 0);
        v.forget(&voter(0));
        assert_eq!(v.count, -1);
        v.forget(&voter(3));
        assert_eq!(v.count, -1);
    }

    #[test]
    fn count_always_matches_voter_sets() {
        bolero::check!()
            .with_type::<Vec<(u8, VoteDirection)>>()
            .cloned()
            .for_each(|ops| {
                let mut v = Votes::new();
                for (who, dir) in ops {
                    let who = voter(who % 8);
                    let before = v.count;
                    let state = v.apply(who, dir);
                    assert_eq!(v.state_of(&who), state);
                    assert!((v.count - before).abs() <= 2);
                    assert!(v.upvoters.is_disjoint(&v.downvoters));
                    assert_eq!(
                        v.count,
                        v.upvoters.len() as i64 - v.downvoters.len() as i64
                    );
                }
            });
    }
}
