use std::collections::BTreeSet;

use uuid::Uuid;

use crate::{Error, PostId, Time, UserId, STUB_UUID};

#[derive(
    Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Deserialize, serde::Serialize,
)]
pub struct CommunityId(pub Uuid);

impl CommunityId {
    pub fn stub() -> CommunityId {
        CommunityId(STUB_UUID)
    }
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Community {
    pub id: CommunityId,
    pub name: String,
    pub description: String,
    pub date: Time,
    pub creator: UserId,

    /// Members are only referenced, leaving does not touch the user
    pub members: BTreeSet<UserId>,

    pub post_ids: Vec<PostId>,
}

impl Community {
    pub fn from_new(creator: UserId, c: NewCommunity) -> Community {
        let mut members = BTreeSet::new();
        members.insert(creator);
        Community {
            id: c.id,
            name: c.name,
            description: c.description,
            date: c.date,
            creator,
            members,
            post_ids: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct NewCommunity {
    pub id: CommunityId,
    pub name: String,
    pub description: String,
    pub date: Time,
}

impl NewCommunity {
    pub fn now(name: String, description: String) -> NewCommunity {
        NewCommunity {
            id: CommunityId(Uuid::new_v4()),
            name,
            description,
            date: crate::now(),
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        crate::validate_bounded("name", &self.name, crate::MAX_COMMUNITY_NAME_LEN)?;
        crate::validate_bounded(
            "description",
            &self.description,
            crate::MAX_DESCRIPTION_LEN,
        )?;
        crate::validate_time(&self.date)
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct CommunityEdit {
    pub name: Option<String>,
    pub description: Option<String>,
}

impl CommunityEdit {
    pub fn validate(&self) -> Result<(), Error> {
        if let Some(name) = &self.name {
            crate::validate_bounded("name", name, crate::MAX_COMMUNITY_NAME_LEN)?;
        }
        if let Some(description) = &self.description {
            crate::validate_bounded("description", description, crate::MAX_DESCRIPTION_LEN)?;
        }
        Ok(())
    }
}
