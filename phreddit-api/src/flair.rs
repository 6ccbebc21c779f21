use uuid::Uuid;

use crate::Error;

#[derive(
    Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Deserialize, serde::Serialize,
)]
pub struct FlairId(pub Uuid);

/// Short label attached to posts
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Flair {
    pub id: FlairId,
    pub content: String,
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct NewFlair {
    pub id: FlairId,
    pub content: String,
}

impl NewFlair {
    pub fn new(content: String) -> NewFlair {
        NewFlair {
            id: FlairId(Uuid::new_v4()),
            content,
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        crate::validate_bounded("flair", &self.content, crate::MAX_FLAIR_LEN)
    }
}
