use std::fmt;

use bolero::generator::{bolero_generator::Driver, TypeGenerator};

use crate::{Comment, Time, UserId};

#[derive(
    Clone,
    Copy,
    Debug,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    serde::Deserialize,
    serde::Serialize,
)]
pub struct ChangesetId(pub i64);

impl TypeGenerator for ChangesetId {
    fn generate<D: Driver>(driver: &mut D) -> Option<ChangesetId> {
        Some(ChangesetId(<i64 as TypeGenerator>::generate(driver)?))
    }
}

impl fmt::Display for ChangesetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Changeset {
    pub id: ChangesetId,
    pub owner: UserId,
    pub created_at: Time,
    pub open: bool,

    /// Number of visible comments
    pub comments_count: usize,

    /// All comments, hidden ones included, in creation order
    pub comments: Vec<Comment>,
}

impl Changeset {
    pub fn new(
        id: ChangesetId,
        owner: UserId,
        created_at: Time,
        open: bool,
        mut comments: Vec<Comment>,
    ) -> Changeset {
        comments.sort_by_key(|c| c.id);
        Changeset {
            id,
            owner,
            created_at,
            open,
            comments_count: comments.iter().filter(|c| c.visible).count(),
            comments,
        }
    }
}

/// Seeding request for a changeset, the changeset lifecycle itself lives elsewhere
#[derive(Clone, Debug, serde::Deserialize, serde::Serialize)]
pub struct NewChangeset {
    pub id: ChangesetId,
    pub owner: UserId,
    pub open: bool,
}
