use bolero::generator::{bolero_generator::Driver, gen_with, TypeGenerator, ValueGenerator};

use crate::Error;

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
pub struct UserId(pub i64);

impl UserId {
    pub fn stub() -> UserId {
        UserId(0)
    }
}

impl TypeGenerator for UserId {
    fn generate<D: Driver>(driver: &mut D) -> Option<UserId> {
        Some(UserId(<i64 as TypeGenerator>::generate(driver)?))
    }
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct User {
    pub id: UserId,
    pub name: String,

    /// Number of changeset comments this user may author in any trailing hour
    pub max_changeset_comments_per_hour: i64,

    /// Moderators may hide and restore comments
    pub moderator: bool,

    /// Users whose edits are not public cannot comment
    pub data_public: bool,
}

#[derive(Clone, Debug, serde::Deserialize, serde::Serialize)]
pub struct NewUser {
    pub id: UserId,
    pub name: String,
    pub max_changeset_comments_per_hour: i64,
    pub moderator: bool,
    pub data_public: bool,
}

impl NewUser {
    pub fn validate(&self) -> Result<(), Error> {
        crate::validate_string(&self.name)?;
        if self.name.is_empty() || self.name.chars().any(|c| c == ':' || c.is_control()) {
            return Err(Error::InvalidName(self.name.clone()));
        }
        if self.max_changeset_comments_per_hour < 0 {
            return Err(Error::BadUserInput(String::from(
                "Comment quota must not be negative",
            )));
        }
        Ok(())
    }

    pub fn into_user(self) -> User {
        User {
            id: self.id,
            name: self.name,
            max_changeset_comments_per_hour: self.max_changeset_comments_per_hour,
            moderator: self.moderator,
            data_public: self.data_public,
        }
    }
}

/// Generated users keep short names and small quotas, so that fuzzing actually reaches the rate limit
impl TypeGenerator for NewUser {
    fn generate<D: Driver>(driver: &mut D) -> Option<NewUser> {
        Some(NewUser {
            id: <UserId as TypeGenerator>::generate(driver)?,
            name: ValueGenerator::generate(&gen_with::<String>().len(1..32usize), driver)?,
            max_changeset_comments_per_hour: ValueGenerator::generate(&(0..20i64), driver)?,
            moderator: <bool as TypeGenerator>::generate(driver)?,
            data_public: <bool as TypeGenerator>::generate(driver)?,
        })
    }
}
