use uuid::Uuid;

use crate::{UserId, STUB_UUID};

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct AuthToken(pub Uuid);

impl AuthToken {
    pub fn stub() -> AuthToken {
        AuthToken(STUB_UUID)
    }
}

/// Request to open a session on behalf of an existing user
#[derive(Clone, Debug, serde::Deserialize, serde::Serialize)]
pub struct NewSession {
    pub user: UserId,
}
