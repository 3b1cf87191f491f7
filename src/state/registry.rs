//! Presence registry: which connections are logged in, and under what name

use crate::error::{LoginError, MIN_NICKNAME_CHARS};
use crate::types::{ConnectionId, Participant, Roster};
use tokio::sync::RwLock;

/// Insertion-ordered mapping from connection to display name.
///
/// All mutations take the write lock for their whole read-check-write, so
/// `admit`, `evict` and `snapshot_names` are linearizable.
#[derive(Debug, Default)]
pub struct Registry {
    inner: RwLock<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    participants: Vec<Participant>,
    /// Bumped on every successful admit or evict
    version: u64,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate `requested` and admit `connection` under the trimmed name
    pub async fn admit(
        &self,
        connection: ConnectionId,
        requested: Option<&str>,
    ) -> Result<String, LoginError> {
        let nickname = validate_nickname(requested)?;

        let mut inner = self.inner.write().await;
        if inner.participants.iter().any(|p| p.nickname == nickname) {
            return Err(LoginError::NameTaken(nickname));
        }

        inner.participants.push(Participant {
            connection,
            nickname: nickname.clone(),
        });
        inner.version += 1;
        Ok(nickname)
    }

    /// Remove `connection`, returning its name if it was admitted
    pub async fn evict(&self, connection: ConnectionId) -> Option<String> {
        let mut inner = self.inner.write().await;
        let index = inner
            .participants
            .iter()
            .position(|p| p.connection == connection)?;
        inner.version += 1;
        Some(inner.participants.remove(index).nickname)
    }

    /// Current display names in join order
    pub async fn snapshot_names(&self) -> Vec<String> {
        self.roster().await.users
    }

    /// Current display names together with the version they were read at
    pub async fn roster(&self) -> Roster {
        let inner = self.inner.read().await;
        Roster {
            version: inner.version,
            users: inner
                .participants
                .iter()
                .map(|p| p.nickname.clone())
                .collect(),
        }
    }

    pub async fn nickname_of(&self, connection: ConnectionId) -> Option<String> {
        self.inner
            .read()
            .await
            .participants
            .iter()
            .find(|p| p.connection == connection)
            .map(|p| p.nickname.clone())
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.participants.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.participants.is_empty()
    }
}

/// Trim and length-check a requested nickname
pub fn validate_nickname(requested: Option<&str>) -> Result<String, LoginError> {
    let trimmed = requested.ok_or(LoginError::InvalidName)?.trim();
    if trimmed.chars().count() < MIN_NICKNAME_CHARS {
        return Err(LoginError::InvalidName);
    }
    Ok(trimmed.to_string())
}
