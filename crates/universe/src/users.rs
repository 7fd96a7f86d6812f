//! Where user profiles come from.

use crate::error::Result;
use crate::ids::UserId;
use crate::session::UserProfile;
use async_trait::async_trait;
use dashmap::DashMap;

/// Source of the profile shown for a connecting user.
#[async_trait]
pub trait UserProfileSource: Send + Sync {
    async fn load_profile(&self, user_id: &UserId) -> Result<UserProfile>;
}

/// Profiles registered in memory; unknown users get a guest profile.
#[derive(Debug, Default)]
pub struct StaticProfiles {
    profiles: DashMap<UserId, UserProfile>,
}

impl StaticProfiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, user_id: UserId, profile: UserProfile) {
        self.profiles.insert(user_id, profile);
    }
}

#[async_trait]
impl UserProfileSource for StaticProfiles {
    async fn load_profile(&self, user_id: &UserId) -> Result<UserProfile> {
        Ok(self
            .profiles
            .get(user_id)
            .map(|p| p.value().clone())
            .unwrap_or_else(UserProfile::guest))
    }
}
