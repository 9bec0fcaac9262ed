//! User settings store port.

use async_trait::async_trait;

use super::job_store::StoreError;
use crate::domain::{UserSettings, UserSettingsPatch};

/// Persistent per-user preferences.
///
/// The pipeline only reads settings (they are snapshotted into the
/// job at submit time); writes come from the chat-handler surface.
#[cfg_attr(any(test, feature = "test-utils"), mockall::automock)]
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Fetch a user's settings with branding defaults resolved.
    async fn get_settings(&self, user_id: i64) -> Result<UserSettings, StoreError>;

    /// Apply a per-key upsert to a user's settings.
    async fn update_settings(
        &self,
        user_id: i64,
        patch: &UserSettingsPatch,
    ) -> Result<(), StoreError>;
}
