//! SQLite implementation of the `UserStore` trait.

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use revenc_core::config::BrandingDefaults;
use revenc_core::domain::{UserSettings, UserSettingsPatch};
use revenc_core::ports::{StoreError, UserStore};

/// SQLite implementation of the `UserStore` trait.
///
/// Settings are stored as a JSON blob per user; branding defaults
/// are resolved at read time so unset fields always have values.
pub struct SqliteUserStore {
    pool: SqlitePool,
    branding: BrandingDefaults,
}

impl SqliteUserStore {
    /// Create a new SQLite user store with the configured defaults.
    pub const fn new(pool: SqlitePool, branding: BrandingDefaults) -> Self {
        Self { pool, branding }
    }

    async fn load_raw(&self, user_id: i64) -> Result<Option<UserSettings>, StoreError> {
        let row = sqlx::query("SELECT settings FROM users WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(e.to_string()))?;

        match row {
            Some(r) => {
                let json: String = r.get("settings");
                serde_json::from_str(&json)
                    .map(Some)
                    .map_err(|e| StoreError::Storage(format!("corrupt settings: {e}")))
            }
            None => Ok(None),
        }
    }
}

#[async_trait]
impl UserStore for SqliteUserStore {
    async fn get_settings(&self, user_id: i64) -> Result<UserSettings, StoreError> {
        let settings = self.load_raw(user_id).await?.unwrap_or_default();
        Ok(settings.with_defaults(&self.branding.brand_name, &self.branding.website))
    }

    async fn update_settings(
        &self,
        user_id: i64,
        patch: &UserSettingsPatch,
    ) -> Result<(), StoreError> {
        let mut settings = self.load_raw(user_id).await?.unwrap_or_default();
        patch.apply(&mut settings);

        let json =
            serde_json::to_string(&settings).map_err(|e| StoreError::Storage(e.to_string()))?;
        let updated_at = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S").to_string();

        sqlx::query("INSERT OR REPLACE INTO users (user_id, settings, updated_at) VALUES (?, ?, ?)")
            .bind(user_id)
            .bind(&json)
            .bind(&updated_at)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(e.to_string()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::setup::create_schema;
    use revenc_core::domain::AttachmentRef;

    async fn test_store() -> SqliteUserStore {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        create_schema(&pool).await.unwrap();
        SqliteUserStore::new(
            pool,
            BrandingDefaults {
                brand_name: "DefaultBrand".to_string(),
                website: "t.me/default".to_string(),
            },
        )
    }

    #[tokio::test]
    async fn unknown_user_gets_branding_defaults() {
        let store = test_store().await;
        let settings = store.get_settings(42).await.unwrap();
        assert_eq!(settings.brand_name, "DefaultBrand");
        assert_eq!(settings.website, "t.me/default");
        assert_eq!(settings.custom_thumbnail_ref, None);
    }

    #[tokio::test]
    async fn per_key_upsert_preserves_other_keys() {
        let store = test_store().await;

        store
            .update_settings(
                42,
                &UserSettingsPatch {
                    brand_name: Some("Mine".to_string()),
                    ..UserSettingsPatch::default()
                },
            )
            .await
            .unwrap();
        store
            .update_settings(
                42,
                &UserSettingsPatch {
                    custom_thumbnail_ref: Some(Some(AttachmentRef::new("thumb-9"))),
                    ..UserSettingsPatch::default()
                },
            )
            .await
            .unwrap();

        let settings = store.get_settings(42).await.unwrap();
        assert_eq!(settings.brand_name, "Mine");
        // Unset field still resolved from defaults
        assert_eq!(settings.website, "t.me/default");
        assert_eq!(
            settings.custom_thumbnail_ref,
            Some(AttachmentRef::new("thumb-9"))
        );
    }
}
