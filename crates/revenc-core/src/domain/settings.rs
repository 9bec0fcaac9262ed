//! Per-user settings and the patch type used to update them.

use serde::{Deserialize, Serialize};

use super::media::AttachmentRef;

/// A user's persisted preferences.
///
/// Stored per user and snapshotted into [`super::JobData`] at submit
/// time so a settings change never affects an in-flight job.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserSettings {
    /// Brand tag appended to standardized filenames.
    pub brand_name: String,
    /// Website or channel link shown in captions.
    pub website: String,
    /// Custom thumbnail to attach to uploads, if set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_thumbnail_ref: Option<AttachmentRef>,
}

impl UserSettings {
    /// Fill empty fields from the configured branding defaults.
    #[must_use]
    pub fn with_defaults(mut self, brand_name: &str, website: &str) -> Self {
        if self.brand_name.is_empty() {
            self.brand_name = brand_name.to_string();
        }
        if self.website.is_empty() {
            self.website = website.to_string();
        }
        self
    }
}

/// Partial update applied to a user's settings (per-key upsert).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UserSettingsPatch {
    /// New brand name, if changing.
    pub brand_name: Option<String>,
    /// New website, if changing.
    pub website: Option<String>,
    /// New custom thumbnail; `Some(None)` clears it.
    pub custom_thumbnail_ref: Option<Option<AttachmentRef>>,
}

impl UserSettingsPatch {
    /// Apply this patch to existing settings.
    pub fn apply(&self, settings: &mut UserSettings) {
        if let Some(ref brand) = self.brand_name {
            settings.brand_name.clone_from(brand);
        }
        if let Some(ref website) = self.website {
            settings.website.clone_from(website);
        }
        if let Some(ref thumb) = self.custom_thumbnail_ref {
            settings.custom_thumbnail_ref.clone_from(thumb);
        }
    }
}
