//! User profile persistence and the daily image quota.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use parking_lot::Mutex;
use tracing::warn;

use shared::settings::UserProfile;

const PROFILE_FILE: &str = "profile.json";

/// Free users get a handful of generated images per day; subscribers
/// get a much higher ceiling.
pub const FREE_DAILY_IMAGE_LIMIT: u32 = 5;
pub const SUBSCRIBED_DAILY_IMAGE_LIMIT: u32 = 100;

pub struct ProfileStore {
    path: PathBuf,
    inner: Mutex<UserProfile>,
}

impl ProfileStore {
    pub fn open(base_dir: impl AsRef<Path>) -> Result<Self> {
        let base = base_dir.as_ref();
        fs::create_dir_all(base)
            .with_context(|| format!("creating profile dir {}", base.display()))?;
        let path = base.join(PROFILE_FILE);

        let profile = if path.is_file() {
            let raw = fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("parsing {}", path.display()))?
        } else {
            UserProfile::default()
        };

        Ok(Self {
            path,
            inner: Mutex::new(profile),
        })
    }

    pub fn get(&self) -> UserProfile {
        self.inner.lock().clone()
    }

    pub fn set(&self, profile: UserProfile) {
        *self.inner.lock() = profile;
        self.persist();
    }

    /// Mutate the profile in place and persist the result.
    pub fn update(&self, f: impl FnOnce(&mut UserProfile)) {
        {
            let mut profile = self.inner.lock();
            f(&mut profile);
        }
        self.persist();
    }

    fn persist(&self) {
        let profile = self.inner.lock().clone();
        match serde_json::to_string_pretty(&profile) {
            Ok(json) => {
                if let Err(e) = fs::write(&self.path, json) {
                    warn!(path = %self.path.display(), error = %e, "failed to persist profile");
                }
            }
            Err(e) => warn!(error = %e, "failed to serialize profile"),
        }
    }
}

/// Gate consulted before any image-bearing send. Checking and counting
/// are separate so a failed generation never burns quota.
pub trait ImageQuotaGate: Send + Sync {
    /// True when the user may generate at least one more image today.
    fn check_limit(&self) -> bool;
    /// Count one generated image against today's budget.
    fn increment_usage(&self);
}

/// Per-day image counter backed by the persisted profile. The counter
/// resets lazily when the stored date no longer matches today.
pub struct DailyImageQuota {
    profiles: Arc<ProfileStore>,
}

impl DailyImageQuota {
    pub fn new(profiles: Arc<ProfileStore>) -> Self {
        Self { profiles }
    }

    fn today() -> String {
        Utc::now().format("%Y-%m-%d").to_string()
    }

    fn limit_for(profile: &UserProfile) -> u32 {
        if profile.is_subscribed {
            SUBSCRIBED_DAILY_IMAGE_LIMIT
        } else {
            FREE_DAILY_IMAGE_LIMIT
        }
    }
}

impl ImageQuotaGate for DailyImageQuota {
    fn check_limit(&self) -> bool {
        let today = Self::today();
        let mut allowed = true;
        self.profiles.update(|p| {
            if p.last_image_date.as_deref() != Some(today.as_str()) {
                p.images_generated_today = 0;
                p.last_image_date = Some(today.clone());
            }
            allowed = p.images_generated_today < Self::limit_for(p);
        });
        allowed
    }

    fn increment_usage(&self) {
        let today = Self::today();
        self.profiles.update(|p| {
            if p.last_image_date.as_deref() != Some(today.as_str()) {
                p.images_generated_today = 0;
                p.last_image_date = Some(today.clone());
            }
            p.images_generated_today += 1;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, Arc<ProfileStore>) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ProfileStore::open(dir.path()).unwrap());
        (dir, store)
    }

    #[test]
    fn profile_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = ProfileStore::open(dir.path()).unwrap();
            store.update(|p| {
                p.name = "Sari".into();
                p.is_subscribed = true;
            });
        }
        let store = ProfileStore::open(dir.path()).unwrap();
        let profile = store.get();
        assert_eq!(profile.name, "Sari");
        assert!(profile.is_subscribed);
    }

    #[test]
    fn free_quota_stops_at_five() {
        let (_dir, profiles) = store();
        let quota = DailyImageQuota::new(profiles.clone());
        for _ in 0..FREE_DAILY_IMAGE_LIMIT {
            assert!(quota.check_limit());
            quota.increment_usage();
        }
        assert!(!quota.check_limit());
        assert_eq!(
            profiles.get().images_generated_today,
            FREE_DAILY_IMAGE_LIMIT
        );
    }

    #[test]
    fn subscribers_pass_the_free_ceiling() {
        let (_dir, profiles) = store();
        profiles.update(|p| p.is_subscribed = true);
        let quota = DailyImageQuota::new(profiles.clone());
        for _ in 0..FREE_DAILY_IMAGE_LIMIT {
            quota.increment_usage();
        }
        assert!(quota.check_limit());
    }

    #[test]
    fn counter_resets_on_a_new_day() {
        let (_dir, profiles) = store();
        profiles.update(|p| {
            p.images_generated_today = FREE_DAILY_IMAGE_LIMIT;
            p.last_image_date = Some("2001-01-01".into());
        });
        let quota = DailyImageQuota::new(profiles.clone());
        // Stale date rolls the counter before the limit check.
        assert!(quota.check_limit());
        assert_eq!(profiles.get().images_generated_today, 0);
    }
}
