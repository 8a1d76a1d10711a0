use anyhow::{bail, Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::PathBuf,
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
};

pub const DEFAULT_WEIGHT_KG: f64 = 80.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub name: String,
    pub weight_kg: f64,
    /// Cleared once the user has filled in the profile.
    pub first_run: bool,
}

impl Default for UserProfile {
    fn default() -> Self {
        Self {
            name: String::new(),
            weight_kg: DEFAULT_WEIGHT_KG,
            first_run: true,
        }
    }
}

impl UserProfile {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            bail!("name must not be empty");
        }
        if !self.weight_kg.is_finite() || self.weight_kg <= 0.0 {
            bail!("weight must be a positive number of kilograms");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserSettings {
    #[serde(default)]
    profile: UserProfile,
}

/// User settings kept in a JSON file next to the run database.
pub struct SettingsStore {
    path: Option<PathBuf>,
    data: RwLock<UserSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                warn!(
                    "Ignoring unreadable settings at {}: {err}",
                    path.display()
                );
                UserSettings::default()
            })
        } else {
            UserSettings::default()
        };

        Ok(Self {
            path: Some(path),
            data: RwLock::new(data),
        })
    }

    /// Settings that are never written to disk.
    pub fn in_memory(profile: UserProfile) -> Self {
        Self {
            path: None,
            data: RwLock::new(UserSettings { profile }),
        }
    }

    pub fn profile(&self) -> UserProfile {
        self.read().profile.clone()
    }

    pub fn weight_kg(&self) -> f64 {
        self.read().profile.weight_kg
    }

    /// Validates and stores a new name and weight, clearing the first-run flag.
    pub fn update_profile(&self, name: &str, weight_kg: f64) -> Result<UserProfile> {
        let profile = UserProfile {
            name: name.trim().to_string(),
            weight_kg,
            first_run: false,
        };
        profile.validate()?;

        let mut guard = self.write();
        let previous = std::mem::replace(&mut guard.profile, profile.clone());
        if let Err(err) = self.persist(&guard) {
            guard.profile = previous;
            return Err(err);
        }
        Ok(profile)
    }

    fn persist(&self, data: &UserSettings) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(path, serialized)
            .with_context(|| format!("Failed to write settings to {}", path.display()))
    }

    fn read(&self) -> RwLockReadGuard<'_, UserSettings> {
        self.data.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, UserSettings> {
        self.data.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
