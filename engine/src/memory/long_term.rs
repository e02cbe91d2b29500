//! Process-wide persisted preference and history store
//!
//! The store is a JSON document with exactly three top-level fields:
//! `preferences`, `migrationPreferences` and `analyzedRepos`. The schema
//! version is carried by the file name (`long_term_memory.v1.json`).
//!
//! Every mutation runs inside one critical section: lock, modify, write a
//! temporary file, fsync, rename over the store. Concurrent updates to
//! different keys are therefore both retained.

use chrono::{DateTime, Utc};
use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Target framework assumed when no migration preference is stored
pub const DEFAULT_MIGRATION_TARGET: &str = "fastapi";

/// Oldest entries are dropped beyond this many analyzed repositories
const MAX_ANALYZED_REPOS: usize = 50;

/// Repositories listed in the reasoning-service context
const CONTEXT_REPOS: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyzedRepo {
    pub path: String,
    pub summary: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LongTermProfile {
    #[serde(default)]
    pub preferences: BTreeMap<String, String>,
    #[serde(default)]
    pub migration_preferences: BTreeMap<String, String>,
    #[serde(default)]
    pub analyzed_repos: Vec<AnalyzedRepo>,
}

impl LongTermProfile {
    pub fn is_empty(&self) -> bool {
        self.preferences.is_empty()
            && self.migration_preferences.is_empty()
            && self.analyzed_repos.is_empty()
    }
}

/// Shared long-term memory backed by a JSON file
#[derive(Debug)]
pub struct LongTermMemory {
    path: PathBuf,
    state: Mutex<LongTermProfile>,
}

impl LongTermMemory {
    /// Load the store at `path`.
    ///
    /// A missing file yields an empty profile. An unreadable or malformed file
    /// is logged and also yields an empty profile; the next mutation replaces it.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let profile = match fs::read_to_string(&path) {
            Ok(contents) if contents.trim().is_empty() => LongTermProfile::default(),
            Ok(contents) => match serde_json::from_str::<LongTermProfile>(&contents) {
                Ok(profile) => {
                    tracing::debug!(
                        "Loaded long-term memory from {:?} ({} preference(s), {} repo(s))",
                        path,
                        profile.preferences.len(),
                        profile.analyzed_repos.len()
                    );
                    profile
                }
                Err(e) => {
                    tracing::warn!(
                        "Long-term memory at {:?} is corrupt, starting empty: {}",
                        path,
                        e
                    );
                    LongTermProfile::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No long-term memory at {:?}, starting empty", path);
                LongTermProfile::default()
            }
            Err(e) => {
                tracing::warn!(
                    "Long-term memory at {:?} is unreadable, starting empty: {}",
                    path,
                    e
                );
                LongTermProfile::default()
            }
        };

        Self {
            path,
            state: Mutex::new(profile),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Copy of the current profile
    pub fn snapshot(&self) -> LongTermProfile {
        self.lock().clone()
    }

    pub fn update_preference(
        &self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), EngineError> {
        let (key, value) = (key.into(), value.into());
        self.mutate(|profile| {
            profile.preferences.insert(key, value);
        })
    }

    pub fn get_preference(&self, key: &str) -> Option<String> {
        self.lock().preferences.get(key).cloned()
    }

    /// Preferred migration target for `source`, or `"fastapi"`.
    ///
    /// Framework names are matched case-insensitively.
    pub fn get_migration_preference(&self, source: &str) -> String {
        self.lock()
            .migration_preferences
            .get(&source.trim().to_lowercase())
            .cloned()
            .unwrap_or_else(|| DEFAULT_MIGRATION_TARGET.to_string())
    }

    pub fn set_migration_preference(&self, source: &str, target: &str) -> Result<(), EngineError> {
        let source = source.trim().to_lowercase();
        let target = target.trim().to_string();
        self.mutate(|profile| {
            profile.migration_preferences.insert(source, target);
        })
    }

    /// Record an analyzed repository. Re-analyzing moves it to the end.
    pub fn add_analyzed_repo(
        &self,
        path: impl Into<String>,
        summary: impl Into<String>,
    ) -> Result<(), EngineError> {
        let entry = AnalyzedRepo {
            path: path.into(),
            summary: summary.into(),
            timestamp: Utc::now(),
        };
        self.mutate(|profile| {
            profile.analyzed_repos.retain(|r| r.path != entry.path);
            profile.analyzed_repos.push(entry);
            let overflow = profile.analyzed_repos.len().saturating_sub(MAX_ANALYZED_REPOS);
            profile.analyzed_repos.drain(..overflow);
        })
    }

    /// Format the profile for reasoning-service context.
    pub fn preferences_string(&self) -> String {
        let profile = self.lock();
        if profile.is_empty() {
            return "No known user preferences or repository history.".to_string();
        }

        let mut sections = Vec::new();

        if !profile.preferences.is_empty() {
            let lines: Vec<String> = profile
                .preferences
                .iter()
                .map(|(k, v)| format!("- {}: {}", k, v))
                .collect();
            sections.push(format!("KNOWN USER PREFERENCES:\n{}", lines.join("\n")));
        }

        if !profile.analyzed_repos.is_empty() {
            let lines: Vec<String> = profile
                .analyzed_repos
                .iter()
                .rev()
                .take(CONTEXT_REPOS)
                .map(|r| format!("- {}: {}", r.path, r.summary))
                .collect();
            sections.push(format!(
                "PREVIOUSLY ANALYZED REPOSITORIES:\n{}",
                lines.join("\n")
            ));
        }

        if !profile.migration_preferences.is_empty() {
            let lines: Vec<String> = profile
                .migration_preferences
                .iter()
                .map(|(k, v)| format!("- {} → {}", k, v))
                .collect();
            sections.push(format!("MIGRATION PREFERENCES:\n{}", lines.join("\n")));
        }

        sections.join("\n\n")
    }

    /// Wipe every field and persist the empty document.
    pub fn clear(&self) -> Result<(), EngineError> {
        self.mutate(|profile| *profile = LongTermProfile::default())
    }

    fn lock(&self) -> MutexGuard<'_, LongTermProfile> {
        // A panic mid-mutation leaves a complete profile behind, so keep using it
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply `f` and flush, all under the lock.
    ///
    /// The in-memory change is kept even when the write fails.
    fn mutate<F>(&self, f: F) -> Result<(), EngineError>
    where
        F: FnOnce(&mut LongTermProfile),
    {
        let mut profile = self.lock();
        f(&mut profile);
        persist(&self.path, &profile).map_err(|e| {
            tracing::warn!("Failed to persist long-term memory to {:?}: {}", self.path, e);
            e
        })
    }
}

/// Write the document atomically: temp file in the same directory, fsync, rename.
fn persist(path: &Path, profile: &LongTermProfile) -> Result<(), EngineError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)
                .map_err(|e| EngineError::Persistence(format!("create {:?}: {}", parent, e)))?;
        }
    }

    let json = serde_json::to_string_pretty(profile)
        .map_err(|e| EngineError::Persistence(format!("serialize: {}", e)))?;

    let file_name = path
        .file_name()
        .ok_or_else(|| EngineError::Persistence(format!("{:?} has no file name", path)))?;
    let mut tmp_name = file_name.to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    let write = || -> std::io::Result<()> {
        let mut tmp = File::create(&tmp_path)?;
        tmp.write_all(json.as_bytes())?;
        tmp.sync_all()?;
        drop(tmp);
        fs::rename(&tmp_path, path)
    };

    write().map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        EngineError::Persistence(format!("write {:?}: {}", path, e))
    })
}
