//! Service state persisted between invocations: the pool and the active
//! patch version. Batch numbers are not stored; re-attaching finds them.

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use draftstat_engine::{DocumentStore, IndicatorEngine, PatchSwitch, PoolUpdate};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

pub const STATE_FILE: &str = "service-state.json";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceState {
    #[serde(default)]
    pub pool: Option<PoolUpdate>,
    #[serde(default)]
    pub patch_version: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

impl ServiceState {
    pub fn path(data_dir: &Path) -> PathBuf {
        data_dir.join(STATE_FILE)
    }

    /// Missing file means a fresh service.
    pub fn load(data_dir: &Path) -> Result<Self> {
        let path = Self::path(data_dir);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(err) => {
                return Err(err).with_context(|| format!("failed to read {}", path.display()));
            }
        };
        serde_json::from_str(&content).with_context(|| format!("invalid state in {}", path.display()))
    }

    pub fn save(&mut self, data_dir: &Path) -> Result<()> {
        fs::create_dir_all(data_dir)
            .with_context(|| format!("failed to create {}", data_dir.display()))?;
        self.updated_at = Some(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true));
        let path = Self::path(data_dir);
        let json = serde_json::to_string_pretty(self)?;
        fs::write(&path, json).with_context(|| format!("failed to write {}", path.display()))
    }

    /// Re-install the pool and re-attach the patch on a fresh engine.
    ///
    /// The patch is only re-attached while the stored pool still belongs to
    /// it. A pool staged for the next patch leaves the engine uninitialized
    /// until `patch` confirms the switch.
    pub fn restore<S: DocumentStore>(&self, engine: &IndicatorEngine<S>) -> Result<Option<PatchSwitch>> {
        let token = engine.config().admin_token.clone();
        if let Some(pool) = &self.pool {
            engine
                .replace_pool(&token, pool)
                .context("stored pool configuration is invalid")?;
        }
        let Some(patch_version) = &self.patch_version else {
            return Ok(None);
        };
        if let Some(pool) = &self.pool
            && pool.patch_version != *patch_version
        {
            log::warn!(
                "pool is staged for patch {} while patch {patch_version} was active; run `patch {}` to switch",
                pool.patch_version,
                pool.patch_version
            );
            return Ok(None);
        }
        let switch = engine
            .switch_patch(&token, patch_version)
            .with_context(|| format!("failed to restore patch version {patch_version}"))?;
        log::debug!("restored patch {patch_version}: {switch:?}");
        Ok(Some(switch))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use draftstat_engine::{EngineConfig, MemoryStore};
    use std::collections::BTreeMap;

    fn temp_path(label: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "draftstat-state-{label}-{}",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos()
        ))
    }

    #[test]
    fn missing_file_is_a_fresh_state() {
        let dir = temp_path("missing");
        assert_eq!(ServiceState::load(&dir).unwrap(), ServiceState::default());
    }

    #[test]
    fn saved_state_restores_pool_and_patch() {
        let dir = temp_path("restore");
        let mut state = ServiceState {
            pool: Some(PoolUpdate {
                patch_version: "3".to_string(),
                class_pool: vec![1],
                card_pools: BTreeMap::from([(1, vec![10, 20])]),
                ..PoolUpdate::default()
            }),
            patch_version: Some("3".to_string()),
            updated_at: None,
        };
        state.save(&dir).unwrap();
        let loaded = ServiceState::load(&dir).unwrap();
        assert!(loaded.updated_at.is_some());
        assert_eq!(loaded.pool, state.pool);

        let engine = IndicatorEngine::new(EngineConfig::default(), MemoryStore::new()).unwrap();
        let switch = loaded.restore(&engine).unwrap();
        assert_eq!(switch, Some(PatchSwitch::Created { documents: 4 }));
        assert_eq!(engine.version().batch(), Some(1));
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn pool_staged_for_the_next_patch_skips_the_reattach() {
        let state = ServiceState {
            pool: Some(PoolUpdate {
                patch_version: "4".to_string(),
                class_pool: vec![1],
                card_pools: BTreeMap::from([(1, vec![10, 20])]),
                ..PoolUpdate::default()
            }),
            patch_version: Some("3".to_string()),
            updated_at: None,
        };
        let engine = IndicatorEngine::new(EngineConfig::default(), MemoryStore::new()).unwrap();
        assert_eq!(state.restore(&engine).unwrap(), None);
        assert_eq!(engine.version().patch_version(), None);
        assert_eq!(engine.status().pool_patch_version.as_deref(), Some("4"));

        let token = engine.config().admin_token.clone();
        let switch = engine.switch_patch(&token, "4").unwrap();
        assert_eq!(switch, PatchSwitch::Created { documents: 4 });
    }
}
