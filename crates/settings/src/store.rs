use std::io;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use thiserror::Error;

use crate::model::Settings;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read settings {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse settings {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to serialize settings {path}: {source}")]
    Serialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to write settings {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to prepare directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("settings store unavailable: {0}")]
    Unavailable(String),
}

/// Durable home of the plugin settings, injected into the controller.
/// （外掛設定的持久化來源，由控制器注入使用。）
///
/// Implementations must tolerate `save` being called again before the
/// previous call's result was observed by anyone other than the writer.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// 讀取完整設定。 / Reads the complete settings document.
    async fn load(&self) -> Result<Settings, StoreError>;

    /// 以整份設定覆寫儲存內容。 / Replaces the stored document with `settings`.
    async fn save(&self, settings: &Settings) -> Result<(), StoreError>;
}

/// In-process store for hosts that keep settings in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    settings: Settings,
    saves: usize,
}

impl MemoryStore {
    pub fn new(settings: Settings) -> Self {
        Self {
            state: Mutex::new(MemoryState { settings, saves: 0 }),
        }
    }

    /// 目前儲存的設定副本。 / Copy of the currently stored document.
    pub fn snapshot(&self) -> Result<Settings, StoreError> {
        Ok(self.lock()?.settings.clone())
    }

    /// 成功儲存的次數。 / Number of completed saves.
    pub fn save_count(&self) -> Result<usize, StoreError> {
        Ok(self.lock()?.saves)
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))
    }
}

#[async_trait]
impl SettingsStore for MemoryStore {
    async fn load(&self) -> Result<Settings, StoreError> {
        self.snapshot()
    }

    async fn save(&self, settings: &Settings) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        state.settings = settings.clone();
        state.saves += 1;
        Ok(())
    }
}
