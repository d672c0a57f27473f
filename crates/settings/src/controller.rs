use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::model::{CustomFunction, FunctionId, FunctionRow, Settings};
use crate::queue::{PersistStatus, WriteQueue};
use crate::store::SettingsStore;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SettingsError {
    #[error("custom function {0} is no longer in the settings")]
    RecordNotFound(FunctionId),
    #[error("settings have not been loaded yet")]
    NotInitialized,
    #[error("settings were already loaded")]
    AlreadyInitialized,
    #[error("failed to persist settings: {0}")]
    SaveFailed(String),
    #[error("no Tokio runtime available to run the settings writer")]
    NoRuntime,
}

/// Result of the one-time load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded { functions: usize },
    /// The store could not be read; the controller started from empty settings.
    FellBack { reason: String },
}

/// Events a settings view emits back to the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingsEvent {
    EditCommit { id: FunctionId, code: String },
    Rename { id: FunctionId, name: String },
    DeleteRequest { id: FunctionId },
    ToggleChange(bool),
}

#[derive(Debug)]
struct Entry {
    id: FunctionId,
    function: CustomFunction,
}

/// Owns the in-memory mirror of the plugin settings and persists it after
/// every mutation through a single-slot write queue.
/// （持有外掛設定的記憶體鏡像，每次變更後透過單槽寫入佇列保存。）
pub struct SettingsController {
    store: Arc<dyn SettingsStore>,
    queue: WriteQueue,
    entries: Vec<Entry>,
    highlight_text: Option<bool>,
    extra: Map<String, Value>,
    next_id: u64,
    initialized: bool,
    load_error: Option<String>,
}

impl fmt::Debug for SettingsController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SettingsController")
            .field("functions", &self.entries.len())
            .field("highlight_text", &self.highlight_text)
            .field("initialized", &self.initialized)
            .field("persist", &self.queue.status())
            .finish_non_exhaustive()
    }
}

impl SettingsController {
    /// Creates a controller with an empty mirror.
    ///
    /// The writer task is spawned on the current Tokio runtime; outside one
    /// this fails with [`SettingsError::NoRuntime`].
    pub fn new(store: Arc<dyn SettingsStore>) -> Result<Self, SettingsError> {
        let queue =
            WriteQueue::spawn(Arc::clone(&store)).map_err(|_| SettingsError::NoRuntime)?;
        Ok(Self {
            store,
            queue,
            entries: Vec::new(),
            highlight_text: None,
            extra: Map::new(),
            next_id: 1,
            initialized: false,
            load_error: None,
        })
    }

    /// Loads the mirror from the store. Runs once per controller.
    ///
    /// A failing store does not block the surface: the mirror starts empty
    /// and the reason is returned and kept in [`Self::load_error`].
    pub async fn initialize(&mut self) -> Result<LoadOutcome, SettingsError> {
        if self.initialized {
            return Err(SettingsError::AlreadyInitialized);
        }
        let outcome = match self.store.load().await {
            Ok(settings) => {
                let functions = settings.custom_functions.len();
                debug!(functions, "settings loaded");
                self.populate(settings);
                LoadOutcome::Loaded { functions }
            }
            Err(err) => {
                warn!(error = %err, "failed to load settings, starting empty");
                let reason = err.to_string();
                self.populate(Settings::default());
                self.load_error = Some(reason.clone());
                LoadOutcome::FellBack { reason }
            }
        };
        self.initialized = true;
        Ok(outcome)
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn load_error(&self) -> Option<&str> {
        self.load_error.as_deref()
    }

    /// Rows in display order. Empty until the first load completes.
    pub fn rows(&self) -> impl ExactSizeIterator<Item = FunctionRow<'_>> + '_ {
        self.entries.iter().map(|entry| FunctionRow {
            id: entry.id,
            function: &entry.function,
        })
    }

    pub fn function(&self, id: FunctionId) -> Option<&CustomFunction> {
        self.entries
            .iter()
            .find(|entry| entry.id == id)
            .map(|entry| &entry.function)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `None` until loaded; views render that as indeterminate.
    pub fn highlight_text(&self) -> Option<bool> {
        self.highlight_text
    }

    /// The document the next save would write.
    pub fn snapshot(&self) -> Settings {
        Settings {
            custom_functions: self
                .entries
                .iter()
                .map(|entry| entry.function.clone())
                .collect(),
            highlight_text: self.highlight_text.unwrap_or(false),
            extra: self.extra.clone(),
        }
    }

    pub fn persist_status(&self) -> PersistStatus {
        self.queue.status()
    }

    /// Replaces both fields of the record `previous`, keeping its position.
    pub fn update_function(
        &mut self,
        previous: FunctionId,
        next: CustomFunction,
    ) -> Result<(), SettingsError> {
        self.ensure_initialized()?;
        let entry = self.entry_mut(previous)?;
        entry.function = next;
        self.persist();
        Ok(())
    }

    pub fn update_code(
        &mut self,
        id: FunctionId,
        code: impl Into<String>,
    ) -> Result<(), SettingsError> {
        self.ensure_initialized()?;
        let next = self.entry_mut(id)?.function.with_code(code);
        self.update_function(id, next)
    }

    pub fn rename_function(
        &mut self,
        id: FunctionId,
        name: impl Into<String>,
    ) -> Result<(), SettingsError> {
        self.ensure_initialized()?;
        let next = self.entry_mut(id)?.function.with_name(name);
        self.update_function(id, next)
    }

    /// Removes `target` and returns it; the remaining rows keep their order.
    pub fn delete_function(
        &mut self,
        target: FunctionId,
    ) -> Result<CustomFunction, SettingsError> {
        self.ensure_initialized()?;
        let index = self
            .entries
            .iter()
            .position(|entry| entry.id == target)
            .ok_or(SettingsError::RecordNotFound(target))?;
        let removed = self.entries.remove(index);
        self.persist();
        Ok(removed.function)
    }

    /// Appends a function at the end of the list.
    pub fn add_function(
        &mut self,
        function: CustomFunction,
    ) -> Result<FunctionId, SettingsError> {
        self.ensure_initialized()?;
        let id = self.push_entry(function);
        self.persist();
        Ok(id)
    }

    /// Setting the current value again is a no-op and does not save.
    pub fn set_highlight_text(&mut self, value: bool) -> Result<(), SettingsError> {
        self.ensure_initialized()?;
        if self.highlight_text == Some(value) {
            return Ok(());
        }
        self.highlight_text = Some(value);
        self.persist();
        Ok(())
    }

    pub fn handle(&mut self, event: SettingsEvent) -> Result<(), SettingsError> {
        match event {
            SettingsEvent::EditCommit { id, code } => self.update_code(id, code),
            SettingsEvent::Rename { id, name } => self.rename_function(id, name),
            SettingsEvent::DeleteRequest { id } => self.delete_function(id).map(|_| ()),
            SettingsEvent::ToggleChange(value) => self.set_highlight_text(value),
        }
    }

    /// Queues the current mirror again, e.g. after a failed save.
    pub fn retry_save(&mut self) -> Result<(), SettingsError> {
        self.ensure_initialized()?;
        self.persist();
        Ok(())
    }

    /// Waits for every queued save and reports the last one's outcome.
    pub async fn flush(&self) -> Result<(), SettingsError> {
        self.queue.flush().await.map_err(SettingsError::SaveFailed)
    }

    fn populate(&mut self, settings: Settings) {
        let Settings {
            custom_functions,
            highlight_text,
            extra,
        } = settings;
        self.entries.clear();
        for function in custom_functions {
            self.push_entry(function);
        }
        self.highlight_text = Some(highlight_text);
        self.extra = extra;
    }

    fn push_entry(&mut self, function: CustomFunction) -> FunctionId {
        let id = FunctionId::new(self.next_id);
        self.next_id += 1;
        self.entries.push(Entry { id, function });
        id
    }

    fn entry_mut(&mut self, id: FunctionId) -> Result<&mut Entry, SettingsError> {
        self.entries
            .iter_mut()
            .find(|entry| entry.id == id)
            .ok_or(SettingsError::RecordNotFound(id))
    }

    fn ensure_initialized(&self) -> Result<(), SettingsError> {
        if self.initialized {
            Ok(())
        } else {
            Err(SettingsError::NotInitialized)
        }
    }

    fn persist(&mut self) {
        let snapshot = self.snapshot();
        let generation = self.queue.submit(snapshot);
        debug!(generation, "settings queued for save");
    }
}
