pub mod controller;
mod json_store;
pub mod model;
mod queue;
pub mod store;

pub use controller::{LoadOutcome, SettingsController, SettingsError, SettingsEvent};
pub use json_store::JsonFileStore;
pub use model::{CustomFunction, FunctionId, FunctionRow, Settings};
pub use queue::PersistStatus;
pub use store::{MemoryStore, SettingsStore, StoreError};
