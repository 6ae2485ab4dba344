//! Flowboard Core Library
//!
//! Replicated state engine for the Flowboard canvas: the entity model with
//! tombstones, the deterministic snapshot merge, snapshot undo/redo, energy
//! propagation and stacking.

pub mod clock;
pub mod collaboration;
pub mod energy;
pub mod entities;
pub mod history;
pub mod merge;
pub mod preferences;
pub mod session;
pub mod stacking;
pub mod storage;
pub mod store;
pub mod sync;
pub mod tombstones;

pub use clock::{Clock, ManualClock, Millis, SystemClock};
pub use collaboration::CollaborationManager;
pub use energy::{EnergyMap, EnergyMode, effective_energy, effective_progress};
pub use entities::{
    Comment, CommentTarget, DEFAULT_LAYER_ID, DrawTool, Drawing, Edge, EntityId, EntityKind,
    ItemKind, ItemRef, Layer, Node, NodeType, StackGroup, TaskStatus, TextBox, TextBoxKind,
};
pub use history::{HistoryManager, MAX_UNDO_HISTORY};
pub use merge::merge_session_state;
pub use preferences::{Preferences, PreferencesError};
pub use session::{SessionState, normalize_session_state};
pub use stacking::ZAction;
pub use storage::{FileStorage, MemoryStorage, Storage, StorageError, StorageResult};
pub use store::{EngineEvent, EngineState};
pub use sync::{ClientMessage, ServerMessage, SyncError, SyncEvent};
pub use tombstones::Tombstones;
