//! NoteCore - Rust implementation of the Notes application data layer.
//!
//! This library provides the core functionality for Notes:
//! - Data models (Note, Tag, NoteTagCrossRef, NoteWithTags)
//! - Database operations (SQLite with cascading deletes)
//! - Live queries that re-emit when their tables change
//! - Reactive view state with debounced, latest-wins search
//! - Configuration management
//!
//! The presentation layer only talks to [`NoteViewModel`]; the view model
//! only talks to [`NoteDao`]; the DAO owns the [`Database`].
//!
//! # Feature Flags
//!
//! - `desktop`: Default config directory detection.
//! - `uniffi`: Generate UniFFI bindings for mobile platforms (Android, iOS).

pub mod config;
pub mod dao;
pub mod database;
pub mod error;
pub mod models;
pub mod observe;
pub mod validation;
pub mod view_model;

// Mobile bindings module
#[cfg(feature = "uniffi")]
pub mod android;

// UniFFI scaffolding (must be at crate root)
#[cfg(feature = "uniffi")]
uniffi::setup_scaffolding!();

// Re-export commonly used types
pub use config::Config;
pub use dao::NoteDao;
pub use database::Database;
pub use error::{NoteError, NoteResult};
pub use models::{NewNote, NewTag, Note, NoteId, NoteTagCrossRef, NoteWithTags, Tag, TagId};
pub use observe::{ChangeNotifier, LiveQuery, LiveState, Table, TableSet};
pub use view_model::{MutationHandle, NoteViewModel, SearchResults, ViewModelOptions};

// Re-export mobile types when uniffi feature is enabled
#[cfg(feature = "uniffi")]
pub use android::{NoteData, NoteWithTagsData, NotesClient, NotesCoreError, NotesListener, TagData};
