//! Mobile bindings for Notes Core.
//!
//! This module provides a blocking API for the Android and iOS apps,
//! exposed via UniFFI bindings. A [`NotesClient`] owns its own tokio runtime
//! and a [`NoteViewModel`]; state changes are pushed to a foreign
//! [`NotesListener`].

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::runtime::Runtime;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::dao::NoteDao;
use crate::database::Database;
use crate::error::NoteError;
use crate::models::{NewTag, Note, NoteWithTags, Tag};
use crate::view_model::{NoteViewModel, ViewModelOptions};

/// Error type exposed to Kotlin and Swift via UniFFI
#[derive(Debug, thiserror::Error, uniffi::Error)]
pub enum NotesCoreError {
    #[error("Database error: {msg}")]
    Database { msg: String },
    #[error("Configuration error: {msg}")]
    Config { msg: String },
    #[error("Validation error: {msg}")]
    Validation { msg: String },
    #[error("Not found: {msg}")]
    NotFound { msg: String },
    #[error("Constraint violation: {msg}")]
    Constraint { msg: String },
    #[error("IO error: {msg}")]
    Io { msg: String },
    #[error("Closed: {msg}")]
    Closed { msg: String },
}

impl From<NoteError> for NotesCoreError {
    fn from(err: NoteError) -> Self {
        let msg = err.to_string();
        match err {
            NoteError::Validation { field, message } => NotesCoreError::Validation {
                msg: format!("{}: {}", field, message),
            },
            NoteError::NotFound(msg) => NotesCoreError::NotFound { msg },
            NoteError::Constraint(msg) => NotesCoreError::Constraint { msg },
            NoteError::Config(msg) => NotesCoreError::Config { msg },
            NoteError::Io(_) => NotesCoreError::Io { msg },
            NoteError::Closed => NotesCoreError::Closed { msg },
            NoteError::Database(_)
            | NoteError::Json(_)
            | NoteError::LiveQuery { .. }
            | NoteError::Other(_) => NotesCoreError::Database { msg },
        }
    }
}

/// A note from the database; timestamps are milliseconds since the epoch
#[derive(Debug, Clone, uniffi::Record)]
pub struct NoteData {
    pub id: i64,
    pub title: String,
    pub content: String,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A tag from the database
#[derive(Debug, Clone, uniffi::Record)]
pub struct TagData {
    pub id: i64,
    pub name: String,
}

/// A note together with its tags
#[derive(Debug, Clone, uniffi::Record)]
pub struct NoteWithTagsData {
    pub note: NoteData,
    pub tags: Vec<TagData>,
}

impl From<Note> for NoteData {
    fn from(note: Note) -> Self {
        Self {
            id: note.id,
            title: note.title,
            content: note.content,
            created_at: note.created_at.timestamp_millis(),
            updated_at: note.updated_at.timestamp_millis(),
        }
    }
}

impl From<Tag> for TagData {
    fn from(tag: Tag) -> Self {
        Self {
            id: tag.id,
            name: tag.name,
        }
    }
}

impl From<NoteWithTags> for NoteWithTagsData {
    fn from(nwt: NoteWithTags) -> Self {
        Self {
            note: nwt.note.into(),
            tags: nwt.tags.into_iter().map(TagData::from).collect(),
        }
    }
}

fn to_data(notes: Vec<NoteWithTags>) -> Vec<NoteWithTagsData> {
    notes.into_iter().map(NoteWithTagsData::from).collect()
}

/// Receives state changes on a background thread
#[uniffi::export(callback_interface)]
pub trait NotesListener: Send + Sync {
    fn on_notes_changed(&self, notes: Vec<NoteWithTagsData>);
    fn on_search_results(&self, query: String, notes: Vec<NoteWithTagsData>);
}

/// Main client for Notes operations on mobile
#[derive(uniffi::Object)]
pub struct NotesClient {
    // Declared before `runtime` so its tasks are aborted while the runtime is alive
    view_model: NoteViewModel,
    listener_task: Mutex<Option<JoinHandle<()>>>,
    dao: NoteDao,
    data_dir: PathBuf,
    runtime: Runtime,
}

#[uniffi::export]
impl NotesClient {
    /// Create a new NotesClient with the given data directory
    #[uniffi::constructor]
    pub fn new(data_dir: String) -> Result<Arc<Self>, NotesCoreError> {
        let data_path = PathBuf::from(&data_dir);

        std::fs::create_dir_all(&data_path).map_err(|e| NotesCoreError::Io {
            msg: format!("Failed to create data directory: {}", e),
        })?;

        let config = Config::new(Some(data_path.clone()))?;
        let db = Database::with_journal_mode(config.database_file(), config.journal_mode())?;
        let dao = NoteDao::new(db);

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("notecore")
            .enable_all()
            .build()
            .map_err(|e| NotesCoreError::Io {
                msg: format!("Failed to create runtime: {}", e),
            })?;

        let view_model = {
            let _guard = runtime.enter();
            NoteViewModel::new(dao.clone(), ViewModelOptions::from(&config))?
        };

        tracing::info!("Notes client opened in {}", data_path.display());

        Ok(Arc::new(Self {
            view_model,
            listener_task: Mutex::new(None),
            dao,
            data_dir: data_path,
            runtime,
        }))
    }

    /// Get the data directory path
    pub fn get_data_dir(&self) -> String {
        self.data_dir.to_string_lossy().to_string()
    }

    /// Add a note; returns its id, or None if title and content were blank
    pub fn add_note(&self, title: String, content: String) -> Result<Option<i64>, NotesCoreError> {
        let handle = self.view_model.add_note(title, content);
        Ok(self.runtime.block_on(handle.wait())?)
    }

    /// Replace a note's title and content; returns false if it does not exist
    pub fn update_note_content(
        &self,
        note_id: i64,
        title: String,
        content: String,
    ) -> Result<bool, NotesCoreError> {
        let handle = self.view_model.update_note_content(note_id, title, content);
        Ok(self.runtime.block_on(handle.wait())?)
    }

    pub fn delete_note(&self, note_id: i64) -> Result<(), NotesCoreError> {
        let handle = self.view_model.delete_by_id(note_id);
        Ok(self.runtime.block_on(handle.wait())?)
    }

    /// Create a tag; returns its id
    pub fn add_tag(&self, name: String) -> Result<i64, NotesCoreError> {
        let handle = self.view_model.insert_tag(NewTag::new(name));
        Ok(self.runtime.block_on(handle.wait())?)
    }

    pub fn rename_tag(&self, tag_id: i64, name: String) -> Result<(), NotesCoreError> {
        let handle = self.view_model.update_tag(Tag { id: tag_id, name });
        Ok(self.runtime.block_on(handle.wait())?)
    }

    pub fn delete_tag(&self, tag_id: i64) -> Result<(), NotesCoreError> {
        let handle = self.view_model.delete_tag_by_id(tag_id);
        Ok(self.runtime.block_on(handle.wait())?)
    }

    /// Returns false if the note already had the tag
    pub fn add_tag_to_note(&self, note_id: i64, tag_id: i64) -> Result<bool, NotesCoreError> {
        let handle = self.view_model.add_tag_to_note(note_id, tag_id);
        Ok(self.runtime.block_on(handle.wait())?)
    }

    /// Returns false if the note did not have the tag
    pub fn remove_tag_from_note(&self, note_id: i64, tag_id: i64) -> Result<bool, NotesCoreError> {
        let handle = self.view_model.remove_tag_from_note(note_id, tag_id);
        Ok(self.runtime.block_on(handle.wait())?)
    }

    /// All notes with their tags, most recently updated first
    pub fn get_notes_with_tags(&self) -> Result<Vec<NoteWithTagsData>, NotesCoreError> {
        let notes = self.runtime.block_on(async {
            let mut live = self.dao.get_notes_with_tags();
            live.next().await.unwrap_or(Err(NoteError::Closed))
        })?;
        Ok(to_data(notes))
    }

    pub fn get_note(&self, note_id: i64) -> Result<Option<NoteWithTagsData>, NotesCoreError> {
        let note = self
            .runtime
            .block_on(self.view_model.get_note_with_tags(note_id))?;
        Ok(note.map(NoteWithTagsData::from))
    }

    /// All tags ordered by name
    pub fn get_all_tags(&self) -> Result<Vec<TagData>, NotesCoreError> {
        let tags = self.runtime.block_on(async {
            let mut live = self.dao.get_all_tags();
            live.next().await.unwrap_or(Err(NoteError::Closed))
        })?;
        Ok(tags.into_iter().map(TagData::from).collect())
    }

    /// Feed a query into the debounced search; results go to the listener
    pub fn search(&self, query: String) {
        self.view_model.search(query);
    }

    /// Replace the current listener
    pub fn set_listener(&self, listener: Box<dyn NotesListener>) {
        let listener: Arc<dyn NotesListener> = Arc::from(listener);
        let mut notes = self.view_model.notes_with_tags();
        let mut results = self.view_model.search_results();

        let task = self.runtime.spawn(async move {
            loop {
                tokio::select! {
                    changed = notes.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let snapshot = notes.borrow_and_update().clone();
                        listener.on_notes_changed(to_data(snapshot));
                    }
                    changed = results.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let snapshot = results.borrow_and_update().clone();
                        listener.on_search_results(snapshot.query, to_data(snapshot.notes));
                    }
                }
            }
        });

        let previous = self
            .listener_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(task);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    pub fn clear_listener(&self) {
        if let Some(task) = self
            .listener_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
    }

    /// The most recent failed mutation, if any
    pub fn last_error(&self) -> Option<String> {
        self.view_model.last_error().borrow().clone()
    }

    /// Stop background work. Later mutations fail with Closed.
    pub fn close(&self) {
        self.clear_listener();
        self.view_model.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    struct CountingListener {
        notes_calls: Arc<AtomicUsize>,
    }

    impl NotesListener for CountingListener {
        fn on_notes_changed(&self, _notes: Vec<NoteWithTagsData>) {
            self.notes_calls.fetch_add(1, Ordering::SeqCst);
        }

        fn on_search_results(&self, _query: String, _notes: Vec<NoteWithTagsData>) {}
    }

    #[test]
    fn test_client_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let client = NotesClient::new(temp_dir.path().to_string_lossy().to_string()).unwrap();

        let tag_id = client.add_tag("work".to_string()).unwrap();
        let note_id = client
            .add_note("Buy milk".to_string(), String::new())
            .unwrap()
            .unwrap();
        assert!(client.add_tag_to_note(note_id, tag_id).unwrap());

        let notes = client.get_notes_with_tags().unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].tags[0].name, "work");

        client.rename_tag(tag_id, "office".to_string()).unwrap();
        assert_eq!(client.get_all_tags().unwrap()[0].name, "office");

        client.delete_tag(tag_id).unwrap();
        let note = client.get_note(note_id).unwrap().unwrap();
        assert!(note.tags.is_empty());

        assert!(client.add_note(" ".to_string(), String::new()).unwrap().is_none());
        client.delete_note(note_id).unwrap();
        assert!(client.get_note(note_id).unwrap().is_none());
    }

    #[test]
    fn test_client_errors_are_mapped() {
        let temp_dir = TempDir::new().unwrap();
        let client = NotesClient::new(temp_dir.path().to_string_lossy().to_string()).unwrap();

        let err = client.rename_tag(99, "ghost".to_string()).unwrap_err();
        assert!(matches!(err, NotesCoreError::NotFound { .. }));

        let err = client.add_tag_to_note(1, 1).unwrap_err();
        assert!(matches!(err, NotesCoreError::Constraint { .. }));

        client.close();
        let err = client.add_tag("late".to_string()).unwrap_err();
        assert!(matches!(err, NotesCoreError::Closed { .. }));
    }

    #[test]
    fn test_listener_receives_notes() {
        let temp_dir = TempDir::new().unwrap();
        let client = NotesClient::new(temp_dir.path().to_string_lossy().to_string()).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        client.set_listener(Box::new(CountingListener {
            notes_calls: calls.clone(),
        }));

        client.add_note("hello".to_string(), String::new()).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while calls.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(calls.load(Ordering::SeqCst) > 0);
        client.close();
    }
}
