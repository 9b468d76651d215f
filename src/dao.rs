//! Async data access layer.
//!
//! [`NoteDao`] owns the shared [`Database`] handle and is the only way the
//! rest of the crate touches storage. Every statement runs on tokio's
//! blocking pool behind a mutex, so a slow disk never stalls other tasks.
//! After a write succeeds, the tables it touched are published so live
//! queries can recompute.

use std::sync::{Arc, Mutex};

use crate::database::Database;
use crate::error::{NoteError, NoteResult};
use crate::models::{NewNote, NewTag, Note, NoteId, NoteTagCrossRef, NoteWithTags, Tag, TagId};
use crate::observe::{ChangeNotifier, LiveQuery, Table, TableSet};

/// Tables read by note-with-tags projections. Tags are included so a rename
/// refreshes the joined names.
fn note_with_tags_tables() -> TableSet {
    TableSet::of(&[Table::Notes, Table::Tags, Table::NoteTagCrossRef])
}

/// Tables affected when a note row is deleted (associations cascade)
fn note_delete_tables() -> TableSet {
    TableSet::of(&[Table::Notes, Table::NoteTagCrossRef])
}

/// Tables affected when a tag row is deleted (associations cascade)
fn tag_delete_tables() -> TableSet {
    TableSet::of(&[Table::Tags, Table::NoteTagCrossRef])
}

/// Data access object for notes, tags and their associations.
///
/// Cheap to clone; clones share the same connection and change notifier.
#[derive(Clone)]
pub struct NoteDao {
    db: Arc<Mutex<Database>>,
    notifier: ChangeNotifier,
}

impl NoteDao {
    /// Take ownership of an opened database
    pub fn new(db: Database) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
            notifier: ChangeNotifier::new(),
        }
    }

    /// Open an in-memory database (for testing)
    pub fn in_memory() -> NoteResult<Self> {
        Ok(Self::new(Database::new_in_memory()?))
    }

    pub fn notifier(&self) -> &ChangeNotifier {
        &self.notifier
    }

    /// Run `f` against the database on the blocking pool
    async fn run<T, F>(&self, op: &'static str, f: F) -> NoteResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> NoteResult<T> + Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db
                .lock()
                .map_err(|_| NoteError::Other("database lock poisoned".to_string()))?;
            f(&*guard)
        })
        .await
        .map_err(|e| NoteError::Other(format!("{} task failed: {}", op, e)))?
    }

    /// Run a write and publish `tables` once it has succeeded.
    ///
    /// Publishing happens on the blocking task, so a committed write is
    /// announced even if the caller stops waiting for it.
    async fn write<T, F>(&self, op: &'static str, tables: TableSet, f: F) -> NoteResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> NoteResult<T> + Send + 'static,
    {
        let notifier = self.notifier.clone();
        self.run(op, move |db| match f(db) {
            Ok(value) => {
                notifier.notify(tables);
                Ok(value)
            }
            Err(e) => {
                tracing::warn!("{} failed: {}", op, e);
                Err(e)
            }
        })
        .await
    }

    fn live<T, F>(&self, name: &'static str, tables: TableSet, query: F) -> LiveQuery<T>
    where
        T: Clone + Send + Sync + 'static,
        F: Fn(&Database) -> NoteResult<T> + Send + Sync + Clone + 'static,
    {
        let dao = self.clone();
        LiveQuery::spawn(name, &self.notifier, tables, move || {
            let dao = dao.clone();
            let query = query.clone();
            async move { dao.run(name, move |db| query(db)).await }
        })
    }

    // ========================================================================
    // Notes
    // ========================================================================

    /// Insert a note; returns the store-assigned id
    pub async fn insert_note(&self, note: NewNote) -> NoteResult<NoteId> {
        self.write("insert_note", TableSet::of(&[Table::Notes]), move |db| {
            db.insert_note(&note)
        })
        .await
    }

    /// Overwrite a note's title and content. Fails with NotFound for an unknown id.
    pub async fn update_note(&self, note: Note) -> NoteResult<()> {
        self.write("update_note", TableSet::of(&[Table::Notes]), move |db| {
            db.update_note(&note)
        })
        .await
    }

    /// Delete a note and its associations. Unknown notes are ignored.
    pub async fn delete_note(&self, note: &Note) -> NoteResult<()> {
        self.delete_note_by_id(note.id).await
    }

    pub async fn delete_note_by_id(&self, note_id: NoteId) -> NoteResult<()> {
        self.write("delete_note", note_delete_tables(), move |db| {
            db.delete_note(note_id).map(|_| ())
        })
        .await
    }

    /// Delete every note; returns how many were removed
    pub async fn delete_all_notes(&self) -> NoteResult<usize> {
        self.write("delete_all_notes", note_delete_tables(), |db| {
            db.delete_all_notes()
        })
        .await
    }

    pub async fn get_note_by_id(&self, note_id: NoteId) -> NoteResult<Option<Note>> {
        self.run("get_note_by_id", move |db| db.get_note(note_id)).await
    }

    /// All notes, newest id first, kept up to date
    pub fn get_all_notes(&self) -> LiveQuery<Vec<Note>> {
        self.live("get_all_notes", TableSet::of(&[Table::Notes]), |db| {
            db.get_all_notes()
        })
    }

    /// Case-insensitive substring search over title and content, kept up to date
    pub fn search_notes(&self, query: impl Into<String>) -> LiveQuery<Vec<Note>> {
        let query: Arc<str> = Arc::from(query.into());
        self.live("search_notes", TableSet::of(&[Table::Notes]), move |db| {
            db.search_notes(&query)
        })
    }

    // ========================================================================
    // Tags
    // ========================================================================

    /// Insert a tag, overwriting the name if the tag's id is already taken
    pub async fn insert_tag(&self, tag: NewTag) -> NoteResult<TagId> {
        self.write("insert_tag", TableSet::of(&[Table::Tags]), move |db| {
            db.insert_tag(&tag)
        })
        .await
    }

    /// Rename a tag. Fails with NotFound for an unknown id.
    pub async fn update_tag(&self, tag: Tag) -> NoteResult<()> {
        self.write("update_tag", TableSet::of(&[Table::Tags]), move |db| {
            db.update_tag(&tag)
        })
        .await
    }

    /// Delete a tag and its associations. Unknown tags are ignored.
    pub async fn delete_tag(&self, tag: &Tag) -> NoteResult<()> {
        self.delete_tag_by_id(tag.id).await
    }

    pub async fn delete_tag_by_id(&self, tag_id: TagId) -> NoteResult<()> {
        self.write("delete_tag", tag_delete_tables(), move |db| {
            db.delete_tag(tag_id).map(|_| ())
        })
        .await
    }

    /// All tags ordered by name, kept up to date
    pub fn get_all_tags(&self) -> LiveQuery<Vec<Tag>> {
        self.live("get_all_tags", TableSet::of(&[Table::Tags]), |db| {
            db.get_all_tags()
        })
    }

    pub async fn get_tag_by_id(&self, tag_id: TagId) -> NoteResult<Option<Tag>> {
        self.run("get_tag_by_id", move |db| db.get_tag(tag_id)).await
    }

    pub async fn get_tags_by_name(&self, name: impl Into<String>) -> NoteResult<Vec<Tag>> {
        let name = name.into();
        self.run("get_tags_by_name", move |db| db.get_tags_by_name(&name))
            .await
    }

    // ========================================================================
    // Associations
    // ========================================================================

    /// Associate a tag with a note; an existing pair is left alone.
    ///
    /// Returns whether a new association was created. Fails with
    /// `NoteError::Constraint` if the note or tag does not exist.
    pub async fn insert_association(&self, cross_ref: NoteTagCrossRef) -> NoteResult<bool> {
        self.write(
            "insert_association",
            TableSet::of(&[Table::NoteTagCrossRef]),
            move |db| db.add_tag_to_note(cross_ref.note_id, cross_ref.tag_id),
        )
        .await
    }

    /// Remove an association; returns whether it existed
    pub async fn delete_association(&self, cross_ref: NoteTagCrossRef) -> NoteResult<bool> {
        self.write(
            "delete_association",
            TableSet::of(&[Table::NoteTagCrossRef]),
            move |db| db.remove_tag_from_note(cross_ref.note_id, cross_ref.tag_id),
        )
        .await
    }

    pub async fn count_associations(&self, note_id: NoteId, tag_id: TagId) -> NoteResult<i64> {
        self.run("count_associations", move |db| {
            db.count_associations(note_id, tag_id)
        })
        .await
    }

    pub async fn get_tags_for_note(&self, note_id: NoteId) -> NoteResult<Vec<Tag>> {
        self.run("get_tags_for_note", move |db| db.get_note_tags(note_id))
            .await
    }

    // ========================================================================
    // Note-with-tags projections
    // ========================================================================

    /// All notes with their tags, most recently updated first, kept up to date
    pub fn get_notes_with_tags(&self) -> LiveQuery<Vec<NoteWithTags>> {
        self.live("get_notes_with_tags", note_with_tags_tables(), |db| {
            db.get_notes_with_tags()
        })
    }

    /// Point read of one note with its tags
    pub async fn get_note_with_tags(&self, note_id: NoteId) -> NoteResult<Option<NoteWithTags>> {
        self.run("get_note_with_tags", move |db| db.get_note_with_tags(note_id))
            .await
    }

    /// One note with its tags, kept up to date; `None` while it does not exist
    pub fn observe_note_with_tags(&self, note_id: NoteId) -> LiveQuery<Option<NoteWithTags>> {
        self.live("observe_note_with_tags", note_with_tags_tables(), move |db| {
            db.get_note_with_tags(note_id)
        })
    }

    /// Search results joined with their tags, kept up to date
    pub fn search_notes_with_tags(&self, query: impl Into<String>) -> LiveQuery<Vec<NoteWithTags>> {
        let query: Arc<str> = Arc::from(query.into());
        self.live("search_notes_with_tags", note_with_tags_tables(), move |db| {
            db.search_notes_with_tags(&query)
        })
    }
}

#[cfg(test)]
impl NoteDao {
    /// Direct access to the connection, for breaking storage in tests
    pub(crate) fn lock_database(&self) -> std::sync::MutexGuard<'_, Database> {
        self.db.lock().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn next_matching<T, P>(query: &mut LiveQuery<T>, pred: P) -> T
    where
        T: Clone + Send + Sync + 'static,
        P: Fn(&T) -> bool,
    {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let value = query
                    .next()
                    .await
                    .expect("live query stopped")
                    .expect("live query failed");
                if pred(&value) {
                    return value;
                }
            }
        })
        .await
        .expect("timed out waiting for live query")
    }

    #[tokio::test]
    async fn test_insert_then_get() {
        let dao = NoteDao::in_memory().unwrap();
        let id = dao.insert_note(NewNote::new("Title", "Body")).await.unwrap();

        let note = dao.get_note_by_id(id).await.unwrap().unwrap();
        assert_eq!(note.title, "Title");
        assert_eq!(note.content, "Body");
        assert_eq!(note.created_at, note.updated_at);
        assert!(dao.get_note_by_id(id + 100).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_get_all_notes_is_live_and_ordered() {
        let dao = NoteDao::in_memory().unwrap();
        let mut all = dao.get_all_notes();
        assert!(all.next().await.unwrap().unwrap().is_empty());

        let a = dao.insert_note(NewNote::new("A", "")).await.unwrap();
        let b = dao.insert_note(NewNote::new("B", "")).await.unwrap();

        let notes = next_matching(&mut all, |n| n.len() == 2).await;
        let ids: Vec<NoteId> = notes.iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![b, a]);
    }

    #[tokio::test]
    async fn test_search_notes_is_live() {
        let dao = NoteDao::in_memory().unwrap();
        let mut hits = dao.search_notes("hello");
        assert!(hits.next().await.unwrap().unwrap().is_empty());

        dao.insert_note(NewNote::new("Hello World", "")).await.unwrap();
        dao.insert_note(NewNote::new("Unrelated", "")).await.unwrap();

        let found = next_matching(&mut hits, |n| !n.is_empty()).await;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].title, "Hello World");
    }

    #[tokio::test]
    async fn test_notes_with_tags_follow_tag_changes() {
        let dao = NoteDao::in_memory().unwrap();
        let tag_id = dao.insert_tag(NewTag::new("work")).await.unwrap();
        let note_id = dao.insert_note(NewNote::new("Buy milk", "")).await.unwrap();

        let mut live = dao.get_notes_with_tags();
        dao.insert_association(NoteTagCrossRef::new(note_id, tag_id))
            .await
            .unwrap();
        let tagged = next_matching(&mut live, |n| n.len() == 1 && n[0].tags.len() == 1).await;
        assert_eq!(tagged[0].tags[0].name, "work");

        dao.update_tag(Tag {
            id: tag_id,
            name: "office".to_string(),
        })
        .await
        .unwrap();
        next_matching(&mut live, |n| n[0].tag_names() == vec!["office"]).await;

        dao.delete_tag_by_id(tag_id).await.unwrap();
        next_matching(&mut live, |n| n.len() == 1 && n[0].tags.is_empty()).await;
    }

    #[tokio::test]
    async fn test_observe_single_note() {
        let dao = NoteDao::in_memory().unwrap();
        let id = dao.insert_note(NewNote::new("One", "")).await.unwrap();

        let mut one = dao.observe_note_with_tags(id);
        let first = one.next().await.unwrap().unwrap().unwrap();
        assert_eq!(first.note.title, "One");

        dao.delete_note_by_id(id).await.unwrap();
        next_matching(&mut one, |n| n.is_none()).await;
    }

    #[tokio::test]
    async fn test_association_is_idempotent() {
        let dao = NoteDao::in_memory().unwrap();
        let note_id = dao.insert_note(NewNote::new("n", "")).await.unwrap();
        let tag_id = dao.insert_tag(NewTag::new("t")).await.unwrap();

        let cross_ref = NoteTagCrossRef::new(note_id, tag_id);

        assert!(dao.insert_association(cross_ref).await.unwrap());
        assert!(!dao.insert_association(cross_ref).await.unwrap());
        assert_eq!(dao.count_associations(note_id, tag_id).await.unwrap(), 1);

        assert!(dao.delete_association(cross_ref).await.unwrap());
        assert!(!dao.delete_association(cross_ref).await.unwrap());
        assert!(dao.get_tags_for_note(note_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_write_does_not_break_live_query() {
        let dao = NoteDao::in_memory().unwrap();
        let mut live = dao.get_notes_with_tags();
        assert!(live.next().await.unwrap().unwrap().is_empty());

        let err = dao
            .insert_association(NoteTagCrossRef::new(999, 999))
            .await
            .unwrap_err();
        assert!(err.is_constraint());

        let err = dao
            .update_note(Note {
                id: 999,
                title: "ghost".to_string(),
                content: String::new(),
                created_at: chrono::Utc::now(),
                updated_at: chrono::Utc::now(),
            })
            .await
            .unwrap_err();
        assert!(err.is_not_found());

        dao.insert_note(NewNote::new("still alive", "")).await.unwrap();
        let notes = next_matching(&mut live, |n| n.len() == 1).await;
        assert_eq!(notes[0].note.title, "still alive");
    }

    #[tokio::test]
    async fn test_get_all_tags_is_live() {
        let dao = NoteDao::in_memory().unwrap();
        let mut tags = dao.get_all_tags();
        assert!(tags.next().await.unwrap().unwrap().is_empty());

        dao.insert_tag(NewTag::new("b")).await.unwrap();
        dao.insert_tag(NewTag::new("a")).await.unwrap();
        let all = next_matching(&mut tags, |t| t.len() == 2).await;
        assert_eq!(all[0].name, "a");
        assert_eq!(all[1].name, "b");

        let found = dao.get_tags_by_name("A").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(dao.get_tag_by_id(found[0].id).await.unwrap(), Some(found[0].clone()));
    }

    #[tokio::test]
    async fn test_delete_all_notes() {
        let dao = NoteDao::in_memory().unwrap();
        dao.insert_note(NewNote::new("a", "")).await.unwrap();
        dao.insert_note(NewNote::new("b", "")).await.unwrap();

        let mut all = dao.get_all_notes();
        assert_eq!(dao.delete_all_notes().await.unwrap(), 2);
        next_matching(&mut all, |n| n.is_empty()).await;
    }

    #[tokio::test]
    #[allow(clippy::await_holding_lock)]
    async fn test_abandoned_write_still_notifies() {
        let dao = NoteDao::in_memory().unwrap();
        let mut live = dao.get_all_notes();
        assert!(live.next().await.unwrap().unwrap().is_empty());

        // Block the write behind the connection lock, then stop waiting for it
        let guard = dao.lock_database();
        let abandoned = tokio::time::timeout(
            Duration::from_millis(50),
            dao.insert_note(NewNote::new("late", "")),
        )
        .await;
        assert!(abandoned.is_err());
        drop(guard);

        let notes = next_matching(&mut live, |n| n.len() == 1).await;
        assert_eq!(notes[0].title, "late");
    }

    #[tokio::test]
    async fn test_invalid_live_search_reports_error() {
        let dao = NoteDao::in_memory().unwrap();
        let mut hits = dao.search_notes("a".repeat(501));

        let first = tokio::time::timeout(Duration::from_secs(5), hits.next())
            .await
            .expect("a failed search must still emit")
            .unwrap();
        match first {
            Err(NoteError::LiveQuery { name, source }) => {
                assert_eq!(name, "search_notes");
                assert!(matches!(*source, NoteError::Validation { .. }));
            }
            other => panic!("expected a live query error, got {:?}", other),
        }
    }
}
