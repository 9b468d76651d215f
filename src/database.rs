//! Database operations for Notes.
//!
//! This module provides all data access functionality using SQLite.
//! Timestamps are stored as INTEGER Unix milliseconds and surfaced as
//! `DateTime<Utc>`. Referential integrity between notes, tags and their
//! associations is enforced by SQLite foreign keys with ON DELETE CASCADE.

use std::collections::HashMap;
use std::path::Path;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row, ToSql};

use crate::error::{NoteError, NoteResult};
use crate::models::{millis_to_datetime, NewNote, NewTag, Note, NoteId, NoteWithTags, Tag, TagId};
use crate::validation::{validate_note_fields, validate_search_query, validate_tag_name};

/// Current schema version, stored in `PRAGMA user_version`
pub const SCHEMA_VERSION: i64 = 1;

const NOTE_COLUMNS: &str = "id, title, content, created_at, updated_at";

/// Case-insensitive substring match on title or content. `?1` is the query.
const SEARCH_CLAUSE: &str =
    "WHERE instr(lower(title), lower(?1)) > 0 OR instr(lower(content), lower(?1)) > 0";

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Database wrapper for SQLite operations
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open (or create) a database file using WAL journaling
    pub fn new<P: AsRef<Path>>(db_path: P) -> NoteResult<Self> {
        Self::with_journal_mode(db_path, "WAL")
    }

    /// Open (or create) a database file with an explicit journal mode
    pub fn with_journal_mode<P: AsRef<Path>>(db_path: P, journal_mode: &str) -> NoteResult<Self> {
        let conn = Connection::open(db_path)?;

        match journal_mode.to_ascii_uppercase().as_str() {
            "WAL" => conn.execute_batch("PRAGMA journal_mode=WAL;")?,
            "DELETE" => conn.execute_batch("PRAGMA journal_mode=DELETE;")?,
            other => {
                return Err(NoteError::Config(format!(
                    "unsupported journal mode: {}",
                    other
                )))
            }
        }

        let mut db = Self { conn };
        db.init_database()?;
        Ok(db)
    }

    /// Create an in-memory database (for testing)
    pub fn new_in_memory() -> NoteResult<Self> {
        let conn = Connection::open_in_memory()?;
        let mut db = Self { conn };
        db.init_database()?;
        Ok(db)
    }

    /// Initialize database schema
    pub fn init_database(&mut self) -> NoteResult<()> {
        // Cascades only run with foreign keys enabled, and the setting is per connection
        self.conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        let version = self.schema_version()?;
        if version > SCHEMA_VERSION {
            return Err(NoteError::Other(format!(
                "database schema version {} is newer than supported version {}",
                version, SCHEMA_VERSION
            )));
        }

        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS notes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL DEFAULT '',
                content TEXT NOT NULL DEFAULT '',
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            -- Tag names are not unique; duplicates are allowed
            CREATE TABLE IF NOT EXISTS tags (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS note_tag_cross_ref (
                note_id INTEGER NOT NULL,
                tag_id INTEGER NOT NULL,
                FOREIGN KEY (note_id) REFERENCES notes (id) ON DELETE CASCADE,
                FOREIGN KEY (tag_id) REFERENCES tags (id) ON DELETE CASCADE,
                PRIMARY KEY (note_id, tag_id)
            );

            CREATE INDEX IF NOT EXISTS idx_notes_updated_at ON notes(updated_at);
            CREATE INDEX IF NOT EXISTS idx_tags_name ON tags(name);
            CREATE INDEX IF NOT EXISTS idx_note_tag_cross_ref_note_id ON note_tag_cross_ref(note_id);
            CREATE INDEX IF NOT EXISTS idx_note_tag_cross_ref_tag_id ON note_tag_cross_ref(tag_id);
            "#,
        )?;

        if version < SCHEMA_VERSION {
            self.conn
                .execute_batch(&format!("PRAGMA user_version = {};", SCHEMA_VERSION))?;
            tracing::info!(
                "Initialized notes schema (version {} -> {})",
                version,
                SCHEMA_VERSION
            );
        }

        Ok(())
    }

    /// Schema version recorded in the database file
    pub fn schema_version(&self) -> NoteResult<i64> {
        let version = self
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))?;
        Ok(version)
    }

    // ========================================================================
    // Note operations
    // ========================================================================

    /// Insert a new note; returns the store-assigned id.
    ///
    /// `created_at` and `updated_at` are both set to the current time.
    pub fn insert_note(&self, note: &NewNote) -> NoteResult<NoteId> {
        validate_note_fields(&note.title, &note.content)?;
        let now = now_millis();

        self.conn.execute(
            "INSERT INTO notes (title, content, created_at, updated_at) VALUES (?1, ?2, ?3, ?3)",
            params![note.title, note.content, now],
        )?;

        Ok(self.conn.last_insert_rowid())
    }

    /// Overwrite a note's title and content and refresh `updated_at`.
    ///
    /// `created_at` is never changed. `updated_at` strictly increases, even
    /// when two updates land within the same millisecond.
    pub fn update_note(&self, note: &Note) -> NoteResult<()> {
        validate_note_fields(&note.title, &note.content)?;

        let updated = self.conn.execute(
            r#"
            UPDATE notes
            SET title = ?1, content = ?2, updated_at = MAX(?3, updated_at + 1)
            WHERE id = ?4
            "#,
            params![note.title, note.content, now_millis(), note.id],
        )?;

        if updated == 0 {
            return Err(NoteError::not_found("note", note.id));
        }
        Ok(())
    }

    /// Delete a note and, by cascade, its tag associations.
    ///
    /// Returns false if no such note existed.
    pub fn delete_note(&self, note_id: NoteId) -> NoteResult<bool> {
        let deleted = self
            .conn
            .execute("DELETE FROM notes WHERE id = ?1", params![note_id])?;
        Ok(deleted > 0)
    }

    /// Delete every note; returns how many were removed
    pub fn delete_all_notes(&self) -> NoteResult<usize> {
        let deleted = self.conn.execute("DELETE FROM notes", [])?;
        Ok(deleted)
    }

    /// Get a note by id
    pub fn get_note(&self, note_id: NoteId) -> NoteResult<Option<Note>> {
        let note = self
            .conn
            .query_row(
                &format!("SELECT {} FROM notes WHERE id = ?1", NOTE_COLUMNS),
                params![note_id],
                Self::row_to_note,
            )
            .optional()?;
        Ok(note)
    }

    /// Get all notes, newest id first
    pub fn get_all_notes(&self) -> NoteResult<Vec<Note>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {} FROM notes ORDER BY id DESC", NOTE_COLUMNS))?;

        let notes = stmt
            .query_map([], Self::row_to_note)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(notes)
    }

    /// Case-insensitive substring search over title and content, newest id first
    pub fn search_notes(&self, query: &str) -> NoteResult<Vec<Note>> {
        validate_search_query(query)?;

        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM notes {} ORDER BY id DESC",
            NOTE_COLUMNS, SEARCH_CLAUSE
        ))?;

        let notes = stmt
            .query_map(params![query], Self::row_to_note)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(notes)
    }

    // ========================================================================
    // Tag operations
    // ========================================================================

    /// Insert a tag; returns its id.
    ///
    /// A tag carrying an id that already exists overwrites that tag's name.
    /// This is an upsert, so the existing associations are kept.
    pub fn insert_tag(&self, tag: &NewTag) -> NoteResult<TagId> {
        validate_tag_name(&tag.name)?;

        match tag.id {
            Some(id) => {
                self.conn.execute(
                    r#"
                    INSERT INTO tags (id, name) VALUES (?1, ?2)
                    ON CONFLICT(id) DO UPDATE SET name = excluded.name
                    "#,
                    params![id, tag.name],
                )?;
                Ok(id)
            }
            None => {
                self.conn
                    .execute("INSERT INTO tags (name) VALUES (?1)", params![tag.name])?;
                Ok(self.conn.last_insert_rowid())
            }
        }
    }

    /// Rename an existing tag
    pub fn update_tag(&self, tag: &Tag) -> NoteResult<()> {
        validate_tag_name(&tag.name)?;

        let updated = self.conn.execute(
            "UPDATE tags SET name = ?1 WHERE id = ?2",
            params![tag.name, tag.id],
        )?;

        if updated == 0 {
            return Err(NoteError::not_found("tag", tag.id));
        }
        Ok(())
    }

    /// Delete a tag and, by cascade, its note associations.
    ///
    /// Returns false if no such tag existed.
    pub fn delete_tag(&self, tag_id: TagId) -> NoteResult<bool> {
        let deleted = self
            .conn
            .execute("DELETE FROM tags WHERE id = ?1", params![tag_id])?;
        Ok(deleted > 0)
    }

    /// Get all tags ordered by name
    pub fn get_all_tags(&self) -> NoteResult<Vec<Tag>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name FROM tags ORDER BY name ASC, id ASC")?;

        let tags = stmt
            .query_map([], Self::row_to_tag)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tags)
    }

    /// Get a single tag by id
    pub fn get_tag(&self, tag_id: TagId) -> NoteResult<Option<Tag>> {
        let tag = self
            .conn
            .query_row(
                "SELECT id, name FROM tags WHERE id = ?1",
                params![tag_id],
                Self::row_to_tag,
            )
            .optional()?;
        Ok(tag)
    }

    /// Get all tags with a given name (case-insensitive)
    pub fn get_tags_by_name(&self, name: &str) -> NoteResult<Vec<Tag>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name FROM tags WHERE LOWER(name) = LOWER(?1) ORDER BY id")?;

        let tags = stmt
            .query_map([name], Self::row_to_tag)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tags)
    }

    // ========================================================================
    // Note-tag associations
    // ========================================================================

    /// Associate a tag with a note.
    ///
    /// Returns false if the pair already existed. A missing note or tag is a
    /// foreign-key violation and surfaces as `NoteError::Constraint`.
    pub fn add_tag_to_note(&self, note_id: NoteId, tag_id: TagId) -> NoteResult<bool> {
        // OR IGNORE covers the primary key only; foreign keys still fail
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO note_tag_cross_ref (note_id, tag_id) VALUES (?1, ?2)",
            params![note_id, tag_id],
        )?;
        Ok(inserted > 0)
    }

    /// Remove a tag from a note; returns false if the pair did not exist
    pub fn remove_tag_from_note(&self, note_id: NoteId, tag_id: TagId) -> NoteResult<bool> {
        let deleted = self.conn.execute(
            "DELETE FROM note_tag_cross_ref WHERE note_id = ?1 AND tag_id = ?2",
            params![note_id, tag_id],
        )?;
        Ok(deleted > 0)
    }

    /// Number of association rows for a pair (0 or 1)
    pub fn count_associations(&self, note_id: NoteId, tag_id: TagId) -> NoteResult<i64> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM note_tag_cross_ref WHERE note_id = ?1 AND tag_id = ?2",
            params![note_id, tag_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Associations whose note or tag no longer exists. Always 0 while
    /// foreign keys are enforced.
    pub fn count_orphan_associations(&self) -> NoteResult<i64> {
        let count = self.conn.query_row(
            r#"
            SELECT COUNT(*) FROM note_tag_cross_ref x
            WHERE NOT EXISTS (SELECT 1 FROM notes n WHERE n.id = x.note_id)
               OR NOT EXISTS (SELECT 1 FROM tags t WHERE t.id = x.tag_id)
            "#,
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Get all tags for a note, ordered by name
    pub fn get_note_tags(&self, note_id: NoteId) -> NoteResult<Vec<Tag>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT t.id, t.name
            FROM tags t
            INNER JOIN note_tag_cross_ref x ON t.id = x.tag_id
            WHERE x.note_id = ?1
            ORDER BY t.name ASC, t.id ASC
            "#,
        )?;

        let tags = stmt
            .query_map(params![note_id], Self::row_to_tag)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tags)
    }

    // ========================================================================
    // Note-with-tags projections
    // ========================================================================

    /// All notes with their tags, most recently updated first
    pub fn get_notes_with_tags(&self) -> NoteResult<Vec<NoteWithTags>> {
        self.load_notes_with_tags("", &[])
    }

    /// A single note with its tags
    pub fn get_note_with_tags(&self, note_id: NoteId) -> NoteResult<Option<NoteWithTags>> {
        let mut notes = self.load_notes_with_tags("WHERE id = ?1", &[&note_id])?;
        Ok(notes.pop())
    }

    /// Search results joined with their tags, most recently updated first
    pub fn search_notes_with_tags(&self, query: &str) -> NoteResult<Vec<NoteWithTags>> {
        validate_search_query(query)?;
        self.load_notes_with_tags(SEARCH_CLAUSE, &[&query])
    }

    /// Load notes matching `filter` plus their tags inside one read
    /// transaction, so a note never appears with a partial tag set.
    fn load_notes_with_tags(
        &self,
        filter: &str,
        filter_params: &[&dyn ToSql],
    ) -> NoteResult<Vec<NoteWithTags>> {
        let tx = self.conn.unchecked_transaction()?;

        let notes = {
            let mut stmt = tx.prepare(&format!(
                "SELECT {} FROM notes {} ORDER BY updated_at DESC, id DESC",
                NOTE_COLUMNS, filter
            ))?;
            let rows = stmt
                .query_map(filter_params, Self::row_to_note)?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        let mut tags_by_note: HashMap<NoteId, Vec<Tag>> = HashMap::new();
        {
            let mut stmt = tx.prepare(&format!(
                r#"
                SELECT x.note_id, t.id, t.name
                FROM note_tag_cross_ref x
                INNER JOIN tags t ON t.id = x.tag_id
                WHERE x.note_id IN (SELECT id FROM notes {})
                ORDER BY t.name ASC, t.id ASC
                "#,
                filter
            ))?;
            let rows = stmt.query_map(filter_params, |row| {
                Ok((
                    row.get::<_, NoteId>(0)?,
                    Tag {
                        id: row.get(1)?,
                        name: row.get(2)?,
                    },
                ))
            })?;
            for row in rows {
                let (note_id, tag) = row?;
                tags_by_note.entry(note_id).or_default().push(tag);
            }
        }

        tx.commit()?;

        Ok(notes
            .into_iter()
            .map(|note| {
                let tags = tags_by_note.remove(&note.id).unwrap_or_default();
                NoteWithTags { note, tags }
            })
            .collect())
    }

    /// Close the database connection
    pub fn close(self) -> NoteResult<()> {
        self.conn.close().map_err(|(_, e)| NoteError::from(e))
    }

    fn row_to_note(row: &Row) -> rusqlite::Result<Note> {
        Ok(Note {
            id: row.get(0)?,
            title: row.get(1)?,
            content: row.get(2)?,
            created_at: millis_to_datetime(row.get(3)?),
            updated_at: millis_to_datetime(row.get(4)?),
        })
    }

    fn row_to_tag(row: &Row) -> rusqlite::Result<Tag> {
        Ok(Tag {
            id: row.get(0)?,
            name: row.get(1)?,
        })
    }
}

// ============================================================================
#[cfg(test)]
impl Database {
    /// Run raw SQL against the connection
    pub(crate) fn execute_batch(&self, sql: &str) -> NoteResult<()> {
        self.conn.execute_batch(sql)?;
        Ok(())
    }
}
