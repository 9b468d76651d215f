//! Data models for Notes.
//!
//! This module defines the core entities: Note, Tag, and NoteTagCrossRef,
//! plus the NoteWithTags projection. IDs are SQLite integer row ids assigned
//! by the store; timestamps are accurate to the millisecond.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Store-assigned note identifier
pub type NoteId = i64;

/// Store-assigned tag identifier
pub type TagId = i64;

/// Represents a stored note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    /// Row id, stable for the note's lifetime
    pub id: NoteId,
    /// Title (may be empty)
    pub title: String,
    /// Body text (may be empty)
    pub content: String,
    /// When the note was created; never changes
    pub created_at: DateTime<Utc>,
    /// When the title or content last changed (equals created_at on creation)
    pub updated_at: DateTime<Utc>,
}

impl Note {
    /// Copy of this note with new title and content; id and timestamps are kept
    pub fn with_text(&self, title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            ..self.clone()
        }
    }
}

/// A note that has not been stored yet, so it has no identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewNote {
    pub title: String,
    pub content: String,
}

impl NewNote {
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
        }
    }
}

/// Represents a stored tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tag {
    pub id: TagId,
    /// Display name. Duplicates are allowed.
    pub name: String,
}

/// A tag to insert.
///
/// With `id = None` the store assigns a fresh id. With an explicit id the
/// insert overwrites the existing tag's name if that id is taken.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTag {
    pub id: Option<TagId>,
    pub name: String,
}

impl NewTag {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
        }
    }

    pub fn with_id(id: TagId, name: impl Into<String>) -> Self {
        Self {
            id: Some(id),
            name: name.into(),
        }
    }
}

impl From<Tag> for NewTag {
    fn from(tag: Tag) -> Self {
        Self {
            id: Some(tag.id),
            name: tag.name,
        }
    }
}

/// Represents the association between a note and a tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NoteTagCrossRef {
    pub note_id: NoteId,
    pub tag_id: TagId,
}

impl NoteTagCrossRef {
    pub fn new(note_id: NoteId, tag_id: TagId) -> Self {
        Self { note_id, tag_id }
    }
}

/// A note together with every tag currently associated with it.
///
/// Always computed at read time; never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteWithTags {
    pub note: Note,
    /// Ordered by name, then id
    pub tags: Vec<Tag>,
}

impl NoteWithTags {
    pub fn has_tag(&self, tag_id: TagId) -> bool {
        self.tags.iter().any(|t| t.id == tag_id)
    }

    pub fn tag_names(&self) -> Vec<&str> {
        self.tags.iter().map(|t| t.name.as_str()).collect()
    }
}

/// Convert a stored millisecond timestamp to a UTC datetime.
///
/// Out-of-range values fall back to the Unix epoch.
pub(crate) fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_else(|| {
        tracing::warn!("Timestamp {} ms is out of range, using the epoch", ms);
        DateTime::<Utc>::default()
    })
}
