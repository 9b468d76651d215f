//! Input validation for Notes.
//!
//! This module provides validation functions for user inputs.
//! All validators return NoteError::Validation on failure.

use crate::error::{NoteError, NoteResult};

pub const MAX_NOTE_TITLE_LENGTH: usize = 1_000;
pub const MAX_NOTE_CONTENT_LENGTH: usize = 100_000; // 100KB of text
pub const MAX_TAG_NAME_LENGTH: usize = 100;
pub const MAX_SEARCH_QUERY_LENGTH: usize = 500;

/// True when neither the title nor the content has any visible text.
///
/// Adding such a note is a no-op.
pub fn is_blank_note(title: &str, content: &str) -> bool {
    title.trim().is_empty() && content.trim().is_empty()
}

/// Validate the text fields of a note.
///
/// Either field may be empty; only the length is limited.
pub fn validate_note_fields(title: &str, content: &str) -> NoteResult<()> {
    let title_len = title.chars().count();
    if title_len > MAX_NOTE_TITLE_LENGTH {
        return Err(NoteError::validation(
            "title",
            format!(
                "cannot exceed {} characters (got {})",
                MAX_NOTE_TITLE_LENGTH, title_len
            ),
        ));
    }

    let content_len = content.chars().count();
    if content_len > MAX_NOTE_CONTENT_LENGTH {
        return Err(NoteError::validation(
            "content",
            format!(
                "cannot exceed {} characters (got {})",
                MAX_NOTE_CONTENT_LENGTH, content_len
            ),
        ));
    }

    Ok(())
}

/// Validate a tag name.
///
/// Tag names must be:
/// - Non-empty after stripping whitespace
/// - No longer than MAX_TAG_NAME_LENGTH characters
pub fn validate_tag_name(name: &str) -> NoteResult<()> {
    let stripped = name.trim();

    if stripped.is_empty() {
        return Err(NoteError::validation(
            "tag_name",
            "cannot be empty or whitespace only",
        ));
    }

    let len = stripped.chars().count();
    if len > MAX_TAG_NAME_LENGTH {
        return Err(NoteError::validation(
            "tag_name",
            format!("cannot exceed {} characters (got {})", MAX_TAG_NAME_LENGTH, len),
        ));
    }

    Ok(())
}

/// Validate a search query. Blank queries are valid (they mean "no search").
pub fn validate_search_query(query: &str) -> NoteResult<()> {
    let len = query.chars().count();
    if len > MAX_SEARCH_QUERY_LENGTH {
        return Err(NoteError::validation(
            "search_query",
            format!(
                "cannot exceed {} characters (got {})",
                MAX_SEARCH_QUERY_LENGTH, len
            ),
        ));
    }
    Ok(())
}
