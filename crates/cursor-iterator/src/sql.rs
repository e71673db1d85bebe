//! Statements issued by the iterator against the cursor.
//!
//! The iterator only ever generates `DECLARE`, `FETCH` and `MOVE`; the
//! transaction itself is opened and rolled back by the [`Connector`](crate::connector::Connector)
//! implementation. No `COMMIT` is generated anywhere.

use crate::error::BuildError;

pub const DEFAULT_CURSOR_NAME: &str = "curs";

/// `DECLARE <name> SCROLL CURSOR FOR <query>`
///
/// The cursor is scrollable so a fetch abandoned on timeout can be undone
/// with [`move_absolute`] before it is retried.
pub fn declare_cursor(name: &str, query: &str) -> String {
    format!("DECLARE {name} SCROLL CURSOR FOR {query}")
}

/// `FETCH <count> IN <name>`
pub fn fetch_forward(name: &str, count: usize) -> String {
    format!("FETCH {count} IN {name}")
}

/// `MOVE ABSOLUTE <position> IN <name>`: leaves the cursor on row `position`,
/// so the next fetch starts right after it. Position 0 is before the first row.
pub fn move_absolute(name: &str, position: u64) -> String {
    format!("MOVE ABSOLUTE {position} IN {name}")
}

/// Cursor names are spliced into SQL verbatim, so only plain identifiers are accepted.
pub fn validate_cursor_name(name: &str) -> Result<(), BuildError> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };

    if valid {
        Ok(())
    } else {
        Err(BuildError::InvalidCursorName(name.to_string()))
    }
}
