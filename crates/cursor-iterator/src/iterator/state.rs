/// Where an iterator stands in its lifetime.
///
/// Transitions only go forward: `NotStarted -> Active -> Exhausted`, or
/// straight to `Exhausted` on close or failure. Nothing revives an exhausted
/// iterator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorState {
    /// No transaction has been opened yet.
    NotStarted,

    /// The cursor is declared. `position` indexes the current value inside the
    /// first `filled` buffer slots. `filled` is zero only while the cursor is
    /// declared but its first batch has not arrived yet.
    Active { position: usize, filled: usize },

    /// Drained, failed or closed.
    Exhausted,
}

impl CursorState {
    /// Legacy index reported before the first value.
    pub const NOT_STARTED_INDEX: isize = -2;
    /// Legacy index reported once no value will ever be available again.
    pub const EXHAUSTED_INDEX: isize = -1;

    pub fn value_index(&self) -> Option<usize> {
        match *self {
            CursorState::Active { position, filled } if position < filled => Some(position),
            _ => None,
        }
    }

    /// The index encoded the way index-based loops expect it: a valid slot
    /// index, or one of the negative sentinels.
    pub fn raw_index(&self) -> isize {
        match *self {
            CursorState::Exhausted => Self::EXHAUSTED_INDEX,
            state => state
                .value_index()
                .map_or(Self::NOT_STARTED_INDEX, |index| index as isize),
        }
    }

    pub fn filled(&self) -> usize {
        match *self {
            CursorState::Active { filled, .. } => filled,
            _ => 0,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, CursorState::Exhausted)
    }

    /// Moves to the next unread slot of the current batch, without I/O.
    pub(crate) fn advance_in_batch(&mut self) -> Option<usize> {
        if let CursorState::Active { position, filled } = self
            && *position + 1 < *filled
        {
            *position += 1;
            return Some(*position);
        }
        None
    }
}

/// Outcome of one advance, tagged so callers don't have to infer retry
/// eligibility from the recorded error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// A value is available at this buffer index.
    Value(usize),

    /// The cursor is drained. No error was recorded.
    Done,

    /// A transient failure was recorded. The state did not change and the next
    /// advance retries the same operation with a fresh deadline.
    Retry,

    /// A fatal failure was recorded and the iterator is exhausted. Returned
    /// again by every later advance until the error is cleared by `close`.
    Failed,
}

impl Step {
    pub fn has_value(&self) -> bool {
        matches!(self, Step::Value(_))
    }

    pub fn index(&self) -> Option<usize> {
        match *self {
            Step::Value(index) => Some(index),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_index_sentinels() {
        assert_eq!(CursorState::NotStarted.raw_index(), -2);
        assert_eq!(CursorState::Exhausted.raw_index(), -1);
        assert_eq!(
            CursorState::Active {
                position: 0,
                filled: 0
            }
            .raw_index(),
            -2
        );
        assert_eq!(
            CursorState::Active {
                position: 3,
                filled: 4
            }
            .raw_index(),
            3
        );
    }

    #[test]
    fn test_advance_in_batch_stops_at_filled() {
        let mut state = CursorState::Active {
            position: 0,
            filled: 3,
        };
        assert_eq!(state.advance_in_batch(), Some(1));
        assert_eq!(state.advance_in_batch(), Some(2));
        assert_eq!(state.advance_in_batch(), None);
        assert_eq!(state.value_index(), Some(2));

        let mut state = CursorState::NotStarted;
        assert_eq!(state.advance_in_batch(), None);
        let mut state = CursorState::Exhausted;
        assert_eq!(state.advance_in_batch(), None);
    }

    #[test]
    fn test_filled_outside_active_is_zero() {
        assert_eq!(CursorState::NotStarted.filled(), 0);
        assert_eq!(CursorState::Exhausted.filled(), 0);
        assert!(CursorState::Exhausted.is_exhausted());
    }
}
