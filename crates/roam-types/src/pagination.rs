//! Message history windows.
//!
//! Message ids are monotonic and embed their creation time, so a range over
//! ids is a range over time. Every window comes back in chronological order.

use serde::Deserialize;

use crate::models::Snowflake;

pub const DEFAULT_LIMIT: u32 = 50;
pub const MAX_LIMIT: u32 = 100;

/// Raw `?around=&before=&after=&limit=` query.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessageQuery {
    pub around: Option<Snowflake>,
    pub before: Option<Snowflake>,
    pub after: Option<Snowflake>,
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anchor {
    /// No anchor: the newest messages.
    Latest,
    Around(Snowflake),
    Before(Snowflake),
    After(Snowflake),
}

/// A validated history request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    pub anchor: Anchor,
    pub limit: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CursorError {
    /// More than one of `around`, `before`, `after`.
    #[error("around, before and after are mutually exclusive")]
    ConflictingAnchors,
    #[error("limit {0} is outside 0..={MAX_LIMIT}")]
    LimitOutOfRange(i64),
}

impl TryFrom<&MessageQuery> for Cursor {
    type Error = CursorError;

    fn try_from(q: &MessageQuery) -> Result<Self, Self::Error> {
        let limit = match q.limit {
            None => DEFAULT_LIMIT,
            Some(l) if (0..=MAX_LIMIT as i64).contains(&l) => l as u32,
            Some(l) => return Err(CursorError::LimitOutOfRange(l)),
        };

        let anchor = match (q.around, q.before, q.after) {
            (None, None, None) => Anchor::Latest,
            (Some(x), None, None) => Anchor::Around(x),
            (None, Some(x), None) => Anchor::Before(x),
            (None, None, Some(x)) => Anchor::After(x),
            _ => return Err(CursorError::ConflictingAnchors),
        };

        Ok(Cursor { anchor, limit })
    }
}

impl Cursor {
    pub fn new(anchor: Anchor, limit: u32) -> Self {
        Self { anchor, limit }
    }

    /// Half-window size used on each side of an `around` anchor.
    pub fn half(&self) -> usize {
        (self.limit / 2) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(around: Option<i64>, before: Option<i64>, after: Option<i64>, limit: Option<i64>) -> MessageQuery {
        MessageQuery { around, before, after, limit }
    }

    #[test]
    fn test_half_floors_odd_limits() {
        assert_eq!(Cursor::new(Anchor::Around(1), 4).half(), 2);
        assert_eq!(Cursor::new(Anchor::Around(1), 3).half(), 1);
        assert_eq!(Cursor::new(Anchor::Around(1), 1).half(), 0);
    }

    #[test]
    fn test_query_defaults() {
        let c = Cursor::try_from(&query(None, None, None, None)).unwrap();
        assert_eq!(c, Cursor::new(Anchor::Latest, DEFAULT_LIMIT));
        let c = Cursor::try_from(&query(None, Some(9), None, Some(100))).unwrap();
        assert_eq!(c, Cursor::new(Anchor::Before(9), 100));
    }

    #[test]
    fn test_query_rejects_conflicting_anchors() {
        let err = Cursor::try_from(&query(None, Some(1), Some(2), None)).unwrap_err();
        assert_eq!(err, CursorError::ConflictingAnchors);
        let err = Cursor::try_from(&query(Some(1), Some(2), None, Some(10))).unwrap_err();
        assert_eq!(err, CursorError::ConflictingAnchors);
    }

    #[test]
    fn test_query_rejects_limit_out_of_range() {
        assert_eq!(
            Cursor::try_from(&query(None, None, None, Some(101))).unwrap_err(),
            CursorError::LimitOutOfRange(101)
        );
        assert_eq!(
            Cursor::try_from(&query(None, None, None, Some(-1))).unwrap_err(),
            CursorError::LimitOutOfRange(-1)
        );
        assert!(Cursor::try_from(&query(None, None, None, Some(0))).is_ok());
    }
}
