//! Multipart coalescing.
//!
//! Split-archive uploads (`.part01`, `.001`, ...) from one user are
//! gathered into a per-user bucket. Each new part resets a quiescence
//! timer; when the timer fires, the full set is announced so the chat
//! surface can present the quality picker against it.

use std::sync::LazyLock;

use regex::Regex;

use revenc_core::domain::MessageRef;

static SPLIT_PART: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\.(part\d+|\d{3})$").expect("static pattern"));

/// Whether a filename looks like one piece of a split archive.
#[must_use]
pub fn is_split_part(file_name: &str) -> bool {
    SPLIT_PART.is_match(file_name)
}

/// Announcement that a user's part set has gone quiet.
///
/// The refs are sorted by ascending message id, ready for a
/// confirmation prompt and eventual submission as one job.
#[derive(Clone, Debug)]
pub struct PartsReady {
    /// The collecting user.
    pub user_id: i64,
    /// All collected parts in message-id order.
    pub message_refs: Vec<MessageRef>,
}

/// What happened to an incoming media message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CollectOutcome {
    /// Not a split part; present the picker for it directly.
    NotSplitPart,
    /// Added to the user's bucket; the coalesce timer was reset.
    Collected {
        /// How many parts the bucket now holds.
        parts: usize,
    },
}

/// One user's in-flight part collection.
#[derive(Default)]
pub(crate) struct PendingBucket {
    pub refs: Vec<MessageRef>,
    pub timer: Option<tokio::task::JoinHandle<()>>,
}

impl PendingBucket {
    /// Snapshot the refs in ascending message-id order.
    pub fn sorted_refs(&self) -> Vec<MessageRef> {
        let mut refs = self.refs.clone();
        refs.sort_by_key(|r| r.message_id);
        refs
    }
}

impl Drop for PendingBucket {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_part_patterns() {
        assert!(is_split_part("movie.mkv.part1"));
        assert!(is_split_part("movie.mkv.PART12"));
        assert!(is_split_part("movie.mkv.001"));
        assert!(is_split_part("archive.7z.042"));

        assert!(!is_split_part("movie.mkv"));
        assert!(!is_split_part("movie.part1.mkv"));
        assert!(!is_split_part("season.12.mkv"));
    }

    #[test]
    fn bucket_sorts_by_message_id() {
        let bucket = PendingBucket {
            refs: vec![
                MessageRef::new(1, 5003),
                MessageRef::new(1, 5001),
                MessageRef::new(1, 5002),
            ],
            timer: None,
        };
        let sorted: Vec<i64> = bucket.sorted_refs().iter().map(|r| r.message_id).collect();
        assert_eq!(sorted, vec![5001, 5002, 5003]);
    }
}
