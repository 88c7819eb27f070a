//! K-way merge of per-vnode listing streams.
//!
//! The paginator repeatedly selects the lowest head record across every
//! vnode stream, so emitted keys are non-decreasing. With a delimiter
//! configured, runs of keys sharing a common prefix up to the delimiter
//! fold into a single group record, and every stream is advanced past the
//! folded range in one step.

use crate::page::{LimitMarkerStream, ListRecord, PageSource};
use reef_common::{Error, Result};

/// One emitted listing entry
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ListEntry<R> {
    /// A record from a vnode stream
    Record(R),
    /// A delimiter group covering every key that begins with `name`
    Group {
        /// Prefix + everything up to and including the delimiter
        name: String,
        /// Marker that resumes listing just past the group
        next_marker: String,
    },
}

impl<R: ListRecord> ListEntry<R> {
    /// The key this entry sorts by
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::Record(r) => r.key(),
            Self::Group { name, .. } => name,
        }
    }
}

/// Terminal state of a completed merge
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MergeOutcome {
    /// True when every stream was exhausted; false when the global limit
    /// stopped the merge early
    pub finished: bool,
}

struct Lane<P: PageSource> {
    vnode: u32,
    stream: LimitMarkerStream<P>,
    head: Option<P::Record>,
    dead: bool,
}

/// Merges limit-marker streams under a global limit with optional
/// prefix/delimiter grouping
pub struct MergePaginator<P: PageSource> {
    lanes: Vec<Lane<P>>,
    limit: usize,
    emitted: usize,
    prefix: String,
    delimiter: Option<char>,
    errors: Vec<(u32, Error)>,
}

impl<P: PageSource> MergePaginator<P> {
    /// Create a merge over `(vnode, stream)` pairs.
    ///
    /// Streams must already be positioned at (and filtered by) `prefix`;
    /// the merge uses the prefix only for delimiter grouping.
    pub fn new(
        streams: Vec<(u32, LimitMarkerStream<P>)>,
        limit: usize,
        prefix: Option<String>,
        delimiter: Option<char>,
    ) -> Self {
        Self {
            lanes: streams
                .into_iter()
                .map(|(vnode, stream)| Lane {
                    vnode,
                    stream,
                    head: None,
                    dead: false,
                })
                .collect(),
            limit,
            emitted: 0,
            prefix: prefix.unwrap_or_default(),
            delimiter,
            errors: Vec::new(),
        }
    }

    /// The next merged entry, or `None` when the limit is reached or all
    /// streams are exhausted. Stream errors are collected, not returned;
    /// an erroring stream drops out of the merge.
    pub async fn next_entry(&mut self) -> Option<ListEntry<P::Record>> {
        if self.emitted >= self.limit {
            return None;
        }
        self.fill_heads().await;

        let lowest = self
            .lanes
            .iter()
            .enumerate()
            .filter_map(|(i, lane)| lane.head.as_ref().map(|h| (i, h.key())))
            .min_by(|a, b| a.1.as_bytes().cmp(b.1.as_bytes()))
            .map(|(i, _)| i)?;

        if let Some(delimiter) = self.delimiter {
            let key = self.lanes[lowest].head.as_ref().unwrap().key();
            if let Some(group) = group_for(key, &self.prefix, delimiter) {
                self.advance_all(&group.next_marker).await;
                self.emitted += 1;
                return Some(ListEntry::Group {
                    name: group.name,
                    next_marker: group.next_marker,
                });
            }
        }

        let record = self.lanes[lowest].head.take().unwrap();
        self.emitted += 1;
        Some(ListEntry::Record(record))
    }

    /// Consume the merge and report the terminal state. If any stream
    /// erred, the error set takes precedence over the finished flag.
    pub async fn finish(mut self) -> Result<MergeOutcome> {
        if self.errors.is_empty() && self.emitted >= self.limit {
            // At the limit exactly as the data ran out still counts as
            // finished; probe the streams once to tell the difference.
            self.fill_heads().await;
        }
        if !self.errors.is_empty() {
            let mut errors = self.errors;
            if errors.len() == 1 {
                return Err(errors.pop().unwrap().1);
            }
            let combined = errors
                .iter()
                .map(|(vnode, e)| format!("vnode {vnode}: {e}"))
                .collect::<Vec<_>>()
                .join("; ");
            return Err(Error::internal(format!("listing failed on {combined}")));
        }
        let finished = self
            .lanes
            .iter()
            .all(|lane| lane.dead || (lane.head.is_none() && lane.stream.is_done()));
        Ok(MergeOutcome { finished })
    }

    /// Pull a head for every lane that lacks one
    async fn fill_heads(&mut self) {
        for lane in &mut self.lanes {
            if lane.head.is_some() || lane.dead {
                continue;
            }
            match lane.stream.next().await {
                Ok(Some(record)) => lane.head = Some(record),
                Ok(None) => {}
                Err(e) => {
                    lane.dead = true;
                    self.errors.push((lane.vnode, e));
                }
            }
        }
    }

    /// Advance every lane past a folded group
    async fn advance_all(&mut self, next_marker: &str) {
        for lane in &mut self.lanes {
            if lane.dead {
                continue;
            }
            if let Some(head) = &lane.head {
                if head.key() >= next_marker {
                    // Already past the group; keep the head.
                    continue;
                }
                lane.head = None;
            }
            if lane.stream.is_done() {
                continue;
            }
            if let Err(e) = lane.stream.advance_to(next_marker).await {
                lane.dead = true;
                self.errors.push((lane.vnode, e));
            }
        }
    }
}

struct Group {
    name: String,
    next_marker: String,
}

/// If `key` contains `delimiter` after `prefix`, the group record that
/// folds it
fn group_for(key: &str, prefix: &str, delimiter: char) -> Option<Group> {
    let stripped = key.strip_prefix(prefix).unwrap_or(key);
    let idx = stripped.find(delimiter)?;
    let before = &stripped[..idx];
    let after_delim = char::from_u32(delimiter as u32 + 1).expect("delimiter has a successor");
    Some(Group {
        name: format!("{prefix}{before}{delimiter}"),
        next_marker: format!("{prefix}{before}{after_delim}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::testing::VecSource;

    fn lanes(parts: &[&[&str]]) -> Vec<(u32, LimitMarkerStream<VecSource>)> {
        parts
            .iter()
            .enumerate()
            .map(|(i, keys)| {
                (
                    i as u32,
                    LimitMarkerStream::new(VecSource::new(keys), "", 64),
                )
            })
            .collect()
    }

    fn lanes_from(parts: &[&[&str]], marker: &str) -> Vec<(u32, LimitMarkerStream<VecSource>)> {
        parts
            .iter()
            .enumerate()
            .map(|(i, keys)| {
                (
                    i as u32,
                    LimitMarkerStream::new(VecSource::new(keys), marker, 64),
                )
            })
            .collect()
    }

    async fn run(
        mut merge: MergePaginator<VecSource>,
    ) -> (Vec<ListEntry<String>>, Result<MergeOutcome>) {
        let mut entries = Vec::new();
        while let Some(entry) = merge.next_entry().await {
            entries.push(entry);
        }
        let outcome = merge.finish().await;
        (entries, outcome)
    }

    fn keys(entries: &[ListEntry<String>]) -> Vec<&str> {
        entries.iter().map(|e| e.key()).collect()
    }

    #[tokio::test]
    async fn test_merge_is_sorted() {
        let merge = MergePaginator::new(
            lanes(&[&["b", "e", "h"], &["a", "f"], &["c", "d", "g"]]),
            100,
            None,
            None,
        );
        let (entries, outcome) = run(merge).await;
        assert_eq!(keys(&entries), vec!["a", "b", "c", "d", "e", "f", "g", "h"]);
        assert!(outcome.unwrap().finished);
    }

    #[tokio::test]
    async fn test_global_limit_stops_early() {
        let merge = MergePaginator::new(lanes(&[&["a", "c"], &["b", "d"]]), 3, None, None);
        let (entries, outcome) = run(merge).await;
        assert_eq!(keys(&entries), vec!["a", "b", "c"]);
        assert!(!outcome.unwrap().finished);
    }

    #[tokio::test]
    async fn test_limit_equal_to_total_is_finished() {
        let merge = MergePaginator::new(lanes(&[&["a"], &["b"]]), 2, None, None);
        let (entries, outcome) = run(merge).await;
        assert_eq!(entries.len(), 2);
        assert!(outcome.unwrap().finished);
    }

    #[tokio::test]
    async fn test_prefix_with_delimiter_no_fold_inside_prefix() {
        // Spec scenario: prefix "dir1/" strips entirely; the remainder
        // has no delimiter, so plain records come out.
        let merge = MergePaginator::new(
            lanes_from(
                &[&["dir1/a.txt", "dir1/c.txt"], &["dir1/b.txt"]],
                "dir1/",
            ),
            100,
            Some("dir1/".to_string()),
            Some('/'),
        );
        let (entries, outcome) = run(merge).await;
        assert_eq!(
            keys(&entries),
            vec!["dir1/a.txt", "dir1/b.txt", "dir1/c.txt"]
        );
        assert!(entries
            .iter()
            .all(|e| matches!(e, ListEntry::Record(_))));
        assert!(outcome.unwrap().finished);
    }

    #[tokio::test]
    async fn test_partial_prefix_folds_to_single_group() {
        // Spec scenario: prefix "dir1" + delimiter '/' folds all of
        // dir1/* into one group record.
        let merge = MergePaginator::new(
            lanes_from(
                &[&["dir1/a.txt", "dir1/c.txt"], &["dir1/b.txt"]],
                "dir1",
            ),
            100,
            Some("dir1".to_string()),
            Some('/'),
        );
        let (entries, outcome) = run(merge).await;
        assert_eq!(entries.len(), 1);
        assert_eq!(
            entries[0],
            ListEntry::Group {
                name: "dir1/".to_string(),
                next_marker: "dir10".to_string(), // '0' is '/' + 1
            }
        );
        assert!(outcome.unwrap().finished);
    }

    #[tokio::test]
    async fn test_groups_and_records_interleave_sorted() {
        let merge = MergePaginator::new(
            lanes(&[&["a/1", "a/2", "b", "c/1"], &["a/3", "d"]]),
            100,
            None,
            Some('/'),
        );
        let (entries, outcome) = run(merge).await;
        assert_eq!(keys(&entries), vec!["a/", "b", "c/", "d"]);
        assert!(matches!(entries[0], ListEntry::Group { .. }));
        assert!(matches!(entries[1], ListEntry::Record(_)));
        assert!(matches!(entries[2], ListEntry::Group { .. }));
        assert!(outcome.unwrap().finished);
    }

    #[tokio::test]
    async fn test_no_consecutive_duplicate_groups() {
        let merge = MergePaginator::new(
            lanes(&[&["p/a", "p/b"], &["p/c", "p/d"], &["p/e"]]),
            100,
            None,
            Some('/'),
        );
        let (entries, _) = run(merge).await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].key(), "p/");
    }

    #[tokio::test]
    async fn test_group_counts_one_against_limit() {
        let merge = MergePaginator::new(
            lanes(&[&["a/1", "a/2", "b", "c"]]),
            2,
            None,
            Some('/'),
        );
        let (entries, outcome) = run(merge).await;
        assert_eq!(keys(&entries), vec!["a/", "b"]);
        assert!(!outcome.unwrap().finished);
    }

    #[tokio::test]
    async fn test_emitted_keys_non_decreasing() {
        let merge = MergePaginator::new(
            lanes(&[&["a", "m/x", "m/y", "z"], &["b", "m/q", "n"]]),
            100,
            None,
            Some('/'),
        );
        let (entries, _) = run(merge).await;
        let ks = keys(&entries);
        for pair in ks.windows(2) {
            assert!(pair[0] <= pair[1], "{pair:?} out of order");
        }
    }

    #[tokio::test]
    async fn test_stream_error_surfaces_from_finish() {
        let mut bad = VecSource::new(&["a", "b"]);
        bad.fail_on_page = Some(0);
        let streams = vec![
            (0, LimitMarkerStream::new(VecSource::new(&["c"]), "", 64)),
            (1, LimitMarkerStream::new(bad, "", 64)),
        ];
        let merge = MergePaginator::new(streams, 100, None, None);
        let (entries, outcome) = run(merge).await;
        // The healthy stream still contributed.
        assert_eq!(keys(&entries), vec!["c"]);
        let err = outcome.unwrap_err();
        assert_eq!(err.code(), "ServiceUnavailableError");
    }

    #[tokio::test]
    async fn test_empty_streams_finish_immediately() {
        let merge = MergePaginator::new(lanes(&[&[], &[]]), 100, None, None);
        let (entries, outcome) = run(merge).await;
        assert!(entries.is_empty());
        assert!(outcome.unwrap().finished);
    }
}
