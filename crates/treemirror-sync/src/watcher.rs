//! File watching and rename stitching
//!
//! [`EventSource`] wraps the `notify` crate to monitor one tree recursively
//! and forwards raw OS events through a bounded channel.
//!
//! [`RenameStitcher`] turns those raw events into [`FileEvent`] values. The
//! inotify backend reports a rename as separate "from" and "to" halves that
//! share a cookie; the stitcher pairs them into a single
//! [`FileEvent::Moved`] so a renamed directory keeps its backup contents.
//!
//! ## Architecture
//!
//! ```text
//! inotify
//!    │
//!    ▼
//! EventSource ──→ mpsc<notify::Event> ──→ intake (RenameStitcher) ──→ EventQueue ──→ worker
//! ```

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use notify::event::{ModifyKind, RenameMode};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use treemirror_core::config::MAX_QUEUE_CAPACITY;
use treemirror_core::domain::FileEvent;

// ============================================================================
// EventSource
// ============================================================================

/// Watches one directory tree using the OS-native mechanism
///
/// On Linux this is inotify. Dropping the source (or calling
/// [`stop`](EventSource::stop)) stops watching and closes the channel
/// returned by [`watch`](EventSource::watch) once the notify thread exits.
pub struct EventSource {
    /// The underlying notify watcher instance
    watcher: RecommendedWatcher,
    root: PathBuf,
}

impl EventSource {
    /// Starts watching `root` recursively
    ///
    /// Returns the source and a receiver yielding raw `notify` events. When
    /// the channel is full the notify thread blocks, and the kernel queues
    /// further events until the intake catches up.
    ///
    /// # Errors
    /// Returns an error if the watcher cannot be created or `root` cannot be
    /// watched (missing path, insufficient permissions, watch limit reached)
    pub fn watch(root: &Path, capacity: usize) -> Result<(Self, mpsc::Receiver<notify::Event>)> {
        let (tx, rx) = mpsc::channel::<notify::Event>(capacity.clamp(1, MAX_QUEUE_CAPACITY));
        let mut receiver_gone = false;

        let mut watcher = RecommendedWatcher::new(
            move |res: std::result::Result<notify::Event, notify::Error>| match res {
                Ok(event) => {
                    if tx.blocking_send(event).is_err() && !receiver_gone {
                        receiver_gone = true;
                        warn!("Event intake has stopped, dropping notifications");
                    }
                }
                Err(err) => {
                    error!(error = %err, "File watcher error");
                }
            },
            notify::Config::default(),
        )
        .context("Failed to create file watcher")?;

        watcher
            .watch(root, RecursiveMode::Recursive)
            .with_context(|| format!("Failed to watch path: {}", root.display()))?;

        info!(path = %root.display(), "Started recursive watch");

        Ok((
            Self {
                watcher,
                root: root.to_path_buf(),
            },
            rx,
        ))
    }

    /// The watched root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Stops watching. Events already delivered stay in the channel.
    pub fn stop(mut self) {
        if let Err(e) = self.watcher.unwatch(&self.root) {
            // The root itself may have been deleted, which removes the watch.
            debug!(path = %self.root.display(), error = %e, "Unwatch failed");
        }
        info!(path = %self.root.display(), "Stopped watch");
    }
}

// ============================================================================
// Event mapping - notify::Event → FileEvent
// ============================================================================

/// Converts a non-rename `notify::Event` into a [`FileEvent`]
///
/// - `Create(*)` -> `Created`
/// - `Modify(Data | Metadata | Any | Other)` -> `Modified`
/// - `Modify(Name(Any | Other))` -> `Modified` (backends without rename pairing)
/// - `Remove(*)` -> `Deleted`
///
/// Rename halves are handled by [`RenameStitcher`]. Access events and
/// events without a path are ignored.
pub fn map_notify_event(event: &notify::Event) -> Option<FileEvent> {
    if event.need_rescan() {
        warn!(
            kind = ?event.kind,
            "Kernel event queue overflowed, changes may have been missed"
        );
        return None;
    }

    let path = event.paths.first()?.clone();

    match &event.kind {
        EventKind::Create(_) => Some(FileEvent::Created(path)),
        EventKind::Remove(_) => Some(FileEvent::Deleted(path)),
        EventKind::Modify(ModifyKind::Name(RenameMode::Any | RenameMode::Other)) => {
            Some(FileEvent::Modified(path))
        }
        EventKind::Modify(ModifyKind::Name(_)) => None,
        EventKind::Modify(_) => Some(FileEvent::Modified(path)),
        EventKind::Other => {
            warn!(path = %path.display(), "Unrecognized event from watcher");
            None
        }
        EventKind::Access(_) | EventKind::Any => {
            debug!(kind = ?event.kind, "Ignoring event kind");
            None
        }
    }
}

// ============================================================================
// RenameStitcher
// ============================================================================

/// A "from" half waiting for its "to" half
#[derive(Debug)]
struct PendingRename {
    tracker: Option<usize>,
    from: PathBuf,
    seen_at: Instant,
}

/// Pairs rename halves into [`FileEvent::Moved`]
///
/// - "from" is held until its "to" arrives (same tracker)
/// - "to" with a held "from" emits `Moved`; a following "both" for the same
///   pair is suppressed
/// - "both" without a held "from" emits `Moved`
/// - "to" alone means something was moved into the tree: `Created`
/// - "from" alone means something was moved out of the tree: `Deleted`,
///   emitted once `pair_timeout` expires
///
/// Events for unrelated paths pass straight through while a half is held.
/// An event touching a held path (the path itself, an ancestor or a
/// descendant) resolves that half as `Deleted` first, so per-path order
/// is preserved.
#[derive(Debug)]
pub struct RenameStitcher {
    pending: Vec<PendingRename>,
    /// Last pair emitted from a "to" half
    last_pair: Option<(PathBuf, PathBuf)>,
    pair_timeout: Duration,
}

impl RenameStitcher {
    pub fn new(pair_timeout: Duration) -> Self {
        Self {
            pending: Vec::new(),
            last_pair: None,
            pair_timeout,
        }
    }

    /// Feeds one raw event, returning the events it resolves, in order
    pub fn push(&mut self, event: notify::Event, now: Instant) -> Vec<FileEvent> {
        let tracker = event.tracker();

        match event.kind {
            EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
                let Some(from) = event.paths.into_iter().next() else {
                    return Vec::new();
                };
                debug!(path = %from.display(), ?tracker, "Holding rename source");
                self.last_pair = None;
                // A second rename of a held path: the earlier half is stale.
                let out = self.flush_touching(&[&from]);
                self.pending.push(PendingRename {
                    tracker,
                    from,
                    seen_at: now,
                });
                out
            }

            EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
                let Some(to) = event.paths.into_iter().next() else {
                    return Vec::new();
                };
                let matched = tracker.and_then(|t| {
                    self.pending
                        .iter()
                        .position(|p| p.tracker == Some(t))
                        .map(|i| self.pending.remove(i))
                });

                match matched {
                    Some(pending) => {
                        let mut out = self.flush_touching(&[&pending.from, &to]);
                        debug!(
                            from = %pending.from.display(),
                            to = %to.display(),
                            "Stitched rename"
                        );
                        self.last_pair = Some((pending.from.clone(), to.clone()));
                        out.push(FileEvent::Moved {
                            from: pending.from,
                            to,
                        });
                        out
                    }
                    None => {
                        let mut out = self.flush_touching(&[&to]);
                        debug!(path = %to.display(), "Rename into tree, treating as Created");
                        self.last_pair = None;
                        out.push(FileEvent::Created(to));
                        out
                    }
                }
            }

            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
                let mut paths = event.paths.into_iter();
                let (Some(from), Some(to)) = (paths.next(), paths.next()) else {
                    return Vec::new();
                };
                if self.last_pair.as_ref() == Some(&(from.clone(), to.clone())) {
                    self.last_pair = None;
                    return Vec::new();
                }
                // The backend reported the pair in one event; drop the
                // matching half if it was delivered separately.
                self.pending.retain(|p| p.from != from);
                let mut out = self.flush_touching(&[&from, &to]);
                out.push(FileEvent::Moved { from, to });
                out
            }

            _ => {
                let Some(mapped) = map_notify_event(&event) else {
                    return Vec::new();
                };
                let mut out = self.flush_touching(&[mapped.source_path()]);
                out.push(mapped);
                out
            }
        }
    }

    /// Resolves "from" halves older than the pair timeout as deletions
    pub fn expire(&mut self, now: Instant) -> Vec<FileEvent> {
        let timeout = self.pair_timeout;
        let (expired, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(|p| now.saturating_duration_since(p.seen_at) >= timeout);
        self.pending = waiting;
        expired
            .into_iter()
            .map(|p| Self::moved_out(p.from))
            .collect()
    }

    /// Resolves held halves that overlap any of `paths` as deletions
    fn flush_touching(&mut self, paths: &[&Path]) -> Vec<FileEvent> {
        if self.pending.is_empty() {
            return Vec::new();
        }
        let (touching, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(|p| {
                paths
                    .iter()
                    .any(|path| path.starts_with(&p.from) || p.from.starts_with(path))
            });
        self.pending = rest;
        touching
            .into_iter()
            .map(|p| Self::moved_out(p.from))
            .collect()
    }

    /// Resolves every held "from" half as a deletion
    pub fn flush(&mut self) -> Vec<FileEvent> {
        self.pending
            .drain(..)
            .map(|p| Self::moved_out(p.from))
            .collect()
    }

    /// Number of "from" halves waiting for a partner
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    fn moved_out(from: PathBuf) -> FileEvent {
        debug!(path = %from.display(), "Rename out of tree, treating as Deleted");
        FileEvent::Deleted(from)
    }
}

// ============================================================================
// Unit tests
// ============================================================================

#[cfg(test)]
mod tests {
    use notify::event::{
        AccessKind, CreateKind, DataChange, Flag, MetadataKind, RemoveKind,
    };
    use notify::Event;
    use tempfile::TempDir;

    use super::*;

    fn from(path: &str, tracker: usize) -> Event {
        Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::From)))
            .add_path(PathBuf::from(path))
            .set_tracker(tracker)
    }

    fn to(path: &str, tracker: usize) -> Event {
        Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::To)))
            .add_path(PathBuf::from(path))
            .set_tracker(tracker)
    }

    fn both(old: &str, new: &str, tracker: usize) -> Event {
        Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
            .add_path(PathBuf::from(old))
            .add_path(PathBuf::from(new))
            .set_tracker(tracker)
    }

    fn created(path: &str) -> Event {
        Event::new(EventKind::Create(CreateKind::File)).add_path(PathBuf::from(path))
    }

    fn moved(old: &str, new: &str) -> FileEvent {
        FileEvent::Moved {
            from: PathBuf::from(old),
            to: PathBuf::from(new),
        }
    }

    // ------------------------------------------------------------------
    // map_notify_event
    // ------------------------------------------------------------------

    #[test]
    fn test_map_create() {
        let event = created("/data/a.db");
        assert_eq!(
            map_notify_event(&event),
            Some(FileEvent::Created(PathBuf::from("/data/a.db")))
        );
    }

    #[test]
    fn test_map_modify_data_and_metadata() {
        let data = Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Content)))
            .add_path(PathBuf::from("/data/a.db"));
        let meta = Event::new(EventKind::Modify(ModifyKind::Metadata(
            MetadataKind::Ownership,
        )))
        .add_path(PathBuf::from("/data/a.db"));

        assert_eq!(
            map_notify_event(&data),
            Some(FileEvent::Modified(PathBuf::from("/data/a.db")))
        );
        assert_eq!(
            map_notify_event(&meta),
            Some(FileEvent::Modified(PathBuf::from("/data/a.db")))
        );
    }

    #[test]
    fn test_map_remove() {
        let event = Event::new(EventKind::Remove(RemoveKind::Folder))
            .add_path(PathBuf::from("/data/dir"));
        assert_eq!(
            map_notify_event(&event),
            Some(FileEvent::Deleted(PathBuf::from("/data/dir")))
        );
    }

    #[test]
    fn test_map_ignores_access_and_pathless() {
        let access = Event::new(EventKind::Access(AccessKind::Any))
            .add_path(PathBuf::from("/data/a.db"));
        let pathless = Event::new(EventKind::Create(CreateKind::Any));

        assert_eq!(map_notify_event(&access), None);
        assert_eq!(map_notify_event(&pathless), None);
    }

    #[test]
    fn test_map_ignores_rescan() {
        let event = Event::new(EventKind::Other)
            .add_path(PathBuf::from("/data"))
            .set_flag(Flag::Rescan);
        assert_eq!(map_notify_event(&event), None);
    }

    // ------------------------------------------------------------------
    // RenameStitcher
    // ------------------------------------------------------------------

    #[test]
    fn test_inotify_rename_sequence_yields_single_move() {
        let mut s = RenameStitcher::new(Duration::from_millis(500));
        let now = Instant::now();

        assert!(s.push(from("/data/b", 7), now).is_empty());
        assert_eq!(s.push(to("/data/c", 7), now), vec![moved("/data/b", "/data/c")]);
        assert!(s.push(both("/data/b", "/data/c", 7), now).is_empty());
        assert_eq!(s.pending_count(), 0);
    }

    #[test]
    fn test_both_without_halves_yields_move() {
        let mut s = RenameStitcher::new(Duration::from_millis(500));
        let out = s.push(both("/data/b", "/data/c", 1), Instant::now());
        assert_eq!(out, vec![moved("/data/b", "/data/c")]);
    }

    #[test]
    fn test_unpaired_to_is_created() {
        let mut s = RenameStitcher::new(Duration::from_millis(500));
        let out = s.push(to("/data/incoming", 3), Instant::now());
        assert_eq!(out, vec![FileEvent::Created(PathBuf::from("/data/incoming"))]);
    }

    #[test]
    fn test_unpaired_from_expires_as_deleted() {
        let mut s = RenameStitcher::new(Duration::from_millis(500));
        let start = Instant::now();

        s.push(from("/data/leaving", 4), start);
        assert!(s.expire(start + Duration::from_millis(100)).is_empty());
        assert_eq!(s.pending_count(), 1);

        let out = s.expire(start + Duration::from_millis(500));
        assert_eq!(out, vec![FileEvent::Deleted(PathBuf::from("/data/leaving"))]);
        assert_eq!(s.pending_count(), 0);
    }

    #[test]
    fn test_unrelated_event_between_halves_keeps_move() {
        let mut s = RenameStitcher::new(Duration::from_secs(60));
        let now = Instant::now();

        assert!(s.push(from("/data/Movies/a.bundle", 7), now).is_empty());
        assert_eq!(
            s.push(created("/data/other/x.jpg"), now),
            vec![FileEvent::Created(PathBuf::from("/data/other/x.jpg"))]
        );
        assert_eq!(s.pending_count(), 1);
        assert_eq!(
            s.push(to("/data/Movies/b.bundle", 7), now),
            vec![moved("/data/Movies/a.bundle", "/data/Movies/b.bundle")]
        );
        assert_eq!(s.pending_count(), 0);
    }

    #[test]
    fn test_event_under_held_path_resolves_it_first() {
        let mut s = RenameStitcher::new(Duration::from_secs(60));
        let now = Instant::now();

        s.push(from("/data/leaving", 4), now);
        let out = s.push(created("/data/leaving/new.db"), now);

        assert_eq!(
            out,
            vec![
                FileEvent::Deleted(PathBuf::from("/data/leaving")),
                FileEvent::Created(PathBuf::from("/data/leaving/new.db")),
            ]
        );
        assert_eq!(s.pending_count(), 0);
    }

    #[test]
    fn test_move_onto_held_path_deletes_it_first() {
        let mut s = RenameStitcher::new(Duration::from_secs(60));
        let now = Instant::now();

        // x moved out of the tree, then y renamed over the old name x
        s.push(from("/data/x", 1), now);
        s.push(from("/data/y", 2), now);
        let out = s.push(to("/data/x", 2), now);

        assert_eq!(
            out,
            vec![
                FileEvent::Deleted(PathBuf::from("/data/x")),
                moved("/data/y", "/data/x"),
            ]
        );
        assert_eq!(s.pending_count(), 0);
    }

    #[test]
    fn test_expire_keeps_fresh_halves() {
        let mut s = RenameStitcher::new(Duration::from_millis(500));
        let start = Instant::now();

        s.push(from("/data/old", 1), start);
        s.push(from("/data/new", 2), start + Duration::from_millis(400));

        let out = s.expire(start + Duration::from_millis(600));
        assert_eq!(out, vec![FileEvent::Deleted(PathBuf::from("/data/old"))]);
        assert_eq!(s.pending_count(), 1);
        assert_eq!(
            s.push(to("/data/renamed", 2), start + Duration::from_millis(650)),
            vec![moved("/data/new", "/data/renamed")]
        );
    }

    #[test]
    fn test_flush_resolves_everything() {
        let mut s = RenameStitcher::new(Duration::from_secs(60));
        let now = Instant::now();
        s.push(from("/data/x", 1), now);
        s.push(from("/data/y", 2), now);

        let out = s.flush();
        assert_eq!(
            out,
            vec![
                FileEvent::Deleted(PathBuf::from("/data/x")),
                FileEvent::Deleted(PathBuf::from("/data/y")),
            ]
        );
    }

    #[test]
    fn test_repeated_rename_is_not_suppressed() {
        let mut s = RenameStitcher::new(Duration::from_millis(500));
        let now = Instant::now();

        // b -> c, then later c -> b -> c again reported only as "both"
        s.push(from("/data/b", 1), now);
        s.push(to("/data/c", 1), now);
        s.push(both("/data/b", "/data/c", 1), now);

        let out = s.push(both("/data/b", "/data/c", 9), now);
        assert_eq!(out, vec![moved("/data/b", "/data/c")]);
    }

    // ------------------------------------------------------------------
    // EventSource
    // ------------------------------------------------------------------

    #[test]
    fn test_watch_missing_root_fails() {
        let dir = TempDir::new().unwrap();
        let result = EventSource::watch(&dir.path().join("missing"), 16);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_watch_delivers_create_event() {
        let dir = TempDir::new().unwrap();
        let (source, mut rx) = EventSource::watch(dir.path(), 16).unwrap();
        assert_eq!(source.root(), dir.path());

        let file = dir.path().join("new.db");
        std::fs::write(&file, b"x").unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let event = rx.recv().await.expect("channel open");
                if matches!(event.kind, EventKind::Create(_)) {
                    return event;
                }
            }
        })
        .await
        .expect("create event within timeout");

        assert_eq!(event.paths.first(), Some(&file));
        source.stop();
    }
}
