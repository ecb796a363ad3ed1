//! The control loop: consumes filesystem notifications and timer ticks, and
//! dispatches them to the watch set, the reconciler and the reader.

use std::fmt;
use std::io;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::fs;
use tokio::sync::mpsc;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::classify;
use crate::config::Config;
use crate::error::TailError;
use crate::events::{FsEvent, WatchSet};
use crate::pattern::Matcher;
use crate::queue::{line_queue, LineReceiver, LineSender};
use crate::reader::{tail_last_lines, trim_cr, truncate_line, IncrementalReader, Line};
use crate::state::{FileState, FileStateStore};

/// Receiving end of the error queue.
pub type ErrorReceiver = mpsc::Receiver<TailError>;

/// Lifecycle of a [`Tailer`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Phase {
    Idle,
    Running,
    ShuttingDown,
    Stopped,
}

type SharedPhase = Arc<Mutex<Phase>>;

/// Where a newly registered file starts being read.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum StartAt {
    /// Whole file, last N lines or end of file, per the configuration.
    Configured,
    /// End of file. Used for files renamed into place, whose content was
    /// typically delivered under their previous name.
    End,
}

/// Engine state owned by the control loop.
pub(crate) struct Engine {
    pub(crate) config: Config,
    pub(crate) matcher: Matcher,
    pub(crate) reader: IncrementalReader,
    pub(crate) watches: WatchSet,
    pub(crate) store: FileStateStore,
    lines: LineSender,
    errors: mpsc::Sender<TailError>,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("root", &self.config.root)
            .field("watches", &self.watches)
            .field("files", &self.store.len())
            .finish()
    }
}

impl Engine {
    /// Builds an engine from a resolved configuration, returning it together
    /// with the consumer ends of its output queues.
    pub(crate) fn new(config: Config) -> Result<(Self, LineReceiver, ErrorReceiver), TailError> {
        let matcher = Matcher::compile(
            &config.root,
            &config.include,
            &config.exclude,
            config.force_regex,
        )?;
        let watches = WatchSet::new()?;
        let (lines, lines_rx) = line_queue(config.line_capacity);
        let (errors, errors_rx) = mpsc::channel(config.error_capacity.max(1));

        let engine = Engine {
            reader: IncrementalReader::new(config.max_line_bytes),
            matcher,
            watches,
            store: FileStateStore::new(),
            lines,
            errors,
            config,
        };
        Ok((engine, lines_rx, errors_rx))
    }

    async fn run(
        mut self,
        shutdown: CancellationToken,
        phase: SharedPhase,
        done: CancellationToken,
    ) {
        // Cancels `done` even if the loop unwinds.
        let _done = done.drop_guard();

        let mut ticker = (!self.config.scan_interval.is_zero()).then(|| {
            let period = self.config.scan_interval;
            let mut ticker = time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => break,

                event = self.watches.next_event() => match event {
                    Some(Ok(event)) => {
                        for ev in FsEvent::from_notify(event) {
                            self.handle_event(ev).await;
                        }
                    }
                    Some(Err(err)) => self.send_err(TailError::Notify(err)),
                    None => break,
                },

                _ = next_tick(&mut ticker) => {
                    if let Err(err) = self.scan_and_register().await {
                        self.send_err(err);
                    }
                }
            }
        }

        *phase.lock() = Phase::ShuttingDown;
        tracing::info!(root = %self.config.root.display(), "shutting down");

        let Engine {
            watches,
            lines,
            errors,
            ..
        } = self;
        drop(watches);
        lines.close();
        drop(errors);

        *phase.lock() = Phase::Stopped;
    }

    pub(crate) async fn handle_event(&mut self, event: FsEvent) {
        match event {
            FsEvent::Remove(path) => self.forget(&path),
            FsEvent::Create(path) => self.handle_create(&path, StartAt::Configured).await,
            FsEvent::RenamedTo(path) => self.handle_create(&path, StartAt::End).await,
            FsEvent::Write(path) => self.handle_write(&path).await,
        }
    }

    async fn handle_create(&mut self, path: &Path, start: StartAt) {
        let Ok(meta) = fs::symlink_metadata(path).await else {
            return;
        };

        if meta.is_dir() {
            if !self.config.recursive {
                return;
            }
            if let Err(err) = self.watches.add(path) {
                self.send_err(err);
            }
            match self.walk(path, |_, _| true).await {
                Ok((_, Some(err))) => self.send_err(TailError::Walk(err)),
                Ok((_, None)) => {}
                Err(err) => self.send_err(err),
            }
        } else if meta.is_file() {
            self.register_file(path, start).await;
        }
    }

    async fn handle_write(&mut self, path: &Path) {
        if self.store.contains(path) {
            self.catch_up(path).await;
            return;
        }
        // The create notification was missed or coalesced.
        if fs::symlink_metadata(path).await.map_or(false, |m| m.is_file()) {
            self.register_file(path, StartAt::Configured).await;
        }
    }

    /// Stops tracking `path` and, if it was a directory, everything beneath it.
    pub(crate) fn forget(&mut self, path: &Path) {
        let removed_file = self.store.remove(path);
        let removed_dir = self.watches.remove(path);
        let nested_dirs = self.watches.remove_under(path);
        let nested_files = self.store.remove_under(path);

        if removed_file || removed_dir || nested_files > 0 || nested_dirs > 0 {
            tracing::debug!(
                path = %path.display(),
                nested_files,
                nested_dirs,
                "stopped tracking"
            );
        }
    }

    /// Reads whatever was appended to a tracked file since the last read.
    pub(crate) async fn catch_up(&mut self, path: &Path) {
        let Some(mut state) = self.store.get(path) else {
            return;
        };

        let display = self.display_path(path);
        let lines = &self.lines;
        let result = self
            .reader
            .read_new(path, &display, &mut state, |line| lines.push(line))
            .await;

        match result {
            Ok(()) => self.store.commit(path, state),
            Err(err) if err.kind() == io::ErrorKind::NotFound => self.forget(path),
            Err(err) => {
                self.store.commit(path, state);
                self.send_err(TailError::io(path, err));
            }
        }
    }

    /// Starts tracking `path` if it is an included text file. Returns whether
    /// the file is tracked afterwards.
    pub(crate) async fn register_file(&mut self, path: &Path, start: StartAt) -> bool {
        if self.store.contains(path) {
            return true;
        }
        if !self.matcher.matches(path) {
            return false;
        }
        // An explicit include list overrides the extension check.
        if !self.matcher.has_includes() && classify::has_binary_extension(path) {
            tracing::trace!(path = %path.display(), "skipping binary extension");
            return false;
        }

        match classify::is_text_file(path).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(path = %path.display(), "skipping binary file");
                return false;
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => return false,
            Err(err) => {
                self.send_err(TailError::io(path, err));
                return false;
            }
        }

        if !self.store.insert_new(path) {
            return true;
        }

        let mut state = FileState::default();
        let result = self.init_file(path, &mut state, start).await;
        self.store.commit(path, state);

        match result {
            Ok(()) => {
                tracing::debug!(path = %path.display(), "tracking file");
                true
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                self.store.remove(path);
                false
            }
            Err(err) => {
                self.send_err(TailError::io(path, err));
                true
            }
        }
    }

    /// Positions a freshly registered file: read it whole, or emit its last
    /// lines and park the offset at its end.
    async fn init_file(
        &mut self,
        path: &Path,
        state: &mut FileState,
        start: StartAt,
    ) -> io::Result<()> {
        let display = self.display_path(path);

        if start == StartAt::End || (!self.config.from_start && self.config.lines == 0) {
            state.offset = fs::metadata(path).await?.len();
            return Ok(());
        }

        if self.config.from_start {
            let lines = &self.lines;
            return self
                .reader
                .read_from(path, &display, state, 0, false, |line| lines.push(line))
                .await;
        }

        let max = self.config.max_line_bytes;
        let tail = tail_last_lines(path, self.config.lines).await?;
        for line in &tail.lines {
            let (text, _) = truncate_line(line, max);
            self.lines.push(Line::new(&display, text));
        }
        if let Some(partial) = tail.partial {
            let (text, truncated) = truncate_line(trim_cr(&partial), max);
            self.lines.push(Line::new(&display, text).partial(!truncated));
            if truncated {
                state.discarding = true;
            } else {
                state.partial = partial;
                state.partial_delivered = true;
            }
        }
        state.offset = tail.size;

        Ok(())
    }

    /// Path as shown to the consumer: absolute, or relative to the root when
    /// possible.
    pub(crate) fn display_path(&self, path: &Path) -> String {
        if !self.config.absolute {
            if let Ok(rel) = path.strip_prefix(&self.config.root) {
                if !rel.as_os_str().is_empty() {
                    return rel.to_string_lossy().into_owned();
                }
            }
        }
        path.to_string_lossy().into_owned()
    }

    pub(crate) fn send_err(&self, err: TailError) {
        tracing::warn!(error = %err, "tail error");
        // A full queue drops the new error.
        let _ = self.errors.try_send(err);
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

/// Tails every text file under a directory tree.
///
/// Construct with [`Tailer::new`], then hand it a cancellation token via
/// [`Tailer::start`] to obtain a [`TailHandle`].
#[derive(Debug)]
pub struct Tailer {
    engine: Engine,
    lines: LineReceiver,
    errors: ErrorReceiver,
    phase: SharedPhase,
}

impl Tailer {
    /// Validates `config`, compiles its patterns and starts the notification
    /// backend. Nothing is scanned until [`start`](Self::start).
    pub fn new(config: Config) -> Result<Self, TailError> {
        let config = config.resolve()?;
        let (engine, lines, errors) = Engine::new(config)?;
        Ok(Tailer {
            engine,
            lines,
            errors,
            phase: Arc::new(Mutex::new(Phase::Idle)),
        })
    }

    /// The resolved configuration.
    pub fn config(&self) -> &Config {
        &self.engine.config
    }

    pub fn phase(&self) -> Phase {
        *self.phase.lock()
    }

    /// Runs the initial reconciliation and spawns the control loop on the
    /// current tokio runtime. The loop stops once `shutdown` is cancelled.
    ///
    /// Lines found by the initial scan are already queued when this returns.
    pub async fn start(self, shutdown: CancellationToken) -> Result<TailHandle, TailError> {
        let Tailer {
            mut engine,
            lines,
            errors,
            phase,
        } = self;

        if !engine.config.recursive {
            let root = engine.config.root.clone();
            engine.watches.add(&root)?;
        }
        engine.scan_and_register().await?;

        tracing::info!(
            root = %engine.config.root.display(),
            files = engine.store.len(),
            dirs = engine.watches.len(),
            "tailing"
        );
        *phase.lock() = Phase::Running;

        let done = CancellationToken::new();
        let store = engine.store.clone();
        tokio::spawn(engine.run(shutdown, Arc::clone(&phase), done.clone()));

        Ok(TailHandle {
            lines: Some(lines),
            errors: Some(errors),
            store,
            phase,
            done,
        })
    }
}

/// Handle to a running [`Tailer`].
#[derive(Debug)]
pub struct TailHandle {
    lines: Option<LineReceiver>,
    errors: Option<ErrorReceiver>,
    store: FileStateStore,
    phase: SharedPhase,
    done: CancellationToken,
}

impl TailHandle {
    /// Takes the line queue. Returns `None` after the first call.
    pub fn take_lines(&mut self) -> Option<LineReceiver> {
        self.lines.take()
    }

    /// Takes the error queue. Returns `None` after the first call.
    pub fn take_errors(&mut self) -> Option<ErrorReceiver> {
        self.errors.take()
    }

    /// Number of files currently tracked.
    pub fn file_count(&self) -> usize {
        self.store.len()
    }

    pub fn phase(&self) -> Phase {
        *self.phase.lock()
    }

    /// Token cancelled exactly once, after the loop has shut down.
    pub fn done(&self) -> CancellationToken {
        self.done.clone()
    }

    /// Waits until the loop has stopped.
    pub async fn stopped(&self) {
        self.done.cancelled().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;
    use tempfile::TempDir;

    fn engine_with(
        root: &Path,
        tweak: impl FnOnce(&mut Config),
    ) -> (Engine, LineReceiver, ErrorReceiver) {
        let mut config = Config {
            scan_interval: Duration::ZERO,
            ..Config::new(root)
        };
        tweak(&mut config);
        Engine::new(config.resolve().unwrap()).unwrap()
    }

    fn drain(rx: &mut LineReceiver) -> Vec<Line> {
        std::iter::from_fn(|| rx.try_recv()).collect()
    }

    #[test]
    fn test_display_path() {
        let tmp = TempDir::new().unwrap();
        let (engine, _, _) = engine_with(tmp.path(), |_| {});
        let root = engine.config.root.clone();
        assert_eq!(
            engine.display_path(&root.join("a/b.log")),
            PathBuf::from("a/b.log").to_string_lossy()
        );
        assert_eq!(engine.display_path(Path::new("/elsewhere/c.log")), "/elsewhere/c.log");

        let (engine, _, _) = engine_with(tmp.path(), |c| c.absolute = true);
        let abs = engine.config.root.join("a.log");
        assert_eq!(engine.display_path(&abs), abs.to_string_lossy());
    }

    #[tokio::test]
    async fn test_register_tails_last_lines_with_partial() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("app.log"), "one\ntwo\nthree\nfour").unwrap();

        let (mut engine, mut rx, _) = engine_with(tmp.path(), |c| c.lines = 2);
        let path = engine.config.root.join("app.log");
        assert!(engine.register_file(&path, StartAt::Configured).await);

        let lines = drain(&mut rx);
        assert_eq!(
            lines,
            vec![
                Line::new("app.log", "three"),
                Line::new("app.log", "four").partial(true),
            ]
        );
        let state = engine.store.get(&path).unwrap();
        assert_eq!(state.offset, 18);
        assert_eq!(state.partial, b"four".to_vec());
        assert!(state.partial_delivered);

        // Registering again is a no-op.
        assert!(engine.register_file(&path, StartAt::Configured).await);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_register_from_start() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("app.log"), "a\nb\n").unwrap();

        let (mut engine, mut rx, _) = engine_with(tmp.path(), |c| c.from_start = true);
        let path = engine.config.root.join("app.log");
        assert!(engine.register_file(&path, StartAt::Configured).await);

        let texts: Vec<String> = drain(&mut rx).into_iter().map(|l| l.text().to_string()).collect();
        assert_eq!(texts, vec!["a", "b"]);
        assert_eq!(engine.store.get(&path).unwrap().offset, 4);
    }

    #[tokio::test]
    async fn test_register_rejects_excluded_and_binary() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("skip.log"), "x\n").unwrap();
        std::fs::write(tmp.path().join("data.dat"), [1u8, 0, 2]).unwrap();

        let (mut engine, _, _) = engine_with(tmp.path(), |c| c.exclude = vec!["skip.log".into()]);
        let root = engine.config.root.clone();
        assert!(!engine.register_file(&root.join("skip.log"), StartAt::Configured).await);
        assert!(!engine.register_file(&root.join("data.dat"), StartAt::Configured).await);
        assert!(!engine.register_file(&root.join("missing.log"), StartAt::Configured).await);
        assert_eq!(engine.store.len(), 0);
    }

    #[tokio::test]
    async fn test_binary_extension_skipped_without_includes() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("audio.wav"), "RIFF....WAVE").unwrap();
        std::fs::write(tmp.path().join("data.bin"), "BINARYDATA").unwrap();

        let (mut engine, _, _) = engine_with(tmp.path(), |_| {});
        let root = engine.config.root.clone();
        assert!(!engine.register_file(&root.join("audio.wav"), StartAt::Configured).await);
        assert!(!engine.register_file(&root.join("data.bin"), StartAt::Configured).await);

        let (mut engine, _, _) = engine_with(tmp.path(), |c| c.include = vec!["*.bin".into()]);
        assert!(engine.register_file(&root.join("data.bin"), StartAt::Configured).await);
    }

    #[tokio::test]
    async fn test_renamed_file_is_not_replayed() {
        let tmp = TempDir::new().unwrap();
        let (mut engine, mut rx, _) = engine_with(tmp.path(), |c| c.lines = 5);
        let old = engine.config.root.join("app.log");
        let rotated = engine.config.root.join("app.log.1");
        std::fs::write(&old, "a\nb\n").unwrap();

        assert!(engine.register_file(&old, StartAt::Configured).await);
        assert_eq!(drain(&mut rx).len(), 2);

        std::fs::rename(&old, &rotated).unwrap();
        engine.handle_event(FsEvent::Remove(old.clone())).await;
        engine.handle_event(FsEvent::RenamedTo(rotated.clone())).await;

        assert!(drain(&mut rx).is_empty());
        assert!(!engine.store.contains(&old));
        assert_eq!(engine.store.get(&rotated).unwrap().offset, 4);

        std::fs::write(&rotated, "a\nb\nc\n").unwrap();
        engine.handle_event(FsEvent::Write(rotated)).await;
        assert_eq!(drain(&mut rx), vec![Line::new("app.log.1", "c")]);
    }

    #[tokio::test]
    async fn test_write_event_registers_unknown_file() {
        let tmp = TempDir::new().unwrap();
        let (mut engine, mut rx, _) = engine_with(tmp.path(), |c| c.lines = 5);
        let path = engine.config.root.join("late.log");
        std::fs::write(&path, "hello\n").unwrap();

        engine.handle_event(FsEvent::Write(path.clone())).await;
        assert!(engine.store.contains(&path));
        assert_eq!(drain(&mut rx), vec![Line::new("late.log", "hello")]);

        std::fs::write(&path, "hello\nworld\n").unwrap();
        engine.handle_event(FsEvent::Write(path)).await;
        assert_eq!(drain(&mut rx), vec![Line::new("late.log", "world")]);
    }

    #[tokio::test]
    async fn test_remove_event_for_directory_prunes_beneath() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("sub/deeper")).unwrap();
        std::fs::write(tmp.path().join("sub/a.log"), "a\n").unwrap();
        std::fs::write(tmp.path().join("sub/deeper/b.log"), "b\n").unwrap();
        std::fs::write(tmp.path().join("top.log"), "t\n").unwrap();

        let (mut engine, _, _) = engine_with(tmp.path(), |_| {});
        engine.scan_and_register().await.unwrap();
        assert_eq!(engine.store.len(), 3);

        let sub = engine.config.root.join("sub");
        engine.handle_event(FsEvent::Remove(sub.clone())).await;

        assert_eq!(engine.store.len(), 1);
        assert!(!engine.watches.contains(&sub));
        assert!(!engine.watches.contains(&sub.join("deeper")));
    }

    #[tokio::test]
    async fn test_catch_up_forgets_vanished_file() {
        let tmp = TempDir::new().unwrap();
        let (mut engine, _, mut errors) = engine_with(tmp.path(), |_| {});
        let path = engine.config.root.join("brief.log");
        std::fs::write(&path, "x\n").unwrap();
        assert!(engine.register_file(&path, StartAt::Configured).await);

        std::fs::remove_file(&path).unwrap();
        engine.handle_event(FsEvent::Write(path.clone())).await;

        assert!(!engine.store.contains(&path));
        assert!(errors.try_recv().is_err());
    }

    #[test]
    fn test_error_queue_drops_new_errors_when_full() {
        let tmp = TempDir::new().unwrap();
        let (engine, _, mut errors) = engine_with(tmp.path(), |c| c.error_capacity = 1);

        engine.send_err(TailError::RootNotDirectory(PathBuf::from("/first")));
        engine.send_err(TailError::RootNotDirectory(PathBuf::from("/second")));

        let first = errors.try_recv().unwrap();
        assert!(first.to_string().contains("/first"));
        assert!(errors.try_recv().is_err());
    }
}
