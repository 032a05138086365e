use std::{
    collections::HashMap,
    fs::{self, File, OpenOptions},
    io::{self, BufWriter, Write as _},
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicI32, AtomicUsize, Ordering},
        Arc, Weak,
    },
    time::SystemTime,
};

use chrono::{DateTime, Local};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::{
    buffer::RecordBuffer,
    cutter,
    error::Error,
    flush_timer::FlushTimer,
    options::{EffectiveOptions, FlushAtLeastTime, FlushOverSize, ScrollByTime, ScrollKeepCount, ScrollKeepTime, ScrollBySize},
    rotation::{self, ArchiveList},
    time_bucket,
};

/// The file descriptor side of an appender: either unopened, a raw
/// descriptor written to directly, or one with a block-buffered writer
/// layered on top (`use_block_buffered_writer`). Replaces the Go source's
/// separate `file *os.File` / `writeBuffer *bufio.Writer` pair, since here
/// the buffered variant takes ownership of the descriptor instead of
/// wrapping a second live reference to it.
enum FileSink {
    Closed,
    Raw(File),
    Buffered(BufWriter<File>),
}

impl FileSink {
    fn is_open(&self) -> bool {
        !matches!(self, FileSink::Closed)
    }

    fn get_mut(&mut self) -> Option<&mut File> {
        match self {
            FileSink::Closed => None,
            FileSink::Raw(f) => Some(f),
            FileSink::Buffered(w) => Some(w.get_mut()),
        }
    }

    /// Bytes sitting in a block-buffered writer that have not yet reached
    /// the file descriptor.
    fn buffered_len(&self) -> usize {
        match self {
            FileSink::Buffered(w) => w.buffer().len(),
            _ => 0,
        }
    }

    fn flush(&mut self, path: &Path) -> Result<(), Error> {
        if let FileSink::Buffered(w) = self {
            w.flush().map_err(|source| Error::Flush {
                path: path.to_path_buf(),
                source: Arc::new(source),
            })?;
        }
        Ok(())
    }

}

/// Persistent, per-filename state guarded by the "file mutex" (`SPEC_FULL.md`
/// §5): the file descriptor, its on-disk size, the archive list, rotation
/// bookkeeping, the flush timer, and the observer map.
struct FileState {
    options: EffectiveOptions,
    sink: FileSink,
    file_size: i64,
    last_scroll_time_bucket: String,
    last_scroll_index: i64,
    archives: ArchiveList,
    flush_timer: FlushTimer,
    on_scroll: HashMap<u64, Box<dyn Fn(&Path) + Send + Sync>>,
    next_observer_id: u64,
    error_sink: Option<Arc<SharedAppender>>,
}

/// The shared, process-wide appender instance for one canonical filename.
/// Exactly one of these exists per filename at a time (see
/// [`crate::registry`]); every [`crate::AppenderHandle`] pointing at the same
/// path shares one `Arc<SharedAppender>`.
pub(crate) struct SharedAppender {
    pub filename: PathBuf,
    buffer: RecordBuffer,
    state: Mutex<FileState>,
    in_flight_writers: AtomicI32,
    last_error: Mutex<Option<Error>>,
    /// Reference count of live handles, owned conceptually by the registry
    /// but stored here so `release` doesn't need a second lookup.
    pub(crate) handles: AtomicUsize,
    self_weak: Weak<SharedAppender>,
}

impl SharedAppender {
    /// Builds a new shared appender for `filename`, performing the startup
    /// archive discovery and (if the active file's modification time falls
    /// in a stale time bucket) the immediate pre-write rotation described in
    /// `SPEC_FULL.md` §4.7.2.
    pub fn new(filename: PathBuf, options: EffectiveOptions) -> Arc<Self> {
        Arc::new_cyclic(|weak| {
            let archives = rotation::discover_archives(&filename);
            let (mut last_scroll_index, mut last_scroll_time_bucket) =
                rotation::recover_index_and_bucket(&filename, &archives);

            let mut pending_error = None;
            if let ScrollByTime::Every(period) = options.scroll_by_time {
                match fs::metadata(&filename) {
                    Ok(meta) if meta.len() > 0 => {
                        let modified: DateTime<Local> =
                            meta.modified().unwrap_or(SystemTime::now()).into();
                        let stale_bucket = time_bucket::bucket_string(modified, period);
                        let now_bucket = time_bucket::bucket_string(Local::now(), period);
                        if stale_bucket != now_bucket {
                            // The file is stale relative to the current bucket;
                            // `rotate_path_only` archives it under the *now*
                            // bucket (matching `scrolling`'s `stimefix`, not the
                            // file's own stale bucket) and leaves
                            // `last_scroll_time_bucket`/`last_scroll_index`
                            // pointing at that now-current state.
                            last_scroll_time_bucket = stale_bucket;
                            if let Err(e) = rotate_path_only(
                                &filename,
                                &options,
                                &mut last_scroll_time_bucket,
                                &mut last_scroll_index,
                            ) {
                                pending_error = Some(e);
                            }
                        } else {
                            last_scroll_time_bucket = now_bucket;
                        }
                    }
                    _ => {
                        last_scroll_time_bucket = time_bucket::bucket_string(Local::now(), period);
                    }
                }
            }
            if last_scroll_time_bucket.is_empty() {
                last_scroll_time_bucket =
                    time_bucket::bucket_string(Local::now(), std::time::Duration::ZERO);
            }

            let state = FileState {
                options,
                sink: FileSink::Closed,
                file_size: 0,
                last_scroll_time_bucket,
                last_scroll_index,
                archives,
                flush_timer: FlushTimer::default(),
                on_scroll: HashMap::new(),
                next_observer_id: 0,
                error_sink: None,
            };

            SharedAppender {
                filename,
                buffer: RecordBuffer::new(),
                state: Mutex::new(state),
                in_flight_writers: AtomicI32::new(0),
                last_error: Mutex::new(pending_error),
                handles: AtomicUsize::new(0),
                self_weak: weak.clone(),
            }
        })
    }

    pub fn last_error(&self) -> Option<Error> {
        self.last_error.lock().clone()
    }

    /// Appends `record` to the buffer and invokes the write driver, inline on
    /// the calling thread unless `options.flush_over_size` calls for
    /// background dispatch (`SPEC_FULL.md` §4.2).
    pub fn write(&self, record: &[u8], options: EffectiveOptions) -> Option<Error> {
        if let Some(err) = self.last_error() {
            return Some(err);
        }
        if record.is_empty() {
            return None;
        }
        self.buffer.append(record);
        if matches!(options.flush_over_size, FlushOverSize::Bytes(_)) {
            let this = self
                .self_weak
                .upgrade()
                .expect("appender outlives its own background dispatch");
            tokio::task::spawn_blocking(move || this.run_driver(options));
        } else {
            self.run_driver(options);
        }
        self.last_error()
    }

    pub fn flush(&self) -> Option<Error> {
        if let Some(err) = self.last_error() {
            return Some(err);
        }
        let mut state = self.state.lock();
        let result = self.flush_file(&mut state);
        self.latch(&mut state, result)
    }

    pub fn close(&self) -> Option<Error> {
        let mut state = self.state.lock();
        let result = self.flush_file(&mut state);
        state.sink = FileSink::Closed;
        state.file_size = 0;
        state.flush_timer.deactivate();
        // Close always clears the sticky error: a fresh `acquire` on the
        // same path starts from a clean slate, per `SPEC_FULL.md` §7.
        *self.last_error.lock() = None;
        let err = result.err();
        if let Some(sink) = state.error_sink.take() {
            crate::registry::release(&sink);
        }
        err
    }

    pub fn on_scroll(&self, f: impl Fn(&Path) + Send + Sync + 'static) -> u64 {
        let mut state = self.state.lock();
        let id = state.next_observer_id;
        state.next_observer_id += 1;
        state.on_scroll.insert(id, Box::new(f));
        id
    }

    pub fn remove_observer(&self, id: u64) {
        self.state.lock().on_scroll.remove(&id);
    }

    /// Invoked by [`FlushTimer`] after it fires; re-enters the driver with a
    /// forced flush of whatever is left in the buffer.
    pub(crate) fn on_flush_timer_fire(&self) {
        let mut state = self.state.lock();
        if !state.flush_timer.is_active() {
            return;
        }
        let result = self.flush_file(&mut state);
        self.latch(&mut state, result);
    }

    fn latch(&self, state: &mut FileState, result: Result<(), Error>) -> Option<Error> {
        let err = result.err();
        *self.last_error.lock() = err.clone();
        if let Some(e) = &err {
            warn!(message = "appender write path failed, latching error", path = %self.filename.display(), error = %e);
            self.report_to_error_sink(state, e);
        }
        err
    }

    /// The single entry point reached after a buffer append, a flush-timer
    /// fire, or an explicit `flush`/`close`: collapses concurrent drivers,
    /// re-reads the latest options, drains the buffer, and arms/disarms the
    /// flush timer. Mirrors `writefile` in `internal.go`.
    fn run_driver(&self, options: EffectiveOptions) {
        let n = self.in_flight_writers.fetch_add(1, Ordering::SeqCst) + 1;
        if n > 2 {
            self.in_flight_writers.fetch_sub(1, Ordering::SeqCst);
            return;
        }
        let mut state = self.state.lock();
        state.options = options;
        let result = self.drain_and_rotate(&mut state, false);
        let err = match result {
            Ok((written, remaining)) => {
                if remaining == 0 {
                    state.flush_timer.deactivate();
                } else if written > 0 || !state.flush_timer.is_active() {
                    // Mirrors `writefile` in `internal.go`: only rearm when new
                    // data actually landed, or the timer wasn't running yet —
                    // a pass that wrote nothing must not push the deadline out.
                    self.arm_flush_timer(&mut state);
                }
                None
            }
            Err(e) => Some(e),
        };
        self.latch(&mut state, err.map_or(Ok(()), |e| Err(e)));
        self.in_flight_writers.fetch_sub(1, Ordering::SeqCst);
    }

    fn arm_flush_timer(&self, state: &mut FileState) {
        let after = match state.options.flush_at_least_time {
            FlushAtLeastTime::Immediate => return,
            FlushAtLeastTime::After(d) => d,
        };
        state.flush_timer.activate(&self.self_weak, after);
    }

    /// Drains the buffer into the active file, rotating as many times as
    /// necessary, and returns `(total_written, residual_size)`: the total
    /// bytes handed to the file/block-writer across every pass of this call,
    /// and the bytes of the current chunk not yet persisted to the file
    /// descriptor. Mirrors `scrollwritefile` in `internal.go`, which likewise
    /// threads `writtencount` back to the caller alongside `remainsize` so
    /// the flush timer can tell "nothing written" apart from "nothing left".
    fn drain_and_rotate(
        &self,
        state: &mut FileState,
        force_flush: bool,
    ) -> Result<(usize, usize), Error> {
        let mut total_written = 0usize;
        let mut remaining = 0usize;
        loop {
            if !state.sink.is_open() {
                self.open_file(state)?;
            }

            let peeked = self.buffer.peek();
            let slice = cutter::choose_slice(&state.options, state.file_size, &peeked);
            let chunk = &peeked[..slice.len];

            let (written, residual) = self.write_chunk(state, chunk, force_flush)?;
            state.file_size += written as i64;
            self.buffer.shrink(written);
            total_written += written;
            remaining = residual;

            let rotate_now = slice.forces_rotation
                || matches!(state.options.scroll_by_size, ScrollBySize::Bytes(limit) if state.file_size >= limit)
                || matches!(state.options.scroll_by_time, ScrollByTime::Every(period)
                    if time_bucket::bucket_string(Local::now(), period) != state.last_scroll_time_bucket);

            if !rotate_now {
                break;
            }

            self.close_file(state)?;
            self.rotate(state)?;
        }
        Ok((total_written, remaining))
    }

    /// Used by `flush`/`close`/the flush-timer fire path: drains and rotates
    /// with a forced flush, pushing out any alignment holdback or
    /// block-writer residue that an ordinary drain pass would leave behind.
    /// A no-op when there is nothing open and nothing buffered. Mirrors
    /// `flushfile` in `internal.go`.
    fn flush_file(&self, state: &mut FileState) -> Result<(), Error> {
        if !state.sink.is_open() && self.buffer.len() == 0 {
            return Ok(());
        }
        self.drain_and_rotate(state, true)?;
        state.sink.flush(&self.filename)
    }

    fn open_file(&self, state: &mut FileState) -> Result<(), Error> {
        if let Some(parent) = self.filename.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|source| Error::CreateDir {
                    path: parent.to_path_buf(),
                    source: Arc::new(source),
                })?;
            }
        }
        let file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.filename)
            .map_err(|source| Error::Open {
                path: self.filename.clone(),
                source: Arc::new(source),
            })?;
        let size = file
            .metadata()
            .map_err(|source| Error::Open {
                path: self.filename.clone(),
                source: Arc::new(source),
            })?
            .len() as i64;
        state.file_size = size;

        let use_block_writer = state.options.use_block_buffered_writer
            && matches!(state.options.flush_over_size, FlushOverSize::Bytes(_))
            && matches!(state.options.flush_at_least_time, FlushAtLeastTime::After(_));
        state.sink = if use_block_writer {
            let quantum = match state.options.flush_over_size {
                FlushOverSize::Bytes(n) => n,
                FlushOverSize::Unbuffered => unreachable!(),
            };
            FileSink::Buffered(BufWriter::with_capacity(quantum.max(1), file))
        } else {
            FileSink::Raw(file)
        };
        Ok(())
    }

    fn close_file(&self, state: &mut FileState) -> Result<(), Error> {
        let result = state.sink.flush(&self.filename);
        state.sink = FileSink::Closed;
        state.file_size = 0;
        result
    }

    /// Writes `chunk` through whichever sink mode is active, updating
    /// nothing but returning `(bytes_written, residual_unpersisted_bytes)`,
    /// per the accounting convention fixed in `SPEC_FULL.md` §4.5(c).
    fn write_chunk(&self, state: &mut FileState, chunk: &[u8], force: bool) -> Result<(usize, usize), Error> {
        if chunk.is_empty() {
            if force {
                state.sink.flush(&self.filename)?;
            }
            let residual = state.sink.buffered_len();
            return Ok((0, residual));
        }
        let buffered_mode = matches!(state.options.flush_over_size, FlushOverSize::Bytes(_))
            && matches!(state.options.flush_at_least_time, FlushAtLeastTime::After(_));
        if !buffered_mode {
            return self.write_direct(state, chunk);
        }
        match &mut state.sink {
            FileSink::Buffered(writer) => {
                let written = writer.write(chunk).map_err(|source| Error::Write {
                    path: self.filename.clone(),
                    source: Arc::new(source),
                })?;
                if force {
                    writer.flush().map_err(|source| Error::Flush {
                        path: self.filename.clone(),
                        source: Arc::new(source),
                    })?;
                }
                let residual = writer.buffer().len();
                Ok((written, residual))
            }
            FileSink::Raw(file) => {
                if force {
                    let written = file.write(chunk).map_err(|source| Error::Write {
                        path: self.filename.clone(),
                        source: Arc::new(source),
                    })?;
                    return Ok((written, chunk.len() - written));
                }
                let quantum = match state.options.flush_over_size {
                    FlushOverSize::Bytes(n) => n,
                    FlushOverSize::Unbuffered => unreachable!(),
                };
                write_size_aligned(file, &self.filename, chunk, quantum, state.file_size)
            }
            FileSink::Closed => unreachable!("file is always opened before write_chunk"),
        }
    }

    /// Writes `chunk` straight to the underlying descriptor, bypassing block
    /// buffering entirely (used by the unbuffered mode and by `flush_file`'s
    /// final push).
    fn write_direct(&self, state: &mut FileState, chunk: &[u8]) -> Result<(usize, usize), Error> {
        let file = state
            .sink
            .get_mut()
            .expect("file opened before write_direct");
        let written = file.write(chunk).map_err(|source| Error::Write {
            path: self.filename.clone(),
            source: Arc::new(source),
        })?;
        Ok((written, chunk.len() - written))
    }

    /// Closes the active file (already done by the caller) and renames it
    /// into an archive slot, dispatches observers, and runs retention GC.
    /// Mirrors `scrolling` in `internal.go`.
    fn rotate(&self, state: &mut FileState) -> Result<(), Error> {
        let (dir, stem, ext) = split_path(&self.filename);

        let mut timefix = String::new();
        if let ScrollByTime::Every(period) = state.options.scroll_by_time {
            let now_bucket = time_bucket::bucket_string(Local::now(), period);
            if now_bucket != state.last_scroll_time_bucket {
                state.last_scroll_time_bucket = now_bucket.clone();
                state.last_scroll_index = if matches!(state.options.scroll_by_size, ScrollBySize::Bytes(_)) {
                    1
                } else {
                    0
                };
            } else {
                state.last_scroll_index += 1;
            }
            if !now_bucket.is_empty() {
                timefix = now_bucket;
            }
        } else {
            state.last_scroll_index += 1;
        }

        let meta = fs::metadata(&self.filename);
        let (exists, len) = match &meta {
            Ok(m) => (true, m.len()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => (false, 0),
            Err(e) => {
                return Err(Error::Open {
                    path: self.filename.clone(),
                    source: Arc::new(io::Error::new(e.kind(), e.to_string())),
                })
            }
        };
        if !exists || len == 0 {
            return Ok(());
        }

        let new_name = format!("{stem}{}{ext}", if timefix.is_empty() { String::new() } else { format!(".{timefix}") });
        let archive_stem = new_name[..new_name.len() - ext.len()].to_string();
        let archive_path = rotation::next_archive_path(&dir, &archive_stem, "", &ext, &mut state.last_scroll_index);

        fs::rename(&self.filename, &archive_path).map_err(|source| Error::Rename {
            from: self.filename.clone(),
            to: archive_path.clone(),
            source: Arc::new(source),
        })?;
        debug!(message = "rolled active file into archive", from = %self.filename.display(), to = %archive_path.display());
        let modified = fs::metadata(&archive_path)
            .and_then(|m| m.modified())
            .unwrap_or_else(|_| SystemTime::now());

        for observer in state.on_scroll.values() {
            observer(&archive_path);
        }

        state.archives.push(archive_path.clone(), modified);
        self.retention_gc(state)?;
        Ok(())
    }

    fn retention_gc(&self, state: &mut FileState) -> Result<(), Error> {
        loop {
            let should_remove_for_age = match state.options.scroll_keep_time {
                ScrollKeepTime::Forever => false,
                ScrollKeepTime::Immediate => state.archives.len() > 0,
                ScrollKeepTime::For(max_age) => state
                    .archives
                    .oldest()
                    .and_then(|p| state.archives.modified_of(p))
                    .map(|modified| modified.elapsed().unwrap_or_default() > max_age)
                    .unwrap_or(false),
            };
            if !should_remove_for_age {
                break;
            }
            self.remove_oldest(state)?;
        }
        loop {
            let over_count = match state.options.scroll_keep_count {
                ScrollKeepCount::Unlimited => false,
                ScrollKeepCount::None => state.archives.len() > 0,
                ScrollKeepCount::Count(max) => state.archives.len() > max,
            };
            if !over_count {
                break;
            }
            self.remove_oldest(state)?;
        }
        Ok(())
    }

    fn remove_oldest(&self, state: &mut FileState) -> Result<(), Error> {
        let Some(path) = state.archives.pop_oldest() else {
            return Ok(());
        };
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(Error::Remove {
                path,
                source: Arc::new(source),
            }),
        }
    }

    fn report_to_error_sink(&self, state: &mut FileState, err: &Error) {
        let Some(sink_path) = state.options.error_log_path.clone() else {
            return;
        };
        if state
            .error_sink
            .as_ref()
            .is_some_and(|s| s.filename != sink_path)
        {
            if let Some(old) = state.error_sink.take() {
                crate::registry::release(&old);
            }
        }
        if state.error_sink.is_none() {
            state.error_sink = Some(crate::registry::acquire(
                sink_path.clone(),
                crate::options::error_sink_options(),
            ));
        }
        let Some(sink) = state.error_sink.clone() else {
            return;
        };
        let line = format!(
            "{} [bfappender] {}\n",
            Local::now().format("%Y-%m-%d %H:%M:%S%.6f"),
            err
        );
        if sink.write(line.as_bytes(), crate::options::error_sink_options()).is_some() {
            crate::registry::release(&sink);
            state.error_sink = None;
        }
    }
}

/// Alignment write used when `flush_over_size > 0` but no real block writer
/// is interposed (`use_block_buffered_writer = false`): the first write
/// brings `file_size` up to the next multiple of `quantum`; later writes
/// happen in whole multiples; a sub-quantum tail is held back in the record
/// buffer. Mirrors the `else` branch of `bufferedWrite` in `internal.go`.
fn write_size_aligned(
    file: &mut File,
    path: &Path,
    data: &[u8],
    quantum: usize,
    file_size: i64,
) -> Result<(usize, usize), Error> {
    let padding = quantum - (file_size as usize % quantum);
    if data.len() < padding {
        return Ok((0, data.len()));
    }
    let residual = (data.len() - padding) % quantum;
    let align_len = data.len() - residual;
    let written = file.write(&data[..align_len]).map_err(|source| Error::Write {
        path: path.to_path_buf(),
        source: Arc::new(source),
    })?;
    Ok((written, data.len() - written))
}

fn split_path(filename: &Path) -> (PathBuf, String, String) {
    let dir = filename.parent().unwrap_or_else(|| Path::new(".")).to_path_buf();
    let fname = filename
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = filename
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let stem = fname[..fname.len() - ext.len()].to_string();
    (dir, stem, ext)
}

/// Startup-only variant of rotation used when the active file is found to be
/// stale relative to the current time bucket, before any file descriptor has
/// been opened. Renames the file directly; does not touch retention or
/// observers, since no handle exists yet to have registered any.
///
/// Names the archive from the *current* time bucket, not the stale bucket the
/// file was last written in — mirroring `scrolling`'s `stimefix := timeFixString(time.Now(), …)`
/// in `internal.go`, which always re-derives the bucket from `time.Now()`
/// rather than reusing the caller's (stale) `lastScrollTime`. `last_scroll_time_bucket`
/// and `last_scroll_index` are updated in place so the next regular rotation
/// continues from the same state this one left behind.
fn rotate_path_only(
    filename: &Path,
    options: &EffectiveOptions,
    last_scroll_time_bucket: &mut String,
    last_scroll_index: &mut i64,
) -> Result<(PathBuf, SystemTime), Error> {
    let (dir, stem, ext) = split_path(filename);

    let mut timefix = String::new();
    if let ScrollByTime::Every(period) = options.scroll_by_time {
        let now_bucket = time_bucket::bucket_string(Local::now(), period);
        if now_bucket != *last_scroll_time_bucket {
            *last_scroll_time_bucket = now_bucket.clone();
            *last_scroll_index = if matches!(options.scroll_by_size, ScrollBySize::Bytes(_)) {
                1
            } else {
                0
            };
        } else {
            *last_scroll_index += 1;
        }
        if !now_bucket.is_empty() {
            timefix = now_bucket;
        }
    } else {
        *last_scroll_index += 1;
    }

    let archive_stem = if timefix.is_empty() {
        stem
    } else {
        format!("{stem}.{timefix}")
    };
    let archive_path =
        rotation::next_archive_path(&dir, &archive_stem, "", &ext, last_scroll_index);
    fs::rename(filename, &archive_path).map_err(|source| Error::Rename {
        from: filename.to_path_buf(),
        to: archive_path.clone(),
        source: Arc::new(source),
    })?;
    let modified = fs::metadata(&archive_path)
        .and_then(|m| m.modified())
        .unwrap_or_else(|_| SystemTime::now());
    Ok((archive_path, modified))
}
