use std::time::Duration;

/// Sentinel written by callers to request "never" for a size/count field.
pub const NEVER: i64 = -1;

/// Sentinel written by callers to request "use the built-in default".
pub const DEFAULT: i64 = 0;

/// Sentinel meaning "keep archives forever".
pub const FOREVER: i64 = i64::MAX;

/// Per-call configuration merged over the running appender's effective
/// options on every write.
///
/// A field left at its zero value (`None` for durations/flags, `0` for sizes)
/// means "no override, keep whatever is already in effect"; this mirrors the
/// Go source's `0 == unset` convention (see `Option.Merge` in
/// `bfa/internal.go`), translated to `Option<T>` so that "unset" and
/// "explicitly zero" are no longer the same bit pattern.
#[derive(Debug, Clone, Default)]
pub struct Options {
    /// Demarcates the end of a record. When empty, rotation cuts at a raw
    /// byte boundary instead of searching for a marker.
    pub record_end_flag: Option<Vec<u8>>,
    /// When `true`, the cut-point search tries backward first, then forward.
    /// When `false` (the default), forward first, then backward.
    pub backward_find_end_flag: Option<bool>,
    /// Maximum time buffered data may linger before a forced flush.
    /// `Some(Duration::ZERO)` means "flush immediately", `None` means
    /// "inherit the current effective value".
    pub flush_at_least_time: Option<FlushAtLeastTime>,
    /// Block size triggering a flush and the alignment quantum for the
    /// size-aligned writer.
    pub flush_over_size: Option<FlushOverSize>,
    /// Rotation period. `None` means "inherit".
    pub scroll_by_time: Option<ScrollByTime>,
    /// Rotation size threshold in bytes.
    pub scroll_by_size: Option<ScrollBySize>,
    /// Max age of archive files before deletion.
    pub scroll_keep_time: Option<ScrollKeepTime>,
    /// Max number of archive files retained.
    pub scroll_keep_count: Option<ScrollKeepCount>,
    /// Whether to interpose a block-buffered writer between the record
    /// buffer and the file descriptor.
    pub use_block_buffered_writer: Option<bool>,
    /// Path of the auxiliary error sink. `Some(None)` explicitly disables
    /// it; `None` means "inherit".
    pub error_log_path: Option<Option<std::path::PathBuf>>,
}

/// `-1` = flush immediately (bypass the timer entirely), `Duration` = wait
/// at most this long since the last write before forcing a flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushAtLeastTime {
    Immediate,
    After(Duration),
}

impl FlushAtLeastTime {
    pub const DEFAULT: Duration = Duration::from_secs(1);
}

/// `-1` = write every record straight through, bypassing the block buffer;
/// `Bytes(n)` = block size / alignment quantum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOverSize {
    Unbuffered,
    Bytes(usize),
}

impl FlushOverSize {
    pub const DEFAULT: usize = 64 * 1024;
}

/// `-1` or absent = never roll by time; `Every(d)` = roll whenever the
/// current time bucket (see [`crate::time_bucket`]) differs from the bucket
/// the active file was opened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollByTime {
    Never,
    Every(Duration),
}

/// `-1` or absent = never roll by size; `Bytes(n)` = roll once the active
/// file would exceed `n` bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollBySize {
    Never,
    Bytes(i64),
}

/// `-1` = delete archives immediately on rotation, `Forever` = never age
/// archives out, `For(d)` = delete archives older than `d`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollKeepTime {
    Immediate,
    Forever,
    For(Duration),
}

/// `-1` = keep no archives, `Unlimited` = keep all, `Count(n)` = keep the `n`
/// most recent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollKeepCount {
    None,
    Unlimited,
    Count(usize),
}

/// Fully-resolved option set with every field defaulted; this is what the
/// write driver actually consults on each pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectiveOptions {
    pub record_end_flag: Vec<u8>,
    pub backward_find_end_flag: bool,
    pub flush_at_least_time: FlushAtLeastTime,
    pub flush_over_size: FlushOverSize,
    pub scroll_by_time: ScrollByTime,
    pub scroll_by_size: ScrollBySize,
    pub scroll_keep_time: ScrollKeepTime,
    pub scroll_keep_count: ScrollKeepCount,
    pub use_block_buffered_writer: bool,
    pub error_log_path: Option<std::path::PathBuf>,
}

impl Default for EffectiveOptions {
    fn default() -> Self {
        EffectiveOptions {
            record_end_flag: Vec::new(),
            backward_find_end_flag: false,
            flush_at_least_time: FlushAtLeastTime::After(FlushAtLeastTime::DEFAULT),
            flush_over_size: FlushOverSize::Bytes(FlushOverSize::DEFAULT),
            scroll_by_time: ScrollByTime::Never,
            scroll_by_size: ScrollBySize::Never,
            scroll_keep_time: ScrollKeepTime::Forever,
            scroll_keep_count: ScrollKeepCount::Unlimited,
            use_block_buffered_writer: false,
            error_log_path: None,
        }
    }
}

impl EffectiveOptions {
    /// Applies `overrides` on top of `self`, "last writer wins" for any
    /// field the override actually sets. Mirrors `Option.Merge` in the
    /// original: each non-zero field of the incoming override replaces the
    /// running value, `BackwardFindEndFlag` and `UseGoBufIOWriter` are always
    /// copied across (they are plain booleans with no "unset" state upstream,
    /// so here they only apply when the caller explicitly set them).
    pub fn merge(&self, overrides: &Options) -> EffectiveOptions {
        let mut merged = self.clone();
        if let Some(flag) = &overrides.record_end_flag {
            if !flag.is_empty() {
                merged.record_end_flag = flag.clone();
            }
        }
        if let Some(backward) = overrides.backward_find_end_flag {
            merged.backward_find_end_flag = backward;
        }
        if let Some(t) = overrides.flush_at_least_time {
            merged.flush_at_least_time = t;
        }
        if let Some(s) = overrides.flush_over_size {
            merged.flush_over_size = s;
        }
        if let Some(t) = overrides.scroll_by_time {
            merged.scroll_by_time = t;
        }
        if let Some(s) = overrides.scroll_by_size {
            merged.scroll_by_size = s;
        }
        if let Some(t) = overrides.scroll_keep_time {
            merged.scroll_keep_time = t;
        }
        if let Some(c) = overrides.scroll_keep_count {
            merged.scroll_keep_count = c;
        }
        if let Some(b) = overrides.use_block_buffered_writer {
            merged.use_block_buffered_writer = b;
        }
        if let Some(p) = &overrides.error_log_path {
            merged.error_log_path = p.clone();
        }
        merged
    }
}

/// The hardcoded option set the error sink's own appender is built with (see
/// `internal.go`'s `errlog`): line-terminated, unbuffered, size-rolled at
/// 5 MiB, a single archive retained.
pub(crate) fn error_sink_options() -> EffectiveOptions {
    EffectiveOptions {
        record_end_flag: b"\n".to_vec(),
        backward_find_end_flag: false,
        flush_at_least_time: FlushAtLeastTime::Immediate,
        flush_over_size: FlushOverSize::Unbuffered,
        scroll_by_time: ScrollByTime::Never,
        scroll_by_size: ScrollBySize::Bytes(5 * 1024 * 1024),
        scroll_keep_time: ScrollKeepTime::Forever,
        scroll_keep_count: ScrollKeepCount::Count(1),
        use_block_buffered_writer: false,
        error_log_path: None,
    }
}
