use std::{io, path::PathBuf, sync::Arc};

use snafu::Snafu;

/// Errors that can occur while driving a [`crate::AppenderHandle`].
///
/// All I/O-adjacent variants carry the path they were operating on so that a
/// caller that latches onto `last_error` (see [`crate::AppenderHandle::write`])
/// can tell which file in a rotation chain actually failed. The underlying
/// [`io::Error`] is wrapped in an [`Arc`] since `last_error` is shared by
/// every handle pointing at the same file and must be cheaply cloned out on
/// every call.
#[derive(Debug, Snafu, Clone)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    /// Failed to create the parent directory of the active file.
    #[snafu(display("failed to create parent directory of {}: {}", path.display(), source))]
    CreateDir {
        path: PathBuf,
        source: Arc<io::Error>,
    },

    /// Failed to open (or create) the active file in append mode.
    #[snafu(display("failed to open {}: {}", path.display(), source))]
    Open {
        path: PathBuf,
        source: Arc<io::Error>,
    },

    /// A write to the active file descriptor, or to the block buffer in front
    /// of it, failed.
    #[snafu(display("failed to write {}: {}", path.display(), source))]
    Write {
        path: PathBuf,
        source: Arc<io::Error>,
    },

    /// Flushing the block-buffered writer failed.
    #[snafu(display("failed to flush {}: {}", path.display(), source))]
    Flush {
        path: PathBuf,
        source: Arc<io::Error>,
    },

    /// Renaming the active file into its archive slot failed for a reason
    /// other than the file simply not existing (which is tolerated).
    #[snafu(display("failed to rename {} to {}: {}", from.display(), to.display(), source))]
    Rename {
        from: PathBuf,
        to: PathBuf,
        source: Arc<io::Error>,
    },

    /// Deleting an archive file during retention GC failed for a reason other
    /// than the file already being gone.
    #[snafu(display("failed to remove archive {}: {}", path.display(), source))]
    Remove {
        path: PathBuf,
        source: Arc<io::Error>,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
