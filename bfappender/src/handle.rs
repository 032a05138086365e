use std::{path::Path, sync::Arc};

use crate::{
    driver::SharedAppender,
    error::{Error, Result},
    options::{EffectiveOptions, Options},
    registry,
};

/// A handle to a buffered, rolling file appender.
///
/// Cloning or opening the same (canonicalized) path from elsewhere in the
/// process hands back a handle bound to the same underlying file state
/// (`SPEC_FULL.md` §4.1) — writes from either handle interleave into one
/// buffer and one active file, and whichever handle writes last wins any
/// conflicting option.
///
/// Each `AppenderHandle` carries its own resolved [`Options`] snapshot, which
/// it re-applies to the shared appender on every write; [`AppenderHandle::with_options`]
/// changes only this handle's snapshot; other handles on the same path are
/// unaffected until their own next write.
pub struct AppenderHandle {
    appender: Arc<SharedAppender>,
    options: EffectiveOptions,
}

/// Handle returned by [`AppenderHandle::on_scroll`]; dropping or calling
/// [`OnScrollSubscription::cancel`] unregisters the callback.
pub struct OnScrollSubscription {
    appender: Arc<SharedAppender>,
    id: u64,
}

impl OnScrollSubscription {
    pub fn cancel(self) {
        self.appender.remove_observer(self.id);
    }
}

impl AppenderHandle {
    /// Opens (or joins) the appender for `path`, applying `options` as the
    /// initial override on top of the built-in defaults.
    pub fn open(path: impl AsRef<Path>, options: Options) -> AppenderHandle {
        let resolved = EffectiveOptions::default().merge(&options);
        let appender = registry::acquire(path.as_ref().to_path_buf(), resolved.clone());
        AppenderHandle {
            appender,
            options: resolved,
        }
    }

    /// Opens the appender at its built-in default options.
    pub fn open_default(path: impl AsRef<Path>) -> AppenderHandle {
        Self::open(path, Options::default())
    }

    pub fn path(&self) -> &Path {
        &self.appender.filename
    }

    /// Merges `overrides` into this handle's options; affects this handle's
    /// subsequent writes only.
    pub fn with_options(&mut self, overrides: Options) -> &mut Self {
        self.options = self.options.merge(&overrides);
        self
    }

    /// Appends `record` to the buffer and drives the write path, applying
    /// this handle's currently resolved options.
    ///
    /// Returns the appender's sticky error, if one is currently latched,
    /// without distinguishing whether it came from this call or a previous
    /// one (`SPEC_FULL.md` §4.2).
    pub fn write(&self, record: &[u8]) -> Result<()> {
        match self.appender.write(record, self.options.clone()) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Forces any buffered data out to disk immediately, bypassing the
    /// flush timer and block-writer alignment.
    pub fn flush(&self) -> Result<()> {
        match self.appender.flush() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Registers a callback invoked with the archive path every time this
    /// appender rotates.
    pub fn on_scroll(&self, f: impl Fn(&Path) + Send + Sync + 'static) -> OnScrollSubscription {
        let id = self.appender.on_scroll(f);
        OnScrollSubscription {
            appender: Arc::clone(&self.appender),
            id,
        }
    }

    /// Returns the currently latched error, if any, without writing.
    pub fn last_error(&self) -> Option<Error> {
        self.appender.last_error()
    }

    /// Releases this handle's reference. When it is the last handle open on
    /// this filename, the shared appender is flushed, closed, and removed
    /// from the process-wide registry. Equivalent to dropping the handle;
    /// spelled out for callers who want the release to be visible at the
    /// call site.
    pub fn close(self) {}
}

impl Drop for AppenderHandle {
    fn drop(&mut self) {
        registry::release(&self.appender);
    }
}
