use std::{path::PathBuf, sync::Arc, sync::LazyLock};

use dashmap::DashMap;

use crate::{driver::SharedAppender, options::EffectiveOptions};

/// Process-wide table of live appenders, keyed by canonicalized filename.
///
/// Modeled on `vector_buffers::buffer_usage_data::BUFFER_COUNTERS`: a
/// lazily-initialized `DashMap` behind a static, sharding its own locks so
/// no separate registry-wide mutex is needed. `SPEC_FULL.md` §4.1 requires
/// that every handle opened for the same filename observe the same
/// in-memory state, which this table is what makes true.
static APPENDERS: LazyLock<DashMap<PathBuf, Arc<SharedAppender>>> = LazyLock::new(DashMap::new);

/// Normalizes `path` lexically (collapsing `.`/`..` components) rather than
/// via `std::fs::canonicalize`, since the target file commonly doesn't exist
/// yet on first `acquire` — canonicalization would fail or silently fall
/// back to the un-normalized path in that case, defeating dedup for two
/// handles that spell the same file differently (`./a/b.log` vs `a/b.log`).
fn canonical_key(path: &std::path::Path) -> PathBuf {
    use std::path::Component;
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Returns the shared appender for `path`, creating it with `options` if this
/// is the first handle for that filename, and bumping its handle refcount
/// either way. Every call must be paired with a later [`release`].
pub(crate) fn acquire(path: PathBuf, options: EffectiveOptions) -> Arc<SharedAppender> {
    let key = canonical_key(&path);
    let appender = APPENDERS
        .entry(key)
        .or_insert_with(|| SharedAppender::new(path, options))
        .clone();
    appender.handles.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    appender
}

/// Drops one handle's reference to `appender`. Once the count reaches zero,
/// the appender is flushed and closed and its entry removed from the
/// registry, so that a later `acquire` for the same filename starts fresh
/// rather than resuming mid-stream state, per `SPEC_FULL.md` §4.1.
pub(crate) fn release(appender: &Arc<SharedAppender>) {
    let remaining = appender.handles.fetch_sub(1, std::sync::atomic::Ordering::SeqCst) - 1;
    if remaining == 0 {
        appender.close();
        let key = canonical_key(&appender.filename);
        APPENDERS.remove_if(&key, |_, current| Arc::ptr_eq(current, appender));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::EffectiveOptions;

    #[test]
    fn acquire_for_same_path_returns_the_same_instance() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shared.log");
        let a = acquire(path.clone(), EffectiveOptions::default());
        let b = acquire(path.clone(), EffectiveOptions::default());
        assert!(Arc::ptr_eq(&a, &b));
        release(&a);
        release(&b);
    }

    #[test]
    fn release_to_zero_allows_a_fresh_instance_later() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reused.log");
        let a = acquire(path.clone(), EffectiveOptions::default());
        release(&a);
        let b = acquire(path.clone(), EffectiveOptions::default());
        assert!(!Arc::ptr_eq(&a, &b));
        release(&b);
    }
}
