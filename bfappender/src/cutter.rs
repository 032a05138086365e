use crate::options::{EffectiveOptions, ScrollBySize};

/// Outcome of choosing how much of the buffered data the next write pass
/// should push out.
pub(crate) struct Slice {
    /// Number of leading bytes of the peeked buffer to write this pass.
    pub len: usize,
    /// Set when the size threshold was exceeded, independent of whether this
    /// pass actually writes anything: a rotation must follow the write.
    pub forces_rotation: bool,
}

/// Implements the record-boundary cutter from `SPEC_FULL.md` §4.5(b): picks
/// where in `buffered` the next write should stop so that, when
/// `scroll_by_size` would otherwise be exceeded, the cut prefers to land on a
/// configured record-end marker rather than splitting a record.
///
/// Ported field-for-field from `getwritingdata` in
/// `original_source/bfappender/internal.go`.
pub(crate) fn choose_slice(opts: &EffectiveOptions, file_size: i64, buffered: &[u8]) -> Slice {
    let limit = match opts.scroll_by_size {
        ScrollBySize::Never => {
            return Slice {
                len: buffered.len(),
                forces_rotation: false,
            };
        }
        ScrollBySize::Bytes(limit) => limit,
    };

    if file_size + buffered.len() as i64 <= limit {
        return Slice {
            len: buffered.len(),
            forces_rotation: false,
        };
    }

    // The file would grow past the limit if we wrote everything we have.
    if file_size >= limit {
        // Already at or past the limit: write nothing, rotate first.
        return Slice {
            len: 0,
            forces_rotation: true,
        };
    }

    let raw_cut = (limit - file_size) as usize;
    let raw_cut = raw_cut.min(buffered.len());

    if opts.record_end_flag.is_empty() {
        return Slice {
            len: raw_cut,
            forces_rotation: true,
        };
    }

    let len = if opts.backward_find_end_flag {
        find_backward_then_forward(buffered, raw_cut, &opts.record_end_flag).unwrap_or(raw_cut)
    } else {
        find_forward_then_backward(buffered, raw_cut, &opts.record_end_flag).unwrap_or(raw_cut)
    };

    Slice {
        len,
        forces_rotation: true,
    }
}

/// Search backward from `raw_cut` for the marker; if absent, search forward
/// from `raw_cut` to the end of the buffer.
fn find_backward_then_forward(buffered: &[u8], raw_cut: usize, marker: &[u8]) -> Option<usize> {
    if let Some(idx) = rfind(&buffered[..raw_cut], marker) {
        return Some(idx + marker.len());
    }
    find(&buffered[raw_cut..], marker).map(|idx| raw_cut + idx + marker.len())
}

/// Search forward from `raw_cut` to the end of the buffer for the marker; if
/// absent, search backward from `raw_cut`.
fn find_forward_then_backward(buffered: &[u8], raw_cut: usize, marker: &[u8]) -> Option<usize> {
    if let Some(idx) = find(&buffered[raw_cut..], marker) {
        return Some(raw_cut + idx + marker.len());
    }
    rfind(&buffered[..raw_cut], marker).map(|idx| idx + marker.len())
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn rfind(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    haystack.windows(needle.len()).rposition(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::EffectiveOptions;

    fn opts(scroll: i64, marker: &[u8], backward: bool) -> EffectiveOptions {
        let mut o = EffectiveOptions::default();
        o.scroll_by_size = ScrollBySize::Bytes(scroll);
        o.record_end_flag = marker.to_vec();
        o.backward_find_end_flag = backward;
        o
    }

    #[test]
    fn under_limit_writes_everything() {
        let o = opts(100, b"\n", false);
        let s = choose_slice(&o, 0, b"hello");
        assert_eq!(s.len, 5);
        assert!(!s.forces_rotation);
    }

    #[test]
    fn already_at_limit_writes_nothing_and_rotates() {
        let o = opts(5, b"\n", false);
        let s = choose_slice(&o, 5, b"hello");
        assert_eq!(s.len, 0);
        assert!(s.forces_rotation);
    }

    #[test]
    fn no_marker_truncates_raw() {
        let mut o = opts(5, b"", false);
        o.record_end_flag.clear();
        let s = choose_slice(&o, 0, b"hello world");
        assert_eq!(s.len, 5);
        assert!(s.forces_rotation);
    }

    #[test]
    fn forward_search_prefers_marker_after_cut() {
        let o = opts(5, b"|", false);
        // cut at offset 5 ("hello"), marker found forward at offset 7.
        let s = choose_slice(&o, 0, b"hello|world");
        assert_eq!(s.len, 6);
    }

    #[test]
    fn forward_search_falls_back_to_backward_when_not_found_ahead() {
        let o = opts(8, b"|", false);
        // cut at offset 8, no marker after that point; marker is at offset 2 (before cut).
        let s = choose_slice(&o, 0, b"he|llo world");
        assert_eq!(s.len, 3);
    }

    #[test]
    fn backward_search_prefers_marker_before_cut() {
        let o = opts(8, b"|", true);
        let s = choose_slice(&o, 0, b"he|llo world");
        assert_eq!(s.len, 3);
    }

    #[test]
    fn no_marker_anywhere_force_truncates() {
        let o = opts(5, b"|", false);
        let s = choose_slice(&o, 0, b"helloworld");
        assert_eq!(s.len, 5);
        assert!(s.forces_rotation);
    }
}
