/// A parsed `Range: bytes=...` header value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    start_inclusive: Option<u64>,
    end_inclusive: Option<u64>,
}

impl ByteRange {
    pub fn new(start_inclusive: Option<u64>, end_inclusive: Option<u64>) -> ByteRange {
        ByteRange {
            start_inclusive,
            end_inclusive,
        }
    }

    /// Parses a single range: `bytes=a-b`, `bytes=a-` or the suffix form
    /// `bytes=-n` (last `n` bytes).
    pub fn parse<S: AsRef<str>>(s: S) -> Option<ByteRange> {
        let v = s.as_ref().trim();
        let v = v.strip_prefix("bytes=")?;

        let parts: Vec<&str> = v.split('-').collect();
        if parts.len() != 2 {
            return None;
        }

        let start_inclusive = parse_bound(parts[0])?;
        let end_inclusive = parse_bound(parts[1])?;
        Some(ByteRange {
            start_inclusive,
            end_inclusive,
        })
    }

    /// Converts the range into a `(start, end)` request against a blob of
    /// `total_size` bytes. A suffix range longer than the blob covers all
    /// of it. Returns `None` for the empty suffix `bytes=-0`.
    ///
    /// Bounds are not checked against `total_size` here; the cache reports
    /// unsatisfiable starts.
    pub fn resolve(&self, total_size: u64) -> Option<(u64, Option<u64>)> {
        match (self.start_inclusive, self.end_inclusive) {
            (Some(start), end) => Some((start, end)),
            (None, Some(0)) => None,
            (None, Some(suffix)) => Some((total_size.saturating_sub(suffix), None)),
            (None, None) => Some((0, None)),
        }
    }
}

/// Empty bound means "open"; anything else must be a number.
fn parse_bound(s: &str) -> Option<Option<u64>> {
    let s = s.trim();
    if s.is_empty() {
        Some(None)
    } else {
        s.parse::<u64>().ok().map(Some)
    }
}
