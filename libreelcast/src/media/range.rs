//! `Range: bytes=` parsing for single ranges

/// Inclusive byte range within a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    /// Number of bytes covered; never zero
    pub fn length(&self) -> u64 {
        self.end - self.start + 1
    }

    pub fn content_range(&self, file_size: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, file_size)
    }
}

/// How a request's `Range` header should be answered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeRequest {
    /// No usable range; send the whole file with 200
    Full,
    /// Send 206 with this slice
    Partial(ByteRange),
    /// Send 416; the range starts past the end of the file
    Unsatisfiable,
}

/// Interpret a `Range` header value against a file of `file_size` bytes
///
/// Malformed values and multi-range requests are ignored (full response),
/// as HTTP permits.
pub fn parse_range_header(range_str: &str, file_size: u64) -> RangeRequest {
    let range_part = match range_str.trim().strip_prefix("bytes=") {
        Some(part) => part.trim(),
        None => return RangeRequest::Full,
    };

    if range_part.contains(',') {
        return RangeRequest::Full;
    }

    let (start_s, end_s) = match range_part.split_once('-') {
        Some(parts) => parts,
        None => return RangeRequest::Full,
    };
    let (start_s, end_s) = (start_s.trim(), end_s.trim());

    if start_s.is_empty() {
        // Suffix range: "-500" (last 500 bytes)
        let suffix_len = match end_s.parse::<u64>() {
            Ok(n) => n,
            Err(_) => return RangeRequest::Full,
        };
        if suffix_len == 0 || file_size == 0 {
            return RangeRequest::Unsatisfiable;
        }
        return RangeRequest::Partial(ByteRange {
            start: file_size.saturating_sub(suffix_len),
            end: file_size - 1,
        });
    }

    let start = match start_s.parse::<u64>() {
        Ok(n) => n,
        Err(_) => return RangeRequest::Full,
    };

    let end = if end_s.is_empty() {
        None
    } else {
        match end_s.parse::<u64>() {
            Ok(n) if n >= start => Some(n),
            _ => return RangeRequest::Full,
        }
    };

    if start >= file_size {
        return RangeRequest::Unsatisfiable;
    }

    let last = file_size - 1;
    RangeRequest::Partial(ByteRange {
        start,
        end: end.map_or(last, |e| e.min(last)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn partial(start: u64, end: u64) -> RangeRequest {
        RangeRequest::Partial(ByteRange { start, end })
    }

    #[test]
    fn test_closed_range() {
        assert_eq!(parse_range_header("bytes=0-99", 1000), partial(0, 99));
        assert_eq!(parse_range_header("bytes=100-100", 1000), partial(100, 100));
    }

    #[test]
    fn test_end_clamped_to_file() {
        assert_eq!(parse_range_header("bytes=900-5000", 1000), partial(900, 999));
    }

    #[test]
    fn test_open_ended_range() {
        assert_eq!(parse_range_header("bytes=500-", 1000), partial(500, 999));
    }

    #[test]
    fn test_suffix_range() {
        assert_eq!(parse_range_header("bytes=-100", 1000), partial(900, 999));
        assert_eq!(parse_range_header("bytes=-5000", 1000), partial(0, 999));
    }

    #[test]
    fn test_unsatisfiable() {
        assert_eq!(parse_range_header("bytes=1000-", 1000), RangeRequest::Unsatisfiable);
        assert_eq!(parse_range_header("bytes=2000-3000", 1000), RangeRequest::Unsatisfiable);
        assert_eq!(parse_range_header("bytes=-0", 1000), RangeRequest::Unsatisfiable);
        assert_eq!(parse_range_header("bytes=0-", 0), RangeRequest::Unsatisfiable);
    }

    #[test]
    fn test_malformed_falls_back_to_full() {
        for header in [
            "items=0-10",
            "bytes=abc-def",
            "bytes=10",
            "bytes=50-10",
            "bytes=-",
            "bytes=0-10,20-30",
        ] {
            assert_eq!(
                parse_range_header(header, 1000),
                RangeRequest::Full,
                "{} should be ignored",
                header
            );
        }
    }

    #[test]
    fn test_content_range_header() {
        let range = ByteRange { start: 0, end: 99 };
        assert_eq!(range.length(), 100);
        assert_eq!(range.content_range(1000), "bytes 0-99/1000");
    }
}
