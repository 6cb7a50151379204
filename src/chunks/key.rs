//! Chunk Key Codec
//!
//! A chunk's object key is fully determined by (user, session, file, line range):
//!
//! ```text
//! {user_id}/claude-code/{session_id}/chunks/{file_name}/chunk_{first:08}_{last:08}.jsonl
//! ```
//!
//! Both line numbers are zero-padded to `LINE_DIGITS` so that lexicographic
//! key order within one file equals ascending `(first, last)` order. The
//! merger's last-write-wins rule depends on that equivalence. Numbers of
//! 10^8 or more encode with extra digits and lose it; encode does not reject
//! them.

/// Session-type path segment shared by every chunk key
pub const SESSION_TYPE_SEGMENT: &str = "claude-code";

/// Width of each zero-padded line number
pub const LINE_DIGITS: usize = 8;

const CHUNK_NAME_PREFIX: &str = "chunk_";
const CHUNK_NAME_SUFFIX: &str = ".jsonl";

/// Inclusive, 1-based line range covered by one chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LineRange {
    pub first: u64,
    pub last: u64,
}

impl LineRange {
    pub fn new(first: u64, last: u64) -> Self {
        LineRange { first, last }
    }

    /// `first >= 1 && last >= first`
    pub fn is_valid(&self) -> bool {
        self.first >= 1 && self.last >= self.first
    }

    /// Ranges share at least one line
    pub fn overlaps(&self, other: &LineRange) -> bool {
        self.first <= other.last && other.first <= self.last
    }
}

/// Encode a line range as the basename `chunk_{first:08}_{last:08}.jsonl`
pub fn encode_chunk_name(first: u64, last: u64) -> String {
    format!(
        "{}{:0width$}_{:0width$}{}",
        CHUNK_NAME_PREFIX,
        first,
        last,
        CHUNK_NAME_SUFFIX,
        width = LINE_DIGITS
    )
}

/// Decode the line range from a chunk key (full key or bare basename)
///
/// Returns `None` for anything not shaped like `chunk_########_########.jsonl`.
/// Stores can hold unrelated or legacy objects, so callers skip these keys.
pub fn decode_chunk_key(key: &str) -> Option<LineRange> {
    let basename = key.rsplit('/').next()?;
    let middle = basename
        .strip_prefix(CHUNK_NAME_PREFIX)?
        .strip_suffix(CHUNK_NAME_SUFFIX)?;
    let (first, last) = middle.split_once('_')?;

    Some(LineRange {
        first: parse_line_number(first)?,
        last: parse_line_number(last)?,
    })
}

fn parse_line_number(digits: &str) -> Option<u64> {
    if digits.len() != LINE_DIGITS || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Prefix shared by every chunk of one session, across all files
pub fn session_chunk_prefix(user_id: i64, session_id: &str) -> String {
    format!("{}/{}/{}/chunks/", user_id, SESSION_TYPE_SEGMENT, session_id)
}

/// Prefix shared by every chunk of one logical file
pub fn file_chunk_prefix(user_id: i64, session_id: &str, file_name: &str) -> String {
    format!("{}{}/", session_chunk_prefix(user_id, session_id), file_name)
}

/// Full object key for one chunk
pub fn chunk_key(user_id: i64, session_id: &str, file_name: &str, range: LineRange) -> String {
    format!(
        "{}{}",
        file_chunk_prefix(user_id, session_id, file_name),
        encode_chunk_name(range.first, range.last)
    )
}
