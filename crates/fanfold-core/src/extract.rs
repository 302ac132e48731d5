//! Embedded block extraction.
//!
//! Splits a synthesized answer into prose and one delimited block (typically
//! generated code). Only the first start marker and the first end marker after
//! it are honoured; anything after that end marker is dropped, including any
//! further blocks. Matching is plain substring search, never greedy or nested.

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Literal delimiters around an embedded block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockMarkers {
    pub start: String,
    pub end: String,
}

impl BlockMarkers {
    pub fn new(start: impl Into<String>, end: impl Into<String>) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
        }
    }

    /// `<code>` / `</code>`.
    pub fn code() -> Self {
        Self::new("<code>", "</code>")
    }

    /// True when `text` contains either marker.
    pub fn occur_in(&self, text: &str) -> bool {
        (!self.start.is_empty() && text.contains(&self.start))
            || (!self.end.is_empty() && text.contains(&self.end))
    }
}

impl Default for BlockMarkers {
    fn default() -> Self {
        Self::code()
    }
}

/// The terminal artifact of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalAnswer {
    pub prose: String,
    pub extracted_block: Option<String>,
}

impl FinalAnswer {
    /// An answer with no block: the whole text, trimmed.
    pub fn prose_only(text: &str) -> Self {
        Self {
            prose: text.trim().to_string(),
            extracted_block: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    Scan,
    FoundStart { start_at: usize },
    FoundEnd { start_at: usize, end_at: usize },
    Done(Option<(usize, usize)>),
}

/// Split `text` into `(prose, block)`.
///
/// With both markers present in order, prose is the text before the start
/// marker and the block is the text strictly between the markers, each
/// trimmed. Otherwise the result is the whole input trimmed with no block.
pub fn extract_block(text: &str, markers: &BlockMarkers) -> FinalAnswer {
    let mut state = ScanState::Scan;

    let span = loop {
        state = match state {
            ScanState::Scan => {
                if markers.start.is_empty() || markers.end.is_empty() {
                    ScanState::Done(None)
                } else {
                    match text.find(&markers.start) {
                        Some(start_at) => ScanState::FoundStart { start_at },
                        None => ScanState::Done(None),
                    }
                }
            }
            ScanState::FoundStart { start_at } => {
                let body_at = start_at + markers.start.len();
                match text[body_at..].find(&markers.end) {
                    Some(rel) => ScanState::FoundEnd {
                        start_at,
                        end_at: body_at + rel,
                    },
                    None => ScanState::Done(None),
                }
            }
            ScanState::FoundEnd { start_at, end_at } => ScanState::Done(Some((start_at, end_at))),
            ScanState::Done(span) => break span,
        };
    };

    match span {
        Some((start_at, end_at)) => {
            let body_at = start_at + markers.start.len();
            let trailing = &text[end_at + markers.end.len()..];
            if trailing.contains(&markers.start) {
                debug!(
                    trailing_len = trailing.len(),
                    "additional delimited blocks ignored; only the first is extracted"
                );
            }
            FinalAnswer {
                prose: text[..start_at].trim().to_string(),
                extracted_block: Some(text[body_at..end_at].trim().to_string()),
            }
        }
        None => FinalAnswer::prose_only(text),
    }
}
