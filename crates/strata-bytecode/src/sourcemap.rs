//! The revision 3 source map format.
//!
//! Positions are zero-based. Within `mappings`, lines are separated by
//! `;` and segments by `,`. The generated column restarts at zero on
//! every line; the source index, source line and source column are
//! deltas against the previous segment anywhere in the map.

use serde::{Deserialize, Serialize};

use crate::vlq::{self, VlqError};

/// The only revision this crate reads or writes.
pub const SOURCE_MAP_VERSION: u32 = 3;

/// An error reading a serialized [`SourceMap`].
#[derive(Debug, thiserror::Error)]
pub enum SourceMapError {
    /// The document is not valid JSON for the schema.
    #[error("invalid source map json: {0}")]
    Json(#[from] serde_json::Error),
    /// The `version` field is not 3.
    #[error("unsupported source map version {0}")]
    Version(u32),
    /// The `names` field is not empty.
    #[error("symbol names are not supported")]
    Names,
    /// A segment could not be decoded.
    #[error("line {line}: {err}")]
    Vlq {
        /// Zero-based generated line
        line: usize,
        /// The decoding error
        err: VlqError,
    },
    /// A segment does not have 1 or 4 fields.
    #[error("line {line}: segment has {fields} fields")]
    SegmentLength {
        /// Zero-based generated line
        line: usize,
        /// The number of decoded fields
        fields: usize,
    },
    /// A delta leads to a negative or out of range position.
    #[error("line {line}: position out of range")]
    OutOfRange {
        /// Zero-based generated line
        line: usize,
    },
    /// A segment refers to a source that is not listed.
    #[error("line {line}: source index {index} not in sources")]
    UnknownSource {
        /// Zero-based generated line
        line: usize,
        /// The bad index
        index: u32,
    },
    /// The document is valid but not in the form [`SourceMap::to_json`]
    /// writes, so it would not re-encode to the same bytes.
    #[error("source map json is not in canonical form")]
    NonCanonical,
}

/// A position in an original source.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct OriginalPosition {
    /// Index into [`SourceMap::sources`]
    pub source: u32,
    /// Zero-based line
    pub line: u32,
    /// Zero-based column
    pub column: u32,
}

/// One mapping on a generated line.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Segment {
    /// Zero-based generated column
    pub column: u32,
    /// Where the generated text came from, if anywhere
    pub original: Option<OriginalPosition>,
}

/// A decoded source map.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct SourceMap {
    /// The generated file this map describes
    pub file: String,
    /// Prefix for every entry in `sources`
    pub source_root: String,
    /// Original source paths, indexed by [`OriginalPosition::source`]
    pub sources: Vec<String>,
    lines: Vec<Vec<Segment>>,
}

/// The JSON document, with fields in the order they are written.
#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawSourceMap {
    version: u32,
    sources: Vec<String>,
    names: Vec<String>,
    mappings: String,
    file: String,
    #[serde(rename = "sourceRoot")]
    source_root: String,
}

impl SourceMap {
    /// Creates an empty map for `file`.
    pub fn new(file: impl Into<String>, source_root: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            source_root: source_root.into(),
            sources: Vec::new(),
            lines: Vec::new(),
        }
    }

    /// Returns the index of `path` in `sources`, adding it if needed.
    ///
    /// Returns `None`, and leaves `sources` unchanged, if the index does
    /// not fit in a segment.
    pub fn source_index(&mut self, path: &str) -> Option<u32> {
        if let Some(idx) = self.sources.iter().position(|s| s == path) {
            return u32::try_from(idx).ok();
        }
        let idx = u32::try_from(self.sources.len()).ok()?;
        self.sources.push(path.to_owned());
        Some(idx)
    }

    /// Segments for each generated line.
    pub fn lines(&self) -> &[Vec<Segment>] {
        &self.lines
    }

    /// Replaces the segments of every generated line.
    ///
    /// A lone empty line is stored as no lines at all: both encode to an
    /// empty `mappings` string.
    pub fn set_lines(&mut self, mut lines: Vec<Vec<Segment>>) {
        if matches!(lines.as_slice(), [only] if only.is_empty()) {
            lines.clear();
        }
        self.lines = lines;
    }

    /// Returns the original position of the first segment on a generated
    /// line.
    pub fn lookup(&self, line: usize) -> Option<OriginalPosition> {
        self.lines.get(line)?.first()?.original
    }

    /// Encodes the `mappings` string.
    pub fn encode_mappings(&self) -> String {
        let mut out = String::new();
        let mut prev = OriginalPosition {
            source: 0,
            line: 0,
            column: 0,
        };
        for (i, line) in self.lines.iter().enumerate() {
            if i > 0 {
                out.push(';');
            }
            let mut prev_column: u32 = 0;
            for (j, seg) in line.iter().enumerate() {
                if j > 0 {
                    out.push(',');
                }
                vlq::encode(delta(seg.column, prev_column), &mut out);
                prev_column = seg.column;
                if let Some(pos) = seg.original {
                    vlq::encode(delta(pos.source, prev.source), &mut out);
                    vlq::encode(delta(pos.line, prev.line), &mut out);
                    vlq::encode(delta(pos.column, prev.column), &mut out);
                    prev = pos;
                }
            }
        }
        out
    }

    /// Decodes a `mappings` string into per-line segments.
    pub fn decode_mappings(mappings: &str) -> Result<Vec<Vec<Segment>>, SourceMapError> {
        let mut lines = Vec::new();
        let mut prev = [0i64; 3];
        for (line, text) in mappings.split(';').enumerate() {
            let mut segments = Vec::new();
            let mut prev_column: i64 = 0;
            if !text.is_empty() {
                for field in text.split(',') {
                    let values =
                        vlq::decode(field).map_err(|err| SourceMapError::Vlq { line, err })?;
                    let column = apply(prev_column, values.first().copied(), line)?;
                    prev_column = i64::from(column);
                    let original = match values.len() {
                        1 => None,
                        4 => {
                            let source = apply(prev[0], values.get(1).copied(), line)?;
                            let src_line = apply(prev[1], values.get(2).copied(), line)?;
                            let src_column = apply(prev[2], values.get(3).copied(), line)?;
                            prev = [
                                i64::from(source),
                                i64::from(src_line),
                                i64::from(src_column),
                            ];
                            Some(OriginalPosition {
                                source,
                                line: src_line,
                                column: src_column,
                            })
                        }
                        fields => return Err(SourceMapError::SegmentLength { line, fields }),
                    };
                    segments.push(Segment { column, original });
                }
            }
            lines.push(segments);
        }
        // An empty string is zero lines rather than one empty line.
        if mappings.is_empty() {
            lines.clear();
        }
        Ok(lines)
    }

    /// Serializes the map as compact JSON.
    pub fn to_json(&self) -> String {
        let raw = RawSourceMap {
            version: SOURCE_MAP_VERSION,
            sources: self.sources.clone(),
            names: Vec::new(),
            mappings: self.encode_mappings(),
            file: self.file.clone(),
            source_root: self.source_root.clone(),
        };
        // Serializing plain strings and integers cannot fail.
        serde_json::to_string(&raw).unwrap_or_default()
    }

    /// Parses a JSON source map.
    ///
    /// Only the exact text [`to_json`](Self::to_json) writes is accepted:
    /// fields in order, no whitespace.
    pub fn from_json(json: &str) -> Result<Self, SourceMapError> {
        let raw: RawSourceMap = serde_json::from_str(json)?;
        if raw.version != SOURCE_MAP_VERSION {
            return Err(SourceMapError::Version(raw.version));
        }
        if !raw.names.is_empty() {
            return Err(SourceMapError::Names);
        }
        let lines = Self::decode_mappings(&raw.mappings)?;
        for (line, segments) in lines.iter().enumerate() {
            for seg in segments {
                if let Some(pos) = seg.original {
                    let known = usize::try_from(pos.source).is_ok_and(|i| i < raw.sources.len());
                    if !known {
                        return Err(SourceMapError::UnknownSource {
                            line,
                            index: pos.source,
                        });
                    }
                }
            }
        }
        let map = Self {
            file: raw.file,
            source_root: raw.source_root,
            sources: raw.sources,
            lines,
        };
        if map.to_json() != json {
            return Err(SourceMapError::NonCanonical);
        }
        Ok(map)
    }
}

fn delta(cur: u32, prev: u32) -> i64 {
    i64::from(cur).wrapping_sub(i64::from(prev))
}

fn apply(prev: i64, delta: Option<i64>, line: usize) -> Result<u32, SourceMapError> {
    let delta = delta.ok_or(SourceMapError::SegmentLength { line, fields: 0 })?;
    prev.checked_add(delta)
        .and_then(|v| u32::try_from(v).ok())
        .ok_or(SourceMapError::OutOfRange { line })
}
