//! Source maps for compiled programs.
//!
//! Every output line is attributed to one frame of its instruction's
//! provenance and gets one segment in the wire [`SourceMap`]. The frame
//! is the innermost user frame. Without one, and with
//! [`SourceMapOptions::source_inference`] on, it is the innermost frame
//! with a file (see [`Provenance::attribution`]). The map can also be rendered as annotated
//! text for people.

use std::{
    fmt::{self, Write as _},
    path::{Path, PathBuf},
    sync::Arc,
};

use buggy::BugExt as _;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use strata_bytecode::{OriginalPosition, Segment, SourceMap};
use strata_dsl::{
    ENABLE_HINT, Frame, NodeRef, Provenance, SOURCE_UNAVAILABLE,
    provenance::syntax::{ParsedSource, parsed},
};
use tracing::{debug, warn};

use crate::{
    error::{CompileError, CompileErrorType},
    linearize::LinearProgram,
};

/// The original sources a map refers to.
#[derive(Clone, Debug, Default)]
pub struct SourceFileSet {
    files: IndexMap<PathBuf, Arc<ParsedSource>>,
}

impl SourceFileSet {
    /// An empty set. Lines whose file is not in the set are annotated
    /// with the excerpt recorded at capture time.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads every file `program` is attributed to.
    pub fn for_program(program: &LinearProgram) -> Self {
        let mut set = Self::new();
        for inst in &program.instructions {
            if let Some(file) = inst.provenance.attribution().and_then(Frame::file) {
                set.load(file);
            }
        }
        set
    }

    /// Adds `path`, read from disk the first time any compilation in the
    /// process needs it.
    pub fn load(&mut self, path: &Path) -> &ParsedSource {
        let source = self
            .files
            .entry(path.to_path_buf())
            .or_insert_with(|| parsed(path));
        if !source.is_readable() {
            warn!(path = %path.display(), "source file is unreadable");
        }
        &**source
    }

    /// Adds `path` with the given contents instead of reading it.
    pub fn insert(&mut self, path: impl Into<PathBuf>, text: impl Into<String>) {
        let path = path.into();
        let source = Arc::new(ParsedSource::from_text(path.clone(), text));
        self.files.insert(path, source);
    }

    /// Returns the source for `path`.
    pub fn get(&self, path: &Path) -> Option<&ParsedSource> {
        self.files.get(path).map(|s| &**s)
    }

    /// Returns a 1-based line of `path`.
    pub fn line(&self, path: &Path, line: u32) -> Option<&str> {
        self.get(path)?.line(line)
    }

    /// The text of the narrowest syntax node at `frame`, with runs of
    /// whitespace collapsed. Uses the node resolved at capture time if
    /// there is one.
    fn node_text(&self, frame: &Frame) -> Option<String> {
        let text = match frame.node() {
            Some(node) => node.text()?.to_owned(),
            None => {
                let source = self.files.get(frame.file()?)?;
                let column = Some(frame.column()).filter(|&c| c > 0);
                NodeRef::locate(source, frame.line(), column)?
                    .text()?
                    .to_owned()
            }
        };
        Some(text.split_whitespace().collect::<Vec<_>>().join(" "))
    }

    /// The number of files.
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Reports whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Options for [`build`].
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SourceMapOptions {
    /// The name of the generated file.
    pub file: String,
    /// Written as `sourceRoot`. Source paths under it are made relative
    /// to it.
    pub source_root: String,
    /// Attribute lines with no user frame to the innermost frame that has
    /// a file, instead of leaving them unmapped.
    pub source_inference: bool,
}

impl Default for SourceMapOptions {
    fn default() -> Self {
        Self {
            file: "program.teal".to_owned(),
            source_root: String::new(),
            source_inference: true,
        }
    }
}

/// How an output line was attributed.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Attribution {
    /// To a frame of user code.
    User,
    /// To an internal frame, for lack of a user frame.
    Inferred,
    /// Not at all. The line has no segment.
    Unmapped,
}

impl fmt::Display for Attribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::User => "user",
            Self::Inferred => "inferred",
            Self::Unmapped => "unmapped",
        })
    }
}

/// Picks the frame a line is attributed to.
fn attribute(provenance: &Provenance, inference: bool) -> (Option<&Frame>, Attribution) {
    if let Some(user) = provenance.innermost_user() {
        let status = match user.file() {
            Some(_) => Attribution::User,
            None => Attribution::Unmapped,
        };
        return (Some(user), status);
    }
    if !inference {
        return (None, Attribution::Unmapped);
    }
    match provenance.attribution() {
        Some(frame) if frame.file().is_some() => (Some(frame), Attribution::Inferred),
        frame => (frame, Attribution::Unmapped),
    }
}

/// How [`ProgramSourceMap::render`] annotates output lines.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Annotation {
    /// The attributed source line.
    #[default]
    Source,
    /// The text of the narrowest syntax node at the attributed position,
    /// or the source line when no node was found.
    Node,
    /// How each line was attributed, then every recorded frame.
    Chain,
}

#[derive(Clone, Debug, PartialEq)]
struct Line {
    output: String,
    provenance: Provenance,
    status: Attribution,
    source: Option<String>,
    node: Option<String>,
}

impl Line {
    fn frame(&self) -> Option<&Frame> {
        match self.status {
            Attribution::Inferred => self.provenance.attribution(),
            Attribution::User | Attribution::Unmapped => self.provenance.innermost_user(),
        }
    }
}

/// A compiled program's source map.
#[derive(Clone, Debug, PartialEq)]
pub struct ProgramSourceMap {
    map: SourceMap,
    lines: Vec<Line>,
}

/// Builds the source map of `program`.
///
/// Fails with [`CompileErrorType::SourceMapUnavailable`] if no line is
/// mapped, which is always the case when provenance capture was off.
pub fn build(
    program: &LinearProgram,
    sources: &SourceFileSet,
    options: &SourceMapOptions,
) -> Result<ProgramSourceMap, CompileError> {
    let mut map = SourceMap::new(options.file.as_str(), options.source_root.as_str());
    let root = Path::new(&options.source_root);
    let mut lines = Vec::with_capacity(program.len());
    let mut segments = Vec::with_capacity(program.len());
    let mut mapped = 0usize;
    for inst in &program.instructions {
        let (frame, status) = attribute(&inst.provenance, options.source_inference);
        let file = frame.and_then(|frame| Some((frame, frame.file()?)));
        match file {
            Some((frame, file)) => {
                let name = if options.source_root.is_empty() {
                    file
                } else {
                    file.strip_prefix(root).unwrap_or(file)
                };
                let source = map
                    .source_index(&name.display().to_string())
                    .assume("source index fits in a segment")?;
                mapped = mapped.saturating_add(1);
                segments.push(vec![Segment {
                    column: 0,
                    original: Some(OriginalPosition {
                        source,
                        line: frame.line().saturating_sub(1),
                        column: frame.column().saturating_sub(1),
                    }),
                }]);
            }
            None => segments.push(Vec::new()),
        }
        let source = frame.map(|frame| {
            frame
                .file()
                .and_then(|file| sources.line(file, frame.line()))
                .map_or_else(|| frame.excerpt(), str::trim)
                .to_owned()
        });
        let node = frame.and_then(|frame| sources.node_text(frame));
        lines.push(Line {
            output: inst.op.to_string(),
            provenance: inst.provenance.clone(),
            status,
            source,
            node,
        });
    }
    if mapped == 0 {
        return Err(CompileError::new(CompileErrorType::SourceMapUnavailable {
            hint: ENABLE_HINT,
        }));
    }
    map.set_lines(segments);
    debug!(
        lines = lines.len(),
        mapped,
        sources = map.sources.len(),
        "built source map"
    );
    Ok(ProgramSourceMap { map, lines })
}

impl ProgramSourceMap {
    /// The wire-format map.
    pub fn source_map(&self) -> &SourceMap {
        &self.map
    }

    /// Consumes the map, returning the wire-format map.
    pub fn into_source_map(self) -> SourceMap {
        self.map
    }

    /// Serializes the wire-format map.
    pub fn to_json(&self) -> String {
        self.map.to_json()
    }

    /// The number of output lines.
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// Reports whether there are no output lines.
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// The frame a zero-based output line is attributed to.
    pub fn attribution(&self, line: usize) -> Option<&Frame> {
        self.lines.get(line)?.frame()
    }

    /// How a zero-based output line was attributed.
    pub fn status(&self, line: usize) -> Option<Attribution> {
        self.lines.get(line).map(|l| l.status)
    }

    /// The full provenance of a zero-based output line.
    pub fn provenance(&self, line: usize) -> Option<&Provenance> {
        self.lines.get(line).map(|l| &l.provenance)
    }

    /// Renders the program with every output line annotated.
    pub fn render(&self, annotation: Annotation) -> String {
        let width = self
            .lines
            .iter()
            .map(|l| l.output.len())
            .max()
            .unwrap_or(0);
        let mut out = String::new();
        for line in &self.lines {
            let frame = line.frame();
            match annotation {
                Annotation::Source | Annotation::Node => {
                    let note = match annotation {
                        Annotation::Node => line.node.as_ref().or(line.source.as_ref()),
                        _ => line.source.as_ref(),
                    };
                    match (frame, note) {
                        (Some(frame), Some(note)) => {
                            let _ = writeln!(
                                out,
                                "{:<width$}  // {}:{}  {note}",
                                line.output,
                                display_file(frame),
                                frame.line(),
                            );
                        }
                        _ => {
                            let _ = writeln!(out, "{}", line.output);
                        }
                    }
                }
                Annotation::Chain => {
                    let _ = writeln!(out, "{}  [{}]", line.output, line.status);
                    for f in line.provenance.frames() {
                        let marker = if frame.is_some_and(|a| std::ptr::eq(a, f)) {
                            '>'
                        } else {
                            ' '
                        };
                        let _ = write!(out, "  {marker} {f}");
                        if f.is_internal() {
                            out.push_str(" (internal)");
                        }
                        out.push('\n');
                    }
                }
            }
        }
        out
    }
}

fn display_file(frame: &Frame) -> String {
    frame
        .file()
        .map_or_else(|| SOURCE_UNAVAILABLE.to_owned(), |f| f.display().to_string())
}

#[cfg(test)]
mod tests {
    use strata_bytecode::{Literal, Op, Version};
    use test_log::test;

    use super::*;
    use crate::linearize::Instruction;

    fn at(file: &str, line: u32, column: u32) -> Provenance {
        Provenance::from_frames(vec![
            Frame::synthetic(Some(PathBuf::from("harness.rs")), 1, Some(1), "harness", true),
            Frame::synthetic(Some(PathBuf::from(file)), line, Some(column), "user", false)
                .with_excerpt("let x = p.int(1);"),
        ])
    }

    fn program(provs: Vec<Provenance>) -> LinearProgram {
        let ops = [
            Op::Pragma(Version::V4),
            Op::Push(Literal::Int(1)),
            Op::Return,
        ];
        LinearProgram {
            version: Version::V4,
            instructions: ops
                .into_iter()
                .zip(provs)
                .map(|(op, provenance)| Instruction { op, provenance })
                .collect(),
            slot_count: 0,
            pool: Vec::new(),
        }
    }

    #[test]
    fn test_build_segments() {
        let prog = program(vec![at("a.rs", 3, 5), at("b.rs", 10, 1), at("a.rs", 4, 9)]);
        let sm = build(&prog, &SourceFileSet::new(), &SourceMapOptions::default()).unwrap();
        let map = sm.source_map();
        assert_eq!(map.sources, vec!["a.rs", "b.rs"]);
        assert_eq!(
            map.lookup(2),
            Some(OriginalPosition {
                source: 0,
                line: 3,
                column: 8
            })
        );
        assert_eq!(map.encode_mappings(), "AAEI;ACOJ;ADNQ");
        assert_eq!(sm.attribution(1).map(Frame::line), Some(10));
        let back = SourceMap::from_json(&sm.to_json()).unwrap();
        assert_eq!(&back, map);
    }

    #[test]
    fn test_unavailable_without_provenance() {
        let prog = program(vec![Provenance::none(); 3]);
        let err = build(&prog, &SourceFileSet::new(), &SourceMapOptions::default()).unwrap_err();
        match err.err_type() {
            CompileErrorType::SourceMapUnavailable { hint } => {
                assert!(hint.contains("STRATA_PROVENANCE"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_source_root_is_stripped() {
        let prog = program(vec![at("/work/src/main.rs", 1, 1); 3]);
        let options = SourceMapOptions {
            file: "out.teal".to_owned(),
            source_root: "/work".to_owned(),
            ..SourceMapOptions::default()
        };
        let sm = build(&prog, &SourceFileSet::new(), &options).unwrap();
        assert_eq!(sm.source_map().sources, vec!["src/main.rs"]);
        assert_eq!(sm.source_map().source_root, "/work");
    }

    #[test]
    fn test_render() {
        let mut files = SourceFileSet::new();
        files.insert("a.rs", "fn main() {\n    let x = p.int(1);\n}\n");
        let prog = program(vec![at("a.rs", 2, 13), at("a.rs", 2, 13), Provenance::none()]);
        let sm = build(&prog, &files, &SourceMapOptions::default()).unwrap();
        let want = "\
#pragma version 4  // a.rs:2  let x = p.int(1);
pushint 1          // a.rs:2  let x = p.int(1);
return
";
        assert_eq!(sm.render(Annotation::Source), want);
        let node = sm.render(Annotation::Node);
        assert!(node.lines().next().unwrap().ends_with("p.int(1)"));

        let chain = sm.render(Annotation::Chain);
        let want = "\
#pragma version 4  [user]
    harness.rs:1:1 in harness (internal)
  > a.rs:2:13 in user
";
        assert!(chain.starts_with(want));
    }

    fn internal_only() -> Provenance {
        Provenance::from_frames(vec![
            Frame::synthetic(Some(PathBuf::from("helpers.rs")), 7, Some(5), "helper", true),
            Frame::synthetic(None, 0, None, "ffi", true),
        ])
    }

    #[test]
    fn test_statuses() {
        let prog = program(vec![at("a.rs", 3, 5), internal_only(), Provenance::none()]);
        let sm = build(&prog, &SourceFileSet::new(), &SourceMapOptions::default()).unwrap();
        assert_eq!(sm.status(0), Some(Attribution::User));
        assert_eq!(sm.status(1), Some(Attribution::Inferred));
        assert_eq!(sm.status(2), Some(Attribution::Unmapped));
        assert_eq!(sm.status(3), None);
        assert_eq!(sm.attribution(1).map(Frame::line), Some(7));
        assert_eq!(sm.source_map().sources, vec!["a.rs", "helpers.rs"]);
        assert_eq!(sm.source_map().lookup(2), None);

        let chain = sm.render(Annotation::Chain);
        let want = "\
pushint 1  [inferred]
  > helpers.rs:7:5 in helper (internal)
";
        assert!(chain.contains(want), "{chain}");
        assert!(chain.ends_with("return  [unmapped]\n"), "{chain}");
    }

    #[test]
    fn test_inference_off_leaves_internal_lines_unmapped() {
        let options = SourceMapOptions {
            source_inference: false,
            ..SourceMapOptions::default()
        };
        let prog = program(vec![at("a.rs", 3, 5), internal_only(), at("a.rs", 4, 1)]);
        let sm = build(&prog, &SourceFileSet::new(), &options).unwrap();
        assert_eq!(sm.status(1), Some(Attribution::Unmapped));
        assert_eq!(sm.attribution(1), None);
        assert_eq!(sm.source_map().sources, vec!["a.rs"]);
        assert_eq!(sm.source_map().lookup(1), None);
        assert!(sm.source_map().lines()[1].is_empty());
        assert!(sm.render(Annotation::Source).contains("\npushint 1\n"));

        let prog = program(vec![internal_only(); 3]);
        let err = build(&prog, &SourceFileSet::new(), &options).unwrap_err();
        assert!(matches!(
            err.err_type(),
            CompileErrorType::SourceMapUnavailable { .. }
        ));
    }
}
