//! Parsed source files, used to locate the syntax node a frame points at.

use std::{
    collections::HashMap,
    fmt, fs,
    path::{Path, PathBuf},
    sync::{Arc, OnceLock, PoisonError, RwLock},
};

use syn::{spanned::Spanned, visit::Visit};
use tracing::debug;

/// A 1-based line and column.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct LineCol {
    /// The line, starting at 1.
    pub line: u32,
    /// The column in characters, starting at 1.
    pub column: u32,
}

/// An expression or statement in a parsed source file.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SyntaxNode {
    /// A short name for the node, e.g. `"method_call"` or `"stmt"`.
    pub kind: &'static str,
    /// The first character of the node.
    pub start: LineCol,
    /// One past the last character of the node.
    pub end: LineCol,
}

impl SyntaxNode {
    fn contains(&self, at: LineCol) -> bool {
        self.start <= at && at <= self.end
    }

    // Ordered so that a node nested inside another compares smaller.
    fn extent(&self) -> (u32, i64) {
        (
            self.end.line.saturating_sub(self.start.line),
            i64::from(self.end.column).saturating_sub(i64::from(self.start.column)),
        )
    }
}

/// A source file and the syntax nodes found in it.
///
/// Unreadable or unparsable files are still represented so that the
/// failure is only paid for once.
pub struct ParsedSource {
    path: PathBuf,
    text: Option<String>,
    line_starts: Vec<usize>,
    nodes: Vec<SyntaxNode>,
}

impl ParsedSource {
    fn load(path: &Path) -> Self {
        let text = match fs::read_to_string(path) {
            Ok(text) => Some(text),
            Err(err) => {
                debug!(path = %path.display(), %err, "source unavailable");
                None
            }
        };
        let nodes = match text.as_deref().map(syn::parse_file) {
            Some(Ok(file)) => {
                let mut collector = Collector::default();
                collector.visit_file(&file);
                collector.nodes
            }
            Some(Err(err)) => {
                debug!(path = %path.display(), %err, "source does not parse");
                Vec::new()
            }
            None => Vec::new(),
        };
        Self::new(path.to_path_buf(), text, nodes)
    }

    fn new(path: PathBuf, text: Option<String>, nodes: Vec<SyntaxNode>) -> Self {
        let line_starts = text
            .as_deref()
            .map(|text| {
                std::iter::once(0)
                    .chain(text.match_indices('\n').map(|(i, _)| i.saturating_add(1)))
                    .collect()
            })
            .unwrap_or_default();
        Self {
            path,
            text,
            line_starts,
            nodes,
        }
    }

    /// Parses `text` as if it had been read from `path`.
    pub fn from_text(path: impl Into<PathBuf>, text: impl Into<String>) -> Self {
        let text = text.into();
        let nodes = match syn::parse_file(&text) {
            Ok(file) => {
                let mut collector = Collector::default();
                collector.visit_file(&file);
                collector.nodes
            }
            Err(_) => Vec::new(),
        };
        Self::new(path.into(), Some(text), nodes)
    }

    /// The path the source was loaded from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reports whether the file could be read.
    pub fn is_readable(&self) -> bool {
        self.text.is_some()
    }

    /// The syntax nodes, in traversal order.
    pub fn nodes(&self) -> &[SyntaxNode] {
        &self.nodes
    }

    /// Returns the text of a 1-based line, without its line terminator.
    pub fn line(&self, line: u32) -> Option<&str> {
        let text = self.text.as_deref()?;
        let idx = usize::try_from(line).ok()?.checked_sub(1)?;
        let start = *self.line_starts.get(idx)?;
        let end = self
            .line_starts
            .get(idx.saturating_add(1))
            .copied()
            .unwrap_or(text.len());
        let line = text.get(start..end)?;
        Some(line.trim_end_matches(['\n', '\r']))
    }

    /// Returns the text between two positions.
    pub fn slice(&self, start: LineCol, end: LineCol) -> Option<&str> {
        let text = self.text.as_deref()?;
        let from = self.offset(start)?;
        let to = self.offset(end)?;
        text.get(from..to)
    }

    fn offset(&self, at: LineCol) -> Option<usize> {
        let text = self.text.as_deref()?;
        let idx = usize::try_from(at.line).ok()?.checked_sub(1)?;
        let start = *self.line_starts.get(idx)?;
        let skip = usize::try_from(at.column).ok()?.checked_sub(1)?;
        let rest = text.get(start..)?;
        match rest.char_indices().nth(skip) {
            Some((i, _)) => start.checked_add(i),
            None => Some(text.len()),
        }
    }

    /// Finds the narrowest node that contains a position.
    ///
    /// Bare paths and literals are skipped since they never perform a
    /// call. Without a column, the widest node starting at the first
    /// non-blank character of the line is chosen.
    pub fn narrowest(&self, line: u32, column: Option<u32>) -> Option<usize> {
        let candidates = self
            .nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| !matches!(node.kind, "path" | "literal"));
        match column {
            Some(column) if column > 0 => {
                let at = LineCol { line, column };
                candidates
                    .filter(|(_, node)| node.contains(at))
                    .min_by_key(|(i, node)| (node.extent(), std::cmp::Reverse(*i)))
                    .map(|(i, _)| i)
            }
            _ => {
                let text = self.line(line)?;
                let indent = text.chars().take_while(|c| c.is_whitespace()).count();
                let at = LineCol {
                    line,
                    column: u32::try_from(indent).ok()?.saturating_add(1),
                };
                candidates
                    .filter(|(_, node)| node.start == at)
                    .max_by_key(|(i, node)| (node.extent(), std::cmp::Reverse(*i)))
                    .map(|(i, _)| i)
            }
        }
    }
}

impl fmt::Debug for ParsedSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParsedSource")
            .field("path", &self.path)
            .field("readable", &self.is_readable())
            .field("nodes", &self.nodes.len())
            .finish()
    }
}

/// A reference to one [`SyntaxNode`] of a shared [`ParsedSource`].
#[derive(Clone)]
pub struct NodeRef {
    source: Arc<ParsedSource>,
    index: usize,
}

impl NodeRef {
    /// Resolves the narrowest node at a position in `source`.
    pub fn locate(source: &Arc<ParsedSource>, line: u32, column: Option<u32>) -> Option<Self> {
        let index = source.narrowest(line, column)?;
        Some(Self {
            source: Arc::clone(source),
            index,
        })
    }

    /// The file the node belongs to.
    pub fn source(&self) -> &ParsedSource {
        &self.source
    }

    /// The node itself.
    pub fn node(&self) -> &SyntaxNode {
        // `index` was produced by `narrowest` over the same list.
        &self.source.nodes[self.index]
    }

    /// The source text the node spans.
    pub fn text(&self) -> Option<&str> {
        let node = self.node();
        self.source.slice(node.start, node.end)
    }
}

impl fmt::Debug for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let node = self.node();
        write!(
            f,
            "{}@{}:{}:{}",
            node.kind,
            self.source.path.display(),
            node.start.line,
            node.start.column
        )
    }
}

impl PartialEq for NodeRef {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.source, &other.source) && self.index == other.index
    }
}

impl Eq for NodeRef {}

type Cache = RwLock<HashMap<PathBuf, Arc<ParsedSource>>>;

fn cache() -> &'static Cache {
    static CACHE: OnceLock<Cache> = OnceLock::new();
    CACHE.get_or_init(Cache::default)
}

/// Returns the parsed form of `path`, loading it on first use.
///
/// Entries are never evicted or replaced, so two lookups of the same path
/// always observe the same [`ParsedSource`].
pub fn parsed(path: &Path) -> Arc<ParsedSource> {
    if let Some(found) = cache()
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(path)
    {
        return Arc::clone(found);
    }
    // Parse outside the lock; a racing loader may win, in which case its
    // entry is kept.
    let loaded = Arc::new(ParsedSource::load(path));
    let mut map = cache().write().unwrap_or_else(PoisonError::into_inner);
    Arc::clone(map.entry(path.to_path_buf()).or_insert(loaded))
}

#[derive(Default)]
struct Collector {
    nodes: Vec<SyntaxNode>,
}

impl Collector {
    fn push(&mut self, kind: &'static str, span: proc_macro2::Span) {
        let (start, end) = (span.start(), span.end());
        let to_linecol = |lc: proc_macro2::LineColumn| LineCol {
            line: u32::try_from(lc.line).unwrap_or(u32::MAX),
            column: u32::try_from(lc.column)
                .unwrap_or(u32::MAX)
                .saturating_add(1),
        };
        self.nodes.push(SyntaxNode {
            kind,
            start: to_linecol(start),
            end: to_linecol(end),
        });
    }
}

impl<'ast> Visit<'ast> for Collector {
    fn visit_expr(&mut self, expr: &'ast syn::Expr) {
        self.push(expr_kind(expr), expr.span());
        syn::visit::visit_expr(self, expr);
    }

    fn visit_stmt(&mut self, stmt: &'ast syn::Stmt) {
        self.push("stmt", stmt.span());
        syn::visit::visit_stmt(self, stmt);
    }
}

fn expr_kind(expr: &syn::Expr) -> &'static str {
    use syn::Expr;
    match expr {
        Expr::Array(_) => "array",
        Expr::Assign(_) => "assign",
        Expr::Binary(_) => "binary",
        Expr::Block(_) => "block",
        Expr::Call(_) => "call",
        Expr::Closure(_) => "closure",
        Expr::Field(_) => "field",
        Expr::ForLoop(_) => "for",
        Expr::If(_) => "if",
        Expr::Index(_) => "index",
        Expr::Let(_) => "let",
        Expr::Lit(_) => "literal",
        Expr::Macro(_) => "macro",
        Expr::Match(_) => "match",
        Expr::MethodCall(_) => "method_call",
        Expr::Paren(_) => "paren",
        Expr::Path(_) => "path",
        Expr::Reference(_) => "reference",
        Expr::Return(_) => "return",
        Expr::Struct(_) => "struct",
        Expr::Try(_) => "try",
        Expr::Tuple(_) => "tuple",
        Expr::Unary(_) => "unary",
        Expr::While(_) => "while",
        _ => "expr",
    }
}
