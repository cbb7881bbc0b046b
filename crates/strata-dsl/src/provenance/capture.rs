use std::path::Path;

use tracing::trace;

use super::{ColumnRange, Frame, InternalUnits, syntax};

/// Walks the current call stack, innermost first, and keeps frames up to
/// and including the first one outside `units`. When every frame is
/// internal the whole stack is kept.
///
/// The returned frames are ordered outermost to innermost.
pub(super) fn walk(units: &InternalUnits) -> Vec<Frame> {
    let mut frames = Vec::new();
    let mut found_user = false;
    backtrace::trace(|raw| {
        backtrace::resolve_frame(raw, |symbol| {
            if found_user {
                return;
            }
            let file = symbol.filename();
            let internal = units.is_internal(file);
            let function = symbol
                .name()
                .map_or_else(|| String::from("<unknown>"), |name| format!("{name:#}"));
            frames.push(resolve(
                file,
                symbol.lineno().unwrap_or(0),
                symbol.colno(),
                function,
                internal,
            ));
            if !internal {
                found_user = true;
            }
        });
        !found_user
    });
    trace!(depth = frames.len(), found_user, "captured stack");
    frames.reverse();
    frames
}

/// Builds a frame, reading and parsing its source file if needed.
pub(super) fn resolve(
    file: Option<&Path>,
    line: u32,
    column: Option<u32>,
    function: String,
    internal: bool,
) -> Frame {
    let mut frame = Frame::synthetic(file.map(Path::to_path_buf), line, column, function, internal);
    let Some(path) = file else {
        return frame;
    };
    let source = syntax::parsed(path);
    if let Some(text) = source.line(line) {
        frame.excerpt = text.trim().to_owned();
    }
    if let Some(node) = syntax::NodeRef::locate(&source, line, column) {
        let n = node.node();
        if n.start.line == line && n.end.line == line {
            frame.columns = ColumnRange {
                start: n.start.column,
                end: n.end.column,
            };
        }
        frame.node = Some(node);
    }
    frame
}
