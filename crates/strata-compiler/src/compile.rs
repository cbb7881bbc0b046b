use strata_bytecode::Version;
use strata_dsl::{ENABLE_HINT, ExprId, Program};
use tracing::debug;

use crate::{
    config::Config,
    error::{CompileError, CompileErrorType},
    ir::BlockGraph,
    linearize::{LinearProgram, linearize},
    lower::lower,
    optimize::{OptimizeOptions, OptimizeReport, optimize},
    sourcemap::{ProgramSourceMap, SourceFileSet, SourceMapOptions, build},
};

/// A compiled program and its source map. Output line `i` of the program
/// is generated line `i` of the map.
#[derive(Clone, Debug)]
pub struct Compilation {
    /// The program.
    pub program: LinearProgram,
    /// Its source map.
    pub source_map: ProgramSourceMap,
    /// What the optimizer did.
    pub report: OptimizeReport,
}

/// A builder for compiling a [`Program`] into a [`LinearProgram`]
pub struct Compiler<'a> {
    program: &'a Program,
    root: ExprId,
    version: Version,
    optimize: OptimizeOptions,
    source_map: SourceMapOptions,
}

impl<'a> Compiler<'a> {
    /// Creates a compiler for the expression `root` of `program`.
    pub fn new(program: &'a Program, root: ExprId) -> Self {
        Self {
            program,
            root,
            version: Version::default(),
            optimize: OptimizeOptions::default(),
            source_map: SourceMapOptions::default(),
        }
    }

    /// Sets the target version
    #[must_use]
    pub fn version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    /// Sets which optimizations run
    #[must_use]
    pub fn optimize(mut self, options: OptimizeOptions) -> Self {
        self.optimize = options;
        self
    }

    /// Takes the target version and optimizations from `config`. The
    /// provenance settings apply when the program is built, see
    /// [`Config::tracker`].
    #[must_use]
    pub fn config(mut self, config: &Config) -> Self {
        self.version = config.version;
        self.optimize = config.optimize;
        self
    }

    /// Sets the source map's `file` and `sourceRoot`
    #[must_use]
    pub fn source_map_options(mut self, options: SourceMapOptions) -> Self {
        self.source_map = options;
        self
    }

    /// Lowers and optimizes the program without linearizing it.
    pub fn compile_to_graph(&self) -> Result<(BlockGraph, OptimizeReport), CompileError> {
        let mut graph = lower(self.program, self.root, self.version)?;
        let report = optimize(&mut graph, &self.optimize)?;
        Ok((graph, report))
    }

    /// Consumes the builder to create a [`LinearProgram`]
    pub fn compile(self) -> Result<LinearProgram, CompileError> {
        let (graph, _) = self.compile_to_graph()?;
        linearize(&graph)
    }

    /// Compiles and builds the source map, reading the attributed source
    /// files from disk.
    pub fn compile_with_source_map(self) -> Result<Compilation, CompileError> {
        self.compile_inner(None)
    }

    /// Compiles and builds the source map against `sources`.
    pub fn compile_with_sources(self, sources: &SourceFileSet) -> Result<Compilation, CompileError> {
        self.compile_inner(Some(sources))
    }

    fn compile_inner(self, sources: Option<&SourceFileSet>) -> Result<Compilation, CompileError> {
        if !self.program.tracker().is_enabled() {
            return Err(CompileError::new(CompileErrorType::SourceMapUnavailable {
                hint: ENABLE_HINT,
            }));
        }
        let (graph, report) = self.compile_to_graph()?;
        let program = linearize(&graph)?;
        let loaded;
        let sources = match sources {
            Some(sources) => sources,
            None => {
                loaded = SourceFileSet::for_program(&program);
                &loaded
            }
        };
        let source_map = build(&program, sources, &self.source_map)?;
        debug!(
            lines = program.len(),
            sources = source_map.source_map().sources.len(),
            "compiled with source map"
        );
        Ok(Compilation {
            program,
            source_map,
            report,
        })
    }
}
