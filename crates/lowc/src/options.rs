//! Options for printing and compiling modules.

/// Bytecode container produced by [`crate::CompiledModule::compile`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    FlatbufferBinary,
    FlatbufferText,
    /// The lowered module as text, for debugging.
    DebugText,
}

/// Bytecode translation options. Passed through to the engine untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileOptions {
    pub output_format: OutputFormat,
    pub optimize: bool,
    pub strip_debug_ops: bool,
    pub strip_source_map: bool,
    pub strip_symbols: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            output_format: OutputFormat::default(),
            optimize: true,
            strip_debug_ops: false,
            strip_source_map: false,
            strip_symbols: false,
        }
    }
}

impl CompileOptions {
    pub fn output_format(mut self, format: OutputFormat) -> Self {
        self.output_format = format;
        self
    }

    pub fn optimize(mut self, optimize: bool) -> Self {
        self.optimize = optimize;
        self
    }

    /// Strips debug ops, the source map and symbols in one go.
    pub fn stripped(mut self) -> Self {
        self.strip_debug_ops = true;
        self.strip_source_map = true;
        self.strip_symbols = true;
        self
    }
}

/// How a module is printed as text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PrintOptions {
    pub debug_info: bool,
    /// Pretty form of the debug info. Only meaningful with `debug_info`.
    pub pretty_debug_info: bool,
    /// Elide element data larger than this many elements.
    pub large_element_limit: Option<u64>,
}
