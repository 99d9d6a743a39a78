pub type BoxedIncludeProviderError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, thiserror::Error)]
pub enum PrepperError {
    /// Any error reported by the user-supplied `IncludeProvider`
    #[error("include provider error: \"{cause:?}\" when trying to include {file:?}")]
    IncludeProviderError {
        file: String,
        cause: BoxedIncludeProviderError,
    },

    /// Recursively included shader, along with the shader whose `#include` closed the cycle
    #[error("shader {file:?} is recursively included; triggered in {from:?}")]
    RecursiveInclude {
        /// Shader which was included recursively
        file: String,

        /// Shader which included the recursively included one
        from: String,
    },

    /// A `##` directive which is not part of the directive set
    #[error("unknown directive ##{directive} ({line:?})")]
    UnknownDirective { directive: String, line: String },

    /// A known directive whose arguments don't fit its grammar
    #[error("malformed {directive} directive: {line:?}")]
    MalformedDirective { directive: &'static str, line: String },

    #[error("##elif is not allowed here ({state})")]
    IllegalElif { state: &'static str },

    #[error("##else is not allowed here ({state})")]
    IllegalElse { state: &'static str },

    /// `##endif` without a matching `##if` in the same file
    #[error("##endif without a matching ##if")]
    UnbalancedEndif,

    #[error("macro {name:?} is already defined as {value:?}")]
    MacroRedefinition { name: String, value: String },

    /// The platform argument of `##include_restricted` names no defined macro
    #[error("##include_restricted({root}, {macro_name}): {macro_name} is not defined")]
    UndefinedPlatformMacro { root: String, macro_name: String },

    /// An included buffer ran out while one of its `##if` blocks was still open
    #[error("restricted include {file:?} ended with {open} unclosed ##if block(s)")]
    IncludeEndedInsideIf { file: String, open: usize },

    #[error("end of source reached with {open} unclosed ##if block(s)")]
    UnterminatedIf { open: usize },

    /// Error parsing an `#include` directive
    #[error("malformed #include in {file:?}: {reason}")]
    MalformedInclude { file: String, reason: &'static str },

    /// A user token hashed into the keyword range, or onto another spelling
    #[error("token id {id:#010x} for {spelling:?} collides with {existing:?}")]
    TokenIdCollision {
        id: u32,
        spelling: String,
        existing: String,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum ShaderBinError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Prepper(#[from] PrepperError),

    #[error("bad magic {found:#010x} in binary shader")]
    BadMagic { found: u32 },

    #[error("binary shader version {high}.{low} doesn't match {expected_high}.{expected_low}")]
    VersionMismatch {
        high: u16,
        low: u16,
        expected_high: u16,
        expected_low: u16,
    },

    /// The file ended before the section the header promised
    #[error("binary shader truncated while reading {section}")]
    Truncated { section: &'static str },

    #[error("corrupt string table: {reason}")]
    CorruptStringTable { reason: String },

    /// Neither a source file nor a valid cache file exists
    #[error("shader {name:?} doesn't exist")]
    MissingShader { name: String },
}
