//! **shader-binner** compiles FX shader sources into compact binary token streams, and
//! keeps them in an on-disk cache validated by CRC.
//!
//! Compilation runs in two layers. The `##` directive layer ([`PoundPoundContext`])
//! resolves `##if`/`##elif`/`##else`/`##endif`, `##define`/`##undef` and
//! `##include_restricted` in place, so that suppressed text never reaches the tokenizer.
//! The tokenizer then turns what is left into 32-bit tokens: keywords map to fixed
//! [`KeyToken`] codes, and everything else is interned into the shader's
//! [`TokenTable`] under the CRC32 of its spelling.
//!
//! A shader's CRC covers its own token stream plus the CRC of everything it
//! `#include`s, so editing an include invalidates every shader built on top of it.
//!
//! Sources are read through a user-supplied [`IncludeProvider`], which allows for
//! virtual file systems and custom search paths.
//!
//! # Example
//!
//! ```no_run
//! use shader_binner::{FileIncludeProvider, ShaderBinCache, ShaderCacheConfig};
//!
//! let cache = ShaderBinCache::new(
//!     ShaderCacheConfig {
//!         cache_path: "shadercache/".into(),
//!         ..Default::default()
//!     },
//!     FileIncludeProvider::new("shaders/"),
//! );
//!
//! let illum = cache.get_bin_shader("Illum", false)?;
//! println!("{} tokens, crc {:#010x}", illum.tokens.len(), illum.crc32);
//! # Ok::<(), shader_binner::ShaderBinError>(())
//! ```

mod cache;
mod compiler;
mod error;
mod include_provider;
mod macros;
mod pound_pound;
mod registry;
mod scanner;
mod shader_bin;
mod token;

#[cfg(test)]
mod tests;

pub use cache::{ShaderBinCache, ShaderCacheConfig, MAX_FXBIN_CACHE};
pub use compiler::{compile_source, strip_extension};
pub use error::{BoxedIncludeProviderError, PrepperError, ShaderBinError};
pub use include_provider::{
    restricted_include_path, shader_source_path, FileIncludeProvider, IncludeProvider,
    ResolvedIncludePath,
};
pub use macros::{MacroTable, DEFAULT_MACRO_VALUE};
pub use pound_pound::{
    preprocess_to_string, BufferStatus, IfState, InterdictionState, Layer, PoundPoundContext,
    RESTRICTED_PLATFORM_MACRO,
};
pub use registry::{BinKey, BinRegistry};
pub use scanner::{remove_cr, Cursor};
pub use shader_bin::{
    cache_version, make_fourcc, IncludeResolver, ShaderBin, ShaderBinHeader, TargetEndian,
    FOURCC_SHADERBIN, FX_CACHE_VERSION,
};
pub use token::{
    is_first_pass, is_separator, next_token, user_token_id, KeyToken, TokenEntry, TokenTable,
    USER_FIRST,
};
