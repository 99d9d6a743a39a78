use std::path::PathBuf;

use crate::BoxedIncludeProviderError;

#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct ResolvedIncludePath(pub String);

/// User-supplied source reader.
///
/// Used for the `.cfx`/`.cfi` shader sources as well as the `.cfr` files
/// spliced in by `##include_restricted`.
pub trait IncludeProvider {
    /// Path of the file spliced in by `##include_restricted(root, PLATFORM)`
    /// once `PLATFORM` has expanded to `platform`.
    fn resolve_restricted(&self, root: &str, platform: &str) -> ResolvedIncludePath {
        restricted_include_path(root, platform)
    }

    /// Path of the source for the shader called `name`.
    fn resolve_source(&self, name: &str, include: bool) -> ResolvedIncludePath {
        shader_source_path(name, include)
    }

    fn get_include(&self, path: &ResolvedIncludePath) -> Result<String, BoxedIncludeProviderError>;
}

/// `<platform>/<root>_<platform>.cfr`
pub fn restricted_include_path(root: &str, platform: &str) -> ResolvedIncludePath {
    ResolvedIncludePath(format!("{0}/{1}_{0}.cfr", platform, root))
}

/// `<name>.cfi` for includes, `<name>.cfx` for top-level shaders.
pub fn shader_source_path(name: &str, include: bool) -> ResolvedIncludePath {
    ResolvedIncludePath(format!("{}.{}", name, if include { "cfi" } else { "cfx" }))
}

/// Reads sources from disk, relative to `root`.
pub struct FileIncludeProvider {
    pub root: PathBuf,
}

impl FileIncludeProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl IncludeProvider for FileIncludeProvider {
    fn get_include(&self, path: &ResolvedIncludePath) -> Result<String, BoxedIncludeProviderError> {
        Ok(std::fs::read_to_string(self.root.join(&path.0))?)
    }
}
