//! Get-or-load-or-compile front end over the binary shader cache.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, ReentrantMutex};

use crate::compiler::compile_source;
use crate::registry::{BinKey, BinRegistry};
use crate::{
    IncludeProvider, IncludeResolver, PrepperError, ShaderBin, ShaderBinError, TargetEndian,
};

/// Default capacity of the in-memory registry.
pub const MAX_FXBIN_CACHE: usize = 200;

#[derive(Debug, Clone)]
pub struct ShaderCacheConfig {
    /// Directory receiving the `.cfxb`/`.cfib` files
    pub cache_path: PathBuf,
    /// Value of `AZ_RESTRICTED_PLATFORM` while compiling
    pub platform: String,
    pub target_endian: TargetEndian,
    /// Registry capacity; `0` means unbounded
    pub max_cache_entries: usize,
}

impl Default for ShaderCacheConfig {
    fn default() -> Self {
        Self {
            cache_path: PathBuf::from("shadercache/"),
            platform: "pc".to_owned(),
            target_endian: TargetEndian::default(),
            max_cache_entries: MAX_FXBIN_CACHE,
        }
    }
}

/// Hands out compiled shaders, loading them from the on-disk cache when it is still
/// valid and compiling (then caching) them from source otherwise.
///
/// Population and CRC walks are serialized by one re-entrant lock, since compiling a
/// shader recursively populates everything it includes.
pub struct ShaderBinCache {
    config: ShaderCacheConfig,
    include_provider: Box<dyn IncludeProvider + Send + Sync>,
    registry: Mutex<BinRegistry>,
    population_lock: ReentrantMutex<()>,
    /// Shaders being populated on this thread's call stack, outermost first
    in_progress: Mutex<Vec<(BinKey, String)>>,
}

impl ShaderBinCache {
    pub fn new(
        config: ShaderCacheConfig,
        include_provider: impl IncludeProvider + Send + Sync + 'static,
    ) -> Self {
        let registry = BinRegistry::new(config.max_cache_entries);

        Self {
            config,
            include_provider: Box::new(include_provider),
            registry: Mutex::new(registry),
            population_lock: ReentrantMutex::new(()),
            in_progress: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &ShaderCacheConfig {
        &self.config
    }

    /// `<cache_path>/<name>.cfib` for includes, `.cfxb` otherwise.
    pub fn cache_file_path(&self, name: &str, include: bool) -> PathBuf {
        let ext = if include { "cfib" } else { "cfxb" };
        self.config.cache_path.join(format!("{}.{}", name, ext))
    }

    pub fn get_bin_shader(&self, name: &str, include: bool) -> Result<Arc<ShaderBin>, ShaderBinError> {
        self.get_bin_shader_checked(name, include, None)
    }

    /// Like [`Self::get_bin_shader`], but a loaded or on-disk binary whose CRC differs
    /// from `ref_crc` counts as stale.
    pub fn get_bin_shader_checked(
        &self,
        name: &str,
        include: bool,
        ref_crc: Option<u32>,
    ) -> Result<Arc<ShaderBin>, ShaderBinError> {
        let key = BinKey::new(name, include);
        if let Some(bin) = self.registry.lock().get(&key).filter(|bin| crc_matches(bin, ref_crc)) {
            return Ok(bin);
        }

        let _population = self.population_lock.lock();

        // Someone else may have populated it while we waited.
        {
            let mut registry = self.registry.lock();
            match registry.get(&key) {
                Some(bin) if crc_matches(&bin, ref_crc) => return Ok(bin),
                Some(_) => {
                    log::debug!("{:?} is loaded with a stale crc", name);
                    registry.remove(&key);
                }
                None => {}
            }
        }

        {
            let mut in_progress = self.in_progress.lock();
            if in_progress.iter().any(|(k, _)| k == &key) {
                return Err(PrepperError::RecursiveInclude {
                    file: name.to_owned(),
                    from: in_progress
                        .last()
                        .map(|(_, from)| from.clone())
                        .unwrap_or_default(),
                }
                .into());
            }
            in_progress.push((key.clone(), name.to_owned()));
        }

        let populated = self.populate(name, include, ref_crc);
        self.in_progress.lock().retain(|(k, _)| k != &key);

        let bin = Arc::new(populated?);
        self.registry.lock().insert(key, bin.clone());
        Ok(bin)
    }

    fn read_source(&self, name: &str, include: bool) -> Option<String> {
        let path = self.include_provider.resolve_source(name, include);
        match self.include_provider.get_include(&path) {
            Ok(source) => Some(source),
            Err(e) => {
                log::debug!("no source for {:?} at {:?}: {}", name, path.0, e);
                None
            }
        }
    }

    fn populate(
        &self,
        name: &str,
        include: bool,
        ref_crc: Option<u32>,
    ) -> Result<ShaderBin, ShaderBinError> {
        let source = self.read_source(name, include);
        let source_crc = source.as_ref().map(|s| crc32fast::hash(s.as_bytes()));
        let cache_file = self.cache_file_path(name, include);

        match self.try_load(&cache_file, name, include, source_crc, ref_crc) {
            Ok(Some(bin)) => {
                log::debug!("loaded {:?} from {:?}", name, cache_file);
                return Ok(bin);
            }
            Ok(None) => {}
            Err(e) => log::warn!("binary shader {:?} is unusable: {}", cache_file, e),
        }

        match (source, source_crc) {
            (Some(source), Some(source_crc)) => {
                self.save_bin_shader(name, include, &source, source_crc, &cache_file)
            }
            _ => Err(ShaderBinError::MissingShader {
                name: name.to_owned(),
            }),
        }
    }

    /// `Ok(None)` when there is no cache file, or when it is valid but stale.
    fn try_load(
        &self,
        cache_file: &Path,
        name: &str,
        include: bool,
        source_crc: Option<u32>,
        ref_crc: Option<u32>,
    ) -> Result<Option<ShaderBin>, ShaderBinError> {
        let file = match File::open(cache_file) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let bin = ShaderBin::read_from(
            &mut BufReader::new(file),
            name,
            include,
            self.config.target_endian,
        )?;

        if let Some(source_crc) = source_crc {
            if bin.source_crc32 != source_crc {
                log::warn!("binary shader {:?}: source crc mismatch", cache_file);
                return Ok(None);
            }
        }

        if let Some(ref_crc) = ref_crc {
            if bin.crc32 != ref_crc {
                log::warn!("binary shader {:?}: crc mismatch", cache_file);
                return Ok(None);
            }
        }

        Ok(Some(bin))
    }

    /// Compile from source, stamp the CRCs and write the cache file. A cache file that
    /// can't be written leaves the binary read-only in memory.
    fn save_bin_shader(
        &self,
        name: &str,
        include: bool,
        source: &str,
        source_crc: u32,
        cache_file: &Path,
    ) -> Result<ShaderBin, ShaderBinError> {
        let mut bin = compile_source(
            name,
            include,
            source,
            &self.config.platform,
            &*self.include_provider,
            self,
        )?;
        bin.source_crc32 = source_crc;
        bin.crc32 = self.compute_crc(&bin)?;

        if let Err(e) = self.write_cache_file(&bin, cache_file) {
            log::warn!("cannot write binary shader {:?}: {}", cache_file, e);
            bin.read_only = true;
        }

        Ok(bin)
    }

    fn write_cache_file(&self, bin: &ShaderBin, cache_file: &Path) -> io::Result<()> {
        if let Some(dir) = cache_file.parent() {
            fs::create_dir_all(dir)?;
        }

        let mut writer = BufWriter::new(File::create(cache_file)?);
        bin.write_to(&mut writer, self.config.target_endian)?;
        writer.flush()
    }

    /// Recursive CRC of `bin`, resolving includes through this cache.
    pub fn compute_crc(&self, bin: &ShaderBin) -> Result<u32, ShaderBinError> {
        let _population = self.population_lock.lock();
        bin.compute_crc(self, self.config.target_endian)
    }

    /// Forget one loaded binary, so that the next lookup re-validates it against the
    /// disk. Returns whether it was loaded.
    pub fn delete_from_cache(&self, name: &str, include: bool) -> bool {
        let _population = self.population_lock.lock();
        self.registry
            .lock()
            .remove(&BinKey::new(name, include))
            .is_some()
    }

    /// Drop loaded binaries (or only the includes) so that they are re-validated
    /// against the disk on next use.
    pub fn invalidate(&self, includes_only: bool) -> usize {
        let _population = self.population_lock.lock();
        self.registry.lock().invalidate(includes_only)
    }

    pub fn len(&self) -> usize {
        self.registry.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.lock().is_empty()
    }

    /// Memory held by the loaded binaries.
    pub fn size(&self) -> usize {
        self.registry.lock().size_in_bytes()
    }
}

fn crc_matches(bin: &ShaderBin, ref_crc: Option<u32>) -> bool {
    ref_crc.map_or(true, |crc| bin.crc32 == crc)
}

impl IncludeResolver for ShaderBinCache {
    fn resolve_include(&self, name: &str) -> Result<Arc<ShaderBin>, ShaderBinError> {
        self.get_bin_shader(name, true)
    }
}
