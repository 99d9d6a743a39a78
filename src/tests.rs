use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::{
    BoxedIncludeProviderError, FileIncludeProvider, IncludeProvider, KeyToken, PrepperError,
    ResolvedIncludePath, ShaderBin, ShaderBinCache, ShaderBinError, ShaderCacheConfig,
    TargetEndian,
};

struct HashMapIncludeProvider(HashMap<String, String>);
impl IncludeProvider for HashMapIncludeProvider {
    fn get_include(&self, path: &ResolvedIncludePath) -> Result<String, BoxedIncludeProviderError> {
        self.0
            .get(&path.0)
            .cloned()
            .ok_or_else(|| format!("no such file: {}", path.0).into())
    }
}

fn sources(files: &[(&str, &str)]) -> HashMapIncludeProvider {
    HashMapIncludeProvider(
        files
            .iter()
            .map(|(a, b)| (a.to_string(), b.to_string()))
            .collect(),
    )
}

fn config(cache_path: &Path) -> ShaderCacheConfig {
    ShaderCacheConfig {
        cache_path: cache_path.to_owned(),
        ..Default::default()
    }
}

const ILLUM: &str = "#include \"Common.cfi\"\n\
                     float4 Illum(float2 uv) { return tex2D(Diffuse, uv) * Gamma; }\n";
const COMMON: &str = "// shared\n#include <Math.cfi>\nfloat Gamma;\n";
const MATH: &str = "float PI = 3.14159;\n";

fn illum_sources() -> HashMapIncludeProvider {
    sources(&[
        ("Illum.cfx", ILLUM),
        ("Common.cfi", COMMON),
        ("Math.cfi", MATH),
    ])
}

fn own_crc(bin: &ShaderBin, endian: TargetEndian) -> u32 {
    crc32fast::hash(&endian.encode_tokens(&bin.tokens))
}

#[test]
fn multi_level_include() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let cache = ShaderBinCache::new(config(dir.path()), illum_sources());

    let illum = cache.get_bin_shader("Illum", false)?;
    assert_eq!(illum.tokens[0], KeyToken::Include.id());
    assert_eq!(illum.token_table.string_of(illum.tokens[1]), Some("Common"));
    assert!(!illum.read_only);

    // Everything included was compiled along the way and is shared from now on.
    assert_eq!(cache.len(), 3);
    let common = cache.get_bin_shader("Common", true)?;
    assert!(Arc::ptr_eq(&common, &cache.get_bin_shader("common", true)?));
    assert!(cache.size() >= illum.size() + common.size());

    assert!(dir.path().join("Illum.cfxb").is_file());
    assert!(dir.path().join("Common.cfib").is_file());
    assert!(dir.path().join("Math.cfib").is_file());
    Ok(())
}

#[test]
fn crc_covers_includes() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let cache = ShaderBinCache::new(config(dir.path()), illum_sources());

    let illum = cache.get_bin_shader("Illum", false)?;
    let common = cache.get_bin_shader("Common", true)?;
    let math = cache.get_bin_shader("Math", true)?;

    assert_eq!(math.crc32, own_crc(&math, TargetEndian::Little));
    assert_eq!(
        common.crc32,
        own_crc(&common, TargetEndian::Little).wrapping_add(math.crc32)
    );
    assert_eq!(
        illum.crc32,
        own_crc(&illum, TargetEndian::Little).wrapping_add(common.crc32)
    );
    assert_eq!(cache.compute_crc(&illum)?, illum.crc32);
    Ok(())
}

#[test]
fn crc_is_deterministic_and_tracks_includes() -> anyhow::Result<()> {
    let crc_of = |provider: HashMapIncludeProvider| -> anyhow::Result<(u32, u32)> {
        let dir = tempfile::tempdir()?;
        let cache = ShaderBinCache::new(config(dir.path()), provider);
        Ok((
            cache.get_bin_shader("Illum", false)?.crc32,
            cache.get_bin_shader("Common", true)?.crc32,
        ))
    };

    let first = crc_of(illum_sources())?;
    assert_eq!(first, crc_of(illum_sources())?);

    let edited = crc_of(sources(&[
        ("Illum.cfx", ILLUM),
        ("Common.cfi", COMMON),
        ("Math.cfi", "float PI = 3.14158;\n"),
    ]))?;
    assert_ne!(first.0, edited.0);
    assert_ne!(first.1, edited.1);
    Ok(())
}

#[test]
fn reload_from_disk_without_sources() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let compiled = ShaderBinCache::new(config(dir.path()), illum_sources())
        .get_bin_shader("Illum", false)?;

    let cache = ShaderBinCache::new(config(dir.path()), sources(&[]));
    let loaded = cache.get_bin_shader("Illum", false)?;

    assert_eq!(loaded.tokens, compiled.tokens);
    assert_eq!(loaded.token_table, compiled.token_table);
    assert_eq!(loaded.crc32, compiled.crc32);
    assert_eq!(loaded.source_crc32, compiled.source_crc32);
    assert_eq!(
        loaded.source_crc32,
        crc32fast::hash(ILLUM.as_bytes())
    );
    Ok(())
}

#[test]
fn edited_source_is_recompiled() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let before = ShaderBinCache::new(config(dir.path()), illum_sources())
        .get_bin_shader("Illum", false)?;

    let edited = "#include \"Common.cfi\"\nfloat4 Illum() { return Gamma; }\n";
    let cache = ShaderBinCache::new(
        config(dir.path()),
        sources(&[
            ("Illum.cfx", edited),
            ("Common.cfi", COMMON),
            ("Math.cfi", MATH),
        ]),
    );
    let after = cache.get_bin_shader("Illum", false)?;
    assert_ne!(after.tokens, before.tokens);
    assert_eq!(after.source_crc32, crc32fast::hash(edited.as_bytes()));

    // The stale file was replaced.
    let reread = ShaderBinCache::new(config(dir.path()), sources(&[]))
        .get_bin_shader("Illum", false)?;
    assert_eq!(reread.tokens, after.tokens);
    Ok(())
}

#[test]
fn reference_crc_mismatch() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let compiled = ShaderBinCache::new(config(dir.path()), illum_sources())
        .get_bin_shader("Illum", false)?;

    let cache = ShaderBinCache::new(config(dir.path()), sources(&[]));
    match cache.get_bin_shader_checked("Illum", false, Some(compiled.crc32 ^ 1)) {
        Err(ShaderBinError::MissingShader { name }) if name == "Illum" => {}
        val => panic!("{:?}", val),
    }

    let loaded = cache.get_bin_shader_checked("Illum", false, Some(compiled.crc32))?;
    assert_eq!(loaded.tokens, compiled.tokens);
    Ok(())
}

#[test]
fn include_edit_refreshes_stored_crc() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let before = ShaderBinCache::new(config(dir.path()), illum_sources())
        .get_bin_shader("Illum", false)?;

    let cache = ShaderBinCache::new(
        config(dir.path()),
        sources(&[
            ("Illum.cfx", ILLUM),
            ("Common.cfi", COMMON),
            ("Math.cfi", "float PI = 3.14158;\n"),
        ]),
    );

    // Illum's own source didn't change, so its file loads with the old crc.
    let stale = cache.get_bin_shader("Illum", false)?;
    assert_eq!(stale.crc32, before.crc32);

    let fresh = cache.compute_crc(&stale)?;
    assert_ne!(fresh, before.crc32);

    let refreshed = cache.get_bin_shader_checked("Illum", false, Some(fresh))?;
    assert_eq!(refreshed.crc32, fresh);
    assert_eq!(refreshed.tokens, stale.tokens);
    assert!(Arc::ptr_eq(&refreshed, &cache.get_bin_shader("Illum", false)?));

    let reread = ShaderBinCache::new(config(dir.path()), sources(&[]))
        .get_bin_shader("Illum", false)?;
    assert_eq!(reread.crc32, fresh);
    Ok(())
}

#[test]
fn delete_single_entry() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let cache = ShaderBinCache::new(config(dir.path()), illum_sources());
    cache.get_bin_shader("Illum", false)?;
    assert_eq!(cache.len(), 3);

    assert!(cache.delete_from_cache("common", true));
    assert!(!cache.delete_from_cache("Common", true));
    assert!(!cache.delete_from_cache("Illum", true));
    assert_eq!(cache.len(), 2);

    let common = cache.get_bin_shader("Common", true)?;
    assert!(!common.read_only);
    assert_eq!(cache.len(), 3);
    Ok(())
}

#[test]
fn missing_shader() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let cache = ShaderBinCache::new(config(dir.path()), sources(&[("Illum.cfx", ILLUM)]));

    match cache.get_bin_shader("Nope", false) {
        Err(ShaderBinError::MissingShader { name }) if name == "Nope" => {}
        val => panic!("{:?}", val),
    }

    // Illum exists, but not what it includes.
    match cache.get_bin_shader("Illum", false) {
        Err(ShaderBinError::MissingShader { name }) if name == "Common" => {}
        val => panic!("{:?}", val),
    }
    assert!(cache.is_empty());
    Ok(())
}

#[test]
fn include_cycle() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let cache = ShaderBinCache::new(
        config(dir.path()),
        sources(&[
            ("Top.cfx", "#include \"Foo.cfi\"\n"),
            ("Foo.cfi", "#include \"Bar.cfi\"\n"),
            ("Bar.cfi", "#include \"Foo.cfi\"\n"),
        ]),
    );

    match cache.get_bin_shader("Top", false) {
        Err(ShaderBinError::Prepper(PrepperError::RecursiveInclude { file, from }))
            if file == "Foo" && from == "Bar" => {}
        val => panic!("{:?}", val),
    }

    // A failed population leaves nothing half-done behind.
    match cache.get_bin_shader("Top", false) {
        Err(ShaderBinError::Prepper(PrepperError::RecursiveInclude { .. })) => {}
        val => panic!("{:?}", val),
    }
    Ok(())
}

#[test]
fn diamond_include_is_not_a_cycle() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let cache = ShaderBinCache::new(
        config(dir.path()),
        sources(&[
            ("Top.cfx", "#include \"Left.cfi\"\n#include \"Right.cfi\"\n"),
            ("Left.cfi", "#include \"Base.cfi\"\nfloat l;"),
            ("Right.cfi", "#include \"Base.cfi\"\nfloat r;"),
            ("Base.cfi", "float base;"),
        ]),
    );

    let top = cache.get_bin_shader("Top", false)?;
    let left = cache.get_bin_shader("Left", true)?;
    let right = cache.get_bin_shader("Right", true)?;
    assert_eq!(
        top.crc32,
        own_crc(&top, TargetEndian::Little)
            .wrapping_add(left.crc32)
            .wrapping_add(right.crc32)
    );
    Ok(())
}

#[test]
fn unwritable_cache_is_read_only() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let blocker = dir.path().join("blocker");
    std::fs::write(&blocker, b"not a directory")?;

    let cache = ShaderBinCache::new(config(&blocker.join("cache")), illum_sources());
    let illum = cache.get_bin_shader("Illum", false)?;

    assert!(illum.read_only);
    assert!(cache.get_bin_shader("Common", true)?.read_only);
    assert!(illum.tokens.len() > 2);
    assert_ne!(illum.crc32, 0);
    Ok(())
}

#[test]
fn big_endian_cache() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let big = ShaderCacheConfig {
        target_endian: TargetEndian::Big,
        ..config(dir.path())
    };

    let cache = ShaderBinCache::new(big.clone(), illum_sources());
    let compiled = cache.get_bin_shader("Illum", false)?;
    let common = cache.get_bin_shader("Common", true)?;
    assert_eq!(
        compiled.crc32,
        own_crc(&compiled, TargetEndian::Big).wrapping_add(common.crc32)
    );

    let bytes = std::fs::read(dir.path().join("Illum.cfxb"))?;
    assert_eq!(&bytes[0..4], b"0BXF");
    assert_eq!(&bytes[28..32], &compiled.tokens[0].to_be_bytes());

    let loaded = ShaderBinCache::new(big, sources(&[])).get_bin_shader("Illum", false)?;
    assert_eq!(loaded.tokens, compiled.tokens);
    assert_eq!(loaded.token_table, compiled.token_table);

    // A little-endian reader sees a bad magic and has no source to fall back on.
    match ShaderBinCache::new(config(dir.path()), sources(&[])).get_bin_shader("Illum", false) {
        Err(ShaderBinError::MissingShader { .. }) => {}
        val => panic!("{:?}", val),
    }
    Ok(())
}

#[test]
fn restricted_include_uses_configured_platform() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let cache = ShaderBinCache::new(
        ShaderCacheConfig {
            platform: "banana".to_owned(),
            ..config(dir.path())
        },
        sources(&[
            (
                "Illum.cfx",
                "##include_restricted(Illum, AZ_RESTRICTED_PLATFORM)\n\
                 ##if AZ_RESTRICTED_PLATFORM == banana\nfloat yellow;\n##else\nfloat grey;\n##endif\n",
            ),
            ("banana/Illum_banana.cfr", "float peel;\n"),
        ]),
    );

    let illum = cache.get_bin_shader("Illum", false)?;
    let words: Vec<_> = illum.token_strings().into_iter().flatten().collect();
    assert_eq!(words, vec!["float", "peel", ";", "float", "yellow", ";"]);
    Ok(())
}

#[test]
fn registry_capacity() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let cache = ShaderBinCache::new(
        ShaderCacheConfig {
            max_cache_entries: 2,
            ..config(dir.path())
        },
        illum_sources(),
    );

    cache.get_bin_shader("Illum", false)?;
    assert_eq!(cache.len(), 2);

    assert_eq!(cache.invalidate(true), 1);
    assert_eq!(cache.len(), 1);
    assert_eq!(cache.invalidate(false), 1);
    assert!(cache.is_empty());

    // Invalidated shaders come back from disk, without touching their includes.
    cache.get_bin_shader("Common", true)?;
    assert_eq!(cache.len(), 1);
    Ok(())
}

#[test]
fn concurrent_lookups_share_one_binary() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let cache = Arc::new(ShaderBinCache::new(config(dir.path()), illum_sources()));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let cache = cache.clone();
            std::thread::spawn(move || cache.get_bin_shader("Illum", false))
        })
        .collect();

    let bins = handles
        .into_iter()
        .map(|h| h.join().expect("lookup thread panicked"))
        .collect::<Result<Vec<_>, _>>()?;
    assert!(bins.iter().all(|bin| Arc::ptr_eq(bin, &bins[0])));
    Ok(())
}

#[test]
fn include_file() -> anyhow::Result<()> {
    let shaders = tempfile::tempdir()?;
    let cache_dir = tempfile::tempdir()?;
    std::fs::write(shaders.path().join("Illum.cfx"), "#include \"Common.cfi\"\r\nfloat x;\r\n")?;
    std::fs::write(shaders.path().join("Common.cfi"), "float Gamma;")?;

    let cache = ShaderBinCache::new(
        config(cache_dir.path()),
        FileIncludeProvider::new(shaders.path()),
    );
    let illum = cache.get_bin_shader("Illum", false)?;
    assert_eq!(
        illum.token_strings(),
        vec![Some("#include"), Some("Common"), Some("float"), Some("x"), Some(";")]
    );
    Ok(())
}
