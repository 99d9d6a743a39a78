//! Compiled shader binaries and their cache file format.
//!
//! ```text
//! header        28 bytes, see ShaderBinHeader
//! tokens        token_count x u32
//! string table  per interned token: u32 id, NUL-terminated UTF-8 spelling
//! ```
//!
//! Every integer is stored in the byte order of the target platform, and the
//! token CRC is computed over that same byte layout.

use std::convert::TryFrom;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::Arc;

use crate::{KeyToken, PrepperError, ShaderBinError, TokenTable};

pub const fn make_fourcc(a: u8, b: u8, c: u8, d: u8) -> u32 {
    (a as u32) | (b as u32) << 8 | (c as u32) << 16 | (d as u32) << 24
}

pub const FOURCC_SHADERBIN: u32 = make_fourcc(b'F', b'X', b'B', b'0');

/// Cache format version; stored as an integral and a tenths part.
pub const FX_CACHE_VERSION: f32 = 9.5;

/// Caches claiming a major version above this are never read.
const MAX_VERSION_HIGH: u16 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetEndian {
    Little,
    Big,
}

impl Default for TargetEndian {
    fn default() -> Self {
        TargetEndian::Little
    }
}

impl TargetEndian {
    pub fn u32_bytes(self, value: u32) -> [u8; 4] {
        match self {
            TargetEndian::Little => value.to_le_bytes(),
            TargetEndian::Big => value.to_be_bytes(),
        }
    }

    pub fn u16_bytes(self, value: u16) -> [u8; 2] {
        match self {
            TargetEndian::Little => value.to_le_bytes(),
            TargetEndian::Big => value.to_be_bytes(),
        }
    }

    pub fn read_u32(self, bytes: [u8; 4]) -> u32 {
        match self {
            TargetEndian::Little => u32::from_le_bytes(bytes),
            TargetEndian::Big => u32::from_be_bytes(bytes),
        }
    }

    pub fn read_u16(self, bytes: [u8; 2]) -> u16 {
        match self {
            TargetEndian::Little => u16::from_le_bytes(bytes),
            TargetEndian::Big => u16::from_be_bytes(bytes),
        }
    }

    pub fn encode_tokens(self, tokens: &[u32]) -> Vec<u8> {
        tokens
            .iter()
            .flat_map(|&token| self.u32_bytes(token).to_vec())
            .collect()
    }

    pub fn decode_tokens(self, bytes: &[u8]) -> Vec<u32> {
        bytes
            .chunks_exact(4)
            .map(|chunk| self.read_u32([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect()
    }
}

/// `(high, low)`: integral part, and the fractional part in tenths.
pub fn cache_version() -> (u16, u16) {
    let high = FX_CACHE_VERSION as u16;
    let low = ((FX_CACHE_VERSION - high as f32) * 10.1) as u16;
    (high, low)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShaderBinHeader {
    pub magic: u32,
    pub version_low: u16,
    pub version_high: u16,
    pub crc32: u32,
    pub source_crc32: u32,
    pub token_count: u32,
    pub offset_string_table: u32,
    pub offset_params_local: u32,
}

impl ShaderBinHeader {
    pub const SIZE: usize = 28;

    pub fn for_bin(bin: &ShaderBin) -> Self {
        let (version_high, version_low) = cache_version();
        let token_count = bin.tokens.len() as u32;

        Self {
            magic: FOURCC_SHADERBIN,
            version_low,
            version_high,
            crc32: bin.crc32,
            source_crc32: bin.source_crc32,
            token_count,
            offset_string_table: Self::SIZE as u32 + token_count * 4,
            offset_params_local: 0,
        }
    }

    pub fn to_bytes(&self, endian: TargetEndian) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[0..4].copy_from_slice(&endian.u32_bytes(self.magic));
        out[4..6].copy_from_slice(&endian.u16_bytes(self.version_low));
        out[6..8].copy_from_slice(&endian.u16_bytes(self.version_high));
        out[8..12].copy_from_slice(&endian.u32_bytes(self.crc32));
        out[12..16].copy_from_slice(&endian.u32_bytes(self.source_crc32));
        out[16..20].copy_from_slice(&endian.u32_bytes(self.token_count));
        out[20..24].copy_from_slice(&endian.u32_bytes(self.offset_string_table));
        out[24..28].copy_from_slice(&endian.u32_bytes(self.offset_params_local));
        out
    }

    pub fn from_bytes(bytes: &[u8; Self::SIZE], endian: TargetEndian) -> Self {
        let u32_at = |at: usize| {
            endian.read_u32([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
        };
        let u16_at = |at: usize| endian.read_u16([bytes[at], bytes[at + 1]]);

        Self {
            magic: u32_at(0),
            version_low: u16_at(4),
            version_high: u16_at(6),
            crc32: u32_at(8),
            source_crc32: u32_at(12),
            token_count: u32_at(16),
            offset_string_table: u32_at(20),
            offset_params_local: u32_at(24),
        }
    }

    pub fn read_from(reader: &mut impl Read, endian: TargetEndian) -> Result<Self, ShaderBinError> {
        let mut bytes = [0u8; Self::SIZE];
        read_section(reader, &mut bytes, "header")?;
        Ok(Self::from_bytes(&bytes, endian))
    }

    /// Magic and format version must match what this build writes.
    pub fn validate(&self) -> Result<(), ShaderBinError> {
        if self.magic != FOURCC_SHADERBIN {
            return Err(ShaderBinError::BadMagic { found: self.magic });
        }

        let (expected_high, expected_low) = cache_version();
        if self.version_high != expected_high
            || self.version_low != expected_low
            || self.version_high > MAX_VERSION_HIGH
        {
            return Err(ShaderBinError::VersionMismatch {
                high: self.version_high,
                low: self.version_low,
                expected_high,
                expected_low,
            });
        }

        Ok(())
    }
}

fn read_section(
    reader: &mut impl Read,
    buf: &mut [u8],
    section: &'static str,
) -> Result<(), ShaderBinError> {
    reader.read_exact(buf).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => ShaderBinError::Truncated { section },
        _ => ShaderBinError::Io(e),
    })
}

/// Resolves `#include`d shaders, compiling or loading them as needed.
pub trait IncludeResolver {
    fn resolve_include(&self, name: &str) -> Result<Arc<ShaderBin>, ShaderBinError>;
}

/// One compiled shader: its token stream and the spellings of its user tokens.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShaderBin {
    pub name: String,
    pub include: bool,
    pub tokens: Vec<u32>,
    pub token_table: TokenTable,
    /// Token CRC plus the CRCs of everything included, transitively
    pub crc32: u32,
    /// CRC of the source text this was compiled from
    pub source_crc32: u32,
    /// Set when the cache file couldn't be written; the shader is recompiled every run
    pub read_only: bool,
    pub offset_local_info: u32,
}

impl ShaderBin {
    pub fn new(name: impl Into<String>, include: bool) -> Self {
        Self {
            name: name.into(),
            include,
            ..Self::default()
        }
    }

    /// Names of the shaders pulled in by `#include`, in stream order.
    pub fn included_names(&self) -> Result<Vec<&str>, ShaderBinError> {
        let include = KeyToken::Include.id();

        self.tokens
            .windows(2)
            .filter(|pair| pair[0] == include)
            .map(|pair| {
                self.token_table
                    .get(pair[1])
                    .ok_or_else(|| ShaderBinError::CorruptStringTable {
                        reason: format!(
                            "{:?} includes token {:#010x} which has no spelling",
                            self.name, pair[1]
                        ),
                    })
            })
            .collect()
    }

    /// CRC32 of the token stream in target byte order, plus the CRC of every
    /// included shader (added once per `#include`).
    pub fn compute_crc(
        &self,
        resolver: &dyn IncludeResolver,
        endian: TargetEndian,
    ) -> Result<u32, ShaderBinError> {
        self.compute_crc_visiting(resolver, endian, &mut Vec::new())
    }

    fn compute_crc_visiting(
        &self,
        resolver: &dyn IncludeResolver,
        endian: TargetEndian,
        visiting: &mut Vec<String>,
    ) -> Result<u32, ShaderBinError> {
        if self.tokens.is_empty() {
            return Ok(0);
        }

        if visiting.contains(&self.name) {
            return Err(PrepperError::RecursiveInclude {
                file: self.name.clone(),
                from: visiting.last().cloned().unwrap_or_default(),
            }
            .into());
        }

        let mut crc = crc32fast::hash(&endian.encode_tokens(&self.tokens));

        visiting.push(self.name.clone());
        for name in self.included_names()? {
            let included = resolver.resolve_include(name)?;
            crc = crc.wrapping_add(included.compute_crc_visiting(resolver, endian, visiting)?);
        }
        visiting.pop();

        Ok(crc)
    }

    /// Write the cache file layout at the writer's current position.
    ///
    /// The header goes out first with a zero `offset_params_local`, and is rewritten
    /// once the string table is down and the offset is known.
    pub fn write_to<W: Write + Seek>(
        &self,
        writer: &mut W,
        endian: TargetEndian,
    ) -> io::Result<ShaderBinHeader> {
        let start = writer.stream_position()?;
        let mut header = ShaderBinHeader::for_bin(self);

        writer.write_all(&header.to_bytes(endian))?;
        writer.write_all(&endian.encode_tokens(&self.tokens))?;

        for entry in self.token_table.iter() {
            writer.write_all(&endian.u32_bytes(entry.id))?;
            writer.write_all(entry.spelling.as_bytes())?;
            writer.write_all(&[0])?;
        }

        let end = writer.stream_position()?;
        header.offset_params_local = u32::try_from(end - start)
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "binary shader exceeds 4 GiB"))?;

        writer.seek(SeekFrom::Start(start))?;
        writer.write_all(&header.to_bytes(endian))?;
        writer.seek(SeekFrom::Start(end))?;

        Ok(header)
    }

    /// Read a binary written by [`ShaderBin::write_to`], starting at the reader's position.
    pub fn read_from<R: Read + Seek>(
        reader: &mut R,
        name: &str,
        include: bool,
        endian: TargetEndian,
    ) -> Result<Self, ShaderBinError> {
        let start = reader.stream_position()?;
        let header = ShaderBinHeader::read_from(reader, endian)?;
        header.validate()?;

        let body_start = reader.stream_position()?;
        let file_end = reader.seek(SeekFrom::End(0))?;
        reader.seek(SeekFrom::Start(body_start))?;
        let available = file_end.saturating_sub(start);

        // Sizes come from an untrusted header; check them against the file before allocating.
        let token_bytes = u64::from(header.token_count) * 4;
        if u64::from(header.offset_string_table) != ShaderBinHeader::SIZE as u64 + token_bytes {
            return Err(ShaderBinError::CorruptStringTable {
                reason: format!(
                    "string table at {} doesn't follow {} tokens",
                    header.offset_string_table, header.token_count
                ),
            });
        }
        if u64::from(header.offset_params_local) < u64::from(header.offset_string_table) {
            return Err(ShaderBinError::CorruptStringTable {
                reason: format!(
                    "string table ends at {} before it starts at {}",
                    header.offset_params_local, header.offset_string_table
                ),
            });
        }
        if u64::from(header.offset_string_table) > available {
            return Err(ShaderBinError::Truncated { section: "tokens" });
        }
        if u64::from(header.offset_params_local) > available {
            return Err(ShaderBinError::Truncated {
                section: "string table",
            });
        }

        let mut raw_tokens = vec![0u8; token_bytes as usize];
        read_section(reader, &mut raw_tokens, "tokens")?;

        let table_size = header.offset_params_local - header.offset_string_table;
        let mut raw_table = vec![0u8; table_size as usize];
        read_section(reader, &mut raw_table, "string table")?;

        Ok(Self {
            name: name.to_owned(),
            include,
            tokens: endian.decode_tokens(&raw_tokens),
            token_table: parse_string_table(&raw_table, endian)?,
            crc32: header.crc32,
            source_crc32: header.source_crc32,
            read_only: false,
            offset_local_info: header.offset_params_local,
        })
    }

    /// Spelling of every token in the stream; `None` for the `0` macro terminator.
    pub fn token_strings(&self) -> Vec<Option<&str>> {
        self.tokens
            .iter()
            .map(|&token| self.token_table.string_of(token))
            .collect()
    }

    /// Approximate heap and inline footprint.
    pub fn size(&self) -> usize {
        std::mem::size_of::<Self>()
            + self.name.capacity()
            + self.tokens.capacity() * std::mem::size_of::<u32>()
            + self.token_table.size_in_bytes()
    }
}

fn parse_string_table(mut raw: &[u8], endian: TargetEndian) -> Result<TokenTable, ShaderBinError> {
    let corrupt = |reason: String| ShaderBinError::CorruptStringTable { reason };
    let mut table = TokenTable::new();

    while !raw.is_empty() {
        if raw.len() < 4 {
            return Err(corrupt(format!("{} dangling bytes", raw.len())));
        }
        let id = endian.read_u32([raw[0], raw[1], raw[2], raw[3]]);
        raw = &raw[4..];

        let len = raw
            .iter()
            .position(|&c| c == 0)
            .ok_or_else(|| corrupt(format!("spelling of {:#010x} is not terminated", id)))?;
        let spelling = std::str::from_utf8(&raw[..len])
            .map_err(|e| corrupt(format!("spelling of {:#010x}: {}", id, e)))?;
        raw = &raw[len + 1..];

        if table.get(id).is_some() {
            return Err(corrupt(format!("duplicate token id {:#010x}", id)));
        }
        table
            .insert(id, spelling)
            .map_err(|e| corrupt(e.to_string()))?;
    }

    Ok(table)
}
