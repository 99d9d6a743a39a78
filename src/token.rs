//! Token codes.
//!
//! A token is a `u32`: either a [`KeyToken`] from the fixed keyword table, or a user
//! token whose id is the CRC32 of its spelling, interned into a [`TokenTable`].

use std::collections::HashMap;

use lazy_static::lazy_static;

use crate::{Cursor, PrepperError};

macro_rules! key_tokens {
    ($($variant:ident => $spelling:literal,)*) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u32)]
        pub enum KeyToken {
            Unknown = 0,
            $($variant,)*
            Max,
        }

        const KEY_TOKEN_SPELLINGS: &[(KeyToken, &str)] = &[
            $((KeyToken::$variant, $spelling),)*
        ];
    };
}

key_tokens! {
    Include => "#include",
    Define => "#define",
    Undefine => "#undefine",
    Define2 => "#define",
    FetchInst => "#fetchinst",
    If => "#if",
    Ifdef => "#ifdef",
    Ifndef => "#ifndef",
    If2 => "#if",
    Ifdef2 => "#ifdef",
    Ifndef2 => "#ifndef",
    Endif => "#endif",
    Else => "#else",
    Elif => "#elif",
    Warning => "#warning",
    RegisterEnv => "#register_env",
    IfCvar => "#ifcvar",
    IfNCvar => "#ifncvar",
    ElifCvar => "#elifcvar",
    Skip => "#skip",
    Skip1 => "#skip_(",
    Skip2 => "#skip_)",
    Or => "|",
    And => "&",
    BrRnd1 => "(",
    BrRnd2 => ")",
    BrSq1 => "[",
    BrSq2 => "]",
    BrCv1 => "{",
    BrCv2 => "}",
    BrTr1 => "<",
    BrTr2 => ">",
    Comma => ",",
    Dot => ".",
    Colon => ":",
    Semicolon => ";",
    Excl => "!",
    Quote => "\"",
    SingleQuote => "'",
    Comment => "//",
    Question => "?",
    Eq => "=",
    Plus => "+",
    Minus => "-",
    Div => "/",
    Mul => "*",
    DotMath => "dot",
    MulMath => "mul",
    SqrtMath => "sqrt",
    ExpMath => "exp",
    LogMath => "log",
    Log2Math => "log2",
    SinMath => "sin",
    CosMath => "cos",
    SinCosMath => "sincos",
    FloorMath => "floor",
    FracMath => "frac",
    LerpMath => "lerp",
    AbsMath => "abs",
    ClampMath => "clamp",
    MinMath => "min",
    MaxMath => "max",
    LengthMath => "length",
    Tex2D => "tex2D",
    Tex2DProj => "tex2Dproj",
    Tex3D => "tex3D",
    TexCube => "texCUBE",
    SamplerState => "SamplerState",
    SamplerComparisonState => "SamplerComparisonState",
    Texture2D => "Texture2D",
    Texture2DArray => "Texture2DArray",
    TextureCube => "TextureCube",
    Texture3D => "Texture3D",
    Float => "float",
    Float2 => "float2",
    Float3 => "float3",
    Float4 => "float4",
    Float4x4 => "float4x4",
    Float3x4 => "float3x4",
    Float3x3 => "float3x3",
    Half => "half",
    Half2 => "half2",
    Half3 => "half3",
    Half4 => "half4",
    Bool => "bool",
    Int => "int",
    Uint => "uint",
    Inout => "inout",
    Struct => "struct",
    Sampler => "sampler",
    Const => "const",
    Static => "static",
    GroupShared => "groupshared",
    Vs => "%_VS",
    Ps => "%_PS",
    Gs => "%_GS",
    Hs => "%_HS",
    Ds => "%_DS",
    Cs => "%_CS",
}

/// First id handed out to user tokens; everything below is a keyword.
pub const USER_FIRST: u32 = KeyToken::Max as u32 + 1;

lazy_static! {
    static ref KEY_TOKEN_LOOKUP: HashMap<&'static str, KeyToken> = {
        let mut lookup = HashMap::new();
        for &(token, spelling) in KEY_TOKEN_SPELLINGS {
            // Second-pass variants share a spelling; the first-pass one wins.
            lookup.entry(spelling).or_insert(token);
        }
        lookup
    };
}

impl KeyToken {
    pub fn from_spelling(spelling: &str) -> Option<KeyToken> {
        KEY_TOKEN_LOOKUP.get(spelling).copied()
    }

    pub fn from_id(id: u32) -> Option<KeyToken> {
        let index = (id as usize).checked_sub(1)?;
        KEY_TOKEN_SPELLINGS.get(index).map(|&(token, _)| token)
    }

    pub fn spelling(self) -> Option<&'static str> {
        let index = (self as usize).checked_sub(1)?;
        KEY_TOKEN_SPELLINGS.get(index).map(|&(_, spelling)| spelling)
    }

    #[inline]
    pub fn id(self) -> u32 {
        self as u32
    }

    /// `#if`/`#ifdef`/`#ifndef` evaluated after the first pass.
    pub fn second_pass(self) -> Option<KeyToken> {
        match self {
            KeyToken::If => Some(KeyToken::If2),
            KeyToken::Ifdef => Some(KeyToken::Ifdef2),
            KeyToken::Ifndef => Some(KeyToken::Ifndef2),
            _ => None,
        }
    }
}

/// Id of a user token: the CRC32 of its spelling.
pub fn user_token_id(spelling: &str) -> u32 {
    crc32fast::hash(spelling.as_bytes())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenEntry {
    pub id: u32,
    pub spelling: String,
}

/// Interned user token spellings, kept sorted by id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenTable {
    entries: Vec<TokenEntry>,
}

impl TokenTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: u32) -> Option<&str> {
        self.entries
            .binary_search_by_key(&id, |entry| entry.id)
            .ok()
            .map(|index| self.entries[index].spelling.as_str())
    }

    /// Returns `false` if `id` was already present with the same spelling.
    pub fn insert(&mut self, id: u32, spelling: &str) -> Result<bool, PrepperError> {
        match self.entries.binary_search_by_key(&id, |entry| entry.id) {
            Ok(index) if self.entries[index].spelling == spelling => Ok(false),
            Ok(index) => Err(PrepperError::TokenIdCollision {
                id,
                spelling: spelling.to_owned(),
                existing: self.entries[index].spelling.clone(),
            }),
            Err(index) => {
                self.entries.insert(
                    index,
                    TokenEntry {
                        id,
                        spelling: spelling.to_owned(),
                    },
                );
                Ok(true)
            }
        }
    }

    /// Keyword ids pass through; anything else is interned under its CRC32.
    pub fn new_user_token(
        &mut self,
        token: Option<KeyToken>,
        spelling: &str,
    ) -> Result<u32, PrepperError> {
        if let Some(token) = token {
            return Ok(token.id());
        }

        let id = user_token_id(spelling);
        if id < USER_FIRST {
            return Err(PrepperError::TokenIdCollision {
                id,
                spelling: spelling.to_owned(),
                existing: KeyToken::from_id(id)
                    .and_then(KeyToken::spelling)
                    .unwrap_or("<keyword range>")
                    .to_owned(),
            });
        }

        self.insert(id, spelling)?;
        Ok(id)
    }

    /// Spelling of any token: keywords from the keyword table, user tokens from `self`.
    pub fn string_of(&self, id: u32) -> Option<&str> {
        if id < USER_FIRST {
            KeyToken::from_id(id).and_then(KeyToken::spelling)
        } else {
            self.get(id)
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &TokenEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn size_in_bytes(&self) -> usize {
        self.entries
            .iter()
            .map(|entry| std::mem::size_of::<TokenEntry>() + entry.spelling.capacity())
            .sum()
    }
}

/// Bytes which end a token: control characters, space and most punctuation.
#[inline]
pub fn is_separator(c: u8) -> bool {
    c <= 0x20
        || (0x21..0x23).contains(&c)
        || (0x26..0x30).contains(&c)
        || (0x3a..0x40).contains(&c)
        || (0x5b..0x5f).contains(&c)
        || (0x7b..0x7f).contains(&c)
}

/// Read one token: a run of non-separator bytes, or a single separator.
pub fn next_token(cursor: &mut Cursor) -> (Option<KeyToken>, String) {
    let mut text = Vec::new();

    while !cursor.is_at_end() && !is_separator(cursor.peek()) {
        text.push(cursor.peek());
        cursor.advance();
    }

    if text.is_empty() && !cursor.is_at_end() && cursor.peek() != b' ' {
        text.push(cursor.peek());
        cursor.advance();
    }

    let text = String::from_utf8_lossy(&text).into_owned();
    (KeyToken::from_spelling(&text), text)
}

/// A conditional is evaluated in the first pass unless its expression
/// references a runtime mask flag (a word starting with `%_`).
pub fn is_first_pass(rest_of_line: &[u8]) -> bool {
    !rest_of_line
        .split(|&c| is_separator(c))
        .any(|word| word.starts_with(b"%_"))
}
