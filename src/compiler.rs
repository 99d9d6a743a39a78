//! Turns preprocessed shader source into a [`ShaderBin`] token stream.

use crate::pound_pound::{BufferStatus, PoundPoundContext};
use crate::token::{is_first_pass, next_token};
use crate::{
    Cursor, IncludeProvider, IncludeResolver, KeyToken, PrepperError, ShaderBin, ShaderBinError,
};

struct BinCompiler<'r> {
    bin: ShaderBin,
    resolver: &'r dyn IncludeResolver,
}

impl<'r> BinCompiler<'r> {
    fn push_token(&mut self, token: Option<KeyToken>, spelling: &str) -> Result<u32, ShaderBinError> {
        let id = self.bin.token_table.new_user_token(token, spelling)?;
        self.bin.tokens.push(id);
        Ok(id)
    }

    fn replace_last(&mut self, token: KeyToken) {
        if let Some(last) = self.bin.tokens.last_mut() {
            *last = token.id();
        }
    }

    fn compile_token(&mut self, cursor: &mut Cursor) -> Result<(), ShaderBinError> {
        let (key, spelling) = next_token(cursor);
        self.push_token(key, &spelling)?;
        cursor.skip_trivia();

        match key {
            Some(KeyToken::Include) => self.include(cursor),
            Some(token) if token.second_pass().is_some() => {
                if let Some(second) = second_pass_variant(token, cursor) {
                    self.replace_last(second);
                }
                Ok(())
            }
            Some(KeyToken::Define) => self.define(cursor),
            _ => Ok(()),
        }
    }

    /// `#include "name.ext"` or `#include <name.ext>`: compiles or fetches the included
    /// shader, then records its extension-less name.
    fn include(&mut self, cursor: &mut Cursor) -> Result<(), ShaderBinError> {
        let malformed = |reason| PrepperError::MalformedInclude {
            file: self.bin.name.clone(),
            reason,
        };

        let close = match cursor.peek() {
            b'"' => b'"',
            b'<' => b'>',
            _ => return Err(malformed("expected \" or < after #include").into()),
        };
        cursor.advance();

        let mut name = Vec::new();
        while cursor.peek() != close {
            if cursor.peek() <= b' ' {
                return Err(malformed("invalid character inside the include brackets").into());
            }
            name.push(cursor.peek());
            cursor.advance();
        }
        cursor.advance();

        let name = String::from_utf8_lossy(&name).into_owned();
        let name = strip_extension(&name);
        log::debug!("{:?} includes {:?}", self.bin.name, name);

        self.resolver.resolve_include(name)?;
        self.push_token(KeyToken::from_spelling(name), name)?;
        Ok(())
    }

    /// `#define NAME body`: the name becomes a token of its own, followed by the
    /// tokenized body and a `0` terminator.
    fn define(&mut self, cursor: &mut Cursor) -> Result<(), ShaderBinError> {
        let mut name = Vec::new();
        while cursor.peek() > b' ' {
            name.push(cursor.peek());
            cursor.advance();
        }
        let name = String::from_utf8_lossy(&name).into_owned();

        if name.is_empty() {
            return Err(PrepperError::MalformedDirective {
                directive: "#define",
                line: String::from_utf8_lossy(cursor.rest_of_line()).into_owned(),
            }
            .into());
        }

        if name.starts_with('%') {
            self.replace_last(KeyToken::Define2);
        }
        self.push_token(None, &name)?;

        cursor.skip_blanks();
        let mut body = Vec::new();
        while !cursor.is_at_end() && cursor.peek() != b'\n' {
            if cursor.peek() == b'\\' {
                body.push(b'\n');
                while !cursor.is_at_end() && cursor.peek() != b'\n' {
                    cursor.advance();
                }
                cursor.advance();
                continue;
            }
            body.push(cursor.peek());
            cursor.advance();
        }

        while body.last().map_or(false, |&c| c <= b' ') {
            body.pop();
        }

        let mut body = Cursor::new(format!("{} (#define {})", self.bin.name, name), body);
        loop {
            body.skip_trivia();
            if body.is_at_end() {
                break;
            }

            let (key, spelling) = next_token(&mut body);
            let key = key.map(|token| second_pass_variant(token, &body).unwrap_or(token));
            self.push_token(key, &spelling)?;
        }

        self.bin.tokens.push(0);
        Ok(())
    }
}

/// The `_2` variant of a conditional whose expression is only decidable at runtime.
fn second_pass_variant(token: KeyToken, cursor: &Cursor) -> Option<KeyToken> {
    token
        .second_pass()
        .filter(|_| !is_first_pass(cursor.rest_of_line()))
}

/// Drop the extension from an include name: everything from the last `.` which isn't
/// followed by a path separator.
pub fn strip_extension(name: &str) -> &str {
    match name.rfind('.') {
        Some(dot) if !name[dot..].contains(|c: char| c == '/' || c == '\\') => &name[..dot],
        _ => name,
    }
}

/// Compile one shader source into its token stream and string table.
///
/// `##` directives are resolved on the way, restricted includes through
/// `include_provider`. Every `#include` is handed to `resolver`, which compiles or
/// loads the included shader. The returned binary has no CRC yet.
pub fn compile_source(
    name: &str,
    include: bool,
    source: &str,
    platform: &str,
    include_provider: &dyn IncludeProvider,
    resolver: &dyn IncludeResolver,
) -> Result<ShaderBin, ShaderBinError> {
    let mut context = PoundPoundContext::new(platform, include_provider);
    let mut cursor = Cursor::new(name, source);
    let mut compiler = BinCompiler {
        bin: ShaderBin::new(name, include),
        resolver,
    };

    loop {
        let status = loop {
            cursor.skip_trivia();
            while cursor.at_directive() {
                context.preprocess_lines(&mut cursor)?;
                cursor.skip_trivia();
            }

            match context.is_end_of_buffer(&mut cursor)? {
                BufferStatus::LayerSwitched => continue,
                status => break status,
            }
        };

        if status == BufferStatus::Exhausted {
            break;
        }

        compiler.compile_token(&mut cursor)?;
    }

    let mut bin = compiler.bin;
    if bin.tokens.first().map_or(true, |&token| token == 0) {
        bin.tokens.push(KeyToken::Skip.id());
    }

    log::debug!("compiled {:?}: {} tokens", name, bin.tokens.len());
    Ok(bin)
}
