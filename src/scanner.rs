//! Byte cursor over an owned source buffer.
//!
//! Shader sources are scanned as raw bytes; a NUL byte or the end of the buffer
//! both read as `0`, so everything past an embedded NUL is unreachable.

/// Remove every carriage return so that only `\n` separates lines.
pub fn remove_cr(text: &mut Vec<u8>) {
    text.retain(|&c| c != b'\r');
}

#[derive(Debug)]
pub struct Cursor {
    name: String,
    text: Vec<u8>,
    pos: usize,
}

impl Cursor {
    /// Take ownership of `text`, stripping carriage returns.
    pub fn new(name: impl Into<String>, text: impl Into<Vec<u8>>) -> Self {
        let mut text = text.into();
        remove_cr(&mut text);
        Self {
            name: name.into(),
            text,
            pos: 0,
        }
    }

    /// Name of the buffer, for diagnostics.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    #[inline]
    pub fn peek(&self) -> u8 {
        self.peek_at(0)
    }

    #[inline]
    pub fn peek_at(&self, offset: usize) -> u8 {
        self.text.get(self.pos + offset).copied().unwrap_or(0)
    }

    #[inline]
    pub fn is_at_end(&self) -> bool {
        self.peek() == 0
    }

    #[inline]
    pub fn advance(&mut self) {
        if !self.is_at_end() {
            self.pos += 1;
        }
    }

    pub fn advance_by(&mut self, n: usize) {
        for _ in 0..n {
            self.advance();
        }
    }

    pub fn starts_with(&self, prefix: &[u8]) -> bool {
        prefix.iter().enumerate().all(|(i, &c)| self.peek_at(i) == c)
    }

    pub fn at_directive(&self) -> bool {
        self.starts_with(b"##")
    }

    /// Skip spaces and control characters.
    pub fn skip_whitespace(&mut self) {
        while !self.is_at_end() && self.peek() <= b' ' {
            self.pos += 1;
        }
    }

    /// Skip spaces and tabs only, stopping at the end of the line.
    pub fn skip_blanks(&mut self) {
        while self.peek() == b' ' || self.peek() == b'\t' {
            self.pos += 1;
        }
    }

    /// Skip whitespace, `//` and `/* */` comments until real text (or the end) is reached.
    pub fn skip_trivia(&mut self) {
        self.skip_whitespace();

        loop {
            if self.starts_with(b"//") {
                while !self.is_at_end() && self.peek() != b'\n' {
                    self.pos += 1;
                }
            } else if self.starts_with(b"/*") {
                self.pos += 2;
                while !self.is_at_end() && !self.starts_with(b"*/") {
                    self.pos += 1;
                }
                self.advance_by(2);
            } else {
                break;
            }

            self.skip_whitespace();
        }
    }

    /// Bytes from the cursor up to (not including) the next `\n`, without consuming them.
    pub fn rest_of_line(&self) -> &[u8] {
        let rest = self.remaining();
        let end = rest.iter().position(|&c| c == b'\n').unwrap_or(rest.len());
        &rest[..end]
    }

    /// Consume the rest of the line including its `\n`, returning it without the `\n`.
    pub fn consume_line(&mut self) -> String {
        let bytes = self.rest_of_line();
        let len = bytes.len();
        let line = String::from_utf8_lossy(bytes).into_owned();
        self.pos += len;
        if self.peek() == b'\n' {
            self.pos += 1;
        }
        line
    }

    /// Advance byte by byte until a `##` or the end of the buffer.
    pub fn skip_to_directive(&mut self) {
        while !self.is_at_end() && !self.at_directive() {
            self.pos += 1;
        }
    }

    /// Everything between the cursor and the end of the buffer (or the first NUL).
    pub fn remaining(&self) -> &[u8] {
        let rest = self.text.get(self.pos..).unwrap_or(&[]);
        let end = rest.iter().position(|&c| c == 0).unwrap_or(rest.len());
        &rest[..end]
    }
}
