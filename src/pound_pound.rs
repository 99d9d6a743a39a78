//! The `##` directive layer, which runs ahead of the tokenizer.
//!
//! `##if`/`##elif`/`##else`/`##endif` select text, `##define`/`##undef` edit the
//! macro table, and `##include_restricted(root, PLATFORM)` splices the contents of
//! `<platform>/<root>_<platform>.cfr` into the stream. Every open conditional and
//! every open restricted include is one [`Layer`] on a stack.

use lazy_static::lazy_static;
use regex::Regex;

use crate::{Cursor, IncludeProvider, MacroTable, PrepperError};

/// Seeded into every context with the platform the shaders are built for.
pub const RESTRICTED_PLATFORM_MACRO: &str = "AZ_RESTRICTED_PLATFORM";

lazy_static! {
    static ref IF_EXPR_RE: Regex = Regex::new(r"^([^\s=]+)(?:\s*==\s*([^\s=]+))?$").unwrap();
    static ref INCLUDE_RESTRICTED_RE: Regex =
        Regex::new(r"^\(\s*([^\s,()]+)\s*,\s*([^\s,()]+)\s*\)$").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IfState {
    /// Not a conditional; restricted include layers sit in this state
    NoIf,
    /// No branch of the chain has matched yet
    ActiveIf,
    /// An earlier `##if`/`##elif` of the chain matched
    TriggeredIf,
    /// The enclosing text is suppressed, so the whole chain is off
    DormantIf,
    ActiveElse,
    DormantElse,
}

impl IfState {
    fn name(self) -> &'static str {
        match self {
            IfState::NoIf => "no open ##if",
            IfState::ActiveIf => "ActiveIf",
            IfState::TriggeredIf => "TriggeredIf",
            IfState::DormantIf => "DormantIf",
            IfState::ActiveElse => "ActiveElse",
            IfState::DormantElse => "DormantElse",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterdictionState {
    /// Text up to the next directive is skipped
    Active,
    /// Text is handed to the tokenizer
    Paused,
}

#[derive(Debug)]
pub struct Layer {
    pub if_state: IfState,
    pub interdiction: InterdictionState,
    /// Cursor of the including buffer, for restricted include layers.
    /// The included buffer itself is owned by the active cursor.
    resume: Option<Cursor>,
}

impl Layer {
    fn conditional() -> Self {
        Self {
            if_state: IfState::ActiveIf,
            interdiction: InterdictionState::Active,
            resume: None,
        }
    }

    fn include(resume: Cursor) -> Self {
        Self {
            if_state: IfState::NoIf,
            interdiction: InterdictionState::Paused,
            resume: Some(resume),
        }
    }

    pub fn is_include(&self) -> bool {
        self.resume.is_some()
    }

    fn trigger(&mut self) {
        self.if_state = IfState::TriggeredIf;
        self.interdiction = InterdictionState::Paused;
    }
}

/// Result of [`PoundPoundContext::is_end_of_buffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferStatus {
    /// All buffers, restricted includes included, are exhausted
    Exhausted,
    /// The current buffer has more text
    Text,
    /// A restricted include ran out and the cursor is back in the including buffer,
    /// possibly in front of whitespace, comments or another directive
    LayerSwitched,
}

pub struct PoundPoundContext<'p> {
    macros: MacroTable,
    layers: Vec<Layer>,
    include_provider: &'p dyn IncludeProvider,
}

impl<'p> PoundPoundContext<'p> {
    pub fn new(platform: &str, include_provider: &'p dyn IncludeProvider) -> Self {
        let mut macros = MacroTable::new();
        macros.set(RESTRICTED_PLATFORM_MACRO, platform);

        Self {
            macros,
            layers: Vec::new(),
            include_provider,
        }
    }

    pub fn macros(&self) -> &MacroTable {
        &self.macros
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn current_layer(&self) -> Option<&Layer> {
        self.layers.last()
    }

    /// Whether text at the cursor is currently handed to the tokenizer.
    pub fn is_emitting(&self) -> bool {
        self.layers
            .last()
            .map_or(true, |layer| layer.interdiction == InterdictionState::Paused)
    }

    /// Consume directives starting at `cursor`, which must sit on `##`.
    ///
    /// Returns once the cursor is on text that isn't suppressed, or once the current
    /// buffer runs out; [`Self::is_end_of_buffer`] sorts out which buffer comes next.
    pub fn preprocess_lines(&mut self, cursor: &mut Cursor) -> Result<(), PrepperError> {
        while cursor.at_directive() {
            self.process_directive(cursor)?;

            if self.is_emitting() {
                break;
            }

            cursor.skip_to_directive();
        }

        Ok(())
    }

    /// True only once every buffer is exhausted. Restricted includes which ran out are
    /// popped on the way, restoring the including buffer's cursor.
    pub fn is_end_of_buffer(&mut self, cursor: &mut Cursor) -> Result<BufferStatus, PrepperError> {
        let mut status = BufferStatus::Text;

        while cursor.is_at_end() {
            let top_is_include = match self.layers.last() {
                None => return Ok(BufferStatus::Exhausted),
                Some(layer) => layer.is_include(),
            };

            if !top_is_include {
                let open = self
                    .layers
                    .iter()
                    .rev()
                    .take_while(|layer| !layer.is_include())
                    .count();

                return Err(if self.layers.iter().any(Layer::is_include) {
                    PrepperError::IncludeEndedInsideIf {
                        file: cursor.name().to_owned(),
                        open,
                    }
                } else {
                    PrepperError::UnterminatedIf { open }
                });
            }

            if let Some(resume) = self.layers.pop().and_then(|layer| layer.resume) {
                log::trace!("leaving {:?}, back in {:?}", cursor.name(), resume.name());
                *cursor = resume;
            }
            status = BufferStatus::LayerSwitched;
        }

        Ok(status)
    }

    fn process_directive(&mut self, cursor: &mut Cursor) -> Result<(), PrepperError> {
        cursor.advance_by(2);
        let line = cursor.consume_line();

        let name_len = line
            .bytes()
            .take_while(|c| c.is_ascii_alphanumeric() || *c == b'_')
            .count();
        let (directive, args) = line.split_at(name_len);
        let args = args.trim();

        log::trace!("##{} {:?} in {:?}", directive, args, cursor.name());

        match directive {
            "if" => self.open_if(args),
            "elif" => self.elif(args),
            "else" => self.else_branch(),
            "endif" => self.endif(),
            "define" => self.define(args, &line),
            "undef" => self.undef(args, &line),
            "include_restricted" => self.include_restricted(args, &line, cursor),
            _ => Err(PrepperError::UnknownDirective {
                directive: directive.to_owned(),
                line: line.clone(),
            }),
        }
    }

    fn evaluate(&self, directive: &'static str, args: &str) -> Result<bool, PrepperError> {
        let caps = IF_EXPR_RE
            .captures(args)
            .ok_or_else(|| PrepperError::MalformedDirective {
                directive,
                line: args.to_owned(),
            })?;

        Ok(match caps.get(2) {
            Some(rhs) => self.macros.expand(&caps[1]) == self.macros.expand(rhs.as_str()),
            None => self.macros.is_defined(&caps[1]),
        })
    }

    fn open_if(&mut self, args: &str) -> Result<(), PrepperError> {
        let mut layer = Layer::conditional();

        if !self.is_emitting() {
            layer.if_state = IfState::DormantIf;
        } else if self.evaluate("##if", args)? {
            layer.trigger();
        }

        self.layers.push(layer);
        Ok(())
    }

    fn top_if_state(&self) -> IfState {
        self.layers
            .last()
            .map_or(IfState::NoIf, |layer| layer.if_state)
    }

    fn elif(&mut self, args: &str) -> Result<(), PrepperError> {
        match self.top_if_state() {
            IfState::ActiveIf => {
                if self.evaluate("##elif", args)? {
                    if let Some(layer) = self.layers.last_mut() {
                        layer.trigger();
                    }
                }
            }
            IfState::TriggeredIf | IfState::DormantIf => {
                if let Some(layer) = self.layers.last_mut() {
                    layer.interdiction = InterdictionState::Active;
                }
            }
            state @ IfState::NoIf | state @ IfState::ActiveElse | state @ IfState::DormantElse => {
                return Err(PrepperError::IllegalElif { state: state.name() })
            }
        }

        Ok(())
    }

    fn else_branch(&mut self) -> Result<(), PrepperError> {
        let (if_state, interdiction) = match self.top_if_state() {
            IfState::ActiveIf => (IfState::ActiveElse, InterdictionState::Paused),
            IfState::TriggeredIf | IfState::DormantIf => {
                (IfState::DormantElse, InterdictionState::Active)
            }
            state @ IfState::NoIf | state @ IfState::ActiveElse | state @ IfState::DormantElse => {
                return Err(PrepperError::IllegalElse { state: state.name() })
            }
        };

        if let Some(layer) = self.layers.last_mut() {
            layer.if_state = if_state;
            layer.interdiction = interdiction;
        }
        Ok(())
    }

    fn endif(&mut self) -> Result<(), PrepperError> {
        match self.layers.last() {
            Some(layer) if layer.if_state != IfState::NoIf => {
                self.layers.pop();
                Ok(())
            }
            _ => Err(PrepperError::UnbalancedEndif),
        }
    }

    fn define(&mut self, args: &str, line: &str) -> Result<(), PrepperError> {
        if !self.is_emitting() {
            return Ok(());
        }

        let mut parts = args.splitn(2, char::is_whitespace);
        let name = parts
            .next()
            .filter(|name| !name.is_empty())
            .ok_or_else(|| PrepperError::MalformedDirective {
                directive: "##define",
                line: line.to_owned(),
            })?;
        let value = parts.next().map(str::trim).filter(|value| !value.is_empty());

        self.macros.define(name, value)
    }

    fn undef(&mut self, args: &str, line: &str) -> Result<(), PrepperError> {
        if !self.is_emitting() {
            return Ok(());
        }

        if args.is_empty() || args.contains(char::is_whitespace) {
            return Err(PrepperError::MalformedDirective {
                directive: "##undef",
                line: line.to_owned(),
            });
        }

        self.macros.undefine(args);
        Ok(())
    }

    /// Suppressed text never splices an include, the same as `##define`/`##undef`.
    fn include_restricted(
        &mut self,
        args: &str,
        line: &str,
        cursor: &mut Cursor,
    ) -> Result<(), PrepperError> {
        if !self.is_emitting() {
            return Ok(());
        }

        let caps = INCLUDE_RESTRICTED_RE
            .captures(args)
            .ok_or_else(|| PrepperError::MalformedDirective {
                directive: "##include_restricted",
                line: line.to_owned(),
            })?;
        let root = &caps[1];
        let platform_macro = &caps[2];

        let platform = self.macros.get(platform_macro).ok_or_else(|| {
            PrepperError::UndefinedPlatformMacro {
                root: root.to_owned(),
                macro_name: platform_macro.to_owned(),
            }
        })?;

        let path = self.include_provider.resolve_restricted(root, platform);
        let text = self
            .include_provider
            .get_include(&path)
            .map_err(|e| PrepperError::IncludeProviderError {
                file: path.0.clone(),
                cause: e,
            })?;

        log::trace!("splicing {:?} into {:?}", path.0, cursor.name());

        let resume = std::mem::replace(cursor, Cursor::new(path.0, text));
        self.layers.push(Layer::include(resume));
        Ok(())
    }
}

/// Run only the `##` layer over `source`, returning the text it lets through.
pub fn preprocess_to_string(
    file: &str,
    source: &str,
    platform: &str,
    include_provider: &dyn IncludeProvider,
) -> Result<String, PrepperError> {
    let mut context = PoundPoundContext::new(platform, include_provider);
    let mut cursor = Cursor::new(file, source);
    let mut out = Vec::new();

    loop {
        if context.is_end_of_buffer(&mut cursor)? == BufferStatus::Exhausted {
            break;
        }

        if cursor.at_directive() {
            context.preprocess_lines(&mut cursor)?;
        } else {
            out.push(cursor.peek());
            cursor.advance();
        }
    }

    Ok(String::from_utf8_lossy(&out).into_owned())
}
