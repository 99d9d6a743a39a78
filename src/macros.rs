use std::collections::HashMap;

use crate::PrepperError;

/// Value given to a `##define` without one.
pub const DEFAULT_MACRO_VALUE: &str = "1";

/// Macros visible to `##` directives during one preprocessing session.
#[derive(Default, Debug, Clone)]
pub struct MacroTable {
    macros: HashMap<String, String>,
}

impl MacroTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Redefining an existing macro is an error, even with the same value.
    pub fn define(&mut self, name: &str, value: Option<&str>) -> Result<(), PrepperError> {
        if let Some(existing) = self.macros.get(name) {
            return Err(PrepperError::MacroRedefinition {
                name: name.to_owned(),
                value: existing.clone(),
            });
        }

        self.macros.insert(
            name.to_owned(),
            value.unwrap_or(DEFAULT_MACRO_VALUE).to_owned(),
        );
        Ok(())
    }

    /// Insert or overwrite without the redefinition check.
    pub fn set(&mut self, name: &str, value: &str) {
        self.macros.insert(name.to_owned(), value.to_owned());
    }

    /// Returns the removed value; undefining an unknown name does nothing.
    pub fn undefine(&mut self, name: &str) -> Option<String> {
        self.macros.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.macros.get(name).map(String::as_str)
    }

    pub fn is_defined(&self, name: &str) -> bool {
        self.macros.contains_key(name)
    }

    /// The macro's value if `token` names one, otherwise `token` itself.
    pub fn expand<'a>(&'a self, token: &'a str) -> &'a str {
        self.get(token).unwrap_or(token)
    }

    pub fn len(&self) -> usize {
        self.macros.len()
    }

    pub fn is_empty(&self) -> bool {
        self.macros.is_empty()
    }
}
