//! Labels: names attached to addresses.

use bitflags::bitflags;

bitflags! {
    /// Classification of a label. The empty set means unknown.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct LabelKind: u8 {
        /// Names code.
        const CODE = 0x01;
        /// Names data.
        const DATA = 0x02;
        /// Names a recognized string.
        const STRING = 0x04;
        /// Resolved by the dynamic loader; no body to analyze.
        const IMPORTED = 0x08;
        /// Function-local.
        const LOCAL = 0x10;
        /// Visible everywhere.
        const GLOBAL = 0x20;
    }
}

/// A name bound to an address.
///
/// The document maintains a bijection between names and addresses, so a
/// label name identifies at most one address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Label {
    name: String,
    kind: LabelKind,
}

impl Label {
    /// Creates a label.
    pub fn new(name: impl Into<String>, kind: LabelKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    /// Creates a label whose name derives from decoded text, prefixed and
    /// sanitized into an identifier.
    pub fn from_text(text: &str, prefix: &str, kind: LabelKind) -> Self {
        let mut name = String::with_capacity(prefix.len() + text.len());
        name.push_str(prefix);
        for c in text.chars() {
            name.push(if c.is_ascii_alphanumeric() { c } else { '_' });
        }
        Self { name, kind }
    }

    /// The label name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The label kind.
    pub fn kind(&self) -> LabelKind {
        self.kind
    }

    /// Returns true for imported symbols.
    pub fn is_imported(&self) -> bool {
        self.kind.contains(LabelKind::IMPORTED)
    }
}

impl std::fmt::Display for Label {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_text_sanitizes() {
        let label = Label::from_text("Hello, World!", "str_", LabelKind::STRING);
        assert_eq!(label.name(), "str_Hello__World_");
        assert_eq!(label.kind(), LabelKind::STRING);
    }

    #[test]
    fn test_from_text_keeps_long_names() {
        let long = "a".repeat(100);
        let label = Label::from_text(&long, "str_", LabelKind::STRING);
        assert_eq!(label.name().len(), 4 + 100);
    }

    #[test]
    fn test_imported() {
        let label = Label::new("printf", LabelKind::CODE | LabelKind::IMPORTED);
        assert!(label.is_imported());
        assert!(!Label::new("main", LabelKind::CODE).is_imported());
    }

    #[test]
    fn test_unknown_kind_is_empty() {
        assert!(LabelKind::empty().is_empty());
    }
}
