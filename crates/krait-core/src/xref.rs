//! Cross-references between addresses.

use std::collections::BTreeMap;

use crate::Address;

/// Many-to-many cross-reference relation.
///
/// Maintains both directions for efficient queries: the operand addresses
/// referring to a destination, and the destinations referred to from an
/// operand address.
#[derive(Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct XRefs {
    refs_to: BTreeMap<Address, Vec<Address>>,
    refs_from: BTreeMap<Address, Vec<Address>>,
}

impl XRefs {
    /// Creates an empty relation.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that the operand at `src` refers to `dst`.
    pub fn add_xref(&mut self, dst: Address, src: Address) {
        self.refs_to.entry(dst).or_default().push(src);
        self.refs_from.entry(src).or_default().push(dst);
    }

    /// Operand addresses referring to `dst`.
    pub fn refs_to(&self, dst: Address) -> &[Address] {
        self.refs_to.get(&dst).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Destinations referred to from `src`.
    pub fn refs_from(&self, src: Address) -> &[Address] {
        self.refs_from
            .get(&src)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Returns true if anything refers to `dst`.
    pub fn is_referenced(&self, dst: Address) -> bool {
        self.refs_to.contains_key(&dst)
    }

    /// Total number of cross-references.
    pub fn len(&self) -> usize {
        self.refs_from.values().map(|v| v.len()).sum()
    }

    /// Returns true if the relation is empty.
    pub fn is_empty(&self) -> bool {
        self.refs_from.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_query() {
        let mut xrefs = XRefs::new();
        xrefs.add_xref(Address::flat(0x2000), Address::flat(0x1000));
        xrefs.add_xref(Address::flat(0x2000), Address::flat(0x1010));

        assert_eq!(
            xrefs.refs_to(Address::flat(0x2000)),
            &[Address::flat(0x1000), Address::flat(0x1010)]
        );
        assert_eq!(
            xrefs.refs_from(Address::flat(0x1000)),
            &[Address::flat(0x2000)]
        );
        assert!(xrefs.is_referenced(Address::flat(0x2000)));
        assert!(!xrefs.is_referenced(Address::flat(0x3000)));
        assert_eq!(xrefs.len(), 2);
    }

    #[test]
    fn test_empty() {
        let xrefs = XRefs::new();
        assert!(xrefs.is_empty());
        assert!(xrefs.refs_to(Address::flat(0)).is_empty());
    }
}
