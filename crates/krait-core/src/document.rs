//! The document: owner of memory areas, cells, labels and cross-references.

use std::collections::{BTreeMap, HashMap};

use crate::{
    Address, Cell, CoreError, Label, MemoryArea, MultiCell, ValueCell, XRefs,
};

static RAW_BYTE: Cell = Cell::Value(ValueCell { width: 1 });

/// A loaded binary image, abstracted as memory areas mapped into a virtual
/// address space plus everything the analysis attaches to it.
///
/// The document exclusively owns all cells and multi-cells. Addresses
/// without an explicit cell read as a one-byte raw value; explicit cells
/// never overlap.
#[derive(Debug, Default)]
pub struct Document {
    areas: Vec<MemoryArea>,
    cells: BTreeMap<Address, Cell>,
    multi_cells: BTreeMap<Address, MultiCell>,
    labels_by_addr: BTreeMap<Address, Label>,
    labels_by_name: HashMap<String, Address>,
    xrefs: XRefs,
}

impl Document {
    /// Creates an empty document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Maps a memory area into the document.
    pub fn add_memory_area(&mut self, area: MemoryArea) {
        self.areas.push(area);
    }

    /// Returns the memory area owning `addr`.
    pub fn memory_area(&self, addr: Address) -> Option<&MemoryArea> {
        self.areas.iter().find(|a| a.contains(addr))
    }

    /// Returns true if `addr` is mapped by some memory area.
    pub fn is_present(&self, addr: Address) -> bool {
        self.memory_area(addr).is_some()
    }

    /// Returns true if `addr` falls inside an instruction cell, at its
    /// start or anywhere in its encoding.
    pub fn contains_code(&self, addr: Address) -> bool {
        if let Some(cell) = self.cells.get(&addr) {
            return cell.is_code();
        }
        matches!(self.covering_cell(addr), Some((_, cell)) if cell.is_code())
    }

    /// Returns the cell at `addr`.
    ///
    /// Unclaimed mapped addresses read as a one-byte value; addresses in
    /// the middle of a multi-byte cell are not separately addressable and
    /// yield `None`.
    pub fn cell_at(&self, addr: Address) -> Option<&Cell> {
        if let Some(cell) = self.cells.get(&addr) {
            return Some(cell);
        }
        if self.covering_cell(addr).is_some() {
            return None;
        }
        if self.is_present(addr) {
            return Some(&RAW_BYTE);
        }
        None
    }

    /// Iterates over the explicit cells.
    pub fn cells(&self) -> impl Iterator<Item = (Address, &Cell)> {
        self.cells.iter().map(|(a, c)| (*a, c))
    }

    /// Number of explicit instruction cells.
    pub fn code_cell_count(&self) -> usize {
        self.cells.values().filter(|c| c.is_code()).count()
    }

    /// Inserts a cell at `addr`.
    ///
    /// With `overwrite`, value cells in the way are consumed; instruction
    /// and string cells still cause a conflict. The cell must fit inside
    /// one memory area.
    pub fn insert_cell(&mut self, addr: Address, cell: Cell, overwrite: bool) -> Result<(), CoreError> {
        self.insert_cell_inner(addr, cell, overwrite, false)
    }

    /// Inserts a cell, consuming whatever was in the way.
    pub fn insert_cell_forced(&mut self, addr: Address, cell: Cell) -> Result<(), CoreError> {
        self.insert_cell_inner(addr, cell, true, true)
    }

    fn insert_cell_inner(
        &mut self,
        addr: Address,
        cell: Cell,
        overwrite: bool,
        force: bool,
    ) -> Result<(), CoreError> {
        let len = cell.len();
        self.check_span(addr, len)?;

        let in_the_way = self.overlapping_cells(addr, len);
        if !in_the_way.is_empty() {
            if !overwrite {
                return Err(CoreError::CellOccupied(addr));
            }
            if !force {
                for key in &in_the_way {
                    if let Some(existing) = self.cells.get(key) {
                        if !existing.is_value() {
                            return Err(CoreError::CellOccupied(*key));
                        }
                    }
                }
            }
            for key in &in_the_way {
                self.cells.remove(key);
            }
        }

        self.cells.insert(addr, cell);
        Ok(())
    }

    /// Resizes the value cell at `addr` to `width` bytes so later decoding
    /// sees a properly sized datum. Fails on instruction or string cells
    /// unless `force` is set.
    pub fn change_value_size(
        &mut self,
        addr: Address,
        width: u16,
        force: bool,
    ) -> Result<(), CoreError> {
        let width = width.max(1);
        self.check_span(addr, u64::from(width))?;

        match self.cells.get(&addr) {
            Some(cell) if !cell.is_value() && !force => {
                return Err(CoreError::CellOccupied(addr));
            }
            Some(_) => {}
            None => {
                if let Some((start, _)) = self.covering_cell(addr) {
                    if !force {
                        return Err(CoreError::CellOccupied(start));
                    }
                }
            }
        }

        self.insert_cell_inner(addr, Cell::Value(ValueCell { width }), true, force)
    }

    /// Returns the multi-cell starting at `addr`.
    pub fn multi_cell_at(&self, addr: Address) -> Option<&MultiCell> {
        self.multi_cells.get(&addr)
    }

    /// Inserts a multi-cell keyed on its starting address.
    pub fn insert_multi_cell(
        &mut self,
        addr: Address,
        multi_cell: MultiCell,
        overwrite: bool,
    ) -> Result<(), CoreError> {
        if self.multi_cells.contains_key(&addr) && !overwrite {
            return Err(CoreError::CellOccupied(addr));
        }
        self.multi_cells.insert(addr, multi_cell);
        Ok(())
    }

    /// Starting addresses of the functions whose body covers `addr`.
    pub fn function_addresses_containing(&self, addr: Address) -> Vec<Address> {
        self.multi_cells
            .iter()
            .filter(|(start, mc)| {
                covers(**start, mc.len().max(1), addr)
            })
            .map(|(start, _)| *start)
            .collect()
    }

    /// Binds a label to `addr`, replacing any label already there.
    ///
    /// Label names form a bijection with addresses; binding a name that
    /// already points at a different address fails.
    pub fn add_label(&mut self, addr: Address, label: Label) -> Result<(), CoreError> {
        if let Some(&bound) = self.labels_by_name.get(label.name()) {
            if bound != addr {
                return Err(CoreError::DuplicateLabel(label.name().to_string()));
            }
        }
        if let Some(old) = self.labels_by_addr.remove(&addr) {
            self.labels_by_name.remove(old.name());
        }
        self.labels_by_name.insert(label.name().to_string(), addr);
        self.labels_by_addr.insert(addr, label);
        Ok(())
    }

    /// Replaces the label at `addr`.
    pub fn set_label_to_address(&mut self, addr: Address, label: Label) -> Result<(), CoreError> {
        self.add_label(addr, label)
    }

    /// Returns the label bound to `addr`.
    pub fn label_at(&self, addr: Address) -> Option<&Label> {
        self.labels_by_addr.get(&addr)
    }

    /// Resolves a label name to its address.
    pub fn address_of_label(&self, name: &str) -> Option<Address> {
        self.labels_by_name.get(name).copied()
    }

    /// Iterates over the label bijection.
    pub fn labels(&self) -> impl Iterator<Item = (Address, &Label)> {
        self.labels_by_addr.iter().map(|(a, l)| (*a, l))
    }

    /// The cross-reference table.
    pub fn xrefs(&self) -> &XRefs {
        &self.xrefs
    }

    /// The cross-reference table, mutably.
    pub fn xrefs_mut(&mut self) -> &mut XRefs {
        &mut self.xrefs
    }

    /// Steps `addr` by `delta` bytes, staying within mapped memory.
    pub fn move_address(&self, addr: Address, delta: i64) -> Option<Address> {
        let offset = addr.offset.checked_add_signed(delta)?;
        let moved = Address { offset, ..addr };
        self.is_present(moved).then_some(moved)
    }

    /// Explicit cells starting in `[addr, addr + len)`, plus the one
    /// covering `addr` from before, if any.
    fn overlapping_cells(&self, addr: Address, len: u64) -> Vec<Address> {
        let mut keys: Vec<Address> = self
            .cells
            .range(addr..addr + len)
            .map(|(a, _)| *a)
            .collect();
        if let Some((start, _)) = self.covering_cell(addr) {
            keys.push(start);
        }
        keys
    }

    /// The cell strictly before `addr` whose span covers it, if any.
    fn covering_cell(&self, addr: Address) -> Option<(Address, &Cell)> {
        let (start, cell) = self.cells.range(..addr).next_back()?;
        covers(*start, cell.len(), addr).then_some((*start, cell))
    }

    /// Ensures `[addr, addr + len)` fits inside one memory area.
    fn check_span(&self, addr: Address, len: u64) -> Result<(), CoreError> {
        let area = self
            .memory_area(addr)
            .ok_or(CoreError::NotMapped(addr))?;
        if addr.offset + len > area.end_offset() {
            return Err(CoreError::AreaOverflow(addr));
        }
        Ok(())
    }
}

/// Returns true if `addr` falls inside the `len`-byte span at `start`.
fn covers(start: Address, len: u64, addr: Address) -> bool {
    start.kind == addr.kind
        && start.base == addr.base
        && addr.offset >= start.offset
        && addr.offset < start.offset + len
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Access, BinaryStream, InsnKind, Instruction, LabelKind, StringCell, StringKind, Tag};

    fn doc_with_text_area() -> Document {
        let mut doc = Document::new();
        doc.add_memory_area(MemoryArea::new(
            ".text",
            Address::flat(0x1000),
            Access::READ | Access::EXEC,
            BinaryStream::new(vec![0u8; 0x100]),
        ));
        doc
    }

    fn code(len: u16) -> Cell {
        Cell::Code(Instruction::new(
            Tag::new(*b"test"),
            len,
            InsnKind::Plain,
            "nop",
        ))
    }

    #[test]
    fn test_unclaimed_addresses_read_as_raw_bytes() {
        let doc = doc_with_text_area();
        let cell = doc.cell_at(Address::flat(0x1000)).unwrap();
        assert!(cell.is_value());
        assert_eq!(cell.len(), 1);
        assert!(doc.cell_at(Address::flat(0x2000)).is_none());
    }

    #[test]
    fn test_insert_and_retrieve_code() {
        let mut doc = doc_with_text_area();
        doc.insert_cell(Address::flat(0x1000), code(3), true).unwrap();

        assert!(doc.contains_code(Address::flat(0x1000)));
        assert!(doc.contains_code(Address::flat(0x1002)));
        assert!(!doc.contains_code(Address::flat(0x1003)));

        // Mid-instruction addresses are not separately addressable.
        assert!(doc.cell_at(Address::flat(0x1001)).is_none());
    }

    #[test]
    fn test_insert_rejects_code_overlap() {
        let mut doc = doc_with_text_area();
        doc.insert_cell(Address::flat(0x1000), code(3), true).unwrap();

        // Overlapping an instruction fails even with overwrite.
        assert!(doc.insert_cell(Address::flat(0x1002), code(2), true).is_err());
        assert_eq!(doc.code_cell_count(), 1);
    }

    #[test]
    fn test_insert_overwrites_values() {
        let mut doc = doc_with_text_area();
        doc.change_value_size(Address::flat(0x1001), 4, false).unwrap();
        doc.insert_cell(Address::flat(0x1000), code(3), true).unwrap();
        assert!(doc.contains_code(Address::flat(0x1000)));
    }

    #[test]
    fn test_insert_without_overwrite_respects_values() {
        let mut doc = doc_with_text_area();
        doc.change_value_size(Address::flat(0x1000), 2, false).unwrap();
        assert!(doc.insert_cell(Address::flat(0x1000), code(1), false).is_err());
    }

    #[test]
    fn test_insert_unmapped_fails() {
        let mut doc = doc_with_text_area();
        assert!(doc.insert_cell(Address::flat(0x9000), code(1), true).is_err());
    }

    #[test]
    fn test_insert_spilling_area_fails() {
        let mut doc = doc_with_text_area();
        assert!(doc.insert_cell(Address::flat(0x10ff), code(2), true).is_err());
    }

    #[test]
    fn test_forced_insert_replaces_code() {
        let mut doc = doc_with_text_area();
        doc.insert_cell(Address::flat(0x1000), code(2), true).unwrap();
        let s = Cell::String(StringCell {
            kind: StringKind::Ascii,
            text: "ok".into(),
            byte_len: 3,
        });
        doc.insert_cell_forced(Address::flat(0x1000), s).unwrap();
        assert!(!doc.contains_code(Address::flat(0x1000)));
    }

    #[test]
    fn test_change_value_size_on_code_fails() {
        let mut doc = doc_with_text_area();
        doc.insert_cell(Address::flat(0x1000), code(1), true).unwrap();
        assert!(doc.change_value_size(Address::flat(0x1000), 4, false).is_err());
    }

    #[test]
    fn test_label_bijection() {
        let mut doc = doc_with_text_area();
        let a = Address::flat(0x1000);
        let b = Address::flat(0x1004);

        doc.add_label(a, Label::new("start", LabelKind::CODE)).unwrap();
        assert_eq!(doc.label_at(a).unwrap().name(), "start");
        assert_eq!(doc.address_of_label("start"), Some(a));

        // Same name at another address is rejected.
        assert!(doc.add_label(b, Label::new("start", LabelKind::CODE)).is_err());

        // Re-labeling an address frees the old name.
        doc.add_label(a, Label::new("entry", LabelKind::CODE | LabelKind::GLOBAL))
            .unwrap();
        assert_eq!(doc.address_of_label("start"), None);
        assert_eq!(doc.address_of_label("entry"), Some(a));
    }

    #[test]
    fn test_relabel_same_name_same_address() {
        let mut doc = doc_with_text_area();
        let a = Address::flat(0x1000);
        doc.add_label(a, Label::new("start", LabelKind::CODE)).unwrap();
        doc.add_label(a, Label::new("start", LabelKind::CODE | LabelKind::GLOBAL))
            .unwrap();
        assert_eq!(doc.label_at(a).unwrap().kind(), LabelKind::CODE | LabelKind::GLOBAL);
    }

    #[test]
    fn test_move_address() {
        let doc = doc_with_text_area();
        assert_eq!(
            doc.move_address(Address::flat(0x1000), 1),
            Some(Address::flat(0x1001))
        );
        assert_eq!(doc.move_address(Address::flat(0x1000), -1), None);
        assert_eq!(
            doc.move_address(Address::flat(0x10ff), -1),
            Some(Address::flat(0x10fe))
        );
        assert_eq!(doc.move_address(Address::flat(0x10ff), 1), None);
    }

    #[test]
    fn test_function_addresses_containing() {
        use crate::{ControlFlowGraph, Function};

        let mut doc = doc_with_text_area();
        let start = Address::flat(0x1000);
        let f = Function::new(8, 4, ControlFlowGraph::new());
        doc.insert_multi_cell(start, MultiCell::Function(f), false).unwrap();

        assert_eq!(doc.function_addresses_containing(Address::flat(0x1004)), vec![start]);
        assert!(doc.function_addresses_containing(Address::flat(0x1008)).is_empty());
    }

    #[test]
    fn test_insert_multi_cell_no_overwrite() {
        use crate::{ControlFlowGraph, Function};

        let mut doc = doc_with_text_area();
        let start = Address::flat(0x1000);
        let f = || MultiCell::Function(Function::new(4, 2, ControlFlowGraph::new()));
        doc.insert_multi_cell(start, f(), false).unwrap();
        assert!(doc.insert_multi_cell(start, f(), false).is_err());
    }
}
