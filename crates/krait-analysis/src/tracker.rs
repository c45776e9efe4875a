//! Forward and backward operand tracking over function CFGs.

use std::collections::{BTreeSet, VecDeque};

use krait_core::{Address, Document, MultiCell};

use crate::Analyzer;

/// A visitor driven over addresses by the tracker.
///
/// The return value steers the traversal; its exact meaning differs
/// between the forward and backward walks, see
/// [`Analyzer::track_operand`] and [`Analyzer::backtrack_operand`].
pub trait Tracker {
    /// Visits one address.
    fn visit(&mut self, doc: &Document, addr: Address) -> bool;
}

impl<F: FnMut(&Document, Address) -> bool> Tracker for F {
    fn visit(&mut self, doc: &Document, addr: Address) -> bool {
        self(doc, addr)
    }
}

impl Analyzer {
    /// Drives `tracker` forward from `start`, following each containing
    /// function's CFG in successor order.
    ///
    /// Within a function, a visit returning true extends the walk to the
    /// successors of the address; the function is abandoned when true is
    /// returned and no successor remains. Outside any function, the walk
    /// steps linearly through mapped memory until the visitor declines.
    pub fn track_operand(&self, doc: &Document, start: Address, tracker: &mut dyn Tracker) {
        let mut tracked = BTreeSet::new();
        let functions = doc.function_addresses_containing(start);

        if !functions.is_empty() {
            for func_addr in functions {
                let Some(function) =
                    doc.multi_cell_at(func_addr).and_then(MultiCell::as_function)
                else {
                    continue;
                };
                let cfg = function.cfg();
                let mut worklist = VecDeque::from([start]);

                while let Some(addr) = worklist.pop_front() {
                    if !tracked.insert(addr) {
                        continue;
                    }
                    if tracker.visit(doc, addr) {
                        match cfg.next_addresses(addr) {
                            Some(next) => worklist.extend(next),
                            None => break,
                        }
                    }
                }
            }
        } else {
            let mut cur = start;
            while let Some(next) = doc.move_address(cur, 1) {
                cur = next;
                if !tracker.visit(doc, cur) {
                    break;
                }
            }
        }
    }

    /// Drives `tracker` backward from `start`, following each containing
    /// function's CFG in predecessor order.
    ///
    /// Within a function, the walk stops as soon as a visit returns false
    /// or no predecessor remains. Outside any function, the walk steps
    /// linearly backward through mapped memory until the visitor declines.
    pub fn backtrack_operand(&self, doc: &Document, start: Address, tracker: &mut dyn Tracker) {
        let mut tracked = BTreeSet::new();
        let functions = doc.function_addresses_containing(start);

        if !functions.is_empty() {
            for func_addr in functions {
                let Some(function) =
                    doc.multi_cell_at(func_addr).and_then(MultiCell::as_function)
                else {
                    continue;
                };
                let cfg = function.cfg();
                let mut worklist = VecDeque::from([start]);

                while let Some(addr) = worklist.pop_front() {
                    if !tracked.insert(addr) {
                        continue;
                    }
                    if !tracker.visit(doc, addr) {
                        break;
                    }
                    match cfg.prev_addresses(addr) {
                        Some(prev) => worklist.extend(prev),
                        None => break,
                    }
                }
            }
        } else {
            let mut cur = start;
            while let Some(prev) = doc.move_address(cur, -1) {
                cur = prev;
                if !tracker.visit(doc, cur) {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use krait_core::{Access, BinaryStream, MemoryArea};

    fn doc_without_functions() -> Document {
        let mut doc = Document::new();
        doc.add_memory_area(MemoryArea::new(
            ".data",
            Address::flat(0x1000),
            Access::READ,
            BinaryStream::new(vec![0u8; 0x10]),
        ));
        doc
    }

    #[test]
    fn test_linear_fallback_forward() {
        let analyzer = Analyzer::new();
        let doc = doc_without_functions();

        let mut visited = Vec::new();
        let mut visitor = |_: &Document, addr: Address| {
            visited.push(addr);
            visited.len() < 3
        };
        analyzer.track_operand(&doc, Address::flat(0x1000), &mut visitor);

        // The start itself is not visited by the linear walk.
        assert_eq!(
            visited,
            vec![
                Address::flat(0x1001),
                Address::flat(0x1002),
                Address::flat(0x1003)
            ]
        );
    }

    #[test]
    fn test_linear_fallback_backward_stops_at_area_start() {
        let analyzer = Analyzer::new();
        let doc = doc_without_functions();

        let mut visited = Vec::new();
        let mut visitor = |_: &Document, addr: Address| {
            visited.push(addr);
            true
        };
        analyzer.backtrack_operand(&doc, Address::flat(0x1002), &mut visitor);

        assert_eq!(visited, vec![Address::flat(0x1001), Address::flat(0x1000)]);
    }
}
