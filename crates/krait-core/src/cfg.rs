//! Control flow graph representation.
//!
//! Vertices are basic blocks holding ordered address lists; edges carry the
//! branch sense that selects them. Blocks refer to instructions by address
//! only, the document remains the single owner of the cells.

use std::collections::HashMap;

use indexmap::IndexMap;

use crate::{Address, Document};

/// Unique identifier for a basic block within a function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BasicBlockId(pub u32);

impl BasicBlockId {
    /// Creates a new basic block ID.
    pub fn new(id: u32) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for BasicBlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "bb{}", self.0)
    }
}

/// Branch sense carried by a CFG edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum EdgeKind {
    /// Unconditional transfer (or synthesized fallthrough).
    Unconditional,
    /// Taken side of a conditional branch.
    True,
    /// Fall-through side of a conditional branch.
    False,
}

impl std::fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unconditional => write!(f, "unconditional"),
            Self::True => write!(f, "true"),
            Self::False => write!(f, "false"),
        }
    }
}

/// An outgoing edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Edge {
    /// Destination block.
    pub to: BasicBlockId,
    /// Branch sense.
    pub kind: EdgeKind,
}

/// A basic block: an ordered list of instruction addresses.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BasicBlock {
    /// Unique identifier for this block.
    pub id: BasicBlockId,
    /// Instruction addresses, in execution order.
    pub addresses: Vec<Address>,
}

impl BasicBlock {
    /// Creates a block over the given addresses.
    pub fn new(id: BasicBlockId, addresses: Vec<Address>) -> Self {
        Self { id, addresses }
    }

    /// First address, if any.
    pub fn first(&self) -> Option<Address> {
        self.addresses.first().copied()
    }

    /// Last address, if any.
    pub fn last(&self) -> Option<Address> {
        self.addresses.last().copied()
    }

    /// Returns true if `addr` belongs to this block.
    pub fn contains(&self, addr: Address) -> bool {
        self.addresses.contains(&addr)
    }

    /// Number of instructions in this block.
    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    /// Returns true if the block holds no addresses.
    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }
}

/// A control flow graph for a function.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ControlFlowGraph {
    entry: Option<BasicBlockId>,
    blocks: IndexMap<BasicBlockId, BasicBlock>,
    successors: IndexMap<BasicBlockId, Vec<Edge>>,
    predecessors: IndexMap<BasicBlockId, Vec<BasicBlockId>>,
    by_address: HashMap<Address, BasicBlockId>,
    next_id: u32,
}

impl ControlFlowGraph {
    /// Creates an empty CFG.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a basic block; the first block added becomes the entry.
    pub fn add_block(&mut self, addresses: Vec<Address>) -> BasicBlockId {
        let id = BasicBlockId::new(self.next_id);
        self.next_id += 1;
        self.blocks.insert(id, BasicBlock::new(id, addresses));
        self.successors.entry(id).or_default();
        self.predecessors.entry(id).or_default();
        if self.entry.is_none() {
            self.entry = Some(id);
        }
        id
    }

    /// The entry block id.
    pub fn entry(&self) -> Option<BasicBlockId> {
        self.entry
    }

    /// Returns a block by id.
    pub fn block(&self, id: BasicBlockId) -> Option<&BasicBlock> {
        self.blocks.get(&id)
    }

    /// Iterates over all blocks.
    pub fn blocks(&self) -> impl Iterator<Item = &BasicBlock> {
        self.blocks.values()
    }

    /// Number of blocks.
    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// Total number of edges.
    pub fn num_edges(&self) -> usize {
        self.successors.values().map(|v| v.len()).sum()
    }

    /// Outgoing edges of a block.
    pub fn successors(&self, id: BasicBlockId) -> &[Edge] {
        self.successors.get(&id).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Predecessors of a block.
    pub fn predecessors(&self, id: BasicBlockId) -> &[BasicBlockId] {
        self.predecessors
            .get(&id)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Returns the block containing `addr`.
    pub fn block_containing(&self, addr: Address) -> Option<&BasicBlock> {
        if let Some(id) = self.by_address.get(&addr) {
            return self.blocks.get(id);
        }
        self.blocks.values().find(|b| b.contains(addr))
    }

    /// Splits blocks so that `dst` begins a vertex and `src` ends one.
    ///
    /// Returns true when both addresses were found in the graph. Splitting
    /// does not attach edges; linear flow between the halves is recovered
    /// by [`ControlFlowGraph::finalize`].
    pub fn split_block(&mut self, dst: Address, src: Address) -> bool {
        let found_dst = self.split_before(dst);
        let found_src = self.split_after(src);
        found_dst && found_src
    }

    /// Attaches a typed edge between the block ending at `src` and the
    /// block starting at `dst`. Returns false if either block is missing.
    pub fn add_edge(&mut self, src: Address, dst: Address, kind: EdgeKind) -> bool {
        let Some(src_id) = self.block_ending_at(src) else {
            return false;
        };
        let Some(dst_id) = self.block_starting_at(dst) else {
            return false;
        };
        self.insert_edge(src_id, dst_id, kind);
        true
    }

    /// Indexes addresses to blocks and synthesizes the fallthrough edge of
    /// every block whose last instruction runs linearly into another block.
    pub fn finalize(&mut self, doc: &Document) {
        self.by_address.clear();
        for (id, block) in &self.blocks {
            for addr in &block.addresses {
                self.by_address.insert(*addr, *id);
            }
        }

        let mut fallthrough = Vec::new();
        for (id, block) in &self.blocks {
            if !self.successors(*id).is_empty() {
                continue;
            }
            let Some(last) = block.last() else {
                continue;
            };
            let Some(insn) = doc.cell_at(last).and_then(|c| c.as_code()) else {
                continue;
            };
            // Jumps carry explicit edges; an unconditional return ends flow.
            if insn.kind.is_jump() || (insn.kind.is_ret() && !insn.kind.is_cond()) {
                continue;
            }
            let next = last + u64::from(insn.length);
            if let Some(&next_id) = self.by_address.get(&next) {
                let starts_block = self
                    .blocks
                    .get(&next_id)
                    .and_then(|b| b.first())
                    .is_some_and(|first| first == next);
                if starts_block {
                    fallthrough.push((*id, next_id));
                }
            }
        }
        for (from, to) in fallthrough {
            self.insert_edge(from, to, EdgeKind::Unconditional);
        }
    }

    /// Addresses execution can reach right after `addr`: the next address
    /// within its block, or the heads of the successor blocks. `None` when
    /// `addr` is unknown or flow ends there.
    pub fn next_addresses(&self, addr: Address) -> Option<Vec<Address>> {
        let (block, pos) = self.locate(addr)?;
        if pos + 1 < block.addresses.len() {
            return Some(vec![block.addresses[pos + 1]]);
        }
        let next: Vec<Address> = self
            .successors(block.id)
            .iter()
            .filter_map(|e| self.blocks.get(&e.to).and_then(|b| b.first()))
            .collect();
        if next.is_empty() {
            None
        } else {
            Some(next)
        }
    }

    /// Addresses execution can come from right before `addr`.
    pub fn prev_addresses(&self, addr: Address) -> Option<Vec<Address>> {
        let (block, pos) = self.locate(addr)?;
        if pos > 0 {
            return Some(vec![block.addresses[pos - 1]]);
        }
        let prev: Vec<Address> = self
            .predecessors(block.id)
            .iter()
            .filter_map(|id| self.blocks.get(id).and_then(|b| b.last()))
            .collect();
        if prev.is_empty() {
            None
        } else {
            Some(prev)
        }
    }

    fn locate(&self, addr: Address) -> Option<(&BasicBlock, usize)> {
        let block = self.block_containing(addr)?;
        let pos = block.addresses.iter().position(|a| *a == addr)?;
        Some((block, pos))
    }

    fn insert_edge(&mut self, from: BasicBlockId, to: BasicBlockId, kind: EdgeKind) {
        self.successors
            .entry(from)
            .or_default()
            .push(Edge { to, kind });
        self.predecessors.entry(to).or_default().push(from);
    }

    fn position_of(&self, addr: Address) -> Option<(BasicBlockId, usize)> {
        self.blocks.iter().find_map(|(id, b)| {
            b.addresses.iter().position(|a| *a == addr).map(|p| (*id, p))
        })
    }

    fn split_before(&mut self, addr: Address) -> bool {
        let Some((id, pos)) = self.position_of(addr) else {
            return false;
        };
        if pos > 0 {
            self.split_at(id, pos);
        }
        true
    }

    fn split_after(&mut self, addr: Address) -> bool {
        let Some((id, pos)) = self.position_of(addr) else {
            return false;
        };
        let len = self.blocks.get(&id).map(|b| b.len()).unwrap_or(0);
        if pos + 1 < len {
            self.split_at(id, pos + 1);
        }
        true
    }

    /// Moves the tail of `id` starting at `pos` into a fresh block, along
    /// with the outgoing edges, which belong to the old block end.
    fn split_at(&mut self, id: BasicBlockId, pos: usize) {
        let Some(block) = self.blocks.get_mut(&id) else {
            return;
        };
        let tail = block.addresses.split_off(pos);
        let new_id = self.add_block(tail);

        let moved = self
            .successors
            .get_mut(&id)
            .map(std::mem::take)
            .unwrap_or_default();
        for edge in &moved {
            if let Some(preds) = self.predecessors.get_mut(&edge.to) {
                for p in preds.iter_mut() {
                    if *p == id {
                        *p = new_id;
                    }
                }
            }
        }
        self.successors.insert(new_id, moved);
    }

    fn block_starting_at(&self, addr: Address) -> Option<BasicBlockId> {
        self.blocks
            .iter()
            .find(|(_, b)| b.first() == Some(addr))
            .map(|(id, _)| *id)
    }

    fn block_ending_at(&self, addr: Address) -> Option<BasicBlockId> {
        self.blocks
            .iter()
            .find(|(_, b)| b.last() == Some(addr))
            .map(|(id, _)| *id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat(offset: u64) -> Address {
        Address::flat(offset)
    }

    fn run(start: u64, count: u64) -> Vec<Address> {
        (0..count).map(|i| flat(start + i)).collect()
    }

    #[test]
    fn test_first_block_is_entry() {
        let mut cfg = ControlFlowGraph::new();
        let id = cfg.add_block(run(0x1000, 3));
        assert_eq!(cfg.entry(), Some(id));
        assert_eq!(cfg.num_blocks(), 1);
    }

    #[test]
    fn test_split_at_non_first_address() {
        let mut cfg = ControlFlowGraph::new();
        cfg.add_block(run(0x1000, 4));

        assert!(cfg.split_block(flat(0x1002), flat(0x1001)));
        assert_eq!(cfg.num_blocks(), 2);

        let head = cfg.block_containing(flat(0x1000)).unwrap();
        assert_eq!(head.addresses, run(0x1000, 2));
        let tail = cfg.block_containing(flat(0x1002)).unwrap();
        assert_eq!(tail.addresses, run(0x1002, 2));
    }

    #[test]
    fn test_split_at_first_address_is_noop() {
        let mut cfg = ControlFlowGraph::new();
        cfg.add_block(run(0x1000, 2));

        assert!(cfg.split_block(flat(0x1000), flat(0x1001)));
        assert_eq!(cfg.num_blocks(), 1);
    }

    #[test]
    fn test_split_unknown_address_fails() {
        let mut cfg = ControlFlowGraph::new();
        cfg.add_block(run(0x1000, 2));

        assert!(!cfg.split_block(flat(0x9000), flat(0x1001)));
    }

    #[test]
    fn test_split_moves_outgoing_edges_to_tail() {
        let mut cfg = ControlFlowGraph::new();
        let a = cfg.add_block(run(0x1000, 4));
        let b = cfg.add_block(run(0x2000, 1));
        cfg.insert_edge(a, b, EdgeKind::Unconditional);

        // Splitting the head block should hand its edge to the new tail.
        cfg.split_block(flat(0x1002), flat(0x1003));
        let tail_id = cfg.block_containing(flat(0x1002)).unwrap().id;
        assert_eq!(cfg.successors(a), &[]);
        assert_eq!(cfg.successors(tail_id), &[Edge { to: b, kind: EdgeKind::Unconditional }]);
        assert_eq!(cfg.predecessors(b), &[tail_id]);
    }

    #[test]
    fn test_add_edge_requires_block_boundaries() {
        let mut cfg = ControlFlowGraph::new();
        cfg.add_block(run(0x1000, 2));
        cfg.add_block(run(0x2000, 2));

        assert!(cfg.add_edge(flat(0x1001), flat(0x2000), EdgeKind::True));
        // 0x2001 does not start a block.
        assert!(!cfg.add_edge(flat(0x1001), flat(0x2001), EdgeKind::True));
        assert_eq!(cfg.num_edges(), 1);
    }

    #[test]
    fn test_next_and_prev_within_block() {
        let mut cfg = ControlFlowGraph::new();
        cfg.add_block(run(0x1000, 3));

        assert_eq!(cfg.next_addresses(flat(0x1000)), Some(vec![flat(0x1001)]));
        assert_eq!(cfg.prev_addresses(flat(0x1001)), Some(vec![flat(0x1000)]));
        assert_eq!(cfg.prev_addresses(flat(0x1000)), None);
        assert_eq!(cfg.next_addresses(flat(0x1002)), None);
    }

    #[test]
    fn test_next_crosses_edges() {
        let mut cfg = ControlFlowGraph::new();
        let a = cfg.add_block(run(0x1000, 1));
        let b = cfg.add_block(run(0x2000, 1));
        let c = cfg.add_block(run(0x3000, 1));
        cfg.insert_edge(a, b, EdgeKind::True);
        cfg.insert_edge(a, c, EdgeKind::False);

        let next = cfg.next_addresses(flat(0x1000)).unwrap();
        assert_eq!(next, vec![flat(0x2000), flat(0x3000)]);

        let prev = cfg.prev_addresses(flat(0x2000)).unwrap();
        assert_eq!(prev, vec![flat(0x1000)]);
    }
}
