//! Function delimitation and control flow graph construction.

use std::collections::BTreeSet;

use krait_core::{
    Address, Cell, ControlFlowGraph, CoreError, Document, EdgeKind, Function, InsnKind, Label,
    LabelKind, MultiCell,
};

use crate::{Analyzer, AnalysisError, AnalysisResult};

/// Hard cap on the byte length of a delimited function; longer walks are
/// treated as runaways and rejected.
pub const FUNCTION_LENGTH_THRESHOLD: u32 = 0x1000;

/// The extent of a delimited function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FunctionExtent {
    /// Address of the last return instruction reached.
    pub end: Address,
    /// Body length in bytes.
    pub byte_length: u16,
    /// Number of instructions in the body.
    pub insn_count: u16,
}

impl Analyzer {
    /// Bounds the function starting at `start` by reachability to a
    /// return, walking only already-decoded code cells.
    ///
    /// Fails when no return is reachable or, for a non-zero
    /// `length_threshold`, when the walk exceeds it.
    pub fn compute_function_length(
        &self,
        doc: &Document,
        start: Address,
        length_threshold: u32,
    ) -> AnalysisResult<FunctionExtent> {
        if doc.label_at(start).is_some_and(Label::is_imported) {
            return Err(AnalysisError::ImportedAddress(start));
        }
        if doc.memory_area(start).is_none() {
            return Err(CoreError::NotMapped(start).into());
        }

        let mut visited = BTreeSet::new();
        let mut worklist = vec![start];
        let mut ret_reached = false;
        let mut end = start;
        let mut walked: u32 = 0;
        let mut byte_length: u16 = 0;
        let mut insn_count: u16 = 0;

        while let Some(popped) = worklist.pop() {
            let mut cur = popped;
            while doc.contains_code(cur) {
                let Some(insn) = doc.cell_at(cur).and_then(Cell::as_code) else {
                    break;
                };
                let length = u64::from(insn.length);
                if !visited.insert(cur) {
                    cur = cur + length;
                    continue;
                }

                walked += u32::from(insn.length);
                byte_length = byte_length.saturating_add(insn.length);
                insn_count = insn_count.saturating_add(1);

                if insn.kind.is_jump() {
                    if insn.kind.is_cond() {
                        worklist.push(cur + length);
                    }
                    let op0 = insn.operand(0);
                    if op0.map_or(true, |op| op.is_memory()) {
                        break;
                    }
                    match op0.and_then(|op| op.reference()) {
                        Some(target) => {
                            cur = target;
                            continue;
                        }
                        None => break,
                    }
                } else if insn.kind.is_ret() && !insn.kind.is_cond() {
                    ret_reached = true;
                    if end < cur {
                        end = cur;
                    }
                    break;
                }

                cur = cur + length;
                if length_threshold > 0 && walked > length_threshold {
                    return Err(AnalysisError::FunctionRejected(start));
                }
            }
        }

        if ret_reached {
            Ok(FunctionExtent {
                end,
                byte_length,
                insn_count,
            })
        } else {
            Err(AnalysisError::FunctionRejected(start))
        }
    }

    /// Builds the typed control flow graph of the function at `start`.
    ///
    /// Same walk as [`Analyzer::compute_function_length`]: one initial
    /// vertex collects every visited address, explicit jump edges are
    /// recorded, the vertex is split at every edge endpoint, and
    /// finalization recovers linear flow between the pieces. Jumps through
    /// memory or without a static target contribute no edge.
    pub fn build_control_flow_graph(
        &self,
        doc: &Document,
        start: Address,
    ) -> AnalysisResult<ControlFlowGraph> {
        if doc.memory_area(start).is_none() {
            return Err(CoreError::NotMapped(start).into());
        }

        let mut visited = BTreeSet::new();
        let mut worklist = vec![start];
        let mut addresses = Vec::new();
        let mut edges: Vec<(Address, Address, EdgeKind)> = Vec::new();
        let mut ret_reached = false;

        while let Some(popped) = worklist.pop() {
            let mut cur = popped;
            while doc.contains_code(cur) {
                let Some(insn) = doc.cell_at(cur).and_then(Cell::as_code) else {
                    break;
                };
                let length = u64::from(insn.length);

                if visited.contains(&cur) {
                    if insn.kind.is_ret() && !insn.kind.is_cond() {
                        break;
                    }
                    cur = cur + length;
                    continue;
                }
                addresses.push(cur);
                visited.insert(cur);

                if insn.kind.is_jump() {
                    let op0 = insn.operand(0);
                    if op0.map_or(true, |op| op.is_memory()) {
                        break;
                    }
                    let Some(target) = op0.and_then(|op| op.reference()) else {
                        break;
                    };
                    if insn.kind.is_cond() {
                        let fallthrough = cur + length;
                        edges.push((target, cur, EdgeKind::True));
                        edges.push((fallthrough, cur, EdgeKind::False));
                        worklist.push(fallthrough);
                    } else {
                        edges.push((target, cur, EdgeKind::Unconditional));
                    }
                    cur = target;
                    continue;
                } else if insn.kind.is_ret() && !insn.kind.is_cond() {
                    ret_reached = true;
                    break;
                }

                cur = cur + length;
            }
        }

        let mut cfg = ControlFlowGraph::new();
        cfg.add_block(addresses);

        for (dst, src, kind) in &edges {
            let split = cfg.split_block(*dst, *src);
            log::trace!(
                "split dst: {dst}, src: {src}, type: {kind}, {}",
                if split { "succeeded" } else { "failed" }
            );
        }
        for (dst, src, kind) in edges {
            cfg.add_edge(src, dst, kind);
        }
        cfg.finalize(doc);

        if ret_reached {
            Ok(cfg)
        } else {
            Err(AnalysisError::CfgConstruction(start))
        }
    }

    /// Builds the control flow graph of the function named `label`.
    pub fn build_control_flow_graph_for_label(
        &self,
        doc: &Document,
        label: &str,
    ) -> AnalysisResult<ControlFlowGraph> {
        let addr = doc
            .address_of_label(label)
            .ok_or_else(|| AnalysisError::UnknownLabel(label.to_string()))?;
        self.build_control_flow_graph(doc, addr)
    }

    /// Delimits the function at `addr`, stores it as a multi-cell and
    /// names it.
    ///
    /// When no return is reachable, a single unconditional jump to a
    /// labeled target is still accepted as a thunk and named
    /// `<mnemonic>_<target label>`.
    pub fn create_function(&self, doc: &mut Document, addr: Address) -> AnalysisResult<()> {
        let mut name = format!("{}{}", self.config().function_prefix, addr.label_suffix());

        match self.compute_function_length(doc, addr, FUNCTION_LENGTH_THRESHOLD) {
            Ok(extent) => {
                log::debug!(
                    "function found: address={addr}, length={}, instructions={}",
                    extent.byte_length,
                    extent.insn_count
                );
                let cfg = match self.build_control_flow_graph(doc, addr) {
                    Ok(cfg) => cfg,
                    Err(e) => {
                        log::warn!("cannot build control flow graph for {addr}");
                        return Err(e);
                    }
                };
                let function = Function::new(extent.byte_length, extent.insn_count, cfg);
                let _ = doc.insert_multi_cell(addr, MultiCell::Function(function), false);
            }
            Err(_) => {
                let thunk = {
                    let Some(insn) = doc.cell_at(addr).and_then(Cell::as_code) else {
                        return Err(AnalysisError::FunctionRejected(addr));
                    };
                    if insn.kind != InsnKind::Jump {
                        return Err(AnalysisError::FunctionRejected(addr));
                    }
                    let Some(target) = insn.operand(0).and_then(|op| op.reference()) else {
                        return Err(AnalysisError::FunctionRejected(addr));
                    };
                    let Some(label) = doc.label_at(target) else {
                        return Err(AnalysisError::FunctionRejected(addr));
                    };
                    if label.kind().is_empty() {
                        return Err(AnalysisError::FunctionRejected(addr));
                    }
                    format!("{}_{}", insn.mnemonic, label.name())
                };
                name = thunk;
            }
        }

        let _ = doc.add_label(addr, Label::new(name, LabelKind::CODE | LabelKind::GLOBAL));
        Ok(())
    }
}
