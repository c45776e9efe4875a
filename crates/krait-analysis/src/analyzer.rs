//! The analyzer: execution-path disassembly and cross-reference building.

use std::sync::{Arc, Mutex};

use krait_core::{
    Address, Architecture, Cell, CoreError, Document, FormattedLine, InsnKind, Instruction, Label,
    LabelKind, MultiCell, Tag, OPERAND_NO,
};

use crate::{AnalysisError, AnalysisResult, ArchitectureRegistry};

/// Naming configuration for synthesized labels.
#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
    /// Prefix of labels at code targets.
    pub label_prefix: String,
    /// Prefix of labels at data targets.
    pub data_prefix: String,
    /// Prefix of labels derived from recognized strings.
    pub string_prefix: String,
    /// Prefix of function labels.
    pub function_prefix: String,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            label_prefix: "lbl_".to_string(),
            data_prefix: "dat_".to_string(),
            string_prefix: "str_".to_string(),
            function_prefix: "fcn_".to_string(),
        }
    }
}

/// Recursive-descent code analyzer.
///
/// The analyzer owns its architecture registry and naming configuration;
/// documents are passed in per call. Instances may be shared across
/// threads: the execution-path driver serializes itself on an internal
/// mutex, reader operations take no lock and must not run concurrently
/// with a driver on the same document.
pub struct Analyzer {
    registry: ArchitectureRegistry,
    config: AnalyzerConfig,
    disasm_lock: Mutex<()>,
}

impl Default for Analyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl Analyzer {
    /// Creates an analyzer with an empty registry.
    pub fn new() -> Self {
        Self::with_registry(ArchitectureRegistry::new())
    }

    /// Creates an analyzer around an existing registry.
    pub fn with_registry(registry: ArchitectureRegistry) -> Self {
        Self {
            registry,
            config: AnalyzerConfig::default(),
            disasm_lock: Mutex::new(()),
        }
    }

    /// Replaces the naming configuration.
    pub fn with_config(mut self, config: AnalyzerConfig) -> Self {
        self.config = config;
        self
    }

    /// The naming configuration.
    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    /// The architecture registry.
    pub fn registry(&self) -> &ArchitectureRegistry {
        &self.registry
    }

    /// The architecture registry, mutably. Registration must happen before
    /// analysis starts.
    pub fn registry_mut(&mut self) -> &mut ArchitectureRegistry {
        &mut self.registry
    }

    /// Registers an architecture back-end.
    pub fn register_architecture(&mut self, arch: Arc<dyn Architecture>) -> AnalysisResult<()> {
        self.registry.register(arch)
    }

    /// Resolves an architecture by tag.
    pub fn architecture(&self, tag: Tag) -> Option<Arc<dyn Architecture>> {
        self.registry.get(tag)
    }

    /// Returns the cell at `addr`.
    pub fn cell_at<'doc>(&self, doc: &'doc Document, addr: Address) -> Option<&'doc Cell> {
        doc.cell_at(addr)
    }

    /// Returns the multi-cell starting at `addr`.
    pub fn multi_cell_at<'doc>(
        &self,
        doc: &'doc Document,
        addr: Address,
    ) -> Option<&'doc MultiCell> {
        doc.multi_cell_at(addr)
    }

    /// Renders the cell at `addr` through the back-end it was decoded by.
    pub fn format_cell(&self, doc: &Document, addr: Address) -> AnalysisResult<FormattedLine> {
        let cell = doc.cell_at(addr).ok_or(CoreError::NotMapped(addr))?;
        let tag = cell.arch_tag();
        let arch = self
            .registry
            .get(tag)
            .ok_or(AnalysisError::UnknownArchitecture(tag))?;
        Ok(arch.format_cell(doc, addr, cell)?)
    }

    /// Renders the multi-cell at `addr` through the default back-end.
    pub fn format_multi_cell(
        &self,
        doc: &Document,
        addr: Address,
    ) -> AnalysisResult<FormattedLine> {
        let multi_cell = doc.multi_cell_at(addr).ok_or(CoreError::NotMapped(addr))?;
        let tag = self.registry.default_tag();
        let arch = self
            .registry
            .get(tag)
            .ok_or(AnalysisError::UnknownArchitecture(tag))?;
        Ok(arch.format_multi_cell(doc, addr, multi_cell)?)
    }

    /// Decodes the maximal straight-line instruction run starting at
    /// `start`, stopping at the first control-flow instruction.
    ///
    /// The walk refuses imported symbols, leaves non-executable memory
    /// alone, and only decodes addresses that still read as raw bytes.
    /// Running into already-decoded code ends the block successfully
    /// without including it. A decoder failure discards the whole run.
    ///
    /// For a back-end that is not basic-block-only, running off the end of
    /// decodable memory still yields the instructions collected so far;
    /// a basic-block-only back-end yields an empty run instead.
    pub fn disassemble_basic_block(
        &self,
        doc: &Document,
        arch: &dyn Architecture,
        start: Address,
    ) -> AnalysisResult<Vec<Instruction>> {
        if doc.label_at(start).is_some_and(Label::is_imported) {
            return Err(AnalysisError::ImportedAddress(start));
        }

        let complete_on_any_stop = !arch.basic_block_only();
        let mut block = Vec::new();
        let mut cur = start;

        loop {
            let Some(area) = doc.memory_area(cur) else {
                break;
            };
            if !area.is_executable() {
                break;
            }
            match doc.cell_at(cur) {
                Some(Cell::Value(v)) if v.width == 1 => {}
                _ => break,
            }
            let Ok(physical) = area.translate(cur.offset) else {
                break;
            };

            let insn = match arch.decode(area.stream(), physical, cur) {
                Ok(insn) => insn,
                Err(e) => {
                    log::warn!("cannot decode instruction at {cur}: {e}");
                    return Err(e.into());
                }
            };
            if insn.length == 0 {
                log::warn!("back-end returned a zero-length instruction at {cur}");
                return Err(krait_core::DecodeError::new(physical, "zero-length instruction").into());
            }

            let length = u64::from(insn.length);
            if (0..length).any(|k| doc.contains_code(cur + k)) {
                return Ok(block);
            }

            let sequential = insn.kind.is_sequential();
            block.push(insn);
            if !sequential {
                return Ok(block);
            }
            cur = cur + length;
        }

        if complete_on_any_stop {
            Ok(block)
        } else {
            Ok(Vec::new())
        }
    }

    /// Resolves the operand references of the instruction at `addr` into
    /// cross-references and synthesized labels.
    ///
    /// Jump targets get a code label; plain data references get a code or
    /// data label depending on whether the target area is executable.
    /// Call destinations get no label here; they are named when their
    /// function is created.
    pub fn create_xrefs(&self, doc: &mut Document, addr: Address) {
        let (kind, referencing) = {
            let Some(insn) = doc.cell_at(addr).and_then(Cell::as_code) else {
                return;
            };
            let mut referencing = Vec::new();
            for index in 0..OPERAND_NO {
                let Some(op) = insn.operand(index) else {
                    continue;
                };
                let Some(target) = op.reference() else {
                    continue;
                };
                let op_addr = op.location(addr).unwrap_or(addr);
                referencing.push((target, op.reference_length(), op_addr));
            }
            (insn.kind, referencing)
        };

        for (target, width, op_addr) in referencing {
            let _ = doc.change_value_size(target, width, false);
            if doc.cell_at(target).is_none() {
                continue;
            }
            doc.xrefs_mut().add_xref(target, op_addr);

            if doc.label_at(target).is_some() {
                continue;
            }
            let suffix = target.label_suffix();
            if kind.is_jump() {
                let _ = doc.add_label(
                    target,
                    Label::new(
                        format!("{}{}", self.config.label_prefix, suffix),
                        LabelKind::CODE | LabelKind::LOCAL,
                    ),
                );
            } else if !kind.is_call() {
                let Some(area) = doc.memory_area(target) else {
                    continue;
                };
                let label = if area.is_executable() {
                    Label::new(
                        format!("{}{}", self.config.label_prefix, suffix),
                        LabelKind::CODE | LabelKind::LOCAL,
                    )
                } else {
                    Label::new(
                        format!("{}{}", self.config.data_prefix, suffix),
                        LabelKind::DATA | LabelKind::GLOBAL,
                    )
                };
                let _ = doc.add_label(target, label);
            }
        }
    }

    /// Discovers reachable instructions from `entry`, following calls,
    /// jumps and returns, then delimits the discovered functions.
    ///
    /// The whole call holds the disassembly mutex, serializing writers of
    /// the document's code cells across threads sharing this analyzer.
    pub fn disassemble_following_execution_path(
        &self,
        doc: &mut Document,
        entry: Address,
        arch: &dyn Architecture,
    ) -> AnalysisResult<()> {
        let _guard = self.disasm_lock.lock().unwrap_or_else(|e| e.into_inner());

        if doc.label_at(entry).is_some_and(Label::is_imported) {
            return Ok(());
        }
        if doc.memory_area(entry).is_none() {
            log::warn!("no memory area for entry point {entry}");
            return Err(CoreError::NotMapped(entry).into());
        }

        let mut worklist = vec![entry];
        let mut seeds = vec![entry];

        while let Some(popped) = worklist.pop() {
            let mut cur = popped;
            let mut finished = false;

            while doc.is_present(cur) && !doc.contains_code(cur) {
                let block = match self.disassemble_basic_block(doc, arch, cur) {
                    Ok(block) if !block.is_empty() => block,
                    _ => break,
                };
                let (last_kind, last_length, last_target) = {
                    let Some(last) = block.last() else {
                        break;
                    };
                    (
                        last.kind,
                        u64::from(last.length),
                        last.operand(0).and_then(|op| op.reference()),
                    )
                };

                for insn in block {
                    if doc.contains_code(cur) {
                        finished = true;
                        break;
                    }
                    let kind = insn.kind;
                    let length = u64::from(insn.length);
                    let targets: Vec<Address> = insn.references().collect();
                    if doc.insert_cell(cur, Cell::Code(insn), true).is_err() {
                        finished = true;
                        break;
                    }
                    // Speculative exploration: non-code targets are
                    // rejected by the presence checks when popped.
                    worklist.extend(targets);
                    self.create_xrefs(doc, cur);
                    if kind.is_sequential() {
                        cur = cur + length;
                    }
                }
                if finished {
                    break;
                }

                match last_kind {
                    InsnKind::Call | InsnKind::CallCond => {
                        // Save the return address, then follow the callee.
                        worklist.push(cur + last_length);
                        match last_target {
                            Some(target) => {
                                seeds.push(target);
                                cur = target;
                            }
                            None => finished = true,
                        }
                    }
                    InsnKind::Ret => finished = true,
                    InsnKind::RetCond => cur = cur + last_length,
                    InsnKind::Jump | InsnKind::JumpCond => {
                        if last_kind.is_cond() {
                            worklist.push(cur + last_length);
                        }
                        match last_target {
                            Some(target) => cur = target,
                            None => finished = true,
                        }
                    }
                    InsnKind::Plain | InsnKind::Cond => {}
                }
                if finished {
                    break;
                }
            }
        }

        for seed in seeds {
            let _ = self.create_function(doc, seed);
        }
        Ok(())
    }
}
