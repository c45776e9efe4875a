//! Architecture back-end registry.

use std::collections::HashMap;
use std::sync::Arc;

use krait_core::{Architecture, Tag};

use crate::{AnalysisError, AnalysisResult};

/// Registry of architecture back-ends.
///
/// Each registered back-end is handed a short numeric id out of a 32-slot
/// pool; the id ends up embedded in the cells it decodes. The first
/// registration also becomes the default used when a cell carries the
/// unknown tag.
pub struct ArchitectureRegistry {
    id_pool: u32,
    architectures: HashMap<Tag, Arc<dyn Architecture>>,
    default_tag: Tag,
}

impl Default for ArchitectureRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ArchitectureRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            id_pool: 0,
            architectures: HashMap::new(),
            default_tag: Tag::UNKNOWN,
        }
    }

    /// Registers a back-end, assigning it the lowest free id.
    ///
    /// Fails only when all 32 ids are taken.
    pub fn register(&mut self, arch: Arc<dyn Architecture>) -> AnalysisResult<()> {
        let id = (0..32u8)
            .find(|i| self.id_pool & (1 << i) == 0)
            .ok_or(AnalysisError::IdPoolExhausted)?;
        self.id_pool |= 1 << id;

        arch.update_id(id);
        let tag = arch.tag();
        self.architectures.insert(tag, arch);

        if self.default_tag.is_unknown() {
            self.default_tag = tag;
        }
        Ok(())
    }

    /// Reserved; unregistering is not implemented.
    pub fn unregister(&mut self, _arch: &Arc<dyn Architecture>) -> AnalysisResult<()> {
        Err(AnalysisError::UnregisterUnsupported)
    }

    /// Drops all back-ends and the default tag.
    ///
    /// Ids stay reserved: already-decoded cells may still embed them, so
    /// the pool is not returned.
    pub fn reset(&mut self) {
        self.architectures.clear();
        self.default_tag = Tag::UNKNOWN;
    }

    /// Resolves a back-end by tag; the unknown tag resolves to the default.
    pub fn get(&self, tag: Tag) -> Option<Arc<dyn Architecture>> {
        let tag = if tag.is_unknown() {
            self.default_tag
        } else {
            tag
        };
        self.architectures.get(&tag).cloned()
    }

    /// The default tag, set by the first registration.
    pub fn default_tag(&self) -> Tag {
        self.default_tag
    }

    /// Number of registered back-ends.
    pub fn len(&self) -> usize {
        self.architectures.len()
    }

    /// Returns true if no back-end is registered.
    pub fn is_empty(&self) -> bool {
        self.architectures.is_empty()
    }
}
