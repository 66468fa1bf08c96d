// Licensed under the Apache-2.0 license

//! The shared data model of the patch pipeline: sources going in, compiled objects in the middle,
//! and the placed segments of the final executable coming out.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::error::PatchMakerError;

/// A read/write/execute permission bitset for a memory segment.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct MemoryPermissions(u8);

impl MemoryPermissions {
    pub const R: MemoryPermissions = MemoryPermissions(0b100);
    pub const W: MemoryPermissions = MemoryPermissions(0b010);
    pub const X: MemoryPermissions = MemoryPermissions(0b001);
    pub const RW: MemoryPermissions = MemoryPermissions(0b110);
    pub const RX: MemoryPermissions = MemoryPermissions(0b101);
    pub const RWX: MemoryPermissions = MemoryPermissions(0b111);

    pub fn contains(&self, other: MemoryPermissions) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn union(&self, other: MemoryPermissions) -> MemoryPermissions {
        MemoryPermissions(self.0 | other.0)
    }

    /// The `rwx` attribute string used in linker script MEMORY region definitions.
    pub fn attribute_string(&self) -> String {
        let mut attrs = String::new();
        if self.contains(MemoryPermissions::R) {
            attrs.push('r');
        }
        if self.contains(MemoryPermissions::W) {
            attrs.push('w');
        }
        if self.contains(MemoryPermissions::X) {
            attrs.push('x');
        }
        attrs
    }
}

impl std::fmt::Display for MemoryPermissions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.attribute_string())
    }
}

/// A named, contiguous region of an executable.
///
/// The same shape serves two lifecycle phases: a placement *request* handed to the linker, where
/// `vm_address` is mandatory and `offset` is only a hint, and a *result* read back from the linked
/// executable, where every field is authoritative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// The section name this segment holds, e.g. `.text`.
    pub segment_name: String,

    /// The absolute virtual address the segment must occupy.
    pub vm_address: u64,

    /// The file offset of the segment.  Recomputed authoritatively by the linker; a request value
    /// is a hint only.
    pub offset: u64,

    /// Whether execution of the patched binary enters at this segment.
    pub is_entry: bool,

    /// The size of the segment in bytes.  Must be greater than zero.
    pub length: u64,

    /// The access permissions of the segment.
    pub access_perms: MemoryPermissions,
}

impl Segment {
    /// Verify that a segment request is semantically valid for the given instruction alignment.
    pub fn validate(&self, instruction_alignment: u64) -> Result<()> {
        if self.length == 0 {
            return Err(PatchMakerError::Configuration(format!(
                "segment {} has zero length",
                self.identity()
            ))
            .into());
        }
        if self.vm_address.checked_add(self.length - 1).is_none() {
            return Err(PatchMakerError::Configuration(format!(
                "segment {} extends past the end of the address space",
                self.identity()
            ))
            .into());
        }
        if self.is_entry && self.vm_address % instruction_alignment != 0 {
            return Err(PatchMakerError::Configuration(format!(
                "entry segment {} is not aligned to the {}-byte instruction boundary",
                self.identity(),
                instruction_alignment
            ))
            .into());
        }
        Ok(())
    }

    /// Whether the virtual address ranges of two segments intersect.  Compares inclusive last
    /// addresses so a segment ending at the top of the address space never overflows.
    pub fn overlaps(&self, other: &Segment) -> bool {
        if self.length == 0 || other.length == 0 {
            return false;
        }
        let self_last = self.vm_address.saturating_add(self.length - 1);
        let other_last = other.vm_address.saturating_add(other.length - 1);
        self.vm_address <= other_last && other.vm_address <= self_last
    }

    /// A compact name-and-address identity used in diagnostics.
    pub fn identity(&self) -> String {
        format!("{}@{:#x}", self.segment_name, self.vm_address)
    }
}

/// A source file plus the include paths and preprocessor symbols it needs.  Owned by the caller
/// and read-only to the pipeline.
#[derive(Debug, Clone)]
pub struct SourceUnit {
    pub path: PathBuf,
    pub include_paths: Vec<PathBuf>,
    pub defines: Vec<String>,
}

impl SourceUnit {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        SourceUnit {
            path: path.into(),
            include_paths: Vec::new(),
            defines: Vec::new(),
        }
    }

    pub fn with_include_paths(mut self, include_paths: Vec<PathBuf>) -> Self {
        self.include_paths = include_paths;
        self
    }

    pub fn with_defines(mut self, defines: Vec<String>) -> Self {
        self.defines = defines;
        self
    }
}

/// A compiled object produced from one source file.  Immutable once created; owned by its bill of
/// materials.
#[derive(Debug, Clone)]
pub struct CompiledObject {
    /// The source file this object was compiled from.
    pub source: PathBuf,

    /// The object file on disk.
    pub path: PathBuf,

    /// The allocatable section names the object declares, available for placement.
    pub segments: Vec<String>,
}

/// The complete, consistent set of objects compiled by one `make_bom` call, keyed by source path.
#[derive(Debug, Clone)]
pub struct BillOfMaterials {
    pub name: String,
    pub object_map: BTreeMap<PathBuf, CompiledObject>,
}

impl BillOfMaterials {
    /// Whether this bill of materials produced the given object file.
    pub fn contains_object(&self, object_path: &Path) -> bool {
        self.object_map.values().any(|o| o.path == object_path)
    }

    /// Every object file in the bill, in deterministic source order.
    pub fn object_paths(&self) -> Vec<PathBuf> {
        self.object_map.values().map(|o| o.path.clone()).collect()
    }
}

/// The placement intent for one link unit: each compiled object mapped to the ordered segments it
/// must occupy.  Keys are object paths and are only checked against an actual bill of materials
/// when the final executable is built.
#[derive(Debug, Clone)]
pub struct PatchRegionConfig {
    pub name: String,
    pub segment_dict: BTreeMap<PathBuf, Vec<Segment>>,
}

impl PatchRegionConfig {
    pub fn new(name: impl Into<String>, segment_dict: BTreeMap<PathBuf, Vec<Segment>>) -> Self {
        PatchRegionConfig {
            name: name.into(),
            segment_dict,
        }
    }

    /// All requested segments across every object, in deterministic object order.
    pub fn all_segments(&self) -> impl Iterator<Item = &Segment> {
        self.segment_dict.values().flatten()
    }
}

/// The linked, patched executable on disk plus its resolved memory layout.
#[derive(Debug, Clone)]
pub struct LinkedExecutable {
    /// The executable file.
    pub path: PathBuf,

    /// The declared file format of the executable.
    pub format: crate::config::BinFileType,

    /// The resolved segments, in the order the binary format exposes them.  This is the
    /// authoritative layout used for downstream verification.
    pub segments: Vec<Segment>,
}

/// The terminal artifact of a build session: the final executable model.  Read-only after
/// construction.
#[derive(Debug, Clone)]
pub struct FinalExecutableModel {
    pub name: String,
    pub executable: LinkedExecutable,
}
