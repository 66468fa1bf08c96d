// Licensed under the Apache-2.0 license

//! Building the bill of materials: each patch source compiled independently into an object file,
//! collected into a keyed map.  A single failing source aborts the whole build, so a bill always
//! represents a fully consistent compiled set.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use elf::endian::AnyEndian;
use elf::ElfBytes;

use crate::error::PatchMakerError;
use crate::model::{BillOfMaterials, CompiledObject, SourceUnit};
use crate::toolchain::Toolchain;

/// How a source file is translated into an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    C,
    Assembly,
}

/// Route a source file to a compiler or assembler by its extension.
pub fn route(path: &Path) -> Result<SourceKind> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default();
    match extension {
        "c" => Ok(SourceKind::C),
        "as" | "asm" | "s" | "S" => Ok(SourceKind::Assembly),
        _ => Err(PatchMakerError::UnsupportedSource {
            path: path.to_path_buf(),
            extension: extension.to_string(),
        }
        .into()),
    }
}

/// Compile every source into the build directory and assemble the bill of materials.
///
/// Sources routed by extension come first, then the sources the caller explicitly marked as
/// assembly.  Each source is translated independently; compilation order is not observable in
/// the result since the object map is keyed by source path.
pub fn make_bom(
    toolchain: &dyn Toolchain,
    build_dir: &Path,
    name: &str,
    sources: &[SourceUnit],
    assembly_sources: &[SourceUnit],
    extra_flags: &[String],
) -> Result<BillOfMaterials> {
    let object_dir = build_dir.join(format!("{name}_bom_files"));
    std::fs::create_dir_all(&object_dir)
        .with_context(|| format!("failed to create object directory {}", object_dir.display()))?;

    let mut object_map = BTreeMap::new();
    let mut used_paths = HashSet::new();

    let routed = sources.iter().map(|unit| (unit, None));
    let forced = assembly_sources
        .iter()
        .map(|unit| (unit, Some(SourceKind::Assembly)));

    for (unit, kind) in routed.chain(forced) {
        let kind = match kind {
            Some(kind) => kind,
            None => route(&unit.path)?,
        };
        let object = object_path(&object_dir, &unit.path, &mut used_paths)?;
        match kind {
            SourceKind::C => toolchain
                .compile(unit, extra_flags, &object)
                .with_context(|| format!("failed to compile {}", unit.path.display()))?,
            SourceKind::Assembly => toolchain
                .assemble(unit, extra_flags, &object)
                .with_context(|| format!("failed to assemble {}", unit.path.display()))?,
        }

        let segments = object_sections(&object)?;
        object_map.insert(
            unit.path.clone(),
            CompiledObject {
                source: unit.path.clone(),
                path: object,
                segments,
            },
        );
    }

    Ok(BillOfMaterials {
        name: name.to_string(),
        object_map,
    })
}

/// Pick a distinct object path for a source file.  Two sources sharing a file stem get numbered
/// objects rather than clobbering each other.
fn object_path(
    object_dir: &Path,
    source: &Path,
    used_paths: &mut HashSet<PathBuf>,
) -> Result<PathBuf> {
    let stem = source
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| anyhow!("source {} has no file stem", source.display()))?;

    let mut candidate = object_dir.join(format!("{stem}.o"));
    let mut counter = 1;
    while used_paths.contains(&candidate) {
        candidate = object_dir.join(format!("{stem}_{counter}.o"));
        counter += 1;
    }
    used_paths.insert(candidate.clone());
    Ok(candidate)
}

/// List the allocatable section names a compiled object declares, available for placement.
pub fn object_sections(object: &Path) -> Result<Vec<String>> {
    let data = std::fs::read(object)
        .with_context(|| format!("failed to read object {}", object.display()))?;
    let elf_file = ElfBytes::<AnyEndian>::minimal_parse(&data)
        .with_context(|| format!("object {} is not a valid ELF", object.display()))?;

    let (headers, strings) = elf_file.section_headers_with_strtab()?;
    let (headers, strings) = headers
        .zip(strings)
        .ok_or_else(|| anyhow!("object {} has no section table", object.display()))?;

    let mut sections = Vec::new();
    for header in headers.iter() {
        if header.sh_flags & u64::from(elf::abi::SHF_ALLOC) == 0 {
            continue;
        }
        sections.push(strings.get(header.sh_name as usize)?.to_string());
    }
    Ok(sections)
}
