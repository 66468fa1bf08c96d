// Licensed under the Apache-2.0 license

//! Building the final executable model: synthesize the linker script for the requested layout,
//! run the backend linker over the union of objects, then read the produced binary's section
//! table back as the authoritative placement report.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use elf::endian::AnyEndian;
use elf::ElfBytes;

use crate::config::BuildConfig;
use crate::error::PatchMakerError;
use crate::ld;
use crate::model::{
    BillOfMaterials, FinalExecutableModel, LinkedExecutable, MemoryPermissions, PatchRegionConfig,
    Segment,
};
use crate::target::TargetDescriptor;
use crate::toolchain::Toolchain;
use crate::utils::detect_file_format;

/// Link the given (bill of materials, region config) pairs into the executable and report its
/// resolved layout.
///
/// All pairs link in one invocation and share a single global symbol namespace, together with the
/// session's base symbols.  This could fail if a region references an object its bill never
/// produced, if requested segments collide, if the linker rejects the layout or cannot resolve a
/// symbol, or if the produced binary does not honor every placement request.
pub fn make_fem(
    toolchain: &dyn Toolchain,
    target: &TargetDescriptor,
    config: &BuildConfig,
    build_dir: &Path,
    base_symbols: &BTreeMap<String, u64>,
    pairs: &[(&BillOfMaterials, &PatchRegionConfig)],
    executable_path: &Path,
) -> Result<FinalExecutableModel> {
    let name = pairs
        .iter()
        .map(|(_, region)| region.name.as_str())
        .collect::<Vec<_>>()
        .join("+");

    // Every object a region places must come from its paired bill of materials; a dangling
    // reference is a contract violation, not a segment to skip silently.
    for (bom, region) in pairs {
        for object in region.segment_dict.keys() {
            if !bom.contains_object(object) {
                return Err(PatchMakerError::MissingObject {
                    region: region.name.clone(),
                    object: object.clone(),
                    bom: bom.name.clone(),
                }
                .into());
            }
        }
        for segment in region.all_segments() {
            segment.validate(target.instruction_alignment())?;
        }
    }

    if config.check_overlap {
        ld::check_overlap(pairs.iter().flat_map(|(_, region)| region.all_segments()))?;
    }

    let layout: ld::SegmentLayout = pairs
        .iter()
        .flat_map(|(_, region)| {
            region
                .segment_dict
                .iter()
                .map(|(object, segments)| (object.as_path(), segments.as_slice()))
        })
        .collect();
    let script_text = ld::synthesize(&layout, base_symbols, config)?;
    let script = ld::write_script(&build_dir.join("ld_scripts"), &name, &script_text)?;

    // The full object set of every bill participates in the link, not only the objects with
    // placement requests, so cross-object references within a bill resolve.
    let objects: Vec<PathBuf> = pairs
        .iter()
        .flat_map(|(bom, _)| bom.object_paths())
        .collect();

    let map_file = config
        .create_map_files
        .then(|| map_file_path(build_dir, executable_path));

    if let Err(error) = toolchain.link(&objects, &script, executable_path, map_file.as_deref()) {
        return Err(classify_link_failure(error, executable_path));
    }

    let format = detect_file_format(executable_path)?;
    if format != config.output_format {
        return Err(PatchMakerError::Link {
            executable: executable_path.to_path_buf(),
            reason: format!(
                "produced {format} output where the configuration declares {}",
                config.output_format
            ),
        }
        .into());
    }

    let segments = read_layout(executable_path)?;
    verify_layout(
        pairs.iter().flat_map(|(_, region)| region.all_segments()),
        &segments,
        executable_path,
    )?;

    Ok(FinalExecutableModel {
        name,
        executable: LinkedExecutable {
            path: executable_path.to_path_buf(),
            format,
            segments,
        },
    })
}

/// The link map path for an executable.  Map files stay inside the session's build directory
/// even when the executable itself is written elsewhere.
fn map_file_path(build_dir: &Path, executable: &Path) -> PathBuf {
    let mut name = executable
        .file_stem()
        .unwrap_or_else(|| std::ffi::OsStr::new("patch"))
        .to_os_string();
    name.push(".map");
    build_dir.join(name)
}

/// Reclassify a raw linker invocation failure, surfacing undefined symbols as their own error.
fn classify_link_failure(error: anyhow::Error, executable: &Path) -> anyhow::Error {
    if let Some(PatchMakerError::ToolchainInvocation { diagnostics, .. }) =
        error.downcast_ref::<PatchMakerError>()
    {
        if let Some(symbol) = undefined_symbol(diagnostics) {
            return PatchMakerError::UnresolvedSymbol {
                symbol,
                executable: executable.to_path_buf(),
            }
            .into();
        }
    }
    error
}

/// Extract the first undefined symbol named in linker diagnostics, if any.
fn undefined_symbol(diagnostics: &str) -> Option<String> {
    // GNU ld: undefined reference to `symbol'
    if let Some(index) = diagnostics.find("undefined reference to `") {
        let rest = &diagnostics[index + "undefined reference to `".len()..];
        return rest.split('\'').next().map(str::to_string);
    }
    // vlink: undefined symbol <symbol>
    if let Some(index) = diagnostics.find("undefined symbol <") {
        let rest = &diagnostics[index + "undefined symbol <".len()..];
        return rest.split('>').next().map(str::to_string);
    }
    None
}

/// Read the resolved segment list out of a linked ELF, in the order the section table exposes
/// them.
pub fn read_layout(executable: &Path) -> Result<Vec<Segment>> {
    let data = std::fs::read(executable)
        .with_context(|| format!("failed to read executable {}", executable.display()))?;
    let elf_file = ElfBytes::<AnyEndian>::minimal_parse(&data)
        .with_context(|| format!("executable {} is not a valid ELF", executable.display()))?;
    let entry = elf_file.ehdr.e_entry;

    let (headers, strings) = elf_file.section_headers_with_strtab()?;
    let (headers, strings) = headers
        .zip(strings)
        .ok_or_else(|| anyhow!("executable {} has no section table", executable.display()))?;

    let mut segments = Vec::new();
    for header in headers.iter() {
        if header.sh_flags & u64::from(elf::abi::SHF_ALLOC) == 0 {
            continue;
        }
        if header.sh_type != elf::abi::SHT_PROGBITS && header.sh_type != elf::abi::SHT_NOBITS {
            continue;
        }

        let mut perms = MemoryPermissions::R;
        if header.sh_flags & u64::from(elf::abi::SHF_WRITE) != 0 {
            perms = perms.union(MemoryPermissions::W);
        }
        if header.sh_flags & u64::from(elf::abi::SHF_EXECINSTR) != 0 {
            perms = perms.union(MemoryPermissions::X);
        }

        segments.push(Segment {
            segment_name: strings.get(header.sh_name as usize)?.to_string(),
            vm_address: header.sh_addr,
            offset: header.sh_offset,
            is_entry: entry != 0
                && entry >= header.sh_addr
                && entry < header.sh_addr + header.sh_size,
            length: header.sh_size,
            access_perms: perms,
        });
    }
    Ok(segments)
}

/// Verify that every requested segment resolved to exactly one segment with the same name and
/// virtual address, at least as long as requested.  Padding may grow a segment, never shrink it.
pub fn verify_layout<'a>(
    requested: impl Iterator<Item = &'a Segment>,
    resolved: &[Segment],
    executable: &Path,
) -> Result<()> {
    for request in requested {
        let matches: Vec<&Segment> = resolved
            .iter()
            .filter(|s| {
                s.segment_name == request.segment_name && s.vm_address == request.vm_address
            })
            .collect();
        let placement_error = |reason: String| PatchMakerError::Link {
            executable: executable.to_path_buf(),
            reason,
        };
        match matches.as_slice() {
            [] => {
                return Err(placement_error(format!(
                    "requested segment {} is missing from the output",
                    request.identity()
                ))
                .into())
            }
            [resolved] => {
                if resolved.length < request.length {
                    return Err(placement_error(format!(
                        "segment {} resolved to {:#x} bytes, shorter than the requested {:#x}",
                        request.identity(),
                        resolved.length,
                        request.length
                    ))
                    .into());
                }
            }
            many => {
                return Err(placement_error(format!(
                    "requested segment {} resolved {} times",
                    request.identity(),
                    many.len()
                ))
                .into())
            }
        }
    }
    Ok(())
}
