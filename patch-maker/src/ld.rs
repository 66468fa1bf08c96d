// Licensed under the Apache-2.0 license

//! Linker script synthesis.  Script generation is a pure function from the requested segment
//! layout, the session's base symbols and the build configuration to script text, kept separate
//! from the act of invoking the linker so generated scripts can be checked without spawning
//! external processes.
//!
//! For every requested segment the script defines a MEMORY region pinned at the requested
//! virtual address and sized to the requested length, then assigns the owning object's matching
//! input section into an output section placed in that region.  The LENGTH clause makes the
//! linker itself reject a patch that outgrows the space the caller reserved for it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::config::BuildConfig;
use crate::error::PatchMakerError;
use crate::model::Segment;

const SCRIPT_TEMPLATE: &str = r#"/* Synthesized by patch-maker.  Do not edit. */

$BASE_SYMBOLS
MEMORY
{
$MEMORY_REGIONS}

SECTIONS
{
$OUTPUT_SECTIONS$DISCARD}
"#;

/// The placement layout for one link: each object file paired with the ordered segments it must
/// occupy.
pub type SegmentLayout<'a> = Vec<(&'a Path, &'a [Segment])>;

/// Synthesize the linker script text enforcing the given layout.
///
/// Base symbols become top-level absolute assignments, visible to every link unit, so patch code
/// can reference addresses that already exist in the target binary without redefining them.
pub fn synthesize(
    layout: &SegmentLayout,
    base_symbols: &std::collections::BTreeMap<String, u64>,
    config: &BuildConfig,
) -> Result<String> {
    let mut symbols = String::new();
    for (name, address) in base_symbols {
        symbols.push_str(&format!("{name} = {address:#x};\n"));
    }

    let mut regions = String::new();
    let mut sections = String::new();
    let mut index = 0usize;
    for (object, segments) in layout {
        for segment in segments.iter() {
            let region = region_name(index, segment);
            regions.push_str(&format!(
                "    {region} ({attrs}) : ORIGIN = {vm:#x}, LENGTH = {len:#x}\n",
                attrs = segment.access_perms.attribute_string(),
                vm = segment.vm_address,
                len = segment.length,
            ));
            // Advancing the location counter pads the section out to the full reservation, so
            // the readback length equals the requested length; content larger than the
            // reservation makes the linker refuse to move the counter backwards.
            sections.push_str(&format!(
                "    {name} {vm:#x} :\n    {{\n        \"{object}\"({name})\n        . = {len:#x};\n    }} > {region}\n",
                name = segment.segment_name,
                vm = segment.vm_address,
                object = object.display(),
                len = segment.length,
            ));
            index += 1;
        }
    }

    // Strip linker noise sections; with bss suppressed, also refuse to carry zero-initialized
    // data the patched binary would have no loader to clear.
    let mut discard_entries = vec!["*(.comment)", "*(.note*)"];
    if config.no_bss_section {
        discard_entries.push("*(.bss*)");
        discard_entries.push("*(COMMON)");
    }
    let discard = format!("    /DISCARD/ : {{ {} }}\n", discard_entries.join(" "));

    let mut sub_map = HashMap::new();
    sub_map.insert("BASE_SYMBOLS", symbols);
    sub_map.insert("MEMORY_REGIONS", regions);
    sub_map.insert("OUTPUT_SECTIONS", sections);
    sub_map.insert("DISCARD", discard);

    Ok(subst::substitute(SCRIPT_TEMPLATE, &sub_map)?)
}

/// Verify that no two requested segments intersect in the virtual address space.  Runs before
/// any link invocation when the session enables overlap checking.
pub fn check_overlap<'a>(segments: impl Iterator<Item = &'a Segment>) -> Result<()> {
    let mut sorted: Vec<&Segment> = segments.collect();
    sorted.sort_by_key(|s| s.vm_address);
    for pair in sorted.windows(2) {
        if pair[0].overlaps(pair[1]) {
            return Err(PatchMakerError::Overlap {
                first: pair[0].identity(),
                second: pair[1].identity(),
            }
            .into());
        }
    }
    Ok(())
}

/// A unique MEMORY region name for one segment request.
fn region_name(index: usize, segment: &Segment) -> String {
    let sanitized: String = segment
        .segment_name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!(
        "{}_{}_{:#x}",
        sanitized.trim_matches('_'),
        index,
        segment.vm_address
    )
}

/// Output a synthesized script to the script directory.
///
/// To keep repeated builds stable, a previously written script with the same prefix is reused
/// when its contents match exactly; when they differ the stale file is removed and a fresh
/// uniquely named script is written, so downstream tooling never confuses two layouts.
pub fn write_script(script_dir: &Path, prefix: &str, content: &str) -> Result<PathBuf> {
    std::fs::create_dir_all(script_dir)?;

    // Only a file of exactly the `{prefix}-{uuid}.ld` shape counts as a previous script, so the
    // script for `patch` never shadows `patch2`'s.
    let stem = format!("{prefix}-");
    let previous = std::fs::read_dir(script_dir)?
        .filter_map(|entry| entry.ok())
        .find(|entry| {
            entry
                .file_name()
                .to_str()
                .and_then(|n| n.strip_prefix(&stem))
                .and_then(|rest| rest.strip_suffix(".ld"))
                .map(|id| uuid::Uuid::parse_str(id).is_ok())
                .unwrap_or(false)
        });

    if let Some(previous) = previous {
        let previous = previous.path();
        if std::fs::read_to_string(&previous)
            .map(|existing| existing == content)
            .unwrap_or(false)
        {
            return Ok(previous);
        }
        std::fs::remove_file(previous)?;
    }

    let output = script_dir.join(format!("{}-{}.ld", prefix, uuid::Uuid::new_v4()));
    std::fs::write(&output, content)?;
    Ok(output)
}
