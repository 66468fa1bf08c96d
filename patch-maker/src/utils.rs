// Licensed under the Apache-2.0 license

//! A collection of simple utilities for use by the patch pipeline.

use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Result};

use crate::config::BinFileType;

/// The environment variable naming a directory tree to search for toolchain binaries.  When it is
/// unset, tools are resolved through `PATH` at spawn time.
pub const TOOLCHAIN_ROOT_ENV: &str = "PATCH_MAKER_TOOLCHAIN_ROOT";

/// Identify the file format of a binary by its magic bytes.
pub fn detect_file_format(path: &Path) -> Result<BinFileType> {
    let mut magic = [0u8; 4];
    let mut file = std::fs::File::open(path)?;
    file.read_exact(&mut magic)
        .map_err(|_| anyhow!("{} is too short to identify", path.display()))?;

    match magic {
        [0x7f, b'E', b'L', b'F'] => Ok(BinFileType::Elf),
        // 32 and 64 bit Mach-O magic, either byte order, plus fat binaries.
        [0xfe, 0xed, 0xfa, _]
        | [_, 0xfa, 0xed, 0xfe]
        | [0xca, 0xfe, 0xba, 0xbe]
        | [0xbe, 0xba, 0xfe, 0xca] => Ok(BinFileType::MachO),
        [b'M', b'Z', _, _] => Ok(BinFileType::Pe),
        _ => bail!(
            "{} has unrecognized file format (magic {:02x?})",
            path.display(),
            magic
        ),
    }
}

/// Iterate through the given directory to find the specified file.
pub fn find_file(dir: &Path, name: &str) -> Option<PathBuf> {
    for entry in walkdir::WalkDir::new(dir).into_iter().filter_map(|e| e.ok()) {
        if entry.file_name() == name {
            return Some(entry.path().to_path_buf());
        }
    }
    None
}

/// Resolve a toolchain binary by name.  If a toolchain root directory is configured the tree is
/// searched for the binary; otherwise the bare name is returned and resolved through `PATH` when
/// the process is spawned.
pub fn tool_path(tool: &str) -> Result<PathBuf> {
    match std::env::var(TOOLCHAIN_ROOT_ENV) {
        Ok(root) => find_file(Path::new(&root), tool)
            .ok_or_else(|| anyhow!("{tool} not found under {root} ({TOOLCHAIN_ROOT_ENV})")),
        Err(_) => Ok(PathBuf::from(tool)),
    }
}
