// Licensed under the Apache-2.0 license

//! The abstraction over concrete cross-toolchain suites.  The compile and link pipeline depends
//! only on the [`Toolchain`] trait; each variant of [`ToolchainVersion`] owns a fixed mapping from
//! the session's [`BuildConfig`](crate::config::BuildConfig) onto its own command-line vocabulary.
//! New suites are added by implementing the trait, never by branching inside the pipeline.

pub mod gnu;
pub mod vbcc;

use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::config::{BinFileType, BuildConfig};
use crate::error::PatchMakerError;
use crate::model::SourceUnit;
use crate::target::{BitWidth, InstructionSet, TargetDescriptor};

/// The capability set every concrete toolchain suite provides.
pub trait Toolchain: std::fmt::Debug {
    /// A short human-readable name for diagnostics.
    fn name(&self) -> &'static str;

    /// The file format this suite's linker emits.
    fn file_format(&self) -> BinFileType;

    /// Compile one source unit into the given object file.
    fn compile(&self, unit: &SourceUnit, extra_flags: &[String], object: &Path) -> Result<()>;

    /// Assemble one source unit into the given object file.
    fn assemble(&self, unit: &SourceUnit, extra_flags: &[String], object: &Path) -> Result<()>;

    /// Link the given objects under the given linker script into an executable.  A map file is
    /// emitted alongside when requested by the session configuration.
    fn link(
        &self,
        objects: &[PathBuf],
        linker_script: &Path,
        executable: &Path,
        map_file: Option<&Path>,
    ) -> Result<()>;
}

/// A concrete toolchain/version pair a session may select.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ToolchainVersion {
    GnuM68kLinux10,
    GnuArmNoneEabi10,
    GnuX8664Linux10,
    VbccM68k0_9,
}

impl std::fmt::Display for ToolchainVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ToolchainVersion::GnuM68kLinux10 => write!(f, "GNU m68k-linux 10"),
            ToolchainVersion::GnuArmNoneEabi10 => write!(f, "GNU arm-none-eabi 10"),
            ToolchainVersion::GnuX8664Linux10 => write!(f, "GNU x86_64-linux 10"),
            ToolchainVersion::VbccM68k0_9 => write!(f, "vbcc m68k 0.9"),
        }
    }
}

impl ToolchainVersion {
    /// Whether this suite can target the given hardware at all.
    pub fn supports(&self, target: &TargetDescriptor) -> bool {
        use crate::target::Endianness;
        match self {
            ToolchainVersion::GnuM68kLinux10 | ToolchainVersion::VbccM68k0_9 => {
                target.instruction_set == InstructionSet::M68k
                    && target.bit_width == BitWidth::Bit32
                    && target.endianness == Endianness::Big
            }
            ToolchainVersion::GnuArmNoneEabi10 => {
                target.instruction_set == InstructionSet::Arm
                    && target.bit_width == BitWidth::Bit32
            }
            ToolchainVersion::GnuX8664Linux10 => {
                target.instruction_set == InstructionSet::X86
                    && target.bit_width == BitWidth::Bit64
                    && target.endianness == Endianness::Little
            }
        }
    }
}

/// Instantiate the backend for the requested toolchain version.
///
/// This could fail if the suite cannot target the given hardware, or if the build configuration
/// asks the suite for something it cannot honor.  Both are reported here, when the session is
/// constructed, rather than surfacing later as a confusing link failure.
pub fn select(
    version: ToolchainVersion,
    target: &TargetDescriptor,
    config: &BuildConfig,
) -> Result<Box<dyn Toolchain>> {
    if !version.supports(target) {
        return Err(PatchMakerError::UnsupportedToolchain {
            toolchain: version.to_string(),
            target: target.to_string(),
        }
        .into());
    }

    match version {
        ToolchainVersion::GnuM68kLinux10
        | ToolchainVersion::GnuArmNoneEabi10
        | ToolchainVersion::GnuX8664Linux10 => {
            Ok(Box::new(gnu::GnuToolchain::new(*target, *config)?))
        }
        ToolchainVersion::VbccM68k0_9 => Ok(Box::new(vbcc::VbccToolchain::new(*target, *config)?)),
    }
}

/// Run an external toolchain process to completion, surfacing its diagnostics verbatim on a
/// non-zero exit.
pub(crate) fn run_tool(mut cmd: Command) -> Result<()> {
    println!("Executing: {cmd:?}");
    let tool = cmd.get_program().to_string_lossy().into_owned();
    let output = cmd
        .output()
        .with_context(|| format!("failed to spawn {tool}"))?;
    if !output.status.success() {
        let mut diagnostics = String::from_utf8_lossy(&output.stderr).into_owned();
        if diagnostics.trim().is_empty() {
            diagnostics = String::from_utf8_lossy(&output.stdout).into_owned();
        }
        return Err(PatchMakerError::ToolchainInvocation {
            tool,
            status: output.status.code(),
            diagnostics,
        }
        .into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OptimizationLevel;
    use crate::target::{Endianness, ProcessorType};

    fn m68k_target() -> TargetDescriptor {
        TargetDescriptor {
            instruction_set: InstructionSet::M68k,
            processor: Some(ProcessorType::Coldfire4e),
            bit_width: BitWidth::Bit32,
            endianness: Endianness::Big,
            sub_architecture: None,
        }
    }

    fn elf_config() -> BuildConfig {
        BuildConfig {
            output_format: BinFileType::Elf,
            force_inlines: true,
            relocatable: false,
            no_std_lib: true,
            no_jump_tables: true,
            no_bss_section: true,
            create_map_files: true,
            optimization_level: OptimizationLevel::None,
            debug_info: true,
            check_overlap: false,
            hard_float: true,
        }
    }

    #[test]
    fn support_matrix() {
        let m68k = m68k_target();
        assert!(ToolchainVersion::GnuM68kLinux10.supports(&m68k));
        assert!(ToolchainVersion::VbccM68k0_9.supports(&m68k));
        assert!(!ToolchainVersion::GnuArmNoneEabi10.supports(&m68k));
        assert!(!ToolchainVersion::GnuX8664Linux10.supports(&m68k));
    }

    #[test]
    fn select_rejects_mismatched_target() {
        let result = select(ToolchainVersion::GnuArmNoneEabi10, &m68k_target(), &elf_config());
        let err = result.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PatchMakerError>(),
            Some(PatchMakerError::UnsupportedToolchain { .. })
        ));
    }

    #[test]
    fn select_builds_backends_for_supported_targets() {
        let gnu = select(ToolchainVersion::GnuM68kLinux10, &m68k_target(), &elf_config()).unwrap();
        assert_eq!(gnu.file_format(), BinFileType::Elf);
        let vbcc = select(ToolchainVersion::VbccM68k0_9, &m68k_target(), &elf_config()).unwrap();
        assert_eq!(vbcc.file_format(), BinFileType::Elf);
    }

    #[test]
    fn version_identifiers_deserialize() {
        let version: ToolchainVersion = toml::from_str::<toml::Value>("v = \"gnu_m68k_linux10\"")
            .unwrap()
            .get("v")
            .cloned()
            .unwrap()
            .try_into()
            .unwrap();
        assert_eq!(version, ToolchainVersion::GnuM68kLinux10);
    }
}
