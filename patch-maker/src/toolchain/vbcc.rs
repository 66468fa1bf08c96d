// Licensed under the Apache-2.0 license

//! The vbcc vendor-suite backend (vc/vasm/vlink) for M68K targets.  vlink consumes the same
//! GNU-style linker scripts the pipeline synthesizes, so only the flag vocabulary differs from
//! the GNU backend.
//!
//! Flags the suite has no equivalent for are documented no-ops: `force_inlines` (vc inlines on
//! its own at `-speed`), `no_jump_tables` (vc never emits them for the sizes patch code reaches)
//! and `no_bss_section` (enforced by the synthesized script discarding `.bss` instead).

use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::Result;

use crate::config::{BinFileType, BuildConfig, OptimizationLevel};
use crate::error::PatchMakerError;
use crate::model::SourceUnit;
use crate::target::{ProcessorType, TargetDescriptor};
use crate::toolchain::{run_tool, Toolchain};
use crate::utils::tool_path;

const COMPILER: &str = "vc";
const ASSEMBLER: &str = "vasmm68k_mot";
const LINKER: &str = "vlink";

#[derive(Debug)]
pub struct VbccToolchain {
    target: TargetDescriptor,
    config: BuildConfig,
}

impl VbccToolchain {
    /// Create a vbcc backend.
    ///
    /// This could fail if the configuration requests relocatable output, which the synthesized
    /// absolute-address scripts cannot express through vlink, or an output format other than ELF.
    pub fn new(target: TargetDescriptor, config: BuildConfig) -> Result<Self> {
        if config.output_format != BinFileType::Elf {
            return Err(PatchMakerError::Configuration(format!(
                "vlink is driven in ELF mode, not {}",
                config.output_format
            ))
            .into());
        }
        if config.relocatable {
            return Err(PatchMakerError::Configuration(
                "the vbcc backend only produces absolutely placed output".to_string(),
            )
            .into());
        }
        Ok(VbccToolchain { target, config })
    }

    /// The vc machine selection for the target processor.
    fn cpu_flag(&self) -> Option<String> {
        match self.target.processor {
            // The MCF547x/548x parts are the V4e ColdFire cores.
            Some(ProcessorType::Coldfire4e) => Some("-cpu=5475".to_string()),
            Some(ProcessorType::M68000) => Some("-cpu=68000".to_string()),
            _ => None,
        }
    }

    /// The compiler flags derived from the build configuration.
    pub fn compiler_flags(&self) -> Vec<String> {
        let mut flags = vec!["-c".to_string(), "-c99".to_string()];
        match self.config.optimization_level {
            OptimizationLevel::None => flags.push("-O=0".to_string()),
            OptimizationLevel::Some => flags.push("-O=1".to_string()),
            OptimizationLevel::Space => flags.push("-size".to_string()),
            OptimizationLevel::Full => flags.push("-speed".to_string()),
        }
        if self.config.debug_info {
            flags.push("-g".to_string());
        }
        if self.config.no_std_lib {
            flags.push("-nostdlib".to_string());
        }
        if self.config.hard_float {
            flags.push("-fpu=68881".to_string());
        }
        if let Some(cpu) = self.cpu_flag() {
            flags.push(cpu);
        }
        flags
    }

    /// The assembler flags.  Objects are emitted as ELF so the pipeline can inspect their
    /// section names the same way it does for GNU objects.
    pub fn assembler_flags(&self) -> Vec<String> {
        let mut flags = vec!["-Felf".to_string(), "-quiet".to_string()];
        match self.target.processor {
            Some(ProcessorType::Coldfire4e) => flags.push("-m5475".to_string()),
            Some(ProcessorType::M68000) => flags.push("-m68000".to_string()),
            _ => {}
        }
        flags
    }

    /// The linker flags derived from the build configuration.
    pub fn linker_flags(&self, map_file: Option<&Path>) -> Vec<String> {
        let mut flags = vec!["-belf".to_string()];
        if let Some(map) = map_file {
            flags.push(format!("-M{}", map.display()));
        }
        flags
    }

    fn unit_flags(unit: &SourceUnit) -> Vec<String> {
        let mut flags = Vec::new();
        for include in &unit.include_paths {
            flags.push(format!("-I{}", include.display()));
        }
        for define in &unit.defines {
            flags.push(format!("-D{define}"));
        }
        flags
    }
}

impl Toolchain for VbccToolchain {
    fn name(&self) -> &'static str {
        "vbcc"
    }

    fn file_format(&self) -> BinFileType {
        BinFileType::Elf
    }

    fn compile(&self, unit: &SourceUnit, extra_flags: &[String], object: &Path) -> Result<()> {
        let mut cmd = Command::new(tool_path(COMPILER)?);
        cmd.args(self.compiler_flags())
            .args(Self::unit_flags(unit))
            .args(extra_flags)
            .arg(format!("-o={}", object.display()))
            .arg(&unit.path);
        run_tool(cmd)
    }

    fn assemble(&self, unit: &SourceUnit, extra_flags: &[String], object: &Path) -> Result<()> {
        let mut cmd = Command::new(tool_path(ASSEMBLER)?);
        cmd.args(self.assembler_flags())
            .args(Self::unit_flags(unit))
            .args(extra_flags)
            .arg("-o")
            .arg(object)
            .arg(&unit.path);
        run_tool(cmd)
    }

    fn link(
        &self,
        objects: &[PathBuf],
        linker_script: &Path,
        executable: &Path,
        map_file: Option<&Path>,
    ) -> Result<()> {
        let mut cmd = Command::new(tool_path(LINKER)?);
        cmd.args(self.linker_flags(map_file))
            .arg("-T")
            .arg(linker_script)
            .arg("-o")
            .arg(executable)
            .args(objects);
        run_tool(cmd)
    }
}
