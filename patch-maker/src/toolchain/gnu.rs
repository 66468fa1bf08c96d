// Licensed under the Apache-2.0 license

//! The GNU cross-suite backend (gcc/ld).  One implementation covers every GNU-supported target;
//! the binary prefix and machine flags are derived from the target descriptor, everything else
//! from the session's build configuration.

use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::Result;

use crate::config::{BinFileType, BuildConfig, OptimizationLevel};
use crate::error::PatchMakerError;
use crate::model::SourceUnit;
use crate::target::{Endianness, InstructionSet, ProcessorType, SubArchitecture, TargetDescriptor};
use crate::toolchain::{run_tool, Toolchain};
use crate::utils::tool_path;

const GCC_VERSION_SUFFIX: &str = "10";

#[derive(Debug)]
pub struct GnuToolchain {
    target: TargetDescriptor,
    config: BuildConfig,
}

impl GnuToolchain {
    /// Create a GNU backend for the given target.
    ///
    /// This could fail if the configuration asks for an output format the GNU linker does not
    /// emit.  Target support has already been checked during selection.
    pub fn new(target: TargetDescriptor, config: BuildConfig) -> Result<Self> {
        if config.output_format != BinFileType::Elf {
            return Err(PatchMakerError::Configuration(format!(
                "GNU ld emits ELF executables, not {}",
                config.output_format
            ))
            .into());
        }
        Ok(GnuToolchain { target, config })
    }

    /// The binary prefix of the cross suite, e.g. `m68k-linux-gnu`.
    fn prefix(&self) -> &'static str {
        match self.target.instruction_set {
            InstructionSet::M68k => "m68k-linux-gnu",
            InstructionSet::Arm => "arm-none-eabi",
            InstructionSet::X86 => "x86_64-linux-gnu",
        }
    }

    fn compiler(&self) -> String {
        format!("{}-gcc-{}", self.prefix(), GCC_VERSION_SUFFIX)
    }

    fn linker(&self) -> String {
        format!("{}-ld", self.prefix())
    }

    /// The machine-selection flags derived from the target descriptor.
    pub fn machine_flags(&self) -> Vec<String> {
        let mut flags = Vec::new();
        match self.target.processor {
            Some(ProcessorType::Coldfire4e) => flags.push("-mcpu=54455".to_string()),
            Some(ProcessorType::M68000) => flags.push("-m68000".to_string()),
            Some(ProcessorType::CortexA7) => flags.push("-mcpu=cortex-a7".to_string()),
            Some(ProcessorType::CortexM4) => flags.push("-mcpu=cortex-m4".to_string()),
            None => {}
        }
        if self.target.sub_architecture == Some(SubArchitecture::Thumb) {
            flags.push("-mthumb".to_string());
        }
        if self.target.instruction_set == InstructionSet::Arm
            && self.target.endianness == Endianness::Big
        {
            flags.push("-mbig-endian".to_string());
        }
        // Floating point ABI selection is machine specific; x86 has no soft-float switch worth
        // setting here.
        match self.target.instruction_set {
            InstructionSet::M68k => flags.push(
                if self.config.hard_float {
                    "-mhard-float"
                } else {
                    "-msoft-float"
                }
                .to_string(),
            ),
            InstructionSet::Arm => flags.push(
                if self.config.hard_float {
                    "-mfloat-abi=hard"
                } else {
                    "-mfloat-abi=soft"
                }
                .to_string(),
            ),
            InstructionSet::X86 => {}
        }
        flags
    }

    /// The compiler flags derived from the build configuration.  Pure so the mapping can be
    /// checked without spawning the compiler.
    pub fn compiler_flags(&self) -> Vec<String> {
        let mut flags = vec!["-c".to_string()];
        flags.push(
            match self.config.optimization_level {
                OptimizationLevel::None => "-O0",
                OptimizationLevel::Some => "-O1",
                OptimizationLevel::Space => "-Os",
                OptimizationLevel::Full => "-O3",
            }
            .to_string(),
        );
        if self.config.debug_info {
            flags.push("-g".to_string());
        }
        if self.config.force_inlines {
            flags.push("-finline-functions".to_string());
        }
        flags.push(
            if self.config.relocatable {
                "-fpic"
            } else {
                "-fno-pic"
            }
            .to_string(),
        );
        if self.config.no_std_lib {
            flags.push("-nostdlib".to_string());
            flags.push("-ffreestanding".to_string());
        }
        if self.config.no_jump_tables {
            flags.push("-fno-jump-tables".to_string());
        }
        if self.config.no_bss_section {
            flags.push("-fno-zero-initialized-in-bss".to_string());
        }
        flags.extend(self.machine_flags());
        flags
    }

    /// The linker flags derived from the build configuration.
    pub fn linker_flags(&self, map_file: Option<&Path>) -> Vec<String> {
        let mut flags = Vec::new();
        if self.config.relocatable {
            flags.push("-r".to_string());
        }
        if !self.config.check_overlap {
            // The pre-link overlap check is off, so tell ld not to second-guess the requested
            // placement either.
            flags.push("--no-check-sections".to_string());
        }
        if let Some(map) = map_file {
            flags.push(format!("-Map={}", map.display()));
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

    fn translate(
        &self,
        unit: &SourceUnit,
        language_flags: &[&str],
        extra_flags: &[String],
        object: &Path,
    ) -> Result<()> {
        let mut cmd = Command::new(tool_path(&self.compiler())?);
        cmd.args(self.compiler_flags())
            .args(language_flags.iter().map(|f| f.to_string()))
            .args(Self::unit_flags(unit))
            .args(extra_flags)
            .arg("-o")
            .arg(object)
            .arg(&unit.path);
        run_tool(cmd)
    }
}

impl Toolchain for GnuToolchain {
    fn name(&self) -> &'static str {
        "gnu"
    }

    fn file_format(&self) -> BinFileType {
        BinFileType::Elf
    }

    fn compile(&self, unit: &SourceUnit, extra_flags: &[String], object: &Path) -> Result<()> {
        self.translate(unit, &[], extra_flags, object)
    }

    fn assemble(&self, unit: &SourceUnit, extra_flags: &[String], object: &Path) -> Result<()> {
        // Drive the assembler through gcc so assembly sources get the preprocessor and the same
        // machine flags as C sources.
        self.translate(unit, &["-x", "assembler-with-cpp"], extra_flags, object)
    }

    fn link(
        &self,
        objects: &[PathBuf],
        linker_script: &Path,
        executable: &Path,
        map_file: Option<&Path>,
    ) -> Result<()> {
        let mut cmd = Command::new(tool_path(&self.linker())?);
        cmd.args(self.linker_flags(map_file))
            .arg("-T")
            .arg(linker_script)
            .arg("-o")
            .arg(executable)
            .args(objects);
        run_tool(cmd)
    }
}
