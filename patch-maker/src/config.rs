// Licensed under the Apache-2.0 license

//! The build policy switches shared by every compile, assemble and link step of a session.  One
//! immutable instance exists per session; each backend owns a fixed mapping from these flags onto
//! its own command-line vocabulary.

use serde::{Deserialize, Serialize};

/// The on-disk format of a linked executable or compiled object.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BinFileType {
    Elf,
    MachO,
    Pe,
}

impl std::fmt::Display for BinFileType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BinFileType::Elf => write!(f, "ELF"),
            BinFileType::MachO => write!(f, "Mach-O"),
            BinFileType::Pe => write!(f, "PE"),
        }
    }
}

/// How aggressively the compiler should optimize.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationLevel {
    /// No optimization at all.  Patch bytes follow the source as directly as possible.
    None,
    /// Light optimization that keeps code placement predictable.
    Some,
    /// Optimize for size.
    Space,
    /// Full optimization.
    Full,
}

/// The compiler/assembler/linker policy for one build session.
///
/// Every field maps deterministically onto backend invocation arguments.  A backend which cannot
/// honor a flag either documents it as a no-op or rejects the configuration when the session is
/// constructed, never at link time.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct BuildConfig {
    /// The file format the final executable must be emitted in.
    pub output_format: BinFileType,

    /// Inline every function marked inline, regardless of optimization level.
    pub force_inlines: bool,

    /// Produce relocatable output instead of output pinned at absolute addresses.
    pub relocatable: bool,

    /// Do not compile or link against the toolchain's standard library.  Patch code runs inside a
    /// foreign binary and cannot assume a C runtime.
    pub no_std_lib: bool,

    /// Forbid jump tables, which would embed absolute addresses the patch cannot honor.
    pub no_jump_tables: bool,

    /// Keep zero-initialized data out of `.bss`.  A patched binary has no loader to clear it.
    pub no_bss_section: bool,

    /// Emit a linker map file next to the executable.
    pub create_map_files: bool,

    /// How aggressively the compiler should optimize.
    pub optimization_level: OptimizationLevel,

    /// Emit debug info into the compiled objects.
    pub debug_info: bool,

    /// Reject segment placements whose virtual address ranges collide before invoking the linker.
    pub check_overlap: bool,

    /// Generate hardware floating point instructions rather than soft-float calls.
    pub hard_float: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserialize_from_toml() {
        let config: BuildConfig = toml::from_str(
            r#"
            output_format = "elf"
            force_inlines = true
            relocatable = false
            no_std_lib = true
            no_jump_tables = true
            no_bss_section = true
            create_map_files = true
            optimization_level = "none"
            debug_info = true
            check_overlap = false
            hard_float = true
            "#,
        )
        .unwrap();
        assert_eq!(config.output_format, BinFileType::Elf);
        assert_eq!(config.optimization_level, OptimizationLevel::None);
        assert!(config.no_bss_section);
        assert!(!config.check_overlap);
    }

    #[test]
    fn unknown_field_is_rejected() {
        let result: Result<BuildConfig, _> = toml::from_str(
            r#"
            output_format = "elf"
            force_inlines = false
            relocatable = false
            no_std_lib = false
            no_jump_tables = false
            no_bss_section = false
            create_map_files = false
            optimization_level = "full"
            debug_info = false
            check_overlap = true
            hard_float = false
            strip_symbols = true
            "#,
        );
        assert!(result.is_err());
    }
}
