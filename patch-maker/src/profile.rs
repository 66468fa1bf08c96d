// Licensed under the Apache-2.0 license

//! A TOML build profile bundling the target description, toolchain selection, build flags and
//! base symbols for a session, so harnesses can keep whole configurations as checked-in files.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Result;
use serde::Deserialize;

use crate::config::BuildConfig;
use crate::error::PatchMakerError;
use crate::target::TargetDescriptor;
use crate::toolchain::ToolchainVersion;

/// The full configuration for one build session.
#[derive(Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct BuildProfile {
    /// A description of the hardware the patch targets.
    pub target: TargetDescriptor,

    /// The toolchain suite to drive.
    pub toolchain: ToolchainVersion,

    /// The compiler/assembler/linker policy.
    pub build: BuildConfig,

    /// Addresses already fixed in the binary being patched, by symbol name.
    #[serde(default)]
    pub base_symbols: BTreeMap<String, u64>,
}

impl BuildProfile {
    /// Load and semantically check a profile from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let profile: BuildProfile = toml::from_str(&contents)?;
        profile.validate()?;
        Ok(profile)
    }

    /// Verify that a profile matches the semantic patterns exceeding the syntax requirements of
    /// parsing.
    pub fn validate(&self) -> Result<()> {
        if !self.toolchain.supports(&self.target) {
            return Err(PatchMakerError::UnsupportedToolchain {
                toolchain: self.toolchain.to_string(),
                target: self.target.to_string(),
            }
            .into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COLDFIRE_PROFILE: &str = r#"
        toolchain = "gnu_m68k_linux10"

        [target]
        instruction_set = "m68k"
        processor = "coldfire4e"
        bit_width = "bit32"
        endianness = "big"

        [build]
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

        [base_symbols]
        bye_world = 0x80000468
    "#;

    #[test]
    fn parses_complete_profile() {
        let profile: BuildProfile = toml::from_str(COLDFIRE_PROFILE).unwrap();
        profile.validate().unwrap();
        assert_eq!(profile.toolchain, ToolchainVersion::GnuM68kLinux10);
        assert_eq!(profile.base_symbols["bye_world"], 0x80000468);
    }

    #[test]
    fn validate_rejects_toolchain_target_mismatch() {
        let text = COLDFIRE_PROFILE.replace("gnu_m68k_linux10", "gnu_x8664_linux10");
        let profile: BuildProfile = toml::from_str(&text).unwrap();
        let err = profile.validate().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PatchMakerError>(),
            Some(PatchMakerError::UnsupportedToolchain { .. })
        ));
    }

    #[test]
    fn base_symbols_default_to_empty() {
        let text = COLDFIRE_PROFILE
            .replace("[base_symbols]", "")
            .replace("bye_world = 0x80000468", "");
        let profile: BuildProfile = toml::from_str(&text).unwrap();
        assert!(profile.base_symbols.is_empty());
    }
}
