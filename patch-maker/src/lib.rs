// Licensed under the Apache-2.0 license

//! A pipeline for compiling small, targeted source patches and linking them into exact memory
//! locations of a pre-existing binary.
//!
//! The pipeline has two stages, both driven by a [`PatchMaker`] session:
//!     1. `make_bom` - compile a set of patch sources, each independently, into a bill of
//!        materials of object files.
//!     2. `make_fem` - link a subset of those objects, under explicit segment-to-address
//!        assignments, into a final executable and report its resolved memory layout.
//!
//! The session synthesizes the linker script that enforces every requested segment address, so
//! the placement of patch code and data in the output is verifiable byte for byte.  Addresses
//! already fixed in the binary being patched are supplied as base symbols and injected into
//! every link as absolute definitions.
//!
//! Concrete cross-toolchain suites hide behind the [`toolchain::Toolchain`] trait; the pipeline
//! itself never branches on toolchain identity.  Sessions own their build directory exclusively;
//! concurrent sessions must use distinct build directories.

pub mod bom;
pub mod config;
pub mod error;
pub mod fem;
pub mod ld;
pub mod model;
pub mod profile;
pub mod target;
pub mod toolchain;
pub mod utils;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

pub use crate::config::{BinFileType, BuildConfig, OptimizationLevel};
pub use crate::error::PatchMakerError;
pub use crate::model::{
    BillOfMaterials, FinalExecutableModel, MemoryPermissions, PatchRegionConfig, Segment,
    SourceUnit,
};
pub use crate::profile::BuildProfile;
pub use crate::target::TargetDescriptor;
pub use crate::toolchain::ToolchainVersion;

/// One patch build session: an immutable target/configuration pair, a selected toolchain
/// backend, a private build directory and the fixed addresses patch code may reference.
#[derive(Debug)]
pub struct PatchMaker {
    target: TargetDescriptor,
    config: BuildConfig,
    toolchain: Box<dyn toolchain::Toolchain>,
    build_dir: PathBuf,
    base_symbols: BTreeMap<String, u64>,
}

impl PatchMaker {
    /// Create a build session.
    ///
    /// This could fail if the requested toolchain cannot target the given hardware, if the build
    /// configuration asks the backend for something it cannot honor, or if the build directory
    /// cannot be created.  All configuration problems surface here, never at link time.
    pub fn new(
        target: TargetDescriptor,
        config: BuildConfig,
        toolchain_version: ToolchainVersion,
        build_dir: impl Into<PathBuf>,
        base_symbols: BTreeMap<String, u64>,
    ) -> Result<Self> {
        let toolchain = toolchain::select(toolchain_version, &target, &config)?;
        let build_dir = build_dir.into();
        std::fs::create_dir_all(&build_dir)
            .with_context(|| format!("failed to create build directory {}", build_dir.display()))?;
        Ok(PatchMaker {
            target,
            config,
            toolchain,
            build_dir,
            base_symbols,
        })
    }

    /// Create a build session from a checked-in build profile.
    pub fn from_profile(profile: &BuildProfile, build_dir: impl Into<PathBuf>) -> Result<Self> {
        profile.validate()?;
        PatchMaker::new(
            profile.target,
            profile.build,
            profile.toolchain,
            build_dir,
            profile.base_symbols.clone(),
        )
    }

    pub fn target(&self) -> &TargetDescriptor {
        &self.target
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    /// Compile the given sources into a bill of materials.
    ///
    /// `sources` are routed to the compiler or assembler by extension; `assembly_sources` go to
    /// the assembler regardless.  `extra_flags` are appended verbatim to every translation.  Any
    /// single failing source aborts the whole call; no partial bill is ever returned.
    pub fn make_bom(
        &self,
        name: &str,
        sources: &[SourceUnit],
        assembly_sources: &[SourceUnit],
        extra_flags: &[String],
    ) -> Result<BillOfMaterials> {
        bom::make_bom(
            self.toolchain.as_ref(),
            &self.build_dir,
            name,
            sources,
            assembly_sources,
            extra_flags,
        )
    }

    /// Link the given (bill of materials, region config) pairs into the executable at
    /// `executable_path` and return the final executable model with its resolved layout.
    pub fn make_fem(
        &self,
        pairs: &[(&BillOfMaterials, &PatchRegionConfig)],
        executable_path: &Path,
    ) -> Result<FinalExecutableModel> {
        fem::make_fem(
            self.toolchain.as_ref(),
            &self.target,
            &self.config,
            &self.build_dir,
            &self.base_symbols,
            pairs,
            executable_path,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::{BitWidth, Endianness, InstructionSet, ProcessorType};
    use tempfile::TempDir;

    fn coldfire_target() -> TargetDescriptor {
        TargetDescriptor {
            instruction_set: InstructionSet::M68k,
            processor: Some(ProcessorType::Coldfire4e),
            bit_width: BitWidth::Bit32,
            endianness: Endianness::Big,
            sub_architecture: None,
        }
    }

    fn patch_config() -> BuildConfig {
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
    fn session_construction_creates_build_dir() {
        let dir = TempDir::new().unwrap();
        let build_dir = dir.path().join("session");
        let mut base_symbols = BTreeMap::new();
        base_symbols.insert("bye_world".to_string(), 0x80000468u64);

        let session = PatchMaker::new(
            coldfire_target(),
            patch_config(),
            ToolchainVersion::GnuM68kLinux10,
            &build_dir,
            base_symbols,
        )
        .unwrap();
        assert!(build_dir.exists());
        assert_eq!(session.target().instruction_set, InstructionSet::M68k);
    }

    #[test]
    fn session_debug_names_the_selected_backend() {
        let dir = TempDir::new().unwrap();
        let session = PatchMaker::new(
            coldfire_target(),
            patch_config(),
            ToolchainVersion::GnuM68kLinux10,
            dir.path(),
            BTreeMap::new(),
        )
        .unwrap();
        let rendered = format!("{session:?}");
        assert!(rendered.contains("PatchMaker"));
        assert!(rendered.contains("GnuToolchain"));
    }

    #[test]
    fn session_rejects_toolchain_target_mismatch() {
        let dir = TempDir::new().unwrap();
        let err = PatchMaker::new(
            coldfire_target(),
            patch_config(),
            ToolchainVersion::GnuX8664Linux10,
            dir.path(),
            BTreeMap::new(),
        )
        .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PatchMakerError>(),
            Some(PatchMakerError::UnsupportedToolchain { .. })
        ));
    }

    #[test]
    fn session_rejects_illegal_configuration_up_front() {
        let dir = TempDir::new().unwrap();
        let config = BuildConfig {
            relocatable: true,
            ..patch_config()
        };
        let err = PatchMaker::new(
            coldfire_target(),
            config,
            ToolchainVersion::VbccM68k0_9,
            dir.path(),
            BTreeMap::new(),
        )
        .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PatchMakerError>(),
            Some(PatchMakerError::Configuration(_))
        ));
    }

    #[test]
    fn make_fem_rejects_dangling_object_reference() {
        let dir = TempDir::new().unwrap();
        let session = PatchMaker::new(
            coldfire_target(),
            patch_config(),
            ToolchainVersion::GnuM68kLinux10,
            dir.path(),
            BTreeMap::new(),
        )
        .unwrap();

        let bom = BillOfMaterials {
            name: "patch".to_string(),
            object_map: BTreeMap::new(),
        };
        let mut segment_dict = BTreeMap::new();
        segment_dict.insert(
            PathBuf::from("/build/patch_bom_files/patch.o"),
            vec![Segment {
                segment_name: ".text".to_string(),
                vm_address: 0x80000456,
                offset: 0,
                is_entry: false,
                length: 2,
                access_perms: MemoryPermissions::RX,
            }],
        );
        let region = PatchRegionConfig::new("patch_patch", segment_dict);

        let err = session
            .make_fem(&[(&bom, &region)], &dir.path().join("patch_exec"))
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PatchMakerError>(),
            Some(PatchMakerError::MissingObject { .. })
        ));
    }

    #[test]
    fn make_fem_overlap_precheck_fires_before_linking() {
        let dir = TempDir::new().unwrap();
        let config = BuildConfig {
            check_overlap: true,
            ..patch_config()
        };
        let session = PatchMaker::new(
            coldfire_target(),
            config,
            ToolchainVersion::GnuM68kLinux10,
            dir.path(),
            BTreeMap::new(),
        )
        .unwrap();

        // A bill whose object exists only as a map entry; the overlap check must fire without
        // ever spawning the linker.
        let object = PathBuf::from("/build/patch_bom_files/patch.o");
        let mut object_map = BTreeMap::new();
        object_map.insert(
            PathBuf::from("patch.as"),
            model::CompiledObject {
                source: PathBuf::from("patch.as"),
                path: object.clone(),
                segments: vec![".text".to_string()],
            },
        );
        let bom = BillOfMaterials {
            name: "patch".to_string(),
            object_map,
        };

        let colliding = vec![
            Segment {
                segment_name: ".text".to_string(),
                vm_address: 0x80000456,
                offset: 0,
                is_entry: false,
                length: 0x10,
                access_perms: MemoryPermissions::RX,
            },
            Segment {
                segment_name: ".data".to_string(),
                vm_address: 0x80000458,
                offset: 0,
                is_entry: false,
                length: 0x10,
                access_perms: MemoryPermissions::RW,
            },
        ];
        let mut segment_dict = BTreeMap::new();
        segment_dict.insert(object, colliding);
        let region = PatchRegionConfig::new("patch_patch", segment_dict);

        let err = session
            .make_fem(&[(&bom, &region)], &dir.path().join("patch_exec"))
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PatchMakerError>(),
            Some(PatchMakerError::Overlap { .. })
        ));
    }
}
