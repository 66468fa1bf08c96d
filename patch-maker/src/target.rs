// Licensed under the Apache-2.0 license

//! A description of the hardware target a patch is compiled for.  These are plain immutable value
//! structs; every toolchain backend derives its invocation arguments purely from them.

use serde::{Deserialize, Serialize};

/// The instruction set of the target processor.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InstructionSet {
    M68k,
    Arm,
    X86,
}

impl std::fmt::Display for InstructionSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InstructionSet::M68k => write!(f, "m68k"),
            InstructionSet::Arm => write!(f, "arm"),
            InstructionSet::X86 => write!(f, "x86"),
        }
    }
}

/// A specific processor within an instruction set family.  Backends map this onto their own
/// `-mcpu`-style machine selection flags.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProcessorType {
    M68000,
    Coldfire4e,
    CortexA7,
    CortexM4,
}

/// An optional refinement of the instruction set, e.g. the Thumb encoding on ARM.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SubArchitecture {
    Thumb,
}

/// The register/address width of the target.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BitWidth {
    Bit32,
    Bit64,
}

impl BitWidth {
    pub fn bits(&self) -> u32 {
        match self {
            BitWidth::Bit32 => 32,
            BitWidth::Bit64 => 64,
        }
    }
}

/// The byte order of the target.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Endianness {
    Big,
    Little,
}

/// A full description of the hardware target.  Created once per build session and shared
/// read-only by every downstream component; it fully determines which toolchain backends are
/// legal for the session.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct TargetDescriptor {
    /// The instruction set of the target processor.
    pub instruction_set: InstructionSet,

    /// The specific processor, if code generation should be tuned for one.
    pub processor: Option<ProcessorType>,

    /// The register/address width of the target.
    pub bit_width: BitWidth,

    /// The byte order of the target.
    pub endianness: Endianness,

    /// An optional instruction-set refinement, e.g. Thumb on ARM.
    pub sub_architecture: Option<SubArchitecture>,
}

impl TargetDescriptor {
    /// The minimum alignment of an instruction address on this target.  Entry-point segments must
    /// land on this boundary.
    pub fn instruction_alignment(&self) -> u64 {
        match (self.instruction_set, self.sub_architecture) {
            (InstructionSet::M68k, _) => 2,
            (InstructionSet::Arm, Some(SubArchitecture::Thumb)) => 2,
            (InstructionSet::Arm, None) => 4,
            (InstructionSet::X86, _) => 1,
        }
    }
}

impl std::fmt::Display for TargetDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let endian = match self.endianness {
            Endianness::Big => "be",
            Endianness::Little => "le",
        };
        write!(
            f,
            "{}-{}-{}",
            self.instruction_set,
            self.bit_width.bits(),
            endian
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn m68k_coldfire() -> TargetDescriptor {
        TargetDescriptor {
            instruction_set: InstructionSet::M68k,
            processor: Some(ProcessorType::Coldfire4e),
            bit_width: BitWidth::Bit32,
            endianness: Endianness::Big,
            sub_architecture: None,
        }
    }

    #[test]
    fn instruction_alignment_per_isa() {
        assert_eq!(m68k_coldfire().instruction_alignment(), 2);

        let thumb = TargetDescriptor {
            instruction_set: InstructionSet::Arm,
            processor: Some(ProcessorType::CortexM4),
            bit_width: BitWidth::Bit32,
            endianness: Endianness::Little,
            sub_architecture: Some(SubArchitecture::Thumb),
        };
        assert_eq!(thumb.instruction_alignment(), 2);

        let arm = TargetDescriptor {
            sub_architecture: None,
            ..thumb
        };
        assert_eq!(arm.instruction_alignment(), 4);
    }

    #[test]
    fn display_is_compact() {
        assert_eq!(m68k_coldfire().to_string(), "m68k-32-be");
    }

    #[test]
    fn deserialize_from_toml() {
        let target: TargetDescriptor = toml::from_str(
            r#"
            instruction_set = "m68k"
            processor = "coldfire4e"
            bit_width = "bit32"
            endianness = "big"
            "#,
        )
        .unwrap();
        assert_eq!(target, m68k_coldfire());
    }
}
