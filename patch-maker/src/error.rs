// Licensed under the Apache-2.0 license

//! The error taxonomy for the patch pipeline.  Orchestration code returns `anyhow::Result`, with
//! these typed values carried inside so callers can downcast and branch on the failure class.
//! Every variant carries enough context to locate the offending request without re-running a
//! build with verbose flags.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PatchMakerError {
    /// The requested toolchain cannot target the given hardware at all.
    #[error("toolchain {toolchain} does not support target {target}")]
    UnsupportedToolchain { toolchain: String, target: String },

    /// The target/config/backend combination is illegal.  Detected when the session is
    /// constructed, never at link time.
    #[error("invalid build configuration: {0}")]
    Configuration(String),

    /// A source file could not be routed to a compiler or assembler.
    #[error("source {path} has unsupported extension {extension:?}")]
    UnsupportedSource { path: PathBuf, extension: String },

    /// An external compile/assemble/link process exited non-zero.  The diagnostic text is the
    /// tool's own output, verbatim.
    #[error("{tool} failed (exit status {status:?}):\n{diagnostics}")]
    ToolchainInvocation {
        tool: String,
        status: Option<i32>,
        diagnostics: String,
    },

    /// Two requested segments collide in the virtual address space.
    #[error("segment {first} overlaps segment {second}")]
    Overlap { first: String, second: String },

    /// The linker could not resolve a symbol referenced by the patch.
    #[error("undefined symbol {symbol} while linking {executable}")]
    UnresolvedSymbol { symbol: String, executable: PathBuf },

    /// The linker rejected the layout or the produced executable violated a placement request.
    #[error("link of {executable} failed: {reason}")]
    Link { executable: PathBuf, reason: String },

    /// A region config names an object the supplied bill of materials never produced.
    #[error("region {region} references object {object} absent from bill of materials {bom}")]
    MissingObject {
        region: String,
        object: PathBuf,
        bom: String,
    },
}
