//! Error types for the capture and symbolization library

use std::path::PathBuf;

/// Error types for the library.
///
/// Almost every failure in this library is, by contract, a silent partial
/// result (a shorter trace, a placeholder frame) rather than an error value.
/// The variants below cover the few operations that can genuinely fail:
/// resolver construction and debug-info session loading.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("DWARF parsing error: {0}")]
    Dwarf(#[from] gimli::Error),
    #[error("object file error: {0}")]
    Object(#[from] object::Error),
    #[cfg(windows)]
    #[error("PDB parsing error: {0}")]
    Pdb(#[from] pdb_addr2line::pdb::Error),
    #[error("module not found: {path}")]
    ModuleNotFound { path: PathBuf },
    #[error("process not found: {pid}")]
    ProcessNotFound { pid: u32 },
    #[error("memory map description is malformed")]
    MalformedMaps,
}

/// Result type used throughout the library.
pub type Result<T> = std::result::Result<T, Error>;
