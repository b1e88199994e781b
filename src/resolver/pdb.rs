//! PDB resolver backend (Windows)
//!
//! Sessions are `pdb-addr2line` contexts over the module's PDB file, found
//! through the binary's codeview debug directory. Frames arrive inside to
//! outside with the containing function last, and names come out of the PDB
//! already demangled.
//!
//! PDB sessions are thread-confined (the underlying parser caches through
//! non-`Sync` cells), so the resolver holds its session-cache lock across
//! every query into this backend and the auto traits additionally confine a
//! resolver holding these sessions to one thread.

use std::fs::File;
use std::path::{Path, PathBuf};

use object::Object;
use pdb_addr2line::pdb::PDB;
use pdb_addr2line::ContextPdbData;

use crate::core::{Error, LogicalFrame, PhysicalAddress, Result};
use crate::resolver::SinkState;

pub(crate) struct PdbBackend {
    /// Link-time image base; module-relative addresses minus this are RVAs.
    image_base: u64,
    data: ContextPdbData<'static>,
}

impl PdbBackend {
    pub(crate) fn new(binary_path: &Path, object: &object::File<'static>) -> Result<Self> {
        let image_base = object.relative_address_base();
        let pdb_path = pdb_path_for(binary_path, object);
        let file =
            File::open(&pdb_path).map_err(|_| Error::ModuleNotFound { path: pdb_path.clone() })?;
        let mut pdb = PDB::open(file)?;
        let data = ContextPdbData::try_from_pdb(&mut pdb)?;
        tracing::debug!("loaded PDB {} for {}", pdb_path.display(), binary_path.display());
        Ok(Self { image_base, data })
    }

    pub(crate) fn resolve<S: FnMut(LogicalFrame) -> bool>(
        &self,
        module_addr: u64,
        physical: PhysicalAddress,
        state: &mut SinkState<S>,
    ) {
        let Ok(context) = self.data.make_context() else { return };
        let Ok(rva) = u32::try_from(module_addr.wrapping_sub(self.image_base)) else { return };
        let Ok(Some(function_frames)) = context.find_frames(rva) else { return };

        let count = function_frames.frames.len();
        for (index, frame) in function_frames.frames.into_iter().enumerate() {
            let logical = LogicalFrame::new(
                physical,
                index + 1 < count,
                frame.function.map(String::into_bytes).unwrap_or_default(),
                frame.file.map(|file| file.into_owned().into_bytes()).unwrap_or_default(),
                frame.line.unwrap_or(0),
                0,
                false,
            );
            if state.submit(logical) {
                return;
            }
        }
    }
}

/// The PDB named by the binary's debug directory, or the conventional
/// sibling `.pdb` when the recorded path does not exist here.
fn pdb_path_for(binary_path: &Path, object: &object::File<'static>) -> PathBuf {
    if let Ok(Some(info)) = object.pdb_info() {
        let recorded = PathBuf::from(String::from_utf8_lossy(info.path()).into_owned());
        if recorded.exists() {
            return recorded;
        }
    }
    binary_path.with_extension("pdb")
}
