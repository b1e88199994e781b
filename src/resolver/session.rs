//! Per-module debug-info sessions

use std::fs::File;

use gimli::RunTimeEndian;
use object::Object;

use crate::core::{Error, PhysicalAddress, Result};
use crate::maps::ModuleInfo;
use crate::resolver::SinkState;

/// The reader every backend parses debug sections through. The slices borrow
/// the session's file mapping; the session keeps that mapping alive.
pub(crate) type Reader = gimli::EndianSlice<'static, RunTimeEndian>;

cfg_if::cfg_if! {
    if #[cfg(windows)] {
        use crate::resolver::pdb::PdbBackend as Backend;
    } else if #[cfg(feature = "generic-backend")] {
        use crate::resolver::generic::GenericBackend as Backend;
    } else {
        use crate::resolver::dwarf::DwarfBackend as Backend;
    }
}

/// Loaded and parsed debug info for one module.
///
/// Immutable after construction, so concurrent queries need no coordination
/// beyond what the backend itself requires. Sessions are cached by the
/// resolver for its whole lifetime and never purged.
pub(crate) struct ModuleSession {
    /// Runtime load base minus link-time image base; subtracting it maps a
    /// captured address back into the module's own address space.
    slide: u64,
    backend: Backend,
    /// Decompressed debug sections the backend readers borrow from.
    _decompressed: Vec<Vec<u8>>,
    /// The raw file mapping everything above borrows from. Declared last so
    /// it outlives the borrowers during drop.
    _mmap: memmap2::Mmap,
}

impl ModuleSession {
    pub(crate) fn create(info: &ModuleInfo) -> Result<Self> {
        let file = File::open(&info.file_name)
            .map_err(|_| Error::ModuleNotFound { path: info.file_name.clone() })?;
        let mmap = unsafe { memmap2::MmapOptions::new().map(&file)? };
        // SAFETY: the mapping lives as long as this session, and every view
        // derived from it is owned by the session as well.
        let data: &'static [u8] = unsafe { std::mem::transmute(&mmap[..]) };

        let object = object::File::parse(data)?;
        let endian =
            if object.is_little_endian() { RunTimeEndian::Little } else { RunTimeEndian::Big };
        let image_base = object.relative_address_base();
        let slide = (info.base_offset as u64).wrapping_sub(image_base);

        let (dwarf, decompressed) = load_dwarf(&object, endian)?;
        cfg_if::cfg_if! {
            if #[cfg(windows)] {
                let _ = dwarf;
                let backend = Backend::new(&info.file_name, &object)?;
            } else if #[cfg(feature = "generic-backend")] {
                let backend = Backend::new(dwarf)?;
            } else {
                let backend = Backend::new(dwarf, &object)?;
            }
        }

        tracing::debug!(
            "loaded debug info for {} (base {:#x}, slide {:#x})",
            info.file_name.display(),
            info.base_offset,
            slide,
        );
        Ok(Self { slide, backend, _decompressed: decompressed, _mmap: mmap })
    }

    pub(crate) fn resolve<S: FnMut(crate::core::LogicalFrame) -> bool>(
        &self,
        physical: PhysicalAddress,
        state: &mut SinkState<S>,
    ) {
        let module_addr = (physical.handle() as u64).wrapping_sub(self.slide);
        self.backend.resolve(module_addr, physical, state);
    }
}

/// Load the DWARF sections of `object` for gimli.
///
/// Most sections borrow the mapped file directly; compressed ones are
/// inflated into buffers returned alongside the readers so the caller can
/// keep them alive.
fn load_dwarf(
    object: &object::File<'static>,
    endian: RunTimeEndian,
) -> std::result::Result<(gimli::Dwarf<Reader>, Vec<Vec<u8>>), gimli::Error> {
    use object::ObjectSection;
    use std::borrow::Cow;
    use std::cell::RefCell;

    let owned: RefCell<Vec<Vec<u8>>> = RefCell::new(Vec::new());
    let load_section = |id: gimli::SectionId| -> std::result::Result<Reader, gimli::Error> {
        let data = object
            .section_by_name(id.name())
            .and_then(|section| section.uncompressed_data().ok())
            .unwrap_or(Cow::Borrowed(&[][..]));
        let slice: &'static [u8] = match data {
            // SAFETY: borrows the 'static view of the mapping.
            Cow::Borrowed(slice) => slice,
            Cow::Owned(buffer) => {
                let mut owned = owned.borrow_mut();
                owned.push(buffer);
                // SAFETY: the buffer's heap allocation is stable and is kept
                // alive by the session via the returned vector.
                unsafe { std::mem::transmute::<&[u8], &'static [u8]>(&owned[owned.len() - 1][..]) }
            }
        };
        Ok(gimli::EndianSlice::new(slice, endian))
    };

    let dwarf = gimli::Dwarf::load(load_section)?;
    Ok((dwarf, owned.into_inner()))
}
