//! `/proc/<pid>/maps` parsing and module discovery

use std::collections::HashMap;
use std::path::PathBuf;

/// One line of a memory-map description.
#[derive(Debug, Clone)]
pub(crate) struct MemoryMapping {
    pub start: u64,
    pub end: u64,
    pub permissions: String,
    pub device: String,
    pub inode: u64,
    pub pathname: Option<PathBuf>,
}

/// One loaded image reassembled from its mappings.
#[derive(Debug, Clone)]
pub(crate) struct ImageRegion {
    pub path: PathBuf,
    pub base: u64,
    pub end: u64,
}

/// Parse a full maps description into its mappings.
pub(crate) fn parse_maps(content: &str) -> Vec<MemoryMapping> {
    content.lines().filter_map(parse_maps_line).collect()
}

/// Parse a single maps line.
///
/// Format: `address perms offset dev inode pathname`, e.g.
/// `7f8b8c000000-7f8b8c028000 r--p 00000000 08:01 2097153 /lib64/ld-linux-x86-64.so.2`
pub(crate) fn parse_maps_line(line: &str) -> Option<MemoryMapping> {
    let mut parts = line.split_whitespace();

    let range = parts.next()?;
    let (start, end) = range.split_once('-')?;
    let start = u64::from_str_radix(start, 16).ok()?;
    let end = u64::from_str_radix(end, 16).ok()?;

    let permissions = parts.next()?.to_string();
    let _offset = u64::from_str_radix(parts.next()?, 16).ok()?;
    let device = parts.next()?.to_string();
    let inode = parts.next()?.parse().ok()?;

    // The pathname is optional and absent for anonymous mappings; special
    // entries like [stack] and [vdso] are not backed by an image file.
    let pathname = parts.next().filter(|path| !path.starts_with('[')).map(PathBuf::from);

    Some(MemoryMapping { start, end, permissions, device, inode, pathname })
}

/// Reassemble per-image regions from raw mappings.
///
/// All file-backed mappings of one image are grouped by device/inode, and the
/// image's base and end are the extremes of the group. Images without an
/// executable mapping are dropped; an address can only have been captured
/// from executable code.
pub(crate) fn build_images(mappings: &[MemoryMapping]) -> Vec<ImageRegion> {
    struct Group {
        region: ImageRegion,
        has_exec: bool,
    }

    let mut groups: HashMap<(String, u64), Group> = HashMap::new();
    for mapping in mappings {
        let Some(path) = &mapping.pathname else { continue };
        let executable = mapping.permissions.contains('x');
        let key = (mapping.device.clone(), mapping.inode);
        groups
            .entry(key)
            .and_modify(|group| {
                group.region.base = group.region.base.min(mapping.start);
                group.region.end = group.region.end.max(mapping.end);
                group.has_exec |= executable;
            })
            .or_insert_with(|| Group {
                region: ImageRegion { path: path.clone(), base: mapping.start, end: mapping.end },
                has_exec: executable,
            });
    }

    let mut images: Vec<_> = groups
        .into_values()
        .filter(|group| group.has_exec)
        .map(|group| group.region)
        .collect();
    images.sort_by_key(|image| image.base);
    tracing::debug!("reassembled {} executable images from {} mappings", images.len(), mappings.len());
    images
}

/// Find the image whose range contains `addr`.
pub(crate) fn find_image(images: &[ImageRegion], addr: u64) -> Option<&ImageRegion> {
    images.iter().find(|image| addr >= image.base && addr < image.end)
}
