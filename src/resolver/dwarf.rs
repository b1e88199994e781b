//! DWARF resolver backend
//!
//! Walks the DIE tree of the compilation unit covering an address to recover
//! the chain of function activations at that address: the physical function
//! plus every callee the optimizer inlined into it. Source positions come
//! from the line program for the innermost activation and from the inlined
//! DIEs' call-site attributes for the outer ones. When DWARF has nothing,
//! the ELF symbol table supplies a bare function name.

use std::collections::{BTreeMap, HashMap};

use gimli::{AttributeValue, UnitHeader, UnitOffset};
use object::{Object, ObjectSymbol};

use crate::core::{LogicalFrame, PhysicalAddress, Result};
use crate::resolver::session::Reader;
use crate::resolver::SinkState;

/// Referent chains (`DW_AT_specification` / `DW_AT_abstract_origin`) are
/// short in practice; the bound only guards against cyclic debug info.
const MAX_REFERENT_DEPTH: u32 = 16;

pub(crate) struct DwarfBackend {
    dwarf: gimli::Dwarf<Reader>,
    units: Vec<UnitEntry>,
    lines: LineIndex,
    symbols: SymbolIndex,
}

struct UnitEntry {
    header: UnitHeader<Reader>,
    /// Address ranges of the unit's root DIE; empty when it carries none.
    ranges: Vec<(u64, u64)>,
}

/// One function DIE covering the query address, with everything needed to
/// emit its logical frame.
#[derive(Clone)]
struct FunctionDie {
    is_inline: bool,
    name: Option<Vec<u8>>,
    maybe_mangled: bool,
    /// Where this inlined activation was called from, locating the frame one
    /// step further out.
    call_location: Option<(String, u32, u32)>,
}

impl DwarfBackend {
    pub(crate) fn new(dwarf: gimli::Dwarf<Reader>, object: &object::File<'static>) -> Result<Self> {
        let mut units = Vec::new();
        let mut line_rows = BTreeMap::new();

        let mut headers = dwarf.units();
        while let Some(header) = headers.next()? {
            let unit = dwarf.unit(header.clone())?;

            let mut ranges = Vec::new();
            let mut range_iter = dwarf.unit_ranges(&unit)?;
            while let Some(range) = range_iter.next()? {
                if range.begin < range.end {
                    ranges.push((range.begin, range.end));
                }
            }

            collect_line_rows(&dwarf, &unit, &mut line_rows)?;
            units.push(UnitEntry { header, ranges });
        }

        tracing::debug!(
            "indexed {} compilation units and {} line rows",
            units.len(),
            line_rows.len(),
        );
        Ok(Self {
            dwarf,
            units,
            lines: LineIndex { rows: line_rows },
            symbols: SymbolIndex::from_object(object),
        })
    }

    pub(crate) fn resolve<S: FnMut(LogicalFrame) -> bool>(
        &self,
        module_addr: u64,
        physical: PhysicalAddress,
        state: &mut SinkState<S>,
    ) {
        match self.resolve_dwarf(module_addr, physical, state) {
            Ok(true) => return,
            // Bad debug info for one address must not leak past it; fall
            // back to the symbol table like an address with no DWARF at all.
            Ok(false) | Err(_) => {}
        }
        if let Some(symbol) = self.symbols.lookup(module_addr) {
            state.submit(LogicalFrame::new(
                physical,
                false,
                symbol.name.clone(),
                Vec::new(),
                0,
                0,
                true,
            ));
        }
    }

    /// Returns whether any frame was delivered.
    fn resolve_dwarf<S: FnMut(LogicalFrame) -> bool>(
        &self,
        addr: u64,
        physical: PhysicalAddress,
        state: &mut SinkState<S>,
    ) -> std::result::Result<bool, gimli::Error> {
        let chain = self.find_function_chain(addr)?;
        if chain.is_empty() {
            return Ok(false);
        }

        // The innermost activation is located by the line table; every outer
        // one by the call site of the activation inside it.
        let mut location = self
            .lines
            .lookup(addr)
            .map(|row| (row.file.clone(), row.line, row.column));

        let mut delivered = false;
        for function in chain.iter().rev() {
            let (file, line, column) = location.take().unwrap_or_default();
            let frame = LogicalFrame::new(
                physical,
                function.is_inline,
                function.name.clone().unwrap_or_default(),
                file.into_bytes(),
                line,
                column,
                function.maybe_mangled,
            );
            delivered = true;
            if state.submit(frame) {
                return Ok(true);
            }
            if !function.is_inline {
                break;
            }
            location = function.call_location.clone();
        }
        Ok(delivered)
    }

    /// The chain of function DIEs covering `addr`, outermost first.
    fn find_function_chain(&self, addr: u64) -> std::result::Result<Vec<FunctionDie>, gimli::Error> {
        // Prefer units whose root DIE claims the address; scan the rangeless
        // ones only if that turns up nothing.
        for unit_entry in &self.units {
            if unit_entry.ranges.iter().any(|&(begin, end)| addr >= begin && addr < end) {
                let unit = self.dwarf.unit(unit_entry.header.clone())?;
                let chain = self.function_chain_in_unit(&unit, addr)?;
                if !chain.is_empty() {
                    return Ok(chain);
                }
            }
        }
        for unit_entry in &self.units {
            if unit_entry.ranges.is_empty() {
                let unit = self.dwarf.unit(unit_entry.header.clone())?;
                let chain = self.function_chain_in_unit(&unit, addr)?;
                if !chain.is_empty() {
                    return Ok(chain);
                }
            }
        }
        Ok(Vec::new())
    }

    fn function_chain_in_unit(
        &self,
        unit: &gimli::Unit<Reader>,
        addr: u64,
    ) -> std::result::Result<Vec<FunctionDie>, gimli::Error> {
        let mut cursor = unit.entries();
        let mut depth = 0isize;
        // Function DIEs covering `addr` on the path to the cursor position.
        let mut path: Vec<(isize, FunctionDie)> = Vec::new();
        let mut innermost_chain: Vec<FunctionDie> = Vec::new();

        while let Some((delta, entry)) = cursor.next_dfs()? {
            depth += delta;
            while path.last().is_some_and(|(entry_depth, _)| *entry_depth >= depth) {
                path.pop();
            }
            if !is_function_tag(entry.tag()) || !self.die_covers(unit, entry, addr)? {
                continue;
            }
            path.push((depth, self.collect_function(unit, entry)?));
            // Covering functions nest, so the deepest snapshot wins.
            innermost_chain = path.iter().map(|(_, function)| function.clone()).collect();
        }
        Ok(innermost_chain)
    }

    fn die_covers(
        &self,
        unit: &gimli::Unit<Reader>,
        entry: &gimli::DebuggingInformationEntry<Reader>,
        addr: u64,
    ) -> std::result::Result<bool, gimli::Error> {
        let mut low_pc = None;
        let mut high_pc = None;
        let mut high_pc_offset = None;
        let mut ranges_value = None;

        let mut attrs = entry.attrs();
        while let Some(attr) = attrs.next()? {
            match attr.name() {
                gimli::DW_AT_low_pc => match attr.value() {
                    AttributeValue::Addr(value) => low_pc = Some(value),
                    AttributeValue::DebugAddrIndex(index) => {
                        low_pc = self.dwarf.address(unit, index).ok();
                    }
                    _ => {}
                },
                gimli::DW_AT_high_pc => match attr.value() {
                    AttributeValue::Addr(value) => high_pc = Some(value),
                    AttributeValue::DebugAddrIndex(index) => {
                        high_pc = self.dwarf.address(unit, index).ok();
                    }
                    other => high_pc_offset = other.udata_value(),
                },
                gimli::DW_AT_ranges => ranges_value = Some(attr.value()),
                _ => {}
            }
        }

        if let Some(low) = low_pc {
            let end = high_pc.or_else(|| high_pc_offset.map(|offset| low + offset));
            if let Some(end) = end {
                return Ok(addr >= low && addr < end);
            }
        }
        if let Some(value) = ranges_value {
            if let Some(offset) = self.dwarf.attr_ranges_offset(unit, value)? {
                let mut ranges = self.dwarf.ranges(unit, offset)?;
                while let Some(range) = ranges.next()? {
                    if addr >= range.begin && addr < range.end {
                        return Ok(true);
                    }
                }
            }
        }
        Ok(false)
    }

    fn collect_function(
        &self,
        unit: &gimli::Unit<Reader>,
        entry: &gimli::DebuggingInformationEntry<Reader>,
    ) -> std::result::Result<FunctionDie, gimli::Error> {
        let (name, maybe_mangled) = match self.function_name(unit, entry, 0)? {
            Some((name, maybe_mangled)) => (Some(name), maybe_mangled),
            None => (None, false),
        };

        let mut call_file = None;
        let mut call_line = 0u32;
        let mut call_column = 0u32;
        let mut attrs = entry.attrs();
        while let Some(attr) = attrs.next()? {
            match attr.name() {
                gimli::DW_AT_call_file => match attr.value() {
                    AttributeValue::FileIndex(index) => call_file = Some(index),
                    other => call_file = other.udata_value().or(call_file),
                },
                gimli::DW_AT_call_line => call_line = clamp_u32(attr.udata_value()),
                gimli::DW_AT_call_column => call_column = clamp_u32(attr.udata_value()),
                _ => {}
            }
        }
        let call_location = call_file.map(|index| {
            let file = unit
                .line_program
                .as_ref()
                .map(|program| render_file_path(&self.dwarf, unit, program.header(), index))
                .unwrap_or_default();
            (file, call_line, call_column)
        });

        Ok(FunctionDie {
            is_inline: entry.tag() == gimli::DW_TAG_inlined_subroutine,
            name,
            maybe_mangled,
            call_location,
        })
    }

    /// Resolve a function DIE's name.
    ///
    /// Tried in order: the linkage-name attributes (flagged possibly
    /// mangled), then the `DW_AT_specification` referent, then the
    /// `DW_AT_abstract_origin` referent (each searched the same way,
    /// including their plain names), finally the DIE's own `DW_AT_name`.
    fn function_name(
        &self,
        unit: &gimli::Unit<Reader>,
        entry: &gimli::DebuggingInformationEntry<Reader>,
        depth: u32,
    ) -> std::result::Result<Option<(Vec<u8>, bool)>, gimli::Error> {
        if depth > MAX_REFERENT_DEPTH {
            return Ok(None);
        }

        for attr_name in [gimli::DW_AT_linkage_name, gimli::DW_AT_MIPS_linkage_name] {
            if let Some(value) = entry.attr_value(attr_name)? {
                if let Ok(name) = self.dwarf.attr_string(unit, value) {
                    return Ok(Some((name.slice().to_vec(), true)));
                }
            }
        }

        for referent_attr in [gimli::DW_AT_specification, gimli::DW_AT_abstract_origin] {
            if let Some(value) = entry.attr_value(referent_attr)? {
                if let Some(offset) = resolve_unit_ref(unit, value) {
                    let referent = unit.entry(offset)?;
                    if let Some(found) = self.function_name(unit, &referent, depth + 1)? {
                        return Ok(Some(found));
                    }
                }
            }
        }

        if let Some(value) = entry.attr_value(gimli::DW_AT_name)? {
            if let Ok(name) = self.dwarf.attr_string(unit, value) {
                return Ok(Some((name.slice().to_vec(), false)));
            }
        }
        Ok(None)
    }
}

fn is_function_tag(tag: gimli::DwTag) -> bool {
    tag == gimli::DW_TAG_subprogram
        || tag == gimli::DW_TAG_inlined_subroutine
        || tag == gimli::DW_TAG_entry_point
}

fn resolve_unit_ref(unit: &gimli::Unit<Reader>, value: AttributeValue<Reader>) -> Option<UnitOffset> {
    match value {
        AttributeValue::UnitRef(offset) => Some(offset),
        // Cross-unit references are resolvable only when they land back in
        // this unit; anything else loses the name, not the frame.
        AttributeValue::DebugInfoRef(offset) => offset.to_unit_offset(&unit.header),
        _ => None,
    }
}

fn clamp_u32(value: Option<u64>) -> u32 {
    value.unwrap_or(0).min(u64::from(u32::MAX)) as u32
}

/// Render a line-program file entry into a full path.
fn render_file_path(
    dwarf: &gimli::Dwarf<Reader>,
    unit: &gimli::Unit<Reader>,
    header: &gimli::LineProgramHeader<Reader>,
    index: u64,
) -> String {
    let Some(file) = header.file(index) else { return String::new() };

    let name = attr_to_string(dwarf, unit, file.path_name());
    if name.starts_with('/') {
        return name;
    }
    let directory = file
        .directory(header)
        .map(|value| attr_to_string(dwarf, unit, value))
        .unwrap_or_default();
    if directory.starts_with('/') {
        return join_path(&directory, &name);
    }
    let comp_dir = unit
        .comp_dir
        .map(|dir| crate::core::encoding::sanitize_utf8(dir.slice()))
        .unwrap_or_default();
    join_path(&join_path(&comp_dir, &directory), &name)
}

fn attr_to_string(
    dwarf: &gimli::Dwarf<Reader>,
    unit: &gimli::Unit<Reader>,
    value: AttributeValue<Reader>,
) -> String {
    dwarf
        .attr_string(unit, value)
        .map(|raw| crate::core::encoding::sanitize_utf8(raw.slice()))
        .unwrap_or_default()
}

fn join_path(base: &str, tail: &str) -> String {
    if base.is_empty() {
        return tail.to_string();
    }
    if tail.is_empty() {
        return base.to_string();
    }
    format!("{}/{}", base.trim_end_matches('/'), tail)
}

struct LineRow {
    file: String,
    line: u32,
    column: u32,
    end_sequence: bool,
}

struct LineIndex {
    rows: BTreeMap<u64, LineRow>,
}

impl LineIndex {
    /// The row covering `addr`: the last row at or before it that is not a
    /// sequence terminator.
    fn lookup(&self, addr: u64) -> Option<&LineRow> {
        let (_, row) = self.rows.range(..=addr).next_back()?;
        (!row.end_sequence).then_some(row)
    }
}

fn collect_line_rows(
    dwarf: &gimli::Dwarf<Reader>,
    unit: &gimli::Unit<Reader>,
    rows: &mut BTreeMap<u64, LineRow>,
) -> std::result::Result<(), gimli::Error> {
    let Some(program) = unit.line_program.clone() else { return Ok(()) };
    let (program, sequences) = program.sequences()?;
    let header = program.header();

    let mut files: HashMap<u64, String> = HashMap::new();
    for sequence in sequences {
        let mut sequence_rows = program.resume_from(&sequence);
        while let Some((_, row)) = sequence_rows.next_row()? {
            if row.end_sequence() {
                rows.insert(
                    row.address(),
                    LineRow { file: String::new(), line: 0, column: 0, end_sequence: true },
                );
                continue;
            }
            let file = files
                .entry(row.file_index())
                .or_insert_with(|| render_file_path(dwarf, unit, header, row.file_index()))
                .clone();
            let column = match row.column() {
                gimli::ColumnType::LeftEdge => 0,
                gimli::ColumnType::Column(column) => clamp_u32(Some(column.get())),
            };
            rows.insert(
                row.address(),
                LineRow {
                    file,
                    line: clamp_u32(row.line().map(std::num::NonZeroU64::get)),
                    column,
                    end_sequence: false,
                },
            );
        }
    }
    Ok(())
}

struct SymbolEntry {
    address: u64,
    size: u64,
    name: Vec<u8>,
}

/// Address-sorted index over the module's function symbols, used when DWARF
/// has no entry for an address.
struct SymbolIndex {
    entries: Vec<SymbolEntry>,
}

impl SymbolIndex {
    fn from_object(object: &object::File<'static>) -> Self {
        let mut entries: Vec<SymbolEntry> = object
            .symbols()
            .chain(object.dynamic_symbols())
            .filter(|symbol| symbol.kind() == object::SymbolKind::Text)
            .filter_map(|symbol| {
                let name = symbol.name_bytes().ok()?;
                if name.is_empty() {
                    return None;
                }
                Some(SymbolEntry {
                    address: symbol.address(),
                    size: symbol.size(),
                    name: name.to_vec(),
                })
            })
            .collect();
        entries.sort_by_key(|entry| entry.address);
        entries.dedup_by_key(|entry| entry.address);
        Self { entries }
    }

    fn lookup(&self, addr: u64) -> Option<&SymbolEntry> {
        let index = self.entries.partition_point(|entry| entry.address <= addr);
        let entry = self.entries.get(index.checked_sub(1)?)?;
        if entry.size > 0 {
            return (addr < entry.address + entry.size).then_some(entry);
        }
        // Zero-sized symbols claim everything up to their successor.
        match self.entries.get(index) {
            Some(next) => (addr < next.address).then_some(entry),
            None => Some(entry),
        }
    }
}
