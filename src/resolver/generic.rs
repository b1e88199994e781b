//! Generic resolver backend over `addr2line`
//!
//! Used where the DIE-walking backend is unavailable. The context yields
//! inline frames innermost first without an inline flag of its own, so the
//! previous frame is buffered and flushed flagged inline once a successor
//! proves it was not the physical one; the final frame flushes non-inline.

use std::sync::Mutex;

use crate::core::{LogicalFrame, PhysicalAddress, Result};
use crate::resolver::session::Reader;
use crate::resolver::SinkState;

pub(crate) struct GenericBackend {
    // addr2line contexts cache lazily parsed state internally, so queries
    // are serialized per session.
    context: Mutex<addr2line::Context<Reader>>,
}

impl GenericBackend {
    pub(crate) fn new(dwarf: gimli::Dwarf<Reader>) -> Result<Self> {
        Ok(Self { context: Mutex::new(addr2line::Context::from_dwarf(dwarf)?) })
    }

    pub(crate) fn resolve<S: FnMut(LogicalFrame) -> bool>(
        &self,
        module_addr: u64,
        physical: PhysicalAddress,
        state: &mut SinkState<S>,
    ) {
        let context = self.context.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut frames = match context.find_frames(module_addr).skip_all_loads() {
            Ok(frames) => frames,
            Err(_) => return,
        };

        let mut buffered: Option<LogicalFrame> = None;
        while let Ok(Some(frame)) = frames.next() {
            if let Some(mut previous) = buffered.take() {
                previous.mark_inline();
                if state.submit(previous) {
                    return;
                }
            }

            let raw_symbol = frame
                .function
                .as_ref()
                .and_then(|function| function.raw_name().ok())
                .map(|name| name.into_owned().into_bytes())
                .unwrap_or_default();
            let (file, line, column) = frame
                .location
                .map(|location| {
                    (
                        location.file.unwrap_or_default().as_bytes().to_vec(),
                        location.line.unwrap_or(0),
                        location.column.unwrap_or(0),
                    )
                })
                .unwrap_or_default();
            buffered =
                Some(LogicalFrame::new(physical, false, raw_symbol, file, line, column, true));
        }
        if let Some(last) = buffered.take() {
            state.submit(last);
        }
    }
}
