//! Symbolization: physical addresses to logical frames
//!
//! A [`Resolver`] owns a module map (local or remote) and a cache of
//! per-module debug-info sessions. Resolution expands one captured address
//! into its chain of logical frames, innermost inlinee first, physical
//! function last. An address that resolves to nothing still produces exactly
//! one placeholder frame, so a caller iterating resolution output never
//! loses an input address silently.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::core::{LogicalFrame, PhysicalAddress, Result};
use crate::maps::{MapSource, ModuleInfo, RemoteModuleMap};
use crate::util::Locked;

mod session;

cfg_if::cfg_if! {
    if #[cfg(windows)] {
        mod pdb;
    } else if #[cfg(feature = "generic-backend")] {
        mod generic;
    } else {
        mod dwarf;
    }
}

use session::ModuleSession;

/// Tracks delivery for one `resolve` call: whether any frame was issued and
/// whether the sink asked to stop.
pub(crate) struct SinkState<S> {
    physical: PhysicalAddress,
    sink: S,
    issued: bool,
    done: bool,
}

impl<S: FnMut(LogicalFrame) -> bool> SinkState<S> {
    fn new(physical: PhysicalAddress, sink: S) -> Self {
        Self { physical, sink, issued: false, done: false }
    }

    /// Deliver a frame. Returns `true` once the sink has asked to stop.
    pub(crate) fn submit(&mut self, frame: LogicalFrame) -> bool {
        if !self.done {
            self.done = !(self.sink)(frame);
            self.issued = true;
        }
        self.done
    }

    /// Deliver the placeholder unless something was already issued.
    fn on_failure(&mut self) {
        if !self.issued {
            self.done = !(self.sink)(LogicalFrame::unresolved(self.physical));
            self.issued = true;
        }
    }
}

/// Expands captured addresses into logical frames.
///
/// Debug-info sessions are created on first lookup per module and kept for
/// the resolver's lifetime. Within one `resolve` call the output never
/// interleaves with another call's. How far a resolver can be shared is
/// per-backend: DWARF and generic sessions are immutable after construction
/// and are queried concurrently with the cache lock released, so the
/// resolver is `Send + Sync` there; PDB sessions are thread-confined by
/// convention (treat them as single-threaded per session), so on Windows
/// the cache lock is held across every backend query and the auto traits
/// confine the resolver to one thread.
pub struct Resolver {
    maps: MapSource,
    sessions: Locked<HashMap<PathBuf, Option<Arc<ModuleSession>>>>,
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new()
    }
}

impl Resolver {
    /// Resolver for the current process.
    pub fn new() -> Self {
        Self { maps: MapSource::Local, sessions: Locked::new(HashMap::new()) }
    }

    /// Resolver for another process, identified by pid.
    ///
    /// Addresses are located through the target's memory-map description,
    /// re-read on every unknown-module lookup since the target is live.
    #[cfg(unix)]
    pub fn for_process(pid: u32) -> Result<Self> {
        Ok(Self {
            maps: MapSource::Remote(RemoteModuleMap::for_process(pid)?),
            sessions: Locked::new(HashMap::new()),
        })
    }

    /// Resolver for another process, identified by a process handle.
    #[cfg(windows)]
    pub fn for_process(process: std::os::windows::io::OwnedHandle) -> Result<Self> {
        Ok(Self {
            maps: MapSource::Remote(RemoteModuleMap::for_process(process)?),
            sessions: Locked::new(HashMap::new()),
        })
    }

    /// Resolver over an already-opened memory-map description file, for
    /// out-of-process consumers that received the descriptor over a pipe.
    /// Takes ownership of the descriptor and consumes it immediately.
    #[cfg(unix)]
    pub fn from_proc_maps(maps: std::os::fd::OwnedFd) -> Result<Self> {
        Ok(Self {
            maps: MapSource::Remote(RemoteModuleMap::from_proc_maps(maps)?),
            sessions: Locked::new(HashMap::new()),
        })
    }

    /// Expand `physical` into logical frames, innermost first.
    ///
    /// The sink returns `true` to continue; returning `false` ends the
    /// expansion immediately. The sink is invoked at least once for every
    /// address, with the unresolved placeholder if nothing else.
    pub fn resolve<S: FnMut(LogicalFrame) -> bool>(&self, physical: PhysicalAddress, sink: S) {
        let mut state = SinkState::new(physical, sink);
        if physical.is_null() {
            state.on_failure();
            return;
        }
        let Some(module) = self.maps.lookup(physical) else {
            state.on_failure();
            return;
        };
        self.resolve_in_module(&module, physical, &mut state);
    }

    /// Drive the module's backend for one address.
    ///
    /// DWARF and generic sessions support concurrent queries, so the cache
    /// lock is released before the backend runs.
    #[cfg(not(windows))]
    fn resolve_in_module<S: FnMut(LogicalFrame) -> bool>(
        &self,
        module: &ModuleInfo,
        physical: PhysicalAddress,
        state: &mut SinkState<S>,
    ) {
        match self.session_for(module) {
            Some(session) => {
                session.resolve(physical, state);
                state.on_failure();
            }
            None => state.on_failure(),
        }
    }

    /// Drive the module's backend for one address.
    ///
    /// PDB sessions are single-threaded per session by convention, so the
    /// cache lock is held across the backend query on this platform.
    #[cfg(windows)]
    fn resolve_in_module<S: FnMut(LogicalFrame) -> bool>(
        &self,
        module: &ModuleInfo,
        physical: PhysicalAddress,
        state: &mut SinkState<S>,
    ) {
        match self.session_for(module) {
            Some(session) => {
                self.sessions.with_lock(|_sessions| session.resolve(physical, state));
                state.on_failure();
            }
            None => state.on_failure(),
        }
    }

    /// Bounded resolution into `buffer`; expansion stops once it is full.
    /// Returns the number of frames written.
    ///
    /// An empty buffer requests nothing, so nothing is resolved or
    /// delivered.
    pub fn resolve_into(&self, physical: PhysicalAddress, buffer: &mut [LogicalFrame]) -> usize {
        if buffer.is_empty() {
            return 0;
        }
        let mut written = 0;
        self.resolve(physical, |frame| {
            buffer[written] = frame;
            written += 1;
            written < buffer.len()
        });
        written
    }

    /// Convenience wrapper collecting the frames for one address.
    pub fn resolve_frames(&self, physical: PhysicalAddress) -> Vec<LogicalFrame> {
        let mut frames = Vec::new();
        self.resolve(physical, |frame| {
            frames.push(frame);
            true
        });
        frames
    }

    /// Look up or create the session for a module. The cache lock is held
    /// only across lookup and insertion; session construction runs outside
    /// it. A failed construction is cached as absent and never retried.
    fn session_for(&self, module: &ModuleInfo) -> Option<Arc<ModuleSession>> {
        if let Some(cached) =
            self.sessions.with_shared_lock(|cache| cache.get(&module.file_name).cloned())
        {
            return cached;
        }
        let created = match ModuleSession::create(module) {
            Ok(session) => Some(Arc::new(session)),
            Err(err) => {
                tracing::warn!(
                    "failed to load debug info for {}: {err}",
                    module.file_name.display(),
                );
                None
            }
        };
        self.sessions
            .with_lock(|cache| cache.entry(module.file_name.clone()).or_insert(created).clone())
    }
}
