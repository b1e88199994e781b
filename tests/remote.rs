//! Out-of-process resolution, exercised against our own process: the wire
//! form and the maps-descriptor and pid resolver constructors.

#![cfg(unix)]

use std::fs::File;
use std::os::fd::OwnedFd;

use backsight::{capture_frames, decode_trace, encode_trace, Resolver};

#[test]
fn resolves_a_wire_trace_through_a_maps_descriptor() {
    let trace = capture_frames(0);
    assert!(!trace.is_empty());

    // Round-trip the trace exactly as an out-of-process consumer would
    // receive it.
    let wire = encode_trace(&trace);
    let received = decode_trace(&wire).expect("wire form must decode");
    assert_eq!(received, trace);

    let maps: OwnedFd = File::open("/proc/self/maps")
        .expect("own maps must be readable")
        .into();
    let resolver = Resolver::from_proc_maps(maps).expect("maps snapshot must parse");

    for physical in &received {
        let frames = resolver.resolve_frames(*physical);
        assert!(!frames.is_empty());
        assert!(frames.iter().all(|frame| frame.physical() == *physical));
    }

    // The innermost address is in this test binary; its symbol must be
    // known even through the snapshot path.
    let innermost = resolver.resolve_frames(received[0]);
    assert!(
        innermost.iter().any(|frame| !frame.symbol().is_empty()),
        "innermost address resolved to no symbol",
    );
}

#[test]
fn resolves_through_a_pid() {
    let trace = capture_frames(0);
    let resolver = Resolver::for_process(std::process::id()).expect("own pid is alive");
    let frames = resolver.resolve_frames(trace[0]);
    assert!(frames.iter().any(|frame| !frame.symbol().is_empty()));
}

#[test]
fn rejects_a_descriptor_that_is_not_a_maps_file() {
    let not_maps: OwnedFd = File::open("/dev/null").expect("/dev/null must open").into();
    assert!(Resolver::from_proc_maps(not_maps).is_err());
}
