//! End-to-end resolution: placeholders, inline expansion, ordering and
//! cancellation.

use std::sync::Arc;

use backsight::{capture_frames, PhysicalAddress, Resolver};

#[test]
fn address_zero_yields_exactly_the_placeholder() {
    let resolver = Resolver::new();
    let frames = resolver.resolve_frames(PhysicalAddress::default());
    assert_eq!(frames.len(), 1);
    assert!(frames[0].is_unresolved());
    assert!(!frames[0].is_inline());
    assert!(frames[0].physical().is_null());
}

#[test]
fn every_address_yields_at_least_one_frame() {
    let resolver = Resolver::new();
    for handle in [0usize, 1, 0x1000, usize::MAX] {
        let physical = PhysicalAddress::new(handle);
        let frames = resolver.resolve_frames(physical);
        assert!(!frames.is_empty(), "no frames for {physical}");
        assert!(frames.iter().all(|frame| frame.physical() == physical));
    }
}

#[test]
fn resolved_frames_are_innermost_first() {
    let resolver = Resolver::new();
    for physical in capture_frames(0) {
        let frames = resolver.resolve_frames(physical);
        assert!(!frames.is_empty());
        // At most the last frame is the physical (non-inline) one.
        for frame in &frames[..frames.len() - 1] {
            assert!(frame.is_inline(), "non-inline frame before the last for {physical}");
        }
        assert!(frames.iter().all(|frame| frame.physical() == physical));
    }
}

#[test]
fn resolves_the_capturing_test_function() {
    let trace = capture_frames(0);
    let resolver = Resolver::new();
    let frames = resolver.resolve_frames(trace[0]);
    let symbols: Vec<String> = frames.iter().map(|frame| frame.symbol()).collect();
    assert!(
        symbols.iter().any(|symbol| symbol.contains("resolves_the_capturing_test_function")),
        "own test function not named in {symbols:?}",
    );
}

#[test]
fn reports_source_locations_in_this_file() {
    let trace = capture_frames(0);
    let resolver = Resolver::new();
    let frames = resolver.resolve_frames(trace[0]);
    assert!(
        frames.iter().any(|frame| {
            let source = frame.source();
            source.file_name.ends_with("resolver.rs") && source.line > 0
        }),
        "no frame located in this file",
    );
}

#[inline(always)]
fn inline_inner(out: &mut Vec<PhysicalAddress>) {
    *out = capture_frames(0);
}

#[inline(never)]
fn outer_frame(out: &mut Vec<PhysicalAddress>) {
    inline_inner(out);
}

#[test]
fn expands_inlined_activations() {
    let mut trace = Vec::new();
    outer_frame(&mut trace);
    assert!(!trace.is_empty());

    let resolver = Resolver::new();
    let frames = resolver.resolve_frames(trace[0]);
    assert!(frames.len() >= 2, "inline chain not expanded: {} frame(s)", frames.len());

    let symbols: Vec<String> = frames.iter().map(|frame| frame.symbol()).collect();
    assert!(
        symbols.first().is_some_and(|symbol| symbol.contains("inline_inner")),
        "innermost frame is not the inlined callee: {symbols:?}",
    );
    assert!(frames[0].is_inline());

    let last = frames.len() - 1;
    assert!(
        symbols[last].contains("outer_frame"),
        "outermost frame is not the physical function: {symbols:?}",
    );
    assert!(!frames[last].is_inline());
}

#[test]
fn bounded_resolution_is_a_prefix_of_unbounded() {
    let mut trace = Vec::new();
    outer_frame(&mut trace);

    let resolver = Resolver::new();
    let all_frames = resolver.resolve_frames(trace[0]);
    assert!(all_frames.len() >= 2);

    let mut bounded = vec![backsight::LogicalFrame::default(); 1];
    let written = resolver.resolve_into(trace[0], &mut bounded);
    assert_eq!(written, 1);
    assert_eq!(bounded[0].symbol(), all_frames[0].symbol());
    assert_eq!(bounded[0].is_inline(), all_frames[0].is_inline());

    // An empty buffer requests nothing.
    assert_eq!(resolver.resolve_into(trace[0], &mut []), 0);
}

#[test]
fn sink_stop_ends_resolution_immediately() {
    let mut trace = Vec::new();
    outer_frame(&mut trace);

    let resolver = Resolver::new();
    let mut delivered = 0;
    resolver.resolve(trace[0], |_frame| {
        delivered += 1;
        false
    });
    assert_eq!(delivered, 1);
}

#[test]
fn concurrent_resolution_shares_one_session_cache() {
    let trace = capture_frames(0);
    let resolver = Arc::new(Resolver::new());
    let workers: Vec<_> = (0..4)
        .map(|_| {
            let resolver = Arc::clone(&resolver);
            let trace = trace.clone();
            std::thread::spawn(move || {
                for physical in trace {
                    let frames = resolver.resolve_frames(physical);
                    assert!(!frames.is_empty());
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().expect("resolution worker panicked");
    }
}
