//! End-to-end capture behavior: skip arithmetic, bounded and unbounded
//! sinks, and context-based capture.

use backsight::{capture, capture_frames, capture_into, PhysicalAddress};

#[test]
fn captures_at_least_one_entry() {
    let entries = capture_frames(0);
    assert!(!entries.is_empty());
    assert!(entries.iter().all(|entry| !entry.is_null()));
}

#[test]
fn skip_drops_exactly_the_first_entries() {
    let all_entries = capture_frames(0);
    let less_entries = capture_frames(1);
    assert_eq!(less_entries.len(), all_entries.len() - 1);
    assert_eq!(less_entries, &all_entries[1..]);
}

#[test]
fn skip_larger_than_stack_depth_yields_nothing() {
    assert!(capture_frames(10_000).is_empty());
}

#[test]
fn sink_stop_ends_capture_immediately() {
    let mut delivered = 0;
    capture(0, |_entry| {
        delivered += 1;
        false
    });
    assert_eq!(delivered, 1);
}

#[test]
fn empty_bounded_sink_receives_nothing() {
    assert_eq!(capture_into(&mut [], 0), 0);
}

// Both captures must happen inside one call so the first reported frame (the
// caller of this function) is the same instruction for both.
#[inline(never)]
fn capture_full_and_bounded(capacity: usize) -> (Vec<PhysicalAddress>, Vec<PhysicalAddress>) {
    let full = capture_frames(1);
    let mut bounded = vec![PhysicalAddress::default(); capacity];
    let written = capture_into(&mut bounded, 1);
    bounded.truncate(written);
    (full, bounded)
}

#[test]
fn bounded_capture_truncates_to_capacity() {
    let (full, bounded) = capture_full_and_bounded(1);
    assert!(!full.is_empty());
    assert_eq!(bounded.len(), 1);
    assert_eq!(bounded[0], full[0]);
}

#[test]
fn bounded_capture_is_a_prefix_of_unbounded() {
    let (full, bounded) = capture_full_and_bounded(4);
    assert_eq!(bounded.len(), full.len().min(4));
    assert_eq!(bounded, &full[..bounded.len()]);
}

#[cfg(any(all(target_os = "linux", target_env = "gnu"), target_os = "macos"))]
mod from_context {
    use backsight::{
        capture_from_context, capture_from_context_mut, capture_frames_from_context,
        capture_into_from_context, NativeContext, PhysicalAddress,
    };

    // The context must be taken inside the test function itself: a context
    // captured in a helper would describe a frame that is already gone by
    // the time it is walked.
    macro_rules! get_context {
        ($context:ident) => {
            let mut $context = unsafe { std::mem::zeroed::<NativeContext>() };
            assert_eq!(unsafe { libc::getcontext(&mut $context) }, 0);
        };
    }

    #[test]
    fn captures_at_least_one_entry_for_a_local_context() {
        get_context!(context);
        let entries = capture_frames_from_context(&context, 0);
        assert!(!entries.is_empty());
        assert!(entries.iter().all(|entry| !entry.is_null()));
    }

    #[test]
    fn identical_contexts_give_identical_traces() {
        get_context!(context);
        let first = capture_frames_from_context(&context, 0);
        let second = capture_frames_from_context(&context, 0);
        assert!(!first.is_empty());
        assert_eq!(first, second);
    }

    #[test]
    fn skip_drops_exactly_the_first_entries() {
        get_context!(context);
        let all_entries = capture_frames_from_context(&context, 0);
        let less_entries = capture_frames_from_context(&context, 1);
        assert_eq!(less_entries.len(), all_entries.len() - 1);
        assert_eq!(less_entries, &all_entries[1..]);
    }

    #[test]
    fn bounded_capture_stops_when_full() {
        get_context!(context);
        let all_entries = capture_frames_from_context(&context, 0);
        let mut bounded = [PhysicalAddress::default(); 1];
        let written = capture_into_from_context(&context, &mut bounded, 0);
        assert_eq!(written, 1);
        assert_eq!(bounded[0], all_entries[0]);
    }

    #[test]
    fn empty_bounded_sink_receives_nothing() {
        get_context!(context);
        assert_eq!(capture_into_from_context(&context, &mut [], 0), 0);
    }

    #[test]
    fn mutable_context_capture_matches_read_only_capture() {
        get_context!(context);
        let mut expected = Vec::new();
        capture_from_context(&context, 0, |entry| {
            expected.push(entry);
            true
        });
        let mut context_copy = context;
        let mut actual = Vec::new();
        capture_from_context_mut(&mut context_copy, 0, |entry| {
            actual.push(entry);
            true
        });
        assert!(!expected.is_empty());
        assert_eq!(expected, actual);
    }
}
