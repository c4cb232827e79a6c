//! Engine global state is shared by every transport in the process.
//!
//! Kept in its own test binary so no other test touches the counters.

use sctp_sim::engine::{global_cleanups, global_inits, live_instances};
use sctp_sim::{connect_pair, CompletionMode, LoopbackEngine};
use sctp_transport::TransportConfig;
use std::thread;
use std::time::Duration;

#[test]
fn global_init_and_cleanup_follow_the_refcount() {
    assert_eq!(global_inits(), 0);

    let handles: Vec<_> = (0..4)
        .map(|_| {
            thread::spawn(|| {
                connect_pair(
                    LoopbackEngine::new(),
                    TransportConfig::default(),
                    CompletionMode::Inline,
                )
                .expect("open pair")
            })
        })
        .collect();
    let pairs: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    for pair in &pairs {
        assert!(pair.wait_connected(Duration::from_secs(5)));
    }
    assert_eq!(live_instances(), 8);
    assert_eq!(global_inits(), 1);
    assert_eq!(global_cleanups(), 0);

    drop(pairs);
    assert_eq!(live_instances(), 0);
    assert_eq!(global_cleanups(), 1);

    // A new transport after full teardown initializes again.
    let pair = connect_pair(
        LoopbackEngine::new(),
        TransportConfig::default(),
        CompletionMode::Inline,
    )
    .expect("open pair");
    assert_eq!(global_inits(), 2);
    drop(pair);
    assert_eq!(global_cleanups(), 2);
}
