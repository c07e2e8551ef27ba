//! Submission and consumption on separate threads.

use std::sync::mpsc;
use std::thread;

use readback_engine::{ReadbackEngine, ReadbackError, SlotState};
use readback_test_utils::{MockBackend, MockSurface, gradient_pixels};

const FRAMES: u8 = 64;

#[test]
fn test_submit_and_consume_on_separate_threads() {
    let engine = ReadbackEngine::new(MockBackend::with_latency(2));
    let (tx, rx) = mpsc::channel();

    let submitter = {
        let engine = engine.clone();
        thread::spawn(move || {
            engine.bind_submission_context().unwrap();
            let surface = MockSurface::new(16, 16, 4, gradient_pixels(16, 16, 0));
            for frame in 0..FRAMES {
                surface.write(gradient_pixels(16, 16, frame));
                let request = engine.request_readback(&surface).unwrap();
                tx.send((frame, request)).unwrap();
            }
        })
    };

    let consumer = {
        let engine = engine.clone();
        thread::spawn(move || {
            let mut received = 0;
            for (frame, mut request) in rx {
                // Submitting from the consumer is rejected once bound.
                let stray = MockSurface::new(1, 1, 4, vec![0; 4]);
                assert_eq!(
                    engine.request_readback(&stray).map(|_| ()),
                    Err(ReadbackError::WrongContext)
                );

                while request.update() == SlotState::InFlight {
                    thread::yield_now();
                }
                assert_eq!(request.state(), SlotState::Done);
                assert_eq!(request.to_vec().unwrap(), gradient_pixels(16, 16, frame));
                engine.maintain();
                received += 1;
            }
            received
        })
    };

    submitter.join().unwrap();
    assert_eq!(consumer.join().unwrap(), FRAMES as usize);

    engine.maintain();
    let stats = engine.stats();
    assert_eq!(stats.active_slots, 0);
    assert_eq!(stats.staging.outstanding, 0);
    assert!(engine.backend().early_releases().is_empty());
    assert_eq!(engine.backend().live_copies(), 0);
}

#[test]
fn test_dispose_races_completion() {
    let engine = ReadbackEngine::new(MockBackend::with_latency(4));
    engine.bind_submission_context().unwrap();
    let surface = MockSurface::new(8, 8, 4, gradient_pixels(8, 8, 0));

    let requests: Vec<_> = (0..32).map(|_| engine.request_readback(&surface).unwrap()).collect();

    let poller = {
        let engine = engine.clone();
        thread::spawn(move || {
            for _ in 0..16 {
                engine.maintain();
                thread::yield_now();
            }
        })
    };
    let disposer = thread::spawn(move || {
        for (index, mut request) in requests.into_iter().enumerate() {
            if index % 2 == 0 {
                request.update();
            }
            request.dispose();
        }
    });

    disposer.join().unwrap();
    poller.join().unwrap();
    while engine.stats().orphaned_slots > 0 {
        engine.maintain();
    }

    assert!(engine.backend().early_releases().is_empty());
    assert_eq!(engine.backend().count_releases(), 32);
    assert_eq!(engine.stats().active_slots, 0);
    assert_eq!(engine.stats().staging.outstanding, 0);
}
