use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use edgeio::queue::IoQueue;
use edgeio::Error;
use rand::RngCore;

#[test]
fn test_rollback_preserves_order() {
    _ = pretty_env_logger::try_init();

    let queue = IoQueue::new("rollback");

    for tag in [b"b1", b"b2", b"b3"] {
        queue.create_buffer(Some(tag), 2).unwrap().set_ready();
    }

    // Hand the whole batch to a worker.
    while let Some(buffer) = queue.pop_ready() {
        buffer.set_inprogress();
    }
    assert!(queue.has_inprogress());
    assert!(!queue.has_ready());

    // The worker went away; retry the batch as a unit.
    queue.rollback();
    assert!(!queue.has_inprogress());

    for expected in [b"b1", b"b2", b"b3"] {
        let buffer = queue.pop_ready().unwrap();
        let mut out = [0u8; 2];
        assert_eq!(buffer.read(&mut out).unwrap(), 2);
        assert_eq!(&out, expected);
    }
    assert!(queue.pop_ready().is_none());
}

#[test]
fn test_abort_fires_callbacks_but_keeps_buffers() {
    _ = pretty_env_logger::try_init();

    let queue = IoQueue::new("abort");
    let fired = Arc::new(AtomicUsize::new(0));

    let buffer = queue.create_buffer(Some(b"payload"), 7).unwrap();
    let counted = fired.clone();
    buffer.on_abort(move |status| {
        assert_eq!(status, Error::Aborted);
        counted.fetch_add(1, Ordering::SeqCst);
    });
    buffer.set_inprogress();

    queue.abort();
    assert_eq!(fired.load(Ordering::SeqCst), 1);

    // The buffer stays where it was, and the callback is one-shot.
    assert!(queue.has_inprogress());
    queue.abort();
    assert_eq!(fired.load(Ordering::SeqCst), 1);

    let buffer = queue.pop_inprogress().unwrap();
    let mut out = [0u8; 7];
    assert_eq!(buffer.read(&mut out).unwrap(), 7);
    assert_eq!(&out, b"payload");

    buffer.release();
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

#[test]
fn test_done_carries_result_code() {
    let queue = IoQueue::new("done");

    let buffer = queue.create_buffer(Some(b"response"), 8).unwrap();
    buffer.set_inprogress();

    let buffer = queue.pop_inprogress().unwrap();
    buffer.set_code(Err(Error::Retry));
    buffer.set_done();
    assert!(queue.has_done());

    let buffer = queue.pop_done().unwrap();
    assert_eq!(buffer.code(), Err(Error::Retry));
    assert!(!queue.has_done());
}

#[test]
fn test_release_all_sweeps_every_list() {
    let queue = IoQueue::new("sweep");
    let fired = Arc::new(AtomicUsize::new(0));

    for _ in 0..3 {
        let buffer = queue.create_buffer(None, 16).unwrap();
        let counted = fired.clone();
        buffer.on_abort(move |_| {
            counted.fetch_add(1, Ordering::SeqCst);
        });
        buffer.set_ready();
    }
    queue.pop_ready().unwrap().set_inprogress();
    queue.pop_ready().unwrap().set_done();

    queue.release_all();

    assert_eq!(fired.load(Ordering::SeqCst), 3);
    assert!(!queue.has_ready());
    assert!(!queue.has_inprogress());
    assert!(!queue.has_done());
}

#[test]
fn test_pops_on_empty_queue() {
    let queue = IoQueue::new("empty");

    assert!(queue.pop_ready().is_none());
    assert!(queue.pop_inprogress().is_none());
    assert!(queue.pop_done().is_none());
    assert!(!queue.has_ready());
    assert!(!queue.has_inprogress());
    assert!(!queue.has_done());
}

#[test]
fn test_large_payload_round_trip() {
    let queue = IoQueue::new("payload");

    let mut payload = vec![0u8; 1024];
    rand::thread_rng().fill_bytes(&mut payload);

    let buffer = queue.create_buffer(Some(&payload), payload.len()).unwrap();
    assert_eq!(buffer.write_offset(), payload.len());

    // Drain in two chunks.
    let mut head = vec![0u8; 600];
    let mut tail = vec![0u8; 600];
    assert_eq!(buffer.read(&mut head).unwrap(), 600);
    assert_eq!(buffer.read(&mut tail).unwrap(), 424);
    assert_eq!(&head[..], &payload[..600]);
    assert_eq!(&tail[..424], &payload[600..]);
    assert_eq!(buffer.read_offset(), payload.len());
}
