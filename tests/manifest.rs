// Manifest queue and the ManifestStart -> ManifestFinished flow
// Run with: cargo test --test manifest

mod common;

use common::*;
use replay_ipc::Child::{ManifestOutput, ManifestQueue};
use replay_ipc::Core::Monitor::Monitor;
use replay_ipc::Protocol::Message::Message;
use replay_ipc::Protocol::MessageType;
use replay_ipc::{ProcessConfig, ProcessRole};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[test]
fn test_queue_runs_one_at_a_time_in_order() {
    let queue = ManifestQueue::new();
    assert!(!queue.is_processing());

    assert_eq!(queue.push(b"first".to_vec()), Some(b"first".to_vec()));
    assert!(queue.is_processing());
    assert_eq!(queue.push(b"second".to_vec()), None);
    assert_eq!(queue.push(b"third".to_vec()), None);
    assert_eq!(queue.pending(), 2);

    assert_eq!(queue.finish(), Some(b"second".to_vec()));
    assert!(queue.is_processing());
    assert_eq!(queue.finish(), Some(b"third".to_vec()));
    assert_eq!(queue.finish(), None);
    assert!(!queue.is_processing());
}

#[test]
fn test_clear_pending_keeps_running_manifest() {
    let queue = ManifestQueue::new();
    queue.push(b"a".to_vec());
    queue.push(b"b".to_vec());
    queue.clear_pending();
    assert_eq!(queue.pending(), 0);
    assert!(queue.is_processing());
    assert_eq!(queue.finish(), None);
}

#[test]
fn test_wait_until_idle() {
    let queue = Arc::new(ManifestQueue::new());
    queue.push(b"a".to_vec());
    queue.push(b"b".to_vec());

    let worker = {
        let queue = Arc::clone(&queue);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            while queue.finish().is_some() {}
        })
    };
    queue.wait_until_idle();
    assert!(!queue.is_processing());
    worker.join().unwrap();
}

#[test]
fn test_manifest_finished_returns_output() {
    let h = replaying_root();
    h.middleman.send(Message::manifest_start(0, b"load".to_vec()));

    let finished = h.inbox.take(MessageType::ManifestFinished).unwrap();
    assert_eq!(finished.binary_data(), Some(&b"done:load"[..]));
    assert_eq!(finished.fork_id(), 0);
    assert!(!finished.is_bulk());
    assert!(eventually(|| h.ctx.is_paused()));
}

#[test]
fn test_manifests_run_fifo_without_overlap() {
    let running = Arc::new(AtomicUsize::new(0));
    let overlaps = Arc::new(AtomicUsize::new(0));
    let host = {
        let running = Arc::clone(&running);
        let overlaps = Arc::clone(&overlaps);
        TestHost::with_runner(move |_, manifest| {
            if running.fetch_add(1, Ordering::SeqCst) != 0 {
                overlaps.fetch_add(1, Ordering::SeqCst);
            }
            thread::sleep(Duration::from_millis(5));
            running.fetch_sub(1, Ordering::SeqCst);
            ManifestOutput::new(manifest.to_vec())
        })
    };
    let h = harness(ProcessConfig::new(ProcessRole::Replaying), host);

    for i in 0..5u8 {
        h.middleman.send(Message::manifest_start(0, vec![i]));
    }
    for i in 0..5u8 {
        let finished = h.inbox.take(MessageType::ManifestFinished).unwrap();
        assert_eq!(finished.binary_data(), Some(&[i][..]));
    }
    assert_eq!(overlaps.load(Ordering::SeqCst), 0);
}

#[test]
fn test_bulk_output_sets_flag() {
    let host = TestHost::with_runner(|_, _| ManifestOutput::bulk(vec![7; 1 << 16]));
    let h = harness(ProcessConfig::new(ProcessRole::Replaying), host);
    h.middleman.send(Message::manifest_start(0, b"big".to_vec()));

    let finished = h.inbox.take(MessageType::ManifestFinished).unwrap();
    assert!(finished.is_bulk());
    assert_eq!(finished.binary_data().map(|d| d.len()), Some(1 << 16));
}

#[test]
fn test_manifest_runs_on_main_thread() {
    let seen: Arc<Monitor<Option<bool>>> = Arc::new(Monitor::new(None));
    let host = {
        let seen = Arc::clone(&seen);
        TestHost::with_runner(move |ctx, _| {
            *seen.lock() = Some(ctx.host().is_main_thread());
            ManifestOutput::default()
        })
    };
    let h = harness(ProcessConfig::new(ProcessRole::Replaying), host);
    h.middleman.send(Message::manifest_start(0, Vec::new()));
    h.inbox.take(MessageType::ManifestFinished).unwrap();
    assert_eq!(*seen.lock(), Some(true));
}

#[test]
fn test_process_is_not_paused_while_running() {
    let observed: Arc<Monitor<Option<bool>>> = Arc::new(Monitor::new(None));
    let host = {
        let observed = Arc::clone(&observed);
        TestHost::with_runner(move |ctx, _| {
            *observed.lock() = Some(ctx.is_paused());
            ManifestOutput::default()
        })
    };
    let h = harness(ProcessConfig::new(ProcessRole::Replaying), host);
    assert!(h.ctx.is_paused());
    h.middleman.send(Message::manifest_start(0, Vec::new()));
    h.inbox.take(MessageType::ManifestFinished).unwrap();
    assert_eq!(*observed.lock(), Some(false));
}
