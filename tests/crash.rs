// Crash notes, fatal errors, divergence reports and fault observation
// Run with: cargo test --test crash

mod common;

use common::*;
use replay_ipc::Child::{CrashObserver, CrashReporter, Fault, SignalCrashObserver};
use replay_ipc::ffi;
use replay_ipc::Protocol::Message::Message;
use replay_ipc::Protocol::MessageType;
use serial_test::serial;
use std::ffi::CString;
use std::sync::Arc;
use std::thread;

#[test]
fn test_notes_nest() {
    let reporter = CrashReporter::new().unwrap();
    reporter.push_note("layout");
    reporter.push_note("paint");
    assert_eq!(reporter.notes(), vec!["layout", "paint"]);
    assert_eq!(reporter.recorded(), "layout > paint");

    reporter.set_note("composite");
    assert_eq!(reporter.notes(), vec!["layout", "composite"]);

    assert_eq!(reporter.pop_note().as_deref(), Some("composite"));
    assert_eq!(reporter.recorded(), "layout");
    reporter.pop_note();
    assert_eq!(reporter.pop_note(), None);
    assert_eq!(reporter.recorded(), "");

    reporter.set_note("only");
    assert_eq!(reporter.notes(), vec!["only"]);
}

#[test]
fn test_fatal_frame_prefers_recorded_text() {
    let reporter = CrashReporter::new().unwrap();
    reporter.record_fatal("Unexpected null in layout");
    let fault = Fault {
        signal: 11,
        address: 0x10,
    };
    let fatal = Message::decode(&reporter.take_fatal_frame(fault, 5)).unwrap();
    assert_eq!(fatal.kind(), MessageType::FatalError);
    assert_eq!(fatal.fork_id(), 5);
    assert_eq!(fatal.error_text(), Some("Unexpected null in layout"));

    // The region is cleared once taken.
    let fatal = Message::decode(&reporter.take_fatal_frame(fault, 5)).unwrap();
    assert_eq!(fatal.error_text(), Some("Fault 0x10 (signal 11)"));
    assert_eq!(reporter.recorded(), "");
}

#[test]
fn test_fatal_frame_truncates_long_notes() {
    let reporter = CrashReporter::new().unwrap();
    reporter.push_note(&"x".repeat(10_000));
    let frame = reporter.take_fatal_frame(Fault { signal: 7, address: 0 }, 0);
    let fatal = Message::decode(&frame).unwrap();
    let text = fatal.error_text().unwrap();
    assert!(!text.is_empty() && text.len() < 10_000);
    assert!(text.bytes().all(|b| b == b'x'));

    // Cutting inside a multi-byte character still leaves valid text.
    reporter.pop_note();
    reporter.push_note(&"€".repeat(5_000));
    let frame = reporter.take_fatal_frame(Fault { signal: 7, address: 0 }, 0);
    let fatal = Message::decode(&frame).unwrap();
    assert!(fatal.error_text().unwrap().ends_with('€'));
}

#[test]
fn test_crash_report_matches_fatal_error_encoding() {
    let h = replaying_root();
    let fork = fork_of(&h, 6);
    fork.ctx.push_crash_note("decoding font");
    fork.ctx.report_crash(Fault {
        signal: 11,
        address: 0,
    });

    let fatal = h.inbox.take(MessageType::FatalError).unwrap();
    assert_eq!(fatal, Message::fatal_error(6, "decoding font"));
    assert_eq!(h.host.halts(), 0);
}

#[test]
fn test_report_fatal_error_sends_and_halts() {
    let h = replaying_root();
    h.ctx.report_fatal_error("Cannot continue");

    let fatal = h.inbox.take(MessageType::FatalError).unwrap();
    assert_eq!(fatal.error_text(), Some("Cannot continue"));
    assert_eq!(fatal.fork_id(), 0);
    assert_eq!(h.host.halts(), 1);
    assert_eq!(h.ctx.crash_reporter().recorded(), "Cannot continue");
}

#[test]
fn test_no_reports_after_exit_was_requested() {
    let h = replaying_root();
    h.middleman.send(Message::terminate(0));
    assert!(h.host.wait_terminated());

    h.ctx.report_fatal_error("late");
    h.ctx.report_crash(Fault {
        signal: 11,
        address: 0,
    });
    assert_eq!(h.host.halts(), 0);
    assert_eq!(h.inbox.count(MessageType::FatalError), 0);
}

#[test]
fn test_crash_message_reports_hang_without_halting() {
    let h = replaying_root();
    h.middleman.send(Message::crash(0));
    let fatal = h.inbox.take(MessageType::FatalError).unwrap();
    assert_eq!(fatal.error_text(), Some("Hung replaying process"));
    assert_eq!(h.host.halts(), 0);

    // The receiver is still running.
    h.middleman.send(Message::terminate(0));
    assert!(h.host.wait_terminated());
}

#[test]
fn test_critical_error_keeps_running() {
    let h = replaying_root();
    h.ctx.report_critical_error("slow frame");
    let critical = h.inbox.take(MessageType::CriticalError).unwrap();
    assert_eq!(critical.error_text(), Some("slow frame"));
    assert_eq!(h.host.halts(), 0);
}

#[test]
fn test_divergence_on_main_thread_is_reported() {
    let h = replaying_root();
    let ctx = Arc::clone(&h.ctx);
    h.host.on_main_thread(move || ctx.report_unhandled_divergence());

    assert!(h.inbox.take(MessageType::UnhandledDivergence).is_some());
    assert_eq!(h.host.halts(), 1);
    assert_eq!(h.inbox.count(MessageType::FatalError), 0);
}

#[test]
fn test_divergence_off_main_thread_is_fatal() {
    let h = replaying_root();
    h.ctx.report_unhandled_divergence();

    let fatal = h.inbox.take(MessageType::FatalError).unwrap();
    assert_eq!(fatal.error_text(), Some("Unhandled divergence not allowed"));
    assert_eq!(h.inbox.count(MessageType::UnhandledDivergence), 0);
}

#[test]
fn test_divergence_can_be_disallowed() {
    let h = replaying_root();
    h.ctx.set_unhandled_divergence_allowed(false);
    let ctx = Arc::clone(&h.ctx);
    h.host.on_main_thread(move || ctx.report_unhandled_divergence());

    let fatal = h.inbox.take(MessageType::FatalError).unwrap();
    assert_eq!(fatal.error_text(), Some("Unhandled divergence not allowed"));
    assert_eq!(h.inbox.count(MessageType::UnhandledDivergence), 0);
}

#[test]
#[serial]
fn test_signal_observer_reports_fault() {
    let h = replaying_root();
    let observer = Arc::new(SignalCrashObserver::with_signals(vec![libc::SIGUSR2]));
    h.ctx.start_crash_observer(observer.clone()).unwrap();
    assert!(SignalCrashObserver::is_installed());

    let again = observer.start(Box::new(|_| {}));
    assert_eq!(
        again.unwrap_err().kind(),
        std::io::ErrorKind::AlreadyExists
    );

    h.ctx.push_crash_note("running timers");
    // The signalled thread parks inside the handler for good.
    thread::spawn(|| unsafe {
        libc::raise(libc::SIGUSR2);
    });

    let fatal = h.inbox.take(MessageType::FatalError).unwrap();
    assert_eq!(fatal.error_text(), Some("running timers"));
}

#[test]
#[serial]
fn test_ffi_entry_points() {
    ffi::uninstall_context();
    assert_eq!(ffi::replay_ipc_fork_id(), ffi::REPLAY_IPC_NO_FORK_ID);

    let text = CString::new("native crash").unwrap();
    assert_eq!(ffi::replay_ipc_report_crash(std::ptr::null()), -1);
    assert_eq!(ffi::replay_ipc_report_crash(text.as_ptr()), -2);

    let h = replaying_root();
    let fork = fork_of(&h, 4);
    ffi::install_context(Arc::clone(&fork.ctx));
    assert_eq!(ffi::replay_ipc_fork_id(), 4);

    let note = CString::new("decoding image").unwrap();
    assert_eq!(ffi::replay_ipc_set_crash_note(note.as_ptr()), 0);
    assert_eq!(fork.ctx.crash_reporter().notes(), vec!["decoding image"]);

    assert_eq!(ffi::replay_ipc_report_crash(text.as_ptr()), 0);
    let fatal = h.inbox.take(MessageType::FatalError).unwrap();
    assert_eq!(fatal.fork_id(), 4);
    assert_eq!(fatal.error_text(), Some("native crash"));

    ffi::uninstall_context();
    assert!(ffi::installed_context().is_none());
}
