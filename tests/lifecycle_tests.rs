//! Session lifecycle: Closed/Open/Tracing transitions, fork and thread
//! guards, teardown

mod utils;

use calltrace::config::TracerConfig;
use calltrace::csv_output::{EDGE_HEADER, EVENT_HEADER};
use calltrace::dispatcher::{Dispatch, IgnoreReason};
use calltrace::error::TraceError;
use calltrace::runtime::{Notification, ScriptedRuntime};
use calltrace::session::{SessionState, TracerSession};
use utils::{instance, Harness, OWNER_PID};

#[test]
fn test_new_session_is_open_with_header() {
    let h = Harness::open(TracerConfig::default());
    assert_eq!(h.session.state(), SessionState::Open);
    assert!(!h.runtime.is_enabled());
    assert_eq!(h.buffer.contents(), EDGE_HEADER);
}

#[test]
fn test_events_header() {
    let h = Harness::open(TracerConfig::events());
    assert_eq!(h.buffer.contents(), EVENT_HEADER);
}

#[test]
fn test_notifications_before_start_are_ignored() {
    let mut h = Harness::open(TracerConfig::default());
    assert_eq!(
        h.call(&instance("A"), "m", "a.rb", 1),
        Dispatch::Ignored(IgnoreReason::NotTracing)
    );
    assert_eq!(h.session.stack_depth(), 0);
}

#[test]
fn test_start_twice_enables_once() {
    let mut h = Harness::open(TracerConfig::default());
    h.session.start_trace().unwrap();
    h.session.start_trace().unwrap();
    assert_eq!(h.runtime.enable_count(), 1);
    assert!(h.session.is_tracing());
}

#[test]
fn test_close_is_idempotent() {
    let mut h = Harness::tracing(TracerConfig::default());
    h.session.close().unwrap();
    h.session.close().unwrap();
    assert!(h.session.is_closed());
    assert!(!h.runtime.is_enabled());
    assert_eq!(h.runtime.disable_count(), 1);
}

#[test]
fn test_closed_session_rejects_start_and_mark() {
    let mut h = Harness::open(TracerConfig::default());
    h.session.close().unwrap();
    assert!(matches!(h.session.start_trace(), Err(TraceError::SessionClosed)));
    assert!(matches!(h.session.mark("x"), Err(TraceError::SessionClosed)));
    assert!(matches!(
        h.session.mark_and_unwind("x"),
        Err(TraceError::SessionClosed)
    ));
}

#[test]
fn test_notifications_after_close_are_ignored() {
    let mut h = Harness::tracing(TracerConfig::events());
    h.session.close().unwrap();
    assert_eq!(
        h.call(&instance("A"), "m", "a.rb", 1),
        Dispatch::Ignored(IgnoreReason::NotTracing)
    );
    assert!(h.records().is_empty());
}

#[test]
fn test_close_flushes_records() {
    let mut h = Harness::tracing(TracerConfig::events());
    h.call(&instance("A"), "m", "a.rb", 1);
    h.session.close().unwrap();
    assert!(h.buffer.contents().contains(r#"call,"A","m",instance,"a.rb",1"#));
}

#[test]
fn test_trace_scope() {
    let mut h = Harness::open(TracerConfig::events());
    let a = instance("A");
    let dispatch = h
        .session
        .trace(|s| s.on_event(&Notification::call(a.clone(), "m")))
        .unwrap();
    assert_eq!(dispatch, Dispatch::Recorded);
    assert_eq!(h.session.state(), SessionState::Open);
    assert!(!h.runtime.is_enabled());
}

#[test]
fn test_forked_child_writes_nothing() {
    let mut h = Harness::tracing(TracerConfig::events());
    h.call(&instance("Parent"), "work", "p.rb", 1);
    h.session.flush().unwrap();
    let before = h.buffer.contents();

    h.runtime.set_process_id(OWNER_PID + 1);
    assert_eq!(
        h.call(&instance("Child"), "work", "c.rb", 1),
        Dispatch::Ignored(IgnoreReason::ForkedChild)
    );
    assert!(!h.runtime.is_enabled());
    assert_eq!(h.session.state(), SessionState::Open);

    // Delivery keeps arriving in the child, e.g. from a stale hook
    for _ in 0..3 {
        h.call(&instance("Child"), "more", "c.rb", 2);
    }
    h.session.mark("child").unwrap();
    h.session.close().unwrap();
    assert_eq!(h.buffer.contents(), before);
}

#[test]
fn test_forked_child_discards_inherited_buffer() {
    let mut h = Harness::tracing(TracerConfig::events());
    h.call(&instance("Parent"), "work", "p.rb", 1);
    h.runtime.set_process_id(OWNER_PID + 7);
    drop(h.session);
    assert_eq!(h.buffer.contents(), EVENT_HEADER);
}

#[test]
fn test_foreign_thread_events_are_ignored() {
    let mut h = Harness::tracing(TracerConfig::events());
    h.runtime.set_thread(2);
    assert_eq!(
        h.call(&instance("Worker"), "run", "w.rb", 1),
        Dispatch::Ignored(IgnoreReason::ForeignThread)
    );
    h.runtime.set_thread(calltrace::runtime::MAIN_THREAD);
    assert_eq!(h.call(&instance("Main"), "run", "m.rb", 1), Dispatch::Recorded);
    assert_eq!(h.records().len(), 1);
}

#[test]
fn test_drop_disables_and_flushes() {
    let mut h = Harness::tracing(TracerConfig::events());
    h.call(&instance("A"), "m", "a.rb", 1);
    let Harness {
        session,
        runtime,
        buffer,
    } = h;
    drop(session);
    assert!(!runtime.is_enabled());
    assert!(buffer.contents().contains(r#""A","m""#));
}

#[test]
fn test_finalizing_session_is_disable_only() {
    let mut h = Harness::tracing(TracerConfig::events());
    h.call(&instance("A"), "m", "a.rb", 1);
    h.session.begin_finalize();
    assert_eq!(
        h.call(&instance("B"), "n", "b.rb", 1),
        Dispatch::Ignored(IgnoreReason::Finalizing)
    );
    assert!(!h.runtime.is_enabled());
    assert_eq!(h.session.stack_depth(), 1);

    drop(h.session);
    assert_eq!(h.buffer.contents(), EVENT_HEADER);
}

#[test]
fn test_tracer_entity_events_are_ignored() {
    let config = TracerConfig::default().with_tracer_entity(Some("Host::Tracer"));
    let mut h = Harness::tracing(config);
    assert_eq!(
        h.call(&instance("Host::Tracer"), "start_trace", "t.rb", 1),
        Dispatch::Ignored(IgnoreReason::TracerInternal)
    );
    assert_eq!(h.session.stats().ignored(IgnoreReason::TracerInternal), 1);
}

#[test]
fn test_independent_sessions_do_not_interfere() {
    let mut first = Harness::tracing(TracerConfig::events());
    let mut second = Harness::tracing(TracerConfig::events());
    first.call(&instance("A"), "m", "a.rb", 1);
    second.call(&instance("B"), "n", "b.rb", 1);
    second.call(&instance("C"), "o", "c.rb", 1);
    assert_eq!(first.records().len(), 1);
    assert_eq!(second.records().len(), 2);
    assert_eq!(first.session.stack_depth(), 1);
    assert_eq!(second.session.stack_depth(), 2);
}

#[test]
fn test_create_writes_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("calls.csv");
    let mut session =
        TracerSession::create(TracerConfig::events(), &path, ScriptedRuntime::new(1)).unwrap();
    session.start_trace().unwrap();
    session.on_event(&Notification::call(instance("A"), "m").at("a.rb", 2));
    session.close().unwrap();

    let contents = std::fs::read_to_string(&path).unwrap();
    assert_eq!(
        contents,
        format!("{EVENT_HEADER}call,\"A\",\"m\",instance,\"a.rb\",2\n")
    );
}

#[test]
fn test_host_runtime_session_ignores_other_threads() {
    use calltrace::runtime::HostRuntime;
    use calltrace::sink::{OutputSink, SharedBuffer};

    let runtime = HostRuntime::new();
    let delivery = runtime.delivery();
    let buffer = SharedBuffer::new();
    let sink = OutputSink::from_writer(buffer.clone(), "memory");
    let session = TracerSession::open(TracerConfig::events(), sink, runtime).unwrap();

    let session = std::sync::Arc::new(std::sync::Mutex::new(session));
    session.lock().unwrap().start_trace().unwrap();
    assert!(delivery.load(std::sync::atomic::Ordering::Acquire));

    let shared = std::sync::Arc::clone(&session);
    let dispatch = std::thread::spawn(move || {
        shared
            .lock()
            .unwrap()
            .on_event(&Notification::call(instance("Worker"), "run"))
    })
    .join()
    .unwrap();
    assert_eq!(dispatch, Dispatch::Ignored(IgnoreReason::ForeignThread));

    let mut session = session.lock().unwrap();
    assert_eq!(
        session.on_event(&Notification::call(instance("Main"), "run")),
        Dispatch::Recorded
    );
    session.close().unwrap();
    assert!(!delivery.load(std::sync::atomic::Ordering::Acquire));
    assert!(buffer.contents().contains(r#""Main","run""#));
}
