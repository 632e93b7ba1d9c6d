#![no_main]

use calltrace::config::TracerConfig;
use calltrace::replay::{parse_script, Replayer};
use calltrace::runtime::ScriptedRuntime;
use calltrace::session::TracerSession;
use calltrace::sink::OutputSink;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(ops) = parse_script(data) else {
        return;
    };
    let sink = OutputSink::from_writer(std::io::sink(), "null");
    let Ok(mut session) = TracerSession::open(TracerConfig::default(), sink, ScriptedRuntime::new(1))
    else {
        return;
    };
    // Any parsed script replays without panicking
    let _ = Replayer::for_session(&session).run(&mut session, &ops);
});
