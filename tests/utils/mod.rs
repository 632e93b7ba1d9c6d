// Shared harness for session integration tests

#![allow(dead_code)]

use calltrace::config::TracerConfig;
use calltrace::dispatcher::Dispatch;
use calltrace::runtime::{Notification, RuntimeValue, ScriptedRuntime, TypeDesc};
use calltrace::session::TracerSession;
use calltrace::sink::{OutputSink, SharedBuffer};

pub const OWNER_PID: u32 = 4000;

/// A session writing to memory, driven by a scripted runtime
pub struct Harness {
    pub session: TracerSession<ScriptedRuntime>,
    pub runtime: ScriptedRuntime,
    pub buffer: SharedBuffer,
}

impl Harness {
    pub fn open(config: TracerConfig) -> Self {
        let runtime = ScriptedRuntime::new(OWNER_PID);
        let buffer = SharedBuffer::new();
        let sink = OutputSink::from_writer(buffer.clone(), "memory");
        let session = TracerSession::open(config, sink, runtime.clone()).unwrap();
        Self {
            session,
            runtime,
            buffer,
        }
    }

    /// Open and start tracing
    pub fn tracing(config: TracerConfig) -> Self {
        let mut harness = Self::open(config);
        harness.session.start_trace().unwrap();
        harness
    }

    pub fn call(&mut self, receiver: &RuntimeValue, method: &str, path: &str, line: u32) -> Dispatch {
        self.session
            .on_event(&Notification::call(receiver.clone(), method).at(path, line))
    }

    pub fn ret(&mut self, receiver: &RuntimeValue, method: &str) -> Dispatch {
        self.session.on_event(&Notification::ret(receiver.clone(), method))
    }

    /// Everything after the header, flushing first
    pub fn records(&mut self) -> Vec<String> {
        if !self.session.is_closed() {
            self.session.flush().unwrap();
        }
        self.buffer
            .contents()
            .lines()
            .skip(1)
            .map(str::to_string)
            .collect()
    }
}

pub fn instance(name: &str) -> RuntimeValue {
    RuntimeValue::Instance(TypeDesc::class(name))
}

pub fn class(name: &str) -> RuntimeValue {
    RuntimeValue::Type(TypeDesc::class(name))
}
