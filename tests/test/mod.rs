#![allow(dead_code)]

use bytes::Bytes;
use ludis::{Engine, Limits, LogLevel, NullHost, RedisHost, Reply, ReplyError};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

pub fn engine() -> Engine {
    Engine::new(Arc::new(NullHost), Limits::default()).unwrap()
}

pub fn engine_with(host: Arc<StubHost>) -> Engine {
    Engine::new(host, Limits::default()).unwrap()
}

pub fn bulk(bytes: &[u8]) -> Reply {
    Reply::Bulk(Bytes::copy_from_slice(bytes))
}

pub fn status(bytes: &[u8]) -> Reply {
    Reply::Status(Bytes::copy_from_slice(bytes))
}

pub fn error(bytes: &[u8]) -> Reply {
    Reply::Error(Bytes::copy_from_slice(bytes))
}

/// A scriptable host. Queued responses play back in arrival order, the
/// fallback answers anything past the queue, and every call and log line is
/// recorded for assertions.
pub struct StubHost {
    responses: Mutex<VecDeque<Result<Reply, ReplyError>>>,
    fallback: Result<Reply, ReplyError>,
    pub calls: Mutex<Vec<Vec<Bytes>>>,
    pub logs: Mutex<Vec<(LogLevel, Vec<u8>)>>,
}

impl StubHost {
    pub fn new() -> Arc<Self> {
        Self::with_fallback(Ok(Reply::ok()))
    }

    pub fn with_fallback(fallback: Result<Reply, ReplyError>) -> Arc<Self> {
        Arc::new(StubHost {
            responses: Mutex::new(VecDeque::new()),
            fallback,
            calls: Mutex::new(Vec::new()),
            logs: Mutex::new(Vec::new()),
        })
    }

    pub fn push(&self, response: Result<Reply, ReplyError>) {
        self.responses.lock().unwrap().push_back(response);
    }

    pub fn calls(&self) -> Vec<Vec<Bytes>> {
        self.calls.lock().unwrap().clone()
    }

    pub fn logs(&self) -> Vec<(LogLevel, Vec<u8>)> {
        self.logs.lock().unwrap().clone()
    }
}

impl RedisHost for StubHost {
    fn call(&self, args: &[Bytes]) -> Result<Reply, ReplyError> {
        self.calls.lock().unwrap().push(args.to_vec());
        match self.responses.lock().unwrap().pop_front() {
            Some(response) => response,
            None => self.fallback.clone(),
        }
    }

    fn log(&self, level: LogLevel, message: &[u8]) {
        self.logs.lock().unwrap().push((level, message.to_vec()));
    }
}
