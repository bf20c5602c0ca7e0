//! Shared test helpers: an in-memory transport that serves scripted replies
//! and records every call.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use hostman_provision::hostman_transport::Method;
use hostman_provision::{ReconcileContext, ReconcileError, Result, Transport};
use serde_json::Value;

pub const TOKEN: &str = "test-token";

/// One request seen by the transport.
#[derive(Debug, Clone)]
pub struct Call {
    pub method: Method,
    pub path: String,
    pub token: String,
    pub body: Option<Value>,
}

#[derive(Debug, Clone)]
enum Reply {
    Body(Vec<u8>),
    Status(u16, String),
}

/// Replies are queued per `(method, path)`. The last reply of a queue is
/// served again for every further call, so a poll settles on it.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    replies: Mutex<HashMap<(Method, String), VecDeque<Reply>>>,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn push(&self, method: Method, path: &str, reply: Reply) {
        self.replies
            .lock()
            .unwrap()
            .entry((method, path.to_string()))
            .or_default()
            .push_back(reply);
    }

    /// Queue a 2xx JSON reply.
    pub fn reply(&self, method: Method, path: &str, body: Value) {
        self.push(method, path, Reply::Body(serde_json::to_vec(&body).unwrap()));
    }

    /// Queue a 2xx plain-text reply.
    pub fn reply_text(&self, method: Method, path: &str, body: &str) {
        self.push(method, path, Reply::Body(body.as_bytes().to_vec()));
    }

    /// Queue an error status.
    pub fn fail(&self, method: Method, path: &str, status: u16, body: &str) {
        self.push(method, path, Reply::Status(status, body.to_string()));
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, method: &Method, path: &str) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| &c.method == method && c.path == path)
            .collect()
    }

    pub fn count(&self, method: &Method, path: &str) -> usize {
        self.calls_to(method, path).len()
    }

    /// Body of the only call to `(method, path)`.
    pub fn single_body(&self, method: &Method, path: &str) -> Value {
        let calls = self.calls_to(method, path);
        assert_eq!(calls.len(), 1, "expected exactly one {method} {path}, got {calls:?}");
        calls[0].body.clone().unwrap_or(Value::Null)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn execute(&self, method: Method, path: &str, token: &str, body: Option<&Value>) -> Result<Vec<u8>> {
        self.calls.lock().unwrap().push(Call {
            method: method.clone(),
            path: path.to_string(),
            token: token.to_string(),
            body: body.cloned(),
        });

        let reply = {
            let mut replies = self.replies.lock().unwrap();
            let queue = replies.get_mut(&(method.clone(), path.to_string()));
            match queue {
                Some(queue) if queue.len() > 1 => queue.pop_front(),
                Some(queue) => queue.front().cloned(),
                None => None,
            }
        };

        match reply {
            Some(Reply::Body(bytes)) => Ok(bytes),
            Some(Reply::Status(status, body)) => Err(ReconcileError::Api { status, body }),
            None => Err(ReconcileError::Api {
                status: 500,
                body: format!("no scripted reply for {method} {path}"),
            }),
        }
    }
}

pub fn context(transport: &Arc<ScriptedTransport>) -> ReconcileContext {
    ReconcileContext::new(TOKEN, transport.clone())
}
