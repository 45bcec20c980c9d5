#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::StreamExt;
use nexlink_core::{ChangeHandler, ChangeKind, Listing, ResourceKey, ResourceRecord, ResourceSource, SourceError, WatchEvent, WatchStream};
use tokio::sync::Notify;

pub fn rec(name: &str, version: u64) -> ResourceRecord {
    ResourceRecord::new(ResourceKey::new("default", name), version, serde_json::json!({ "name": name, "rv": version }))
}

pub fn listing(items: &[(&str, u64)], version: u64) -> Result<Listing, SourceError> {
    Ok(Listing { items: items.iter().map(|(n, v)| rec(n, *v)).collect(), version, skipped: Vec::new() })
}

pub fn changed(kind: ChangeKind, name: &str, version: u64) -> Result<WatchEvent, SourceError> {
    Ok(WatchEvent::Changed(kind, rec(name, version)))
}

/// One scripted watch connection.
pub struct Session {
    gate: Option<Arc<Notify>>,
    events: Vec<Result<WatchEvent, SourceError>>,
    hang: bool,
}

impl Session {
    /// Deliver `events`, then keep the stream open forever.
    pub fn hang(events: Vec<Result<WatchEvent, SourceError>>) -> Self { Self { gate: None, events, hang: true } }

    /// Deliver `events`, then end the stream.
    pub fn close(events: Vec<Result<WatchEvent, SourceError>>) -> Self { Self { gate: None, events, hang: false } }

    /// Hold events back until the returned gate is notified.
    pub fn gated(mut self) -> (Self, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        self.gate = Some(gate.clone());
        (self, gate)
    }
}

/// In-memory source replaying scripted list results and watch sessions.
/// Once a script runs out the call never returns.
#[derive(Default)]
pub struct ScriptedSource {
    lists: Mutex<VecDeque<Result<Listing, SourceError>>>,
    sessions: Mutex<VecDeque<Session>>,
    list_calls: AtomicUsize,
    watch_froms: Mutex<Vec<u64>>,
}

impl ScriptedSource {
    pub fn new(lists: Vec<Result<Listing, SourceError>>, sessions: Vec<Session>) -> Arc<Self> {
        Arc::new(Self { lists: Mutex::new(lists.into()), sessions: Mutex::new(sessions.into()), ..Default::default() })
    }

    pub fn list_calls(&self) -> usize { self.list_calls.load(Ordering::SeqCst) }

    pub fn watch_froms(&self) -> Vec<u64> { self.watch_froms.lock().unwrap().clone() }
}

#[async_trait::async_trait]
impl ResourceSource for ScriptedSource {
    async fn list(&self) -> Result<Listing, SourceError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let next = self.lists.lock().unwrap().pop_front();
        match next {
            Some(res) => res,
            None => futures::future::pending().await,
        }
    }

    async fn watch(&self, from_version: u64) -> Result<WatchStream, SourceError> {
        self.watch_froms.lock().unwrap().push(from_version);
        let next = self.sessions.lock().unwrap().pop_front();
        let Some(Session { gate, events, hang }) = next else {
            return Ok(futures::stream::pending().boxed());
        };
        let stream = async_stream::stream! {
            if let Some(gate) = gate {
                gate.notified().await;
            }
            for ev in events {
                yield ev;
            }
            if hang {
                futures::future::pending::<()>().await;
            }
        };
        Ok(stream.boxed())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Add(String, u64),
    Update(String, u64, u64),
    Delete(String, u64),
}

/// Handler recording every callback. Optionally fails or panics for chosen names,
/// after recording the call.
#[derive(Default)]
pub struct Recorder {
    calls: Mutex<Vec<Call>>,
    fail_on: Option<String>,
    panic_on: Option<String>,
}

impl Recorder {
    pub fn new() -> Arc<Self> { Arc::new(Self::default()) }

    pub fn failing(fail_on: &str, panic_on: &str) -> Arc<Self> {
        Arc::new(Self { fail_on: Some(fail_on.into()), panic_on: Some(panic_on.into()), ..Default::default() })
    }

    pub fn calls(&self) -> Vec<Call> { self.calls.lock().unwrap().clone() }

    fn record(&self, name: &str, call: Call) -> anyhow::Result<()> {
        self.calls.lock().unwrap().push(call);
        if self.panic_on.as_deref() == Some(name) {
            panic!("boom on {name}");
        }
        if self.fail_on.as_deref() == Some(name) {
            anyhow::bail!("link failed for {name}");
        }
        Ok(())
    }
}

impl ChangeHandler for Recorder {
    fn on_add(&self, r: &ResourceRecord) -> anyhow::Result<()> {
        self.record(&r.key.name, Call::Add(r.key.name.clone(), r.version))
    }

    fn on_update(&self, old: &ResourceRecord, new: &ResourceRecord) -> anyhow::Result<()> {
        self.record(&new.key.name, Call::Update(new.key.name.clone(), old.version, new.version))
    }

    fn on_delete(&self, last: &ResourceRecord) -> anyhow::Result<()> {
        self.record(&last.key.name, Call::Delete(last.key.name.clone(), last.version))
    }
}

/// Poll `cond` until it holds or three seconds pass.
pub async fn eventually(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cond()
}
