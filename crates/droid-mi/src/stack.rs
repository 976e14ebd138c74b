//! Per-thread stack frames, cached until the target resumes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as SyncMutex, PoisonError, Weak};

use serde::Serialize;
use tokio::sync::Mutex;

use crate::client::ProtocolClient;
use crate::error::MiError;
use crate::protocol::{ResultRecord, Value};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StackFrame {
    pub level: u32,
    pub addr: String,
    pub func: Option<String>,
    pub file: Option<String>,
    pub fullname: Option<String>,
    pub line: Option<u32>,
    /// Shared library the frame belongs to, when there is no source.
    pub from: Option<String>,
}

impl StackFrame {
    fn from_value(value: &Value) -> Result<Self, MiError> {
        let text = |key: &str| value.get(key).and_then(Value::as_str).map(String::from);
        let level = text("level")
            .and_then(|l| l.parse().ok())
            .ok_or_else(|| MiError::InvalidResponse("frame without a level".into()))?;
        Ok(Self {
            level,
            addr: text("addr").unwrap_or_default(),
            func: text("func"),
            file: text("file"),
            fullname: text("fullname"),
            line: text("line").and_then(|l| l.parse().ok()),
            from: text("from"),
        })
    }
}

/// Frames of a `-stack-list-frames` result, innermost first.
pub fn parse_frames(record: &ResultRecord) -> Result<Vec<StackFrame>, MiError> {
    let stack = record
        .get("stack")
        .and_then(Value::as_list)
        .ok_or_else(|| MiError::InvalidResponse("result has no stack list".into()))?;
    let mut frames = stack
        .iter()
        .map(StackFrame::from_value)
        .collect::<Result<Vec<_>, _>>()?;
    frames.sort_by_key(|f| f.level);
    Ok(frames)
}

type Slot = Arc<Mutex<Arc<Vec<StackFrame>>>>;

/// Lazily filled frame lists keyed by thread id.
///
/// Every entry is dropped when the client reports `*running`; the reader
/// runs the invalidation before handling the next line.
pub struct ThreadStackCache {
    client: Arc<ProtocolClient>,
    entries: SyncMutex<HashMap<u32, Slot>>,
    /// `-thread-select` followed by `-stack-list-frames` must not interleave
    /// with another thread's pair.
    selection: Mutex<()>,
}

impl ThreadStackCache {
    pub fn attach(client: Arc<ProtocolClient>) -> Arc<Self> {
        let cache = Arc::new(Self {
            client: client.clone(),
            entries: SyncMutex::new(HashMap::new()),
            selection: Mutex::new(()),
        });
        let weak: Weak<Self> = Arc::downgrade(&cache);
        client.on_resume(Box::new(move || {
            if let Some(cache) = weak.upgrade() {
                cache.invalidate();
            }
        }));
        cache
    }

    fn slot(&self, thread_id: u32) -> Slot {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(thread_id)
            .or_default()
            .clone()
    }

    /// Frames of `thread_id`, fetched from the debugger on first use.
    pub async fn get_frames(&self, thread_id: u32) -> Result<Arc<Vec<StackFrame>>, MiError> {
        let slot = self.slot(thread_id);
        let mut frames = slot.lock().await;
        if !frames.is_empty() {
            return Ok(frames.clone());
        }

        let fetched = {
            let _selected = self.selection.lock().await;
            self.client.select_thread(thread_id).await?;
            self.client.list_frames().await?
        };
        tracing::debug!(thread_id, frames = fetched.len(), "stack cached");
        *frames = Arc::new(fetched);
        Ok(frames.clone())
    }

    /// Frames already cached for `thread_id`, without asking the debugger.
    pub fn cached(&self, thread_id: u32) -> Option<Arc<Vec<StackFrame>>> {
        let slot = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&thread_id)
            .cloned()?;
        let frames = slot.try_lock().ok()?;
        (!frames.is_empty()).then(|| frames.clone())
    }

    pub fn invalidate(&self) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if !entries.is_empty() {
            tracing::debug!(threads = entries.len(), "stack cache cleared");
        }
        entries.clear();
    }
}
