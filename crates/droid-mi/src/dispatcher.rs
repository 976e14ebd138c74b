//! Matching result records to outstanding commands.
//!
//! In [`Correlation::Token`] mode each command carries a numeric token and
//! results are matched by it, so several commands may be in flight. In
//! [`Correlation::Fifo`] mode nothing is tagged; results are matched to the
//! oldest outstanding entry and the client keeps at most one command in
//! flight. An entry abandoned after a timeout stays queued as a tombstone
//! and absorbs the next result.
use std::collections::{HashMap, VecDeque};

use tokio::sync::oneshot;

use crate::error::MiError;
use crate::protocol::ResultRecord;

/// What a waiting caller receives.
pub type Reply = Result<ResultRecord, MiError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Correlation {
    #[default]
    Token,
    Fifo,
}

#[derive(Debug)]
enum Slot {
    Waiting(oneshot::Sender<Reply>),
    /// Fire-and-forget command whose result is dropped quietly.
    Detached,
    /// The caller gave up; the result, when it arrives, is discarded.
    Abandoned,
}

#[derive(Debug)]
struct Pending {
    id: u64,
    command: String,
    slot: Slot,
}

/// Outcome of routing one result record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Routed {
    Delivered { command: String },
    Detached { command: String },
    /// Result for an abandoned entry.
    Late { command: String },
    /// No entry matched.
    Unmatched,
}

/// Tracks pending commands and routes results to waiting callers.
#[derive(Debug)]
pub struct Dispatcher {
    mode: Correlation,
    next_id: u64,
    by_token: HashMap<u64, Pending>,
    queue: VecDeque<Pending>,
    closed: bool,
}

impl Dispatcher {
    pub fn new(mode: Correlation) -> Self {
        Self {
            mode,
            next_id: 1,
            by_token: HashMap::new(),
            queue: VecDeque::new(),
            closed: false,
        }
    }

    pub fn mode(&self) -> Correlation {
        self.mode
    }

    /// Number of entries not yet answered, tombstones included.
    pub fn pending_count(&self) -> usize {
        self.by_token.len() + self.queue.len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Register a command. Returns the id used on the wire (the token in
    /// token mode) and the receiver for its result.
    pub fn register(&mut self, command: &str) -> Result<(u64, oneshot::Receiver<Reply>), MiError> {
        let (tx, rx) = oneshot::channel();
        let id = self.insert(command, Slot::Waiting(tx))?;
        Ok((id, rx))
    }

    /// Register a command whose result nobody waits for.
    pub fn register_detached(&mut self, command: &str) -> Result<u64, MiError> {
        self.insert(command, Slot::Detached)
    }

    fn insert(&mut self, command: &str, slot: Slot) -> Result<u64, MiError> {
        if self.closed {
            return Err(MiError::Disconnected);
        }
        let id = self.next_id;
        self.next_id += 1;
        let pending = Pending {
            id,
            command: command.to_string(),
            slot,
        };
        match self.mode {
            Correlation::Token => {
                self.by_token.insert(id, pending);
            }
            Correlation::Fifo => self.queue.push_back(pending),
        }
        Ok(id)
    }

    /// Give up on `id`. In token mode the entry is forgotten, so a late
    /// result shows up as unmatched. In FIFO mode it becomes a tombstone.
    pub fn abandon(&mut self, id: u64) {
        match self.mode {
            Correlation::Token => {
                self.by_token.remove(&id);
            }
            Correlation::Fifo => {
                if let Some(entry) = self.queue.iter_mut().find(|p| p.id == id) {
                    entry.slot = Slot::Abandoned;
                }
            }
        }
    }

    /// Route a result record to its entry.
    pub fn complete(&mut self, record: ResultRecord) -> Routed {
        let entry = self.take(record.token);
        Self::deliver(entry, Ok(record))
    }

    /// Route a result line that could not be parsed. The entry it answers
    /// is consumed and its caller receives `error`.
    pub fn fail(&mut self, token: Option<u64>, error: MiError) -> Routed {
        let entry = self.take(token);
        Self::deliver(entry, Err(error))
    }

    fn take(&mut self, token: Option<u64>) -> Option<Pending> {
        match self.mode {
            Correlation::Token => token.and_then(|t| self.by_token.remove(&t)),
            Correlation::Fifo => self.queue.pop_front(),
        }
    }

    fn deliver(entry: Option<Pending>, reply: Reply) -> Routed {
        let Some(entry) = entry else {
            return Routed::Unmatched;
        };
        match entry.slot {
            Slot::Waiting(tx) => {
                // The caller may have been dropped; nothing to do then.
                let _ = tx.send(reply);
                Routed::Delivered {
                    command: entry.command,
                }
            }
            Slot::Detached => Routed::Detached {
                command: entry.command,
            },
            Slot::Abandoned => Routed::Late {
                command: entry.command,
            },
        }
    }

    /// Fail every outstanding entry with `error` and refuse new ones.
    pub fn close(&mut self, error: MiError) {
        self.closed = true;
        let entries = self
            .by_token
            .drain()
            .map(|(_, p)| p)
            .chain(self.queue.drain(..));
        for entry in entries {
            if let Slot::Waiting(tx) = entry.slot {
                let _ = tx.send(Err(error.clone()));
            }
        }
    }
}
