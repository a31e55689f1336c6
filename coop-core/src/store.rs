//! Document storage: one JSON document per physical file, addressed by
//! dot-delimited paths, written by a single I/O worker.
//!
//! The persisted representation is a tree of string-keyed maps holding
//! scalars, lists, and nested maps ([`Node`] is `serde_json::Value`). A
//! [`DocumentStore`] owns one such tree and its backing file; the
//! [`IoExecutor`] serializes every read and write from every connector onto
//! one worker task. That single-writer discipline is what keeps concurrent
//! connectors from corrupting a shared document — it is not a performance
//! optimization.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::error::{CoopError, Result};

/// A node in the persisted document tree.
pub type Node = Value;

// ---------------------------------------------------------------------------
// Dot-path helpers
// ---------------------------------------------------------------------------

/// Borrow the node at a dot-delimited path, if present.
#[must_use]
pub fn node_at<'a>(root: &'a Node, path: &str) -> Option<&'a Node> {
    let mut current = root;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Set the node at a dot-delimited path, creating intermediate maps.
///
/// Intermediate nodes that are not maps are replaced by maps.
pub fn set_at(root: &mut Node, path: &str, node: Node) {
    let mut segments = path.split('.').peekable();
    let mut current = root;
    while let Some(segment) = segments.next() {
        if !current.is_object() {
            *current = Value::Object(Map::new());
        }
        let map = current
            .as_object_mut()
            .unwrap_or_else(|| unreachable!("made an object on the line above"));
        if segments.peek().is_none() {
            map.insert(segment.to_string(), node);
            return;
        }
        current = map
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
}

/// Remove the node at a dot-delimited path. Returns whether it existed.
pub fn remove_at(root: &mut Node, path: &str) -> bool {
    let mut segments = path.split('.').peekable();
    let mut current = root;
    while let Some(segment) = segments.next() {
        let Some(map) = current.as_object_mut() else {
            return false;
        };
        if segments.peek().is_none() {
            return map.remove(segment).is_some();
        }
        match map.get_mut(segment) {
            Some(next) => current = next,
            None => return false,
        }
    }
    false
}

// ---------------------------------------------------------------------------
// DocumentStore
// ---------------------------------------------------------------------------

/// One document tree bound to one physical file.
#[derive(Debug)]
pub struct DocumentStore {
    file: PathBuf,
    root: Node,
}

impl DocumentStore {
    /// Open the document backing `file`.
    ///
    /// A missing file yields an empty document. An unreadable or corrupt
    /// file also yields an empty document, with a logged warning — loading
    /// fails closed rather than propagating.
    #[must_use]
    pub fn open(file: impl Into<PathBuf>) -> Self {
        let file = file.into();
        let root = match std::fs::read(&file) {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(root) => root,
                Err(error) => {
                    warn!(
                        file = %file.display(),
                        %error,
                        "corrupt document; starting from an empty tree"
                    );
                    Value::Object(Map::new())
                }
            },
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                Value::Object(Map::new())
            }
            Err(error) => {
                warn!(
                    file = %file.display(),
                    %error,
                    "unreadable document; starting from an empty tree"
                );
                Value::Object(Map::new())
            }
        };
        Self { file, root }
    }

    /// Borrow the node at `path`, if present.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&Node> {
        node_at(&self.root, path)
    }

    /// Set the node at `path`.
    pub fn set(&mut self, path: &str, node: Node) {
        set_at(&mut self.root, path, node);
    }

    /// Remove the node at `path`. Returns whether it existed.
    pub fn remove(&mut self, path: &str) -> bool {
        remove_at(&mut self.root, path)
    }

    /// Write the document back to its file.
    ///
    /// # Errors
    ///
    /// Returns [`CoopError::Io`] if the file or its parent directory cannot
    /// be written, or [`CoopError::Serialization`] if encoding fails.
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.file.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let bytes = serde_json::to_vec_pretty(&self.root)
            .map_err(|e| CoopError::Serialization(e.to_string()))?;
        std::fs::write(&self.file, bytes)?;
        Ok(())
    }

    /// The backing file path.
    #[must_use]
    pub fn file(&self) -> &Path {
        &self.file
    }
}

// ---------------------------------------------------------------------------
// IoExecutor
// ---------------------------------------------------------------------------

enum Job {
    Write {
        file: PathBuf,
        path: String,
        node: Option<Node>,
        reply: oneshot::Sender<Result<()>>,
    },
    Read {
        file: PathBuf,
        path: String,
        reply: oneshot::Sender<Result<Option<Node>>>,
    },
}

/// Handle to the single document I/O worker.
///
/// All connector reads and writes drain through one task, strictly in
/// submission order. The worker keeps each touched document open for the
/// life of the process, so reads observe every previously submitted write.
#[derive(Clone, Debug)]
pub struct IoExecutor {
    tx: mpsc::UnboundedSender<Job>,
}

impl IoExecutor {
    /// Spawn the worker task and return a cloneable handle to it.
    ///
    /// Must be called from within a tokio runtime. The worker stops once
    /// every handle has been dropped and the queue is drained.
    #[must_use]
    pub fn spawn() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        tokio::spawn(async move {
            // Documents here are small; file access stays inline on the
            // worker rather than hopping to a blocking pool.
            let mut open: HashMap<PathBuf, DocumentStore> = HashMap::new();
            while let Some(job) = rx.recv().await {
                match job {
                    Job::Write {
                        file,
                        path,
                        node,
                        reply,
                    } => {
                        let store = open
                            .entry(file.clone())
                            .or_insert_with(|| DocumentStore::open(&file));
                        match node {
                            Some(node) => store.set(&path, node),
                            None => {
                                store.remove(&path);
                            }
                        }
                        let result = store.save();
                        if let Err(error) = &result {
                            warn!(file = %file.display(), %path, %error, "document write failed");
                        }
                        let _ = reply.send(result);
                    }
                    Job::Read { file, path, reply } => {
                        let store = open
                            .entry(file.clone())
                            .or_insert_with(|| DocumentStore::open(&file));
                        let _ = reply.send(Ok(store.get(&path).cloned()));
                    }
                }
            }
            debug!("document I/O worker stopped");
        });
        Self { tx }
    }

    /// Enqueue a write of `node` at `path` in `file`; `None` deletes the
    /// path. The job runs whether or not the ticket is awaited.
    pub fn submit_write(&self, file: PathBuf, path: String, node: Option<Node>) -> IoTicket<()> {
        let (reply, rx) = oneshot::channel();
        let job = Job::Write {
            file,
            path,
            node,
            reply,
        };
        if let Err(send_error) = self.tx.send(job) {
            if let Job::Write { reply, .. } = send_error.0 {
                let _ = reply.send(Err(CoopError::ChannelClosed {
                    channel: "document I/O worker",
                }));
            }
        }
        IoTicket { rx }
    }

    /// Enqueue a load of the node at `path` in `file`. Resolves `Ok(None)`
    /// when the path is absent.
    pub fn submit_read(&self, file: PathBuf, path: String) -> IoTicket<Option<Node>> {
        let (reply, rx) = oneshot::channel();
        let job = Job::Read { file, path, reply };
        if let Err(send_error) = self.tx.send(job) {
            if let Job::Read { reply, .. } = send_error.0 {
                let _ = reply.send(Err(CoopError::ChannelClosed {
                    channel: "document I/O worker",
                }));
            }
        }
        IoTicket { rx }
    }
}

/// Receipt for an enqueued I/O job.
///
/// Await [`IoTicket::wait`] for the outcome, or drop the ticket to
/// fire-and-forget — the job runs either way.
#[derive(Debug)]
pub struct IoTicket<T> {
    rx: oneshot::Receiver<Result<T>>,
}

impl<T> IoTicket<T> {
    /// Wait for the job to complete.
    ///
    /// # Errors
    ///
    /// Returns the job's own error, or [`CoopError::ChannelClosed`] if the
    /// worker stopped before completing it.
    pub async fn wait(self) -> Result<T> {
        self.rx.await.map_err(|_| CoopError::ChannelClosed {
            channel: "document I/O worker",
        })?
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
