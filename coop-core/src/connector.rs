//! Storage connectors: the bridge between in-memory entities and persisted
//! document nodes.
//!
//! A [`Codec`] maps an entity to and from a [`Node`]; a [`StorageConnector`]
//! binds a codec to a file + dot path and routes every read/write through
//! the shared [`IoExecutor`] worker.

use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::warn;

use crate::error::{CoopError, Result};
use crate::store::{IoExecutor, IoTicket, Node};

// ---------------------------------------------------------------------------
// Codec
// ---------------------------------------------------------------------------

/// Bidirectional mapping between an entity and a document node.
pub trait Codec<T>: Send + Sync {
    /// Encode the entity into a document node. Pure: must not mutate or
    /// observe anything beyond `value`.
    fn serialize(&self, value: &T) -> Node;

    /// Decode an entity from a document node.
    ///
    /// Fails closed: unparseable structure yields either a well-defined
    /// default entity or [`CoopError::Deserialization`]. Absent optional
    /// sub-fields with sane defaults must not error.
    ///
    /// # Errors
    ///
    /// Returns [`CoopError::Deserialization`] when no sane default exists.
    fn deserialize(&self, node: &Node) -> Result<T>;
}

/// Codec for any serde-representable entity.
pub struct SerdeCodec<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> SerdeCodec<T> {
    /// Create the codec.
    #[must_use]
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for SerdeCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Serialize + DeserializeOwned + Send + Sync> Codec<T> for SerdeCodec<T> {
    fn serialize(&self, value: &T) -> Node {
        serde_json::to_value(value).unwrap_or_else(|error| {
            // Entities in this crate encode infallibly; anything else is a
            // bug worth a loud log, not a crash in a persistence path.
            warn!(%error, "entity failed to encode; persisting null");
            Value::Null
        })
    }

    fn deserialize(&self, node: &Node) -> Result<T> {
        serde_json::from_value(node.clone()).map_err(|e| CoopError::Deserialization(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// StorageConnector
// ---------------------------------------------------------------------------

/// Connects one entity type to one dot path within one document file.
pub struct StorageConnector<T> {
    io: IoExecutor,
    file: PathBuf,
    path: String,
    codec: Arc<dyn Codec<T>>,
}

impl<T> Clone for StorageConnector<T> {
    fn clone(&self) -> Self {
        Self {
            io: self.io.clone(),
            file: self.file.clone(),
            path: self.path.clone(),
            codec: Arc::clone(&self.codec),
        }
    }
}

impl<T> std::fmt::Debug for StorageConnector<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageConnector")
            .field("file", &self.file)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl<T> StorageConnector<T> {
    /// Bind `codec` to `path` within `file`, routed through `io`.
    pub fn new(
        io: IoExecutor,
        file: impl Into<PathBuf>,
        path: impl Into<String>,
        codec: Arc<dyn Codec<T>>,
    ) -> Self {
        Self {
            io,
            file: file.into(),
            path: path.into(),
            codec,
        }
    }

    /// Schedule an asynchronous persist of `value`; `None` deletes the path.
    ///
    /// Encoding happens eagerly on the caller; the returned ticket may be
    /// awaited or dropped (fire-and-forget).
    pub fn write(&self, value: Option<&T>) -> IoTicket<()> {
        let node = value.map(|v| self.codec.serialize(v));
        self.io
            .submit_write(self.file.clone(), self.path.clone(), node)
    }

    /// Schedule an asynchronous load and decode it.
    ///
    /// Resolves `Ok(None)` when the path is absent.
    ///
    /// # Errors
    ///
    /// Returns the codec's [`CoopError::Deserialization`] on corrupt data,
    /// or [`CoopError::ChannelClosed`] if the I/O worker stopped.
    pub async fn read(&self) -> Result<Option<T>> {
        let node = self
            .io
            .submit_read(self.file.clone(), self.path.clone())
            .wait()
            .await?;
        match node {
            Some(node) => Ok(Some(self.codec.deserialize(&node)?)),
            None => Ok(None),
        }
    }

    /// The dot path this connector addresses.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The document file this connector writes into.
    #[must_use]
    pub fn file(&self) -> &Path {
        &self.file
    }
}

impl<T: Serialize + DeserializeOwned + Send + Sync + 'static> StorageConnector<T> {
    /// Convenience constructor using [`SerdeCodec`].
    pub fn serde(io: IoExecutor, file: impl Into<PathBuf>, path: impl Into<String>) -> Self {
        Self::new(io, file, path, Arc::new(SerdeCodec::new()))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
