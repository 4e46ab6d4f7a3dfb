//! Backpressure-aware byte stream buffers.
//!
//! A [`StreamBuffer`] is a growable, length-capped FIFO of bytes guarded by
//! its own lock. Producers push and consumers pull independently. When a push
//! would exceed the cap, the oldest bytes are evicted first so the buffer
//! lands a slack margin below the cap, rather than trimming on every call.

mod capture;

pub use capture::StreamCapture;

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytesize::ByteSize;
use log::{debug, error, info, trace};

#[cfg(feature = "serde-support")]
use serde::{Deserialize, Serialize};

use crate::registry::{Named, Registry};

/// Cap applied when a buffer is initialized with a maximum of 0
pub const DEFAULT_MAX_LEN: usize = 4096;

/// Extra bytes evicted past the cap on overflow
pub const DEFAULT_SLACK: usize = 1024;

struct State {
    data: Vec<u8>,
    max_len: usize,
    initialized: bool,
}

/// Named, bounded byte queue with drop-oldest overflow
pub struct StreamBuffer {
    name: String,
    slack: usize,
    state: Mutex<State>,
}

impl fmt::Debug for StreamBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamBuffer")
            .field("name", &self.name)
            .field("size", &self.size())
            .field("max_len", &self.max_len())
            .finish()
    }
}

impl StreamBuffer {
    /// Create an uninitialized buffer; pushes are refused until [`init`](Self::init)
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            slack: DEFAULT_SLACK,
            state: Mutex::new(State {
                data: Vec::new(),
                max_len: 0,
                initialized: false,
            }),
        }
    }

    /// Override the overflow slack margin
    #[must_use]
    pub const fn with_slack(mut self, slack: usize) -> Self {
        self.slack = slack;
        self
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// (Re)initialize: empty the buffer and set its cap
    ///
    /// A `max_len` of 0 keeps a previously configured cap, or applies
    /// [`DEFAULT_MAX_LEN`] if none was ever set.
    pub fn init(&self, max_len: usize) {
        let mut state = self.lock();
        state.data = Vec::new();
        if max_len > 0 {
            state.max_len = max_len;
        }
        if state.max_len == 0 {
            state.max_len = DEFAULT_MAX_LEN;
        }
        state.initialized = true;
    }

    /// Append bytes, evicting the oldest ones if the cap would be exceeded
    ///
    /// Returns the number of bytes taken from `data`: all of them on success,
    /// 0 if the buffer was never initialized or storage could not grow.
    pub fn push(&self, data: &[u8]) -> usize {
        let mut state = self.lock();
        if !state.initialized {
            error!("Stream {} push before init", self.name);
            return 0;
        }
        if data.is_empty() {
            return 0;
        }

        let max_len = state.max_len;
        let target = if max_len > self.slack {
            max_len - self.slack
        } else {
            max_len
        };
        let combined = state.data.len() + data.len();
        let mut incoming = data;

        if combined > max_len {
            let evict = combined - target;
            trace!(
                "Stream {} skipped {}/{} bytes",
                self.name,
                evict.min(combined),
                combined
            );
            if evict <= state.data.len() {
                state.data.drain(..evict);
            } else {
                // The incoming chunk alone overflows: keep only its newest bytes.
                state.data.clear();
                incoming = &data[data.len() - target..];
            }
        } else if combined > target {
            debug!("Stream {} near cap {}/{} bytes", self.name, combined, max_len);
        }

        if state.data.try_reserve_exact(incoming.len()).is_err() {
            error!(
                "Stream {} not enough memory to push {} bytes",
                self.name,
                incoming.len()
            );
            return 0;
        }
        state.data.extend_from_slice(incoming);
        data.len()
    }

    /// Move up to `dest.len()` bytes from the front of the buffer into `dest`
    ///
    /// Bytes not copied stay queued for the next call. Backing storage shrinks
    /// to the remaining length and is released once the buffer drains.
    pub fn pull(&self, dest: &mut [u8]) -> usize {
        let mut state = self.lock();
        if !state.initialized {
            return 0;
        }
        let count = dest.len().min(state.data.len());
        dest[..count].copy_from_slice(&state.data[..count]);
        if count == state.data.len() {
            state.data = Vec::new();
        } else {
            state.data.drain(..count);
            state.data.shrink_to_fit();
        }
        count
    }

    /// Pull into a freshly allocated vector of at most `max` bytes
    pub fn pull_vec(&self, max: usize) -> Vec<u8> {
        let mut chunk = vec![0u8; max.min(self.size())];
        let count = self.pull(&mut chunk);
        chunk.truncate(count);
        chunk
    }

    /// Drop every queued byte, keeping the cap
    pub fn clear(&self) {
        self.lock().data = Vec::new();
    }

    /// Number of queued bytes
    pub fn size(&self) -> usize {
        self.lock().data.len()
    }

    /// Configured cap, 0 before initialization
    pub fn max_len(&self) -> usize {
        self.lock().max_len
    }

    /// Room left before the cap
    ///
    /// `None` means unknown: the buffer was never initialized.
    pub fn free_space(&self) -> Option<usize> {
        let state = self.lock();
        if !state.initialized || state.max_len == 0 {
            return None;
        }
        state.max_len.checked_sub(state.data.len())
    }

    pub fn is_initialized(&self) -> bool {
        self.lock().initialized
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Named for StreamBuffer {
    fn name(&self) -> &str {
        &self.name
    }
}

/// Registry of stream buffers, used by operational tooling
pub type StreamRegistry = Registry<StreamBuffer>;

impl Registry<StreamBuffer> {
    /// Initialize a buffer and list it, idempotently
    ///
    /// A full registry only hides the buffer from listings; the buffer
    /// itself is usable either way.
    pub fn init_stream(&self, stream: &Arc<StreamBuffer>, max_len: usize) {
        stream.init(max_len);
        if let Err(err) = self.register(stream) {
            debug!("Stream {} not listed: {}", stream.name(), err);
        }
    }

    /// Snapshot of every listed buffer
    pub fn report(&self) -> StreamReport {
        let streams = self
            .entries()
            .iter()
            .map(|stream| StreamInfo {
                name: stream.name().to_string(),
                size: stream.size(),
                max_len: stream.max_len(),
            })
            .collect::<Vec<_>>();
        StreamReport {
            listed: streams.len(),
            total: self.total(),
            streams,
        }
    }

    /// Write the report to the log, one line per buffer
    pub fn log_list(&self) {
        for line in self.report().to_string().lines() {
            info!("{line}");
        }
    }
}

/// One line of the stream listing
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde-support", derive(Serialize, Deserialize))]
pub struct StreamInfo {
    pub name: String,
    pub size: usize,
    pub max_len: usize,
}

/// Stream listing with registry counters
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde-support", derive(Serialize, Deserialize))]
pub struct StreamReport {
    pub listed: usize,
    pub total: usize,
    pub streams: Vec<StreamInfo>,
}

impl fmt::Display for StreamReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Streams in list {}. Streams Total {}.",
            self.listed, self.total
        )?;
        for (index, stream) in self.streams.iter().enumerate() {
            writeln!(
                f,
                "Stream[{:2}] Name:{:>16}|Size:{:>5}/{:>5} bytes ({} of {})",
                index,
                stream.name,
                stream.size,
                stream.max_len,
                ByteSize::b(stream.size as u64),
                ByteSize::b(stream.max_len as u64)
            )?;
        }
        Ok(())
    }
}
