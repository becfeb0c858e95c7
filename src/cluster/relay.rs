//! Event relay
//!
//! Turns the manager's newline-delimited JSON event feed into numbered
//! frames for one SSE client. Each client gets its own upstream subscription;
//! nothing is buffered across connections.

use std::collections::VecDeque;
use std::fmt::Display;

use futures::stream::{self, BoxStream, Stream, StreamExt};
use tracing::{debug, warn};

use crate::client::{ManagerApi, EVENT_TYPES};

/// An event line longer than this fails the connection
pub const MAX_LINE_BYTES: usize = 4 * 1024 * 1024;

/// One frame for the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayFrame {
    /// An upstream event line, numbered from 1
    Event { id: u64, data: String },
    /// Terminal frame after an upstream failure
    Error { message: String },
}

/// Incremental line splitter.
///
/// Bytes after the last newline are carried over to the next chunk, so a
/// line (or a multi-byte character) split across chunks is reassembled.
#[derive(Debug, Default)]
pub struct LineAssembler {
    pending: Vec<u8>,
}

impl LineAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk, returning every completed non-empty line, trimmed
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw[..pos]);
            let line = line.trim();
            if !line.is_empty() {
                lines.push(line.to_string());
            }
        }
        lines
    }

    /// Bytes waiting for a newline
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_over_limit(&self) -> bool {
        self.pending.len() > MAX_LINE_BYTES
    }
}

struct RelayState<S> {
    upstream: S,
    assembler: LineAssembler,
    ready: VecDeque<RelayFrame>,
    next_id: u64,
    finished: bool,
}

/// Frame an upstream byte stream.
///
/// A read error, or a line growing past [`MAX_LINE_BYTES`], yields one
/// `Error` frame and ends the stream. End of the
/// upstream ends the stream without an error frame; an unterminated last
/// line is dropped.
pub fn relay_frames<S, B, E>(upstream: S) -> impl Stream<Item = RelayFrame>
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: Display,
{
    let state = RelayState {
        upstream,
        assembler: LineAssembler::new(),
        ready: VecDeque::new(),
        next_id: 1,
        finished: false,
    };

    stream::unfold(state, |mut st| async move {
        loop {
            if let Some(frame) = st.ready.pop_front() {
                return Some((frame, st));
            }
            if st.finished {
                return None;
            }

            match st.upstream.next().await {
                Some(Ok(chunk)) => {
                    for data in st.assembler.push(chunk.as_ref()) {
                        st.ready.push_back(RelayFrame::Event {
                            id: st.next_id,
                            data,
                        });
                        st.next_id += 1;
                    }
                    if st.assembler.is_over_limit() {
                        warn!(
                            pending = st.assembler.pending_len(),
                            "Upstream event line too long, closing relay"
                        );
                        st.finished = true;
                        st.ready.push_back(RelayFrame::Error {
                            message: format!("event line exceeds {} bytes", MAX_LINE_BYTES),
                        });
                    }
                }
                Some(Err(e)) => {
                    st.finished = true;
                    st.ready.push_back(RelayFrame::Error {
                        message: e.to_string(),
                    });
                }
                None => {
                    debug!(
                        relayed = st.next_id - 1,
                        dropped_bytes = st.assembler.pending_len(),
                        "Upstream event stream ended"
                    );
                    st.finished = true;
                }
            }
        }
    })
}

/// Subscribe to task, service and node events on the manager.
///
/// A failed subscription yields a stream holding a single `Error` frame.
pub async fn subscribe(manager: &dyn ManagerApi) -> BoxStream<'static, RelayFrame> {
    match manager.events(EVENT_TYPES).await {
        Ok(upstream) => relay_frames(upstream).boxed(),
        Err(e) => {
            warn!(error = %e, "Event subscription failed");
            stream::once(async move {
                RelayFrame::Error {
                    message: e.to_string(),
                }
            })
            .boxed()
        }
    }
}
