//! The depth sort running on its own thread, driven by messages.
//!
//! Buffers cross the thread boundary by move. The sending side never touches
//! a buffer after posting it, and the worker never shares its buffer back.

use crate::config::SortConfig;
use crate::error::SplatError;
use crate::ingest::IngestUpdate;
use crate::ply::import_ply;
use crate::row::rows_in;
use crate::scheduler::{SortScheduler, ViewRequest};
use crate::sort::DepthSorter;
use crate::structures::{SortedAttributes, ViewProj};
use std::collections::VecDeque;
use std::thread::{self, JoinHandle};
use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver, UnboundedSender};

#[derive(Debug)]
pub enum SortMessage {
    /// Replaces the splat buffer.
    Replace { buffer: Vec<u8>, vertex_count: usize },
    /// Appends completed rows; `vertex_count` is the new cumulative total.
    Extend { rows: Vec<u8>, vertex_count: usize },
    /// Adjusts the usable row count only.
    VertexCount(usize),
    /// Requests a sort against a new camera snapshot.
    View {
        view: ViewProj,
        max_splats: Option<usize>,
    },
    /// Raw PLY bytes to import in place of the current buffer.
    Ply(Vec<u8>),
}

impl From<IngestUpdate> for SortMessage {
    /// The first update of a load replaces whatever the worker held; later
    /// ones extend it.
    fn from(update: IngestUpdate) -> Self {
        if update.first {
            SortMessage::Replace {
                buffer: update.rows,
                vertex_count: update.vertex_count,
            }
        } else {
            SortMessage::Extend {
                rows: update.rows,
                vertex_count: update.vertex_count,
            }
        }
    }
}

#[derive(Debug)]
pub enum SortReply {
    Sorted(SortedAttributes),
    /// The converted rows of a PLY import, for the caller to keep or save.
    Imported { buffer: Vec<u8>, vertex_count: usize },
    ImportFailed(SplatError),
}

/// Worker-side state: the sorter plus the request scheduler.
struct WorkerState {
    sorter: DepthSorter,
    scheduler: SortScheduler,
    replies: UnboundedSender<SortReply>,
}

impl WorkerState {
    /// Applies one message. Returns a request when a sort should start now.
    fn handle(&mut self, message: SortMessage) -> Option<ViewRequest> {
        match message {
            SortMessage::Replace {
                buffer,
                vertex_count,
            } => {
                self.sorter.set_buffer(buffer, vertex_count);
                None
            }
            SortMessage::Extend { rows, vertex_count } => {
                self.sorter.extend(&rows, vertex_count);
                None
            }
            SortMessage::VertexCount(vertex_count) => {
                self.sorter.set_vertex_count(vertex_count);
                None
            }
            SortMessage::View { view, max_splats } => self.scheduler.request_sort(view, max_splats),
            SortMessage::Ply(bytes) => {
                let reply = match import_ply(&bytes) {
                    Ok(buffer) => {
                        let vertex_count = rows_in(buffer.len());
                        // The caller gets its own copy; the worker keeps sorting this one.
                        self.sorter.set_buffer(buffer.clone(), vertex_count);
                        SortReply::Imported {
                            buffer,
                            vertex_count,
                        }
                    }
                    Err(e) => {
                        log::error!("PLY import failed: {}", e);
                        SortReply::ImportFailed(e)
                    }
                };
                self.reply(reply);
                None
            }
        }
    }

    fn reply(&self, reply: SortReply) {
        if self.replies.send(reply).is_err() {
            log::warn!("Dropping sort reply, receiver is gone");
        }
    }

    fn run(mut self, mut inbox: UnboundedReceiver<SortMessage>) {
        while let Some(message) = inbox.blocking_recv() {
            let mut next = self.handle(message);
            while let Some(request) = next {
                if let Some(sorted) = self.sorter.sort(&request.view, request.max_splats) {
                    self.reply(SortReply::Sorted(sorted));
                }
                // Everything queued during the sort is applied before deciding
                // whether a newer snapshot needs another pass.
                loop {
                    match inbox.try_recv() {
                        Ok(message) => {
                            // Views are only recorded while a sort is in flight.
                            let _ = self.handle(message);
                        }
                        Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
                    }
                }
                next = self.scheduler.sort_finished();
            }
        }
        log::debug!("Sort worker exiting");
    }
}

/// Handle to a running sort worker thread.
///
/// Dropping the handle closes the inbox and joins the thread.
pub struct SortWorker {
    inbox: Option<UnboundedSender<SortMessage>>,
    replies: UnboundedReceiver<SortReply>,
    /// Non-sorted replies set aside by `latest_sorted`, delivered first.
    held: VecDeque<SortReply>,
    thread: Option<JoinHandle<()>>,
}

impl SortWorker {
    pub fn spawn(config: SortConfig) -> Result<Self, SplatError> {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel::<SortMessage>();
        let (reply_tx, reply_rx) = mpsc::unbounded_channel::<SortReply>();

        let state = WorkerState {
            sorter: DepthSorter::new(config),
            scheduler: SortScheduler::default(),
            replies: reply_tx,
        };
        let thread = thread::Builder::new()
            .name("splat-sort".to_string())
            .spawn(move || state.run(inbox_rx))?;

        Ok(Self {
            inbox: Some(inbox_tx),
            replies: reply_rx,
            held: VecDeque::new(),
            thread: Some(thread),
        })
    }

    pub fn send(&self, message: SortMessage) -> Result<(), SplatError> {
        self.inbox
            .as_ref()
            .ok_or(SplatError::WorkerClosed)?
            .send(message)
            .map_err(|_| SplatError::WorkerClosed)
    }

    pub fn replace_buffer(&self, buffer: Vec<u8>) -> Result<(), SplatError> {
        let vertex_count = rows_in(buffer.len());
        self.send(SortMessage::Replace {
            buffer,
            vertex_count,
        })
    }

    pub fn publish(&self, update: IngestUpdate) -> Result<(), SplatError> {
        self.send(update.into())
    }

    pub fn request_sort(&self, view: ViewProj, max_splats: Option<usize>) -> Result<(), SplatError> {
        self.send(SortMessage::View { view, max_splats })
    }

    pub fn import_ply(&self, bytes: Vec<u8>) -> Result<(), SplatError> {
        self.send(SortMessage::Ply(bytes))
    }

    /// Stops accepting messages. The worker finishes what is queued, sends
    /// its last replies and exits; `recv` then yields `None`.
    pub fn close(&mut self) {
        self.inbox.take();
    }

    /// Next reply if one is ready. Never blocks.
    pub fn try_recv(&mut self) -> Option<SortReply> {
        self.held.pop_front().or_else(|| self.replies.try_recv().ok())
    }

    /// Drains ready replies and keeps the newest sorted attributes. Import
    /// results stay queued for `try_recv`/`recv`.
    pub fn latest_sorted(&mut self) -> Option<SortedAttributes> {
        let mut latest = None;
        while let Ok(reply) = self.replies.try_recv() {
            match reply {
                SortReply::Sorted(sorted) => latest = Some(sorted),
                other => self.held.push_back(other),
            }
        }
        latest
    }

    pub async fn recv(&mut self) -> Option<SortReply> {
        if let Some(reply) = self.held.pop_front() {
            return Some(reply);
        }
        self.replies.recv().await
    }

    /// Blocks until a reply arrives. Must not be called from async context.
    pub fn recv_blocking(&mut self) -> Option<SortReply> {
        if let Some(reply) = self.held.pop_front() {
            return Some(reply);
        }
        self.replies.blocking_recv()
    }
}

impl Drop for SortWorker {
    fn drop(&mut self) {
        self.inbox.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("Sort worker thread panicked");
            }
        }
    }
}
