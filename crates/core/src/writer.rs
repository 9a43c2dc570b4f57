//! Background session persistence.
//!
//! Every submission is a full snapshot, so the worker only ever needs the most
//! recent one: snapshots queued while a write is in progress are coalesced and
//! the last one wins.

use doc_model::SessionState;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use stitch_storage::{FilesRecord, Storage, StorageError};

/// Full session contents to persist. `files` is only attached when the set of
/// open documents changed.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub files: Option<FilesRecord>,
}

impl SessionSnapshot {
    /// Folds a newer snapshot into this one, keeping the newest files payload.
    fn merge(&mut self, newer: SessionSnapshot) {
        self.state = newer.state;
        if newer.files.is_some() {
            self.files = newer.files;
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WriterError {
    #[error("session writer has stopped")]
    Stopped,
    #[error("failed to persist session: {0}")]
    Storage(#[from] StorageError),
}

enum Message {
    Write(SessionSnapshot),
    Flush(Sender<Option<StorageError>>),
}

/// Owns the persistence thread. Dropping the writer drains pending snapshots
/// and joins the thread.
pub struct SessionWriter {
    sender: Option<Sender<Message>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl SessionWriter {
    pub fn spawn(storage: Storage) -> Self {
        let (sender, receiver) = mpsc::channel();
        let handle = thread::Builder::new()
            .name("session-writer".to_owned())
            .spawn(move || run(storage, receiver))
            .map_err(|err| tracing::error!(%err, "failed to start session writer"))
            .ok();

        Self { sender: handle.as_ref().map(|_| sender), handle }
    }

    /// Queues a snapshot without waiting for it to reach disk.
    pub fn submit(&self, snapshot: SessionSnapshot) {
        let Some(sender) = &self.sender else {
            tracing::warn!("session writer unavailable, snapshot dropped");
            return;
        };
        if sender.send(Message::Write(snapshot)).is_err() {
            tracing::warn!("session writer stopped, snapshot dropped");
        }
    }

    /// Blocks until every snapshot submitted so far is on disk.
    ///
    /// Reports the first write failure since the previous flush.
    pub fn flush(&self) -> Result<(), WriterError> {
        let sender = self.sender.as_ref().ok_or(WriterError::Stopped)?;
        let (reply, done) = mpsc::channel();
        sender.send(Message::Flush(reply)).map_err(|_| WriterError::Stopped)?;

        match done.recv() {
            Ok(None) => Ok(()),
            Ok(Some(err)) => Err(err.into()),
            Err(_) => Err(WriterError::Stopped),
        }
    }
}

impl Drop for SessionWriter {
    fn drop(&mut self) {
        self.sender.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("session writer panicked");
            }
        }
    }
}

fn run(storage: Storage, receiver: Receiver<Message>) {
    let mut failure: Option<StorageError> = None;
    // Files payload from a failed write; resent with the next snapshot
    // that carries none of its own.
    let mut unsaved_files: Option<FilesRecord> = None;

    while let Ok(first) = receiver.recv() {
        let mut pending: Option<SessionSnapshot> = None;
        let mut waiters = Vec::new();

        let mut next = Some(first);
        while let Some(message) = next {
            match message {
                Message::Write(snapshot) => match &mut pending {
                    Some(existing) => existing.merge(snapshot),
                    None => pending = Some(snapshot),
                },
                Message::Flush(reply) => waiters.push(reply),
            }
            next = receiver.try_recv().ok();
        }

        if let Some(mut snapshot) = pending {
            if snapshot.files.is_none() {
                snapshot.files = unsaved_files.take();
            }
            if let Err(err) = write(&storage, &snapshot) {
                tracing::warn!(%err, "failed to persist session");
                failure.get_or_insert(err);
                unsaved_files = snapshot.files;
            } else {
                unsaved_files = None;
            }
        }

        for waiter in waiters {
            let _ = waiter.send(failure.take());
        }
    }
}

fn write(storage: &Storage, snapshot: &SessionSnapshot) -> Result<(), StorageError> {
    if let Some(files) = &snapshot.files {
        storage.save_files(files)?;
    }
    storage.save_state(&snapshot.state)?;
    tracing::trace!(docs = snapshot.state.docs.len(), "session persisted");
    Ok(())
}
