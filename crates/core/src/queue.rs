use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::thread;

use rusqlite::Connection;

use crate::error::{Error, Result};

/// Default number of writes that may wait in the queue before submitters block.
pub const DEFAULT_CAPACITY: usize = 100;

type Job = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

/// Ordered, bounded, single-consumer queue of store mutations.
///
/// The consumer thread owns the only write connection, so at most one unit of
/// work touches the store at a time and units run in submission order. A full
/// queue blocks the submitter rather than dropping the write.
#[derive(Clone)]
pub struct WriteQueue {
    tx: SyncSender<Job>,
}

impl WriteQueue {
    /// Spawn the consumer thread and hand it `conn`.
    pub fn start(conn: Connection, capacity: usize) -> Result<Self> {
        let (tx, rx) = mpsc::sync_channel::<Job>(capacity.max(1));
        thread::Builder::new()
            .name("photo-db-writer".to_string())
            .spawn(move || consume(conn, rx))?;
        Ok(Self { tx })
    }

    /// Fire-and-forget submission. A failure of `work` is logged and dropped.
    pub fn submit<F>(&self, work: F) -> Result<()>
    where
        F: FnOnce(&mut Connection) -> Result<()> + Send + 'static,
    {
        let job: Job = Box::new(move |conn| {
            if let Err(e) = work(conn) {
                tracing::warn!(error = %e, "asynchronous write failed");
            }
        });
        self.tx.send(job).map_err(|_| Error::QueueClosed)
    }

    /// Submit `work` and block until the consumer has applied it.
    pub fn submit_sync<T, F>(&self, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let (reply_tx, reply_rx) = mpsc::sync_channel(1);
        let job: Job = Box::new(move |conn| {
            // The submitter may have given up; nothing to do then.
            let _ = reply_tx.send(work(conn));
        });
        self.tx.send(job).map_err(|_| Error::QueueClosed)?;

        reply_rx.recv().unwrap_or_else(|_| {
            Err(Error::StoreWrite(
                "write aborted before reporting a result".to_string(),
            ))
        })
    }
}

fn consume(mut conn: Connection, rx: Receiver<Job>) {
    for job in rx {
        if panic::catch_unwind(AssertUnwindSafe(|| job(&mut conn))).is_err() {
            tracing::error!("queued write panicked, continuing with the next one");
        }
    }
    tracing::debug!("all write queue handles dropped, writer exiting");
}
