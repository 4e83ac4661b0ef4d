//! Single-writer actor: all mutations run sequentially on one connection,
//! each job inside its own transaction.

use diesel::sqlite::SqliteConnection;
use diesel::Connection;
use tokio::sync::{mpsc, oneshot};

use lmsbridge_core::{Error, Result};

use super::DbPool;
use crate::errors::StorageError;

type Job = Box<dyn FnOnce(&mut SqliteConnection) + Send + 'static>;

/// Error carried out of a diesel transaction closure.
#[derive(Debug)]
pub(crate) enum WriteError {
    Domain(Error),
    Diesel(diesel::result::Error),
}

impl From<diesel::result::Error> for WriteError {
    fn from(err: diesel::result::Error) -> Self {
        Self::Diesel(err)
    }
}

impl From<WriteError> for Error {
    fn from(err: WriteError) -> Self {
        match err {
            WriteError::Domain(e) => e,
            WriteError::Diesel(e) => StorageError::from(e).into(),
        }
    }
}

#[derive(Clone)]
pub struct WriteHandle {
    tx: mpsc::UnboundedSender<Job>,
}

/// Start the writer thread. It owns one pooled connection for its lifetime.
pub fn spawn_writer(pool: DbPool) -> WriteHandle {
    let (tx, mut rx) = mpsc::unbounded_channel::<Job>();

    let spawned = std::thread::Builder::new()
        .name("lmsbridge-db-writer".to_string())
        .spawn(move || {
            let mut conn = match pool.get() {
                Ok(conn) => conn,
                Err(e) => {
                    log::error!("[Storage] Writer could not acquire a connection: {}", e);
                    return;
                }
            };
            while let Some(job) = rx.blocking_recv() {
                job(&mut *conn);
            }
            log::debug!("[Storage] Writer stopped");
        });
    if let Err(e) = spawned {
        log::error!("[Storage] Failed to start writer thread: {}", e);
    }

    WriteHandle { tx }
}

impl WriteHandle {
    /// Run `job` on the writer connection inside a transaction.
    pub async fn exec<F, T>(&self, job: F) -> Result<T>
    where
        F: FnOnce(&mut SqliteConnection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel::<Result<T>>();
        let boxed: Job = Box::new(move |conn: &mut SqliteConnection| {
            let outcome = conn
                .transaction::<T, WriteError, _>(|tx_conn| job(tx_conn).map_err(WriteError::Domain))
                .map_err(Error::from);
            let _ = reply_tx.send(outcome);
        });

        self.tx
            .send(boxed)
            .map_err(|_| StorageError::WriterClosed)?;
        reply_rx.await.map_err(|_| StorageError::WriterClosed)?
    }
}
