//! Live queries over the notes database.
//!
//! Every mutating data-access call publishes the set of tables it wrote to a
//! [`ChangeNotifier`]. A [`LiveQuery`] registers interest in a set of tables,
//! emits its initial result, and recomputes whenever one of those tables
//! changes. Each live query runs in its own task, so its emissions are
//! ordered and each one reflects every write completed before it was
//! computed. A failed computation is emitted too, so observers can show an
//! error state.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::error::{NoteError, NoteResult};

/// Tables a query can depend on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Notes,
    Tags,
    NoteTagCrossRef,
}

impl Table {
    fn bit(self) -> u8 {
        match self {
            Table::Notes => 1,
            Table::Tags => 1 << 1,
            Table::NoteTagCrossRef => 1 << 2,
        }
    }
}

/// A small set of tables
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct TableSet(u8);

impl TableSet {
    pub const fn empty() -> Self {
        TableSet(0)
    }

    pub fn of(tables: &[Table]) -> Self {
        tables.iter().fold(Self::empty(), |set, t| set.with(*t))
    }

    pub fn with(self, table: Table) -> Self {
        TableSet(self.0 | table.bit())
    }

    pub fn contains(self, table: Table) -> bool {
        self.0 & table.bit() != 0
    }

    pub fn intersects(self, other: TableSet) -> bool {
        self.0 & other.0 != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for TableSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tables: Vec<Table> = [Table::Notes, Table::Tags, Table::NoteTagCrossRef]
            .into_iter()
            .filter(|t| self.contains(*t))
            .collect();
        f.debug_set().entries(tables).finish()
    }
}

/// Buffered change events per subscriber before it is considered lagging
const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// Fans out table-change events to live queries.
#[derive(Clone)]
pub struct ChangeNotifier {
    tx: broadcast::Sender<TableSet>,
}

impl Default for ChangeNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeNotifier {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Publish that `tables` were written. No-op without subscribers.
    pub fn notify(&self, tables: TableSet) {
        if tables.is_empty() {
            return;
        }
        // An error only means nobody is listening
        let _ = self.tx.send(tables);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TableSet> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// Latest outcome of a live query; `None` until the first computation ends
pub type LiveState<T> = Option<Result<T, Arc<NoteError>>>;

/// Handle to a continuously recomputed query result.
///
/// Dropping the handle stops the background task.
pub struct LiveQuery<T> {
    name: &'static str,
    rx: watch::Receiver<LiveState<T>>,
    task: JoinHandle<()>,
}

impl<T> LiveQuery<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Start a live query that depends on `tables`.
    ///
    /// `compute` produces a fresh snapshot each time it is called. A failed
    /// computation is logged and emitted as an error; the query stays
    /// subscribed. Must be called from within a tokio runtime.
    pub fn spawn<F, Fut>(
        name: &'static str,
        notifier: &ChangeNotifier,
        tables: TableSet,
        compute: F,
    ) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = NoteResult<T>> + Send + 'static,
    {
        let (tx, rx) = watch::channel(None);
        // Subscribe before the first computation so no write can slip between them
        let mut changes = notifier.subscribe();

        let task = tokio::spawn(async move {
            let publish = |result: NoteResult<T>| {
                if let Err(e) = &result {
                    tracing::error!("Live query {} failed to recompute: {}", name, e);
                }
                tx.send_replace(Some(result.map_err(Arc::new)));
            };

            publish(compute().await);

            loop {
                tokio::select! {
                    received = changes.recv() => match received {
                        Ok(changed) if changed.intersects(tables) => {
                            tracing::debug!("Live query {} recomputing after {:?}", name, changed);
                            publish(compute().await);
                        }
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!("Live query {} lagged by {} changes", name, skipped);
                            publish(compute().await);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    _ = tx.closed() => break,
                }
            }
        });

        Self { name, rx, task }
    }

    /// Wait for the next emission.
    ///
    /// The first call returns the initial result. A failed computation comes
    /// back as `NoteError::LiveQuery`. Returns `None` once the query has
    /// stopped.
    pub async fn next(&mut self) -> Option<NoteResult<T>> {
        let name = self.name;
        loop {
            self.rx.changed().await.ok()?;
            match &*self.rx.borrow_and_update() {
                Some(Ok(value)) => return Some(Ok(value.clone())),
                Some(Err(source)) => {
                    return Some(Err(NoteError::LiveQuery {
                        name,
                        source: source.clone(),
                    }))
                }
                None => {}
            }
        }
    }

    /// Latest successful result, without waiting.
    ///
    /// `None` before the first emission or while the latest computation
    /// failed.
    pub fn current(&self) -> Option<T> {
        match &*self.rx.borrow() {
            Some(Ok(value)) => Some(value.clone()),
            _ => None,
        }
    }

    /// A receiver that observes the same emissions
    pub fn receiver(&self) -> watch::Receiver<LiveState<T>> {
        self.rx.clone()
    }

    /// Stop recomputing. Existing receivers keep the last value.
    pub fn stop(&self) {
        self.task.abort();
    }
}

impl<T> Drop for LiveQuery<T> {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl<T> fmt::Debug for LiveQuery<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveQuery")
            .field("name", &self.name)
            .field("finished", &self.task.is_finished())
            .finish()
    }
}
