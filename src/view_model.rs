//! Reactive view state for the notes screens.
//!
//! [`NoteViewModel`] mirrors the live notes-with-tags query, runs a
//! debounced search pipeline, and exposes fire-and-forget mutations. The
//! presentation layer reads state through `watch` receivers and never
//! touches the store directly.
//!
//! Search is latest-wins. A new query restarts the quiet period. When a
//! debounced query is dispatched, the previous search's live query is
//! dropped and its generation retired, so older results are never
//! published.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::{oneshot, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;

use crate::config::{Config, DEFAULT_SEARCH_DEBOUNCE_MS};
use crate::dao::NoteDao;
use crate::error::{NoteError, NoteResult};
use crate::models::{NewNote, NewTag, Note, NoteId, NoteTagCrossRef, NoteWithTags, Tag, TagId};
use crate::observe::LiveQuery;
use crate::validation::{is_blank_note, validate_search_query};

/// Tunables for a view model
#[derive(Debug, Clone)]
pub struct ViewModelOptions {
    /// Quiet period before a typed query is dispatched
    pub search_debounce: Duration,
}

impl Default for ViewModelOptions {
    fn default() -> Self {
        Self {
            search_debounce: Duration::from_millis(DEFAULT_SEARCH_DEBOUNCE_MS),
        }
    }
}

impl From<&Config> for ViewModelOptions {
    fn from(config: &Config) -> Self {
        Self {
            search_debounce: config.search_debounce(),
        }
    }
}

/// Published search state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchResults {
    /// Increments on every dispatched query; 0 before the first one
    pub generation: u64,
    /// The query these results belong to
    pub query: String,
    pub notes: Vec<NoteWithTags>,
}

/// Completion handle for a mutation that is already running.
///
/// Dropping the handle does not cancel the mutation.
#[must_use = "dropping the handle is fine, but then failures are only visible via last_error()"]
pub struct MutationHandle<T> {
    rx: oneshot::Receiver<NoteResult<T>>,
}

impl<T> MutationHandle<T> {
    fn ready(result: NoteResult<T>) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(result);
        Self { rx }
    }

    /// Wait for the mutation to finish.
    ///
    /// Returns `NoteError::Closed` if the view model was closed first.
    pub async fn wait(self) -> NoteResult<T> {
        self.rx.await.unwrap_or(Err(NoteError::Closed))
    }
}

/// The search currently feeding `search_results`
struct ActiveSearch {
    generation: u64,
    query: String,
    live: LiveQuery<Vec<NoteWithTags>>,
}

/// View state shared with the presentation layer
pub struct NoteViewModel {
    dao: NoteDao,
    runtime: Handle,
    notes_with_tags: Arc<watch::Sender<Vec<NoteWithTags>>>,
    search_results: Arc<watch::Sender<SearchResults>>,
    last_error: Arc<watch::Sender<Option<String>>>,
    search_query: watch::Sender<String>,
    background: Vec<JoinHandle<()>>,
    mutations: Mutex<JoinSet<()>>,
    closed: AtomicBool,
}

impl NoteViewModel {
    /// Start the view model on the current tokio runtime.
    ///
    /// Begins mirroring all notes with their tags immediately.
    pub fn new(dao: NoteDao, options: ViewModelOptions) -> NoteResult<Self> {
        let runtime = Handle::try_current().map_err(|_| {
            NoteError::Other("NoteViewModel must be created inside a tokio runtime".to_string())
        })?;

        let (notes_tx, _) = watch::channel(Vec::new());
        let notes_with_tags = Arc::new(notes_tx);
        let (search_tx, _) = watch::channel(SearchResults::default());
        let search_results = Arc::new(search_tx);
        let (error_tx, _) = watch::channel(None);
        let last_error = Arc::new(error_tx);
        let (search_query, query_rx) = watch::channel(String::new());

        let mirror = {
            let mut live = dao.get_notes_with_tags();
            let target = notes_with_tags.clone();
            let errors = last_error.clone();
            runtime.spawn(async move {
                while let Some(result) = live.next().await {
                    match result {
                        Ok(notes) => {
                            target.send_if_modified(|shown| replace_if_changed(shown, notes));
                        }
                        Err(e) => report_error(&errors, "notes_with_tags", &e),
                    }
                }
            })
        };

        let pipeline = runtime.spawn(run_search_pipeline(
            dao.clone(),
            query_rx,
            search_results.clone(),
            last_error.clone(),
            options.search_debounce,
        ));

        tracing::info!(
            "Note view model started (search debounce {:?})",
            options.search_debounce
        );

        Ok(Self {
            dao,
            runtime,
            notes_with_tags,
            search_results,
            last_error,
            search_query,
            background: vec![mirror, pipeline],
            mutations: Mutex::new(JoinSet::new()),
            closed: AtomicBool::new(false),
        })
    }

    // ========================================================================
    // Observable state
    // ========================================================================

    /// All notes with their tags, most recently updated first
    pub fn notes_with_tags(&self) -> watch::Receiver<Vec<NoteWithTags>> {
        self.notes_with_tags.subscribe()
    }

    /// Results for the latest debounced search query
    pub fn search_results(&self) -> watch::Receiver<SearchResults> {
        self.search_results.subscribe()
    }

    /// The most recent failure of a mutation, the notes mirror or the active
    /// search, for display as an error state
    pub fn last_error(&self) -> watch::Receiver<Option<String>> {
        self.last_error.subscribe()
    }

    pub fn clear_error(&self) {
        self.last_error.send_replace(None);
    }

    /// One note with its tags, kept up to date
    pub fn observe_note(&self, note_id: NoteId) -> LiveQuery<Option<NoteWithTags>> {
        let _guard = self.runtime.enter();
        self.dao.observe_note_with_tags(note_id)
    }

    /// All tags ordered by name, kept up to date
    pub fn observe_tags(&self) -> LiveQuery<Vec<Tag>> {
        let _guard = self.runtime.enter();
        self.dao.get_all_tags()
    }

    /// Point read for callers that need a note before editing it
    pub async fn get_note_with_tags(&self, note_id: NoteId) -> NoteResult<Option<NoteWithTags>> {
        self.dao.get_note_with_tags(note_id).await
    }

    // ========================================================================
    // Search
    // ========================================================================

    /// Feed a new query into the debounced search pipeline
    pub fn search(&self, query: impl Into<String>) {
        let query = query.into();
        if let Err(e) = validate_search_query(&query) {
            tracing::warn!("Rejected search query: {}", e);
            self.last_error.send_replace(Some(e.to_string()));
            return;
        }
        self.search_query.send_replace(query);
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Add a note unless both title and content are blank.
    ///
    /// Resolves to the new id, or `None` when nothing was added.
    pub fn add_note(
        &self,
        title: impl Into<String>,
        content: impl Into<String>,
    ) -> MutationHandle<Option<NoteId>> {
        let note = NewNote::new(title, content);
        if is_blank_note(&note.title, &note.content) {
            tracing::debug!("Ignoring blank note");
            return MutationHandle::ready(Ok(None));
        }
        self.spawn_mutation("add_note", move |dao| async move {
            dao.insert_note(note).await.map(Some)
        })
    }

    pub fn insert(&self, note: NewNote) -> MutationHandle<NoteId> {
        self.spawn_mutation("insert_note", move |dao| async move {
            dao.insert_note(note).await
        })
    }

    pub fn update(&self, note: Note) -> MutationHandle<()> {
        self.spawn_mutation("update_note", move |dao| async move {
            dao.update_note(note).await
        })
    }

    pub fn delete(&self, note: Note) -> MutationHandle<()> {
        self.spawn_mutation("delete_note", move |dao| async move {
            dao.delete_note(&note).await
        })
    }

    pub fn delete_by_id(&self, note_id: NoteId) -> MutationHandle<()> {
        self.spawn_mutation("delete_note", move |dao| async move {
            dao.delete_note_by_id(note_id).await
        })
    }

    pub fn delete_all_notes(&self) -> MutationHandle<usize> {
        self.spawn_mutation("delete_all_notes", |dao| async move {
            dao.delete_all_notes().await
        })
    }

    /// Replace a note's title and content, keeping its tags.
    ///
    /// Resolves to false if the note does not exist.
    pub fn update_note_content(
        &self,
        note_id: NoteId,
        title: impl Into<String>,
        content: impl Into<String>,
    ) -> MutationHandle<bool> {
        let title = title.into();
        let content = content.into();
        self.spawn_mutation("update_note_content", move |dao| async move {
            let Some(current) = dao.get_note_with_tags(note_id).await? else {
                return Ok(false);
            };
            dao.update_note(current.note.with_text(title, content)).await?;
            Ok(true)
        })
    }

    pub fn insert_tag(&self, tag: NewTag) -> MutationHandle<TagId> {
        self.spawn_mutation("insert_tag", move |dao| async move {
            dao.insert_tag(tag).await
        })
    }

    pub fn update_tag(&self, tag: Tag) -> MutationHandle<()> {
        self.spawn_mutation("update_tag", move |dao| async move {
            dao.update_tag(tag).await
        })
    }

    pub fn delete_tag(&self, tag: Tag) -> MutationHandle<()> {
        self.spawn_mutation("delete_tag", move |dao| async move {
            dao.delete_tag(&tag).await
        })
    }

    pub fn delete_tag_by_id(&self, tag_id: TagId) -> MutationHandle<()> {
        self.spawn_mutation("delete_tag", move |dao| async move {
            dao.delete_tag_by_id(tag_id).await
        })
    }

    /// Resolves to false if the note already had the tag
    pub fn add_tag_to_note(&self, note_id: NoteId, tag_id: TagId) -> MutationHandle<bool> {
        self.spawn_mutation("add_tag_to_note", move |dao| async move {
            dao.insert_association(NoteTagCrossRef::new(note_id, tag_id))
                .await
        })
    }

    /// Resolves to false if the note did not have the tag
    pub fn remove_tag_from_note(&self, note_id: NoteId, tag_id: TagId) -> MutationHandle<bool> {
        self.spawn_mutation("remove_tag_from_note", move |dao| async move {
            dao.delete_association(NoteTagCrossRef::new(note_id, tag_id))
                .await
        })
    }

    fn spawn_mutation<T, F, Fut>(&self, op: &'static str, f: F) -> MutationHandle<T>
    where
        T: Send + 'static,
        F: FnOnce(NoteDao) -> Fut,
        Fut: Future<Output = NoteResult<T>> + Send + 'static,
    {
        if self.closed.load(Ordering::Acquire) {
            return MutationHandle::ready(Err(NoteError::Closed));
        }

        let (tx, rx) = oneshot::channel();
        let work = f(self.dao.clone());
        let last_error = self.last_error.clone();

        let mut tasks = self.mutations.lock().unwrap_or_else(PoisonError::into_inner);
        // Reap finished mutations so the set does not grow without bound
        while tasks.try_join_next().is_some() {}
        tasks.spawn_on(
            async move {
                let result = work.await;
                if let Err(e) = &result {
                    report_error(&last_error, op, e);
                }
                let _ = tx.send(result);
            },
            &self.runtime,
        );

        MutationHandle { rx }
    }

    // ========================================================================
    // Teardown
    // ========================================================================

    /// Cancel the state mirror, the search pipeline and any running mutations.
    ///
    /// Later mutations resolve to `NoteError::Closed`. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        for task in &self.background {
            task.abort();
        }
        self.mutations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .abort_all();
        tracing::info!("Note view model closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Drop for NoteViewModel {
    fn drop(&mut self) {
        self.close();
    }
}

/// Log a failure and surface it as the current error state
fn report_error(last_error: &watch::Sender<Option<String>>, op: &str, err: &NoteError) {
    match err {
        NoteError::Database(_) => tracing::error!("{} failed: {}", op, err),
        // Already logged where the query ran
        NoteError::LiveQuery { .. } => {}
        _ => tracing::warn!("{} failed: {}", op, err),
    }
    last_error.send_replace(Some(format!("{}: {}", op, err)));
}

/// Overwrite `slot` unless it already holds `value`; returns whether it changed
fn replace_if_changed<T: PartialEq>(slot: &mut T, value: T) -> bool {
    if *slot == value {
        return false;
    }
    *slot = value;
    true
}

/// Publish search results that belong to `current_generation`.
///
/// Results of a retired generation are dropped, and identical results are
/// not re-sent. Returns whether receivers were notified.
fn publish_search(
    target: &watch::Sender<SearchResults>,
    current_generation: u64,
    results: SearchResults,
) -> bool {
    if results.generation != current_generation {
        tracing::debug!("Discarding stale search results for {:?}", results.query);
        return false;
    }
    target.send_if_modified(|shown| replace_if_changed(shown, results))
}

/// Debounce queries, dispatch them as live searches, and publish only the
/// results of the current generation.
async fn run_search_pipeline(
    dao: NoteDao,
    mut queries: watch::Receiver<String>,
    results: Arc<watch::Sender<SearchResults>>,
    last_error: Arc<watch::Sender<Option<String>>>,
    debounce: Duration,
) {
    let mut pending = false;
    let mut deadline = Instant::now();
    let mut last_dispatched: Option<String> = None;
    let mut generation: u64 = 0;
    let mut active: Option<ActiveSearch> = None;

    loop {
        tokio::select! {
            changed = queries.changed() => {
                if changed.is_err() {
                    break;
                }
                pending = true;
                deadline = Instant::now() + debounce;
            }
            _ = tokio::time::sleep_until(deadline), if pending => {
                pending = false;
                let query = queries.borrow_and_update().clone();
                if last_dispatched.as_deref() == Some(query.as_str()) {
                    continue;
                }
                last_dispatched = Some(query.clone());
                generation += 1;
                // Dropping the superseded search aborts it
                active = None;

                if query.trim().is_empty() {
                    publish_search(&results, generation, SearchResults {
                        generation,
                        query,
                        notes: Vec::new(),
                    });
                } else {
                    tracing::debug!("Dispatching search {:?} (generation {})", query, generation);
                    let live = dao.search_notes_with_tags(query.clone());
                    active = Some(ActiveSearch { generation, query, live });
                }
            }
            (search_generation, query, emission) = next_search_emission(&mut active) => {
                match emission {
                    Ok(notes) => {
                        publish_search(&results, generation, SearchResults {
                            generation: search_generation,
                            query,
                            notes,
                        });
                    }
                    Err(e) if search_generation == generation => {
                        report_error(&last_error, "search", &e);
                    }
                    Err(_) => {}
                }
            }
        }
    }
}

/// Next emission of the active search; pending forever when there is none
async fn next_search_emission(
    active: &mut Option<ActiveSearch>,
) -> (u64, String, NoteResult<Vec<NoteWithTags>>) {
    if let Some(search) = active.as_mut() {
        if let Some(emission) = search.live.next().await {
            return (search.generation, search.query.clone(), emission);
        }
        // The live query stopped; wait for the next dispatch instead
        *active = None;
    }
    std::future::pending().await
}
