use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{info, warn};

use crate::graph::{load_graph, save_graph, GraphError, GraphStore, GRAPH_FILE_NAME};

/// Persisted knowledge graph with a single writer and snapshot readers.
///
/// Readers take an `Arc` snapshot and never block. Writers go through a
/// [`WriterSession`], which holds the writer lock until it commits or drops.
pub struct GraphRepository {
    path: PathBuf,
    snapshot: RwLock<Arc<GraphStore>>,
    writer: Mutex<()>,
}

impl GraphRepository {
    /// Open the graph stored in `dir`, or start empty when nothing is persisted yet
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, GraphError> {
        let path = dir.as_ref().join(GRAPH_FILE_NAME);
        let graph = if path.exists() {
            let graph = load_graph(&path)?;
            info!(
                path = %path.display(),
                nodes = graph.node_count(),
                edges = graph.edge_count(),
                "Graph loaded"
            );
            graph
        } else {
            info!(path = %path.display(), "No persisted graph, starting empty");
            GraphStore::new()
        };

        Ok(Self::with_graph(path, graph))
    }

    /// Repository for `dir` starting from an empty graph.
    ///
    /// A file already persisted there is not read; the first commit replaces it.
    pub fn open_empty(dir: impl AsRef<Path>) -> Self {
        let path = dir.as_ref().join(GRAPH_FILE_NAME);
        info!(path = %path.display(), "Starting from an empty graph");
        Self::with_graph(path, GraphStore::new())
    }

    fn with_graph(path: PathBuf, graph: GraphStore) -> Self {
        Self {
            path,
            snapshot: RwLock::new(Arc::new(graph)),
            writer: Mutex::new(()),
        }
    }

    /// Location of the persisted graph file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current immutable snapshot
    pub fn snapshot(&self) -> Arc<GraphStore> {
        self.snapshot
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Reload the persisted graph.
    ///
    /// On failure the current snapshot stays in place and the error is returned.
    pub fn reload(&self) -> Result<Arc<GraphStore>, GraphError> {
        let graph = if self.path.exists() {
            load_graph(&self.path)
        } else {
            Ok(GraphStore::new())
        };

        match graph {
            Ok(graph) => {
                let graph = Arc::new(graph);
                self.swap(graph.clone());
                Ok(graph)
            }
            Err(e) => {
                warn!(path = %self.path.display(), "Reload failed, keeping current graph: {}", e);
                Err(e)
            }
        }
    }

    /// Wait for the writer lock and start editing a copy of the current snapshot
    pub async fn begin_session(&self) -> WriterSession<'_> {
        let guard = self.writer.lock().await;
        WriterSession::new(self, guard)
    }

    /// Start a session only if no other writer is active
    pub fn try_begin_session(&self) -> Option<WriterSession<'_>> {
        self.writer
            .try_lock()
            .ok()
            .map(|guard| WriterSession::new(self, guard))
    }

    fn swap(&self, graph: Arc<GraphStore>) {
        *self
            .snapshot
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = graph;
    }
}

/// Exclusive edit of the repository's graph.
///
/// Changes stay private until [`WriterSession::commit`]; dropping the session
/// discards them.
pub struct WriterSession<'a> {
    repository: &'a GraphRepository,
    graph: GraphStore,
    _guard: MutexGuard<'a, ()>,
}

impl<'a> WriterSession<'a> {
    fn new(repository: &'a GraphRepository, guard: MutexGuard<'a, ()>) -> Self {
        let graph = repository.snapshot().as_ref().clone();
        Self {
            repository,
            graph,
            _guard: guard,
        }
    }

    pub fn graph(&self) -> &GraphStore {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut GraphStore {
        &mut self.graph
    }

    /// Throw away the working copy and start from an empty graph
    pub fn reset(&mut self) {
        self.graph = GraphStore::new();
    }

    /// Persist the working copy, then publish it as the new snapshot
    pub fn commit(self) -> Result<Arc<GraphStore>, GraphError> {
        save_graph(&self.graph, &self.repository.path)?;
        let graph = Arc::new(self.graph);
        self.repository.swap(graph.clone());
        info!(
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            "Graph committed"
        );
        Ok(graph)
    }
}
