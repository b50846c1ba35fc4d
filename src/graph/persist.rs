//! Persisted graph format.
//!
//! A graph is stored as a single JSON Lines file: one header record, then
//! every node, then every edge. Writing nodes before edges lets a reader
//! validate each edge against the nodes it has already seen, so large graphs
//! can be streamed record by record without buffering the whole file.

use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Lines, Write};
use std::path::Path;
use tracing::debug;

use crate::graph::{edge::GraphEdge, error::GraphError, node::GraphNode, store::GraphStore};

pub const FORMAT_VERSION: u32 = 1;
pub const GRAPH_FILE_NAME: &str = "knowledge_graph.jsonl";

/// One line of a persisted graph file
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "record", rename_all = "snake_case")]
pub enum GraphRecord {
    Header {
        version: u32,
        nodes: usize,
        edges: usize,
    },
    Node {
        node: GraphNode,
    },
    Edge {
        edge: GraphEdge,
    },
}

#[derive(Serialize)]
#[serde(tag = "record", rename_all = "snake_case")]
enum RecordRef<'a> {
    Header {
        version: u32,
        nodes: usize,
        edges: usize,
    },
    Node {
        node: &'a GraphNode,
    },
    Edge {
        edge: &'a GraphEdge,
    },
}

/// Write `graph` in the persisted format
pub fn write_graph<W: Write>(graph: &GraphStore, mut writer: W) -> Result<(), GraphError> {
    write_record(
        &mut writer,
        &RecordRef::Header {
            version: FORMAT_VERSION,
            nodes: graph.node_count(),
            edges: graph.edge_count(),
        },
    )?;
    for node in graph.nodes() {
        write_record(&mut writer, &RecordRef::Node { node })?;
    }
    for edge in graph.edges() {
        write_record(&mut writer, &RecordRef::Edge { edge })?;
    }
    writer.flush()?;
    Ok(())
}

fn write_record<W: Write>(writer: &mut W, record: &RecordRef<'_>) -> Result<(), GraphError> {
    serde_json::to_writer(&mut *writer, record)?;
    writer.write_all(b"\n")?;
    Ok(())
}

/// Streaming reader over the records of a persisted graph.
///
/// Only checks that each line is a well-formed record; graph-level
/// validation happens in [`read_graph`].
pub struct GraphReader<R> {
    lines: Lines<R>,
    line_no: usize,
}

impl<R: BufRead> GraphReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            line_no: 0,
        }
    }

    /// Line number of the record returned last
    pub fn line_no(&self) -> usize {
        self.line_no
    }
}

impl<R: BufRead> Iterator for GraphReader<R> {
    type Item = Result<GraphRecord, GraphError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(e) => return Some(Err(GraphError::Io(e))),
            };
            self.line_no += 1;
            if line.trim().is_empty() {
                continue;
            }
            return Some(serde_json::from_str(&line).map_err(|e| {
                GraphError::CorruptGraph(format!("line {}: {}", self.line_no, e))
            }));
        }
    }
}

/// Read a graph, validating referential integrity as records stream in
pub fn read_graph<R: BufRead>(reader: R) -> Result<GraphStore, GraphError> {
    let mut records = GraphReader::new(reader);

    let (expected_nodes, expected_edges) = match records.next() {
        Some(Ok(GraphRecord::Header {
            version,
            nodes,
            edges,
        })) => {
            if version != FORMAT_VERSION {
                return Err(GraphError::CorruptGraph(format!(
                    "unsupported format version {}",
                    version
                )));
            }
            (nodes, edges)
        }
        Some(Ok(_)) => {
            return Err(GraphError::CorruptGraph(
                "first record is not a header".to_string(),
            ))
        }
        Some(Err(e)) => return Err(e),
        None => return Err(GraphError::CorruptGraph("missing header".to_string())),
    };

    let mut graph = GraphStore::new();
    let mut nodes_read = 0;
    let mut edges_read = 0;

    while let Some(record) = records.next() {
        let line_no = records.line_no();
        match record? {
            GraphRecord::Header { .. } => {
                return Err(GraphError::CorruptGraph(format!(
                    "line {}: unexpected second header",
                    line_no
                )))
            }
            GraphRecord::Node { node } => {
                if edges_read > 0 {
                    return Err(GraphError::CorruptGraph(format!(
                        "line {}: node record after edge records",
                        line_no
                    )));
                }
                let id = node.id();
                if graph.contains(&id) {
                    return Err(GraphError::CorruptGraph(format!(
                        "line {}: duplicate node {}",
                        line_no, id
                    )));
                }
                graph
                    .add_node(node)
                    .map_err(|e| GraphError::CorruptGraph(format!("line {}: {}", line_no, e)))?;
                nodes_read += 1;
            }
            GraphRecord::Edge { edge } => {
                graph
                    .add_edge(edge.source, edge.target, edge.kind, edge.weight)
                    .map_err(|e| match e {
                        GraphError::UnknownNode(id) => GraphError::CorruptGraph(format!(
                            "line {}: edge references missing node {}",
                            line_no, id
                        )),
                        other => GraphError::CorruptGraph(format!("line {}: {}", line_no, other)),
                    })?;
                edges_read += 1;
            }
        }
    }

    if nodes_read != expected_nodes || edges_read != expected_edges {
        return Err(GraphError::CorruptGraph(format!(
            "header announces {} nodes and {} edges, found {} and {}",
            expected_nodes, expected_edges, nodes_read, edges_read
        )));
    }

    debug!(nodes = nodes_read, edges = edges_read, "Graph read");
    Ok(graph)
}

/// Persist `graph` at `path`, replacing any previous file atomically
pub fn save_graph(graph: &GraphStore, path: &Path) -> Result<(), GraphError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let tmp_path = path.with_extension("jsonl.tmp");
    {
        let file = File::create(&tmp_path)?;
        let mut writer = BufWriter::new(file);
        write_graph(graph, &mut writer)?;
        writer.get_ref().sync_all()?;
    }
    fs::rename(&tmp_path, path)?;

    debug!(path = %path.display(), "Graph saved");
    Ok(())
}

/// Load a graph persisted with [`save_graph`]
pub fn load_graph(path: &Path) -> Result<GraphStore, GraphError> {
    let file = File::open(path)?;
    read_graph(BufReader::new(file))
}
