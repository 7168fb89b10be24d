// SPDX-License-Identifier: GPL-2.0-or-later

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Mutex;

use crate::media_handler::SharedHandler;
use crate::status::Status;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("node {node} has no input port {port}")]
    InvalidInputPort { node: usize, port: u32 },
    #[error("graph contains a cycle")]
    Cycle,
    #[error("node {node} output port {port} has no consumer")]
    OrphanOutput { node: usize, port: u32 },
    #[error("node {node} input port {port} is never connected")]
    UnconnectedInput { node: usize, port: u32 },
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error("handler initialization failed: {0}")]
    Init(Status),
}

/// A DAG of [`crate::MediaHandler`] nodes under construction. Wiring is
/// recorded both on the handler itself (via `add_output`, so `Dispatch`
/// has somewhere to send messages at run time) and in `edges` here, so
/// `build` can validate the topology without locking every node's
/// internal state.
#[derive(Default)]
pub struct Graph {
    nodes: Vec<SharedHandler>,
    edges: Vec<(usize, u32, usize, u32)>,
}

/// A validated, initialized graph. The only thing left to do with it is
/// hand its origin nodes to an [`crate::Orchestrator`].
pub struct BuiltGraph {
    pub nodes: Vec<SharedHandler>,
}

impl Graph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, handler: SharedHandler) -> usize {
        self.nodes.push(handler);
        self.nodes.len() - 1
    }

    /// Wires `from`'s output port `from_port` to `to`'s input port
    /// `to_port`. Fails immediately if `to` does not recognise `to_port`.
    pub async fn connect(
        &mut self,
        from: usize,
        from_port: u32,
        to: usize,
        to_port: u32,
    ) -> Result<(), GraphError> {
        let to_recognised = self.nodes[to].lock().await.known_input_ports().contains(&to_port);
        if !to_recognised {
            return Err(GraphError::InvalidInputPort {
                node: to,
                port: to_port,
            });
        }
        let consumer = Arc::clone(&self.nodes[to]);
        self.nodes[from]
            .lock()
            .await
            .add_output(from_port, consumer, to_port);
        self.edges.push((from, from_port, to, to_port));
        Ok(())
    }

    /// Validates that the graph is acyclic, that every declared output port
    /// has a consumer, and that every known input port is wired, then
    /// calls `initialize` on every node.
    pub async fn build(self) -> Result<BuiltGraph, BuildError> {
        self.check_acyclic()?;
        self.check_outputs_connected().await?;
        self.check_inputs_connected().await?;
        for node in &self.nodes {
            let status = node.lock().await.initialize().await;
            if status.is_error() {
                return Err(BuildError::Init(status));
            }
        }
        Ok(BuiltGraph { nodes: self.nodes })
    }

    fn check_acyclic(&self) -> Result<(), GraphError> {
        let n = self.nodes.len();
        let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); n];
        for &(from, _, to, _) in &self.edges {
            adjacency[from].push(to);
        }

        #[derive(Clone, Copy, PartialEq, Eq)]
        enum Mark {
            Unvisited,
            Visiting,
            Done,
        }
        let mut marks = vec![Mark::Unvisited; n];

        fn visit(node: usize, adjacency: &[Vec<usize>], marks: &mut [Mark]) -> Result<(), GraphError> {
            match marks[node] {
                Mark::Done => return Ok(()),
                Mark::Visiting => return Err(GraphError::Cycle),
                Mark::Unvisited => {}
            }
            marks[node] = Mark::Visiting;
            for &next in &adjacency[node] {
                visit(next, adjacency, marks)?;
            }
            marks[node] = Mark::Done;
            Ok(())
        }

        for start in 0..n {
            visit(start, &adjacency, &mut marks)?;
        }
        Ok(())
    }

    async fn check_outputs_connected(&self) -> Result<(), GraphError> {
        for (idx, node) in self.nodes.iter().enumerate() {
            let declared = node.lock().await.declared_output_ports();
            for port in declared {
                let wired = self
                    .edges
                    .iter()
                    .any(|&(from, from_port, ..)| from == idx && from_port == port);
                if !wired {
                    return Err(GraphError::OrphanOutput { node: idx, port });
                }
            }
        }
        Ok(())
    }

    async fn check_inputs_connected(&self) -> Result<(), GraphError> {
        for (idx, node) in self.nodes.iter().enumerate() {
            let known = node.lock().await.known_input_ports();
            for port in known {
                let wired = self
                    .edges
                    .iter()
                    .any(|&(_, _, to, to_port)| to == idx && to_port == port);
                if !wired {
                    return Err(GraphError::UnconnectedInput { node: idx, port });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replicator::Replicator;
    use crate::trick_play::TrickPlayHandler;

    fn shared<H: crate::MediaHandler + 'static>(h: H) -> SharedHandler {
        Arc::new(Mutex::new(h))
    }

    #[tokio::test]
    async fn rejects_unknown_input_port() {
        let mut graph = Graph::new();
        let a = graph.add_node(shared(Replicator::new(1)));
        let b = graph.add_node(shared(TrickPlayHandler::new(2)));
        let err = graph.connect(a, 0, b, 99).await.unwrap_err();
        assert_eq!(
            GraphError::InvalidInputPort { node: b, port: 99 },
            err
        );
    }

    #[tokio::test]
    async fn rejects_cycles() {
        let mut graph = Graph::new();
        let a = graph.add_node(shared(Replicator::new(1)));
        let b = graph.add_node(shared(Replicator::new(1)));
        graph.connect(a, 0, b, 0).await.unwrap();
        graph.connect(b, 0, a, 0).await.unwrap();
        assert_eq!(Err(GraphError::Cycle), graph.check_acyclic());
    }

    #[tokio::test]
    async fn rejects_orphan_output() {
        let mut graph = Graph::new();
        graph.add_node(shared(Replicator::new(1)));
        let err = graph.build().await.unwrap_err();
        assert!(matches!(
            err,
            BuildError::Graph(GraphError::OrphanOutput { node: 0, port: 0 })
        ));
    }

    #[tokio::test]
    async fn rejects_unconnected_input() {
        let mut graph = Graph::new();
        let a = graph.add_node(shared(Replicator::new(1)));
        let b = graph.add_node(shared(TrickPlayHandler::new(2)));
        graph.connect(a, 0, b, 0).await.unwrap();
        let err = graph.build().await.unwrap_err();
        assert!(matches!(
            err,
            BuildError::Graph(GraphError::UnconnectedInput { node, port: 0 }) if node == a
        ));
    }
}
