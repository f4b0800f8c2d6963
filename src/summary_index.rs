//! Índice de resumen: la lista ordenada de todos los nodos, sin ranking.
//! Vive sólo en memoria y se reconstruye en cada arranque.

use std::sync::Arc;

use crate::models::Node;

#[derive(Debug, Clone, Default)]
pub struct SummaryIndex {
    nodes: Vec<Arc<Node>>,
}

impl SummaryIndex {
    pub fn new(nodes: Vec<Arc<Node>>) -> Self {
        Self { nodes }
    }

    pub fn nodes(&self) -> &[Arc<Node>] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
