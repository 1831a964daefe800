//! Whole-hierarchy view over a snapshot
//!
//! Edges point from upstream to downstream: parent to sub-scope, template to
//! instance. A scope with both references gets only the parent edge, since
//! propagation follows the parent.

use crate::error::HierarchyError;
use crate::lookup::ScopeSnapshot;
use canopy_model::{Object, Scope};
use petgraph::algo::{is_cyclic_directed, toposort};
use petgraph::graphmap::DiGraphMap;
use petgraph::visit::Bfs;
use petgraph::Direction;
use std::collections::HashMap;
use std::fmt::Write as _;

/// How a scope hangs below another
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Link {
    /// Parent to sub-scope
    Parent,
    /// Template to instance
    Template,
}

/// Directed graph of scope references
#[derive(Debug, Clone)]
pub struct HierarchyGraph {
    names: Vec<String>,
    ids: HashMap<String, usize>,
    inner: DiGraphMap<usize, Link>,
}

impl HierarchyGraph {
    /// Build from a snapshot; references to missing scopes become bare nodes
    #[must_use]
    pub fn from_snapshot(snapshot: &ScopeSnapshot) -> Self {
        let mut graph = Self {
            names: Vec::new(),
            ids: HashMap::new(),
            inner: DiGraphMap::new(),
        };
        for scope in snapshot.iter() {
            graph.add_scope(scope);
        }
        graph
    }

    fn node(&mut self, name: &str) -> usize {
        if let Some(id) = self.ids.get(name) {
            return *id;
        }
        let id = self.names.len();
        self.names.push(name.to_string());
        self.ids.insert(name.to_string(), id);
        self.inner.add_node(id);
        id
    }

    fn add_scope(&mut self, scope: &Scope) {
        let child = self.node(scope.name());
        let link = if let Some(parent) = scope.parent_ref() {
            Some((parent, Link::Parent))
        } else {
            scope.template_ref().map(|t| (t, Link::Template))
        };
        if let Some((upstream, link)) = link {
            let from = self.node(upstream);
            self.inner.add_edge(from, child, link);
        }
    }

    /// Number of scopes, counting dangling references
    #[inline]
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.inner.node_count()
    }

    /// Number of references
    #[inline]
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.inner.edge_count()
    }

    /// Check that no reference chain loops
    #[must_use]
    pub fn is_acyclic(&self) -> bool {
        !is_cyclic_directed(&self.inner)
    }

    /// Scopes with nothing upstream, ordered by name
    #[must_use]
    pub fn tops(&self) -> Vec<&str> {
        let mut tops: Vec<&str> = self
            .inner
            .nodes()
            .filter(|n| {
                self.inner
                    .neighbors_directed(*n, Direction::Incoming)
                    .next()
                    .is_none()
            })
            .map(|n| self.names[n].as_str())
            .collect();
        tops.sort_unstable();
        tops
    }

    /// Everything reachable downstream of `name`, excluding `name`
    #[must_use]
    pub fn descendants(&self, name: &str) -> Vec<&str> {
        let Some(start) = self.ids.get(name) else {
            return Vec::new();
        };
        let mut bfs = Bfs::new(&self.inner, *start);
        let mut out = Vec::new();
        while let Some(n) = bfs.next(&self.inner) {
            if n != *start {
                out.push(self.names[n].as_str());
            }
        }
        out
    }

    /// Scopes ordered so every scope comes after its upstream
    ///
    /// # Errors
    /// Returns [`HierarchyError::CycleDetected`] naming a scope on the loop.
    pub fn top_down(&self) -> Result<Vec<&str>, HierarchyError> {
        toposort(&self.inner, None)
            .map(|order| order.into_iter().map(|n| self.names[n].as_str()).collect())
            .map_err(|cycle| HierarchyError::CycleDetected {
                path: vec![self.names[cycle.node_id()].clone()],
            })
    }

    /// Indented tree rendering, one scope per line
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        for top in self.tops() {
            self.render_node(self.ids[top], None, 0, &mut out);
        }
        out
    }

    fn render_node(&self, node: usize, link: Option<Link>, depth: usize, out: &mut String) {
        let marker = match link {
            Some(Link::Template) => " (instance)",
            _ => "",
        };
        let _ = writeln!(out, "{}{}{marker}", "  ".repeat(depth), self.names[node]);
        let mut children: Vec<(usize, Link)> = self
            .inner
            .neighbors_directed(node, Direction::Outgoing)
            .filter_map(|to| self.inner.edge_weight(node, to).map(|link| (to, *link)))
            .collect();
        children.sort_by(|a, b| self.names[a.0].cmp(&self.names[b.0]));
        for (child, link) in children {
            self.render_node(child, Some(link), depth + 1, out);
        }
    }
}
