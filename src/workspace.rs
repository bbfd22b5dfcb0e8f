//! Room-scoped virtual filesystem: a nested tree addressed by absolute
//! slash-delimited paths, rooted at `/`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    File,
    Directory,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    File { content: String },
    Directory { children: HashMap<String, Node> },
}

impl Node {
    pub fn file(content: impl Into<String>) -> Self {
        Node::File {
            content: content.into(),
        }
    }

    pub fn directory() -> Self {
        Node::Directory {
            children: HashMap::new(),
        }
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            Node::File { .. } => NodeKind::File,
            Node::Directory { .. } => NodeKind::Directory,
        }
    }

    pub fn content(&self) -> Option<&str> {
        match self {
            Node::File { content } => Some(content),
            Node::Directory { .. } => None,
        }
    }

    fn children(&self) -> Option<&HashMap<String, Node>> {
        match self {
            Node::Directory { children } => Some(children),
            Node::File { .. } => None,
        }
    }

    fn children_mut(&mut self) -> Option<&mut HashMap<String, Node>> {
        match self {
            Node::Directory { children } => Some(children),
            Node::File { .. } => None,
        }
    }
}

/// Serializable view of a node, with derived paths, sent to clients as the
/// workspace snapshot. Children are name-sorted so the payload is stable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub name: String,
    pub path: String,
    pub kind: NodeKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<NodeSnapshot>>,
}

/// Empty segments are dropped, so `//a//b` and `/a/b` address the same node.
fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Converts the node into a directory if it is not one already, and hands
/// back its child map. Auto-vivification descends through files by
/// replacing them.
fn ensure_dir_children(node: &mut Node) -> &mut HashMap<String, Node> {
    if !matches!(node, Node::Directory { .. }) {
        *node = Node::directory();
    }
    match node {
        Node::Directory { children } => children,
        Node::File { .. } => unreachable!("node was just replaced with a directory"),
    }
}

#[derive(Debug, Clone)]
pub struct VirtualFileTree {
    root: Node,
}

impl Default for VirtualFileTree {
    fn default() -> Self {
        Self::new()
    }
}

impl VirtualFileTree {
    pub fn new() -> Self {
        VirtualFileTree {
            root: Node::directory(),
        }
    }

    /// Walks the tree segment by segment. Returns `None` when an
    /// intermediate segment is missing or is a file.
    pub fn resolve(&self, path: &str) -> Option<&Node> {
        let mut current = &self.root;
        for segment in segments(path) {
            current = current.children()?.get(segment)?;
        }
        Some(current)
    }

    /// Inserts or replaces the entry at `path`, creating missing
    /// intermediate directories. The root itself is never replaced.
    pub fn upsert(&mut self, path: &str, node: Node) {
        let segs = segments(path);
        let Some((name, parents)) = segs.split_last() else {
            return;
        };
        let mut children = ensure_dir_children(&mut self.root);
        for segment in parents {
            let child = children
                .entry((*segment).to_string())
                .or_insert_with(Node::directory);
            children = ensure_dir_children(child);
        }
        children.insert((*name).to_string(), node);
    }

    pub fn upsert_file(&mut self, path: &str, content: impl Into<String>) {
        self.upsert(path, Node::file(content));
    }

    /// Removes the entry at `path`, directory subtrees included. Returns
    /// whether anything was there; `false` is a no-op, not an error. The
    /// root cannot be removed.
    pub fn remove(&mut self, path: &str) -> bool {
        self.take(path).is_some()
    }

    /// Moves the node at `old_path` (content and children intact) to
    /// `new_path`, creating missing intermediate directories. Returns
    /// `false` without touching the tree when `old_path` does not resolve
    /// or `new_path` is the root.
    pub fn rename(&mut self, old_path: &str, new_path: &str) -> bool {
        if segments(new_path).is_empty() {
            return false;
        }
        let Some(node) = self.take(old_path) else {
            return false;
        };
        self.upsert(new_path, node);
        true
    }

    fn take(&mut self, path: &str) -> Option<Node> {
        let segs = segments(path);
        let (name, parents) = segs.split_last()?;
        let mut current = &mut self.root;
        for segment in parents {
            current = current.children_mut()?.get_mut(*segment)?;
        }
        current.children_mut()?.remove(*name)
    }

    pub fn snapshot(&self) -> NodeSnapshot {
        snapshot_node(&self.root, String::new(), "/".to_string())
    }

    pub fn snapshot_at(&self, path: &str) -> Option<NodeSnapshot> {
        let node = self.resolve(path)?;
        let name = segments(path).last().map_or(String::new(), ToString::to_string);
        let canonical = canonical_path(path);
        Some(snapshot_node(node, name, canonical))
    }
}

fn canonical_path(path: &str) -> String {
    let segs = segments(path);
    if segs.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", segs.join("/"))
    }
}

fn snapshot_node(node: &Node, name: String, path: String) -> NodeSnapshot {
    match node {
        Node::File { content } => NodeSnapshot {
            name,
            path,
            kind: NodeKind::File,
            content: Some(content.clone()),
            children: None,
        },
        Node::Directory { children } => {
            let mut names: Vec<&String> = children.keys().collect();
            names.sort();
            let children = names
                .into_iter()
                .map(|child_name| {
                    let child_path = if path == "/" {
                        format!("/{child_name}")
                    } else {
                        format!("{path}/{child_name}")
                    };
                    snapshot_node(&children[child_name], child_name.clone(), child_path)
                })
                .collect();
            NodeSnapshot {
                name,
                path,
                kind: NodeKind::Directory,
                content: None,
                children: Some(children),
            }
        }
    }
}
