use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap, VecDeque};

use bio::io::newick;

use crate::error::OlmstedError;

pub type NodeId = usize;

#[derive(Debug, Clone, PartialEq)]
pub struct PhyloNode {
    pub name: String,
    /// Branch length to the parent; meaningless on the root.
    pub length: f64,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
}

/// Rooted tree stored as an arena; node ids are indices into `nodes`.
#[derive(Debug, Clone, PartialEq)]
pub struct PhyloTree {
    nodes: Vec<PhyloNode>,
    root: NodeId,
}

impl PhyloTree {
    /// Parses `text` with `bio::io::newick` and copies the graph into the arena.
    pub fn parse_newick(text: &str) -> Result<Self, OlmstedError> {
        let parsed = newick::from_string(without_root_length(text).as_ref())
            .map_err(|err| OlmstedError::MalformedTree(err.to_string()))?;
        let graph = parsed.g;

        let mut nodes = graph
            .raw_nodes()
            .iter()
            .map(|node| PhyloNode {
                name: node.weight.clone(),
                length: 0.0,
                parent: None,
                children: Vec::new(),
            })
            .collect::<Vec<_>>();
        for edge in graph.raw_edges() {
            let (parent, child) = (edge.source().index(), edge.target().index());
            nodes[child].parent = Some(parent);
            nodes[child].length = widen(edge.weight);
            nodes[parent].children.push(child);
        }

        let root = nodes
            .iter()
            .position(|node| node.parent.is_none())
            .ok_or_else(|| OlmstedError::MalformedTree("newick tree has no root".to_string()))?;
        Ok(Self { nodes, root })
    }

    /// Builds a tree from `(parent, child, branch_length)` edges. Exactly one node may lack a parent.
    pub fn from_edges(edges: &[(String, String, f64)]) -> Result<Self, OlmstedError> {
        let mut nodes: Vec<PhyloNode> = Vec::new();
        let mut index: HashMap<String, NodeId> = HashMap::new();
        let mut intern = |name: &str, nodes: &mut Vec<PhyloNode>| -> NodeId {
            *index.entry(name.to_string()).or_insert_with(|| {
                nodes.push(PhyloNode {
                    name: name.to_string(),
                    length: 0.0,
                    parent: None,
                    children: Vec::new(),
                });
                nodes.len() - 1
            })
        };

        for (parent, child, length) in edges {
            let parent_id = intern(parent, &mut nodes);
            let child_id = intern(child, &mut nodes);
            if parent_id == child_id {
                return Err(OlmstedError::MalformedTree(format!(
                    "self-loop on node {parent}"
                )));
            }
            if let Some(existing) = nodes[child_id].parent {
                if existing != parent_id {
                    return Err(OlmstedError::MalformedTree(format!(
                        "node {child} has two parents: {} and {parent}",
                        nodes[existing].name
                    )));
                }
                continue;
            }
            nodes[child_id].parent = Some(parent_id);
            nodes[child_id].length = *length;
            nodes[parent_id].children.push(child_id);
        }

        let roots = nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| node.parent.is_none())
            .map(|(id, _)| id)
            .collect::<Vec<_>>();
        if roots.len() != 1 {
            let names = roots
                .iter()
                .map(|id| nodes[*id].name.clone())
                .collect::<Vec<_>>();
            return Err(OlmstedError::MalformedTree(format!(
                "expected exactly one root, found {}: {names:?}",
                roots.len()
            )));
        }

        let tree = Self {
            nodes,
            root: roots[0],
        };
        if tree.preorder().len() != tree.nodes.len() {
            return Err(OlmstedError::MalformedTree(
                "edges contain a cycle".to_string(),
            ));
        }
        Ok(tree)
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> &PhyloNode {
        &self.nodes[id]
    }

    pub fn is_leaf(&self, id: NodeId) -> bool {
        self.nodes[id].children.is_empty()
    }

    /// First node named `name` in preorder, if any.
    pub fn find(&self, name: &str) -> Option<NodeId> {
        self.preorder()
            .into_iter()
            .find(|id| self.nodes[*id].name == name)
    }

    pub fn leaf_names(&self) -> Vec<&str> {
        self.preorder()
            .into_iter()
            .filter(|id| self.is_leaf(*id))
            .map(|id| self.nodes[id].name.as_str())
            .collect()
    }

    pub fn preorder(&self) -> Vec<NodeId> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            order.push(id);
            stack.extend(self.nodes[id].children.iter().rev().copied());
        }
        order
    }

    /// Children before parents; the root is always last.
    pub fn postorder(&self) -> Vec<NodeId> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![(self.root, false)];
        while let Some((id, expanded)) = stack.pop() {
            if expanded {
                order.push(id);
                continue;
            }
            stack.push((id, true));
            stack.extend(self.nodes[id].children.iter().rev().map(|child| (*child, false)));
        }
        order
    }

    /// Patristic distance between two nodes.
    pub fn distance(&self, a: NodeId, b: NodeId) -> f64 {
        let mut ancestors = BTreeMap::new();
        let mut cursor = Some(a);
        let mut from_a = 0.0;
        while let Some(id) = cursor {
            ancestors.insert(id, from_a);
            from_a += self.nodes[id].length;
            cursor = self.nodes[id].parent;
        }

        let mut cursor = b;
        let mut from_b = 0.0;
        loop {
            if let Some(up_from_a) = ancestors.get(&cursor) {
                return up_from_a + from_b;
            }
            match self.nodes[cursor].parent {
                Some(parent) => {
                    from_b += self.nodes[cursor].length;
                    cursor = parent;
                }
                None => return from_b,
            }
        }
    }

    /// Patristic distance from `origin` to every node, indexed by node id.
    pub fn distances_from(&self, origin: NodeId) -> Vec<f64> {
        let mut distances = vec![f64::NAN; self.nodes.len()];
        distances[origin] = 0.0;
        let mut queue = VecDeque::from([origin]);
        while let Some(id) = queue.pop_front() {
            let node = &self.nodes[id];
            let mut neighbours = node
                .children
                .iter()
                .map(|child| (*child, self.nodes[*child].length))
                .collect::<Vec<_>>();
            if let Some(parent) = node.parent {
                neighbours.push((parent, node.length));
            }
            for (next, length) in neighbours {
                if distances[next].is_nan() {
                    distances[next] = distances[id] + length;
                    queue.push_back(next);
                }
            }
        }
        distances
    }

    /// Makes `new_root` the root by reversing the parent links on the path from the old root.
    /// The new root ends up with zero length; every edge keeps its length.
    pub(crate) fn reverse_path_to(&mut self, new_root: NodeId) {
        let mut path = vec![new_root];
        let mut cursor = new_root;
        while let Some(parent) = self.nodes[cursor].parent {
            path.push(parent);
            cursor = parent;
        }
        let lengths = path
            .iter()
            .map(|id| self.nodes[*id].length)
            .collect::<Vec<_>>();

        for window in 0..path.len() - 1 {
            let child = path[window];
            let parent = path[window + 1];
            self.nodes[parent].children.retain(|id| *id != child);
            self.nodes[child].children.push(parent);
            self.nodes[parent].parent = Some(child);
            self.nodes[parent].length = lengths[window];
        }
        self.nodes[new_root].parent = None;
        self.nodes[new_root].length = 0.0;
        self.root = new_root;
    }

    pub fn to_newick(&self) -> String {
        let mut out = String::new();
        self.write_subtree(self.root, &mut out);
        out.push(';');
        out
    }

    fn write_subtree(&self, id: NodeId, out: &mut String) {
        let node = &self.nodes[id];
        if !node.children.is_empty() {
            out.push('(');
            for (position, child) in node.children.iter().enumerate() {
                if position > 0 {
                    out.push(',');
                }
                self.write_subtree(*child, out);
            }
            out.push(')');
        }
        out.push_str(&quote_label(&node.name));
        out.push(':');
        out.push_str(&node.length.to_string());
    }
}

fn quote_label(name: &str) -> String {
    let needs_quotes = name
        .chars()
        .any(|ch| matches!(ch, '(' | ')' | ',' | ':' | ';' | '[' | ']' | '\'') || ch.is_whitespace());
    if needs_quotes {
        format!("'{}'", name.replace('\'', "''"))
    } else {
        name.to_string()
    }
}

/// Root branch lengths carry nothing and are dropped before parsing.
fn without_root_length(text: &str) -> Cow<'_, str> {
    let body = text.trim();
    let Some(head) = body.strip_suffix(';') else {
        return Cow::Borrowed(body);
    };
    let label_start = head.rfind(')').map_or(0, |close| close + 1);
    match head[label_start..].rfind(':') {
        Some(colon) => Cow::Owned(format!("{};", &head[..label_start + colon])),
        None => Cow::Borrowed(body),
    }
}

/// Branch lengths arrive as `f32`; widening through their shortest decimal form keeps
/// `0.1` as `0.1` rather than `0.10000000149011612`.
fn widen(length: f32) -> f64 {
    length
        .to_string()
        .parse()
        .unwrap_or_else(|_| f64::from(length))
}
