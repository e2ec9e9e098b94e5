//! Breadth-first worklist for network expansion.
//!
//! A node is enqueued at most once per run (keys are namespaced so a post
//! and a user sharing a numeric id never collide) and never beyond the
//! depth bound. Depth never decreases along a path: children are always
//! pushed at `parent.depth + 1`.

use std::collections::{HashSet, VecDeque};

use ripple_common::UserRef;

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Post(String),
    User(UserRef),
}

impl Node {
    pub fn key(&self) -> String {
        match self {
            Node::Post(id) => format!("post:{id}"),
            Node::User(user) => format!("user:{}", user.id),
        }
    }
}

/// Why a node entered the frontier. Decides which edges and caps apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Seed,
    Reply,
    Retweeter,
    Influencer,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub node: Node,
    pub depth: u32,
    pub origin: Origin,
}

#[derive(Debug)]
pub struct Frontier {
    visited: HashSet<String>,
    queue: VecDeque<Entry>,
    max_depth: u32,
}

impl Frontier {
    pub fn new(max_depth: u32) -> Self {
        Self {
            visited: HashSet::new(),
            queue: VecDeque::new(),
            max_depth,
        }
    }

    pub fn max_depth(&self) -> u32 {
        self.max_depth
    }

    /// Enqueue unless already visited or deeper than the bound.
    pub fn push(&mut self, node: Node, depth: u32, origin: Origin) -> bool {
        if depth > self.max_depth {
            return false;
        }
        if !self.visited.insert(node.key()) {
            return false;
        }
        self.queue.push_back(Entry { node, depth, origin });
        true
    }

    pub fn pop(&mut self) -> Option<Entry> {
        self.queue.pop_front()
    }

    /// Nodes at this depth are recorded but not expanded.
    pub fn is_leaf(&self, entry: &Entry) -> bool {
        entry.depth >= self.max_depth
    }

    pub fn visited(&self) -> usize {
        self.visited.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
