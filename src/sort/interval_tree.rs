//! Interval tree over u64 key ranges.
//!
//! Arena-allocated binary search tree keyed by interval low endpoint,
//! augmented with the subtree max high endpoint for O(log n + k)
//! stabbing and overlap queries.
//!
//! Unlike the rest of the storage engine, this structure carries its
//! own mutex: it is usable as a general-purpose container outside the
//! single-writer write path. The sort engine itself builds one tree
//! per sort invocation and never contends on the lock.

use std::sync::Mutex;

/// A closed interval `[lo, hi]` tagged with a caller-supplied id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    pub lo: u64,
    pub hi: u64,
    pub id: usize,
}

#[derive(Debug, Clone, Copy)]
struct Node {
    iv: Interval,
    /// Max `hi` across this node's subtree.
    max: u64,
    left: Option<usize>,
    right: Option<usize>,
}

#[derive(Debug, Default)]
struct Inner {
    nodes: Vec<Node>,
    root: Option<usize>,
}

/// Mutex-guarded interval tree.
#[derive(Debug, Default)]
pub struct IntervalTree {
    inner: Mutex<Inner>,
}

impl IntervalTree {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Insert `[lo, hi]` (lo <= hi) with the given id.
    pub fn insert(&self, lo: u64, hi: u64, id: usize) {
        debug_assert!(lo <= hi, "interval endpoints reversed");
        let mut inner = self.inner.lock().expect("interval tree poisoned");
        let idx = inner.nodes.len();
        inner.nodes.push(Node {
            iv: Interval { lo, hi, id },
            max: hi,
            left: None,
            right: None,
        });

        match inner.root {
            None => inner.root = Some(idx),
            Some(root) => {
                let mut cur = root;
                loop {
                    inner.nodes[cur].max = inner.nodes[cur].max.max(hi);
                    if lo < inner.nodes[cur].iv.lo {
                        match inner.nodes[cur].left {
                            Some(l) => cur = l,
                            None => {
                                inner.nodes[cur].left = Some(idx);
                                break;
                            }
                        }
                    } else {
                        match inner.nodes[cur].right {
                            Some(r) => cur = r,
                            None => {
                                inner.nodes[cur].right = Some(idx);
                                break;
                            }
                        }
                    }
                }
            }
        }
    }

    /// Number of stored intervals.
    pub fn len(&self) -> usize {
        self.inner.lock().expect("interval tree poisoned").nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ids of all intervals containing `point`.
    pub fn stab(&self, point: u64) -> Vec<usize> {
        self.query(point, point)
    }

    /// Ids of all intervals overlapping `[lo, hi]` (closed endpoints;
    /// covers point containment and full containment both ways).
    pub fn query(&self, lo: u64, hi: u64) -> Vec<usize> {
        let inner = self.inner.lock().expect("interval tree poisoned");
        let mut out = Vec::new();
        if let Some(root) = inner.root {
            Self::query_rec(&inner.nodes, root, lo, hi, &mut out);
        }
        out.sort_unstable();
        out
    }

    fn query_rec(nodes: &[Node], cur: usize, lo: u64, hi: u64, out: &mut Vec<usize>) {
        let node = &nodes[cur];
        if node.max < lo {
            // Nothing in this subtree reaches the query.
            return;
        }
        if let Some(l) = node.left {
            Self::query_rec(nodes, l, lo, hi, out);
        }
        if node.iv.lo <= hi && lo <= node.iv.hi {
            out.push(node.iv.id);
        }
        if node.iv.lo <= hi {
            if let Some(r) = node.right {
                Self::query_rec(nodes, r, lo, hi, out);
            }
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────
