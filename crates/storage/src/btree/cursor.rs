//! Lazy bidirectional tree cursor
//!
//! The cursor keeps the path from the root to its current leaf and loads
//! pages only as it walks. It holds its sequence pin for its whole life, so
//! the pages of its version stay valid even if it outlives the snapshot
//! that created it.

use super::BTree;
use crate::page::{Node, PageAddr};
use crate::pins::SequencePin;
use std::cmp::Ordering;
use std::sync::Arc;
use tessera_core::{Error, Key, Result, TreeValue};

struct Frame {
    node: Arc<Node>,
    addr: PageAddr,
    /// Branch: child being visited. Leaf: next entry forward, or the
    /// number of entries still to yield in reverse.
    pos: usize,
}

/// Cursor over one tree version
pub struct TreeCursor {
    tree: Arc<BTree>,
    pin: SequencePin,
    from: Option<Key>,
    reverse: bool,
    stack: Vec<Frame>,
    started: bool,
    done: bool,
    /// Skip entries on the wrong side of `from` until the first match
    guard: bool,
    pinned_leaf: Option<PageAddr>,
}

impl TreeCursor {
    pub(super) fn new(tree: Arc<BTree>, pin: SequencePin, from: Option<Key>, reverse: bool) -> Self {
        TreeCursor {
            tree,
            pin,
            guard: from.is_some(),
            from,
            reverse,
            stack: Vec::new(),
            started: false,
            done: false,
            pinned_leaf: None,
        }
    }

    /// Sequence this cursor reads at
    pub fn sequence(&self) -> u64 {
        self.pin.sequence()
    }

    /// True for descending cursors
    pub fn is_reverse(&self) -> bool {
        self.reverse
    }

    /// Next entry in cursor order
    pub fn next_entry(&mut self) -> Result<Option<(Key, TreeValue)>> {
        if self.done {
            return Ok(None);
        }
        if !self.started {
            self.started = true;
            if let Err(e) = self.seek() {
                self.finish();
                return Err(e);
            }
        }

        loop {
            let entry = match self.stack.last_mut() {
                None => {
                    self.finish();
                    return Ok(None);
                }
                Some(frame) => {
                    let Node::Leaf { entries } = &*frame.node else {
                        self.finish();
                        return Err(Error::corruption("cursor path does not end in a leaf"));
                    };
                    if self.reverse {
                        if frame.pos == 0 {
                            None
                        } else {
                            frame.pos -= 1;
                            Some(entries[frame.pos].clone())
                        }
                    } else if frame.pos < entries.len() {
                        frame.pos += 1;
                        Some(entries[frame.pos - 1].clone())
                    } else {
                        None
                    }
                }
            };

            match entry {
                Some(entry) => {
                    if self.guard && self.outside_start(&entry.0) {
                        continue;
                    }
                    self.guard = false;
                    return Ok(Some(entry));
                }
                None => match self.step_leaf() {
                    Ok(true) => {}
                    Ok(false) => {
                        self.finish();
                        return Ok(None);
                    }
                    Err(e) => {
                        self.finish();
                        return Err(e);
                    }
                },
            }
        }
    }

    fn outside_start(&self, key: &Key) -> bool {
        let Some(from) = &self.from else {
            return false;
        };
        let ord = self.tree.order.compare_prefix(key, from);
        if self.reverse {
            ord == Ordering::Greater
        } else {
            ord == Ordering::Less
        }
    }

    fn seek(&mut self) -> Result<()> {
        let Some(mut addr) = self.tree.root_at(self.pin.sequence()) else {
            return Ok(());
        };
        let order = Arc::clone(&self.tree.order);
        loop {
            let node = self.tree.load(addr)?;
            match &*node {
                Node::Branch { children } => {
                    if children.is_empty() {
                        return Err(Error::corruption("empty branch page"));
                    }
                    let pos = match (&self.from, self.reverse) {
                        (None, false) => 0,
                        (None, true) => children.len() - 1,
                        (Some(from), false) => children
                            .iter()
                            .rposition(|(b, _)| order.compare_prefix(b, from) == Ordering::Less)
                            .unwrap_or(0),
                        (Some(from), true) => children
                            .iter()
                            .rposition(|(b, _)| order.compare_prefix(b, from) != Ordering::Greater)
                            .unwrap_or(0),
                    };
                    let child = children[pos].1;
                    self.stack.push(Frame {
                        node: Arc::clone(&node),
                        addr,
                        pos,
                    });
                    addr = child;
                }
                Node::Leaf { entries } => {
                    let pos = match (&self.from, self.reverse) {
                        (None, false) => 0,
                        (None, true) => entries.len(),
                        (Some(from), false) => entries
                            .iter()
                            .position(|(k, _)| order.compare_prefix(k, from) != Ordering::Less)
                            .unwrap_or(entries.len()),
                        (Some(from), true) => entries
                            .iter()
                            .rposition(|(k, _)| order.compare_prefix(k, from) != Ordering::Greater)
                            .map_or(0, |p| p + 1),
                    };
                    self.push_leaf(Arc::clone(&node), addr, pos);
                    return Ok(());
                }
            }
        }
    }

    /// Move to the neighbouring leaf in cursor direction
    fn step_leaf(&mut self) -> Result<bool> {
        self.stack.pop();
        loop {
            let Some(frame) = self.stack.last_mut() else {
                return Ok(false);
            };
            let Node::Branch { children } = &*frame.node else {
                return Err(Error::corruption("leaf page above another page"));
            };
            let next = if self.reverse {
                frame.pos.checked_sub(1)
            } else if frame.pos + 1 < children.len() {
                Some(frame.pos + 1)
            } else {
                None
            };
            match next {
                Some(pos) => {
                    let addr = children[pos].1;
                    frame.pos = pos;
                    self.descend_edge(addr)?;
                    return Ok(true);
                }
                None => {
                    self.stack.pop();
                }
            }
        }
    }

    /// Descend to the first (forward) or last (reverse) leaf under `addr`
    fn descend_edge(&mut self, mut addr: PageAddr) -> Result<()> {
        loop {
            let node = self.tree.load(addr)?;
            match &*node {
                Node::Branch { children } => {
                    let Some(last) = children.len().checked_sub(1) else {
                        return Err(Error::corruption("empty branch page"));
                    };
                    let pos = if self.reverse { last } else { 0 };
                    let child = children[pos].1;
                    self.stack.push(Frame {
                        node: Arc::clone(&node),
                        addr,
                        pos,
                    });
                    addr = child;
                }
                Node::Leaf { entries } => {
                    let pos = if self.reverse { entries.len() } else { 0 };
                    self.push_leaf(Arc::clone(&node), addr, pos);
                    return Ok(());
                }
            }
        }
    }

    fn push_leaf(&mut self, node: Arc<Node>, addr: PageAddr, pos: usize) {
        self.release_leaf();
        if self.tree.cache.pin((self.tree.id, addr)) {
            self.pinned_leaf = Some(addr);
        }
        self.stack.push(Frame { node, addr, pos });
    }

    fn release_leaf(&mut self) {
        if let Some(addr) = self.pinned_leaf.take() {
            self.tree.cache.unpin((self.tree.id, addr));
        }
    }

    fn finish(&mut self) {
        self.done = true;
        self.stack.clear();
        self.release_leaf();
    }
}

impl Iterator for TreeCursor {
    type Item = Result<(Key, TreeValue)>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_entry().transpose()
    }
}

impl Drop for TreeCursor {
    fn drop(&mut self) {
        self.release_leaf();
    }
}

impl std::fmt::Debug for TreeCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreeCursor")
            .field("tree", &self.tree.id)
            .field("sequence", &self.pin.sequence())
            .field("reverse", &self.reverse)
            .field("depth", &self.stack.len())
            .field("leaf", &self.stack.last().map(|f| f.addr))
            .finish()
    }
}
