//! Batch merge of one commit into a tree
//!
//! Operations are routed down the tree by child bounds. Touched leaves are
//! rebuilt with the operations applied and re-split by encoded size; touched
//! branches are rebuilt from their children's replacements. New nodes below
//! a quarter page are combined with a sibling. The root grows a level when
//! it splits and collapses while it is a branch with a single child, so
//! every leaf stays at the same depth.

use super::{BTree, Version, WriteState};
use crate::page::{child_size, entry_size, max_item_size, Node, PageAddr};
use std::cmp::Ordering;
use std::ops::Range;
use std::sync::Arc;
use tessera_core::{Error, Key, Result, TreeValue};
use tracing::{debug, trace};

/// One key's operation: `Some` sets, `None` removes
pub type TreeOp = (Key, Option<TreeValue>);

impl BTree {
    /// Merge one commit's operations and publish the result as `sequence`
    ///
    /// Returns false when the tree already reflects `sequence` (replay of a
    /// commit that was flushed before a restart). `pin_horizon` is the
    /// oldest sequence a reader may still observe.
    pub fn merge(&self, sequence: u64, mut ops: Vec<TreeOp>, pin_horizon: u64) -> Result<bool> {
        let mut state = self.state.lock();
        if sequence <= state.applied_sequence {
            trace!(
                target: "tessera::btree",
                tree = %self.id,
                sequence,
                applied = state.applied_sequence,
                "Skipping applied commit"
            );
            return Ok(false);
        }
        if ops.is_empty() {
            return Ok(false);
        }

        let reclaimed = self.reclaim(&mut state, pin_horizon);
        if reclaimed > 0 {
            trace!(target: "tessera::btree", tree = %self.id, reclaimed, "Reclaimed slots");
        }

        // Last operation per key wins
        ops.sort_by(|a, b| self.order.compare(&a.0, &b.0));
        let mut deduped: Vec<TreeOp> = Vec::with_capacity(ops.len());
        for op in ops {
            match deduped.last_mut() {
                Some(last) if self.order.compare(&last.0, &op.0) == Ordering::Equal => *last = op,
                _ => deduped.push(op),
            }
        }

        let saved = state.clone();
        let root = self.latest_root();
        let (outcome, written) = {
            let mut merger = Merger {
                tree: self,
                state: &mut state,
                sequence,
                capacity: max_item_size(self.page_size()),
                written: Vec::new(),
            };
            let outcome = merger.merge_root(root, &deduped);
            (outcome, merger.written)
        };

        match outcome {
            Ok(new_root) => {
                state.applied_sequence = sequence;
                self.versions.write().push_back(Version {
                    sequence,
                    root: new_root,
                });
                self.prune_versions(pin_horizon);
                debug!(
                    target: "tessera::btree",
                    tree = %self.id,
                    sequence,
                    ops = deduped.len(),
                    pages = written.len(),
                    "Merged commit"
                );
                Ok(true)
            }
            Err(e) => {
                *state = saved;
                for addr in written {
                    self.cache.invalidate((self.id, addr));
                }
                Err(e)
            }
        }
    }
}

enum Slot {
    Existing(Key, PageAddr),
    New(Node, usize),
}

struct Merger<'a> {
    tree: &'a BTree,
    state: &'a mut WriteState,
    sequence: u64,
    capacity: usize,
    written: Vec<PageAddr>,
}

impl Merger<'_> {
    fn merge_root(&mut self, root: Option<PageAddr>, ops: &[TreeOp]) -> Result<Option<PageAddr>> {
        let node = match root {
            Some(addr) => {
                let node = self.tree.load(addr)?;
                self.retire(addr);
                node
            }
            None => Arc::new(Node::empty_leaf()),
        };

        let mut level = self.merge_node(&node, ops)?;
        while level.len() > 1 {
            let children = level
                .into_iter()
                .map(|n| self.write(n))
                .collect::<Result<Vec<_>>>()?;
            level = self.split_branch(children)?;
        }
        let Some(mut top) = level.pop() else {
            return Ok(None);
        };

        loop {
            let only_child = match &top {
                Node::Branch { children } if children.len() == 1 => children[0].1,
                _ => return Ok(Some(self.write(top)?.1)),
            };
            let child = self.tree.load(only_child)?;
            match &*child {
                Node::Branch { children } if children.len() == 1 => {
                    self.retire(only_child);
                    top = (*child).clone();
                }
                _ => return Ok(Some(only_child)),
            }
        }
    }

    fn merge_node(&mut self, node: &Node, ops: &[TreeOp]) -> Result<Vec<Node>> {
        match node {
            Node::Leaf { entries } => self.merge_leaf(entries, ops),
            Node::Branch { children } => self.merge_branch(children, ops),
        }
    }

    fn merge_leaf(&mut self, entries: &[(Key, TreeValue)], ops: &[TreeOp]) -> Result<Vec<Node>> {
        let order = &self.tree.order;
        let mut merged = Vec::with_capacity(entries.len() + ops.len());
        let mut existing = entries.iter().peekable();

        for (key, op) in ops {
            while let Some((k, _)) = existing.peek() {
                match order.compare(k, key) {
                    Ordering::Less => merged.extend(existing.next().cloned()),
                    Ordering::Equal => {
                        existing.next();
                        break;
                    }
                    Ordering::Greater => break,
                }
            }
            if let Some(value) = op {
                merged.push((key.clone(), value.clone()));
            }
        }
        merged.extend(existing.cloned());

        self.split_leaf(merged)
    }

    fn merge_branch(&mut self, children: &[(Key, PageAddr)], ops: &[TreeOp]) -> Result<Vec<Node>> {
        let order = Arc::clone(&self.tree.order);
        let mut slots = Vec::with_capacity(children.len() + 1);
        let mut rest = ops;

        for (i, (bound, addr)) in children.iter().enumerate() {
            let take = match children.get(i + 1) {
                Some((next, _)) => rest
                    .iter()
                    .position(|(k, _)| order.compare(k, next) != Ordering::Less)
                    .unwrap_or(rest.len()),
                None => rest.len(),
            };
            let (mine, tail) = rest.split_at(take);
            rest = tail;

            if mine.is_empty() {
                slots.push(Slot::Existing(bound.clone(), *addr));
                continue;
            }
            let child = self.tree.load(*addr)?;
            let replacement = self.merge_node(&child, mine)?;
            self.retire(*addr);
            for node in replacement {
                let size = node.encoded_size()?;
                slots.push(Slot::New(node, size));
            }
        }

        self.rebalance(&mut slots)?;

        let mut children = Vec::with_capacity(slots.len());
        for slot in slots {
            children.push(match slot {
                Slot::Existing(bound, addr) => (bound, addr),
                Slot::New(node, _) => self.write(node)?,
            });
        }
        self.split_branch(children)
    }

    /// Combine underfull new nodes with a neighbour
    fn rebalance(&mut self, slots: &mut Vec<Slot>) -> Result<()> {
        let threshold = self.capacity / 4;
        let mut i = 0;
        while i < slots.len() && slots.len() > 1 {
            let underfull = matches!(&slots[i], Slot::New(_, size) if *size < threshold);
            if !underfull {
                i += 1;
                continue;
            }

            let lo = if i + 1 < slots.len() { i } else { i - 1 };
            let right = slots.remove(lo + 1);
            let left = slots.remove(lo);
            let combined = concat(self.take(left)?, self.take(right)?)?;
            let parts = self.split_node(combined)?;
            let count = parts.len();
            for (k, node) in parts.into_iter().enumerate() {
                let size = node.encoded_size()?;
                slots.insert(lo + k, Slot::New(node, size));
            }
            // A single result may still be small: retry it with the next sibling
            i = if count == 1 { lo } else { lo + count };
        }
        Ok(())
    }

    fn take(&mut self, slot: Slot) -> Result<Node> {
        match slot {
            Slot::New(node, _) => Ok(node),
            Slot::Existing(_, addr) => {
                let node = self.tree.load(addr)?;
                self.retire(addr);
                Ok((*node).clone())
            }
        }
    }

    fn split_node(&self, node: Node) -> Result<Vec<Node>> {
        match node {
            Node::Leaf { entries } => self.split_leaf(entries),
            Node::Branch { children } => self.split_branch(children),
        }
    }

    fn split_leaf(&self, mut entries: Vec<(Key, TreeValue)>) -> Result<Vec<Node>> {
        let sizes = entries
            .iter()
            .map(|(k, v)| entry_size(k, v).map_err(Error::from))
            .collect::<Result<Vec<_>>>()?;
        if let Some(&size) = sizes.iter().find(|&&s| s > self.capacity) {
            return Err(Error::EntryTooLarge {
                size,
                max: self.capacity,
            });
        }
        let mut nodes = Vec::new();
        for range in split_ranges(&sizes, self.capacity).into_iter().rev() {
            nodes.push(Node::Leaf {
                entries: entries.split_off(range.start),
            });
        }
        nodes.reverse();
        Ok(nodes)
    }

    fn split_branch(&self, mut children: Vec<(Key, PageAddr)>) -> Result<Vec<Node>> {
        let sizes = children
            .iter()
            .map(|(k, a)| child_size(k, *a).map_err(Error::from))
            .collect::<Result<Vec<_>>>()?;
        let mut nodes = Vec::new();
        for range in split_ranges(&sizes, self.capacity).into_iter().rev() {
            nodes.push(Node::Branch {
                children: children.split_off(range.start),
            });
        }
        nodes.reverse();
        Ok(nodes)
    }

    fn write(&mut self, node: Node) -> Result<(Key, PageAddr)> {
        let bound = node
            .min_key()
            .cloned()
            .ok_or_else(|| Error::corruption("attempted to write an empty node"))?;
        let addr = match self.state.free.pop() {
            Some(addr) => addr,
            None => {
                let addr = PageAddr(self.state.next_slot);
                self.state.next_slot += 1;
                addr
            }
        };
        self.tree
            .cache
            .insert_dirty((self.tree.id, addr), Arc::new(node));
        self.written.push(addr);
        Ok((bound, addr))
    }

    fn retire(&mut self, addr: PageAddr) {
        self.state.retired.push((self.sequence, addr));
    }
}

fn concat(left: Node, right: Node) -> Result<Node> {
    match (left, right) {
        (Node::Leaf { mut entries }, Node::Leaf { entries: more }) => {
            entries.extend(more);
            Ok(Node::Leaf { entries })
        }
        (Node::Branch { mut children }, Node::Branch { children: more }) => {
            children.extend(more);
            Ok(Node::Branch { children })
        }
        _ => Err(Error::corruption("sibling pages at different levels")),
    }
}

/// Partition items into contiguous ranges of at most `capacity` bytes,
/// spreading them evenly so the last range is not left nearly empty
fn split_ranges(sizes: &[usize], capacity: usize) -> Vec<Range<usize>> {
    if sizes.is_empty() {
        return Vec::new();
    }
    let total: usize = sizes.iter().sum();
    if total <= capacity {
        return vec![0..sizes.len()];
    }
    let parts = total.div_ceil(capacity);
    let target = total.div_ceil(parts);

    let mut ranges = Vec::with_capacity(parts + 1);
    let mut start = 0;
    let mut filled = 0;
    for (i, &size) in sizes.iter().enumerate() {
        if i > start && (filled + size > capacity || filled >= target) {
            ranges.push(start..i);
            start = i;
            filled = 0;
        }
        filled += size;
    }
    ranges.push(start..sizes.len());
    ranges
}
