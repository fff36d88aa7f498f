/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Weighted red-black tree indexing every wallet in the quorum.
//!
//! Nodes live in an arena and refer to each other by `u32` index. Index 0 is the black `NIL`
//! sentinel shared by every leaf. Besides the usual red-black bookkeeping, each node carries its
//! wallet's own weight (the wallet's compensation weight, in atoms) and the total weight of its
//! subtree, so that the tree can answer "which wallet holds atom number `n` of the quorum" in
//! logarithmic time.

use crate::types::WalletID;

const NIL: u32 = 0;

#[derive(Clone, Debug)]
struct Node {
    id: WalletID,
    own_weight: u64,
    weight: u64,
    red: bool,
    left: u32,
    right: u32,
    parent: u32,
}

impl Node {
    fn sentinel() -> Node {
        Node {
            id: WalletID::new(0),
            own_weight: 0,
            weight: 0,
            red: false,
            left: NIL,
            right: NIL,
            parent: NIL,
        }
    }
}

#[derive(Clone, Debug)]
pub struct WalletTree {
    nodes: Vec<Node>,
    free: Vec<u32>,
    root: u32,
    len: usize,
}

impl Default for WalletTree {
    fn default() -> Self {
        Self::new()
    }
}

impl WalletTree {
    pub fn new() -> WalletTree {
        WalletTree {
            nodes: vec![Node::sentinel()],
            free: Vec::new(),
            root: NIL,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn total_weight(&self) -> u64 {
        self.nodes[self.root as usize].weight
    }

    pub fn contains(&self, id: WalletID) -> bool {
        self.find(id) != NIL
    }

    pub fn get_weight(&self, id: WalletID) -> Option<u64> {
        match self.find(id) {
            NIL => None,
            n => Some(self.nodes[n as usize].own_weight),
        }
    }

    /// Insert a wallet. Returns `false`, leaving the tree untouched, when the id is already present.
    pub fn insert(&mut self, id: WalletID, own_weight: u64) -> bool {
        let mut parent = NIL;
        let mut cursor = self.root;
        while cursor != NIL {
            parent = cursor;
            let node = &self.nodes[cursor as usize];
            if id == node.id {
                return false;
            }
            cursor = if id < node.id { node.left } else { node.right };
        }

        let z = self.alloc(Node {
            id,
            own_weight,
            weight: own_weight,
            red: true,
            left: NIL,
            right: NIL,
            parent,
        });
        if parent == NIL {
            self.root = z;
        } else if id < self.nodes[parent as usize].id {
            self.nodes[parent as usize].left = z;
        } else {
            self.nodes[parent as usize].right = z;
        }

        let mut ancestor = parent;
        while ancestor != NIL {
            self.nodes[ancestor as usize].weight += own_weight;
            ancestor = self.nodes[ancestor as usize].parent;
        }

        self.insert_fixup(z);
        self.len += 1;
        true
    }

    /// Change the own weight of a wallet and propagate the difference to the root. Returns `false`
    /// when the id is absent.
    pub fn update_weight(&mut self, id: WalletID, own_weight: u64) -> bool {
        let n = self.find(id);
        if n == NIL {
            return false;
        }
        self.nodes[n as usize].own_weight = own_weight;
        self.recompute_path(n);
        true
    }

    /// Remove a wallet. Returns `false` when the id is absent.
    pub fn remove(&mut self, id: WalletID) -> bool {
        let z = self.find(id);
        if z == NIL {
            return false;
        }

        let mut y = z;
        let mut y_was_red = self.red(y);
        let x;
        if self.left(z) == NIL {
            x = self.right(z);
            self.transplant(z, x);
        } else if self.right(z) == NIL {
            x = self.left(z);
            self.transplant(z, x);
        } else {
            y = self.minimum(self.right(z));
            y_was_red = self.red(y);
            x = self.right(y);
            if self.parent(y) == z {
                self.nodes[x as usize].parent = y;
            } else {
                self.transplant(y, x);
                let zr = self.right(z);
                self.nodes[y as usize].right = zr;
                self.nodes[zr as usize].parent = y;
            }
            self.transplant(z, y);
            let zl = self.left(z);
            self.nodes[y as usize].left = zl;
            self.nodes[zl as usize].parent = y;
            self.nodes[y as usize].red = self.red(z);
        }

        // Every node whose subtree changed lies on the path from x's parent to the root.
        self.recompute_path(self.parent(x));

        if !y_was_red {
            self.delete_fixup(x);
        }
        self.nodes[NIL as usize] = Node::sentinel();
        self.release(z);
        self.len -= 1;
        true
    }

    /// Find the wallet holding the `weight_index`-th unit of weight in id order, together with the
    /// offset of that unit inside the wallet's own weight.
    pub fn select(&self, mut weight_index: u64) -> Option<(WalletID, u64)> {
        let mut cursor = self.root;
        while cursor != NIL {
            let node = &self.nodes[cursor as usize];
            let left_weight = self.nodes[node.left as usize].weight;
            if weight_index < left_weight {
                cursor = node.left;
                continue;
            }
            weight_index -= left_weight;
            if weight_index < node.own_weight {
                return Some((node.id, weight_index));
            }
            weight_index -= node.own_weight;
            cursor = node.right;
        }
        None
    }

    pub fn ids_in_order(&self) -> Vec<WalletID> {
        let mut ids = Vec::with_capacity(self.len);
        let mut stack = Vec::new();
        let mut cursor = self.root;
        while cursor != NIL || !stack.is_empty() {
            while cursor != NIL {
                stack.push(cursor);
                cursor = self.left(cursor);
            }
            if let Some(n) = stack.pop() {
                ids.push(self.nodes[n as usize].id);
                cursor = self.right(n);
            }
        }
        ids
    }

    /// Ids in post-order: both subtrees of a node come before the node itself.
    pub fn post_order(&self) -> Vec<WalletID> {
        let mut ids = Vec::with_capacity(self.len);
        self.post_order_from(self.root, &mut ids);
        ids
    }

    fn post_order_from(&self, n: u32, ids: &mut Vec<WalletID>) {
        if n == NIL {
            return;
        }
        self.post_order_from(self.left(n), ids);
        self.post_order_from(self.right(n), ids);
        ids.push(self.nodes[n as usize].id);
    }

    /// Check the ordering, red-black and weight invariants of the whole tree.
    pub fn check_invariants(&self) -> Result<(), String> {
        if self.red(self.root) {
            return Err("root is red".into());
        }
        if self.nodes[NIL as usize].weight != 0 {
            return Err("sentinel carries weight".into());
        }
        let mut count = 0;
        self.check_subtree(self.root, None, None, &mut count)?;
        if count != self.len {
            return Err(format!("tree holds {} nodes but len is {}", count, self.len));
        }
        Ok(())
    }

    // Returns the black height of the subtree.
    fn check_subtree(
        &self,
        n: u32,
        low: Option<WalletID>,
        high: Option<WalletID>,
        count: &mut usize,
    ) -> Result<usize, String> {
        if n == NIL {
            return Ok(1);
        }
        *count += 1;
        let node = &self.nodes[n as usize];
        if low.map_or(false, |low| node.id <= low) || high.map_or(false, |high| node.id >= high) {
            return Err(format!("wallet {} is out of order", node.id));
        }
        if node.red && (self.red(node.left) || self.red(node.right)) {
            return Err(format!("red wallet {} has a red child", node.id));
        }
        for child in [node.left, node.right] {
            if child != NIL && self.parent(child) != n {
                return Err(format!("broken parent link under wallet {}", node.id));
            }
        }
        let expected =
            node.own_weight + self.nodes[node.left as usize].weight + self.nodes[node.right as usize].weight;
        if node.weight != expected {
            return Err(format!(
                "wallet {} has weight {} but its subtree weighs {}",
                node.id, node.weight, expected
            ));
        }
        let left = self.check_subtree(node.left, low, Some(node.id), count)?;
        let right = self.check_subtree(node.right, Some(node.id), high, count)?;
        if left != right {
            return Err(format!("unequal black heights under wallet {}", node.id));
        }
        Ok(left + if node.red { 0 } else { 1 })
    }

    fn find(&self, id: WalletID) -> u32 {
        let mut cursor = self.root;
        while cursor != NIL {
            let node = &self.nodes[cursor as usize];
            if id == node.id {
                return cursor;
            }
            cursor = if id < node.id { node.left } else { node.right };
        }
        NIL
    }

    fn alloc(&mut self, node: Node) -> u32 {
        match self.free.pop() {
            Some(slot) => {
                self.nodes[slot as usize] = node;
                slot
            }
            None => {
                self.nodes.push(node);
                (self.nodes.len() - 1) as u32
            }
        }
    }

    fn release(&mut self, n: u32) {
        self.nodes[n as usize] = Node::sentinel();
        self.free.push(n);
    }

    fn left(&self, n: u32) -> u32 {
        self.nodes[n as usize].left
    }

    fn right(&self, n: u32) -> u32 {
        self.nodes[n as usize].right
    }

    fn parent(&self, n: u32) -> u32 {
        self.nodes[n as usize].parent
    }

    fn red(&self, n: u32) -> bool {
        self.nodes[n as usize].red
    }

    fn minimum(&self, mut n: u32) -> u32 {
        while self.left(n) != NIL {
            n = self.left(n);
        }
        n
    }

    fn recompute(&mut self, n: u32) {
        if n == NIL {
            return;
        }
        let node = &self.nodes[n as usize];
        let weight =
            node.own_weight + self.nodes[node.left as usize].weight + self.nodes[node.right as usize].weight;
        self.nodes[n as usize].weight = weight;
    }

    fn recompute_path(&mut self, mut n: u32) {
        while n != NIL {
            self.recompute(n);
            n = self.parent(n);
        }
    }

    fn transplant(&mut self, u: u32, v: u32) {
        let up = self.parent(u);
        if up == NIL {
            self.root = v;
        } else if u == self.left(up) {
            self.nodes[up as usize].left = v;
        } else {
            self.nodes[up as usize].right = v;
        }
        self.nodes[v as usize].parent = up;
    }

    fn rotate_left(&mut self, x: u32) {
        let y = self.right(x);
        let yl = self.left(y);
        self.nodes[x as usize].right = yl;
        if yl != NIL {
            self.nodes[yl as usize].parent = x;
        }
        self.transplant(x, y);
        self.nodes[y as usize].left = x;
        self.nodes[x as usize].parent = y;
        self.recompute(x);
        self.recompute(y);
    }

    fn rotate_right(&mut self, x: u32) {
        let y = self.left(x);
        let yr = self.right(y);
        self.nodes[x as usize].left = yr;
        if yr != NIL {
            self.nodes[yr as usize].parent = x;
        }
        self.transplant(x, y);
        self.nodes[y as usize].right = x;
        self.nodes[x as usize].parent = y;
        self.recompute(x);
        self.recompute(y);
    }

    fn insert_fixup(&mut self, mut z: u32) {
        while self.red(self.parent(z)) {
            let p = self.parent(z);
            let g = self.parent(p);
            if p == self.left(g) {
                let uncle = self.right(g);
                if self.red(uncle) {
                    self.nodes[p as usize].red = false;
                    self.nodes[uncle as usize].red = false;
                    self.nodes[g as usize].red = true;
                    z = g;
                } else {
                    if z == self.right(p) {
                        z = p;
                        self.rotate_left(z);
                    }
                    let p = self.parent(z);
                    let g = self.parent(p);
                    self.nodes[p as usize].red = false;
                    self.nodes[g as usize].red = true;
                    self.rotate_right(g);
                }
            } else {
                let uncle = self.left(g);
                if self.red(uncle) {
                    self.nodes[p as usize].red = false;
                    self.nodes[uncle as usize].red = false;
                    self.nodes[g as usize].red = true;
                    z = g;
                } else {
                    if z == self.left(p) {
                        z = p;
                        self.rotate_right(z);
                    }
                    let p = self.parent(z);
                    let g = self.parent(p);
                    self.nodes[p as usize].red = false;
                    self.nodes[g as usize].red = true;
                    self.rotate_left(g);
                }
            }
        }
        let root = self.root;
        self.nodes[root as usize].red = false;
    }

    fn delete_fixup(&mut self, mut x: u32) {
        while x != self.root && !self.red(x) {
            let p = self.parent(x);
            if x == self.left(p) {
                let mut w = self.right(p);
                if self.red(w) {
                    self.nodes[w as usize].red = false;
                    self.nodes[p as usize].red = true;
                    self.rotate_left(p);
                    w = self.right(self.parent(x));
                }
                if !self.red(self.left(w)) && !self.red(self.right(w)) {
                    self.nodes[w as usize].red = true;
                    x = self.parent(x);
                } else {
                    if !self.red(self.right(w)) {
                        let wl = self.left(w);
                        self.nodes[wl as usize].red = false;
                        self.nodes[w as usize].red = true;
                        self.rotate_right(w);
                        w = self.right(self.parent(x));
                    }
                    let p = self.parent(x);
                    self.nodes[w as usize].red = self.red(p);
                    self.nodes[p as usize].red = false;
                    let wr = self.right(w);
                    self.nodes[wr as usize].red = false;
                    self.rotate_left(p);
                    x = self.root;
                }
            } else {
                let mut w = self.left(p);
                if self.red(w) {
                    self.nodes[w as usize].red = false;
                    self.nodes[p as usize].red = true;
                    self.rotate_right(p);
                    w = self.left(self.parent(x));
                }
                if !self.red(self.right(w)) && !self.red(self.left(w)) {
                    self.nodes[w as usize].red = true;
                    x = self.parent(x);
                } else {
                    if !self.red(self.left(w)) {
                        let wr = self.right(w);
                        self.nodes[wr as usize].red = false;
                        self.nodes[w as usize].red = true;
                        self.rotate_left(w);
                        w = self.left(self.parent(x));
                    }
                    let p = self.parent(x);
                    self.nodes[w as usize].red = self.red(p);
                    self.nodes[p as usize].red = false;
                    let wl = self.left(w);
                    self.nodes[wl as usize].red = false;
                    self.rotate_right(p);
                    x = self.root;
                }
            }
        }
        self.nodes[x as usize].red = false;
    }
}
