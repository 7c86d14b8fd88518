//! Generic dependency-graph node shared by pipelines and layers.
//!
//! Both graphs are trees rooted at a default node. Children are
//! ancestry-sharing descendants; a node is kept alive by explicit
//! references plus one reference per child.

use slotmap::{Key, SlotMap};
use smallvec::SmallVec;

/// Tree linkage embedded in every pipeline and layer.
#[derive(Debug)]
pub struct Node<K: Key> {
    pub parent: Option<K>,
    /// Whether the link to `parent` holds a counted reference. Weak
    /// dependants leave this unset so they never keep their source
    /// alive.
    pub has_parent_ref: bool,
    pub children: SmallVec<[K; 4]>,
    /// Outstanding references: user handles, strong child links, cache
    /// entries.
    pub ref_count: u32,
}

impl<K: Key> Node<K> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            parent: None,
            has_parent_ref: false,
            children: SmallVec::new(),
            ref_count: 1,
        }
    }

    #[must_use]
    pub fn has_children(&self) -> bool {
        !self.children.is_empty()
    }
}

impl<K: Key> Default for Node<K> {
    fn default() -> Self {
        Self::new()
    }
}

/// Access to the embedded [`Node`] from arena values.
pub trait GraphNode<K: Key> {
    fn node(&self) -> &Node<K>;
    fn node_mut(&mut self) -> &mut Node<K>;
}

// ─── Structural helpers ──────────────────────────────────────────────────────

/// Links `child` under `parent`, taking a reference on the parent when
/// `take_ref` is set.
///
/// Detaches from any previous parent first; the previous parent is
/// returned only when the old link held a reference, so the caller can
/// drop it.
pub fn set_parent<K, V>(arena: &mut SlotMap<K, V>, child: K, parent: K, take_ref: bool) -> Option<K>
where
    K: Key,
    V: GraphNode<K>,
{
    debug_assert_ne!(child, parent);

    let old_parent = detach(arena, child);

    let parent_node = arena[parent].node_mut();
    if take_ref {
        parent_node.ref_count += 1;
    }
    parent_node.children.push(child);
    let child_node = arena[child].node_mut();
    child_node.parent = Some(parent);
    child_node.has_parent_ref = take_ref;

    old_parent
}

/// Detaches `child` from its parent. Returns the former parent only
/// when the link held a reference the caller must now drop.
pub fn detach<K, V>(arena: &mut SlotMap<K, V>, child: K) -> Option<K>
where
    K: Key,
    V: GraphNode<K>,
{
    let child_node = arena[child].node_mut();
    let parent = child_node.parent.take()?;
    let counted = std::mem::take(&mut child_node.has_parent_ref);
    let siblings = &mut arena[parent].node_mut().children;
    if let Some(pos) = siblings.iter().position(|&c| c == child) {
        siblings.swap_remove(pos);
    }
    counted.then_some(parent)
}

/// Drops one reference from `key`. Returns `true` when the count hit
/// zero and the caller must destroy the value.
pub fn release_ref<K, V>(arena: &mut SlotMap<K, V>, key: K) -> bool
where
    K: Key,
    V: GraphNode<K>,
{
    let node = arena[key].node_mut();
    debug_assert!(node.ref_count > 0);
    node.ref_count -= 1;
    node.ref_count == 0
}
