//! Element tree diffing for reconcile deltas

use crate::body::Body;
use crate::delta::{DeltaFlags, ElementDelta, ElementDeltaBuilder};
use crate::handle::Handle;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Read access to installed bodies.
pub trait BodyLookup {
    fn lookup_body(&self, handle: &Handle) -> Option<Arc<Body>>;
}

impl BodyLookup for HashMap<Handle, Arc<Body>> {
    fn lookup_body(&self, handle: &Handle) -> Option<Arc<Body>> {
        self.get(handle).cloned()
    }
}

/// Records the body tree under the builder's root, and after the tree was
/// rebuilt, reports the differences into the builder.
pub struct ElementDifferencer {
    builder: ElementDeltaBuilder,
    old_bodies: HashMap<Handle, Arc<Body>>,
}

impl ElementDifferencer {
    pub fn new(builder: ElementDeltaBuilder, bodies: &dyn BodyLookup) -> Self {
        let mut old_bodies = HashMap::new();
        let mut stack = vec![builder.root().clone()];
        while let Some(handle) = stack.pop() {
            if let Some(body) = bodies.lookup_body(&handle) {
                stack.extend(body.children().iter().cloned());
                old_bodies.insert(handle, body);
            }
        }
        ElementDifferencer { builder, old_bodies }
    }

    /// Compare the recorded tree with the current one.
    pub fn build_delta(&mut self, bodies: &dyn BodyLookup) {
        let root = self.builder.root().clone();
        let old = self.old_bodies.get(&root).cloned();
        match (old, bodies.lookup_body(&root)) {
            (Some(old), Some(new)) => self.compare(&root, &old, &new, bodies),
            (None, Some(_)) => {
                self.builder.added(root, DeltaFlags::empty());
            }
            (Some(_), None) => {
                self.builder.removed(root, DeltaFlags::empty());
            }
            (None, None) => {}
        }
    }

    fn compare(&mut self, handle: &Handle, old: &Body, new: &Body, bodies: &dyn BodyLookup) {
        if new.content_differs(old, handle.category()) {
            self.builder
                .changed(handle.clone(), DeltaFlags::CONTENT | DeltaFlags::FINE_GRAINED);
        }

        let old_children: HashSet<&Handle> = old.children().iter().collect();
        let new_children: HashSet<&Handle> = new.children().iter().collect();
        for child in new.children() {
            if !old_children.contains(child) {
                self.builder.added(child.clone(), DeltaFlags::empty());
                continue;
            }
            let old_child = self.old_bodies.get(child).cloned();
            if let (Some(old_child), Some(new_child)) = (old_child, bodies.lookup_body(child)) {
                self.compare(child, &old_child, &new_child, bodies);
            }
        }
        for child in old.children() {
            if !new_children.contains(child) {
                self.builder.removed(child.clone(), DeltaFlags::empty());
            }
        }
    }

    pub fn is_empty_delta(&self) -> bool {
        self.builder.is_empty()
    }

    pub fn delta(&self) -> &ElementDelta {
        self.builder.delta()
    }

    pub fn into_delta(self) -> ElementDelta {
        self.builder.into_delta()
    }
}
