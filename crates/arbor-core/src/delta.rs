//! Element deltas: trees describing how elements changed

use crate::handle::Handle;
use std::fmt;
use tracing::warn;

bitflags::bitflags! {
    /// Details of a change.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct DeltaFlags: u64 {
        const CHILDREN = 1 << 0;
        const CONTENT = 1 << 1;
        const MOVED_FROM = 1 << 2;
        const MOVED_TO = 1 << 3;
        const MARKERS = 1 << 4;
        const SYNC = 1 << 5;
        const WORKING_COPY = 1 << 6;
        const FINE_GRAINED = 1 << 7;
        const OPEN = 1 << 8;
        const UNDERLYING_RESOURCE = 1 << 9;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeltaKind {
    Added,
    Removed,
    Changed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ElementDelta {
    element: Handle,
    kind: DeltaKind,
    flags: DeltaFlags,
    moved_from: Option<Handle>,
    moved_to: Option<Handle>,
    children: Vec<ElementDelta>,
}

impl ElementDelta {
    fn new(element: Handle, kind: DeltaKind, flags: DeltaFlags) -> Self {
        ElementDelta {
            element,
            kind,
            flags,
            moved_from: None,
            moved_to: None,
            children: Vec::new(),
        }
    }

    pub fn element(&self) -> &Handle {
        &self.element
    }

    pub fn kind(&self) -> DeltaKind {
        self.kind
    }

    pub fn flags(&self) -> DeltaFlags {
        self.flags
    }

    pub fn moved_from(&self) -> Option<&Handle> {
        self.moved_from.as_ref()
    }

    pub fn moved_to(&self) -> Option<&Handle> {
        self.moved_to.as_ref()
    }

    pub fn children(&self) -> &[ElementDelta] {
        &self.children
    }

    pub fn added_children(&self) -> impl Iterator<Item = &ElementDelta> {
        self.children.iter().filter(|d| d.kind == DeltaKind::Added)
    }

    pub fn removed_children(&self) -> impl Iterator<Item = &ElementDelta> {
        self.children.iter().filter(|d| d.kind == DeltaKind::Removed)
    }

    pub fn changed_children(&self) -> impl Iterator<Item = &ElementDelta> {
        self.children.iter().filter(|d| d.kind == DeltaKind::Changed)
    }

    /// Delta for `element` anywhere in this tree.
    pub fn find(&self, element: &Handle) -> Option<&ElementDelta> {
        if &self.element == element {
            return Some(self);
        }
        if !self.element.is_ancestor_of(element) {
            return None;
        }
        self.children.iter().find_map(|child| child.find(element))
    }

    /// A changed delta that carries no information.
    pub fn is_empty(&self) -> bool {
        self.kind == DeltaKind::Changed
            && self.children.is_empty()
            && self.flags.difference(DeltaFlags::CHILDREN).is_empty()
    }

    fn child_index(&self, element: &Handle) -> Option<usize> {
        self.children.iter().position(|d| &d.element == element)
    }

    fn write_tree(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        let marker = match self.kind {
            DeltaKind::Added => "+",
            DeltaKind::Removed => "-",
            DeltaKind::Changed => "*",
        };
        write!(
            f,
            "{:indent$}{}[{}]: {{",
            "",
            self.element,
            marker,
            indent = depth * 2
        )?;
        let mut first = true;
        for (name, flag) in self.flags.iter_names() {
            if !first {
                write!(f, " | ")?;
            }
            first = false;
            write!(f, "{name}")?;
            if flag == DeltaFlags::MOVED_FROM {
                if let Some(from) = &self.moved_from {
                    write!(f, "({from})")?;
                }
            } else if flag == DeltaFlags::MOVED_TO {
                if let Some(to) = &self.moved_to {
                    write!(f, "({to})")?;
                }
            }
        }
        write!(f, "}}")?;
        for child in &self.children {
            writeln!(f)?;
            child.write_tree(f, depth + 1)?;
        }
        Ok(())
    }
}

impl fmt::Display for ElementDelta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_tree(f, 0)
    }
}

/// Whether `existing` survives merging `incoming` into it.
fn merge(existing: &mut ElementDelta, incoming: ElementDelta) -> bool {
    use DeltaKind::*;
    match (existing.kind, incoming.kind) {
        // Added then removed: nothing happened.
        (Added, Removed) => false,
        (Added, Changed) => true,
        (Removed, Added) => {
            existing.kind = Changed;
            existing.flags = DeltaFlags::CONTENT | incoming.flags;
            existing.moved_from = incoming.moved_from;
            existing.moved_to = incoming.moved_to;
            existing.children.clear();
            true
        }
        (Removed, _) => true,
        (Changed, Added) | (Changed, Removed) | (Added, Added) => {
            *existing = incoming;
            true
        }
        (Changed, Changed) => {
            existing.flags |= incoming.flags;
            if incoming.moved_from.is_some() {
                existing.moved_from = incoming.moved_from;
            }
            if incoming.moved_to.is_some() {
                existing.moved_to = incoming.moved_to;
            }
            for child in incoming.children {
                insert_child(existing, child);
            }
            true
        }
    }
}

fn insert_child(parent: &mut ElementDelta, delta: ElementDelta) {
    if parent.kind != DeltaKind::Changed {
        // Added and removed elements imply everything below them.
        return;
    }
    match parent.child_index(&delta.element) {
        Some(index) => {
            if !merge(&mut parent.children[index], delta) || parent.children[index].is_empty() {
                parent.children.remove(index);
            }
        }
        None => {
            if !delta.is_empty() {
                parent.children.push(delta);
            }
        }
    }
    if parent.children.is_empty() {
        parent.flags.remove(DeltaFlags::CHILDREN);
    } else {
        parent.flags.insert(DeltaFlags::CHILDREN);
    }
}

/// `path` holds the handles between `parent` and the delta's element.
fn insert_at(parent: &mut ElementDelta, path: &[Handle], delta: ElementDelta) {
    let Some((next, rest)) = path.split_first() else {
        insert_child(parent, delta);
        return;
    };
    if parent.kind != DeltaKind::Changed {
        return;
    }
    let index = match parent.child_index(next) {
        Some(index) => index,
        None => {
            parent.children.push(ElementDelta::new(
                next.clone(),
                DeltaKind::Changed,
                DeltaFlags::empty(),
            ));
            parent.children.len() - 1
        }
    };
    insert_at(&mut parent.children[index], rest, delta);
    if parent.children[index].is_empty() {
        parent.children.remove(index);
    }
    if parent.children.is_empty() {
        parent.flags.remove(DeltaFlags::CHILDREN);
    } else {
        parent.flags.insert(DeltaFlags::CHILDREN);
    }
}

/// Accumulates changes below a root element into one delta tree.
#[derive(Debug, Clone)]
pub struct ElementDeltaBuilder {
    root: ElementDelta,
}

impl ElementDeltaBuilder {
    pub fn new(root: Handle) -> Self {
        ElementDeltaBuilder {
            root: ElementDelta::new(root, DeltaKind::Changed, DeltaFlags::empty()),
        }
    }

    pub fn root(&self) -> &Handle {
        &self.root.element
    }

    pub fn added(&mut self, element: Handle, flags: DeltaFlags) -> &mut Self {
        self.insert(ElementDelta::new(element, DeltaKind::Added, flags))
    }

    pub fn removed(&mut self, element: Handle, flags: DeltaFlags) -> &mut Self {
        self.insert(ElementDelta::new(element, DeltaKind::Removed, flags))
    }

    pub fn changed(&mut self, element: Handle, flags: DeltaFlags) -> &mut Self {
        self.insert(ElementDelta::new(element, DeltaKind::Changed, flags))
    }

    /// `element` was added as the result of moving `from`.
    pub fn moved_from(&mut self, element: Handle, from: Handle) -> &mut Self {
        let mut delta = ElementDelta::new(element, DeltaKind::Added, DeltaFlags::MOVED_FROM);
        delta.moved_from = Some(from);
        self.insert(delta)
    }

    /// `element` was removed as the result of moving it to `to`.
    pub fn moved_to(&mut self, element: Handle, to: Handle) -> &mut Self {
        let mut delta = ElementDelta::new(element, DeltaKind::Removed, DeltaFlags::MOVED_TO);
        delta.moved_to = Some(to);
        self.insert(delta)
    }

    pub fn insert(&mut self, delta: ElementDelta) -> &mut Self {
        if delta.element == self.root.element {
            let mut merged = std::mem::replace(
                &mut self.root,
                ElementDelta::new(delta.element.clone(), DeltaKind::Changed, DeltaFlags::empty()),
            );
            if merge(&mut merged, delta) {
                self.root = merged;
            }
            return self;
        }
        if !self.root.element.is_ancestor_of(&delta.element) {
            warn!(
                "Ignoring delta for {:?} outside of {:?}",
                delta.element, self.root.element
            );
            return self;
        }
        let mut path: Vec<Handle> = delta
            .element
            .ancestors()
            .take_while(|a| **a != self.root.element)
            .cloned()
            .collect();
        path.reverse();
        insert_at(&mut self.root, &path, delta);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    pub fn delta(&self) -> &ElementDelta {
        &self.root
    }

    pub fn into_delta(self) -> ElementDelta {
        self.root
    }
}
