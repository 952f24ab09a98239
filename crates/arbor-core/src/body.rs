//! Element bodies: cached structure of a handle

use crate::handle::{ElementCategory, Handle};
use crate::snapshot::{snapshots_equal, SnapshotRef};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Byte range within source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TextRange {
    offset: usize,
    length: usize,
}

impl TextRange {
    pub fn new(offset: usize, length: usize) -> Self {
        TextRange { offset, length }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn length(&self) -> usize {
        self.length
    }

    pub fn end_offset(&self) -> usize {
        self.offset + self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Inclusive of the end offset, so a cursor placed right after an element
    /// still belongs to it.
    pub fn covers(&self, position: usize) -> bool {
        self.offset <= position && position <= self.end_offset()
    }
}

/// Typed key for a body property.
pub struct Property<T> {
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Property<T> {
    pub const fn new(name: &'static str) -> Self {
        Property {
            name,
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> Clone for Property<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Property<T> {}

impl<T> fmt::Debug for Property<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Property({})", self.name)
    }
}

/// Type-erased property value.
pub trait PropertyValue: Any + Send + Sync + fmt::Debug {
    fn as_any(&self) -> &dyn Any;
    fn eq_value(&self, other: &dyn PropertyValue) -> bool;
}

impl<T: Any + Send + Sync + fmt::Debug + PartialEq> PropertyValue for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn eq_value(&self, other: &dyn PropertyValue) -> bool {
        other.as_any().downcast_ref::<T>() == Some(self)
    }
}

/// Text-specific part of a body.
#[derive(Debug, Clone, Default)]
pub struct SourceInfo {
    pub full_range: Option<TextRange>,
    pub identifying_range: Option<TextRange>,
    pub snapshot: Option<SnapshotRef>,
}

/// Structure of one element: ordered children, properties and, for source
/// elements, text ranges plus the snapshot they were computed from.
///
/// Bodies are mutable while being built in a [`NewElements`] batch and shared
/// read-only once the model installs them.
#[derive(Debug, Clone)]
pub struct Body {
    children: Arc<[Handle]>,
    properties: Vec<(&'static str, Arc<dyn PropertyValue>)>,
    source: Option<SourceInfo>,
}

impl Default for Body {
    fn default() -> Self {
        Self::new()
    }
}

impl Body {
    pub fn new() -> Self {
        Body {
            children: Arc::from(Vec::new()),
            properties: Vec::new(),
            source: None,
        }
    }

    /// Body of a source file or construct.
    pub fn new_source() -> Self {
        Body {
            source: Some(SourceInfo::default()),
            ..Body::new()
        }
    }

    pub fn children(&self) -> &[Handle] {
        &self.children
    }

    pub fn set_children(&mut self, children: Vec<Handle>) {
        self.children = Arc::from(children);
    }

    pub fn add_child(&mut self, child: Handle) {
        let mut children = self.children.to_vec();
        children.push(child);
        self.children = Arc::from(children);
    }

    pub fn get<T: PropertyValue>(&self, property: &Property<T>) -> Option<&T> {
        self.properties
            .iter()
            .find(|(name, _)| *name == property.name())
            .and_then(|(_, value)| (**value).as_any().downcast_ref::<T>())
    }

    pub fn set<T: PropertyValue>(&mut self, property: &Property<T>, value: T) {
        let value: Arc<dyn PropertyValue> = Arc::new(value);
        match self
            .properties
            .iter_mut()
            .find(|(name, _)| *name == property.name())
        {
            Some(slot) => slot.1 = value,
            None => self.properties.push((property.name(), value)),
        }
    }

    pub fn property_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.properties.iter().map(|(name, _)| *name)
    }

    pub fn is_source(&self) -> bool {
        self.source.is_some()
    }

    pub fn full_range(&self) -> Option<TextRange> {
        self.source.as_ref().and_then(|s| s.full_range)
    }

    pub fn identifying_range(&self) -> Option<TextRange> {
        self.source.as_ref().and_then(|s| s.identifying_range)
    }

    pub fn snapshot(&self) -> Option<&SnapshotRef> {
        self.source.as_ref().and_then(|s| s.snapshot.as_ref())
    }

    fn source_mut(&mut self) -> &mut SourceInfo {
        self.source.get_or_insert_with(SourceInfo::default)
    }

    pub fn set_full_range(&mut self, range: TextRange) {
        self.source_mut().full_range = Some(range);
    }

    pub fn set_identifying_range(&mut self, range: TextRange) {
        self.source_mut().identifying_range = Some(range);
    }

    pub fn set_snapshot(&mut self, snapshot: SnapshotRef) {
        self.source_mut().snapshot = Some(snapshot);
    }

    /// Whether `self` (the new body) differs from `old` in content, as opposed
    /// to in its children. Source files compare range and snapshot, constructs
    /// compare both ranges, and every body compares its properties.
    pub fn content_differs(&self, old: &Body, category: ElementCategory) -> bool {
        match category {
            ElementCategory::SourceFile => {
                if self.full_range() != old.full_range()
                    || !snapshots_equal(self.snapshot(), old.snapshot())
                {
                    return true;
                }
            }
            ElementCategory::Construct => {
                if self.full_range() != old.full_range()
                    || self.identifying_range() != old.identifying_range()
                {
                    return true;
                }
            }
            _ => {}
        }
        self.properties_differ(old)
    }

    fn properties_differ(&self, old: &Body) -> bool {
        if self.properties.len() != old.properties.len() {
            return true;
        }
        self.properties.iter().any(|(name, value)| {
            match old.properties.iter().find(|(old_name, _)| old_name == name) {
                Some((_, old_value)) => !(**value).eq_value(&**old_value),
                None => true,
            }
        })
    }
}

/// Elements that have an ordered list of children.
pub trait HasChildren {
    fn children(&self) -> &[Handle];
}

/// Elements with a location in source text.
pub trait HasSourceRange {
    fn full_range(&self) -> Option<TextRange>;
    fn identifying_range(&self) -> Option<TextRange>;
    fn snapshot(&self) -> Option<&SnapshotRef>;
}

impl HasChildren for Body {
    fn children(&self) -> &[Handle] {
        Body::children(self)
    }
}

impl HasSourceRange for Body {
    fn full_range(&self) -> Option<TextRange> {
        Body::full_range(self)
    }

    fn identifying_range(&self) -> Option<TextRange> {
        Body::identifying_range(self)
    }

    fn snapshot(&self) -> Option<&SnapshotRef> {
        Body::snapshot(self)
    }
}

/// Batch of bodies produced by one structure build, installed atomically.
#[derive(Debug, Default)]
pub struct NewElements {
    bodies: HashMap<Handle, Body>,
}

impl NewElements {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, handle: Handle, body: Body) -> Option<Body> {
        self.bodies.insert(handle, body)
    }

    pub fn get(&self, handle: &Handle) -> Option<&Body> {
        self.bodies.get(handle)
    }

    pub fn get_mut(&mut self, handle: &Handle) -> Option<&mut Body> {
        self.bodies.get_mut(handle)
    }

    pub fn remove(&mut self, handle: &Handle) -> Option<Body> {
        self.bodies.remove(handle)
    }

    pub fn contains(&self, handle: &Handle) -> bool {
        self.bodies.contains_key(handle)
    }

    pub fn len(&self) -> usize {
        self.bodies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bodies.is_empty()
    }

    pub fn retain(&mut self, mut keep: impl FnMut(&Handle, &Body) -> bool) {
        self.bodies.retain(|handle, body| keep(handle, body));
    }

    /// Attach `snapshot` to `root` and every source body reachable from it.
    pub fn propagate_snapshot(&mut self, root: &Handle, snapshot: &SnapshotRef) {
        let mut stack = vec![root.clone()];
        while let Some(handle) = stack.pop() {
            if let Some(body) = self.bodies.get_mut(&handle) {
                if body.is_source() {
                    body.set_snapshot(snapshot.clone());
                }
                stack.extend(body.children().iter().cloned());
            }
        }
    }
}

impl IntoIterator for NewElements {
    type Item = (Handle, Body);
    type IntoIter = std::collections::hash_map::IntoIter<Handle, Body>;

    fn into_iter(self) -> Self::IntoIter {
        self.bodies.into_iter()
    }
}

/// Helper for builders: registers child bodies, disambiguating equal sibling
/// constructs by bumping their occurrence count, and attaches the collected
/// child lists to their parents on [`complete`](StructureHelper::complete).
pub struct StructureHelper<'a> {
    elements: &'a mut NewElements,
    children: Vec<(Handle, Vec<Handle>)>,
}

impl<'a> StructureHelper<'a> {
    pub fn new(elements: &'a mut NewElements) -> Self {
        StructureHelper {
            elements,
            children: Vec::new(),
        }
    }

    /// Add `child` with its built `body` under `parent` and return the
    /// handle actually used.
    pub fn push_child(&mut self, parent: &Handle, child: Handle, body: Body) -> Handle {
        let child = self.add_child(parent, child);
        self.elements.insert(child.clone(), body);
        child
    }

    /// Record `child` under `parent` without a body. Containers list their
    /// children this way; each child builds its own body when opened.
    pub fn add_child(&mut self, parent: &Handle, child: Handle) -> Handle {
        let mut child = child;
        while self.is_taken(&child) {
            child = child.with_occurrence(child.occurrence() + 1);
        }
        match self.children.iter_mut().find(|(p, _)| p == parent) {
            Some((_, list)) => list.push(child.clone()),
            None => self.children.push((parent.clone(), vec![child.clone()])),
        }
        child
    }

    fn is_taken(&self, child: &Handle) -> bool {
        self.elements.contains(child)
            || child
                .parent()
                .and_then(|parent| self.children.iter().find(|(p, _)| p == parent))
                .is_some_and(|(_, list)| list.contains(child))
    }

    /// Install the collected child lists. Parents without a body get an empty one.
    pub fn complete(self) {
        for (parent, children) in self.children {
            let source = matches!(
                parent.category(),
                ElementCategory::SourceFile | ElementCategory::Construct
            );
            if !self.elements.contains(&parent) {
                let body = if source { Body::new_source() } else { Body::new() };
                self.elements.insert(parent.clone(), body);
            }
            let Some(body) = self.elements.get_mut(&parent) else {
                continue;
            };
            let mut all = body.children().to_vec();
            all.extend(children);
            body.set_children(all);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::StringSnapshot;

    const SIGNATURE: Property<String> = Property::new("signature");
    const ARITY: Property<usize> = Property::new("arity");

    fn file() -> Handle {
        Handle::root("/ws").project("p").source_file("a.rs")
    }

    #[test]
    fn test_typed_properties() {
        let mut body = Body::new_source();
        body.set(&SIGNATURE, "fn f()".to_string());
        body.set(&ARITY, 0);
        body.set(&ARITY, 2);

        assert_eq!(body.get(&SIGNATURE).map(String::as_str), Some("fn f()"));
        assert_eq!(body.get(&ARITY), Some(&2));
        assert_eq!(body.property_names().count(), 2);
    }

    #[test]
    fn test_range_covers_is_end_inclusive() {
        let range = TextRange::new(4, 3);
        assert!(!range.covers(3));
        assert!(range.covers(4));
        assert!(range.covers(7));
        assert!(!range.covers(8));
    }

    #[test]
    fn test_content_differs() {
        let mut old = Body::new_source();
        old.set_full_range(TextRange::new(0, 10));
        old.set_identifying_range(TextRange::new(3, 1));
        old.set(&SIGNATURE, "fn f()".to_string());

        let same = old.clone();
        assert!(!same.content_differs(&old, ElementCategory::Construct));

        let mut moved = old.clone();
        moved.set_identifying_range(TextRange::new(4, 1));
        assert!(moved.content_differs(&old, ElementCategory::Construct));
        // Files only compare their full range and snapshot.
        assert!(!moved.content_differs(&old, ElementCategory::SourceFile));

        let mut retyped = old.clone();
        retyped.set(&SIGNATURE, "fn f(x: i32)".to_string());
        assert!(retyped.content_differs(&old, ElementCategory::Folder));
    }

    #[test]
    fn test_file_content_compares_snapshots() {
        let mut old = Body::new_source();
        old.set_full_range(TextRange::new(0, 3));
        old.set_snapshot(Arc::new(StringSnapshot::new("abc")));

        let mut same = old.clone();
        same.set_snapshot(Arc::new(StringSnapshot::new("abc")));
        assert!(!same.content_differs(&old, ElementCategory::SourceFile));

        let mut edited = old.clone();
        edited.set_snapshot(Arc::new(StringSnapshot::new("abd")));
        assert!(edited.content_differs(&old, ElementCategory::SourceFile));
    }

    #[test]
    fn test_structure_helper_resolves_duplicates() {
        let file = file();
        let mut elements = NewElements::new();
        elements.insert(file.clone(), Body::new_source());

        let mut helper = StructureHelper::new(&mut elements);
        let f1 = helper.push_child(&file, file.construct("fn", "f"), Body::new_source());
        let f2 = helper.push_child(&file, file.construct("fn", "f"), Body::new_source());
        let g = helper.push_child(&file, file.construct("fn", "g"), Body::new_source());
        helper.complete();

        assert_eq!(f1.occurrence(), 1);
        assert_eq!(f2.occurrence(), 2);
        assert_eq!(elements.get(&file).unwrap().children(), &[f1, f2, g]);
        assert_eq!(elements.len(), 4);
    }

    #[test]
    fn test_add_child_records_handle_only() {
        let folder = Handle::root("/ws").project("p").folder("src");
        let mut elements = NewElements::new();
        elements.insert(folder.clone(), Body::new());

        let mut helper = StructureHelper::new(&mut elements);
        let a = helper.add_child(&folder, folder.source_file("a.rs"));
        let b = helper.add_child(&folder, folder.source_file("b.rs"));
        let again = helper.add_child(&folder, folder.source_file("a.rs"));
        helper.complete();

        assert_eq!(again.occurrence(), 2);
        assert_eq!(elements.get(&folder).unwrap().children(), &[a.clone(), b.clone(), again]);
        assert_eq!(elements.len(), 1);
        assert!(!elements.contains(&a));
        assert!(!elements.contains(&b));
    }

    #[test]
    fn test_propagate_snapshot() {
        let file = file();
        let mut elements = NewElements::new();
        elements.insert(file.clone(), Body::new_source());
        let mut helper = StructureHelper::new(&mut elements);
        let m = helper.push_child(&file, file.construct("mod", "m"), Body::new_source());
        let f = helper.push_child(&m, m.construct("fn", "f"), Body::new_source());
        helper.complete();

        let snapshot: SnapshotRef = Arc::new(StringSnapshot::new("mod m { fn f() {} }"));
        elements.propagate_snapshot(&file, &snapshot);
        assert!(elements.get(&f).unwrap().snapshot().is_some());
        assert!(elements.get(&m).unwrap().snapshot().is_some());
    }
}
