//! Bounded name registries for sockets and stream buffers.
//!
//! A registry never owns its entries: it keeps `Weak` references so that an
//! entry whose owner went away simply disappears from listings. Mutation and
//! iteration share one lock, so a socket starting or stopping while the
//! console lists entries never observes a half-updated table.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use crate::{Error, Result};

/// Anything that can be looked up by name
pub trait Named {
    fn name(&self) -> &str;
}

struct Table<T> {
    entries: Vec<Weak<T>>,
    total: usize,
}

impl<T> Table<T> {
    fn prune(&mut self) {
        self.entries.retain(|entry| entry.strong_count() > 0);
    }
}

/// Fixed-capacity table of non-owning references
pub struct Registry<T> {
    label: &'static str,
    capacity: usize,
    table: Mutex<Table<T>>,
}

impl<T: Named> Registry<T> {
    /// Create an empty registry holding at most `capacity` live entries
    #[must_use]
    pub fn new(label: &'static str, capacity: usize) -> Self {
        Self {
            label,
            capacity,
            table: Mutex::new(Table {
                entries: Vec::new(),
                total: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Table<T>> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register an entry; registering the same entry twice is a no-op
    ///
    /// Returns the entry's position in the listing.
    ///
    /// # Errors
    /// Returns `RegistryFull` if every slot holds a live entry. The entry is
    /// still counted in [`Registry::total`].
    pub fn register(&self, item: &Arc<T>) -> Result<usize> {
        self.insert(item, false)
    }

    /// Register an entry whose name no other live entry uses
    ///
    /// The name check and the insertion happen under the same lock, so two
    /// callers racing with the same name cannot both succeed.
    ///
    /// # Errors
    /// Returns `DuplicateName` if a different live entry has this name, or
    /// `RegistryFull` as [`Registry::register`] does.
    pub fn register_unique(&self, item: &Arc<T>) -> Result<usize> {
        self.insert(item, true)
    }

    fn insert(&self, item: &Arc<T>, unique: bool) -> Result<usize> {
        let mut table = self.lock();
        table.prune();

        if let Some(index) = table
            .entries
            .iter()
            .position(|entry| std::ptr::eq(entry.as_ptr(), Arc::as_ptr(item)))
        {
            return Ok(index);
        }

        if unique
            && table
                .entries
                .iter()
                .filter_map(Weak::upgrade)
                .any(|entry| entry.name() == item.name())
        {
            return Err(Error::duplicate_name(item.name()));
        }

        table.total += 1;
        if table.entries.len() >= self.capacity {
            return Err(Error::registry_full(self.label, self.capacity));
        }
        table.entries.push(Arc::downgrade(item));
        Ok(table.entries.len() - 1)
    }

    /// Remove an entry, returning whether it was listed
    pub fn unregister(&self, item: &Arc<T>) -> bool {
        let mut table = self.lock();
        let before = table.entries.len();
        table
            .entries
            .retain(|entry| !std::ptr::eq(entry.as_ptr(), Arc::as_ptr(item)));
        let removed = table.entries.len() < before;
        if removed {
            table.total = table.total.saturating_sub(1);
        }
        table.prune();
        removed
    }

    /// Look an entry up by name
    pub fn find(&self, name: &str) -> Option<Arc<T>> {
        self.lock()
            .entries
            .iter()
            .filter_map(Weak::upgrade)
            .find(|entry| entry.name() == name)
    }

    /// Position of the named entry in the listing
    pub fn position(&self, name: &str) -> Option<usize> {
        let mut table = self.lock();
        table.prune();
        table
            .entries
            .iter()
            .filter_map(Weak::upgrade)
            .position(|entry| entry.name() == name)
    }

    /// Snapshot of every live entry, in registration order
    pub fn entries(&self) -> Vec<Arc<T>> {
        self.lock().entries.iter().filter_map(Weak::upgrade).collect()
    }

    /// Number of live listed entries
    pub fn len(&self) -> usize {
        let mut table = self.lock();
        table.prune();
        table.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries ever registered minus entries removed, including those that
    /// did not fit in the table
    pub fn total(&self) -> usize {
        self.lock().total
    }

    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    pub const fn label(&self) -> &'static str {
        self.label
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::thread;

    struct Item(String);

    impl Named for Item {
        fn name(&self) -> &str {
            &self.0
        }
    }

    fn item(name: &str) -> Arc<Item> {
        Arc::new(Item(name.to_string()))
    }

    #[test]
    fn register_is_idempotent() {
        let registry = Registry::new("test", 4);
        let a = item("a");
        assert_eq!(registry.register(&a).unwrap(), 0);
        assert_eq!(registry.register(&a).unwrap(), 0);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.total(), 1);
    }

    #[test]
    fn capacity_is_enforced() {
        let registry = Registry::new("test", 2);
        let a = item("a");
        let b = item("b");
        let c = item("c");
        registry.register(&a).unwrap();
        registry.register(&b).unwrap();
        assert!(matches!(
            registry.register(&c),
            Err(Error::RegistryFull { capacity: 2, .. })
        ));
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.total(), 3);
    }

    #[test]
    fn lookup_by_name_and_position() {
        let registry = Registry::new("test", 4);
        let a = item("alpha");
        let b = item("beta");
        registry.register(&a).unwrap();
        registry.register(&b).unwrap();

        assert_eq!(registry.position("beta"), Some(1));
        assert_eq!(registry.position("gamma"), None);
        assert!(Arc::ptr_eq(&registry.find("alpha").unwrap(), &a));
    }

    #[test]
    fn unregister_shifts_later_entries() {
        let registry = Registry::new("test", 4);
        let a = item("a");
        let b = item("b");
        registry.register(&a).unwrap();
        registry.register(&b).unwrap();

        assert!(registry.unregister(&a));
        assert!(!registry.unregister(&a));
        assert_eq!(registry.position("b"), Some(0));
    }

    #[test]
    fn unique_registration_refuses_live_name() {
        let registry = Registry::new("test", 4);
        let first = item("twin");
        let second = item("twin");
        assert_eq!(registry.register_unique(&first).unwrap(), 0);
        assert_eq!(registry.register_unique(&first).unwrap(), 0);
        assert!(matches!(
            registry.register_unique(&second),
            Err(Error::DuplicateName { ref name }) if name == "twin"
        ));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.total(), 1);

        drop(first);
        assert_eq!(registry.register_unique(&second).unwrap(), 0);
    }

    #[test]
    fn racing_same_name_registers_once() {
        let registry = Arc::new(Registry::new("test", 16));
        let barrier = Arc::new(Barrier::new(8));
        let workers: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    let entry = item("shared");
                    barrier.wait();
                    let outcome = registry.register_unique(&entry);
                    (outcome.is_ok(), entry)
                })
            })
            .collect();

        let results: Vec<_> = workers.into_iter().map(|w| w.join().unwrap()).collect();
        assert_eq!(results.iter().filter(|(won, _)| *won).count(), 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn dropped_entries_disappear() {
        let registry = Registry::new("test", 1);
        let a = item("a");
        registry.register(&a).unwrap();
        drop(a);

        assert!(registry.is_empty());
        let b = item("b");
        assert_eq!(registry.register(&b).unwrap(), 0);
    }
}
