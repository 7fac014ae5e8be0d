use std::any::Any;
use std::fmt::Debug;
use std::hash::Hash;
use std::marker::PhantomData;

use tracing::debug;

use super::table::{ReassemblyTable, TableStats};

/// A table the registry can reset and report on.
pub trait ManagedTable: Any {
    fn name(&self) -> &str;

    /// Drop all state, as when a new capture is loaded.
    fn clear(&mut self);

    fn stats(&self) -> TableStats;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<K> ManagedTable for ReassemblyTable<K>
where
    K: Eq + Hash + Clone + Debug + 'static,
{
    fn name(&self) -> &str {
        ReassemblyTable::name(self)
    }

    fn clear(&mut self) {
        ReassemblyTable::clear(self)
    }

    fn stats(&self) -> TableStats {
        ReassemblyTable::stats(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Typed handle returned by [`ReassemblyRegistry::register`].
#[derive(Debug)]
pub struct TableId<T> {
    index: usize,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for TableId<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for TableId<T> {}

/// Registry of every reassembly table in use.
///
/// Decoders register their tables once at startup; loading a new capture
/// resets all of them together.
pub struct ReassemblyRegistry {
    tables: Vec<Box<dyn ManagedTable>>,
}

impl ReassemblyRegistry {
    pub fn new() -> Self {
        Self { tables: Vec::new() }
    }

    /// Register a table and return a handle to it.
    pub fn register<T: ManagedTable>(&mut self, table: T) -> TableId<T> {
        debug!(table = table.name(), "Registered reassembly table");
        self.tables.push(Box::new(table));
        TableId {
            index: self.tables.len() - 1,
            _marker: PhantomData,
        }
    }

    pub fn get<T: ManagedTable>(&self, id: TableId<T>) -> Option<&T> {
        self.tables.get(id.index)?.as_any().downcast_ref()
    }

    pub fn get_mut<T: ManagedTable>(&mut self, id: TableId<T>) -> Option<&mut T> {
        self.tables.get_mut(id.index)?.as_any_mut().downcast_mut()
    }

    /// Clear every registered table.
    pub fn reset_all(&mut self) {
        for table in &mut self.tables {
            table.clear();
        }
        debug!(tables = self.tables.len(), "Reset all reassembly tables");
    }

    /// Get all registered table names.
    pub fn table_names(&self) -> Vec<&str> {
        self.tables.iter().map(|t| t.name()).collect()
    }

    /// Stats for every registered table, in registration order.
    pub fn stats(&self) -> Vec<(&str, TableStats)> {
        self.tables.iter().map(|t| (t.name(), t.stats())).collect()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

impl Default for ReassemblyRegistry {
    fn default() -> Self {
        Self::new()
    }
}
