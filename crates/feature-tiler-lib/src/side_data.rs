//! Side tables for variable size payloads
//!
//! Names and icons are stored once in a table and referenced from binary
//! features by integer id. Id 0 is reserved for "no side data".

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use dashmap::DashMap;

use crate::{Error, Result};

/// Tag of the table holding feature names
pub const STRING_TABLE: &str = "string";
/// Tag of the table holding place icons
pub const IMAGE_TABLE: &str = "image";

/// A value that can live in a side table.
pub trait TableValue: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static {
    /// Registry tag of the table holding this type
    const TAG: &'static str;

    fn to_bytes(&self) -> Vec<u8>;

    fn from_bytes(bytes: Vec<u8>) -> Result<Self>;
}

impl TableValue for String {
    const TAG: &'static str = STRING_TABLE;

    fn to_bytes(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }

    fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        String::from_utf8(bytes).map_err(|e| Error::InvalidArgument(format!("side string: {e}")))
    }
}

impl TableValue for Vec<u8> {
    const TAG: &'static str = IMAGE_TABLE;

    fn to_bytes(&self) -> Vec<u8> {
        self.clone()
    }

    fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        Ok(bytes)
    }
}

/// Append-only interning table. Safe to share between worker threads.
#[derive(Debug)]
pub struct Table<T: TableValue> {
    values: DashMap<i64, T>,
    ids: DashMap<T, i64>,
    next: AtomicI64,
}

impl<T: TableValue> Default for Table<T> {
    fn default() -> Self {
        Self {
            values: DashMap::new(),
            ids: DashMap::new(),
            next: AtomicI64::new(1),
        }
    }
}

impl<T: TableValue> Table<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a value and return its id. Equal values share one id.
    pub fn add(&self, value: T) -> i64 {
        if let Some(id) = self.ids.get(&value) {
            return *id;
        }
        *self
            .ids
            .entry(value.clone())
            .or_insert_with(|| {
                let id = self.next.fetch_add(1, Ordering::Relaxed);
                self.values.insert(id, value);
                id
            })
            .value()
    }

    /// The value behind `id`; id 0 and unknown ids yield `None`.
    pub fn try_get(&self, id: i64) -> Option<T> {
        if id == 0 {
            return None;
        }
        self.values.get(&id).map(|v| v.value().clone())
    }

    /// This is O(1)
    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// All entries sorted by id.
    pub fn entries(&self) -> Vec<(i64, T)> {
        let mut entries: Vec<(i64, T)> = self
            .values
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        entries.sort_unstable_by_key(|(id, _)| *id);
        entries
    }

    /// Drop every entry; ids start again at 1.
    pub fn clear(&self) {
        self.ids.clear();
        self.values.clear();
        self.next.store(1, Ordering::Relaxed);
    }

    /// Put back a previously saved entry, keeping its id.
    pub(crate) fn restore(&self, id: i64, value: T) -> Result<()> {
        if id <= 0 {
            return Err(Error::InvalidArgument(format!("side table id {id} is reserved")));
        }
        self.ids.insert(value.clone(), id);
        self.values.insert(id, value);
        self.next.fetch_max(id + 1, Ordering::Relaxed);
        Ok(())
    }
}

/// Registry-wide operations on a table of unknown value type.
trait AnyTable: fmt::Debug + Send + Sync {
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;

    fn clear(&self);
}

impl<T: TableValue> AnyTable for Table<T> {
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }

    fn clear(&self) {
        Table::<T>::clear(self);
    }
}

/// Registry of side tables keyed by value type tag.
#[derive(Debug, Default, Clone)]
pub struct SideData {
    tables: HashMap<&'static str, Arc<dyn AnyTable>>,
}

impl SideData {
    /// Registry with a string table and an image table.
    pub fn new() -> Self {
        let mut side_data = Self::empty();
        side_data.tables.insert(STRING_TABLE, Arc::new(Table::<String>::new()));
        side_data.tables.insert(IMAGE_TABLE, Arc::new(Table::<Vec<u8>>::new()));
        side_data
    }

    /// Registry without any tables.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Add a table; each value type may only be registered once.
    pub fn register<T: TableValue>(&mut self, table: Table<T>) -> Result<()> {
        if self.tables.contains_key(T::TAG) {
            return Err(Error::DuplicateTable(T::TAG.to_string()));
        }
        self.tables.insert(T::TAG, Arc::new(table));
        Ok(())
    }

    pub fn has<T: TableValue>(&self) -> bool {
        self.tables.contains_key(T::TAG)
    }

    /// The table for `T`.
    pub fn table<T: TableValue>(&self) -> Result<Arc<Table<T>>> {
        self.tables
            .get(T::TAG)
            .cloned()
            .and_then(|table| table.into_any().downcast::<Table<T>>().ok())
            .ok_or_else(|| Error::MissingTable(T::TAG.to_string()))
    }

    /// Empty every registered table. Clones of the registry see the change.
    pub fn clear(&self) {
        for table in self.tables.values() {
            table.clear();
        }
    }

    /// Intern a value, 0 when no table for it is registered.
    pub(crate) fn intern<T: TableValue>(&self, value: T) -> i64 {
        self.table::<T>().map(|t| t.add(value)).unwrap_or(0)
    }

    /// Look up an id, falling back to the type's default.
    pub(crate) fn resolve<T: TableValue + Default>(&self, id: i64) -> T {
        self.table::<T>()
            .ok()
            .and_then(|t| t.try_get(id))
            .unwrap_or_default()
    }
}
