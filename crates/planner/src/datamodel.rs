//! Type-erased item/key datamodel shared by aggregation and the planner.
//!
//! Records flowing through a compiled graph are heterogeneous, so the graph
//! layer speaks [`DynItem`] and downcasts at the use site. Grouping keys stay
//! strongly typed through the closed [`Key`] enum so the external runtime can
//! hash and compare them without reflection.

use std::any::{type_name, Any};
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use weir_common::{Result, WeirError};

/// Type-erased record/value currency of the graph layer.
pub type DynItem = Box<dyn Any + Send + Sync>;

/// Grouping/partitioning key value.
///
/// Closed enum rather than a boxed `Any` so keys stay hashable, comparable and
/// serializable across members.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Key {
    I64(i64),
    U64(u64),
    Str(String),
    Bytes(Vec<u8>),
    Composite(Vec<Key>),
}

/// Keyed entry emitted by stage-1 accumulate vertices and consumed by stage-2
/// combine vertices. The stage boundary edge partitions on `key`.
pub struct Entry {
    pub key: Key,
    pub value: DynItem,
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry").field("key", &self.key).finish_non_exhaustive()
    }
}

/// Extracts the grouping key from an item.
pub type KeyFn = Arc<dyn Fn(&DynItem) -> Result<Key> + Send + Sync>;

/// Maps one item to at most one output item; `None` drops the item.
pub type MapFn = Arc<dyn Fn(DynItem) -> Result<Option<DynItem>> + Send + Sync>;

/// Keep/drop predicate over one item.
pub type FilterFn = Arc<dyn Fn(&DynItem) -> Result<bool> + Send + Sync>;

/// Maps (group key, aggregation result) to the output item of an aggregation
/// vertex.
pub type MapToOutputFn = Arc<dyn Fn(&Key, DynItem) -> Result<DynItem> + Send + Sync>;

/// Maps (group key, updated rolling result) to an optional output item;
/// `None` suppresses the emission.
pub type RollingOutputFn = Arc<dyn Fn(&Key, DynItem) -> Result<Option<DynItem>> + Send + Sync>;

/// Downcast helper used at every erased read site. A mismatch is a
/// configuration error, never a panic.
pub fn downcast_item<T: Any>(item: &DynItem) -> Result<&T> {
    item.downcast_ref::<T>().ok_or_else(|| {
        WeirError::InvalidConfig(format!("item type mismatch: expected {}", type_name::<T>()))
    })
}

/// Wraps a typed key extractor into a [`KeyFn`].
pub fn key_fn<T: Any>(f: impl Fn(&T) -> Key + Send + Sync + 'static) -> KeyFn {
    Arc::new(move |item| Ok(f(downcast_item::<T>(item)?)))
}

/// Wraps a typed mapper into a [`MapFn`].
pub fn map_fn<T: Any, OUT: Any + Send + Sync>(
    f: impl Fn(&T) -> Option<OUT> + Send + Sync + 'static,
) -> MapFn {
    Arc::new(move |item| Ok(f(downcast_item::<T>(&item)?).map(|out| Box::new(out) as DynItem)))
}

/// Wraps a typed predicate into a [`FilterFn`].
pub fn filter_fn<T: Any>(f: impl Fn(&T) -> bool + Send + Sync + 'static) -> FilterFn {
    Arc::new(move |item| Ok(f(downcast_item::<T>(item)?)))
}

/// Default aggregation output: the `(key, result)` pair as an [`Entry`].
pub fn entry_output_fn() -> MapToOutputFn {
    Arc::new(|key, value| {
        Ok(Box::new(Entry {
            key: key.clone(),
            value,
        }))
    })
}

/// Key function extracting the entry key of stage-1 output. The stage-1 to
/// stage-2 edge of a two-stage aggregation partitions with this function.
pub fn entry_key_fn() -> KeyFn {
    Arc::new(|item| Ok(downcast_item::<Entry>(item)?.key.clone()))
}

static NEXT_BUILDER_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_builder_id() -> u64 {
    NEXT_BUILDER_ID.fetch_add(1, Ordering::Relaxed)
}

/// Opaque handle addressing one input stream of a multi-way aggregation.
///
/// Tags are dense, zero-based ordinals issued by one co-aggregation builder;
/// they are only valid against accumulators and [`ItemsByTag`] values produced
/// by that same builder.
pub struct Tag<T> {
    builder: u64,
    ordinal: usize,
    _result: PhantomData<fn() -> T>,
}

impl<T> Tag<T> {
    pub(crate) fn new(builder: u64, ordinal: usize) -> Self {
        Self {
            builder,
            ordinal,
            _result: PhantomData,
        }
    }

    pub fn ordinal(&self) -> usize {
        self.ordinal
    }

    pub(crate) fn builder(&self) -> u64 {
        self.builder
    }
}

impl<T> Clone for Tag<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Tag<T> {}

impl<T> fmt::Debug for Tag<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tag({})", self.ordinal)
    }
}

/// Tag-addressed result of a co-aggregation: one exported value per registered
/// stream. Every tag issued by the owning builder has a present slot.
pub struct ItemsByTag {
    builder: u64,
    items: Vec<DynItem>,
}

impl ItemsByTag {
    pub(crate) fn new(builder: u64, items: Vec<DynItem>) -> Self {
        Self { builder, items }
    }

    /// Reads the result slot addressed by `tag`, downcasting to the tag's
    /// declared result type. Compile-time type safety is lost at this read
    /// site; a foreign tag or mismatched type is a configuration error.
    pub fn get<T: Any>(&self, tag: Tag<T>) -> Result<&T> {
        if tag.builder() != self.builder {
            return Err(WeirError::InvalidConfig(
                "tag was issued by a different co-aggregation builder".to_string(),
            ));
        }
        let slot = self.items.get(tag.ordinal()).ok_or_else(|| {
            WeirError::InvalidConfig(format!("no result slot for tag ordinal {}", tag.ordinal()))
        })?;
        slot.downcast_ref::<T>().ok_or_else(|| {
            WeirError::InvalidConfig(format!(
                "result type mismatch for tag ordinal {}: expected {}",
                tag.ordinal(),
                type_name::<T>()
            ))
        })
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl fmt::Debug for ItemsByTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ItemsByTag(len={})", self.items.len())
    }
}
