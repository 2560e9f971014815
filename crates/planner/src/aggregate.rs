//! Reusable aggregate operations and tag-based co-aggregation.
//!
//! An [`AggregateOperation`] describes how one or more input streams fold into
//! a result: a create-accumulator factory, one accumulate function per input
//! ordinal, optional combine/deduct functions, and an export function. The
//! operation itself is stateless and reusable across any number of
//! accumulator instances; the external record runtime drives the functions.
//!
//! [`CoAggregateOperationBuilder`] composes single-input operations into one
//! multi-way operation whose accumulator is a slot array addressed by [`Tag`].

use std::any::{type_name, Any};
use std::fmt;
use std::sync::Arc;

use weir_common::{Result, WeirError};

use crate::datamodel::{downcast_item, next_builder_id, DynItem, ItemsByTag, Tag};

type CreateFn<A> = Arc<dyn Fn() -> A + Send + Sync>;
type AccumulateFn<A> = Arc<dyn Fn(&mut A, &DynItem) -> Result<()> + Send + Sync>;
type CombineFn<A> = Arc<dyn Fn(&mut A, &A) -> Result<()> + Send + Sync>;
type ExportFn<A, R> = Arc<dyn Fn(&A) -> Result<R> + Send + Sync>;

type DynCreateFn = Arc<dyn Fn() -> DynItem + Send + Sync>;
type DynAccumulateFn = Arc<dyn Fn(&mut DynItem, &DynItem) -> Result<()> + Send + Sync>;
type DynExportFn = Arc<dyn Fn(&DynItem) -> Result<DynItem> + Send + Sync>;

/// Description of how to accumulate `arity()` input streams into a result.
///
/// Contract: `combine` must be associative and commutative in effect, since
/// the two-stage aggregation path merges partial accumulators in arbitrary
/// order. An operation without `combine` is only legal on the single-stage
/// path. `deduct` is the inverse of `combine`, used for sliding-window
/// eviction, and requires `combine` to be present.
pub struct AggregateOperation<A, R> {
    create_fn: CreateFn<A>,
    accumulate_fns: Vec<AccumulateFn<A>>,
    combine_fn: Option<CombineFn<A>>,
    deduct_fn: Option<CombineFn<A>>,
    export_fn: ExportFn<A, R>,
}

impl<A, R> Clone for AggregateOperation<A, R> {
    fn clone(&self) -> Self {
        Self {
            create_fn: self.create_fn.clone(),
            accumulate_fns: self.accumulate_fns.clone(),
            combine_fn: self.combine_fn.clone(),
            deduct_fn: self.deduct_fn.clone(),
            export_fn: self.export_fn.clone(),
        }
    }
}

impl<A: 'static, R> AggregateOperation<A, R> {
    /// Starts a builder from the create-accumulator factory.
    pub fn builder(create: impl Fn() -> A + Send + Sync + 'static) -> AggregateOperationBuilder<A> {
        AggregateOperationBuilder::new(create)
    }

    /// Number of input streams this operation accumulates.
    pub fn arity(&self) -> usize {
        self.accumulate_fns.len()
    }

    pub fn create(&self) -> A {
        (self.create_fn)()
    }

    /// Accumulates one item from the input stream at `ordinal`.
    pub fn accumulate(&self, ordinal: usize, acc: &mut A, item: &DynItem) -> Result<()> {
        let f = self.accumulate_fns.get(ordinal).ok_or_else(|| {
            WeirError::InvalidConfig(format!("no accumulate function for ordinal {ordinal}"))
        })?;
        f(acc, item)
    }

    pub fn has_combine(&self) -> bool {
        self.combine_fn.is_some()
    }

    pub fn has_deduct(&self) -> bool {
        self.deduct_fn.is_some()
    }

    pub fn combine(&self, acc: &mut A, other: &A) -> Result<()> {
        let f = self.combine_fn.as_ref().ok_or_else(|| {
            WeirError::InvalidConfig("operation has no combine function".to_string())
        })?;
        f(acc, other)
    }

    pub fn deduct(&self, acc: &mut A, other: &A) -> Result<()> {
        let f = self.deduct_fn.as_ref().ok_or_else(|| {
            WeirError::InvalidConfig("operation has no deduct function".to_string())
        })?;
        f(acc, other)
    }

    pub fn export(&self, acc: &A) -> Result<R> {
        (self.export_fn)(acc)
    }
}

impl<A: Any + Send + Sync, R: Any + Send + Sync> AggregateOperation<A, R> {
    /// Type-erased form carried by transforms and vertices.
    pub fn erased(&self) -> DynAggregateOperation {
        let create = self.create_fn.clone();
        let accumulate_fns = self
            .accumulate_fns
            .iter()
            .map(|f| {
                let f = f.clone();
                let erased: DynAccumulateFn = Arc::new(move |acc: &mut DynItem, item: &DynItem| {
                    f(downcast_acc_mut::<A>(acc)?, item)
                });
                erased
            })
            .collect();
        let combine_fn = self.combine_fn.clone().map(erase_merge_fn::<A>);
        let deduct_fn = self.deduct_fn.clone().map(erase_merge_fn::<A>);
        let export = self.export_fn.clone();
        DynAggregateOperation {
            create_fn: Arc::new(move || Box::new(create()) as DynItem),
            accumulate_fns,
            combine_fn,
            deduct_fn,
            export_fn: Arc::new(move |acc: &DynItem| {
                Ok(Box::new(export(downcast_item::<A>(acc)?)?) as DynItem)
            }),
        }
    }
}

fn downcast_acc_mut<A: Any>(acc: &mut DynItem) -> Result<&mut A> {
    acc.downcast_mut::<A>().ok_or_else(|| {
        WeirError::InvalidConfig(format!(
            "accumulator type mismatch: expected {}",
            type_name::<A>()
        ))
    })
}

fn erase_merge_fn<A: Any>(f: CombineFn<A>) -> DynAccumulateFn {
    Arc::new(move |acc: &mut DynItem, other: &DynItem| {
        let other = downcast_item::<A>(other)?;
        f(downcast_acc_mut::<A>(acc)?, other)
    })
}

/// Step-by-step construction of an [`AggregateOperation`].
pub struct AggregateOperationBuilder<A> {
    create_fn: CreateFn<A>,
    accumulate_fns: Vec<AccumulateFn<A>>,
    combine_fn: Option<CombineFn<A>>,
    deduct_fn: Option<CombineFn<A>>,
}

impl<A: 'static> AggregateOperationBuilder<A> {
    pub fn new(create: impl Fn() -> A + Send + Sync + 'static) -> Self {
        Self {
            create_fn: Arc::new(create),
            accumulate_fns: Vec::new(),
            combine_fn: None,
            deduct_fn: None,
        }
    }

    /// Registers the accumulate function for the next input ordinal, typed
    /// over the stream's item type.
    pub fn and_accumulate<T: Any>(
        mut self,
        f: impl Fn(&mut A, &T) + Send + Sync + 'static,
    ) -> Self {
        self.accumulate_fns
            .push(Arc::new(move |acc: &mut A, item: &DynItem| {
                f(acc, downcast_item::<T>(item)?);
                Ok(())
            }));
        self
    }

    /// Registers an accumulate function over the erased item, for operations
    /// that do not inspect the item (e.g. counting).
    pub fn and_accumulate_raw(
        mut self,
        f: impl Fn(&mut A, &DynItem) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.accumulate_fns.push(Arc::new(f));
        self
    }

    pub fn and_combine(mut self, f: impl Fn(&mut A, &A) + Send + Sync + 'static) -> Self {
        self.combine_fn = Some(Arc::new(move |acc: &mut A, other: &A| {
            f(acc, other);
            Ok(())
        }));
        self
    }

    pub fn and_deduct(mut self, f: impl Fn(&mut A, &A) + Send + Sync + 'static) -> Self {
        self.deduct_fn = Some(Arc::new(move |acc: &mut A, other: &A| {
            f(acc, other);
            Ok(())
        }));
        self
    }

    /// Finishes the operation with the export function.
    pub fn and_export<R: 'static>(
        self,
        f: impl Fn(&A) -> R + Send + Sync + 'static,
    ) -> Result<AggregateOperation<A, R>> {
        if self.accumulate_fns.is_empty() {
            return Err(WeirError::InvalidConfig(
                "aggregate operation needs at least one accumulate function".to_string(),
            ));
        }
        if self.deduct_fn.is_some() && self.combine_fn.is_none() {
            return Err(WeirError::InvalidConfig(
                "deduct function requires a combine function".to_string(),
            ));
        }
        Ok(AggregateOperation {
            create_fn: self.create_fn,
            accumulate_fns: self.accumulate_fns,
            combine_fn: self.combine_fn,
            deduct_fn: self.deduct_fn,
            export_fn: Arc::new(move |acc: &A| Ok(f(acc))),
        })
    }
}

/// Fully type-erased aggregate operation used by the planner and vertices.
///
/// The accumulator travels as a [`DynItem`]; every function re-establishes the
/// concrete type internally and reports a mismatch as a configuration error.
#[derive(Clone)]
pub struct DynAggregateOperation {
    create_fn: DynCreateFn,
    accumulate_fns: Vec<DynAccumulateFn>,
    combine_fn: Option<DynAccumulateFn>,
    deduct_fn: Option<DynAccumulateFn>,
    export_fn: DynExportFn,
}

impl DynAggregateOperation {
    pub fn arity(&self) -> usize {
        self.accumulate_fns.len()
    }

    pub fn create(&self) -> DynItem {
        (self.create_fn)()
    }

    pub fn accumulate(&self, ordinal: usize, acc: &mut DynItem, item: &DynItem) -> Result<()> {
        let f = self.accumulate_fns.get(ordinal).ok_or_else(|| {
            WeirError::InvalidConfig(format!("no accumulate function for ordinal {ordinal}"))
        })?;
        f(acc, item)
    }

    pub fn has_combine(&self) -> bool {
        self.combine_fn.is_some()
    }

    pub fn has_deduct(&self) -> bool {
        self.deduct_fn.is_some()
    }

    pub fn combine(&self, acc: &mut DynItem, other: &DynItem) -> Result<()> {
        let f = self.combine_fn.as_ref().ok_or_else(|| {
            WeirError::InvalidConfig("operation has no combine function".to_string())
        })?;
        f(acc, other)
    }

    pub fn deduct(&self, acc: &mut DynItem, other: &DynItem) -> Result<()> {
        let f = self.deduct_fn.as_ref().ok_or_else(|| {
            WeirError::InvalidConfig("operation has no deduct function".to_string())
        })?;
        f(acc, other)
    }

    pub fn export(&self, acc: &DynItem) -> Result<DynItem> {
        (self.export_fn)(acc)
    }
}

impl fmt::Debug for DynAggregateOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynAggregateOperation")
            .field("arity", &self.arity())
            .field("has_combine", &self.has_combine())
            .field("has_deduct", &self.has_deduct())
            .finish()
    }
}

struct MemberOp {
    create_fn: DynCreateFn,
    accumulate_fn: DynAccumulateFn,
    combine_fn: Option<DynAccumulateFn>,
    deduct_fn: Option<DynAccumulateFn>,
    export_fn: DynExportFn,
}

/// Composes single-input aggregate operations into one multi-way operation.
///
/// Each [`add`](CoAggregateOperationBuilder::add) returns a fresh [`Tag`]; the
/// built operation's accumulator is a slot array with one slot per tag,
/// accumulate dispatches by tag ordinal, combine/deduct apply element-wise
/// (present iff every member supplies them), and export produces an
/// [`ItemsByTag`] or a caller-reduced custom output.
pub struct CoAggregateOperationBuilder {
    builder_id: u64,
    members: Vec<MemberOp>,
}

/// Starts an empty co-aggregation builder.
pub fn co_aggregate_operation_builder() -> CoAggregateOperationBuilder {
    CoAggregateOperationBuilder {
        builder_id: next_builder_id(),
        members: Vec::new(),
    }
}

impl CoAggregateOperationBuilder {
    /// Registers the aggregate operation for the next input stream and returns
    /// its tag. The member operation must accumulate exactly one stream.
    pub fn add<A: Any + Send + Sync, R: Any + Send + Sync>(
        &mut self,
        op: AggregateOperation<A, R>,
    ) -> Result<Tag<R>> {
        if op.arity() != 1 {
            return Err(WeirError::InvalidConfig(format!(
                "co-aggregated member operations must accumulate exactly one stream, got {}",
                op.arity()
            )));
        }
        let erased = op.erased();
        let ordinal = self.members.len();
        self.members.push(MemberOp {
            create_fn: erased.create_fn,
            accumulate_fn: erased.accumulate_fns.into_iter().next().ok_or_else(|| {
                WeirError::InvalidConfig("member operation lost its accumulate function".to_string())
            })?,
            combine_fn: erased.combine_fn,
            deduct_fn: erased.deduct_fn,
            export_fn: erased.export_fn,
        });
        Ok(Tag::new(self.builder_id, ordinal))
    }

    /// Builds the composite operation exporting an [`ItemsByTag`].
    pub fn build(self) -> Result<AggregateOperation<Vec<DynItem>, ItemsByTag>> {
        self.build_impl(Arc::new(|ibt: ItemsByTag| Ok(ibt)))
    }

    /// Builds the composite operation with a caller-supplied function reducing
    /// the by-tag results to a custom output.
    pub fn build_with<OUT: Any + Send + Sync>(
        self,
        export: impl Fn(&ItemsByTag) -> Result<OUT> + Send + Sync + 'static,
    ) -> Result<AggregateOperation<Vec<DynItem>, OUT>> {
        self.build_impl(Arc::new(move |ibt: ItemsByTag| export(&ibt)))
    }

    fn build_impl<OUT: 'static>(
        self,
        finish: Arc<dyn Fn(ItemsByTag) -> Result<OUT> + Send + Sync>,
    ) -> Result<AggregateOperation<Vec<DynItem>, OUT>> {
        if self.members.is_empty() {
            return Err(WeirError::InvalidConfig(
                "co-aggregation builder has no registered streams".to_string(),
            ));
        }
        let builder_id = self.builder_id;
        let members = Arc::new(self.members);

        let create_members = members.clone();
        let create_fn: CreateFn<Vec<DynItem>> = Arc::new(move || {
            create_members.iter().map(|m| (m.create_fn)()).collect()
        });

        let accumulate_fns = (0..members.len())
            .map(|ordinal| {
                let members = members.clone();
                let f: AccumulateFn<Vec<DynItem>> =
                    Arc::new(move |acc: &mut Vec<DynItem>, item: &DynItem| {
                        let slot = acc.get_mut(ordinal).ok_or_else(|| missing_slot(ordinal))?;
                        (members[ordinal].accumulate_fn)(slot, item)
                    });
                f
            })
            .collect();

        let combine_fn = if members.iter().all(|m| m.combine_fn.is_some()) {
            Some(elementwise_merge(members.clone(), |m| &m.combine_fn))
        } else {
            None
        };
        let deduct_fn = if members.iter().all(|m| m.deduct_fn.is_some()) {
            Some(elementwise_merge(members.clone(), |m| &m.deduct_fn))
        } else {
            None
        };

        let export_members = members;
        let export_fn: ExportFn<Vec<DynItem>, OUT> = Arc::new(move |acc: &Vec<DynItem>| {
            let mut items = Vec::with_capacity(export_members.len());
            for (ordinal, member) in export_members.iter().enumerate() {
                let slot = acc.get(ordinal).ok_or_else(|| missing_slot(ordinal))?;
                items.push((member.export_fn)(slot)?);
            }
            finish(ItemsByTag::new(builder_id, items))
        });

        Ok(AggregateOperation {
            create_fn,
            accumulate_fns,
            combine_fn,
            deduct_fn,
            export_fn,
        })
    }
}

fn missing_slot(ordinal: usize) -> WeirError {
    WeirError::InvalidConfig(format!("missing accumulator slot for tag ordinal {ordinal}"))
}

fn elementwise_merge(
    members: Arc<Vec<MemberOp>>,
    select: impl Fn(&MemberOp) -> &Option<DynAccumulateFn> + Send + Sync + 'static,
) -> CombineFn<Vec<DynItem>> {
    Arc::new(move |acc: &mut Vec<DynItem>, other: &Vec<DynItem>| {
        for (ordinal, member) in members.iter().enumerate() {
            let f = select(member)
                .as_ref()
                .ok_or_else(|| missing_slot(ordinal))?;
            let slot = acc.get_mut(ordinal).ok_or_else(|| missing_slot(ordinal))?;
            let other_slot = other.get(ordinal).ok_or_else(|| missing_slot(ordinal))?;
            f(slot, other_slot)?;
        }
        Ok(())
    })
}

/// Counts accumulated items, ignoring their type.
pub fn counting() -> AggregateOperation<i64, i64> {
    AggregateOperation {
        create_fn: Arc::new(|| 0),
        accumulate_fns: vec![Arc::new(|acc: &mut i64, _item: &DynItem| {
            *acc += 1;
            Ok(())
        })],
        combine_fn: Some(Arc::new(|acc: &mut i64, other: &i64| {
            *acc += *other;
            Ok(())
        })),
        deduct_fn: Some(Arc::new(|acc: &mut i64, other: &i64| {
            *acc -= *other;
            Ok(())
        })),
        export_fn: Arc::new(|acc: &i64| Ok(*acc)),
    }
}

/// Sums an `i64` projection of each item.
pub fn summing_i64<T: Any>(
    get: impl Fn(&T) -> i64 + Send + Sync + 'static,
) -> AggregateOperation<i64, i64> {
    AggregateOperation {
        create_fn: Arc::new(|| 0),
        accumulate_fns: vec![Arc::new(move |acc: &mut i64, item: &DynItem| {
            *acc += get(downcast_item::<T>(item)?);
            Ok(())
        })],
        combine_fn: Some(Arc::new(|acc: &mut i64, other: &i64| {
            *acc += *other;
            Ok(())
        })),
        deduct_fn: Some(Arc::new(|acc: &mut i64, other: &i64| {
            *acc -= *other;
            Ok(())
        })),
        export_fn: Arc::new(|acc: &i64| Ok(*acc)),
    }
}
