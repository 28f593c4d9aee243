//! Process-wide instance registry.
//!
//! One [`FixedLookupTable`] exists per payload type, handed out lazily and
//! kept for the life of the process: the first arena of a type creates the
//! table, the last one does not tear it down. Arenas register their header
//! at construction and clear their entry at drop; `deallocate` resolves a
//! slot's recorded instance index through the table to find the owner.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

use crate::addr::AddrTag;
use crate::arena::ArenaHeader;
use crate::table::FixedLookupTable;

/// Maximum number of simultaneously live arenas per payload type (10 bits).
pub const INSTANCE_TABLE_WIDTH: usize = 1 << 10;

// Instance indices ride in the tag counter field; make sure they fit.
const _: () = assert!(INSTANCE_TABLE_WIDTH as u64 - 1 <= AddrTag::COUNTER_MAX);

pub(crate) type InstanceTable<T> = FixedLookupTable<ArenaHeader<T>, INSTANCE_TABLE_WIDTH>;

static REGISTRY: OnceLock<Mutex<HashMap<TypeId, Box<dyn Any + Send + Sync>>>> = OnceLock::new();

/// The shared instance table for payload type `T`, created on first use.
pub(crate) fn instance_table<T: Send + 'static>() -> Arc<InstanceTable<T>> {
    let mut map = REGISTRY.get_or_init(|| Mutex::new(HashMap::new())).lock();
    map.entry(TypeId::of::<T>())
        .or_insert_with(|| Box::new(Arc::new(InstanceTable::<T>::new())))
        .downcast_ref::<Arc<InstanceTable<T>>>()
        .expect("registry entry is keyed by its payload type")
        .clone()
}
