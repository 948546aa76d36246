//! The tracked-pointer registry: one record per distinct tracked address.
//!
//! The registry is the single source of truth for liveness and aliasing.
//! Centralising status in one table (rather than per-handle flags) is what
//! makes aliasing detectable: two handles that share an address without
//! knowing about each other must still agree on liveness, which only a
//! shared table can guarantee.
//!
//! A [`Registry`] is an explicitly constructed object owned by the
//! application or test harness — there is no process-wide singleton, and
//! independent registries (per arena, per subsystem, per test) can coexist.
//! `Registry` itself is a cheap clonable alias of the shared table, so
//! handles can consult it from `Clone` and `Drop`.

use std::cell::RefCell;
use std::rc::Rc;

use indexmap::IndexMap;
use tracing::{trace, warn};

use crate::config::RegistryConfig;
use crate::error::{fault, Violation};
use crate::record::{Record, RecordId, RecordStatus};

/// The address → record table behind a [`Registry`].
///
/// `addr_ids` maps each address to its *current* record; `records` holds
/// every record ever created, tombstones included, indexed by [`RecordId`].
/// Ids are therefore stable and never reused even though addresses may be.
/// `IndexMap` (not `HashMap`) keeps leak reports in registration order.
struct Tables {
    addr_ids: IndexMap<usize, RecordId>,
    records: Vec<Record>,
    config: RegistryConfig,
}

impl Tables {
    fn record(&self, id: RecordId) -> &Record {
        let Some(record) = self.records.get(id.0 as usize) else {
            fault(Violation::UnknownRecord {
                id,
                records: self.records.len(),
            });
        };
        record
    }

    fn record_mut(&mut self, id: RecordId) -> &mut Record {
        let records = self.records.len();
        let Some(record) = self.records.get_mut(id.0 as usize) else {
            fault(Violation::UnknownRecord { id, records });
        };
        record
    }

    fn push_record(&mut self, addr: usize, record: Record) -> RecordId {
        // Re-registration is legal only over a tombstone (allocator reuse).
        // A live record claiming the same address means the caller re-wrapped
        // an alias without going through the copy path.
        if let Some(&current) = self.addr_ids.get(&addr) {
            if self.record(current).is_live() {
                fault(Violation::AddressInUse { id: current, addr });
            }
        }
        let id = RecordId(self.records.len() as u64);
        if self.config.abort_on_register == Some(id) {
            eprintln!("tether: aborting at registration of record {id} ({})", crate::config::ENV_ABORT_ON_REGISTER);
            std::process::abort();
        }
        self.records.push(record);
        self.addr_ids.insert(addr, id);
        id
    }

    fn leaked(&self) -> usize {
        self.records.iter().filter(|r| r.is_live()).count()
    }
}

impl Drop for Tables {
    fn drop(&mut self) {
        // Advisory teardown report: records never marked deleted are leaks.
        let leaked = self.leaked();
        if leaked > 0 {
            warn!(
                leaked,
                total = self.records.len(),
                "registry dropped with undeleted records"
            );
        }
    }
}

/// A shared table of tracked-pointer records.
///
/// Cloning a `Registry` clones the alias, not the table: every clone sees
/// the same records. The `Rc` inside makes `Registry` (and every handle
/// bound to it) `!Send`, so the single-threaded discipline the table
/// requires is enforced by the compiler rather than by documentation.
///
/// # Examples
///
/// ```
/// use tether::{Registry, RegistryConfig};
///
/// let registry = Registry::new();
/// assert_eq!(registry.record_count(), 0);
///
/// let verbose = Registry::with_config(RegistryConfig { trace: true, ..RegistryConfig::new() });
/// assert_eq!(verbose.leak_count(), 0);
/// ```
#[derive(Clone)]
pub struct Registry {
    tables: Rc<RefCell<Tables>>,
}

impl Registry {
    /// Create an empty registry with default configuration.
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::new())
    }

    /// Create an empty registry with the given configuration.
    pub fn with_config(config: RegistryConfig) -> Self {
        Self {
            tables: Rc::new(RefCell::new(Tables {
                addr_ids: IndexMap::new(),
                records: Vec::new(),
                config,
            })),
        }
    }

    /// Create an empty registry configured from the `TETHER_*` environment
    /// variables. See [`RegistryConfig::from_env`].
    pub fn from_env() -> Self {
        Self::with_config(RegistryConfig::from_env())
    }

    /// Enable or disable per-transition trace logging.
    pub fn set_trace(&self, on: bool) {
        self.tables.borrow_mut().config.trace = on;
    }

    /// Whether per-transition trace logging is enabled.
    pub fn trace_enabled(&self) -> bool {
        self.tables.borrow().config.trace
    }

    /// Register a scalar allocation at `addr`.
    ///
    /// The constructing handle counts as the first alias. Faults if `addr`
    /// is zero, or if a live record already claims `addr`. Registering over
    /// a deleted tombstone is legal (the allocator reused the address) and
    /// yields a fresh id.
    pub fn register(&self, addr: usize) -> RecordId {
        if addr == 0 {
            fault(Violation::NullAccess { op: "register" });
        }
        let mut tables = self.tables.borrow_mut();
        let id = tables.push_record(addr, Record::new(addr));
        if tables.config.trace {
            trace!(%id, addr, "register");
        }
        id
    }

    /// Register an array allocation at `addr` spanning `array_bytes` bytes.
    ///
    /// As [`Registry::register`], and additionally faults if `array_bytes`
    /// is zero.
    pub fn register_array(&self, addr: usize, array_bytes: usize) -> RecordId {
        if addr == 0 {
            fault(Violation::NullAccess { op: "register" });
        }
        if array_bytes == 0 {
            fault(Violation::EmptyArray { addr });
        }
        let mut tables = self.tables.borrow_mut();
        let id = tables.push_record(addr, Record::new_array(addr, array_bytes));
        if tables.config.trace {
            trace!(%id, addr, array_bytes, "register array");
        }
        id
    }

    /// Count one more live handle against `id`.
    ///
    /// Faults if the record is deleted: retaining a stale record means a
    /// dangling handle was copied.
    pub fn retain(&self, id: RecordId) {
        let mut tables = self.tables.borrow_mut();
        let record = tables.record_mut(id);
        if !record.is_live() {
            fault(Violation::UseAfterFree {
                id,
                addr: record.addr,
                op: "retain",
            });
        }
        record.aliases += 1;
        let aliases = record.aliases;
        if tables.config.trace {
            trace!(%id, aliases, "retain");
        }
    }

    /// Count one live handle fewer against `id`.
    ///
    /// The final release of a live record takes the count to zero without
    /// re-validating — that is the normal fate of the last handle. A release
    /// at zero on a live record faults ([`Violation::AliasUnderflow`]): it
    /// signals a bookkeeping bug, not a user error. A release at zero on a
    /// deleted tombstone is ignored.
    pub fn release(&self, id: RecordId) {
        let mut tables = self.tables.borrow_mut();
        let record = tables.record_mut(id);
        if record.aliases == 0 {
            if record.is_live() {
                fault(Violation::AliasUnderflow {
                    id,
                    addr: record.addr,
                });
            }
            return;
        }
        record.aliases -= 1;
        let aliases = record.aliases;
        if tables.config.trace {
            trace!(%id, aliases, "release");
        }
    }

    /// Transition `id` to the deleted state.
    ///
    /// Faults if the record is already deleted — that is a double free.
    /// The record stays in the table as a tombstone; its address becomes
    /// available for re-registration.
    pub fn mark_deleted(&self, id: RecordId) {
        let mut tables = self.tables.borrow_mut();
        if tables.config.abort_on_delete == Some(id) {
            eprintln!("tether: aborting at deletion of record {id} ({})", crate::config::ENV_ABORT_ON_DELETE);
            std::process::abort();
        }
        let record = tables.record_mut(id);
        if !record.is_live() {
            fault(Violation::DoubleFree {
                id,
                addr: record.addr,
            });
        }
        record.status = RecordStatus::Deleted;
        let addr = record.addr;
        if tables.config.trace {
            trace!(%id, addr, "mark deleted");
        }
    }

    /// Whether `id` has not been deleted. Faults on an out-of-range id.
    pub fn is_live(&self, id: RecordId) -> bool {
        self.tables.borrow().record(id).is_live()
    }

    /// Whether `id` is a live array record. Faults on an out-of-range id.
    pub fn is_array(&self, id: RecordId) -> bool {
        self.tables.borrow().record(id).status == RecordStatus::ActiveArray
    }

    /// Byte span recorded for `id`. Zero for scalar records. Faults on an
    /// out-of-range id.
    pub fn array_bytes(&self, id: RecordId) -> usize {
        self.tables.borrow().record(id).array_bytes
    }

    /// Number of live handles currently bound to `id`. Faults on an
    /// out-of-range id.
    pub fn alias_count(&self, id: RecordId) -> usize {
        self.tables.borrow().record(id).aliases
    }

    /// The live record currently claiming `addr`, if any.
    ///
    /// Tombstoned addresses report `None`: a fresh handle at a reused
    /// address must attach to a fresh record, never to the tombstone.
    pub fn live_id_at(&self, addr: usize) -> Option<RecordId> {
        let tables = self.tables.borrow();
        let &id = tables.addr_ids.get(&addr)?;
        tables.record(id).is_live().then_some(id)
    }

    /// Total records ever created, tombstones included.
    pub fn record_count(&self) -> usize {
        self.tables.borrow().records.len()
    }

    /// Records never marked deleted. Advisory: a non-zero count at teardown
    /// means allocations were abandoned without an explicit delete.
    pub fn leak_count(&self) -> usize {
        self.tables.borrow().leaked()
    }

    /// Log every undeleted record and return how many there were.
    ///
    /// Reports in registration order. Advisory, not fatal.
    pub fn report_leaks(&self) -> usize {
        let tables = self.tables.borrow();
        let mut leaked = 0;
        for (idx, record) in tables.records.iter().enumerate() {
            if record.is_live() {
                leaked += 1;
                warn!(
                    id = %RecordId(idx as u64),
                    addr = record.addr,
                    aliases = record.aliases,
                    status = %record.status,
                    "record never deleted"
                );
            }
        }
        leaked
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_assigns_sequential_ids() {
        let registry = Registry::new();
        assert_eq!(registry.register(0x1000), RecordId(0));
        assert_eq!(registry.register(0x2000), RecordId(1));
        assert_eq!(registry.record_count(), 2);
    }

    #[test]
    #[should_panic(expected = "null pointer")]
    fn register_null_panics() {
        Registry::new().register(0);
    }

    #[test]
    #[should_panic(expected = "address in use")]
    fn register_live_address_panics() {
        let registry = Registry::new();
        registry.register(0x1000);
        registry.register(0x1000);
    }

    #[test]
    fn reregister_after_delete_creates_fresh_record() {
        let registry = Registry::new();
        let first = registry.register(0x1000);
        registry.mark_deleted(first);

        let second = registry.register(0x1000);
        assert_ne!(first, second);
        assert!(!registry.is_live(first));
        assert!(registry.is_live(second));
        // The tombstone stays in the table for accounting.
        assert_eq!(registry.record_count(), 2);
    }

    #[test]
    fn retain_release_roundtrip() {
        let registry = Registry::new();
        let id = registry.register(0x1000);
        assert_eq!(registry.alias_count(id), 1);

        registry.retain(id);
        registry.retain(id);
        assert_eq!(registry.alias_count(id), 3);

        registry.release(id);
        assert_eq!(registry.alias_count(id), 2);
    }

    #[test]
    fn final_release_reaches_zero_without_fault() {
        let registry = Registry::new();
        let id = registry.register(0x1000);
        registry.release(id);
        assert_eq!(registry.alias_count(id), 0);
        assert!(registry.is_live(id));
    }

    #[test]
    #[should_panic(expected = "alias underflow")]
    fn release_at_zero_on_live_record_panics() {
        let registry = Registry::new();
        let id = registry.register(0x1000);
        registry.release(id);
        registry.release(id);
    }

    #[test]
    fn release_at_zero_on_tombstone_is_ignored() {
        let registry = Registry::new();
        let id = registry.register(0x1000);
        registry.mark_deleted(id);
        registry.release(id);
        registry.release(id);
        assert_eq!(registry.alias_count(id), 0);
    }

    #[test]
    #[should_panic(expected = "use after free")]
    fn retain_deleted_record_panics() {
        let registry = Registry::new();
        let id = registry.register(0x1000);
        registry.mark_deleted(id);
        registry.retain(id);
    }

    #[test]
    #[should_panic(expected = "double free")]
    fn mark_deleted_twice_panics() {
        let registry = Registry::new();
        let id = registry.register(0x1000);
        registry.mark_deleted(id);
        registry.mark_deleted(id);
    }

    #[test]
    #[should_panic(expected = "unknown record")]
    fn query_out_of_range_id_panics() {
        Registry::new().is_live(RecordId(5));
    }

    #[test]
    fn array_registration_records_bytes() {
        let registry = Registry::new();
        let id = registry.register_array(0x1000, 40);
        assert!(registry.is_array(id));
        assert_eq!(registry.array_bytes(id), 40);

        let scalar = registry.register(0x2000);
        assert!(!registry.is_array(scalar));
        assert_eq!(registry.array_bytes(scalar), 0);
    }

    #[test]
    #[should_panic(expected = "empty array")]
    fn zero_byte_array_panics() {
        Registry::new().register_array(0x1000, 0);
    }

    #[test]
    fn deleted_array_record_is_no_longer_an_array() {
        let registry = Registry::new();
        let id = registry.register_array(0x1000, 16);
        registry.mark_deleted(id);
        assert!(!registry.is_array(id));
        // Byte span survives on the tombstone for diagnostics.
        assert_eq!(registry.array_bytes(id), 16);
    }

    #[test]
    fn live_id_at_ignores_tombstones() {
        let registry = Registry::new();
        let first = registry.register(0x1000);
        assert_eq!(registry.live_id_at(0x1000), Some(first));

        registry.mark_deleted(first);
        assert_eq!(registry.live_id_at(0x1000), None);

        let second = registry.register(0x1000);
        assert_eq!(registry.live_id_at(0x1000), Some(second));
        assert_eq!(registry.live_id_at(0x9999), None);
    }

    #[test]
    fn leak_count_counts_undeleted_records() {
        let registry = Registry::new();
        let a = registry.register(0x1000);
        let _b = registry.register(0x2000);
        assert_eq!(registry.leak_count(), 2);

        registry.mark_deleted(a);
        assert_eq!(registry.leak_count(), 1);
        assert_eq!(registry.report_leaks(), 1);
    }

    #[test]
    fn clones_share_one_table() {
        let registry = Registry::new();
        let alias = registry.clone();
        let id = registry.register(0x1000);
        assert!(alias.is_live(id));
        assert_eq!(alias.record_count(), 1);
    }

    #[test]
    fn trace_switch_is_shared_and_togglable() {
        let registry = Registry::new();
        assert!(!registry.trace_enabled());
        registry.set_trace(true);
        assert!(registry.clone().trace_enabled());

        // Transitions still behave identically with tracing on.
        let id = registry.register(0x1000);
        registry.retain(id);
        registry.release(id);
        registry.mark_deleted(id);
        assert!(!registry.is_live(id));
    }
}
