//! Violation taxonomy for instrumented pointer faults.
//!
//! Every fault this crate can detect is a contract violation by the calling
//! code, not a recoverable runtime condition. Violations are therefore
//! surfaced immediately at the point of detection as a panic carrying a
//! [`Violation`] rendered with full diagnostic context. In a bare
//! (non-instrumented) build none of these checks exist.

use std::error::Error;
use std::fmt;

use crate::record::RecordId;

/// A memory-safety contract violation detected by the instrumentation.
///
/// The `Display` form of each variant begins with a stable prefix
/// (e.g. `"double free:"`) so tests and log scrapers can match on it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Violation {
    /// A record was marked deleted a second time.
    DoubleFree {
        /// The record being retired again.
        id: RecordId,
        /// Address the record describes.
        addr: usize,
    },
    /// An operation touched a record that has been deleted.
    UseAfterFree {
        /// The stale record.
        id: RecordId,
        /// Address the record describes.
        addr: usize,
        /// Which operation tripped the check.
        op: &'static str,
    },
    /// A release was issued against a live record with no live aliases.
    ///
    /// This is a bookkeeping invariant violation — unreachable when every
    /// handle routes its lifetime through the registry.
    AliasUnderflow {
        /// The record whose count would go negative.
        id: RecordId,
        /// Address the record describes.
        addr: usize,
    },
    /// An array index reached past the recorded byte span.
    OutOfBounds {
        /// The array record.
        id: RecordId,
        /// Requested element index.
        index: usize,
        /// Size of one element in bytes.
        elem_size: usize,
        /// Total byte span of the allocation.
        array_bytes: usize,
    },
    /// An array record was used through the scalar path or vice versa.
    KindMismatch {
        /// The record with the wrong kind for the operation.
        id: RecordId,
        /// Which operation tripped the check.
        op: &'static str,
        /// Whether the operation required an array record.
        expected_array: bool,
    },
    /// An attach claimed a different array span than the record holds.
    LengthMismatch {
        /// The record being attached to.
        id: RecordId,
        /// Byte span the caller claimed.
        claimed: usize,
        /// Byte span the record holds.
        recorded: usize,
    },
    /// A null address was dereferenced, indexed, deleted, or registered.
    NullAccess {
        /// Which operation tripped the check.
        op: &'static str,
    },
    /// A query named an id past the end of the record table.
    UnknownRecord {
        /// The out-of-range id.
        id: RecordId,
        /// Number of records the table holds.
        records: usize,
    },
    /// A registration named an address still claimed by a live record.
    AddressInUse {
        /// The live record claiming the address.
        id: RecordId,
        /// The contested address.
        addr: usize,
    },
    /// An array registration claimed a zero-byte span.
    EmptyArray {
        /// The address of the rejected registration.
        addr: usize,
    },
    /// A delete was issued through a handle with no registry link.
    UntrackedDelete {
        /// The address the handle holds.
        addr: usize,
    },
    /// A capability-checked downcast was refused by the pointee.
    DowncastMismatch {
        /// The record behind the handle, if tracked.
        id: Option<RecordId>,
        /// The address being viewed.
        addr: usize,
    },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DoubleFree { id, addr } => {
                write!(f, "double free: record {id} (addr {addr:#x}) is already deleted")
            }
            Self::UseAfterFree { id, addr, op } => {
                write!(
                    f,
                    "use after free: {op} through record {id} (addr {addr:#x}) which is deleted"
                )
            }
            Self::AliasUnderflow { id, addr } => {
                write!(
                    f,
                    "alias underflow: release of record {id} (addr {addr:#x}) with zero live aliases"
                )
            }
            Self::OutOfBounds {
                id,
                index,
                elem_size,
                array_bytes,
            } => {
                write!(
                    f,
                    "index out of bounds: element {index} ({elem_size} bytes each) reaches past \
                     the {array_bytes}-byte span of record {id}"
                )
            }
            Self::KindMismatch {
                id,
                op,
                expected_array,
            } => {
                let need = if *expected_array { "an array" } else { "a scalar" };
                write!(f, "array/scalar mismatch: {op} on record {id} requires {need} record")
            }
            Self::LengthMismatch {
                id,
                claimed,
                recorded,
            } => {
                write!(
                    f,
                    "array length mismatch: record {id} holds {recorded} bytes, caller claimed {claimed}"
                )
            }
            Self::NullAccess { op } => {
                write!(f, "null pointer: {op} through a null address")
            }
            Self::UnknownRecord { id, records } => {
                write!(f, "unknown record: id {id} is out of range ({records} records exist)")
            }
            Self::AddressInUse { id, addr } => {
                write!(f, "address in use: {addr:#x} is still claimed by live record {id}")
            }
            Self::EmptyArray { addr } => {
                write!(f, "empty array: registration at {addr:#x} claimed a zero-byte span")
            }
            Self::UntrackedDelete { addr } => {
                write!(f, "untracked delete: no record to retire for {addr:#x}")
            }
            Self::DowncastMismatch { id, addr } => {
                match id {
                    Some(id) => write!(
                        f,
                        "downcast mismatch: value at {addr:#x} (record {id}) refused the requested view"
                    ),
                    None => write!(
                        f,
                        "downcast mismatch: untracked value at {addr:#x} refused the requested view"
                    ),
                }
            }
        }
    }
}

impl Error for Violation {}

/// Raise a violation as a panic.
///
/// Cold and never inlined so the validation fast paths stay small.
#[cfg(feature = "track")]
#[cold]
#[inline(never)]
pub(crate) fn fault(violation: Violation) -> ! {
    panic!("{violation}");
}
