//! Tracked pointer handles.
//!
//! A [`Handle`] is a thin, cheap-to-copy capability token: a raw pointer
//! plus an optional link to a [`Registry`] record. Every lifetime-relevant
//! operation (construct, clone, drop, delete) and every access (deref,
//! index, cast, raw escape) funnels through the registry, which is the
//! single source of truth for liveness and aliasing.
//!
//! An unlinked handle performs no validation and behaves as a plain
//! pointer. Handles become unlinked when constructed null, or via
//! [`Handle::borrowed`] over memory the registry does not manage (stack
//! variables, foreign allocations).

use std::fmt;
use std::hash::{Hash, Hasher};
use std::mem::{align_of, size_of, ManuallyDrop};
use std::ops::{Deref, DerefMut, Index, IndexMut};
use std::ptr;

use crate::error::{fault, Violation};
use crate::record::RecordId;
use crate::registry::Registry;
use crate::view::ViewAs;

/// A handle's registry association.
#[derive(Clone)]
struct Link {
    registry: Registry,
    id: RecordId,
}

/// A pointer wrapper that validates every access against a [`Registry`].
///
/// Handles present pointer-like access — deref, indexing, comparison,
/// casting — while keeping the registry's alias count and liveness flags
/// consistent across clones, moves, and deletes. Comparisons and hashing
/// operate purely on the raw address and never consult the registry.
///
/// Deleting through one handle leaves every other handle bound to the same
/// record dangling; the dangling handles fault on their next access rather
/// than silently reading freed memory.
///
/// # Examples
///
/// ```
/// use tether::{Handle, Registry};
///
/// let registry = Registry::new();
/// let mut counter = Handle::new_in(&registry, 41u32);
/// *counter += 1;
/// assert_eq!(*counter, 42);
/// counter.delete();
/// ```
///
/// # Threading
///
/// Handles hold a clone of their registry, so they are `!Send` and `!Sync`
/// by construction. The tracking discipline is single-threaded by design.
pub struct Handle<T> {
    ptr: *mut T,
    link: Option<Link>,
}

impl<T> Handle<T> {
    /// A null handle. Trivially "live"; any dereference faults.
    pub fn null() -> Self {
        Self {
            ptr: ptr::null_mut(),
            link: None,
        }
    }

    /// Allocate `value` on the heap and register the allocation.
    ///
    /// The returned handle is the first alias of a fresh record. Allocation
    /// failure aborts via the standard alloc error handler.
    ///
    /// Note: zero-sized types all share one dangling address, so tracking
    /// them is meaningless; a second ZST allocation faults as an address
    /// collision.
    pub fn new_in(registry: &Registry, value: T) -> Self {
        let raw = Box::into_raw(Box::new(value));
        let id = registry.register(raw as usize);
        Self {
            ptr: raw,
            link: Some(Link {
                registry: registry.clone(),
                id,
            }),
        }
    }

    /// Allocate a `len`-element array of `T::default()` and register it.
    ///
    /// The recorded byte span is `len * size_of::<T>()`; a zero-length (or
    /// zero-sized-element) array faults.
    pub fn new_array_in(registry: &Registry, len: usize) -> Self
    where
        T: Default,
    {
        let boxed: Box<[T]> = (0..len).map(|_| T::default()).collect();
        let raw = Box::into_raw(boxed) as *mut T;
        let id = registry.register_array(raw as usize, len * size_of::<T>());
        Self {
            ptr: raw,
            link: Some(Link {
                registry: registry.clone(),
                id,
            }),
        }
    }

    /// Wrap a raw pointer, registering it if the registry does not already
    /// track it.
    ///
    /// If a live record claims the address — another handle to the same
    /// memory was obtained independently — the new handle attaches to that
    /// record and bumps its alias count. Otherwise a fresh record is
    /// created and this handle owns the tracking responsibility.
    ///
    /// A pointer that will be retired through [`Handle::delete`] must have
    /// come from the global allocator (`Box::into_raw` or equivalent);
    /// wrapping anything else and deleting it is undefined behaviour, as
    /// with any raw pointer.
    pub fn tracked(registry: &Registry, raw: *mut T) -> Self {
        let addr = raw as usize;
        let id = match registry.live_id_at(addr) {
            Some(id) => {
                registry.retain(id);
                id
            }
            None => registry.register(addr),
        };
        Self {
            ptr: raw,
            link: Some(Link {
                registry: registry.clone(),
                id,
            }),
        }
    }

    /// Wrap a raw pointer without claiming tracking responsibility.
    ///
    /// If a live record claims the address the handle still attaches to it
    /// (aliases must agree on liveness); otherwise the handle is unlinked
    /// and behaves as a plain pointer. Use this for stack variables and
    /// other memory the registry does not manage.
    pub fn borrowed(registry: &Registry, raw: *mut T) -> Self {
        let link = registry.live_id_at(raw as usize).map(|id| {
            registry.retain(id);
            Link {
                registry: registry.clone(),
                id,
            }
        });
        Self { ptr: raw, link }
    }

    /// Wrap a raw pointer to a `len`-element array, registering it as an
    /// array if the registry does not already track it.
    ///
    /// Attaching to an existing record verifies that the record is an array
    /// of exactly the claimed byte span.
    pub fn tracked_array(registry: &Registry, raw: *mut T, len: usize) -> Self {
        let addr = raw as usize;
        let bytes = len * size_of::<T>();
        let id = match registry.live_id_at(addr) {
            Some(id) => {
                Self::check_attach_span(registry, id, bytes);
                registry.retain(id);
                id
            }
            None => registry.register_array(addr, bytes),
        };
        Self {
            ptr: raw,
            link: Some(Link {
                registry: registry.clone(),
                id,
            }),
        }
    }

    /// Array form of [`Handle::borrowed`]: attach (verifying the span) if a
    /// live record claims the address, otherwise stay unlinked.
    pub fn borrowed_array(registry: &Registry, raw: *mut T, len: usize) -> Self {
        let link = registry.live_id_at(raw as usize).map(|id| {
            Self::check_attach_span(registry, id, len * size_of::<T>());
            registry.retain(id);
            Link {
                registry: registry.clone(),
                id,
            }
        });
        Self { ptr: raw, link }
    }

    fn check_attach_span(registry: &Registry, id: RecordId, bytes: usize) {
        if !registry.is_array(id) {
            fault(Violation::KindMismatch {
                id,
                op: "array attach",
                expected_array: true,
            });
        }
        let recorded = registry.array_bytes(id);
        if recorded != bytes {
            fault(Violation::LengthMismatch {
                id,
                claimed: bytes,
                recorded,
            });
        }
    }

    /// The record this handle is bound to, or `None` if untracked.
    pub fn id(&self) -> Option<RecordId> {
        self.link.as_ref().map(|link| link.id)
    }

    /// Number of live handles sharing this handle's record, or `None` if
    /// untracked.
    pub fn alias_count(&self) -> Option<usize> {
        self.link
            .as_ref()
            .map(|link| link.registry.alias_count(link.id))
    }

    /// The raw address this handle holds.
    pub fn addr(&self) -> usize {
        self.ptr as usize
    }

    /// Whether the held address is null.
    pub fn is_null(&self) -> bool {
        self.ptr.is_null()
    }

    /// Escape to the raw pointer.
    ///
    /// Faults if the record has been deleted: handing out a raw pointer to
    /// freed memory would put it beyond the registry's reach.
    pub fn as_ptr(&self) -> *mut T {
        if let Some(link) = &self.link {
            if !link.registry.is_live(link.id) {
                fault(Violation::UseAfterFree {
                    id: link.id,
                    addr: self.addr(),
                    op: "raw escape",
                });
            }
        }
        self.ptr
    }

    /// Shared access to the pointee. Faults if the record is deleted or the
    /// address is null.
    pub fn get(&self) -> &T {
        self.check_access("deref");
        // SAFETY: the registry vouches that this address has not been
        // deleted through any aliasing handle, and it is non-null.
        unsafe { &*self.ptr }
    }

    /// Exclusive access to the pointee. Faults if the record is deleted or
    /// the address is null.
    pub fn get_mut(&mut self) -> &mut T {
        self.check_access("deref");
        // SAFETY: as in `get`.
        unsafe { &mut *self.ptr }
    }

    /// Shared access to element `index` of an array allocation.
    ///
    /// Faults if the record is deleted, is not an array, or the element
    /// reaches past the recorded byte span. An unlinked handle indexes
    /// unchecked, exactly as a plain pointer.
    pub fn at(&self, index: usize) -> &T {
        self.check_index(index);
        // SAFETY: either the registry vouches that `index` lies inside a
        // live array allocation, or the handle is unlinked and the caller
        // carries the raw-pointer obligations.
        unsafe { &*self.ptr.add(index) }
    }

    /// Exclusive access to element `index` of an array allocation.
    pub fn at_mut(&mut self, index: usize) -> &mut T {
        self.check_index(index);
        // SAFETY: as in `at`.
        unsafe { &mut *self.ptr.add(index) }
    }

    /// Retire the scalar record and free the allocation.
    ///
    /// Faults on an untracked or null handle, on an array record (use
    /// [`Handle::delete_array`]), and on a record already deleted. After
    /// this call the handle — and every alias of its record — is dangling;
    /// the next access through any of them faults.
    pub fn delete(&mut self) {
        let Some(link) = &self.link else {
            fault(Violation::UntrackedDelete { addr: self.addr() });
        };
        if self.ptr.is_null() {
            fault(Violation::NullAccess { op: "delete" });
        }
        if link.registry.is_live(link.id) && link.registry.is_array(link.id) {
            fault(Violation::KindMismatch {
                id: link.id,
                op: "delete",
                expected_array: false,
            });
        }
        // Raises the double-free fault when the record is already deleted.
        link.registry.mark_deleted(link.id);
        // SAFETY: this address came from `Box::into_raw` (or the caller's
        // equivalent, per the `tracked` contract) and the registry has just
        // witnessed its first deletion.
        unsafe { drop(Box::from_raw(self.ptr)) };
    }

    /// Retire the array record and free the allocation.
    ///
    /// Mirror image of [`Handle::delete`]: faults on a scalar record, an
    /// untracked or null handle, or a double free. The element count is
    /// recovered from the recorded byte span.
    pub fn delete_array(&mut self) {
        let Some(link) = &self.link else {
            fault(Violation::UntrackedDelete { addr: self.addr() });
        };
        if self.ptr.is_null() {
            fault(Violation::NullAccess { op: "delete" });
        }
        let live = link.registry.is_live(link.id);
        if live && !link.registry.is_array(link.id) {
            fault(Violation::KindMismatch {
                id: link.id,
                op: "delete",
                expected_array: true,
            });
        }
        let len = link.registry.array_bytes(link.id) / size_of::<T>();
        link.registry.mark_deleted(link.id);
        // SAFETY: the registry recorded this address as an array of exactly
        // `len` elements and has just witnessed its first deletion.
        unsafe { drop(Box::from_raw(ptr::slice_from_raw_parts_mut(self.ptr, len))) };
    }

    /// Reinterpret the handle as pointing to `U`, carrying the record
    /// forward.
    ///
    /// Consuming `self` moves the alias rather than copying it, so the
    /// record's alias count is unchanged. Faults if the record is deleted.
    /// Deleting through a handle cast to a type with a different layout is
    /// undefined, exactly as with raw pointers.
    pub fn cast<U>(self) -> Handle<U> {
        if let Some(link) = &self.link {
            if !link.registry.is_live(link.id) {
                fault(Violation::UseAfterFree {
                    id: link.id,
                    addr: self.addr(),
                    op: "cast",
                });
            }
        }
        // Disarm the source's drop; its alias moves into the new handle.
        let mut this = ManuallyDrop::new(self);
        Handle {
            ptr: this.ptr.cast::<U>(),
            link: this.link.take(),
        }
    }

    /// Capability-checked downcast to `U`.
    ///
    /// Asks the pointee — via its [`ViewAs`] implementation, typically a
    /// tag or variant check — whether it may be viewed as `U`, and faults
    /// rather than producing a wrong-typed live handle when the answer is
    /// no. Faults on a deleted record or a null address.
    pub fn downcast<U>(self) -> Handle<U>
    where
        T: ViewAs<U>,
    {
        self.check_access("downcast");
        // SAFETY: `check_access` established a live, non-null pointee.
        let permitted = unsafe { <T as ViewAs<U>>::can_view_as(&*self.ptr) };
        if !permitted {
            fault(Violation::DowncastMismatch {
                id: self.id(),
                addr: self.addr(),
            });
        }
        self.cast::<U>()
    }

    fn check_access(&self, op: &'static str) {
        if let Some(link) = &self.link {
            if !link.registry.is_live(link.id) {
                fault(Violation::UseAfterFree {
                    id: link.id,
                    addr: self.addr(),
                    op,
                });
            }
        }
        if self.ptr.is_null() {
            fault(Violation::NullAccess { op });
        }
    }

    fn check_index(&self, index: usize) {
        if let Some(link) = &self.link {
            if !link.registry.is_live(link.id) {
                fault(Violation::UseAfterFree {
                    id: link.id,
                    addr: self.addr(),
                    op: "index",
                });
            }
            if !link.registry.is_array(link.id) {
                fault(Violation::KindMismatch {
                    id: link.id,
                    op: "index",
                    expected_array: true,
                });
            }
            let array_bytes = link.registry.array_bytes(link.id);
            let offset = index.checked_mul(size_of::<T>()).unwrap_or(usize::MAX);
            if offset >= array_bytes {
                fault(Violation::OutOfBounds {
                    id: link.id,
                    index,
                    elem_size: size_of::<T>(),
                    array_bytes,
                });
            }
        }
        if self.ptr.is_null() {
            fault(Violation::NullAccess { op: "index" });
        }
    }
}

impl<T> Default for Handle<T> {
    fn default() -> Self {
        Self::null()
    }
}

impl<T> Clone for Handle<T> {
    /// Cloning shares the record and bumps its alias count. Cloning a
    /// dangling handle faults (the registry refuses to retain a deleted
    /// record).
    fn clone(&self) -> Self {
        if let Some(link) = &self.link {
            link.registry.retain(link.id);
        }
        Self {
            ptr: self.ptr,
            link: self.link.clone(),
        }
    }
}

impl<T> Drop for Handle<T> {
    /// Dropping releases this handle's alias. The final release of a live
    /// record and the release of a dangling alias are both legal; no drop
    /// of a well-formed handle panics.
    fn drop(&mut self) {
        if let Some(link) = self.link.take() {
            link.registry.release(link.id);
        }
    }
}

impl<T> Deref for Handle<T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.get()
    }
}

impl<T> DerefMut for Handle<T> {
    fn deref_mut(&mut self) -> &mut T {
        self.get_mut()
    }
}

impl<T> Index<usize> for Handle<T> {
    type Output = T;

    fn index(&self, index: usize) -> &T {
        self.at(index)
    }
}

impl<T> IndexMut<usize> for Handle<T> {
    fn index_mut(&mut self, index: usize) -> &mut T {
        self.at_mut(index)
    }
}

// Comparisons operate purely on the raw address: two handles compare equal
// iff they hold the same address, independent of tracking status.

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.addr() == other.addr()
    }
}

impl<T> Eq for Handle<T> {}

impl<T> PartialOrd for Handle<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Handle<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.addr().cmp(&other.addr())
    }
}

impl<T> Hash for Handle<T> {
    /// Hashes the address with the low bits implied by the pointee's
    /// alignment discarded, spreading buckets evenly.
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_usize(self.addr() >> align_of::<T>().trailing_zeros());
    }
}

impl<T> fmt::Display for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.link {
            Some(link) => write!(f, "Handle({:#x}, id={})", self.addr(), link.id),
            None => write!(f, "Handle({:#x}, untracked)", self.addr()),
        }
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}
