//! Capability/handle tables.
//!
//! A handle is a small integer indexing the owning process's table; the
//! index *is* the capability. Forging a handle across processes is
//! impossible because every syscall consults the caller's table only.
//! Each live entry holds one strong reference (`Arc`) to its kernel
//! object; duplication into another process requires GRANT on the source
//! entry and a rights subset. Tables grow by doubling and never shrink.

use crate::config::HANDLE_TABLE_INIT;
use crate::ipc::{Endpoint, Notification};
use crate::mm::physmem::PhysMemRegion;
use crate::perm::{self, PermId, PERM_ID_INVALID};
use crate::process::Process;
use crate::sched::Thread;
use crate::sync::{IrqMutex, KMutex};
use crate::{KernelError, Result};
use alloc::sync::Arc;
use alloc::vec::Vec;
use xnix_abi::{Handle, HandleType, Rights, HANDLE_NAME_LEN};

/// A reference-counted kernel object nameable through a handle.
#[derive(Clone)]
pub enum KObject {
    Endpoint(Arc<Endpoint>),
    Notification(Arc<Notification>),
    Process(Arc<Process>),
    Thread(Arc<Thread>),
    Mutex(Arc<KMutex>),
    PhysMem(Arc<PhysMemRegion>),
}

impl core::fmt::Debug for KObject {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "KObject::{:?}", self.handle_type())
    }
}

impl KObject {
    pub fn handle_type(&self) -> HandleType {
        match self {
            KObject::Endpoint(_) => HandleType::Endpoint,
            KObject::Notification(_) => HandleType::Notification,
            KObject::Process(_) => HandleType::Process,
            KObject::Thread(_) => HandleType::Thread,
            KObject::Mutex(_) => HandleType::Mutex,
            KObject::PhysMem(_) => HandleType::PhysMem,
        }
    }

    pub fn as_endpoint(&self) -> Result<Arc<Endpoint>> {
        match self {
            KObject::Endpoint(ep) => Ok(ep.clone()),
            _ => Err(KernelError::BadHandle),
        }
    }

    pub fn as_notification(&self) -> Result<Arc<Notification>> {
        match self {
            KObject::Notification(n) => Ok(n.clone()),
            _ => Err(KernelError::BadHandle),
        }
    }

    pub fn as_mutex(&self) -> Result<Arc<KMutex>> {
        match self {
            KObject::Mutex(m) => Ok(m.clone()),
            _ => Err(KernelError::BadHandle),
        }
    }

    /// Strong count of the underlying object; invariant checks only.
    pub fn refcount(&self) -> usize {
        match self {
            KObject::Endpoint(o) => Arc::strong_count(o),
            KObject::Notification(o) => Arc::strong_count(o),
            KObject::Process(o) => Arc::strong_count(o),
            KObject::Thread(o) => Arc::strong_count(o),
            KObject::Mutex(o) => Arc::strong_count(o),
            KObject::PhysMem(o) => Arc::strong_count(o),
        }
    }
}

pub struct HandleEntry {
    pub object: KObject,
    pub rights: Rights,
    pub name: heapless::String<HANDLE_NAME_LEN>,
    /// Cached permission IDs so the IPC fast path does a bitmap test
    /// instead of a string lookup. Only endpoint handles carry them.
    pub perm_send: PermId,
    pub perm_recv: PermId,
}

fn bounded_name(name: &str) -> heapless::String<HANDLE_NAME_LEN> {
    let mut n = heapless::String::new();
    let take = name.len().min(HANDLE_NAME_LEN - 1);
    let _ = n.push_str(&name[..take]);
    n
}

fn make_entry(object: KObject, rights: Rights, name: &str) -> HandleEntry {
    let (perm_send, perm_recv) = if matches!(object, KObject::Endpoint(_)) {
        let ep_name = if name.is_empty() { "unknown" } else { name };
        let send = perm::register(&alloc::format!("xnix.ipc.endpoint.{}.send", ep_name));
        let recv = perm::register(&alloc::format!("xnix.ipc.endpoint.{}.recv", ep_name));
        (send, recv)
    } else {
        (PERM_ID_INVALID, PERM_ID_INVALID)
    };
    HandleEntry { object, rights, name: bounded_name(name), perm_send, perm_recv }
}

pub struct HandleTable {
    slots: IrqMutex<Vec<Option<HandleEntry>>>,
}

impl HandleTable {
    pub fn new() -> Self {
        let mut slots = Vec::with_capacity(HANDLE_TABLE_INIT);
        slots.resize_with(HANDLE_TABLE_INIT, || None);
        Self { slots: IrqMutex::new(slots) }
    }

    /// Install `object` in the first free slot, doubling the table when
    /// none is free.
    pub fn alloc(&self, object: KObject, rights: Rights, name: &str) -> Result<Handle> {
        let entry = make_entry(object, rights, name);
        let mut slots = self.slots.lock();

        let idx = match slots.iter().position(|s| s.is_none()) {
            Some(idx) => idx,
            None => {
                let old = slots.len();
                slots.resize_with(old * 2, || None);
                old
            }
        };
        slots[idx] = Some(entry);
        Ok(idx as Handle)
    }

    /// Try to place the handle at `hint`, growing the table if the hint is
    /// past the end; fall back to `alloc` when the slot is taken.
    pub fn alloc_at(
        &self,
        object: KObject,
        rights: Rights,
        name: &str,
        hint: Handle,
    ) -> Result<Handle> {
        if hint == xnix_abi::HANDLE_INVALID {
            return self.alloc(object, rights, name);
        }
        let hint_idx = hint as usize;
        {
            let mut slots = self.slots.lock();
            if hint_idx >= slots.len() {
                let mut new_cap = hint_idx + 16;
                if new_cap < slots.len() * 2 {
                    new_cap = slots.len() * 2;
                }
                slots.resize_with(new_cap, || None);
            }
            if slots[hint_idx].is_none() {
                slots[hint_idx] = Some(make_entry(object, rights, name));
                return Ok(hint);
            }
        }
        // Hint occupied: automatic placement.
        self.alloc(object, rights, name)
    }

    /// Drop the entry, releasing its strong reference.
    pub fn free(&self, handle: Handle) -> Result<()> {
        let mut slots = self.slots.lock();
        let slot = slots.get_mut(handle as usize).ok_or(KernelError::BadHandle)?;
        if slot.take().is_none() {
            return Err(KernelError::BadHandle);
        }
        Ok(())
    }

    /// Type- and rights-checked lookup. Free slot or type mismatch is
    /// `BadHandle`; a missing right is `PermissionDenied`.
    pub fn lookup(
        &self,
        handle: Handle,
        expected: HandleType,
        required: Rights,
    ) -> Result<KObject> {
        let slots = self.slots.lock();
        let entry = slots
            .get(handle as usize)
            .and_then(|s| s.as_ref())
            .ok_or(KernelError::BadHandle)?;
        if entry.object.handle_type() != expected {
            return Err(KernelError::BadHandle);
        }
        if !entry.rights.contains(required) {
            return Err(KernelError::PermissionDenied);
        }
        Ok(entry.object.clone())
    }

    /// Untyped lookup used by `handle_close`/`duplicate`.
    pub fn get(&self, handle: Handle) -> Result<(KObject, Rights)> {
        let slots = self.slots.lock();
        let entry = slots
            .get(handle as usize)
            .and_then(|s| s.as_ref())
            .ok_or(KernelError::BadHandle)?;
        Ok((entry.object.clone(), entry.rights))
    }

    /// Cached endpoint permission IDs for the IPC fast path.
    pub fn cached_perms(&self, handle: Handle) -> Result<(PermId, PermId)> {
        let slots = self.slots.lock();
        let entry = slots
            .get(handle as usize)
            .and_then(|s| s.as_ref())
            .ok_or(KernelError::BadHandle)?;
        Ok((entry.perm_send, entry.perm_recv))
    }

    pub fn find_by_name(&self, name: &str) -> Option<Handle> {
        let slots = self.slots.lock();
        slots
            .iter()
            .position(|s| s.as_ref().map_or(false, |e| e.name.as_str() == name))
            .map(|idx| idx as Handle)
    }

    pub fn name_of(&self, handle: Handle) -> Option<alloc::string::String> {
        let slots = self.slots.lock();
        slots
            .get(handle as usize)
            .and_then(|s| s.as_ref())
            .map(|e| alloc::string::String::from(e.name.as_str()))
    }

    pub fn capacity(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn live_count(&self) -> usize {
        self.slots.lock().iter().filter(|s| s.is_some()).count()
    }

    /// Duplicate `src_handle` from `src` into `dst` with `new_rights`.
    ///
    /// Requires GRANT on the source entry; `new_rights` must be a subset of
    /// the source rights. The destination gets a fresh entry holding its
    /// own strong reference.
    pub fn duplicate(
        src: &HandleTable,
        src_handle: Handle,
        dst: &HandleTable,
        new_rights: Rights,
    ) -> Result<Handle> {
        Self::duplicate_at(src, src_handle, dst, new_rights, xnix_abi::HANDLE_INVALID)
    }

    pub fn duplicate_at(
        src: &HandleTable,
        src_handle: Handle,
        dst: &HandleTable,
        new_rights: Rights,
        dst_hint: Handle,
    ) -> Result<Handle> {
        let (object, rights, name) = {
            let slots = src.slots.lock();
            let entry = slots
                .get(src_handle as usize)
                .and_then(|s| s.as_ref())
                .ok_or(KernelError::BadHandle)?;
            (entry.object.clone(), entry.rights, entry.name.clone())
        };

        if !rights.contains(Rights::GRANT) {
            return Err(KernelError::PermissionDenied);
        }
        if !rights.contains(new_rights) {
            return Err(KernelError::PermissionDenied);
        }

        dst.alloc_at(object, new_rights, name.as_str(), dst_hint)
    }
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Process-level duplicate, the form the syscall layer and spawn use.
pub fn duplicate(
    src: &Arc<Process>,
    src_handle: Handle,
    dst: &Arc<Process>,
    new_rights: Rights,
) -> Result<Handle> {
    HandleTable::duplicate(src.handles(), src_handle, dst.handles(), new_rights)
}

/// IPC handle transfer: duplicate preserving the entry's rights as-is.
pub fn transfer(src: &Arc<Process>, handle: Handle, dst: &Arc<Process>) -> Result<Handle> {
    let (_, rights) = src.handles().get(handle)?;
    HandleTable::duplicate(src.handles(), handle, dst.handles(), rights)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ep_object(name: &str) -> KObject {
        KObject::Endpoint(Endpoint::new(name))
    }

    #[test]
    fn alloc_lookup_free() {
        let t = HandleTable::new();
        let h = t.alloc(ep_object("console"), Rights::full(), "console").unwrap();

        let obj = t.lookup(h, HandleType::Endpoint, Rights::READ | Rights::WRITE).unwrap();
        assert_eq!(obj.as_endpoint().unwrap().name(), "console");

        // Wrong type is BadHandle, missing right is PermissionDenied.
        assert_eq!(
            t.lookup(h, HandleType::Notification, Rights::READ).unwrap_err(),
            KernelError::BadHandle
        );

        t.free(h).unwrap();
        assert_eq!(t.lookup(h, HandleType::Endpoint, Rights::READ).unwrap_err(),
            KernelError::BadHandle);
        assert_eq!(t.free(h).unwrap_err(), KernelError::BadHandle);
    }

    #[test]
    fn rights_are_enforced_on_lookup() {
        let t = HandleTable::new();
        let h = t.alloc(ep_object("ro"), Rights::READ, "ro").unwrap();
        assert!(t.lookup(h, HandleType::Endpoint, Rights::READ).is_ok());
        assert_eq!(
            t.lookup(h, HandleType::Endpoint, Rights::WRITE).unwrap_err(),
            KernelError::PermissionDenied
        );
    }

    #[test]
    fn table_grows_by_doubling_and_never_shrinks() {
        let t = HandleTable::new();
        let initial = t.capacity();
        let mut handles = Vec::new();
        for i in 0..initial + 1 {
            let name = alloc::format!("ep{}", i);
            handles.push(t.alloc(ep_object(&name), Rights::full(), &name).unwrap());
        }
        assert_eq!(t.capacity(), initial * 2);

        for h in handles {
            t.free(h).unwrap();
        }
        assert_eq!(t.capacity(), initial * 2);
        assert_eq!(t.live_count(), 0);
    }

    #[test]
    fn alloc_at_honors_hint_and_falls_back() {
        let t = HandleTable::new();
        let h = t.alloc_at(ep_object("a"), Rights::full(), "a", 5).unwrap();
        assert_eq!(h, 5);

        // Occupied hint falls back to automatic placement.
        let h2 = t.alloc_at(ep_object("b"), Rights::full(), "b", 5).unwrap();
        assert_ne!(h2, 5);

        // A hint past the end grows the table.
        let big = (t.capacity() + 10) as Handle;
        let h3 = t.alloc_at(ep_object("c"), Rights::full(), "c", big).unwrap();
        assert_eq!(h3, big);
        assert!(t.capacity() > big as usize);
    }

    #[test]
    fn duplicate_requires_grant_and_subset() {
        let src = HandleTable::new();
        let dst = HandleTable::new();

        let h = src
            .alloc(ep_object("shared"), Rights::READ | Rights::WRITE | Rights::GRANT, "shared")
            .unwrap();

        let d = HandleTable::duplicate(&src, h, &dst, Rights::READ | Rights::WRITE).unwrap();
        let (_, rights) = dst.get(d).unwrap();
        assert_eq!(rights, Rights::READ | Rights::WRITE);

        // MANAGE is not in the source rights: subset violation.
        assert_eq!(
            HandleTable::duplicate(&src, h, &dst, Rights::READ | Rights::MANAGE).unwrap_err(),
            KernelError::PermissionDenied
        );

        // Entry without GRANT cannot be duplicated at all.
        let no_grant = src.alloc(ep_object("ng"), Rights::READ, "ng").unwrap();
        assert_eq!(
            HandleTable::duplicate(&src, no_grant, &dst, Rights::READ).unwrap_err(),
            KernelError::PermissionDenied
        );
    }

    #[test]
    fn duplicate_bumps_refcount_and_close_restores_it() {
        let src = HandleTable::new();
        let dst = HandleTable::new();

        let ep = Endpoint::new("counted");
        let base = Arc::strong_count(&ep);
        let h = src.alloc(KObject::Endpoint(ep.clone()), Rights::full(), "counted").unwrap();
        assert_eq!(Arc::strong_count(&ep), base + 1);

        let d = HandleTable::duplicate(&src, h, &dst, Rights::READ).unwrap();
        assert_eq!(Arc::strong_count(&ep), base + 2);

        dst.free(d).unwrap();
        assert_eq!(Arc::strong_count(&ep), base + 1);
    }

    #[test]
    fn find_by_name_resolves_live_entries() {
        let t = HandleTable::new();
        let h = t.alloc(ep_object("vfs"), Rights::full(), "vfs").unwrap();
        assert_eq!(t.find_by_name("vfs"), Some(h));
        assert_eq!(t.find_by_name("nope"), None);
        t.free(h).unwrap();
        assert_eq!(t.find_by_name("vfs"), None);
    }

    #[test]
    fn endpoint_entries_cache_permission_ids() {
        let t = HandleTable::new();
        let h = t.alloc(ep_object("disk"), Rights::full(), "disk").unwrap();
        let (send, recv) = t.cached_perms(h).unwrap();
        assert_ne!(send, PERM_ID_INVALID);
        assert_ne!(recv, PERM_ID_INVALID);
        assert_ne!(send, recv);
        assert_eq!(crate::perm::lookup("xnix.ipc.endpoint.disk.send"), Some(send));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]
        #[test]
        fn live_entries_track_outstanding_handles(ops in proptest::collection::vec(0u8..4, 1..64)) {
            let t = HandleTable::new();
            let mut held = std::vec::Vec::new();
            let mut cap = t.capacity();

            for (i, op) in ops.into_iter().enumerate() {
                match op {
                    0 => {
                        let name = alloc::format!("ep{}", i);
                        held.push(t.alloc(ep_object(&name), Rights::full(), &name).unwrap());
                    }
                    1 => {
                        // Hints collide on purpose; occupied ones fall back
                        // to automatic placement.
                        let name = alloc::format!("at{}", i);
                        let hint = (i as Handle) % 48;
                        held.push(
                            t.alloc_at(ep_object(&name), Rights::full(), &name, hint).unwrap(),
                        );
                    }
                    2 => {
                        if let Some(h) = held.pop() {
                            t.free(h).unwrap();
                        }
                    }
                    _ => {
                        if let Some(&h) = held.first() {
                            held.push(HandleTable::duplicate(&t, h, &t, Rights::full()).unwrap());
                        }
                    }
                }

                prop_assert_eq!(t.live_count(), held.len());
                prop_assert!(t.capacity() >= cap, "table never shrinks");
                cap = t.capacity();
            }

            // Closing everything returns the table to empty without
            // giving back capacity.
            for h in held {
                t.free(h).unwrap();
            }
            prop_assert_eq!(t.live_count(), 0);
            prop_assert_eq!(t.capacity(), cap);
        }
    }
}
