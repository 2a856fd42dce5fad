//! Processes: resource containers holding an address space, a handle
//! table, permission state and a thread list.

mod elf;
mod lifecycle;
mod spawn;

pub use elf::{
    load_elf, peek_user_bytes, peek_user_u32, poke_user_bytes, poke_user_u32, ElfError,
};
pub use lifecycle::{
    check_signals, exit_current_process, kill, process_exit, terminate_current, waitpid,
};
pub use spawn::{create_user_thread, spawn, spawn_from_elf};

/// Loader hook resolving an ELF path to image bytes; registered by the
/// userland VFS library's kernel shim.
pub type ImageLoader = fn(path: &str) -> Option<alloc::vec::Vec<u8>>;

static IMAGE_LOADER: spin::RwLock<Option<ImageLoader>> = spin::RwLock::new(None);

pub fn register_image_loader(loader: ImageLoader) {
    *IMAGE_LOADER.write() = Some(loader);
}

pub fn load_image(path: &str) -> Option<alloc::vec::Vec<u8>> {
    (*IMAGE_LOADER.read())?(path)
}

use crate::cap::HandleTable;
use crate::mm::AddressSpace;
use crate::perm::PermState;
use crate::sched::{Thread, WaitChannel};
use crate::sync::IrqMutex;
use crate::{KernelError, Result};
use alloc::string::String;
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use core::sync::atomic::{AtomicI32, AtomicU32, AtomicU8, Ordering};
use xnix_abi::Pid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ProcessState {
    Running = 0,
    Zombie = 1,
}

pub struct Process {
    pid: Pid,
    name: String,
    state: AtomicU8,
    exit_code: AtomicI32,
    /// `None` for the kernel process, which lives in the kernel space.
    aspace: IrqMutex<Option<AddressSpace>>,
    handles: HandleTable,
    threads: IrqMutex<Vec<Arc<Thread>>>,
    parent: IrqMutex<Weak<Process>>,
    children: IrqMutex<Vec<Arc<Process>>>,
    pending_signals: AtomicU32,
    cwd: IrqMutex<String>,
    perm: PermState,
    /// Current program break; grown by `sbrk`.
    brk: AtomicU32,
    /// Next slot in the extra-thread stack region.
    tstack_slot: AtomicU32,
}

lazy_static::lazy_static! {
    static ref PROCESS_LIST: IrqMutex<Vec<Arc<Process>>> = IrqMutex::new(Vec::new());
}

static NEXT_PID: AtomicU32 = AtomicU32::new(1);

fn alloc_pid() -> Pid {
    NEXT_PID.fetch_add(1, Ordering::SeqCst)
}

/// Create the kernel process (PID 0). Called once at boot.
pub fn init() {
    let mut list = PROCESS_LIST.lock();
    if list.iter().any(|p| p.pid == 0) {
        return;
    }
    list.push(Arc::new(Process {
        pid: 0,
        name: String::from("kernel"),
        state: AtomicU8::new(ProcessState::Running as u8),
        exit_code: AtomicI32::new(0),
        aspace: IrqMutex::new(None),
        handles: HandleTable::new(),
        threads: IrqMutex::new(Vec::new()),
        parent: IrqMutex::new(Weak::new()),
        children: IrqMutex::new(Vec::new()),
        pending_signals: AtomicU32::new(0),
        cwd: IrqMutex::new(String::from("/")),
        perm: PermState::permissive(),
        brk: AtomicU32::new(crate::config::USER_HEAP_BASE),
        tstack_slot: AtomicU32::new(0),
    }));
    crate::info!("process subsystem initialized (kernel PID 0)");
}

pub fn kernel_process() -> Arc<Process> {
    find_by_pid(0).expect("process subsystem not initialized")
}

/// Create a user process: fresh address space, empty handle table,
/// permissive permission state until a profile is applied.
pub fn create(name: &str) -> Result<Arc<Process>> {
    let aspace = AddressSpace::create()?;
    let proc = Arc::new(Process {
        pid: alloc_pid(),
        name: String::from(name),
        state: AtomicU8::new(ProcessState::Running as u8),
        exit_code: AtomicI32::new(0),
        aspace: IrqMutex::new(Some(aspace)),
        handles: HandleTable::new(),
        threads: IrqMutex::new(Vec::new()),
        parent: IrqMutex::new(Weak::new()),
        children: IrqMutex::new(Vec::new()),
        pending_signals: AtomicU32::new(0),
        cwd: IrqMutex::new(String::from("/")),
        perm: PermState::permissive(),
        brk: AtomicU32::new(crate::config::USER_HEAP_BASE),
        tstack_slot: AtomicU32::new(0),
    });
    PROCESS_LIST.lock().push(proc.clone());
    Ok(proc)
}

/// Unlink a process from the registry and free its address space. Used by
/// the spawn rollback path and by `waitpid` after reaping.
pub fn destroy(proc: &Arc<Process>) {
    PROCESS_LIST.lock().retain(|p| !Arc::ptr_eq(p, proc));
    if let Some(aspace) = proc.aspace.lock().take() {
        aspace.destroy();
    }
}

pub fn find_by_pid(pid: Pid) -> Option<Arc<Process>> {
    PROCESS_LIST.lock().iter().find(|p| p.pid == pid).cloned()
}

/// The process owning the current thread; kernel threads belong to the
/// kernel process.
pub fn current() -> Arc<Process> {
    match crate::sched::current().and_then(|t| t.owner().cloned()) {
        Some(p) => p,
        None => kernel_process(),
    }
}

pub fn process_count() -> usize {
    PROCESS_LIST.lock().len()
}

/// Snapshot for the proclist debug syscall.
pub fn snapshot() -> Vec<(Pid, String, ProcessState)> {
    PROCESS_LIST
        .lock()
        .iter()
        .map(|p| (p.pid, p.name.clone(), p.state()))
        .collect()
}

impl Process {
    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ProcessState {
        match self.state.load(Ordering::SeqCst) {
            0 => ProcessState::Running,
            _ => ProcessState::Zombie,
        }
    }

    pub(crate) fn set_state(&self, state: ProcessState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    pub fn exit_code(&self) -> i32 {
        self.exit_code.load(Ordering::SeqCst)
    }

    pub(crate) fn set_exit_code(&self, code: i32) {
        self.exit_code.store(code, Ordering::SeqCst);
    }

    pub fn handles(&self) -> &HandleTable {
        &self.handles
    }

    pub fn perm(&self) -> &PermState {
        &self.perm
    }

    /// Run `f` against this process's address space.
    pub fn with_aspace<R>(&self, f: impl FnOnce(&mut AddressSpace) -> R) -> Result<R> {
        let mut guard = self.aspace.lock();
        match guard.as_mut() {
            Some(space) => Ok(f(space)),
            None => Err(KernelError::InvalidArgument),
        }
    }

    pub fn add_thread(&self, t: Arc<Thread>) {
        self.threads.lock().push(t);
    }

    pub fn remove_thread(&self, t: &Arc<Thread>) {
        self.threads.lock().retain(|x| !Arc::ptr_eq(x, t));
    }

    pub fn thread_count(&self) -> usize {
        self.threads.lock().len()
    }

    pub fn main_thread(&self) -> Option<Arc<Thread>> {
        self.threads.lock().first().cloned()
    }

    pub fn threads_snapshot(&self) -> Vec<Arc<Thread>> {
        self.threads.lock().clone()
    }

    pub fn parent(&self) -> Option<Arc<Process>> {
        self.parent.lock().upgrade()
    }

    pub(crate) fn set_parent(&self, parent: &Arc<Process>) {
        *self.parent.lock() = Arc::downgrade(parent);
    }

    pub(crate) fn clear_parent(&self) {
        *self.parent.lock() = Weak::new();
    }

    pub fn add_child(&self, child: Arc<Process>) {
        self.children.lock().push(child);
    }

    pub fn children_snapshot(&self) -> Vec<Arc<Process>> {
        self.children.lock().clone()
    }

    pub(crate) fn remove_child(&self, child: &Arc<Process>) {
        self.children.lock().retain(|c| !Arc::ptr_eq(c, child));
    }

    pub(crate) fn take_children(&self) -> Vec<Arc<Process>> {
        core::mem::take(&mut *self.children.lock())
    }

    pub fn cwd(&self) -> String {
        self.cwd.lock().clone()
    }

    pub fn set_cwd(&self, cwd: &str) {
        *self.cwd.lock() = String::from(cwd);
    }

    pub fn pending_signals(&self) -> u32 {
        self.pending_signals.load(Ordering::SeqCst)
    }

    pub(crate) fn raise_signal(&self, sig: i32) {
        self.pending_signals.fetch_or(xnix_abi::signal::sigmask(sig), Ordering::SeqCst);
    }

    pub(crate) fn clear_signal(&self, sig: i32) {
        self.pending_signals.fetch_and(!xnix_abi::signal::sigmask(sig), Ordering::SeqCst);
    }

    pub fn brk(&self) -> u32 {
        self.brk.load(Ordering::SeqCst)
    }

    pub(crate) fn set_brk(&self, brk: u32) {
        self.brk.store(brk, Ordering::SeqCst);
    }

    /// Reserve the next user thread-stack slot; returns its stack top.
    pub(crate) fn alloc_tstack_top(&self) -> u32 {
        let slot = self.tstack_slot.fetch_add(1, Ordering::SeqCst);
        crate::config::USER_TSTACK_BASE - slot * crate::config::USER_TSTACK_STRIDE
    }

    /// Channel a parent blocked in `waitpid` parks on.
    pub fn wait_chan(self: &Arc<Self>) -> WaitChannel {
        WaitChannel::of(self.as_ref())
    }
}

impl core::fmt::Debug for Process {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Process")
            .field("pid", &self.pid)
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
pub fn reset_for_test() {
    PROCESS_LIST.lock().clear();
    NEXT_PID.store(1, Ordering::SeqCst);
    init();
}
