//! Process lifecycle: exit, wait, signals, termination.

use super::{destroy, find_by_pid, Process, ProcessState};
use crate::klog::Facility;
use crate::sched::{self, WaitChannel};
use crate::{KernelError, Result};
use alloc::sync::Arc;
use xnix_abi::signal::{sigmask, valid_signal, SIGINT, SIGKILL, SIGSEGV, SIGTERM};
use xnix_abi::{Pid, PID_INIT, WNOHANG};

/// Move a process to zombie state: record the code, hand its children to
/// init and wake a parent blocked in `waitpid`. The threads are the
/// caller's responsibility (`exit_current` for the last thread,
/// `terminate_current` for the forced path).
pub fn process_exit(proc: &Arc<Process>, exit_code: i32) {
    if proc.pid() == 0 {
        return;
    }

    crate::klog::log(
        crate::klog::LogLevel::Info,
        Facility::Proc,
        format_args!("process '{}' (pid={}) exiting with code {}", proc.name(), proc.pid(), exit_code),
    );

    proc.set_state(ProcessState::Zombie);
    proc.set_exit_code(exit_code);

    reparent_children(proc);

    if let Some(parent) = proc.parent() {
        sched::wakeup(parent.wait_chan());
    }
}

/// Hand every child to init (PID 1). A zombie child that moves wakes init
/// so a pending `waitpid` can reap it.
fn reparent_children(proc: &Arc<Process>) {
    let children = proc.take_children();
    if children.is_empty() {
        return;
    }

    let init = match find_by_pid(PID_INIT) {
        Some(init) => init,
        None => {
            // No init yet: the children are simply orphaned.
            for child in children {
                child.clear_parent();
            }
            return;
        }
    };

    let mut wake_init = false;
    for child in children {
        child.set_parent(&init);
        if child.state() == ProcessState::Zombie {
            wake_init = true;
        }
        init.add_child(child);
    }
    if wake_init {
        sched::wakeup(init.wait_chan());
    }
}

/// Reap a zombie child.
///
/// `pid > 0` waits for that child, `pid == -1` for any. Returns
/// `(child_pid, exit_code)`, or `(0, 0)` with `WNOHANG` when nothing has
/// exited yet.
pub fn waitpid(current: &Arc<Process>, pid: i32, options: i32) -> Result<(Pid, i32)> {
    if pid == 0 || pid < -1 {
        // Process groups are not a thing here.
        return Err(KernelError::InvalidArgument);
    }

    loop {
        let mut matched = false;
        let mut found: Option<Arc<Process>> = None;

        for child in current.children_snapshot() {
            if pid == -1 || child.pid() == pid as Pid {
                matched = true;
                if child.state() == ProcessState::Zombie {
                    found = Some(child);
                    break;
                }
            }
        }

        if let Some(child) = found {
            current.remove_child(&child);
            child.clear_parent();
            let result = (child.pid(), child.exit_code());
            destroy(&child);
            return Ok(result);
        }

        if !matched {
            return Err(KernelError::NoChild);
        }
        if options & WNOHANG != 0 {
            return Ok((0, 0));
        }

        // Park on our own wait channel; children's exit wakes it.
        if !sched::block_checked(current.wait_chan()) {
            return Err(KernelError::WouldBlock);
        }
    }
}

/// Raise `sig` on the target process and poke its main thread so the
/// signal is noticed at the next return-to-user.
pub fn kill(pid: Pid, sig: i32) -> Result<()> {
    if !valid_signal(sig) {
        return Err(KernelError::InvalidArgument);
    }
    let proc = find_by_pid(pid).ok_or(KernelError::NotFound)?;
    if proc.pid() == 0 {
        return Err(KernelError::PermissionDenied);
    }

    proc.raise_signal(sig);
    if let Some(t) = proc.main_thread() {
        sched::wakeup_thread(&t);
    }
    Ok(())
}

/// Deliver pending fatal signals to the current process. Called as the
/// last step of every syscall dispatch.
pub fn check_signals() {
    let proc = super::current();
    if proc.pid() == 0 {
        return;
    }

    let pending = proc.pending_signals();
    if pending == 0 {
        return;
    }

    let fatal = [SIGKILL, SIGINT, SIGTERM, SIGSEGV];
    for sig in fatal {
        if pending & sigmask(sig) != 0 {
            proc.clear_signal(sig);
            terminate_current(sig);
            return;
        }
    }
}

/// Kill the current process with `sig`: zombie with exit code `-sig`,
/// children reparented, parent woken, every other thread force-exited,
/// finally the current thread exits. Terminating init is fatal to the
/// kernel.
pub fn terminate_current(sig: i32) {
    let proc = super::current();
    let current_thread = sched::current();

    if proc.pid() == 0 {
        panic!("attempt to terminate the kernel process");
    }
    if proc.pid() == PID_INIT {
        panic!("init process terminated by signal {}", sig);
    }

    crate::klog::log(
        crate::klog::LogLevel::Info,
        Facility::Proc,
        format_args!("process {} '{}' terminated (signal {})", proc.pid(), proc.name(), sig),
    );

    process_exit(&proc, -sig);

    // Force every other thread out; the snapshot avoids holding the thread
    // list lock across scheduler calls. Their in-flight IPC slots are
    // cleared so a later reply to them fails cleanly.
    for t in proc.threads_snapshot() {
        let is_self = current_thread.as_ref().map_or(false, |c| Arc::ptr_eq(c, &t));
        if !is_self {
            crate::ipc::endpoint::abort_pending_reply(&t);
            crate::ipc::endpoint::clear_slots(&mut *t.ipc.lock());
            sched::force_exit(&t);
        }
    }

    if current_thread.is_some() {
        sched::exit_current(-sig);
    }
}

/// Voluntary whole-process exit: zombie with `code`, children reparented,
/// other threads forced out, then the calling thread exits.
pub fn exit_current_process(code: i32) {
    let proc = super::current();
    let current_thread = sched::current();

    if proc.pid() == 0 {
        // Kernel threads just exit themselves.
        sched::exit_current(code);
        return;
    }

    process_exit(&proc, code);

    for t in proc.threads_snapshot() {
        let is_self = current_thread.as_ref().map_or(false, |c| Arc::ptr_eq(c, &t));
        if !is_self {
            crate::ipc::endpoint::abort_pending_reply(&t);
            crate::ipc::endpoint::clear_slots(&mut *t.ipc.lock());
            sched::force_exit(&t);
        }
    }

    if current_thread.is_some() {
        sched::exit_current(code);
    }
}

/// Wait channel used by `waitpid`; exposed for the IPC/wakeup tests.
pub fn wait_chan_of(proc: &Arc<Process>) -> WaitChannel {
    proc.wait_chan()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process;
    use crate::sched::ThreadState;

    fn fresh() {
        crate::arch::reset_for_test();
        let (start, end) = crate::arch::default_memory_range();
        crate::mm::frame::init(start, end);
        crate::mm::address_space::kernel_init(end).unwrap();
        crate::sched::reset_for_test();
        process::reset_for_test();
    }

    #[test]
    fn waitpid_reaps_zombie_child() {
        let _g = crate::test_util::guard();
        fresh();

        let parent = process::create("parent").unwrap();
        let child = process::create("child").unwrap();
        child.set_parent(&parent);
        parent.add_child(child.clone());

        // Nothing exited yet.
        assert_eq!(waitpid(&parent, -1, WNOHANG).unwrap(), (0, 0));

        process_exit(&child, 42);
        assert_eq!(child.state(), ProcessState::Zombie);

        let (pid, code) = waitpid(&parent, -1, 0).unwrap();
        assert_eq!(pid, child.pid());
        assert_eq!(code, 42);
        // Reaped: gone from the registry and the child list.
        assert!(process::find_by_pid(pid).is_none());
        assert_eq!(waitpid(&parent, -1, WNOHANG).unwrap_err(), KernelError::NoChild);
    }

    #[test]
    fn waitpid_for_specific_pid() {
        let _g = crate::test_util::guard();
        fresh();

        let parent = process::create("parent").unwrap();
        let c1 = process::create("c1").unwrap();
        let c2 = process::create("c2").unwrap();
        for c in [&c1, &c2] {
            c.set_parent(&parent);
            parent.add_child(c.clone());
        }

        process_exit(&c2, 7);
        // Waiting for c1 specifically does not reap c2.
        assert_eq!(waitpid(&parent, c1.pid() as i32, WNOHANG).unwrap(), (0, 0));
        let (pid, code) = waitpid(&parent, c2.pid() as i32, 0).unwrap();
        assert_eq!((pid, code), (c2.pid(), 7));
    }

    #[test]
    fn child_exit_wakes_waiting_parent() {
        let _g = crate::test_util::guard();
        fresh();

        let parent = process::create("parent").unwrap();
        let child = process::create("child").unwrap();
        child.set_parent(&parent);
        parent.add_child(child.clone());

        // A thread blocked on the parent's wait channel stands in for the
        // parent's waitpid.
        extern "C" fn noop(_arg: usize) {}
        let waiter = crate::sched::thread_create("waiter", noop, 0).unwrap();
        crate::sched::tick();
        assert!(Arc::ptr_eq(&crate::sched::current().unwrap(), &waiter));
        crate::sched::block(parent.wait_chan());
        assert_eq!(waiter.state(), ThreadState::Blocked);

        process_exit(&child, 0);
        assert_eq!(waiter.state(), ThreadState::Ready);
    }

    #[test]
    fn exit_reparents_children_to_init() {
        let _g = crate::test_util::guard();
        fresh();

        // PID 1 is init by construction.
        let init = process::create("init").unwrap();
        assert_eq!(init.pid(), PID_INIT);

        let middle = process::create("middle").unwrap();
        let leaf = process::create("leaf").unwrap();
        middle.set_parent(&init);
        init.add_child(middle.clone());
        leaf.set_parent(&middle);
        middle.add_child(leaf.clone());

        process_exit(&middle, 1);

        let p = leaf.parent().expect("leaf has a parent");
        assert!(Arc::ptr_eq(&p, &init));
        assert!(init.children_snapshot().iter().any(|c| Arc::ptr_eq(c, &leaf)));
    }

    #[test]
    fn kill_sets_pending_signal() {
        let _g = crate::test_util::guard();
        fresh();

        let proc = process::create("victim").unwrap();
        kill(proc.pid(), SIGTERM).unwrap();
        assert_ne!(proc.pending_signals() & sigmask(SIGTERM), 0);

        assert_eq!(kill(99999, SIGTERM).unwrap_err(), KernelError::NotFound);
        assert_eq!(kill(proc.pid(), 0).unwrap_err(), KernelError::InvalidArgument);
        // The kernel process cannot be signaled.
        assert_eq!(kill(0, SIGTERM).unwrap_err(), KernelError::PermissionDenied);
    }
}
