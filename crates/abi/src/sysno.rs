//! Syscall numbers.
//!
//! Numbers are assigned in fixed bands so that new calls can be added to a
//! subsystem without renumbering its neighbours. The dispatcher rejects
//! anything outside a known band with -ENOSYS.

// 1-99: process and thread lifecycle
pub const SYS_EXIT: u32 = 1;
pub const SYS_SPAWN: u32 = 2;
pub const SYS_EXEC: u32 = 3;
pub const SYS_WAITPID: u32 = 4;
pub const SYS_GETPID: u32 = 5;
pub const SYS_GETPPID: u32 = 6;
pub const SYS_KILL: u32 = 7;
pub const SYS_THREAD_CREATE: u32 = 10;
pub const SYS_THREAD_EXIT: u32 = 11;
pub const SYS_THREAD_JOIN: u32 = 12;
pub const SYS_THREAD_SELF: u32 = 13;
pub const SYS_THREAD_YIELD: u32 = 14;
pub const SYS_THREAD_DETACH: u32 = 15;
pub const SYS_SLEEP: u32 = 16;

// 100-199: IPC
pub const SYS_ENDPOINT_CREATE: u32 = 100;
pub const SYS_IPC_SEND: u32 = 101;
pub const SYS_IPC_SEND_ASYNC: u32 = 102;
pub const SYS_IPC_RECV: u32 = 103;
pub const SYS_IPC_CALL: u32 = 104;
pub const SYS_IPC_REPLY: u32 = 105;
pub const SYS_IPC_REPLY_TO: u32 = 106;
pub const SYS_NOTIFICATION_CREATE: u32 = 110;
pub const SYS_NOTIFICATION_WAIT: u32 = 111;
pub const SYS_NOTIFICATION_SIGNAL: u32 = 112;

// 200-299: handle and capability
pub const SYS_HANDLE_CLOSE: u32 = 200;
pub const SYS_HANDLE_DUPLICATE: u32 = 201;
pub const SYS_HANDLE_FIND: u32 = 202;
pub const SYS_PERM_CHECK: u32 = 203;

// 300-399: VFS (served by the userland VFS dispatch library)
pub const SYS_OPEN: u32 = 300;
pub const SYS_CLOSE: u32 = 301;
pub const SYS_READ: u32 = 302;
pub const SYS_WRITE: u32 = 303;
pub const SYS_LSEEK: u32 = 304;
pub const SYS_FINFO: u32 = 305;
pub const SYS_OPENDIR: u32 = 306;
pub const SYS_READDIR: u32 = 307;
pub const SYS_MKDIR: u32 = 308;
pub const SYS_DEL: u32 = 309;
pub const SYS_MOUNT: u32 = 310;
pub const SYS_UMOUNT: u32 = 311;
pub const SYS_CHDIR: u32 = 312;
pub const SYS_GETCWD: u32 = 313;
pub const SYS_COPY_CWD: u32 = 314;

// 400-499: memory
pub const SYS_SBRK: u32 = 400;
pub const SYS_MMAP_PHYS: u32 = 401;
pub const SYS_PHYSMEM_INFO: u32 = 402;

// 500-599: I/O
pub const SYS_IOPORT_OUTB: u32 = 500;
pub const SYS_IOPORT_INB: u32 = 501;
pub const SYS_IOPORT_OUTW: u32 = 502;
pub const SYS_IOPORT_INW: u32 = 503;
pub const SYS_IRQ_BIND: u32 = 510;
pub const SYS_IRQ_UNBIND: u32 = 511;
pub const SYS_IRQ_READ: u32 = 512;

// 600-699: sync
pub const SYS_MUTEX_CREATE: u32 = 600;
pub const SYS_MUTEX_DESTROY: u32 = 601;
pub const SYS_MUTEX_LOCK: u32 = 602;
pub const SYS_MUTEX_UNLOCK: u32 = 603;

// 700-799: debug
pub const SYS_DEBUG_WRITE: u32 = 700;
pub const SYS_DEBUG_SET_COLOR: u32 = 701;
pub const SYS_DEBUG_RESET_COLOR: u32 = 702;
pub const SYS_KMSG_READ: u32 = 703;
pub const SYS_PROCLIST: u32 = 704;

/// Band boundaries for dispatcher routing.
pub const BAND_VFS_START: u32 = 300;
pub const BAND_VFS_END: u32 = 399;
