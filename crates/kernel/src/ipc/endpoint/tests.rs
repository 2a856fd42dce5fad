use super::*;
use crate::cap::KObject;
use crate::process;
use crate::sched::{self, ThreadState};
use xnix_abi::Rights;

extern "C" fn noop(_arg: usize) {}

fn fresh() {
    crate::arch::reset_for_test();
    let (start, end) = crate::arch::default_memory_range();
    crate::mm::frame::init(start, end);
    crate::mm::address_space::kernel_init(end).unwrap();
    sched::reset_for_test();
    process::reset_for_test();
}

fn kernel_thread(name: &str) -> Arc<Thread> {
    sched::thread_create(name, noop, 0).unwrap()
}

fn msg_with(regs0: [u32; 8], buf: &[u8]) -> Message {
    let mut m = Message::with_regs(regs0);
    m.buffer = buf.to_vec();
    m
}

#[test]
fn rendezvous_receiver_first_echo() {
    let _g = crate::test_util::guard();
    fresh();

    let ep = Endpoint::new("echo");
    let srv = kernel_thread("srv");
    let cli = kernel_thread("cli");

    // Server arrives first: parked on the receive queue.
    assert!(ep.begin_receive(&srv, 64).unwrap().is_none());
    assert_eq!(ep.queue_lens(), (0, 1));

    // Client call: delivered straight into the server's slot.
    let req = msg_with([1, 2, 3, 0, 0, 0, 0, 0], b"hi");
    assert_eq!(ep.begin_send(&cli, req).unwrap(), SendStart::Delivered);
    assert_eq!(ep.queue_lens(), (0, 0));

    let delivered = srv.ipc.lock().delivered.take().expect("request delivered");
    assert_eq!(delivered.regs.data, [1, 2, 3, 0, 0, 0, 0, 0]);
    assert_eq!(delivered.buffer, b"hi");
    assert_eq!(delivered.sender_tid, cli.tid());
    assert_eq!(srv.ipc.lock().peer, cli.tid());

    // The client waits for the reply; park it the way its blocking
    // wrapper would.
    sched::bootstrap_current(cli.clone());
    sched::block(cli.self_chan());
    assert_eq!(cli.state(), ThreadState::Blocked);

    // Server replies; the client wakes with the reply in its slot.
    let mut reply_msg = Message::with_regs([0, 42, 0, 0, 0, 0, 0, 0]);
    reply_msg.buffer = b"ok".to_vec();
    reply(&srv, reply_msg).unwrap();

    assert_eq!(cli.state(), ThreadState::Ready);
    let got = cli.ipc.lock().delivered.take().expect("reply delivered");
    assert_eq!(got.regs.data[1], 42);
    assert_eq!(got.buffer, b"ok");

    // The peer slot is consumed by the reply.
    assert_eq!(srv.ipc.lock().peer, TID_INVALID);
}

#[test]
fn sender_first_is_queued_and_not_woken_by_receive() {
    let _g = crate::test_util::guard();
    fresh();

    let ep = Endpoint::new("q");
    let srv = kernel_thread("srv");
    let cli = kernel_thread("cli");

    let req = msg_with([7, 0, 0, 0, 0, 0, 0, 0], b"payload");
    assert_eq!(ep.begin_send(&cli, req).unwrap(), SendStart::Queued);
    assert_eq!(ep.queue_lens(), (1, 0));

    let got = ep.begin_receive(&srv, 64).unwrap().expect("paired with queued sender");
    assert_eq!(got.regs.data[0], 7);
    assert_eq!(got.buffer, b"payload");
    assert_eq!(ep.queue_lens(), (0, 0));

    // Handoff order: the sender stays parked awaiting the reply; picking
    // up its message must not wake it.
    assert!(!cli.pending_wakeup.load(core::sync::atomic::Ordering::SeqCst));
    assert_eq!(srv.ipc.lock().peer, cli.tid());
}

#[test]
fn queues_never_both_nonempty() {
    let _g = crate::test_util::guard();
    fresh();

    let ep = Endpoint::new("inv");
    let a = kernel_thread("a");
    let b = kernel_thread("b");
    let c = kernel_thread("c");

    let check = |ep: &Endpoint| {
        let (s, r) = ep.queue_lens();
        assert!(s == 0 || r == 0, "send={s} recv={r}");
    };

    ep.begin_receive(&a, 16).unwrap();
    check(&ep);
    ep.begin_receive(&b, 16).unwrap();
    check(&ep);
    // A sender pairs with the first receiver instead of queueing.
    assert_eq!(ep.begin_send(&c, Message::new()).unwrap(), SendStart::Delivered);
    check(&ep);
    assert_eq!(ep.queue_lens(), (0, 1));
}

#[test]
fn receive_buffer_capacity_truncates_payload() {
    let _g = crate::test_util::guard();
    fresh();

    let ep = Endpoint::new("trunc");
    let srv = kernel_thread("srv");
    let cli = kernel_thread("cli");

    assert!(ep.begin_receive(&srv, 4).unwrap().is_none());
    ep.begin_send(&cli, msg_with([0; 8], b"0123456789")).unwrap();

    let got = srv.ipc.lock().delivered.take().unwrap();
    assert_eq!(got.buffer, b"0123");
}

#[test]
fn oversized_message_is_rejected() {
    let _g = crate::test_util::guard();
    fresh();

    let ep = Endpoint::new("big");
    let cli = kernel_thread("cli");
    let m = msg_with([0; 8], &alloc::vec![0u8; crate::config::IPC_MAX_BUF + 1]);
    assert_eq!(ep.begin_send(&cli, m).unwrap_err(), KernelError::MessageTooLarge);
    assert_eq!(ep.queue_lens(), (0, 0));
}

#[test]
fn reply_to_unknown_or_dead_sender_fails_cleanly() {
    let _g = crate::test_util::guard();
    fresh();

    let srv = kernel_thread("srv");

    // Nobody ever called: no peer recorded.
    assert_eq!(reply(&srv, Message::new()).unwrap_err(), KernelError::InvalidArgument);

    // Explicit TID that is not blocked anywhere.
    assert_eq!(
        reply_to(&srv, 4242, Message::new()).unwrap_err(),
        KernelError::InvalidArgument
    );
}

#[test]
fn async_send_needs_a_queued_receiver() {
    let _g = crate::test_util::guard();
    fresh();

    let ep = Endpoint::new("async");
    let srv = kernel_thread("srv");
    let cli = kernel_thread("cli");

    assert_eq!(
        ep.send_async(&cli, Message::new()).unwrap_err(),
        KernelError::WouldBlock
    );

    ep.begin_receive(&srv, 16).unwrap();
    ep.send_async(&cli, msg_with([9, 0, 0, 0, 0, 0, 0, 0], b"")).unwrap();

    let got = srv.ipc.lock().delivered.take().unwrap();
    assert_eq!(got.regs.data[0], 9);
    // Async delivery owes no reply.
    assert_eq!(srv.ipc.lock().peer, TID_INVALID);
}

#[test]
fn handles_are_duplicated_into_the_receiver_process() {
    let _g = crate::test_util::guard();
    fresh();

    let sproc = process::create("sender").unwrap();
    let rproc = process::create("receiver").unwrap();
    let srv = sched::thread_create_with_owner("srv", noop, 0, Some(rproc.clone())).unwrap();
    let cli = sched::thread_create_with_owner("cli", noop, 0, Some(sproc.clone())).unwrap();

    let shared = Endpoint::new("shared");
    let base = Arc::strong_count(&shared);
    let h = sproc
        .handles()
        .alloc(
            KObject::Endpoint(shared.clone()),
            Rights::READ | Rights::WRITE | Rights::GRANT,
            "shared",
        )
        .unwrap();

    let ep = Endpoint::new("xfer");
    ep.begin_receive(&srv, 16).unwrap();

    let mut m = Message::new();
    m.handles.push(h);
    ep.begin_send(&cli, m).unwrap();

    let got = srv.ipc.lock().delivered.take().unwrap();
    assert_eq!(got.handles.len(), 1);
    let rh = got.handles[0];

    // The receiver's entry carries the same type and rights; the object
    // gained one strong reference. The sender keeps its own entry.
    let (obj, rights) = rproc.handles().get(rh).unwrap();
    assert!(matches!(obj, KObject::Endpoint(_)));
    assert_eq!(rights, Rights::READ | Rights::WRITE | Rights::GRANT);
    assert_eq!(Arc::strong_count(&shared), base + 2);
    assert!(sproc.handles().get(h).is_ok());
}

#[test]
fn handle_transfer_without_grant_fails_and_requeues_receiver() {
    let _g = crate::test_util::guard();
    fresh();

    let sproc = process::create("sender").unwrap();
    let rproc = process::create("receiver").unwrap();
    let srv = sched::thread_create_with_owner("srv", noop, 0, Some(rproc)).unwrap();
    let cli = sched::thread_create_with_owner("cli", noop, 0, Some(sproc.clone())).unwrap();

    let h = sproc
        .handles()
        .alloc(KObject::Endpoint(Endpoint::new("locked")), Rights::READ, "locked")
        .unwrap();

    let ep = Endpoint::new("xfer2");
    ep.begin_receive(&srv, 16).unwrap();

    let mut m = Message::new();
    m.handles.push(h);
    assert_eq!(ep.begin_send(&cli, m).unwrap_err(), KernelError::PermissionDenied);

    // The receiver went back to the queue and lost nothing.
    assert_eq!(ep.queue_lens(), (0, 1));
    assert!(srv.ipc.lock().delivered.is_none());
}

#[test]
fn receiver_death_wakes_the_blocked_caller_with_no_reply() {
    let _g = crate::test_util::guard();
    fresh();

    let ep = Endpoint::new("dying");
    let srv = kernel_thread("srv");
    let cli = kernel_thread("cli");

    // Rendezvous: server picks up the request, owes a reply.
    ep.begin_receive(&srv, 16).unwrap();
    ep.begin_send(&cli, msg_with([1, 0, 0, 0, 0, 0, 0, 0], b"")).unwrap();
    srv.ipc.lock().delivered.take();

    // The caller is parked awaiting the reply.
    sched::bootstrap_current(cli.clone());
    sched::block(cli.self_chan());
    assert_eq!(cli.state(), ThreadState::Blocked);

    // Server dies before replying: the caller is woken with an empty
    // delivery slot, which its Call wrapper maps to an error.
    abort_pending_reply(&srv);
    assert_eq!(cli.state(), ThreadState::Ready);
    assert!(cli.ipc.lock().delivered.is_none());
    assert_eq!(srv.ipc.lock().peer, TID_INVALID);
}

#[test]
fn exited_thread_in_queue_is_skipped() {
    let _g = crate::test_util::guard();
    fresh();

    let ep = Endpoint::new("dead");
    let ghost = kernel_thread("ghost");
    let live = kernel_thread("live");
    let srv = kernel_thread("srv");

    ep.begin_send(&ghost, msg_with([1, 0, 0, 0, 0, 0, 0, 0], b"")).unwrap();
    ep.begin_send(&live, msg_with([2, 0, 0, 0, 0, 0, 0, 0], b"")).unwrap();

    sched::force_exit(&ghost);

    let got = ep.begin_receive(&srv, 16).unwrap().expect("live sender paired");
    assert_eq!(got.regs.data[0], 2);
    assert_eq!(got.sender_tid, live.tid());
}
