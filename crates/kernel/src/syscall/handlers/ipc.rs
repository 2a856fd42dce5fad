//! IPC syscalls (band 100-199).

use super::{current_proc, current_thread};
use crate::cap::KObject;
use crate::ipc::{endpoint, Endpoint, Message, Notification};
use crate::perm::nodes;
use crate::syscall::uaccess;
use crate::{KernelError, Result};
use alloc::sync::Arc;
use xnix_abi::ipc::{MsgHeader, IPC_MAX_HANDLES};
use xnix_abi::{Handle, HandleType, Rights, Tid};

/// Copy a user message header (and optionally its payload) into a kernel
/// `Message`.
fn msg_from_user(
    proc: &Arc<crate::process::Process>,
    va: u32,
    copy_buffer: bool,
) -> Result<Message> {
    let hdr: MsgHeader = unsafe { uaccess::struct_from_user(proc, va)? };

    if hdr.buffer_len as usize > crate::config::IPC_MAX_BUF {
        return Err(KernelError::MessageTooLarge);
    }
    if hdr.handle_count as usize > IPC_MAX_HANDLES {
        return Err(KernelError::InvalidArgument);
    }
    if hdr.buffer_len != 0 && hdr.buffer_ptr == 0 {
        return Err(KernelError::InvalidArgument);
    }

    let mut msg = Message::new();
    msg.regs = hdr.regs;
    msg.flags = hdr.flags;
    msg.handles = hdr.handles[..hdr.handle_count as usize].to_vec();

    if copy_buffer && hdr.buffer_len != 0 {
        msg.buffer = uaccess::copy_from_user(proc, hdr.buffer_ptr, hdr.buffer_len as usize)?;
    }
    Ok(msg)
}

/// Receive-window description from a user message header.
fn recv_window(proc: &Arc<crate::process::Process>, va: u32) -> Result<(u32, usize)> {
    let hdr: MsgHeader = unsafe { uaccess::struct_from_user(proc, va)? };
    if hdr.buffer_len as usize > crate::config::IPC_MAX_BUF {
        return Err(KernelError::MessageTooLarge);
    }
    if hdr.buffer_len != 0 && hdr.buffer_ptr == 0 {
        return Err(KernelError::InvalidArgument);
    }
    Ok((hdr.buffer_ptr, hdr.buffer_len as usize))
}

/// Write a delivered message back to user space: payload into the caller's
/// buffer, then the updated header.
fn msg_to_user(
    proc: &Arc<crate::process::Process>,
    va: u32,
    buf_ptr: u32,
    buf_cap: usize,
    msg: &Message,
) -> Result<()> {
    let n = msg.buffer.len().min(buf_cap);
    if n != 0 {
        uaccess::copy_to_user(proc, buf_ptr, &msg.buffer[..n])?;
    }

    let mut hdr = MsgHeader::zeroed();
    hdr.regs = msg.regs;
    hdr.buffer_ptr = buf_ptr;
    hdr.buffer_len = n as u32;
    hdr.handle_count = msg.handles.len().min(IPC_MAX_HANDLES) as u32;
    for (i, &h) in msg.handles.iter().take(IPC_MAX_HANDLES).enumerate() {
        hdr.handles[i] = h;
    }
    hdr.sender_tid = msg.sender_tid;
    hdr.flags = msg.flags;
    uaccess::struct_to_user(proc, va, &hdr)
}

fn lookup_endpoint(
    proc: &Arc<crate::process::Process>,
    handle: Handle,
    rights: Rights,
) -> Result<Arc<Endpoint>> {
    proc.handles().lookup(handle, HandleType::Endpoint, rights)?.as_endpoint()
}

/// The per-endpoint cached permission plus the blanket node; either grants.
fn check_ipc_perm(
    proc: &Arc<crate::process::Process>,
    handle: Handle,
    send: bool,
) -> Result<()> {
    if !proc.perm().is_restricted() {
        return Ok(());
    }
    let (perm_send, perm_recv) = proc.handles().cached_perms(handle)?;
    let cached = if send { perm_send } else { perm_recv };
    let blanket = if send { nodes::IPC_SEND } else { nodes::IPC_RECV };
    if proc.perm().check(cached) || proc.perm().check_name(blanket) {
        Ok(())
    } else {
        Err(KernelError::PermissionDenied)
    }
}

pub fn sys_endpoint_create(args: &[u32; 5]) -> Result<u32> {
    let proc = current_proc();
    if proc.perm().is_restricted() && !proc.perm().check_name(nodes::IPC_ENDPOINT_CREATE) {
        return Err(KernelError::PermissionDenied);
    }

    let name = if args[0] != 0 {
        uaccess::string_from_user(&proc, args[0], 32)?
    } else {
        alloc::string::String::new()
    };

    let ep = Endpoint::new(&name);
    proc.handles().alloc(KObject::Endpoint(ep), Rights::full(), &name)
}

pub fn sys_ipc_send(args: &[u32; 5]) -> Result<u32> {
    let proc = current_proc();
    check_ipc_perm(&proc, args[0], true)?;
    let ep = lookup_endpoint(&proc, args[0], Rights::WRITE)?;
    let current = current_thread()?;
    let msg = msg_from_user(&proc, args[1], true)?;
    ep.send(&current, msg, args[2])?;
    Ok(0)
}

pub fn sys_ipc_send_async(args: &[u32; 5]) -> Result<u32> {
    let proc = current_proc();
    check_ipc_perm(&proc, args[0], true)?;
    let ep = lookup_endpoint(&proc, args[0], Rights::WRITE)?;
    let current = current_thread()?;
    // No payload copy for async sends; registers and handles only.
    let msg = msg_from_user(&proc, args[1], false)?;
    ep.send_async(&current, msg)?;
    Ok(0)
}

pub fn sys_ipc_recv(args: &[u32; 5]) -> Result<u32> {
    let proc = current_proc();
    check_ipc_perm(&proc, args[0], false)?;
    let ep = lookup_endpoint(&proc, args[0], Rights::READ)?;
    let current = current_thread()?;

    let (buf_ptr, buf_cap) = recv_window(&proc, args[1])?;
    let msg = ep.receive(&current, buf_cap, args[2])?;
    msg_to_user(&proc, args[1], buf_ptr, buf_cap, &msg)?;
    Ok(0)
}

pub fn sys_ipc_call(args: &[u32; 5]) -> Result<u32> {
    let proc = current_proc();
    check_ipc_perm(&proc, args[0], true)?;
    let ep = lookup_endpoint(&proc, args[0], Rights::WRITE)?;
    let current = current_thread()?;

    let req = msg_from_user(&proc, args[1], true)?;
    let (reply_buf, reply_cap) = recv_window(&proc, args[2])?;
    let reply = ep.call(&current, req, args[3])?;
    msg_to_user(&proc, args[2], reply_buf, reply_cap, &reply)?;
    Ok(0)
}

pub fn sys_ipc_reply(args: &[u32; 5]) -> Result<u32> {
    let proc = current_proc();
    let current = current_thread()?;
    let msg = msg_from_user(&proc, args[0], true)?;
    endpoint::reply(&current, msg)?;
    Ok(0)
}

pub fn sys_ipc_reply_to(args: &[u32; 5]) -> Result<u32> {
    let proc = current_proc();
    let current = current_thread()?;
    let msg = msg_from_user(&proc, args[1], true)?;
    endpoint::reply_to(&current, args[0] as Tid, msg)?;
    Ok(0)
}

pub fn sys_notification_create(_args: &[u32; 5]) -> Result<u32> {
    let proc = current_proc();
    let notif = Notification::new();
    proc.handles().alloc(KObject::Notification(notif), Rights::full(), "")
}

pub fn sys_notification_wait(args: &[u32; 5]) -> Result<u32> {
    let proc = current_proc();
    let notif = proc
        .handles()
        .lookup(args[0], HandleType::Notification, Rights::READ)?
        .as_notification()?;
    let current = current_thread()?;
    Ok(notif.wait(&current))
}

pub fn sys_notification_signal(args: &[u32; 5]) -> Result<u32> {
    let proc = current_proc();
    let notif = proc
        .handles()
        .lookup(args[0], HandleType::Notification, Rights::WRITE)?
        .as_notification()?;
    notif.signal(args[1]);
    Ok(0)
}
