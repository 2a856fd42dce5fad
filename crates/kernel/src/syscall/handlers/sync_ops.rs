//! Sync syscalls (band 600-699): kernel mutexes behind handles.

use super::{current_proc, current_thread};
use crate::cap::KObject;
use crate::sync::KMutex;
use crate::Result;
use alloc::sync::Arc;
use xnix_abi::{HandleType, Rights};

pub fn sys_mutex_create(_args: &[u32; 5]) -> Result<u32> {
    let proc = current_proc();
    let mutex = Arc::new(KMutex::new());
    proc.handles().alloc(KObject::Mutex(mutex), Rights::full(), "")
}

pub fn sys_mutex_destroy(args: &[u32; 5]) -> Result<u32> {
    let proc = current_proc();
    proc.handles().free(args[0])?;
    Ok(0)
}

pub fn sys_mutex_lock(args: &[u32; 5]) -> Result<u32> {
    let proc = current_proc();
    let mutex = proc.handles().lookup(args[0], HandleType::Mutex, Rights::WRITE)?.as_mutex()?;
    let current = current_thread()?;
    mutex.lock(&current)?;
    Ok(0)
}

pub fn sys_mutex_unlock(args: &[u32; 5]) -> Result<u32> {
    let proc = current_proc();
    let mutex = proc.handles().lookup(args[0], HandleType::Mutex, Rights::WRITE)?.as_mutex()?;
    let current = current_thread()?;
    mutex.unlock(&current)?;
    Ok(0)
}
