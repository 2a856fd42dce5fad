//! Boot module registry.
//!
//! The loader hands the kernel a set of named ELF images; `spawn` with
//! `type = module` resolves the image here. Module memory is owned by the
//! loader reservation and lives for the whole kernel lifetime.

use alloc::string::String;
use alloc::vec::Vec;
use spin::Mutex;

struct BootModule {
    name: String,
    data: &'static [u8],
}

static MODULES: Mutex<Vec<BootModule>> = Mutex::new(Vec::new());

pub fn register(name: &str, data: &'static [u8]) {
    MODULES.lock().push(BootModule { name: String::from(name), data });
}

pub fn find(name: &str) -> Option<&'static [u8]> {
    MODULES.lock().iter().find(|m| m.name == name).map(|m| m.data)
}

pub fn by_index(idx: usize) -> Option<&'static [u8]> {
    MODULES.lock().get(idx).map(|m| m.data)
}

pub fn count() -> usize {
    MODULES.lock().len()
}

/// The module to spawn as init: `xnix.initmod=<idx>` overrides, otherwise
/// a module named "init", otherwise the first module.
pub fn init_module() -> Option<&'static [u8]> {
    if let Some(idx) = crate::boot::cmdline::get_u32("xnix.initmod") {
        return by_index(idx as usize);
    }
    find("init").or_else(|| by_index(0))
}
