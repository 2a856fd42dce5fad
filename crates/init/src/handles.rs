//! Endpoint service discovery and handle provisioning.
//!
//! Discovery runs on the parsed tables: every `provides` name gets a
//! handle definition (endpoint by default) and lands on the provider's
//! handle list; `requires` names must already be defined somewhere or the
//! load fails; `wants` names are attached only when they exist. Resolution
//! then materializes each definition — fresh endpoint or a lookup in
//! init's own table — and fills in the services' handle values.

use crate::config::{HandleKind, ServiceSet, HANDLES_MAX};
use crate::sys::Sys;
use alloc::string::String;
use xnix_abi::HANDLE_INVALID;

#[derive(Debug, Clone)]
pub enum HandleError {
    UnknownRequire { service: String, name: String },
    TooManyHandles { service: String },
    TooManyDefs,
    CreateFailed { name: String },
}

impl core::fmt::Display for HandleError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            HandleError::UnknownRequire { service, name } => {
                write!(f, "service '{}' requires unknown handle '{}'", service, name)
            }
            HandleError::TooManyHandles { service } => {
                write!(f, "service '{}' has too many handles", service)
            }
            HandleError::TooManyDefs => write!(f, "too many handle definitions"),
            HandleError::CreateFailed { name } => {
                write!(f, "could not create or locate handle '{}'", name)
            }
        }
    }
}

fn attach_handle(set: &mut ServiceSet, svc: usize, name: &str) -> Result<(), HandleError> {
    if set.services[svc].has_handle(name) {
        return Ok(()); // idempotent across reloads
    }
    if set.services[svc].handles.len() >= HANDLES_MAX {
        return Err(HandleError::TooManyHandles { service: set.services[svc].name.clone() });
    }
    set.services[svc].handles.push(crate::config::HandleRef {
        name: String::from(name),
        handle: HANDLE_INVALID,
    });
    Ok(())
}

/// Step 2 of the resolution pipeline: endpoint service discovery.
pub fn resolve_discovery(set: &mut ServiceSet, mut log: impl FnMut(&str)) -> Result<(), HandleError> {
    // provides: ensure a definition exists and the provider holds it.
    for svc in 0..set.services.len() {
        for i in 0..set.services[svc].provides.len() {
            let name = set.services[svc].provides[i].clone();

            let def = set.handle_def_get_or_add(&name).ok_or(HandleError::TooManyDefs)?;
            if set.handle_defs[def].kind == HandleKind::Unset {
                set.handle_defs[def].kind = HandleKind::Endpoint;
            }
            attach_handle(set, svc, &name)?;
            log(&alloc::format!("service '{}' provides '{}'", set.services[svc].name, name));
        }
    }

    // requires: the definition must exist by now.
    for svc in 0..set.services.len() {
        for i in 0..set.services[svc].requires.len() {
            let name = set.services[svc].requires[i].clone();
            if set.find_handle_def(&name).is_none() {
                return Err(HandleError::UnknownRequire {
                    service: set.services[svc].name.clone(),
                    name,
                });
            }
            attach_handle(set, svc, &name)?;
        }

        // wants: attach only when someone defined it.
        for i in 0..set.services[svc].wants.len() {
            let name = set.services[svc].wants[i].clone();
            if set.find_handle_def(&name).is_some() {
                attach_handle(set, svc, &name)?;
            }
        }
    }

    Ok(())
}

/// Step 3: materialize handle definitions and fill service handle lists.
pub fn resolve_handles(set: &mut ServiceSet, sys: &mut impl Sys) -> Result<(), HandleError> {
    for def in set.handle_defs.iter_mut() {
        if def.created {
            continue;
        }
        let resolved = match def.kind {
            HandleKind::Endpoint => sys.endpoint_create(&def.name),
            HandleKind::Inherit => sys.handle_find(&def.name),
            HandleKind::Unset => None,
        };
        match resolved {
            Some(h) => {
                def.handle = h;
                def.created = true;
            }
            None => {
                return Err(HandleError::CreateFailed { name: def.name.clone() });
            }
        }
    }

    // Split borrows: defs are read while service lists are rewritten.
    let defs = set.handle_defs.clone();
    for svc in set.services.iter_mut() {
        for href in svc.handles.iter_mut() {
            if href.handle != HANDLE_INVALID {
                continue;
            }
            match defs.iter().find(|d| d.name == href.name) {
                Some(def) => href.handle = def.handle,
                None => sys.log_line(&alloc::format!("unknown handle: {}", href.name)),
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config;
    use crate::sys::StartRequest;
    use std::vec::Vec;
    use xnix_abi::Handle;

    /// Scripted fake system for the resolution tests.
    pub(crate) struct FakeSys {
        pub next_handle: Handle,
        pub created: Vec<String>,
        pub inherited: Vec<String>,
        pub known_inherits: Vec<String>,
    }

    impl FakeSys {
        pub fn new() -> Self {
            Self {
                next_handle: 10,
                created: Vec::new(),
                inherited: Vec::new(),
                known_inherits: alloc::vec![String::from("module_font")],
            }
        }
    }

    impl crate::sys::Sys for FakeSys {
        fn spawn(&mut self, _req: &StartRequest) -> Result<i32, i32> {
            unreachable!("resolution never spawns")
        }

        fn endpoint_create(&mut self, name: &str) -> Option<Handle> {
            self.created.push(name.into());
            let h = self.next_handle;
            self.next_handle += 1;
            Some(h)
        }

        fn handle_find(&mut self, name: &str) -> Option<Handle> {
            if self.known_inherits.iter().any(|n| n == name) {
                self.inherited.push(name.into());
                let h = self.next_handle;
                self.next_handle += 1;
                Some(h)
            } else {
                None
            }
        }

        fn path_exists(&mut self, _path: &str) -> bool {
            true
        }

        fn probe_endpoint(&mut self, _ep: Handle) -> bool {
            true
        }

        fn vfs_mount(&mut self, _path: &str, _ep: Handle) -> Result<(), i32> {
            Ok(())
        }

        fn waitpid_nohang(&mut self) -> Option<(i32, i32)> {
            None
        }

        fn log_line(&mut self, _line: &str) {}
    }

    #[test]
    fn provides_creates_defs_and_attaches() {
        let mut set = config::parse(
            "[service.vfsd]\nprovides = vfs\n\
             [service.shell]\nrequires = vfs\n",
            |_| {},
        );
        resolve_discovery(&mut set, |_| {}).unwrap();

        let vfsd = &set.services[set.find_service("vfsd").unwrap()];
        assert!(vfsd.has_handle("vfs"));
        let shell = &set.services[set.find_service("shell").unwrap()];
        assert!(shell.has_handle("vfs"));

        let def = &set.handle_defs[set.find_handle_def("vfs").unwrap()];
        assert_eq!(def.kind, crate::config::HandleKind::Endpoint);
    }

    #[test]
    fn unknown_require_fails() {
        let mut set = config::parse("[service.a]\nrequires = ghost\n", |_| {});
        match resolve_discovery(&mut set, |_| {}) {
            Err(HandleError::UnknownRequire { service, name }) => {
                assert_eq!(service, "a");
                assert_eq!(name, "ghost");
            }
            other => panic!("expected UnknownRequire, got {:?}", other),
        }
    }

    #[test]
    fn wants_attaches_only_when_defined() {
        let mut set = config::parse(
            "[service.a]\nprovides = net\n\
             [service.b]\nwants = net missing\n",
            |_| {},
        );
        resolve_discovery(&mut set, |_| {}).unwrap();
        let b = &set.services[set.find_service("b").unwrap()];
        assert!(b.has_handle("net"));
        assert!(!b.has_handle("missing"));
    }

    #[test]
    fn resolution_creates_endpoints_and_inherits() {
        let mut set = config::parse(
            "[service.kbd]\nprovides = kbd_ep\nhandles = module_font\n",
            |_| {},
        );
        resolve_discovery(&mut set, |_| {}).unwrap();

        let mut sys = FakeSys::new();
        resolve_handles(&mut set, &mut sys).unwrap();

        assert_eq!(sys.created, ["kbd_ep"]);
        assert_eq!(sys.inherited, ["module_font"]);

        let kbd = &set.services[set.find_service("kbd").unwrap()];
        for href in &kbd.handles {
            assert_ne!(href.handle, xnix_abi::HANDLE_INVALID, "{} resolved", href.name);
        }
    }

    #[test]
    fn missing_inherit_fails_resolution() {
        let mut set = config::parse("[service.x]\nhandles = module_ghost\n", |_| {});
        resolve_discovery(&mut set, |_| {}).unwrap();
        let mut sys = FakeSys::new();
        match resolve_handles(&mut set, &mut sys) {
            Err(HandleError::CreateFailed { name }) => assert_eq!(name, "module_ghost"),
            other => panic!("expected CreateFailed, got {:?}", other),
        }
    }
}
