//! Offline service-plan resolver.
//!
//! Loads a services.conf, runs discovery and the dependency graph, and
//! prints the topological start plan with handle assignments — without
//! spawning anything. Useful for validating a configuration before it
//! goes onto a boot image.

use std::process::ExitCode;
use xnix_abi::Handle;
use xnix_init::sys::StartRequest;
use xnix_init::{config, graph, handles, HandleKind, Sys};

/// Dry-run system: endpoint and inherit lookups hand out fake handles.
struct PlanSys {
    next_handle: Handle,
}

impl Sys for PlanSys {
    fn spawn(&mut self, _req: &StartRequest) -> Result<i32, i32> {
        unreachable!("the planner never spawns")
    }

    fn endpoint_create(&mut self, _name: &str) -> Option<Handle> {
        let h = self.next_handle;
        self.next_handle += 1;
        Some(h)
    }

    fn handle_find(&mut self, _name: &str) -> Option<Handle> {
        let h = self.next_handle;
        self.next_handle += 1;
        Some(h)
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

    fn log_line(&mut self, line: &str) {
        eprintln!("{line}");
    }
}

fn main() -> ExitCode {
    let Some(path) = std::env::args().nth(1) else {
        eprintln!("usage: svcplan <services.conf>");
        return ExitCode::FAILURE;
    };

    let conf = match std::fs::read_to_string(&path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{path}: {e}");
            return ExitCode::FAILURE;
        }
    };

    let mut set = config::parse(&conf, |line| eprintln!("{line}"));

    if let Err(e) = handles::resolve_discovery(&mut set, |line| eprintln!("{line}")) {
        eprintln!("error: {e}");
        return ExitCode::FAILURE;
    }
    let mut sys = PlanSys { next_handle: 1 };
    if let Err(e) = handles::resolve_handles(&mut set, &mut sys) {
        eprintln!("error: {e}");
        return ExitCode::FAILURE;
    }

    let graph = match graph::build(&set) {
        Ok(g) => g,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };

    println!("{} services, {} levels", set.services.len(), graph.max_level + 1);
    for level in 0..=graph.max_level {
        println!("level {level}:");
        for &idx in &graph.topo_order {
            if graph.levels[idx] != level {
                continue;
            }
            let svc = &set.services[idx];
            let mut line = format!("  {}", svc.name);
            if svc.builtin {
                line.push_str(" (builtin)");
            }
            if let Some(mount) = &svc.mount {
                line.push_str(&format!(" mount={mount}"));
            }
            if !svc.handles.is_empty() {
                let hs: Vec<String> = svc
                    .handles
                    .iter()
                    .map(|h| format!("{}={}", h.name, h.handle))
                    .collect();
                line.push_str(&format!(" handles=[{}]", hs.join(" ")));
            }
            println!("{line}");
        }
    }

    // Unresolvable inherits would already have failed; still, surface any
    // definitions that never got a kind.
    for def in &set.handle_defs {
        if def.kind == HandleKind::Unset {
            eprintln!("warning: handle '{}' has no type", def.name);
        }
    }

    ExitCode::SUCCESS
}
