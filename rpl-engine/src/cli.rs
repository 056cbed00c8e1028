//! CLI command table. Grounded on `original_source/RPL/cli.py`'s
//! `cli_sock`-driven command loop: here the engine interprets the command
//! string synchronously inside its own processing loop (SPEC_FULL §6) rather
//! than over a socket, so there is no separate listener to grind through —
//! `handle_cli_command` is just another branch of `run`'s `select!`.

use crate::engine::Engine;
use std::fmt::Write as _;

const HELP_TEXT: &str = "commands: show-current-dodag, list-dodag-cache, list-neighbors, \
list-neighbors-verbose, show-preferred-parent, list-parents, list-parents-verbose, \
show-dao-parent, global-repair, local-repair, subdodag-dao-update, list-routes, \
list-downward-routes, help";

impl Engine {
    pub(crate) fn handle_cli_command(&mut self, command: &str) -> String {
        match command {
            "help" => HELP_TEXT.to_string(),
            "show-current-dodag" => self.cli_show_current_dodag(),
            "list-dodag-cache" => self.cli_list_dodag_cache(),
            "list-neighbors" => self.cli_list_neighbors(false),
            "list-neighbors-verbose" => self.cli_list_neighbors(true),
            "show-preferred-parent" => self.cli_show_preferred_parent(),
            "list-parents" => self.cli_list_parents(false),
            "list-parents-verbose" => self.cli_list_parents(true),
            "show-dao-parent" => self.cli_show_dao_parent(),
            "global-repair" => self.cli_global_repair(),
            "local-repair" => self.cli_local_repair(),
            "subdodag-dao-update" => self.cli_subdodag_dao_update(),
            "list-routes" => self.cli_list_routes(),
            "list-downward-routes" => self.cli_list_downward_routes(),
            other => format!("unknown command: {other}\n{HELP_TEXT}"),
        }
    }

    fn cli_show_current_dodag(&self) -> String {
        let Some(active) = self.dodags.get_active_dodag() else {
            return "no active DODAG".to_string();
        };
        let Some(d) = self.dodags.get(active) else {
            return "no active DODAG".to_string();
        };
        format!(
            "dodagID={} instanceID={} version={} rank={} grounded={} mop={} prf={} dtsn={} root={}",
            d.dodag_id, d.instance_id, d.version, d.rank, d.grounded, d.mop, d.prf, d.dtsn, d.is_root
        )
    }

    fn cli_list_dodag_cache(&self) -> String {
        if self.dodags.is_empty() {
            return "no DODAGs tracked".to_string();
        }
        let mut out = String::new();
        for (_, d) in self.dodags.iter() {
            let _ = writeln!(
                out,
                "dodagID={} instanceID={} version={} rank={} active={} grounded={}",
                d.dodag_id, d.instance_id, d.version, d.rank, d.active, d.grounded
            );
        }
        out
    }

    fn cli_list_neighbors(&self, verbose: bool) -> String {
        if self.neighbors.is_empty() {
            return "no known neighbors".to_string();
        }
        let mut out = String::new();
        for (handle, node) in self.neighbors.iter() {
            if verbose {
                let _ = writeln!(
                    out,
                    "{} iface={} rank={} dtsn={} parent={} preferred={}",
                    node.address,
                    node.iface,
                    node.rank,
                    node.dtsn,
                    self.neighbors.is_parent(handle),
                    node.preferred
                );
            } else {
                let _ = writeln!(out, "{} iface={} rank={}", node.address, node.iface, node.rank);
            }
        }
        out
    }

    fn cli_show_preferred_parent(&self) -> String {
        match self.neighbors.preferred().and_then(|h| self.neighbors.node(h)) {
            Some(node) => format!("{} iface={} rank={}", node.address, node.iface, node.rank),
            None => "no preferred parent".to_string(),
        }
    }

    fn cli_list_parents(&self, verbose: bool) -> String {
        if self.neighbors.parents().is_empty() {
            return "no DIO parents".to_string();
        }
        let mut out = String::new();
        for &handle in self.neighbors.parents() {
            let Some(node) = self.neighbors.node(handle) else { continue };
            if verbose {
                let _ = writeln!(out, "{} iface={} rank={} dtsn={} preferred={}", node.address, node.iface, node.rank, node.dtsn, node.preferred);
            } else {
                let _ = writeln!(out, "{} iface={} rank={}", node.address, node.iface, node.rank);
            }
        }
        out
    }

    /// The preferred parent is the only destination a unicast DAO is ever
    /// sent to (`send_dao`'s default destination), so this reports the same
    /// neighbor `show-preferred-parent` does.
    fn cli_show_dao_parent(&self) -> String {
        self.cli_show_preferred_parent()
    }

    fn cli_global_repair(&mut self) -> String {
        let roots: Vec<_> = self.dodags.iter().filter(|(_, d)| d.is_root).map(|(h, _)| h).collect();
        if roots.is_empty() {
            return "not a DODAG root, nothing to repair".to_string();
        }
        for h in roots {
            if let Some(d) = self.dodags.get_mut(h) {
                d.version = d.version.add(1);
            }
            self.reset_trickle(h);
        }
        "global repair initiated".to_string()
    }

    fn cli_local_repair(&mut self) -> String {
        let handles: Vec<_> = self.dodags.iter().map(|(h, _)| h).collect();
        for h in handles {
            self.reset_trickle(h);
        }
        "local repair initiated".to_string()
    }

    fn cli_subdodag_dao_update(&mut self) -> String {
        let handles: Vec<_> = self.dodags.iter().map(|(h, _)| h).collect();
        for h in handles {
            if let Some(d) = self.dodags.get_mut(h) {
                d.dtsn = d.dtsn.add(1);
            }
            self.reset_trickle(h);
        }
        "sub-DODAG DAO update initiated".to_string()
    }

    fn cli_list_routes(&self) -> String {
        if self.routes.is_empty() {
            return "no installed routes".to_string();
        }
        let mut out = String::new();
        for route in self.routes.iter() {
            let _ = writeln!(out, "{:?} via {} iface={} onehop={}", route.target, route.nexthop, route.nexthop_iface, route.onehop);
        }
        out
    }

    fn cli_list_downward_routes(&self) -> String {
        let mut out = String::new();
        for (_, d) in self.dodags.iter() {
            for route in &d.downward_routes {
                let _ = writeln!(
                    out,
                    "dodagID={} {:?} via {} iface={} onehop={}",
                    d.dodag_id, route.target, route.nexthop, route.nexthop_iface, route.onehop
                );
            }
        }
        if out.is_empty() { "no downward routes".to_string() } else { out }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{InMemoryAddressAdapter, NoopLinkAdapter, NoopLinkSender};
    use crate::engine::EngineConfig;

    fn root_engine() -> Engine {
        Engine::new(
            EngineConfig { ifaces: vec!["eth0".into()], is_root: true, dodag_ids: vec!["2001:db8::1".parse().unwrap()], prefixes: vec![] },
            Box::new(InMemoryAddressAdapter::new()),
            Box::new(NoopLinkAdapter),
            Box::new(NoopLinkSender),
        )
    }

    #[test]
    fn help_lists_every_command() {
        let mut engine = root_engine();
        let out = engine.handle_cli_command("help");
        assert!(out.contains("show-current-dodag"));
        assert!(out.contains("list-downward-routes"));
    }

    #[test]
    fn unknown_command_prefixes_help_text() {
        let mut engine = root_engine();
        let out = engine.handle_cli_command("frobnicate");
        assert!(out.starts_with("unknown command: frobnicate"));
        assert!(out.contains("show-current-dodag"));
    }

    #[test]
    fn show_current_dodag_reports_the_root() {
        let mut engine = root_engine();
        let out = engine.handle_cli_command("show-current-dodag");
        assert!(out.contains("2001:db8::1"));
        assert!(out.contains("root=true"));
    }

    #[test]
    fn global_repair_bumps_root_version() {
        let mut engine = root_engine();
        let before = engine.dodags.get_active_dodag().and_then(|h| engine.dodags.get(h)).unwrap().version;
        let out = engine.handle_cli_command("global-repair");
        assert_eq!(out, "global repair initiated");
        let after = engine.dodags.get_active_dodag().and_then(|h| engine.dodags.get(h)).unwrap().version;
        assert_eq!(after.value(), before.add(1).value());
    }

    #[test]
    fn list_neighbors_reports_empty_cache() {
        let mut engine = root_engine();
        assert_eq!(engine.handle_cli_command("list-neighbors"), "no known neighbors");
    }
}
