//! Proxmox VE guest primitives.
//!
//! The cluster inventory comes from one `pvesh get /cluster/resources` call
//! and answers the existence and running-state probes. Actions run `qm` or
//! `pct` on the node that owns the guest: directly when that is this host,
//! over SSH otherwise.

use anyhow::{Context, Result};
use bulkops::{Id, Operation, Outcome, StateProbe};
use remotekit::session::shell_quote;
use remotekit::{InterruptToken, Transport};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;

use crate::cli::{BulkActionArg, GuestKindArg};
use crate::config::FleetConfig;
use crate::runner;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuestKind {
    Vm,
    Container,
}

impl GuestKind {
    /// Management tool on the node
    pub fn tool(&self) -> &'static str {
        match self {
            Self::Vm => "qm",
            Self::Container => "pct",
        }
    }

    /// `type` in cluster resources
    fn resource_type(&self) -> &'static str {
        match self {
            Self::Vm => "qemu",
            Self::Container => "lxc",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Vm => "VM",
            Self::Container => "container",
        }
    }
}

impl From<GuestKindArg> for GuestKind {
    fn from(arg: GuestKindArg) -> Self {
        match arg {
            GuestKindArg::Vm => Self::Vm,
            GuestKindArg::Ct => Self::Container,
        }
    }
}

// ============================================================================
// Inventory
// ============================================================================

#[derive(Debug, Deserialize)]
struct ClusterResource {
    #[serde(rename = "type")]
    kind: String,
    vmid: Option<Id>,
    node: Option<String>,
    status: Option<String>,
    name: Option<String>,
    #[serde(default)]
    template: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuestInfo {
    pub id: Id,
    pub node: String,
    pub name: Option<String>,
    pub running: bool,
}

/// Guests of one kind, keyed by ID.
#[derive(Debug, Clone)]
pub struct Inventory {
    kind: GuestKind,
    guests: BTreeMap<Id, GuestInfo>,
}

impl Inventory {
    /// Query the cluster.
    pub fn load(kind: GuestKind) -> Result<Self> {
        let json = runner::run_capture(
            "pvesh",
            &[
                "get",
                "/cluster/resources",
                "--type",
                "vm",
                "--output-format",
                "json",
            ],
        )
        .context("Failed to query cluster resources (is this a Proxmox VE node?)")?;
        Self::from_json(kind, &json)
    }

    /// Templates are left out: they cannot be started or stopped.
    pub fn from_json(kind: GuestKind, json: &str) -> Result<Self> {
        let resources: Vec<ClusterResource> =
            serde_json::from_str(json).context("Unexpected cluster resources format")?;

        let guests = resources
            .into_iter()
            .filter(|r| r.kind == kind.resource_type() && r.template == 0)
            .filter_map(|r| {
                Some(GuestInfo {
                    id: r.vmid?,
                    node: r.node?,
                    name: r.name,
                    running: r.status.as_deref() == Some("running"),
                })
            })
            .map(|g| (g.id, g))
            .collect();

        Ok(Self { kind, guests })
    }

    pub fn kind(&self) -> GuestKind {
        self.kind
    }

    pub fn get(&self, id: Id) -> Option<&GuestInfo> {
        self.guests.get(&id)
    }

    pub fn len(&self) -> usize {
        self.guests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guests.is_empty()
    }
}

impl StateProbe for Inventory {
    fn exists(&self, id: Id) -> bool {
        self.guests.contains_key(&id)
    }

    fn is_running(&self, id: Id) -> bool {
        self.guests.get(&id).is_some_and(|g| g.running)
    }
}

/// Short hostname of this node.
pub fn local_node() -> String {
    match runner::run_capture("hostname", &["-s"]) {
        Ok(name) => name,
        Err(e) => {
            log::warn!("Could not determine local hostname: {e}");
            String::new()
        }
    }
}

// ============================================================================
// Actions
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuestAction {
    Start,
    Stop,
    Shutdown,
    Reboot,
    Set(Vec<(String, String)>),
}

impl GuestAction {
    pub fn from_args(action: BulkActionArg, options: &[String]) -> Result<Self> {
        let parsed = parse_options(options)?;
        if action != BulkActionArg::Set && !parsed.is_empty() {
            anyhow::bail!("--option is only valid with the 'set' action");
        }

        Ok(match action {
            BulkActionArg::Start => Self::Start,
            BulkActionArg::Stop => Self::Stop,
            BulkActionArg::Shutdown => Self::Shutdown,
            BulkActionArg::Reboot => Self::Reboot,
            BulkActionArg::Set if parsed.is_empty() => {
                anyhow::bail!("'set' needs at least one --option KEY=VALUE")
            }
            BulkActionArg::Set => Self::Set(parsed),
        })
    }

    pub fn verb(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Shutdown => "shutdown",
            Self::Reboot => "reboot",
            Self::Set(_) => "set",
        }
    }

    /// Anything but start interrupts or changes running guests.
    pub fn is_destructive(&self) -> bool {
        !matches!(self, Self::Start)
    }

    /// Arguments to `qm`/`pct` for `id`.
    pub fn tool_args(&self, id: Id) -> Vec<String> {
        let mut args = vec![self.verb().to_string(), id.to_string()];
        if let Self::Set(options) = self {
            for (key, value) in options {
                args.push(format!("--{key}"));
                args.push(value.clone());
            }
        }
        args
    }
}

impl fmt::Display for GuestAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Set(options) => {
                let pairs: Vec<String> = options.iter().map(|(k, v)| format!("{k}={v}")).collect();
                write!(f, "set {}", pairs.join(" "))
            }
            other => f.write_str(other.verb()),
        }
    }
}

/// Parse `KEY=VALUE` pairs. Keys are Proxmox option names.
pub fn parse_options(options: &[String]) -> Result<Vec<(String, String)>> {
    options
        .iter()
        .map(|option| {
            let (key, value) = option
                .split_once('=')
                .with_context(|| format!("Invalid option '{option}', expected KEY=VALUE"))?;
            let key = key.trim();
            let valid = !key.is_empty()
                && key
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
            if !valid {
                anyhow::bail!("Invalid option name '{key}'");
            }
            Ok((key.to_string(), value.to_string()))
        })
        .collect()
}

/// Applies a [`GuestAction`] to one guest per call.
pub struct GuestOperation<'a> {
    action: &'a GuestAction,
    inventory: &'a Inventory,
    config: &'a FleetConfig,
    local_node: &'a str,
    transport: &'a dyn Transport,
}

impl<'a> GuestOperation<'a> {
    pub fn new(
        action: &'a GuestAction,
        inventory: &'a Inventory,
        config: &'a FleetConfig,
        local_node: &'a str,
        transport: &'a dyn Transport,
    ) -> Self {
        Self {
            action,
            inventory,
            config,
            local_node,
            transport,
        }
    }

    /// Shell command line for `id`, as run on a remote node.
    pub fn command_line(&self, id: Id) -> String {
        let mut line = self.inventory.kind().tool().to_string();
        for arg in self.action.tool_args(id) {
            line.push(' ');
            line.push_str(&shell_quote(&arg));
        }
        line
    }

    fn run(&self, guest: &GuestInfo) -> Result<(), String> {
        if guest.node == self.local_node {
            let args = self.action.tool_args(guest.id);
            let args: Vec<&str> = args.iter().map(String::as_str).collect();
            return runner::run_capture(self.inventory.kind().tool(), &args)
                .map(|_| ())
                .map_err(|e| e.to_string());
        }

        let node = self
            .config
            .node_target(&guest.node)
            .map_err(|e| format!("{e:#}"))?;
        let output = self
            .transport
            .exec(&node, &self.command_line(guest.id), &InterruptToken::new())
            .map_err(|e| e.to_string())?;
        if output.success() {
            Ok(())
        } else {
            Err(output.message())
        }
    }
}

impl Operation for GuestOperation<'_> {
    fn apply(&self, id: Id) -> Outcome {
        let label = self.inventory.kind().label();
        let verb = self.action.verb();
        let Some(guest) = self.inventory.get(id) else {
            return Outcome::failure(format!("{label} {id} not in cluster inventory"));
        };

        log::debug!("{verb} {label} {id} on {}", guest.node);
        match self.run(guest) {
            Ok(()) => {
                log::info!("{label} {id}: {verb} ok");
                Outcome::Success
            }
            Err(message) => {
                log::error!("{label} {id}: {verb} failed: {message}");
                Outcome::failure(message)
            }
        }
    }
}
