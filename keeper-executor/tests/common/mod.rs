//! An in-memory FreeBSD host for driving VM lifecycles without bhyve.
//!
//! Volumes, interfaces and hypervisor processes live in a mutex-guarded
//! model. Kernel device nodes are real files in a temporary directory so
//! existence checks go through the filesystem like on a real host.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use keeper_executor::{
    CommandInput, CommandOutput, CommandRunner, ExecutorError, HostCommand, HostConfig, Keeper,
};

/// First PID handed to a simulated hypervisor.
pub const FIRST_PID: u32 = 4242;

#[derive(Debug, Clone)]
struct Property {
    value: String,
    local: bool,
}

#[derive(Default)]
struct Model {
    volumes: BTreeMap<String, BTreeMap<String, Property>>,
    interfaces: BTreeSet<String>,
    members: BTreeSet<(String, String)>,
    next_tap: u32,
    next_pid: u32,
    holders: BTreeMap<String, (u32, String)>,
    hypervisor_exit: Option<CommandOutput>,
    loader_fails: bool,
    interfaces_refused: bool,
    hypervisor_hangs: bool,
    loader_input: Option<CommandInput>,
    device_map: Option<String>,
    calls: Vec<HostCommand>,
}

/// Recording fake implementing [`CommandRunner`].
pub struct FakeHost {
    dir: tempfile::TempDir,
    model: Mutex<Model>,
}

impl FakeHost {
    /// Host with no volumes and no interfaces.
    pub fn new() -> Self {
        let dir = match tempfile::tempdir() {
            Ok(d) => d,
            Err(e) => panic!("tempdir: {e}"),
        };
        Self { dir, model: Mutex::new(Model { next_pid: FIRST_PID, ..Model::default() }) }
    }

    fn model(&self) -> MutexGuard<'_, Model> {
        match self.model.lock() {
            Ok(m) => m,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Directory standing in for `/dev/vmm`.
    pub fn vmm_dir(&self) -> &Path {
        self.dir.path()
    }

    /// Configuration pointing at this host's device directory.
    pub fn config(&self) -> HostConfig {
        HostConfig::default().with_device_dirs(self.vmm_dir(), "/dev/zvol")
    }

    /// Adds `volume` tagged locally as VM `name`.
    pub fn with_vm(self, name: &str, volume: &str) -> Self {
        self.with_property(volume, "bhyve:name", name)
    }

    /// Sets a local property on `volume`, creating the volume if needed.
    pub fn with_property(self, volume: &str, key: &str, value: &str) -> Self {
        self.set(volume, key, value, true);
        self
    }

    /// Sets a property on `volume` that appears inherited from a parent.
    pub fn with_inherited(self, volume: &str, key: &str, value: &str) -> Self {
        self.set(volume, key, value, false);
        self
    }

    fn set(&self, volume: &str, key: &str, value: &str, local: bool) {
        let mut model = self.model();
        let props = model.volumes.entry(volume.to_owned()).or_default();
        props.insert("volsize".to_owned(), Property { value: "10G".to_owned(), local: true });
        props.insert(key.to_owned(), Property { value: value.to_owned(), local });
    }

    /// Adds an existing interface.
    pub fn with_interface(self, name: &str) -> Self {
        self.model().interfaces.insert(name.to_owned());
        self
    }

    /// Makes every hypervisor run end with `out`.
    pub fn hypervisor_exits(self, out: CommandOutput) -> Self {
        self.model().hypervisor_exit = Some(out);
        self
    }

    /// Makes every hypervisor run block until its future is dropped.
    pub fn hanging_hypervisor(self) -> Self {
        self.model().hypervisor_hangs = true;
        self
    }

    /// Makes the boot loader exit non-zero without creating a device node.
    pub fn failing_loader(self) -> Self {
        self.model().loader_fails = true;
        self
    }

    /// Makes every interface creation fail, as without network privileges.
    pub fn refusing_interfaces(self) -> Self {
        self.model().interfaces_refused = true;
        self
    }

    /// Simulates VM `name` started by another process on `bridge`.
    ///
    /// Returns the tap the hypervisor holds.
    pub fn start_external(&self, name: &str, bridge: &str) -> String {
        self.create_node(name);
        let mut model = self.model();
        let tap = format!("tap{}", model.next_tap);
        model.next_tap += 1;
        let pid = model.next_pid;
        model.next_pid += 1;
        model.interfaces.insert(bridge.to_owned());
        model.interfaces.insert(tap.clone());
        model.members.insert((bridge.to_owned(), tap.clone()));
        model.holders.insert(name.to_owned(), (pid, tap.clone()));
        tap
    }

    fn create_node(&self, name: &str) {
        if let Err(e) = std::fs::write(self.vmm_dir().join(name), b"") {
            panic!("create device node: {e}");
        }
    }

    /// True when the device node of `name` exists.
    pub fn node_exists(&self, name: &str) -> bool {
        self.vmm_dir().join(name).exists()
    }

    /// Interfaces currently present.
    pub fn interfaces(&self) -> BTreeSet<String> {
        self.model().interfaces.clone()
    }

    /// Tap interfaces currently present.
    pub fn taps(&self) -> Vec<String> {
        self.model().interfaces.iter().filter(|i| i.starts_with("tap")).cloned().collect()
    }

    /// Bridge memberships currently present.
    pub fn members(&self) -> BTreeSet<(String, String)> {
        self.model().members.clone()
    }

    /// Every command run so far.
    pub fn calls(&self) -> Vec<HostCommand> {
        self.model().calls.clone()
    }

    /// Argument lists of every call to `program`.
    pub fn invocations(&self, program: &str) -> Vec<Vec<String>> {
        self.calls()
            .into_iter()
            .filter(|c| c.program_name() == program)
            .map(|c| c.args)
            .collect()
    }

    /// Stdin the boot loader was last given.
    pub fn loader_input(&self) -> Option<CommandInput> {
        self.model().loader_input.clone()
    }

    /// Device map the boot loader was last given.
    pub fn device_map(&self) -> Option<String> {
        self.model().device_map.clone()
    }

    fn zfs(&self, args: &[&str]) -> CommandOutput {
        let mut model = self.model();
        match args {
            ["get", "-H", "-t", "volume", "-s", "local", "-o", "value,name", tag] => {
                let rows: String = model
                    .volumes
                    .iter()
                    .filter_map(|(volume, props)| {
                        props
                            .get(*tag)
                            .filter(|p| p.local)
                            .map(|p| format!("{}\t{volume}\n", p.value))
                    })
                    .collect();
                CommandOutput::success(rows)
            }
            ["get", "-H", "-o", "property,value", "all", volume] => {
                match model.volumes.get(*volume) {
                    Some(props) => {
                        let rows: String =
                            props.iter().map(|(k, p)| format!("{k}\t{}\n", p.value)).collect();
                        CommandOutput::success(rows)
                    }
                    None => CommandOutput::failure(
                        1,
                        format!("cannot open '{volume}': dataset does not exist"),
                    ),
                }
            }
            ["create", "-V", _size, "-o", tag, volume] => {
                let Some((key, value)) = tag.split_once('=') else {
                    return CommandOutput::failure(2, "bad property");
                };
                if model.volumes.contains_key(*volume) {
                    return CommandOutput::failure(1, "dataset already exists");
                }
                let props = model.volumes.entry((*volume).to_owned()).or_default();
                props.insert(key.to_owned(), Property { value: value.to_owned(), local: true });
                CommandOutput::success("")
            }
            _ => CommandOutput::failure(2, "unsupported zfs invocation"),
        }
    }

    fn ifconfig(&self, args: &[&str]) -> CommandOutput {
        let mut model = self.model();
        match args {
            [name] if model.interfaces.contains(*name) => {
                CommandOutput::success(format!("{name}: flags=8843\n"))
            }
            [name] => {
                CommandOutput::failure(1, format!("ifconfig: interface {name} does not exist"))
            }
            [_, "create"] if model.interfaces_refused => {
                CommandOutput::failure(1, "ifconfig: SIOCIFCREATE2: Operation not permitted")
            }
            ["tap", "create"] => {
                let tap = format!("tap{}", model.next_tap);
                model.next_tap += 1;
                model.interfaces.insert(tap.clone());
                CommandOutput::success(format!("{tap}\n"))
            }
            [name, "create"] => {
                if model.interfaces.insert((*name).to_owned()) {
                    CommandOutput::success("")
                } else {
                    CommandOutput::failure(1, "ifconfig: SIOCIFCREATE2: File exists")
                }
            }
            [bridge, "addm", tap] => {
                if model.interfaces.contains(*bridge) && model.interfaces.contains(*tap) {
                    model.members.insert(((*bridge).to_owned(), (*tap).to_owned()));
                    CommandOutput::success("")
                } else {
                    CommandOutput::failure(1, "ifconfig: BRDGADD: No such file or directory")
                }
            }
            [bridge, "deletem", tap] => {
                if model.members.remove(&((*bridge).to_owned(), (*tap).to_owned())) {
                    CommandOutput::success("")
                } else {
                    CommandOutput::failure(1, "ifconfig: BRDGDEL: No such file or directory")
                }
            }
            [name, "destroy"] => {
                if model.interfaces.remove(*name) {
                    CommandOutput::success("")
                } else {
                    CommandOutput::failure(1, "ifconfig: SIOCIFDESTROY: Invalid argument")
                }
            }
            _ => CommandOutput::failure(2, "unsupported ifconfig invocation"),
        }
    }

    fn grub_bhyve(&self, command: &HostCommand) -> CommandOutput {
        let mut model = self.model();
        model.loader_input = Some(command.stdin.clone());
        model.device_map = command.args.get(3).and_then(|path| std::fs::read_to_string(path).ok());
        if model.loader_fails {
            return CommandOutput::failure(1, "grub-bhyve: error: no such partition");
        }
        drop(model);
        if let Some(name) = command.args.last() {
            self.create_node(name);
        }
        CommandOutput::success("")
    }

    fn bhyve(&self) -> CommandOutput {
        self.model().hypervisor_exit.clone().unwrap_or_else(|| CommandOutput::failure(1, ""))
    }

    fn bhyvectl(&self, args: &[&str]) -> CommandOutput {
        let ([vm, "--destroy"] | ["--destroy", vm]) = args else {
            return CommandOutput::failure(2, "unsupported bhyvectl invocation");
        };
        let Some(name) = vm.strip_prefix("--vm=") else {
            return CommandOutput::failure(2, "missing --vm");
        };
        self.model().holders.remove(name);
        match std::fs::remove_file(self.vmm_dir().join(name)) {
            Ok(()) => CommandOutput::success(""),
            Err(_) => CommandOutput::failure(1, "vm_open: No such file or directory"),
        }
    }

    fn fuser(&self, args: &[&str]) -> CommandOutput {
        let name = args
            .first()
            .and_then(|p| Path::new(p).file_name())
            .and_then(|n| n.to_str())
            .unwrap_or_default();
        match self.model().holders.get(name) {
            Some((pid, _)) => CommandOutput::success(format!(" {pid}")),
            None => CommandOutput::success(""),
        }
    }

    fn fstat(&self, args: &[&str]) -> CommandOutput {
        let ["-p", pid, "-f", "/dev"] = args else {
            return CommandOutput::failure(2, "unsupported fstat invocation");
        };
        let model = self.model();
        let mut out = String::from("USER CMD PID FD MOUNT INUM MODE SZ|DV R/W\n");
        for (name, (held_pid, tap)) in &model.holders {
            if held_pid.to_string() == *pid {
                out.push_str(&format!("root bhyve {pid} 5 /dev 201 crw------- vmm/{name} rw\n"));
                out.push_str(&format!("root bhyve {pid} 7 /dev 188 crw------- {tap} rw\n"));
            }
        }
        CommandOutput::success(out)
    }
}

#[async_trait]
impl CommandRunner for FakeHost {
    async fn execute(&self, command: HostCommand) -> Result<CommandOutput, ExecutorError> {
        self.model().calls.push(command.clone());
        let hangs = self.model().hypervisor_hangs;
        if hangs && command.program_name() == "bhyve" {
            std::future::pending::<()>().await;
        }
        let args: Vec<&str> = command.args.iter().map(String::as_str).collect();
        Ok(match command.program_name() {
            "zfs" => self.zfs(&args),
            "ifconfig" => self.ifconfig(&args),
            "grub-bhyve" => self.grub_bhyve(&command),
            "bhyve" => self.bhyve(),
            "bhyvectl" => self.bhyvectl(&args),
            "fuser" => self.fuser(&args),
            "fstat" => self.fstat(&args),
            other => CommandOutput::failure(127, format!("{other}: not found")),
        })
    }
}

/// Keeper driving `host`.
pub fn keeper(host: FakeHost) -> Keeper<FakeHost> {
    let config = host.config();
    Keeper::new(host, config)
}

/// Path of `name`'s device node under `host`.
pub fn node_path(host: &FakeHost, name: &str) -> PathBuf {
    host.vmm_dir().join(name)
}
