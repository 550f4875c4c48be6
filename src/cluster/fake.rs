//! In-memory control plane with a scripted guest shell
//!
//! Used by unit and integration tests to drive complete checkups without a
//! cluster. VMIs become ready after a configurable number of polls, deletions
//! can linger, and every console attaches to a [`FakeShell`] that behaves like
//! a freshly booted Fedora guest.

use super::resources::{
    Condition, ConfigMap, KubeVirt, KubeVirtStatus, NetworkAttachmentDefinition,
    NetworkAttachmentDefinitionSpec, ObjectMeta, VirtualMachineInstance, VmiStatus,
    CONDITION_AVAILABLE, CONDITION_READY, CONDITION_TRUE,
};
use super::{ClusterError, ClusterResult, ConsoleChannel, ControlPlane};
use async_trait::async_trait;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

type Key = (String, String);

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

/// When fake VMIs report the Ready condition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// Ready once `get` has been called this many times
    AfterPolls(u32),
    /// Reports phase `Failed` right away
    Fails,
    Never,
}

#[derive(Debug)]
struct FakeVmi {
    vmi: VirtualMachineInstance,
    polls: u32,
    /// Remaining `get` calls that still see the object after deletion
    deleting: Option<u32>,
}

#[derive(Debug)]
struct FakeState {
    config_maps: BTreeMap<Key, ConfigMap>,
    kubevirts: Vec<KubeVirt>,
    nads: BTreeMap<Key, NetworkAttachmentDefinition>,
    vmis: BTreeMap<Key, FakeVmi>,
    readiness: Readiness,
    deletion_polls: u32,
    fail_deletes: bool,
    fail_config_map_updates: bool,
    fail_console: bool,
    shell: FakeShell,
    created: Vec<VirtualMachineInstance>,
    deleted: Vec<String>,
    config_map_updates: usize,
    commands: Arc<Mutex<Vec<String>>>,
}

/// In-memory [`ControlPlane`]
#[derive(Clone, Debug)]
pub struct FakeCluster {
    state: Arc<Mutex<FakeState>>,
}

impl Default for FakeCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeCluster {
    /// An empty cluster: no KubeVirt, no ConfigMaps, no networks
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeState {
                config_maps: BTreeMap::new(),
                kubevirts: Vec::new(),
                nads: BTreeMap::new(),
                vmis: BTreeMap::new(),
                readiness: Readiness::AfterPolls(1),
                deletion_polls: 0,
                fail_deletes: false,
                fail_config_map_updates: false,
                fail_console: false,
                shell: FakeShell::default(),
                created: Vec::new(),
                deleted: Vec::new(),
                config_map_updates: 0,
                commands: Arc::new(Mutex::new(Vec::new())),
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Add an empty ConfigMap
    pub fn with_config_map(self, namespace: &str, name: &str) -> Self {
        self.state()
            .config_maps
            .insert(key(namespace, name), ConfigMap::new(namespace, name));
        self
    }

    /// Add a KubeVirt installation reporting the given Available status
    pub fn with_kubevirt(self, available: bool) -> Self {
        let status = if available { CONDITION_TRUE } else { "False" };
        self.state().kubevirts.push(KubeVirt {
            metadata: ObjectMeta::named("kubevirt", "kubevirt"),
            status: Some(KubeVirtStatus {
                phase: Some("Deployed".to_string()),
                conditions: vec![Condition::new(CONDITION_AVAILABLE, status)],
            }),
        });
        self
    }

    /// Add a NetworkAttachmentDefinition carrying this CNI configuration
    pub fn with_network(self, namespace: &str, name: &str, cni_config: &str) -> Self {
        self.state().nads.insert(
            key(namespace, name),
            NetworkAttachmentDefinition {
                metadata: ObjectMeta::named(namespace, name),
                spec: NetworkAttachmentDefinitionSpec {
                    config: cni_config.to_string(),
                },
            },
        );
        self
    }

    pub fn with_readiness(self, readiness: Readiness) -> Self {
        self.state().readiness = readiness;
        self
    }

    /// Keep deleted VMIs visible for this many polls
    pub fn with_deletion_polls(self, polls: u32) -> Self {
        self.state().deletion_polls = polls;
        self
    }

    pub fn with_shell(self, shell: FakeShell) -> Self {
        self.state().shell = shell;
        self
    }

    pub fn failing_deletes(self) -> Self {
        self.state().fail_deletes = true;
        self
    }

    pub fn failing_config_map_updates(self) -> Self {
        self.state().fail_config_map_updates = true;
        self
    }

    pub fn failing_console(self) -> Self {
        self.state().fail_console = true;
        self
    }

    /// Names of VMIs that still exist
    pub fn live_vmis(&self) -> Vec<String> {
        self.state().vmis.keys().map(|(_, name)| name.clone()).collect()
    }

    /// Every VMI ever created, in creation order
    pub fn created_vmis(&self) -> Vec<VirtualMachineInstance> {
        self.state().created.clone()
    }

    /// Names of VMIs a delete was issued for
    pub fn deleted_vmis(&self) -> Vec<String> {
        self.state().deleted.clone()
    }

    pub fn config_map(&self, namespace: &str, name: &str) -> Option<ConfigMap> {
        self.state().config_maps.get(&key(namespace, name)).cloned()
    }

    pub fn config_map_updates(&self) -> usize {
        self.state().config_map_updates
    }

    /// Command lines typed into any console, in order
    pub fn console_commands(&self) -> Vec<String> {
        let commands = self.state().commands.clone();
        let commands = commands.lock().unwrap_or_else(|p| p.into_inner());
        commands.clone()
    }
}

#[async_trait]
impl ControlPlane for FakeCluster {
    async fn get_config_map(&self, namespace: &str, name: &str) -> ClusterResult<ConfigMap> {
        self.state()
            .config_maps
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| ClusterError::not_found("ConfigMap", namespace, name))
    }

    async fn update_config_map(&self, config_map: &ConfigMap) -> ClusterResult<ConfigMap> {
        let mut state = self.state();
        let namespace = config_map.metadata.namespace.clone().unwrap_or_default();
        let name = config_map.metadata.name.clone();

        if state.fail_config_map_updates {
            return Err(ClusterError::Api {
                status: 500,
                resource: format!("ConfigMap {}/{}", namespace, name),
                message: "etcdserver: request timed out".to_string(),
            });
        }

        let k = key(&namespace, &name);
        if !state.config_maps.contains_key(&k) {
            return Err(ClusterError::not_found("ConfigMap", &namespace, &name));
        }
        state.config_map_updates += 1;
        state.config_maps.insert(k, config_map.clone());
        Ok(config_map.clone())
    }

    async fn list_kubevirts(&self) -> ClusterResult<Vec<KubeVirt>> {
        Ok(self.state().kubevirts.clone())
    }

    async fn get_network_attachment_definition(
        &self,
        namespace: &str,
        name: &str,
    ) -> ClusterResult<NetworkAttachmentDefinition> {
        self.state()
            .nads
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| ClusterError::not_found("NetworkAttachmentDefinition", namespace, name))
    }

    async fn create_vmi(&self, vmi: &VirtualMachineInstance) -> ClusterResult<VirtualMachineInstance> {
        let mut state = self.state();
        let namespace = vmi.metadata.namespace.clone().unwrap_or_default();
        let k = key(&namespace, &vmi.metadata.name);

        if state.vmis.contains_key(&k) {
            return Err(ClusterError::Api {
                status: 409,
                resource: format!("VirtualMachineInstance {}/{}", namespace, vmi.metadata.name),
                message: "already exists".to_string(),
            });
        }

        let mut stored = vmi.clone();
        stored.metadata.uid = Some(uuid::Uuid::new_v4().to_string());
        stored.status = Some(VmiStatus {
            phase: Some("Pending".to_string()),
            ..VmiStatus::default()
        });

        state.created.push(stored.clone());
        state.vmis.insert(
            k,
            FakeVmi {
                vmi: stored.clone(),
                polls: 0,
                deleting: None,
            },
        );
        Ok(stored)
    }

    async fn get_vmi(&self, namespace: &str, name: &str) -> ClusterResult<VirtualMachineInstance> {
        let mut state = self.state();
        let readiness = state.readiness;
        let k = key(namespace, name);
        let not_found = || ClusterError::not_found("VirtualMachineInstance", namespace, name);

        let entry = state.vmis.get_mut(&k).ok_or_else(not_found)?;

        if let Some(remaining) = entry.deleting {
            if remaining == 0 {
                state.vmis.remove(&k);
                return Err(not_found());
            }
            entry.deleting = Some(remaining - 1);
            return Ok(entry.vmi.clone());
        }

        entry.polls += 1;
        let status = entry.vmi.status.get_or_insert_with(VmiStatus::default);
        match readiness {
            Readiness::AfterPolls(polls) if entry.polls >= polls => {
                status.phase = Some("Running".to_string());
                status.conditions = vec![Condition::new(CONDITION_READY, CONDITION_TRUE)];
                status.node_name = entry.vmi.spec.node_selector.values().next().cloned();
            }
            Readiness::Fails => {
                status.phase = Some("Failed".to_string());
            }
            _ => {
                status.phase = Some("Scheduling".to_string());
            }
        }
        Ok(entry.vmi.clone())
    }

    async fn delete_vmi(&self, namespace: &str, name: &str) -> ClusterResult<()> {
        let mut state = self.state();
        if state.fail_deletes {
            return Err(ClusterError::Transport("connection reset by peer".to_string()));
        }

        let deletion_polls = state.deletion_polls;
        let entry = state
            .vmis
            .get_mut(&key(namespace, name))
            .ok_or_else(|| ClusterError::not_found("VirtualMachineInstance", namespace, name))?;

        if entry.deleting.is_none() {
            entry.deleting = Some(deletion_polls);
            entry.vmi.metadata.deletion_timestamp = Some(chrono::Utc::now().to_rfc3339());
            state.deleted.push(name.to_string());
        }
        Ok(())
    }

    async fn open_console(&self, namespace: &str, name: &str) -> ClusterResult<Box<dyn ConsoleChannel>> {
        let state = self.state();
        if state.fail_console {
            return Err(ClusterError::Console("websocket: bad handshake".to_string()));
        }
        let entry = state
            .vmis
            .get(&key(namespace, name))
            .ok_or_else(|| ClusterError::not_found("VirtualMachineInstance", namespace, name))?;
        if !entry.vmi.is_ready() {
            return Err(ClusterError::Console(format!("VMI {}/{} is not running", namespace, name)));
        }

        Ok(Box::new(FakeConsole {
            shell: state.shell.clone().with_hostname(name),
            commands: state.commands.clone(),
        }))
    }
}

/// Where a [`FakeShell`] is in its login sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ShellState {
    Booting,
    AwaitingUser,
    AwaitingPassword,
    LoggedIn,
}

/// Scripted guest shell behind a fake console
#[derive(Debug, Clone)]
pub struct FakeShell {
    hostname: String,
    user: String,
    password: String,
    /// Text printed when `ping` runs
    ping_output: String,
    ping_status: i32,
    /// Print nothing at all, ever
    silent: bool,
    /// Accept `ping` but never print anything back
    hang_on_ping: bool,
    /// Close the channel after this many command lines
    close_after: Option<usize>,
    state: ShellState,
    last_status: i32,
    lines_seen: usize,
    closed: bool,
    output: VecDeque<Vec<u8>>,
    partial: String,
}

impl Default for FakeShell {
    fn default() -> Self {
        Self {
            hostname: "localhost".to_string(),
            user: crate::defaults::CONSOLE_USER.to_string(),
            password: crate::defaults::CONSOLE_PASSWORD.to_string(),
            ping_output: ping_transcript("192.168.0.200", "0.251/0.412/0.733/0.102"),
            ping_status: 0,
            silent: false,
            hang_on_ping: false,
            close_after: None,
            state: ShellState::Booting,
            last_status: 0,
            lines_seen: 0,
            closed: false,
            output: VecDeque::new(),
            partial: String::new(),
        }
    }
}

/// Output of a Linux `ping` run ending with the given rtt summary
pub fn ping_transcript(target: &str, rtt: &str) -> String {
    format!(
        "PING {target} ({target}) 56(84) bytes of data.\r\n\
         64 bytes from {target}: icmp_seq=1 ttl=64 time=0.733 ms\r\n\
         64 bytes from {target}: icmp_seq=2 ttl=64 time=0.251 ms\r\n\
         \r\n\
         --- {target} ping statistics ---\r\n\
         2 packets transmitted, 2 received, 0% packet loss, time 1001ms\r\n\
         rtt min/avg/max/mdev = {rtt} ms\r\n"
    )
}

impl FakeShell {
    pub fn with_ping_output(mut self, output: impl Into<String>) -> Self {
        self.ping_output = output.into();
        self
    }

    pub fn with_ping_status(mut self, status: i32) -> Self {
        self.ping_status = status;
        self
    }

    pub fn silent(mut self) -> Self {
        self.silent = true;
        self
    }

    pub fn hanging_ping(mut self) -> Self {
        self.hang_on_ping = true;
        self
    }

    pub fn closing_after(mut self, lines: usize) -> Self {
        self.close_after = Some(lines);
        self
    }

    fn with_hostname(mut self, hostname: &str) -> Self {
        self.hostname = hostname.to_string();
        self
    }

    fn prompt(&self) -> String {
        format!("[{}@{} ~]$ ", self.user, self.hostname)
    }

    fn emit(&mut self, text: impl Into<String>) {
        if !self.silent {
            self.output.push_back(text.into().into_bytes());
        }
    }

    /// Feed raw terminal input; complete lines are acted on
    fn input(&mut self, data: &[u8]) {
        self.partial.push_str(&String::from_utf8_lossy(data));
        while let Some(pos) = self.partial.find(['\r', '\n']) {
            let line: String = self.partial.drain(..=pos).collect();
            self.line(line.trim_end_matches(['\r', '\n']).to_string());
        }
    }

    fn line(&mut self, line: String) {
        match self.state {
            ShellState::Booting => {
                self.state = ShellState::AwaitingUser;
                self.emit(format!("\r\nFedora Linux 35 (Cloud Edition)\r\n\r\n{} login: ", self.hostname));
            }
            ShellState::AwaitingUser => {
                self.emit(format!("{}\r\nPassword: ", line));
                self.state = if line.trim() == self.user {
                    ShellState::AwaitingPassword
                } else {
                    ShellState::Booting
                };
            }
            ShellState::AwaitingPassword => {
                if line == self.password {
                    self.state = ShellState::LoggedIn;
                    let prompt = self.prompt();
                    self.emit(format!("\r\nLast login: never\r\n{}", prompt));
                } else {
                    self.state = ShellState::AwaitingUser;
                    self.emit(format!("\r\nLogin incorrect\r\n{} login: ", self.hostname));
                }
            }
            ShellState::LoggedIn => self.command(line),
        }
    }

    fn command(&mut self, line: String) {
        self.lines_seen += 1;
        if self.close_after.is_some_and(|limit| self.lines_seen > limit) {
            self.closed = true;
            return;
        }

        let command = line.trim();
        let mut reply = format!("{}\r\n", command);
        let program = command.split_whitespace().next().unwrap_or_default();

        match program {
            "" => {}
            "echo" if command == "echo $?" => {
                reply.push_str(&format!("{}\r\n", self.last_status));
                self.last_status = 0;
            }
            "echo" => {
                reply.push_str(&format!("{}\r\n", command.trim_start_matches("echo").trim()));
                self.last_status = 0;
            }
            "ip" => {
                reply.push_str(
                    "1: lo: <LOOPBACK,UP,LOWER_UP> mtu 65536 qdisc noqueue state UNKNOWN\r\n\
                     2: eth0: <BROADCAST,MULTICAST,UP,LOWER_UP> mtu 1500 qdisc fq_codel state UP\r\n",
                );
                self.last_status = 0;
            }
            "ping" if self.hang_on_ping => {
                self.emit(reply);
                return;
            }
            "ping" => {
                reply.push_str(&self.ping_output);
                self.last_status = self.ping_status;
            }
            other => {
                reply.push_str(&format!("-bash: {}: command not found\r\n", other));
                self.last_status = 127;
            }
        }

        reply.push_str(&self.prompt());
        self.emit(reply);
    }
}

struct FakeConsole {
    shell: FakeShell,
    commands: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl ConsoleChannel for FakeConsole {
    async fn send(&mut self, data: &[u8]) -> ClusterResult<()> {
        if self.shell.closed {
            return Err(ClusterError::Console("broken pipe".to_string()));
        }
        if self.shell.state == ShellState::LoggedIn {
            let text = String::from_utf8_lossy(data);
            let mut commands = self.commands.lock().unwrap_or_else(|p| p.into_inner());
            commands.extend(
                text.split(['\r', '\n'])
                    .filter(|line| !line.trim().is_empty())
                    .map(|line| line.trim().to_string()),
            );
        }
        self.shell.input(data);
        Ok(())
    }

    async fn recv(&mut self) -> ClusterResult<Option<Vec<u8>>> {
        if let Some(chunk) = self.shell.output.pop_front() {
            return Ok(Some(chunk));
        }
        if self.shell.closed {
            return Ok(None);
        }
        // Nothing will ever arrive; the caller's timeout decides
        futures::future::pending::<()>().await;
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn drain(console: &mut Box<dyn ConsoleChannel>) -> String {
        let mut text = String::new();
        while let Ok(Ok(Some(chunk))) =
            tokio::time::timeout(std::time::Duration::from_millis(20), console.recv()).await
        {
            text.push_str(&String::from_utf8_lossy(&chunk));
        }
        text
    }

    fn probe(name: &str) -> VirtualMachineInstance {
        VirtualMachineInstance {
            api_version: "kubevirt.io/v1".to_string(),
            kind: "VirtualMachineInstance".to_string(),
            metadata: ObjectMeta::named("kiagnose", name),
            ..VirtualMachineInstance::default()
        }
    }

    #[tokio::test]
    async fn test_vmi_becomes_ready_after_polls() {
        let cluster = FakeCluster::new().with_readiness(Readiness::AfterPolls(2));
        cluster.create_vmi(&probe("source")).await.unwrap();

        assert!(!cluster.get_vmi("kiagnose", "source").await.unwrap().is_ready());
        assert!(cluster.get_vmi("kiagnose", "source").await.unwrap().is_ready());
    }

    #[tokio::test]
    async fn test_deletion_lingers_then_disappears() {
        let cluster = FakeCluster::new().with_deletion_polls(1);
        cluster.create_vmi(&probe("source")).await.unwrap();
        cluster.delete_vmi("kiagnose", "source").await.unwrap();

        let lingering = cluster.get_vmi("kiagnose", "source").await.unwrap();
        assert!(lingering.metadata.deletion_timestamp.is_some());
        assert!(cluster.get_vmi("kiagnose", "source").await.unwrap_err().is_not_found());
        assert!(cluster.live_vmis().is_empty());
        assert_eq!(cluster.deleted_vmis(), vec!["source".to_string()]);
    }

    #[tokio::test]
    async fn test_shell_login_and_commands() {
        let cluster = FakeCluster::new();
        cluster.create_vmi(&probe("target")).await.unwrap();
        cluster.get_vmi("kiagnose", "target").await.unwrap();

        let mut console = cluster.open_console("kiagnose", "target").await.unwrap();
        console.send(b"\n").await.unwrap();
        assert!(drain(&mut console).await.ends_with("target login: "));

        console.send(b"fedora\n").await.unwrap();
        assert!(drain(&mut console).await.ends_with("Password: "));

        console.send(b"fedora\n").await.unwrap();
        assert!(drain(&mut console).await.ends_with("[fedora@target ~]$ "));

        console.send(b"nonsense\n").await.unwrap();
        assert!(drain(&mut console).await.contains("command not found"));

        console.send(b"echo $?\n").await.unwrap();
        assert!(drain(&mut console).await.contains("127\r\n"));

        assert_eq!(cluster.console_commands(), vec!["nonsense", "echo $?"]);
    }

    #[tokio::test]
    async fn test_silent_shell_never_answers() {
        let cluster = FakeCluster::new().with_shell(FakeShell::default().silent());
        cluster.create_vmi(&probe("target")).await.unwrap();
        cluster.get_vmi("kiagnose", "target").await.unwrap();

        let mut console = cluster.open_console("kiagnose", "target").await.unwrap();
        console.send(b"\n").await.unwrap();
        let waited = tokio::time::timeout(std::time::Duration::from_millis(20), console.recv()).await;
        assert!(waited.is_err());
    }

    #[tokio::test]
    async fn test_console_requires_running_vmi() {
        let cluster = FakeCluster::new().with_readiness(Readiness::Never);
        cluster.create_vmi(&probe("target")).await.unwrap();
        assert!(cluster.open_console("kiagnose", "target").await.is_err());
        assert!(matches!(
            cluster.open_console("kiagnose", "missing").await,
            Err(error) if error.is_not_found()
        ));
    }
}
