//! Integration tests for agent reuse across manager instances.
//!
//! Each manager stands in for one CLI invocation; they share only the
//! session file on disk and the fake agent behind it.

use std::cell::{Cell, RefCell};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use chrono::{Duration, Utc};
use persistent_ssh_agent::agent::{
    AddOutcome, AgentBackend, AgentHandle, AgentLifecycleManager, AgentSessionStore, Endpoint,
    NoPrompt, SetupOptions,
};
use persistent_ssh_agent::crypto::{CredentialCipher, MachineFingerprint};
use persistent_ssh_agent::identity::IdentityLocator;
use persistent_ssh_agent::ssh_config::{parse_str, resolve, EffectiveHostConfig};
use persistent_ssh_agent::Result;
use tempfile::TempDir;

#[derive(Debug, Default)]
struct AgentCounters {
    starts: Cell<u32>,
    adds: Cell<u32>,
    loaded: RefCell<BTreeSet<String>>,
}

#[derive(Debug, Clone, Default)]
struct FakeAgent(Rc<AgentCounters>);

impl AgentBackend for FakeAgent {
    fn start(&self) -> Result<AgentHandle> {
        let n = self.0.starts.get() + 1;
        self.0.starts.set(n);
        self.0.loaded.borrow_mut().clear();
        Ok(AgentHandle {
            pid: Some(4000 + n),
            endpoint: Endpoint::Socket(PathBuf::from(format!("/tmp/agent.{n}"))),
        })
    }

    fn list_fingerprints(&self, _handle: &AgentHandle) -> Result<Option<BTreeSet<String>>> {
        Ok(Some(self.0.loaded.borrow().clone()))
    }

    fn fingerprint(&self, key: &Path) -> Option<String> {
        Some(format!("SHA256:{}", key.display()))
    }

    fn add_key(&self, _handle: &AgentHandle, key: &Path, _passphrase: Option<&str>) -> Result<AddOutcome> {
        self.0.adds.set(self.0.adds.get() + 1);
        self.0
            .loaded
            .borrow_mut()
            .insert(format!("SHA256:{}", key.display()));
        Ok(AddOutcome::Added)
    }
}

struct Fixture {
    home: TempDir,
    agent: FakeAgent,
}

impl Fixture {
    fn new() -> Self {
        let home = TempDir::new().unwrap();
        let ssh = home.path().join(".ssh");
        fs::create_dir_all(&ssh).unwrap();
        for name in ["id_ed25519", "work_key"] {
            fs::write(ssh.join(name), "private").unwrap();
            fs::write(ssh.join(format!("{name}.pub")), "public").unwrap();
        }
        Self {
            home,
            agent: FakeAgent::default(),
        }
    }

    fn store(&self) -> AgentSessionStore {
        AgentSessionStore::new(self.home.path().join(".persistent_ssh_agent/agent_session.json"))
    }

    /// A fresh manager, as a new CLI invocation would build it.
    fn invocation(&self) -> AgentLifecycleManager<FakeAgent> {
        let cipher = CredentialCipher::with_fingerprint(MachineFingerprint {
            machine_id: "machine".to_string(),
            hostname: "box".to_string(),
            username: "dev".to_string(),
            home: self.home.path().display().to_string(),
        })
        .with_iterations(10);
        AgentLifecycleManager::new(
            self.agent.clone(),
            self.store(),
            cipher,
            IdentityLocator::new(self.home.path().to_path_buf(), "dev"),
            SetupOptions::default(),
        )
        .with_prompt(NoPrompt)
    }

    fn host(&self, config: &str, hostname: &str) -> EffectiveHostConfig {
        let origin = self.home.path().join(".ssh/config");
        resolve(&parse_str(config, &origin).unwrap(), hostname, "dev")
    }
}

#[test]
fn test_back_to_back_invocations_spawn_one_agent() {
    let fx = Fixture::new();
    let config = fx.host("", "github.com");

    let first = fx.invocation().setup_for("github.com", &config).unwrap();
    let second = fx.invocation().setup_for("github.com", &config).unwrap();

    assert_eq!(fx.agent.0.starts.get(), 1);
    assert_eq!(fx.agent.0.adds.get(), 1);
    assert!(!first.reused);
    assert!(second.reused);
    assert_eq!(first.env_pairs(), second.env_pairs());
}

#[test]
fn test_expired_session_is_replaced() {
    let fx = Fixture::new();
    let config = fx.host("", "github.com");
    fx.invocation().setup_for("github.com", &config).unwrap();

    let store = fx.store();
    let mut session = store.load().unwrap();
    session.created_at = Utc::now() - Duration::hours(48);
    session.expires_at = Utc::now() - Duration::hours(24);
    store.save(&session).unwrap();

    let outcome = fx.invocation().setup_for("github.com", &config).unwrap();
    assert!(!outcome.reused);
    assert_eq!(fx.agent.0.starts.get(), 2);
    assert_eq!(store.load().unwrap().agent_pid, Some(4002));
}

#[test]
fn test_host_specific_identity_is_loaded_into_shared_agent() {
    let fx = Fixture::new();
    let config = "Host work.example.com\n  IdentityFile ~/.ssh/work_key\n";

    fx.invocation()
        .setup_for("github.com", &fx.host(config, "github.com"))
        .unwrap();
    let work = fx
        .invocation()
        .setup_for("work.example.com", &fx.host(config, "work.example.com"))
        .unwrap();

    assert_eq!(fx.agent.0.starts.get(), 1);
    assert!(work.reused);
    assert_eq!(work.added, vec![fx.home.path().join(".ssh/work_key")]);
    assert_eq!(fx.store().load().unwrap().fingerprints.len(), 2);
}

#[test]
fn test_reset_forces_new_agent() {
    let fx = Fixture::new();
    let config = fx.host("", "github.com");
    let mut manager = fx.invocation();
    manager.setup_for("github.com", &config).unwrap();
    manager.reset().unwrap();

    assert!(fx.store().load().is_none());
    fx.invocation().setup_for("github.com", &config).unwrap();
    assert_eq!(fx.agent.0.starts.get(), 2);
}
