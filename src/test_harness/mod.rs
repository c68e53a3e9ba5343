//! Utilities for exercising a forwarder/executor pair in tests.

use std::collections::VecDeque;
use std::fs;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Output};
use std::sync::Mutex;
use std::time::Duration;

use uuid::Uuid;

use crate::config::CallConfig;
use crate::core::TaggedValue;
use crate::remote::{
    ExecutorServer, Forwarder, HandlerError, HandlerRegistry, Signature,
};
use crate::shell::CommandRunner;
use crate::{ArgBag, EventLog, Tag};

/// Private scratch directory, removed on drop unless
/// `TETHER_TEST_KEEP_TMP` is set.
pub struct TempRuntimeDir {
    path: PathBuf,
    keep: bool,
}

impl TempRuntimeDir {
    pub fn new() -> Self {
        let path = std::env::temp_dir().join(format!("tether-test-{}", Uuid::new_v4()));
        fs::create_dir_all(&path).expect("create test runtime dir");
        Self {
            path,
            keep: std::env::var_os("TETHER_TEST_KEEP_TMP").is_some(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Default for TempRuntimeDir {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TempRuntimeDir {
    fn drop(&mut self) {
        if !self.keep {
            let _ = fs::remove_dir_all(&self.path);
        }
    }
}

/// Handler registry exercising every tag and failure mode the tests need.
pub fn sample_registry(log: &EventLog) -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();

    let admin_log = log.clone();
    registry
        .register("is_admin_active", [Tag::Bool], move |args| {
            let refresh = args[0].expect_bool()?;
            let mut bag = ArgBag::new();
            bag.insert("refresh".to_string(), TaggedValue::Bool(refresh));
            admin_log.record("is_admin_active", bag);
            Ok(TaggedValue::Bool(true))
        })
        .unwrap();

    registry
        .register("echo", [Tag::Str], |args| {
            Ok(TaggedValue::Str(args[0].expect_str()?.to_string()))
        })
        .unwrap();

    registry
        .register("concat", [Tag::StrList], |args| {
            Ok(TaggedValue::Str(args[0].expect_str_list()?.join("+")))
        })
        .unwrap();

    // Overload pair for null-argument resolution tests.
    registry
        .register("describe", [Tag::Str], |args| {
            Ok(TaggedValue::Str(format!(
                "text:{}",
                args[0].expect_str().unwrap_or("<null>")
            )))
        })
        .unwrap();
    registry
        .register("describe", [Tag::Record], |args| {
            let fields = args[0].expect_record().map(|m| m.len()).unwrap_or(0);
            Ok(TaggedValue::Str(format!("record:{fields}")))
        })
        .unwrap();

    registry
        .register("boom", Signature::empty(), |_| {
            Err(HandlerError::failed("boom", "synthetic failure"))
        })
        .unwrap();

    registry
        .register("sleep_ms", [Tag::Long], |args| {
            let ms = args[0].expect_long()?;
            std::thread::sleep(Duration::from_millis(ms.max(0) as u64));
            Ok(TaggedValue::Null)
        })
        .unwrap();

    registry
}

/// A live executor endpoint on a private socket, plus forwarder factories.
pub struct TestEndpoint {
    _dir: TempRuntimeDir,
    socket: PathBuf,
    server: Option<ExecutorServer>,
    log: EventLog,
}

impl TestEndpoint {
    /// Start an endpoint with the sample registry.
    pub fn start() -> Self {
        let log = EventLog::new();
        let registry = sample_registry(&log);
        Self::start_with(registry, log)
    }

    pub fn start_with(registry: HandlerRegistry, log: EventLog) -> Self {
        let dir = TempRuntimeDir::new();
        let socket = dir.path().join("executor.sock");
        let server = ExecutorServer::bind(&socket, registry).expect("bind test endpoint");
        Self {
            _dir: dir,
            socket,
            server: Some(server),
            log,
        }
    }

    pub fn socket(&self) -> &Path {
        &self.socket
    }

    /// Event log shared with the sample registry's handlers.
    pub fn log(&self) -> &EventLog {
        &self.log
    }

    pub fn forwarder(&self) -> Forwarder {
        Forwarder::new(&self.socket, &CallConfig::default())
    }

    pub fn forwarder_with_timeout(&self, timeout: Duration) -> Forwarder {
        Forwarder::new(
            &self.socket,
            &CallConfig {
                timeout_ms: timeout.as_millis() as u64,
                connect_timeout_ms: 1_000,
            },
        )
    }

    pub fn shutdown(mut self) {
        if let Some(server) = self.server.take() {
            server.shutdown().expect("shutdown test endpoint");
        }
    }
}

/// Scripted [`CommandRunner`]: canned outputs in FIFO order, recorded calls.
pub struct ScriptedRunner {
    responses: Mutex<VecDeque<Output>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn push_success(&self, stdout: &str) {
        self.push_success_bytes(stdout.as_bytes().to_vec());
    }

    pub fn push_success_bytes(&self, stdout: Vec<u8>) {
        self.responses.lock().unwrap().push_back(Output {
            status: ExitStatus::from_raw(0),
            stdout,
            stderr: Vec::new(),
        });
    }

    pub fn push_failure(&self, exit_code: i32, stderr: &str) {
        self.responses.lock().unwrap().push_back(Output {
            // Wait status layout: exit code in the high byte.
            status: ExitStatus::from_raw(exit_code << 8),
            stdout: Vec::new(),
            stderr: stderr.as_bytes().to_vec(),
        });
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl Default for ScriptedRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, program: &str, args: &[&str]) -> std::io::Result<Output> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("{program} {}", args.join(" ")));
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| std::io::Error::other("scripted runner exhausted"))
    }
}
