//! Connector backed by the `ipmitool` command line tool
//!
//! Every request is a separate `ipmitool raw` invocation over the LAN
//! interface. The password never appears on the command line; it is handed
//! to the child process through `IPMI_PASSWORD` (`-E`).

use super::{
    CompletionCode, IpmiConnector, IpmiSession, Request, SessionTarget, TransportError,
};
use serde::Deserialize;
use std::process::Command;
use std::sync::Arc;
use tracing::{debug, trace};

/// Settings for invoking `ipmitool`
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct IpmitoolConfig {
    #[serde(default = "default_binary")]
    pub binary: String,
    #[serde(default = "default_interface")]
    pub interface: String,
    #[serde(default)]
    pub cipher_suite: Option<u8>,
    /// Per-attempt timeout passed as `-N`
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Retry count passed as `-R`
    #[serde(default = "default_retries")]
    pub retries: u32,
}

fn default_binary() -> String {
    "ipmitool".to_string()
}

fn default_interface() -> String {
    "lanplus".to_string()
}

fn default_timeout_secs() -> u64 {
    5
}

fn default_retries() -> u32 {
    2
}

impl Default for IpmitoolConfig {
    fn default() -> Self {
        Self {
            binary: default_binary(),
            interface: default_interface(),
            cipher_suite: None,
            timeout_secs: default_timeout_secs(),
            retries: default_retries(),
        }
    }
}

pub struct IpmitoolConnector {
    config: Arc<IpmitoolConfig>,
}

impl IpmitoolConnector {
    pub fn new(config: IpmitoolConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }
}

impl IpmiConnector for IpmitoolConnector {
    fn open_session(
        &self,
        target: &SessionTarget,
    ) -> Result<Box<dyn IpmiSession + Send>, TransportError> {
        let session = IpmitoolSession {
            config: Arc::clone(&self.config),
            target: target.clone(),
        };

        // A completion error still proves the BMC answered an authenticated request
        match session.request(&Request::GetDeviceId) {
            Ok(_) | Err(TransportError::Completion(_)) => Ok(Box::new(session)),
            Err(e) => Err(e),
        }
    }

    fn tear_down(&self) {
        debug!(binary = %self.config.binary, "ipmitool connector released");
    }
}

struct IpmitoolSession {
    config: Arc<IpmitoolConfig>,
    target: SessionTarget,
}

impl IpmitoolSession {
    fn command(&self, request: &Request) -> Command {
        let mut cmd = Command::new(&self.config.binary);
        cmd.args(["-I", self.config.interface.as_str()])
            .args(["-H", self.target.host.as_str()])
            .args(["-p", self.target.port.to_string().as_str()]);

        if let Some(user) = &self.target.username {
            cmd.args(["-U", user.as_str()]);
        }
        if let Some(password) = &self.target.password {
            cmd.arg("-E").env("IPMI_PASSWORD", password);
        }
        if let Some(cipher_suite) = self.config.cipher_suite {
            cmd.args(["-C", cipher_suite.to_string().as_str()]);
        }

        cmd.args(["-N", self.config.timeout_secs.to_string().as_str()])
            .args(["-R", self.config.retries.to_string().as_str()])
            .arg("raw")
            .args(raw_arguments(request));
        cmd
    }
}

impl IpmiSession for IpmitoolSession {
    fn request(&self, request: &Request) -> Result<Vec<u8>, TransportError> {
        trace!(host = %self.target.host, ?request, "ipmitool raw");

        let output = self
            .command(request)
            .output()
            .map_err(|e| TransportError::Session {
                host: self.target.host.clone(),
                message: format!("failed to execute {}: {}", self.config.binary, e),
            })?;

        if output.status.success() {
            return parse_raw_output(&String::from_utf8_lossy(&output.stdout));
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        match completion_from_stderr(&stderr) {
            Some(code) => Err(TransportError::Completion(code)),
            None => Err(TransportError::Session {
                host: self.target.host.clone(),
                message: stderr.trim().to_string(),
            }),
        }
    }

    fn close(&self) {
        debug!(host = %self.target.host, "ipmitool session closed");
    }
}

/// `netfn cmd data...` as ipmitool arguments
fn raw_arguments(request: &Request) -> Vec<String> {
    [request.netfn(), request.command()]
        .into_iter()
        .chain(request.data())
        .map(|byte| format!("{:#04x}", byte))
        .collect()
}

/// Parse the whitespace separated hex bytes printed by `ipmitool raw`
fn parse_raw_output(stdout: &str) -> Result<Vec<u8>, TransportError> {
    stdout
        .split_whitespace()
        .map(|token| {
            u8::from_str_radix(token, 16)
                .map_err(|_| TransportError::Malformed(format!("unexpected token {:?}", token)))
        })
        .collect()
}

/// Extract the completion code from "... rsp=0xca): ..." failures
fn completion_from_stderr(stderr: &str) -> Option<CompletionCode> {
    let start = stderr.find("rsp=0x")? + "rsp=0x".len();
    let digits: String = stderr[start..]
        .chars()
        .take_while(|c| c.is_ascii_hexdigit())
        .collect();
    u8::from_str_radix(&digits, 16).ok().map(CompletionCode)
}
