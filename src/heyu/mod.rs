use std::{future::Future, path::PathBuf, process::{ExitStatus, Stdio}, time::Duration};

use thiserror::Error;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::{
    settings::{DEFAULT_HEYU_TIMEOUT_SECS, Settings},
    x10::{Address, SwitchState},
};

pub mod monitor;

#[derive(Error, Debug)]
pub enum HeyuError {
    #[error("running heyu: {0}")]
    Io(#[from] std::io::Error),
    #[error("heyu `{0}` exited with {1}")]
    Failed(String, ExitStatus),
    #[error("heyu `{0}` still running after {1:?}, killed")]
    Timeout(String, Duration),
}

/// Something that can switch X10 modules
pub trait X10Controller {
    fn execute(
        &self,
        address: Address,
        state: SwitchState,
    ) -> impl Future<Output = Result<(), HeyuError>> + Send;
}

/// Drives the `heyu` command line utility
#[derive(Debug, Clone)]
pub struct Heyu {
    program: PathBuf,
    config: Option<PathBuf>,
    cm17: bool,
    uid: Option<u32>,
    gid: Option<u32>,
    timeout: Duration,
}

impl Heyu {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            config: None,
            cm17: false,
            uid: None,
            gid: None,
            timeout: Duration::from_secs(DEFAULT_HEYU_TIMEOUT_SECS),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            program: settings.heyu_bin.clone(),
            config: settings.heyu_config.clone(),
            cm17: settings.use_cm17,
            uid: settings.puid,
            gid: settings.pgid,
            timeout: settings.heyu_timeout,
        }
    }

    pub fn with_cm17(mut self, cm17: bool) -> Self {
        self.cm17 = cm17;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_config(mut self, config: impl Into<PathBuf>) -> Self {
        self.config = Some(config.into());
        self
    }

    /// The CM17A firecracker takes its own function names
    pub fn function(&self, state: SwitchState) -> &'static str {
        match (self.cm17, state) {
            (false, SwitchState::On) => "on",
            (false, SwitchState::Off) => "off",
            (true, SwitchState::On) => "fon",
            (true, SwitchState::Off) => "foff",
        }
    }

    /// Arguments for switching one module, options first
    pub fn switch_args(&self, address: Address, state: SwitchState) -> Vec<String> {
        let mut args = self.option_args();
        args.push(self.function(state).to_string());
        args.push(address.heyu_arg());
        args
    }

    fn option_args(&self) -> Vec<String> {
        match &self.config {
            Some(cfg) => vec!["-c".to_string(), cfg.display().to_string()],
            None => Vec::new(),
        }
    }

    fn command<I, S>(&self, args: I) -> Command
    where
        I: IntoIterator<Item = S>,
        S: AsRef<std::ffi::OsStr>,
    {
        let mut cmd = Command::new(&self.program);
        cmd.args(args).stdin(Stdio::null()).kill_on_drop(true);
        #[cfg(unix)]
        {
            if let Some(uid) = self.uid {
                cmd.uid(uid);
            }
            if let Some(gid) = self.gid {
                cmd.gid(gid);
            }
        }
        cmd
    }

    /// Starts `heyu monitor` with stdout piped and stderr proxied to our log
    pub fn spawn_monitor(&self) -> Result<Child, HeyuError> {
        let mut args = self.option_args();
        args.push("monitor".to_string());

        let mut child = self
            .command(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        proxy_stderr(&mut child);
        Ok(child)
    }
}

impl X10Controller for Heyu {
    async fn execute(&self, address: Address, state: SwitchState) -> Result<(), HeyuError> {
        let args = self.switch_args(address, state);
        debug!("running {} {}", self.program.display(), args.join(" "));

        // kill_on_drop takes the child down when the timeout drops the future
        let status = tokio::time::timeout(self.timeout, self.command(&args).status())
            .await
            .map_err(|_| HeyuError::Timeout(args.join(" "), self.timeout))??;
        if !status.success() {
            return Err(HeyuError::Failed(args.join(" "), status));
        }
        Ok(())
    }
}

/// Forwards heyu's stderr into the log, line by line
fn proxy_stderr(child: &mut Child) {
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(async move {
            use tokio::io::{AsyncBufReadExt, BufReader};
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                warn!("[heyu] {line}");
            }
        });
    }
}
