use std::sync::LazyLock;

use regex::Regex;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::mpsc,
};
use tracing::{debug, info, trace, warn};

use crate::{
    bridge::BridgeError,
    heyu::Heyu,
    x10::{Address, StatusChange, SwitchState},
};

// heyu reports one event as two lines, the address first and then the function:
//   05/04 19:31:20  rcvi addr unit       1 : hu A1  (Porch)
//   05/04 19:31:20  rcvi func           On : hc A
// rcvi/rcvt are received from the power line / RF, snd* were sent by heyu itself.
static ADDR_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:rcvi|rcvt|sndc|snds|sndm|sndt) addr unit.+hu ([A-P][0-9]+)").unwrap()
});
static FUNC_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:rcvi|rcvt|sndc|snds|sndm|sndt) func.*(On|Off) :").unwrap()
});

/// Pairs address lines with the function line that follows them
#[derive(Debug, Default)]
pub struct MonitorParser {
    pending: Option<Address>,
}

impl MonitorParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, line: &str) -> Option<StatusChange> {
        if let Some(caps) = ADDR_LINE.captures(line) {
            match caps[1].parse::<Address>() {
                Ok(address) => self.pending = Some(address),
                Err(e) => debug!("ignoring monitor address `{}`: {e}", &caps[1]),
            }
        }

        let caps = FUNC_LINE.captures(line)?;
        let address = self.pending.take()?;
        let state = match &caps[1] {
            "On" => SwitchState::On,
            _ => SwitchState::Off,
        };

        Some(StatusChange { address, state })
    }
}

/// Runs `heyu monitor` until it exits, sending every status change to `tx`.
/// The monitor is never expected to stop, so any exit is an error.
pub async fn run(heyu: Heyu, tx: mpsc::Sender<StatusChange>) -> Result<(), BridgeError> {
    let mut child = heyu.spawn_monitor()?;
    info!("heyu monitor started");

    let Some(stdout) = child.stdout.take() else {
        return Err(BridgeError::MonitorExited("stdout not captured".to_string()));
    };

    let mut parser = MonitorParser::new();
    let mut reader = BufReader::new(stdout);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                warn!("reading heyu monitor output: {e}");
                // still running, wait would never return
                if let Err(e) = child.kill().await {
                    debug!("killing heyu monitor: {e}");
                }
                break;
            }
        }

        // alias labels in heyu's config may be in any 8 bit encoding
        let line = String::from_utf8_lossy(&buf);
        let line = line.trim_end_matches(['\n', '\r']);
        trace!("[heyu monitor] {line}");

        if let Some(change) = parser.feed(line) {
            debug!("monitor saw {} {}", change.address, change.state);
            if tx.send(change).await.is_err() {
                // bridge is gone, nobody to report to
                return Ok(());
            }
        }
    }

    let status = child.wait().await?;
    Err(BridgeError::MonitorExited(status.to_string()))
}
