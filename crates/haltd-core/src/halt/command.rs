//! Unix halt backend: runs a power-off command.

use std::process::Command;

use tracing::info;

use super::{HaltError, PrivilegedHalt};

/// Capability number of `CAP_SYS_BOOT`.
pub const CAP_SYS_BOOT: u32 = 22;

pub struct CommandHalt {
    argv: Vec<String>,
    require_sys_boot: bool,
}

impl CommandHalt {
    /// Run `argv` as given. No capability check; the command is trusted to
    /// handle its own privileges (e.g. a sudo wrapper).
    pub fn new(argv: Vec<String>) -> Self {
        Self {
            argv,
            require_sys_boot: false,
        }
    }

    /// `systemctl poweroff` on Linux (requires `CAP_SYS_BOOT`),
    /// `shutdown -h now` elsewhere.
    pub fn platform_default() -> Self {
        let argv: &[&str] = if cfg!(target_os = "linux") {
            &["systemctl", "poweroff"]
        } else {
            &["shutdown", "-h", "now"]
        };
        Self {
            argv: argv.iter().map(|s| s.to_string()).collect(),
            require_sys_boot: cfg!(target_os = "linux"),
        }
    }

    pub fn argv(&self) -> &[String] {
        &self.argv
    }
}

impl PrivilegedHalt for CommandHalt {
    fn name(&self) -> &str {
        "command"
    }

    fn acquire_privilege(&self) -> Result<(), HaltError> {
        if !self.require_sys_boot {
            return Ok(());
        }
        let status = std::fs::read_to_string("/proc/self/status")
            .map_err(|e| HaltError::Privilege(format!("cannot read /proc/self/status: {e}")))?;
        match has_capability(&status, CAP_SYS_BOOT) {
            Some(true) => Ok(()),
            Some(false) => Err(HaltError::Privilege(
                "CAP_SYS_BOOT is not in the effective capability set".to_string(),
            )),
            None => Err(HaltError::Privilege(
                "no CapEff entry in /proc/self/status".to_string(),
            )),
        }
    }

    fn halt(&self) -> Result<(), HaltError> {
        let (program, args) = self
            .argv
            .split_first()
            .ok_or_else(|| HaltError::Unsupported("empty power-off command".to_string()))?;

        info!(command = %self.argv.join(" "), "Running power-off command");
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|e| HaltError::Request(format!("failed to run {program}: {e}")))?;

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(HaltError::Request(format!(
                "{} exited with {}: {}",
                self.argv.join(" "),
                output.status,
                stderr.trim()
            )))
        }
    }
}

/// Whether capability `bit` is set in the `CapEff:` line of a
/// `/proc/<pid>/status` dump. `None` if the line is missing or malformed.
pub fn has_capability(status: &str, bit: u32) -> Option<bool> {
    let hex = status
        .lines()
        .find_map(|line| line.strip_prefix("CapEff:"))?
        .trim();
    let mask = u64::from_str_radix(hex, 16).ok()?;
    Some(bit < 64 && mask & (1u64 << bit) != 0)
}
