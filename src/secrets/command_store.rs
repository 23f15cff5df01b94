use super::SecretStore;
use crate::error::StorageError;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Output, Stdio};

/// Exit status `security` uses for "item could not be found".
const SECURITY_NOT_FOUND: i32 = 44;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandTool {
    /// macOS `security` keychain utility.
    Security,
    /// libsecret `secret-tool` on Linux desktops.
    SecretTool,
}

impl CommandTool {
    fn binary_name(&self) -> &'static str {
        match self {
            CommandTool::Security => "security",
            CommandTool::SecretTool => "secret-tool",
        }
    }
}

/// Secret store backed by the platform's credential command-line utility.
pub struct CommandSecretStore {
    tool: CommandTool,
    binary: PathBuf,
}

impl CommandSecretStore {
    pub fn new(tool: CommandTool, binary: PathBuf) -> Self {
        Self { tool, binary }
    }

    /// Finds the utility for this platform on `PATH`.
    pub fn detect() -> Option<Self> {
        let tool = if cfg!(target_os = "macos") {
            CommandTool::Security
        } else {
            CommandTool::SecretTool
        };
        let binary = which::which(tool.binary_name()).ok()?;
        tracing::debug!(binary = %binary.display(), "Found secret store utility");
        Some(Self::new(tool, binary))
    }

    pub fn tool(&self) -> CommandTool {
        self.tool
    }

    fn run(&self, args: &[&str], stdin: Option<&str>) -> Result<Output, StorageError> {
        let mut command = Command::new(&self.binary);
        command.args(args).stdout(Stdio::piped()).stderr(Stdio::piped());
        if stdin.is_some() {
            command.stdin(Stdio::piped());
        }
        let mut child = command.spawn().map_err(|e| {
            StorageError::Command(format!("failed to run {}: {}", self.binary.display(), e))
        })?;
        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(input.as_bytes())
                .map_err(|e| StorageError::Command(format!("failed to write stdin: {}", e)))?;
        }
        child
            .wait_with_output()
            .map_err(|e| StorageError::Command(format!("{} did not finish: {}", self.binary.display(), e)))
    }

    fn attributes<'a>(service: &'a str, account: &'a str) -> Vec<&'a str> {
        let mut attrs = vec!["service", service];
        if !account.is_empty() {
            attrs.extend(["account", account]);
        }
        attrs
    }
}

fn failure(output: &Output, action: &str) -> StorageError {
    let stderr = String::from_utf8_lossy(&output.stderr);
    StorageError::Command(format!(
        "{} failed ({}): {}",
        action,
        output.status,
        stderr.trim()
    ))
}

impl SecretStore for CommandSecretStore {
    fn read(&self, service: &str, account: &str) -> Result<Option<String>, StorageError> {
        let output = match self.tool {
            CommandTool::Security => {
                let mut args = vec!["find-generic-password", "-s", service];
                if !account.is_empty() {
                    args.extend(["-a", account]);
                }
                args.push("-w");
                let output = self.run(&args, None)?;
                if output.status.code() == Some(SECURITY_NOT_FOUND) {
                    return Ok(None);
                }
                output
            }
            CommandTool::SecretTool => {
                let mut args = vec!["lookup"];
                args.extend(Self::attributes(service, account));
                let output = self.run(&args, None)?;
                // secret-tool exits 1 with no output for a missing item
                if !output.status.success() && output.stdout.is_empty() {
                    return Ok(None);
                }
                output
            }
        };

        if !output.status.success() {
            return Err(failure(&output, "secret lookup"));
        }
        let value = String::from_utf8(output.stdout)
            .map_err(|e| StorageError::decode("secret store output", e))?;
        let value = value.trim_end_matches(['\n', '\r']).to_string();
        Ok(if value.is_empty() { None } else { Some(value) })
    }

    fn write(&self, service: &str, account: &str, secret: &str) -> Result<(), StorageError> {
        let output = match self.tool {
            CommandTool::Security => {
                let mut args = vec!["add-generic-password", "-U", "-s", service];
                if !account.is_empty() {
                    args.extend(["-a", account]);
                }
                args.extend(["-w", secret]);
                self.run(&args, None)?
            }
            CommandTool::SecretTool => {
                let label = format!("--label={}", service);
                let mut args = vec!["store", label.as_str()];
                args.extend(Self::attributes(service, account));
                self.run(&args, Some(secret))?
            }
        };
        if !output.status.success() {
            return Err(failure(&output, "secret store"));
        }
        Ok(())
    }

    fn delete(&self, service: &str, account: &str) -> Result<(), StorageError> {
        let output = match self.tool {
            CommandTool::Security => {
                let mut args = vec!["delete-generic-password", "-s", service];
                if !account.is_empty() {
                    args.extend(["-a", account]);
                }
                let output = self.run(&args, None)?;
                if output.status.code() == Some(SECURITY_NOT_FOUND) {
                    return Ok(());
                }
                output
            }
            CommandTool::SecretTool => {
                let mut args = vec!["clear"];
                args.extend(Self::attributes(service, account));
                self.run(&args, None)?
            }
        };
        if !output.status.success() {
            return Err(failure(&output, "secret delete"));
        }
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    /// Writes an executable shell script that stands in for the utility.
    fn fake_tool(dir: &TempDir, script: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.path().join("fake-tool");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", script)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    #[serial]
    fn test_security_not_found_is_none() {
        let dir = TempDir::new().unwrap();
        let store = CommandSecretStore::new(CommandTool::Security, fake_tool(&dir, "exit 44"));
        assert_eq!(store.read("svc", "acct").unwrap(), None);
        store.delete("svc", "acct").unwrap();
    }

    #[test]
    #[serial]
    fn test_read_trims_trailing_newline() {
        let dir = TempDir::new().unwrap();
        let store = CommandSecretStore::new(
            CommandTool::SecretTool,
            fake_tool(&dir, "echo '{\"token\":\"abc\"}'"),
        );
        assert_eq!(
            store.read("svc", "").unwrap().as_deref(),
            Some("{\"token\":\"abc\"}")
        );
    }

    #[test]
    #[serial]
    fn test_secret_tool_missing_is_none() {
        let dir = TempDir::new().unwrap();
        let store = CommandSecretStore::new(CommandTool::SecretTool, fake_tool(&dir, "exit 1"));
        assert_eq!(store.read("svc", "acct").unwrap(), None);
    }

    #[test]
    #[serial]
    fn test_secret_tool_store_passes_secret_on_stdin() {
        let dir = TempDir::new().unwrap();
        let captured = dir.path().join("captured");
        let script = format!("cat > '{}'", captured.display());
        let store = CommandSecretStore::new(CommandTool::SecretTool, fake_tool(&dir, &script));
        store.write("svc", "acct", "blob-value").unwrap();
        assert_eq!(std::fs::read_to_string(&captured).unwrap(), "blob-value");
    }

    #[test]
    #[serial]
    fn test_failure_reports_stderr() {
        let dir = TempDir::new().unwrap();
        let store = CommandSecretStore::new(
            CommandTool::Security,
            fake_tool(&dir, "echo 'keychain locked' >&2; exit 51"),
        );
        let err = store.write("svc", "acct", "v").unwrap_err();
        assert_eq!(err.code(), "STORE-005");
        assert!(err.to_string().contains("keychain locked"));
    }
}
