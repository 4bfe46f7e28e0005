//! Fake sclang for process-level tests
//!
//! A POSIX `sh` script that prints the startup banner and answers the lines
//! the runtime writes with canned output. It is run as `sh <script>` so the
//! freshly written file is never exec'd directly.

use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;

use crate::config::RuntimeConfig;
use crate::executor::SupervisorOptions;

pub(crate) const FAKE_SCLANG: &str = r#"
echo "compiling class library..."
echo "Welcome to SuperCollider 3.13.0. type ctrl-c to interrupt"
while IFS= read -r line; do
  case "$line" in
    *waitForBoot*)
      echo "Booting server 'localhost' on address 127.0.0.1:57110."
      echo "SERVER_READY"
      ;;
    *0.exit*)
      exit 0
      ;;
    *bogusMethodCall*)
      echo ">>>BEGIN>>>"
      echo "ERROR: Message 'bogusMethodCall' not understood."
      echo "RECEIVER:"
      echo "   nil"
      ;;
    *"foo bar"*)
      echo ">>>BEGIN>>>"
      echo "ERROR: syntax error, unexpected NAME, expecting \$end"
      echo "  in interpreted text"
      echo "  line 1 char 5:"
      echo ""
      echo "  foo bar"
      echo "      ^^^"
      ;;
    *"1 + 1"* | *"1+1"*)
      echo ">>>BEGIN>>>"
      echo "2"
      echo "<<<END<<<"
      ;;
    *slowThing*)
      sleep 1
      echo ">>>BEGIN>>>"
      echo "late"
      echo "<<<END<<<"
      ;;
    *crashNow*)
      echo "Segmentation fault" >&2
      exit 3
      ;;
    *loadRuntime*)
      echo ">>>BEGIN>>>"
      echo "<<<END<<<"
      echo "CC_READY"
      ;;
    *s.reboot*)
      echo ">>>BEGIN>>>"
      echo "localhost"
      echo "<<<END<<<"
      ;;
    *CmdPeriod.run* | *s.freeAll*)
      echo "posted: $line"
      ;;
    *)
      echo ">>>BEGIN>>>"
      echo "<<<END<<<"
      ;;
  esac
done
"#;

/// Never prints the banner and ignores stdin and SIGTERM
pub(crate) const STUBBORN_SCLANG: &str = r#"
trap '' TERM
sleep 30
"#;

/// Prints the banner but never reports the server ready
pub(crate) const NO_SERVER_SCLANG: &str = r#"
echo "Welcome to SuperCollider 3.13.0"
while IFS= read -r line; do
  case "$line" in
    *0.exit*) exit 0 ;;
  esac
done
"#;

pub(crate) struct FakeInterpreter {
    _dir: TempDir,
    script: PathBuf,
}

impl FakeInterpreter {
    pub(crate) fn new() -> Self {
        Self::with_script(FAKE_SCLANG)
    }

    pub(crate) fn with_script(body: &str) -> Self {
        let dir = TempDir::new().expect("create temp dir");
        let script = dir.path().join("fake-sclang.sh");
        std::fs::write(&script, body).expect("write fake interpreter");
        Self { _dir: dir, script }
    }

    pub(crate) fn supervisor_options(&self) -> SupervisorOptions {
        SupervisorOptions {
            program: "sh".to_string(),
            args: vec![self.script.to_string_lossy().into_owned()],
            kill_grace: Duration::from_millis(300),
        }
    }

    /// Short timeouts so failure paths finish quickly
    pub(crate) fn config(&self) -> RuntimeConfig {
        RuntimeConfig {
            sclang_path: Some("sh".to_string()),
            sclang_args: vec![self.script.to_string_lossy().into_owned()],
            boot_timeout_ms: Some(3_000),
            exec_timeout_ms: Some(2_000),
            ready_timeout_ms: Some(1_000),
            kill_grace_ms: Some(300),
            error_settle_ms: Some(50),
        }
    }
}
