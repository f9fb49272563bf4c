use anyhow::Result;
use ptyhost_pty::CommandSpec;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Minimal search path for fixture scripts; children inherit no environment.
pub const TEST_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

/// `/bin/sh -c <script>` with only `PATH` set.
pub fn sh(script: &str) -> CommandSpec {
    CommandSpec::new("/bin/sh")
        .arg("-c")
        .arg(script)
        .env("PATH", TEST_PATH)
}

pub struct TestFixtures {
    temp_dir: TempDir,
}

impl TestFixtures {
    pub fn new() -> Result<Self> {
        Ok(Self {
            temp_dir: TempDir::new()?,
        })
    }

    pub fn create_test_script(&self, name: &str, content: &str) -> Result<PathBuf> {
        let script_path = self.temp_dir.path().join(name);
        std::fs::write(&script_path, content)?;

        use std::os::unix::fs::PermissionsExt;
        let mut perms = std::fs::metadata(&script_path)?.permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&script_path, perms)?;

        Ok(script_path)
    }

    pub fn create_test_file(&self, name: &str, content: &[u8]) -> Result<PathBuf> {
        let file_path = self.temp_dir.path().join(name);
        std::fs::write(&file_path, content)?;
        Ok(file_path)
    }

    /// Canonical path of the fixture directory, as `pwd -P` reports it
    pub fn path(&self) -> PathBuf {
        self.temp_dir
            .path()
            .canonicalize()
            .unwrap_or_else(|_| self.temp_dir.path().to_path_buf())
    }

    pub fn raw_path(&self) -> &Path {
        self.temp_dir.path()
    }
}
