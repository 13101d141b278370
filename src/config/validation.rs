use super::defaults::{MAX_PACKAGES, MAX_PACKAGE_NAME_BYTES};
use super::{SandboxConfig, MAX_TIMEOUT_SECS, MIN_TIMEOUT_SECS};
use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use std::{fs, path::Path};

impl SandboxConfig {
    /// Parse CLI arguments and validate them right away.
    pub fn parse_args() -> Result<Self> {
        let mut config = Self::parse();
        config.validate()?;
        Ok(config)
    }

    /// Check values, normalize paths and parse the package list.
    pub fn validate(&mut self) -> Result<()> {
        if !(MIN_TIMEOUT_SECS..=MAX_TIMEOUT_SECS).contains(&self.timeout_secs) {
            bail!(
                "--timeout-secs must be between {MIN_TIMEOUT_SECS} and {MAX_TIMEOUT_SECS}, got {}",
                self.timeout_secs
            );
        }
        if !(MIN_TIMEOUT_SECS..=MAX_TIMEOUT_SECS).contains(&self.startup_timeout_secs) {
            bail!(
                "--startup-timeout-secs must be between {MIN_TIMEOUT_SECS} and {MAX_TIMEOUT_SECS}, got {}",
                self.startup_timeout_secs
            );
        }

        self.deno_path = sanitize_binary(&self.deno_path, "--deno-path", &["deno"])?;

        if self.runner_script.as_os_str().is_empty() {
            bail!("--runner-script cannot be empty");
        }
        // The runner is resolved by deno relative to our cwd; pin it down now.
        if self.runner_script.exists() {
            self.runner_script = self.runner_script.canonicalize().with_context(|| {
                format!(
                    "failed to canonicalize runner script '{}'",
                    self.runner_script.display()
                )
            })?;
        }

        if let Some(dir) = &self.shared_dir {
            let canonical = dir
                .canonicalize()
                .with_context(|| format!("--shared-dir '{}' does not exist", dir.display()))?;
            if !canonical.is_dir() {
                bail!("--shared-dir '{}' is not a directory", canonical.display());
            }
            self.shared_dir = Some(canonical);
        }

        self.packages = match &self.packages_json {
            Some(raw) => parse_package_list(raw)?,
            None => Vec::new(),
        };

        Ok(())
    }
}

/// Parse a JSON array of package names, e.g. `["numpy", "pandas==2.2"]`.
pub(super) fn parse_package_list(raw: &str) -> Result<Vec<String>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    let packages: Vec<String> =
        serde_json::from_str(trimmed).context("--packages must be a JSON array of strings")?;
    if packages.len() > MAX_PACKAGES {
        bail!(
            "--packages lists too many packages (max {MAX_PACKAGES}, got {})",
            packages.len()
        );
    }
    for name in &packages {
        let name = name.trim();
        if name.is_empty() {
            bail!("--packages must not contain empty names");
        }
        if name.len() > MAX_PACKAGE_NAME_BYTES || name.chars().any(char::is_control) {
            bail!("--packages entry '{name}' is not a valid package name");
        }
    }
    Ok(packages.into_iter().map(|name| name.trim().to_string()).collect())
}

/// Allow either a known binary name or an absolute path.
pub(super) fn sanitize_binary(value: &str, flag: &str, allowlist: &[&str]) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        bail!("{flag} cannot be empty");
    }
    if let Some(allowed) = allowlist
        .iter()
        .find(|candidate| candidate.eq_ignore_ascii_case(trimmed))
    {
        return Ok((*allowed).to_string());
    }

    let path = Path::new(trimmed);
    if path.is_absolute() || trimmed.contains(std::path::MAIN_SEPARATOR) {
        let canonical = path
            .canonicalize()
            .with_context(|| format!("failed to canonicalize {flag} '{trimmed}'"))?;
        let metadata = fs::metadata(&canonical)
            .with_context(|| format!("failed to inspect {flag} '{}'", canonical.display()))?;
        if !metadata.is_file() {
            bail!("{flag} '{}' is not a file", canonical.display());
        }
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = metadata.permissions().mode();
            if mode & 0o111 == 0 {
                bail!(
                    "{flag} '{}' exists but is not executable (mode {:o})",
                    canonical.display(),
                    mode
                );
            }
        }
        return canonical
            .to_str()
            .map(|s| s.to_string())
            .ok_or_else(|| anyhow!("{flag} must be valid UTF-8"));
    }

    bail!("{flag} must be one of {allowlist:?} or an existing binary path");
}
