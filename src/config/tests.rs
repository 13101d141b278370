use super::validation::{parse_package_list, sanitize_binary};
use super::{ClockStart, ProcessPolicy, SandboxConfig, StreamMode, DEFAULT_TIMEOUT_SECS};
use clap::{CommandFactory, FromArgMatches, Parser};
use std::fs;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use std::env;

fn unique_temp_path(prefix: &str) -> std::path::PathBuf {
    let unique = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    env::temp_dir().join(format!("{prefix}_{unique}"))
}

#[test]
fn accepts_valid_defaults() {
    let mut cfg = SandboxConfig::parse_from(["test-app"]);
    assert!(cfg.validate().is_ok());
    assert_eq!(cfg.deno_path, "deno");
    assert_eq!(cfg.timeout(), Duration::from_secs(DEFAULT_TIMEOUT_SECS));
    assert!(cfg.packages.is_empty());
}

#[test]
fn defaults_pick_explicit_policies() {
    let cfg = SandboxConfig::parse_from(["test-app"]);
    assert_eq!(cfg.process_policy, ProcessPolicy::PerCall);
    assert_eq!(cfg.timeout_start, ClockStart::UserCode);
    assert_eq!(cfg.stream_mode, StreamMode::Separate);
}

#[test]
fn parses_policy_flags() {
    let cfg = SandboxConfig::parse_from([
        "test-app",
        "--process-policy",
        "reuse",
        "--timeout-start",
        "session",
        "--stream-mode",
        "merged",
    ]);
    assert_eq!(cfg.process_policy, ProcessPolicy::Reuse);
    assert_eq!(cfg.timeout_start, ClockStart::Session);
    assert_eq!(cfg.stream_mode, StreamMode::Merged);
    assert_eq!(cfg.process_policy.label(), "reuse");
    assert_eq!(cfg.timeout_start.label(), "session");
    assert_eq!(cfg.stream_mode.label(), "merged");
}

#[test]
fn rejects_timeout_out_of_bounds() {
    let mut cfg = SandboxConfig::parse_from(["test-app", "--timeout-secs", "0"]);
    assert!(cfg.validate().is_err());

    let mut cfg = SandboxConfig::parse_from(["test-app", "--timeout-secs", "3601"]);
    assert!(cfg.validate().is_err());

    let mut cfg = SandboxConfig::parse_from(["test-app", "--startup-timeout-secs", "0"]);
    assert!(cfg.validate().is_err());
}

#[test]
fn accepts_timeout_bounds() {
    let mut cfg = SandboxConfig::parse_from(["test-app", "--timeout-secs", "1"]);
    assert!(cfg.validate().is_ok());
    let mut cfg = SandboxConfig::parse_from(["test-app", "--timeout-secs", "3600"]);
    assert!(cfg.validate().is_ok());
}

#[test]
fn parses_package_json_array() {
    let mut cfg =
        SandboxConfig::parse_from(["test-app", "--packages", r#"["numpy", " pandas==2.2 "]"#]);
    cfg.validate().expect("package list should be valid");
    assert_eq!(cfg.packages, vec!["numpy", "pandas==2.2"]);
}

#[test]
fn rejects_malformed_package_lists() {
    for bad in [r#"numpy"#, r#"{"a": 1}"#, r#"[1, 2]"#, r#"["ok", ""]"#, "[\"a\\nb\"]"] {
        assert!(parse_package_list(bad).is_err(), "'{bad}' should be rejected");
    }
    assert!(parse_package_list("   ").unwrap().is_empty());
    assert!(parse_package_list("[]").unwrap().is_empty());
}

#[test]
fn rejects_too_many_packages() {
    let names: Vec<String> = (0..65).map(|i| format!("pkg{i}")).collect();
    let raw = serde_json::to_string(&names).unwrap();
    assert!(parse_package_list(&raw).is_err());
}

#[test]
fn rejects_missing_shared_dir() {
    let missing = unique_temp_path("sandbox_missing_dir");
    let mut cfg =
        SandboxConfig::parse_from(["test-app", "--shared-dir", missing.to_str().unwrap()]);
    assert!(cfg.validate().is_err());
}

#[test]
fn rejects_shared_dir_that_is_a_file() {
    let path = unique_temp_path("sandbox_shared_file");
    fs::write(&path, "not a dir").unwrap();
    let mut cfg = SandboxConfig::parse_from(["test-app", "--shared-dir", path.to_str().unwrap()]);
    assert!(cfg.validate().is_err());
    let _ = fs::remove_file(&path);
}

#[test]
fn write_requires_shared_dir() {
    let dir = unique_temp_path("sandbox_shared_dir");
    fs::create_dir_all(&dir).unwrap();

    let mut cfg = SandboxConfig::parse_from(["test-app", "--allow-write"]);
    cfg.validate().unwrap();
    assert!(!cfg.write_enabled());

    let mut cfg = SandboxConfig::parse_from([
        "test-app",
        "--allow-write",
        "--shared-dir",
        dir.to_str().unwrap(),
    ]);
    cfg.validate().unwrap();
    assert!(cfg.write_enabled());
    assert!(cfg.shared_dir.as_ref().unwrap().is_absolute());

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn rejects_invalid_deno_path() {
    let mut cfg = SandboxConfig::parse_from(["test-app", "--deno-path", "not-deno"]);
    assert!(cfg.validate().is_err());
    assert!(sanitize_binary("   ", "--deno-path", &["deno"]).is_err());
    assert_eq!(
        sanitize_binary("DENO", "--deno-path", &["deno"]).unwrap(),
        "deno"
    );
}

#[cfg(unix)]
#[test]
fn deno_path_must_be_executable() {
    use std::os::unix::fs::PermissionsExt;

    let temp_path = unique_temp_path("deno_path_test");
    fs::write(&temp_path, "#!/bin/sh\necho test\n").unwrap();
    let mut perms = fs::metadata(&temp_path).unwrap().permissions();
    perms.set_mode(0o600);
    fs::set_permissions(&temp_path, perms.clone()).unwrap();

    let mut cfg =
        SandboxConfig::parse_from(["test-app", "--deno-path", temp_path.to_str().unwrap()]);
    assert!(
        cfg.validate().is_err(),
        "non-executable binary path should be rejected"
    );

    perms.set_mode(0o700);
    fs::set_permissions(&temp_path, perms).unwrap();
    let mut cfg =
        SandboxConfig::parse_from(["test-app", "--deno-path", temp_path.to_str().unwrap()]);
    assert!(
        cfg.validate().is_ok(),
        "executable binary path should be accepted"
    );

    let _ = fs::remove_file(&temp_path);
}

#[test]
fn no_logs_overrides_logs() {
    let cfg = SandboxConfig::parse_from(["test-app", "--logs"]);
    assert!(cfg.logging_enabled());
    let cfg = SandboxConfig::parse_from(["test-app", "--logs", "--no-logs"]);
    assert!(!cfg.logging_enabled());
}

fn parse_with_env(
    arg: &'static str,
    var: &'static str,
    value: &str,
) -> Result<SandboxConfig, clap::Error> {
    env::set_var(var, value);
    let matches = SandboxConfig::command()
        .mut_arg(arg, |a| a.env(var))
        .try_get_matches_from(["test-app"]);
    env::remove_var(var);
    SandboxConfig::from_arg_matches(&matches?)
}

#[test]
fn boolean_env_accepts_numeric_and_word_forms() {
    let cfg = parse_with_env("verbose", "PYODIDE_SANDBOX_TEST_VERBOSE_ONE", "1")
        .expect("1 is true");
    assert!(cfg.verbose);
    let cfg = parse_with_env("verbose", "PYODIDE_SANDBOX_TEST_VERBOSE_ZERO", "0")
        .expect("0 is false");
    assert!(!cfg.verbose);
    let cfg = parse_with_env("allow_write", "PYODIDE_SANDBOX_TEST_WRITE_YES", "yes")
        .expect("yes is true");
    assert!(cfg.allow_write);
    let cfg = parse_with_env("no_logs", "PYODIDE_SANDBOX_TEST_NO_LOGS_OFF", "off")
        .expect("off is false");
    assert!(!cfg.no_logs);
}

#[test]
fn boolean_env_rejects_unknown_words() {
    let parsed = parse_with_env("log_content", "PYODIDE_SANDBOX_TEST_CONTENT_MAYBE", "maybe");
    assert!(parsed.is_err());
}
