use std::env;
use std::fs;
use std::path::PathBuf;
use std::process::Command;

fn combined_output(output: &std::process::Output) -> String {
    let mut combined = String::new();
    combined.push_str(&String::from_utf8_lossy(&output.stdout));
    combined.push_str(&String::from_utf8_lossy(&output.stderr));
    combined
}

fn sandbox_bin() -> &'static str {
    option_env!("CARGO_BIN_EXE_pyodide-sandbox").expect("pyodide-sandbox test binary not built")
}

fn write_stub_deno(name: &str, body: &str) -> PathBuf {
    let path = env::temp_dir().join(format!("pyodide-sandbox-cli-{name}-{}", std::process::id()));
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write stub deno");
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = fs::metadata(&path).expect("stub metadata").permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&path, perms).expect("chmod stub");
    }
    path
}

fn sandbox_command() -> Command {
    let mut command = Command::new(sandbox_bin());
    for key in [
        "DENO_PATH",
        "SANDBOX_RUNNER",
        "SANDBOX_SHARED_DIR",
        "SANDBOX_PACKAGES",
        "SANDBOX_TIMEOUT_SECS",
        "SANDBOX_PROCESS_POLICY",
        "SANDBOX_STREAM_MODE",
    ] {
        command.env_remove(key);
    }
    command
}

#[test]
fn help_mentions_name() {
    let output = sandbox_command()
        .arg("--help")
        .output()
        .expect("run pyodide-sandbox --help");
    assert!(output.status.success());
    let combined = combined_output(&output);
    assert!(combined.contains("Pyodide sandbox"));
    assert!(combined.contains("--process-policy"));
}

#[test]
fn rejects_out_of_range_timeout() {
    let output = sandbox_command()
        .args(["--timeout-secs", "0", "--code", "1"])
        .output()
        .expect("run pyodide-sandbox");
    assert!(!output.status.success());
    assert!(combined_output(&output).contains("--timeout-secs"));
}

#[test]
fn rejects_non_executable_deno_path() {
    let path = env::temp_dir().join(format!("pyodide-sandbox-cli-plain-{}", std::process::id()));
    fs::write(&path, "not a program").expect("write plain file");
    let output = sandbox_command()
        .arg("--deno-path")
        .arg(&path)
        .args(["--code", "1"])
        .output()
        .expect("run pyodide-sandbox");
    assert!(!output.status.success());
    assert!(combined_output(&output).contains("--deno-path"));
    let _ = fs::remove_file(path);
}

#[cfg(unix)]
#[test]
fn runs_code_through_stub_runtime() {
    let deno = write_stub_deno(
        "ok",
        r#"echo "$*" >&2
read -r request
echo '[py] hello'
echo '@@RESULT@@ {"output": 42}'
echo '@@DONE@@'"#,
    );
    let output = sandbox_command()
        .arg("--deno-path")
        .arg(&deno)
        .args(["--code", "print('hello'); 42"])
        .output()
        .expect("run pyodide-sandbox");
    assert!(output.status.success(), "{}", combined_output(&output));
    let stdout = String::from_utf8_lossy(&output.stdout);
    let result: serde_json::Value =
        serde_json::from_str(stdout.trim()).expect("stdout is one JSON result");
    assert_eq!(result, serde_json::json!({ "output": 42 }));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("[python] hello"), "{stderr}");
    assert!(stderr.contains("run --allow-read runner.ts"), "{stderr}");
    let _ = fs::remove_file(deno);
}

#[cfg(unix)]
#[test]
fn error_result_sets_failure_status() {
    let deno = write_stub_deno("done-only", "read -r request\necho '@@DONE@@'");
    let output = sandbox_command()
        .arg("--deno-path")
        .arg(&deno)
        .args(["--quiet", "--code", "pass"])
        .output()
        .expect("run pyodide-sandbox");
    assert!(!output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        stdout.contains("Execution ended with no RESULT"),
        "{stdout}"
    );
    let _ = fs::remove_file(deno);
}
