use std::fs;
use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

fn fingerprint(args: &[&str], cwd: &Path) -> Output {
    Command::new(env!("CARGO_BIN_EXE_fingerprint"))
        .args(args)
        .current_dir(cwd)
        .env("NO_COLOR", "1")
        .output()
        .expect("Failed to run fingerprint")
}

#[test]
fn test_cli_files_then_diff() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join("tree");
    fs::create_dir_all(root.join("sub")).unwrap();
    fs::write(root.join("a.txt"), "one").unwrap();
    fs::write(root.join("sub").join("b.txt"), "two").unwrap();
    let root_arg = root.to_str().unwrap();

    let output = fingerprint(&["files", root_arg, "-o", "before_files.csv"], tmp.path());
    assert!(output.status.success(), "files failed: {}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Records: 3"), "Unexpected output: {}", stdout);

    fs::write(root.join("c.txt"), "three").unwrap();
    let output = fingerprint(&["files", root_arg, "-o", "after_files.csv", "--no-hash"], tmp.path());
    assert!(output.status.success());

    let output = fingerprint(&["diff-files", "before_files.csv", "after_files.csv"], tmp.path());
    assert!(output.status.success(), "diff failed: {}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Added: 1"), "Unexpected output: {}", stdout);

    let diff = tmp.path().join("diff_before_files_after_files_files.csv");
    let written = fs::read_to_string(diff).unwrap();
    assert!(written.contains("c.txt"));
    assert!(written.contains("ADDED"));
}

#[test]
fn test_cli_filter_names_outputs() {
    let tmp = TempDir::new().unwrap();
    fs::write(
        tmp.path().join("procmon.csv"),
        "\"Time of Day\",\"Process Name\",\"PID\",\"Operation\",\"Path\",\"Result\",\"Detail\"\n\
         \"10:00\",\"a.exe\",\"1\",\"RegOpenKey\",\"HKLM\\SOFTWARE\\Vendor\",\"SUCCESS\",\"\"\n",
    )
    .unwrap();
    fs::write(tmp.path().join("files.csv"), "path,size,created,modified,accessed,hash,change,remark\n").unwrap();
    fs::write(
        tmp.path().join("reg.csv"),
        "path,modified,value_name,value_type,value,change,value_old\nHKLM\\SOFTWARE\\Vendor,,,KEY,,ADDED,\n",
    )
    .unwrap();

    let output = fingerprint(&["filter", "procmon.csv", "files.csv", "reg.csv", "-t", "results"], tmp.path());
    assert!(output.status.success(), "filter failed: {}", String::from_utf8_lossy(&output.stderr));

    let results = tmp.path().join("results");
    assert!(results.join("procmon_filtered_by_fingerprints_REG_reg_FILE_files.csv").exists());
    assert!(results.join("files_accessed_by_PROCMON_procmon.csv").exists());
    let registry = fs::read_to_string(results.join("reg_accessed_by_PROCMON_procmon.csv")).unwrap();
    assert!(registry.contains("HKLM\\SOFTWARE\\Vendor"));
}

#[test]
fn test_cli_missing_snapshot_fails() {
    let tmp = TempDir::new().unwrap();
    let output = fingerprint(&["diff-registry", "nope1.csv", "nope2.csv"], tmp.path());
    assert!(!output.status.success());
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Error"), "Unexpected stderr: {}", stderr);
}

#[test]
fn test_cli_config_file_and_log_file() {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join("config.json"), r#"{ "parallel_workers": 0 }"#).unwrap();
    let output = fingerprint(&["--config", "config.json", "files", "."], tmp.path());
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("parallel_workers"));

    fs::create_dir(tmp.path().join("tree")).unwrap();
    let output = fingerprint(
        &["--log-file", "run.log", "files", "tree", "-o", "snap.csv"],
        tmp.path(),
    );
    assert!(output.status.success());
    let log = fs::read_to_string(tmp.path().join("run.log")).unwrap();
    assert!(log.contains("File fingerprint written"), "Unexpected log: {}", log);
}
