use std::io::Write;
use std::process::Command;

use tempfile::NamedTempFile;

fn waygate() -> Command {
    Command::new(env!("CARGO_BIN_EXE_waygate"))
}

fn script_file(body: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp script");
    file.write_all(body.as_bytes()).expect("write script");
    file
}

#[test]
fn compiles_a_script_and_reports_counts() {
    let file = script_file(
        r#"{
            "tokens": ["Kokiri_Sword"],
            "rules": [{
                "name": "First Check",
                "rule": {"kind": "identifier", "name": "Kokiri_Sword"}
            }]
        }"#,
    );
    let out = waygate().arg(file.path()).output().expect("failed to run waygate");
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("1 units"), "expected unit count, got: {stdout}");
}

#[test]
fn disassemble_flag_prints_units() {
    let file = script_file(
        r#"{
            "tokens": ["Slingshot"],
            "rules": [{
                "name": "Shooting Gallery",
                "rule": {
                    "kind": "call",
                    "callee": {"kind": "identifier", "name": "has"},
                    "args": [
                        {"kind": "identifier", "name": "Slingshot"},
                        {"kind": "literal", "value": 1}
                    ]
                }
            }]
        }"#,
    );
    let out = waygate().arg(file.path()).arg("-d").output().expect("failed to run waygate");
    assert!(out.status.success());
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("Shooting Gallery"), "missing unit header: {stdout}");
    assert!(stdout.contains("has"), "missing mnemonic: {stdout}");
    assert!(stdout.contains("Slingshot"), "missing resolved operand: {stdout}");
}

#[test]
fn unresolved_names_fail_the_rule_but_not_the_report() {
    let file = script_file(
        r#"{
            "rules": [
                {"name": "bad", "rule": {"kind": "identifier", "name": "no_such_thing"}},
                {"name": "good", "rule": {"kind": "literal", "value": true}}
            ]
        }"#,
    );
    let out = waygate().arg(file.path()).output().expect("failed to run waygate");
    assert!(!out.status.success(), "a failing rule should fail the run");
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("no_such_thing"), "stderr: {stderr}");
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("1 units"), "the good rule still compiles: {stdout}");
}

#[test]
fn malformed_json_is_a_clean_error() {
    let file = script_file("{ not json");
    let out = waygate().arg(file.path()).output().expect("failed to run waygate");
    assert!(!out.status.success());
    assert!(!String::from_utf8_lossy(&out.stderr).is_empty());
}
