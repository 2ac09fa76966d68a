use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// Binary with an isolated config directory and no $ERP_CONFIG
fn erp(config_home: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("erp").unwrap();
    cmd.env_remove("ERP_CONFIG")
        .env("XDG_CONFIG_HOME", config_home.path())
        .env("HOME", config_home.path());
    cmd
}

fn stdout_json(output: &std::process::Output) -> serde_json::Value {
    let stdout = String::from_utf8(output.stdout.clone()).unwrap();
    serde_json::from_str(&stdout).unwrap()
}

// =============================================================================
// GENERAL
// =============================================================================

#[test]
fn test_no_args_shows_help() {
    let home = TempDir::new().unwrap();
    erp(&home)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage:"));
}

#[test]
fn test_version_flag() {
    let home = TempDir::new().unwrap();
    erp(&home)
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("erp"));
}

#[test]
fn test_help_flag() {
    let home = TempDir::new().unwrap();
    erp(&home)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("simulate"))
        .stdout(predicate::str::contains("validate"));
}

// =============================================================================
// INFO SUBCOMMAND
// =============================================================================

#[test]
fn test_info_text() {
    let home = TempDir::new().unwrap();
    erp(&home)
        .arg("info")
        .assert()
        .success()
        .stdout(predicate::str::contains("erp CLI v"))
        .stdout(predicate::str::contains("built-in defaults"))
        .stdout(predicate::str::contains("STI 014"));
}

#[test]
fn test_info_json() {
    let home = TempDir::new().unwrap();
    let output = erp(&home).args(["info", "--json"]).assert().success();

    let parsed = stdout_json(output.get_output());
    assert_eq!(parsed["config_env"], "ERP_CONFIG");
    assert_eq!(parsed["defaults"]["num_averages"], 4);
    assert_eq!(parsed["defaults"]["buffer_capacity"], 128);
    assert!(parsed["active_config_path"].is_null());
}

// =============================================================================
// VALIDATE SUBCOMMAND
// =============================================================================

#[test]
fn test_validate_defaults() {
    let home = TempDir::new().unwrap();
    erp(&home)
        .arg("validate")
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration is valid"));
}

#[test]
fn test_validate_geometry_json() {
    let home = TempDir::new().unwrap();
    let output = erp(&home)
        .args(["validate", "--pre", "15", "--post", "15", "--block-len", "10", "--json"])
        .assert()
        .success();

    let parsed = stdout_json(output.get_output());
    assert_eq!(parsed["valid"], true);
    assert_eq!(parsed["geometry"]["window_blocks"], 6);
    assert_eq!(parsed["geometry"]["mid_index"], 3);
    assert_eq!(parsed["geometry"]["pre_capacity"], 30);
    assert_eq!(parsed["geometry"]["post_capacity"], 21);
}

#[test]
fn test_validate_infeasible_geometry() {
    let home = TempDir::new().unwrap();
    erp(&home)
        .args(["validate", "--pre", "100", "--post", "0", "--block-len", "10"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("pre_stim_samples"));
}

#[test]
fn test_validate_zero_num_averages() {
    let home = TempDir::new().unwrap();
    let output = erp(&home)
        .args(["validate", "--num-averages", "0", "--json"])
        .assert()
        .code(2);

    let parsed = stdout_json(output.get_output());
    assert_eq!(parsed["valid"], false);
    assert!(parsed["error"].as_str().unwrap().contains("num_averages"));
}

#[test]
fn test_validate_overflowing_epoch() {
    let home = TempDir::new().unwrap();
    let output = erp(&home)
        .args([
            "validate",
            "--pre",
            &usize::MAX.to_string(),
            "--post",
            "1",
            "--json",
        ])
        .assert()
        .code(2);

    let parsed = stdout_json(output.get_output());
    assert_eq!(parsed["valid"], false);
    assert!(parsed["error"].as_str().unwrap().contains("overflows"));
}

#[test]
fn test_validate_reads_config_file() {
    let home = TempDir::new().unwrap();
    let config = home.path().join("session.json");
    std::fs::write(&config, r#"{"pre_stim_samples": 40, "post_stim_samples": 60}"#).unwrap();

    let output = erp(&home)
        .args(["validate", "--json", "--config"])
        .arg(&config)
        .assert()
        .success();

    let parsed = stdout_json(output.get_output());
    assert_eq!(parsed["config"]["pre_stim_samples"], 40);
    assert_eq!(parsed["config"]["post_stim_samples"], 60);
    assert_eq!(parsed["config_file"], config.display().to_string());
}

#[test]
fn test_validate_config_from_env() {
    let home = TempDir::new().unwrap();
    let config = home.path().join("env.json");
    std::fs::write(&config, r#"{"num_averages": 9}"#).unwrap();

    let output = erp(&home)
        .env("ERP_CONFIG", &config)
        .args(["validate", "--json"])
        .assert()
        .success();

    assert_eq!(stdout_json(output.get_output())["config"]["num_averages"], 9);
}

#[test]
fn test_validate_missing_config_file() {
    let home = TempDir::new().unwrap();
    erp(&home)
        .args(["validate", "--config", "/nonexistent/averaging.json"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Config file not found"));
}

// =============================================================================
// SIMULATE SUBCOMMAND
// =============================================================================

fn small_simulation(home: &TempDir, period: &str) -> Command {
    let mut cmd = erp(home);
    cmd.args([
        "simulate",
        "--blocks",
        "60",
        "--block-len",
        "10",
        "--pre",
        "15",
        "--post",
        "15",
        "--period",
        period,
        "--num-averages",
        "3",
        "--capacity",
        "8",
        "--quiet",
    ]);
    cmd
}

#[test]
fn test_simulate_produces_averages() {
    let home = TempDir::new().unwrap();
    let output = small_simulation(&home, "50").assert().success();

    let parsed = stdout_json(output.get_output());
    assert_eq!(parsed["blocks_streamed"], 60);
    assert_eq!(parsed["stats"]["blocks_processed"], 60);
    assert_eq!(parsed["stimulus_channels"], serde_json::json!(["STI 001"]));

    let averages = parsed["averages"].as_array().unwrap();
    assert_eq!(averages.len(), 1);

    let average = &averages[0];
    assert_eq!(average["channel_name"], "STI 001");
    assert_eq!(average["nave"], 3);
    assert_eq!(average["pre"][0].as_array().unwrap().len(), 15);
    assert_eq!(average["post"][0].as_array().unwrap().len(), 15);
    assert_eq!(average["times"].as_array().unwrap().len(), 30);

    // Trigger row of the average has the pulse at the event sample
    let trigger_row = average["post"][4].as_array().unwrap();
    assert_eq!(trigger_row[0], 1.0);
}

#[test]
fn test_simulate_multiple_stimuli() {
    let home = TempDir::new().unwrap();
    let output = small_simulation(&home, "90")
        .args(["--stim-channels", "2"])
        .assert()
        .success();

    let parsed = stdout_json(output.get_output());
    let averages = parsed["averages"].as_array().unwrap();
    assert_eq!(averages.len(), 2);
    assert_eq!(averages[1]["channel_name"], "STI 002");
}

#[test]
fn test_simulate_output_file() {
    let home = TempDir::new().unwrap();
    let path = home.path().join("out").join("averages.json");

    small_simulation(&home, "50")
        .arg("--output")
        .arg(&path)
        .arg("--compact")
        .assert()
        .success()
        .stdout(predicate::str::is_empty());

    let content = std::fs::read_to_string(&path).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&content).unwrap();
    assert!(parsed["engine_id"].is_string());
    assert_eq!(content.trim_end().lines().count(), 1);
}

#[test]
fn test_simulate_rejects_infeasible_geometry() {
    let home = TempDir::new().unwrap();
    erp(&home)
        .args([
            "simulate", "--block-len", "10", "--pre", "100", "--post", "0", "--quiet",
        ])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Invalid configuration"));
}

#[test]
fn test_simulate_progress_on_stderr() {
    let home = TempDir::new().unwrap();
    erp(&home)
        .args([
            "simulate", "--blocks", "20", "--block-len", "10", "--pre", "15", "--post", "15",
        ])
        .assert()
        .success()
        .stderr(predicate::str::contains("Simulating 20 blocks"));
}
