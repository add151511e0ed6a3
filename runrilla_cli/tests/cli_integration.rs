use assert_cmd::prelude::*;
use predicates::prelude::*;
use rstest::rstest;
use std::fs;
use std::path::PathBuf;
use std::process::Command;
use tempfile::tempdir;

// Two bars with two load cells each; small sample counts keep sim runs fast.
const RIG: &str = r#"{
  "SERIAL": { "PORT": "", "BAUDRATE": 115200, "COMMAND": "A" },
  "BARS": [ { "ID": 1, "LCS": 3 }, { "ID": 2, "LCS": 3 } ],
  "WEIGHT": 500,
  "AVG": 2,
  "IGNORE": 1
}"#;

fn write_config(dir: &tempfile::TempDir, name: &str, text: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, text).unwrap();
    path
}

fn runrilla(cfg: &PathBuf) -> Command {
    let mut cmd = Command::cargo_bin("runrilla").unwrap();
    cmd.arg("--config").arg(cfg).arg("--log-level").arg("error");
    cmd
}

#[rstest]
#[case(&["--help"], 0, "Usage:", "stdout")]
#[case(&["plan"], 0, "[0006] Put 500 on the First Bay on the Right side in the Back of the Shelf", "stdout")]
#[case(&["--sim", "version"], 0, "bar 2: version 2.1.0", "stdout")]
#[case(&["--sim", "factors"], 0, "bar 1: 1.0000000000 1.0000000000", "stdout")]
#[case(&["--sim", "detect"], 0, "sim", "stdout")]
#[case(&["flash"], 2, "required", "stderr")]
fn cli_table_cases(
    #[case] args: &[&str],
    #[case] exit_code: i32,
    #[case] needle: &str,
    #[case] stream: &str,
) {
    let dir = tempdir().unwrap();
    let cfg = write_config(&dir, "rig.json", RIG);

    let assert = runrilla(&cfg).args(args).assert().code(exit_code);
    match stream {
        "stdout" => {
            assert.stdout(predicate::str::contains(needle));
        }
        "stderr" => {
            assert.stderr(predicate::str::contains(needle));
        }
        other => panic!("unknown stream: {other}"),
    }
}

#[rstest]
#[case("\"AVG\": 2", "\"AVG\": 0", "AVG must be >= 1")]
#[case("{ \"ID\": 2, \"LCS\": 3 }", "{ \"ID\": 2, \"LCS\": 7 }", "number of load cells per bar must match")]
#[case("\"WEIGHT\": 500", "\"WEIGHT\": -1", "WEIGHT must be > 0")]
fn invalid_parameters_exit_2(#[case] from: &str, #[case] to: &str, #[case] needle: &str) {
    let dir = tempdir().unwrap();
    let cfg = write_config(&dir, "rig.json", &RIG.replace(from, to));
    runrilla(&cfg)
        .arg("plan")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Invalid configuration").and(predicate::str::contains(needle)));
}

#[test]
fn missing_parameter_file_is_reported() {
    let dir = tempdir().unwrap();
    let cfg = dir.path().join("absent.json");
    runrilla(&cfg)
        .arg("plan")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("read parameters"));
}

#[test]
fn calibrate_on_sim_writes_calibrated_file_and_report() {
    let dir = tempdir().unwrap();
    let cfg = write_config(&dir, "rig.json", RIG);

    runrilla(&cfg)
        .args(["--sim", "calibrate", "--yes"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("Recorded 7/7")
                .and(predicate::str::contains("Calibration solved"))
                .and(predicate::str::contains("Flashing complete")),
        );

    let saved: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(dir.path().join("rig_calibrated.json")).unwrap())
            .unwrap();
    let bars = saved["BARS"].as_array().unwrap();
    assert_eq!(bars.len(), 2);
    for bar in bars {
        let lc = bar["LC"].as_array().unwrap();
        assert_eq!(lc.len(), 2);
        for cell in lc {
            // SimBar sensitivities are all close to 0.05.
            let factor = cell["FACTOR"].as_f64().unwrap();
            assert!((0.04..0.06).contains(&factor), "factor {factor}");
            assert_eq!(cell["IEEE"].as_str().unwrap().len(), 8);
        }
    }
    assert_eq!(saved["AVG"], 2);

    let report = fs::read_to_string(dir.path().join("rig_debug.csv")).unwrap();
    assert_eq!(report.lines().count(), 2);
    assert!(report.starts_with("timestamp_s,bars,nlcs,weight,residual,pinv_norm,zeros,factors"));
}

#[test]
fn calibrated_file_can_be_flashed_back() {
    let dir = tempdir().unwrap();
    let cfg = write_config(&dir, "rig.json", RIG);
    runrilla(&cfg)
        .args(["--sim", "calibrate", "--yes", "--no-flash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Flashing").not());

    let calibrated = dir.path().join("rig_calibrated.json");
    runrilla(&cfg)
        .args(["--sim", "flash", "--calibrated"])
        .arg(&calibrated)
        .assert()
        .success()
        .stdout(predicate::str::contains("Bar 2: Rebooting..."));
}

#[test]
fn flashing_an_uncalibrated_file_fails() {
    let dir = tempdir().unwrap();
    let cfg = write_config(&dir, "rig.json", RIG);
    runrilla(&cfg)
        .args(["--sim", "flash", "--calibrated"])
        .arg(&cfg)
        .assert()
        .code(6)
        .stderr(predicate::str::contains("bar 1: no calibration records"));
}

#[test]
fn json_errors_are_structured() {
    let dir = tempdir().unwrap();
    let cfg = write_config(&dir, "rig.json", RIG);
    let out = runrilla(&cfg)
        .args(["--json", "--sim", "flash", "--calibrated"])
        .arg(&cfg)
        .assert()
        .code(6)
        .get_output()
        .stdout
        .clone();
    let stdout = String::from_utf8_lossy(&out);
    let v: serde_json::Value = serde_json::from_str(stdout.lines().last().unwrap()).unwrap();
    assert_eq!(v["reason"], "NoCalibration");
    assert_eq!(v["details"]["bar"], 1);
    assert!(v["message"].as_str().unwrap().starts_with("What happened:"));
}

#[test]
fn live_test_reports_placed_weight() {
    let dir = tempdir().unwrap();
    // Factor 0.0505 matches the simulated sensitivity of bar 1, cell 1.
    let calibrated = RIG.replace(
        "{ \"ID\": 1, \"LCS\": 3 }",
        r#"{ "ID": 1, "LCS": 3, "LC": [ { "ZERO": 0, "FACTOR": 0.0505 }, { "ZERO": 0, "FACTOR": 0.0515 } ] }"#,
    )
    .replace(
        "{ \"ID\": 2, \"LCS\": 3 }",
        r#"{ "ID": 2, "LCS": 3, "LC": [ { "ZERO": 0, "FACTOR": 0.051 }, { "ZERO": 0, "FACTOR": 0.052 } ] }"#,
    );
    let cfg = write_config(&dir, "rig.json", &calibrated);

    let out = runrilla(&cfg)
        .args(["--json", "--sim", "test", "--seconds", "2"])
        .env("RUNRILLA_SIM_LOAD", "1,0,250")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let stdout = String::from_utf8_lossy(&out);
    let totals: Vec<f64> = stdout
        .lines()
        .filter_map(|l| serde_json::from_str::<serde_json::Value>(l).ok())
        .filter(|v| v["event"] == "snapshot")
        .filter_map(|v| v["grand_total"].as_f64())
        .collect();
    assert!(
        totals.iter().any(|t| (t - 250.0).abs() < 0.5),
        "no snapshot near 250; stdout was: {stdout}"
    );
    assert!(stdout.contains("\"event\":\"canceled\""));
}
