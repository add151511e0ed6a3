use runrilla_config::{LoadCell, load_json, load_toml};
use rstest::rstest;

const GOOD: &str = r#"{
  "SERIAL": { "PORT": "/dev/ttyUSB0", "BAUDRATE": 230400, "COMMAND": "A" },
  "/BARS": [
    { "ID": 1, "LCS": 15 },
    { "ID": 2, "LCS": 15 }
  ],
  "/WEIGHT": 500.0,
  "/AVG": 10,
  "IGNORE": 0,
  "DEBUG": true
}"#;

fn with(pointer: &str, value: serde_json::Value) -> String {
    let mut v: serde_json::Value = serde_json::from_str(GOOD).unwrap();
    *v.pointer_mut(pointer).expect("pointer into fixture") = value;
    v.to_string()
}

#[test]
fn accepts_good_file_and_defaults_ignore_to_avg() {
    let p = load_json(GOOD).expect("parse JSON");
    p.validate().expect("valid");
    assert_eq!(p.ignore, 10);
    assert_eq!(p.nlcs(), 4);
    assert!(p.debug);
    assert!(!p.is_calibrated());
}

#[test]
fn keeps_explicit_ignore() {
    let p = load_json(&with("/IGNORE", 3.into())).unwrap();
    assert_eq!(p.ignore, 3);
}

#[rstest]
#[case("/SERIAL/BAUDRATE", serde_json::json!(0), "baudrate must be > 0")]
#[case("/AVG", serde_json::json!(0), "avg must be >= 1")]
#[case("/WEIGHT", serde_json::json!(0.0), "weight must be > 0")]
#[case("/WEIGHT", serde_json::json!(-5.0), "weight must be > 0")]
#[case("/BARS", serde_json::json!([]), "no bars defined")]
#[case("/BARS/1/LCS", serde_json::json!(0), "no active channel")]
#[case("/BARS/1/LCS", serde_json::json!(0x1F), "bits above channel")]
#[case("/BARS/1/LCS", serde_json::json!(3), "number of load cells per bar must match")]
#[case("/BARS/1/ID", serde_json::json!(1), "used twice")]
fn rejects_bad_shapes(#[case] path: &str, #[case] value: serde_json::Value, #[case] needle: &str) {
    let p = load_json(&with(path, value)).expect("parse JSON");
    let err = p.validate().expect_err("should be rejected");
    assert!(
        format!("{err}").to_lowercase().contains(needle),
        "{err} does not mention {needle:?}"
    );
}

#[test]
fn rejects_wrong_record_count() {
    let mut p = load_json(GOOD).unwrap();
    p.bars[0].lc = vec![LoadCell {
        zero: 1,
        factor: 0.5,
        ieee: "3F000000".into(),
    }];
    let err = p.validate().unwrap_err();
    assert!(format!("{err}").contains("records, expected 4"));
}

#[test]
fn toml_loads_same_schema() {
    let toml = r#"
WEIGHT = 250.0
AVG = 4

[SERIAL]
PORT = ""
BAUDRATE = 115200
COMMAND = "A"

[[BARS]]
ID = 3
LCS = 3

[[BARS]]
ID = 4
LCS = 12

[LOGGING]
level = "debug"
rotation = "daily"
"#;
    let p = load_toml(toml).expect("parse TOML");
    p.validate().expect("valid");
    assert_eq!(p.nlcs(), 2);
    assert_eq!(p.ignore, 4);
    assert!(p.serial.port.is_empty());
    assert_eq!(p.logging.rotation.as_deref(), Some("daily"));
}
