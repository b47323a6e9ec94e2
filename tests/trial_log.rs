use churn_engine::models::{MonthSpec, ParamValue, TrialState};
use churn_engine::trial_log::TrialLog;
use std::fs;

// Layout written by earlier tooling: no best_iteration, ISO timestamps with
// microseconds, list-valued training months.
const EXISTING_LOG: &str = r#"[
  {
    "trial_number": 0,
    "params": {"num_leaves": 37, "learning_rate": 0.042, "max_depth": 9},
    "value": 41340000.0,
    "datetime": "2025-09-30T21:14:03.512345",
    "state": "COMPLETE",
    "configuración": {"semilla": [153929, 838627], "mes_train": [202101, 202102], "mes_validación": 202103}
  },
  {
    "trial_number": 1,
    "params": {"num_leaves": 112, "learning_rate": 0.018, "max_depth": 4},
    "value": 52860000.0,
    "datetime": "2025-09-30T21:19:47.001122",
    "state": "COMPLETE",
    "configuración": {"semilla": [153929, 838627], "mes_train": [202101, 202102], "mes_validación": 202103}
  }
]"#;

#[test]
fn reads_logs_without_best_iteration() {
    let dir = tempfile::tempdir().unwrap();
    let log = TrialLog::for_study(dir.path(), "legacy");
    fs::write(log.path(), EXISTING_LOG).unwrap();

    let records = log.load().unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].state, TrialState::Complete);
    assert_eq!(records[0].best_iteration, None);
    assert_eq!(
        records[0].configuracion.mes_train,
        MonthSpec::Many(vec![202101, 202102])
    );
    assert_eq!(records[1].params["num_leaves"], ParamValue::Int(112));
    assert_eq!(records[1].params["learning_rate"], ParamValue::Float(0.018));

    let best = log.best_trial().unwrap();
    assert_eq!(best.trial_number, 1);
    assert_eq!(best.value, 52_860_000.0);
}

#[test]
fn appending_keeps_existing_entries() {
    let dir = tempfile::tempdir().unwrap();
    let log = TrialLog::for_study(dir.path(), "legacy");
    fs::write(log.path(), EXISTING_LOG).unwrap();

    let mut record = log.load().unwrap().remove(0);
    record.trial_number = 2;
    record.value = 1.0;
    record.best_iteration = Some(12);
    assert_eq!(log.append(&record).unwrap(), 3);

    let reread = log.load().unwrap();
    assert_eq!(reread.len(), 3);
    assert_eq!(reread[2], record);
    assert_eq!(reread[1].trial_number, 1);
}

#[test]
fn appending_leaves_existing_text_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let log = TrialLog::for_study(dir.path(), "legacy");
    let existing: serde_json::Value = serde_json::from_str(EXISTING_LOG).unwrap();
    let before = serde_json::to_string_pretty(&existing).unwrap();
    fs::write(log.path(), &before).unwrap();

    let mut record = log.load().unwrap().remove(1);
    record.trial_number = 2;
    log.append(&record).unwrap();

    let after = fs::read_to_string(log.path()).unwrap();
    let kept = before.strip_suffix("\n]").unwrap();
    assert!(after.starts_with(kept), "{after}");
    let first_entry = &after[..after.find("\"trial_number\": 1").unwrap()];
    let key_at = |key: &str| first_entry.find(&format!("\"{key}\"")).unwrap();
    assert!(key_at("trial_number") < key_at("params"));
    assert!(key_at("params") < key_at("value"));
    assert!(key_at("state") < key_at("configuración"));
    assert!(key_at("num_leaves") < key_at("learning_rate"));
}
