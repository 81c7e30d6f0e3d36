use std::env;
use std::path::Path;
use std::sync::{Mutex, OnceLock};

use ladder_cli::commands::{config, doctor, history, migrate, seed};
use serde_json::Value;

#[test]
fn migrate_returns_success_with_valid_env() {
    with_env(
        &[("LADDER_DATABASE_URL", "sqlite::memory:"), ("LADDER_DATABASE_MAX_CONNECTIONS", "1")],
        || {
            let result = migrate::run();
            assert_eq!(result.exit_code, 0, "expected successful migrate run");

            let payload = parse_payload(&result.output);
            assert_eq!(payload["command"], "migrate");
            assert_eq!(payload["status"], "ok");
        },
    );
}

#[test]
fn migrate_returns_config_failure_for_invalid_skeleton_size() {
    with_env(&[("LADDER_WORKFLOW_SKELETON_LEVELS", "0")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 2, "expected config validation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
        let message = payload["message"].as_str().unwrap_or_default();
        assert!(message.contains("workflow.skeleton_levels"), "{message}");
    });
}

#[test]
fn seed_is_idempotent_across_runs() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = file_url(&dir.path().join("seed.db"));

    with_env(&[("LADDER_DATABASE_URL", url.as_str())], || {
        let first = seed::run();
        assert_eq!(first.exit_code, 0, "expected first seed invocation success");
        let first_payload = parse_payload(&first.output);
        assert_eq!(first_payload["command"], "seed");
        assert_eq!(first_payload["status"], "ok");
        let first_message = first_payload["message"].as_str().unwrap_or_default();
        assert!(first_message.contains("7 created, 0 already present"), "{first_message}");

        let second = seed::run();
        assert_eq!(second.exit_code, 0, "expected second seed invocation success");
        let second_payload = parse_payload(&second.output);
        let second_message = second_payload["message"].as_str().unwrap_or_default();
        assert!(second_message.contains("0 created, 7 already present"), "{second_message}");
        assert!(second_message.contains("import:import_payment:foreign"));
    });
}

#[test]
fn doctor_flags_pending_migrations_until_migrate_runs() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = file_url(&dir.path().join("doctor.db"));

    with_env(&[("LADDER_DATABASE_URL", url.as_str())], || {
        let before = doctor::run(true);
        assert_eq!(before.exit_code, 1);
        let report = parse_payload(&before.output);
        assert_eq!(report["overall_status"], "fail");
        assert_eq!(check_status(&report, "database_connectivity"), "pass");
        assert_eq!(check_status(&report, "migrations_current"), "fail");

        assert_eq!(migrate::run().exit_code, 0);

        let after = doctor::run(true);
        assert_eq!(after.exit_code, 0, "{}", after.output);
        let report = parse_payload(&after.output);
        assert_eq!(report["overall_status"], "pass");
        assert_eq!(check_status(&report, "migrations_current"), "pass");
    });
}

#[test]
fn doctor_skips_database_checks_when_config_is_invalid() {
    with_env(&[("LADDER_LOG_FORMAT", "xml")], || {
        let result = doctor::run(false);
        assert_eq!(result.exit_code, 1);
        assert!(result.output.contains("- [fail] config_validation"), "{}", result.output);
        assert!(result.output.contains("- [skip] database_connectivity"));
        assert!(result.output.contains("- [skip] migrations_current"));
    });
}

#[test]
fn history_refuses_an_unmigrated_database() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = file_url(&dir.path().join("history.db"));

    with_env(&[("LADDER_DATABASE_URL", url.as_str())], || {
        let result = history::run("REQ-does-not-exist");
        assert_eq!(result.exit_code, 5);
        let payload = parse_payload(&result.output);
        assert_eq!(payload["error_class"], "migration_pending");
        let message = payload["message"].as_str().unwrap_or_default();
        assert!(message.contains("ladder migrate"), "{message}");

        // still unmigrated afterwards
        let report = parse_payload(&doctor::run(true).output);
        assert_eq!(check_status(&report, "migrations_current"), "fail");
    });
}

#[test]
fn history_reports_unknown_request() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = file_url(&dir.path().join("history.db"));

    with_env(&[("LADDER_DATABASE_URL", url.as_str())], || {
        assert_eq!(migrate::run().exit_code, 0);

        let result = history::run("REQ-does-not-exist");
        assert_eq!(result.exit_code, 6);
        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "history");
        assert_eq!(payload["error_class"], "not_found");
    });
}

#[test]
fn config_output_redacts_api_token_and_names_sources() {
    with_env(
        &[("LADDER_CLIENT_API_TOKEN", "ldr-supersecret"), ("LADDER_WORKFLOW_SKELETON_LEVELS", "6")],
        || {
            let output = config::run();

            assert!(!output.contains("supersecret"), "{output}");
            assert!(output
                .contains("- client.api_token = ldr-*** (source: env (LADDER_CLIENT_API_TOKEN))"));
            assert!(output.contains(
                "- workflow.skeleton_levels = 6 (source: env (LADDER_WORKFLOW_SKELETON_LEVELS))"
            ));
            assert!(output.contains("- server.port = 8080 (source: default)"));
        },
    );
}

fn check_status(report: &Value, name: &str) -> String {
    report["checks"]
        .as_array()
        .and_then(|checks| checks.iter().find(|check| check["name"] == name))
        .and_then(|check| check["status"].as_str())
        .unwrap_or_default()
        .to_owned()
}

fn file_url(path: &Path) -> String {
    format!("sqlite://{}?mode=rwc", path.display())
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard = ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());

    let keys = [
        "LADDER_DATABASE_URL",
        "LADDER_DATABASE_MAX_CONNECTIONS",
        "LADDER_DATABASE_TIMEOUT_SECS",
        "LADDER_SERVER_BIND_ADDRESS",
        "LADDER_SERVER_PORT",
        "LADDER_SERVER_GRACEFUL_SHUTDOWN_SECS",
        "LADDER_WORKFLOW_SKELETON_LEVELS",
        "LADDER_CLIENT_BASE_URL",
        "LADDER_CLIENT_API_TOKEN",
        "LADDER_CLIENT_TIMEOUT_SECS",
        "LADDER_LOGGING_LEVEL",
        "LADDER_LOGGING_FORMAT",
        "LADDER_LOG_LEVEL",
        "LADDER_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
