//! CLI argument parsing tests
//!
//! These tests only exercise clap parsing and the commands that need no
//! browser; anything that connects is pointed at a port nobody listens on.

#![allow(deprecated)]

use assert_cmd::Command;
use predicates::prelude::*;

/// Get the nodemark binary command with an isolated config directory
fn nodemark() -> Command {
    let mut cmd = Command::cargo_bin("nodemark").unwrap();
    cmd.env_remove("NODEMARK_CDP").env_remove("NODEMARK_PROFILE");
    cmd
}

mod help {
    use super::*;

    #[test]
    fn shows_help() {
        nodemark()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("nodemark"))
            .stdout(predicate::str::contains("resolve"))
            .stdout(predicate::str::contains("tree"));
    }

    #[test]
    fn shows_version() {
        nodemark()
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("nodemark"));
    }

    #[test]
    fn global_flags_listed() {
        nodemark()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("--cdp"))
            .stdout(predicate::str::contains("--json"))
            .stdout(predicate::str::contains("--timeout"));
    }
}

mod resolve_command {
    use super::*;

    #[test]
    fn resolve_requires_tab() {
        nodemark()
            .arg("resolve")
            .assert()
            .failure()
            .stderr(predicate::str::contains("<TAB>"));
    }

    #[test]
    fn resolve_requires_backend_ids() {
        nodemark()
            .args(["resolve", "TAB1"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("BACKEND_NODE_IDS"));
    }

    #[test]
    fn resolve_rejects_non_numeric_ids() {
        nodemark()
            .args(["resolve", "TAB1", "abc"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("invalid"));
    }
}

mod click_and_fill {
    use super::*;

    #[test]
    fn click_requires_node_or_selector() {
        nodemark()
            .args(["click", "TAB1"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("--node"));
    }

    #[test]
    fn click_rejects_both_node_and_selector() {
        nodemark()
            .args(["click", "TAB1", "--node", "5", "--selector", "#go"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("cannot be used with"));
    }

    #[test]
    fn fill_requires_text() {
        nodemark()
            .args(["fill", "TAB1", "--selector", "#email"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("<TEXT>"));
    }

    #[test]
    fn fill_help_shows_options() {
        nodemark()
            .args(["fill", "--help"])
            .assert()
            .success()
            .stdout(predicate::str::contains("--node"))
            .stdout(predicate::str::contains("--selector"));
    }
}

mod tree_command {
    use super::*;

    #[test]
    fn tree_help_shows_all_flag() {
        nodemark()
            .args(["tree", "--help"])
            .assert()
            .success()
            .stdout(predicate::str::contains("--all"));
    }
}

mod connection_errors {
    use super::*;

    #[test]
    fn unreachable_port_fails_cleanly() {
        let config_dir = tempfile::tempdir().unwrap();
        nodemark()
            .env("XDG_CONFIG_HOME", config_dir.path())
            .env("HOME", config_dir.path())
            .args(["--cdp", "1", "tabs"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Cannot reach CDP"));
    }

    #[test]
    fn invalid_endpoint_is_rejected() {
        let config_dir = tempfile::tempdir().unwrap();
        nodemark()
            .env("XDG_CONFIG_HOME", config_dir.path())
            .env("HOME", config_dir.path())
            .args(["--cdp", "not-an-endpoint", "eval", "TAB1", "1"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid endpoint"));
    }
}

mod config_command {
    use super::*;

    #[test]
    fn config_requires_subcommand() {
        nodemark()
            .arg("config")
            .assert()
            .failure()
            .stderr(predicate::str::contains("subcommand"));
    }

    #[test]
    fn config_path_points_at_nodemark_dir() {
        let config_dir = tempfile::tempdir().unwrap();
        nodemark()
            .env("XDG_CONFIG_HOME", config_dir.path())
            .env("HOME", config_dir.path())
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("nodemark"))
            .stdout(predicate::str::contains("config.toml"));
    }

    #[test]
    fn config_show_json_has_defaults() {
        let config_dir = tempfile::tempdir().unwrap();
        nodemark()
            .env("XDG_CONFIG_HOME", config_dir.path())
            .env("HOME", config_dir.path())
            .args(["config", "show", "--json"])
            .assert()
            .success()
            .stdout(predicate::str::contains("\"protocol_version\": \"1.3\""))
            .stdout(predicate::str::contains("\"enable_dom_on_attach\": true"));
    }

    #[test]
    fn config_get_unknown_key_fails() {
        let config_dir = tempfile::tempdir().unwrap();
        nodemark()
            .env("XDG_CONFIG_HOME", config_dir.path())
            .env("HOME", config_dir.path())
            .args(["config", "get", "api.key"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Unknown config key"));
    }
}
