//! Integration tests for omni-setup

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;

    fn omni_setup() -> Command {
        cargo_bin_cmd!("omni-setup")
    }

    #[test]
    fn help_displays() {
        omni_setup()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("CI installer for the omni CLI"));
    }

    #[test]
    fn version_displays() {
        omni_setup()
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("omni-setup"));
    }

    #[test]
    fn run_help_lists_inputs() {
        omni_setup()
            .args(["run", "--help"])
            .assert()
            .success()
            .stdout(
                predicate::str::contains("--cache-key-prefix")
                    .and(predicate::str::contains("--up-retries"))
                    .and(predicate::str::contains("--check-patterns")),
            );
    }

    #[test]
    fn run_rejects_bad_boolean_input() {
        omni_setup()
            .args(["run", "--cache", "maybe"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("invalid boolean input"));
    }

    #[test]
    fn run_rejects_bad_retry_count() {
        omni_setup()
            .args(["run", "--up-retries", "lots"])
            .assert()
            .failure();
    }

    #[test]
    fn post_without_cache_state_skips_save() {
        // With no persisted cache-enabled flag the post phase is a no-op
        omni_setup()
            .arg("post")
            .env_remove("STATE_CACHE")
            .env_remove("GITHUB_STATE")
            .assert()
            .success();
    }

    #[test]
    fn unknown_subcommand_fails() {
        omni_setup().arg("frobnicate").assert().failure();
    }
}
