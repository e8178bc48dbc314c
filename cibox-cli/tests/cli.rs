use predicates::prelude::*;
use rstest::rstest;

mod common;

#[test]
fn test_help_lists_subcommands() {
    common::cibox()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("inspect"))
        .stdout(predicate::str::contains("bases"))
        .stdout(predicate::str::contains("completion").not());
}

#[rstest]
#[case("run")]
#[case("list")]
#[case("inspect")]
#[case("destroy")]
#[case("bases")]
fn test_subcommand_help(#[case] sub: &str) {
    common::cibox().args([sub, "--help"]).assert().success();
}

#[test]
fn test_run_requires_a_base() {
    common::cibox().arg("run").assert().failure().code(2);
}

#[test]
fn test_malformed_set_env_is_a_usage_error() {
    let ctx = common::TestContext::new();
    ctx.cmd()
        .args(["run", "ubuntu-base", "--set-env", "NO_EQUALS_SIGN"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("KEY=VALUE"));
}

#[test]
fn test_missing_config_file_fails_setup() {
    let ctx = common::TestContext::new();
    common::cibox()
        .arg("--config")
        .arg(ctx.root().join("absent.json"))
        .arg("list")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("absent.json"));
}

#[test]
fn test_config_from_environment() {
    let ctx = common::TestContext::new();
    common::cibox()
        .env("CIBOX_CONFIG", ctx.root().join("absent.json"))
        .arg("list")
        .assert()
        .code(2);
}

#[test]
fn test_relative_store_is_rejected() {
    let ctx = common::TestContext::new();
    let config = ctx.root().join("relative.json");
    std::fs::write(&config, r#"{ "runtime_store": "lxc" }"#).unwrap();

    common::cibox()
        .arg("--config")
        .arg(&config)
        .arg("bases")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("absolute"));
}

#[rstest]
#[case(&["list"])]
#[case(&["ls"])]
#[case(&["list", "--store", "runtime"])]
#[case(&["list", "--tag", "nightly"])]
#[case(&["bases"])]
#[case(&["destroy"])]
fn test_empty_stores_print_nothing(#[case] args: &[&str]) {
    let ctx = common::TestContext::new();
    ctx.cmd().args(args).assert().success().stdout("");
}

#[test]
fn test_list_json_of_empty_store() {
    let ctx = common::TestContext::new();
    ctx.cmd()
        .args(["list", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[]"));
}

#[test]
fn test_list_rejects_unknown_store() {
    let ctx = common::TestContext::new();
    ctx.cmd()
        .args(["list", "--store", "attic"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("unknown store"));
}

#[test]
fn test_run_with_unknown_base_fails_setup() {
    let ctx = common::TestContext::new();
    ctx.cmd()
        .args(["run", "no-such-base", "-c", "true"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("no-such-base"));
}

#[test]
fn test_inspect_unknown_container_fails() {
    let ctx = common::TestContext::new();
    ctx.cmd()
        .args(["inspect", "job-1", "--meta"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("job-1"));
}

#[rstest]
#[case("bash")]
#[case("zsh")]
#[case("fish")]
fn test_completion_scripts(#[case] shell: &str) {
    common::cibox()
        .args(["completion", shell])
        .assert()
        .success()
        .stdout(predicate::str::contains("cibox"));
}
