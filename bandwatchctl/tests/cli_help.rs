use assert_cmd::cargo::cargo_bin_cmd;

fn help_text(args: &[&str]) -> String {
    let mut cmd = cargo_bin_cmd!("bandwatchctl");
    let output = cmd
        .args(args)
        .arg("--help")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    String::from_utf8_lossy(&output).into_owned()
}

#[test]
fn top_level_help_lists_commands() {
    let text = help_text(&[]);
    for command in ["measure", "measure-if-breached", "status", "list", "cleanup", "archive"] {
        assert!(text.contains(command), "help missing '{command}'");
    }
}

#[test]
fn measure_help_mentions_options() {
    let text = help_text(&["measure"]);
    assert!(text.contains("--reason"), "measure help missing --reason");
    assert!(text.contains("--result-id"), "measure help missing --result-id");
}

#[test]
fn breach_help_mentions_speeds() {
    let text = help_text(&["measure-if-breached"]);
    assert!(text.contains("--download"));
    assert!(text.contains("--upload"));
    assert!(text.contains("--dry-run"));
}

#[test]
fn status_rejects_malformed_ids() {
    let mut cmd = cargo_bin_cmd!("bandwatchctl");
    cmd.args(["status", "not-a-uuid"]).assert().failure();
}
