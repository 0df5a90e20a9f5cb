use assert_cmd::Command;
use predicates::str::contains;

#[test]
fn send_nonexistent_path_exits_nonzero() {
    Command::cargo_bin("hyperstream")
        .unwrap()
        .args(["send", "/nonexistent/path/definitely-missing"])
        .assert()
        .failure();
}

#[test]
fn receive_invalid_key_exits_nonzero_with_message() {
    Command::cargo_bin("hyperstream")
        .unwrap()
        .args(["receive", "not-a-valid-share-key"])
        .assert()
        .failure()
        .stderr(contains("invalid share key"));
}

#[test]
fn no_arguments_exits_nonzero() {
    Command::cargo_bin("hyperstream")
        .unwrap()
        .assert()
        .failure();
}
