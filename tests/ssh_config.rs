//! Integration tests for parsing real config trees and resolving hosts.

use std::fs;

use persistent_ssh_agent::ssh_config::{parse, resolve};
use persistent_ssh_agent::Error;
use tempfile::TempDir;

fn write_tree(files: &[(&str, &str)]) -> TempDir {
    let dir = TempDir::new().unwrap();
    for (name, content) in files {
        let path = dir.path().join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }
    dir
}

#[test]
fn test_layered_config_resolves_like_ssh() {
    let dir = write_tree(&[
        (
            "config",
            "Include config.d/*\n\
             \n\
             Host github.com\n\
             \x20 HostName ssh.github.com\n\
             \x20 Port 443\n\
             \x20 IdentityFile ~/.ssh/github\n\
             \n\
             Host *.internal !bastion.internal\n\
             \x20 ProxyJump bastion.internal\n\
             \n\
             Host *\n\
             \x20 Port 22\n\
             \x20 User git\n\
             \x20 IdentityFile ~/.ssh/id_ed25519\n\
             \x20 ServerAliveInterval 60\n",
        ),
        ("config.d/work", "Host *.corp.example.com\n  User alice\n  Port 2222\n"),
    ]);
    let rules = parse(&dir.path().join("config")).unwrap();

    let gh = resolve(&rules, "github.com", "me");
    assert_eq!(gh.hostname(), "ssh.github.com");
    assert_eq!(gh.port(), Some(443));
    assert_eq!(gh.user(), Some("git"));
    assert_eq!(gh.list("IdentityFile"), ["~/.ssh/github", "~/.ssh/id_ed25519"]);

    let corp = resolve(&rules, "build.corp.example.com", "me");
    assert_eq!(corp.port(), Some(2222));
    assert_eq!(corp.user(), Some("alice"));

    assert_eq!(resolve(&rules, "db.internal", "me").get("ProxyJump"), Some("bastion.internal"));
    assert_eq!(resolve(&rules, "bastion.internal", "me").get("ProxyJump"), None);

    let other = resolve(&rules, "example.org", "me");
    assert_eq!(other.hostname(), "example.org");
    assert_eq!(other.get("serveraliveinterval"), Some("60"));
}

#[test]
fn test_match_user_sees_user_from_earlier_block() {
    let dir = write_tree(&[(
        "config",
        "Host deploy\n  User ops\n\nMatch user ops\n  IdentityFile ~/.ssh/ops\n\nMatch user me\n  IdentityFile ~/.ssh/mine\n",
    )]);
    let rules = parse(&dir.path().join("config")).unwrap();

    assert_eq!(resolve(&rules, "deploy", "me").list("IdentityFile"), ["~/.ssh/ops"]);
    assert_eq!(resolve(&rules, "other", "me").list("IdentityFile"), ["~/.ssh/mine"]);
}

#[test]
fn test_include_cycle_across_files_is_rejected() {
    let dir = write_tree(&[
        ("config", "Include a.conf\n"),
        ("a.conf", "Host a\n  Port 1\nInclude b.conf\n"),
        ("b.conf", "Host b\n  Port 2\nInclude a.conf\n"),
    ]);

    let err = parse(&dir.path().join("config")).unwrap_err();
    match err {
        Error::ConfigSyntax { path, line, .. } => {
            assert!(path.ends_with("b.conf"), "reported {}", path.display());
            assert_eq!(line, 3);
        }
        other => panic!("expected syntax error, got {other:?}"),
    }
}

#[test]
fn test_syntax_error_reports_file_and_line() {
    let dir = write_tree(&[("config", "Host ok\n  Port 22\nHost\n")]);
    let err = parse(&dir.path().join("config")).unwrap_err();
    assert!(matches!(err, Error::ConfigSyntax { line: 3, .. }), "got {err:?}");
    assert!(err.to_string().contains("config"));
}
