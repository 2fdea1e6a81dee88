// End-to-end upgrade runs against isolated prefixes
//
// Old versions are installed through the real installer, newer versions are
// served from file:// bottles, and failures are injected with foreign files
// in the prefix or with the fakes in test_helpers.

mod test_helpers;

use decant::error::DecantError;
use decant::graph::DependencyResolver;
use decant::interrupt::Interrupt;
use decant::lifecycle::Tracker;
use decant::metadata::MetadataIndex;
use decant::package::{Artifact, DependencyKind, PackageId};
use decant::receipt::InstallReceipt;
use decant::symlink::{self, LinkState, PrefixLock};
use decant::upgrade::{Outcome, UpgradeOptions, Upgrader};
use std::fs;
use test_helpers::{
    CountingDownloader, FailingArtifacts, RejectingVerifier, TestEnvironment, UninstallFaults,
};

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn test_upgrade_all_outdated() {
    let env = TestEnvironment::new();
    env.install(env.formula("jq", "1.6")).await;
    env.install(env.formula("wget", "1.21")).await;

    let index = MetadataIndex::from_packages([env.formula("jq", "1.7.1"), env.formula("wget", "1.21")]);
    let downloader = CountingDownloader::new(&env.config);
    let upgrader = Upgrader::new(&env.config, &index, &downloader);

    let report = upgrader.upgrade(&[], &UpgradeOptions::default()).await.unwrap();

    assert!(matches!(report.outcome("jq"), Some(Outcome::Upgraded { .. })));
    assert!(report.outcome("wget").is_none(), "up to date packages are not selected");
    assert_eq!(report.exit_code(), 0);

    assert!(env.keg("jq", "1.7.1").exists());
    assert!(!env.keg("jq", "1.6").exists());
    assert_eq!(env.bin_contents("jq").as_deref(), Some("jq 1.7.1\n"));
    assert!(!env.config.cellar.join(".upgrade").exists());
}

#[tokio::test]
async fn test_dependency_committed_when_dependent_fails() {
    let env = TestEnvironment::new();
    env.install(env.formula("b", "1.0")).await;
    env.install(env.formula("a", "1.0").depends_on(PackageId::formula("b"), DependencyKind::Required))
        .await;

    let a2 = env
        .formula_with_files("a", "2.0", &["bin/a", "bin/a-extra"])
        .depends_on(PackageId::formula("b"), DependencyKind::Required);
    let index = MetadataIndex::from_packages([a2, env.formula("b", "2.0")]);

    // A file nobody owns blocks linking a 2.0
    fs::write(env.config.bindir.join("a-extra"), "not ours").unwrap();

    let downloader = CountingDownloader::new(&env.config);
    let upgrader = Upgrader::new(&env.config, &index, &downloader);
    let report = upgrader.upgrade(&[], &UpgradeOptions::default()).await.unwrap();

    // b installs first and stays committed
    let order: Vec<&str> = report.outcomes.iter().map(|o| o.id.name.as_str()).collect();
    assert_eq!(order, vec!["b", "a"]);
    assert!(matches!(report.outcome("b"), Some(Outcome::Upgraded { .. })));
    assert_eq!(env.bin_contents("b").as_deref(), Some("b 2.0\n"));

    // a is back at 1.0 and fully linked
    assert!(matches!(report.outcome("a"), Some(Outcome::Failed(_))));
    assert!(env.keg("a", "1.0").exists());
    assert!(!env.keg("a", "2.0").exists());
    assert_eq!(env.bin_contents("a").as_deref(), Some("a 1.0\n"));
    assert_eq!(fs::read_to_string(env.config.bindir.join("a-extra")).unwrap(), "not ours");
    assert_eq!(report.exit_code(), 1);
}

#[tokio::test]
async fn test_failed_dependency_skips_dependents() {
    let env = TestEnvironment::new();
    env.install(env.formula("b", "1.0")).await;
    env.install(env.formula("a", "1.0").depends_on(PackageId::formula("b"), DependencyKind::Required))
        .await;

    let a2 = env
        .formula("a", "2.0")
        .depends_on(PackageId::formula("b"), DependencyKind::Required);
    let b2 = env.formula_with_files("b", "2.0", &["bin/b", "bin/b-extra"]);
    let index = MetadataIndex::from_packages([a2, b2]);
    fs::write(env.config.bindir.join("b-extra"), "not ours").unwrap();

    let downloader = CountingDownloader::new(&env.config);
    let upgrader = Upgrader::new(&env.config, &index, &downloader);
    let report = upgrader.upgrade(&[], &UpgradeOptions::default()).await.unwrap();

    assert!(matches!(report.outcome("b"), Some(Outcome::Failed(_))));
    match report.outcome("a") {
        Some(Outcome::Failed(DecantError::DependencyFailed { dependency, .. })) => {
            assert_eq!(dependency, "b");
        }
        other => panic!("expected a dependency failure, got {other:?}"),
    }
    assert!(env.keg("a", "1.0").exists());
    assert!(!env.keg("a", "2.0").exists());
    assert_eq!(env.bin_contents("b").as_deref(), Some("b 1.0\n"));
}

#[tokio::test]
async fn test_independent_failures_do_not_spread() {
    let env = TestEnvironment::new();
    for name in ["aaa", "bbb", "ccc"] {
        env.install(env.formula(name, "1.0")).await;
    }

    let index = MetadataIndex::from_packages([
        env.formula("aaa", "2.0"),
        env.formula_with_files("bbb", "2.0", &["bin/bbb", "bin/bbb-tool"]),
        env.formula("ccc", "2.0"),
    ]);
    fs::write(env.config.bindir.join("bbb-tool"), "not ours").unwrap();

    let downloader = CountingDownloader::new(&env.config);
    let upgrader = Upgrader::new(&env.config, &index, &downloader);
    let report = upgrader.upgrade(&[], &UpgradeOptions::default()).await.unwrap();

    assert!(matches!(report.outcome("aaa"), Some(Outcome::Upgraded { .. })));
    assert!(matches!(report.outcome("bbb"), Some(Outcome::Failed(_))));
    assert!(matches!(report.outcome("ccc"), Some(Outcome::Upgraded { .. })));
    assert_eq!(report.exit_code(), 1);

    assert_eq!(env.bin_contents("aaa").as_deref(), Some("aaa 2.0\n"));
    assert_eq!(env.bin_contents("bbb").as_deref(), Some("bbb 1.0\n"));
    assert_eq!(env.bin_contents("ccc").as_deref(), Some("ccc 2.0\n"));
}

#[tokio::test]
async fn test_stage_failure_restores_old_keg() {
    let env = TestEnvironment::new();
    env.install(env.formula("jq", "1.6")).await;
    let before = Tracker::new(&env.config).installed(&PackageId::formula("jq")).unwrap().unwrap();

    let index = MetadataIndex::from_packages([env.formula("jq", "1.7.1")]);
    let downloader = CountingDownloader::new(&env.config);
    let upgrader = Upgrader::new(&env.config, &index, &downloader).with_verifier(RejectingVerifier {
        name: "jq".to_string(),
    });
    let report = upgrader.upgrade(&names(&["jq"]), &UpgradeOptions::default()).await.unwrap();

    assert!(matches!(
        report.outcome("jq"),
        Some(Outcome::Failed(DecantError::Checksum { .. }))
    ));
    let after = Tracker::new(&env.config).installed(&PackageId::formula("jq")).unwrap().unwrap();
    assert_eq!(after.version, before.version);
    assert_eq!(after.link, before.link);
    assert!(!env.keg("jq", "1.7.1").exists());
    assert!(!env.config.cellar.join(".staging").exists());
    assert_eq!(env.bin_contents("jq").as_deref(), Some("jq 1.6\n"));
}

#[tokio::test]
async fn test_fetch_failure_leaves_installation_untouched() {
    let env = TestEnvironment::new();
    env.install(env.formula("jq", "1.6")).await;
    env.install(env.formula("wget", "1.20")).await;

    let index = MetadataIndex::from_packages([env.formula("jq", "1.7.1"), env.formula("wget", "1.21")]);
    let downloader = CountingDownloader::new(&env.config);
    downloader.fail_for("jq");

    let upgrader = Upgrader::new(&env.config, &index, &downloader);
    let report = upgrader.upgrade(&[], &UpgradeOptions::default()).await.unwrap();

    assert!(matches!(report.outcome("jq"), Some(Outcome::Failed(DecantError::Fetch { .. }))));
    assert!(matches!(report.outcome("wget"), Some(Outcome::Upgraded { .. })));
    assert_eq!(env.bin_contents("jq").as_deref(), Some("jq 1.6\n"));
    assert_eq!(downloader.calls(), 2);
}

#[tokio::test]
async fn test_cask_partial_artifacts_are_unwound() {
    let env = TestEnvironment::new();
    env.install(env.cask("tool", "1.0")).await;

    let next = env.cask("tool", "2.0").with_artifact(Artifact::Binary {
        source: "tool-helper".to_string(),
        target: None,
    });
    let index = MetadataIndex::from_packages([next]);
    let downloader = CountingDownloader::new(&env.config);
    let upgrader = Upgrader::new(&env.config, &index, &downloader);
    let report = upgrader.upgrade(&[], &UpgradeOptions::default()).await.unwrap();

    // The second binary is missing from the payload
    match report.outcome("tool") {
        Some(Outcome::Failed(e)) => assert!(e.to_string().contains("is not there"), "{e}"),
        other => panic!("expected failure, got {other:?}"),
    }

    let caskroom = env.config.caskroom.join("tool");
    assert!(caskroom.join("1.0").exists());
    assert!(!caskroom.join("2.0").exists());
    assert!(caskroom.join(".metadata/1.0").exists());
    assert!(!caskroom.join(".upgrade").exists());
    assert_eq!(env.bin_contents("tool").as_deref(), Some("#!/bin/sh\necho tool 1.0\n"));

    let record = Tracker::new(&env.config).installed(&PackageId::cask("tool")).unwrap().unwrap();
    assert_eq!(record.version.to_string(), "1.0");
}

#[tokio::test]
async fn test_cask_artifact_failure_with_injected_installer() {
    let env = TestEnvironment::new();
    env.install(env.cask("tool", "1.0")).await;

    let index = MetadataIndex::from_packages([env.cask("tool", "2.0")]);
    let downloader = CountingDownloader::new(&env.config);
    let upgrader = Upgrader::new(&env.config, &index, &downloader)
        .with_artifacts(FailingArtifacts::new(&env.config, "tool"));
    let report = upgrader.upgrade(&names(&["tool"]), &UpgradeOptions::default()).await.unwrap();

    assert!(matches!(report.outcome("tool"), Some(Outcome::Failed(_))));
    assert_eq!(env.bin_contents("tool").as_deref(), Some("#!/bin/sh\necho tool 1.0\n"));
    assert!(!env.config.caskroom.join("tool/2.0").exists());
}

#[tokio::test]
async fn test_cask_upgrade_replaces_snapshot_and_artifacts() {
    let env = TestEnvironment::new();
    env.install(env.cask("tool", "1.0")).await;

    let index = MetadataIndex::from_packages([env.cask("tool", "2.0")]);
    let downloader = CountingDownloader::new(&env.config);
    let upgrader = Upgrader::new(&env.config, &index, &downloader);
    let report = upgrader.upgrade(&[], &UpgradeOptions::default()).await.unwrap();

    assert!(matches!(report.outcome("tool"), Some(Outcome::Upgraded { .. })));
    let caskroom = env.config.caskroom.join("tool");
    assert!(!caskroom.join("1.0").exists());
    assert!(!caskroom.join(".metadata/1.0").exists());
    assert!(caskroom.join(".metadata/2.0").exists());
    assert_eq!(env.bin_contents("tool").as_deref(), Some("#!/bin/sh\necho tool 2.0\n"));
}

#[tokio::test]
async fn test_pinned_package_is_never_mutated() {
    let env = TestEnvironment::new();
    env.install(env.formula("jq", "1.6")).await;
    let tracker = Tracker::new(&env.config);
    tracker.pin(&PackageId::formula("jq")).unwrap();

    let index = MetadataIndex::from_packages([env.formula("jq", "1.7.1")]);
    let downloader = CountingDownloader::new(&env.config);
    let upgrader = Upgrader::new(&env.config, &index, &downloader);

    let report = upgrader.upgrade(&[], &UpgradeOptions::default()).await.unwrap();
    assert!(matches!(report.outcome("jq"), Some(Outcome::SkippedPinned { .. })));
    assert_eq!(report.exit_code(), 1);
    assert_eq!(downloader.calls(), 0);
    assert!(env.keg("jq", "1.6").exists());
    assert!(!env.keg("jq", "1.7.1").exists());

    let options = UpgradeOptions {
        ignore_pinned: true,
        ..Default::default()
    };
    let report = upgrader.upgrade(&[], &options).await.unwrap();
    assert!(matches!(report.outcome("jq"), Some(Outcome::SkippedPinned { .. })));
    assert_eq!(report.exit_code(), 0);
    assert!(env.keg("jq", "1.6").exists());
}

#[tokio::test]
async fn test_dry_run_is_pure() {
    let env = TestEnvironment::new();
    env.install(env.formula("b", "1.0")).await;
    env.install(env.formula("a", "1.0").depends_on(PackageId::formula("b"), DependencyKind::Required))
        .await;

    let a2 = env
        .formula("a", "2.0")
        .depends_on(PackageId::formula("b"), DependencyKind::Required)
        .depends_on(PackageId::formula("c"), DependencyKind::Required);
    let index = MetadataIndex::from_packages([a2, env.formula("b", "2.0"), env.formula("c", "1.0")]);

    let tracker = Tracker::new(&env.config);
    let before = tracker.snapshot().unwrap();

    let downloader = CountingDownloader::new(&env.config);
    let upgrader = Upgrader::new(&env.config, &index, &downloader);
    let options = UpgradeOptions {
        dry_run: true,
        ..Default::default()
    };
    let report = upgrader.upgrade(&[], &options).await.unwrap();

    assert!(matches!(report.outcome("a"), Some(Outcome::WouldUpgrade { .. })));
    assert!(matches!(report.outcome("b"), Some(Outcome::WouldUpgrade { .. })));
    assert!(matches!(report.outcome("c"), Some(Outcome::WouldInstall { .. })));
    assert_eq!(report.exit_code(), 0);

    assert_eq!(downloader.calls(), 0);
    assert_eq!(tracker.snapshot().unwrap(), before);
}

#[tokio::test]
async fn test_missing_dependency_is_installed() {
    let env = TestEnvironment::new();
    env.install(env.formula("a", "1.0")).await;

    let a2 = env
        .formula("a", "2.0")
        .depends_on(PackageId::formula("c"), DependencyKind::Required)
        .depends_on(PackageId::formula("buildtool"), DependencyKind::Build);
    let index = MetadataIndex::from_packages([a2, env.formula("c", "1.0"), env.formula("buildtool", "1.0")]);

    let downloader = CountingDownloader::new(&env.config);
    let upgrader = Upgrader::new(&env.config, &index, &downloader);
    let report = upgrader.upgrade(&[], &UpgradeOptions::default()).await.unwrap();

    let order: Vec<&str> = report.outcomes.iter().map(|o| o.id.name.as_str()).collect();
    assert_eq!(order, vec!["c", "a"]);
    assert!(matches!(report.outcome("c"), Some(Outcome::Installed { .. })));
    assert!(report.outcome("buildtool").is_none());

    let receipt = InstallReceipt::read(&env.keg("c", "1.0")).unwrap();
    assert!(!receipt.installed_on_request);
    assert!(receipt.installed_as_dependency);

    let receipt = InstallReceipt::read(&env.keg("a", "2.0")).unwrap();
    assert!(receipt.installed_on_request);
    assert_eq!(receipt.runtime_dependencies.len(), 1);
}

#[tokio::test]
async fn test_skip_dependencies() {
    let env = TestEnvironment::new();
    env.install(env.formula("b", "1.0")).await;
    env.install(env.formula("a", "1.0")).await;

    let a2 = env
        .formula("a", "2.0")
        .depends_on(PackageId::formula("b"), DependencyKind::Required);
    let index = MetadataIndex::from_packages([a2, env.formula("b", "2.0")]);

    let downloader = CountingDownloader::new(&env.config);
    let upgrader = Upgrader::new(&env.config, &index, &downloader);
    let options = UpgradeOptions {
        skip_dependencies: true,
        ..Default::default()
    };
    let report = upgrader.upgrade(&names(&["a"]), &options).await.unwrap();

    assert!(matches!(report.outcome("a"), Some(Outcome::Upgraded { .. })));
    assert!(report.outcome("b").is_none());
    assert!(env.keg("b", "1.0").exists());
}

#[tokio::test]
async fn test_named_targets() {
    let env = TestEnvironment::new();
    env.install(env.formula("jq", "1.7.1")).await;

    let index = MetadataIndex::from_packages([env.formula("jq", "1.7.1"), env.formula("wget", "1.21")]);
    let downloader = CountingDownloader::new(&env.config);
    let upgrader = Upgrader::new(&env.config, &index, &downloader);

    let report = upgrader.upgrade(&names(&["jq", "wget"]), &UpgradeOptions::default()).await.unwrap();
    assert!(matches!(report.outcome("jq"), Some(Outcome::UpToDate { .. })));
    assert!(matches!(
        report.outcome("wget"),
        Some(Outcome::Failed(DecantError::NotInstalled(_)))
    ));
    assert_eq!(report.exit_code(), 1);

    let err = upgrader
        .upgrade(&names(&["jqq"]), &UpgradeOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, DecantError::Resolution { .. }));
    assert!(err.to_string().contains("Did you mean \"jq\"?"));
}

#[tokio::test]
async fn test_force_reinstalls_current_version() {
    let env = TestEnvironment::new();
    env.install(env.formula("jq", "1.7.1")).await;

    let index = MetadataIndex::from_packages([env.formula("jq", "1.7.1")]);
    let downloader = CountingDownloader::new(&env.config);
    let upgrader = Upgrader::new(&env.config, &index, &downloader);
    let options = UpgradeOptions {
        force: true,
        ..Default::default()
    };
    let report = upgrader.upgrade(&names(&["jq"]), &options).await.unwrap();

    assert!(matches!(report.outcome("jq"), Some(Outcome::Upgraded { .. })));
    assert!(env.keg("jq", "1.7.1").exists());
    assert_eq!(env.bin_contents("jq").as_deref(), Some("jq 1.7.1\n"));
}

#[tokio::test]
async fn test_conflict_blocks_upgrade() {
    let env = TestEnvironment::new();
    env.install(env.formula("jq", "1.6")).await;
    env.install(env.formula("gojq", "0.12")).await;

    let jq = env.formula("jq", "1.7.1").conflicts_with(PackageId::formula("gojq"));
    let index = MetadataIndex::from_packages([jq, env.formula("gojq", "0.12")]);
    let downloader = CountingDownloader::new(&env.config);
    let upgrader = Upgrader::new(&env.config, &index, &downloader);
    let report = upgrader.upgrade(&[], &UpgradeOptions::default()).await.unwrap();

    match report.outcome("jq") {
        Some(Outcome::Failed(e @ DecantError::Conflict { .. })) => {
            assert_eq!(e.category().to_string(), "conflict");
        }
        other => panic!("expected a conflict, got {other:?}"),
    }
    assert!(env.keg("jq", "1.6").exists());
    assert_eq!(env.bin_contents("jq").as_deref(), Some("jq 1.6\n"));
}

#[tokio::test]
async fn test_cycle_aborts_before_mutation() {
    let env = TestEnvironment::new();
    env.install(env.formula("a", "1.0")).await;
    env.install(env.formula("b", "1.0")).await;

    let a2 = env.formula("a", "2.0").depends_on(PackageId::formula("b"), DependencyKind::Required);
    let b2 = env.formula("b", "2.0").depends_on(PackageId::formula("a"), DependencyKind::Required);
    let index = MetadataIndex::from_packages([a2, b2]);

    let tracker = Tracker::new(&env.config);
    let before = tracker.snapshot().unwrap();

    let downloader = CountingDownloader::new(&env.config);
    let upgrader = Upgrader::new(&env.config, &index, &downloader);
    let err = upgrader.upgrade(&[], &UpgradeOptions::default()).await.unwrap_err();

    assert!(matches!(err, DecantError::Cycle { .. }));
    assert_eq!(downloader.calls(), 0);
    assert_eq!(tracker.snapshot().unwrap(), before);
}

#[tokio::test]
async fn test_interrupt_stops_before_swapping() {
    let env = TestEnvironment::new();
    env.install(env.formula("jq", "1.6")).await;

    let index = MetadataIndex::from_packages([env.formula("jq", "1.7.1")]);
    let downloader = CountingDownloader::new(&env.config);
    let interrupt = Interrupt::new();
    interrupt.trigger();

    let upgrader = Upgrader::new(&env.config, &index, &downloader).with_interrupt(interrupt);
    let report = upgrader.upgrade(&[], &UpgradeOptions::default()).await.unwrap();

    assert!(matches!(report.outcome("jq"), Some(Outcome::Failed(DecantError::Interrupted))));
    assert!(env.keg("jq", "1.6").exists());
    assert!(!env.keg("jq", "1.7.1").exists());
}

#[tokio::test]
async fn test_used_options_carry_forward() {
    let env = TestEnvironment::new();
    env.install(env.formula("jq", "1.6")).await;

    // Rewrite the receipt as if installed with a non-default option
    let keg = env.keg("jq", "1.6");
    let mut receipt = InstallReceipt::read(&keg).unwrap();
    receipt.used_options = vec!["--with-oniguruma".to_string()];
    receipt.installed_on_request = false;
    receipt.write(&keg).unwrap();

    let index = MetadataIndex::from_packages([env.formula("jq", "1.7.1")]);
    assert!(index.find("jq").is_ok());
    let downloader = CountingDownloader::new(&env.config);
    let upgrader = Upgrader::new(&env.config, &index, &downloader);
    upgrader.upgrade(&[], &UpgradeOptions::default()).await.unwrap();

    let receipt = InstallReceipt::read(&env.keg("jq", "1.7.1")).unwrap();
    assert_eq!(receipt.used_options, vec!["--with-oniguruma".to_string()]);
    assert!(!receipt.installed_on_request);
}

#[tokio::test]
async fn test_newer_unlinked_keg_is_up_to_date() {
    let env = TestEnvironment::new();
    env.install(env.formula("jq", "1.6")).await;

    // 1.7.1 sits in the Cellar, but 1.6 is the linked keg
    let newer = env.keg("jq", "1.7.1");
    fs::create_dir_all(newer.join("bin")).unwrap();
    fs::write(newer.join("bin/jq"), "jq 1.7.1\n").unwrap();

    let index = MetadataIndex::from_packages([env.formula("jq", "1.7.1")]);
    let downloader = CountingDownloader::new(&env.config);
    let upgrader = Upgrader::new(&env.config, &index, &downloader);

    for _ in 0..2 {
        let report = upgrader.upgrade(&[], &UpgradeOptions::default()).await.unwrap();
        assert!(report.outcome("jq").is_none());
        assert_eq!(report.exit_code(), 0);
    }

    let report = upgrader.upgrade(&names(&["jq"]), &UpgradeOptions::default()).await.unwrap();
    match report.outcome("jq") {
        Some(Outcome::UpToDate { version }) => assert_eq!(version.to_string(), "1.7.1"),
        other => panic!("expected up to date, got {other:?}"),
    }

    assert_eq!(downloader.calls(), 0);
    assert!(newer.exists());
    assert_eq!(env.bin_contents("jq").as_deref(), Some("jq 1.6\n"));
}

#[tokio::test]
async fn test_unrestorable_old_version_is_inconsistent() {
    let env = TestEnvironment::new();
    env.install(env.cask("tool", "1.0")).await;

    // The helper is missing from the payload, and removing the new binary
    // silently does nothing, so the old one cannot be moved back
    let next = env.cask("tool", "2.0").with_artifact(Artifact::Binary {
        source: "tool-helper".to_string(),
        target: None,
    });
    let index = MetadataIndex::from_packages([next]);
    let downloader = CountingDownloader::new(&env.config);
    let upgrader = Upgrader::new(&env.config, &index, &downloader)
        .with_artifacts(UninstallFaults::ignoring(&env.config));
    let report = upgrader.upgrade(&[], &UpgradeOptions::default()).await.unwrap();

    match report.outcome("tool") {
        Some(Outcome::Failed(e)) => {
            assert!(e.is_inconsistent(), "{e}");
            assert_eq!(e.category().to_string(), "revert");
            assert!(e.to_string().contains("occupied"), "{e}");
            assert!(e.to_string().contains("manual intervention"), "{e}");
        }
        other => panic!("expected a revert failure, got {other:?}"),
    }
    assert_eq!(report.exit_code(), 1);
}

#[tokio::test]
async fn test_recovered_rollback_is_an_ordinary_failure() {
    let env = TestEnvironment::new();
    env.install(env.cask("tool", "1.0")).await;

    let next = env.cask("tool", "2.0").with_artifact(Artifact::Binary {
        source: "tool-helper".to_string(),
        target: None,
    });
    let index = MetadataIndex::from_packages([next]);
    let downloader = CountingDownloader::new(&env.config);
    // The installer's own cleanup fails once; the retry succeeds
    let upgrader = Upgrader::new(&env.config, &index, &downloader)
        .with_artifacts(UninstallFaults::failing(&env.config, 1));
    let report = upgrader.upgrade(&[], &UpgradeOptions::default()).await.unwrap();

    match report.outcome("tool") {
        Some(Outcome::Failed(e)) => {
            assert!(!e.is_inconsistent(), "{e}");
            assert_eq!(e.category().to_string(), "install");
            assert!(e.to_string().contains("is not there"), "{e}");
        }
        other => panic!("expected an install failure, got {other:?}"),
    }

    let caskroom = env.config.caskroom.join("tool");
    assert!(caskroom.join("1.0").exists());
    assert!(!caskroom.join("2.0").exists());
    assert!(!caskroom.join(".upgrade").exists());
    assert_eq!(env.bin_contents("tool").as_deref(), Some("#!/bin/sh\necho tool 1.0\n"));
}

#[tokio::test]
async fn test_unlinked_keg_stays_unlinked_after_upgrade() {
    let env = TestEnvironment::new();
    env.install(env.formula("jq", "1.6")).await;
    {
        let lock = PrefixLock::acquire(&env.config).unwrap();
        Tracker::new(&env.config).unlink("jq", "1.6", &lock).unwrap();
    }
    assert!(env.bin_contents("jq").is_none());

    let index = MetadataIndex::from_packages([env.formula("jq", "1.7.1")]);
    let downloader = CountingDownloader::new(&env.config);
    let upgrader = Upgrader::new(&env.config, &index, &downloader);
    let report = upgrader.upgrade(&[], &UpgradeOptions::default()).await.unwrap();

    assert!(matches!(report.outcome("jq"), Some(Outcome::Upgraded { .. })));
    assert_eq!(symlink::link_state(&env.config, "jq", "1.7.1"), LinkState::OptLinked);
    assert_eq!(symlink::linked_version(&env.config, "jq").as_deref(), Some("1.7.1"));
    assert!(env.bin_contents("jq").is_none());
    assert!(!env.keg("jq", "1.6").exists());
}
