//! Settings and policy files on disk.

use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use tempfile::NamedTempFile;

use sysinstall::engine::size::{GB, MB};
use sysinstall::{
    FakeBackend, Filesystem, FirmwareMode, HomePolicy, InstallSettings, PartitionProvisioner,
    PolicyConfig,
};

fn write_temp(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("tempfile"); // test: known-good input
    file.write_all(content.as_bytes()).expect("write"); // test: known-good input
    file.flush().expect("flush"); // test: known-good input
    file
}

#[test]
fn settings_round_trip_through_provisioning() {
    let file = write_temp(
        r#"{
            "AUTO_PART": true,
            "ROOT": "/dev/sda",
            "EFI": "NULL",
            "HOME": "MAKE",
            "SWAP": "FILE",
            "LANG": "en_US.UTF-8",
            "USERNAME": "drew"
        }"#,
    );

    let mut settings = InstallSettings::load_from_file(file.path()).expect("load"); // test: known-good input
    settings.validate().expect("valid"); // test: known-good input
    assert_eq!(settings.home_policy(), HomePolicy::MakeNew);

    let fake = FakeBackend::new().with_disk("/dev/sda", 64 * GB);
    let mut policy = PolicyConfig::defaults(FirmwareMode::Uefi);
    policy.settle_delay = Duration::ZERO;
    let result = PartitionProvisioner::new(&fake, &policy, 8 * GB)
        .plan_and_provision(&settings.to_request(FirmwareMode::Uefi))
        .expect("provision"); // test: known-good input

    settings.apply_result(&result);
    settings.save_to_file(file.path()).expect("save"); // test: known-good input

    let reloaded = InstallSettings::load_from_file(file.path()).expect("reload"); // test: known-good input
    assert_eq!(reloaded.root, "/dev/sda2");
    assert_eq!(reloaded.efi.as_deref(), Some("/dev/sda1"));
    assert_eq!(reloaded.home.as_deref(), Some("/dev/sda3"));
    assert_eq!(reloaded.home_policy(), HomePolicy::ExistingPath(PathBuf::from("/dev/sda3")));
    assert_eq!(reloaded.extra["LANG"], "en_US.UTF-8");
    assert_eq!(reloaded.extra["USERNAME"], "drew");
}

#[test]
fn bios_result_writes_null_efi() {
    let file = write_temp(r#"{"AUTO_PART": true, "ROOT": "/dev/sda", "HOME": "NULL"}"#);
    let mut settings = InstallSettings::load_from_file(file.path()).expect("load"); // test: known-good input

    let fake = FakeBackend::new().with_disk("/dev/sda", 64 * GB);
    let mut policy = PolicyConfig::defaults(FirmwareMode::Bios);
    policy.settle_delay = Duration::ZERO;
    let result = PartitionProvisioner::new(&fake, &policy, 4 * GB)
        .plan_and_provision(&settings.to_request(FirmwareMode::Bios))
        .expect("provision"); // test: known-good input

    settings.apply_result(&result);
    assert_eq!(settings.root, "/dev/sda1");
    assert_eq!(settings.efi.as_deref(), Some("NULL"));
    assert_eq!(settings.home.as_deref(), Some("NULL"));
}

#[test]
fn load_missing_settings_file_fails() {
    assert!(InstallSettings::load_from_file("/nonexistent/settings.json").is_err());
}

#[test]
fn load_invalid_settings_json_fails() {
    let file = write_temp("{ not json }");
    assert!(InstallSettings::load_from_file(file.path()).is_err());
}

#[test]
fn policy_file_overrides_only_its_firmware_section() {
    let file = write_temp(
        r#"{
            "uefi": { "efi_size": "512M", "root_split": 40, "home_filesystem": "ext4" },
            "bios": { "min_root_size_mb": 30000 }
        }"#,
    );

    let uefi = PolicyConfig::load(file.path(), FirmwareMode::Uefi).expect("uefi"); // test: known-good input
    assert_eq!(uefi.efi_size.resolve(64 * GB), 512 * MB);
    assert_eq!(uefi.root_split, 40.0);
    assert_eq!(uefi.home_filesystem, Filesystem::Ext4);
    assert_eq!(uefi.min_root_floor, 23_000 * MB);

    let bios = PolicyConfig::load(file.path(), FirmwareMode::Bios).expect("bios"); // test: known-good input
    assert_eq!(bios.min_root_floor, 30_000 * MB);
    assert_eq!(bios.root_split, 35.0);
}

#[test]
fn invalid_policy_is_rejected_on_load() {
    let file = write_temp(r#"{ "uefi": { "limiter_gb": 200, "mdswh_gb": 100 } }"#);
    assert!(PolicyConfig::load(file.path(), FirmwareMode::Uefi).is_err());
}
