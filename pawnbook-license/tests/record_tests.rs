mod common;

use common::*;
use pawnbook_license::{
    ErrorKind, LicenseConfig, LicenseStatus, LocalLicenseRecord, MachineFingerprint,
    RemoteLicenseRecord, ValidationResult, DAY_MS,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::path::PathBuf;

#[test]
fn remote_record_accepts_plain_dates() {
    let record: RemoteLicenseRecord = serde_json::from_value(json!({
        "licenseKey": "LICENSE-2024-001",
        "status": "active",
        "startDate": "2024-01-01",
        "expiryDate": "2025-01-01",
        "createdAt": 1704067200000_i64,
        "updatedAt": 1704067200000_i64,
        "shopId": "shop-001",
        "shopName": "Golden Pawn",
        "ownerName": "Dana Reyes",
        "email": "dana@goldenpawn.example",
        "phone": "555-0100",
        "isTrial": true,
        "maxUsers": 2,
        "lastValidation": "2024-06-01T08:30:00Z"
    }))
    .unwrap();

    assert_eq!(record.expiry_date, date(NOW_MS));
    assert!(record.is_trial);
    assert_eq!(record.max_users, Some(2));
    assert!(record.machine_id.is_none());
    assert!(record.features.is_none());
    assert!(!record.has_feature("reports"));
    assert!(record.last_validation.is_some());
}

#[test]
fn remote_record_accepts_epoch_dates_and_unknown_status() {
    let record: RemoteLicenseRecord = serde_json::from_value(json!({
        "licenseKey": "K",
        "status": "pending_review",
        "startDate": NOW_MS - DAY_MS,
        "expiryDate": NOW_MS,
    }))
    .unwrap();
    assert_eq!(record.status, LicenseStatus::Unknown);
    assert!(!record.is_active());
    assert_eq!(record.expiry_date, date(NOW_MS));
    assert_eq!(record.shop_name, "");
}

#[test]
fn remote_record_rejects_bad_dates() {
    let result: Result<RemoteLicenseRecord, _> = serde_json::from_value(json!({
        "licenseKey": "K",
        "status": "active",
        "startDate": "yesterday",
        "expiryDate": "2025-01-01",
    }));
    assert!(result.is_err());
}

#[test]
fn expires_in_days_rounds_up() {
    let record = license("K", NOW_MS + DAY_MS + 1);
    assert_eq!(record.expires_in_days(NOW_MS), 2);
    assert_eq!(record.expires_in_days(NOW_MS + 1), 1);
    assert_eq!(record.expires_in_days(NOW_MS + DAY_MS + 1), 0);
    assert_eq!(record.expires_in_days(NOW_MS + 10 * DAY_MS), 0);
}

#[test]
fn expiry_is_inclusive_of_now() {
    let record = license("K", NOW_MS);
    assert!(!record.is_expired_at(NOW_MS - 1));
    assert!(record.is_expired_at(NOW_MS));
    assert!(record.is_expired_at(NOW_MS + 1));
}

#[test]
fn local_record_flattens_business_fields() {
    let fingerprint = MachineFingerprint::compute("windows", "x86_64", "desk", machine_a(), NOW_MS);
    let mut local = LocalLicenseRecord::from_remote(yearly("K-1"), fingerprint.clone());
    local.integrity_digest = "abc".to_string();

    let value = serde_json::to_value(&local).unwrap();
    assert_eq!(value["licenseKey"], "K-1");
    assert_eq!(value["shopName"], "Golden Pawn");
    assert_eq!(value["integrityDigest"], "abc");
    assert_eq!(value["machineFingerprint"]["machineId"], fingerprint.machine_id.as_str());
    assert!(value.get("license").is_none());

    let back: LocalLicenseRecord = serde_json::from_value(value).unwrap();
    assert_eq!(back, local);
    assert_eq!(back.license_key(), "K-1");
}

#[test]
fn validation_result_wire_shape() {
    let ok = ValidationResult::success(yearly("K-1"), NOW_MS, false);
    let value = serde_json::to_value(&ok).unwrap();
    assert_eq!(value["isValid"], true);
    assert_eq!(value["isOffline"], false);
    assert_eq!(value["expiresInDays"], 365);
    assert_eq!(value["record"]["licenseKey"], "K-1");
    assert!(value.get("errorKind").is_none());

    let failed = ValidationResult::failure(ErrorKind::MachineBoundElsewhere, "bound").offline();
    let value = serde_json::to_value(&failed).unwrap();
    assert_eq!(value["isValid"], false);
    assert_eq!(value["isOffline"], true);
    assert_eq!(value["errorKind"], "machine_bound_elsewhere");
    assert_eq!(value["message"], "bound");
    assert!(value.get("record").is_none());
}

#[test]
fn offline_success_message_mentions_mode() {
    let result = ValidationResult::success(yearly("K-1"), NOW_MS, true);
    assert!(result.is_offline);
    assert!(result.message.contains("offline"));
}

#[test]
fn config_defaults() {
    let config = LicenseConfig::default();
    assert_eq!(config.cache_ttl_ms(), 5 * 60 * 1000);
    assert_eq!(config.network.poll_interval().as_secs(), 30);
    assert_eq!(config.network.retry_backoff_ms(), 5 * 60 * 1000);
    assert_eq!(config.network.probe_timeout().as_secs(), 5);
    assert_eq!(config.storage.file_name, "license.dat");
    assert_eq!(config.storage.namespace, "pawnbook.license");
    assert!(config.storage.kdf_iterations >= 100_000);
}

#[test]
fn partial_config_document() {
    let config = LicenseConfig::from_json_str(
        r#"{
            "authority": { "database_url": "https://shop-rtdb.example", "auth_token": "t" },
            "storage": { "data_dir": "/var/lib/pawnbook" },
            "cache_ttl_secs": 60
        }"#,
    )
    .unwrap();

    assert_eq!(config.authority.database_url, "https://shop-rtdb.example");
    assert_eq!(config.authority.auth_token.as_deref(), Some("t"));
    assert_eq!(config.authority.collection, "licenses");
    assert_eq!(config.cache_ttl_ms(), 60_000);
    assert_eq!(
        config.storage.resolve_data_dir(),
        PathBuf::from("/var/lib/pawnbook")
    );
    assert_eq!(config.network.poll_interval().as_secs(), 30);
}

#[test]
fn invalid_config_is_an_error() {
    assert!(LicenseConfig::from_json_str("{ \"cache_ttl_secs\": \"soon\" }").is_err());
}
