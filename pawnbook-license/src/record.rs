//! License records as held by the authority and by this machine.

use crate::clock::DAY_MS;
use crate::error::ErrorKind;
use crate::identity::MachineFingerprint;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Administrative status of a license.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LicenseStatus {
    Active,
    Expired,
    Revoked,
    Suspended,
    /// Any status string this build does not know.
    #[serde(other)]
    Unknown,
}

impl LicenseStatus {
    /// Returns the lowercase status name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Expired => "expired",
            Self::Revoked => "revoked",
            Self::Suspended => "suspended",
            Self::Unknown => "unknown",
        }
    }
}

/// A license record owned by the remote authority.
///
/// Also the business payload of [`LocalLicenseRecord`], so both schemas
/// share one field list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteLicenseRecord {
    pub license_key: String,
    pub status: LicenseStatus,
    #[serde(with = "date_format")]
    pub start_date: DateTime<Utc>,
    #[serde(with = "date_format")]
    pub expiry_date: DateTime<Utc>,
    /// Epoch milliseconds.
    #[serde(default)]
    pub created_at: i64,
    /// Epoch milliseconds.
    #[serde(default)]
    pub updated_at: i64,
    #[serde(default)]
    pub shop_id: String,
    #[serde(default)]
    pub shop_name: String,
    #[serde(default)]
    pub owner_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub is_trial: bool,
    /// Machine the license is bound to, set once by activation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_users: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub features: Option<BTreeSet<String>>,
    #[serde(
        default,
        with = "date_format::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_validation: Option<DateTime<Utc>>,
}

impl RemoteLicenseRecord {
    /// Returns true if the status is `active`.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == LicenseStatus::Active
    }

    /// Returns true once `now_ms` has reached the expiry instant.
    #[must_use]
    pub fn is_expired_at(&self, now_ms: i64) -> bool {
        self.expiry_date.timestamp_millis() <= now_ms
    }

    /// Whole days left until expiry, rounded up.
    #[must_use]
    pub fn expires_in_days(&self, now_ms: i64) -> i64 {
        let remaining = self.expiry_date.timestamp_millis() - now_ms;
        if remaining <= 0 {
            return 0;
        }
        (remaining + DAY_MS - 1) / DAY_MS
    }

    /// Returns true if the license lists `feature`.
    #[must_use]
    pub fn has_feature(&self, feature: &str) -> bool {
        self.features
            .as_ref()
            .is_some_and(|features| features.contains(feature))
    }
}

/// The license record persisted on this machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalLicenseRecord {
    /// Business fields, mirrored from the authority.
    #[serde(flatten)]
    pub license: RemoteLicenseRecord,
    /// The fingerprint active when the record was last validated.
    pub machine_fingerprint: MachineFingerprint,
    /// Tamper-evidence digest, stamped by the local store.
    #[serde(default)]
    pub integrity_digest: String,
}

impl LocalLicenseRecord {
    /// The single conversion from the authority schema to the local one.
    #[must_use]
    pub fn from_remote(license: RemoteLicenseRecord, machine_fingerprint: MachineFingerprint) -> Self {
        Self {
            license,
            machine_fingerprint,
            integrity_digest: String::new(),
        }
    }

    /// Returns the license key.
    #[must_use]
    pub fn license_key(&self) -> &str {
        &self.license.license_key
    }
}

/// Field updates sent to the authority for one record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LicensePatch {
    /// `Some(None)` clears the binding.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub machine_id: Option<Option<String>>,
    #[serde(with = "date_format::option", skip_serializing_if = "Option::is_none")]
    pub last_validation: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
}

impl LicensePatch {
    /// Binds the record to `machine_id`.
    #[must_use]
    pub fn bind(machine_id: impl Into<String>, now_ms: i64) -> Self {
        Self {
            machine_id: Some(Some(machine_id.into())),
            last_validation: DateTime::from_timestamp_millis(now_ms),
            updated_at: Some(now_ms),
        }
    }

    /// Releases the record's binding.
    #[must_use]
    pub fn release(now_ms: i64) -> Self {
        Self {
            machine_id: Some(None),
            last_validation: None,
            updated_at: Some(now_ms),
        }
    }

    /// Records a successful validation without touching the binding.
    #[must_use]
    pub fn touch(now_ms: i64) -> Self {
        Self {
            machine_id: None,
            last_validation: DateTime::from_timestamp_millis(now_ms),
            updated_at: Some(now_ms),
        }
    }
}

/// Outcome of a validation, handed to the UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub is_valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record: Option<RemoteLicenseRecord>,
    /// Short human-readable text.
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in_days: Option<i64>,
    pub is_offline: bool,
}

impl ValidationResult {
    pub fn success(record: RemoteLicenseRecord, now_ms: i64, is_offline: bool) -> Self {
        let expires_in_days = record.expires_in_days(now_ms);
        let message = if is_offline {
            format!("License valid (offline), expires in {expires_in_days} days")
        } else {
            format!("License valid, expires in {expires_in_days} days")
        };
        Self {
            is_valid: true,
            record: Some(record),
            message,
            error_kind: None,
            expires_in_days: Some(expires_in_days),
            is_offline,
        }
    }

    pub fn failure(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            record: None,
            message: message.into(),
            error_kind: Some(kind),
            expires_in_days: None,
            is_offline: false,
        }
    }

    /// Marks the result as produced without the authority.
    #[must_use]
    pub fn offline(mut self) -> Self {
        self.is_offline = true;
        self
    }
}

/// Shortens a license key for log output.
pub(crate) fn key_prefix(key: &str) -> &str {
    let end = key
        .char_indices()
        .nth(8)
        .map_or(key.len(), |(index, _)| index);
    &key[..end]
}

/// Dates travel as RFC 3339; `YYYY-MM-DD` and epoch milliseconds are
/// accepted on read.
pub(crate) mod date_format {
    use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawDate {
        Millis(i64),
        Text(String),
    }

    fn parse<E: serde::de::Error>(raw: RawDate) -> Result<DateTime<Utc>, E> {
        match raw {
            RawDate::Millis(ms) => DateTime::from_timestamp_millis(ms)
                .ok_or_else(|| E::custom(format!("timestamp out of range: {ms}"))),
            RawDate::Text(text) => {
                if let Ok(parsed) = DateTime::parse_from_rfc3339(&text) {
                    return Ok(parsed.with_timezone(&Utc));
                }
                NaiveDate::parse_from_str(&text, "%Y-%m-%d")
                    .ok()
                    .and_then(|date| date.and_hms_opt(0, 0, 0))
                    .map(|naive| naive.and_utc())
                    .ok_or_else(|| E::custom(format!("invalid date: {text}")))
            }
        }
    }

    pub fn serialize<S: Serializer>(date: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&date.to_rfc3339_opts(SecondsFormat::AutoSi, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        parse(RawDate::deserialize(deserializer)?)
    }

    pub mod option {
        use super::*;

        pub fn serialize<S: Serializer>(
            date: &Option<DateTime<Utc>>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match date {
                Some(date) => super::serialize(date, serializer),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<DateTime<Utc>>, D::Error> {
            match Option::<RawDate>::deserialize(deserializer)? {
                Some(raw) => parse(raw).map(Some),
                None => Ok(None),
            }
        }
    }
}
