//! Remote license authority.

use crate::error::LicenseResult;
use crate::record::{LicensePatch, RemoteLicenseRecord};
use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

/// Read/update access to the license collection.
#[async_trait]
pub trait LicenseAuthority: Send + Sync {
    /// Reads the whole collection. Index is the record's slot; empty
    /// slots (slot 0 by convention) are `None`.
    async fn fetch_licenses(&self) -> LicenseResult<Vec<Option<RemoteLicenseRecord>>>;

    /// Applies `patch` to the record at `slot`.
    async fn update_license(&self, slot: usize, patch: &LicensePatch) -> LicenseResult<()>;
}

/// Highest slot accepted from a sparse collection document.
pub const MAX_SLOT: usize = 100_000;

/// Turns a collection document into slot-indexed records.
///
/// Accepts the array shape and the sparse object shape (`{"1": {...}}`).
/// Entries that fail to parse, or sit above [`MAX_SLOT`], are skipped.
pub fn parse_collection(document: Value) -> Vec<Option<RemoteLicenseRecord>> {
    match document {
        Value::Null => Vec::new(),
        Value::Array(entries) => entries
            .into_iter()
            .enumerate()
            .map(|(slot, entry)| parse_entry(slot, entry))
            .collect(),
        Value::Object(entries) => {
            let mut slots: Vec<Option<RemoteLicenseRecord>> = Vec::new();
            for (key, entry) in entries {
                let Ok(slot) = key.parse::<usize>() else {
                    warn!(key = %key, "Skipping license entry with non-numeric slot");
                    continue;
                };
                if slot > MAX_SLOT {
                    warn!(slot, "Skipping license entry with out-of-range slot");
                    continue;
                }
                if slot >= slots.len() {
                    slots.resize_with(slot + 1, || None);
                }
                slots[slot] = parse_entry(slot, entry);
            }
            slots
        }
        other => {
            warn!(kind = json_kind(&other), "Unexpected license collection shape");
            Vec::new()
        }
    }
}

fn parse_entry(slot: usize, entry: Value) -> Option<RemoteLicenseRecord> {
    if entry.is_null() {
        return None;
    }
    match serde_json::from_value(entry) {
        Ok(record) => Some(record),
        Err(e) => {
            warn!(slot, error = %e, "Skipping unparsable license entry");
            None
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(feature = "online")]
pub use http::RealtimeDbAuthority;

#[cfg(feature = "online")]
mod http {
    use super::{parse_collection, LicenseAuthority};
    use crate::config::AuthorityConfig;
    use crate::error::{LicenseError, LicenseResult};
    use crate::record::{LicensePatch, RemoteLicenseRecord};
    use async_trait::async_trait;
    use reqwest::{Client, RequestBuilder};
    use serde_json::Value;
    use tracing::debug;

    /// Realtime-database REST client for the license collection.
    pub struct RealtimeDbAuthority {
        client: Client,
        config: AuthorityConfig,
    }

    impl RealtimeDbAuthority {
        pub fn new(config: AuthorityConfig) -> LicenseResult<Self> {
            let client = Client::builder()
                .timeout(config.request_timeout())
                .build()
                .map_err(|e| LicenseError::Network(format!("failed to build HTTP client: {e}")))?;
            Ok(Self { client, config })
        }

        /// URL of the collection document, also used as the reachability target.
        pub fn collection_url(&self) -> String {
            format!(
                "{}/{}.json",
                self.config.database_url.trim_end_matches('/'),
                self.config.collection
            )
        }

        fn slot_url(&self, slot: usize) -> String {
            format!(
                "{}/{}/{slot}.json",
                self.config.database_url.trim_end_matches('/'),
                self.config.collection
            )
        }

        fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
            match &self.config.auth_token {
                Some(token) => request.query(&[("auth", token)]),
                None => request,
            }
        }
    }

    #[async_trait]
    impl LicenseAuthority for RealtimeDbAuthority {
        async fn fetch_licenses(&self) -> LicenseResult<Vec<Option<RemoteLicenseRecord>>> {
            let response = self
                .authorize(self.client.get(self.collection_url()))
                .send()
                .await
                .map_err(|e| LicenseError::Network(format!("license fetch failed: {e}")))?;

            if !response.status().is_success() {
                let status = response.status();
                let error = response.text().await.unwrap_or_default();
                return Err(LicenseError::Authority(format!(
                    "license fetch failed ({status}): {error}"
                )));
            }

            let document: Value = response
                .json()
                .await
                .map_err(|e| LicenseError::Authority(format!("failed to parse license collection: {e}")))?;
            let licenses = parse_collection(document);
            debug!(slots = licenses.len(), "Fetched license collection");
            Ok(licenses)
        }

        async fn update_license(&self, slot: usize, patch: &LicensePatch) -> LicenseResult<()> {
            let response = self
                .authorize(self.client.patch(self.slot_url(slot)))
                .json(patch)
                .send()
                .await
                .map_err(|e| LicenseError::Network(format!("license update failed: {e}")))?;

            if !response.status().is_success() {
                let status = response.status();
                let error = response.text().await.unwrap_or_default();
                return Err(LicenseError::Authority(format!(
                    "license update failed ({status}): {error}"
                )));
            }

            debug!(slot, "Updated license record");
            Ok(())
        }
    }
}
