//! Kafka API Version Support
//!
//! Version negotiation: the client's supported range for each API is
//! intersected with what the broker advertised in its ApiVersions response,
//! and the highest common version wins.

use std::collections::HashMap;

use super::codec::{CodecError, Result};
use super::messages::{
    ApiMessage, ApiVersionsRequest, ApiVersionsResponse, FetchRequest, FindCoordinatorRequest,
    HeartbeatRequest, JoinGroupRequest, LeaveGroupRequest, MetadataRequest, OffsetCommitRequest,
    OffsetFetchRequest, ProduceRequest, SyncGroupRequest, VersionRange,
};

/// Supported version range of one API
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApiVersionInfo {
    pub api_key: i16,
    pub min_version: i16,
    pub max_version: i16,
}

impl ApiVersionInfo {
    pub fn new(api_key: i16, min_version: i16, max_version: i16) -> Self {
        Self {
            api_key,
            min_version,
            max_version,
        }
    }

    /// Check if a version is supported for this API
    pub fn supports_version(&self, version: i16) -> bool {
        version >= self.min_version && version <= self.max_version
    }
}

/// Version ranges per API key, either the client's own or a broker's.
#[derive(Debug, Clone, Default)]
pub struct ApiVersionRegistry {
    versions: HashMap<i16, ApiVersionInfo>,
}

impl ApiVersionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ranges this crate can encode and decode.
    pub fn client() -> Self {
        let mut registry = Self::new();
        registry.register_message::<ProduceRequest>();
        registry.register_message::<FetchRequest>();
        registry.register_message::<MetadataRequest>();
        registry.register_message::<OffsetCommitRequest>();
        registry.register_message::<OffsetFetchRequest>();
        registry.register_message::<FindCoordinatorRequest>();
        registry.register_message::<JoinGroupRequest>();
        registry.register_message::<HeartbeatRequest>();
        registry.register_message::<LeaveGroupRequest>();
        registry.register_message::<SyncGroupRequest>();
        registry.register_message::<ApiVersionsRequest>();
        registry
    }

    /// Ranges a broker advertised.
    pub fn from_response(response: &ApiVersionsResponse) -> Self {
        let mut registry = Self::new();
        for key in &response.api_keys {
            registry.register(key.api_key, key.min_version, key.max_version);
        }
        registry
    }

    fn register_message<M: ApiMessage>(&mut self) {
        self.register(M::API_KEY, M::VERSIONS.min, M::VERSIONS.max);
    }

    pub fn register(&mut self, api_key: i16, min_version: i16, max_version: i16) {
        self.versions.insert(
            api_key,
            ApiVersionInfo::new(api_key, min_version, max_version),
        );
    }

    /// Get version info for an API key
    pub fn get_version_info(&self, api_key: i16) -> Option<&ApiVersionInfo> {
        self.versions.get(&api_key)
    }

    /// Check if an API key and version combination is supported
    pub fn is_supported(&self, api_key: i16, version: i16) -> bool {
        self.versions
            .get(&api_key)
            .map_or(false, |info| info.supports_version(version))
    }

    pub fn supports_api(&self, api_key: i16) -> bool {
        self.versions.contains_key(&api_key)
    }

    /// All ranges, sorted by API key
    pub fn get_all_versions(&self) -> Vec<&ApiVersionInfo> {
        let mut versions: Vec<_> = self.versions.values().collect();
        versions.sort_by_key(|v| v.api_key);
        versions
    }

    /// Highest version in both `client` and this registry's range for
    /// `api_key`. An API the registry does not list is unsupported.
    pub fn negotiate(&self, api_key: i16, client: VersionRange) -> Result<i16> {
        let info = self
            .versions
            .get(&api_key)
            .ok_or(CodecError::UnsupportedVersion {
                api_key,
                version: client.max,
            })?;
        let version = client.max.min(info.max_version);
        if version < client.min.max(info.min_version) {
            return Err(CodecError::UnsupportedVersion { api_key, version });
        }
        Ok(version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::kafka::messages::ApiVersionsResponseKey;
    use crate::protocol::kafka::{API_KEY_JOIN_GROUP, API_KEY_METADATA, API_KEY_SYNC_GROUP};

    #[test]
    fn test_client_registry_matches_messages() {
        let registry = ApiVersionRegistry::client();
        assert!(registry.is_supported(API_KEY_JOIN_GROUP, 5));
        assert!(!registry.is_supported(API_KEY_JOIN_GROUP, 6));
        assert_eq!(registry.get_all_versions().len(), 11);
        assert_eq!(registry.get_all_versions()[0].api_key, 0);
    }

    #[test]
    fn test_negotiation() {
        let broker = ApiVersionRegistry::from_response(&ApiVersionsResponse {
            version: 2,
            error_code: 0,
            api_keys: vec![
                ApiVersionsResponseKey {
                    api_key: API_KEY_JOIN_GROUP,
                    min_version: 0,
                    max_version: 9,
                },
                ApiVersionsResponseKey {
                    api_key: API_KEY_METADATA,
                    min_version: 0,
                    max_version: 3,
                },
                ApiVersionsResponseKey {
                    api_key: API_KEY_SYNC_GROUP,
                    min_version: 4,
                    max_version: 5,
                },
            ],
            throttle_time_ms: 0,
        });

        // newer broker: clamp to the client's max
        assert_eq!(
            broker
                .negotiate(API_KEY_JOIN_GROUP, JoinGroupRequest::VERSIONS)
                .unwrap(),
            5
        );
        // older broker: clamp to the broker's max
        assert_eq!(
            broker
                .negotiate(API_KEY_METADATA, MetadataRequest::VERSIONS)
                .unwrap(),
            3
        );
        // disjoint ranges
        assert!(broker
            .negotiate(API_KEY_SYNC_GROUP, SyncGroupRequest::VERSIONS)
            .is_err());
        // not advertised
        assert!(broker.negotiate(0, ProduceRequest::VERSIONS).is_err());
    }
}
