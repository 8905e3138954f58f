//! Message and envelope shapes exchanged over the worker pipe (§4.C3, §6).
//!
//! The wire tag is the self-describing variant name rather than a bare
//! integer discriminator, since both ends of this pipe are our own
//! binaries and there's no external contract to preserve byte-for-byte.
//! [`Message::msg_id`] still reports the canonical numeric id from §6 for
//! logging, metrics, and tests that assert against the documented enum.

use serde::{Deserialize, Serialize};

/// Canonical message identifiers from §6 `EXTERNAL INTERFACES`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MsgId {
    Ping = 1,
    Quit = 2,
    OwsRequest = 4,
    ApiRequest = 5,
    CheckoutProject = 6,
    DropProject = 7,
    ClearCache = 8,
    ListCache = 9,
    UpdateCache = 10,
    ProjectInfo = 11,
    Plugins = 12,
    Catalog = 13,
    PutConfig = 14,
    GetConfig = 15,
    Env = 16,
    Stats = 17,
    Sleep = 18,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Head,
    Post,
    Put,
    Delete,
    Connect,
    Options,
    Trace,
    Patch,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PingMsg {
    pub echo: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuitMsg {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OwsRequestMsg {
    pub service: String,
    pub request: String,
    pub target: String,
    pub url: Option<String>,
    pub version: Option<String>,
    #[serde(default)]
    pub direct: bool,
    pub options: Option<String>,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    pub request_id: Option<String>,
    pub header_prefix: Option<String>,
    #[serde(default)]
    pub debug_report: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiRequestMsg {
    pub name: String,
    pub path: String,
    pub method: HttpMethod,
    #[serde(default = "default_api_url")]
    pub url: String,
    pub data: Option<Vec<u8>>,
    #[serde(default)]
    pub delegate: bool,
    pub target: Option<String>,
    #[serde(default)]
    pub direct: bool,
    pub options: Option<String>,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    pub request_id: Option<String>,
    pub header_prefix: Option<String>,
    #[serde(default)]
    pub debug_report: bool,
}

fn default_api_url() -> String {
    "/".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutProjectMsg {
    pub uri: String,
    #[serde(default)]
    pub pull: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DropProjectMsg {
    pub uri: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClearCacheMsg {}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListCacheMsg {
    /// Filter by checkout status (`qjazz_cache::CheckoutStatus` as `u8`).
    pub status_filter: Option<u8>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateCacheMsg {}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PluginsMsg {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetProjectInfoMsg {
    pub uri: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetConfigMsg {}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PutConfigMsg {
    pub config: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogMsg {
    pub location: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetEnvMsg {}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatsMsg {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SleepMsg {
    pub delay: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    Ping(PingMsg),
    Quit(QuitMsg),
    OwsRequest(OwsRequestMsg),
    ApiRequest(ApiRequestMsg),
    CheckoutProject(CheckoutProjectMsg),
    DropProject(DropProjectMsg),
    ClearCache(ClearCacheMsg),
    ListCache(ListCacheMsg),
    UpdateCache(UpdateCacheMsg),
    ProjectInfo(GetProjectInfoMsg),
    Plugins(PluginsMsg),
    Catalog(CatalogMsg),
    PutConfig(PutConfigMsg),
    GetConfig(GetConfigMsg),
    Env(GetEnvMsg),
    Stats(StatsMsg),
    Sleep(SleepMsg),
}

impl Message {
    pub fn msg_id(&self) -> MsgId {
        match self {
            Message::Ping(_) => MsgId::Ping,
            Message::Quit(_) => MsgId::Quit,
            Message::OwsRequest(_) => MsgId::OwsRequest,
            Message::ApiRequest(_) => MsgId::ApiRequest,
            Message::CheckoutProject(_) => MsgId::CheckoutProject,
            Message::DropProject(_) => MsgId::DropProject,
            Message::ClearCache(_) => MsgId::ClearCache,
            Message::ListCache(_) => MsgId::ListCache,
            Message::UpdateCache(_) => MsgId::UpdateCache,
            Message::ProjectInfo(_) => MsgId::ProjectInfo,
            Message::Plugins(_) => MsgId::Plugins,
            Message::Catalog(_) => MsgId::Catalog,
            Message::PutConfig(_) => MsgId::PutConfig,
            Message::GetConfig(_) => MsgId::GetConfig,
            Message::Env(_) => MsgId::Env,
            Message::Stats(_) => MsgId::Stats,
            Message::Sleep(_) => MsgId::Sleep,
        }
    }
}

/// The reply envelope `(status, body)` from §6. `206`/`204` frames (stream
/// continuation/sentinel) reuse this same shape with `body` holding either
/// binary chunk data or `Nil`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub status: u16,
    pub body: rmpv::Value,
}

pub const STATUS_CHUNK: u16 = 206;
pub const STATUS_END_OF_STREAM: u16 = 204;

impl Envelope {
    pub fn new<T: Serialize>(status: u16, body: &T) -> Result<Self, rmpv::ext::Error> {
        Ok(Self {
            status,
            body: rmpv::ext::to_value(body)?,
        })
    }

    pub fn ok<T: Serialize>(body: &T) -> Result<Self, rmpv::ext::Error> {
        Self::new(200, body)
    }

    pub fn chunk(data: Vec<u8>) -> Self {
        Self {
            status: STATUS_CHUNK,
            body: rmpv::Value::Binary(data),
        }
    }

    pub fn end_of_stream() -> Self {
        Self {
            status: STATUS_END_OF_STREAM,
            body: rmpv::Value::Nil,
        }
    }

    pub fn is_end_of_stream(&self) -> bool {
        self.status == STATUS_END_OF_STREAM
    }

    pub fn deserialize_body<T: serde::de::DeserializeOwned>(&self) -> Result<T, rmpv::ext::Error> {
        rmpv::ext::from_value(self.body.clone())
    }
}

/// Per-entry view returned by `CheckoutProjectMsg`, `DropProjectMsg`,
/// `ListCacheMsg` and `UpdateCacheMsg` (§4.C3 dispatch table).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheInfo {
    pub uri: String,
    pub status: u8,
    pub in_cache: bool,
    pub cache_id: String,
    pub timestamp: Option<i64>,
    pub name: Option<String>,
    pub storage: Option<String>,
    pub last_modified: Option<String>,
    pub saved_version: Option<String>,
    #[serde(default)]
    pub debug_metadata: std::collections::BTreeMap<String, i64>,
    #[serde(default)]
    pub last_hit: i64,
    #[serde(default)]
    pub hits: u64,
    #[serde(default)]
    pub pinned: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerInfo {
    pub layer_id: String,
    pub name: String,
    pub source: String,
    pub crs: String,
    pub is_valid: bool,
    pub is_spatial: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectInfo {
    pub status: u8,
    pub uri: String,
    pub filename: String,
    pub crs: String,
    pub last_modified: i64,
    pub storage: String,
    pub has_bad_layers: bool,
    pub layers: Vec<LayerInfo>,
    #[serde(default)]
    pub cache_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogItem {
    pub uri: String,
    pub name: String,
    pub storage: String,
    pub last_modified: String,
    pub public_uri: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginInfo {
    pub name: String,
    pub path: String,
    pub plugin_type: String,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestReport {
    pub memory: Option<i64>,
    pub timestamp: f64,
    pub duration: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn msg_id_matches_the_documented_contract() {
        assert_eq!(MsgId::Ping as u8, 1);
        assert_eq!(MsgId::Quit as u8, 2);
        assert_eq!(MsgId::OwsRequest as u8, 4);
        assert_eq!(MsgId::ApiRequest as u8, 5);
        assert_eq!(MsgId::CheckoutProject as u8, 6);
        assert_eq!(MsgId::DropProject as u8, 7);
        assert_eq!(MsgId::ClearCache as u8, 8);
        assert_eq!(MsgId::ListCache as u8, 9);
        assert_eq!(MsgId::UpdateCache as u8, 10);
        assert_eq!(MsgId::ProjectInfo as u8, 11);
        assert_eq!(MsgId::Plugins as u8, 12);
        assert_eq!(MsgId::Catalog as u8, 13);
        assert_eq!(MsgId::PutConfig as u8, 14);
        assert_eq!(MsgId::GetConfig as u8, 15);
        assert_eq!(MsgId::Env as u8, 16);
        assert_eq!(MsgId::Stats as u8, 17);
        assert_eq!(MsgId::Sleep as u8, 18);
    }

    #[test]
    fn message_round_trips_through_msgpack() {
        let msg = Message::CheckoutProject(CheckoutProjectMsg {
            uri: "file:///data/fr/france.qgs".to_string(),
            pull: true,
        });
        let bytes = rmp_serde::to_vec_named(&msg).unwrap();
        let decoded: Message = rmp_serde::from_slice(&bytes).unwrap();
        match decoded {
            Message::CheckoutProject(m) => {
                assert_eq!(m.uri, "file:///data/fr/france.qgs");
                assert!(m.pull);
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn envelope_chunk_and_sentinel_round_trip() {
        let chunk = Envelope::chunk(b"hello".to_vec());
        let bytes = rmp_serde::to_vec_named(&chunk).unwrap();
        let decoded: Envelope = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(decoded.status, STATUS_CHUNK);

        let sentinel = Envelope::end_of_stream();
        assert!(sentinel.is_end_of_stream());
    }
}
