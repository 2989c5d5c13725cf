use std::collections::BTreeMap;

use serde::de::Error as _;
use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;
use serde_json::Value;

use crate::transport::StompHeaders;
use crate::transport::TransportKind;
use crate::transport::TransportOptions;

/// Server list, usually supplied by the back end
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LiveDocConfig {
    #[serde(default)]
    pub servers: Vec<ServerConfig>,
}

/// One LiveDoc server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// For human readability only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    pub uri: String,

    /// Manages every document no other server claims
    #[serde(default)]
    pub default: bool,

    /// Destination prefixes. `main/doc` matches `main/doc`, `main/doc/` and
    /// `main/doc/123`, but not `main/docs`, `Main/Doc` or `remain/doc`.
    #[serde(default)]
    pub prefixes: Vec<String>,

    /// STOMP headers required to start the connection
    #[serde(default, deserialize_with = "deserialize_headers")]
    pub headers: StompHeaders,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comments: Option<String>,

    /// Requires an authentication token after the handshake
    #[serde(default)]
    pub secure: bool,

    /// Allowed transports; a single name is accepted as well
    #[serde(
        default,
        deserialize_with = "deserialize_transports",
        skip_serializing_if = "Option::is_none"
    )]
    pub transports: Option<Vec<TransportKind>>,
}

impl ServerConfig {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            name: None,
            uri: uri.into(),
            default: false,
            prefixes: Vec::new(),
            headers: StompHeaders::new(),
            comments: None,
            secure: false,
            transports: None,
        }
    }

    /// Whether one of the prefixes claims `document`
    pub fn matches(
        &self,
        document: &str,
    ) -> bool {
        self.prefixes.iter().any(|prefix| {
            document
                .strip_prefix(prefix.as_str())
                .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
        })
    }

    /// Name for log lines
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.uri)
    }

    pub fn transport_options(&self) -> TransportOptions {
        TransportOptions {
            transports: self.transports.clone(),
        }
    }
}

/// Header values arrive as arbitrary JSON scalars
fn deserialize_headers<'de, D>(deserializer: D) -> std::result::Result<StompHeaders, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<BTreeMap<String, Value>> = Option::deserialize(deserializer)?;
    let mut headers = StompHeaders::new();
    for (name, value) in raw.unwrap_or_default() {
        let value = match value {
            Value::Null => continue,
            Value::String(s) => s,
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            other => {
                return Err(D::Error::custom(format!(
                    "header {name} must be a scalar, got {other}"
                )))
            }
        };
        headers.insert(name, value);
    }
    Ok(headers)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(TransportKind),
    Many(Vec<TransportKind>),
}

fn deserialize_transports<'de, D>(deserializer: D) -> std::result::Result<Option<Vec<TransportKind>>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<OneOrMany>::deserialize(deserializer)?.map(|transports| match transports {
        OneOrMany::One(kind) => vec![kind],
        OneOrMany::Many(kinds) => kinds,
    }))
}
