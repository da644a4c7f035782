//! Node-to-node calls used by replication.
use std::time::Duration;

use reqwest::{blocking::Response, Url};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::{
    configuration_store::Dump,
    envelope::Envelope,
    models::{DataVersion, Delta},
    Error, Result,
};

/// Body of a master-to-slave push.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushPayload {
    pub delta: Delta,
    /// Version the slave must be at after applying `delta`.
    pub data_version: DataVersion,
}

/// Calls a node makes on its peers.
pub trait PeerTransport: Send + Sync {
    /// Deliver a delta to a slave.
    fn push(&self, node_url: &str, payload: &PushPayload) -> Result<()>;

    /// Current data version of a node.
    fn fetch_version(&self, node_url: &str) -> Result<DataVersion>;

    /// Full contents of a node.
    fn fetch_dump(&self, node_url: &str) -> Result<Dump>;
}

pub const PUSH_ENDPOINT: &str = "/api/sync/push";
pub const VERSION_ENDPOINT: &str = "/api/sync/version";
pub const DUMP_ENDPOINT: &str = "/api/sync/dump";

/// [`PeerTransport`] over HTTP. Peers answer with an [`Envelope`].
pub struct HttpTransport {
    // Client holds a connection pool internally, so we're reusing the client between requests.
    client: reqwest::blocking::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<HttpTransport> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()?;
        Ok(HttpTransport { client })
    }

    fn url(node_url: &str, endpoint: &str) -> Result<Url> {
        Url::parse(&format!("{}{}", node_url.trim_end_matches('/'), endpoint))
            .map_err(Error::InvalidUrl)
    }
}

impl PeerTransport for HttpTransport {
    fn push(&self, node_url: &str, payload: &PushPayload) -> Result<()> {
        let url = HttpTransport::url(node_url, PUSH_ENDPOINT)?;
        log::debug!(target: "confsync", url:display = node_url, version = payload.data_version.version; "pushing delta");
        decode(self.client.post(url).json(payload).send()?)
    }

    fn fetch_version(&self, node_url: &str) -> Result<DataVersion> {
        let url = HttpTransport::url(node_url, VERSION_ENDPOINT)?;
        decode(self.client.get(url).send()?)
    }

    fn fetch_dump(&self, node_url: &str) -> Result<Dump> {
        let url = HttpTransport::url(node_url, DUMP_ENDPOINT)?;
        log::debug!(target: "confsync", url:display = node_url; "fetching dump");
        decode(self.client.get(url).send()?)
    }
}

/// Decode an envelope, falling back to the HTTP status if the body isn't one.
fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();
    let body = response.bytes()?;
    match serde_json::from_slice::<Envelope<T>>(&body) {
        Ok(envelope) => envelope.into_result(),
        Err(err) if status.is_success() => Err(err.into()),
        Err(_) => {
            log::warn!(target: "confsync", "received non-envelope response from peer: {:?}", status);
            Err(Error::Remote {
                code: "HTTP_STATUS".to_owned(),
                msg: status.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{HttpTransport, PeerTransport, PUSH_ENDPOINT};
    use crate::Error;

    #[test]
    fn builds_endpoint_urls() {
        let url = HttpTransport::url("http://10.0.0.1:8080/", PUSH_ENDPOINT).unwrap();
        assert_eq!(url.as_str(), "http://10.0.0.1:8080/api/sync/push");
    }

    #[test]
    fn rejects_invalid_node_url() {
        let transport = HttpTransport::new(std::time::Duration::from_millis(100)).unwrap();
        assert!(matches!(
            transport.fetch_version("not a url"),
            Err(Error::InvalidUrl(_))
        ));
    }
}
