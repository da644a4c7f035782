//! Response envelope shared by client-facing and peer endpoints.
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// `{"status": true, "data": ...}` or `{"status": false, "data": {"code": ..., "msg": ...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub status: bool,
    pub data: EnvelopeData<T>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EnvelopeData<T> {
    Err(ErrorBody),
    Ok(T),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ErrorBody {
    pub code: String,
    pub msg: String,
}

impl<T> Envelope<T> {
    pub fn ok(data: T) -> Envelope<T> {
        Envelope {
            status: true,
            data: EnvelopeData::Ok(data),
        }
    }

    pub fn error(err: &Error) -> Envelope<T> {
        Envelope {
            status: false,
            data: EnvelopeData::Err(ErrorBody {
                code: err.code().to_owned(),
                msg: err.to_string(),
            }),
        }
    }

    pub fn from_result(result: Result<T>) -> Envelope<T> {
        match result {
            Ok(data) => Envelope::ok(data),
            Err(err) => Envelope::error(&err),
        }
    }

    /// Unwrap a peer's response. Error envelopes become [`Error::Remote`].
    pub fn into_result(self) -> Result<T> {
        match (self.status, self.data) {
            (true, EnvelopeData::Ok(data)) => Ok(data),
            (false, EnvelopeData::Err(ErrorBody { code, msg })) => Err(Error::Remote { code, msg }),
            _ => Err(Error::Decode(
                "envelope status does not match its payload".to_owned(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::Envelope;
    use crate::Error;

    #[test]
    fn error_envelope_format() {
        let envelope: Envelope<()> = Envelope::error(&Error::NotPermitted);
        assert_eq!(
            serde_json::to_value(&envelope).unwrap(),
            json!({
                "status": false,
                "data": {"code": "NOT_PERMITTED", "msg": "operation not permitted on this node"}
            })
        );
    }

    #[test]
    fn decodes_peer_responses() {
        let ok: Envelope<i64> = serde_json::from_value(json!({"status": true, "data": 3})).unwrap();
        assert_eq!(ok.into_result().unwrap(), 3);

        let unit: Envelope<()> =
            serde_json::from_value(json!({"status": true, "data": null})).unwrap();
        assert!(unit.into_result().is_ok());

        let err: Envelope<i64> = serde_json::from_value(json!({
            "status": false,
            "data": {"code": "VERSION_GAP", "msg": "gap"}
        }))
        .unwrap();
        match err.into_result() {
            Err(Error::Remote { code, .. }) => assert_eq!(code, "VERSION_GAP"),
            other => panic!("unexpected {other:?}"),
        }
    }
}
