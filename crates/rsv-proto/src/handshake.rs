//! Handshake and disconnect payload schemas.
//!
//! These payloads travel unencrypted and unsigned. They are parsed strictly:
//! every field is required and must be non-empty.

use serde::{Deserialize, Serialize};

use crate::envelope::{Envelope, MessageType, ACTION_DISCONNECT, ACTION_KEY_EXCHANGE};
use crate::error::ProtoError;
use crate::validation::require_non_empty;

/// First frame sent by a connecting client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyExchangeRequest {
    pub sender_id: String,
    pub public_key: String,
}

impl KeyExchangeRequest {
    pub fn to_envelope(&self) -> Result<Envelope, ProtoError> {
        Ok(Envelope::with_payload(MessageType::Request, ACTION_KEY_EXCHANGE, self)?
            .with_sender(self.sender_id.clone()))
    }

    /// Extract the request from a handshake envelope.
    pub fn from_envelope(env: &Envelope) -> Result<Self, ProtoError> {
        if env.msg_type != MessageType::Request || env.action != ACTION_KEY_EXCHANGE {
            return Err(ProtoError::Unexpected {
                expected: "KeyExchange request",
                got: format!("{} {}", env.msg_type, env.action),
            });
        }
        let req: KeyExchangeRequest = env.payload()?;
        require_non_empty("senderId", &req.sender_id)?;
        require_non_empty("publicKey", &req.public_key)?;
        Ok(req)
    }
}

/// Server reply to [`KeyExchangeRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyExchangeResponse {
    pub server_public_key: String,
}

impl KeyExchangeResponse {
    pub fn to_envelope(&self) -> Result<Envelope, ProtoError> {
        Envelope::with_payload(MessageType::Response, ACTION_KEY_EXCHANGE, self)
    }

    pub fn from_envelope(env: &Envelope) -> Result<Self, ProtoError> {
        if env.msg_type != MessageType::Response || env.action != ACTION_KEY_EXCHANGE {
            return Err(ProtoError::Unexpected {
                expected: "KeyExchange response",
                got: format!("{} {}", env.msg_type, env.action),
            });
        }
        let resp: KeyExchangeResponse = env.payload()?;
        require_non_empty("serverPublicKey", &resp.server_public_key)?;
        Ok(resp)
    }
}

/// Body of the unencrypted `Disconnect` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisconnectPayload {
    pub sender_id: String,
}

impl DisconnectPayload {
    pub fn to_envelope(&self) -> Result<Envelope, ProtoError> {
        Ok(Envelope::with_payload(MessageType::Request, ACTION_DISCONNECT, self)?
            .with_sender(self.sender_id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_exchange_request_round_trip() {
        let req = KeyExchangeRequest {
            sender_id: "abc".into(),
            public_key: "-----BEGIN PUBLIC KEY-----".into(),
        };
        let env = req.to_envelope().unwrap();
        assert_eq!(env.sender_id, "abc");
        assert!(!env.is_signed());

        let wire = env.to_bytes().unwrap();
        let parsed = KeyExchangeRequest::from_envelope(&Envelope::from_bytes(&wire).unwrap()).unwrap();
        assert_eq!(parsed, req);
    }

    #[test]
    fn test_key_exchange_request_missing_field() {
        let env = Envelope::request(ACTION_KEY_EXCHANGE, r#"{"senderId":"abc"}"#);
        assert!(matches!(
            KeyExchangeRequest::from_envelope(&env),
            Err(ProtoError::Json(_))
        ));
    }

    #[test]
    fn test_key_exchange_request_empty_key() {
        let env = Envelope::request(ACTION_KEY_EXCHANGE, r#"{"senderId":"abc","publicKey":""}"#);
        assert!(matches!(
            KeyExchangeRequest::from_envelope(&env),
            Err(ProtoError::InvalidField(_))
        ));
    }

    #[test]
    fn test_key_exchange_wrong_action() {
        let env = Envelope::request("list", r#"{"senderId":"abc","publicKey":"k"}"#);
        assert!(matches!(
            KeyExchangeRequest::from_envelope(&env),
            Err(ProtoError::Unexpected { .. })
        ));
    }

    #[test]
    fn test_key_exchange_response_requires_response_type() {
        let env = Envelope::request(ACTION_KEY_EXCHANGE, r#"{"serverPublicKey":"k"}"#);
        assert!(KeyExchangeResponse::from_envelope(&env).is_err());

        let env = KeyExchangeResponse { server_public_key: "k".into() }
            .to_envelope()
            .unwrap();
        assert_eq!(KeyExchangeResponse::from_envelope(&env).unwrap().server_public_key, "k");
    }
}
