//! Gateway client: key exchange, signed requests and the receive task.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rsv_crypto::{CryptoEngine, PublicKey};
use rsv_proto::{
    DisconnectPayload, Envelope, IdLookup, KeyExchangeRequest, KeyExchangeResponse, MessageType, Reservation,
    ResourceAction,
};
use rsv_transport::{split_framed, FrameReader, FrameWriter, LengthCodec};
use serde::Serialize;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::observer::{ClientEvent, ConnectionStatus, SessionObserver};

/// A connected, key-exchanged session with the gateway.
///
/// Replies and notifications arrive asynchronously through the observer;
/// `send` and friends only write.
pub struct ProtocolClient {
    config: ClientConfig,
    crypto: Arc<CryptoEngine>,
    server_id: String,
    server_key: PublicKey,
    observer: Arc<dyn SessionObserver>,
    writer: Mutex<Option<FrameWriter<OwnedWriteHalf>>>,
    /// Set once the session is over, by whichever side noticed first.
    closed: Arc<AtomicBool>,
    receiver: JoinHandle<()>,
}

impl ProtocolClient {
    /// Connect with a freshly generated key pair.
    pub async fn connect(config: ClientConfig, observer: Arc<dyn SessionObserver>) -> Result<Self, ClientError> {
        let crypto = CryptoEngine::generate()?;
        Self::connect_with(config, Arc::new(crypto), observer).await
    }

    /// Connect using an existing key pair.
    pub async fn connect_with(
        config: ClientConfig,
        crypto: Arc<CryptoEngine>,
        observer: Arc<dyn SessionObserver>,
    ) -> Result<Self, ClientError> {
        let stream = tokio::time::timeout(config.connect_timeout(), TcpStream::connect(config.server_addr.as_str()))
            .await
            .map_err(|_| ClientError::Timeout("connect"))?
            .map_err(|source| ClientError::Connect {
                addr: config.server_addr.clone(),
                source,
            })?;
        let _ = stream.set_nodelay(true);
        debug!(server = %config.server_addr, "tcp connected");
        observer.on_event(ClientEvent::Status(ConnectionStatus::Connected));

        let (mut reader, mut writer) = split_framed(stream, LengthCodec::new(config.max_frame_size));
        let (server_id, server_key) = handshake(&config, &crypto, &mut reader, &mut writer).await?;
        info!(client = %config.client_id, server = %server_id, "key exchange completed");
        observer.on_event(ClientEvent::Status(ConnectionStatus::KeyExchangeCompleted));

        let closed = Arc::new(AtomicBool::new(false));
        let receiver = tokio::spawn(receive_loop(
            reader,
            Arc::clone(&crypto),
            server_key.clone(),
            Arc::clone(&observer),
            Arc::clone(&closed),
        ));

        Ok(Self {
            config,
            crypto,
            server_id,
            server_key,
            observer,
            writer: Mutex::new(Some(writer)),
            closed,
            receiver,
        })
    }

    pub fn client_id(&self) -> &str {
        &self.config.client_id
    }

    /// Id the server announced in its key exchange reply.
    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    pub fn server_public_key(&self) -> &PublicKey {
        &self.server_key
    }

    /// This client's public key as sent in the key exchange.
    pub fn public_key(&self) -> String {
        self.crypto.export_public_key()
    }

    pub fn is_connected(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }

    /// Stamp, sign and write `envelope`, encrypting it for the server when
    /// `encrypt` is set.
    pub async fn send(&self, mut envelope: Envelope, encrypt: bool) -> Result<(), ClientError> {
        envelope.sender_id = self.config.client_id.clone();
        envelope.signature = self.crypto.sign_base64(envelope.data.as_bytes())?;

        let plaintext = envelope.to_bytes()?;
        let frame = if encrypt {
            self.crypto.encrypt(&plaintext, &self.server_key)?
        } else {
            plaintext
        };

        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(ClientError::NotConnected)?;
        writer.write_frame(&frame).await?;
        debug!(action = %envelope.action, encrypted = encrypt, "request sent");
        Ok(())
    }

    /// Send an encrypted request whose data is the JSON form of `payload`.
    pub async fn request<T: Serialize>(&self, action: &str, payload: &T) -> Result<(), ClientError> {
        let envelope = Envelope::with_payload(MessageType::Request, action, payload)?;
        self.send(envelope, true).await
    }

    pub async fn list(&self) -> Result<(), ClientError> {
        self.send(Envelope::request(ResourceAction::List.as_str(), "{}"), true)
            .await
    }

    pub async fn get(&self, id: i64) -> Result<(), ClientError> {
        self.request(ResourceAction::Get.as_str(), &IdLookup { id }).await
    }

    pub async fn create(&self, reservation: &Reservation) -> Result<(), ClientError> {
        self.request(ResourceAction::Create.as_str(), reservation).await
    }

    pub async fn update(&self, reservation: &Reservation) -> Result<(), ClientError> {
        self.request(ResourceAction::Update.as_str(), reservation).await
    }

    pub async fn delete(&self, id: i64) -> Result<(), ClientError> {
        self.request(ResourceAction::Delete.as_str(), &IdLookup { id }).await
    }

    /// Tell the server we are leaving, close the socket and stop the
    /// receive task. Delivery of the notice is best effort.
    pub async fn disconnect(&self) -> Result<(), ClientError> {
        let Some(mut writer) = self.writer.lock().await.take() else {
            return Ok(());
        };
        let first = !self.closed.swap(true, Ordering::SeqCst);

        let notice = DisconnectPayload {
            sender_id: self.config.client_id.clone(),
        }
        .to_envelope()?;
        if let Err(e) = writer.write_frame(&notice.to_bytes()?).await {
            debug!("disconnect notice not delivered: {}", e);
        }
        let _ = writer.shutdown().await;
        self.receiver.abort();

        if first {
            self.observer
                .on_event(ClientEvent::Status(ConnectionStatus::Disconnected));
        }
        info!(client = %self.config.client_id, "disconnected");
        Ok(())
    }
}

impl Drop for ProtocolClient {
    fn drop(&mut self) {
        self.receiver.abort();
    }
}

async fn handshake(
    config: &ClientConfig,
    crypto: &CryptoEngine,
    reader: &mut FrameReader<OwnedReadHalf>,
    writer: &mut FrameWriter<OwnedWriteHalf>,
) -> Result<(String, PublicKey), ClientError> {
    let request = KeyExchangeRequest {
        sender_id: config.client_id.clone(),
        public_key: crypto.export_public_key(),
    };
    writer.write_frame(&request.to_envelope()?.to_bytes()?).await?;

    let frame = tokio::time::timeout(config.handshake_timeout(), reader.read_frame())
        .await
        .map_err(|_| ClientError::Timeout("handshake"))??
        .ok_or_else(|| ClientError::Handshake("connection closed before key exchange reply".into()))?;

    let envelope = Envelope::from_bytes(&frame).map_err(|e| ClientError::Handshake(e.to_string()))?;
    let response = KeyExchangeResponse::from_envelope(&envelope).map_err(|e| ClientError::Handshake(e.to_string()))?;
    let server_key = CryptoEngine::import_public_key(&response.server_public_key)?;
    Ok((envelope.sender_id, server_key))
}

async fn receive_loop(
    mut reader: FrameReader<OwnedReadHalf>,
    crypto: Arc<CryptoEngine>,
    server_key: PublicKey,
    observer: Arc<dyn SessionObserver>,
    closed: Arc<AtomicBool>,
) {
    loop {
        match reader.read_frame().await {
            Ok(Some(frame)) => observer.on_event(decode_frame(&crypto, &server_key, &frame)),
            Ok(None) => break,
            Err(e) => {
                if !closed.load(Ordering::SeqCst) {
                    warn!("receive failed: {}", e);
                    observer.on_event(ClientEvent::Error(e.to_string()));
                }
                break;
            }
        }
    }

    if !closed.swap(true, Ordering::SeqCst) {
        observer.on_event(ClientEvent::Status(ConnectionStatus::ConnectionLost));
    }
}

/// Turn one received frame into an event. Frames that do not decrypt are
/// read as plain envelopes.
fn decode_frame(crypto: &CryptoEngine, server_key: &PublicKey, frame: &[u8]) -> ClientEvent {
    let decoded = match crypto.decrypt(frame) {
        Ok(plaintext) => Envelope::from_bytes(&plaintext),
        Err(_) => Envelope::from_bytes(frame),
    };

    match decoded {
        Ok(envelope) => {
            let signature_valid = envelope.is_signed()
                && CryptoEngine::verify_base64(envelope.data.as_bytes(), &envelope.signature, server_key);
            ClientEvent::Message {
                envelope,
                signature_valid,
            }
        }
        Err(e) => ClientEvent::Error(format!("undecodable frame of {} bytes: {}", frame.len(), e)),
    }
}
