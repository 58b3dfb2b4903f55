//! TCP 推送服务
//!
//! 每个客户端连接:
//! - 首帧必须是 Handshake (`HandshakePayload`)，服务端回 `HandshakeAck`
//! - 注册到 [`ConnectionRegistry`]，拿到该连接的发送队列
//! - 写循环把队列中的 `PushEnvelope` 编码成 Push 帧发出
//! - 读任务只用于检测断开 (客户端 Ping 忽略)
//! - 断开或 shutdown 时从注册表移除

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use shared::ErrorCode;
use shared::message::{Frame, FrameType, HandshakeAck, HandshakePayload};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::registry::ConnectionRegistry;
use super::transport::{read_frame, write_frame};
use crate::utils::AppError;

/// Time allowed for the client to send its handshake
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Delay before closing connection after sending error (allows client to receive the message)
const HANDSHAKE_ERROR_DELAY_MS: u64 = 100;

#[derive(Debug, Clone)]
pub struct PushServer {
    registry: Arc<ConnectionRegistry>,
    shutdown: CancellationToken,
}

impl PushServer {
    pub fn new(registry: Arc<ConnectionRegistry>, shutdown: CancellationToken) -> Self {
        Self { registry, shutdown }
    }

    /// Bind and serve until shutdown
    pub async fn run(&self, addr: &str) -> Result<(), AppError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| AppError::internal(format!("Failed to bind {}: {}", addr, e)))?;
        tracing::info!("Push TCP server listening on {}", addr);
        self.serve(listener).await
    }

    /// Main accept loop
    pub async fn serve(&self, listener: TcpListener) -> Result<(), AppError> {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    tracing::info!("Push TCP server shutting down");
                    break;
                }

                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            tracing::debug!("Client connected: {}", addr);
                            self.spawn_client_handler(stream, addr);
                        }
                        Err(e) => {
                            tracing::error!("Failed to accept connection: {}", e);
                        }
                    }
                }
            }
        }

        Ok(())
    }

    fn spawn_client_handler(&self, stream: TcpStream, addr: SocketAddr) {
        let registry = self.registry.clone();
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            if let Err(e) = handle_client_connection(stream, addr, registry, shutdown).await {
                tracing::debug!("Client {} handler finished: {}", addr, e);
            }
        });
    }
}

/// Handle a single client connection
async fn handle_client_connection(
    stream: TcpStream,
    addr: SocketAddr,
    registry: Arc<ConnectionRegistry>,
    shutdown: CancellationToken,
) -> Result<(), AppError> {
    let _ = stream.set_nodelay(true);
    let (mut reader, mut writer) = stream.into_split();

    let payload = match tokio::time::timeout(HANDSHAKE_TIMEOUT, perform_handshake(&mut reader, &mut writer, addr)).await {
        Ok(result) => result?,
        Err(_) => {
            tracing::warn!("Client {} handshake timed out", addr);
            return Err(AppError::invalid("Handshake timed out"));
        }
    };

    let conn_id = Uuid::new_v4().to_string();
    let mut rx = match registry.add_connection(payload.user_id, &conn_id, payload.role, payload.store_id) {
        Ok(rx) => rx,
        Err(e) => {
            tracing::warn!(user_id = payload.user_id, "Client {} rejected: {}", addr, e);
            send_handshake_error(&mut writer, e.code(), &e.to_string()).await;
            return Err(AppError::conflict(e.to_string()));
        }
    };

    let ack = HandshakeAck {
        success: true,
        conn_id: Some(conn_id.clone()),
        error_code: None,
        message: format!("Connected as {}", conn_id),
    };
    if let Err(e) = send_ack(&mut writer, &ack).await {
        registry.remove_connection(&conn_id);
        return Err(e);
    }
    tracing::info!(
        conn_id = %conn_id,
        user_id = payload.user_id,
        role = ?payload.role,
        store_id = ?payload.store_id,
        "Push client registered"
    );

    // 读任务检测到断开时取消 disconnect_token
    let disconnect_token = CancellationToken::new();
    let reader_handle = spawn_disconnect_watcher(reader, conn_id.clone(), disconnect_token.clone());

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::debug!(conn_id = %conn_id, "Session shutting down");
                break;
            }
            _ = disconnect_token.cancelled() => {
                tracing::debug!(conn_id = %conn_id, "Client disconnected, writer stopping");
                break;
            }
            envelope = rx.recv() => {
                let Some(envelope) = envelope else {
                    break;
                };
                let frame = match Frame::json(FrameType::Push, &envelope) {
                    Ok(frame) => frame,
                    Err(e) => {
                        tracing::error!(conn_id = %conn_id, error = %e, "Failed to encode envelope");
                        continue;
                    }
                };
                if let Err(e) = write_frame(&mut writer, &frame).await {
                    tracing::debug!(conn_id = %conn_id, "Client write failed: {}", e);
                    break;
                }
            }
        }
    }

    // Cleanup
    reader_handle.abort();
    let _ = writer.shutdown().await;
    registry.remove_connection(&conn_id);
    tracing::debug!(conn_id = %conn_id, "Client removed from registry");

    Ok(())
}

/// Read and validate the handshake frame
async fn perform_handshake(
    reader: &mut OwnedReadHalf,
    writer: &mut OwnedWriteHalf,
    addr: SocketAddr,
) -> Result<HandshakePayload, AppError> {
    tracing::debug!("Waiting for handshake from {}", addr);

    let frame = read_frame(reader).await.map_err(|e| {
        tracing::warn!("Client {} handshake error: {}", addr, e);
        e
    })?;

    if frame.frame_type != FrameType::Handshake {
        tracing::warn!(
            "Client {} failed to handshake: expected Handshake, got {:?}",
            addr,
            frame.frame_type
        );
        send_handshake_error(writer, ErrorCode::ValidationFailed, "Expected handshake frame").await;
        return Err(AppError::invalid("Expected Handshake frame"));
    }

    match frame.parse::<HandshakePayload>() {
        Ok(payload) => Ok(payload),
        Err(e) => {
            tracing::warn!("Client {} sent invalid handshake payload: {}", addr, e);
            send_handshake_error(writer, ErrorCode::ValidationFailed, "Invalid handshake payload").await;
            Err(AppError::invalid(format!("Invalid handshake payload: {}", e)))
        }
    }
}

async fn send_ack(writer: &mut OwnedWriteHalf, ack: &HandshakeAck) -> Result<(), AppError> {
    let frame = Frame::json(FrameType::Handshake, ack)?;
    write_frame(writer, &frame).await
}

/// Send handshake error to client
async fn send_handshake_error(writer: &mut OwnedWriteHalf, code: ErrorCode, message: &str) {
    let ack = HandshakeAck {
        success: false,
        conn_id: None,
        error_code: Some(code),
        message: message.to_string(),
    };
    if let Err(e) = send_ack(writer, &ack).await {
        tracing::error!("Failed to send handshake error: {}", e);
    }

    // Give client some time to receive the message before closing
    tokio::time::sleep(Duration::from_millis(HANDSHAKE_ERROR_DELAY_MS)).await;
}

fn spawn_disconnect_watcher(
    mut reader: OwnedReadHalf,
    conn_id: String,
    disconnect_token: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match read_frame(&mut reader).await {
                Ok(frame) if frame.frame_type == FrameType::Ping => {
                    tracing::trace!(conn_id = %conn_id, "Ping");
                }
                Ok(frame) => {
                    tracing::debug!(conn_id = %conn_id, frame_type = ?frame.frame_type, "Unexpected client frame ignored");
                }
                Err(AppError::ClientDisconnected) => {
                    tracing::debug!(conn_id = %conn_id, "Client disconnected");
                    break;
                }
                Err(e) => {
                    tracing::debug!(conn_id = %conn_id, "Client read error: {}", e);
                    break;
                }
            }
        }
        disconnect_token.cancel();
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::registry::PushSink;
    use shared::message::{ConnectionRole, SystemAnnouncementPayload};
    use shared::{PushEnvelope, PushEventType};

    struct Harness {
        addr: SocketAddr,
        registry: Arc<ConnectionRegistry>,
        shutdown: CancellationToken,
        server: tokio::task::JoinHandle<Result<(), AppError>>,
    }

    async fn start(registry: ConnectionRegistry) -> Harness {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let registry = Arc::new(registry);
        let shutdown = CancellationToken::new();
        let server = PushServer::new(registry.clone(), shutdown.clone());
        let server = tokio::spawn(async move { server.serve(listener).await });
        Harness {
            addr,
            registry,
            shutdown,
            server,
        }
    }

    async fn connect(addr: SocketAddr, user_id: i64, store_id: Option<i64>) -> (TcpStream, HandshakeAck) {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let role = if store_id.is_some() {
            ConnectionRole::Merchant
        } else {
            ConnectionRole::User
        };
        let hello = HandshakePayload {
            user_id,
            role,
            store_id,
        };
        write_frame(&mut stream, &Frame::json(FrameType::Handshake, &hello).unwrap())
            .await
            .unwrap();
        let frame = read_frame(&mut stream).await.unwrap();
        assert_eq!(frame.frame_type, FrameType::Handshake);
        (stream, frame.parse().unwrap())
    }

    async fn wait_until(mut cond: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !cond() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_handshake_and_push() {
        let h = start(ConnectionRegistry::default()).await;
        let (mut client, ack) = connect(h.addr, 1, None).await;
        assert!(ack.success);
        let conn_id = ack.conn_id.unwrap();
        assert!(h.registry.is_user_online(1));

        let envelope = PushEnvelope::new(
            PushEventType::SystemAnnouncement,
            &SystemAnnouncementPayload {
                message: "hi".to_string(),
            },
            42,
        )
        .unwrap();
        h.registry.push(&conn_id, envelope.clone()).unwrap();

        let frame = read_frame(&mut client).await.unwrap();
        assert_eq!(frame.frame_type, FrameType::Push);
        let received: PushEnvelope = frame.parse().unwrap();
        assert_eq!(received, envelope);

        // Ping 不影响会话
        write_frame(&mut client, &Frame::new(FrameType::Ping, vec![]))
            .await
            .unwrap();
        drop(client);
        let registry = h.registry.clone();
        wait_until(move || registry.stats().total_connections == 0).await;

        h.shutdown.cancel();
        h.server.await.unwrap().unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_over_limit_rejected() {
        let h = start(ConnectionRegistry::new(1, 16)).await;
        let (_first, ack) = connect(h.addr, 1, None).await;
        assert!(ack.success);

        let (mut second, ack) = connect(h.addr, 1, None).await;
        assert!(!ack.success);
        assert_eq!(ack.error_code, Some(ErrorCode::ConnectionLimit));
        assert!(matches!(
            read_frame(&mut second).await,
            Err(AppError::ClientDisconnected)
        ));
        assert_eq!(h.registry.connections_for_user(1).len(), 1);
        h.shutdown.cancel();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_non_handshake_first_frame() {
        let h = start(ConnectionRegistry::default()).await;
        let mut stream = TcpStream::connect(h.addr).await.unwrap();
        write_frame(&mut stream, &Frame::new(FrameType::Ping, vec![]))
            .await
            .unwrap();
        let ack: HandshakeAck = read_frame(&mut stream).await.unwrap().parse().unwrap();
        assert!(!ack.success);
        assert_eq!(ack.error_code, Some(ErrorCode::ValidationFailed));
        assert_eq!(h.registry.stats().total_connections, 0);
        h.shutdown.cancel();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_shutdown_closes_sessions() {
        let h = start(ConnectionRegistry::default()).await;
        let (mut client, _) = connect(h.addr, 1, None).await;
        let (_merchant, _) = connect(h.addr, 50, Some(7)).await;
        assert_eq!(h.registry.connections_for_store(7).len(), 1);

        h.shutdown.cancel();
        assert!(matches!(
            read_frame(&mut client).await,
            Err(AppError::ClientDisconnected)
        ));
        let registry = h.registry.clone();
        wait_until(move || registry.stats().total_connections == 0).await;
        h.server.await.unwrap().unwrap();
    }
}
