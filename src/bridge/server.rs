//! Backend side of the remote execution protocol.
//!
//! Accepts one request per TCP connection, runs it on a local [`Database`] and
//! writes back the payload or an `@@error:` reply.

use crate::bridge::protocol::{DecodedRequest, FrameBuffer, decode_request, encode_error, encode_response};
use crate::db::TaskIdentity;
use crate::error::{DbError, DbResult};
use crate::facade::Database;
use crate::models::CommandKind;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Largest request accepted from a client.
pub const MAX_REQUEST_BYTES: usize = 8 * 1024 * 1024;

/// How long a client may take to send its request.
pub const REQUEST_READ_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct BackendServer {
    database: Database,
}

impl BackendServer {
    /// The database must run statements locally; a backend that forwards to
    /// another backend is rejected.
    pub fn new(database: Database) -> DbResult<Self> {
        if database.has_remote() {
            return Err(DbError::invalid_input(
                "The backend server executes locally; remove the remote settings",
            ));
        }
        Ok(Self { database })
    }

    /// Accept connections until the listener fails.
    pub async fn serve(&self, listener: TcpListener) -> std::io::Result<()> {
        info!(addr = ?listener.local_addr().ok(), "Backend server listening");
        loop {
            let (stream, peer) = listener.accept().await?;
            let database = self.database.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(database, stream, peer).await {
                    warn!(peer = %peer, error = %e, "Connection handling failed");
                }
            });
        }
    }
}

async fn handle_connection(
    database: Database,
    mut stream: TcpStream,
    peer: SocketAddr,
) -> std::io::Result<()> {
    let reply = match read_request(&mut stream).await {
        Ok(raw) => match decode_request(&raw) {
            Ok(request) => {
                debug!(peer = %peer, kind = %request.kind, "Handling remote command");
                match execute(&database, TaskIdentity::current(), request).await {
                    Ok(payload) => encode_response(&payload),
                    Err(err) => encode_error(&error_message(&err)),
                }
            }
            Err(e) => encode_error(&e.to_string()),
        },
        Err(message) => encode_error(&message),
    };

    stream.write_all(reply.as_bytes()).await?;
    stream.shutdown().await
}

async fn read_request(stream: &mut TcpStream) -> Result<String, String> {
    let mut frame = FrameBuffer::new(MAX_REQUEST_BYTES);
    let read = timeout(REQUEST_READ_TIMEOUT, async {
        let mut chunk = [0u8; 8 * 1024];
        loop {
            let n = stream.read(&mut chunk).await.map_err(|e| e.to_string())?;
            if n == 0 || frame.push(&chunk[..n]).map_err(|e| e.to_string())? {
                return Ok::<(), String>(());
            }
        }
    })
    .await;

    match read {
        Ok(Ok(())) => Ok(frame.into_string()),
        Ok(Err(message)) => Err(message),
        Err(_) => Err(format!("request not received within {:?}", REQUEST_READ_TIMEOUT)),
    }
}

/// Run a decoded request and render its payload.
async fn execute(database: &Database, task: TaskIdentity, request: DecodedRequest) -> DbResult<String> {
    let DecodedRequest { kind, query, params } = request;
    let payload = match kind {
        CommandKind::Select => render(&database.select(task, &query, &params).await?)?,
        CommandKind::First => render(&database.first(task, &query, &params).await?)?,
        CommandKind::Count => database.count(task, &query, &params).await?.to_string(),
        CommandKind::Sum => {
            let sum = database.sum(task, &query, &params).await?;
            render(&serde_json::json!({ "sum": sum }))?
        }
        CommandKind::Insert => database.insert(task, &query, &params).await?.to_string(),
        CommandKind::Update => database.update(task, &query, &params).await?.to_string(),
        CommandKind::Execute => {
            database.execute(task, &query, &params).await?;
            String::new()
        }
    };
    Ok(payload)
}

fn render<T: serde::Serialize>(value: &T) -> DbResult<String> {
    serde_json::to_string(value)
        .map_err(|e| DbError::internal(format!("Failed to encode payload: {}", e)))
}

/// Message sent to the client. Database errors travel without their prefix so
/// the client does not wrap them twice.
fn error_message(err: &DbError) -> String {
    match err {
        DbError::Database { message, .. } => message.clone(),
        other => other.to_string(),
    }
}
