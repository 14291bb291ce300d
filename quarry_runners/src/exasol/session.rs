//! Sessions against an Exasol cluster.
//!
//! The runner only needs "execute one statement, hand back a result set", so
//! that is the whole seam. [`WebSocketConnector`] speaks Exasol's JSON
//! command protocol over a WebSocket: `login` hands out an RSA key, the
//! password travels encrypted with it, then statements run with `execute`
//! and large result sets are drained with `fetch`.

use super::types::NativeType;
use super::ExasolConfig;
use crate::error::{RunnerError, RunnerResult};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use futures::{SinkExt, StreamExt};
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::pkcs8::DecodePublicKey;
use rsa::{Pkcs1v15Encrypt, RsaPublicKey};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::debug;

pub const PROTOCOL_VERSION: u32 = 3;
const CLIENT_NAME: &str = "quarry";
/// Upper bound of one `fetch` reply.
const FETCH_BYTES: u64 = 5 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NativeColumn {
    pub name: String,
    #[serde(rename = "dataType")]
    pub data_type: NativeType,
}

/// Result set with rows already transposed from the column-major wire form.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NativeResultSet {
    pub columns: Vec<NativeColumn>,
    pub rows: Vec<Vec<Value>>,
}

impl NativeResultSet {
    pub fn new(columns: Vec<NativeColumn>, rows: Vec<Vec<Value>>) -> Self {
        Self { columns, rows }
    }

    /// Builds rows from `data[column][row]`.
    pub fn from_columns(columns: Vec<NativeColumn>, data: Vec<Vec<Value>>) -> RunnerResult<Self> {
        if data.len() != columns.len() && !data.is_empty() {
            return Err(RunnerError::Format(format!(
                "{} columns declared but {} returned",
                columns.len(),
                data.len()
            )));
        }
        let row_count = data.first().map_or(0, Vec::len);
        let mut rows = vec![Vec::with_capacity(columns.len()); row_count];
        for column in data {
            if column.len() != row_count {
                return Err(RunnerError::Format("ragged result set".to_string()));
            }
            for (row, cell) in rows.iter_mut().zip(column) {
                row.push(cell);
            }
        }
        Ok(Self { columns, rows })
    }
}

#[async_trait]
pub trait ExasolSession: Send {
    async fn execute(&mut self, sql: &str) -> RunnerResult<NativeResultSet>;

    async fn close(&mut self) -> RunnerResult<()> {
        Ok(())
    }
}

#[async_trait]
pub trait ExasolConnector: Send + Sync {
    async fn connect(&self, config: &ExasolConfig) -> RunnerResult<Box<dyn ExasolSession>>;
}

#[derive(Deserialize)]
struct Response {
    status: String,
    #[serde(rename = "responseData")]
    response_data: Option<Value>,
    exception: Option<Exception>,
}

#[derive(Deserialize)]
struct Exception {
    text: String,
}

#[derive(Deserialize)]
struct LoginKey {
    #[serde(rename = "publicKeyPem")]
    public_key_pem: String,
}

#[derive(Deserialize)]
struct ExecuteData {
    #[serde(default)]
    results: Vec<StatementResult>,
}

#[derive(Deserialize)]
struct StatementResult {
    #[serde(rename = "resultSet")]
    result_set: Option<WireResultSet>,
}

#[derive(Deserialize)]
struct WireResultSet {
    /// Present only when rows remain on the server.
    #[serde(rename = "resultSetHandle")]
    handle: Option<i64>,
    #[serde(rename = "numRows", default)]
    num_rows: u64,
    columns: Vec<NativeColumn>,
    #[serde(default)]
    data: Vec<Vec<Value>>,
}

#[derive(Deserialize)]
struct FetchData {
    #[serde(rename = "numRows")]
    num_rows: u64,
    #[serde(default)]
    data: Vec<Vec<Value>>,
}

/// The `responseData` of a successful reply. An `error` reply becomes a
/// [`RunnerError::Query`] carrying the server's text.
pub fn response_data(body: Value) -> RunnerResult<Value> {
    let response: Response = serde_json::from_value(body)?;
    match response.status.as_str() {
        "ok" => Ok(response.response_data.unwrap_or(Value::Null)),
        "error" => Err(RunnerError::Query(
            response
                .exception
                .map(|e| e.text)
                .unwrap_or_else(|| "unknown error".to_string()),
        )),
        other => Err(RunnerError::Format(format!("status \"{}\"", other))),
    }
}

/// Encrypts `password` with the key from the `login` reply, base64 encoded
/// the way the server expects it.
pub fn encrypt_password(public_key_pem: &str, password: &str) -> RunnerResult<String> {
    let key = RsaPublicKey::from_pkcs1_pem(public_key_pem)
        .or_else(|_| RsaPublicKey::from_public_key_pem(public_key_pem))
        .map_err(|e| RunnerError::Format(format!("invalid login key: {}", e)))?;
    let encrypted = key
        .encrypt(&mut rand::thread_rng(), Pkcs1v15Encrypt, password.as_bytes())
        .map_err(|e| RunnerError::Format(format!("cannot encrypt password: {}", e)))?;
    Ok(STANDARD.encode(encrypted))
}

/// Appends a column-major chunk to `data`.
fn extend_columns(data: &mut Vec<Vec<Value>>, chunk: Vec<Vec<Value>>) -> RunnerResult<()> {
    if data.is_empty() {
        *data = chunk;
        return Ok(());
    }
    if chunk.len() != data.len() {
        return Err(RunnerError::Format(format!(
            "fetch returned {} columns, expected {}",
            chunk.len(),
            data.len()
        )));
    }
    for (column, more) in data.iter_mut().zip(chunk) {
        column.extend(more);
    }
    Ok(())
}

#[derive(Default)]
pub struct WebSocketConnector;

#[async_trait]
impl ExasolConnector for WebSocketConnector {
    async fn connect(&self, config: &ExasolConfig) -> RunnerResult<Box<dyn ExasolSession>> {
        let scheme = if config.encrypted { "wss" } else { "ws" };
        let endpoint = url::Url::parse(&format!("{}://{}:{}", scheme, config.host, config.port))
            .map_err(|e| RunnerError::Configuration(format!("invalid host: {}", e)))?;
        debug!(%endpoint, user = %config.user, "opening exasol session");

        let (socket, _) = tokio_tungstenite::connect_async(endpoint.as_str()).await?;
        let mut session = WebSocketSession { socket };
        session.login(config).await?;
        Ok(Box::new(session))
    }
}

pub struct WebSocketSession {
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl WebSocketSession {
    /// Sends one command and waits for its reply.
    async fn command(&mut self, command: Value) -> RunnerResult<Value> {
        self.socket.send(Message::Text(command.to_string().into())).await?;
        loop {
            match self.socket.next().await {
                Some(Ok(Message::Text(text))) => return Ok(serde_json::from_str(&text)?),
                Some(Ok(Message::Binary(bytes))) => return Ok(serde_json::from_slice(&bytes)?),
                Some(Ok(Message::Close(_))) | None => {
                    return Err(RunnerError::Transport(
                        "Exasol closed the connection".to_string(),
                    ))
                }
                // ping and pong
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
            }
        }
    }

    async fn login(&mut self, config: &ExasolConfig) -> RunnerResult<()> {
        let login = json!({"command": "login", "protocolVersion": PROTOCOL_VERSION});
        let key: LoginKey = serde_json::from_value(response_data(self.command(login).await?)?)?;

        let credentials = json!({
            "username": config.user,
            "password": encrypt_password(&key.public_key_pem, &config.password)?,
            "useCompression": false,
            "clientName": CLIENT_NAME,
            "clientVersion": env!("CARGO_PKG_VERSION"),
            "attributes": {"autocommit": true},
        });
        let reply = self.command(credentials).await?;
        response_data(reply).map_err(|e| match e {
            RunnerError::Query(text) => RunnerError::Transport(format!("Exasol login failed: {}", text)),
            other => other,
        })?;
        debug!(user = %config.user, "exasol login succeeded");
        Ok(())
    }

    /// Pulls the rows the `execute` reply did not carry, then frees the
    /// server side handle.
    async fn fetch_rest(&mut self, handle: i64, total: u64, data: &mut Vec<Vec<Value>>) -> RunnerResult<()> {
        let mut position = data.first().map_or(0, Vec::len) as u64;
        while position < total {
            let fetch = json!({
                "command": "fetch",
                "resultSetHandle": handle,
                "startPosition": position,
                "numBytes": FETCH_BYTES,
            });
            let chunk: FetchData = serde_json::from_value(response_data(self.command(fetch).await?)?)?;
            if chunk.num_rows == 0 {
                return Err(RunnerError::Format(format!(
                    "result set ended after {} of {} rows",
                    position, total
                )));
            }
            position += chunk.num_rows;
            extend_columns(data, chunk.data)?;
        }
        debug!(handle, rows = total, "result set fetched");

        let close = json!({"command": "closeResultSet", "resultSetHandles": [handle]});
        response_data(self.command(close).await?)?;
        Ok(())
    }
}

#[async_trait]
impl ExasolSession for WebSocketSession {
    async fn execute(&mut self, sql: &str) -> RunnerResult<NativeResultSet> {
        let execute = json!({"command": "execute", "sqlText": sql, "attributes": {}});
        let reply: ExecuteData = serde_json::from_value(response_data(self.command(execute).await?)?)?;

        // rowCount results carry no result set
        let Some(set) = reply.results.into_iter().next().and_then(|r| r.result_set) else {
            return Ok(NativeResultSet::default());
        };
        let mut data = set.data;
        if let Some(handle) = set.handle {
            self.fetch_rest(handle, set.num_rows, &mut data).await?;
        }
        NativeResultSet::from_columns(set.columns, data)
    }

    async fn close(&mut self) -> RunnerResult<()> {
        response_data(self.command(json!({"command": "disconnect"})).await?)?;
        self.socket.close(None).await?;
        Ok(())
    }
}
