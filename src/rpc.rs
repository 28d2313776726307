//! Submission RPC transport: length-prefixed framed RPC over TCP,
//! optionally wrapped in mutually-authenticated TLS (C8's wire format).
//!
//! No RPC framework (`tonic`, `tarpc`, `capnp`) appears anywhere in the
//! pack, so this is hand-built the way `Xuanwo-postman` builds its own
//! wire protocol: `serde` + `bincode` for the payload, framed with
//! `tokio_util::codec::LengthDelimitedCodec`. TLS reuses `rustls` /
//! `tokio-rustls`, already declared for the front tier's own ambitions.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use log::{error, info};
use rustls::pki_types::ServerName;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_rustls::{TlsAcceptor, TlsConnector};
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use crate::message::{Message, SubmissionResult};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// The one RPC method exposed by the submission service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RpcRequest {
    Send(Message),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RpcResponse {
    Submission(SubmissionResult),
}

/// Blanket marker so a boxed trait object can stand in for either a plain
/// `TcpStream` or a `tokio_rustls` stream at the framing layer.
pub trait RpcStream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> RpcStream for T {}

type Transport = Framed<Box<dyn RpcStream>, LengthDelimitedCodec>;

fn frame(stream: Box<dyn RpcStream>) -> Transport {
    Framed::new(stream, LengthDelimitedCodec::new())
}

async fn connect_transport(
    addr: &str,
    tls: Option<(Arc<rustls::ClientConfig>, String)>,
) -> Result<Transport> {
    let tcp = timeout(CONNECT_TIMEOUT, TcpStream::connect(addr))
        .await
        .context("connect timed out")??;
    let boxed: Box<dyn RpcStream> = match tls {
        Some((config, server_name)) => {
            let connector = TlsConnector::from(config);
            let name = ServerName::try_from(server_name)
                .map_err(|_| anyhow!("invalid TLS server name"))?;
            let tls_stream = connector.connect(name, tcp).await?;
            Box::new(tls_stream)
        }
        None => Box::new(tcp),
    };
    Ok(frame(boxed))
}

/// Issues one `Send` RPC against `addr`, optionally over mutual TLS.
/// Opens a fresh connection per call; the submission callback (C6) is the
/// caller and already serializes its own connection lifetime per message.
pub async fn call_send(
    addr: &str,
    tls: Option<(Arc<rustls::ClientConfig>, String)>,
    msg: Message,
) -> Result<SubmissionResult> {
    let mut transport = connect_transport(addr, tls).await?;
    let payload = bincode::serialize(&RpcRequest::Send(msg))?;
    transport.send(Bytes::from(payload)).await?;

    let frame = transport
        .next()
        .await
        .ok_or_else(|| anyhow!("submission service closed the connection without replying"))??;
    match bincode::deserialize::<RpcResponse>(&frame)? {
        RpcResponse::Submission(result) => Ok(result),
    }
}

/// Runs the back tier's RPC server: accepts connections, frames each one,
/// and dispatches every request to `handler`. One task per connection;
/// a connection may carry more than one request in sequence.
pub async fn serve<F, Fut>(
    bind: SocketAddr,
    tls: Option<Arc<rustls::ServerConfig>>,
    handler: F,
) -> Result<()>
where
    F: Fn(RpcRequest) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = RpcResponse> + Send + 'static,
{
    let listener = TcpListener::bind(bind).await?;
    info!("submission RPC service listening on {bind}");
    serve_listener(listener, tls, handler).await
}

/// Like `serve`, but over an already-bound listener — lets callers (and
/// tests) discover an OS-assigned ephemeral port before accepting.
pub async fn serve_listener<F, Fut>(
    listener: TcpListener,
    tls: Option<Arc<rustls::ServerConfig>>,
    handler: F,
) -> Result<()>
where
    F: Fn(RpcRequest) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = RpcResponse> + Send + 'static,
{
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                error!("rpc accept error: {e}");
                continue;
            }
        };
        let handler = handler.clone();
        let tls = tls.clone();
        tokio::spawn(async move {
            let boxed: Box<dyn RpcStream> = match tls {
                Some(config) => {
                    let acceptor = TlsAcceptor::from(config);
                    match acceptor.accept(stream).await {
                        Ok(tls_stream) => Box::new(tls_stream),
                        Err(e) => {
                            error!("TLS handshake with {peer} failed: {e}");
                            return;
                        }
                    }
                }
                None => Box::new(stream),
            };
            if let Err(e) = serve_connection(boxed, handler).await {
                error!("rpc connection from {peer} ended: {e}");
            }
        });
    }
}

async fn serve_connection<F, Fut>(stream: Box<dyn RpcStream>, handler: F) -> Result<()>
where
    F: Fn(RpcRequest) -> Fut,
    Fut: Future<Output = RpcResponse>,
{
    let mut transport = frame(stream);
    while let Some(frame) = transport.next().await {
        let frame = frame?;
        let request: RpcRequest = bincode::deserialize(&frame)?;
        let response = handler(request).await;
        let payload = bincode::serialize(&response)?;
        transport.send(Bytes::from(payload)).await?;
    }
    Ok(())
}
