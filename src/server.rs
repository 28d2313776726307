//! Accepts sockets, instantiates a per-connection engine, records accept
//! metrics (C7).
//!
//! Grounded directly in the teacher's `Server::run` accept loop
//! (`TcpListener::bind` + `loop { listener.accept().await }` +
//! `tokio::spawn` per connection); generalized to spawn the connection
//! engine instead of the teacher's inline command loop, and to drive the
//! telemetry counters named in C9 instead of plain `info!`/`error!` calls.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use log::info;
use tokio::net::TcpListener;

use crate::engine::handle_connection;
use crate::metrics::Metrics;
use crate::receiver::SmtpReceiver;

/// Owns a plain TCP listener and drives the accept loop described in C7.
/// SMTP-side TLS termination is out of scope (spec's non-goals: no
/// STARTTLS; "TLS is provided by the enclosing listener"), so this
/// accepts plaintext sockets only.
pub struct Acceptor {
    bind: SocketAddr,
    max_body_bytes: usize,
    version: String,
    metrics: Arc<Metrics>,
}

impl Acceptor {
    pub fn new(bind: SocketAddr, max_body_bytes: usize, version: String, metrics: Arc<Metrics>) -> Self {
        Acceptor {
            bind,
            max_body_bytes,
            version,
            metrics,
        }
    }

    /// Runs the accept loop. Never returns on success; the loop only
    /// exits if the initial bind fails.
    pub async fn run<F, R>(&self, make_receiver: F) -> Result<()>
    where
        F: Fn(SocketAddr) -> R,
        R: SmtpReceiver + 'static,
    {
        let listener = TcpListener::bind(self.bind).await?;
        info!("SMTP server listening on {}", self.bind);

        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    self.metrics.num_accepts.inc();
                    self.metrics.recent_accept_errors.set(0);

                    let receiver = make_receiver(peer);
                    let max_body_bytes = self.max_body_bytes;
                    let version = self.version.clone();
                    let metrics = self.metrics.clone();
                    tokio::spawn(async move {
                        handle_connection(stream, peer, receiver, max_body_bytes, &version, &metrics).await;
                    });
                }
                Err(e) => {
                    self.metrics.accept_errors.incr(&e.to_string());
                    self.metrics.recent_accept_errors.inc();
                }
            }
        }
    }
}
