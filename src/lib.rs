//! Two-tier SMTP ingestion pipeline: a front-tier SMTP engine (C1-C7)
//! and a back-tier content-scanning submission service (C8-C10), shared
//! by the `smtp-front` and `submission-service` binaries.

pub mod address;
pub mod config;
pub mod engine;
pub mod line;
pub mod message;
pub mod metrics;
pub mod receiver;
pub mod reply;
pub mod rpc;
pub mod scanner;
pub mod server;
pub mod submission_callback;
pub mod submission_service;
pub mod tls;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;
use log::{error, info};
use tokio::select;

use config::{BackConfig, FrontConfig};
use metrics::Metrics;
use server::Acceptor;
use submission_callback::{BackendTarget, SubmissionCallback};
use submission_service::SubmissionService;

/// Runs the `smtp-front` binary: the SMTP accept loop plus its telemetry
/// endpoint, monitored the way the teacher's `lib::run` watches its SMTP
/// and health servers with `tokio::select!` — either exiting is fatal.
pub async fn run_front(config: FrontConfig) -> Result<()> {
    info!(
        "Starting {} v{} SMTP front end",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    );

    let metrics = Metrics::new();
    let resolver = Arc::new(TokioAsyncResolver::tokio(
        ResolverConfig::default(),
        ResolverOpts::default(),
    ));

    let tls = if config.insecure_backends {
        None
    } else {
        let (cert, key, ca) = match (&config.cert, &config.key, &config.ca_certificate) {
            (Some(c), Some(k), Some(ca)) => (c, k, ca),
            _ => {
                return Err(anyhow!(
                    "--cert, --key and --ca-certificate are required unless --insecure-backends is set"
                ))
            }
        };
        let client_config = tls::client_config(cert, key, ca)?;
        let server_name = config
            .submission_uri
            .split(':')
            .next()
            .unwrap_or(&config.submission_uri)
            .to_string();
        Some((client_config, server_name))
    };

    let backend = BackendTarget {
        submission_uri: config.submission_uri.clone(),
        tls,
    };

    let bind: SocketAddr = config
        .bind
        .parse()
        .map_err(|e| anyhow!("invalid --bind address {:?}: {e}", config.bind))?;
    let web_bind: SocketAddr = config
        .web_port
        .parse()
        .map_err(|e| anyhow!("invalid --web-port address {:?}: {e}", config.web_port))?;

    let acceptor = Acceptor::new(
        bind,
        config.max_body_bytes(),
        env!("CARGO_PKG_VERSION").to_string(),
        metrics.clone(),
    );

    let smtp_metrics = metrics.clone();
    let smtp_handle = tokio::spawn(async move {
        acceptor
            .run(move |peer| {
                SubmissionCallback::new(
                    peer,
                    resolver.clone(),
                    backend.clone(),
                    config.max_body_bytes(),
                    smtp_metrics.clone(),
                )
            })
            .await
    });

    let metrics_handle = tokio::spawn(async move { metrics::serve(web_bind, metrics).await });

    select! {
        res = smtp_handle => {
            error!("SMTP accept loop terminated");
            match res {
                Ok(Ok(())) => Err(anyhow!("SMTP accept loop exited cleanly, which is unexpected")),
                Ok(Err(e)) => Err(e),
                Err(join_error) => Err(anyhow!("SMTP accept loop task failed: {join_error}")),
            }
        }
        res = metrics_handle => {
            error!("metrics server terminated");
            match res {
                Ok(Ok(())) => Err(anyhow!("metrics server exited cleanly, which is unexpected")),
                Ok(Err(e)) => Err(e),
                Err(join_error) => Err(anyhow!("metrics server task failed: {join_error}")),
            }
        }
    }
}

/// Runs the `submission-service` binary: the RPC server plus its
/// telemetry endpoint.
pub async fn run_back(config: BackConfig) -> Result<()> {
    info!(
        "Starting {} v{} submission service",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    );

    let metrics = Metrics::new();
    let bind: SocketAddr = config
        .bind_to
        .parse()
        .map_err(|e| anyhow!("invalid bind_to address {:?}: {e}", config.bind_to))?;

    let tls_config = if config.insecure {
        None
    } else {
        let cert = config
            .x509_cert
            .as_deref()
            .ok_or_else(|| anyhow!("x509_cert is required unless insecure = true"))?;
        let key = config
            .x509_key
            .as_deref()
            .ok_or_else(|| anyhow!("x509_key is required unless insecure = true"))?;
        Some(tls::server_config(cert, key, config.x509_ca_cert.as_deref())?)
    };

    let service = Arc::new(SubmissionService::new(config.spamd_host.clone(), metrics.clone()));

    let rpc_service = service.clone();
    let rpc_handle = tokio::spawn(async move {
        rpc::serve(bind, tls_config, move |request| {
            let service = rpc_service.clone();
            async move {
                let rpc::RpcRequest::Send(msg) = request;
                rpc::RpcResponse::Submission(service.send(msg).await)
            }
        })
        .await
    });

    // `web_port` has no back-tier equivalent in the config table; the
    // telemetry surface binds next to the RPC port on the port-plus-one,
    // matching the front tier's separation of concerns without adding a
    // config key the spec doesn't define.
    let web_bind = SocketAddr::new(bind.ip(), bind.port().wrapping_add(1));
    let metrics_handle = tokio::spawn(async move { metrics::serve(web_bind, metrics).await });

    select! {
        res = rpc_handle => {
            error!("submission RPC server terminated");
            match res {
                Ok(Ok(())) => Err(anyhow!("submission RPC server exited cleanly, which is unexpected")),
                Ok(Err(e)) => Err(e),
                Err(join_error) => Err(anyhow!("submission RPC server task failed: {join_error}")),
            }
        }
        res = metrics_handle => {
            error!("metrics server terminated");
            match res {
                Ok(Ok(())) => Err(anyhow!("metrics server exited cleanly, which is unexpected")),
                Ok(Err(e)) => Err(e),
                Err(join_error) => Err(anyhow!("metrics server task failed: {join_error}")),
            }
        }
    }
}
