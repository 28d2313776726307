//! Per-connection lifecycle: anti-pipelining probe, banner, command
//! dispatch, deadlines, termination (C4).

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Result;
use log::{debug, error, info};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::time::timeout;

use crate::line::{drain_rest, read_dot_body};
use crate::metrics::Metrics;
use crate::receiver::{ReplyDisposition, SmtpReceiver};
use crate::reply::*;

const PROBE_WINDOW: Duration = Duration::from_secs(1);
const COMMAND_IDLE: Duration = Duration::from_secs(60);

/// Extensions advertised on a multi-line `EHLO` response when the
/// receiver doesn't emit its own capability list.
const DEFAULT_EXTENSIONS: &[&str] = &["ETRN", "8BITMIME", "DSN"];

/// A write/read handle given to the receiver's `data` callback so it can
/// emit the 354 banner itself and stream the dot-terminated body.
pub struct DataIo<'a> {
    writer: &'a mut (dyn AsyncWrite + Unpin + Send),
    reader: &'a mut (dyn AsyncBufRead + Unpin + Send),
    pub max_bytes: usize,
}

impl<'a> DataIo<'a> {
    pub async fn respond(&mut self, code: u16, text: &str) -> Result<()> {
        let out = format!("{code:03} {text}\r\n");
        self.writer.write_all(out.as_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }

    pub async fn read_body(&mut self) -> Result<Vec<u8>> {
        read_dot_body(self.reader, self.max_bytes).await
    }

    pub async fn drain_rest(&mut self) -> Result<()> {
        drain_rest(self.reader).await
    }

    /// Direct writer access for receivers that need more than `respond`,
    /// e.g. streaming a multi-line capability banner before DATA.
    pub fn writer(&mut self) -> &mut (dyn AsyncWrite + Unpin + Send) {
        self.writer
    }
}

/// Runs the SMTP conversation for one accepted socket to completion.
///
/// `max_body_bytes` is the size cap in bytes (computed from the
/// configured per-MiB budget). `version` is the banner's version string.
pub async fn handle_connection<S>(
    socket: S,
    peer: SocketAddr,
    mut receiver: impl SmtpReceiver,
    max_body_bytes: usize,
    version: &str,
    metrics: &Metrics,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    metrics.active_connections.inc();
    let (read_half, mut write_half) = tokio::io::split(socket);
    let mut reader = BufReader::new(read_half);

    let mut pending_reply: Option<ReplyDisposition> = None;
    let outcome = run(
        &mut reader,
        &mut write_half,
        peer,
        &mut receiver,
        max_body_bytes,
        version,
        metrics,
        &mut pending_reply,
    )
    .await;

    if let Err(e) = outcome {
        debug!("connection from {peer} ended: {e}");
    }

    if let Some(rc) = pending_reply.take() {
        let _ = write_reply(&mut write_half, &rc, metrics).await;
    }
    receiver.connection_closed().await;
    metrics.active_connections.dec();
    let _ = write_half.shutdown().await;
}

async fn write_reply<W: AsyncWrite + Unpin>(
    writer: &mut W,
    rc: &ReplyDisposition,
    metrics: &Metrics,
) -> Result<()> {
    if rc.code == 0 {
        return Ok(());
    }
    let lines: Vec<&str> = rc.text.split('\n').collect();
    let last = lines.len().saturating_sub(1);
    for (i, line) in lines.iter().enumerate() {
        let sep = if i == last { ' ' } else { '-' };
        let out = format!("{:03}{}{}\r\n", rc.code, sep, line);
        writer.write_all(out.as_bytes()).await?;
    }
    writer.flush().await?;
    metrics.bytes_out.add((rc.text.len() + 6) as u64);
    metrics.return_codes.incr(&rc.code.to_string());
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn run<R, W>(
    reader: &mut BufReader<R>,
    writer: &mut W,
    peer: SocketAddr,
    receiver: &mut impl SmtpReceiver,
    max_body_bytes: usize,
    version: &str,
    metrics: &Metrics,
    pending_reply: &mut Option<ReplyDisposition>,
) -> Result<()>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    // Anti-pipelining probe: any bytes before the greeting is abusive.
    let mut probe_line = String::new();
    match timeout(PROBE_WINDOW, reader.read_line(&mut probe_line)).await {
        Ok(Ok(n)) if n > 0 => {
            metrics.bytes_in.add(n as u64);
            metrics.dialog_errors.incr("unauth-pipelining");
            *pending_reply = Some(ReplyDisposition::terminating(
                SMTP_CLOSING,
                "I can break rules, too. Goodbye.",
            ));
            return Ok(());
        }
        Ok(Ok(_)) => {
            // EOF before the probe window elapsed; nothing to greet.
            return Ok(());
        }
        Ok(Err(e)) => return Err(e.into()),
        Err(_timeout_elapsed) => {
            // No bytes arrived during the probe window — proceed to greet.
        }
    }

    let open_rc = receiver.connection_opened(peer).await;
    if open_rc.code != 0 {
        write_reply(writer, &open_rc, metrics).await?;
        if open_rc.terminate {
            return Ok(());
        }
    } else {
        let banner = ReplyDisposition::new(SMTP_READY, format!("MailPump {version} ready."));
        write_reply(writer, &banner, metrics).await?;
    }

    loop {
        let mut line = String::new();
        let read_result = timeout(COMMAND_IDLE, reader.read_line(&mut line)).await;
        let n = match read_result {
            Ok(Ok(n)) => n,
            Ok(Err(e)) => {
                *pending_reply = Some(ReplyDisposition::terminating(SMTP_UNAVAIL, e.to_string()));
                metrics.dialog_errors.incr(&e.to_string());
                return Ok(());
            }
            Err(_elapsed) => {
                *pending_reply = Some(ReplyDisposition::terminating(
                    SMTP_CLOSING,
                    "Timeout; closing connection",
                ));
                metrics.command_timeouts.inc();
                return Ok(());
            }
        };
        metrics.bytes_in.add(n as u64);
        if n == 0 {
            // Peer closed the connection.
            return Ok(());
        }
        let cmd = line.trim_end_matches(['\r', '\n']).to_string();

        let rc = dispatch(
            &cmd,
            reader,
            writer,
            receiver,
            max_body_bytes,
            metrics,
        )
        .await?;

        if rc.code > 0 {
            write_reply(writer, &rc, metrics).await?;
        }
        if rc.terminate {
            return Ok(());
        }
    }
}

async fn dispatch<R, W>(
    cmd: &str,
    reader: &mut BufReader<R>,
    writer: &mut W,
    receiver: &mut impl SmtpReceiver,
    max_body_bytes: usize,
    metrics: &Metrics,
) -> Result<ReplyDisposition>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    let mut parts = cmd.splitn(2, ' ');
    let verb = parts.next().unwrap_or("").to_uppercase();
    let param = parts.next().unwrap_or("").trim();

    match verb.as_str() {
        "HELO" => Ok(receiver.helo(param, false).await),
        "EHLO" => {
            let rc = receiver.helo(param, true).await;
            if rc.code == 0 {
                // Receiver left the capability announcement to us.
                let mut text = format!("MailPump greets {}", if param.is_empty() { "client" } else { param });
                for ext in DEFAULT_EXTENSIONS {
                    text.push('\n');
                    text.push_str(ext);
                }
                Ok(ReplyDisposition::new(SMTP_COMPLETED, text))
            } else {
                Ok(rc)
            }
        }
        "MAIL" => Ok(receiver.mail_from(param).await),
        "RCPT" => Ok(receiver.rcpt_to(param).await),
        "DATA" => {
            if !param.is_empty() {
                return Ok(ReplyDisposition::new(SMTP_PARAMETER_ERROR, "DATA takes no parameters"));
            }
            let mut io = DataIo {
                writer,
                reader,
                max_bytes: max_body_bytes,
            };
            Ok(receiver.data(&mut io).await)
        }
        "ETRN" => Ok(receiver.etrn(param).await),
        "RSET" => {
            if !param.is_empty() {
                return Ok(ReplyDisposition::new(SMTP_PARAMETER_ERROR, "RSET takes no parameters"));
            }
            Ok(receiver.reset().await)
        }
        "QUIT" => {
            if !param.is_empty() {
                return Ok(ReplyDisposition::new(SMTP_PARAMETER_ERROR, "QUIT takes no parameters"));
            }
            Ok(receiver.quit().await)
        }
        "" => {
            metrics.dialog_errors.incr("empty-command");
            Ok(ReplyDisposition::new(SMTP_SYNTAX_ERROR, "Empty command"))
        }
        other => {
            info!("unknown command {other:?} from peer");
            error!("unsupported SMTP verb: {other}");
            Ok(ReplyDisposition::new(
                SMTP_NOT_IMPLEMENTED,
                format!("Command {other} is not supported."),
            ))
        }
    }
}
