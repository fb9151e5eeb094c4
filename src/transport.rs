//! Link to the sensing service.
//!
//! One TCP connection carries newline-delimited JSON envelopes in both directions.
//! On every (re)connect the link first performs the bootstrap call (`get-state`)
//! and reports the returned snapshot as [`ServiceEvent::Connected`]; after that it
//! forwards inbound events to the console and writes queued requests out. When
//! the connection drops it reports [`ServiceEvent::Disconnected`], waits and tries
//! again until the console goes away.

use anyhow::{anyhow, bail, Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, info, warn};

use crate::protocol::{ServiceEvent, ServiceRequest, ServiceState};

const BOOTSTRAP_TIMEOUT: Duration = Duration::from_secs(5);

/// Why a connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEnd {
    /// The connection failed or was closed by the service
    Dropped(String),
    /// The console stopped listening; the link should shut down
    ConsoleGone,
}

/// Reconnecting TCP link.
#[derive(Debug, Clone)]
pub struct ServiceLink {
    address: String,
    reconnect_delay: Duration,
}

impl ServiceLink {
    /// Link to `address` (`host:port`), waiting `reconnect_delay` between attempts.
    pub fn new(address: impl Into<String>, reconnect_delay: Duration) -> Self {
        Self {
            address: address.into(),
            reconnect_delay,
        }
    }

    /// Connect, serve and reconnect until the console drops its event receiver or
    /// its request sender.
    pub async fn run(
        self,
        mut requests: mpsc::UnboundedReceiver<ServiceRequest>,
        events: mpsc::Sender<ServiceEvent>,
    ) {
        loop {
            match TcpStream::connect(&self.address).await {
                Ok(stream) => {
                    info!(address = %self.address, "connected to sensing service");
                    match serve_connection(stream, &mut requests, &events).await {
                        LinkEnd::ConsoleGone => return,
                        LinkEnd::Dropped(reason) => {
                            warn!(address = %self.address, %reason, "service link dropped");
                            if events
                                .send(ServiceEvent::Disconnected { reason })
                                .await
                                .is_err()
                            {
                                return;
                            }
                        }
                    }
                }
                Err(e) => {
                    debug!(address = %self.address, error = %e, "sensing service unreachable");
                }
            }
            if events.is_closed() {
                return;
            }
            sleep(self.reconnect_delay).await;
        }
    }
}

/// Serve one established connection until it ends.
///
/// Requests queued while the link was down are stale and are discarded before the
/// bootstrap call.
pub async fn serve_connection<S>(
    stream: S,
    requests: &mut mpsc::UnboundedReceiver<ServiceRequest>,
    events: &mpsc::Sender<ServiceEvent>,
) -> LinkEnd
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (read, mut write) = tokio::io::split(stream);
    let mut lines = BufReader::new(read).lines();

    let mut stale = 0usize;
    while requests.try_recv().is_ok() {
        stale += 1;
    }
    if stale > 0 {
        debug!(stale, "discarded requests queued while disconnected");
    }

    let state = match bootstrap(&mut lines, &mut write).await {
        Ok(state) => state,
        Err(e) => return LinkEnd::Dropped(format!("{e:#}")),
    };
    if events.send(ServiceEvent::Connected(state)).await.is_err() {
        return LinkEnd::ConsoleGone;
    }

    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    let Some(event) = parse_event(&line) else { continue };
                    if events.send(event).await.is_err() {
                        return LinkEnd::ConsoleGone;
                    }
                }
                Ok(None) => return LinkEnd::Dropped("connection closed by service".into()),
                Err(e) => return LinkEnd::Dropped(format!("read failed: {e}")),
            },
            request = requests.recv() => match request {
                Some(request) => {
                    if let Err(e) = write_request(&mut write, &request).await {
                        return LinkEnd::Dropped(format!("{e:#}"));
                    }
                }
                None => return LinkEnd::ConsoleGone,
            },
        }
    }
}

async fn bootstrap<R, W>(
    lines: &mut tokio::io::Lines<BufReader<R>>,
    write: &mut W,
) -> Result<ServiceState>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    write_request(write, &ServiceRequest::GetState).await?;
    timeout(BOOTSTRAP_TIMEOUT, read_state(lines))
        .await
        .map_err(|_| anyhow!("no state received within {BOOTSTRAP_TIMEOUT:?}"))?
}

async fn read_state<R: AsyncRead + Unpin>(
    lines: &mut tokio::io::Lines<BufReader<R>>,
) -> Result<ServiceState> {
    loop {
        let line = lines
            .next_line()
            .await
            .context("reading bootstrap state")?
            .ok_or_else(|| anyhow!("connection closed during bootstrap"))?;
        // Stream traffic may arrive before the reply
        if let Some(ServiceEvent::State(state)) = parse_event(&line) {
            return Ok(state);
        }
    }
}

async fn write_request<W: AsyncWrite + Unpin>(write: &mut W, request: &ServiceRequest) -> Result<()> {
    let mut line = serde_json::to_vec(request).context("encoding request")?;
    line.push(b'\n');
    write
        .write_all(&line)
        .await
        .with_context(|| format!("sending {}", request.name()))?;
    write.flush().await.context("flushing request")?;
    Ok(())
}

fn parse_event(line: &str) -> Option<ServiceEvent> {
    if line.trim().is_empty() {
        return None;
    }
    match serde_json::from_str(line) {
        Ok(event) => Some(event),
        Err(e) => {
            warn!(error = %e, "ignoring malformed message from service");
            None
        }
    }
}

/// Parse a single outbound line, as written by the link. Used by test doubles of
/// the sensing service.
pub fn decode_request(line: &str) -> Result<ServiceRequest> {
    if line.trim().is_empty() {
        bail!("empty line");
    }
    serde_json::from_str(line).context("decoding request")
}
