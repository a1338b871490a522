use std::{
    collections::HashMap,
    process::Stdio,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex as StdMutex,
    },
    time::Duration,
};

use anyhow::Context;
use async_trait::async_trait;
use serde_json::Value;
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
    process::{Child, Command},
    sync::{mpsc, oneshot, Mutex},
    time::timeout,
};
use tracing::{debug, error, info, warn};

use ovr_core::{
    config::SidecarConfig,
    domain::Jid,
    errors::Error,
    messaging::{
        port::{MediaSource, MessagingPort},
        types::{ChunkStream, EnvelopeDownload, InboundEvent, MediaDescriptor, MediaKind, OutgoingMedia},
    },
    Result,
};

use crate::frames::{decode_bytes, media_payload, Frame, Op, Request};

const STREAM_BUFFER: usize = 16;

enum Pending {
    Reply(oneshot::Sender<Result<Option<Value>>>),
    Stream(mpsc::Sender<Result<Vec<u8>>>),
}

type PendingMap = Arc<StdMutex<HashMap<u64, Pending>>>;

/// Handle to a running bridge. Implements both outbound ports.
pub struct SidecarBridge {
    writer: Mutex<Box<dyn AsyncWrite + Send + Unpin>>,
    pending: PendingMap,
    next_id: AtomicU64,
    request_timeout: Duration,
    child: Mutex<Option<Child>>,
}

impl SidecarBridge {
    /// Launch the bridge process and start routing its output.
    ///
    /// Admitted message events are pushed into `events`; the sender is dropped when the bridge
    /// exits, which closes the channel for the consumer.
    pub async fn spawn(
        cfg: &SidecarConfig,
        events: mpsc::Sender<InboundEvent>,
    ) -> anyhow::Result<Arc<Self>> {
        let mut cmd = Command::new(&cfg.program);
        cmd.args(&cfg.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &cfg.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd
            .spawn()
            .with_context(|| format!("failed to launch bridge {}", cfg.program.display()))?;
        info!(program = %cfg.program.display(), pid = ?child.id(), "bridge started");

        let stdin = child.stdin.take().context("bridge stdin was not captured")?;
        let stdout = child
            .stdout
            .take()
            .context("bridge stdout was not captured")?;

        // Drain stderr so a chatty bridge never blocks on a full pipe.
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(line = %line, "bridge stderr");
                }
            });
        }

        let bridge = Self::over(stdout, stdin, cfg.request_timeout, events);
        *bridge.child.lock().await = Some(child);
        Ok(bridge)
    }

    /// Run the protocol over arbitrary pipes.
    pub fn over<R, W>(
        reader: R,
        writer: W,
        request_timeout: Duration,
        events: mpsc::Sender<InboundEvent>,
    ) -> Arc<Self>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let pending: PendingMap = Arc::new(StdMutex::new(HashMap::new()));
        tokio::spawn(read_loop(reader, pending.clone(), events));

        Arc::new(Self {
            writer: Mutex::new(Box::new(writer)),
            pending,
            next_id: AtomicU64::new(1),
            request_timeout,
            child: Mutex::new(None),
        })
    }

    /// Kill the bridge process, if we launched one.
    pub async fn shutdown(&self) -> Result<()> {
        let Some(mut child) = self.child.lock().await.take() else {
            return Ok(());
        };
        if child.try_wait()?.is_some() {
            return Ok(());
        }
        child.kill().await?;
        info!("bridge stopped");
        Ok(())
    }

    fn register(&self, pending: Pending) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        lock(&self.pending).insert(id, pending);
        id
    }

    async fn write(&self, req: &Request<'_>) -> Result<()> {
        let mut line = serde_json::to_vec(req)?;
        line.push(b'\n');

        let mut w = self.writer.lock().await;
        let res = match w.write_all(&line).await {
            Ok(()) => w.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = res {
            lock(&self.pending).remove(&req.id);
            return Err(Error::Io(e));
        }
        Ok(())
    }

    async fn call(&self, op: Op<'_>) -> Result<Option<Value>> {
        let (tx, rx) = oneshot::channel();
        let id = self.register(Pending::Reply(tx));
        self.write(&Request { id, op }).await?;

        match timeout(self.request_timeout, rx).await {
            Ok(Ok(res)) => res,
            Ok(Err(_)) => Err(Error::Transport("bridge closed".to_string())),
            Err(_) => {
                lock(&self.pending).remove(&id);
                Err(Error::Timeout(self.request_timeout))
            }
        }
    }
}

#[async_trait]
impl MessagingPort for SidecarBridge {
    async fn send_text(&self, to: &Jid, text: &str) -> Result<()> {
        self.call(Op::SendText { to, text }).await?;
        Ok(())
    }

    async fn send_media(&self, to: &Jid, media: OutgoingMedia<'_>) -> Result<()> {
        let media = media_payload(media);
        self.call(Op::SendMedia { to, media }).await?;
        Ok(())
    }
}

#[async_trait]
impl MediaSource for SidecarBridge {
    async fn download_message(&self, req: &EnvelopeDownload) -> Result<Vec<u8>> {
        match self.call(Op::DownloadMessage(req)).await? {
            Some(Value::String(data)) => decode_bytes(&data),
            _ => Err(Error::Transport("download returned no data".to_string())),
        }
    }

    async fn download_content(
        &self,
        descriptor: &MediaDescriptor,
        kind: MediaKind,
    ) -> Result<ChunkStream> {
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let id = self.register(Pending::Stream(tx));
        self.write(&Request {
            id,
            op: Op::DownloadContent { kind, descriptor },
        })
        .await?;

        // A stream is one request: it must finish within the same bound as a reply.
        let pending = self.pending.clone();
        let limit = self.request_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(limit).await;
            let entry = lock(&pending).remove(&id);
            if let Some(Pending::Stream(tx)) = entry {
                warn!(id, "content download timed out");
                let _ = tx.send(Err(Error::Timeout(limit))).await;
            }
        });
        Ok(rx)
    }
}

async fn read_loop<R>(reader: R, pending: PendingMap, events: mpsc::Sender<InboundEvent>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                warn!("bridge output closed");
                break;
            }
            Err(e) => {
                error!(error = %e, "bridge read failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let frame: Frame = match serde_json::from_str(&line) {
            Ok(f) => f,
            Err(e) => {
                warn!(error = %e, line = %truncate(&line, 200), "unparseable bridge frame");
                continue;
            }
        };

        if !route(frame, &pending, &events).await {
            debug!("event consumer gone, stopping bridge reader");
            break;
        }
    }

    // Everything still waiting will never be answered.
    let orphans: Vec<Pending> = lock(&pending).drain().map(|(_, p)| p).collect();
    for p in orphans {
        match p {
            Pending::Reply(tx) => {
                let _ = tx.send(Err(Error::Transport("bridge closed".to_string())));
            }
            Pending::Stream(tx) => {
                let _ = tx
                    .send(Err(Error::Transport("bridge closed".to_string())))
                    .await;
            }
        }
    }
}

/// Returns `false` once the event consumer has gone away.
async fn route(frame: Frame, pending: &PendingMap, events: &mpsc::Sender<InboundEvent>) -> bool {
    match frame {
        Frame::Upsert(batch) => {
            for ev in batch.admitted_events() {
                if events.send(ev).await.is_err() {
                    return false;
                }
            }
        }
        Frame::Response {
            id,
            ok,
            data,
            error,
        } => {
            let result = if ok {
                Ok(data)
            } else {
                Err(Error::Transport(
                    error.unwrap_or_else(|| "bridge request failed".to_string()),
                ))
            };
            let entry = lock(pending).remove(&id);
            match entry {
                Some(Pending::Reply(tx)) => {
                    let _ = tx.send(result);
                }
                Some(Pending::Stream(tx)) => {
                    // A stream is only ever answered with a response when it failed.
                    if let Err(e) = result {
                        let _ = tx.send(Err(e)).await;
                    }
                }
                None => debug!(id, "response for unknown request"),
            }
        }
        Frame::Chunk { id, data } => {
            let tx = match lock(pending).get(&id) {
                Some(Pending::Stream(tx)) => tx.clone(),
                _ => {
                    debug!(id, "chunk for unknown stream");
                    return true;
                }
            };
            let chunk = decode_bytes(&data);
            let failed = chunk.is_err();
            if tx.send(chunk).await.is_err() || failed {
                lock(pending).remove(&id);
            }
        }
        Frame::End { id } => {
            lock(pending).remove(&id);
        }
        Frame::Connection { state, detail } => match detail {
            Some(detail) => info!(state = %state, detail = %detail, "bridge connection"),
            None => info!(state = %state, "bridge connection"),
        },
    }
    true
}

fn lock(pending: &PendingMap) -> std::sync::MutexGuard<'_, HashMap<u64, Pending>> {
    pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let mut out = s.chars().take(max_chars).collect::<String>();
    out.push_str("...");
    out
}
