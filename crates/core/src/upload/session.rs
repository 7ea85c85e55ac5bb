use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::io::AsyncWriteExt;

use super::frame::{ChunkHeader, Frame, Reply};
use super::transport::FrameTransport;
use super::{blocking, set_file_times, temp_path_for};
use crate::domain::NewPhoto;
use crate::error::{Error, Result};
use crate::hasher;
use crate::repository::PhotoRepository;

/// How long a connection may stay silent before it is dropped.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Why a connection's read loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    PeerClosed,
    Timeout,
    Transport(String),
    ProtocolViolation(String),
    Failed(String),
}

/// What happened over the lifetime of one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSummary {
    pub completed: usize,
    pub duplicates: usize,
    pub rejected_chunks: usize,
    pub close_reason: CloseReason,
}

/// Drives the chunked upload protocol for each connection it is given.
#[derive(Clone)]
pub struct UploadHandler {
    repo: PhotoRepository,
    idle_timeout: Duration,
}

enum State {
    AwaitingMetadata,
    AwaitingData(ChunkHeader),
}

/// The file currently being assembled on this connection.
struct InFlight {
    rel_path: String,
    target: PathBuf,
    temp: PathBuf,
    file: tokio::fs::File,
    next_index: u32,
}

struct Session {
    state: State,
    in_flight: Option<InFlight>,
}

enum Step {
    Continue,
    Rejected,
    Stored,
    Duplicate,
}

enum Completion {
    Stored,
    Duplicate,
}

impl UploadHandler {
    pub fn new(repo: PhotoRepository, idle_timeout: Duration) -> Self {
        Self { repo, idle_timeout }
    }

    /// Serve one connection until the peer closes it or a fatal error occurs.
    ///
    /// Each file is one session: metadata and payload frames strictly
    /// alternate, chunks arrive in order, and the session resets once the
    /// last chunk is stored so the same connection can carry the next file.
    pub async fn run<T>(&self, transport: &mut T) -> ConnectionSummary
    where
        T: FrameTransport + ?Sized,
    {
        let mut session = Session {
            state: State::AwaitingMetadata,
            in_flight: None,
        };
        let mut completed = 0;
        let mut duplicates = 0;
        let mut rejected_chunks = 0;

        let close_reason = loop {
            let frame = match tokio::time::timeout(self.idle_timeout, transport.recv()).await {
                Err(_) => {
                    break terminate(transport, CloseReason::Timeout, "idle timeout").await;
                }
                Ok(None) => break CloseReason::PeerClosed,
                Ok(Some(Err(e))) => {
                    let reason = CloseReason::Transport(e.to_string());
                    break terminate(transport, reason, "transport error").await;
                }
                Ok(Some(Ok(frame))) => frame,
            };

            match self.on_frame(&mut session, frame, transport).await {
                Ok(Step::Continue) => {}
                Ok(Step::Rejected) => rejected_chunks += 1,
                Ok(Step::Stored) => completed += 1,
                Ok(Step::Duplicate) => {
                    completed += 1;
                    duplicates += 1;
                }
                Err(Error::ProtocolViolation(msg)) => {
                    let reason = CloseReason::ProtocolViolation(msg.clone());
                    break terminate(transport, reason, &msg).await;
                }
                Err(Error::Transport(msg)) => break CloseReason::Transport(msg),
                Err(e) => {
                    let msg = e.to_string();
                    break terminate(transport, CloseReason::Failed(msg.clone()), &msg).await;
                }
            }
        };

        if let Some(in_flight) = session.in_flight.take() {
            discard(in_flight).await;
        }
        tracing::info!(
            completed,
            duplicates,
            rejected_chunks,
            reason = ?close_reason,
            "upload connection closed"
        );

        ConnectionSummary {
            completed,
            duplicates,
            rejected_chunks,
            close_reason,
        }
    }

    async fn on_frame<T>(&self, session: &mut Session, frame: Frame, transport: &mut T) -> Result<Step>
    where
        T: FrameTransport + ?Sized,
    {
        let state = std::mem::replace(&mut session.state, State::AwaitingMetadata);
        match (state, frame) {
            (State::AwaitingMetadata, Frame::Text(text)) => {
                match ChunkHeader::parse(&text) {
                    Ok(header) => {
                        check_sequence(session, &header)?;
                        session.state = State::AwaitingData(header);
                    }
                    Err(e) => tracing::warn!(error = %e, "skipping malformed chunk header"),
                }
                Ok(Step::Continue)
            }
            (State::AwaitingMetadata, Frame::Binary(_)) => Err(Error::ProtocolViolation(
                "payload frame without a preceding metadata frame".to_string(),
            )),
            (State::AwaitingData(_), Frame::Text(_)) => Err(Error::ProtocolViolation(
                "expected a payload frame after metadata".to_string(),
            )),
            (State::AwaitingData(header), Frame::Binary(payload)) => {
                self.on_payload(session, header, payload, transport).await
            }
        }
    }

    async fn on_payload<T>(
        &self,
        session: &mut Session,
        header: ChunkHeader,
        payload: Vec<u8>,
        transport: &mut T,
    ) -> Result<Step>
    where
        T: FrameTransport + ?Sized,
    {
        let payload = match header.chunk_digest() {
            Some(expected) => {
                let (payload, actual) = blocking(move || {
                    let digest = hasher::sha256_bytes(&payload);
                    Ok((payload, digest))
                })
                .await?;
                if !hasher::digests_match(expected, &actual) {
                    let mismatch = Error::IntegrityMismatch {
                        index: header.chunk_index,
                        expected: expected.to_string(),
                        actual,
                    };
                    tracing::warn!(file = %header.file_name, error = %mismatch, "chunk rejected");
                    send(transport, &Reply::chunk_rejected(header.chunk_index)).await?;
                    return Ok(Step::Rejected);
                }
                payload
            }
            None => payload,
        };

        if header.is_first() {
            // Chunk 0 always restarts, abandoning whatever was in flight.
            if let Some(previous) = session.in_flight.take() {
                discard(previous).await;
            }
            session.in_flight = Some(begin(self.repo.root(), &header).await?);
        }

        let in_flight = session.in_flight.as_mut().ok_or_else(|| {
            Error::ProtocolViolation(format!("chunk {} has no open transfer", header.chunk_index))
        })?;
        in_flight.file.write_all(&payload).await?;
        in_flight.next_index += 1;
        tracing::debug!(
            file = %in_flight.rel_path,
            chunk = header.chunk_index,
            of = header.chunk_count,
            bytes = payload.len(),
            "chunk written"
        );

        if !header.is_last() {
            return Ok(Step::Continue);
        }

        let Some(in_flight) = session.in_flight.take() else {
            return Ok(Step::Continue);
        };
        let file_name = header.file_name.clone();
        let completion = self.finish(in_flight, header).await?;
        send(transport, &Reply::completed(&file_name)).await?;

        Ok(match completion {
            Completion::Stored => Step::Stored,
            Completion::Duplicate => Step::Duplicate,
        })
    }

    async fn finish(&self, in_flight: InFlight, header: ChunkHeader) -> Result<Completion> {
        let InFlight {
            rel_path,
            target,
            temp,
            mut file,
            ..
        } = in_flight;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        let repo = self.repo.clone();
        let result = blocking({
            let temp = temp.clone();
            move || finalize(&repo, &header, &rel_path, &target, &temp)
        })
        .await;
        if result.is_err() {
            let _ = tokio::fs::remove_file(&temp).await;
        }
        result
    }
}

/// Make sure a metadata frame continues the transfer that is open.
fn check_sequence(session: &Session, header: &ChunkHeader) -> Result<()> {
    if header.is_first() {
        return Ok(());
    }
    let rel_path = header.relative_path()?;
    match &session.in_flight {
        Some(open) if open.rel_path == rel_path && open.next_index == header.chunk_index => Ok(()),
        Some(open) => Err(Error::ProtocolViolation(format!(
            "chunk {} of {} does not follow chunk {} of {}",
            header.chunk_index,
            rel_path,
            open.next_index.saturating_sub(1),
            open.rel_path
        ))),
        None => Err(Error::ProtocolViolation(format!(
            "chunk {} of {} arrived before chunk 0",
            header.chunk_index, rel_path
        ))),
    }
}

/// Create directories and (re)open the temp file for a first chunk.
async fn begin(root: &Path, header: &ChunkHeader) -> Result<InFlight> {
    let rel_path = header.relative_path()?;
    let target = root.join(&rel_path);
    let temp = temp_path_for(&target);
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let file = tokio::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&temp)
        .await?;
    tracing::info!(file = %rel_path, chunks = header.chunk_count, "upload started");

    Ok(InFlight {
        rel_path,
        target,
        temp,
        file,
        next_index: 0,
    })
}

/// Dedup, place and index a fully received file.
fn finalize(
    repo: &PhotoRepository,
    header: &ChunkHeader,
    rel_path: &str,
    target: &Path,
    temp: &Path,
) -> Result<Completion> {
    let checksum = match header.file_checksum() {
        Some(claimed) => claimed.to_ascii_lowercase(),
        None => hasher::compute_sha256(temp)?,
    };

    let pre_checksum = hasher::compute_pre_checksum(temp)?;

    if repo.check_checksum_exists(&checksum)? {
        fs::remove_file(temp)?;
        tracing::info!(file = %rel_path, %checksum, "duplicate upload discarded");
        return Ok(Completion::Duplicate);
    }

    set_file_times(temp, header.mtime, header.ctime)?;
    fs::rename(temp, target)?;
    let size = fs::metadata(target)?.len() as i64;

    // The bytes are durable now. Failing to index them is left for the next
    // reconciliation pass rather than failing the transfer.
    if let Err(e) = index(repo, header, rel_path, size, pre_checksum, checksum) {
        tracing::error!(file = %rel_path, error = %e, "stored upload could not be indexed");
    }
    tracing::info!(file = %rel_path, size, "upload stored");
    Ok(Completion::Stored)
}

fn index(
    repo: &PhotoRepository,
    header: &ChunkHeader,
    rel_path: &str,
    size: i64,
    pre_checksum: String,
    checksum: String,
) -> Result<()> {
    let name = rel_path.rsplit('/').next().unwrap_or(rel_path).to_string();
    let live_photo_video_path = crate::repository::normalize_path(&header.live_photo_video_path);

    match repo.find_by_path(rel_path)? {
        Some(mut existing) => {
            existing.name = name;
            existing.size = size;
            existing.photo_type = header.photo_type;
            existing.live_photo_video_path = live_photo_video_path.to_string();
            existing.file_uri = header.file_uri.clone();
            existing.mtime = header.mtime;
            existing.ctime = header.ctime;
            existing.pre_checksum = pre_checksum;
            existing.checksum = checksum;
            repo.update(&existing)
        }
        None => repo
            .insert_photo(NewPhoto {
                name,
                path: rel_path.to_string(),
                size,
                photo_type: header.photo_type,
                live_photo_video_path: live_photo_video_path.to_string(),
                file_uri: header.file_uri.clone(),
                mtime: header.mtime,
                ctime: header.ctime,
                pre_checksum,
                checksum,
                source_id: 0,
            })
            .map(|_| ()),
    }
}

async fn discard(in_flight: InFlight) {
    drop(in_flight.file);
    match tokio::fs::remove_file(&in_flight.temp).await {
        Ok(()) => tracing::info!(file = %in_flight.rel_path, "partial upload discarded"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(file = %in_flight.rel_path, error = %e, "could not remove partial upload"),
    }
}

async fn send<T>(transport: &mut T, reply: &Reply) -> Result<()>
where
    T: FrameTransport + ?Sized,
{
    transport
        .send(reply)
        .await
        .map_err(|e| Error::Transport(e.to_string()))
}

/// Best-effort terminal notice before the connection is dropped.
async fn terminate<T>(transport: &mut T, reason: CloseReason, message: &str) -> CloseReason
where
    T: FrameTransport + ?Sized,
{
    tracing::warn!(reason = ?reason, "closing upload connection");
    if let Err(e) = transport.send(&Reply::terminal(message)).await {
        tracing::debug!(error = %e, "terminal reply not delivered");
    }
    reason
}
