//! Presentation sink for newly stored photos.
//!
//! Connection tasks never call the sink directly. They push a
//! [`SinkEvent`] onto an unbounded channel and a single consumer task
//! applies events to the sink in arrival order, so sink implementations
//! never observe concurrent calls and need no locking of their own.

use bytes::Bytes;
use chrono::{DateTime, Local};
use std::io::Cursor;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::server::ReceivedPayload;

/// Bounding box used for the display thumbnail.
const THUMBNAIL_BOX: (u32, u32) = (600, 400);

/// A photo that has been written to disk.
#[derive(Debug, Clone)]
pub struct PhotoNotification {
    pub photo: ReceivedPayload,
    pub path: PathBuf,
}

impl PhotoNotification {
    /// File name component of the stored path.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Observer of stored photos.
///
/// Calls are serialized by [`SinkDispatcher`]; implementations are owned by
/// the consumer task and only need to be `Send`.
pub trait PhotoSink: Send + 'static {
    /// Called at most once per stored photo.
    fn on_photo_received(&mut self, notification: &PhotoNotification);

    /// Called once when the server stops. No further calls follow.
    fn on_shutdown(&mut self) {}
}

/// Message carried to the consumer task.
#[derive(Debug)]
pub enum SinkEvent {
    Photo(PhotoNotification),
    Shutdown,
}

/// Producer side of the sink channel. Cheap to clone into connection tasks.
#[derive(Debug, Clone)]
pub struct SinkHandle {
    tx: mpsc::UnboundedSender<SinkEvent>,
}

impl SinkHandle {
    /// Queue a photo for the sink without waiting on it.
    pub fn notify(&self, notification: PhotoNotification) {
        if self.tx.send(SinkEvent::Photo(notification)).is_err() {
            debug!("Sink already shut down, dropping notification");
        }
    }

    /// Ask the consumer to call `on_shutdown` and exit.
    pub fn shutdown(&self) {
        let _ = self.tx.send(SinkEvent::Shutdown);
    }
}

/// Owns the single consumer task that feeds a [`PhotoSink`].
pub struct SinkDispatcher {
    handle: SinkHandle,
    task: JoinHandle<()>,
}

impl SinkDispatcher {
    /// Spawn the consumer task. Must be called inside a tokio runtime.
    pub fn spawn<S: PhotoSink>(sink: S) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(consume(sink, rx));

        Self {
            handle: SinkHandle { tx },
            task,
        }
    }

    pub fn handle(&self) -> SinkHandle {
        self.handle.clone()
    }

    /// Deliver the shutdown signal and wait for the consumer to drain.
    ///
    /// Photos queued before this call are still delivered; later ones are dropped.
    pub async fn shutdown(self) {
        self.handle.shutdown();
        if let Err(e) = self.task.await {
            warn!(error = %e, "Sink task failed");
        }
    }
}

async fn consume<S: PhotoSink>(mut sink: S, mut rx: mpsc::UnboundedReceiver<SinkEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            SinkEvent::Photo(notification) => sink.on_photo_received(&notification),
            SinkEvent::Shutdown => break,
        }
    }
    sink.on_shutdown();
}

/// What the display shows for the most recent photo.
#[derive(Debug, Clone)]
pub struct PhotoSummary {
    pub file_name: String,
    pub path: PathBuf,
    pub size: usize,
    pub peer: SocketAddr,
    pub received_at: DateTime<Local>,
    /// Pixel dimensions, when the payload decodes as a known image format.
    pub dimensions: Option<(u32, u32)>,
    /// Size the photo is drawn at inside the display box.
    pub thumbnail: Option<(u32, u32)>,
    /// The stored bytes, shared with the notification.
    pub payload: Bytes,
}

impl PhotoSummary {
    fn from_notification(notification: &PhotoNotification) -> Self {
        let dimensions = probe_dimensions(&notification.photo.data);

        Self {
            file_name: notification.file_name(),
            path: notification.path.clone(),
            size: notification.photo.declared_size as usize,
            peer: notification.photo.peer,
            received_at: notification.photo.received_at,
            dimensions,
            thumbnail: dimensions.map(|(w, h)| fit_within(w, h, THUMBNAIL_BOX)),
            payload: notification.photo.data.clone(),
        }
    }

    /// Window title for this photo.
    pub fn title(&self) -> String {
        format!("Photo Server - {}", self.file_name)
    }

    /// One-line description: name, size and sender.
    pub fn info_line(&self) -> String {
        format!(
            "Last photo: {} | Size: {} bytes | From: {}",
            self.file_name,
            with_thousands(self.size),
            self.peer.ip()
        )
    }
}

/// Shared view of the latest photo, readable from any thread.
#[derive(Debug, Clone, Default)]
pub struct LatestPhoto {
    current: Arc<RwLock<Option<PhotoSummary>>>,
    closed: Arc<AtomicBool>,
}

impl LatestPhoto {
    pub fn get(&self) -> Option<PhotoSummary> {
        self.current.read().ok()?.clone()
    }

    /// True once the sink has received its shutdown signal.
    #[cfg(test)]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn set(&self, summary: PhotoSummary) {
        if let Ok(mut current) = self.current.write() {
            *current = Some(summary);
        }
    }
}

/// Default sink: keeps the latest photo and logs what a display would show.
#[derive(Debug, Default)]
pub struct DisplaySink {
    latest: LatestPhoto,
}

impl DisplaySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle for observers; stays valid after the sink moves into its task.
    pub fn latest(&self) -> LatestPhoto {
        self.latest.clone()
    }
}

impl PhotoSink for DisplaySink {
    fn on_photo_received(&mut self, notification: &PhotoNotification) {
        let summary = PhotoSummary::from_notification(notification);

        match (summary.dimensions, summary.thumbnail) {
            (Some((width, height)), Some((thumbnail_width, thumbnail_height))) => info!(
                title = %summary.title(),
                decodable = true,
                width,
                height,
                thumbnail_width,
                thumbnail_height,
                "{}",
                summary.info_line()
            ),
            _ => info!(
                title = %summary.title(),
                decodable = false,
                "{}",
                summary.info_line()
            ),
        }

        self.latest.set(summary);
    }

    fn on_shutdown(&mut self) {
        self.latest.closed.store(true, Ordering::Release);
        info!("Display closed");
    }
}

/// Read image dimensions from the header without decoding pixels.
fn probe_dimensions(data: &[u8]) -> Option<(u32, u32)> {
    image::io::Reader::new(Cursor::new(data))
        .with_guessed_format()
        .ok()?
        .into_dimensions()
        .ok()
}

/// Shrink `(width, height)` to fit inside `bounds`, keeping the aspect ratio.
/// Images already inside the box keep their size.
fn fit_within(width: u32, height: u32, bounds: (u32, u32)) -> (u32, u32) {
    let (max_w, max_h) = bounds;
    if width <= max_w && height <= max_h {
        return (width, height);
    }

    let scale = f64::min(
        max_w as f64 / width as f64,
        max_h as f64 / height as f64,
    );
    let w = ((width as f64 * scale).round() as u32).clamp(1, max_w);
    let h = ((height as f64 * scale).round() as u32).clamp(1, max_h);
    (w, h)
}

/// Format a count with comma thousands separators.
fn with_thousands(n: usize) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}
