//! Host and preview ends of the element-selection protocol.
//!
//! [`PreviewChannel`] is the host side: it tracks the active preview surface,
//! delivers `SET_MODE` with a bounded retry that stops once the surface sends
//! `READY`, and surfaces `ELEMENT_PICKED` events. [`SelectionAgent`] models the
//! preview side and is what [`instrumentation_script`] implements in the page.

use crate::config::PreviewConfig;
use crate::detect::join_path;
use crate::error::ChannelError;
use crate::mount::{files_under, normalize_path};
use crate::static_doc::find_entry_document;
use async_trait::async_trait;
use previewkit_common::{
    ElementDetails, FileRecord, PreviewEnvelope, SelectionMessage, PROTOCOL_VERSION,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{broadcast, watch};

const SCRIPT_TEMPLATE: &str = include_str!("../assets/instrument.js");

const AGENT_MARKER: &str = "data-previewkit-agent";

/// Identity of one preview surface (one embedded browsing context)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SurfaceId(pub u64);

impl SurfaceId {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "surface-{}", self.0)
    }
}

/// Delivers serialized messages to a preview surface.
///
/// `message` is the JSON text of a [`PreviewEnvelope`]. Transports hand it to
/// the page unchanged (in a browser, as the `postMessage` payload); the
/// injected script parses string payloads and posts its own messages back as
/// envelope JSON text, which the host feeds to [`PreviewChannel::handle_raw`].
#[async_trait]
pub trait PreviewTransport: Send + Sync {
    async fn post(&self, surface: SurfaceId, message: &str) -> Result<(), ChannelError>;
}

/// Fixed attempt count with a fixed delay between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&PreviewConfig::default())
    }
}

impl From<&PreviewConfig> for RetryPolicy {
    fn from(config: &PreviewConfig) -> Self {
        Self {
            attempts: config.set_mode_attempts.max(1),
            backoff: config.set_mode_backoff,
        }
    }
}

/// How a `SET_MODE` delivery ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The surface had acknowledged readiness
    Acknowledged,
    /// Attempts ran out before the surface acknowledged
    Unacknowledged,
    /// A newer toggle or surface took over
    Superseded,
}

/// An element picked in the active preview
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PickedElement {
    pub surface: SurfaceId,
    pub identifier: String,
    pub details: ElementDetails,
}

struct ChannelState {
    active: Option<SurfaceId>,
    selection_mode: bool,
    generation: u64,
}

/// Host end of the selection protocol
pub struct PreviewChannel {
    transport: Arc<dyn PreviewTransport>,
    retry: RetryPolicy,
    state: Mutex<ChannelState>,
    ready: watch::Sender<bool>,
    picks: broadcast::Sender<PickedElement>,
}

impl PreviewChannel {
    pub fn new(transport: Arc<dyn PreviewTransport>, retry: RetryPolicy) -> Self {
        let (ready, _) = watch::channel(false);
        let (picks, _) = broadcast::channel(64);
        Self {
            transport,
            retry,
            state: Mutex::new(ChannelState {
                active: None,
                selection_mode: false,
                generation: 0,
            }),
            ready,
            picks,
        }
    }

    fn state(&self) -> MutexGuard<'_, ChannelState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make `surface` the active preview. Returns the surface it replaced.
    pub fn attach(&self, surface: SurfaceId) -> Option<SurfaceId> {
        let previous = {
            let mut state = self.state();
            state.generation += 1;
            state.active.replace(surface)
        };
        self.ready.send_replace(false);
        tracing::debug!(%surface, ?previous, "preview surface attached");
        previous
    }

    pub fn detach(&self) -> Option<SurfaceId> {
        let previous = {
            let mut state = self.state();
            state.generation += 1;
            state.active.take()
        };
        self.ready.send_replace(false);
        previous
    }

    pub fn active_surface(&self) -> Option<SurfaceId> {
        self.state().active
    }

    /// Whether the active surface has sent `READY` since it last loaded
    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    pub fn selection_mode(&self) -> bool {
        self.state().selection_mode
    }

    pub fn subscribe_picks(&self) -> broadcast::Receiver<PickedElement> {
        self.picks.subscribe()
    }

    async fn post(&self, surface: SurfaceId, message: SelectionMessage) -> Result<(), ChannelError> {
        let raw = PreviewEnvelope::new(message).to_json()?;
        self.transport.post(surface, &raw).await
    }

    /// Toggle selection mode and deliver it to the active surface.
    ///
    /// Sends at most `retry.attempts` times, stopping as soon as the surface
    /// acknowledges readiness (the `READY` handler resends the current mode).
    pub async fn set_selection_mode(&self, enabled: bool) -> Result<Delivery, ChannelError> {
        let (surface, generation) = {
            let mut state = self.state();
            state.selection_mode = enabled;
            state.generation += 1;
            (state.active.ok_or(ChannelError::NoSurface)?, state.generation)
        };
        let mut ready_rx = self.ready.subscribe();

        for attempt in 1..=self.retry.attempts {
            if self.state().generation != generation {
                return Ok(Delivery::Superseded);
            }
            if let Err(e) = self.post(surface, SelectionMessage::SetMode { enabled }).await {
                tracing::debug!(%surface, attempt, error = %e, "SET_MODE delivery failed");
            }
            if *ready_rx.borrow_and_update() {
                return Ok(Delivery::Acknowledged);
            }
            if attempt == self.retry.attempts {
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(self.retry.backoff) => {}
                changed = ready_rx.changed() => {
                    if changed.is_ok()
                        && *ready_rx.borrow_and_update()
                        && self.state().generation == generation
                    {
                        return Ok(Delivery::Acknowledged);
                    }
                }
            }
        }

        tracing::debug!(%surface, attempts = self.retry.attempts, "preview never acknowledged SET_MODE");
        Ok(Delivery::Unacknowledged)
    }

    /// The surface fired its load event: it must re-acknowledge, and gets the current mode again
    pub async fn surface_loaded(&self, surface: SurfaceId) -> Result<(), ChannelError> {
        let selection_mode = {
            let state = self.state();
            if state.active != Some(surface) {
                return Ok(());
            }
            state.selection_mode
        };
        self.ready.send_replace(false);
        self.post(surface, SelectionMessage::SetMode { enabled: selection_mode }).await
    }

    /// Decode and handle a raw message from `source`
    pub async fn handle_raw(
        &self,
        source: SurfaceId,
        raw: &str,
    ) -> Result<Option<PickedElement>, ChannelError> {
        let message = PreviewEnvelope::decode(raw)?;
        Ok(self.handle_message(source, message).await)
    }

    /// Handle a decoded message. Messages from any surface but the active one are ignored.
    pub async fn handle_message(
        &self,
        source: SurfaceId,
        message: SelectionMessage,
    ) -> Option<PickedElement> {
        let (active, selection_mode) = {
            let state = self.state();
            (state.active, state.selection_mode)
        };
        if active != Some(source) {
            tracing::debug!(%source, kind = message.type_name(), "ignoring message from inactive surface");
            return None;
        }

        match message {
            SelectionMessage::Ready => {
                tracing::debug!(%source, "preview surface ready");
                self.ready.send_replace(true);
                if let Err(e) = self
                    .post(source, SelectionMessage::SetMode { enabled: selection_mode })
                    .await
                {
                    tracing::debug!(%source, error = %e, "failed to resend SET_MODE after READY");
                }
                None
            }
            SelectionMessage::ElementPicked { identifier, details } => {
                if !selection_mode {
                    tracing::debug!(%source, %identifier, "dropping pick while selection mode is off");
                    return None;
                }
                let picked = PickedElement {
                    surface: source,
                    identifier,
                    details,
                };
                let _ = self.picks.send(picked.clone());
                Some(picked)
            }
            SelectionMessage::SetMode { .. } => {
                tracing::debug!(%source, "ignoring host-bound SET_MODE from preview");
                None
            }
        }
    }
}

/// Best-effort locator: `tag#id`, else `tag.firstClass`, else `tag`
pub fn derive_identifier(details: &ElementDetails) -> String {
    let tag = details.tag_name.to_ascii_lowercase();
    if let Some(id) = details.id.as_deref().filter(|id| !id.is_empty()) {
        return format!("{}#{}", tag, id);
    }
    if let Some(class) = details
        .class_name
        .as_deref()
        .and_then(|c| c.split_whitespace().next())
    {
        return format!("{}.{}", tag, class);
    }
    tag
}

/// What a click inside the preview did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClickOutcome {
    pub default_prevented: bool,
    pub message: Option<SelectionMessage>,
}

/// Preview-side protocol state, mirroring the injected script
#[derive(Debug, Clone)]
pub struct SelectionAgent {
    enabled: bool,
    listeners: usize,
    text_limit: usize,
}

impl SelectionAgent {
    pub fn new(text_limit: usize) -> Self {
        Self {
            enabled: false,
            listeners: 0,
            text_limit,
        }
    }

    /// (Re)instrument the page. Any previous listener is removed first.
    /// Returns the `READY` message the page sends once instrumented.
    pub fn instrument(&mut self) -> SelectionMessage {
        self.listeners = 1;
        SelectionMessage::Ready
    }

    pub fn listener_count(&self) -> usize {
        self.listeners
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Apply a message from the host
    pub fn handle_host(&mut self, message: &SelectionMessage) {
        if let SelectionMessage::SetMode { enabled } = message {
            self.enabled = *enabled;
        }
    }

    /// A click on `element`; intercepted only while selection mode is on
    pub fn click(&self, element: &ElementDetails) -> ClickOutcome {
        if self.listeners == 0 || !self.enabled {
            return ClickOutcome {
                default_prevented: false,
                message: None,
            };
        }

        let text = element
            .text
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(|t| t.chars().take(self.text_limit).collect::<String>());
        let details = ElementDetails {
            tag_name: element.tag_name.to_ascii_lowercase(),
            id: element.id.clone().filter(|id| !id.is_empty()),
            class_name: element.class_name.clone().filter(|c| !c.is_empty()),
            text,
        };

        ClickOutcome {
            default_prevented: true,
            message: Some(SelectionMessage::ElementPicked {
                identifier: derive_identifier(&details),
                details,
            }),
        }
    }
}

impl Default for SelectionAgent {
    fn default() -> Self {
        Self::new(PreviewConfig::default().text_preview_chars)
    }
}

fn find_ascii_case_insensitive(haystack: &str, needle: &str, from_end: bool) -> Option<usize> {
    let lower = haystack.to_ascii_lowercase();
    if from_end {
        lower.rfind(needle)
    } else {
        lower.find(needle)
    }
}

/// The preview-side script, with element text clipped to `text_limit` chars
pub fn instrumentation_script(text_limit: usize) -> String {
    SCRIPT_TEMPLATE
        .replace("__PROTOCOL_VERSION__", &PROTOCOL_VERSION.to_string())
        .replace("__TEXT_LIMIT__", &text_limit.to_string())
}

/// Inject the instrumentation script, replacing an earlier injection if present
pub fn instrument_document(html: &str, text_limit: usize) -> String {
    let tag = format!(
        "<script {}>\n{}</script>",
        AGENT_MARKER,
        instrumentation_script(text_limit)
    );
    let open = format!("<script {}>", AGENT_MARKER);

    if let Some(start) = html.find(&open) {
        if let Some(len) = html[start..].find("</script>") {
            let end = start + len + "</script>".len();
            return format!("{}{}{}", &html[..start], tag, &html[end..]);
        }
    }

    match find_ascii_case_insensitive(html, "</body>", true) {
        Some(at) => format!("{}{}{}", &html[..at], tag, &html[at..]),
        None => format!("{}{}", html, tag),
    }
}

/// Instrument the entry document served from `working_dir`.
///
/// Other records are returned untouched; a set without HTML under the
/// working directory comes back as-is.
pub fn instrument_entry(
    files: &[FileRecord],
    working_dir: &str,
    text_limit: usize,
) -> Vec<FileRecord> {
    let served: Vec<FileRecord> = files_under(files, working_dir)
        .into_iter()
        .map(|(path, file)| FileRecord::new(path, file.content.clone()))
        .collect();
    let Some(entry) = find_entry_document(&served) else {
        return files.to_vec();
    };
    let target = join_path(working_dir, &entry.path);

    files
        .iter()
        .map(|file| match normalize_path(&file.path) {
            Ok(path) if path == target => FileRecord {
                path: file.path.clone(),
                content: instrument_document(&file.content, text_limit),
            },
            _ => file.clone(),
        })
        .collect()
}
