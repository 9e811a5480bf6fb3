//! Per-requester conversation state for multi-page uploads.
//!
//! A single-page upload is traced immediately. A multi-page document needs
//! one more message from its sender, the page range, so the upload is staged
//! on disk and a [`SessionState`] waits in the [`SessionStore`] until the
//! sender answers or cancels:
//!
//! ```text
//!            artifact (1 page)                     valid selection
//!   Idle ─────────────────────▶ Completed   AwaitingSelection ─────▶ Completed
//!    │                                         ▲      │  │
//!    │ artifact (N pages)                      │      │  └── cancel ──▶ Cancelled
//!    └─────────────────────────────────────────┘      │
//!                                   bad selection ────┘ (re-prompt, state kept)
//! ```
//!
//! Every transition is an [`Outcome`] value; a rejected selection is a
//! re-prompt, not an error that unwinds the conversation.
//!
//! ## Concurrency
//!
//! The store is a `tokio::sync::Mutex<HashMap>` keyed by requester. The lock
//! is held only to insert, inspect or take a record, never across pipeline
//! work, so requesters never wait on each other's tracing.
//!
//! ## Files
//!
//! Each requester writes under its own directory in the work dir (see
//! [`requester_dir`]): a uniquely named staged copy of the upload and the
//! `outlined_<stem>.pdf` result. The staged copy is deleted once its request
//! ends, whether it completed, failed, was cancelled or was superseded.

use crate::config::{PageSelection, ProcessingOptions, SelectionReply};
use crate::convert::Tracer;
use crate::error::StencilError;
use crate::output::OutputArtifact;
use crate::pipeline::input::InputArtifact;
use crate::prompts;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// A multi-page upload waiting for its page range.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    /// Staged copy of the uploaded document.
    pub input_path: PathBuf,
    /// Where the stencil PDF will be written.
    pub output_path: PathBuf,
    pub options: ProcessingOptions,
    pub total_pages: usize,
}

/// Result of checking a reply against the pending session.
#[derive(Debug)]
pub enum Confirmation {
    /// The requester has nothing pending.
    NoSession,
    /// The reply was refused; the session is still pending.
    Rejected {
        error: StencilError,
        total_pages: usize,
    },
    /// The reply was accepted and the session has been taken out of the store.
    Accepted {
        state: SessionState,
        selection: PageSelection,
    },
}

/// Pending sessions, at most one per requester.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: Mutex<HashMap<String, SessionState>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a session, returning the one it supersedes.
    pub async fn open(&self, requester: &str, state: SessionState) -> Option<SessionState> {
        self.sessions
            .lock()
            .await
            .insert(requester.to_string(), state)
    }

    pub async fn get(&self, requester: &str) -> Option<SessionState> {
        self.sessions.lock().await.get(requester).cloned()
    }

    /// Remove and return the requester's session.
    pub async fn discard(&self, requester: &str) -> Option<SessionState> {
        self.sessions.lock().await.remove(requester)
    }

    /// Number of pending sessions across all requesters.
    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }

    /// Check `reply` against the pending session.
    ///
    /// Parsing and range checks happen under the lock, so the session is
    /// taken exactly once and only when the reply is valid.
    pub async fn confirm(&self, requester: &str, reply: &str) -> Confirmation {
        let mut sessions = self.sessions.lock().await;
        let Some(state) = sessions.get(requester) else {
            return Confirmation::NoSession;
        };
        let total_pages = state.total_pages;

        match reply
            .parse::<SelectionReply>()
            .and_then(|r| r.resolve(total_pages))
        {
            Ok(selection) => match sessions.remove(requester) {
                Some(state) => Confirmation::Accepted { state, selection },
                None => Confirmation::NoSession,
            },
            Err(error) => Confirmation::Rejected { error, total_pages },
        }
    }
}

/// A message from a requester.
#[derive(Debug, Clone)]
pub enum Inbound {
    /// An upload and its caption (the options string).
    Artifact {
        artifact: InputArtifact,
        caption: String,
    },
    /// Free text, usually a page selection.
    Reply(String),
    Cancel,
    Help,
}

/// What the caller should deliver back to the requester.
#[derive(Debug)]
pub enum Outcome {
    /// The stencil PDF was written. Deliver `artifact.path`.
    Completed(OutputArtifact),
    /// Ask the requester for a page range.
    NeedsInput(String),
    /// The pending upload was discarded.
    Cancelled,
    /// Informational text (help, nothing pending).
    Message(String),
    /// The request ended with an error. Nothing is pending for the requester.
    Failed(StencilError),
}

impl Outcome {
    /// Text to show the requester for this outcome.
    pub fn text(&self) -> String {
        match self {
            Outcome::Completed(artifact) => {
                let mut text = prompts::completed(artifact.page_count);
                for notice in &artifact.notices {
                    text.push('\n');
                    text.push_str(notice);
                }
                text
            }
            Outcome::NeedsInput(prompt) | Outcome::Message(prompt) => prompt.clone(),
            Outcome::Cancelled => prompts::CANCELLED.to_string(),
            Outcome::Failed(e) => prompts::failed(e),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Outcome::Completed(_) | Outcome::Cancelled | Outcome::Failed(_)
        )
    }
}

impl From<Result<OutputArtifact, StencilError>> for Outcome {
    fn from(r: Result<OutputArtifact, StencilError>) -> Self {
        match r {
            Ok(a) => Outcome::Completed(a),
            Err(e) => Outcome::Failed(e),
        }
    }
}

/// Drives the page-selection conversation for every requester.
#[derive(Debug)]
pub struct SessionOrchestrator {
    tracer: Tracer,
    store: SessionStore,
}

impl SessionOrchestrator {
    pub fn new(tracer: Tracer) -> Self {
        Self {
            tracer,
            store: SessionStore::new(),
        }
    }

    pub fn tracer(&self) -> &Tracer {
        &self.tracer
    }

    /// Where the requester's staged uploads and results live.
    pub fn requester_work_dir(&self, requester: &str) -> PathBuf {
        self.tracer.config().work_dir.join(requester_dir(requester))
    }

    /// The requester's pending session, if any.
    pub async fn pending(&self, requester: &str) -> Option<SessionState> {
        self.store.get(requester).await
    }

    /// Dispatch one inbound message.
    pub async fn handle(&self, requester: &str, inbound: Inbound) -> Outcome {
        match inbound {
            Inbound::Artifact { artifact, caption } => {
                self.receive_artifact(requester, artifact, &caption).await
            }
            Inbound::Reply(text) => self.receive_reply(requester, &text).await,
            Inbound::Cancel => self.cancel(requester).await,
            Inbound::Help => Outcome::Message(prompts::help_text()),
        }
    }

    /// A new upload. Supersedes anything the requester had pending.
    pub async fn receive_artifact(
        &self,
        requester: &str,
        artifact: InputArtifact,
        caption: &str,
    ) -> Outcome {
        let parsed = ProcessingOptions::parse(caption);
        let options = parsed.options;
        let mut notices: Vec<String> = parsed.rejected.iter().map(|e| e.to_string()).collect();

        if let Some(old) = self.store.discard(requester).await {
            info!(
                "Upload from {} supersedes pending {}",
                requester,
                old.input_path.display()
            );
            remove_staged(&old.input_path).await;
            notices.push(
                "Your previous upload was waiting for a page range; it has been replaced.".into(),
            );
        }

        let dir = self.requester_work_dir(requester);
        let output_path = dir.join(artifact.output_name());

        let outcome = match artifact {
            InputArtifact::Image { bytes, name } => self
                .tracer
                .trace_image(bytes, &name, &output_path, &options)
                .await
                .into(),
            document @ InputArtifact::Document { .. } => {
                match self
                    .open_document(requester, &document, output_path, options, &notices)
                    .await
                {
                    Ok(outcome) => outcome,
                    Err(e) => Outcome::Failed(e),
                }
            }
        };

        with_notices(outcome, notices)
    }

    /// Stage a document, then either trace it or ask which pages to trace.
    async fn open_document(
        &self,
        requester: &str,
        document: &InputArtifact,
        output_path: PathBuf,
        options: ProcessingOptions,
        notices: &[String],
    ) -> Result<Outcome, StencilError> {
        let input_path = document.stage(&self.requester_work_dir(requester)).await?;
        let total_pages = match self.tracer.page_count(&input_path).await {
            Ok(n) => n,
            Err(e) => {
                remove_staged(&input_path).await;
                return Err(e);
            }
        };

        if total_pages == 1 {
            debug!("'{}' has one page, tracing immediately", document.name());
            let result = self
                .tracer
                .trace_document(&input_path, &output_path, &options, None)
                .await;
            remove_staged(&input_path).await;
            return Ok(result.into());
        }

        self.store
            .open(
                requester,
                SessionState {
                    input_path,
                    output_path,
                    options,
                    total_pages,
                },
            )
            .await;
        info!(
            "{} uploaded '{}' ({} pages), awaiting selection",
            requester,
            document.name(),
            total_pages
        );

        let mut prompt = String::new();
        for notice in notices {
            prompt.push_str(notice);
            prompt.push('\n');
        }
        prompt.push_str(&prompts::select_pages(document.name(), total_pages));
        Ok(Outcome::NeedsInput(prompt))
    }

    /// A text reply: help, cancel or a page selection.
    pub async fn receive_reply(&self, requester: &str, text: &str) -> Outcome {
        if prompts::is_help(text) {
            return Outcome::Message(prompts::help_text());
        }
        if prompts::is_cancel(text) {
            return self.cancel(requester).await;
        }

        match self.store.confirm(requester, text).await {
            Confirmation::NoSession => Outcome::Message(prompts::NO_PENDING.to_string()),
            Confirmation::Rejected { error, total_pages } => {
                debug!("{} sent an invalid selection: {}", requester, error);
                Outcome::NeedsInput(prompts::reprompt(&error, total_pages))
            }
            Confirmation::Accepted { state, selection } => {
                info!("{} selected {}", requester, selection);
                let result = self
                    .tracer
                    .trace_document(
                        &state.input_path,
                        &state.output_path,
                        &state.options,
                        Some(selection),
                    )
                    .await;
                remove_staged(&state.input_path).await;
                result.into()
            }
        }
    }

    /// Discard the requester's pending upload.
    pub async fn cancel(&self, requester: &str) -> Outcome {
        match self.store.discard(requester).await {
            Some(state) => {
                info!("{} cancelled {}", requester, state.input_path.display());
                remove_staged(&state.input_path).await;
                Outcome::Cancelled
            }
            None => Outcome::Message(prompts::NO_PENDING.to_string()),
        }
    }
}

/// Directory name for a requester's files under the work dir.
///
/// Ids made of ASCII letters, digits, `-` and `_` are used as they are.
/// Anything else is hex-encoded behind a `~`, which plain ids never contain,
/// so two distinct ids never map to one directory.
pub fn requester_dir(requester: &str) -> String {
    let plain = !requester.is_empty()
        && requester
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if plain {
        return requester.to_string();
    }
    let hex: String = requester.bytes().map(|b| format!("{:02x}", b)).collect();
    format!("~{}", hex)
}

async fn remove_staged(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        warn!("Could not remove staged upload {}: {}", path.display(), e);
    }
}

/// Attach option notices to a completed artifact.
fn with_notices(outcome: Outcome, notices: Vec<String>) -> Outcome {
    match outcome {
        Outcome::Completed(mut artifact) => {
            artifact.notices.extend(notices);
            Outcome::Completed(artifact)
        }
        other => other,
    }
}
