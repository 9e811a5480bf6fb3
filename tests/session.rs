//! Page-selection conversations driven through `SessionOrchestrator`.
//!
//! Documents are rendered by a synthetic rasterizer: page `k` is
//! `100 + 10k` pixels wide, so output pages can be told apart by width.
//! Every rendered page index is recorded, and so are the contents of each
//! file the rasterizer opens for rendering.

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use imageproc::drawing::draw_filled_rect_mut;
use imageproc::rect::Rect;
use stencil_trace::pipeline::assemble;
use stencil_trace::prompts;
use stencil_trace::{
    Inbound, InputArtifact, Outcome, OutputArtifact, PageRasterizer, RasterPage, Result,
    SessionOrchestrator, StencilError, Tracer, TracerConfig,
};
use std::io::Cursor;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

// ── Test helpers ─────────────────────────────────────────────────────────────

struct SyntheticRasterizer {
    pages: usize,
    rendered: Arc<Mutex<Vec<usize>>>,
    opened: Arc<Mutex<Vec<String>>>,
}

impl PageRasterizer for SyntheticRasterizer {
    fn page_count(&self, _path: &Path) -> Result<usize> {
        Ok(self.pages)
    }

    fn render_pages(
        &self,
        path: &Path,
        dpi: u32,
        page_indices: &[usize],
        on_page: &mut dyn FnMut(RasterPage) -> Result<()>,
    ) -> Result<()> {
        let contents = std::fs::read(path).map_err(|e| StencilError::UnreadableInput {
            name: path.display().to_string(),
            detail: e.to_string(),
        })?;
        self.opened
            .lock()
            .unwrap()
            .push(String::from_utf8_lossy(&contents).into_owned());

        for &idx in page_indices {
            if idx >= self.pages {
                return Err(StencilError::RasterisationFailed {
                    page: idx + 1,
                    detail: "out of range".into(),
                });
            }
            self.rendered.lock().unwrap().push(idx);
            let page_num = idx + 1;
            let width = 100 + 10 * page_num as u32;
            let mut img = RgbImage::from_pixel(width, 100, Rgb([240, 240, 240]));
            draw_filled_rect_mut(
                &mut img,
                Rect::at(20, 20).of_size(width - 40, 60),
                Rgb([20, 20, 20]),
            );
            on_page(RasterPage::new(
                page_num,
                DynamicImage::ImageRgb8(img),
                dpi as f32,
            ))?;
        }
        Ok(())
    }
}

struct Harness {
    orchestrator: SessionOrchestrator,
    rendered: Arc<Mutex<Vec<usize>>>,
    opened: Arc<Mutex<Vec<String>>>,
    dir: TempDir,
}

impl Harness {
    fn new(pages: usize) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let rendered = Arc::new(Mutex::new(Vec::new()));
        let opened = Arc::new(Mutex::new(Vec::new()));
        let rasterizer = SyntheticRasterizer {
            pages,
            rendered: Arc::clone(&rendered),
            opened: Arc::clone(&opened),
        };
        let config = TracerConfig::builder()
            .work_dir(dir.path())
            .concurrency(2)
            .build()
            .unwrap();
        Self {
            orchestrator: SessionOrchestrator::new(Tracer::with_rasterizer(
                config,
                Arc::new(rasterizer),
            )),
            rendered,
            opened,
            dir,
        }
    }

    async fn upload(&self, requester: &str, caption: &str) -> Outcome {
        self.upload_bytes(requester, caption, b"%PDF-1.5 synthetic").await
    }

    async fn upload_bytes(&self, requester: &str, caption: &str, bytes: &[u8]) -> Outcome {
        let artifact = InputArtifact::classify(bytes.to_vec(), "plans.pdf", None);
        self.orchestrator
            .handle(
                requester,
                Inbound::Artifact {
                    artifact,
                    caption: caption.to_string(),
                },
            )
            .await
    }

    async fn reply(&self, requester: &str, text: &str) -> Outcome {
        self.orchestrator
            .handle(requester, Inbound::Reply(text.to_string()))
            .await
    }

    fn rendered(&self) -> Vec<usize> {
        let mut r = self.rendered.lock().unwrap().clone();
        r.sort_unstable();
        r
    }

    fn opened(&self) -> Vec<String> {
        self.opened.lock().unwrap().clone()
    }

    /// Files left in a requester's directory.
    fn files_of(&self, requester: &str) -> Vec<String> {
        let dir = self.orchestrator.requester_work_dir(requester);
        let mut names: Vec<String> = match std::fs::read_dir(dir) {
            Ok(entries) => entries
                .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
                .collect(),
            Err(_) => Vec::new(),
        };
        names.sort();
        names
    }
}

fn completed(outcome: Outcome) -> OutputArtifact {
    match outcome {
        Outcome::Completed(a) => a,
        other => panic!("expected completion, got {other:?}"),
    }
}

fn prompt(outcome: &Outcome) -> &str {
    match outcome {
        Outcome::NeedsInput(p) => p,
        other => panic!("expected a prompt, got {other:?}"),
    }
}

fn widths(artifact: &OutputArtifact) -> Vec<u32> {
    artifact.pages.iter().map(|p| p.pixel_width).collect()
}

fn png_bytes() -> Vec<u8> {
    let mut img = RgbImage::from_pixel(120, 90, Rgb([250, 250, 250]));
    draw_filled_rect_mut(&mut img, Rect::at(30, 20).of_size(50, 40), Rgb([10, 10, 10]));
    let mut buf = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .unwrap();
    buf
}

// ── Selection flow ───────────────────────────────────────────────────────────

#[tokio::test]
async fn multi_page_upload_waits_for_selection() {
    let h = Harness::new(3);
    let outcome = h.upload("alice", "dpi=72").await;

    assert!(prompt(&outcome).contains("3 pages"));
    assert!(!outcome.is_terminal());
    let pending = h.orchestrator.pending("alice").await.expect("session");
    assert_eq!(pending.total_pages, 3);
    assert_eq!(pending.options.dpi, 72);
    assert!(pending.input_path.exists());
    assert!(h.rendered().is_empty(), "nothing renders before selection");
}

#[tokio::test]
async fn range_reply_traces_only_selected_pages() {
    let h = Harness::new(3);
    h.upload("alice", "dpi=72").await;
    let staged = h.orchestrator.pending("alice").await.unwrap().input_path;

    let artifact = completed(h.reply("alice", "2-3").await);

    assert_eq!(artifact.page_count, 2);
    assert_eq!(artifact.source_pages, vec![2, 3]);
    assert_eq!(widths(&artifact), vec![120, 130]);
    assert_eq!(h.rendered(), vec![1, 2]);
    assert_eq!(artifact.stats.total_pages, 3);
    assert_eq!(artifact.stats.processed_pages, 2);

    assert_eq!(
        artifact.path,
        h.dir.path().join("alice").join("outlined_plans.pdf")
    );
    let bytes = std::fs::read(&artifact.path).unwrap();
    assert_eq!(assemble::page_count(&bytes).unwrap(), 2);

    // 72 dpi: one pixel is one point.
    assert!((artifact.pages[0].width_pt() - 120.0).abs() < 1e-3);
    assert!(h.orchestrator.pending("alice").await.is_none());

    // The document is opened once for the whole range, and the staged
    // upload is gone once the request ends.
    assert_eq!(h.opened().len(), 1);
    assert!(!staged.exists());
    assert_eq!(h.files_of("alice"), vec!["outlined_plans.pdf"]);
}

#[tokio::test]
async fn all_reply_traces_every_page_in_order() {
    let h = Harness::new(3);
    h.upload("alice", "dpi=72").await;

    let artifact = completed(h.reply("alice", "ALL").await);
    assert_eq!(artifact.source_pages, vec![1, 2, 3]);
    assert_eq!(widths(&artifact), vec![110, 120, 130]);
    assert_eq!(h.rendered(), vec![0, 1, 2]);
}

#[tokio::test]
async fn single_page_reply() {
    let h = Harness::new(3);
    h.upload("alice", "dpi=72").await;

    let artifact = completed(h.reply("alice", "2").await);
    assert_eq!(artifact.source_pages, vec![2]);
    assert_eq!(h.rendered(), vec![1]);
}

#[tokio::test]
async fn out_of_range_reply_reprompts_and_keeps_session() {
    let h = Harness::new(3);
    h.upload("alice", "dpi=72").await;

    for bad in ["5", "0", "3-2", "two"] {
        let outcome = h.reply("alice", bad).await;
        assert!(prompt(&outcome).contains("between 1 and 3"), "{bad}");
        assert!(h.orchestrator.pending("alice").await.is_some(), "{bad}");
    }
    assert!(h.rendered().is_empty());

    let artifact = completed(h.reply("alice", "1").await);
    assert_eq!(artifact.source_pages, vec![1]);
}

#[tokio::test]
async fn page_list_is_unsupported() {
    let h = Harness::new(3);
    h.upload("alice", "").await;

    let outcome = h.reply("alice", "1,2").await;
    assert!(prompt(&outcome).contains("unsupported"));
    assert!(h.orchestrator.pending("alice").await.is_some());
}

// ── Cancel, supersede, isolation ─────────────────────────────────────────────

#[tokio::test]
async fn cancel_discards_session_and_staged_file() {
    let h = Harness::new(3);
    h.upload("alice", "").await;
    let staged = h.orchestrator.pending("alice").await.unwrap().input_path;

    let outcome = h.reply("alice", "cancel").await;
    assert!(matches!(outcome, Outcome::Cancelled));
    assert!(h.orchestrator.pending("alice").await.is_none());
    assert!(!staged.exists());

    match h.reply("alice", "all").await {
        Outcome::Message(text) => assert_eq!(text, prompts::NO_PENDING),
        other => panic!("expected a message, got {other:?}"),
    }
    assert!(h.rendered().is_empty());
}

#[tokio::test]
async fn cancel_with_nothing_pending() {
    let h = Harness::new(3);
    let outcome = h.orchestrator.handle("alice", Inbound::Cancel).await;
    assert!(matches!(outcome, Outcome::Message(_)));
}

#[tokio::test]
async fn new_upload_supersedes_pending_one() {
    let h = Harness::new(3);
    h.upload_bytes("alice", "stroke=1", b"%PDF first").await;
    let superseded = h.orchestrator.pending("alice").await.unwrap().input_path;

    let outcome = h.upload_bytes("alice", "stroke=4", b"%PDF second").await;
    assert!(prompt(&outcome).contains("replaced"));
    assert!(!superseded.exists());

    let pending = h.orchestrator.pending("alice").await.unwrap();
    assert_eq!(pending.options.stroke_width, 4.0);
    assert_ne!(pending.input_path, superseded);

    let artifact = completed(h.reply("alice", "all").await);
    assert!(artifact.pages.iter().all(|p| p.stroke_width == 4.0));
    assert_eq!(h.opened(), vec!["%PDF second"]);
}

#[tokio::test]
async fn requesters_do_not_share_sessions() {
    let h = Harness::new(3);
    h.upload("alice", "").await;

    assert!(matches!(h.reply("bob", "all").await, Outcome::Message(_)));
    assert!(h.orchestrator.pending("alice").await.is_some());
    assert!(h.orchestrator.pending("bob").await.is_none());

    h.upload("bob", "").await;
    let artifact = completed(h.reply("bob", "3").await);
    assert_eq!(artifact.source_pages, vec![3]);
    assert!(h.orchestrator.pending("alice").await.is_some());
}

#[tokio::test]
async fn same_named_uploads_stay_with_their_requester() {
    let h = Harness::new(3);
    h.upload_bytes("alice", "", b"%PDF from alice").await;
    h.upload_bytes("bob", "", b"%PDF from bob").await;

    let alice_staged = h.orchestrator.pending("alice").await.unwrap().input_path;
    let bob_staged = h.orchestrator.pending("bob").await.unwrap().input_path;
    assert_ne!(alice_staged, bob_staged);
    assert_eq!(std::fs::read(&alice_staged).unwrap(), b"%PDF from alice");

    // Alice cancelling leaves Bob's upload alone.
    assert!(matches!(h.reply("alice", "cancel").await, Outcome::Cancelled));
    assert!(!alice_staged.exists());
    assert!(bob_staged.exists());

    let artifact = completed(h.reply("bob", "all").await);
    assert_eq!(h.opened(), vec!["%PDF from bob"]);
    assert_eq!(artifact.path, h.dir.path().join("bob").join("outlined_plans.pdf"));
}

#[tokio::test]
async fn concurrent_requesters_get_separate_outputs() {
    let h = Harness::new(3);
    h.upload_bytes("alice", "dpi=72", b"%PDF from alice").await;
    h.upload_bytes("bob", "dpi=72", b"%PDF from bob").await;

    let (a, b) = tokio::join!(h.reply("alice", "1"), h.reply("bob", "2-3"));
    let (a, b) = (completed(a), completed(b));

    assert_ne!(a.path, b.path);
    let a_bytes = std::fs::read(&a.path).unwrap();
    let b_bytes = std::fs::read(&b.path).unwrap();
    assert_eq!(assemble::page_count(&a_bytes).unwrap(), 1);
    assert_eq!(assemble::page_count(&b_bytes).unwrap(), 2);

    let mut opened = h.opened();
    opened.sort();
    assert_eq!(opened, vec!["%PDF from alice", "%PDF from bob"]);
    assert_eq!(h.files_of("alice"), vec!["outlined_plans.pdf"]);
    assert_eq!(h.files_of("bob"), vec!["outlined_plans.pdf"]);
}

#[tokio::test]
async fn help_does_not_touch_session() {
    let h = Harness::new(3);
    h.upload("alice", "").await;

    match h.reply("alice", "/help").await {
        Outcome::Message(text) => assert!(text.contains("min_len")),
        other => panic!("expected help, got {other:?}"),
    }
    assert!(h.orchestrator.pending("alice").await.is_some());
}

// ── Immediate paths ──────────────────────────────────────────────────────────

#[tokio::test]
async fn single_page_document_is_traced_immediately() {
    let h = Harness::new(1);
    let artifact = completed(h.upload("alice", "dpi=72").await);

    assert_eq!(artifact.source_pages, vec![1]);
    assert_eq!(h.rendered(), vec![0]);
    assert!(h.orchestrator.pending("alice").await.is_none());
    assert_eq!(h.files_of("alice"), vec!["outlined_plans.pdf"]);
}

#[tokio::test]
async fn photo_is_traced_immediately() {
    let h = Harness::new(3);
    let artifact = InputArtifact::classify(png_bytes(), "sketch.jpg", Some("image/png"));
    let outcome = h
        .orchestrator
        .handle(
            "alice",
            Inbound::Artifact {
                artifact,
                caption: String::new(),
            },
        )
        .await;

    let artifact = completed(outcome);
    assert_eq!(artifact.page_count, 1);
    assert_eq!(
        artifact.path,
        h.dir.path().join("alice").join("outlined_sketch.pdf")
    );
    assert!(h.rendered().is_empty(), "photos never reach the rasterizer");
}

#[tokio::test]
async fn rejected_options_are_reported_not_fatal() {
    let h = Harness::new(1);
    let artifact = completed(h.upload("alice", "dpi=high stroke=3").await);

    assert!(artifact.notices.iter().any(|n| n.contains("dpi=high")));
    assert!(artifact.pages.iter().all(|p| p.stroke_width == 3.0));
    assert!(artifact.pages.iter().all(|p| p.dpi == 600.0));
}

#[tokio::test]
async fn rejected_options_show_in_selection_prompt() {
    let h = Harness::new(3);
    let outcome = h.upload("alice", "precision=-1").await;
    let text = prompt(&outcome);
    assert!(text.contains("precision=-1"));
    assert!(text.contains("3 pages"));
}
