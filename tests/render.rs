//! Render controller tests against a scripted fake viewer.
//!
//! Timeouts are scaled down to milliseconds: base 15 ms, unit 1 ms,
//! give-up 60 ms, so the ceilings are 15 → 17 → 21 → 29 → 45 ms.

use async_trait::async_trait;
use edgequake_pdfprep::{
    PageSelection, RenderConfig, RenderController, RenderError, RenderedPage, Scale,
    ViewerError, ViewerLauncher, ViewerSession,
};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

// ── Fake viewer ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Act {
    Render,
    /// Report a load timeout.
    Timeout,
    /// Never answer; only the controller's outer cutoff ends the wait.
    Hang,
    /// Report a non-timeout failure.
    Fail,
}

type Script = Box<dyn Fn(usize, usize) -> Act + Send + Sync>;

#[derive(Debug, Default)]
struct Log {
    launches: usize,
    closes: usize,
    /// `(page, timeout)` for every render call.
    calls: Vec<(usize, Duration)>,
}

struct Shared {
    pages: usize,
    /// Decides the outcome of the n-th call (0-indexed) for a page.
    script: Script,
    launch: Act,
    hang_on_close: bool,
    log: Mutex<Log>,
}

#[derive(Clone)]
struct FakeViewer(Arc<Shared>);

impl FakeViewer {
    fn new(pages: usize, script: impl Fn(usize, usize) -> Act + Send + Sync + 'static) -> Self {
        Self(Arc::new(Shared {
            pages,
            script: Box::new(script),
            launch: Act::Render,
            hang_on_close: false,
            log: Mutex::new(Log::default()),
        }))
    }

    fn with_launch(pages: usize, launch: Act) -> Self {
        Self(Arc::new(Shared {
            pages,
            script: Box::new(|_, _| Act::Render),
            launch,
            hang_on_close: false,
            log: Mutex::new(Log::default()),
        }))
    }

    fn hanging_on_close(pages: usize, script: impl Fn(usize, usize) -> Act + Send + Sync + 'static) -> Self {
        Self(Arc::new(Shared {
            pages,
            script: Box::new(script),
            launch: Act::Render,
            hang_on_close: true,
            log: Mutex::new(Log::default()),
        }))
    }

    fn launches(&self) -> usize {
        self.0.log.lock().unwrap().launches
    }

    fn closes(&self) -> usize {
        self.0.log.lock().unwrap().closes
    }

    fn timeouts_for(&self, page: usize) -> Vec<Duration> {
        self.0
            .log
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|(p, _)| *p == page)
            .map(|(_, t)| *t)
            .collect()
    }
}

struct FakeSession(Arc<Shared>);

#[async_trait]
impl ViewerSession for FakeSession {
    async fn page_count(&mut self, _timeout: Duration) -> Result<usize, ViewerError> {
        Ok(self.0.pages)
    }

    async fn render_page(&mut self, page_num: usize, timeout: Duration) -> Result<RenderedPage, ViewerError> {
        let nth = {
            let mut log = self.0.log.lock().unwrap();
            let nth = log.calls.iter().filter(|(p, _)| *p == page_num).count();
            log.calls.push((page_num, timeout));
            nth
        };
        match (self.0.script)(page_num, nth) {
            Act::Render => Ok(RenderedPage {
                page_num,
                width: 1240,
                height: 1754,
                text: Some(format!("page {page_num}")),
            }),
            Act::Timeout => Err(ViewerError::Timeout(format!("page {page_num} still loading"))),
            Act::Hang => std::future::pending().await,
            Act::Fail => Err(ViewerError::Failed(format!("page {page_num} is broken"))),
        }
    }

    async fn close(&mut self) -> Result<(), ViewerError> {
        if self.0.hang_on_close {
            std::future::pending::<()>().await;
        }
        self.0.log.lock().unwrap().closes += 1;
        Ok(())
    }
}

#[async_trait]
impl ViewerLauncher for FakeViewer {
    async fn launch(
        &self,
        _document: &Path,
        _scale: Scale,
        _timeout: Duration,
    ) -> Result<Box<dyn ViewerSession>, ViewerError> {
        self.0.log.lock().unwrap().launches += 1;
        match self.0.launch {
            Act::Render => Ok(Box::new(FakeSession(self.0.clone()))),
            Act::Timeout => Err(ViewerError::Timeout("document still opening".into())),
            Act::Hang => std::future::pending().await,
            Act::Fail => Err(ViewerError::Failed("viewer binary missing".into())),
        }
    }
}

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

fn config() -> edgequake_pdfprep::RenderConfigBuilder {
    RenderConfig::builder()
        .base_timeout(ms(15))
        .escalation_unit(ms(1))
        .give_up_timeout(ms(60))
        .load_grace(ms(5))
        .teardown_timeout(ms(10))
}

// ── Escalation ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn timeouts_escalate_then_reset_after_success() {
    let viewer = FakeViewer::new(2, |page, nth| {
        if page == 1 && nth < 4 {
            Act::Timeout
        } else {
            Act::Render
        }
    });
    let mut ctl = RenderController::new(viewer.clone(), "doc.pdf", config().build().unwrap());

    let doc = ctl.render_document(|_| {}).await.unwrap();

    assert_eq!(viewer.timeouts_for(1), vec![ms(15), ms(17), ms(21), ms(29), ms(45)]);
    assert_eq!(viewer.timeouts_for(2), vec![ms(15)]);
    assert_eq!(doc.pages[0].attempts, 5);
    assert!(doc.abandoned_pages().is_empty());

    // Every timeout tore the session down; shutdown closed the last one.
    assert_eq!(viewer.launches(), 5);
    assert_eq!(viewer.closes(), 5);
    assert_eq!(ctl.state().timeout(), ms(15));
}

#[tokio::test]
async fn page_that_never_loads_is_abandoned() {
    let viewer = FakeViewer::new(3, |page, _| if page == 2 { Act::Timeout } else { Act::Render });
    let mut ctl = RenderController::new(viewer.clone(), "doc.pdf", config().build().unwrap());

    let doc = ctl.render_document(|_| {}).await.unwrap();

    assert_eq!(doc.abandoned_pages(), vec![2]);
    assert_eq!(doc.pages[1].attempts, 5);
    assert_eq!(viewer.timeouts_for(2).len(), 5);
    // The next page starts over at the base ceiling.
    assert_eq!(viewer.timeouts_for(3), vec![ms(15)]);
    assert!(doc.pages[2].page.is_some());
}

#[tokio::test]
async fn base_at_give_up_abandons_after_one_timeout() {
    let viewer = FakeViewer::new(1, |_, _| Act::Timeout);
    let cfg = config().base_timeout(ms(60)).build().unwrap();
    let mut ctl = RenderController::new(viewer.clone(), "doc.pdf", cfg);

    ctl.page_count().await.unwrap();
    let render = ctl.render_page(1).await.unwrap();

    assert!(render.gave_up());
    assert_eq!(render.attempts, 1);
    ctl.shutdown().await;
}

#[tokio::test]
async fn huge_grace_does_not_overflow_the_cutoff() {
    let viewer = FakeViewer::new(1, |_, nth| if nth < 2 { Act::Timeout } else { Act::Render });
    let cfg = RenderConfig {
        load_grace: Duration::MAX,
        ..config().build().unwrap()
    };
    let mut ctl = RenderController::new(viewer.clone(), "doc.pdf", cfg);

    let doc = ctl.render_document(|_| {}).await.unwrap();

    assert_eq!(doc.pages[0].attempts, 3);
    assert_eq!(viewer.timeouts_for(1), vec![ms(15), ms(17), ms(21)]);
}

#[tokio::test]
async fn hung_page_is_cut_off_from_outside() {
    let viewer = FakeViewer::new(1, |_, nth| if nth == 0 { Act::Hang } else { Act::Render });
    let mut ctl = RenderController::new(viewer.clone(), "doc.pdf", config().build().unwrap());

    let started = Instant::now();
    let doc = ctl.render_document(|_| {}).await.unwrap();

    assert_eq!(doc.pages[0].attempts, 2);
    assert_eq!(viewer.timeouts_for(1), vec![ms(15), ms(17)]);
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn hanging_teardown_is_bounded() {
    let viewer = FakeViewer::hanging_on_close(2, |page, nth| {
        if page == 1 && nth < 2 {
            Act::Timeout
        } else {
            Act::Render
        }
    });
    let mut ctl = RenderController::new(viewer.clone(), "doc.pdf", config().build().unwrap());

    let started = Instant::now();
    let doc = ctl.render_document(|_| {}).await.unwrap();

    assert_eq!(doc.pages.len(), 2);
    assert!(doc.abandoned_pages().is_empty());
    // Abandoned sessions were replaced by fresh ones.
    assert_eq!(viewer.launches(), 3);
    assert_eq!(viewer.closes(), 0);
    assert!(started.elapsed() < Duration::from_secs(5));
}

// ── Failures ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn viewer_failure_is_not_retried() {
    let viewer = FakeViewer::new(3, |page, _| if page == 2 { Act::Fail } else { Act::Render });
    let mut ctl = RenderController::new(viewer.clone(), "doc.pdf", config().build().unwrap());

    let err = ctl.render_document(|_| {}).await.unwrap_err();

    assert!(matches!(err, RenderError::Page { page: 2, .. }), "got: {err}");
    assert_eq!(viewer.timeouts_for(2).len(), 1);
    assert!(viewer.timeouts_for(3).is_empty());
    assert_eq!(viewer.launches(), viewer.closes());
}

#[tokio::test]
async fn document_that_never_opens_gives_up() {
    let viewer = FakeViewer::with_launch(3, Act::Timeout);
    let mut ctl = RenderController::new(viewer.clone(), "doc.pdf", config().build().unwrap());

    let err = ctl.render_document(|_| {}).await.unwrap_err();

    assert!(matches!(err, RenderError::GaveUpLaunch { attempts: 5, .. }), "got: {err}");
    assert_eq!(viewer.launches(), 5);
    assert_eq!(ctl.state().timeout(), ms(15));
}

#[tokio::test]
async fn hung_launch_counts_as_timeout() {
    let viewer = FakeViewer::with_launch(3, Act::Hang);
    let cfg = config().base_timeout(ms(45)).build().unwrap();
    let mut ctl = RenderController::new(viewer.clone(), "doc.pdf", cfg);

    // 45 → 47 → 51 → 59 → 75 ms: four opens, then give up.
    let err = ctl.page_count().await.unwrap_err();
    assert!(matches!(err, RenderError::GaveUpLaunch { attempts: 4, .. }), "got: {err}");
}

#[tokio::test]
async fn launch_failure_is_an_error() {
    let viewer = FakeViewer::with_launch(3, Act::Fail);
    let mut ctl = RenderController::new(viewer.clone(), "doc.pdf", config().build().unwrap());

    let err = ctl.page_count().await.unwrap_err();
    assert!(matches!(err, RenderError::Launch { .. }), "got: {err}");
    assert_eq!(viewer.launches(), 1);
}

// ── Sessions and selection ───────────────────────────────────────────────────

#[tokio::test]
async fn sessions_are_recycled_after_n_pages() {
    let viewer = FakeViewer::new(5, |_, _| Act::Render);
    let cfg = config().recycle_after_pages(2).build().unwrap();
    let mut ctl = RenderController::new(viewer.clone(), "doc.pdf", cfg);

    let doc = ctl.render_document(|_| {}).await.unwrap();

    assert_eq!(doc.pages.len(), 5);
    assert_eq!(viewer.launches(), 3);
    assert_eq!(viewer.closes(), 3);
}

#[tokio::test]
async fn selected_pages_render_in_order_with_callback() {
    let viewer = FakeViewer::new(6, |_, _| Act::Render);
    let cfg = config()
        .pages(PageSelection::Set(vec![5, 2, 9, 2]))
        .scale(Scale::OneAndHalf)
        .build()
        .unwrap();
    let mut ctl = RenderController::new(viewer.clone(), "doc.pdf", cfg);

    let mut seen = Vec::new();
    let doc = ctl
        .render_document(|render| seen.push(render.page_num))
        .await
        .unwrap();

    assert_eq!(doc.total_pages, 6);
    assert_eq!(seen, vec![2, 5]);
    assert_eq!(
        doc.pages[1].page.as_ref().and_then(|p| p.text.as_deref()),
        Some("page 5")
    );
}
