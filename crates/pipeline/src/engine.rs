//! The four-state run machine: AwaitingCaptcha → StageTwo → StageThree →
//! Resolved. Every failure inside a run is recoverable: the engine hands
//! back a [`RunError`] and the scheduler keeps going.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, info, warn};

use slotwatch_core::{
    CaptchaSolver, Config, Error, PageDriver, PipelineResult, PipelineRunner, Result, RunError,
    RunOutcome, SelectorSet, SessionFactory, StageType, Target,
};

/// Hard wall-clock budget for one run; expiry aborts the run and tears the
/// session down via drop.
const DEFAULT_RUN_BUDGET: Duration = Duration::from_secs(120);

/// Pause after submit/stage clicks, giving the page time to settle.
const DEFAULT_SETTLE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub run_budget: Duration,
    pub settle: Duration,
    pub captcha_min_len: usize,
    /// `None` keeps retrying until the run budget expires.
    pub max_captcha_attempts: Option<u32>,
    pub artifact_dir: PathBuf,
    pub unavailable_marker: Regex,
}

impl PipelineSettings {
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let unavailable_marker = Regex::new(&cfg.unavailable_marker)
            .map_err(|e| Error::Config(format!("unavailable_marker: {}", e)))?;
        Ok(Self {
            run_budget: DEFAULT_RUN_BUDGET,
            settle: DEFAULT_SETTLE,
            captcha_min_len: cfg.captcha_min_len,
            max_captcha_attempts: cfg.max_captcha_attempts,
            artifact_dir: cfg.artifact_dir.clone(),
            unavailable_marker,
        })
    }
}

enum Stage {
    AwaitingCaptcha,
    StageTwo,
    StageThree,
    Resolved,
}

pub struct Engine<F, S> {
    sessions: F,
    solver: S,
    selectors: SelectorSet,
    settings: PipelineSettings,
}

impl<F, S> Engine<F, S>
where
    F: SessionFactory,
    S: CaptchaSolver,
{
    pub fn new(sessions: F, solver: S, selectors: SelectorSet, settings: PipelineSettings) -> Self {
        Self {
            sessions,
            solver,
            selectors,
            settings,
        }
    }

    async fn run_inner(&self, target: &Target) -> RunOutcome {
        // Session released on every exit path: run_inner returning drops
        // it, and a budget expiry drops the whole future.
        let mut page = self.sessions.open_session().await?;

        let mut result = PipelineResult::Undefined;
        let mut stage = Stage::AwaitingCaptcha;

        loop {
            stage = match stage {
                Stage::AwaitingCaptcha => {
                    self.pass_captcha(&mut page, target).await?;
                    debug!(name = %target.name, "CAPTCHA accepted, proceeding to second stage");
                    Stage::StageTwo
                }
                Stage::StageTwo => match self.stage_two(&mut page, target).await? {
                    Some(early) => {
                        result = early;
                        Stage::Resolved
                    }
                    None => Stage::StageThree,
                },
                Stage::StageThree => {
                    result = self.stage_three(&mut page, target).await?;
                    Stage::Resolved
                }
                Stage::Resolved => break,
            };
        }

        info!(name = %target.name, availability = %result, "Slot availability deduced");
        Ok(result)
    }

    /// Capture → decode → submit loop. Returns once the error indicator is
    /// absent after a submit; a decoded string shorter than the minimum is
    /// discarded without submitting.
    async fn pass_captcha(
        &self,
        page: &mut F::Session,
        target: &Target,
    ) -> std::result::Result<(), RunError> {
        let artifact = self
            .settings
            .artifact_dir
            .join(format!("captcha-{}.png", target.fingerprint()));
        tokio::fs::create_dir_all(&self.settings.artifact_dir)
            .await
            .map_err(|e| RunError::Solver(format!("create artifact dir: {}", e)))?;

        let mut attempts: u32 = 0;
        loop {
            if let Some(max) = self.settings.max_captcha_attempts {
                if attempts >= max {
                    return Err(RunError::CaptchaUnresolvable { attempts });
                }
            }
            attempts += 1;

            debug!(name = %target.name, url = %target.url, attempt = attempts, "Navigating to URL");
            page.navigate(&target.url).await?;
            page.wait_visible(&self.selectors.captcha_image).await?;

            let image = page.capture(&self.selectors.captcha_image).await?;
            tokio::fs::write(&artifact, &image)
                .await
                .map_err(|e| RunError::Solver(format!("write captcha artifact: {}", e)))?;

            let decoded = self.solver.decode(&artifact).await?;
            let decoded = decoded.trim();
            if decoded.len() < self.settings.captcha_min_len {
                debug!(name = %target.name, len = decoded.len(), "Decoded CAPTCHA too short, recapturing");
                continue;
            }
            debug!(name = %target.name, captcha = %decoded, "Decoded CAPTCHA");

            page.send_keys(&self.selectors.captcha_input, decoded).await?;
            page.click(&self.selectors.captcha_submit).await?;
            self.settle().await;

            if !page.exists(&self.selectors.captcha_error).await? {
                return Ok(());
            }
            debug!(name = %target.name, "CAPTCHA rejected, retrying");
        }
    }

    /// Second stage branches on the target's flow variant. A missing
    /// expected element short-circuits the run with an early verdict.
    async fn stage_two(
        &self,
        page: &mut F::Session,
        target: &Target,
    ) -> std::result::Result<Option<PipelineResult>, RunError> {
        self.settle().await;
        match target.stage_type {
            StageType::Initial => {
                if !page.exists(&self.selectors.stage_two_button).await? {
                    return Ok(Some(PipelineResult::MaybeAlreadySigned));
                }
            }
            StageType::Rescheduled => {
                if !page.exists(&self.selectors.stage_two_bis_check).await? {
                    return Ok(Some(PipelineResult::NoRescheduleTasks));
                }
            }
        }
        Ok(None)
    }

    /// Third stage: commit the flow and read the verdict off the rendered
    /// document.
    async fn stage_three(
        &self,
        page: &mut F::Session,
        target: &Target,
    ) -> std::result::Result<PipelineResult, RunError> {
        match target.stage_type {
            StageType::Initial => {
                page.click(&self.selectors.stage_two_button).await?;
            }
            StageType::Rescheduled => {
                page.click(&self.selectors.stage_two_bis_check).await?;
                page.click(&self.selectors.stage_two_bis_confirm).await?;
            }
        }
        self.settle().await;

        let html = page.document_html().await?;
        if self.settings.unavailable_marker.is_match(&html) {
            Ok(PipelineResult::SlotNotAvailable)
        } else {
            Ok(PipelineResult::SlotAvailable)
        }
    }

    async fn settle(&self) {
        if !self.settings.settle.is_zero() {
            tokio::time::sleep(self.settings.settle).await;
        }
    }
}

#[async_trait]
impl<F, S> PipelineRunner for Engine<F, S>
where
    F: SessionFactory,
    S: CaptchaSolver,
{
    async fn run(&self, target: &Target) -> RunOutcome {
        match tokio::time::timeout(self.settings.run_budget, self.run_inner(target)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(name = %target.name, budget_secs = self.settings.run_budget.as_secs(),
                      "Run exceeded its budget, aborting");
                Err(RunError::Timeout)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::path::Path;
    use std::sync::{Arc, Mutex};

    fn selectors() -> SelectorSet {
        SelectorSet {
            captcha_image: "#captcha_image".into(),
            captcha_input: "#captcha_input".into(),
            captcha_error: "#captcha_error".into(),
            captcha_submit: "#captcha_submit".into(),
            stage_two_button: "#book".into(),
            stage_two_bis_check: "#reschedule_check".into(),
            stage_two_bis_confirm: "#reschedule_confirm".into(),
        }
    }

    fn target(stage_type: StageType) -> Target {
        Target {
            name: "N".into(),
            url: "https://example.org/queue".into(),
            recipient_id: 123,
            enabled: true,
            stage_type,
        }
    }

    #[derive(Default)]
    struct FakeState {
        ops: Vec<String>,
        /// Scripted error-indicator probes; empty queue falls back to
        /// `err_default`.
        err_probes: VecDeque<bool>,
        err_default: bool,
        stage_two_present: bool,
        bis_present: bool,
        html: String,
        nav_delay: Option<Duration>,
    }

    #[derive(Clone)]
    struct FakeDriver(Arc<Mutex<FakeState>>);

    #[async_trait]
    impl PageDriver for FakeDriver {
        async fn navigate(&mut self, url: &str) -> Result<()> {
            let delay = {
                let mut s = self.0.lock().unwrap();
                s.ops.push(format!("navigate {}", url));
                s.nav_delay
            };
            if let Some(d) = delay {
                tokio::time::sleep(d).await;
            }
            Ok(())
        }

        async fn wait_visible(&mut self, selector: &str) -> Result<()> {
            self.0.lock().unwrap().ops.push(format!("wait {}", selector));
            Ok(())
        }

        async fn exists(&mut self, selector: &str) -> Result<bool> {
            let mut s = self.0.lock().unwrap();
            s.ops.push(format!("exists {}", selector));
            let present = match selector {
                "#captcha_error" => s.err_probes.pop_front().unwrap_or(s.err_default),
                "#book" => s.stage_two_present,
                "#reschedule_check" => s.bis_present,
                _ => true,
            };
            Ok(present)
        }

        async fn capture(&mut self, selector: &str) -> Result<Vec<u8>> {
            self.0.lock().unwrap().ops.push(format!("capture {}", selector));
            Ok(b"png".to_vec())
        }

        async fn send_keys(&mut self, selector: &str, text: &str) -> Result<()> {
            self.0
                .lock()
                .unwrap()
                .ops
                .push(format!("send_keys {} {}", selector, text));
            Ok(())
        }

        async fn click(&mut self, selector: &str) -> Result<()> {
            self.0.lock().unwrap().ops.push(format!("click {}", selector));
            Ok(())
        }

        async fn document_html(&mut self) -> Result<String> {
            let s = self.0.lock().unwrap();
            Ok(s.html.clone())
        }
    }

    struct FakeFactory(Arc<Mutex<FakeState>>);

    #[async_trait]
    impl SessionFactory for FakeFactory {
        type Session = FakeDriver;

        async fn open_session(&self) -> Result<FakeDriver> {
            Ok(FakeDriver(self.0.clone()))
        }
    }

    struct FakeSolver {
        outputs: Mutex<VecDeque<String>>,
    }

    impl FakeSolver {
        fn scripted(outputs: &[&str]) -> Self {
            Self {
                outputs: Mutex::new(outputs.iter().map(|s| s.to_string()).collect()),
            }
        }
    }

    #[async_trait]
    impl CaptchaSolver for FakeSolver {
        async fn decode(&self, _image: &Path) -> Result<String> {
            self.outputs
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| Error::Solver("ocr subprocess failed".into()))
        }
    }

    fn settings(dir: &Path) -> PipelineSettings {
        PipelineSettings {
            run_budget: Duration::from_secs(5),
            settle: Duration::ZERO,
            captcha_min_len: 6,
            max_captcha_attempts: None,
            artifact_dir: dir.to_path_buf(),
            unavailable_marker: Regex::new("Извините").unwrap(),
        }
    }

    fn engine(
        state: Arc<Mutex<FakeState>>,
        solver: FakeSolver,
        dir: &Path,
    ) -> Engine<FakeFactory, FakeSolver> {
        Engine::new(FakeFactory(state), solver, selectors(), settings(dir))
    }

    fn ops(state: &Arc<Mutex<FakeState>>) -> Vec<String> {
        state.lock().unwrap().ops.clone()
    }

    #[tokio::test]
    async fn short_decode_recaptures_without_submitting() {
        let dir = tempfile::tempdir().unwrap();
        let state = Arc::new(Mutex::new(FakeState {
            stage_two_present: true,
            html: "<html>ok</html>".into(),
            ..Default::default()
        }));
        let eng = engine(state.clone(), FakeSolver::scripted(&["abc", "ABCDEF"]), dir.path());

        let result = eng.run(&target(StageType::Initial)).await.unwrap();
        assert_eq!(result, PipelineResult::SlotAvailable);

        let ops = ops(&state);
        let submits = ops.iter().filter(|o| o.starts_with("click #captcha_submit")).count();
        let captures = ops.iter().filter(|o| o.starts_with("capture")).count();
        assert_eq!(submits, 1, "short decode must never submit");
        assert_eq!(captures, 2, "short decode must force a recapture");
        // The artifact lands under a fingerprint-derived name.
        let fp = target(StageType::Initial).fingerprint();
        assert!(dir.path().join(format!("captcha-{}.png", fp)).exists());
    }

    #[tokio::test]
    async fn rejected_captcha_loops_back_to_recapture() {
        let dir = tempfile::tempdir().unwrap();
        let state = Arc::new(Mutex::new(FakeState {
            err_probes: VecDeque::from([true, false]),
            stage_two_present: true,
            html: "<html>ok</html>".into(),
            ..Default::default()
        }));
        let eng = engine(
            state.clone(),
            FakeSolver::scripted(&["AAAAAA", "BBBBBB"]),
            dir.path(),
        );

        let result = eng.run(&target(StageType::Initial)).await.unwrap();
        assert_eq!(result, PipelineResult::SlotAvailable);

        let ops = ops(&state);
        let submits = ops.iter().filter(|o| o.starts_with("click #captcha_submit")).count();
        assert_eq!(submits, 2);
    }

    #[tokio::test]
    async fn missing_stage_two_button_resolves_maybe_already_signed() {
        let dir = tempfile::tempdir().unwrap();
        let state = Arc::new(Mutex::new(FakeState {
            stage_two_present: false,
            html: "<html>ignored</html>".into(),
            ..Default::default()
        }));
        let eng = engine(state.clone(), FakeSolver::scripted(&["AAAAAA"]), dir.path());

        let result = eng.run(&target(StageType::Initial)).await.unwrap();
        assert_eq!(result, PipelineResult::MaybeAlreadySigned);

        // Stage three must never be entered.
        let ops = ops(&state);
        assert!(!ops.iter().any(|o| o == "click #book"));
    }

    #[tokio::test]
    async fn missing_reschedule_check_resolves_no_reschedule_tasks() {
        let dir = tempfile::tempdir().unwrap();
        let state = Arc::new(Mutex::new(FakeState {
            bis_present: false,
            html: "<html>ignored</html>".into(),
            ..Default::default()
        }));
        let eng = engine(state.clone(), FakeSolver::scripted(&["AAAAAA"]), dir.path());

        let result = eng.run(&target(StageType::Rescheduled)).await.unwrap();
        assert_eq!(result, PipelineResult::NoRescheduleTasks);
        assert!(!ops(&state).iter().any(|o| o.starts_with("click #reschedule")));
    }

    #[tokio::test]
    async fn rescheduled_flow_clicks_check_then_confirm() {
        let dir = tempfile::tempdir().unwrap();
        let state = Arc::new(Mutex::new(FakeState {
            bis_present: true,
            html: "<html>ok</html>".into(),
            ..Default::default()
        }));
        let eng = engine(state.clone(), FakeSolver::scripted(&["AAAAAA"]), dir.path());

        let result = eng.run(&target(StageType::Rescheduled)).await.unwrap();
        assert_eq!(result, PipelineResult::SlotAvailable);

        let ops = ops(&state);
        let check = ops.iter().position(|o| o == "click #reschedule_check");
        let confirm = ops.iter().position(|o| o == "click #reschedule_confirm");
        assert!(check.unwrap() < confirm.unwrap());
    }

    #[tokio::test]
    async fn unavailability_marker_resolves_slot_not_available() {
        let dir = tempfile::tempdir().unwrap();
        let state = Arc::new(Mutex::new(FakeState {
            stage_two_present: true,
            html: "<html><body>Извините, слотов нет</body></html>".into(),
            ..Default::default()
        }));
        let eng = engine(state.clone(), FakeSolver::scripted(&["AAAAAA"]), dir.path());

        let result = eng.run(&target(StageType::Initial)).await.unwrap();
        assert_eq!(result, PipelineResult::SlotNotAvailable);
    }

    #[tokio::test]
    async fn attempt_ceiling_yields_captcha_unresolvable() {
        let dir = tempfile::tempdir().unwrap();
        let state = Arc::new(Mutex::new(FakeState {
            err_default: true, // every submit rejected
            ..Default::default()
        }));
        let mut cfg = settings(dir.path());
        cfg.max_captcha_attempts = Some(2);
        let eng = Engine::new(
            FakeFactory(state.clone()),
            FakeSolver::scripted(&["AAAAAA", "BBBBBB", "CCCCCC"]),
            selectors(),
            cfg,
        );

        let err = eng.run(&target(StageType::Initial)).await.unwrap_err();
        assert_eq!(err, RunError::CaptchaUnresolvable { attempts: 2 });
    }

    #[tokio::test]
    async fn solver_failure_is_a_recoverable_run_error() {
        let dir = tempfile::tempdir().unwrap();
        let state = Arc::new(Mutex::new(FakeState::default()));
        let eng = engine(state, FakeSolver::scripted(&[]), dir.path());

        let err = eng.run(&target(StageType::Initial)).await.unwrap_err();
        assert!(matches!(err, RunError::Solver(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn budget_expiry_reports_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let state = Arc::new(Mutex::new(FakeState {
            nav_delay: Some(Duration::from_secs(600)),
            ..Default::default()
        }));
        let eng = engine(state, FakeSolver::scripted(&["AAAAAA"]), dir.path());

        let err = eng.run(&target(StageType::Initial)).await.unwrap_err();
        assert_eq!(err, RunError::Timeout);
    }
}
