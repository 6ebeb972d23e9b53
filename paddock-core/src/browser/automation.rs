use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig as ChromiumConfig};
use chromiumoxide::cdp::browser_protocol::fetch::{
    ContinueRequestParams, EnableParams, EventRequestPaused, FailRequestParams, RequestPattern,
    RequestStage,
};
use chromiumoxide::cdp::browser_protocol::network::{
    ErrorReason, EventRequestWillBeSent, EventResponseReceived, ResourceType,
};
use chromiumoxide::cdp::browser_protocol::page::NavigateParams;
use chromiumoxide::cdp::browser_protocol::target::CreateTargetParams;
use chromiumoxide::page::Page;
use futures::StreamExt;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::BrowserSection;

use super::blocking::BlockingProfile;
use super::consent;
use super::error::{BrowserError, BrowserResult};
use super::page::{BrowserPage, ObservedResponse, PageFactory, PageOptions, PageTraffic};

const SELECTOR_POLL: Duration = Duration::from_millis(200);

/// Builds and launches the Chromium process.
#[derive(Debug, Clone)]
pub struct ChromiumLauncher {
    config: Arc<BrowserSection>,
}

impl ChromiumLauncher {
    pub fn new(config: BrowserSection) -> BrowserResult<Self> {
        if !config.engine.eq_ignore_ascii_case("chromium") {
            return Err(BrowserError::Configuration(format!(
                "unsupported browser engine {}",
                config.engine
            )));
        }
        Ok(Self {
            config: Arc::new(config),
        })
    }

    pub fn config(&self) -> &BrowserSection {
        &self.config
    }

    pub async fn launch(&self) -> BrowserResult<ChromiumSession> {
        let chromium_config = self.build_chromium_config()?;
        info!(
            headless = self.config.headless,
            executable = self.config.executable_path.as_deref().unwrap_or("auto"),
            "Launching Chromium instance"
        );
        let (browser, mut handler) = Browser::launch(chromium_config)
            .await
            .map_err(|err| BrowserError::Launch(err.to_string()))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    debug!(error = %err, "Chromium handler reported error");
                }
            }
        });

        Ok(ChromiumSession {
            browser,
            handler_task: Some(handler_task),
        })
    }

    fn build_chromium_config(&self) -> BrowserResult<ChromiumConfig> {
        let mut builder = ChromiumConfig::builder();
        if let Some(executable) = &self.config.executable_path {
            builder = builder.chrome_executable(executable);
        }
        if !self.config.headless {
            builder = builder.with_head();
        }
        if !self.config.sandbox {
            builder = builder.no_sandbox();
        }
        builder = builder.request_timeout(self.config.navigation_timeout());

        let mut args = vec![
            "--disable-gpu".to_string(),
            "--no-first-run".to_string(),
            "--mute-audio".to_string(),
            "--disable-background-timer-throttling".to_string(),
            "--password-store=basic".to_string(),
        ];
        if let Some(user_agent) = &self.config.user_agent {
            args.push(format!("--user-agent={user_agent}"));
        }
        if let Some(lang) = &self.config.lang {
            args.push(format!("--lang={lang}"));
        }
        builder = builder.args(args);

        builder.build().map_err(BrowserError::Configuration)
    }
}

#[derive(Debug)]
pub struct ChromiumSession {
    browser: Browser,
    handler_task: Option<JoinHandle<()>>,
}

impl ChromiumSession {
    pub async fn shutdown(mut self) -> BrowserResult<()> {
        info!("Shutting down Chromium instance");
        if let Err(err) = self.browser.close().await {
            warn!(error = %err, "Failed to close browser gracefully");
        }
        if let Some(handle) = self.handler_task.take() {
            if let Err(err) = handle.await {
                warn!(error = %err, "Browser handler join error");
            }
        }
        Ok(())
    }
}

impl Drop for ChromiumSession {
    fn drop(&mut self) {
        if let Some(handle) = &self.handler_task {
            if !handle.is_finished() {
                warn!("ChromiumSession dropped without explicit shutdown");
                handle.abort();
            }
        }
    }
}

/// Opens Chromium pages on demand, launching the browser on first use.
#[derive(Debug)]
pub struct ChromiumPageFactory {
    launcher: ChromiumLauncher,
    session: AsyncMutex<Option<ChromiumSession>>,
}

impl ChromiumPageFactory {
    pub fn new(launcher: ChromiumLauncher) -> Self {
        Self {
            launcher,
            session: AsyncMutex::new(None),
        }
    }

    pub async fn shutdown(&self) -> BrowserResult<()> {
        let session = self.session.lock().await.take();
        match session {
            Some(session) => session.shutdown().await,
            None => Ok(()),
        }
    }

    async fn new_page(&self) -> BrowserResult<Page> {
        let mut guard = self.session.lock().await;
        if guard.is_none() {
            *guard = Some(self.launcher.launch().await?);
        }
        let session = guard
            .as_ref()
            .ok_or_else(|| BrowserError::Unexpected("browser session missing".into()))?;
        Ok(session
            .browser
            .new_page(CreateTargetParams::new("about:blank"))
            .await?)
    }
}

#[derive(Debug, Default)]
struct TrafficLog {
    sent_at: HashMap<String, f64>,
    responses: Vec<ObservedResponse>,
    blocked: u64,
    document_status: Option<u16>,
}

fn lock_log(log: &Mutex<TrafficLog>) -> std::sync::MutexGuard<'_, TrafficLog> {
    log.lock().unwrap_or_else(|poison| poison.into_inner())
}

fn resource_label(resource_type: &ResourceType) -> String {
    format!("{resource_type:?}").to_ascii_lowercase()
}

#[async_trait]
impl PageFactory for ChromiumPageFactory {
    async fn open(&self, options: &PageOptions) -> BrowserResult<Box<dyn BrowserPage>> {
        let page = self.new_page().await?;
        let log = Arc::new(Mutex::new(TrafficLog::default()));
        let mut listeners = Vec::new();

        let mut paused = page.event_listener::<EventRequestPaused>().await?;
        let interceptor = page.clone();
        let profile: BlockingProfile = options.profile;
        let allow_list = options.allow_list.clone();
        let blocked_log = Arc::clone(&log);
        listeners.push(tokio::spawn(async move {
            while let Some(event) = paused.next().await {
                let label = resource_label(&event.resource_type);
                let outcome = if profile.should_block(&label, &event.request.url, &allow_list) {
                    lock_log(&blocked_log).blocked += 1;
                    interceptor
                        .execute(FailRequestParams::new(
                            event.request_id.clone(),
                            ErrorReason::BlockedByClient,
                        ))
                        .await
                        .map(|_| ())
                } else {
                    interceptor
                        .execute(ContinueRequestParams::new(event.request_id.clone()))
                        .await
                        .map(|_| ())
                };
                if let Err(err) = outcome {
                    debug!(error = %err, url = %event.request.url, "Interception reply failed");
                }
            }
        }));

        let mut sent = page.event_listener::<EventRequestWillBeSent>().await?;
        let sent_log = Arc::clone(&log);
        listeners.push(tokio::spawn(async move {
            while let Some(event) = sent.next().await {
                lock_log(&sent_log)
                    .sent_at
                    .insert(event.request_id.inner().clone(), *event.timestamp.inner());
            }
        }));

        let mut received = page.event_listener::<EventResponseReceived>().await?;
        let received_log = Arc::clone(&log);
        listeners.push(tokio::spawn(async move {
            while let Some(event) = received.next().await {
                let mut log = lock_log(&received_log);
                let latency_ms = log
                    .sent_at
                    .remove(event.request_id.inner())
                    .map(|sent| ((*event.timestamp.inner() - sent).max(0.0) * 1000.0) as u64)
                    .unwrap_or_default();
                let status = u16::try_from(event.response.status).unwrap_or_default();
                if matches!(event.r#type, ResourceType::Document) {
                    log.document_status = Some(status);
                }
                log.responses.push(ObservedResponse {
                    url: event.response.url.clone(),
                    status,
                    mime_type: Some(event.response.mime_type.clone()),
                    resource_type: Some(resource_label(&event.r#type)),
                    latency_ms,
                });
            }
        }));

        page.execute(
            EnableParams::builder()
                .pattern(
                    RequestPattern::builder()
                        .url_pattern("*")
                        .request_stage(RequestStage::Request)
                        .build(),
                )
                .build(),
        )
        .await?;

        Ok(Box::new(ChromiumPage {
            page: Some(page),
            log,
            listeners,
        }))
    }
}

#[derive(Debug)]
pub struct ChromiumPage {
    page: Option<Page>,
    log: Arc<Mutex<TrafficLog>>,
    listeners: Vec<JoinHandle<()>>,
}

impl ChromiumPage {
    fn page(&self) -> BrowserResult<&Page> {
        self.page
            .as_ref()
            .ok_or_else(|| BrowserError::Unexpected("page already closed".into()))
    }
}

#[async_trait]
impl BrowserPage for ChromiumPage {
    async fn goto(&mut self, url: &str) -> BrowserResult<Option<u16>> {
        lock_log(&self.log).document_status = None;
        let params = NavigateParams::builder()
            .url(url)
            .build()
            .map_err(BrowserError::Configuration)?;
        let page = self.page()?;
        page.goto(params).await?;
        page.wait_for_navigation().await?;
        Ok(lock_log(&self.log).document_status)
    }

    async fn wait_for_selector(&mut self, selector: &str) -> BrowserResult<()> {
        let page = self.page()?;
        loop {
            if page.find_element(selector).await.is_ok() {
                return Ok(());
            }
            sleep(SELECTOR_POLL).await;
        }
    }

    async fn click_consent(&mut self, texts: &[String]) -> BrowserResult<Option<String>> {
        let page = self.page()?;
        let labels: Vec<String> = page
            .evaluate(consent::control_labels_script())
            .await
            .map_err(|err| BrowserError::Script(err.to_string()))?
            .into_value()
            .map_err(|err| BrowserError::Script(err.to_string()))?;
        let Some((index, text)) = consent::first_consent_control(&labels, texts) else {
            return Ok(None);
        };
        let clicked: bool = page
            .evaluate(consent::click_control_script(index))
            .await
            .map_err(|err| BrowserError::Script(err.to_string()))?
            .into_value()
            .map_err(|err| BrowserError::Script(err.to_string()))?;
        Ok(clicked.then_some(text))
    }

    async fn content(&mut self) -> BrowserResult<String> {
        Ok(self.page()?.content().await?)
    }

    async fn final_url(&mut self) -> BrowserResult<String> {
        self.page()?
            .url()
            .await?
            .ok_or_else(|| BrowserError::Unexpected("page has no url".into()))
    }

    fn take_traffic(&mut self) -> PageTraffic {
        let mut log = lock_log(&self.log);
        PageTraffic {
            responses: std::mem::take(&mut log.responses),
            blocked_requests: std::mem::take(&mut log.blocked),
        }
    }

    async fn close(mut self: Box<Self>) -> BrowserResult<()> {
        for listener in self.listeners.drain(..) {
            listener.abort();
        }
        if let Some(page) = self.page.take() {
            page.close().await?;
        }
        Ok(())
    }
}

impl Drop for ChromiumPage {
    fn drop(&mut self) {
        for listener in &self.listeners {
            listener.abort();
        }
    }
}
