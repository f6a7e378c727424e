//! Cookie-consent automation via a headless browser.
//!
//! Navigates to a page, walks a selector cascade to find and click the
//! consent control, then harvests the cookie jar so the fetcher can replay it
//! against the scraping service. The browser process is launched lazily and
//! kept alive across invocations; a mutex serialises page creation and
//! teardown so concurrent requests cannot race the shared instance.

use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::error::CdpError;
use chromiumoxide::{Element, Page};
use futures::StreamExt;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};

/// Hard ceiling on initial navigation.
const NAVIGATION_TIMEOUT: Duration = Duration::from_secs(30);
/// Post-navigation wait for the page to settle.
const NETWORK_IDLE_TIMEOUT: Duration = Duration::from_secs(10);
/// Visibility wait per selector in the cascade.
const SELECTOR_WAIT: Duration = Duration::from_secs(1);
/// Delay after a click so the banner can disappear and cookies land.
const SETTLE_DELAY: Duration = Duration::from_secs(2);
/// Poll interval while waiting on a selector.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Error, Debug)]
pub enum ConsentError {
    #[error("failed to launch browser: {0}")]
    Launch(String),
    #[error("browser automation error: {0}")]
    Cdp(#[from] CdpError),
}

/// One matcher in the consent cascade, tried in order.
enum ConsentSelector {
    /// CSS selector, matched directly.
    Css(&'static str),
    /// Case-insensitive substring match on button text.
    ButtonText(&'static str),
}

/// Site-specific selectors first, then generic attribute patterns, then
/// text matching. First visible hit wins.
const CONSENT_SELECTORS: &[ConsentSelector] = &[
    ConsentSelector::Css("button[data-ph-at-id='cookie-close-link']"),
    ConsentSelector::Css("button[id*='accept'], button[id*='agree'], button[id*='allow']"),
    ConsentSelector::Css("button[class*='accept'], button[class*='agree'], button[class*='allow']"),
    ConsentSelector::ButtonText("accept all"),
    ConsentSelector::ButtonText("accept cookies"),
    ConsentSelector::ButtonText("i agree"),
    ConsentSelector::ButtonText("accept"),
    ConsentSelector::ButtonText("allow"),
    ConsentSelector::ButtonText("agree"),
];

/// One cookie captured from the browser context.
#[derive(Debug, Clone, Serialize)]
pub struct CapturedCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    /// Seconds since the UNIX epoch; -1 for session cookies.
    pub expires: f64,
}

/// Cookie jar from one consent invocation. Never persisted across requests
/// unless explicitly passed forward.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CookieSession {
    pub cookies: Vec<CapturedCookie>,
}

impl CookieSession {
    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    /// Render the jar as a single `Cookie:` header value.
    pub fn header_value(&self) -> String {
        self.cookies
            .iter()
            .map(|c| format!("{}={}", c.name, c.value))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

struct BrowserSession {
    browser: Browser,
    handler_task: JoinHandle<()>,
}

/// Drives the headless browser through the consent flow.
///
/// Owned by the pipeline rather than held as global state; launch failure
/// leaves the automator reusable and the next call re-initialises.
pub struct ConsentAutomator {
    session: Mutex<Option<BrowserSession>>,
}

impl Default for ConsentAutomator {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsentAutomator {
    pub fn new() -> Self {
        Self {
            session: Mutex::new(None),
        }
    }

    /// Visit `url`, click the consent control if one is found (not finding
    /// one is non-fatal), and return the captured cookie jar.
    pub async fn accept_cookies(&self, url: &str) -> Result<CookieSession, ConsentError> {
        let mut guard = self.session.lock().await;

        if guard.is_none() {
            *guard = Some(Self::launch().await?);
        }
        let session = guard.as_ref().expect("session initialised above");

        let page = match session.browser.new_page("about:blank").await {
            Ok(page) => page,
            Err(err) => {
                // The browser process may have died; drop the session so the
                // next call relaunches.
                *guard = None;
                return Err(err.into());
            }
        };

        let outcome = self.drive_page(&page, url).await;
        // The page (browsing context) is closed on every exit path; the
        // browser process stays alive for reuse.
        if let Err(err) = page.close().await {
            tracing::warn!(error = %err, "failed to close consent page");
        }
        outcome
    }

    async fn drive_page(&self, page: &Page, url: &str) -> Result<CookieSession, ConsentError> {
        tracing::info!(url, "navigating for cookie consent");
        match timeout(NAVIGATION_TIMEOUT, page.goto(url)).await {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => return Err(err.into()),
            // Navigation timeout is non-fatal; search whatever state the
            // page reached.
            Err(_) => tracing::warn!(url, "navigation timed out, proceeding"),
        }

        if timeout(NETWORK_IDLE_TIMEOUT, page.wait_for_navigation())
            .await
            .is_err()
        {
            tracing::debug!(url, "network-idle wait timed out, proceeding");
        }

        if let Some(element) = self.find_consent_control(page).await {
            match element.click().await {
                Ok(_) => {
                    tracing::info!(url, "clicked consent control");
                    sleep(SETTLE_DELAY).await;
                }
                Err(err) => tracing::warn!(url, error = %err, "consent click failed"),
            }
        } else {
            tracing::info!(url, "no consent control found");
        }

        let cookies = page.get_cookies().await?;
        tracing::info!(url, count = cookies.len(), "captured cookies");

        Ok(CookieSession {
            cookies: cookies
                .into_iter()
                .map(|c| CapturedCookie {
                    name: c.name,
                    value: c.value,
                    domain: c.domain,
                    path: c.path,
                    expires: c.expires,
                })
                .collect(),
        })
    }

    /// Walk the cascade; each selector gets a short visibility wait. Only a
    /// visible match wins; hidden template markup matching an earlier
    /// selector must not mask a visible control further down the cascade.
    async fn find_consent_control(&self, page: &Page) -> Option<Element> {
        for selector in CONSENT_SELECTORS {
            let deadline = Instant::now() + SELECTOR_WAIT;
            loop {
                let found = match selector {
                    ConsentSelector::Css(css) => page.find_element(*css).await.ok(),
                    ConsentSelector::ButtonText(text) => {
                        find_button_with_text(page, text).await
                    }
                };
                if let Some(element) = found {
                    if is_visible(&element).await {
                        return Some(element);
                    }
                }
                if Instant::now() >= deadline {
                    break;
                }
                sleep(POLL_INTERVAL).await;
            }
        }
        None
    }

    async fn launch() -> Result<BrowserSession, ConsentError> {
        let config = BrowserConfig::builder()
            .args(vec![
                "--no-sandbox",
                "--disable-gpu",
                "--disable-dev-shm-usage",
            ])
            .build()
            .map_err(ConsentError::Launch)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|err| ConsentError::Launch(err.to_string()))?;

        let handler_task = tokio::spawn(async move {
            while handler.next().await.is_some() {}
        });

        tracing::info!("headless browser launched for consent handling");
        Ok(BrowserSession {
            browser,
            handler_task,
        })
    }

    /// Tear down the shared browser process, if one was ever launched.
    pub async fn shutdown(&self) {
        let mut guard = self.session.lock().await;
        if let Some(mut session) = guard.take() {
            if let Err(err) = session.browser.close().await {
                tracing::warn!(error = %err, "browser close failed");
            }
            let _ = session.browser.wait().await;
            session.handler_task.abort();
            tracing::info!("headless browser closed");
        }
    }
}

async fn find_button_with_text(page: &Page, needle: &str) -> Option<Element> {
    let buttons = page.find_elements("button").await.ok()?;
    for button in buttons {
        if let Ok(Some(text)) = button.inner_text().await {
            if text.to_lowercase().contains(needle) && is_visible(&button).await {
                return Some(button);
            }
        }
    }
    None
}

/// An element without layout (display:none, detached templates) yields no
/// clickable point; treat it as invisible and keep searching.
async fn is_visible(element: &Element) -> bool {
    element.clickable_point().await.is_ok()
}
