//! Test doubles shared across modules.

use crate::error::NetworkError;
use crate::notifications::{Notification, Notifier};
use crate::usage::api_client::{HttpRequest, HttpResponse, Method, Transport};
use crate::usage::types::UsageSource;
use crate::usage::window::WindowSpan;
use crate::usage::{UsageSnapshot, UsageWindow};
use chrono::Utc;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

struct Route {
    method: Method,
    fragment: String,
    responses: VecDeque<Result<HttpResponse, NetworkError>>,
}

/// Transport answering from scripted responses keyed by method and URL fragment.
///
/// The longest matching fragment wins.
/// Responses for a route are consumed in order; the last one repeats.
/// Unmatched requests get a 404.
#[derive(Default)]
pub struct ScriptedTransport {
    routes: Mutex<Vec<Route>>,
    requests: Mutex<Vec<HttpRequest>>,
    delay: Mutex<Duration>,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, method: Method, fragment: &str, response: Result<HttpResponse, NetworkError>) {
        let mut routes = self.routes.lock().unwrap();
        match routes
            .iter_mut()
            .find(|r| r.method == method && r.fragment == fragment)
        {
            Some(route) => route.responses.push_back(response),
            None => routes.push(Route {
                method,
                fragment: fragment.to_string(),
                responses: VecDeque::from([response]),
            }),
        }
    }

    pub fn respond(&self, method: Method, fragment: &str, status: u16, body: &str) {
        self.push(
            method,
            fragment,
            Ok(HttpResponse {
                status,
                retry_after_secs: None,
                body: body.to_string(),
            }),
        );
    }

    pub fn fail(&self, method: Method, fragment: &str, error: NetworkError) {
        self.push(method, fragment, Err(error));
    }

    /// Blocks every request for `delay` before answering.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    /// Most requests ever executing at the same time.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn count(&self, method: Method, fragment: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.method == method && r.url.contains(fragment))
            .count()
    }
}

impl Transport for ScriptedTransport {
    fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, NetworkError> {
        self.requests.lock().unwrap().push(request.clone());
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(active, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        self.active.fetch_sub(1, Ordering::SeqCst);
        let mut routes = self.routes.lock().unwrap();
        let Some(route) = routes
            .iter_mut()
            .filter(|r| r.method == request.method && request.url.contains(&r.fragment))
            .max_by_key(|r| r.fragment.len())
        else {
            return Ok(HttpResponse {
                status: 404,
                retry_after_secs: None,
                body: String::new(),
            });
        };
        if route.responses.len() > 1 {
            route.responses.pop_front().unwrap()
        } else {
            route.responses.front().cloned().unwrap()
        }
    }
}

/// Usage response body in the remote API's shape.
pub fn usage_body(session: f64, weekly: f64) -> String {
    serde_json::json!({
        "five_hour": {"utilization": session, "resets_at": null},
        "seven_day": {"utilization": weekly, "resets_at": null},
    })
    .to_string()
}

pub fn snapshot(session: f64, weekly: f64) -> UsageSnapshot {
    UsageSnapshot {
        session: UsageWindow::new(session, None, WindowSpan::SESSION),
        session_unreported: false,
        weekly: UsageWindow::new(weekly, None, WindowSpan::WEEKLY),
        sub_metrics: Vec::new(),
        cost: None,
        credits: None,
        fetched_at: Utc::now(),
        timezone: None,
        source: UsageSource::WebSession,
    }
}

/// Notifier that keeps everything it is asked to show.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: &Notification) -> anyhow::Result<()> {
        self.sent.lock().unwrap().push(notification.clone());
        Ok(())
    }
}
