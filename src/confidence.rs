//! Reasoning-service boundary.
//!
//! A confidence score is a secondary, best-effort annotation on a volume
//! reading. Requests ride a dedicated worker thread; a burst of triggers
//! collapses to the newest pending request, and a completion is applied only
//! while its sequence number is still the latest issued, so a stale response
//! can never overwrite newer state. Failures degrade to "no confidence"
//! without user-facing noise.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

/// Request payload for the reasoning service.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfidenceQuery {
    /// Fixed shape label; no shape classification is performed.
    pub glass_shape: String,
    /// Natural-language description of the water line, derived from the
    /// current level estimate.
    pub water_line_consistency: String,
    /// Volume estimate in milliliters.
    pub volume_estimate: f64,
}

/// Successful assessment from the reasoning service.
#[derive(Clone, Debug, PartialEq)]
pub struct ConfidenceResult {
    /// Reliability estimate in [0, 1].
    pub score: f64,
    pub reasoning: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfidenceResponse {
    confidence_score: f64,
    reasoning: String,
}

/// External reasoning service.
pub trait ConfidenceService: Send {
    fn assess(&self, query: &ConfidenceQuery) -> Result<ConfidenceResult>;
}

/// JSON-over-HTTP reasoning service client.
pub struct HttpConfidenceService {
    endpoint: String,
    agent: ureq::Agent,
}

impl HttpConfidenceService {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
        let parsed = url::Url::parse(endpoint).context("invalid confidence endpoint")?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(anyhow!(
                "confidence endpoint must be http(s), got '{}'",
                parsed.scheme()
            ));
        }
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Ok(Self {
            endpoint: endpoint.to_string(),
            agent,
        })
    }
}

impl ConfidenceService for HttpConfidenceService {
    fn assess(&self, query: &ConfidenceQuery) -> Result<ConfidenceResult> {
        let body = serde_json::to_string(query)?;
        let response = self
            .agent
            .post(&self.endpoint)
            .set("Content-Type", "application/json")
            .send_string(&body)
            .context("confidence service call failed")?;
        let text = response
            .into_string()
            .context("read confidence service response")?;
        parse_confidence_response(&text)
    }
}

/// Service used when no endpoint is configured. Every call fails, which the
/// worker degrades to a `None` score.
pub struct UnconfiguredService;

impl ConfidenceService for UnconfiguredService {
    fn assess(&self, _query: &ConfidenceQuery) -> Result<ConfidenceResult> {
        Err(anyhow!("confidence endpoint not configured"))
    }
}

/// Parse a reasoning-service response body.
///
/// Returns an error if the JSON is malformed or the score falls outside
/// [0, 1]; out-of-bounds scores are treated as a failed call, never clamped.
pub fn parse_confidence_response(body: &str) -> Result<ConfidenceResult> {
    let parsed: ConfidenceResponse =
        serde_json::from_str(body).map_err(|e| anyhow!("parse error: {}", e))?;
    if !parsed.confidence_score.is_finite() || !(0.0..=1.0).contains(&parsed.confidence_score) {
        return Err(anyhow!(
            "confidence score out of bounds: {}",
            parsed.confidence_score
        ));
    }
    Ok(ConfidenceResult {
        score: parsed.confidence_score,
        reasoning: parsed.reasoning,
    })
}

/// Describe the water line for the reasoning service.
pub fn describe_water_line(level_percent: f64) -> String {
    let band = match level_percent {
        l if l <= 5.0 => "no visible water line",
        l if l < 30.0 => "water line steady, low in the glass",
        l if l < 60.0 => "water line steady near the middle of the glass",
        l if l < 90.0 => "water line steady, high in the glass",
        _ => "water line at the rim",
    };
    format!("{} (about {:.0}% of glass height)", band, level_percent)
}

enum Job {
    Assess { seq: u64, query: ConfidenceQuery },
    Shutdown,
}

/// Worker thread owning the reasoning-service calls.
///
/// Lifecycle mirrors the session: spawned once, stopped (joined) on session
/// teardown.
pub struct ConfidenceWorker {
    tx: Sender<Job>,
    latest_seq: Arc<AtomicU64>,
    join: Option<JoinHandle<()>>,
}

impl ConfidenceWorker {
    /// Spawn the worker. `publish` receives each applied outcome: `Some` on
    /// success, `None` on failure. It is never called for superseded
    /// requests.
    pub fn spawn(
        service: Box<dyn ConfidenceService>,
        publish: Box<dyn Fn(Option<ConfidenceResult>) + Send>,
    ) -> Self {
        let (tx, rx) = mpsc::channel();
        let latest_seq = Arc::new(AtomicU64::new(0));
        let seq_thread = latest_seq.clone();
        let join = std::thread::spawn(move || run_worker(rx, service, publish, seq_thread));
        Self {
            tx,
            latest_seq,
            join: Some(join),
        }
    }

    /// Queue an assessment, superseding any request not yet applied.
    pub fn request(&self, query: ConfidenceQuery) {
        let seq = self.latest_seq.fetch_add(1, Ordering::SeqCst) + 1;
        if self.tx.send(Job::Assess { seq, query }).is_err() {
            log::debug!("confidence worker gone; dropping request");
        }
    }

    /// Invalidate all outstanding requests without issuing a new one. The
    /// caller publishes its own `None`; in-flight completions become stale.
    pub fn invalidate(&self) {
        self.latest_seq.fetch_add(1, Ordering::SeqCst);
    }

    /// Stop the worker and wait for it to finish.
    pub fn stop(mut self) -> Result<()> {
        let _ = self.tx.send(Job::Shutdown);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("confidence worker thread panicked"))?;
        }
        Ok(())
    }
}

fn run_worker(
    rx: Receiver<Job>,
    service: Box<dyn ConfidenceService>,
    publish: Box<dyn Fn(Option<ConfidenceResult>) + Send>,
    latest_seq: Arc<AtomicU64>,
) {
    loop {
        let mut job = match rx.recv() {
            Ok(job) => job,
            Err(_) => break,
        };
        // Collapse a burst of triggers to the newest pending job.
        while let Ok(next) = rx.try_recv() {
            job = next;
        }
        let (seq, query) = match job {
            Job::Shutdown => break,
            Job::Assess { seq, query } => (seq, query),
        };
        if seq != latest_seq.load(Ordering::SeqCst) {
            continue;
        }
        let outcome = match service.assess(&query) {
            Ok(result) => Some(result),
            Err(err) => {
                // best-effort feature: degrade silently
                log::debug!("confidence request failed: {}", err);
                None
            }
        };
        if seq == latest_seq.load(Ordering::SeqCst) {
            publish(outcome);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn parses_service_response() {
        let result = parse_confidence_response(
            r#"{"confidenceScore": 0.82, "reasoning": "water line is plausible"}"#,
        )
        .unwrap();
        assert!((result.score - 0.82).abs() < 1e-9);
        assert_eq!(result.reasoning, "water line is plausible");
    }

    #[test]
    fn rejects_malformed_and_out_of_bounds_responses() {
        assert!(parse_confidence_response("not json").is_err());
        assert!(parse_confidence_response(r#"{"confidenceScore": 1.5, "reasoning": "x"}"#).is_err());
        assert!(
            parse_confidence_response(r#"{"confidenceScore": -0.1, "reasoning": "x"}"#).is_err()
        );
    }

    #[test]
    fn query_serializes_with_camel_case_keys() {
        let query = ConfidenceQuery {
            glass_shape: "Cylinder".to_string(),
            water_line_consistency: "steady".to_string(),
            volume_estimate: 175.0,
        };
        let json = serde_json::to_string(&query).unwrap();
        assert!(json.contains("\"glassShape\""));
        assert!(json.contains("\"waterLineConsistency\""));
        assert!(json.contains("\"volumeEstimate\""));
    }

    #[test]
    fn water_line_description_tracks_level() {
        assert!(describe_water_line(0.0).contains("no visible water line"));
        assert!(describe_water_line(50.0).contains("middle"));
        assert!(describe_water_line(99.0).contains("rim"));
    }

    struct ScriptedService {
        calls: Mutex<Vec<(Duration, Result<ConfidenceResult>)>>,
        started: Arc<std::sync::atomic::AtomicUsize>,
    }

    impl ScriptedService {
        fn new(mut script: Vec<(Duration, Result<ConfidenceResult>)>) -> Self {
            // popped back-to-front
            script.reverse();
            Self {
                calls: Mutex::new(script),
                started: Arc::new(std::sync::atomic::AtomicUsize::new(0)),
            }
        }
    }

    impl ConfidenceService for ScriptedService {
        fn assess(&self, _query: &ConfidenceQuery) -> Result<ConfidenceResult> {
            self.started.fetch_add(1, Ordering::SeqCst);
            let (delay, outcome) = self
                .calls
                .lock()
                .unwrap()
                .pop()
                .unwrap_or((Duration::ZERO, Err(anyhow!("script exhausted"))));
            std::thread::sleep(delay);
            outcome
        }
    }

    fn scored(score: f64) -> Result<ConfidenceResult> {
        Ok(ConfidenceResult {
            score,
            reasoning: format!("scripted {}", score),
        })
    }

    fn wait_for<F: Fn() -> bool>(cond: F) {
        for _ in 0..200 {
            if cond() {
                return;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        panic!("condition not reached within 2s");
    }

    #[test]
    fn stale_completion_never_overwrites_newer_request() {
        // First call is slow and scores 0.2; the second is fast and scores
        // 0.9. By the time the slow call would land, its sequence is stale.
        let service = ScriptedService::new(vec![
            (Duration::from_millis(150), scored(0.2)),
            (Duration::ZERO, scored(0.9)),
        ]);
        let started = service.started.clone();
        let published: Arc<Mutex<Vec<Option<ConfidenceResult>>>> =
            Arc::new(Mutex::new(Vec::new()));
        let sink = published.clone();
        let worker = ConfidenceWorker::spawn(
            Box::new(service),
            Box::new(move |outcome| sink.lock().unwrap().push(outcome)),
        );

        let query = ConfidenceQuery {
            glass_shape: "Cylinder".to_string(),
            water_line_consistency: "steady".to_string(),
            volume_estimate: 175.0,
        };
        worker.request(query.clone());
        wait_for(|| started.load(Ordering::SeqCst) == 1);
        worker.request(query);

        wait_for(|| !published.lock().unwrap().is_empty());
        worker.stop().unwrap();

        let published = published.lock().unwrap();
        assert_eq!(published.len(), 1, "stale completion must be discarded");
        assert!((published[0].as_ref().unwrap().score - 0.9).abs() < 1e-9);
    }

    #[test]
    fn failed_call_publishes_none() {
        let service = ScriptedService::new(vec![(Duration::ZERO, Err(anyhow!("service down")))]);
        let published: Arc<Mutex<Vec<Option<ConfidenceResult>>>> =
            Arc::new(Mutex::new(Vec::new()));
        let sink = published.clone();
        let worker = ConfidenceWorker::spawn(
            Box::new(service),
            Box::new(move |outcome| sink.lock().unwrap().push(outcome)),
        );
        worker.request(ConfidenceQuery {
            glass_shape: "Cylinder".to_string(),
            water_line_consistency: "steady".to_string(),
            volume_estimate: 10.0,
        });
        wait_for(|| !published.lock().unwrap().is_empty());
        worker.stop().unwrap();
        assert_eq!(published.lock().unwrap()[0], None);
    }

    #[test]
    fn invalidate_makes_in_flight_completion_stale() {
        let service = ScriptedService::new(vec![(Duration::from_millis(100), scored(0.7))]);
        let started = service.started.clone();
        let published: Arc<Mutex<Vec<Option<ConfidenceResult>>>> =
            Arc::new(Mutex::new(Vec::new()));
        let sink = published.clone();
        let worker = ConfidenceWorker::spawn(
            Box::new(service),
            Box::new(move |outcome| sink.lock().unwrap().push(outcome)),
        );
        worker.request(ConfidenceQuery {
            glass_shape: "Cylinder".to_string(),
            water_line_consistency: "steady".to_string(),
            volume_estimate: 10.0,
        });
        wait_for(|| started.load(Ordering::SeqCst) == 1);
        worker.invalidate();
        std::thread::sleep(Duration::from_millis(200));
        worker.stop().unwrap();
        assert!(
            published.lock().unwrap().is_empty(),
            "invalidated completion must not publish"
        );
    }
}
