//! Batch conversion driver and the cross-thread confirmation bridge.
//!
//! The pipeline worker and any interactive frontend live on different
//! threads. Disambiguation crosses that boundary as an explicit
//! request/response pair: the worker posts a request and blocks on a
//! one-shot reply; the frontend consumes one request at a time and answers
//! exactly once. The channel capacity of one enforces a single outstanding
//! request.

use crate::models::{BatchOutcome, LegacyBundle, OperatorRecord};
use crate::services::convert::{ConversionOrchestrator, OverlayMode};
use crate::services::resolver::Disambiguator;
use crate::services::scanner::BundleScanner;
use camino::Utf8Path;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};

/// Batch progress: `(current, total, bundle_name)`, 1-based.
pub type ProgressCallback = dyn Fn(usize, usize, &str) + Send + Sync;

/// Per-bundle step narration.
pub type DetailCallback = dyn Fn(&str) + Send + Sync;

/// A pending disambiguation decision, delivered to the interactive side.
pub struct ConfirmationRequest {
    pub text: String,
    pub candidates: Vec<(OperatorRecord, u32)>,
    reply: oneshot::Sender<Option<OperatorRecord>>,
}

impl ConfirmationRequest {
    /// Answer the waiting worker. A decision of `None` means "skip".
    /// Replying after the worker timed out is harmless.
    pub fn respond(self, decision: Option<OperatorRecord>) {
        let _ = self.reply.send(decision);
    }
}

/// Worker-side handle of the confirmation channel.
pub struct ConfirmationBridge {
    requests: mpsc::Sender<ConfirmationRequest>,
    timeout: Option<Duration>,
}

impl ConfirmationBridge {
    /// Create the bridge and the receiver the interactive side drains.
    /// `timeout` bounds the wait for an answer; expiry counts as "skip".
    pub fn new(
        timeout: Option<Duration>,
    ) -> (std::sync::Arc<Self>, mpsc::Receiver<ConfirmationRequest>) {
        // Capacity 1: at most one outstanding confirmation at a time.
        let (requests, receiver) = mpsc::channel(1);
        (std::sync::Arc::new(Self { requests, timeout }), receiver)
    }

    /// Post a request and wait for the decision. A closed frontend and an
    /// expired timeout both resolve to "skip".
    pub async fn confirm(
        &self,
        text: &str,
        candidates: &[(OperatorRecord, u32)],
    ) -> Option<OperatorRecord> {
        let (reply, response) = oneshot::channel();
        let request = ConfirmationRequest {
            text: text.to_string(),
            candidates: candidates.to_vec(),
            reply,
        };
        if self.requests.send(request).await.is_err() {
            tracing::warn!("Confirmation frontend is gone, skipping fuzzy match");
            return None;
        }

        match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, response).await {
                Ok(Ok(decision)) => decision,
                Ok(Err(_)) => None,
                Err(_) => {
                    tracing::warn!("Confirmation timed out after {:?}, skipping", limit);
                    None
                }
            },
            None => response.await.unwrap_or(None),
        }
    }
}

/// Drives a whole batch of bundle conversions, in discovery order.
pub struct BatchCoordinator {
    scanner: BundleScanner,
    cancel: Option<watch::Receiver<bool>>,
}

impl BatchCoordinator {
    pub fn new() -> Self {
        Self {
            scanner: BundleScanner::new(),
            cancel: None,
        }
    }

    /// Install a cancellation flag. Cancellation only stops scheduling
    /// further bundles; the bundle in flight always completes.
    pub fn with_cancellation(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn discover(&self, root: &Utf8Path) -> Vec<LegacyBundle> {
        self.scanner.discover(root)
    }

    /// Convert every legacy bundle under `src_root` into a same-named
    /// folder under `dst_root`. One bundle's failure is recorded and the
    /// batch continues; the returned outcome covers every attempt.
    #[allow(clippy::too_many_arguments)]
    pub async fn run_batch(
        &self,
        orchestrator: &ConversionOrchestrator,
        src_root: &Utf8Path,
        dst_root: &Utf8Path,
        overlay_mode: OverlayMode,
        auto_ocr: bool,
        disambiguator: &Disambiguator,
        progress: Option<&ProgressCallback>,
        detail: Option<&DetailCallback>,
    ) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();

        if !src_root.is_dir() {
            tracing::error!("Source root does not exist: {}", src_root);
            return outcome;
        }

        let bundles = self.scanner.discover(src_root);
        if bundles.is_empty() {
            tracing::warn!("No legacy bundles under {}", src_root);
            return outcome;
        }
        tracing::info!("Found {} legacy bundles under {}", bundles.len(), src_root);

        if let Err(e) = std::fs::create_dir_all(dst_root) {
            tracing::error!("Cannot create destination root {}: {}", dst_root, e);
            return outcome;
        }

        let total = bundles.len();
        for (i, bundle) in bundles.iter().enumerate() {
            if let Some(cancel) = &self.cancel {
                if *cancel.borrow() {
                    tracing::warn!("Batch cancelled after {} of {} bundles", i, total);
                    break;
                }
            }

            if let Some(callback) = progress {
                callback(i + 1, total, &bundle.name);
            }

            let dst_dir = dst_root.join(&bundle.name);
            let result = orchestrator
                .convert_bundle(bundle, &dst_dir, overlay_mode, auto_ocr, disambiguator, detail)
                .await;
            outcome.results.push(result);
        }

        tracing::info!("{}", outcome.summary());
        outcome
    }
}

impl Default for BatchCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn record(name: &str) -> OperatorRecord {
        OperatorRecord {
            id: format!("char_{}", name.to_lowercase()),
            name: name.to_string(),
            name_local: String::new(),
            code: "R001".to_string(),
            nation: None,
            class_tag: "CASTER".to_string(),
            accent_color: "#0098dc".to_string(),
        }
    }

    #[tokio::test]
    async fn test_bridge_round_trip_picks_second_candidate() {
        let (bridge, mut requests) = ConfirmationBridge::new(None);
        let served = Arc::new(AtomicUsize::new(0));

        let served_in_task = served.clone();
        let responder = tokio::spawn(async move {
            while let Some(request) = requests.recv().await {
                served_in_task.fetch_add(1, Ordering::SeqCst);
                assert_eq!(request.text, "Amiyaa");
                assert_eq!(request.candidates.len(), 2);
                let second = request.candidates[1].0.clone();
                request.respond(Some(second));
            }
        });

        let candidates = vec![(record("Amiya"), 83), (record("Amiya2"), 83)];
        let decision = bridge.confirm("Amiyaa", &candidates).await;
        assert_eq!(decision.unwrap().name, "Amiya2");
        assert_eq!(served.load(Ordering::SeqCst), 1);

        drop(bridge);
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn test_bridge_skip_decision() {
        let (bridge, mut requests) = ConfirmationBridge::new(None);

        tokio::spawn(async move {
            if let Some(request) = requests.recv().await {
                request.respond(None);
            }
        });

        let decision = bridge.confirm("Amiyaa", &[(record("Amiya"), 83)]).await;
        assert!(decision.is_none());
    }

    #[tokio::test]
    async fn test_bridge_timeout_is_skip() {
        let (bridge, requests) = ConfirmationBridge::new(Some(Duration::from_millis(20)));
        // Keep the receiver alive but never answer.
        let decision = bridge.confirm("Amiyaa", &[(record("Amiya"), 83)]).await;
        assert!(decision.is_none());
        drop(requests);
    }

    #[tokio::test]
    async fn test_bridge_closed_frontend_is_skip() {
        let (bridge, requests) = ConfirmationBridge::new(None);
        drop(requests);
        let decision = bridge.confirm("Amiyaa", &[(record("Amiya"), 83)]).await;
        assert!(decision.is_none());
    }
}
