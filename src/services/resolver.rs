//! Overlay subject identification.
//!
//! Composes template classification, text extraction and the identity index
//! into one decision procedure. Fuzzy matches can be confirmed through a
//! synchronous callback or relayed across a thread boundary to an
//! interactive frontend; with no hook registered the best candidate wins.

use crate::models::OperatorRecord;
use crate::services::batch::ConfirmationBridge;
use crate::services::classifier::TemplateClassifier;
use crate::services::identity::{DEFAULT_FUZZY_THRESHOLD, IdentityIndex};
use crate::services::textextract::TextExtractor;
use camino::Utf8PathBuf;
use image::RgbaImage;
use std::sync::{Arc, OnceLock};

/// Synchronous confirmation hook: receives the raw recognized text and the
/// scored candidates, returns the chosen record or `None` to skip.
pub type ConfirmCallback =
    dyn Fn(&str, &[(OperatorRecord, u32)]) -> Option<OperatorRecord> + Send + Sync;

/// How ambiguous fuzzy matches are settled.
pub enum Disambiguator {
    /// No hook registered: the top candidate is accepted, best-effort.
    AcceptBest,
    /// In-process hook, called synchronously.
    Callback(Box<ConfirmCallback>),
    /// Request/response hand-off to another thread (interactive frontend).
    Bridge(Arc<ConfirmationBridge>),
}

/// Outcome of one identification attempt.
///
/// A resolved identity implies the standard template; otherwise the
/// classifier's verdict is preserved so callers pick the right fallback.
#[derive(Debug, Clone)]
pub struct Recognition {
    pub operator: Option<OperatorRecord>,
    pub is_standard_template: bool,
}

pub struct IdentityResolver {
    classifier: TemplateClassifier,
    extractor: TextExtractor,
    data_dir: Utf8PathBuf,
    /// Built lazily, once; stays empty when the dataset is missing.
    index: OnceLock<IdentityIndex>,
}

impl IdentityResolver {
    pub fn new(template_path: Utf8PathBuf, data_dir: Utf8PathBuf) -> Self {
        Self {
            classifier: TemplateClassifier::new(template_path),
            extractor: TextExtractor::new(),
            data_dir,
            index: OnceLock::new(),
        }
    }

    fn index(&self) -> &IdentityIndex {
        self.index
            .get_or_init(|| IdentityIndex::load_from(&self.data_dir))
    }

    /// Identify the subject on an overlay image that already carries the
    /// 180° correction.
    pub async fn recognize(
        &self,
        overlay: &RgbaImage,
        disambiguator: &Disambiguator,
    ) -> Recognition {
        let classification = self.classifier.classify(overlay);
        let is_template = classification.is_standard_template;
        if !is_template {
            tracing::info!(
                "Overlay is not the standard template (score {:.4}), trying text extraction anyway",
                classification.similarity_score
            );
        }

        // Extraction runs regardless of the verdict: non-template overlays
        // may still carry recoverable text.
        let Some(text) = self.extractor.extract_text(overlay).await else {
            if is_template {
                tracing::warn!("Standard template but no text recognized");
            }
            return Recognition {
                operator: None,
                is_standard_template: is_template,
            };
        };

        self.resolve_text(&text, is_template, disambiguator).await
    }

    /// Settle recognized text against the index, including the
    /// disambiguation step. Split out from [`Self::recognize`] so the
    /// decision procedure is testable without a recognition engine.
    pub async fn resolve_text(
        &self,
        text: &str,
        is_template: bool,
        disambiguator: &Disambiguator,
    ) -> Recognition {
        let index = self.index();
        if !index.is_loaded() {
            tracing::warn!("Identity dataset unavailable, cannot resolve {:?}", text);
            return Recognition {
                operator: None,
                is_standard_template: is_template,
            };
        }

        let matched = index.resolve(text, DEFAULT_FUZZY_THRESHOLD);

        if matched.is_exact {
            if let Some(record) = &matched.record {
                tracing::info!("Exact match: {}", record.name);
            }
            return Recognition {
                operator: matched.record,
                is_standard_template: true,
            };
        }

        if !matched.candidates.is_empty() {
            let chosen = match disambiguator {
                Disambiguator::AcceptBest => {
                    tracing::info!("No confirmation hook, accepting best fuzzy match");
                    matched.record
                }
                Disambiguator::Callback(callback) => callback(text, &matched.candidates),
                Disambiguator::Bridge(bridge) => bridge.confirm(text, &matched.candidates).await,
            };
            return match chosen {
                Some(record) => {
                    tracing::info!("Confirmed subject: {}", record.name);
                    Recognition {
                        operator: Some(record),
                        is_standard_template: true,
                    }
                }
                None => {
                    tracing::info!("Fuzzy match for {:?} skipped", text);
                    Recognition {
                        operator: None,
                        is_standard_template: is_template,
                    }
                }
            };
        }

        tracing::warn!("No subject matches {:?}", text);
        Recognition {
            operator: None,
            is_standard_template: is_template,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn write_dataset(dir: &Utf8PathBuf) {
        let characters = serde_json::json!({
            "Characters": {
                "char_002_amiya": {
                    "Appellation": "Amiya",
                    "Name": "阿米娅",
                    "DisplayNumber": "R001",
                    "NationId": "rhodes",
                    "Profession": 32
                },
                "char_123_fang": {
                    "Appellation": "Fang",
                    "Name": "芬",
                    "DisplayNumber": "PL03",
                    "NationId": "rhodes",
                    "Profession": 512
                },
                "char_777_amiya2": {
                    "Appellation": "Amiya2",
                    "Name": "阿米娅2",
                    "DisplayNumber": "R991",
                    "NationId": "rhodes",
                    "Profession": 1
                }
            }
        });
        fs::write(
            dir.join("character_table.json"),
            serde_json::to_string(&characters).unwrap(),
        )
        .unwrap();
    }

    fn resolver_with_dataset(temp: &TempDir) -> IdentityResolver {
        let dir = Utf8PathBuf::try_from(temp.path().to_path_buf()).unwrap();
        write_dataset(&dir);
        IdentityResolver::new(dir.join("overlay_template.png"), dir)
    }

    #[tokio::test]
    async fn test_exact_text_is_identified() {
        let temp = TempDir::new().unwrap();
        let resolver = resolver_with_dataset(&temp);

        let recognition = resolver
            .resolve_text("AMIYA", false, &Disambiguator::AcceptBest)
            .await;
        assert_eq!(recognition.operator.unwrap().id, "char_002_amiya");
        // Identification implies the standard template.
        assert!(recognition.is_standard_template);
    }

    #[tokio::test]
    async fn test_fuzzy_without_hook_accepts_best() {
        let temp = TempDir::new().unwrap();
        let resolver = resolver_with_dataset(&temp);

        let recognition = resolver
            .resolve_text("Amiyaa", true, &Disambiguator::AcceptBest)
            .await;
        assert_eq!(recognition.operator.unwrap().name, "Amiya");
    }

    #[tokio::test]
    async fn test_callback_invoked_exactly_once_and_choice_wins() {
        let temp = TempDir::new().unwrap();
        let resolver = resolver_with_dataset(&temp);

        let calls = Arc::new(AtomicUsize::new(0));
        let calls_in_hook = calls.clone();
        let hook = Disambiguator::Callback(Box::new(move |text, candidates| {
            calls_in_hook.fetch_add(1, Ordering::SeqCst);
            assert_eq!(text, "Amiyaa");
            assert_eq!(candidates.len(), 2);
            // Deliberately not the top candidate.
            candidates.last().map(|(record, _)| record.clone())
        }));

        let recognition = resolver.resolve_text("Amiyaa", true, &hook).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        // Candidate #2's record, not #1's, reaches the caller.
        assert_eq!(recognition.operator.unwrap().name, "Amiya2");
        assert!(recognition.is_standard_template);
    }

    #[tokio::test]
    async fn test_callback_skip_preserves_template_verdict() {
        let temp = TempDir::new().unwrap();
        let resolver = resolver_with_dataset(&temp);

        let hook = Disambiguator::Callback(Box::new(|_, _| None));

        let on_template = resolver.resolve_text("Amiyaa", true, &hook).await;
        assert!(on_template.operator.is_none());
        assert!(on_template.is_standard_template);

        let off_template = resolver.resolve_text("Amiyaa", false, &hook).await;
        assert!(off_template.operator.is_none());
        assert!(!off_template.is_standard_template);
    }

    #[tokio::test]
    async fn test_unknown_text_is_unidentified() {
        let temp = TempDir::new().unwrap();
        let resolver = resolver_with_dataset(&temp);

        let recognition = resolver
            .resolve_text("completely unknown", true, &Disambiguator::AcceptBest)
            .await;
        assert!(recognition.operator.is_none());
        assert!(recognition.is_standard_template);
    }

    #[tokio::test]
    async fn test_missing_dataset_degrades() {
        let temp = TempDir::new().unwrap();
        let dir = Utf8PathBuf::try_from(temp.path().to_path_buf()).unwrap();
        let resolver = IdentityResolver::new(dir.join("none.png"), dir.join("no-data"));

        let recognition = resolver
            .resolve_text("Amiya", true, &Disambiguator::AcceptBest)
            .await;
        assert!(recognition.operator.is_none());
        assert!(recognition.is_standard_template);
    }
}
