//! Fan a single request out to several providers concurrently and select
//! the best response.
//!
//! Absent from the teacher's SDK crate (which routes to exactly one
//! provider per request via `RoutingStrategy`); built fresh, grounded on
//! the `futures::future::join_all` fan-out idiom used by the health
//! monitor's `check_all` in this crate.

use crate::error::{OrchestratorError, Result};
use crate::models::{Request, Response};
use crate::providers::Provider;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct EnsembleResult {
    pub responses: Vec<Response>,
    /// Index into `responses` of the selected reply, `None` if every
    /// provider failed.
    pub selected_index: Option<usize>,
}

impl EnsembleResult {
    pub fn selected(&self) -> Option<&Response> {
        self.selected_index.map(|i| &self.responses[i])
    }
}

/// Run `request` against every provider in `providers` concurrently,
/// keep the ones that succeed, and mark the highest-confidence response
/// `selected`. Ties are broken by arrival order (the first provider to
/// complete among equal-confidence responses wins, matching the order
/// `providers` was given when providers respond at identical speed).
///
/// `providers` must be non-empty: the empty case is a configuration
/// error (`OrchestratorError::EnsembleEmpty`), not a response with no
/// selection. A non-empty ensemble where every member fails is not an
/// error: it returns an empty `responses` vec and `selected_index: None`.
pub async fn run_ensemble(
    providers: &[Arc<dyn Provider>],
    request: &Request,
    cancel: &CancellationToken,
) -> Result<EnsembleResult> {
    if providers.is_empty() {
        return Err(OrchestratorError::EnsembleEmpty);
    }

    let calls = providers.iter().map(|p| p.complete(request, cancel));
    let outcomes = futures::future::join_all(calls).await;

    let mut responses: Vec<Response> = outcomes.into_iter().filter_map(|r| r.ok()).collect();

    let selected_index = responses
        .iter()
        .enumerate()
        .max_by(|(ai, a), (bi, b)| {
            a.confidence
                .partial_cmp(&b.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(bi.cmp(ai))
        })
        .map(|(i, _)| i);

    if let Some(i) = selected_index {
        for (idx, resp) in responses.iter_mut().enumerate() {
            resp.selected = idx == i;
            resp.selection_score = resp.confidence;
        }
    }

    Ok(EnsembleResult {
        responses,
        selected_index,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::models::FinishReason;
    use crate::providers::Capabilities;
    use futures::stream::BoxStream;
    use std::collections::HashMap;

    struct FixedProvider {
        id: &'static str,
        confidence: f64,
        fail: bool,
    }

    #[async_trait::async_trait]
    impl Provider for FixedProvider {
        fn id(&self) -> &str {
            self.id
        }

        async fn complete(&self, request: &Request, _cancel: &CancellationToken) -> std::result::Result<Response, ProviderError> {
            if self.fail {
                return Err(ProviderError::ServiceUnavailable);
            }
            Ok(Response {
                id: format!("{}-resp", self.id),
                request_id: request.id.clone(),
                provider_id: self.id.into(),
                provider_name: self.id.into(),
                content: "hi".into(),
                confidence: self.confidence,
                tokens_used: 3,
                response_time_ms: 1,
                finish_reason: FinishReason::Stop,
                tool_calls: Vec::new(),
                metadata: HashMap::new(),
                created_at: chrono::Utc::now(),
                selected: false,
                selection_score: 0.0,
            })
        }

        async fn complete_stream(
            &self,
            _request: &Request,
            _cancel: &CancellationToken,
        ) -> std::result::Result<BoxStream<'static, std::result::Result<Response, ProviderError>>, ProviderError> {
            Ok(Box::pin(futures::stream::empty()))
        }

        async fn health_check(&self) -> std::result::Result<(), ProviderError> {
            Ok(())
        }

        fn capabilities(&self) -> Capabilities {
            Capabilities::default()
        }

        fn validate_config(&self) -> crate::providers::ValidationResult {
            crate::providers::ValidationResult::ok()
        }
    }

    fn req() -> Request {
        Request::new("r1", "m")
    }

    #[tokio::test]
    async fn empty_provider_list_is_an_error() {
        let err = run_ensemble(&[], &req(), &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::EnsembleEmpty));
    }

    #[tokio::test]
    async fn highest_confidence_response_wins() {
        let providers: Vec<Arc<dyn Provider>> = vec![
            Arc::new(FixedProvider { id: "a", confidence: 0.6, fail: false }),
            Arc::new(FixedProvider { id: "b", confidence: 0.9, fail: false }),
            Arc::new(FixedProvider { id: "c", confidence: 0.7, fail: false }),
        ];
        let result = run_ensemble(&providers, &req(), &CancellationToken::new()).await.unwrap();
        assert_eq!(result.responses.len(), 3);
        assert_eq!(result.selected().unwrap().provider_id, "b");
        assert!(result.selected().unwrap().selected);
    }

    #[tokio::test]
    async fn ties_break_by_earliest_arrival_order() {
        let providers: Vec<Arc<dyn Provider>> = vec![
            Arc::new(FixedProvider { id: "a", confidence: 0.8, fail: false }),
            Arc::new(FixedProvider { id: "b", confidence: 0.8, fail: false }),
        ];
        let result = run_ensemble(&providers, &req(), &CancellationToken::new()).await.unwrap();
        assert_eq!(result.selected().unwrap().provider_id, "a");
    }

    #[tokio::test]
    async fn all_failures_yield_no_selection_and_no_error() {
        let providers: Vec<Arc<dyn Provider>> = vec![
            Arc::new(FixedProvider { id: "a", confidence: 0.8, fail: true }),
            Arc::new(FixedProvider { id: "b", confidence: 0.8, fail: true }),
        ];
        let result = run_ensemble(&providers, &req(), &CancellationToken::new()).await.unwrap();
        assert!(result.responses.is_empty());
        assert!(result.selected().is_none());
    }

    #[tokio::test]
    async fn partial_failure_still_selects_among_survivors() {
        let providers: Vec<Arc<dyn Provider>> = vec![
            Arc::new(FixedProvider { id: "a", confidence: 0.5, fail: true }),
            Arc::new(FixedProvider { id: "b", confidence: 0.4, fail: false }),
        ];
        let result = run_ensemble(&providers, &req(), &CancellationToken::new()).await.unwrap();
        assert_eq!(result.responses.len(), 1);
        assert_eq!(result.selected().unwrap().provider_id, "b");
    }
}
