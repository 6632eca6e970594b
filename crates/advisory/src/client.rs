use crate::error::{AdvisoryError, ProviderError, ProviderFailure};
use crate::openai::OpenAiCompatibleProvider;
use crate::provider::{AdvisoryProvider, AdvisoryReply, AdvisoryRequest};
use autotrader_core::AdvisoryConfig;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Ordered failover over capability-equivalent providers.
#[derive(Clone)]
pub struct AdvisoryClient {
    providers: Vec<Arc<dyn AdvisoryProvider>>,
    attempt_timeout: Duration,
}

impl AdvisoryClient {
    #[must_use]
    pub fn new(providers: Vec<Arc<dyn AdvisoryProvider>>, attempt_timeout: Duration) -> Self {
        Self {
            providers,
            attempt_timeout,
        }
    }

    /// Builds one OpenAI-compatible provider per configured entry, in order.
    ///
    /// # Errors
    ///
    /// Returns an error if an HTTP client cannot be constructed.
    pub fn from_config(config: &AdvisoryConfig) -> Result<Self, ProviderError> {
        let timeout = Duration::from_secs(config.attempt_timeout_secs.max(1));
        let providers = config
            .providers
            .iter()
            .cloned()
            .map(|p| {
                OpenAiCompatibleProvider::new(p, timeout)
                    .map(|provider| Arc::new(provider) as Arc<dyn AdvisoryProvider>)
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(providers, timeout))
    }

    #[must_use]
    pub fn provider_names(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.name().to_string()).collect()
    }

    /// Returns the first usable reply, trying providers in configured order.
    ///
    /// An attempt fails on transport errors, non-success statuses, blank
    /// replies, or when it outlives the per-attempt timeout.
    ///
    /// # Errors
    ///
    /// Returns [`AdvisoryError::AllProvidersFailed`] carrying every attempt's
    /// failure when no provider produced a reply.
    pub async fn advise(&self, request: &AdvisoryRequest) -> Result<AdvisoryReply, AdvisoryError> {
        if self.providers.is_empty() {
            return Err(AdvisoryError::NoProviders);
        }

        let mut failures = Vec::with_capacity(self.providers.len());
        for provider in &self.providers {
            let outcome = match tokio::time::timeout(self.attempt_timeout, provider.attempt(request)).await {
                Ok(Ok(reply)) if reply.content.trim().is_empty() => Err(ProviderError::EmptyReply),
                Ok(result) => result,
                Err(_) => Err(ProviderError::Timeout {
                    secs: self.attempt_timeout.as_secs(),
                }),
            };

            match outcome {
                Ok(reply) => {
                    info!(
                        provider = %reply.provider,
                        model = %reply.model,
                        failed_before = failures.len(),
                        "Advisory reply received"
                    );
                    return Ok(reply);
                }
                Err(error) => {
                    warn!(provider = %provider.name(), %error, "Advisory provider failed, trying next");
                    failures.push(ProviderFailure {
                        provider: provider.name().to_string(),
                        error,
                    });
                }
            }
        }

        Err(AdvisoryError::AllProvidersFailed { failures })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use autotrader_core::ProviderConfig;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    enum Script {
        Reply(&'static str),
        Fail,
        Hang,
    }

    struct ScriptedProvider {
        name: &'static str,
        script: Script,
        calls: AtomicUsize,
    }

    impl ScriptedProvider {
        fn new(name: &'static str, script: Script) -> Arc<Self> {
            Arc::new(Self {
                name,
                script,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl AdvisoryProvider for ScriptedProvider {
        fn name(&self) -> &str {
            self.name
        }

        async fn attempt(&self, _request: &AdvisoryRequest) -> Result<AdvisoryReply, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.script {
                Script::Reply(content) => Ok(AdvisoryReply {
                    provider: self.name.to_string(),
                    model: "scripted".to_string(),
                    content: content.to_string(),
                    usage: None,
                }),
                Script::Fail => Err(ProviderError::Transport("connection refused".to_string())),
                Script::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Err(ProviderError::Transport("unreachable".to_string()))
                }
            }
        }
    }

    fn request() -> AdvisoryRequest {
        AdvisoryRequest::new("system", "context")
    }

    #[tokio::test]
    async fn test_first_success_wins() {
        let first = ScriptedProvider::new("first", Script::Reply("from first"));
        let second = ScriptedProvider::new("second", Script::Reply("from second"));
        let providers: Vec<Arc<dyn AdvisoryProvider>> = vec![first, second.clone()];
        let client = AdvisoryClient::new(providers, Duration::from_secs(5));

        let reply = client.advise(&request()).await.unwrap();
        assert_eq!(reply.content, "from first");
        assert_eq!(second.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_falls_through() {
        let slow = ScriptedProvider::new("slow", Script::Hang);
        let backup = ScriptedProvider::new("backup", Script::Reply("late but here"));
        let providers: Vec<Arc<dyn AdvisoryProvider>> = vec![slow, backup];
        let client = AdvisoryClient::new(providers, Duration::from_secs(30));

        let reply = client.advise(&request()).await.unwrap();
        assert_eq!(reply.provider, "backup");
    }

    #[tokio::test]
    async fn test_blank_reply_falls_through() {
        let blank = ScriptedProvider::new("blank", Script::Reply("  \n "));
        let backup = ScriptedProvider::new("backup", Script::Reply("ok"));
        let providers: Vec<Arc<dyn AdvisoryProvider>> = vec![blank, backup];
        let client = AdvisoryClient::new(providers, Duration::from_secs(5));

        assert_eq!(client.advise(&request()).await.unwrap().provider, "backup");
    }

    #[tokio::test]
    async fn test_exhausted_providers_aggregate_failures() {
        let providers: Vec<Arc<dyn AdvisoryProvider>> = vec![
            ScriptedProvider::new("a", Script::Fail),
            ScriptedProvider::new("b", Script::Fail),
        ];
        let client = AdvisoryClient::new(providers, Duration::from_secs(5));

        match client.advise(&request()).await {
            Err(AdvisoryError::AllProvidersFailed { failures }) => {
                let names: Vec<_> = failures.iter().map(|f| f.provider.as_str()).collect();
                assert_eq!(names, vec!["a", "b"]);
            }
            other => panic!("expected aggregated failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_no_providers() {
        let client = AdvisoryClient::new(Vec::new(), Duration::from_secs(5));
        assert_eq!(client.advise(&request()).await, Err(AdvisoryError::NoProviders));
    }

    fn http_config(servers: &[&MockServer]) -> AdvisoryConfig {
        AdvisoryConfig {
            providers: servers
                .iter()
                .enumerate()
                .map(|(i, server)| ProviderConfig {
                    name: format!("p{}", i + 1),
                    base_url: server.uri(),
                    api_key: "sk-test".to_string(),
                    model: "chat-large".to_string(),
                })
                .collect(),
            attempt_timeout_secs: 5,
            ..AdvisoryConfig::default()
        }
    }

    #[tokio::test]
    async fn test_http_primary_down_backup_up() {
        let down = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(502))
            .expect(1)
            .mount(&down)
            .await;

        let up = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"role": "assistant", "content": "Reduce risk."}}]
            })))
            .expect(1)
            .mount(&up)
            .await;

        let client = AdvisoryClient::from_config(&http_config(&[&down, &up])).unwrap();
        assert_eq!(client.provider_names(), vec!["p1", "p2"]);

        let reply = client.advise(&request()).await.unwrap();
        assert_eq!(reply.provider, "p2");
        assert_eq!(reply.content, "Reduce risk.");
    }

    #[tokio::test]
    async fn test_http_both_down() {
        let first = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&first)
            .await;
        let second = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&second)
            .await;

        let client = AdvisoryClient::from_config(&http_config(&[&first, &second])).unwrap();
        let err = client.advise(&request()).await.unwrap_err();
        assert!(matches!(err, AdvisoryError::AllProvidersFailed { ref failures } if failures.len() == 2));
    }
}
