//! Log retrieval for a single container.

use std::sync::Arc;

use armada_core::environment::Environment;
use armada_core::error::ConfigError;

use crate::error::{OrchestratorError, Result};
use crate::runtime::{LogStream, RuntimeProvider};

/// Streams logs from one container.
///
/// Requesting logs for an absent container is an illegal transition and
/// fails with a state error; the play layer never synthesizes one.
pub async fn stream_logs(
    environment: &Arc<Environment>,
    provider: &Arc<dyn RuntimeProvider>,
    container: &str,
    follow: bool,
    tail: Option<usize>,
) -> Result<LogStream> {
    let spec = environment
        .container(container)
        .ok_or_else(|| ConfigError::UnknownTarget(container.to_string()))?;

    let runtime = provider.runtime(environment.ship_of(spec))?;

    let status = runtime.inspect(&spec.name).await?;
    if status.state.is_absent() {
        return Err(OrchestratorError::state(
            &spec.name,
            "cannot show logs for a container that does not exist",
        ));
    }

    runtime.logs(&spec.name, follow, tail).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;
    use crate::runtime::testing::FakeProvider;
    use armada_core::container::ContainerSpec;
    use armada_core::image::ImageRef;
    use armada_core::service::Service;
    use armada_core::ship::Ship;
    use futures::StreamExt;

    fn environment() -> Arc<Environment> {
        let mut service = Service::new("web", "acme/web:1");
        service.instances = vec!["web-1".to_string()];
        let container = ContainerSpec::builder(
            "web-1",
            "web",
            "alpha",
            ImageRef::parse("acme/web:1").unwrap(),
        )
        .build();

        Arc::new(
            Environment::new(
                "test",
                vec![Ship::new("alpha", "10.0.0.1")],
                vec![],
                vec![service],
                vec![container],
            )
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_logs_from_running_container() {
        let environment = environment();
        let provider = Arc::new(FakeProvider::new());
        let fake = provider.fake("alpha");
        fake.seed_running("web-1", "acme/web:1");
        fake.set_logs("web-1", vec!["ready".to_string()]);

        let provider: Arc<dyn RuntimeProvider> = provider;
        let stream = stream_logs(&environment, &provider, "web-1", false, None)
            .await
            .unwrap();
        let lines: Vec<String> = stream.map(|l| l.unwrap()).collect().await;
        assert_eq!(lines, vec!["ready".to_string()]);
    }

    #[tokio::test]
    async fn test_logs_on_absent_container_is_a_state_error() {
        let environment = environment();
        let provider: Arc<dyn RuntimeProvider> = Arc::new(FakeProvider::new());
        let err = stream_logs(&environment, &provider, "web-1", false, None)
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind(), FailureKind::State);
    }

    #[tokio::test]
    async fn test_logs_unknown_container() {
        let environment = environment();
        let provider: Arc<dyn RuntimeProvider> = Arc::new(FakeProvider::new());
        let err = stream_logs(&environment, &provider, "nope", false, None)
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind(), FailureKind::Config);
    }
}
