//! Image management: credential resolution, retries, and pull coalescing.
//!
//! Concurrent tasks frequently need the same image on the same ship (every
//! instance of a service, for one). Pulls are deduplicated through a keyed
//! map of shared futures: the first caller initiates the pull, later
//! callers attach to the same in-flight handle. Registry login happens at
//! most once per `(ship, registry)` pair per play, serialized.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use futures::future::{BoxFuture, FutureExt, Shared};
use tracing::{debug, warn};

use armada_core::image::ImageRef;
use armada_core::registry::{self, RegistryAuth};
use armada_core::ship::Ship;

use crate::error::{OrchestratorError, Result};
use crate::runtime::ContainerRuntime;

type SharedResult = std::result::Result<(), Arc<OrchestratorError>>;
type SharedPull = Shared<BoxFuture<'static, SharedResult>>;

/// Deduplicates pulls and serializes registry logins across a play.
pub struct PullCoordinator {
    inflight: Mutex<HashMap<(String, String), SharedPull>>,
    logins: Arc<tokio::sync::Mutex<HashSet<(String, String)>>>,
}

impl Default for PullCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl PullCoordinator {
    /// Creates a coordinator with no in-flight pulls.
    pub fn new() -> Self {
        Self {
            inflight: Mutex::new(HashMap::new()),
            logins: Arc::new(tokio::sync::Mutex::new(HashSet::new())),
        }
    }

    /// Makes sure an image is present on a ship.
    ///
    /// Without `refresh`, a present image short-circuits. Otherwise the pull
    /// goes through the coalescing map: at most one pull is in flight per
    /// `(ship, image)` pair, and every caller shares its outcome.
    pub async fn ensure_image(
        &self,
        ship: &Ship,
        runtime: Arc<dyn ContainerRuntime>,
        image: &ImageRef,
        registries: &[RegistryAuth],
        refresh: bool,
    ) -> Result<()> {
        let reference = image.reference();

        if !refresh && runtime.image_present(&reference).await? {
            debug!(ship = %ship.name, image = %reference, "Image already present");
            return Ok(());
        }

        let auth = registry::auth_for_image(registries, image).cloned();
        let key = (ship.name.clone(), reference.clone());

        let handle = {
            let mut inflight = self
                .inflight
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            match inflight.get(&key) {
                Some(handle) => handle.clone(),
                None => {
                    let future = pull_with_retries(
                        runtime.clone(),
                        ship.name.clone(),
                        reference.clone(),
                        auth,
                        self.logins.clone(),
                    )
                    .boxed()
                    .shared();
                    inflight.insert(key.clone(), future.clone());
                    future
                }
            }
        };

        let result = handle.await;

        // Completed handles leave the map so a later refresh pulls again.
        self.inflight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&key);

        result.map_err(OrchestratorError::Shared)
    }
}

/// Runs login-then-pull under the registry retry policy: up to
/// `max_attempts`, retrying only on the listed HTTP status codes.
async fn pull_with_retries(
    runtime: Arc<dyn ContainerRuntime>,
    ship: String,
    reference: String,
    auth: Option<RegistryAuth>,
    logins: Arc<tokio::sync::Mutex<HashSet<(String, String)>>>,
) -> SharedResult {
    let policy = auth
        .as_ref()
        .map(|auth| auth.retry_policy())
        .unwrap_or_default();

    let mut attempt = 0;
    loop {
        attempt += 1;
        match attempt_once(&*runtime, &ship, &reference, auth.as_ref(), &logins).await {
            Ok(()) => return Ok(()),
            Err(err) => {
                if attempt < policy.max_attempts && policy.should_retry(err.http_status()) {
                    warn!(
                        ship = %ship,
                        image = %reference,
                        attempt,
                        error = %err,
                        "Retrying image pull"
                    );
                    continue;
                }
                return Err(Arc::new(OrchestratorError::image(
                    &reference,
                    err.to_string(),
                )));
            }
        }
    }
}

async fn attempt_once(
    runtime: &dyn ContainerRuntime,
    ship: &str,
    reference: &str,
    auth: Option<&RegistryAuth>,
    logins: &tokio::sync::Mutex<HashSet<(String, String)>>,
) -> Result<()> {
    if let Some(auth) = auth {
        let key = (ship.to_string(), auth.name.clone());
        // Holding the lock across the login serializes registry logins.
        let mut done = logins.lock().await;
        if !done.contains(&key) {
            runtime.login(auth).await?;
            done.insert(key);
        }
    }

    runtime.pull(reference, auth).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::testing::{FakeRuntime, RpcCall};
    use armada_core::registry::PullRetryPolicy;

    fn image() -> ImageRef {
        ImageRef::parse("registry.example.com/acme/app:1").unwrap()
    }

    fn auth_with_retry(statuses: Vec<u16>, attempts: u32) -> RegistryAuth {
        RegistryAuth {
            name: "registry.example.com".to_string(),
            registry: "https://registry.example.com".to_string(),
            username: "user".to_string(),
            password: "secret".to_string(),
            email: None,
            retry: Some(PullRetryPolicy {
                max_attempts: attempts,
                retry_statuses: statuses,
            }),
        }
    }

    #[tokio::test]
    async fn test_present_image_short_circuits() {
        let runtime = Arc::new(FakeRuntime::new("alpha"));
        runtime.set_image("registry.example.com/acme/app:1", "sha256:1");

        let coordinator = PullCoordinator::new();
        coordinator
            .ensure_image(&Ship::new("alpha", "10.0.0.1"), runtime.clone(), &image(), &[], false)
            .await
            .unwrap();

        assert_eq!(runtime.count(|c| matches!(c, RpcCall::Pull(_))), 0);
    }

    #[tokio::test]
    async fn test_concurrent_pulls_coalesce() {
        let runtime = Arc::new(FakeRuntime::new("alpha"));
        runtime.set_pull_delay_ms(50);

        let coordinator = Arc::new(PullCoordinator::new());
        let ship = Ship::new("alpha", "10.0.0.1");

        let tasks: Vec<_> = (0..3)
            .map(|_| {
                let coordinator = coordinator.clone();
                let runtime = runtime.clone();
                let ship = ship.clone();
                tokio::spawn(async move {
                    coordinator
                        .ensure_image(&ship, runtime, &image(), &[], true)
                        .await
                })
            })
            .collect();

        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(runtime.count(|c| matches!(c, RpcCall::Pull(_))), 1);
    }

    #[tokio::test]
    async fn test_retry_on_listed_status() {
        let runtime = Arc::new(FakeRuntime::new("alpha"));
        runtime.fail_next("pull", "registry.example.com/acme/app:1", 503);

        let registries = vec![auth_with_retry(vec![503], 3)];
        let coordinator = PullCoordinator::new();
        coordinator
            .ensure_image(
                &Ship::new("alpha", "10.0.0.1"),
                runtime.clone(),
                &image(),
                &registries,
                true,
            )
            .await
            .unwrap();

        assert_eq!(runtime.count(|c| matches!(c, RpcCall::Pull(_))), 2);
    }

    #[tokio::test]
    async fn test_unlisted_status_fails_fast() {
        let runtime = Arc::new(FakeRuntime::new("alpha"));
        runtime.fail_next("pull", "registry.example.com/acme/app:1", 404);

        let registries = vec![auth_with_retry(vec![503], 3)];
        let coordinator = PullCoordinator::new();
        let err = coordinator
            .ensure_image(
                &Ship::new("alpha", "10.0.0.1"),
                runtime.clone(),
                &image(),
                &registries,
                true,
            )
            .await
            .unwrap_err();

        assert_eq!(err.kind(), crate::error::FailureKind::Image);
        assert_eq!(runtime.count(|c| matches!(c, RpcCall::Pull(_))), 1);
    }

    #[tokio::test]
    async fn test_login_happens_once_per_registry() {
        let runtime = Arc::new(FakeRuntime::new("alpha"));
        let registries = vec![auth_with_retry(vec![], 1)];
        let coordinator = PullCoordinator::new();
        let ship = Ship::new("alpha", "10.0.0.1");

        coordinator
            .ensure_image(&ship, runtime.clone(), &image(), &registries, true)
            .await
            .unwrap();
        let other = ImageRef::parse("registry.example.com/acme/other:2").unwrap();
        coordinator
            .ensure_image(&ship, runtime.clone(), &other, &registries, true)
            .await
            .unwrap();

        assert_eq!(runtime.count(|c| matches!(c, RpcCall::Login(_))), 1);
        assert_eq!(runtime.count(|c| matches!(c, RpcCall::Pull(_))), 2);
    }
}
