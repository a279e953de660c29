//! Endpoint registry.
//!
//! One logical endpoint must be reachable through every active listener,
//! local and tunnel, with identical handler and authentication bindings.
//! The registry holds an under-construction router per active surface and
//! applies each registration to all of them.
//!
//! Registration is append-only for the process lifetime and applies only to
//! surfaces that exist at registration time: registering before a surface is
//! added is a documented no-op for that surface, since a listener may
//! legitimately be absent (tunneling disabled, say). There is no
//! unregistration; the endpoint set is fixed at bootstrap.

use std::path::PathBuf;

use axum::Router;

use crate::http::auth;

/// Per-endpoint options applied at registration time.
#[derive(Debug, Clone, Default)]
pub struct EndpointOptions {
    /// Realm for basic-auth challenges.
    pub auth_domain: String,

    /// Credentials file; `None` leaves the endpoint unauthenticated.
    pub auth_file: Option<PathBuf>,
}

/// Registry of endpoints across the currently-active listener surfaces.
pub struct EndpointRegistry<S> {
    surfaces: Vec<Surface<S>>,
}

struct Surface<S> {
    name: &'static str,
    router: Router<S>,
}

impl<S> EndpointRegistry<S>
where
    S: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            surfaces: Vec::new(),
        }
    }

    /// Add a listener surface. Endpoints registered from now on apply to it;
    /// earlier registrations do not retroactively appear.
    pub fn add_surface(&mut self, name: &'static str) {
        self.surfaces.push(Surface {
            name,
            router: Router::new(),
        });
    }

    /// Number of active surfaces.
    pub fn surface_count(&self) -> usize {
        self.surfaces.len()
    }

    /// Register `routes` under `prefix` on every active surface, wrapped in
    /// basic auth when the options carry a credentials file.
    pub fn register(&mut self, prefix: &str, routes: Router<S>, opts: &EndpointOptions) {
        if self.surfaces.is_empty() {
            tracing::debug!(prefix, "No active listeners, registration skipped");
            return;
        }
        let routes = match &opts.auth_file {
            Some(file) => auth::protect(routes, &opts.auth_domain, file),
            None => routes,
        };
        for surface in &mut self.surfaces {
            let router = std::mem::take(&mut surface.router);
            surface.router = router.nest(prefix, routes.clone());
            tracing::debug!(prefix, surface = surface.name, "Endpoint registered");
        }
    }

    /// Consume the registry, yielding the per-surface routers.
    pub fn finalize(self) -> Vec<(&'static str, Router<S>)> {
        self.surfaces
            .into_iter()
            .map(|surface| (surface.name, surface.router))
            .collect()
    }
}

impl<S> Default for EndpointRegistry<S>
where
    S: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum::routing::get;
    use tower::ServiceExt;

    fn probe() -> Router<()> {
        Router::new().route("/", get(|| async { "here" }))
    }

    async fn status_of(router: Router<()>, uri: &str) -> StatusCode {
        router
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
            .status()
    }

    #[tokio::test]
    async fn registration_reaches_every_active_surface() {
        let mut registry = EndpointRegistry::new();
        registry.add_surface("local");
        registry.add_surface("tunnel");
        registry.register("/probe", probe(), &EndpointOptions::default());

        for (_, router) in registry.finalize() {
            assert_eq!(status_of(router, "/probe").await, StatusCode::OK);
        }
    }

    #[tokio::test]
    async fn registration_is_not_retroactive() {
        let mut registry = EndpointRegistry::new();

        // No surfaces yet: the registration is a documented no-op.
        registry.register("/probe", probe(), &EndpointOptions::default());
        registry.add_surface("local");

        let routers = registry.finalize();
        assert_eq!(routers.len(), 1);
        let (_, router) = routers.into_iter().next().unwrap();
        assert_eq!(status_of(router, "/probe").await, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn late_surface_misses_earlier_registrations() {
        let mut registry = EndpointRegistry::new();
        registry.add_surface("local");
        registry.register("/early", probe(), &EndpointOptions::default());
        registry.add_surface("tunnel");
        registry.register("/late", probe(), &EndpointOptions::default());

        let mut routers = registry.finalize().into_iter();
        let (_, local) = routers.next().unwrap();
        let (_, tunnel) = routers.next().unwrap();

        assert_eq!(status_of(local.clone(), "/early").await, StatusCode::OK);
        assert_eq!(status_of(local, "/late").await, StatusCode::OK);
        assert_eq!(status_of(tunnel.clone(), "/early").await, StatusCode::NOT_FOUND);
        assert_eq!(status_of(tunnel, "/late").await, StatusCode::OK);
    }
}
