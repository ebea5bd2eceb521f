//! Shared application state for all routes.

use crate::auth::{AuthContext, RequestContext};
use crate::service::ResourceStore;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<ResourceStore>,
    /// Upper bound for one request, hook evaluation included.
    pub request_timeout: Duration,
}

impl AppState {
    pub fn new(store: ResourceStore, request_timeout: Duration) -> Self {
        AppState {
            store: Arc::new(store),
            request_timeout,
        }
    }

    pub fn request_context(&self, auth: AuthContext) -> RequestContext {
        RequestContext::new(auth).with_timeout(self.request_timeout)
    }
}
