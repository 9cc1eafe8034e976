//! Gateway context.
//!
//! Everything handlers and the transport share: configuration, the route
//! table, scheduled commands, the auth registry and the session layer. It is
//! built once during bootstrap and frozen behind an `Arc` before the
//! transport starts, after which the route table is read without locking.

use std::sync::{Arc, Mutex, PoisonError};

use crate::auth::secure_cookie::SecureCookie;
use crate::auth::AuthRegistry;
use crate::config::GatewayConfig;
use crate::handler::{blocking_to_async, compose_secured_blocking, to_secured, AsyncHandler, HandlerKind, SyncHandler};
use crate::routing::{PathPrefix, RouteEntry, RouteError, RouteTable};
use crate::scheduler::{ScheduledCommand, ScheduledCommands};
use crate::session::{SessionManager, SessionProxy};

pub struct GatewayContext {
    config: Arc<GatewayConfig>,
    routes: RouteTable,
    // Commands are `Send` only; the mutex keeps the context `Sync`.
    scheduler: Mutex<ScheduledCommands>,
    auth: Arc<AuthRegistry>,
    sessions: Arc<SessionManager>,
    proxy: Arc<SessionProxy>,
    cookie: Arc<SecureCookie>,
}

impl GatewayContext {
    pub fn new(config: Arc<GatewayConfig>, cookie: Arc<SecureCookie>, sessions: Arc<SessionManager>) -> Self {
        let proxy = Arc::new(SessionProxy::new(sessions.clone()));
        Self {
            config,
            routes: RouteTable::new(),
            scheduler: Mutex::new(ScheduledCommands::new()),
            auth: Arc::new(AuthRegistry::new()),
            sessions,
            proxy,
            cookie,
        }
    }

    fn register(&mut self, prefix: &str, kind: HandlerKind, optional_auth: bool, handler: AsyncHandler) -> Result<(), RouteError> {
        self.routes
            .register(RouteEntry::new(PathPrefix::new(prefix)?, kind, optional_auth, handler))
    }

    /// Unsecured asynchronous handler.
    pub fn add(&mut self, prefix: &str, handler: AsyncHandler) -> Result<(), RouteError> {
        self.register(prefix, HandlerKind::AsyncUnsecured, false, handler)
    }

    /// Unsecured blocking handler. Stalls its worker for the whole run.
    pub fn add_blocking(&mut self, prefix: &str, handler: SyncHandler) -> Result<(), RouteError> {
        self.register(prefix, HandlerKind::BlockingUnsecured, false, blocking_to_async(handler))
    }

    /// Asynchronous handler behind the active authentication provider.
    pub fn add_secure(&mut self, prefix: &str, handler: AsyncHandler, optional_auth: bool) -> Result<(), RouteError> {
        let handler = to_secured(handler, self.auth.clone(), optional_auth);
        self.register(prefix, HandlerKind::AsyncSecured, optional_auth, handler)
    }

    /// Blocking handler behind the active authentication provider.
    pub fn add_secure_blocking(&mut self, prefix: &str, handler: SyncHandler, optional_auth: bool) -> Result<(), RouteError> {
        let handler = compose_secured_blocking(handler, self.auth.clone(), optional_auth);
        self.register(prefix, HandlerKind::BlockingSecured, optional_auth, handler)
    }

    pub fn set_default(&mut self, handler: AsyncHandler) -> Result<(), RouteError> {
        self.routes
            .set_default(RouteEntry::default_route(HandlerKind::AsyncUnsecured, false, handler))
    }

    pub fn set_blocking_default(&mut self, handler: SyncHandler) -> Result<(), RouteError> {
        self.routes.set_default(RouteEntry::default_route(
            HandlerKind::BlockingUnsecured,
            false,
            blocking_to_async(handler),
        ))
    }

    pub fn add_command(&mut self, command: Box<dyn ScheduledCommand>) {
        self.scheduler
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .add_command(command);
    }

    pub fn config(&self) -> &Arc<GatewayConfig> {
        &self.config
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    pub fn auth(&self) -> &Arc<AuthRegistry> {
        &self.auth
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn proxy(&self) -> &Arc<SessionProxy> {
        &self.proxy
    }

    pub fn secure_cookie(&self) -> &Arc<SecureCookie> {
        &self.cookie
    }

    /// Freeze the context for the transport and hand out the commands to run.
    pub fn freeze(mut self) -> (Arc<GatewayContext>, ScheduledCommands) {
        let commands = std::mem::take(self.scheduler.get_mut().unwrap_or_else(PoisonError::into_inner));
        tracing::debug!(routes = self.routes.len(), commands = commands.len(), "Gateway context frozen");
        (Arc::new(self), commands)
    }
}

impl std::fmt::Debug for GatewayContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayContext")
            .field("routes", &self.routes)
            .field("scheduler", &*self.scheduler.lock().unwrap_or_else(PoisonError::into_inner))
            .field("auth", &self.auth)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::builtin::not_found_handler;
    use crate::lifecycle::environment::DetectedEnvironment;
    use crate::scheduler::PeriodicCommand;
    use std::time::Duration;

    fn test_context() -> GatewayContext {
        let config = Arc::new(GatewayConfig::default());
        let cookie = Arc::new(SecureCookie::from_key(vec![1u8; 32], Duration::from_secs(60)));
        let sessions = Arc::new(SessionManager::new(config.session.clone(), DetectedEnvironment::default()).unwrap());
        GatewayContext::new(config, cookie, sessions)
    }

    #[test]
    fn test_registration_kinds() {
        let mut context = test_context();
        context.add_blocking("/templates", not_found_handler()).unwrap();
        context.add_secure_blocking("/log", not_found_handler(), false).unwrap();
        context.add_secure("/help", context.proxy().content_handler(), true).unwrap();
        context.set_blocking_default(not_found_handler()).unwrap();

        let routes = context.routes();
        assert_eq!(routes.resolve("/templates/x").unwrap().kind(), HandlerKind::BlockingUnsecured);
        assert_eq!(routes.resolve("/log").unwrap().kind(), HandlerKind::BlockingSecured);
        let help = routes.resolve("/help/index.html").unwrap();
        assert_eq!(help.kind(), HandlerKind::AsyncSecured);
        assert!(help.optional_auth());
        assert_eq!(routes.resolve("/").unwrap().label(), "default");
    }

    #[test]
    fn test_invalid_and_duplicate_prefix() {
        let mut context = test_context();
        assert_eq!(
            context.add_blocking("log", not_found_handler()),
            Err(RouteError::InvalidPrefix("log".into()))
        );
        context.add_blocking("/log", not_found_handler()).unwrap();
        assert_eq!(
            context.add_secure_blocking("/log", not_found_handler(), false),
            Err(RouteError::DuplicatePrefix("/log".into()))
        );
    }

    fn assert_shareable<T: Send + Sync>() {}

    #[test]
    fn test_frozen_context_is_shareable() {
        assert_shareable::<Arc<GatewayContext>>();
    }

    #[test]
    fn test_freeze_hands_out_commands() {
        let mut context = test_context();
        context.add_command(Box::new(PeriodicCommand::new("sweep", Duration::from_secs(1), || true)));
        let (frozen, commands) = context.freeze();
        assert_eq!(commands.len(), 1);
        assert!(frozen.routes().is_empty());
    }
}
