//! Request pipeline assembly.
//!
//! The pipeline runs routing, then authentication, then authorization, then
//! the endpoint. [`Pipeline`] refuses any other order at startup, so an
//! endpoint can never be reached before its access requirement is checked.

pub mod route;

pub use route::{ConventionRoute, PathFolding, RouteValues};

use axum::Router;
use axum::extract::{MatchedPath, Request, State};
use axum::http::uri::{Authority, PathAndQuery};
use axum::http::{HeaderMap, HeaderValue, Uri, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::MethodRouter;
use oidc_gate_access::Access;
use rootcause::Report;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tower::Layer;
use tower::util::MapRequestLayer;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::services::ServeDir;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::auth::{self, AppState};
use crate::error;

/// `Strict-Transport-Security` value sent in production: 30 days.
pub const HSTS_VALUE: &str = "max-age=2592000";

/// A middleware stage of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Routing,
    Authentication,
    Authorization,
}

impl Stage {
    /// The only accepted order.
    pub const ORDER: [Stage; 3] = [Stage::Routing, Stage::Authentication, Stage::Authorization];
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Routing => write!(f, "routing"),
            Self::Authentication => write!(f, "authentication"),
            Self::Authorization => write!(f, "authorization"),
        }
    }
}

/// Pipeline assembly errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    /// A stage was added before the stage that must precede it.
    OutOfOrder { stage: Stage, expected: Stage },
    /// A stage was added twice.
    Duplicate { stage: Stage },
    /// The pipeline was built without a stage.
    Incomplete { missing: Stage },
    /// No convention route was registered.
    NoRoute,
    /// A second convention route was registered.
    RouteAlreadyRegistered { name: String },
    /// A convention route pattern did not parse.
    InvalidRoute { pattern: String, reason: String },
    /// No actions were mapped.
    NoActions,
    /// Two actions expand to the same path.
    DuplicateEndpoint { path: String },
    /// The listener could not bind.
    Bind { addr: SocketAddr, reason: String },
    /// The server stopped with an error.
    Serve { reason: String },
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfOrder { stage, expected } => {
                write!(f, "{stage} stage added out of order, expected {expected}")
            }
            Self::Duplicate { stage } => write!(f, "{stage} stage added twice"),
            Self::Incomplete { missing } => write!(f, "pipeline has no {missing} stage"),
            Self::NoRoute => write!(f, "no convention route registered"),
            Self::RouteAlreadyRegistered { name } => {
                write!(f, "convention route '{name}' already registered")
            }
            Self::InvalidRoute { pattern, reason } => {
                write!(f, "invalid route pattern '{pattern}': {reason}")
            }
            Self::NoActions => write!(f, "no actions mapped"),
            Self::DuplicateEndpoint { path } => write!(f, "path '{path}' mapped twice"),
            Self::Bind { addr, reason } => write!(f, "failed to bind {addr}: {reason}"),
            Self::Serve { reason } => write!(f, "server error: {reason}"),
        }
    }
}

impl std::error::Error for PipelineError {}

/// Tracks which stages have been added.
#[derive(Debug, Clone, Default)]
pub struct StageOrder {
    stages: Vec<Stage>,
}

impl StageOrder {
    /// Appends a stage.
    ///
    /// # Errors
    ///
    /// Returns `Duplicate` if the stage is present, `OutOfOrder` if it is
    /// not the next stage in [`Stage::ORDER`].
    pub fn push(&mut self, stage: Stage) -> Result<(), PipelineError> {
        if self.stages.contains(&stage) {
            return Err(PipelineError::Duplicate { stage });
        }
        let expected = Stage::ORDER[self.stages.len()];
        if stage != expected {
            return Err(PipelineError::OutOfOrder { stage, expected });
        }
        self.stages.push(stage);
        Ok(())
    }

    /// Checks every stage is present.
    ///
    /// # Errors
    ///
    /// Returns `Incomplete` naming the first missing stage.
    pub fn ensure_complete(&self) -> Result<(), PipelineError> {
        match Stage::ORDER.get(self.stages.len()) {
            Some(missing) => Err(PipelineError::Incomplete { missing: *missing }),
            None => Ok(()),
        }
    }

    /// Returns the stages in the order added.
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }
}

/// What the routing stage records for a matched endpoint.
#[derive(Debug, Clone)]
pub struct ResolvedEndpoint {
    pub values: RouteValues,
    pub access: Access,
}

struct ActionRegistration {
    controller: String,
    action: String,
    access: Access,
    handler: MethodRouter<AppState>,
}

struct RoutingTable {
    route: ConventionRoute,
    /// Access requirement per axum path template.
    endpoints: HashMap<String, (String, String, Access)>,
}

/// Builds the application router.
pub struct Pipeline {
    state: AppState,
    order: StageOrder,
    route: Option<ConventionRoute>,
    actions: Vec<ActionRegistration>,
    static_dir: Option<PathBuf>,
    public_origin: Option<String>,
}

impl Pipeline {
    /// Starts an empty pipeline over the application state.
    pub fn new(state: AppState) -> Self {
        Self {
            state,
            order: StageOrder::default(),
            route: None,
            actions: Vec::new(),
            static_dir: None,
            public_origin: None,
        }
    }

    fn add_stage(mut self, stage: Stage) -> Result<Self, Report<PipelineError>> {
        self.order.push(stage)?;
        debug!(%stage, "pipeline stage added");
        Ok(self)
    }

    /// Adds endpoint resolution. Must come first.
    ///
    /// # Errors
    ///
    /// Returns `OutOfOrder` or `Duplicate`.
    pub fn use_routing(self) -> Result<Self, Report<PipelineError>> {
        self.add_stage(Stage::Routing)
    }

    /// Adds session cookie authentication. Must follow routing.
    ///
    /// # Errors
    ///
    /// Returns `OutOfOrder` or `Duplicate`.
    pub fn use_authentication(self) -> Result<Self, Report<PipelineError>> {
        self.add_stage(Stage::Authentication)
    }

    /// Adds access checks. Must follow authentication.
    ///
    /// # Errors
    ///
    /// Returns `OutOfOrder` or `Duplicate`.
    pub fn use_authorization(self) -> Result<Self, Report<PipelineError>> {
        self.add_stage(Stage::Authorization)
    }

    /// Registers the convention route.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRoute` if the pattern does not parse and
    /// `RouteAlreadyRegistered` if a route exists.
    pub fn register_route(
        mut self,
        name: &str,
        pattern: &str,
    ) -> Result<Self, Report<PipelineError>> {
        if let Some(existing) = &self.route {
            return Err(PipelineError::RouteAlreadyRegistered {
                name: existing.name().to_string(),
            }
            .into());
        }
        self.route = Some(ConventionRoute::parse(name, pattern)?);
        Ok(self)
    }

    /// Maps a controller action to a handler.
    pub fn map_action(
        mut self,
        controller: &str,
        action: &str,
        access: Access,
        handler: MethodRouter<AppState>,
    ) -> Self {
        self.actions.push(ActionRegistration {
            controller: controller.to_string(),
            action: action.to_string(),
            access,
            handler,
        });
        self
    }

    /// Serves files from `dir` for requests no route matches.
    pub fn use_static_files(mut self, dir: PathBuf) -> Self {
        self.static_dir = Some(dir);
        self
    }

    /// Sets the `https://host[:port]` origin plain-HTTP requests are
    /// redirected to in production. Without one, the request's host is used.
    pub fn use_public_origin(mut self, origin: String) -> Self {
        self.public_origin = Some(origin);
        self
    }

    /// Assembles the router.
    ///
    /// # Errors
    ///
    /// Returns `Incomplete`, `NoRoute`, `NoActions` or `DuplicateEndpoint`.
    pub fn build(self) -> Result<Router, Report<PipelineError>> {
        let Self {
            state,
            order,
            route,
            actions,
            static_dir,
            public_origin,
        } = self;

        order.ensure_complete()?;
        let route = route.ok_or(PipelineError::NoRoute)?;
        if actions.is_empty() {
            return Err(PipelineError::NoActions.into());
        }

        let mut router: Router<AppState> = Router::new();
        let mut endpoints = HashMap::new();
        for registration in actions {
            for path in route.paths_for(&registration.controller, &registration.action) {
                if endpoints.contains_key(&path) {
                    return Err(PipelineError::DuplicateEndpoint { path }.into());
                }
                router = router.route(&path, registration.handler.clone());
                debug!(path = %path, access = %registration.access, "mapped endpoint");
                endpoints.insert(
                    path,
                    (
                        registration.controller.clone(),
                        registration.action.clone(),
                        registration.access.clone(),
                    ),
                );
            }
        }
        let folding = Arc::new(PathFolding::new(endpoints.keys().map(String::as_str)));
        let table = Arc::new(RoutingTable { route, endpoints });

        // The last layer added runs first.
        for stage in order.stages().iter().rev() {
            router = match stage {
                Stage::Authorization => router.route_layer(middleware::from_fn_with_state(
                    state.clone(),
                    auth::middleware::authorize,
                )),
                Stage::Authentication => router.route_layer(middleware::from_fn_with_state(
                    state.clone(),
                    auth::middleware::authenticate,
                )),
                Stage::Routing => router.route_layer(middleware::from_fn_with_state(
                    Arc::clone(&table),
                    resolve_endpoint,
                )),
            };
        }

        router = router.merge(auth::routes::router(state.auth.oidc().config()));
        if let Some(dir) = static_dir {
            router = router.fallback_service(ServeDir::new(dir));
        }

        let environment = state.environment;
        let mut app = router
            .with_state(state)
            .layer(CatchPanicLayer::custom(
                move |panic: Box<dyn Any + Send + 'static>| {
                    error::panic_response(environment, panic)
                },
            ));
        if !environment.is_development() {
            app = app
                .layer(SetResponseHeaderLayer::if_not_present(
                    header::STRICT_TRANSPORT_SECURITY,
                    HeaderValue::from_static(HSTS_VALUE),
                ))
                .layer(middleware::from_fn_with_state(
                    public_origin.map(Arc::<str>::from),
                    redirect_to_https,
                ));
        }
        let app = app.layer(TraceLayer::new_for_http());

        // Path casing is folded before the inner router matches.
        let fold = MapRequestLayer::new(move |request: Request| fold_path(&folding, request));
        Ok(Router::new().fallback_service(fold.layer(app)))
    }

    /// Builds the router and serves it until Ctrl-C or SIGTERM.
    ///
    /// # Errors
    ///
    /// Returns build errors, `Bind` if the address is unavailable and
    /// `Serve` if the server fails.
    pub async fn run(self, addr: SocketAddr) -> Result<(), Report<PipelineError>> {
        let app = self.build()?;

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| PipelineError::Bind {
                addr,
                reason: e.to_string(),
            })?;
        info!(%addr, "listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| PipelineError::Serve {
                reason: e.to_string(),
            })?;

        info!("server stopped");
        Ok(())
    }
}

/// Routing stage: records route values and the endpoint's access requirement.
async fn resolve_endpoint(
    State(table): State<Arc<RoutingTable>>,
    mut request: Request,
    next: Next,
) -> Response {
    let resolved = request
        .extensions()
        .get::<MatchedPath>()
        .and_then(|matched| table.endpoints.get(matched.as_str()))
        .map(|(controller, action, access)| ResolvedEndpoint {
            values: RouteValues {
                controller: controller.clone(),
                action: action.clone(),
                id: table
                    .route
                    .resolve(request.uri().path())
                    .and_then(|values| values.id),
            },
            access: access.clone(),
        });

    if let Some(resolved) = resolved {
        request.extensions_mut().insert(resolved);
    }
    next.run(request).await
}

/// Rewrites the request path to the mapped casing, if it differs.
fn fold_path(folding: &PathFolding, mut request: Request) -> Request {
    let Some(path) = folding.canonical(request.uri().path()) else {
        return request;
    };
    let path_and_query = match request.uri().query() {
        Some(query) => format!("{path}?{query}"),
        None => path,
    };
    let mut parts = request.uri().clone().into_parts();
    if let Ok(path_and_query) = PathAndQuery::try_from(path_and_query) {
        parts.path_and_query = Some(path_and_query);
        if let Ok(uri) = Uri::from_parts(parts) {
            *request.uri_mut() = uri;
        }
    }
    request
}

/// Scheme the client used, as reported by a TLS-terminating proxy or the
/// request line. Unmarked requests are plain HTTP.
fn request_scheme(request: &Request) -> String {
    request
        .headers()
        .get("x-forwarded-proto")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .or_else(|| request.uri().scheme_str())
        .unwrap_or("http")
        .to_ascii_lowercase()
}

fn request_host(headers: &HeaderMap, uri: &Uri) -> Option<String> {
    let authority = match headers.get(header::HOST).and_then(|v| v.to_str().ok()) {
        Some(host) => host.parse::<Authority>().ok()?,
        None => uri.authority()?.clone(),
    };
    Some(authority.host().to_string())
}

/// Production stage ahead of everything else: plain-HTTP requests are
/// redirected to HTTPS with `307 Temporary Redirect`.
async fn redirect_to_https(
    State(public_origin): State<Option<Arc<str>>>,
    request: Request,
    next: Next,
) -> Response {
    if request_scheme(&request) == "https" {
        return next.run(request).await;
    }

    let origin = match public_origin.as_deref() {
        Some(origin) => origin.to_string(),
        None => match request_host(request.headers(), request.uri()) {
            Some(host) => format!("https://{host}"),
            None => {
                warn!("plain-HTTP request without a host, cannot redirect to HTTPS");
                return error::bad_request("Requests must use HTTPS.");
            }
        },
    };
    let path_and_query = request
        .uri()
        .path_and_query()
        .map_or("/", PathAndQuery::as_str);
    debug!(%origin, path = %request.uri().path(), "redirecting to HTTPS");
    Redirect::temporary(&format!("{origin}{path_and_query}")).into_response()
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("shutdown signal received");
}
