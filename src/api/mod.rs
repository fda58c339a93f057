//! HTTP surface: router assembly, the middleware stack, and the server
//! lifecycle (serving → draining → stopped).

use anyhow::{anyhow, Context, Result};
use axum::{
    body::Body,
    extract::MatchedPath,
    http::{HeaderName, HeaderValue, Request},
    middleware as axum_middleware,
    routing::{get, post, put},
    Extension, Router,
};
use std::{
    future::{Future, IntoFuture},
    net::SocketAddr,
    time::Duration,
};
use tokio::{
    net::TcpListener,
    signal::unix::{signal, SignalKind},
    sync::oneshot,
    time::{sleep, timeout},
};
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::{
    catch_panic::CatchPanicLayer, request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer, trace::TraceLayer,
};
use tracing::{info, info_span, Span};
use ulid::Ulid;

pub mod error;
pub mod handlers;
pub mod limiter;
pub mod mailer;
pub mod middleware;
pub mod password;
pub mod permissions;
pub mod state;
pub mod store;
pub mod tokens;

use self::middleware::{authenticate, rate_limit, recovered};
use self::state::AppState;

/// Ceiling for the graceful drain and the background-task wait.
pub const DRAIN_CEILING: Duration = Duration::from_secs(20);

/// Build the full router: routes wrapped by recover → rate-limit →
/// authenticate, with request-id propagation and tracing outermost.
#[must_use]
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/v1/healthcheck", get(handlers::health::health))
        .route(
            "/v1/photo",
            get(handlers::photos::list).post(handlers::photos::create),
        )
        .route(
            "/v1/photo/:id",
            get(handlers::photos::show).delete(handlers::photos::delete),
        )
        .route("/v1/users", post(handlers::users::register))
        .route("/v1/users/activated", put(handlers::users::activate))
        .route(
            "/v1/tokens/authentication",
            post(handlers::tokens::create_authentication_token),
        )
        .fallback(handlers::not_found)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &Request<Body>| {
                        HeaderValue::from_str(Ulid::new().to_string().as_str()).ok()
                    },
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(CatchPanicLayer::custom(recovered))
                .layer(Extension(state.clone()))
                .layer(axum_middleware::from_fn(rate_limit))
                .layer(axum_middleware::from_fn(authenticate)),
        )
}

/// Start the server and block until shutdown completes.
///
/// # Errors
/// Returns an error if the listener cannot bind, signal handlers cannot be
/// installed, or the drain fails.
pub async fn serve(port: u16, state: AppState) -> Result<()> {
    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    let mut interrupt =
        signal(SignalKind::interrupt()).context("failed to install SIGINT handler")?;
    let mut terminate =
        signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
    let shutdown_signal = async move {
        tokio::select! {
            _ = interrupt.recv() => info!(signal = "SIGINT", "shutting down server"),
            _ = terminate.recv() => info!(signal = "SIGTERM", "shutting down server"),
        }
    };

    serve_with_shutdown(listener, state, DRAIN_CEILING, shutdown_signal).await
}

/// Run the accept loop until `shutdown_signal` resolves, then drain.
///
/// Shutdown sequence: stop accepting, give in-flight requests up to
/// `drain_ceiling`, and await tracked background work under the same
/// ceiling. The coordinator reports the background outcome over a one-shot
/// channel so the process exit code reflects drain failures.
///
/// # Errors
/// Returns an error if the server fails, the drain exceeds its ceiling, or
/// background tasks do not finish in time.
pub async fn serve_with_shutdown(
    listener: TcpListener,
    state: AppState,
    drain_ceiling: Duration,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let shutdown = CancellationToken::new();
    let (background_tx, background_rx) = oneshot::channel::<Result<()>>();

    state.limiter.clone().spawn_sweeper(shutdown.clone());

    let tasks = state.tasks.clone();
    let coordinator_shutdown = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal.await;
        coordinator_shutdown.cancel();

        // close() lets wait() finish once the set empties.
        tasks.close();
        info!("completing background tasks");
        let outcome = match timeout(drain_ceiling, tasks.wait()).await {
            Ok(()) => Ok(()),
            Err(_) => Err(anyhow!(
                "background tasks still running after {}s drain ceiling",
                drain_ceiling.as_secs()
            )),
        };
        let _ = background_tx.send(outcome);
    });

    let server = axum::serve(
        listener,
        app(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown({
        let token = shutdown.clone();
        async move { token.cancelled().await }
    })
    .into_future();

    // Bound the graceful drain; past the ceiling, in-flight requests are
    // abandoned rather than holding the process open.
    tokio::select! {
        result = server => result.context("server error")?,
        () = async { shutdown.cancelled().await; sleep(drain_ceiling).await } => {
            return Err(anyhow!(
                "graceful drain exceeded {}s; abandoning in-flight requests",
                drain_ceiling.as_secs()
            ));
        }
    }

    background_rx
        .await
        .context("shutdown coordinator dropped")??;

    info!("stopped server");

    Ok(())
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}
