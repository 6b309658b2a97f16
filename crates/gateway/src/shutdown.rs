//! Graceful drain with a bounded grace period

use std::future::Future;
use std::io;
use std::process::ExitCode;
use std::time::Duration;
use tokio::sync::watch;

/// How the server stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shutdown {
    /// In-flight requests finished, or the server stopped on its own
    Clean,
    /// The grace period ran out with requests still in flight
    Forced,
}

impl From<Shutdown> for ExitCode {
    fn from(shutdown: Shutdown) -> Self {
        match shutdown {
            Shutdown::Clean => ExitCode::SUCCESS,
            Shutdown::Forced => ExitCode::FAILURE,
        }
    }
}

/// Drive `server` until `signal` completes, then set `drain` and give the
/// server `grace` to finish its in-flight requests.
///
/// `server` is expected to stop accepting connections once `drain` is true.
pub async fn serve_until_drained<S, F>(
    server: S,
    signal: F,
    drain: watch::Sender<bool>,
    grace: Duration,
) -> io::Result<Shutdown>
where
    S: Future<Output = io::Result<()>>,
    F: Future<Output = ()>,
{
    tokio::pin!(server);

    tokio::select! {
        result = &mut server => {
            result?;
            return Ok(Shutdown::Clean);
        }
        _ = signal => {}
    }

    let _ = drain.send(true);

    match tokio::time::timeout(grace, &mut server).await {
        Ok(result) => {
            result?;
            Ok(Shutdown::Clean)
        }
        Err(_) => {
            tracing::error!(grace_ms = grace.as_millis() as u64, "Forced shutdown");
            Ok(Shutdown::Forced)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::get, Router};
    use std::future::{pending, IntoFuture};
    use tokio::net::TcpListener;

    async fn serve(router: Router) -> (String, watch::Sender<bool>, impl Future<Output = io::Result<()>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let (drain, mut drained) = watch::channel(false);
        let server = axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = drained.wait_for(|stop| *stop).await;
            })
            .into_future();
        (base, drain, server)
    }

    #[tokio::test]
    async fn test_idle_server_drains_cleanly() {
        let (_, drain, server) = serve(Router::new()).await;

        let outcome = serve_until_drained(server, async {}, drain, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(outcome, Shutdown::Clean);
    }

    #[tokio::test]
    async fn test_stuck_request_forces_shutdown() {
        let router = Router::new().route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                "done"
            }),
        );
        let (base, drain, server) = serve(router).await;

        tokio::spawn(async move {
            let _ = reqwest::get(format!("{}/slow", base)).await;
        });
        let signal = tokio::time::sleep(Duration::from_millis(200));

        let started = std::time::Instant::now();
        let outcome = serve_until_drained(server, signal, drain, Duration::from_millis(300))
            .await
            .unwrap();
        assert_eq!(outcome, Shutdown::Forced);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_server_stopping_on_its_own_is_clean() {
        let (drain, _drained) = watch::channel(false);
        let outcome = serve_until_drained(async { Ok(()) }, pending(), drain, Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(outcome, Shutdown::Clean);
    }

    #[tokio::test]
    async fn test_server_error_propagates() {
        let (drain, _drained) = watch::channel(false);
        let result = serve_until_drained(
            async { Err(io::Error::other("listener closed")) },
            pending(),
            drain,
            Duration::from_millis(10),
        )
        .await;
        assert!(result.is_err());
    }
}
