use core::{future::Future, time::Duration};
use std::{net::SocketAddr, sync::Arc};

use flakeguard::{CoordinationStore, SequenceGenerator, TimeSource};
use futures::{SinkExt, StreamExt};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::Semaphore,
};
use tokio_util::{codec::Framed, sync::CancellationToken, task::TaskTracker};

use crate::server::{
    handler::{Command, CommandHandler, Response},
    resp::{ProtocolError, Reply, RespCodec},
};

const ACCEPT_BACKOFF_MIN: Duration = Duration::from_millis(10);
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Delay before the next accept after `failures` consecutive accept errors:
/// doubles from 10 ms and caps at 1 s.
fn accept_backoff(failures: u32) -> Duration {
    let factor = 1u32 << failures.saturating_sub(1).min(7);
    ACCEPT_BACKOFF_MIN.saturating_mul(factor).min(ACCEPT_BACKOFF_MAX)
}

/// Accepts connections until `shutdown` resolves, then stops accepting,
/// closes idle connections and waits for in-flight commands to finish.
///
/// At most `max_connections` clients are served at once; further accepts wait
/// for a slot.
pub async fn serve<S, T, G>(
    listener: TcpListener,
    handler: Arc<CommandHandler<S, T, G>>,
    max_connections: usize,
    shutdown: impl Future<Output = ()>,
) -> anyhow::Result<()>
where
    S: CoordinationStore + 'static,
    T: TimeSource + 'static,
    G: SequenceGenerator<T> + Send + Sync + 'static,
{
    let token = CancellationToken::new();
    let tracker = TaskTracker::new();
    let slots = Arc::new(Semaphore::new(max_connections));
    let mut accept_failures = 0u32;
    tokio::pin!(shutdown);

    loop {
        let permit = tokio::select! {
            () = &mut shutdown => break,
            permit = Arc::clone(&slots).acquire_owned() => permit?,
        };

        let (stream, peer) = tokio::select! {
            () = &mut shutdown => break,
            accepted = listener.accept() => match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    // per-connection failures (e.g. EMFILE) must not end the loop
                    accept_failures = accept_failures.saturating_add(1);
                    let delay = accept_backoff(accept_failures);
                    tracing::warn!(error = %e, ?delay, "accept failed");
                    tokio::select! {
                        () = &mut shutdown => break,
                        () = tokio::time::sleep(delay) => continue,
                    }
                }
            },
        };
        accept_failures = 0;

        tracing::info!("accept: {peer}");
        let handler = Arc::clone(&handler);
        let token = token.clone();
        tracker.spawn(async move {
            let result = handle_connection(stream, peer, &handler, &token).await;
            match result {
                Ok(()) => tracing::info!("closed: {peer}"),
                Err(e) => tracing::info!("closed: {peer}, err: {e}"),
            }
            drop(permit);
        });
    }

    tracing::info!(
        connections = tracker.len(),
        "stopped accepting, draining connections"
    );
    tracker.close();
    token.cancel();
    tracker.wait().await;
    Ok(())
}

async fn handle_connection<S, T, G>(
    stream: TcpStream,
    peer: SocketAddr,
    handler: &CommandHandler<S, T, G>,
    token: &CancellationToken,
) -> Result<(), ProtocolError>
where
    S: CoordinationStore,
    T: TimeSource,
    G: SequenceGenerator<T>,
{
    let mut framed = Framed::new(stream, RespCodec);

    loop {
        let request = tokio::select! {
            () = token.cancelled() => return Ok(()),
            frame = framed.next() => frame,
        };

        let args = match request {
            None => return Ok(()),
            Some(Ok(args)) => args,
            Some(Err(e @ ProtocolError::Io(_))) => return Err(e),
            Some(Err(e)) => {
                tracing::debug!(%peer, error = %e, "malformed request");
                framed
                    .send(Reply::error(format!("ERR Protocol error: {e}")))
                    .await?;
                return Err(e);
            }
        };

        // a command already read runs to completion even during shutdown
        match handler.handle(Command::parse(args)).await {
            Response::Continue(reply) => framed.send(reply).await?,
            Response::Close(reply) => {
                framed.send(reply).await?;
                return Ok(());
            }
        }
    }
}
