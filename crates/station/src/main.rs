use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};

use garden_station::config::Args;
use garden_station::gardener::Gardener;
use garden_station::messenger::{Bus, Messenger};
use garden_station::{logging, web};

#[tokio::main]
async fn main() -> Result<()> {
    // ── Config + logging ────────────────────────────────────────────
    let args = Args::parse();
    logging::init(&args.log)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        station = %args.station_name,
        mock = args.mock,
        broker = %args.mqtt_broker,
        port = args.mqtt_port,
        "starting garden-station"
    );

    // Handlers go in before any device is touched.
    let signal = shutdown_signal();
    run(args, signal).await?;

    info!("garden-station exited");
    Ok(())
}

/// Bring the station up and keep it running until `signal` resolves. The
/// signal is honoured at any point after init, including while the broker
/// connection is still pending.
async fn run(args: Args, signal: impl Future<Output = ()>) -> Result<()> {
    let config = args.station_config()?;
    tokio::pin!(signal);

    // ── Devices + activities ────────────────────────────────────────
    let (messenger, connection) = Messenger::new(&args.mqtt());
    let bus: Arc<dyn Bus> = Arc::new(messenger.clone());
    let mut gardener = Gardener::init(&config, bus)?;

    // ── MQTT ────────────────────────────────────────────────────────
    let started = tokio::select! {
        result = gardener.start(&messenger, connection, args.connect_timeout()) => Some(result),
        _ = &mut signal => None,
    };
    match started {
        Some(Ok(())) => {}
        Some(Err(e)) => {
            error!(error = %e, "station failed to start");
            gardener.stop();
            gardener.join().await;
            return Err(e).context("failed to start station");
        }
        None => {
            info!("signalled before the station finished starting");
            gardener.stop();
            gardener.join().await;
            return Ok(());
        }
    }

    // ── Status server ───────────────────────────────────────────────
    let status = gardener.status(&args.station_name, messenger.connected_flag());
    let web = tokio::spawn(web::serve(status, args.web_port, gardener.shutdown_token()));

    // ── Run until signalled ─────────────────────────────────────────
    signal.await;
    gardener.stop();
    gardener.join().await;

    match web.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "status server exited with an error"),
        Err(e) => error!(error = %e, "status server panicked"),
    }
    Ok(())
}

/// Register for SIGINT (and SIGTERM on unix) right away. The returned future
/// resolves on the first one received.
fn shutdown_signal() -> impl Future<Output = ()> {
    #[cfg(unix)]
    let listeners = {
        use tokio::signal::unix::{signal, SignalKind};
        (
            signal(SignalKind::interrupt()),
            signal(SignalKind::terminate()),
        )
    };

    async move {
        #[cfg(unix)]
        {
            let (interrupt, terminate) = listeners;
            tokio::select! {
                _ = recv(interrupt, "SIGINT") => info!("received SIGINT"),
                _ = recv(terminate, "SIGTERM") => info!("received SIGTERM"),
            }
        }

        #[cfg(not(unix))]
        {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
            info!("received ctrl-c");
        }
    }
}

/// Wait on one signal stream; park forever if it could not be installed.
#[cfg(unix)]
async fn recv(listener: std::io::Result<tokio::signal::unix::Signal>, name: &str) {
    match listener {
        Ok(mut stream) => {
            stream.recv().await;
        }
        Err(e) => {
            error!(signal = name, error = %e, "failed to install signal handler");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;
    use tokio::time::{sleep, timeout};

    /// Accepts one client and reads whatever it sends. Answers CONNECT with a
    /// CONNACK only when `ack` is set; never closes the socket on its own.
    async fn broker(ack: bool) -> (u16, JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let task = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 512];
            let mut acked = false;
            loop {
                match socket.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(_) if ack && !acked => {
                        socket.write_all(&[0x20, 0x02, 0x00, 0x00]).await.unwrap();
                        acked = true;
                    }
                    Ok(_) => {}
                }
            }
        });
        (port, task)
    }

    fn args(port: u16) -> Args {
        let port = port.to_string();
        Args::parse_from([
            "garden-station",
            "--mock",
            "--mqtt-broker",
            "127.0.0.1",
            "--mqtt-port",
            port.as_str(),
            "--web-port",
            "0",
            "--connect-timeout-secs",
            "30",
        ])
    }

    #[tokio::test]
    async fn signal_while_connecting_stops_cleanly() {
        let (port, broker) = broker(false).await;

        let outcome = timeout(
            Duration::from_secs(5),
            run(args(port), sleep(Duration::from_millis(200))),
        )
        .await
        .expect("shutdown waited for the connect timeout");
        outcome.unwrap();

        broker.abort();
    }

    #[tokio::test]
    async fn signal_after_start_stops_cleanly() {
        let (port, broker) = broker(true).await;

        let outcome = timeout(
            Duration::from_secs(5),
            run(args(port), sleep(Duration::from_millis(500))),
        )
        .await
        .expect("station did not shut down");
        outcome.unwrap();

        broker.abort();
    }

    #[tokio::test]
    async fn failed_connect_is_an_error() {
        let mut args = args(9);
        args.connect_timeout_secs = 1;
        let err = run(args, std::future::pending()).await.unwrap_err();
        assert!(err.to_string().contains("failed to start station"), "{err:#}");
    }
}
