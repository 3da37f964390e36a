//! Connection limiting over real sockets.

use std::net::SocketAddr;
use std::time::Duration;

use axum::serve::ListenerExt;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};

use ddos_shield::http::default_app;
use ddos_shield::lifecycle::Shutdown;
use ddos_shield::net::LimitedListener;

async fn serve(max_connections: usize) -> (SocketAddr, std::sync::Arc<ddos_shield::net::ConnectionCounters>, Shutdown) {
    let tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let listener = LimitedListener::from_tcp(tcp, max_connections, Duration::from_secs(1));
    let addr = axum::serve::Listener::local_addr(&listener).unwrap();
    let counters = listener.counters();

    let shutdown = Shutdown::new();
    let stop = shutdown.wait();
    tokio::spawn(async move {
        let app = default_app().into_make_service_with_connect_info::<SocketAddr>();
        let _ = axum::serve(listener.tap_io(|_| {}), app)
            .with_graceful_shutdown(stop)
            .await;
    });

    (addr, counters, shutdown)
}

#[tokio::test]
async fn excess_connection_is_shed_and_slot_is_reused() {
    let (addr, counters, shutdown) = serve(1).await;

    let holder = TcpStream::connect(addr).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(counters.current(), 1);

    let mut excess = TcpStream::connect(addr).await.unwrap();
    let mut buf = [0u8; 16];
    let read = tokio::time::timeout(Duration::from_secs(5), excess.read(&mut buf))
        .await
        .expect("shed connection should be closed");
    assert!(matches!(read, Ok(0) | Err(_)));

    drop(holder);
    tokio::time::sleep(Duration::from_millis(100)).await;

    let stats = counters.stats();
    assert_eq!(stats.rejected, 1);
    assert_eq!(stats.current, 0);

    let client = reqwest::Client::builder().no_proxy().build().unwrap();
    let res = client
        .get(format!("http://{addr}/health"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.text().await.unwrap(), "ok");

    shutdown.trigger();
}

#[tokio::test]
async fn zero_max_falls_back_to_default() {
    let tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let listener = LimitedListener::from_tcp(tcp, 0, Duration::from_secs(1));
    assert_eq!(
        listener.available_slots(),
        ddos_shield::net::listener::DEFAULT_MAX_CONNECTIONS
    );
}
