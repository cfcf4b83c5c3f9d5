use std::time::Duration;

use common::transport::{memory_transport, TcpConnector, TcpListenerTransport};

mod person;
mod runner;

const CLIENTS: usize = 8;
const REQUESTS_PER_CLIENT: usize = 200;

pub fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .compact()
        .init();

    let (listener, connector) = memory_transport();
    let memory = runner::TestRunner::new(listener, connector)?;
    let report = memory.run(CLIENTS, REQUESTS_PER_CLIENT)?;
    tracing::info!("Memory transport: {}", report);

    let listener = TcpListenerTransport::bind("127.0.0.1:0")?;
    let addr = listener.socket_addr()?;
    let tcp = runner::TestRunner::new(listener, TcpConnector::new(addr))?;
    let report = tcp.run(CLIENTS, REQUESTS_PER_CLIENT / 4)?;
    tracing::info!("TCP transport: {}", report);

    // Give connection threads a moment to log their shutdown
    std::thread::sleep(Duration::from_millis(50));

    Ok(())
}
