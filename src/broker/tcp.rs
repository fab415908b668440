//! Raw TCP clients.

use std::sync::Arc;

use crate::broker::service::Service;
use crate::broker::transport::FramedTransport;
use crate::net::ProtocolListener;

/// Accept connections from `listener` until the mux closes it.
pub async fn serve(service: Arc<Service>, mut listener: ProtocolListener) {
    let max_frame_bytes = service.config().connection.max_frame_bytes;
    tracing::info!(
        address = %listener.local_addr(),
        protocol = listener.protocol(),
        "TCP server starting"
    );

    while let Ok(conn) = listener.accept().await {
        let peer_addr = conn.peer_addr();
        service.on_accept_conn(FramedTransport::new(conn, max_frame_bytes), peer_addr);
    }

    tracing::info!("TCP server stopped");
}
