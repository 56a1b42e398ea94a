//! gRPC surface for service-to-service presence lookups.
//!
//! Callers are trusted peers, so no identity check runs here. Store failures are
//! reported in the response `status` field, not as a gRPC error status.

use std::sync::Arc;

use presence_proto::ping::v1::{
    LastUserPingRequest, PingResponse,
    ping_service_server::{PingService, PingServiceServer},
};
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;
use tonic::{Request, Response, Status};

use crate::presence::PresenceService;

pub struct PingRpc {
    presence: Arc<PresenceService>,
}

impl PingRpc {
    pub fn new(presence: Arc<PresenceService>) -> Self {
        Self { presence }
    }
}

#[tonic::async_trait]
impl PingService for PingRpc {
    async fn ping(
        &self,
        request: Request<LastUserPingRequest>,
    ) -> Result<Response<PingResponse>, Status> {
        let user_id = request.into_inner().user_id;

        let response = match self.presence.get_presence(&user_id).await {
            Ok(record) => PingResponse {
                user_id,
                last_ping: record.last_seen.timestamp(),
                status: None,
            },
            Err(error) => {
                tracing::warn!(%user_id, reason = %error, "presence lookup failed");
                PingResponse {
                    user_id,
                    last_ping: 0,
                    status: Some(error.to_string()),
                }
            }
        };

        Ok(Response::new(response))
    }
}

pub async fn serve_rpc(
    listener: TcpListener,
    presence: Arc<PresenceService>,
) -> Result<(), tonic::transport::Error> {
    Server::builder()
        .add_service(PingServiceServer::new(PingRpc::new(presence)))
        .serve_with_incoming(TcpListenerStream::new(listener))
        .await
}
