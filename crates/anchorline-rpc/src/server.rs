//! RPC server: dispatches requests to a content store and a ledger.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use anchorline_store::{ContentStore, LedgerClient, StoreError};

use crate::codec::{decode, read_frame, write_frame};
use crate::error::{Result, RpcError};
use crate::messages::{
    BlobRequest, BlobResponse, ErrorCode, LedgerRequest, LedgerResponse, Request, Response,
    PROTOCOL_VERSION,
};

/// Something that answers requests.
#[async_trait]
pub trait RpcHandler: Send + Sync {
    async fn handle(&self, request: Request) -> Response;
}

/// Serves a content store, a ledger, or both.
#[derive(Clone, Default)]
pub struct NodeService {
    blobs: Option<Arc<dyn ContentStore>>,
    ledger: Option<Arc<dyn LedgerClient>>,
}

impl NodeService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve blob requests from `store`.
    pub fn with_blobs(mut self, store: Arc<dyn ContentStore>) -> Self {
        self.blobs = Some(store);
        self
    }

    /// Serve ledger requests from `ledger`.
    pub fn with_ledger(mut self, ledger: Arc<dyn LedgerClient>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    async fn handle_blob(
        store: &dyn ContentStore,
        request: BlobRequest,
    ) -> std::result::Result<BlobResponse, StoreError> {
        Ok(match request {
            BlobRequest::Put { payload } => BlobResponse::Address(store.put(&payload).await?),
            BlobRequest::Get { address } => BlobResponse::Payload(store.get(&address).await?),
            BlobRequest::Contains { address } => BlobResponse::Flag(store.contains(&address).await?),
            BlobRequest::Purge { address } => BlobResponse::Flag(store.purge(&address).await?),
        })
    }

    async fn handle_ledger(
        ledger: &dyn LedgerClient,
        request: LedgerRequest,
    ) -> std::result::Result<LedgerResponse, StoreError> {
        Ok(match request {
            LedgerRequest::AddData { record } => LedgerResponse::Appended(ledger.append(&record).await?),
            LedgerRequest::GetData { label } => LedgerResponse::Record(ledger.latest(&label).await?),
            LedgerRequest::History { label } => LedgerResponse::Records(ledger.history(&label).await?),
            LedgerRequest::ProductEvents { label } => {
                LedgerResponse::Events(ledger.product_events(&label).await?)
            }
            LedgerRequest::DeployContract { contract_id } => {
                ledger.deploy_contract(&contract_id).await?;
                LedgerResponse::Done
            }
            LedgerRequest::Initialize => LedgerResponse::Summary(ledger.initialize().await?),
            LedgerRequest::AddProduct { label } => {
                ledger.add_product(&label).await?;
                LedgerResponse::Done
            }
            LedgerRequest::AddParty {
                party_id,
                contact_info,
            } => {
                ledger.add_party(&party_id, &contact_info).await?;
                LedgerResponse::Done
            }
            LedgerRequest::AssociateParty { party_id, product } => {
                ledger.associate_party(&party_id, &product).await?;
                LedgerResponse::Done
            }
        })
    }
}

#[async_trait]
impl RpcHandler for NodeService {
    async fn handle(&self, request: Request) -> Response {
        let op = request.op();
        let result = match request {
            Request::Ping => return Response::Pong { version: PROTOCOL_VERSION },
            Request::Blob(req) => match &self.blobs {
                Some(store) => Self::handle_blob(store.as_ref(), req).await.map(Response::Blob),
                None => return Response::unsupported("content store"),
            },
            Request::Ledger(req) => match &self.ledger {
                Some(ledger) => Self::handle_ledger(ledger.as_ref(), req).await.map(Response::Ledger),
                None => return Response::unsupported("ledger"),
            },
        };

        result.unwrap_or_else(|e| {
            debug!(op, error = %e, "request failed");
            Response::from_store_error(&e)
        })
    }
}

/// Accept connections until `shutdown` resolves.
///
/// Each connection is served on its own task; in-flight connections are not
/// cut when the accept loop stops.
pub async fn serve<F>(listener: TcpListener, handler: Arc<dyn RpcHandler>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()>,
{
    info!(addr = ?listener.local_addr().ok(), "rpc server listening");
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        continue;
                    }
                };
                let handler = handler.clone();
                tokio::spawn(async move {
                    if let Err(e) = serve_connection(stream, peer, handler).await {
                        error!(%peer, error = %e, "connection failed");
                    }
                });
            }
            _ = &mut shutdown => {
                info!("rpc server shutting down");
                return Ok(());
            }
        }
    }
}

async fn serve_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    handler: Arc<dyn RpcHandler>,
) -> Result<()> {
    stream.set_nodelay(true)?;
    debug!(%peer, "connection opened");

    while let Some(body) = read_frame(&mut stream).await? {
        let response = match decode::<Request>(&body) {
            Ok(request) => handler.handle(request).await,
            Err(e) => Response::Error {
                code: ErrorCode::InvalidInput,
                message: e.to_string(),
            },
        };
        match write_frame(&mut stream, &response).await {
            // Nothing was written; answer with an error instead.
            Err(e @ RpcError::MessageTooLarge(_)) => {
                warn!(%peer, error = %e, "response too large");
                let rejected = Response::Error {
                    code: ErrorCode::InvalidInput,
                    message: e.to_string(),
                };
                write_frame(&mut stream, &rejected).await?;
            }
            other => other?,
        }
    }

    debug!(%peer, "connection closed");
    Ok(())
}
