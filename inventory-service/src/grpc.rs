//! gRPC `product.ProductService`: stock lookups and the reservation calls
//! used by the order service.
//!
//! Messages are declared with prost derives (standard protobuf wire format,
//! no `.proto` file); the service stubs come from `build.rs`.

use std::net::SocketAddr;
use std::sync::Arc;

use num_traits::ToPrimitive;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::coordinator::{ReservationCoordinator, ReserveItem, ReserveRequest};
use crate::error::ReservationError;
use crate::models::ProductStock;

#[derive(Clone, prost::Message)]
pub struct GetProductRequest {
    #[prost(string, tag = "1")]
    pub product_id: String,
}

#[derive(Clone, prost::Message)]
pub struct GetProductResponse {
    #[prost(string, tag = "1")]
    pub product_id: String,
    #[prost(string, tag = "2")]
    pub name: String,
    #[prost(string, tag = "3")]
    pub description: String,
    #[prost(double, tag = "4")]
    pub price: f64,
    #[prost(int32, tag = "5")]
    pub stock_quantity: i32,
    #[prost(int32, tag = "6")]
    pub reserved_quantity: i32,
    #[prost(int32, tag = "7")]
    pub available_quantity: i32,
    #[prost(bool, tag = "8")]
    pub is_active: bool,
    #[prost(string, tag = "9")]
    pub sku: String,
}

#[derive(Clone, prost::Message)]
pub struct GetMultipleProductsRequest {
    #[prost(string, repeated, tag = "1")]
    pub product_ids: Vec<String>,
}

#[derive(Clone, prost::Message)]
pub struct GetMultipleProductsResponse {
    #[prost(message, repeated, tag = "1")]
    pub products: Vec<GetProductResponse>,
}

#[derive(Clone, prost::Message)]
pub struct ProductReservationItem {
    #[prost(string, tag = "1")]
    pub product_id: String,
    #[prost(int32, tag = "2")]
    pub quantity: i32,
}

/// Empty strings mean "not given", as usual for proto3 scalars.
#[derive(Clone, prost::Message)]
pub struct ReserveProductsRequest {
    #[prost(string, tag = "1")]
    pub reservation_id: String,
    #[prost(message, repeated, tag = "2")]
    pub products: Vec<ProductReservationItem>,
    #[prost(string, tag = "3")]
    pub user_id: String,
    #[prost(string, tag = "4")]
    pub reason: String,
    #[prost(string, tag = "5")]
    pub reference_id: String,
}

#[derive(Clone, prost::Message)]
pub struct ProductReservationResult {
    #[prost(string, tag = "1")]
    pub product_id: String,
    #[prost(bool, tag = "2")]
    pub success: bool,
    #[prost(int32, tag = "3")]
    pub reserved_quantity: i32,
    #[prost(string, tag = "4")]
    pub message: String,
}

#[derive(Clone, prost::Message)]
pub struct ReserveProductsResponse {
    #[prost(bool, tag = "1")]
    pub all_reserved: bool,
    #[prost(message, repeated, tag = "2")]
    pub results: Vec<ProductReservationResult>,
    #[prost(string, tag = "3")]
    pub reservation_id: String,
}

#[derive(Clone, prost::Message)]
pub struct ReleaseReservationRequest {
    #[prost(string, tag = "1")]
    pub reservation_id: String,
}

#[derive(Clone, prost::Message)]
pub struct ReleaseReservationResponse {
    #[prost(bool, tag = "1")]
    pub success: bool,
    #[prost(string, tag = "2")]
    pub message: String,
}

include!(concat!(env!("OUT_DIR"), "/product.ProductService.rs"));

pub use product_service_server::{ProductService, ProductServiceServer};

impl From<ProductStock> for GetProductResponse {
    fn from(stock: ProductStock) -> Self {
        let product = stock.product;
        Self {
            product_id: product.id.to_string(),
            name: product.name,
            description: product.description.unwrap_or_default(),
            price: product.price.to_f64().unwrap_or_default(),
            stock_quantity: stock.stock.total,
            reserved_quantity: stock.stock.reserved,
            available_quantity: stock.stock.available,
            is_active: product.is_active,
            sku: product.sku.unwrap_or_default(),
        }
    }
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn parse_product_id(raw: &str) -> Result<Uuid, ReservationError> {
    Uuid::parse_str(raw.trim()).map_err(|_| {
        warn!(product_id = %raw, "Invalid UUID format received for product_id");
        ReservationError::validation(format!("Invalid product ID format: {}", raw))
    })
}

/// Converts a coordinator error into a status, logging internal failures
/// with their full context since the caller only sees a generic message.
fn to_status(operation: &'static str, err: ReservationError) -> Status {
    if err.grpc_code() == tonic::Code::Internal {
        error!(operation, error = %err, "Unexpected error while handling gRPC call");
    }
    err.into()
}

pub struct ProductGrpcService {
    coordinator: Arc<ReservationCoordinator>,
}

impl ProductGrpcService {
    pub fn new(coordinator: Arc<ReservationCoordinator>) -> Self {
        Self { coordinator }
    }
}

#[tonic::async_trait]
impl ProductService for ProductGrpcService {
    async fn get_product(
        &self,
        request: Request<GetProductRequest>,
    ) -> Result<Response<GetProductResponse>, Status> {
        let req = request.into_inner();
        let product_id = parse_product_id(&req.product_id)
            .map_err(|_| Status::invalid_argument("Invalid product ID format."))?;

        let stock = self
            .coordinator
            .get_product(product_id)
            .await
            .map_err(|e| to_status("GetProduct", e))?;

        Ok(Response::new(stock.into()))
    }

    async fn get_multiple_products(
        &self,
        request: Request<GetMultipleProductsRequest>,
    ) -> Result<Response<GetMultipleProductsResponse>, Status> {
        let req = request.into_inner();
        let ids: Vec<Uuid> = req
            .product_ids
            .iter()
            .filter_map(|raw| parse_product_id(raw).ok())
            .collect();

        if ids.is_empty() {
            return Ok(Response::new(GetMultipleProductsResponse { products: Vec::new() }));
        }

        let stocks = self
            .coordinator
            .get_products(&ids)
            .await
            .map_err(|e| to_status("GetMultipleProducts", e))?;

        debug!(requested = req.product_ids.len(), found = stocks.len(), "Resolved products");
        Ok(Response::new(GetMultipleProductsResponse {
            products: stocks.into_iter().map(Into::into).collect(),
        }))
    }

    async fn reserve_products(
        &self,
        request: Request<ReserveProductsRequest>,
    ) -> Result<Response<ReserveProductsResponse>, Status> {
        let req = request.into_inner();

        let items = req
            .products
            .iter()
            .map(|item| {
                Ok(ReserveItem {
                    product_id: parse_product_id(&item.product_id)?,
                    quantity: item.quantity,
                })
            })
            .collect::<Result<Vec<_>, ReservationError>>()
            .map_err(|e| to_status("ReserveProducts", e))?;

        let reservation_request = ReserveRequest {
            reservation_id: non_empty(req.reservation_id),
            items,
            reserved_by: non_empty(req.user_id),
            reason: non_empty(req.reason),
            reference_id: non_empty(req.reference_id),
        };

        let outcome = self
            .coordinator
            .reserve(reservation_request)
            .await
            .map_err(|e| to_status("ReserveProducts", e))?;

        Ok(Response::new(ReserveProductsResponse {
            all_reserved: outcome.all_reserved,
            results: outcome
                .results
                .into_iter()
                .map(|r| ProductReservationResult {
                    product_id: r.product_id.to_string(),
                    success: r.success,
                    reserved_quantity: r.reserved_quantity,
                    message: r.message,
                })
                .collect(),
            reservation_id: outcome.reservation_id,
        }))
    }

    async fn release_reservation(
        &self,
        request: Request<ReleaseReservationRequest>,
    ) -> Result<Response<ReleaseReservationResponse>, Status> {
        let req = request.into_inner();

        let outcome = self
            .coordinator
            .release(&req.reservation_id)
            .await
            .map_err(|e| to_status("ReleaseReservation", e))?;

        Ok(Response::new(ReleaseReservationResponse {
            success: outcome.success,
            message: outcome.message,
        }))
    }
}

pub fn grpc_server(coordinator: Arc<ReservationCoordinator>) -> ProductServiceServer<ProductGrpcService> {
    ProductServiceServer::new(ProductGrpcService::new(coordinator))
}

/// Serves the gRPC API until `shutdown` is cancelled.
pub async fn serve_grpc(
    coordinator: Arc<ReservationCoordinator>,
    addr: SocketAddr,
    shutdown: CancellationToken,
) -> Result<(), tonic::transport::Error> {
    info!(%addr, "gRPC server listening");
    tonic::transport::Server::builder()
        .add_service(grpc_server(coordinator))
        .serve_with_shutdown(addr, shutdown.cancelled_owned())
        .await
}

/// Runs [`serve_grpc`] on its own task. A server that fails, for example
/// because the port is taken, cancels `shutdown` so the rest of the process
/// stops with it.
pub fn spawn_grpc(
    coordinator: Arc<ReservationCoordinator>,
    addr: SocketAddr,
    shutdown: CancellationToken,
) -> JoinHandle<Result<(), tonic::transport::Error>> {
    tokio::spawn(async move {
        let result = serve_grpc(coordinator, addr, shutdown.clone()).await;
        if let Err(e) = &result {
            error!(%addr, error = %e, "gRPC server failed, shutting down");
            shutdown.cancel();
        }
        result
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::ReservationSettings;
    use crate::store::{InventoryStore, MemoryInventoryStore};

    async fn service() -> (ProductGrpcService, Arc<MemoryInventoryStore>, Uuid) {
        let store = Arc::new(MemoryInventoryStore::new());
        let p = store.add_product("Keyboard", 10).await;
        let coordinator = Arc::new(ReservationCoordinator::new(store.clone(), ReservationSettings::default()));
        (ProductGrpcService::new(coordinator), store, p)
    }

    fn reserve(product_id: &str, quantity: i32) -> Request<ReserveProductsRequest> {
        Request::new(ReserveProductsRequest {
            products: vec![ProductReservationItem {
                product_id: product_id.to_string(),
                quantity,
            }],
            user_id: "order-service".to_string(),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn get_product_reports_available_quantity() {
        let (svc, _store, p) = service().await;
        svc.reserve_products(reserve(&p.to_string(), 3)).await.unwrap();

        let response = svc
            .get_product(Request::new(GetProductRequest { product_id: p.to_string() }))
            .await
            .unwrap()
            .into_inner();

        assert_eq!(response.name, "Keyboard");
        assert_eq!(response.stock_quantity, 10);
        assert_eq!(response.reserved_quantity, 3);
        assert_eq!(response.available_quantity, 7);
        assert!(response.is_active);
    }

    #[tokio::test]
    async fn get_product_maps_errors_to_status_codes() {
        let (svc, _store, _p) = service().await;

        let bad = svc
            .get_product(Request::new(GetProductRequest { product_id: "not-a-uuid".to_string() }))
            .await
            .unwrap_err();
        assert_eq!(bad.code(), tonic::Code::InvalidArgument);

        let missing = svc
            .get_product(Request::new(GetProductRequest { product_id: Uuid::new_v4().to_string() }))
            .await
            .unwrap_err();
        assert_eq!(missing.code(), tonic::Code::NotFound);
    }

    #[tokio::test]
    async fn get_multiple_products_skips_malformed_ids() {
        let (svc, _store, p) = service().await;

        let response = svc
            .get_multiple_products(Request::new(GetMultipleProductsRequest {
                product_ids: vec!["garbage".to_string(), p.to_string(), Uuid::new_v4().to_string()],
            }))
            .await
            .unwrap()
            .into_inner();

        assert_eq!(response.products.len(), 1);
        assert_eq!(response.products[0].product_id, p.to_string());
    }

    #[tokio::test]
    async fn reserve_rejects_malformed_ids_without_touching_stock() {
        let (svc, store, p) = service().await;
        let mut request = reserve(&p.to_string(), 2);
        request.get_mut().products.push(ProductReservationItem {
            product_id: "bogus".to_string(),
            quantity: 1,
        });

        let status = svc.reserve_products(request).await.unwrap_err();

        assert_eq!(status.code(), tonic::Code::InvalidArgument);
        assert_eq!(store.stock_level(p).await.unwrap().reserved, 0);
    }

    #[tokio::test]
    async fn reserve_then_release_over_grpc() {
        let (svc, store, p) = service().await;

        let reserved = svc.reserve_products(reserve(&p.to_string(), 4)).await.unwrap().into_inner();
        assert!(reserved.all_reserved);
        assert!(!reserved.reservation_id.is_empty());
        assert_eq!(reserved.results[0].reserved_quantity, 4);
        let lines = store.find_by_reservation_id(&reserved.reservation_id).await.unwrap();
        assert_eq!(lines[0].reserved_by.as_deref(), Some("order-service"));
        assert_eq!(lines[0].reason, "ORDER");

        let short = svc.reserve_products(reserve(&p.to_string(), 7)).await.unwrap().into_inner();
        assert!(!short.all_reserved);
        assert_eq!(short.results[0].message, "Insufficient stock. Available: 6, Requested: 7");

        let release = || {
            Request::new(ReleaseReservationRequest {
                reservation_id: reserved.reservation_id.clone(),
            })
        };
        assert!(svc.release_reservation(release()).await.unwrap().into_inner().success);
        assert!(!svc.release_reservation(release()).await.unwrap().into_inner().success);
        assert_eq!(store.stock_level(p).await.unwrap().reserved, 0);
    }

    #[tokio::test]
    async fn release_requires_an_id() {
        let (svc, _store, _p) = service().await;

        let status = svc
            .release_reservation(Request::new(ReleaseReservationRequest::default()))
            .await
            .unwrap_err();

        assert_eq!(status.code(), tonic::Code::InvalidArgument);
    }

    #[tokio::test]
    async fn bind_failure_cancels_shutdown() {
        let (svc, _store, _p) = service().await;
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = taken.local_addr().unwrap();
        let token = CancellationToken::new();

        let result = spawn_grpc(svc.coordinator.clone(), addr, token.clone()).await.unwrap();

        assert!(result.is_err());
        assert!(token.is_cancelled());
    }
}
