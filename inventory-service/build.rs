fn main() {
    let method = |name: &str, route: &str, input: &str, output: &str| {
        tonic_build::manual::Method::builder()
            .name(name)
            .route_name(route)
            .input_type(format!("crate::grpc::{}", input))
            .output_type(format!("crate::grpc::{}", output))
            .codec_path("tonic::codec::ProstCodec")
            .build()
    };

    let service = tonic_build::manual::Service::builder()
        .name("ProductService")
        .package("product")
        .method(method("get_product", "GetProduct", "GetProductRequest", "GetProductResponse"))
        .method(method(
            "get_multiple_products",
            "GetMultipleProducts",
            "GetMultipleProductsRequest",
            "GetMultipleProductsResponse",
        ))
        .method(method(
            "reserve_products",
            "ReserveProducts",
            "ReserveProductsRequest",
            "ReserveProductsResponse",
        ))
        .method(method(
            "release_reservation",
            "ReleaseReservation",
            "ReleaseReservationRequest",
            "ReleaseReservationResponse",
        ))
        .build();

    tonic_build::manual::Builder::new().compile(&[service]);
}
