use tonic_build::manual::{Builder, Method, Service};

const PROST_CODEC: &str = "tonic::codec::ProstCodec";

fn main() {
    let ping = Service::builder()
        .name("PingService")
        .package("ping.v1")
        .method(
            Method::builder()
                .name("ping")
                .route_name("Ping")
                .input_type("crate::ping::v1::LastUserPingRequest")
                .output_type("crate::ping::v1::PingResponse")
                .codec_path(PROST_CODEC)
                .build(),
        )
        .build();

    let id_checker = Service::builder()
        .name("IdCheckerService")
        .package("id_checker.v1")
        .method(
            Method::builder()
                .name("check_id")
                .route_name("CheckId")
                .input_type("crate::id_checker::v1::CheckIdRequest")
                .output_type("crate::id_checker::v1::CheckIdResponse")
                .codec_path(PROST_CODEC)
                .build(),
        )
        .build();

    Builder::new().compile(&[ping, id_checker]);
}
