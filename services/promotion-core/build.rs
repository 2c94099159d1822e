fn main() {
    tonic_build::configure()
        .build_server(true)
        .build_client(false)
        .compile_protos(
            &["../../contracts/proto/commerce/v1/promotion.proto"],
            &["../../contracts/proto"],
        )
        .expect("failed to compile protos");
}
