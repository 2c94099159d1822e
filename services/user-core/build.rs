fn main() {
    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_protos(
            &["../../contracts/proto/commerce/v1/user.proto"],
            &["../../contracts/proto"],
        )
        .expect("failed to compile protos");
}
