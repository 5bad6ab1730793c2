fn main() -> Result<(), anyhow::Error> {
    println!("cargo:rerun-if-changed=proto/secret_provider.proto");

    let proto_config = prost_build::Config::new();
    let file_descriptors = protox::compile(["proto/secret_provider.proto"], ["proto"])?;

    // The server half is only exercised by the in-process fake sidecar used in tests.
    tonic_prost_build::configure()
        .build_client(true)
        .build_server(true)
        .compile_fds_with_config(file_descriptors, proto_config)?;

    Ok(())
}
