fn main() -> Result<(), Box<dyn std::error::Error>> {
    // prost-build shells out to protoc; point it at the vendored binary so
    // builds do not depend on a system install.
    std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path()?);

    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_protos(&["proto/facade.proto"], &["proto"])?;

    println!("cargo:rerun-if-changed=proto/facade.proto");
    println!("cargo:rerun-if-changed=build.rs");
    Ok(())
}
