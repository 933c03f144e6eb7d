fn main() {
    // Ensure `protoc` is available in CI and dev environments without
    // requiring system packages. Falls back to vendored binary if PROTOC
    // is not already set by the environment.
    if std::env::var_os("PROTOC").is_none() {
        if let Ok(pb) = protoc_bin_vendored::protoc_bin_path() {
            std::env::set_var("PROTOC", pb);
        }
    }

    let proto = "proto/listing.proto";
    prost_build::Config::new()
        .compile_protos(&[proto], &["proto"])
        .expect("proto build failed");
    println!("cargo:rerun-if-changed={proto}");
}
