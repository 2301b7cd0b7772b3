/// Builds the gRPC client and server code for the quartet `.proto`
/// definitions using `tonic-prost-build`.
///
/// All three packages (`greet`, `calculator`, `blog`) are compiled in a single
/// pass so that one encoded file descriptor set covers every service. The
/// server registers that set with `tonic-reflection`.
///
/// # Files and Paths
///
/// - Proto files: `proto/greet.proto`, `proto/calculator.proto`,
///   `proto/blog.proto`
/// - Includes: `proto/`
///
/// # Panics
///
/// This function will `panic!` if code generation fails.
///
/// # Output
///
/// Generated code is pulled in via:
///
/// ```rust
/// pub mod greet {
///     tonic::include_proto!("greet");
/// }
/// ```
use std::env;
use std::path::PathBuf;

const PROTOS: [&str; 3] = [
    "proto/greet.proto",
    "proto/calculator.proto",
    "proto/blog.proto",
];

fn main() {
    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());
    let descriptor_path = out_dir.join("quartet_descriptor.bin");

    let mut config = tonic_prost_build::Config::new();
    config.file_descriptor_set_path(&descriptor_path);

    for proto in PROTOS {
        println!("cargo:rerun-if-changed={proto}");
    }

    tonic_prost_build::configure()
        .compile_with_config(config, &PROTOS, &["proto"])
        .unwrap();
}
