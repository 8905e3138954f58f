use std::env;
use std::path::PathBuf;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());

    tonic_build::configure()
        .type_attribute(
            "qjazz.rpc.v1.CacheInfo",
            "#[derive(serde::Serialize, serde::Deserialize)]",
        )
        .file_descriptor_set_path(out_dir.join("qjazz_rpc.bin"))
        .include_file("mod.rs")
        .compile(
            &[
                "proto/qjazz/rpc/v1/common.proto",
                "proto/qjazz/rpc/v1/server.proto",
                "proto/qjazz/rpc/v1/admin.proto",
            ],
            &["proto"],
        )?;

    Ok(())
}
