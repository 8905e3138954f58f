//! Generated protobuf/tonic stubs for the worker pool's gRPC surface
//! (§4.C5/C6, §6). The `.proto` sources live under `proto/qjazz/rpc/v1`;
//! `build.rs` compiles them with `tonic-build`, following the teacher's
//! `cloud-api-grpc` build script shape.

pub mod proto {
    pub mod qjazz {
        pub mod rpc {
            pub mod v1 {
                include!(concat!(env!("OUT_DIR"), "/qjazz.rpc.v1.rs"));
            }
        }
    }
}

pub use proto::qjazz::rpc::v1 as rpc;
