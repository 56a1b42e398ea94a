//! Wire contracts for the presence service.
//!
//! Message types are hand-declared `prost` messages whose field tags match the
//! `ping.v1` and `id_checker.v1` protobuf packages shared with the rest of the
//! todo-list services. Server and client stubs are generated by `build.rs`.

pub mod ping {
    pub mod v1 {
        /// Lookup request for a single user's last ping.
        #[derive(Clone, PartialEq, prost::Message)]
        pub struct LastUserPingRequest {
            #[prost(string, tag = "1")]
            pub user_id: String,
        }

        /// Presence projection returned to RPC callers.
        ///
        /// `status` is only set when the lookup failed; callers must check it even
        /// though the call itself succeeded.
        #[derive(Clone, PartialEq, prost::Message)]
        pub struct PingResponse {
            #[prost(string, tag = "1")]
            pub user_id: String,
            /// Epoch seconds, 0 when the user has no record or the lookup failed.
            #[prost(int64, tag = "2")]
            pub last_ping: i64,
            #[prost(string, optional, tag = "3")]
            pub status: Option<String>,
        }

        include!(concat!(env!("OUT_DIR"), "/ping.v1.PingService.rs"));
    }
}

pub mod id_checker {
    pub mod v1 {
        #[derive(Clone, PartialEq, prost::Message)]
        pub struct CheckIdRequest {
            #[prost(string, tag = "1")]
            pub id: String,
            #[prost(string, tag = "2")]
            pub access_token: String,
        }

        #[derive(Clone, PartialEq, prost::Message)]
        pub struct CheckIdResponse {
            #[prost(bool, tag = "1")]
            pub is_valid: bool,
        }

        include!(concat!(env!("OUT_DIR"), "/id_checker.v1.IdCheckerService.rs"));
    }
}
