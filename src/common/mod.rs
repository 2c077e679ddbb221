pub mod client {
    pub mod models {
        pub mod common;
        pub mod task;
        pub mod user_info;
    }
    pub mod api;
    pub mod client;
    pub mod error;
}

pub mod logger;
