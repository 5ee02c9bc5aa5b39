pub mod concurrency;
pub mod config;
pub mod console;
pub mod http;
pub mod listing;
pub mod multipart;
pub mod router;
pub mod routes;
pub mod storage;
