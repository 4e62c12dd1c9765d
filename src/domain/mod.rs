pub mod http_log;

pub use http_log::HttpLog;
