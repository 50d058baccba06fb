mod remote_runner;

pub use remote_runner::{parse_remote_status, DelegatingRunner};
