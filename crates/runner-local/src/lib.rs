mod local_runner;

pub use local_runner::{stderr_path, stdout_path, tail_log, LocalRunner};
