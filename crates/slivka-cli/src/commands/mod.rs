pub mod config;
pub mod list;
pub mod logs;
pub mod run;
pub mod runners;
pub mod status;

pub use config::run as config;
pub use list::run as list;
pub use logs::run as logs;
pub use run::run;
pub use runners::check as check_runners;
pub use runners::run as runners;
pub use status::run as status;
