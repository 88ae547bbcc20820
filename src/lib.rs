pub mod ops;

mod app;
pub mod body;
pub mod commands;
pub mod config;
pub mod error;
pub mod stack;
pub mod sync;
pub mod trailer;

pub use app::App;
pub use config::Config;
pub use error::StackerError;

// Disable colors for all tests to get clean output
#[cfg(test)]
#[ctor::ctor]
fn init_tests() {
    colored::control::set_override(false);
}
