//! Command implementations, one module per subcommand, written as methods on
//! [`crate::App`] so they can run against mocked collaborators in tests.

mod land;
mod status;
mod submit;
