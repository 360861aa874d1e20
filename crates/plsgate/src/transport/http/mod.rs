mod routes;
mod server;

pub use routes::{ErrorPages, routes};
pub use server::serve;
