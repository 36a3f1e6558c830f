pub mod format;
pub mod handlers;
pub mod response;
mod routes;

pub use routes::create_router;

#[cfg(test)]
mod tests;
