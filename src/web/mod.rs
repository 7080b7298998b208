pub mod command;
pub mod handlers;
pub mod routes;
