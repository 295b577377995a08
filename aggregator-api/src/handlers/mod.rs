mod app;
mod events;
mod publish;

pub use app::add_routes;
