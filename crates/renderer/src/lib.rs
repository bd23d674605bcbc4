//! The render farm: a disposable static file server plus a pool of
//! headless-browser pages that turn logical routes into static markup.

pub mod browser;
pub mod farm;
pub mod server;

pub use farm::{render_all, RenderOptions, RenderReport, RouteFailure};
