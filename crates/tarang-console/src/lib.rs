//! Terminal console for the Tarang simulation service.
//!
//! The console keeps a headless model of the simulation page, starts and
//! stops runs over HTTP and renders the output streamed back over a
//! Socket.IO channel.

pub mod api;
pub mod batcher;
pub mod bootstrap;
pub mod config;
pub mod connection;
pub mod controller;
pub mod dispatch;
pub mod logging;
pub mod page;
pub mod realtime;
pub mod session;
pub mod state;
pub mod tui;
pub mod ui;
