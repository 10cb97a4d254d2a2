pub mod config;
pub mod game_loop;
pub mod headless;
pub mod rate_limit;
pub mod session;
