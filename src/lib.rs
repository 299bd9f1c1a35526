/*!
 * blockdb CLI - adapters over the block-hash index core
 */

pub mod commands;
pub mod error;
pub mod logging;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
