//! CLI command implementations.
//!
//! | Module   | Commands handled |
//! |----------|------------------|
//! | `watch`  | `Watch`          |
//! | `scan`   | `Scan`           |

pub mod scan;
pub mod watch;

pub use scan::cmd_scan;
pub use watch::cmd_watch;
