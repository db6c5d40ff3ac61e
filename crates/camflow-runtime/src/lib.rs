//! camflow Runtime - Priority dispatch and the perception pipeline
//!
//! Publish path for one camera frame:
//! 1. Camera publishes an `Image` on `/image`
//! 2. Bus fans out one job per subscriber, tagged with its priority
//! 3. Worker pool drains HIGH jobs before DEFAULT jobs
//! 4. Object detector traces its delay and work, publishes a trigger
//! 5. Data logger traces its delay and work, then blocks on "I/O"
//! 6. Actuation node traces end-to-end delay and its own work

pub mod error;
pub mod config;
pub mod scheduler;
pub mod bus;
pub mod node;
pub mod pipeline;
pub mod camera;

pub use error::*;
pub use config::*;
pub use scheduler::*;
pub use bus::*;
pub use node::*;
pub use pipeline::*;
pub use camera::*;
