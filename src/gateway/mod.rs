//! Host server: downstream router, upstream proxy and the fault-injecting listener

mod proxy;
mod router;
mod server;

pub use proxy::Upstream;
pub use router::{AppState, create_router};
pub use server::{FaultServer, Pipeline};
