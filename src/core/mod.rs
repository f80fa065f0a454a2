pub mod blob;
pub mod orchestrator;
pub mod routing;

pub use blob::{Blob, ByteRange};
pub use orchestrator::{Actor, ActorError, ActorGroup};
pub use routing::{RouteTarget, RoutingError, RoutingRuleSet};
