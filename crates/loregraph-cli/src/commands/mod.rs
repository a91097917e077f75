pub mod edge;
pub mod entity;
pub mod orphans;
pub mod review;
pub mod stats;

pub use edge::EdgeCommand;
pub use entity::EntityCommand;
pub use orphans::OrphansCommand;
pub use review::ReviewCommand;
pub use stats::StatsCommand;
