pub mod motion;
pub mod stub;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use motion::{MotionBackend, MotionLoader};
pub use stub::{StubBackend, StubLoader};

#[cfg(feature = "backend-tract")]
pub use tract::{TractBackend, TractLoader};
