mod backend;
mod backends;
pub mod filter;
mod registry;
mod result;

pub use backend::DetectorBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use backends::StubBackend;
pub use filter::{DetectionFilter, FilterSettings};
pub use registry::{BackendRegistry, SharedDetector};
pub use result::{Detection, Position, RawCandidate};
