mod backend;
mod backends;
mod registry;
mod result;

pub use backend::DetectorBackend;
pub use backends::StubBackend;
pub use registry::BackendRegistry;
pub use result::RawDetection;
