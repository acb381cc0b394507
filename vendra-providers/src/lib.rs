pub mod http;
pub mod internal;
pub mod normalize;
pub mod pindeck;
pub mod registry;
pub mod topupbox;

pub use internal::InternalStoreDriver;
pub use pindeck::PinDeckDriver;
pub use registry::DriverRegistry;
pub use topupbox::TopupBoxDriver;
