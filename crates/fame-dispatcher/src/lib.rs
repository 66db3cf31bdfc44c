pub mod catalog;
pub mod dispatcher;
pub mod glob;

pub use catalog::{ModuleCatalog, OptionDescriptor, Transform};
pub use dispatcher::{DispatchError, Dispatcher};
