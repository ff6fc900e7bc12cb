pub mod child;

pub use child::{ChildHandle, ProcessError, SpawnSpec};
