pub mod command;
pub mod docker;
pub mod locker;
pub mod restic;
pub mod scratch;
pub mod secrets;

// Contract seams for the external collaborators
pub mod runtime;
pub mod store;

#[allow(unused_imports)]
pub use runtime::{ContainerRuntime, DockerRuntime};
#[allow(unused_imports)]
pub use store::{ArtifactKind, ArtifactScope, Snapshot, SnapshotStore, TagSet};
