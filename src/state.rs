//! Artifact state shared between stages.
//!
//! Stages communicate only through artifacts addressed by
//! (verification id, category, logical name). The [`StateStore`] writes them
//! through a [`BlobStore`] and hands back [`Reference`]s, which travel between
//! stages inside an [`Envelope`].
mod blob;
mod envelope;
mod paths;
mod reference;
mod registry;
mod store;

pub use blob::{BlobMeta, BlobStore, FsBlobStore, MemoryBlobStore};
pub use envelope::{Envelope, VerificationStatus};
pub use paths::{date_partition, standard_path, versioned_path};
pub use reference::{Location, Reference};
pub use registry::{ArtifactKey, Category, LogicalName};
pub use store::{content_hash, StateStore};
