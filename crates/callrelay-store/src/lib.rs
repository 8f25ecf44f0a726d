//! Artifact storage for call audio.
//!
//! Holds the two kinds of audio a call produces on disk: uploaded caller
//! clips (consumed once by transcription, then deleted) and synthesized
//! replies (served to the telephony layer, then retired by a periodic sweep).
//!
//! # Naming
//!
//! Artifacts are addressed only by name. Names are allocated by the store
//! from the clock's current time plus a random suffix, and files are created
//! with `create_new`, so concurrent writers never clobber one another.
//!
//! # Usage
//!
//! ```rust,ignore
//! use callrelay_store::{ArtifactKind, ArtifactStore};
//!
//! let store = ArtifactStore::open("artifacts").await?;
//! let reply = store.write(ArtifactKind::SynthesizedReply, &audio).await?;
//! let bytes = store.read(&reply.name).await?;
//! let retired = store.sweep(Duration::from_secs(600)).await?;
//! ```

mod clock;
mod error;
mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::StoreError;
pub use store::{parse_name, Artifact, ArtifactKind, ArtifactStore};
