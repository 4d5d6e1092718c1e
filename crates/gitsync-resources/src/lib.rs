//! Store resources for gitsync
//!
//! Typed objects (dashboards, folders) as the resource store sees them, the
//! provenance annotations that mark repository ownership, conversion between
//! repository files and objects, and the [`ResourceStore`] collaborator seam
//! with an in-memory implementation.

pub mod convert;
pub mod error;
pub mod kinds;
pub mod naming;
pub mod object;
pub mod provenance;
pub mod store;

pub use convert::{ClassicType, Converter, Decoded, FileFormat, slugify};
pub use error::{Error, FieldCause, Result};
pub use kinds::{DASHBOARD, FOLDER, KindInfo, KindRegistry};
pub use naming::NameGenerator;
pub use object::{GroupKind, ObjectMeta, ResourceKey, ResourceObject};
pub use provenance::{ManagerKind, Provenance};
pub use store::{
    Admission, Identity, MemoryStore, MutationOptions, ResourceStore, SchemaAdmission,
};
