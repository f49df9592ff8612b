//! # Identity Newtypes
//!
//! Domain-primitive newtypes for identifiers throughout the back-office.
//! Each aggregate gets a distinct type — you cannot pass a [`ProcessId`]
//! where a [`TaskId`] is expected.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(Uuid);

        impl $name {
            /// Create a new random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Create an identifier from an existing UUID.
            pub fn from_uuid(id: Uuid) -> Self {
                Self(id)
            }

            /// Access the underlying UUID.
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id! {
    /// A unique identifier for a company (the owner aggregate).
    CompanyId
}

uuid_id! {
    /// A unique identifier for a persisted tax document.
    DocumentId
}

uuid_id! {
    /// A unique identifier for a per-company contact record.
    ContactId
}

uuid_id! {
    /// A unique identifier for a declared tax form instance.
    FormId
}

uuid_id! {
    /// A unique identifier for a compliance process instance.
    ProcessId
}

uuid_id! {
    /// A unique identifier for a unit of work inside a process.
    TaskId
}

uuid_id! {
    /// A unique identifier for a single run of a process.
    ExecutionId
}

uuid_id! {
    /// A unique identifier for an ingestion job record.
    SyncLogId
}

uuid_id! {
    /// A unique identifier for a process template.
    TemplateId
}

uuid_id! {
    /// A unique identifier for a company segment.
    SegmentId
}
