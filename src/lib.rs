//! Store SCP, DICOM JSON conversion and tag extraction for DICOM files.
//!
//! - [`net`] runs a store SCP; every instance received goes through [`receiver`], which
//!   writes it to a directory tree laid out by a [`storage::StorageSortKey`].
//! - [`convert`] maps datasets to and from DICOM JSON documents.
//! - [`tag_group`] extracts configured sets of tags, with alternatives, aliases and
//!   defaults.
//! - [`datetime`] converts DICOM date, date time and time strings to `chrono` types and
//!   back.
//!
//! # Example
//!
//! ```no_run
//! use dcmstore::net::{run_server, DicomNode, ServerConfig};
//! use dcmstore::storage::StorageSortKey;
//!
//! let config = ServerConfig::new(
//!     DicomNode::new("0.0.0.0", 11112, "DCMSTORE"),
//!     "/var/lib/dcmstore",
//!     StorageSortKey::Study,
//! );
//! let server = run_server(&config).unwrap();
//! println!("listening on {}", server.local_addr());
//! // ...
//! server.shutdown();
//! ```

pub mod convert;
pub mod datetime;
pub mod net;
pub mod receiver;
pub mod storage;
pub mod tag_group;

#[cfg(test)]
pub(crate) mod test_utils;

pub use convert::{dataset_to_json, from_json, to_json};
pub use datetime::DicomDateTime;
pub use receiver::{on_instance_received, ReceivedInstance, StorageFailure};
pub use storage::{path_for, InstanceIds, StorageSortKey};
pub use tag_group::{resolve, TagGroup, TagSpec};
